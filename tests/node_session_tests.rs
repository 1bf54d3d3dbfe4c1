use fanbus::adapter::node::{NodeMessage, NodeResponse, StatusCode, Variant};
use fanbus::client::{ClientError, NodeClient};
use fanbus::fields::Attribute;
use fanbus::node_server::{self, NodeSession};
use fanbus::*;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_modbus::client::{tcp, Reader, Writer};
use tokio_modbus::prelude::ExceptionCode;

struct Harness {
    state: Arc<ControlState>,
    metrics: Arc<ServiceMetrics>,
    node: Arc<NodeAdapter>,
    register: Arc<RegisterAdapter>,
}

fn harness(policy: AccessPolicy) -> Harness {
    let state = Arc::new(ControlState::default());
    let metrics = Arc::new(ServiceMetrics::new());
    let authenticator = Arc::new(
        RoleAuthenticator::new(policy)
            .with_user("manager", "admin456")
            .with_trusted_peer([127, 0, 0, 1].into()),
    );
    let node = FieldGateway::new(
        Protocol::Node,
        Arc::clone(&state),
        AccessMediator::new(Arc::clone(&authenticator), ThresholdLimits::default()),
        Arc::clone(&metrics),
    );
    let register = FieldGateway::new(
        Protocol::Register,
        Arc::clone(&state),
        AccessMediator::new(authenticator, ThresholdLimits::default()),
        Arc::clone(&metrics),
    );
    Harness {
        state,
        metrics,
        node: Arc::new(NodeAdapter::new(node)),
        register: Arc::new(RegisterAdapter::new(register)),
    }
}

async fn start_node_server(adapter: Arc<NodeAdapter>) -> (SocketAddr, watch::Sender<bool>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(node_server::serve(listener, adapter, shutdown_rx));
    (addr, shutdown_tx)
}

fn peer() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 40000))
}

#[test]
fn test_session_is_anonymous_until_activated() {
    let h = harness(AccessPolicy::strict());
    let mut session = NodeSession::new(Arc::clone(&h.node), peer());
    assert!(session.identity().is_none());

    let (response, open) = session.handle_line(r#"{"type":"Read","nodes":[{"node_id":"FanControl.FanStatus"}]}"#);
    assert!(open);
    assert!(matches!(response, NodeResponse::ReadResult { .. }));
    assert_eq!(session.identity(), Some(&Identity::anonymous()));

    // Identity is fixed for the rest of the session
    let (response, open) = session.handle_message(NodeMessage::ActivateSession {
        username: Some("manager".to_string()),
        password: Some("admin456".to_string()),
    });
    assert!(open);
    assert!(matches!(
        response,
        NodeResponse::Fault {
            status: StatusCode::BadSessionIdInvalid,
            ..
        }
    ));
    assert_eq!(session.identity(), Some(&Identity::anonymous()));
    assert_eq!(h.metrics.snapshot().sessions_opened, 1);
}

#[test]
fn test_garbage_line_keeps_session_open() {
    let h = harness(AccessPolicy::strict());
    let mut session = NodeSession::new(h.node, peer());

    let (response, open) = session.handle_line("{not json");
    assert!(open);
    assert!(matches!(
        response,
        NodeResponse::Fault {
            status: StatusCode::BadDecodingError,
            ..
        }
    ));

    let (response, open) = session.handle_message(NodeMessage::CloseSession);
    assert_eq!(response, NodeResponse::SessionClosed);
    assert!(!open);
}

#[tokio::test]
async fn test_authenticated_client_reads_and_writes() {
    let h = harness(AccessPolicy::strict());
    let (addr, shutdown) = start_node_server(Arc::clone(&h.node)).await;

    let mut client = NodeClient::connect(addr).await.unwrap();
    let role = client.activate(Some("manager"), Some("admin456")).await.unwrap();
    assert_eq!(role, Role::Authenticated);

    client
        .write_field(FieldId::HighThreshold, Variant::Double(60.0))
        .await
        .unwrap();
    let value = client.read_field(FieldId::HighThreshold, Attribute::Value).await.unwrap();
    assert_eq!(value.status, StatusCode::Good);
    assert_eq!(value.value, Some(Variant::Double(60.0)));
    assert_eq!(h.state.get(FieldId::HighThreshold), FieldValue::Scaled(600));

    let level = client
        .read_field(FieldId::ManualOverride, Attribute::UserAccessLevel)
        .await
        .unwrap();
    assert_eq!(level.value, Some(Variant::UInt(3)));

    client.close().await.unwrap();
    shutdown.send(true).unwrap();
}

#[tokio::test]
async fn test_bad_login_falls_back_to_anonymous() {
    let h = harness(AccessPolicy::strict());
    let (addr, shutdown) = start_node_server(Arc::clone(&h.node)).await;

    let mut client = NodeClient::connect(addr).await.unwrap();
    let role = client.activate(Some("manager"), Some("guess")).await.unwrap();
    assert_eq!(role, Role::Anonymous);

    // Reading is still allowed
    let value = client.read_field(FieldId::LowThreshold, Attribute::Value).await.unwrap();
    assert_eq!(value.value, Some(Variant::Double(45.0)));

    let level = client
        .read_field(FieldId::ManualOverride, Attribute::UserAccessLevel)
        .await
        .unwrap();
    assert_eq!(level.value, Some(Variant::UInt(1)));

    match client.write_field(FieldId::ManualOverride, Variant::Bool(true)).await {
        Err(ClientError::Fault { status, node_id, .. }) => {
            assert_eq!(status, StatusCode::BadUserAccessDenied);
            assert_eq!(node_id.as_deref(), Some("FanControl.ManualOverride"));
        }
        other => panic!("expected a fault, got {other:?}"),
    }
    assert_eq!(h.state.get(FieldId::ManualOverride), FieldValue::Flag(false));

    // The fault does not end the session
    assert!(client.read_field(FieldId::FanStatus, Attribute::Value).await.is_ok());
    client.close().await.unwrap();
    shutdown.send(true).unwrap();
}

#[tokio::test]
async fn test_oversized_message_closes_connection() {
    let h = harness(AccessPolicy::strict());
    let (addr, shutdown) = start_node_server(h.node).await;

    let stream = TcpStream::connect(addr).await.unwrap();
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let mut payload = vec![b'x'; node_server::MAX_MESSAGE_SIZE + 16];
    payload.push(b'\n');
    writer.write_all(&payload).await.unwrap();

    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap();
    let response: NodeResponse = serde_json::from_str(line.trim()).unwrap();
    assert!(matches!(
        response,
        NodeResponse::Fault {
            status: StatusCode::BadDecodingError,
            ..
        }
    ));

    line.clear();
    let read = tokio::time::timeout(Duration::from_secs(2), reader.read_line(&mut line))
        .await
        .unwrap()
        .unwrap_or(0);
    assert_eq!(read, 0);
    shutdown.send(true).unwrap();
}

#[tokio::test]
async fn test_writes_from_both_front_ends_share_state() {
    let h = harness(AccessPolicy::strict());
    let (node_addr, node_shutdown) = start_node_server(Arc::clone(&h.node)).await;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let modbus_addr = listener.local_addr().unwrap();
    let (modbus_shutdown, modbus_rx) = watch::channel(false);
    tokio::spawn(modbus_server::serve(listener, Arc::clone(&h.register), modbus_rx));

    // Loopback is a trusted peer, so Modbus writes are authenticated
    let mut modbus = tcp::connect(modbus_addr).await.unwrap();
    modbus.write_single_register(32, 400).await.unwrap().unwrap();

    let rejected = modbus.write_single_register(31, 700).await.unwrap();
    assert_eq!(rejected, Err(ExceptionCode::IllegalDataValue));

    let rejected = modbus.write_single_register(30, 1).await.unwrap();
    assert_eq!(rejected, Err(ExceptionCode::IllegalFunction));

    let mut node = NodeClient::connect(node_addr).await.unwrap();
    node.activate(Some("manager"), Some("admin456")).await.unwrap();
    let low = node.read_field(FieldId::LowThreshold, Attribute::Value).await.unwrap();
    assert_eq!(low.value, Some(Variant::Double(40.0)));

    node.write_field(FieldId::HighThreshold, Variant::Double(62.5))
        .await
        .unwrap();
    let words = modbus.read_holding_registers(30, 6).await.unwrap().unwrap();
    assert_eq!(words, vec![0, 625, 400, 0, 0, 0]);

    node.close().await.unwrap();
    node_shutdown.send(true).unwrap();
    modbus_shutdown.send(true).unwrap();
}

#[tokio::test]
async fn test_invalid_utf8_message_faults_without_closing() {
    let h = harness(AccessPolicy::strict());
    let (client, server) = tokio::io::duplex(4096);
    let session = tokio::spawn(node_server::handle_connection(server, peer(), h.node));

    let (reader, mut writer) = tokio::io::split(client);
    let mut reader = BufReader::new(reader);
    writer
        .write_all(b"{\"type\":\"Read\",\"nodes\":[\xff]}\n{\"type\":\"CloseSession\"}\n")
        .await
        .unwrap();

    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap();
    let response: NodeResponse = serde_json::from_str(line.trim()).unwrap();
    assert!(matches!(
        response,
        NodeResponse::Fault {
            status: StatusCode::BadDecodingError,
            node_id: None,
            ..
        }
    ));

    line.clear();
    reader.read_line(&mut line).await.unwrap();
    let response: NodeResponse = serde_json::from_str(line.trim()).unwrap();
    assert_eq!(response, NodeResponse::SessionClosed);

    let result = tokio::time::timeout(Duration::from_secs(2), session).await.unwrap();
    assert!(result.unwrap().is_ok());
}
