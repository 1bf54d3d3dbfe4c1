//! Newline-delimited JSON sessions in front of [`NodeAdapter`].
//!
//! A session may open with `ActivateSession`; any other first message starts
//! an anonymous session. The identity never changes after that.

use crate::adapter::node::{NodeFault, NodeMessage, NodeResponse, StatusCode};
use crate::adapter::{NodeAdapter, ProtocolAdapter};
use crate::auth::{Credential, Identity};
use crate::modbus_server::wait_for_shutdown;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub const MAX_MESSAGE_SIZE: usize = 8192;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Per-connection state: the identity, once established.
pub struct NodeSession {
    adapter: Arc<NodeAdapter>,
    identity: Option<Identity>,
    peer: SocketAddr,
}

impl NodeSession {
    pub fn new(adapter: Arc<NodeAdapter>, peer: SocketAddr) -> Self {
        adapter.gateway().metrics().record_session();
        Self {
            adapter,
            identity: None,
            peer,
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Decode and handle one line. Returns the reply and whether the session stays open.
    pub fn handle_line(&mut self, line: &str) -> (NodeResponse, bool) {
        match serde_json::from_str::<NodeMessage>(line) {
            Ok(message) => self.handle_message(message),
            Err(e) => {
                warn!(peer = %self.peer, error = %e, "undecodable node message");
                (fault(StatusCode::BadDecodingError, None, format!("invalid message: {e}")), true)
            }
        }
    }

    pub fn handle_message(&mut self, message: NodeMessage) -> (NodeResponse, bool) {
        match message {
            NodeMessage::ActivateSession { username, password } => {
                if self.identity.is_some() {
                    let response = fault(
                        StatusCode::BadSessionIdInvalid,
                        None,
                        "session already activated".to_string(),
                    );
                    return (response, true);
                }
                let credential = match (username.as_deref(), password.as_deref()) {
                    (Some(username), Some(password)) => Credential::UserPassword { username, password },
                    _ => Credential::None,
                };
                let identity = self.adapter.gateway().authenticator().authenticate(&credential);
                info!(peer = %self.peer, role = ?identity.role(), "node session activated");
                let response = NodeResponse::SessionActivated {
                    role: identity.role(),
                    principal: identity.principal().map(str::to_string),
                };
                self.identity = Some(identity);
                (response, true)
            }
            NodeMessage::Read { nodes } => {
                let identity = self.ensure_identity();
                let results = self.adapter.read(&identity, &nodes);
                (NodeResponse::ReadResult { results }, true)
            }
            NodeMessage::Write { nodes } => {
                let identity = self.ensure_identity();
                match self.adapter.write(&identity, &nodes) {
                    Ok(results) => (NodeResponse::WriteResult { results }, true),
                    Err(NodeFault { status, node_id }) => {
                        let message = format!("write rejected: {status}");
                        (fault(status, node_id, message), true)
                    }
                }
            }
            NodeMessage::CloseSession => (NodeResponse::SessionClosed, false),
        }
    }

    fn ensure_identity(&mut self) -> Identity {
        if let Some(identity) = &self.identity {
            return identity.clone();
        }
        let identity = self
            .adapter
            .gateway()
            .authenticator()
            .authenticate(&Credential::None);
        debug!(peer = %self.peer, "implicit anonymous session");
        self.identity = Some(identity.clone());
        identity
    }
}

fn fault(status: StatusCode, node_id: Option<String>, message: String) -> NodeResponse {
    NodeResponse::Fault {
        status,
        node_id,
        message,
    }
}

/// Accept node sessions until `shutdown` flips to `true`.
pub async fn serve(
    listener: TcpListener,
    adapter: Arc<NodeAdapter>,
    mut shutdown: watch::Receiver<bool>,
) -> io::Result<()> {
    info!(addr = %listener.local_addr()?, "🌐 Node server listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    info!("🔗 New node client connected: {}", addr);
                    let client_adapter = Arc::clone(&adapter);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, addr, client_adapter).await {
                            warn!("Node client {} error: {}", addr, e);
                        }
                        info!("🔌 Node client {} disconnected", addr);
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            },
            _ = wait_for_shutdown(&mut shutdown) => {
                info!("Node server stopped");
                return Ok(());
            }
        }
    }
}

/// Run one session over any byte stream.
pub async fn handle_connection<S>(
    stream: S,
    peer: SocketAddr,
    adapter: Arc<NodeAdapter>,
) -> Result<(), ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut buf_reader = BufReader::new(reader);
    let mut session = NodeSession::new(adapter, peer);

    let mut line = Vec::new();
    loop {
        line.clear();
        let read = (&mut buf_reader)
            .take(MAX_MESSAGE_SIZE as u64 + 1)
            .read_until(b'\n', &mut line)
            .await?;
        if read == 0 {
            break;
        }
        if line.len() > MAX_MESSAGE_SIZE {
            let response = fault(
                StatusCode::BadDecodingError,
                None,
                format!("message exceeds {MAX_MESSAGE_SIZE} bytes"),
            );
            send(&mut writer, &response).await?;
            break;
        }

        // Bad bytes fault this message only; the session stays open
        let text = match std::str::from_utf8(&line) {
            Ok(text) => text,
            Err(e) => {
                warn!(%peer, error = %e, "message is not valid UTF-8");
                let response = fault(StatusCode::BadDecodingError, None, format!("invalid UTF-8: {e}"));
                send(&mut writer, &response).await?;
                continue;
            }
        };
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }

        let (response, keep_open) = session.handle_line(trimmed);
        send(&mut writer, &response).await?;
        if !keep_open {
            break;
        }
    }

    writer.shutdown().await.ok();
    Ok(())
}

async fn send<W>(writer: &mut W, response: &NodeResponse) -> Result<(), ServerError>
where
    W: AsyncWrite + Unpin,
{
    let mut json = serde_json::to_string(response)?;
    json.push('\n');
    writer.write_all(json.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
