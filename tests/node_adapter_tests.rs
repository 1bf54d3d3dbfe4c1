use fanbus::adapter::node::*;
use fanbus::fields::{AccessLevel, Attribute};
use fanbus::*;
use std::sync::Arc;

fn adapter(policy: AccessPolicy) -> (NodeAdapter, Arc<ControlState>, Arc<ServiceMetrics>) {
    let state = Arc::new(ControlState::default());
    let metrics = Arc::new(ServiceMetrics::new());
    let authenticator = Arc::new(RoleAuthenticator::new(policy).with_user("manager", "admin456"));
    let gateway = FieldGateway::new(
        Protocol::Node,
        Arc::clone(&state),
        AccessMediator::new(authenticator, ThresholdLimits::default()),
        Arc::clone(&metrics),
    );
    (NodeAdapter::new(gateway), state, metrics)
}

fn manager(adapter: &NodeAdapter) -> Identity {
    adapter.gateway().authenticator().authenticate(&Credential::UserPassword {
        username: "manager",
        password: "admin456",
    })
}

fn read_one(adapter: &NodeAdapter, identity: &Identity, field: FieldId, attribute: Attribute) -> DataValue {
    let mut results = adapter.read(
        identity,
        &[ReadValueId {
            node_id: node_id(field),
            attribute,
        }],
    );
    assert_eq!(results.len(), 1);
    results.remove(0)
}

fn write_value(field: FieldId, value: Variant) -> WriteValue {
    WriteValue {
        node_id: node_id(field),
        value,
    }
}

#[test]
fn test_values_are_reported_in_physical_units() {
    let (adapter, state, _) = adapter(AccessPolicy::strict());
    state.set(FieldId::CpuTemperature, FieldValue::Scaled(523), Origin::Internal);
    state.set(FieldId::Uptime, FieldValue::Counter(42), Origin::Internal);
    let anonymous = Identity::anonymous();

    assert_eq!(
        read_one(&adapter, &anonymous, FieldId::CpuTemperature, Attribute::Value).value,
        Some(Variant::Double(52.3))
    );
    assert_eq!(
        read_one(&adapter, &anonymous, FieldId::HighThreshold, Attribute::Value).value,
        Some(Variant::Double(55.0))
    );
    assert_eq!(
        read_one(&adapter, &anonymous, FieldId::FanStatus, Attribute::Value).value,
        Some(Variant::Bool(false))
    );
    assert_eq!(
        read_one(&adapter, &anonymous, FieldId::Uptime, Attribute::Value).value,
        Some(Variant::UInt(42))
    );
}

#[test]
fn test_metadata_attributes() {
    let (adapter, _, _) = adapter(AccessPolicy::strict());
    let anonymous = Identity::anonymous();

    let units = read_one(&adapter, &anonymous, FieldId::CpuTemperature, Attribute::EngineeringUnits);
    assert_eq!(units.value, Some(Variant::Text("°C".to_string())));

    let range = read_one(&adapter, &anonymous, FieldId::CpuTemperature, Attribute::EURange);
    assert_eq!(range.value, Some(Variant::Range { low: 0.0, high: 75.0 }));

    // Settings advertise the range this front end enforces
    let range = read_one(&adapter, &anonymous, FieldId::HighThreshold, Attribute::EURange);
    assert_eq!(range.value, Some(Variant::Range { low: 0.0, high: 65.0 }));

    let name = read_one(&adapter, &anonymous, FieldId::FanStatus, Attribute::DisplayName);
    assert_eq!(name.value, Some(Variant::Text("Fan Status".to_string())));

    let data_type = read_one(&adapter, &anonymous, FieldId::ManualOverride, Attribute::DataType);
    assert_eq!(data_type.value, Some(Variant::Text("Boolean".to_string())));

    let access = read_one(&adapter, &anonymous, FieldId::HighThreshold, Attribute::AccessLevel);
    assert_eq!(access.value, Some(Variant::UInt(u64::from(AccessLevel::READ_WRITE.0))));
}

#[test]
fn test_missing_attributes_are_invalid() {
    let (adapter, _, _) = adapter(AccessPolicy::strict());
    let anonymous = Identity::anonymous();

    let units = read_one(&adapter, &anonymous, FieldId::FanStatus, Attribute::EngineeringUnits);
    assert_eq!(units.status, StatusCode::BadAttributeIdInvalid);
    assert_eq!(units.value, None);

    let range = read_one(&adapter, &anonymous, FieldId::ManualOverride, Attribute::EURange);
    assert_eq!(range.status, StatusCode::BadAttributeIdInvalid);
}

#[test]
fn test_unknown_node_does_not_fail_the_whole_read() {
    let (adapter, _, _) = adapter(AccessPolicy::strict());
    let results = adapter.read(
        &Identity::anonymous(),
        &[
            ReadValueId {
                node_id: "FanControl.Humidity".to_string(),
                attribute: Attribute::Value,
            },
            ReadValueId {
                node_id: node_id(FieldId::LowThreshold),
                attribute: Attribute::Value,
            },
        ],
    );

    assert_eq!(results[0].status, StatusCode::BadNodeIdUnknown);
    assert_eq!(results[1].status, StatusCode::Good);
    assert_eq!(results[1].value, Some(Variant::Double(45.0)));
}

#[test]
fn test_user_access_level_is_degraded_for_anonymous() {
    let (adapter, _, _) = adapter(AccessPolicy::open());
    let anonymous = Identity::anonymous();
    let identity = manager(&adapter);

    let level = read_one(&adapter, &anonymous, FieldId::HighThreshold, Attribute::UserAccessLevel);
    assert_eq!(level.value, Some(Variant::UInt(u64::from(AccessLevel::CURRENT_READ.0))));

    let level = read_one(&adapter, &identity, FieldId::HighThreshold, Attribute::UserAccessLevel);
    assert_eq!(level.value, Some(Variant::UInt(u64::from(AccessLevel::READ_WRITE.0))));

    let level = read_one(&adapter, &identity, FieldId::FanStatus, Attribute::UserAccessLevel);
    assert_eq!(level.value, Some(Variant::UInt(u64::from(AccessLevel::CURRENT_READ.0))));
}

#[test]
fn test_authenticated_write_applies() {
    let (adapter, state, metrics) = adapter(AccessPolicy::strict());
    let identity = manager(&adapter);

    let statuses = adapter
        .write(
            &identity,
            &[
                write_value(FieldId::HighThreshold, Variant::Double(60.0)),
                write_value(FieldId::ManualOverride, Variant::Bool(true)),
            ],
        )
        .unwrap();

    assert_eq!(statuses, vec![StatusCode::Good, StatusCode::Good]);
    assert_eq!(state.get(FieldId::HighThreshold), FieldValue::Scaled(600));
    assert_eq!(state.get(FieldId::ManualOverride), FieldValue::Flag(true));
    assert_eq!(metrics.snapshot().writes_accepted, 2);
}

#[test]
fn test_integer_values_are_physical_units() {
    let (adapter, state, _) = adapter(AccessPolicy::strict());
    let identity = manager(&adapter);

    adapter
        .write(&identity, &[write_value(FieldId::LowThreshold, Variant::UInt(40))])
        .unwrap();
    assert_eq!(state.get(FieldId::LowThreshold), FieldValue::Scaled(400));
}

#[test]
fn test_anonymous_write_is_denied() {
    let (adapter, state, metrics) = adapter(AccessPolicy::strict());
    let before = state.snapshot();

    let fault = adapter
        .write(
            &Identity::anonymous(),
            &[write_value(FieldId::ManualOverride, Variant::Bool(true))],
        )
        .unwrap_err();

    assert_eq!(fault.status, StatusCode::BadUserAccessDenied);
    assert_eq!(fault.node_id.as_deref(), Some("FanControl.ManualOverride"));
    assert_eq!(state.snapshot(), before);
    assert_eq!(metrics.snapshot().writes_rejected.permission_denied, 1);
}

#[test]
fn test_write_faults_map_to_status_codes() {
    let (adapter, state, _) = adapter(AccessPolicy::strict());
    let identity = manager(&adapter);
    let before = state.snapshot();

    let cases = [
        (write_value(FieldId::HighThreshold, Variant::Double(70.0)), StatusCode::BadOutOfRange),
        (write_value(FieldId::ManualOverride, Variant::UInt(2)), StatusCode::BadOutOfRange),
        (write_value(FieldId::HighThreshold, Variant::Bool(true)), StatusCode::BadTypeMismatch),
        (
            write_value(FieldId::HighThreshold, Variant::Text("hot".to_string())),
            StatusCode::BadTypeMismatch,
        ),
        (write_value(FieldId::FanStatus, Variant::Bool(true)), StatusCode::BadNotWritable),
        (
            write_value(FieldId::CpuTemperature, Variant::Text("cold".to_string())),
            StatusCode::BadNotWritable,
        ),
        (
            WriteValue {
                node_id: "FanControl.Humidity".to_string(),
                value: Variant::Double(1.0),
            },
            StatusCode::BadNodeIdUnknown,
        ),
    ];

    for (item, expected) in cases {
        let fault = adapter.write(&identity, &[item.clone()]).unwrap_err();
        assert_eq!(fault.status, expected, "{item:?}");
        assert_eq!(fault.node_id, Some(item.node_id));
    }
    assert_eq!(state.snapshot(), before);
}

#[test]
fn test_write_is_all_or_nothing() {
    let (adapter, state, _) = adapter(AccessPolicy::strict());
    let identity = manager(&adapter);
    let before = state.snapshot();

    let fault = adapter
        .write(
            &identity,
            &[
                write_value(FieldId::ManualOverride, Variant::Bool(true)),
                write_value(FieldId::LowThreshold, Variant::Double(60.0)),
            ],
        )
        .unwrap_err();

    assert_eq!(fault.status, StatusCode::BadOutOfRange);
    assert_eq!(fault.node_id.as_deref(), Some("FanControl.LowThreshold"));
    assert_eq!(state.snapshot(), before);
}

#[test]
fn test_oversized_write_is_too_many_operations() {
    let (adapter, _, _) = adapter(AccessPolicy::strict());
    let identity = manager(&adapter);
    let nodes = vec![write_value(FieldId::ManualOverride, Variant::Bool(true)); 33];

    let fault = adapter.write(&identity, &nodes).unwrap_err();
    assert_eq!(fault.status, StatusCode::BadTooManyOperations);
    assert_eq!(fault.node_id, None);
}

#[test]
fn test_handle_dispatches_requests() {
    let (adapter, _, _) = adapter(AccessPolicy::strict());
    let identity = manager(&adapter);

    let response = adapter
        .handle(
            &identity,
            NodeServiceRequest::Write(vec![write_value(FieldId::LowThreshold, Variant::Double(42.5))]),
        )
        .unwrap();
    assert_eq!(response, NodeServiceResponse::Write(vec![StatusCode::Good]));

    let response = adapter
        .handle(
            &identity,
            NodeServiceRequest::Read(vec![ReadValueId {
                node_id: node_id(FieldId::LowThreshold),
                attribute: Attribute::Value,
            }]),
        )
        .unwrap();
    match response {
        NodeServiceResponse::Read(values) => assert_eq!(values[0].value, Some(Variant::Double(42.5))),
        other => panic!("unexpected response {other:?}"),
    }
}
