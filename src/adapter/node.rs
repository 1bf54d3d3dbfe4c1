//! Node front end: every field is a variable node `FanControl.<Name>` with
//! metadata attributes next to its value.

use super::{FieldGateway, Protocol, ProtocolAdapter};
use crate::access::Rejection;
use crate::auth::{Identity, Role};
use crate::fields::{AccessLevel, Attribute, FieldId, FieldValue, RawValue, ValueType};
use crate::state::Snapshot;
use serde::{Deserialize, Serialize};

pub const NAMESPACE_URI: &str = "urn:fan:control:opc-ua:server";
pub const OBJECT_NAME: &str = "FanControl";

pub fn node_id(field: FieldId) -> String {
    format!("{OBJECT_NAME}.{}", field.name())
}

pub fn resolve(node_id: &str) -> Option<FieldId> {
    let name = node_id.strip_prefix(OBJECT_NAME)?.strip_prefix('.')?;
    FieldId::ALL.iter().copied().find(|field| field.name() == name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    Good,
    BadNodeIdUnknown,
    BadAttributeIdInvalid,
    BadNotWritable,
    BadOutOfRange,
    BadTypeMismatch,
    BadUserAccessDenied,
    BadTooManyOperations,
    BadDecodingError,
    BadSessionIdInvalid,
}

impl StatusCode {
    pub fn code(self) -> u32 {
        match self {
            StatusCode::Good => 0x0000_0000,
            StatusCode::BadNodeIdUnknown => 0x8034_0000,
            StatusCode::BadAttributeIdInvalid => 0x8035_0000,
            StatusCode::BadNotWritable => 0x803B_0000,
            StatusCode::BadOutOfRange => 0x803C_0000,
            StatusCode::BadTypeMismatch => 0x8074_0000,
            StatusCode::BadUserAccessDenied => 0x801F_0000,
            StatusCode::BadTooManyOperations => 0x8010_0000,
            StatusCode::BadDecodingError => 0x8007_0000,
            StatusCode::BadSessionIdInvalid => 0x8025_0000,
        }
    }

    pub fn is_good(self) -> bool {
        self == StatusCode::Good
    }
}

impl core::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{self:?} (0x{:08X})", self.code())
    }
}

/// A node value on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Variant {
    Bool(bool),
    UInt(u64),
    Double(f64),
    Text(String),
    Range { low: f64, high: f64 },
}

impl Variant {
    fn from_field(value: FieldValue, scale: i32) -> Self {
        match value {
            FieldValue::Scaled(_) => Variant::Double(value.to_physical(scale)),
            FieldValue::Counter(v) => Variant::UInt(u64::from(v)),
            FieldValue::Flag(v) => Variant::Bool(v),
        }
    }

    /// Values arrive in physical units; integers are widened to floats.
    pub fn to_raw(&self) -> Option<RawValue> {
        match self {
            Variant::Bool(v) => Some(RawValue::Bool(*v)),
            Variant::UInt(v) => Some(RawValue::Float(*v as f64)),
            Variant::Double(v) => Some(RawValue::Float(*v)),
            Variant::Text(_) | Variant::Range { .. } => None,
        }
    }
}

impl core::fmt::Display for Variant {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Variant::Bool(v) => write!(f, "{v}"),
            Variant::UInt(v) => write!(f, "{v}"),
            Variant::Double(v) => write!(f, "{v:.1}"),
            Variant::Text(v) => f.write_str(v),
            Variant::Range { low, high } => write!(f, "{low:.1}..{high:.1}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadValueId {
    pub node_id: String,
    #[serde(default)]
    pub attribute: Attribute,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteValue {
    pub node_id: String,
    pub value: Variant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataValue {
    pub status: StatusCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Variant>,
}

impl DataValue {
    fn good(value: Variant) -> Self {
        Self {
            status: StatusCode::Good,
            value: Some(value),
        }
    }

    fn bad(status: StatusCode) -> Self {
        Self { status, value: None }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeServiceRequest {
    Read(Vec<ReadValueId>),
    Write(Vec<WriteValue>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeServiceResponse {
    Read(Vec<DataValue>),
    Write(Vec<StatusCode>),
}

/// Service-level failure. For writes it names the node that sank the request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{status}")]
pub struct NodeFault {
    pub status: StatusCode,
    pub node_id: Option<String>,
}

/// Client to server messages, one JSON object per line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NodeMessage {
    ActivateSession {
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        password: Option<String>,
    },
    Read {
        nodes: Vec<ReadValueId>,
    },
    Write {
        nodes: Vec<WriteValue>,
    },
    CloseSession,
}

/// Server to client messages, one JSON object per line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NodeResponse {
    SessionActivated {
        role: Role,
        #[serde(default)]
        principal: Option<String>,
    },
    ReadResult {
        results: Vec<DataValue>,
    },
    WriteResult {
        results: Vec<StatusCode>,
    },
    SessionClosed,
    Fault {
        status: StatusCode,
        #[serde(default)]
        node_id: Option<String>,
        message: String,
    },
}

#[derive(Debug, Clone)]
pub struct NodeAdapter {
    gateway: FieldGateway,
}

impl NodeAdapter {
    pub fn new(gateway: FieldGateway) -> Self {
        debug_assert_eq!(gateway.protocol(), Protocol::Node);
        Self { gateway }
    }

    /// Reads never fail as a whole; each item carries its own status.
    pub fn read(&self, identity: &Identity, nodes: &[ReadValueId]) -> Vec<DataValue> {
        let snapshot = self.gateway.read_snapshot();
        nodes
            .iter()
            .map(|item| match resolve(&item.node_id) {
                Some(field) => self.read_attribute(identity, &snapshot, field, item.attribute),
                None => DataValue::bad(StatusCode::BadNodeIdUnknown),
            })
            .collect()
    }

    /// All-or-nothing: the first bad node fails the whole request.
    pub fn write(&self, identity: &Identity, nodes: &[WriteValue]) -> Result<Vec<StatusCode>, NodeFault> {
        let mut entries = Vec::with_capacity(nodes.len());
        for item in nodes {
            let fault = |rejection: Rejection| {
                self.gateway.record_rejection(identity, &item.node_id, rejection);
                NodeFault {
                    status: Self::map_rejection(rejection),
                    node_id: Some(item.node_id.clone()),
                }
            };
            let field = resolve(&item.node_id).ok_or_else(|| fault(Rejection::UnknownField))?;
            let raw = item.value.to_raw().ok_or_else(|| {
                if field.descriptor().is_writable() {
                    fault(Rejection::TypeMismatch)
                } else {
                    fault(Rejection::ReadOnlyViolation)
                }
            })?;
            entries.push((field, raw));
        }

        self.gateway
            .write_batch(identity, &entries)
            .map(|_| vec![StatusCode::Good; nodes.len()])
            .map_err(|rejected| NodeFault {
                status: Self::map_rejection(rejected.rejection),
                node_id: nodes.get(rejected.index).map(|item| item.node_id.clone()),
            })
    }

    fn read_attribute(
        &self,
        identity: &Identity,
        snapshot: &Snapshot,
        field: FieldId,
        attribute: Attribute,
    ) -> DataValue {
        let descriptor = field.descriptor();
        match attribute {
            Attribute::Value => DataValue::good(Variant::from_field(snapshot.get(field), descriptor.scale)),
            Attribute::DisplayName => DataValue::good(Variant::Text(descriptor.display_name.to_string())),
            Attribute::Description => DataValue::good(Variant::Text(descriptor.description.to_string())),
            Attribute::EngineeringUnits => match descriptor.unit {
                Some(unit) => DataValue::good(Variant::Text(unit.to_string())),
                None => DataValue::bad(StatusCode::BadAttributeIdInvalid),
            },
            Attribute::EURange => match descriptor
                .eu_range
                .or_else(|| self.gateway.mediator().effective_range(field))
            {
                Some(range) => DataValue::good(Variant::Range {
                    low: range.min,
                    high: range.max,
                }),
                None => DataValue::bad(StatusCode::BadAttributeIdInvalid),
            },
            Attribute::DataType => DataValue::good(Variant::Text(
                match descriptor.value_type {
                    ValueType::IntegerScaled => "Double",
                    ValueType::Boolean => "Boolean",
                    ValueType::Counter => "UInt32",
                }
                .to_string(),
            )),
            Attribute::AccessLevel => {
                DataValue::good(Variant::UInt(u64::from(AccessLevel::for_access(descriptor.access).0)))
            }
            Attribute::UserAccessLevel => {
                let authenticator = self.gateway.authenticator();
                let level = authenticator.user_access_level(identity, field);
                let level = authenticator.degrade_read_attribute(identity, attribute, level);
                DataValue::good(Variant::UInt(u64::from(level.0)))
            }
        }
    }
}

impl ProtocolAdapter for NodeAdapter {
    type Request = NodeServiceRequest;
    type Response = NodeServiceResponse;
    type Error = NodeFault;
    type Status = StatusCode;

    const PROTOCOL: Protocol = Protocol::Node;

    fn gateway(&self) -> &FieldGateway {
        &self.gateway
    }

    fn map_rejection(rejection: Rejection) -> StatusCode {
        match rejection {
            Rejection::UnknownField => StatusCode::BadNodeIdUnknown,
            Rejection::ReadOnlyViolation => StatusCode::BadNotWritable,
            Rejection::OutOfRange | Rejection::InvalidEnum => StatusCode::BadOutOfRange,
            Rejection::TypeMismatch => StatusCode::BadTypeMismatch,
            Rejection::PermissionDenied => StatusCode::BadUserAccessDenied,
            Rejection::BatchTooLarge => StatusCode::BadTooManyOperations,
        }
    }

    fn handle(
        &self,
        identity: &Identity,
        request: NodeServiceRequest,
    ) -> Result<NodeServiceResponse, NodeFault> {
        match request {
            NodeServiceRequest::Read(nodes) => Ok(NodeServiceResponse::Read(self.read(identity, &nodes))),
            NodeServiceRequest::Write(nodes) => self.write(identity, &nodes).map(NodeServiceResponse::Write),
        }
    }
}
