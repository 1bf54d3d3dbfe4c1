//! Protocol front ends over the shared control state.
//!
//! Both adapters go through one [`FieldGateway`], so they share a single
//! validation path and differ only in addressing and error signalling.

pub mod node;
pub mod register;

use crate::access::{AccessMediator, RejectedWrite, Rejection, WriteBatch};
use crate::auth::{Identity, RoleAuthenticator};
use crate::fields::{FieldId, FieldValue, RawValue};
use crate::metrics::ServiceMetrics;
use crate::state::{ControlState, Origin, Snapshot};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

pub use node::NodeAdapter;
pub use register::RegisterAdapter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    Register,
    Node,
}

impl core::fmt::Display for Protocol {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Protocol::Register => write!(f, "register"),
            Protocol::Node => write!(f, "node"),
        }
    }
}

/// Mediated access to [`ControlState`] for one front end.
///
/// Writes only ever reach the state with [`Origin::External`], and only after
/// the mediator accepted them.
#[derive(Debug, Clone)]
pub struct FieldGateway {
    protocol: Protocol,
    state: Arc<ControlState>,
    mediator: AccessMediator,
    metrics: Arc<ServiceMetrics>,
}

impl FieldGateway {
    pub fn new(
        protocol: Protocol,
        state: Arc<ControlState>,
        mediator: AccessMediator,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        Self {
            protocol,
            state,
            mediator,
            metrics,
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn state(&self) -> &Arc<ControlState> {
        &self.state
    }

    pub fn mediator(&self) -> &AccessMediator {
        &self.mediator
    }

    pub fn authenticator(&self) -> &RoleAuthenticator {
        self.mediator.authenticator()
    }

    pub fn metrics(&self) -> &Arc<ServiceMetrics> {
        &self.metrics
    }

    pub fn read(&self, field: FieldId) -> FieldValue {
        self.metrics.record_reads(1);
        self.state.get(field)
    }

    /// Every field read under one lock, counted as a single read.
    pub fn read_snapshot(&self) -> Snapshot {
        self.metrics.record_reads(1);
        self.state.snapshot()
    }

    /// Validated and stored under one state lock, so concurrent writers cannot
    /// interleave between the threshold ordering check and the store.
    pub fn write(&self, identity: &Identity, field: FieldId, raw: RawValue) -> Result<u64, Rejection> {
        let applied = self.state.apply_with(Origin::External, |snapshot| {
            let value = self.mediator.check_write(field, raw, identity, snapshot)?;
            let mut batch = WriteBatch::new();
            batch
                .push((field, value))
                .map_err(|_| Rejection::BatchTooLarge)?;
            Ok(batch)
        });
        match applied {
            Ok(version) => {
                self.metrics.record_writes(1);
                debug!(protocol = %self.protocol, %field, ?raw, version, "external write applied");
                Ok(version)
            }
            Err(rejection) => {
                self.reject(identity, field, raw, rejection);
                Err(rejection)
            }
        }
    }

    /// All-or-nothing: either every entry is applied under one lock, or none is.
    pub fn write_batch(
        &self,
        identity: &Identity,
        entries: &[(FieldId, RawValue)],
    ) -> Result<u64, RejectedWrite> {
        let applied = self.state.apply_with(Origin::External, |snapshot| {
            self.mediator.check_batch(entries, identity, snapshot)
        });
        match applied {
            Ok(version) => {
                self.metrics.record_writes(entries.len());
                debug!(protocol = %self.protocol, count = entries.len(), version, "external batch applied");
                Ok(version)
            }
            Err(rejected) => {
                match entries.get(rejected.index) {
                    Some((field, raw)) => self.reject(identity, *field, *raw, rejected.rejection),
                    None => {
                        self.metrics.record_rejection(rejected.rejection);
                        warn!(
                            protocol = %self.protocol,
                            count = entries.len(),
                            reason = %rejected.rejection,
                            "external batch rejected"
                        );
                    }
                }
                Err(rejected)
            }
        }
    }

    /// Count and log a rejection raised outside the mediator, e.g. an unknown address.
    pub fn record_rejection(&self, identity: &Identity, target: &str, rejection: Rejection) {
        self.metrics.record_rejection(rejection);
        warn!(
            protocol = %self.protocol,
            target,
            role = ?identity.role(),
            reason = %rejection,
            "external write rejected"
        );
    }

    fn reject(&self, identity: &Identity, field: FieldId, raw: RawValue, rejection: Rejection) {
        self.metrics.record_rejection(rejection);
        warn!(
            protocol = %self.protocol,
            %field,
            ?raw,
            role = ?identity.role(),
            reason = %rejection,
            "external write rejected"
        );
    }
}

/// A field protocol front end.
///
/// Implementations translate their requests into [`FieldGateway`] calls and
/// map every [`Rejection`] onto the protocol's native error signalling.
pub trait ProtocolAdapter {
    type Request;
    type Response;
    type Error;
    /// Native per-operation status the protocol reports rejections with.
    type Status;

    const PROTOCOL: Protocol;

    fn gateway(&self) -> &FieldGateway;

    fn map_rejection(rejection: Rejection) -> Self::Status;

    fn handle(&self, identity: &Identity, request: Self::Request) -> Result<Self::Response, Self::Error>;
}
