use crate::auth::{Identity, RoleAuthenticator};
use crate::fields::{FieldId, FieldValue, Range, RawValue, ValueType, FIELD_COUNT};
use crate::state::{ControlState, Snapshot};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Upper bound on entries in one multi-field write.
pub const MAX_BATCH_WRITES: usize = 32;

/// Validated writes, ready for `ControlState::set_many`.
pub type WriteBatch = heapless::Vec<(FieldId, FieldValue), MAX_BATCH_WRITES>;

/// Why an external write was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, thiserror::Error)]
pub enum Rejection {
    #[error("unknown field")]
    UnknownField,
    #[error("field is read-only")]
    ReadOnlyViolation,
    #[error("value out of range")]
    OutOfRange,
    #[error("value is not a valid boolean encoding")]
    InvalidEnum,
    #[error("value type does not fit the field")]
    TypeMismatch,
    #[error("permission denied")]
    PermissionDenied,
    #[error("too many writes in one request")]
    BatchTooLarge,
}

impl Rejection {
    pub const ALL: [Rejection; 7] = [
        Rejection::UnknownField,
        Rejection::ReadOnlyViolation,
        Rejection::OutOfRange,
        Rejection::InvalidEnum,
        Rejection::TypeMismatch,
        Rejection::PermissionDenied,
        Rejection::BatchTooLarge,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }
}

/// The entry of a batch that failed and why. Nothing from the batch was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("write #{index} rejected: {rejection}")]
pub struct RejectedWrite {
    pub index: usize,
    pub rejection: Rejection,
}

/// Per front end threshold ceilings in °C.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdLimits {
    pub high_ceiling_c: f64,
    pub low_ceiling_c: f64,
}

impl Default for ThresholdLimits {
    fn default() -> Self {
        Self {
            high_ceiling_c: 65.0,
            low_ceiling_c: 55.0,
        }
    }
}

/// Gatekeeper for every externally sourced write.
///
/// Checks run in a fixed order: access class, value decoding and range
/// (including threshold ordering), boolean encoding, then role permission.
/// The first failing check decides the rejection. The mediator keeps no
/// per-session state, so the same inputs always produce the same decision.
#[derive(Debug, Clone)]
pub struct AccessMediator {
    authenticator: Arc<RoleAuthenticator>,
    limits: ThresholdLimits,
}

impl AccessMediator {
    pub fn new(authenticator: Arc<RoleAuthenticator>, limits: ThresholdLimits) -> Self {
        Self {
            authenticator,
            limits,
        }
    }

    pub fn authenticator(&self) -> &Arc<RoleAuthenticator> {
        &self.authenticator
    }

    pub fn limits(&self) -> ThresholdLimits {
        self.limits
    }

    /// Write bound for a field with this front end's ceilings applied.
    pub fn effective_range(&self, field: FieldId) -> Option<Range> {
        let range = field.descriptor().range?;
        match field {
            FieldId::HighThreshold => Some(Range::new(range.min, self.limits.high_ceiling_c)),
            FieldId::LowThreshold => Some(Range::new(range.min, self.limits.low_ceiling_c)),
            _ => Some(range),
        }
    }

    pub fn validate_write(
        &self,
        field: FieldId,
        raw: RawValue,
        identity: &Identity,
        state: &ControlState,
    ) -> Result<FieldValue, Rejection> {
        self.check_write(field, raw, identity, &state.snapshot())
    }

    /// [`validate_write`](Self::validate_write) against a fixed view of the state,
    /// e.g. the one [`ControlState::apply_with`] hands out under its write lock.
    pub fn check_write(
        &self,
        field: FieldId,
        raw: RawValue,
        identity: &Identity,
        snapshot: &Snapshot,
    ) -> Result<FieldValue, Rejection> {
        self.check(field, raw, identity, |other| snapshot.get(other).as_scaled())
    }

    /// Same as [`validate_write`](Self::validate_write) for protocols that carry a raw field index.
    pub fn validate_index(
        &self,
        index: usize,
        raw: RawValue,
        identity: &Identity,
        state: &ControlState,
    ) -> Result<(FieldId, FieldValue), Rejection> {
        let field = FieldId::from_index(index).ok_or(Rejection::UnknownField)?;
        self.validate_write(field, raw, identity, state)
            .map(|value| (field, value))
    }

    /// Validate a multi-field write as a unit.
    ///
    /// Threshold ordering is checked against values pending in the same batch
    /// first, so `{high: 40, low: 30}` is accepted even when the stored low is 45.
    pub fn validate_batch(
        &self,
        entries: &[(FieldId, RawValue)],
        identity: &Identity,
        state: &ControlState,
    ) -> Result<WriteBatch, RejectedWrite> {
        self.check_batch(entries, identity, &state.snapshot())
    }

    pub fn check_batch(
        &self,
        entries: &[(FieldId, RawValue)],
        identity: &Identity,
        snapshot: &Snapshot,
    ) -> Result<WriteBatch, RejectedWrite> {
        if entries.len() > MAX_BATCH_WRITES {
            return Err(RejectedWrite {
                index: MAX_BATCH_WRITES,
                rejection: Rejection::BatchTooLarge,
            });
        }

        let mut pending: [Option<i32>; FIELD_COUNT] = [None; FIELD_COUNT];
        for (field, raw) in entries {
            if field.threshold_counterpart().is_some() {
                if let Ok(FieldValue::Scaled(v)) = decode(*field, *raw) {
                    pending[field.index()] = Some(v);
                }
            }
        }

        let mut batch = WriteBatch::new();
        for (index, (field, raw)) in entries.iter().enumerate() {
            let value = self
                .check(*field, *raw, identity, |other| {
                    pending[other.index()].or_else(|| snapshot.get(other).as_scaled())
                })
                .map_err(|rejection| RejectedWrite { index, rejection })?;
            batch
                .push((*field, value))
                .map_err(|_| RejectedWrite {
                    index,
                    rejection: Rejection::BatchTooLarge,
                })?;
        }
        Ok(batch)
    }

    fn check<F>(
        &self,
        field: FieldId,
        raw: RawValue,
        identity: &Identity,
        counterpart: F,
    ) -> Result<FieldValue, Rejection>
    where
        F: Fn(FieldId) -> Option<i32>,
    {
        let descriptor = field.descriptor();
        if !descriptor.is_writable() {
            return Err(Rejection::ReadOnlyViolation);
        }

        let value = decode(field, raw)?;

        if let FieldValue::Scaled(scaled) = value {
            if let Some(range) = self.effective_range(field) {
                if !range.contains_scaled(scaled, descriptor.scale) {
                    return Err(Rejection::OutOfRange);
                }
            }
            let ordered = match (field, field.threshold_counterpart().and_then(&counterpart)) {
                (FieldId::HighThreshold, Some(low)) => scaled > low,
                (FieldId::LowThreshold, Some(high)) => scaled < high,
                _ => true,
            };
            if !ordered {
                return Err(Rejection::OutOfRange);
            }
        }

        if !self
            .authenticator
            .authorize_field_write(field, identity.role())
        {
            return Err(Rejection::PermissionDenied);
        }

        Ok(value)
    }
}

/// Turn a client value into the stored representation of `field`.
fn decode(field: FieldId, raw: RawValue) -> Result<FieldValue, Rejection> {
    let scale = field.descriptor().scale;
    match field.descriptor().value_type {
        ValueType::IntegerScaled => match raw {
            RawValue::Register(r) => Ok(FieldValue::Scaled(i32::from(r))),
            RawValue::Float(f) if f.is_finite() => {
                let scaled = f * f64::from(scale);
                if scaled.abs() > f64::from(i32::MAX) {
                    return Err(Rejection::OutOfRange);
                }
                Ok(FieldValue::Scaled(scaled.round() as i32))
            }
            RawValue::Float(_) => Err(Rejection::OutOfRange),
            RawValue::Bool(_) => Err(Rejection::TypeMismatch),
        },
        ValueType::Boolean => match raw {
            RawValue::Bool(b) => Ok(FieldValue::Flag(b)),
            RawValue::Register(0) => Ok(FieldValue::Flag(false)),
            RawValue::Register(1) => Ok(FieldValue::Flag(true)),
            RawValue::Float(f) if f == 0.0 => Ok(FieldValue::Flag(false)),
            RawValue::Float(f) if f == 1.0 => Ok(FieldValue::Flag(true)),
            RawValue::Register(_) | RawValue::Float(_) => Err(Rejection::InvalidEnum),
        },
        ValueType::Counter => match raw {
            RawValue::Register(r) => Ok(FieldValue::Counter(u32::from(r))),
            _ => Err(Rejection::TypeMismatch),
        },
    }
}
