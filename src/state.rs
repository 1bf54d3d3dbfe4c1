use crate::access::WriteBatch;
use crate::fields::{to_scaled, FieldId, FieldValue, FIELD_COUNT, TEMPERATURE_SCALE};
use serde::{Deserialize, Serialize};
use std::sync::{PoisonError, RwLock};
use tracing::trace;

/// Who is mutating the state. Only the control loop writes with `Internal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Origin {
    Internal,
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("unknown field index {0}")]
    UnknownField(usize),
}

/// Values every field starts with.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StateDefaults {
    pub high_threshold_c: f64,
    pub low_threshold_c: f64,
    pub manual_override: bool,
}

impl Default for StateDefaults {
    fn default() -> Self {
        Self {
            high_threshold_c: 55.0,
            low_threshold_c: 45.0,
            manual_override: false,
        }
    }
}

/// Both thresholds in tenths of a degree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdPair {
    pub high: i32,
    pub low: i32,
}

impl ThresholdPair {
    pub fn is_ordered(&self) -> bool {
        0 <= self.low && self.low < self.high
    }
}

/// Every value read under a single lock acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub values: [FieldValue; FIELD_COUNT],
    pub version: u64,
}

impl Snapshot {
    pub fn get(&self, field: FieldId) -> FieldValue {
        self.values[field.index()]
    }
}

#[derive(Debug)]
struct Table {
    values: [FieldValue; FIELD_COUNT],
    version: u64,
}

/// The single source of truth shared by the control loop and every client session.
///
/// A pure store: it never checks access classes itself. External writes go through
/// [`ControlState::apply_with`] with an [`crate::access::AccessMediator`] check.
#[derive(Debug)]
pub struct ControlState {
    table: RwLock<Table>,
}

impl ControlState {
    pub fn new(defaults: StateDefaults) -> Self {
        let mut values = [FieldValue::Flag(false); FIELD_COUNT];
        for field in FieldId::ALL {
            values[field.index()] = FieldValue::zero_for(field.descriptor().value_type);
        }
        values[FieldId::HighThreshold.index()] =
            FieldValue::Scaled(to_scaled(defaults.high_threshold_c, TEMPERATURE_SCALE));
        values[FieldId::LowThreshold.index()] =
            FieldValue::Scaled(to_scaled(defaults.low_threshold_c, TEMPERATURE_SCALE));
        values[FieldId::ManualOverride.index()] = FieldValue::Flag(defaults.manual_override);

        Self {
            table: RwLock::new(Table { values, version: 0 }),
        }
    }

    pub fn get(&self, field: FieldId) -> FieldValue {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        table.values[field.index()]
    }

    /// Lookup by raw protocol index.
    pub fn get_index(&self, index: usize) -> Result<FieldValue, StateError> {
        FieldId::from_index(index)
            .map(|field| self.get(field))
            .ok_or(StateError::UnknownField(index))
    }

    /// Store a value and return the new version.
    pub fn set(&self, field: FieldId, value: FieldValue, origin: Origin) -> u64 {
        debug_assert!(
            value.matches(field.descriptor().value_type),
            "value {:?} does not fit field {}",
            value,
            field
        );

        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        table.values[field.index()] = value;
        table.version = table.version.wrapping_add(1);
        trace!(%field, ?value, ?origin, version = table.version, "field stored");
        table.version
    }

    /// Apply an already validated batch under one lock so readers never see half of it.
    pub fn set_many(&self, entries: &[(FieldId, FieldValue)], origin: Origin) -> u64 {
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        for (field, value) in entries {
            debug_assert!(value.matches(field.descriptor().value_type));
            table.values[field.index()] = *value;
            table.version = table.version.wrapping_add(1);
            trace!(%field, ?value, ?origin, version = table.version, "field stored");
        }
        table.version
    }

    /// Validate against the current values and store the result under one write lock.
    ///
    /// `validate` sees exactly the values the batch is applied to, so checks that
    /// span fields (threshold ordering) cannot be invalidated by a concurrent writer.
    /// Nothing is stored when it returns `Err`.
    pub fn apply_with<F, E>(&self, origin: Origin, validate: F) -> Result<u64, E>
    where
        F: FnOnce(&Snapshot) -> Result<WriteBatch, E>,
    {
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        let current = Snapshot {
            values: table.values,
            version: table.version,
        };
        let batch = validate(&current)?;
        for (field, value) in &batch {
            debug_assert!(value.matches(field.descriptor().value_type));
            table.values[field.index()] = *value;
            table.version = table.version.wrapping_add(1);
            trace!(%field, ?value, ?origin, version = table.version, "field stored");
        }
        Ok(table.version)
    }

    pub fn snapshot(&self) -> Snapshot {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        Snapshot {
            values: table.values,
            version: table.version,
        }
    }

    pub fn version(&self) -> u64 {
        self.table.read().unwrap_or_else(PoisonError::into_inner).version
    }

    /// Two independent reads; a concurrent write may land between them.
    pub fn thresholds(&self) -> ThresholdPair {
        ThresholdPair {
            high: self.get(FieldId::HighThreshold).as_scaled().unwrap_or_default(),
            low: self.get(FieldId::LowThreshold).as_scaled().unwrap_or_default(),
        }
    }
}

impl Default for ControlState {
    fn default() -> Self {
        Self::new(StateDefaults::default())
    }
}
