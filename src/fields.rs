use serde::{Deserialize, Serialize};
use static_assertions::const_assert;

pub const FIELD_COUNT: usize = 7;

/// Temperatures travel as tenths of a degree on every integer encoding.
pub const TEMPERATURE_SCALE: i32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FieldId {
    CpuTemperature,
    HighThreshold,
    LowThreshold,
    OverheatStatus,
    FanStatus,
    ManualOverride,
    Uptime,
}

impl FieldId {
    pub const ALL: [FieldId; FIELD_COUNT] = [
        FieldId::CpuTemperature,
        FieldId::HighThreshold,
        FieldId::LowThreshold,
        FieldId::OverheatStatus,
        FieldId::FanStatus,
        FieldId::ManualOverride,
        FieldId::Uptime,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn descriptor(self) -> &'static FieldDescriptor {
        &FIELD_TABLE[self.index()]
    }

    /// Browse name shared by every front end and the CLI.
    pub fn name(self) -> &'static str {
        self.descriptor().name
    }

    /// Case-insensitive lookup by browse name; `-` and `_` are ignored so that
    /// `high-threshold`, `HIGH_THRESHOLD` and `HighThreshold` all resolve.
    pub fn from_name(name: &str) -> Option<Self> {
        let wanted: String = name
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        Self::ALL
            .iter()
            .copied()
            .find(|field| field.name().to_ascii_lowercase() == wanted)
    }

    /// The other half of the threshold pair, if this field is a threshold.
    pub fn threshold_counterpart(self) -> Option<FieldId> {
        match self {
            FieldId::HighThreshold => Some(FieldId::LowThreshold),
            FieldId::LowThreshold => Some(FieldId::HighThreshold),
            _ => None,
        }
    }
}

impl core::fmt::Display for FieldId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    Measurement,
    Setting,
    Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueType {
    IntegerScaled,
    Boolean,
    Counter,
}

/// Closed interval in physical units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

impl Range {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Compare in the integer domain so that 65.0 and a register value of 650 agree exactly.
    pub fn contains_scaled(&self, value: i32, scale: i32) -> bool {
        value >= to_scaled(self.min, scale) && value <= to_scaled(self.max, scale)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldDescriptor {
    pub id: FieldId,
    pub name: &'static str,
    pub kind: FieldKind,
    pub access: Access,
    pub value_type: ValueType,
    pub scale: i32,
    /// Write validity bound. Threshold ceilings are replaced per front end.
    pub range: Option<Range>,
    /// Display-only engineering range, never enforced.
    pub eu_range: Option<Range>,
    pub display_name: &'static str,
    pub description: &'static str,
    pub unit: Option<&'static str>,
}

impl FieldDescriptor {
    pub fn is_writable(&self) -> bool {
        self.access == Access::ReadWrite
    }
}

pub static FIELD_TABLE: [FieldDescriptor; FIELD_COUNT] = [
    FieldDescriptor {
        id: FieldId::CpuTemperature,
        name: "CPUTemperature",
        kind: FieldKind::Measurement,
        access: Access::ReadOnly,
        value_type: ValueType::IntegerScaled,
        scale: TEMPERATURE_SCALE,
        range: None,
        eu_range: Some(Range::new(0.0, 75.0)),
        display_name: "CPU Temperature [°C]",
        description: "Actual temperature of the CPU in degree Celsius.",
        unit: Some("°C"),
    },
    FieldDescriptor {
        id: FieldId::HighThreshold,
        name: "HighThreshold",
        kind: FieldKind::Setting,
        access: Access::ReadWrite,
        value_type: ValueType::IntegerScaled,
        scale: TEMPERATURE_SCALE,
        range: Some(Range::new(0.0, 65.0)),
        eu_range: None,
        display_name: "High Threshold [°C]",
        description: "Upper limit for fan activation",
        unit: Some("°C"),
    },
    FieldDescriptor {
        id: FieldId::LowThreshold,
        name: "LowThreshold",
        kind: FieldKind::Setting,
        access: Access::ReadWrite,
        value_type: ValueType::IntegerScaled,
        scale: TEMPERATURE_SCALE,
        range: Some(Range::new(0.0, 55.0)),
        eu_range: None,
        display_name: "Low Threshold [°C]",
        description: "Lower limit for fan deactivation",
        unit: Some("°C"),
    },
    FieldDescriptor {
        id: FieldId::OverheatStatus,
        name: "OverheatStatus",
        kind: FieldKind::Status,
        access: Access::ReadOnly,
        value_type: ValueType::Boolean,
        scale: 1,
        range: None,
        eu_range: None,
        display_name: "Overheat Status",
        description: "Status of the overheat condition (true -> cpu temp over high threshold / false -> normal)",
        unit: None,
    },
    FieldDescriptor {
        id: FieldId::FanStatus,
        name: "FanStatus",
        kind: FieldKind::Status,
        access: Access::ReadOnly,
        value_type: ValueType::Boolean,
        scale: 1,
        range: None,
        eu_range: None,
        display_name: "Fan Status",
        description: "Status of the fan (true -> running / false -> stopped)",
        unit: None,
    },
    FieldDescriptor {
        id: FieldId::ManualOverride,
        name: "ManualOverride",
        kind: FieldKind::Setting,
        access: Access::ReadWrite,
        value_type: ValueType::Boolean,
        scale: 1,
        range: None,
        eu_range: None,
        display_name: "Manual Override",
        description: "Overrides the control logic (true -> fan runs no matter the CPU temperature / false -> fan follows the thresholds)",
        unit: None,
    },
    FieldDescriptor {
        id: FieldId::Uptime,
        name: "Uptime",
        kind: FieldKind::Measurement,
        access: Access::ReadOnly,
        value_type: ValueType::Counter,
        scale: 1,
        range: None,
        eu_range: None,
        display_name: "Uptime [s]",
        description: "Total seconds elapsed since the controller started",
        unit: Some("s"),
    },
];

const_assert!(FIELD_COUNT == FieldId::Uptime as usize + 1);

/// A live value as held by the control state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldValue {
    /// Physical value multiplied by the field scale.
    Scaled(i32),
    Counter(u32),
    Flag(bool),
}

impl FieldValue {
    pub fn zero_for(value_type: ValueType) -> Self {
        match value_type {
            ValueType::IntegerScaled => FieldValue::Scaled(0),
            ValueType::Boolean => FieldValue::Flag(false),
            ValueType::Counter => FieldValue::Counter(0),
        }
    }

    pub fn matches(&self, value_type: ValueType) -> bool {
        matches!(
            (self, value_type),
            (FieldValue::Scaled(_), ValueType::IntegerScaled)
                | (FieldValue::Flag(_), ValueType::Boolean)
                | (FieldValue::Counter(_), ValueType::Counter)
        )
    }

    pub fn as_scaled(&self) -> Option<i32> {
        match self {
            FieldValue::Scaled(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            FieldValue::Flag(v) => Some(*v),
            _ => None,
        }
    }

    /// Physical value, descaled for `Scaled`.
    pub fn to_physical(&self, scale: i32) -> f64 {
        match self {
            FieldValue::Scaled(v) => f64::from(*v) / f64::from(scale),
            FieldValue::Counter(v) => f64::from(*v),
            FieldValue::Flag(v) => f64::from(u8::from(*v)),
        }
    }

    /// 16-bit register encoding. Scaled values are two's complement, counters wrap.
    pub fn to_register(&self) -> u16 {
        match self {
            FieldValue::Scaled(v) => (*v).clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16 as u16,
            FieldValue::Counter(v) => (*v & 0xFFFF) as u16,
            FieldValue::Flag(v) => u16::from(*v),
        }
    }
}

/// A value exactly as an external client sent it, before descaling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawValue {
    Register(u16),
    Float(f64),
    Bool(bool),
}

pub fn to_scaled(physical: f64, scale: i32) -> i32 {
    (physical * f64::from(scale)).round() as i32
}

/// Attributes a client may request about a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Attribute {
    #[default]
    Value,
    DisplayName,
    Description,
    EngineeringUnits,
    EURange,
    DataType,
    AccessLevel,
    UserAccessLevel,
}

/// Access level bit mask reported through `AccessLevel`/`UserAccessLevel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessLevel(pub u8);

impl AccessLevel {
    pub const CURRENT_READ: AccessLevel = AccessLevel(0x01);
    pub const CURRENT_WRITE: AccessLevel = AccessLevel(0x02);
    pub const READ_WRITE: AccessLevel = AccessLevel(0x03);

    pub fn for_access(access: Access) -> Self {
        match access {
            Access::ReadOnly => Self::CURRENT_READ,
            Access::ReadWrite => Self::READ_WRITE,
        }
    }

    pub fn can_write(self) -> bool {
        self.0 & Self::CURRENT_WRITE.0 != 0
    }
}
