use crate::controller::{ActuatorError, ActuatorSink, SensorError, TelemetrySource};
use std::path::PathBuf;
use tracing::info;

const SIM_MIN_C: f64 = 40.0;
const SIM_MAX_C: f64 = 70.0;
const SIM_MAX_STEP_C: f64 = 1.5;

/// Bounded random walk between 40 and 70 °C.
///
/// Deterministic for a given seed so runs can be reproduced.
#[derive(Debug, Clone)]
pub struct SimulatedSensor {
    rng_state: u64,
    current_c: f64,
}

impl SimulatedSensor {
    pub fn new(seed: u64) -> Self {
        let mut sensor = Self {
            rng_state: seed,
            current_c: 0.0,
        };
        sensor.current_c = SIM_MIN_C + sensor.next_unit() * (SIM_MAX_C - SIM_MIN_C);
        sensor
    }

    // Linear congruential generator, MMIX parameters.
    fn next_random(&mut self) -> u64 {
        self.rng_state = self
            .rng_state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        self.rng_state
    }

    /// Uniform in `[0, 1)`.
    fn next_unit(&mut self) -> f64 {
        (self.next_random() >> 11) as f64 / (1u64 << 53) as f64
    }
}

impl Default for SimulatedSensor {
    fn default() -> Self {
        Self::new(0x1234_5678_9ABC_DEF0)
    }
}

impl TelemetrySource for SimulatedSensor {
    fn read_celsius(&mut self) -> Result<f64, SensorError> {
        let step = (self.next_unit() * 2.0 - 1.0) * SIM_MAX_STEP_C;
        self.current_c = (self.current_c + step).clamp(SIM_MIN_C, SIM_MAX_C);
        Ok(self.current_c)
    }
}

/// Linux `thermal_zone*/temp` file, reported in millidegrees.
#[derive(Debug, Clone)]
pub struct ThermalZoneSensor {
    path: PathBuf,
}

impl ThermalZoneSensor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl TelemetrySource for ThermalZoneSensor {
    fn read_celsius(&mut self) -> Result<f64, SensorError> {
        let raw = std::fs::read_to_string(&self.path)
            .map_err(|e| SensorError::Unavailable(format!("{}: {e}", self.path.display())))?;
        let millidegrees: i64 = raw
            .trim()
            .parse()
            .map_err(|_| SensorError::InvalidReading(raw.trim().to_string()))?;
        Ok(millidegrees as f64 / 1000.0)
    }
}

/// Actuator without hardware: remembers the commanded state and logs changes.
#[derive(Debug, Clone, Default)]
pub struct LogActuator {
    fan_on: Option<bool>,
    commands: u64,
}

impl LogActuator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fan_on(&self) -> Option<bool> {
        self.fan_on
    }

    pub fn commands(&self) -> u64 {
        self.commands
    }
}

impl ActuatorSink for LogActuator {
    fn set_fan(&mut self, on: bool) -> Result<(), ActuatorError> {
        if self.fan_on != Some(on) {
            info!(fan_on = on, "fan {}", if on { "started" } else { "stopped" });
        }
        self.fan_on = Some(on);
        self.commands += 1;
        Ok(())
    }
}
