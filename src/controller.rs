//! Periodic hysteresis control loop.
//!
//! Each tick reads the sensor, advances the `Normal`/`Overheat` state machine,
//! publishes temperature, status, fan state and uptime into [`ControlState`]
//! with [`Origin::Internal`], and then drives the actuator. Sensor and actuator
//! I/O never happen while the state lock is held.

use crate::fields::{to_scaled, FieldId, FieldValue, TEMPERATURE_SCALE};
use crate::metrics::ServiceMetrics;
use crate::state::{ControlState, Origin, ThresholdPair};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::watch;
use tokio::task;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

pub const DEFAULT_PERIOD: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SensorError {
    #[error("sensor unavailable: {0}")]
    Unavailable(String),
    #[error("sensor returned an unreadable value: {0}")]
    InvalidReading(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActuatorError {
    #[error("actuator unavailable: {0}")]
    Unavailable(String),
}

/// Supplies the current temperature in °C.
pub trait TelemetrySource: Send {
    fn read_celsius(&mut self) -> Result<f64, SensorError>;
}

/// Accepts the fan on/off command. Called every tick, even when unchanged.
pub trait ActuatorSink: Send {
    fn set_fan(&mut self, on: bool) -> Result<(), ActuatorError>;
}

impl<T: TelemetrySource + ?Sized> TelemetrySource for Box<T> {
    fn read_celsius(&mut self) -> Result<f64, SensorError> {
        (**self).read_celsius()
    }
}

impl<T: ActuatorSink + ?Sized> ActuatorSink for Box<T> {
    fn set_fan(&mut self, on: bool) -> Result<(), ActuatorError> {
        (**self).set_fan(on)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HysteresisState {
    Normal,
    Overheat,
}

impl HysteresisState {
    /// Advance the state machine. Inside the dead band `low < t < high` the
    /// previous state is kept.
    pub fn next(self, temperature: i32, thresholds: ThresholdPair) -> Self {
        match self {
            HysteresisState::Normal if temperature >= thresholds.high => HysteresisState::Overheat,
            HysteresisState::Overheat if temperature <= thresholds.low => HysteresisState::Normal,
            unchanged => unchanged,
        }
    }

    pub fn from_flag(overheat: bool) -> Self {
        if overheat {
            HysteresisState::Overheat
        } else {
            HysteresisState::Normal
        }
    }

    pub fn is_overheat(self) -> bool {
        self == HysteresisState::Overheat
    }
}

/// What one tick observed and decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Tenths of a degree; the previous value when the sensor failed.
    pub temperature: i32,
    pub status: HysteresisState,
    pub fan_on: bool,
    pub sensor_ok: bool,
    pub actuator_ok: bool,
    pub version: u64,
}

pub struct HysteresisController<S, A> {
    state: Arc<ControlState>,
    sensor: S,
    actuator: A,
    period: Duration,
    started: Instant,
    metrics: Arc<ServiceMetrics>,
}

impl<S: TelemetrySource, A: ActuatorSink> HysteresisController<S, A> {
    pub fn new(state: Arc<ControlState>, sensor: S, actuator: A, metrics: Arc<ServiceMetrics>) -> Self {
        Self {
            state,
            sensor,
            actuator,
            period: DEFAULT_PERIOD,
            started: Instant::now(),
            metrics,
        }
    }

    #[must_use]
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn state(&self) -> &Arc<ControlState> {
        &self.state
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    /// Run a single control cycle.
    pub fn tick(&mut self) -> TickReport {
        self.metrics.record_tick();

        let previous_temperature = self
            .state
            .get(FieldId::CpuTemperature)
            .as_scaled()
            .unwrap_or_default();
        let previous_status = HysteresisState::from_flag(
            self.state
                .get(FieldId::OverheatStatus)
                .as_flag()
                .unwrap_or_default(),
        );

        let reading = self.sensor.read_celsius().and_then(|celsius| {
            if celsius.is_finite() {
                Ok(to_scaled(celsius, TEMPERATURE_SCALE))
            } else {
                Err(SensorError::InvalidReading(celsius.to_string()))
            }
        });

        let (temperature, status, sensor_ok) = match reading {
            Ok(temperature) => {
                let thresholds = self.state.thresholds();
                let status = previous_status.next(temperature, thresholds);
                (temperature, status, true)
            }
            Err(e) => {
                warn!(error = %e, "temperature read failed, holding previous state");
                self.metrics.record_sensor_failure();
                (previous_temperature, previous_status, false)
            }
        };

        let manual_override = self
            .state
            .get(FieldId::ManualOverride)
            .as_flag()
            .unwrap_or_default();
        let fan_on = manual_override || status.is_overheat();
        let uptime = u32::try_from(self.started.elapsed().as_secs()).unwrap_or(u32::MAX);

        let version = self.state.set_many(
            &[
                (FieldId::CpuTemperature, FieldValue::Scaled(temperature)),
                (FieldId::OverheatStatus, FieldValue::Flag(status.is_overheat())),
                (FieldId::FanStatus, FieldValue::Flag(fan_on)),
                (FieldId::Uptime, FieldValue::Counter(uptime)),
            ],
            Origin::Internal,
        );

        if status != previous_status {
            info!(
                from = ?previous_status,
                to = ?status,
                temperature = f64::from(temperature) / f64::from(TEMPERATURE_SCALE),
                "thermal state changed"
            );
        }

        let actuator_ok = match self.actuator.set_fan(fan_on) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, fan_on, "actuator command failed, retrying next tick");
                self.metrics.record_actuator_failure();
                false
            }
        };

        debug!(temperature, ?status, fan_on, manual_override, "tick complete");

        TickReport {
            temperature,
            status,
            fan_on,
            sensor_ok,
            actuator_ok,
            version,
        }
    }

    /// Sensor and actuator I/O may block on file reads; on a multi-thread
    /// runtime the worker is handed off so sessions keep being served.
    fn tick_off_reactor(&mut self) {
        match Handle::try_current().map(|handle| handle.runtime_flavor()) {
            Ok(RuntimeFlavor::MultiThread) => {
                task::block_in_place(|| self.tick());
            }
            _ => {
                self.tick();
            }
        }
    }

    /// Tick on the configured period until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(period_ms = self.period.as_millis() as u64, "control loop started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick_off_reactor();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("control loop stopped");
    }
}
