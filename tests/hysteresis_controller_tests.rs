use fanbus::controller::{ActuatorError, SensorError, TickReport};
use fanbus::*;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// Replays a scripted list of readings; `None` simulates a failed read.
struct ScriptedSensor {
    readings: VecDeque<Option<f64>>,
}

impl ScriptedSensor {
    fn new(readings: &[Option<f64>]) -> Self {
        Self {
            readings: readings.iter().copied().collect(),
        }
    }
}

impl TelemetrySource for ScriptedSensor {
    fn read_celsius(&mut self) -> Result<f64, SensorError> {
        match self.readings.pop_front().flatten() {
            Some(t) => Ok(t),
            None => Err(SensorError::Unavailable("scripted failure".to_string())),
        }
    }
}

/// Records every command; fails while `broken` is set.
#[derive(Clone, Default)]
struct RecordingActuator {
    commands: Arc<Mutex<Vec<bool>>>,
    broken: Arc<Mutex<bool>>,
}

impl ActuatorSink for RecordingActuator {
    fn set_fan(&mut self, on: bool) -> Result<(), ActuatorError> {
        if *self.broken.lock().unwrap() {
            return Err(ActuatorError::Unavailable("relay offline".to_string()));
        }
        self.commands.lock().unwrap().push(on);
        Ok(())
    }
}

fn controller(
    readings: &[Option<f64>],
) -> (
    HysteresisController<ScriptedSensor, RecordingActuator>,
    Arc<ControlState>,
    RecordingActuator,
    Arc<ServiceMetrics>,
) {
    let state = Arc::new(ControlState::default());
    let actuator = RecordingActuator::default();
    let metrics = Arc::new(ServiceMetrics::new());
    let controller = HysteresisController::new(
        Arc::clone(&state),
        ScriptedSensor::new(readings),
        actuator.clone(),
        Arc::clone(&metrics),
    );
    (controller, state, actuator, metrics)
}

fn assert_published(state: &ControlState, report: &TickReport) {
    assert_eq!(state.get(FieldId::CpuTemperature), FieldValue::Scaled(report.temperature));
    assert_eq!(
        state.get(FieldId::OverheatStatus),
        FieldValue::Flag(report.status == HysteresisState::Overheat)
    );
    assert_eq!(state.get(FieldId::FanStatus), FieldValue::Flag(report.fan_on));
}

#[test]
fn test_hysteresis_cycle_with_default_band() {
    let (mut controller, state, actuator, _) = controller(&[Some(60.0), Some(50.0), Some(40.0)]);

    let report = controller.tick();
    assert_eq!(report.status, HysteresisState::Overheat);
    assert!(report.fan_on);
    assert_published(&state, &report);

    // Inside the dead band the previous state holds
    let report = controller.tick();
    assert_eq!(report.status, HysteresisState::Overheat);
    assert!(report.fan_on);
    assert_published(&state, &report);

    let report = controller.tick();
    assert_eq!(report.status, HysteresisState::Normal);
    assert!(!report.fan_on);
    assert_published(&state, &report);

    assert_eq!(*actuator.commands.lock().unwrap(), vec![true, true, false]);
}

#[test]
fn test_rising_through_dead_band_stays_normal() {
    let (mut controller, state, _, _) = controller(&[Some(40.0), Some(50.0), Some(54.9), Some(55.0)]);

    for _ in 0..3 {
        assert_eq!(controller.tick().status, HysteresisState::Normal);
    }
    // The high threshold itself trips the transition
    assert_eq!(controller.tick().status, HysteresisState::Overheat);
    assert_eq!(state.get(FieldId::FanStatus), FieldValue::Flag(true));
}

#[test]
fn test_no_chatter_inside_dead_band() {
    let readings: Vec<Option<f64>> = [56.0, 54.0, 46.0, 52.0, 45.5, 50.0, 45.1, 45.0, 50.0, 54.0]
        .iter()
        .map(|t| Some(*t))
        .collect();
    let (mut controller, _, _, _) = controller(&readings);

    let statuses: Vec<HysteresisState> = (0..readings.len()).map(|_| controller.tick().status).collect();
    let first_normal = statuses
        .iter()
        .position(|s| *s == HysteresisState::Normal)
        .unwrap();

    // Overheat until the reading of exactly 45.0, then Normal for the rest of the band
    assert_eq!(first_normal, 7);
    assert!(statuses[..7].iter().all(|s| *s == HysteresisState::Overheat));
    assert!(statuses[7..].iter().all(|s| *s == HysteresisState::Normal));
}

#[test]
fn test_manual_override_forces_fan_on() {
    let (mut controller, state, actuator, _) = controller(&[Some(20.0), Some(20.0)]);
    state.set(FieldId::ManualOverride, FieldValue::Flag(true), Origin::External);

    let report = controller.tick();
    assert_eq!(report.status, HysteresisState::Normal);
    assert!(report.fan_on);
    assert_eq!(state.get(FieldId::FanStatus), FieldValue::Flag(true));
    assert_eq!(state.get(FieldId::OverheatStatus), FieldValue::Flag(false));

    state.set(FieldId::ManualOverride, FieldValue::Flag(false), Origin::External);
    assert!(!controller.tick().fan_on);
    assert_eq!(*actuator.commands.lock().unwrap(), vec![true, false]);
}

#[test]
fn test_sensor_failure_holds_previous_state() {
    let (mut controller, state, actuator, metrics) = controller(&[Some(60.0), None, Some(50.0)]);

    controller.tick();
    let report = controller.tick();
    assert!(!report.sensor_ok);
    assert_eq!(report.temperature, 600);
    assert_eq!(report.status, HysteresisState::Overheat);
    assert!(report.fan_on);
    assert_published(&state, &report);

    // The loop keeps going on the next tick
    let report = controller.tick();
    assert!(report.sensor_ok);
    assert_eq!(report.temperature, 500);

    assert_eq!(metrics.snapshot().sensor_failures, 1);
    // The actuator is still driven on the failed tick
    assert_eq!(actuator.commands.lock().unwrap().len(), 3);
}

#[test]
fn test_actuator_failure_does_not_block_state_update() {
    let (mut controller, state, actuator, metrics) = controller(&[Some(60.0), Some(60.0)]);
    *actuator.broken.lock().unwrap() = true;

    let report = controller.tick();
    assert!(!report.actuator_ok);
    assert_eq!(state.get(FieldId::FanStatus), FieldValue::Flag(true));
    assert_eq!(metrics.snapshot().actuator_failures, 1);

    // Retried on the next tick
    *actuator.broken.lock().unwrap() = false;
    assert!(controller.tick().actuator_ok);
    assert_eq!(*actuator.commands.lock().unwrap(), vec![true]);
}

#[test]
fn test_every_tick_rewrites_status_fields() {
    let (mut controller, state, _, metrics) = controller(&[Some(30.0), Some(30.0)]);

    let first = controller.tick();
    let second = controller.tick();

    // Temperature, status, fan and uptime are written each tick even when unchanged
    assert_eq!(first.version, 4);
    assert_eq!(second.version, 8);
    assert_eq!(state.version(), 8);
    assert_eq!(metrics.snapshot().ticks, 2);
}

#[test]
fn test_threshold_changes_apply_on_next_tick() {
    let (mut controller, state, _, _) = controller(&[Some(50.0), Some(50.0)]);

    assert_eq!(controller.tick().status, HysteresisState::Normal);
    state.set(FieldId::HighThreshold, FieldValue::Scaled(480), Origin::External);
    assert_eq!(controller.tick().status, HysteresisState::Overheat);
}

#[tokio::test]
async fn test_run_loop_stops_on_shutdown() {
    let readings = vec![Some(60.0); 1_000];
    let (controller, state, _, metrics) = controller(&readings);
    let controller = controller.with_period(Duration::from_millis(10));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(controller.run(shutdown_rx));
    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();

    assert!(metrics.snapshot().ticks >= 2);
    assert_eq!(state.get(FieldId::OverheatStatus), FieldValue::Flag(true));
}

/// Stands in for a slow thermal-zone read.
struct SlowSensor {
    delay: Duration,
}

impl TelemetrySource for SlowSensor {
    fn read_celsius(&mut self) -> Result<f64, SensorError> {
        std::thread::sleep(self.delay);
        Ok(40.0)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_slow_sensor_does_not_stall_other_tasks() {
    let state = Arc::new(ControlState::default());
    let controller = HysteresisController::new(
        Arc::clone(&state),
        SlowSensor {
            delay: Duration::from_millis(500),
        },
        RecordingActuator::default(),
        Arc::new(ServiceMetrics::new()),
    )
    .with_period(Duration::from_millis(10));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(controller.run(shutdown_rx));
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The only worker is inside a sensor read; a short task must still run
    let other = tokio::spawn(async {
        tokio::time::sleep(Duration::from_millis(10)).await;
    });
    let finished = tokio::time::timeout(Duration::from_millis(250), other).await;
    assert!(finished.is_ok());

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
    assert_eq!(state.get(FieldId::CpuTemperature), FieldValue::Scaled(400));
}
