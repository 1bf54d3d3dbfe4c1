//! # fanbus
//!
//! A thermal fan controller whose control state is shared between a local
//! hysteresis loop and remote supervisory clients on two field protocols.
//!
//! ## Features
//!
//! - **Hysteresis control**: two-threshold state machine, no chatter in the dead band
//! - **Mediated writes**: every external write is checked for access class, range,
//!   threshold ordering and role permission before it touches the state
//! - **Role-based access**: anonymous and authenticated sessions, configurable policy matrix
//! - **Modbus/TCP front end**: holding registers via `tokio-modbus`
//! - **Node front end**: named variables with metadata over newline-delimited JSON
//!
//! ## Quick Start
//!
//! ```rust
//! use fanbus::{ControlState, FieldId, HysteresisController, LogActuator, ServiceMetrics, SimulatedSensor};
//! use std::sync::Arc;
//!
//! let state = Arc::new(ControlState::default());
//! let mut controller = HysteresisController::new(
//!     Arc::clone(&state),
//!     SimulatedSensor::default(),
//!     LogActuator::new(),
//!     Arc::new(ServiceMetrics::new()),
//! );
//!
//! let report = controller.tick();
//! assert_eq!(state.get(FieldId::FanStatus).as_flag(), Some(report.fan_on));
//! ```
//!
//! ## Architecture
//!
//! - [`fields`] - static field table and value types
//! - [`state`] - the shared control state
//! - [`access`] - write validation
//! - [`auth`] - credentials, roles and the access policy
//! - [`controller`] - the hysteresis control loop
//! - [`adapter`] - register and node protocol front ends
//! - [`modbus_server`] / [`node_server`] - network listeners
//! - [`config`] - environment configuration

#![deny(warnings)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

pub mod access;
pub mod adapter;
pub mod auth;
pub mod client;
pub mod config;
pub mod controller;
pub mod fields;
pub mod hardware;
pub mod metrics;
pub mod modbus_server;
pub mod node_server;
pub mod state;

// Re-export main public types for convenience
pub use access::{AccessMediator, Rejection, ThresholdLimits};
pub use adapter::{FieldGateway, NodeAdapter, Protocol, ProtocolAdapter, RegisterAdapter};
pub use auth::{AccessPolicy, Credential, Identity, PolicyPreset, Role, RoleAuthenticator};
pub use controller::{ActuatorSink, HysteresisController, HysteresisState, TelemetrySource};
pub use fields::{FieldId, FieldValue, RawValue};
pub use hardware::{LogActuator, SimulatedSensor, ThermalZoneSensor};
pub use metrics::ServiceMetrics;
pub use state::{ControlState, Origin};
