//! Tunnel lifecycle control and telemetry broadcasting
//!
//! This crate drives the platform tunnel backend through a
//! create/start/stop/query state machine, provisions tunnel
//! configuration files with restricted permissions, and streams
//! normalized status snapshots to a subscriber on a fixed cadence.
//!
//! Controllers are created through [`ControllerRegistry`], one per
//! validated tunnel name; each controller owns its backend binding and a
//! single telemetry subscription.

pub mod backend;
pub mod broadcast;
pub mod controller;
pub mod error;
pub mod provision;
pub mod registry;
pub mod service;

pub use backend::{BackendError, TunnelBackend, WgQuickBackend};
pub use broadcast::{TelemetryBroadcaster, POLL_PERIOD};
pub use controller::{ControllerState, TunnelController};
pub use error::ControlError;
pub use provision::ConfigProvisioner;
pub use registry::ControllerRegistry;
#[cfg(windows)]
pub use service::ScmServiceBackend;
pub use service::SystemdServiceBackend;
