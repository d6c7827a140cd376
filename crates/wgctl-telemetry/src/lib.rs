//! Telemetry readers for tunnel backends
//!
//! Two structurally different telemetry sources are normalized into one
//! [`PeerStats`] shape: a line-oriented status tool on platforms that
//! ship one ([`text::WgToolReader`]), and the kernel driver's binary
//! configuration buffer elsewhere ([`driver::DriverReader`]).
//!
//! Telemetry is advisory. Every reader is best-effort: an unavailable
//! tool, a malformed line or a short buffer degrades to zeroed counters
//! instead of surfacing an error, so a status poll can never be aborted
//! by a telemetry hiccup.

pub mod driver;
pub mod text;

use async_trait::async_trait;
use wgctl_proto::{PeerStats, TunnelName};

/// Reads per-peer transfer counters and handshake times for a tunnel.
#[async_trait]
pub trait TelemetryReader: Send + Sync {
    /// Returns aggregated counters for `name`.
    ///
    /// Never fails: unavailable or unparseable telemetry yields
    /// [`PeerStats::default`].
    async fn read(&self, name: &TunnelName) -> PeerStats;
}

pub use driver::{DriverHandle, DriverOpen, DriverQueryError, DriverReader};
pub use text::{link_is_up, CommandOutput, CommandRunner, SystemRunner, WgToolReader};
