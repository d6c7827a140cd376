//! Normalized tunnel status types

use crate::name::TunnelName;
use serde::Serialize;
use std::fmt;

/// Link state of a tunnel interface.
///
/// Always derived from a live backend query, never cached: the backend
/// can die between polls without this subsystem's involvement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TunnelState {
    #[serde(rename = "UP")]
    Up,
    #[serde(rename = "DOWN")]
    Down,
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelState::Up => write!(f, "UP"),
            TunnelState::Down => write!(f, "DOWN"),
        }
    }
}

/// Aggregated per-peer counters, normalized across telemetry backends.
///
/// `rx_bytes`/`tx_bytes` are the cumulative counters the backend reports,
/// summed over all peers. `last_handshake_millis` is the most recent
/// handshake across all peers in Unix milliseconds, 0 meaning never.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeerStats {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub last_handshake_millis: i64,
}

/// One immutable point-in-time status reading for a tunnel.
#[derive(Debug, Clone, Serialize)]
pub struct TunnelSnapshot {
    pub name: TunnelName,
    pub state: TunnelState,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    /// Unix milliseconds of the most recent peer handshake, 0 = never.
    pub last_handshake_millis: i64,
}

impl TunnelSnapshot {
    pub fn new(name: TunnelName, state: TunnelState, stats: PeerStats) -> Self {
        Self {
            name,
            state,
            rx_bytes: stats.rx_bytes,
            tx_bytes: stats.tx_bytes,
            last_handshake_millis: stats.last_handshake_millis,
        }
    }
}
