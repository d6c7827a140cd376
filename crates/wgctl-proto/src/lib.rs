//! Tunnel Control Data Model
//!
//! This crate defines the core types shared by the tunnel control and
//! telemetry crates: validated tunnel names, normalized status snapshots,
//! the kernel driver's configuration record layout, and timestamp
//! conversion between the driver's epoch and Unix time.

pub mod driver;
pub mod name;
pub mod snapshot;
pub mod time;

pub use driver::{aggregate, decode_peers, ConfigBufferBuilder, DecodeError, PeerRecord, PeerTotals};
pub use name::{NameError, TunnelName, MAX_NAME_LEN};
pub use snapshot::{PeerStats, TunnelSnapshot, TunnelState};
pub use time::{ticks_to_unix_millis, UNIX_EPOCH_TICKS};
