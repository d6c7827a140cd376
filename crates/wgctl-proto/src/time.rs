//! Driver timestamp conversion
//!
//! The kernel driver reports handshake times as 100-nanosecond intervals
//! counted from 1601-01-01 (the platform's native epoch). Consumers of
//! this subsystem work in Unix milliseconds.

/// 100-ns intervals between 1601-01-01 and 1970-01-01.
pub const UNIX_EPOCH_TICKS: u64 = 116_444_736_000_000_000;

/// 100-ns ticks per millisecond.
const TICKS_PER_MILLI: u64 = 10_000;

/// Converts a 1601-epoch 100-ns tick count to Unix milliseconds.
///
/// Tick values at or below the Unix epoch offset map to 0, which doubles
/// as the never-handshaked sentinel (the driver reports 0 ticks for a
/// peer that has never completed a handshake).
pub fn ticks_to_unix_millis(ticks: u64) -> i64 {
    if ticks <= UNIX_EPOCH_TICKS {
        0
    } else {
        ((ticks - UNIX_EPOCH_TICKS) / TICKS_PER_MILLI) as i64
    }
}
