//! Driver configuration buffer layout
//!
//! The kernel driver exposes the live tunnel configuration as one
//! contiguous buffer: a fixed-size interface block followed by one
//! variable-length record per peer, where each peer record is a fixed
//! part trailed by that peer's allowed-IP entries. The decoder walks the
//! buffer with explicit bounds checks; a buffer that lies about its own
//! shape produces a [`DecodeError`], never a panic or an out-of-bounds
//! read.

use bytes::Buf;
use thiserror::Error;

/// Size of the leading interface block.
pub const INTERFACE_BLOCK_SIZE: usize = 80;

/// Offset of the `u32` peer count within the interface block.
pub const PEERS_COUNT_OFFSET: usize = 72;

/// Size of the fixed part of one peer record.
pub const PEER_FIXED_SIZE: usize = 136;

/// Offsets of the counter fields within a peer record's fixed part.
pub const PEER_TX_BYTES_OFFSET: usize = 104;
pub const PEER_RX_BYTES_OFFSET: usize = 112;
pub const PEER_LAST_HANDSHAKE_OFFSET: usize = 120;
pub const PEER_ALLOWED_IPS_COUNT_OFFSET: usize = 128;

/// Size of one allowed-IP entry trailing a peer record.
pub const ALLOWED_IP_ENTRY_SIZE: usize = 24;

/// Configuration buffer decode errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("configuration buffer truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("peer record claims an implausible allowed-IP count: {0}")]
    AllowedIpOverflow(u32),
}

/// Counters decoded from one peer record.
///
/// Transient: decoded per status query and discarded after aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerRecord {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    /// 100-ns ticks since 1601-01-01; 0 = never handshaked.
    pub last_handshake_ticks: u64,
    pub allowed_ip_count: u32,
}

/// Aggregate over all peers of one tunnel: combined traffic and the most
/// recent handshake, not the first peer's alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeerTotals {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub last_handshake_ticks: u64,
}

/// Decodes every peer record out of a driver configuration buffer.
///
/// The cursor advances by `PEER_FIXED_SIZE + allowed_ip_count *
/// ALLOWED_IP_ENTRY_SIZE` per peer; the allowed-IP entries themselves are
/// skipped, only their count matters for the stride.
pub fn decode_peers(buf: &[u8]) -> Result<Vec<PeerRecord>, DecodeError> {
    ensure_len(buf, INTERFACE_BLOCK_SIZE)?;
    let peer_count = read_u32(buf, PEERS_COUNT_OFFSET);

    let mut peers = Vec::with_capacity(peer_count.min(64) as usize);
    let mut cursor = INTERFACE_BLOCK_SIZE;
    for _ in 0..peer_count {
        let fixed_end = cursor
            .checked_add(PEER_FIXED_SIZE)
            .ok_or(DecodeError::Truncated {
                needed: usize::MAX,
                available: buf.len(),
            })?;
        ensure_len(buf, fixed_end)?;

        let record = &buf[cursor..fixed_end];
        let allowed_ip_count = read_u32(record, PEER_ALLOWED_IPS_COUNT_OFFSET);
        peers.push(PeerRecord {
            rx_bytes: read_u64(record, PEER_RX_BYTES_OFFSET),
            tx_bytes: read_u64(record, PEER_TX_BYTES_OFFSET),
            last_handshake_ticks: read_u64(record, PEER_LAST_HANDSHAKE_OFFSET),
            allowed_ip_count,
        });

        let trailer = (allowed_ip_count as usize)
            .checked_mul(ALLOWED_IP_ENTRY_SIZE)
            .ok_or(DecodeError::AllowedIpOverflow(allowed_ip_count))?;
        cursor = fixed_end
            .checked_add(trailer)
            .ok_or(DecodeError::AllowedIpOverflow(allowed_ip_count))?;
        ensure_len(buf, cursor)?;
    }

    Ok(peers)
}

/// Sums transfer counters across peers and takes the most recent
/// handshake. An empty peer sequence yields all zeros.
pub fn aggregate(peers: &[PeerRecord]) -> PeerTotals {
    let mut totals = PeerTotals::default();
    for peer in peers {
        totals.rx_bytes = totals.rx_bytes.saturating_add(peer.rx_bytes);
        totals.tx_bytes = totals.tx_bytes.saturating_add(peer.tx_bytes);
        totals.last_handshake_ticks = totals.last_handshake_ticks.max(peer.last_handshake_ticks);
    }
    totals
}

fn ensure_len(buf: &[u8], needed: usize) -> Result<(), DecodeError> {
    if buf.len() < needed {
        return Err(DecodeError::Truncated {
            needed,
            available: buf.len(),
        });
    }
    Ok(())
}

// Callers bounds-check before these fixed-offset reads.
fn read_u32(buf: &[u8], offset: usize) -> u32 {
    (&buf[offset..offset + 4]).get_u32_le()
}

fn read_u64(buf: &[u8], offset: usize) -> u64 {
    (&buf[offset..offset + 8]).get_u64_le()
}

/// Builds configuration buffers in the driver's wire layout.
///
/// The counterpart of [`decode_peers`], used to stage a configuration for
/// the driver's set path and to simulate driver responses.
#[derive(Debug, Default)]
pub struct ConfigBufferBuilder {
    peers: Vec<PeerRecord>,
}

impl ConfigBufferBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn peer(mut self, record: PeerRecord) -> Self {
        self.peers.push(record);
        self
    }

    pub fn build(self) -> Vec<u8> {
        let total: usize = INTERFACE_BLOCK_SIZE
            + self
                .peers
                .iter()
                .map(|p| PEER_FIXED_SIZE + p.allowed_ip_count as usize * ALLOWED_IP_ENTRY_SIZE)
                .sum::<usize>();
        let mut buf = vec![0u8; total];
        write_u32(&mut buf, PEERS_COUNT_OFFSET, self.peers.len() as u32);

        let mut cursor = INTERFACE_BLOCK_SIZE;
        for peer in &self.peers {
            write_u64(&mut buf, cursor + PEER_TX_BYTES_OFFSET, peer.tx_bytes);
            write_u64(&mut buf, cursor + PEER_RX_BYTES_OFFSET, peer.rx_bytes);
            write_u64(
                &mut buf,
                cursor + PEER_LAST_HANDSHAKE_OFFSET,
                peer.last_handshake_ticks,
            );
            write_u32(
                &mut buf,
                cursor + PEER_ALLOWED_IPS_COUNT_OFFSET,
                peer.allowed_ip_count,
            );
            cursor += PEER_FIXED_SIZE + peer.allowed_ip_count as usize * ALLOWED_IP_ENTRY_SIZE;
        }
        buf
    }
}

fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn write_u64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}
