//! Transport layer: 29-bit identifier packing and Fast Packet reassembly.
//!
//! ## Timing constants
//!
//! Timeouts shared by the transport and the gateway read loops.

pub mod can_id;
pub mod fast_packet;

/// Age after which a partially received Fast Packet sequence is considered
/// abandoned. A later frame reusing the same (source, PGN, tag) key resets
/// the buffer instead of appending to stale data.
///
/// On a 250 kbps bus a full 32-frame transfer needs well under 100 ms, so
/// 750 ms leaves room for heavily loaded buses without letting two distinct
/// transfers blur into each other.
pub const FAST_PACKET_STALE_MS: i64 = 750;

/// Maximum time a single gateway read may block before the loop re-checks
/// cancellation. Keeps teardown latency bounded without busy-polling.
pub const READ_QUANTUM_MS: u64 = 50;

/// Default ceiling for a bus that produces no data at all before the read
/// loop reports an idle timeout.
pub const NO_DATA_TIMEOUT_MS: u64 = 5_000;
