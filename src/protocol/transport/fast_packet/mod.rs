//! NMEA 2000 Fast Packet support: transfers of up to 223 bytes split over
//! as many as 32 CAN frames.
//!
//! The first payload byte of every frame packs a 3-bit sequence tag (which
//! transfer the frame belongs to) and a 5-bit frame counter. Frame 0 also
//! carries the total byte length, so the expected frame count and the
//! completion bitmask are known as soon as it arrives, regardless of
//! arrival order.

use crate::core::FAST_PACKET_MAX_SIZE;

/// Lowest PGN that can be Fast Packet. The schema decides per PGN; this
/// gate only spares the lookup for single-frame ranges.
pub const FAST_PACKET_MIN_PGN: u32 = 0x01ED00;

/// `true` when the PGN falls in the range where Fast Packet transfers are
/// possible at all.
#[inline]
pub fn could_be_fast_packet(pgn: u32) -> bool {
    pgn >= FAST_PACKET_MIN_PGN
}

pub mod assembler;

pub use assembler::FastPacketAssembler;

/// Payload bytes carried by frame 0 (after tag byte and length byte).
pub(crate) const FIRST_FRAME_DATA: usize = 6;
/// Payload bytes carried by every following frame (after the tag byte).
pub(crate) const NEXT_FRAME_DATA: usize = 7;

// 6 + 31 * 7 == 223; the counter cannot address more than that.
const _: () = assert!(FIRST_FRAME_DATA + 31 * NEXT_FRAME_DATA == FAST_PACKET_MAX_SIZE);
