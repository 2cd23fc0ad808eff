//! Fast Packet assembler: rebuilds application messages by aggregating the
//! CAN frames of multi-frame transfers from any number of concurrent
//! sources.

use super::{could_be_fast_packet, FIRST_FRAME_DATA, NEXT_FRAME_DATA};
use crate::core::{RawFrame, RawMessage, FAST_PACKET_MAX_SIZE};
use crate::protocol::transport::FAST_PACKET_STALE_MS;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;

/// In-flight reassembly buffer for one (source, PGN, sequence tag) triple.
///
/// Frames may arrive in any order: each received frame sets its bit in
/// `received_mask`, and the transfer completes when that equals the
/// `complete_mask` derived from the length in frame 0.
#[derive(Debug, Clone, Copy)]
struct Sequence {
    header: crate::core::CanBusHeader,
    last_frame_time: DateTime<Utc>,
    /// 3-bit transfer counter distinguishing interleaved messages from the
    /// same source.
    sequence_tag: u8,
    /// Total payload byte length from frame 0; zero until frame 0 arrives.
    length: u8,
    complete_mask: u32,
    /// One bit per received frame number.
    received_mask: u32,
    data: [u8; FAST_PACKET_MAX_SIZE],
}

impl Sequence {
    const fn empty() -> Self {
        Self {
            header: crate::core::CanBusHeader {
                pgn: 0,
                priority: 0,
                source: 0,
                destination: 0,
            },
            last_frame_time: DateTime::UNIX_EPOCH,
            sequence_tag: 0,
            length: 0,
            complete_mask: 0,
            received_mask: 0,
            // Data is not wiped on reset; new frames overwrite it.
            data: [0; FAST_PACKET_MAX_SIZE],
        }
    }

    fn reset(&mut self) {
        self.header = crate::core::CanBusHeader::default();
        self.last_frame_time = DateTime::UNIX_EPOCH;
        self.sequence_tag = 0;
        self.length = 0;
        self.complete_mask = 0;
        self.received_mask = 0;
    }

    /// Place one frame into the buffer. Returns `true` once every expected
    /// frame has been seen. Duplicate frames are ignored (idempotent).
    fn append(&mut self, frame: &RawFrame) -> bool {
        if frame.length < 2 {
            return false;
        }
        let tag = frame.data[0] >> 5;
        let frame_nr = frame.data[0] & 0b0001_1111;
        let frame_mask = 1u32 << frame_nr;
        if self.received_mask & frame_mask != 0 {
            return self.complete_mask != 0 && self.received_mask == self.complete_mask;
        }
        if self.received_mask == 0 {
            self.header = frame.header;
            self.sequence_tag = tag;
        }
        self.received_mask |= frame_mask;
        self.last_frame_time = frame.time;

        if frame_nr == 0 {
            // Frame 0: byte 1 is the transfer length, bytes 2..8 are the
            // first six payload bytes.
            self.length = frame.data[1];
            let mut frame_count = 1u32;
            if usize::from(self.length) > FIRST_FRAME_DATA {
                frame_count +=
                    (u32::from(self.length) - FIRST_FRAME_DATA as u32 + NEXT_FRAME_DATA as u32 - 1)
                        / NEXT_FRAME_DATA as u32;
            }
            self.complete_mask = !(u32::MAX << frame_count);
            self.data[..FIRST_FRAME_DATA].copy_from_slice(&frame.data[2..8]);
        } else {
            // Frame N: up to seven payload bytes at 6 + (N-1)*7.
            let start = FIRST_FRAME_DATA + usize::from(frame_nr - 1) * NEXT_FRAME_DATA;
            let payload = &frame.payload()[1..];
            let room = FAST_PACKET_MAX_SIZE.saturating_sub(start);
            let take = payload.len().min(room);
            self.data[start..start + take].copy_from_slice(&payload[..take]);
        }

        self.complete_mask != 0 && self.received_mask == self.complete_mask
    }

    fn to_message(&self) -> RawMessage {
        RawMessage {
            time: self.last_frame_time,
            header: self.header,
            data: self.data[..usize::from(self.length)].to_vec(),
        }
    }
}

/// Turns a frame stream into a message stream.
///
/// Frames of PGNs declared Fast in the schema are buffered per
/// (source, PGN, tag) until complete; anything else passes through as a
/// single-frame message. Sequence buffers are pooled and reused after
/// completion or after the 750 ms staleness deadline.
pub struct FastPacketAssembler {
    /// PGNs whose declared packet type is Fast, from the schema store.
    pgns: HashSet<u32>,
    in_transfer: Vec<Box<Sequence>>,
    pool: Vec<Box<Sequence>>,
    now: fn() -> DateTime<Utc>,
}

impl FastPacketAssembler {
    pub fn new<I: IntoIterator<Item = u32>>(fast_packet_pgns: I) -> Self {
        Self {
            pgns: fast_packet_pgns.into_iter().collect(),
            in_transfer: Vec::with_capacity(10),
            pool: Vec::new(),
            now: Utc::now,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_clock(mut self, now: fn() -> DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Feed one frame. Returns the completed [`RawMessage`] when the frame
    /// finishes a transfer, or immediately for non-Fast-Packet frames.
    pub fn assemble(&mut self, frame: &RawFrame) -> Option<RawMessage> {
        let is_fast_packet =
            could_be_fast_packet(frame.header.pgn) && self.pgns.contains(&frame.header.pgn);
        if !is_fast_packet {
            return Some(RawMessage {
                time: frame.time,
                header: frame.header,
                data: frame.payload().to_vec(),
            });
        }
        if frame.length < 2 {
            tracing::warn!(
                pgn = frame.header.pgn,
                source = frame.header.source,
                "fast packet frame shorter than its own header, dropped"
            );
            return None;
        }

        let threshold = (self.now)() - Duration::milliseconds(FAST_PACKET_STALE_MS);
        let tag = frame.data[0] >> 5;

        let index = match self.in_transfer.iter().position(|seq| {
            seq.header.source == frame.header.source
                && seq.header.pgn == frame.header.pgn
                && seq.sequence_tag == tag
        }) {
            Some(i) => {
                if self.in_transfer[i].last_frame_time < threshold {
                    // Too old to belong to this transfer; start over.
                    tracing::trace!(
                        pgn = frame.header.pgn,
                        source = frame.header.source,
                        tag,
                        "stale fast packet sequence reset"
                    );
                    self.in_transfer[i].reset();
                }
                i
            }
            None => {
                let mut seq = self.pool.pop().unwrap_or_else(|| Box::new(Sequence::empty()));
                seq.reset();
                // Key the fresh buffer before the first frame lands so that
                // lookups for the same triple find it.
                seq.header = frame.header;
                seq.sequence_tag = tag;
                self.in_transfer.push(seq);
                self.in_transfer.len() - 1
            }
        };

        if self.in_transfer[index].append(frame) {
            let seq = self.in_transfer.swap_remove(index);
            let message = seq.to_message();
            self.pool.push(seq);
            Some(message)
        } else {
            None
        }
    }
}

#[cfg(test)]
#[path = "tests.rs"]
mod tests;
