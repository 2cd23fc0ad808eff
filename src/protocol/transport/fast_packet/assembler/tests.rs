//! Reassembly scenarios built around a captured PGN 130323 transfer
//! (Meteorological Station Data, 30 bytes over five frames).
use super::*;
use crate::core::CanBusHeader;
use chrono::TimeZone;
use pretty_assertions::assert_eq;

fn test_clock() -> DateTime<Utc> {
    Utc.timestamp_opt(1_665_488_842, 0).unwrap()
}

fn header_130323() -> CanBusHeader {
    CanBusHeader {
        pgn: 130_323,
        priority: 6,
        source: 35,
        destination: 255,
    }
}

fn frame(header: CanBusHeader, data: [u8; 8]) -> RawFrame {
    RawFrame {
        time: test_clock(),
        header,
        length: 8,
        data,
    }
}

/// The five wire frames of the captured transfer, first bytes 0x60..0x64.
fn frames_130323() -> [RawFrame; 5] {
    let h = header_130323();
    [
        frame(h, [0x60, 0x1E, 0xF0, 0x30, 0x4B, 0x08, 0xAC, 0x02]),
        frame(h, [0x61, 0x12, 0x8B, 0x01, 0xB3, 0x22, 0x34, 0x38]),
        frame(h, [0x62, 0x59, 0x0D, 0xA4, 0x00, 0xF5, 0xC7, 0xFA]),
        frame(h, [0x63, 0xFF, 0xFF, 0xF0, 0x03, 0x95, 0x6F, 0x02]),
        frame(h, [0x64, 0x01, 0x02, 0x01, 0xFF, 0xFF, 0xFF, 0xFF]),
    ]
}

fn expected_payload_130323() -> Vec<u8> {
    vec![
        0xF0, 0x30, 0x4B, 0x08, 0xAC, 0x02, // frame 0, 6 bytes
        0x12, 0x8B, 0x01, 0xB3, 0x22, 0x34, 0x38, // frame 1
        0x59, 0x0D, 0xA4, 0x00, 0xF5, 0xC7, 0xFA, // frame 2
        0xFF, 0xFF, 0xF0, 0x03, 0x95, 0x6F, 0x02, // frame 3
        0x01, 0x02, 0x01, // frame 4, only 3 of 7 slots used
    ]
}

#[test]
fn assembles_in_order() {
    let mut assembler = FastPacketAssembler::new([130_323]).with_clock(test_clock);
    let frames = frames_130323();
    for f in &frames[..4] {
        assert_eq!(assembler.assemble(f), None);
    }
    let message = assembler.assemble(&frames[4]).expect("transfer complete");
    assert_eq!(message.header, header_130323());
    assert_eq!(message.data.len(), 30);
    assert_eq!(message.data, expected_payload_130323());
}

#[test]
fn assembles_out_of_order() {
    let mut assembler = FastPacketAssembler::new([130_323]).with_clock(test_clock);
    let frames = frames_130323();
    for &i in &[3usize, 0, 4, 1] {
        assert_eq!(assembler.assemble(&frames[i]), None, "frame {i}");
    }
    let message = assembler.assemble(&frames[2]).expect("transfer complete");
    assert_eq!(message.data, expected_payload_130323());
}

#[test]
fn duplicate_frames_are_idempotent() {
    let mut assembler = FastPacketAssembler::new([130_323]).with_clock(test_clock);
    let frames = frames_130323();
    assert_eq!(assembler.assemble(&frames[0]), None);
    assert_eq!(assembler.assemble(&frames[1]), None);
    assert_eq!(assembler.assemble(&frames[1]), None);
    assert_eq!(assembler.assemble(&frames[2]), None);
    assert_eq!(assembler.assemble(&frames[3]), None);
    assert!(assembler.assemble(&frames[4]).is_some());
}

#[test]
fn non_fast_packet_passes_through() {
    let mut assembler = FastPacketAssembler::new([130_323]).with_clock(test_clock);
    let header = CanBusHeader {
        pgn: 127_245, // Rudder, single frame
        priority: 2,
        source: 13,
        destination: 255,
    };
    let f = RawFrame {
        time: test_clock(),
        header,
        length: 8,
        data: [0xFF, 0x07, 0xFF, 0x7F, 0x00, 0x00, 0xFF, 0xFF],
    };
    let message = assembler.assemble(&f).expect("single frame message");
    assert_eq!(message.header, header);
    assert_eq!(message.data, f.data.to_vec());
}

#[test]
fn fast_packet_range_but_not_in_schema_set_passes_through() {
    let mut assembler = FastPacketAssembler::new([130_323]).with_clock(test_clock);
    let mut f = frames_130323()[0];
    f.header.pgn = 130_324; // in range, not declared Fast
    let message = assembler.assemble(&f).expect("treated as single frame");
    assert_eq!(message.data, f.data.to_vec());
}

#[test]
fn concurrent_sources_do_not_conflict() {
    let mut assembler = FastPacketAssembler::new([130_323]).with_clock(test_clock);
    let frames_a = frames_130323();
    let mut frames_b = frames_130323();
    for f in &mut frames_b {
        f.header.source = 99;
    }

    // Interleave the two transfers frame by frame.
    for i in 0..4 {
        assert_eq!(assembler.assemble(&frames_a[i]), None);
        assert_eq!(assembler.assemble(&frames_b[i]), None);
    }
    let done_a = assembler.assemble(&frames_a[4]).expect("source 35 complete");
    let done_b = assembler.assemble(&frames_b[4]).expect("source 99 complete");
    assert_eq!(done_a.header.source, 35);
    assert_eq!(done_b.header.source, 99);
    assert_eq!(done_a.data, done_b.data);
}

#[test]
fn distinct_tags_from_same_source_are_independent() {
    let mut assembler = FastPacketAssembler::new([130_323]).with_clock(test_clock);
    let frames_tag3 = frames_130323();
    let mut frames_tag4 = frames_130323();
    for f in &mut frames_tag4 {
        f.data[0] = (f.data[0] & 0x1F) | (4 << 5);
    }

    assert_eq!(assembler.assemble(&frames_tag3[0]), None);
    assert_eq!(assembler.assemble(&frames_tag4[0]), None);
    for i in 1..4 {
        assert_eq!(assembler.assemble(&frames_tag3[i]), None);
        assert_eq!(assembler.assemble(&frames_tag4[i]), None);
    }
    assert!(assembler.assemble(&frames_tag3[4]).is_some());
    assert!(assembler.assemble(&frames_tag4[4]).is_some());
}

#[test]
fn stale_sequence_is_reset_before_reuse() {
    let mut assembler = FastPacketAssembler::new([130_323]).with_clock(test_clock);
    let frames = frames_130323();

    // A partial transfer whose last frame is far older than the 750 ms
    // staleness deadline.
    let mut old = frames[0];
    old.time = test_clock() - Duration::milliseconds(FAST_PACKET_STALE_MS + 100);
    assert_eq!(assembler.assemble(&old), None);
    assert_eq!(assembler.assemble(&frames[1]), None);

    // The buffer was reset when frame 1 arrived, so the old frame 0 is
    // gone and the transfer completes only after a fresh frame 0.
    for &i in &[2usize, 3, 4] {
        assert_eq!(assembler.assemble(&frames[i]), None, "frame {i}");
    }
    let message = assembler.assemble(&frames[0]).expect("fresh frame 0 completes");
    assert_eq!(message.data, expected_payload_130323());
}

#[test]
fn single_byte_payload_fits_one_frame() {
    let mut assembler = FastPacketAssembler::new([130_323]).with_clock(test_clock);
    let h = header_130323();
    // Length 1: complete after frame 0 alone.
    let f = frame(h, [0x60, 0x01, 0xAB, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
    let message = assembler.assemble(&f).expect("one frame transfer");
    assert_eq!(message.data, vec![0xAB]);
}

#[test]
fn arbitrary_lengths_round_trip_once() {
    // Slice a payload of every interesting length into wire frames and feed
    // them in reverse order; the assembler must yield it exactly once.
    for len in [1usize, 6, 7, 13, 50, 223] {
        let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let mut frames = Vec::new();
        let h = header_130323();
        let tag = 2u8 << 5;

        let mut first = [0xFFu8; 8];
        first[0] = tag;
        first[1] = len as u8;
        let head = len.min(6);
        first[2..2 + head].copy_from_slice(&payload[..head]);
        frames.push(frame(h, first));

        let mut rest = &payload[head..];
        let mut frame_nr = 1u8;
        while !rest.is_empty() {
            let take = rest.len().min(7);
            let mut data = [0xFFu8; 8];
            data[0] = tag | frame_nr;
            data[1..1 + take].copy_from_slice(&rest[..take]);
            frames.push(frame(h, data));
            rest = &rest[take..];
            frame_nr += 1;
        }

        let mut assembler = FastPacketAssembler::new([130_323]).with_clock(test_clock);
        let mut yielded = Vec::new();
        for f in frames.iter().rev() {
            if let Some(m) = assembler.assemble(f) {
                yielded.push(m);
            }
        }
        assert_eq!(yielded.len(), 1, "length {len}");
        assert_eq!(yielded[0].data, payload, "length {len}");
    }
}
