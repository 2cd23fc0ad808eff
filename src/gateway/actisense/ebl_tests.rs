//! EBL reader scenarios around the sample record from a W2K-1 log:
//! `1b 01 07 95 0e 28 9a 00 01 f8 09 3d 0d b3 22 48 32 59 0d 1b 0a`.
use super::*;
use pretty_assertions::assert_eq;
use tokio::io::AsyncWriteExt;

fn small_timeouts() -> GatewayConfig {
    GatewayConfig {
        receive_data_timeout: std::time::Duration::from_millis(200),
        read_quantum: std::time::Duration::from_millis(10),
        ..Default::default()
    }
}

const EBL_RECORD: [u8; 21] = [
    0x1B, 0x01, // ESC SOH
    0x07, 0x95, // BST-95 record tag
    0x0E, // 14 bytes follow
    0x28, 0x9A, // timestamp counter
    0x00, 0x01, 0xF8, 0x09, // CAN id 0x09F80100 little endian
    0x3D, 0x0D, 0xB3, 0x22, // latitude
    0x48, 0x32, 0x59, 0x0D, // longitude
    0x1B, 0x0A, // ESC NL
];

#[tokio::test]
async fn reads_bst95_record() {
    let (mut tx, rx) = tokio::io::duplex(256);
    let mut device = EblDevice::with_config(rx, small_timeouts());
    tx.write_all(&EBL_RECORD).await.unwrap();

    let cancel = CancellationToken::new();
    let message = device.read_raw_message(&cancel).await.expect("one record");
    assert_eq!(message.header.pgn, 129_025);
    assert_eq!(message.header.priority, 2);
    assert_eq!(message.header.source, 0);
    assert_eq!(message.header.destination, 255);
    assert_eq!(
        message.data,
        vec![0x3D, 0x0D, 0xB3, 0x22, 0x48, 0x32, 0x59, 0x0D]
    );
}

#[tokio::test]
async fn escaped_payload_bytes_are_unstuffed() {
    // A record whose payload contains 0x1B, doubled on the wire.
    let mut body = vec![0x07u8, 0x95, 0x0E, 0x00, 0x00];
    body.extend_from_slice(&[0x00, 0x01, 0xF8, 0x09]);
    body.extend_from_slice(&[0x1B, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07]);

    let mut wire = vec![0x1B, 0x01];
    for &b in &body {
        if b == 0x1B {
            wire.push(0x1B);
        }
        wire.push(b);
    }
    wire.extend_from_slice(&[0x1B, 0x0A]);

    let (mut tx, rx) = tokio::io::duplex(256);
    let mut device = EblDevice::with_config(rx, small_timeouts());
    tx.write_all(&wire).await.unwrap();

    let cancel = CancellationToken::new();
    let message = device.read_raw_message(&cancel).await.expect("one record");
    assert_eq!(message.data[0], 0x1B);
    assert_eq!(message.data.len(), 8);
}

#[tokio::test]
async fn length_mismatch_is_a_frame_error() {
    let mut corrupted = EBL_RECORD;
    corrupted[4] = 0x0D; // claim 13 bytes, carry 14
    let (mut tx, rx) = tokio::io::duplex(256);
    let mut device = EblDevice::with_config(rx, small_timeouts());
    tx.write_all(&corrupted).await.unwrap();

    let cancel = CancellationToken::new();
    let err = device.read_raw_message(&cancel).await.expect_err("bad length");
    assert!(matches!(err, GatewayError::Frame(_)), "{err:?}");
}

#[tokio::test]
async fn unknown_record_types_are_skipped() {
    // A non-BST95 record (e.g. a file header) followed by a data record.
    let header_record = [0x1Bu8, 0x01, 0x06, 0x42, 0xAA, 0xBB, 0xCC, 0xDD, 0x1B, 0x0A];
    let (mut tx, rx) = tokio::io::duplex(256);
    let mut device = EblDevice::with_config(rx, small_timeouts());
    tx.write_all(&header_record).await.unwrap();
    tx.write_all(&EBL_RECORD).await.unwrap();

    let cancel = CancellationToken::new();
    let message = device.read_raw_message(&cancel).await.expect("skips header");
    assert_eq!(message.header.pgn, 129_025);
}
