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

#[test]
fn unmarshals_record() {
    let message =
        unmarshal_line("2023-02-07T11:55:11.002803898+02:00,2,127245,13,255,8,ff,07,ff,7f,00,00,ff,ff")
            .expect("parses");
    assert_eq!(message.header.pgn, 127_245);
    assert_eq!(message.header.priority, 2);
    assert_eq!(message.header.source, 13);
    assert_eq!(message.header.destination, 255);
    assert_eq!(
        message.data,
        vec![0xFF, 0x07, 0xFF, 0x7F, 0x00, 0x00, 0xFF, 0xFF]
    );
    // +02:00 offset normalizes to UTC.
    assert_eq!(
        message.time.to_rfc3339_opts(SecondsFormat::Nanos, true),
        "2023-02-07T09:55:11.002803898Z"
    );
}

#[test]
fn rejects_malformed_records() {
    // Too few components.
    assert!(unmarshal_line("2021-07-29T10:18:31.758Z,6,126208").is_err());
    // Declared length disagrees with byte count.
    assert!(unmarshal_line("2021-07-29T10:18:31.758Z,6,126208,36,0,3,02,82").is_err());
    // Bad timestamp.
    assert!(unmarshal_line("yesterday,6,126208,36,0,2,02,82").is_err());
    // Bad hex byte.
    assert!(unmarshal_line("2021-07-29T10:18:31.758Z,6,126208,36,0,2,02,zz").is_err());
}

#[test]
fn marshal_round_trips() {
    let message =
        unmarshal_line("2021-07-29T10:18:31.758Z,6,126208,36,0,7,02,82,ff,00,10,02,00").unwrap();
    let line = marshal_raw_message(&message);
    let back = unmarshal_line(&line).expect("round trip");
    assert_eq!(back, message);
}

#[tokio::test]
async fn reader_skips_comments_and_blank_lines() {
    let (mut tx, rx) = tokio::io::duplex(1024);
    let mut device = CanBoatDevice::with_config(rx, small_timeouts());
    tx.write_all(
        b"# canboat capture\n\
          \n\
          2021-07-29T10:18:31.758Z,6,126208,36,0,7,02,82,ff,00,10,02,00\n",
    )
    .await
    .unwrap();
    drop(tx);

    let cancel = CancellationToken::new();
    let message = device.read_raw_message(&cancel).await.expect("record");
    assert_eq!(message.header.pgn, 126_208);
    assert_eq!(message.header.source, 36);

    // End of replay surfaces as Eof, not as an idle timeout.
    assert!(matches!(
        device.read_raw_message(&cancel).await,
        Err(GatewayError::Eof)
    ));
}

#[tokio::test]
async fn writer_emits_parseable_lines() {
    let (rx, mut far) = tokio::io::duplex(1024);
    let mut device = CanBoatDevice::with_config(rx, small_timeouts());

    let message =
        unmarshal_line("2021-07-29T10:18:31.758Z,6,126208,36,0,7,02,82,ff,00,10,02,00").unwrap();
    let cancel = CancellationToken::new();
    device.write_raw_message(&cancel, &message).await.unwrap();

    use tokio::io::AsyncReadExt;
    let mut wire = vec![0u8; 256];
    let n = far.read(&mut wire).await.unwrap();
    let text = std::str::from_utf8(&wire[..n]).unwrap();
    assert!(text.ends_with('\n'));
    assert_eq!(unmarshal_line(text.trim()).unwrap(), message);
}
