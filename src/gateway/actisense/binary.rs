//! Actisense binary-format device (NGT-1 and W2K-1 N2K binary). One
//! DLE/STX escaped envelope, several command layouts inside it.

use super::{
    checksum, checksum_ok, EscapedFrameParser, CMD_DEVICE_MESSAGE_RECEIVED, CMD_DEVICE_MESSAGE_SEND,
    CMD_N2K_MESSAGE_RECEIVED, CMD_N2K_MESSAGE_SEND, CMD_NGT_MESSAGE_RECEIVED, CMD_NGT_MESSAGE_SEND,
    CMD_RAW_MESSAGE_RECEIVED, CMD_RAW_MESSAGE_SEND, DLE, ETX, STX,
};
use crate::core::{CanBusHeader, RawMessage, ACTISENSE_FAKE_PGN_OFFSET, ISO_TP_MAX_SIZE};
use crate::error::GatewayError;
use crate::gateway::{
    read_chunk, write_with_retry, Chunk, GatewayConfig, IdleClock, RawMessageReader,
    RawMessageWriter,
};
use crate::protocol::transport::can_id::parse_can_id;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

/// `Receive All` operating mode: clears the gateway's TX PGN filter so it
/// forwards every PGN. Reverse engineered from Actisense NMEAreader;
/// arguments beyond the fixed bytes are undocumented.
const RECEIVE_ALL_COMMAND: [u8; 3] = [0x11, 0x02, 0x00];

/// Actisense binary gateway over any byte transport.
pub struct BinaryDevice<T> {
    transport: T,
    config: GatewayConfig,
    parser: EscapedFrameParser,
    pending: Vec<u8>,
    pending_pos: usize,
}

impl<T> BinaryDevice<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, GatewayConfig::default())
    }

    pub fn with_config(transport: T, config: GatewayConfig) -> Self {
        Self {
            transport,
            config,
            parser: EscapedFrameParser::new(DLE, STX, ETX, ISO_TP_MAX_SIZE),
            pending: Vec::with_capacity(2048),
            pending_pos: 0,
        }
    }

    /// Dispatch a fully unstuffed frame by its command byte. `Ok(None)`
    /// means a frame type the caller did not ask to see.
    fn dispatch(&self, frame: &[u8], now: DateTime<Utc>) -> Result<Option<RawMessage>, GatewayError> {
        if frame.is_empty() {
            return Ok(None);
        }
        tracing::trace!(frame = %hex::encode(frame), "actisense binary frame");
        match frame[0] {
            CMD_NGT_MESSAGE_RECEIVED | CMD_NGT_MESSAGE_SEND => {
                from_ngt_binary(frame, now).map(Some)
            }
            CMD_N2K_MESSAGE_RECEIVED | CMD_N2K_MESSAGE_SEND => {
                from_n2k_binary(frame, now).map(Some)
            }
            CMD_RAW_MESSAGE_RECEIVED | CMD_RAW_MESSAGE_SEND => {
                from_raw_actisense(frame, now).map(Some)
            }
            CMD_DEVICE_MESSAGE_RECEIVED => {
                if self.config.output_gateway_messages {
                    from_device_message(frame, now).map(Some)
                } else {
                    Ok(None)
                }
            }
            other => {
                tracing::trace!(command = other, "ignoring unknown actisense command");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl<T> RawMessageReader for BinaryDevice<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Put the gateway into `Receive All` mode; without this an NGT-1
    /// forwards nothing.
    async fn initialize(&mut self) -> Result<(), GatewayError> {
        let mut body = Vec::with_capacity(2 + RECEIVE_ALL_COMMAND.len());
        body.push(CMD_DEVICE_MESSAGE_SEND);
        body.push(RECEIVE_ALL_COMMAND.len() as u8);
        body.extend_from_slice(&RECEIVE_ALL_COMMAND);
        let packet = wrap_bst(&body);
        write_with_retry(&mut self.transport, &packet, &CancellationToken::new()).await
    }

    async fn read_raw_message(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<RawMessage, GatewayError> {
        let mut chunk = [0u8; 1024];
        let mut idle = IdleClock::new(self.config.receive_data_timeout);
        loop {
            // Drain buffered bytes through the unstuffing machine first; a
            // chunk can hold the tail of one frame and the head of the next.
            while self.pending_pos < self.pending.len() {
                let byte = self.pending[self.pending_pos];
                self.pending_pos += 1;
                if let Some(frame) = self.parser.push(byte) {
                    if let Some(message) = self.dispatch(&frame, Utc::now())? {
                        return Ok(message);
                    }
                }
            }
            self.pending.clear();
            self.pending_pos = 0;

            match read_chunk(&mut self.transport, &mut chunk, cancel, self.config.read_quantum)
                .await?
            {
                Chunk::Data(n) => {
                    idle.mark_data();
                    self.pending.extend_from_slice(&chunk[..n]);
                }
                Chunk::Quiet => {
                    if idle.expired() {
                        return Err(GatewayError::IdleTimeout);
                    }
                }
                Chunk::Eof => {
                    // A replayed capture may end mid-quantum; only report
                    // end of stream once the idle budget is spent.
                    if idle.expired() {
                        return Err(GatewayError::Eof);
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
                        _ = tokio::time::sleep(self.config.read_quantum) => {}
                    }
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), GatewayError> {
        use tokio::io::AsyncWriteExt;
        self.transport.shutdown().await?;
        Ok(())
    }
}

#[async_trait]
impl<T> RawMessageWriter for BinaryDevice<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write_raw_message(
        &mut self,
        cancel: &CancellationToken,
        message: &RawMessage,
    ) -> Result<(), GatewayError> {
        let packet = wrap_bst(&to_send_body(message, self.config.is_n2k_writer));
        tracing::trace!(packet = %hex::encode(&packet), "actisense binary write");
        write_with_retry(&mut self.transport, &packet, cancel).await
    }
}

//==================================================================================Frame synthesis

/// Body of an outbound N2K message: command, length, priority, PGN (little
/// endian), destination, data length, data.
fn to_send_body(message: &RawMessage, n2k_writer: bool) -> Vec<u8> {
    let header = &message.header;
    let data_len = message.data.len();

    let mut body = Vec::with_capacity(data_len + 8);
    body.push(if n2k_writer {
        CMD_N2K_MESSAGE_SEND
    } else {
        CMD_NGT_MESSAGE_SEND
    });
    body.push((data_len + 6) as u8);
    body.push(header.priority);
    body.push(header.pgn as u8);
    body.push((header.pgn >> 8) as u8);
    body.push((header.pgn >> 16) as u8);
    body.push(header.destination);
    body.push(data_len as u8);
    body.extend_from_slice(&message.data);
    body
}

/// Wrap a body in `DLE STX .. <crc> DLE ETX`, doubling interior DLEs.
pub(crate) fn wrap_bst(body: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(body.len() + 7);
    packet.push(DLE);
    packet.push(STX);
    for &b in body {
        if b == DLE {
            packet.push(DLE);
        }
        packet.push(b);
    }
    let crc = 0u8.wrapping_sub(checksum(body));
    if crc == DLE {
        packet.push(DLE);
    }
    packet.push(crc);
    packet.push(DLE);
    packet.push(ETX);
    packet
}

//==================================================================================Frame parsing

/// NGT binary body: priority, PGN(3 LE), destination, source, timestamp(4),
/// data length, data.
fn from_ngt_binary(raw: &[u8], now: DateTime<Utc>) -> Result<RawMessage, GatewayError> {
    // Two envelope bytes: command and length.
    let length = raw.len().saturating_sub(2);
    if length < 11 {
        return Err(GatewayError::Frame(
            "ngt binary message too short to be valid".into(),
        ));
    }
    let data = &raw[2..];

    const DATA_PART_INDEX: usize = 11;
    let payload_len = usize::from(data[10]);
    let end_index = DATA_PART_INDEX + payload_len;
    // The trailing byte past the payload is the CRC.
    if length != end_index + 1 {
        return Err(GatewayError::Frame(format!(
            "data length byte value is different from actual length, {payload_len}!={}",
            length.saturating_sub(DATA_PART_INDEX)
        )));
    }
    if !checksum_ok(raw) {
        return Err(GatewayError::Frame("message has invalid crc".into()));
    }

    let pgn = u32::from(data[1]) + (u32::from(data[2]) << 8) + (u32::from(data[3]) << 16);
    Ok(RawMessage {
        time: now,
        header: CanBusHeader {
            pgn,
            priority: data[0],
            source: data[5],
            destination: data[4],
        },
        // data[6..10] is the gateway's own running timestamp; dropped.
        data: data[DATA_PART_INDEX..end_index].to_vec(),
    })
}

/// N2K binary body (W2K-1): type, length(2 LE), destination, source, PS,
/// PF, DP/priority, control, timestamp(4), data. Priority, data page and
/// PGN are rederived from PS/PF/DP.
fn from_n2k_binary(raw: &[u8], now: DateTime<Utc>) -> Result<RawMessage, GatewayError> {
    const DATA_PART_INDEX: usize = 13;
    if raw.len() < DATA_PART_INDEX {
        return Err(GatewayError::Frame(
            "n2k binary message too short to be valid".into(),
        ));
    }
    let length = u32::from(raw[1]) + (u32::from(raw[2]) << 8);
    if length as usize + 1 != raw.len() {
        return Err(GatewayError::Frame(
            "message length does not match actual data length".into(),
        ));
    }

    let destination = raw[3];
    let source = raw[4];
    let ps = raw[5];
    let pdu_format = raw[6];
    let dprp = raw[7]; // data page (1) + reserved (1) + priority (3)
    let priority = (dprp >> 2) & 0x7;
    let r_and_dp = u32::from(dprp & 0x3);

    let mut pgn = (r_and_dp << 16) + (u32::from(pdu_format) << 8);
    if pdu_format >= 240 {
        // Broadcast: PS is the group extension.
        pgn += u32::from(ps);
    }

    Ok(RawMessage {
        time: now,
        header: CanBusHeader {
            pgn,
            priority,
            source,
            destination,
        },
        // raw[8] is control bits, raw[9..13] a millisecond timestamp.
        data: raw[DATA_PART_INDEX..].to_vec(),
    })
}

/// RAW Actisense body: length, time counter(2), CAN id(4 LE), wire frame
/// data, CRC.
fn from_raw_actisense(raw: &[u8], now: DateTime<Utc>) -> Result<RawMessage, GatewayError> {
    if raw.len() < 8 {
        return Err(GatewayError::Frame(
            "raw actisense message too short to be valid".into(),
        ));
    }
    let declared = usize::from(raw[1]);
    if declared + 3 != raw.len() {
        return Err(GatewayError::Frame(format!(
            "data length byte value is different from actual length, {declared}!={}",
            raw.len() - 3
        )));
    }
    if !checksum_ok(raw) {
        return Err(GatewayError::Frame("message has invalid crc".into()));
    }

    let can_id = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
    Ok(RawMessage {
        time: now,
        header: parse_can_id(can_id),
        data: raw[8..raw.len() - 1].to_vec(),
    })
}

/// Gateway-control message, surfaced under a synthetic PGN so the canboat
/// schema can describe it.
fn from_device_message(raw: &[u8], now: DateTime<Utc>) -> Result<RawMessage, GatewayError> {
    if raw.len() < 3 {
        return Err(GatewayError::Frame(
            "device message too short to be valid".into(),
        ));
    }
    let declared = usize::from(raw[1]);
    let body_end = (2 + declared).min(raw.len());
    let body = &raw[2..body_end];
    if body.is_empty() {
        return Err(GatewayError::Frame("device message has empty body".into()));
    }

    Ok(RawMessage {
        time: now,
        header: CanBusHeader {
            pgn: ACTISENSE_FAKE_PGN_OFFSET + u32::from(body[0]),
            priority: 0,
            source: 0,
            destination: 0,
        },
        data: body.to_vec(),
    })
}

#[cfg(test)]
#[path = "binary_tests.rs"]
mod tests;
