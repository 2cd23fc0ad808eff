//! Actisense W2K-1 "RAW ASCII" format: one CAN frame per line, so Fast
//! Packet assembly happens on this side of the wire.
//!
//! ```text
//! 00:34:02.718 R 15FD0800 FF 00 01 CA 6F FF FF FF\r\n
//! ```
//!
//! `R` marks a received frame; frames written back out use `S`.

use crate::core::{RawFrame, RawMessage};
use crate::error::GatewayError;
use crate::gateway::{
    read_chunk, write_with_retry, Chunk, GatewayConfig, IdleClock, LineReader, RawMessageReader,
    RawMessageWriter,
};
use crate::protocol::transport::can_id::{parse_can_id, to_can_id};
use crate::protocol::transport::fast_packet::FastPacketAssembler;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt::Write as _;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

/// RAW ASCII reader/writer over any byte transport.
pub struct RawAsciiDevice<T> {
    transport: T,
    config: GatewayConfig,
    lines: LineReader,
    /// Without an assembler every frame is surfaced as a single-frame
    /// message, Fast Packet fragments included.
    assembler: Option<FastPacketAssembler>,
}

impl<T> RawAsciiDevice<T>
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
            lines: LineReader::new(),
            assembler: None,
        }
    }

    /// Enable Fast Packet reassembly for the schema's fast PGNs.
    pub fn with_assembler(mut self, assembler: FastPacketAssembler) -> Self {
        self.assembler = Some(assembler);
        self
    }

    /// Read CAN frames until one is parsed. Lines that are not received
    /// frames (send echoes, wire garbage) are skipped.
    pub async fn read_raw_frame(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<RawFrame, GatewayError> {
        let mut chunk = [0u8; 1024];
        let mut idle = IdleClock::new(self.config.receive_data_timeout);
        loop {
            while let Some(line) = self.lines.next_line() {
                if let Some(frame) = parse_raw_ascii(&line, Utc::now())? {
                    return Ok(frame);
                }
            }
            match read_chunk(&mut self.transport, &mut chunk, cancel, self.config.read_quantum)
                .await?
            {
                Chunk::Data(n) => {
                    idle.mark_data();
                    self.lines.push(&chunk[..n]);
                }
                Chunk::Quiet => {
                    if idle.expired() {
                        return Err(GatewayError::IdleTimeout);
                    }
                }
                Chunk::Eof => return Err(GatewayError::Eof),
            }
        }
    }

    /// Write one wire frame as an `S` line.
    pub async fn write_raw_frame(
        &mut self,
        cancel: &CancellationToken,
        frame: &RawFrame,
    ) -> Result<(), GatewayError> {
        let line = to_raw_ascii_line(frame);
        tracing::trace!(line = %line.trim_end(), "raw ascii write");
        write_with_retry(&mut self.transport, line.as_bytes(), cancel).await
    }
}

#[async_trait]
impl<T> RawMessageReader for RawAsciiDevice<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn initialize(&mut self) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn read_raw_message(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<RawMessage, GatewayError> {
        loop {
            let frame = self.read_raw_frame(cancel).await?;
            match &mut self.assembler {
                Some(assembler) => {
                    if let Some(message) = assembler.assemble(&frame) {
                        return Ok(message);
                    }
                }
                None => {
                    return Ok(RawMessage {
                        time: frame.time,
                        header: frame.header,
                        data: frame.payload().to_vec(),
                    });
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
impl<T> RawMessageWriter for RawAsciiDevice<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write_raw_message(
        &mut self,
        cancel: &CancellationToken,
        message: &RawMessage,
    ) -> Result<(), GatewayError> {
        if message.data.len() > 8 {
            return Err(GatewayError::Frame(
                "raw ascii writes are single frames of at most 8 bytes".into(),
            ));
        }
        let mut data = [0u8; 8];
        data[..message.data.len()].copy_from_slice(&message.data);
        let frame = RawFrame {
            time: message.time,
            header: message.header,
            length: message.data.len() as u8,
            data,
        };
        self.write_raw_frame(cancel, &frame).await
    }
}

/// Parse one line. `Ok(None)` skips anything that is not a received frame.
fn parse_raw_ascii(line: &[u8], now: DateTime<Utc>) -> Result<Option<RawFrame>, GatewayError> {
    // Walk to the third space: `<time> R <canid> <data...>`. Fewer spaces
    // means wire garbage or a partial first line.
    let mut spaces_seen = 0;
    let mut space_index = 0;
    let mut previous_space_index = 0;
    for (i, &b) in line.iter().enumerate() {
        if b != b' ' {
            continue;
        }
        previous_space_index = space_index;
        space_index = i;
        spaces_seen += 1;
        if spaces_seen == 3 {
            break;
        }
    }
    if spaces_seen != 3 {
        return Ok(None);
    }
    if previous_space_index == 0 || line[previous_space_index - 1] != b'R' {
        // Send echo or unknown direction marker.
        return Ok(None);
    }

    let can_id_text = &line[previous_space_index + 1..space_index];
    let can_id = std::str::from_utf8(can_id_text)
        .ok()
        .and_then(|s| u32::from_str_radix(s, 16).ok())
        .ok_or_else(|| GatewayError::Frame("raw ascii frame has invalid can id".into()))?;
    let header = parse_can_id(can_id);

    // Up to 8 data bytes as space-separated hex pairs.
    let mut hex_chars = Vec::with_capacity(16);
    for &b in &line[space_index..] {
        if b == b' ' {
            continue;
        }
        if b == b'\r' || b == b'\n' {
            break;
        }
        if hex_chars.len() == 16 {
            return Err(GatewayError::Frame(
                "raw ascii frame carries more than 8 data bytes".into(),
            ));
        }
        hex_chars.push(b);
    }
    let decoded = hex::decode(&hex_chars)
        .map_err(|e| GatewayError::Frame(format!("raw ascii frame data: {e}")))?;

    let mut data = [0u8; 8];
    data[..decoded.len()].copy_from_slice(&decoded);
    Ok(Some(RawFrame {
        time: now,
        header,
        length: decoded.len() as u8,
        data,
    }))
}

/// Render a frame as an `S` (send) line: the gateway fills in its own
/// timing, so the time block is zeroed. Trailing byte slots beyond the
/// frame length are omitted entirely.
fn to_raw_ascii_line(frame: &RawFrame) -> String {
    let mut line = String::with_capacity(48);
    let _ = write!(line, "00:00:00.000 S {:08X}", to_can_id(&frame.header));
    for b in frame.payload() {
        let _ = write!(line, " {b:02X}");
    }
    line.push_str("\r\n");
    line
}

#[cfg(test)]
#[path = "raw_ascii_tests.rs"]
mod tests;
