//! Actisense EBL log format (W2K-1 "CAN-Raw BST-95" records). Frames are
//! bracketed by `ESC SOH` and `ESC NL` with interior escapes doubled; the
//! unwrapped record starts with the bytes `07 95`.
//!
//! A log can only be replayed, so writes are accepted and dropped.

use super::{EscapedFrameParser, CMD_RAW_MESSAGE_RECEIVED, ESC, NL, SOH};
use crate::core::{RawMessage, ISO_TP_MAX_SIZE};
use crate::error::GatewayError;
use crate::gateway::{
    read_chunk, Chunk, GatewayConfig, IdleClock, RawMessageReader, RawMessageWriter,
};
use crate::protocol::transport::can_id::parse_can_id;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

/// Record type byte preceding the RAW Actisense command in a BST-95 row.
const BST95_RECORD_TYPE: u8 = 0x07;

/// EBL log reader over any byte transport.
pub struct EblDevice<T> {
    transport: T,
    config: GatewayConfig,
    parser: EscapedFrameParser,
    pending: Vec<u8>,
    pending_pos: usize,
}

impl<T> EblDevice<T>
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
            parser: EscapedFrameParser::new(ESC, SOH, NL, ISO_TP_MAX_SIZE),
            pending: Vec::with_capacity(2048),
            pending_pos: 0,
        }
    }
}

#[async_trait]
impl<T> RawMessageReader for EblDevice<T>
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
        let mut chunk = [0u8; 1024];
        let mut idle = IdleClock::new(self.config.receive_data_timeout);
        loop {
            while self.pending_pos < self.pending.len() {
                let byte = self.pending[self.pending_pos];
                self.pending_pos += 1;
                let Some(frame) = self.parser.push(byte) else {
                    continue;
                };
                if frame.len() <= 4 {
                    return Err(GatewayError::Frame(
                        "message too short to be BST95 format".into(),
                    ));
                }
                tracing::trace!(frame = %hex::encode(&frame), "ebl frame");
                if frame[0] == BST95_RECORD_TYPE && frame[1] == CMD_RAW_MESSAGE_RECEIVED {
                    return from_bst95(&frame[2..], Utc::now());
                }
                // Other record types (file headers, markers) are skipped.
                tracing::trace!(record = %hex::encode(&frame[..2]), "unknown ebl record type");
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
impl<T> RawMessageWriter for EblDevice<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Logs are replay-only; writes are silently accepted.
    async fn write_raw_message(
        &mut self,
        _cancel: &CancellationToken,
        _message: &RawMessage,
    ) -> Result<(), GatewayError> {
        Ok(())
    }
}

/// Body after the `07 95` record tag: length, timestamp(2), CAN id(4 LE),
/// wire frame data. The timestamp is a per-file offset counter with an
/// undocumented base, so it is not mapped to wall-clock time.
fn from_bst95(raw: &[u8], now: DateTime<Utc>) -> Result<RawMessage, GatewayError> {
    // length(1) + timestamp(2) + canid(4)
    const START_OF_DATA: usize = 7;
    if raw.len() < START_OF_DATA + 1 {
        return Err(GatewayError::Frame(
            "message too short to be valid BST-95 record".into(),
        ));
    }
    if usize::from(raw[0]) != raw.len() - 1 {
        return Err(GatewayError::Frame(
            "record length field does not match actual length".into(),
        ));
    }

    let can_id = u32::from_le_bytes([raw[3], raw[4], raw[5], raw[6]]);
    Ok(RawMessage {
        time: now,
        header: parse_can_id(can_id),
        data: raw[START_OF_DATA..].to_vec(),
    })
}

#[cfg(test)]
#[path = "ebl_tests.rs"]
mod tests;
