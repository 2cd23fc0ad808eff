//! Gateway wire codecs. Each submodule implements one framing of the same
//! logical NMEA 2000 stream over a byte transport the caller has already
//! opened (serial port, TCP socket, file): only the envelope differs.
//!
//! Every device exposes the same contract: [`RawMessageReader`] for the
//! inbound side, [`RawMessageWriter`] for the outbound side. Readers are
//! resynchronizable: garbage before the next valid start-of-frame marker
//! is skipped, a malformed frame is reported once and the parser carries
//! on at the next marker.

use crate::core::RawMessage;
use crate::error::GatewayError;
use crate::protocol::transport::{NO_DATA_TIMEOUT_MS, READ_QUANTUM_MS};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub mod actisense;
pub mod canboat;
pub mod socketcan;

//==================================================================================Contract

/// Inbound side of a gateway device.
#[async_trait]
pub trait RawMessageReader: Send {
    /// Send whatever init sequence the protocol needs; many formats need
    /// none.
    async fn initialize(&mut self) -> Result<(), GatewayError>;

    /// Block until one complete [`RawMessage`] is read, an error occurs or
    /// `cancel` fires. Cancellation never leaves partial state behind: the
    /// next call resumes at the current resync point.
    async fn read_raw_message(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<RawMessage, GatewayError>;

    /// Flush and drop the transport.
    async fn close(&mut self) -> Result<(), GatewayError>;
}

/// Outbound side of a gateway device.
#[async_trait]
pub trait RawMessageWriter: Send {
    async fn write_raw_message(
        &mut self,
        cancel: &CancellationToken,
        message: &RawMessage,
    ) -> Result<(), GatewayError>;
}

/// Full-duplex gateway device; implemented automatically for anything that
/// is both a reader and a writer.
pub trait RawMessageDevice: RawMessageReader + RawMessageWriter {}

impl<T: RawMessageReader + RawMessageWriter> RawMessageDevice for T {}

//==================================================================================Configuration

/// Shared gateway tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct GatewayConfig {
    /// How long the bus may stay silent before a read reports
    /// [`GatewayError::IdleTimeout`] (or [`GatewayError::Eof`] at end of a
    /// replay stream). Distinguishes a dead link from a quiet one.
    pub receive_data_timeout: Duration,
    /// Upper bound on a single blocking poll of the transport, so
    /// cancellation is observed promptly.
    pub read_quantum: Duration,
    /// Surface Actisense gateway-control messages to the caller under the
    /// synthetic PGN range instead of swallowing them.
    pub output_gateway_messages: bool,
    /// Write in Actisense N2K binary format (W2K-1) instead of NGT binary.
    pub is_n2k_writer: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            receive_data_timeout: Duration::from_millis(NO_DATA_TIMEOUT_MS),
            read_quantum: Duration::from_millis(READ_QUANTUM_MS),
            output_gateway_messages: false,
            is_n2k_writer: false,
        }
    }
}

/// Writer retry pacing: how long to wait after a would-block write.
pub(crate) const WRITE_RETRY_DELAY: Duration = Duration::from_millis(250);
/// Writer gives up after this many would-block rounds.
pub(crate) const WRITE_MAX_RETRIES: u32 = 5;

//==================================================================================Shared read/write plumbing

/// Outcome of a single bounded poll of the transport.
pub(crate) enum Chunk {
    /// Bytes arrived.
    Data(usize),
    /// The read quantum elapsed with nothing to read.
    Quiet,
    /// The transport reported end of stream.
    Eof,
}

/// Poll the transport once, bounded by `read_quantum`, honoring `cancel`.
pub(crate) async fn read_chunk<T>(
    transport: &mut T,
    buf: &mut [u8],
    cancel: &CancellationToken,
    read_quantum: Duration,
) -> Result<Chunk, GatewayError>
where
    T: AsyncRead + Unpin + Send,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(GatewayError::Cancelled),
        outcome = tokio::time::timeout(read_quantum, transport.read(buf)) => match outcome {
            Err(_) => Ok(Chunk::Quiet),
            Ok(Ok(0)) => Ok(Chunk::Eof),
            Ok(Ok(n)) => Ok(Chunk::Data(n)),
            Ok(Err(e))
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                Ok(Chunk::Quiet)
            }
            Ok(Err(e)) => Err(e.into()),
        },
    }
}

/// Tracks the no-data deadline for a read loop.
pub(crate) struct IdleClock {
    last_data: Instant,
    timeout: Duration,
}

impl IdleClock {
    pub(crate) fn new(timeout: Duration) -> Self {
        Self {
            last_data: Instant::now(),
            timeout,
        }
    }

    pub(crate) fn mark_data(&mut self) {
        self.last_data = Instant::now();
    }

    pub(crate) fn expired(&self) -> bool {
        self.last_data.elapsed() > self.timeout
    }
}

/// Write the whole buffer, retrying would-block errors a bounded number of
/// times with a fixed delay, the way serial gateways expect.
pub(crate) async fn write_with_retry<T>(
    transport: &mut T,
    bytes: &[u8],
    cancel: &CancellationToken,
) -> Result<(), GatewayError>
where
    T: AsyncWrite + Unpin + Send,
{
    let mut written = 0usize;
    let mut retries = 0u32;
    while written < bytes.len() {
        if cancel.is_cancelled() {
            return Err(GatewayError::Cancelled);
        }
        match transport.write(&bytes[written..]).await {
            Ok(n) => written += n,
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                retries += 1;
                if retries > WRITE_MAX_RETRIES {
                    return Err(GatewayError::WriteRetriesExhausted);
                }
                tokio::select! {
                    _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
                    _ = tokio::time::sleep(WRITE_RETRY_DELAY) => {}
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
    transport.flush().await?;
    Ok(())
}

//==================================================================================Line reader

/// Accumulates transport chunks and hands out complete `\n`-terminated
/// lines; shared by every text-oriented gateway format.
pub(crate) struct LineReader {
    buffer: Vec<u8>,
}

impl LineReader {
    pub(crate) fn new() -> Self {
        Self { buffer: Vec::with_capacity(512) }
    }

    pub(crate) fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Next complete line without its terminator (a trailing `\r` is also
    /// stripped), or `None` until one is buffered.
    pub(crate) fn next_line(&mut self) -> Option<Vec<u8>> {
        let end = self.buffer.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.buffer.drain(..=end).collect();
        line.pop(); // the \n itself
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(line)
    }
}

/// Read lines from a transport until `parse` accepts one.
///
/// `parse` returns `Ok(Some(msg))` to emit, `Ok(None)` to skip the line
/// (comments, wire garbage before resync) and `Err` for a malformed frame
/// that the caller should hear about.
pub(crate) async fn read_line_message<T, F>(
    transport: &mut T,
    lines: &mut LineReader,
    cancel: &CancellationToken,
    config: &GatewayConfig,
    mut parse: F,
) -> Result<RawMessage, GatewayError>
where
    T: AsyncRead + Unpin + Send,
    F: FnMut(&[u8]) -> Result<Option<RawMessage>, GatewayError>,
{
    let mut chunk = [0u8; 1024];
    let mut idle = IdleClock::new(config.receive_data_timeout);
    loop {
        while let Some(line) = lines.next_line() {
            if let Some(message) = parse(&line)? {
                return Ok(message);
            }
        }
        match read_chunk(transport, &mut chunk, cancel, config.read_quantum).await? {
            Chunk::Data(n) => {
                idle.mark_data();
                lines.push(&chunk[..n]);
            }
            Chunk::Quiet => {
                if idle.expired() {
                    return Err(GatewayError::IdleTimeout);
                }
            }
            // Text replays end hard: no idle grace at end of stream.
            Chunk::Eof => return Err(GatewayError::Eof),
        }
    }
}
