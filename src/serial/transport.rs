//! Serial transport.
//!
//! `SerialLink` owns the open serial connection: it writes command frames and
//! runs a receive task that forwards every incoming byte into a buffered
//! queue for the correlation engine. The transport has no notion of
//! "command" beyond raw bytes in and out; connection loss is converted into
//! end-of-stream on the byte queue, exactly once.
//!
//! The `Transport` trait is the seam that lets the session and the tests run
//! against [`mock::MockTransport`](super::mock::MockTransport) instead of
//! real hardware.

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_serial::{DataBits, Parity, SerialPortBuilderExt, SerialStream, StopBits};
use tracing::{debug, info, trace, warn};

use crate::config::SerialSettings;
use crate::error::{AppResult, LaserError};

/// Byte-level access to the device link.
#[async_trait]
pub trait Transport: Send {
    /// Whether a connection is currently active.
    fn is_open(&self) -> bool;

    /// Path of the open device, if any.
    fn path(&self) -> Option<String>;

    /// Open the link and return the receiving end of the byte queue.
    ///
    /// Fails with [`LaserError::AlreadyOpen`] when a connection is active.
    async fn open(&mut self, path: &str) -> AppResult<mpsc::Receiver<u8>>;

    /// Close the link. Idempotent; closing an already-closed link is a no-op.
    async fn close(&mut self);

    /// Write one command frame: the opcode byte followed by its argument
    /// bytes, as a single ordered sequence. Fails with
    /// [`LaserError::NotOpen`] when no connection is active.
    async fn write_frame(&mut self, opcode: u8, arg: &[u8]) -> AppResult<()>;
}

struct OpenLink {
    path: String,
    writer: WriteHalf<SerialStream>,
    receiver: JoinHandle<()>,
}

/// Transport over a real serial port (8 data bits, 1 stop bit, no parity).
pub struct SerialLink {
    settings: SerialSettings,
    open: Option<OpenLink>,
}

impl SerialLink {
    pub fn new(settings: SerialSettings) -> Self {
        Self {
            settings,
            open: None,
        }
    }
}

#[async_trait]
impl Transport for SerialLink {
    fn is_open(&self) -> bool {
        self.open.is_some()
    }

    fn path(&self) -> Option<String> {
        self.open.as_ref().map(|open| open.path.clone())
    }

    async fn open(&mut self, path: &str) -> AppResult<mpsc::Receiver<u8>> {
        if let Some(open) = &self.open {
            return Err(LaserError::AlreadyOpen(open.path.clone()));
        }

        let stream = tokio_serial::new(path, self.settings.baud_rate)
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .parity(Parity::None)
            .open_native_async()
            .map_err(|source| LaserError::OpenFailed {
                path: path.to_string(),
                source,
            })?;

        let (reader, writer) = tokio::io::split(stream);
        let (tx, rx) = mpsc::channel(self.settings.receive_buffer);
        let receiver = tokio::spawn(receive_loop(reader, tx));

        self.open = Some(OpenLink {
            path: path.to_string(),
            writer,
            receiver,
        });
        info!(path, baud = self.settings.baud_rate, "serial link opened");

        // The device ignores traffic for a moment after the port opens.
        tokio::time::sleep(self.settings.settle_delay).await;
        Ok(rx)
    }

    async fn close(&mut self) {
        if let Some(open) = self.open.take() {
            open.receiver.abort();
            info!(path = %open.path, "serial link closed");
        }
    }

    async fn write_frame(&mut self, opcode: u8, arg: &[u8]) -> AppResult<()> {
        let open = self.open.as_mut().ok_or(LaserError::NotOpen)?;

        let mut frame = Vec::with_capacity(1 + arg.len());
        frame.push(opcode);
        frame.extend_from_slice(arg);
        open.writer.write_all(&frame).await?;
        open.writer.flush().await?;

        trace!(opcode, bytes = frame.len(), "command frame written");
        Ok(())
    }
}

/// Forward incoming bytes into the queue until the port fails or closes.
///
/// Dropping the sender is the end-of-stream signal for the dispatch loop;
/// both exit paths reach it exactly once.
async fn receive_loop(mut reader: ReadHalf<SerialStream>, tx: mpsc::Sender<u8>) {
    let mut buf = [0u8; 128];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                warn!("serial stream reached end of file");
                break;
            }
            Ok(n) => {
                for &byte in &buf[..n] {
                    if tx.send(byte).await.is_err() {
                        // dispatch loop is gone, nothing left to feed
                        debug!("byte queue closed, stopping receive loop");
                        return;
                    }
                }
            }
            Err(error) => {
                warn!(%error, "serial read failed, stopping receive loop");
                break;
            }
        }
    }
}
