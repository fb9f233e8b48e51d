//! Serial transport: owns one open port for the lifetime of a session.
//!
//! This module is responsible for:
//!
//! 1. Resolving the configured port index on the selected adapter.
//! 2. Opening the port through a [`DeviceSource`].
//! 3. Running the read loop that hands every received chunk to a
//!    [`FrameBroadcaster`].
//! 4. Serializing writes from any number of clients, each bounded by a
//!    write timeout.
//! 5. Closing the port exactly once, from whichever side notices first.
//!
//! # Concurrency
//!
//! The port is split into a read half and a write half.  The read half is
//! owned by the single task running [`SerialTransport::run`]; the write half
//! sits behind a `tokio::sync::Mutex`, so concurrent client writes are
//! applied one after another and their bytes never interleave.
//!
//! Closing is signalled through a `watch` channel so that a read blocked on
//! a quiet device wakes up immediately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::PoisonError;
use std::time::Duration;

use async_trait::async_trait;
use serialws_core::{BridgeConfig, DeviceCandidate};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{watch, Mutex};
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::application::ports::{
    DeviceSource, FrameBroadcaster, SerialError, SerialIo, SerialWriter, SetupError,
};

/// Bytes requested from the device per read.
pub const READ_BUFFER_SIZE: usize = 1024;

/// Upper bound on a single client write.
pub const WRITE_TIMEOUT: Duration = Duration::from_millis(1000);

type DeviceIo = Box<dyn SerialIo>;

/// Why the read loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerialExit {
    /// [`SerialTransport::close`] was called.
    Closed,
    /// The device reported end of stream (unplugged).
    Disconnected,
    /// The driver reported a read error.
    Failed(String),
}

impl std::fmt::Display for SerialExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => f.write_str("closed"),
            Self::Disconnected => f.write_str("device disconnected"),
            Self::Failed(reason) => write!(f, "read failed: {reason}"),
        }
    }
}

/// An open serial port shared between the read loop and client writers.
pub struct SerialTransport {
    port_name: String,
    reader: std::sync::Mutex<Option<ReadHalf<DeviceIo>>>,
    writer: Mutex<Option<WriteHalf<DeviceIo>>>,
    write_timeout: Duration,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl SerialTransport {
    /// Opens port `config.port_index` of `candidate`.
    ///
    /// # Errors
    ///
    /// - [`SetupError::PortUnavailable`] if the index is out of range.
    /// - Whatever `source.open` reports for the port itself.
    pub fn open(
        source: &dyn DeviceSource,
        candidate: &DeviceCandidate,
        config: &BridgeConfig,
    ) -> Result<Self, SetupError> {
        let port_name = candidate
            .port(config.port_index)
            .ok_or(SetupError::PortUnavailable {
                index: config.port_index,
                count: candidate.port_count(),
            })?;

        let io = source.open(port_name, config)?;

        info!(
            "opened serial port {port_name} ({}, {} {}{}{})",
            candidate.driver,
            config.baud_rate,
            config.data_bits,
            parity_letter(config),
            config.stop_bits,
        );

        Ok(Self::from_io(port_name, io))
    }

    /// Wraps an already-open byte stream.
    pub fn from_io(port_name: impl Into<String>, io: DeviceIo) -> Self {
        let (reader, writer) = tokio::io::split(io);
        let (shutdown, _) = watch::channel(false);
        Self {
            port_name: port_name.into(),
            reader: std::sync::Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
            write_timeout: WRITE_TIMEOUT,
            closed: AtomicBool::new(false),
            shutdown,
        }
    }

    /// Overrides [`WRITE_TIMEOUT`].
    pub fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Reads from the device until it is closed, unplugged, or fails.
    ///
    /// Each successful read of `n > 0` bytes is passed to `broadcaster` before
    /// the next read starts, so chunks reach clients in device order.  The
    /// port is closed before this returns.
    ///
    /// Only the first call does any reading; later calls return
    /// [`SerialExit::Closed`] immediately.
    pub async fn run(&self, broadcaster: &dyn FrameBroadcaster) -> SerialExit {
        let reader = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut reader) = reader else {
            debug!("serial {}: read loop not started (already running or closed)", self.port_name);
            return SerialExit::Closed;
        };

        let mut shutdown = self.shutdown.subscribe();
        let mut buf = [0u8; READ_BUFFER_SIZE];

        debug!("serial {}: read loop started", self.port_name);

        let exit = loop {
            // A close that raced with `subscribe` is only visible here.
            if *shutdown.borrow_and_update() {
                break SerialExit::Closed;
            }

            tokio::select! {
                _ = shutdown.changed() => break SerialExit::Closed,
                read = reader.read(&mut buf) => match read {
                    Ok(0) => break SerialExit::Disconnected,
                    Ok(n) => {
                        trace!("serial {} → clients: {n} bytes [{}]", self.port_name, hex::encode(&buf[..n]));
                        broadcaster.broadcast(&buf[..n]).await;
                    }
                    Err(e) => break SerialExit::Failed(e.to_string()),
                },
            }
        };

        match &exit {
            SerialExit::Closed => debug!("serial {}: read loop stopped", self.port_name),
            SerialExit::Disconnected => warn!("serial {}: device disconnected", self.port_name),
            SerialExit::Failed(reason) => warn!("serial {}: read error: {reason}", self.port_name),
        }

        drop(reader);
        self.close().await;
        exit
    }

    /// Writes `bytes` to the device, waiting at most the write timeout.
    ///
    /// Writers are served one at a time.  A timed-out write may have been
    /// partially delivered.
    pub async fn write(&self, bytes: &[u8]) -> Result<(), SerialError> {
        if self.is_closed() {
            return Err(SerialError::PortClosed);
        }

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(SerialError::PortClosed)?;

        let result = timeout(self.write_timeout, async {
            writer.write_all(bytes).await?;
            writer.flush().await
        })
        .await;

        match result {
            Ok(Ok(())) => {
                trace!("clients → serial {}: {} bytes [{}]", self.port_name, bytes.len(), hex::encode(bytes));
                Ok(())
            }
            Ok(Err(e)) => Err(SerialError::Io(e)),
            Err(_) => Err(SerialError::WriteTimeout(self.write_timeout)),
        }
    }

    /// Stops the read loop and releases the port.  Safe to call repeatedly.
    ///
    /// Waits for an in-flight write to finish or time out.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.shutdown.send_replace(true);

        // Drop a read half that `run` never took.
        self.reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                debug!("serial {}: shutdown on close failed: {e}", self.port_name);
            }
        }

        info!("serial port {} closed", self.port_name);
    }
}

#[async_trait]
impl SerialWriter for SerialTransport {
    async fn write(&self, bytes: &[u8]) -> Result<(), SerialError> {
        SerialTransport::write(self, bytes).await
    }
}

fn parity_letter(config: &BridgeConfig) -> char {
    use serialws_core::Parity;
    match config.parity {
        Parity::None => 'N',
        Parity::Odd => 'O',
        Parity::Even => 'E',
        Parity::Mark => 'M',
        Parity::Space => 'S',
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
