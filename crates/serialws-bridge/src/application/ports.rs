//! Seams between the orchestrator, the serial device and the client hub.
//!
//! ```text
//!            FrameBroadcaster::broadcast
//! SerialTransport ─────────────────────────▶ ClientHub
//! SerialTransport ◀───────────────────────── ClientHub
//!              SerialWriter::write
//! ```
//!
//! Keeping both directions behind traits lets each side be tested with a
//! recording double instead of real hardware or sockets.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use serialws_core::{BridgeConfig, UsbDevice};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

/// Errors that abort session setup.  The bridge stays stopped.
#[derive(Debug, Error)]
pub enum SetupError {
    /// The configured port index does not exist on the selected adapter.
    #[error("port index {index} is out of range (device has {count} port(s))")]
    PortUnavailable { index: usize, count: usize },

    /// The adapter or its driver cannot use the requested line settings.
    #[error("configuration rejected by the device: {0}")]
    ConfigurationRejected(String),

    /// The operating system refused to open the port.
    #[error("failed to open serial port {port}: {reason}")]
    DeviceOpen { port: String, reason: String },

    /// The WebSocket listener could not be bound.
    #[error("failed to bind WebSocket server on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Errors returned by the serial write path.
///
/// None of these stop the session on their own.
#[derive(Debug, Error)]
pub enum SerialError {
    /// The device did not accept the bytes within the write timeout.
    #[error("serial write timed out after {0:?}")]
    WriteTimeout(Duration),

    /// The port was closed before or during the write.
    #[error("serial port is closed")]
    PortClosed,

    /// Any other I/O failure reported by the driver.
    #[error("serial I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// An open serial port as a byte stream.
pub trait SerialIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> SerialIo for T where T: AsyncRead + AsyncWrite + Send + Unpin + ?Sized {}

/// Where attached USB serial devices come from and how they are opened.
///
/// The production implementation queries the OS through `tokio-serial`; tests
/// substitute in-memory pipes.
#[cfg_attr(test, mockall::automock)]
pub trait DeviceSource: Send + Sync {
    /// Lists attached USB serial devices, ports grouped per adapter.
    fn attached_devices(&self) -> Vec<UsbDevice>;

    /// Returns `true` if the current user may open `device`.
    fn has_permission(&self, device: &UsbDevice) -> bool;

    /// Opens `port_name` with the line settings in `config`.
    ///
    /// # Errors
    ///
    /// [`SetupError::ConfigurationRejected`] for settings the hardware cannot
    /// use, [`SetupError::DeviceOpen`] for everything else.
    fn open(&self, port_name: &str, config: &BridgeConfig) -> Result<Box<dyn SerialIo>, SetupError>;
}

/// The serial write path, as seen by the client hub.
#[async_trait]
pub trait SerialWriter: Send + Sync {
    /// Writes `bytes` to the device.
    async fn write(&self, bytes: &[u8]) -> Result<(), SerialError>;
}

/// The client broadcast path, as seen by the serial read loop.
#[async_trait]
pub trait FrameBroadcaster: Send + Sync {
    /// Delivers one chunk of serial data to every connected client.
    async fn broadcast(&self, bytes: &[u8]);
}
