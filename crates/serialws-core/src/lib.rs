//! # serialws-core
//!
//! Shared library for the serial-to-WebSocket bridge containing the bridge
//! configuration, the USB serial adapter probe tables, and the text framing
//! applied to bytes read from the device.
//!
//! This crate has zero dependencies on OS APIs, serial drivers, or network
//! sockets, so everything in it can be unit tested without hardware.
//!
//! # Architecture overview
//!
//! The bridge opens exactly one USB serial adapter and shares it with any
//! number of WebSocket clients:
//!
//! ```text
//! serial device ──read──▶ frame_text() ──▶ every WebSocket client
//! serial device ◀─write── text frame from any WebSocket client
//! ```
//!
//! - **`config`** – [`BridgeConfig`]: line settings (baud, data bits, stop
//!   bits, parity), the listen port, and the newline-stripping flag.
//! - **`discovery`** – Probe tables that recognise USB serial adapters by
//!   vendor/product id, and the rules that turn attached devices into
//!   [`DeviceCandidate`]s and a [`DeviceStatus`].
//! - **`text`** – Converts a chunk of serial bytes into the text frame sent to
//!   clients.

pub mod config;
pub mod discovery;
pub mod text;

pub use config::{BridgeConfig, ConfigError, DataBits, Parity, StopBits};
pub use discovery::{
    group_ports, DeviceCandidate, DeviceStatus, DriverKind, ProbeEntry, ProbeTable, Prober,
    UsbDevice, UsbPort,
};
pub use text::frame_text;
