//! serialws-bridge library crate.
//!
//! Shares one USB serial device with any number of WebSocket clients: every
//! chunk read from the device is broadcast to all clients as a text frame, and
//! every text frame from a client is written to the device.
//!
//! # Architecture
//!
//! ```text
//! WebSocket clients (text frames)
//!         ↕
//! [serialws-bridge]
//!   ├── application/        Orchestrator, device discovery, trait seams
//!   └── infrastructure/
//!         ├── serial_transport/  Read loop + serialized writes (tokio-serial)
//!         ├── client_hub/        WebSocket accept loop (tokio-tungstenite)
//!         ├── system_devices/    OS port enumeration and opening
//!         ├── virtual_device/    In-memory devices for tests and demos
//!         └── config_file/       TOML configuration loading
//!         ↕
//! USB serial adapter
//! ```
//!
//! # Layer rules
//!
//! - Pure types (configuration, probe tables, text framing) live in
//!   `serialws-core`.
//! - `application` defines the seams (`DeviceSource`, `SerialWriter`,
//!   `FrameBroadcaster`, `BridgeListener`) and owns the session lifecycle.
//! - `infrastructure` implements the seams on top of `tokio`,
//!   `tokio-serial` and `tokio-tungstenite`.

/// Application layer: session orchestration and discovery.
pub mod application;

/// Infrastructure layer: serial I/O, WebSocket server, config files.
pub mod infrastructure;
