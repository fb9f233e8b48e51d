//! Infrastructure layer for serialws-bridge.
//!
//! The infrastructure layer handles all I/O: the serial port, the WebSocket
//! listener and its clients, and the configuration file.
//!
//! # Responsibilities
//!
//! - Enumerating and opening USB serial ports
//! - Running the serial read loop and serializing writes
//! - Binding the WebSocket listener and running per-client tasks
//! - Loading and saving TOML configuration
//!
//! # What does NOT belong here?
//!
//! - Deciding which device to use (that is `application::discovery`)
//! - Session lifecycle and teardown order (that is `application::orchestrator`)

pub mod client_hub;
pub mod config_file;
pub mod serial_transport;
pub mod system_devices;
pub mod virtual_device;

pub use client_hub::{ClientHub, ClientId, HubSettings};
pub use config_file::{load_config, render_config, save_config, ConfigFileError};
pub use serial_transport::{SerialExit, SerialTransport};
pub use system_devices::SystemDevices;
pub use virtual_device::VirtualDevices;
