//! Application layer for serialws-bridge.
//!
//! The application layer knows *what* a bridge session is: discover a device,
//! open it, pair it with a client hub, and tear both down together.  It talks
//! to hardware and sockets only through the traits in [`ports`].
//!
//! # Responsibilities
//!
//! - Defining the seams between the serial side and the network side
//! - Turning attached devices into candidates and a start status
//! - Running the `Stopped → Starting → Running → Stopping` state machine

pub mod discovery;
pub mod orchestrator;
pub mod ports;

pub use discovery::DeviceDiscovery;
pub use orchestrator::{BridgeListener, BridgeOrchestrator, BridgeState, StartError, StopReason};
pub use ports::{DeviceSource, FrameBroadcaster, SerialError, SerialIo, SerialWriter, SetupError};
