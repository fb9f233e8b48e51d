//! In-memory device source.
//!
//! Presents a fixed list of USB devices and hands out `tokio::io::duplex`
//! pipes instead of real ports.  The caller keeps the far end of each pipe
//! and plays the device: bytes written there are "received" by the bridge,
//! and bytes the bridge writes can be read back.  Dropping the far end
//! looks like an unplugged adapter.
//!
//! Used by integration tests; also handy for exercising a client against
//! the bridge without hardware.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use serialws_core::{BridgeConfig, UsbDevice};
use tokio::io::{duplex, DuplexStream};
use tracing::debug;

use crate::application::ports::{DeviceSource, SerialIo, SetupError};

const PIPE_CAPACITY: usize = 4096;

/// A scripted set of attached devices.
pub struct VirtualDevices {
    devices: Vec<UsbDevice>,
    permitted: bool,
    pipes: Mutex<VecDeque<DuplexStream>>,
    opened: Mutex<Vec<String>>,
}

impl VirtualDevices {
    pub fn new(devices: Vec<UsbDevice>) -> Self {
        Self {
            devices,
            permitted: true,
            pipes: Mutex::new(VecDeque::new()),
            opened: Mutex::new(Vec::new()),
        }
    }

    /// A single FTDI FT232R on `/dev/ttyVIRT0`.
    pub fn single_ftdi() -> Self {
        Self::new(vec![UsbDevice {
            vendor_id: 0x0403,
            product_id: 0x6001,
            serial_number: Some("VIRT0001".to_string()),
            ports: vec!["/dev/ttyVIRT0".to_string()],
        }])
    }

    /// Makes every permission check fail.
    pub fn deny_permission(mut self) -> Self {
        self.permitted = false;
        self
    }

    /// Queues a pipe for the next `open` and returns its device end.
    pub fn attach_pipe(&self) -> DuplexStream {
        let (host, device) = duplex(PIPE_CAPACITY);
        self.pipes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(host);
        device
    }

    /// Port names passed to `open`, in call order.
    pub fn opened_ports(&self) -> Vec<String> {
        self.opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl DeviceSource for VirtualDevices {
    fn attached_devices(&self) -> Vec<UsbDevice> {
        self.devices.clone()
    }

    fn has_permission(&self, _device: &UsbDevice) -> bool {
        self.permitted
    }

    fn open(&self, port_name: &str, config: &BridgeConfig) -> Result<Box<dyn SerialIo>, SetupError> {
        self.opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(port_name.to_string());

        let pipe = self
            .pipes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .ok_or_else(|| SetupError::DeviceOpen {
                port: port_name.to_string(),
                reason: "no virtual pipe attached".to_string(),
            })?;

        debug!("virtual port {port_name} opened at {} baud", config.baud_rate);
        Ok(Box::new(pipe))
    }
}
