//! Operating-system device source backed by `tokio-serial`.
//!
//! Enumeration goes through `tokio_serial::available_ports`; only ports that
//! the OS reports as USB are kept, since probing is by vendor/product id.

use serialws_core::{group_ports, BridgeConfig, DataBits, Parity, StopBits, UsbDevice, UsbPort};
use tokio_serial::{SerialPortBuilderExt, SerialPortInfo, SerialPortType};
use tracing::{debug, warn};

use crate::application::ports::{DeviceSource, SerialIo, SetupError};

/// Line settings in the form `tokio-serial` expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineSettings {
    pub data_bits: tokio_serial::DataBits,
    pub stop_bits: tokio_serial::StopBits,
    pub parity: tokio_serial::Parity,
}

/// Maps `config` onto `tokio-serial` settings.
///
/// # Errors
///
/// [`SetupError::ConfigurationRejected`] for a zero baud rate, 1.5 stop bits,
/// or mark/space parity, none of which the backend can express.
pub fn line_settings(config: &BridgeConfig) -> Result<LineSettings, SetupError> {
    if config.baud_rate == 0 {
        return Err(SetupError::ConfigurationRejected(
            "baud rate must be greater than zero".to_string(),
        ));
    }

    let data_bits = match config.data_bits {
        DataBits::Five => tokio_serial::DataBits::Five,
        DataBits::Six => tokio_serial::DataBits::Six,
        DataBits::Seven => tokio_serial::DataBits::Seven,
        DataBits::Eight => tokio_serial::DataBits::Eight,
    };

    let stop_bits = match config.stop_bits {
        StopBits::One => tokio_serial::StopBits::One,
        StopBits::Two => tokio_serial::StopBits::Two,
        StopBits::OnePointFive => {
            return Err(SetupError::ConfigurationRejected(
                "1.5 stop bits are not supported".to_string(),
            ))
        }
    };

    let parity = match config.parity {
        Parity::None => tokio_serial::Parity::None,
        Parity::Odd => tokio_serial::Parity::Odd,
        Parity::Even => tokio_serial::Parity::Even,
        other @ (Parity::Mark | Parity::Space) => {
            return Err(SetupError::ConfigurationRejected(format!(
                "{other} parity is not supported"
            )))
        }
    };

    Ok(LineSettings {
        data_bits,
        stop_bits,
        parity,
    })
}

/// Keeps USB ports; everything else (PCI, Bluetooth, unknown) is dropped.
fn usb_port(info: SerialPortInfo) -> Option<UsbPort> {
    match info.port_type {
        SerialPortType::UsbPort(usb) => Some(UsbPort {
            port_name: info.port_name,
            vendor_id: usb.vid,
            product_id: usb.pid,
            serial_number: usb.serial_number,
        }),
        _ => None,
    }
}

#[cfg(unix)]
fn can_open_read_write(port_name: &str) -> bool {
    match std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(port_name)
    {
        Ok(_) => true,
        Err(e) => {
            debug!("permission probe on {port_name} failed: {e}");
            false
        }
    }
}

#[cfg(not(unix))]
fn can_open_read_write(_port_name: &str) -> bool {
    true
}

/// Serial devices attached to this machine.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemDevices;

impl DeviceSource for SystemDevices {
    fn attached_devices(&self) -> Vec<UsbDevice> {
        match tokio_serial::available_ports() {
            Ok(ports) => group_ports(ports.into_iter().filter_map(usb_port).collect()),
            Err(e) => {
                warn!("failed to enumerate serial ports: {e}");
                Vec::new()
            }
        }
    }

    fn has_permission(&self, device: &UsbDevice) -> bool {
        device
            .ports
            .first()
            .map(|port| can_open_read_write(port))
            .unwrap_or(false)
    }

    fn open(&self, port_name: &str, config: &BridgeConfig) -> Result<Box<dyn SerialIo>, SetupError> {
        let settings = line_settings(config)?;

        let stream = tokio_serial::new(port_name, config.baud_rate)
            .data_bits(settings.data_bits)
            .stop_bits(settings.stop_bits)
            .parity(settings.parity)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| match e.kind {
                tokio_serial::ErrorKind::InvalidInput => {
                    SetupError::ConfigurationRejected(e.to_string())
                }
                _ => SetupError::DeviceOpen {
                    port: port_name.to_string(),
                    reason: e.to_string(),
                },
            })?;

        Ok(Box::new(stream))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
