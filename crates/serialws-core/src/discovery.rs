//! USB serial adapter recognition.
//!
//! Attached USB serial ports are grouped into physical devices
//! ([`group_ports`]) and then matched against priority-ordered probe tables
//! ([`Prober`]).  Every table is consulted in sequence and its matches are
//! appended after the previous table's matches, with no de-duplication:
//!
//! ```text
//! standard table  ──▶ FTDI, CP21xx, PL2303, CH34x, CDC-ACM boards
//! vendor overrides ─▶ adapters the standard table misses (e.g. CH340K)
//!                     └─ concatenated after the standard matches
//! ```
//!
//! Only the first candidate of the combined list is ever used by the bridge.
//! [`DeviceStatus::from_candidates`] encodes that rule.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Driver family that knows how to talk to a recognised adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DriverKind {
    /// FTDI FT232/FT2232/FT4232 family.
    Ftdi,
    /// Silicon Labs CP210x family.
    Cp21xx,
    /// Prolific PL2303 family.
    Prolific,
    /// WCH CH340/CH341 family.
    Ch34x,
    /// Generic USB CDC-ACM device.
    CdcAcm,
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DriverKind::Ftdi => "FTDI",
            DriverKind::Cp21xx => "CP21xx",
            DriverKind::Prolific => "PL2303",
            DriverKind::Ch34x => "CH34x",
            DriverKind::CdcAcm => "CDC-ACM",
        };
        f.write_str(s)
    }
}

/// One vendor/product pair routed to a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeEntry {
    pub vendor_id: u16,
    pub product_id: u16,
    pub driver: DriverKind,
}

/// An ordered list of [`ProbeEntry`] matchers.
///
/// The first entry whose vendor and product id both match wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeTable {
    entries: Vec<ProbeEntry>,
}

impl ProbeTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a vendor/product pair and returns the table for chaining.
    #[must_use]
    pub fn add_product(mut self, vendor_id: u16, product_id: u16, driver: DriverKind) -> Self {
        self.entries.push(ProbeEntry {
            vendor_id,
            product_id,
            driver,
        });
        self
    }

    /// Returns the driver for `vendor_id:product_id`, if this table knows it.
    pub fn find(&self, vendor_id: u16, product_id: u16) -> Option<DriverKind> {
        self.entries
            .iter()
            .find(|e| e.vendor_id == vendor_id && e.product_id == product_id)
            .map(|e| e.driver)
    }

    /// Number of matchers in the table.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the table has no matchers.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The adapters every USB serial stack recognises out of the box.
    pub fn standard() -> Self {
        Self::new()
            // FTDI
            .add_product(0x0403, 0x6001, DriverKind::Ftdi)
            .add_product(0x0403, 0x6010, DriverKind::Ftdi)
            .add_product(0x0403, 0x6011, DriverKind::Ftdi)
            .add_product(0x0403, 0x6014, DriverKind::Ftdi)
            .add_product(0x0403, 0x6015, DriverKind::Ftdi)
            // Silicon Labs
            .add_product(0x10C4, 0xEA60, DriverKind::Cp21xx)
            .add_product(0x10C4, 0xEA70, DriverKind::Cp21xx)
            .add_product(0x10C4, 0xEA71, DriverKind::Cp21xx)
            // Prolific
            .add_product(0x067B, 0x2303, DriverKind::Prolific)
            .add_product(0x067B, 0x23A3, DriverKind::Prolific)
            .add_product(0x067B, 0x23B3, DriverKind::Prolific)
            .add_product(0x067B, 0x23C3, DriverKind::Prolific)
            .add_product(0x067B, 0x23D3, DriverKind::Prolific)
            .add_product(0x067B, 0x23E3, DriverKind::Prolific)
            .add_product(0x067B, 0x23F3, DriverKind::Prolific)
            // WCH
            .add_product(0x1A86, 0x7523, DriverKind::Ch34x)
            .add_product(0x1A86, 0x5523, DriverKind::Ch34x)
            // CDC-ACM boards
            .add_product(0x2341, 0x0001, DriverKind::CdcAcm)
            .add_product(0x2341, 0x0010, DriverKind::CdcAcm)
            .add_product(0x2341, 0x003B, DriverKind::CdcAcm)
            .add_product(0x2341, 0x0042, DriverKind::CdcAcm)
            .add_product(0x2341, 0x0043, DriverKind::CdcAcm)
            .add_product(0x2341, 0x8036, DriverKind::CdcAcm)
            .add_product(0x2341, 0x8037, DriverKind::CdcAcm)
            .add_product(0x16C0, 0x0483, DriverKind::CdcAcm)
            .add_product(0x1EAF, 0x0004, DriverKind::CdcAcm)
            .add_product(0x0483, 0x5740, DriverKind::CdcAcm)
            .add_product(0x2E8A, 0x0005, DriverKind::CdcAcm)
            .add_product(0x2E8A, 0x000A, DriverKind::CdcAcm)
    }

    /// Vendor-specific additions consulted after [`ProbeTable::standard`].
    pub fn vendor_overrides() -> Self {
        // CH340K reports a product id the standard table does not list.
        Self::new().add_product(0x1A86, 0x7522, DriverKind::Ch34x)
    }
}

// ── Attached devices ──────────────────────────────────────────────────────────

/// A single USB serial port as reported by the operating system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbPort {
    /// OS device path, e.g. `/dev/ttyUSB0` or `COM3`.
    pub port_name: String,
    pub vendor_id: u16,
    pub product_id: u16,
    pub serial_number: Option<String>,
}

/// A physical USB device with one or more serial ports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbDevice {
    pub vendor_id: u16,
    pub product_id: u16,
    pub serial_number: Option<String>,
    /// Port names, sorted.  A port index selects from this list.
    pub ports: Vec<String>,
}

/// Groups ports that belong to the same physical adapter.
///
/// Ports sharing vendor id, product id and serial number are one device.
/// Devices keep the order in which their first port was reported.
pub fn group_ports(ports: Vec<UsbPort>) -> Vec<UsbDevice> {
    let mut devices: Vec<UsbDevice> = Vec::new();
    for port in ports {
        let existing = devices.iter_mut().find(|d| {
            d.vendor_id == port.vendor_id
                && d.product_id == port.product_id
                && d.serial_number == port.serial_number
        });
        match existing {
            Some(device) => device.ports.push(port.port_name),
            None => devices.push(UsbDevice {
                vendor_id: port.vendor_id,
                product_id: port.product_id,
                serial_number: port.serial_number,
                ports: vec![port.port_name],
            }),
        }
    }
    for device in &mut devices {
        device.ports.sort();
    }
    devices
}

// ── Candidates ────────────────────────────────────────────────────────────────

/// A recognised adapter the bridge could open.
///
/// Candidates are produced fresh on every discovery query and are never
/// cached across sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCandidate {
    pub vendor_id: u16,
    pub product_id: u16,
    pub driver: DriverKind,
    pub ports: Vec<String>,
    pub has_permission: bool,
}

impl DeviceCandidate {
    /// Number of serial ports the adapter exposes.
    pub fn port_count(&self) -> usize {
        self.ports.len()
    }

    /// Name of the port at `index`, if it exists.
    pub fn port(&self, index: usize) -> Option<&str> {
        self.ports.get(index).map(String::as_str)
    }
}

impl fmt::Display for DeviceCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:04x} {} ({} port(s): {})",
            self.vendor_id,
            self.product_id,
            self.driver,
            self.port_count(),
            self.ports.join(", ")
        )?;
        if !self.has_permission {
            f.write_str(" [no permission]")?;
        }
        Ok(())
    }
}

/// Applies probe tables to attached devices.
#[derive(Debug, Clone)]
pub struct Prober {
    tables: Vec<ProbeTable>,
}

impl Default for Prober {
    /// Standard table first, then vendor overrides.
    fn default() -> Self {
        Self::new(vec![ProbeTable::standard(), ProbeTable::vendor_overrides()])
    }
}

impl Prober {
    /// Creates a prober that consults `tables` in order.
    pub fn new(tables: Vec<ProbeTable>) -> Self {
        Self { tables }
    }

    /// Returns every (table, device) match, table by table.
    ///
    /// A device recognised by two tables appears twice.  `has_permission` is
    /// evaluated once per produced candidate.
    pub fn probe<F>(&self, devices: &[UsbDevice], has_permission: F) -> Vec<DeviceCandidate>
    where
        F: Fn(&UsbDevice) -> bool,
    {
        let mut candidates = Vec::new();
        for table in &self.tables {
            for device in devices {
                if let Some(driver) = table.find(device.vendor_id, device.product_id) {
                    tracing::debug!(
                        "recognised {:04x}:{:04x} as {driver}",
                        device.vendor_id,
                        device.product_id
                    );
                    candidates.push(DeviceCandidate {
                        vendor_id: device.vendor_id,
                        product_id: device.product_id,
                        driver,
                        ports: device.ports.clone(),
                        has_permission: has_permission(device),
                    });
                }
            }
        }
        candidates
    }
}

/// Whether the bridge can start with the currently attached hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceStatus {
    /// No recognised adapter is attached.
    NoDevice,
    /// The first recognised adapter cannot be opened by this user.
    NoPermission,
    /// The first recognised adapter is ready to open.
    Ok,
}

impl DeviceStatus {
    /// Derives the status from a candidate list.  Only the first candidate
    /// counts.
    pub fn from_candidates(candidates: &[DeviceCandidate]) -> Self {
        match candidates.first() {
            None => DeviceStatus::NoDevice,
            Some(c) if !c.has_permission => DeviceStatus::NoPermission,
            Some(_) => DeviceStatus::Ok,
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceStatus::NoDevice => "no device",
            DeviceStatus::NoPermission => "no permission",
            DeviceStatus::Ok => "ok",
        };
        f.write_str(s)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
