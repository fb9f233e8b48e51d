//! Device discovery service.
//!
//! Combines a [`DeviceSource`] (what is plugged in) with a [`Prober`] (what we
//! recognise).  Nothing is cached: every call re-queries the source, so a
//! device plugged in or granted permission between two calls is seen
//! immediately.

use std::sync::Arc;

use serialws_core::{DeviceCandidate, DeviceStatus, Prober};

use crate::application::ports::DeviceSource;

/// Lists candidate adapters and reports whether the bridge can start.
pub struct DeviceDiscovery {
    source: Arc<dyn DeviceSource>,
    prober: Prober,
}

impl DeviceDiscovery {
    /// Creates a discovery service using the standard and vendor-override
    /// probe tables.
    pub fn new(source: Arc<dyn DeviceSource>) -> Self {
        Self::with_prober(source, Prober::default())
    }

    /// Creates a discovery service with custom probe tables.
    pub fn with_prober(source: Arc<dyn DeviceSource>, prober: Prober) -> Self {
        Self { source, prober }
    }

    /// The device source used to enumerate and open ports.
    pub fn source(&self) -> &dyn DeviceSource {
        self.source.as_ref()
    }

    /// Recognised adapters, standard-table matches first.
    pub fn list_candidates(&self) -> Vec<DeviceCandidate> {
        let devices = self.source.attached_devices();
        self.prober
            .probe(&devices, |device| self.source.has_permission(device))
    }

    /// Start status derived from the first candidate.
    pub fn status(&self) -> DeviceStatus {
        DeviceStatus::from_candidates(&self.list_candidates())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::MockDeviceSource;
    use serialws_core::{DriverKind, ProbeTable, UsbDevice};

    fn device(vid: u16, pid: u16, port: &str) -> UsbDevice {
        UsbDevice {
            vendor_id: vid,
            product_id: pid,
            serial_number: None,
            ports: vec![port.to_string()],
        }
    }

    #[test]
    fn test_status_is_no_device_when_nothing_is_attached() {
        let mut source = MockDeviceSource::new();
        source.expect_attached_devices().returning(Vec::new);
        source.expect_has_permission().never();

        let discovery = DeviceDiscovery::new(Arc::new(source));

        assert!(discovery.list_candidates().is_empty());
        assert_eq!(discovery.status(), DeviceStatus::NoDevice);
    }

    #[test]
    fn test_status_is_no_device_for_unrecognised_hardware() {
        let mut source = MockDeviceSource::new();
        source
            .expect_attached_devices()
            .returning(|| vec![device(0x1234, 0x5678, "/dev/ttyUSB0")]);
        source.expect_has_permission().never();

        let discovery = DeviceDiscovery::new(Arc::new(source));

        assert_eq!(discovery.status(), DeviceStatus::NoDevice);
    }

    #[test]
    fn test_status_is_no_permission_when_first_candidate_is_locked() {
        let mut source = MockDeviceSource::new();
        source
            .expect_attached_devices()
            .returning(|| vec![device(0x0403, 0x6001, "/dev/ttyUSB0")]);
        source.expect_has_permission().returning(|_| false);

        let discovery = DeviceDiscovery::new(Arc::new(source));

        assert_eq!(discovery.status(), DeviceStatus::NoPermission);
    }

    #[test]
    fn test_ch340k_is_found_through_vendor_override_table() {
        let mut source = MockDeviceSource::new();
        source
            .expect_attached_devices()
            .returning(|| vec![device(0x1A86, 0x7522, "/dev/ttyUSB0")]);
        source.expect_has_permission().returning(|_| true);

        let discovery = DeviceDiscovery::new(Arc::new(source));
        let candidates = discovery.list_candidates();

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].driver, DriverKind::Ch34x);
        assert_eq!(discovery.status(), DeviceStatus::Ok);
    }

    #[test]
    fn test_every_call_requeries_the_source() {
        let mut source = MockDeviceSource::new();
        source.expect_attached_devices().times(2).returning(Vec::new);

        let discovery = DeviceDiscovery::new(Arc::new(source));
        discovery.status();
        discovery.status();
    }

    #[test]
    fn test_custom_prober_replaces_default_tables() {
        let mut source = MockDeviceSource::new();
        source
            .expect_attached_devices()
            .returning(|| vec![device(0x0403, 0x6001, "/dev/ttyUSB0")]);
        source.expect_has_permission().returning(|_| true);

        let only_cp21xx =
            Prober::new(vec![ProbeTable::new().add_product(0x10C4, 0xEA60, DriverKind::Cp21xx)]);
        let discovery = DeviceDiscovery::with_prober(Arc::new(source), only_cp21xx);

        assert_eq!(discovery.status(), DeviceStatus::NoDevice);
    }
}
