//! Radio driver seam and availability tracking
//!
//! The actual Bluetooth stack lives outside this crate. [`RadioDriver`] is the
//! capability contract the embedding layer implements; [`RadioAvailability`]
//! tracks the radio's non-deterministic on/off state and turns level changes
//! into edge events for the two controllers.

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

/// Errors surfaced by a radio driver.
///
/// Low-level driver codes are not interpreted here; the embedding layer logs
/// them and reports only these coarse failures.
#[derive(Error, Debug)]
pub enum RadioError {
    #[error("radio unavailable: {0}")]
    Unavailable(String),

    #[error("scan failed: {0}")]
    ScanFailed(String),

    #[error("advertise failed: {0}")]
    AdvertiseFailed(String),
}

/// Settings handed to the driver when advertising starts.
#[derive(Clone, Copy, Debug)]
pub struct AdvertiseSettings {
    /// Whether remote devices may connect; presence beacons are not
    /// connectable.
    pub connectable: bool,
    /// Whether to include the tx power level in the payload (needed by
    /// distance estimation on the receiving side).
    pub include_tx_power: bool,
}

impl Default for AdvertiseSettings {
    fn default() -> Self {
        Self {
            connectable: false,
            include_tx_power: true,
        }
    }
}

/// Capability contract for the external BLE radio.
///
/// Sightings, scan failures and advertise failures travel the other way: the
/// embedding layer feeds them into the service's `report_*` entry points from
/// the driver's own callback context.
#[async_trait]
pub trait RadioDriver: Send + Sync {
    /// Begin delivering advertisement sightings.
    async fn start_scan(&self) -> Result<(), RadioError>;

    /// Stop delivering sightings.
    async fn stop_scan(&self) -> Result<(), RadioError>;

    /// Begin broadcasting `service_data` under the well-known service UUID.
    async fn start_advertise(
        &self,
        settings: &AdvertiseSettings,
        service_data: Vec<u8>,
    ) -> Result<(), RadioError>;

    /// Stop broadcasting.
    async fn stop_advertise(&self) -> Result<(), RadioError>;

    /// Whether the radio is currently usable.
    fn is_enabled(&self) -> bool;
}

/// Radio on/off edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RadioEvent {
    RadioOn,
    RadioOff,
}

/// Tracks whether the radio is usable; externally driven by the OS-level
/// availability notification.
pub struct RadioAvailability {
    enabled: Mutex<bool>,
}

impl RadioAvailability {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: Mutex::new(enabled),
        }
    }

    /// Record an availability change.
    ///
    /// Idempotent: returns the edge event only when the value actually
    /// changed, `None` otherwise.
    pub fn set_enabled(&self, enabled: bool) -> Option<RadioEvent> {
        let mut current = self.enabled.lock();
        if *current == enabled {
            return None;
        }
        *current = enabled;
        let event = if enabled {
            RadioEvent::RadioOn
        } else {
            RadioEvent::RadioOff
        };
        tracing::debug!(?event, "radio availability changed");
        Some(event)
    }

    pub fn is_enabled(&self) -> bool {
        *self.enabled.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_edges_only_on_change() {
        let radio = RadioAvailability::new(false);
        assert!(!radio.is_enabled());

        assert_eq!(radio.set_enabled(true), Some(RadioEvent::RadioOn));
        assert!(radio.is_enabled());
        assert_eq!(radio.set_enabled(true), None);

        assert_eq!(radio.set_enabled(false), Some(RadioEvent::RadioOff));
        assert_eq!(radio.set_enabled(false), None);
    }
}
