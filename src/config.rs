//! Runtime configuration for the presence core.

use std::time::Duration;

use crate::radio::AdvertiseSettings;

/// Tunables for scanning cadence and staleness detection.
#[derive(Clone, Debug)]
pub struct PresenceConfig {
    /// Active window of a periodic scan cycle.
    pub scan_duration: Duration,

    /// Idle window of a periodic scan cycle.
    pub wait_duration: Duration,

    /// Silence after which a device is considered disconnected.
    pub disconnection_threshold: Duration,

    /// Settings handed to the driver when advertising starts.
    pub advertise: AdvertiseSettings,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            scan_duration: Duration::from_millis(10_000),
            wait_duration: Duration::from_millis(5_000),
            disconnection_threshold: Duration::from_millis(10_000),
            advertise: AdvertiseSettings::default(),
        }
    }
}

impl PresenceConfig {
    /// Sweep cadence: half the disconnection threshold, so staleness is
    /// detected with bounded latency even without new sightings arriving.
    pub fn sweep_interval(&self) -> Duration {
        self.disconnection_threshold / 2
    }
}
