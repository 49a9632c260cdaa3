//! BLE device-presence engine
//!
//! Continuously ingests BLE advertisement sightings, merges them against a
//! known-device set, classifies each device's lifecycle (new / reconnected /
//! disconnected / ignored / tracked) and evicts devices after a silence
//! timeout, while coordinating scanning and advertising with a radio whose
//! availability comes and goes.
//!
//! The actual Bluetooth stack stays outside: implement [`RadioDriver`] for
//! your platform, feed availability changes and driver callbacks into
//! [`PresenceService`], and consume the [`PresenceEvent`] stream.

pub mod advertise;
pub mod clock;
pub mod codec;
pub mod config;
pub mod events;
pub mod radio;
pub mod registry;
pub mod scan;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

pub use crate::advertise::{AdState, AdvertiseController};
pub use crate::clock::{Clock, SystemClock};
pub use crate::codec::{AdvertisedName, NameError};
pub use crate::config::PresenceConfig;
pub use crate::events::PresenceEvent;
pub use crate::radio::{AdvertiseSettings, RadioDriver, RadioError};
pub use crate::registry::{
    estimate_distance, DeviceRegistry, Membership, RegistryError, Sighting, TrackedDevice,
};
pub use crate::scan::{ScanController, ScanMode, ScanState};

use crate::events::EventSink;
use crate::radio::RadioAvailability;

/// Well-known service UUID shared by all instances of this application.
///
/// Acts as a private protocol marker: incoming advertisements are filtered by
/// it and outgoing service data is tagged with it. Fixed configuration, never
/// derived at runtime.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x0000b81d_0000_1000_8000_00805f9b34fb);

/// Default advertised name before the caller sets one.
pub const DEFAULT_ADVERTISED_NAME: &str = "New";

/// Errors surfaced by the presence service.
#[derive(Error, Debug)]
pub enum PresenceError {
    #[error("radio error: {0}")]
    Radio(#[from] RadioError),

    #[error("invalid advertised name: {0}")]
    InvalidName(#[from] NameError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("presence service is already running")]
    AlreadyRunning,
}

/// Owned, explicitly-lifetimed facade over the presence core.
///
/// Wires the radio availability tracker, the two controllers and the device
/// registry together with constructor-injected collaborators. State resets to
/// stopped with the process; nothing is persisted.
pub struct PresenceService {
    radio: Arc<RadioAvailability>,
    registry: Arc<DeviceRegistry>,
    scan: ScanController,
    advertise: AdvertiseController,
    events: Mutex<Option<UnboundedReceiver<PresenceEvent>>>,
    running: AtomicBool,
}

impl PresenceService {
    /// Build a service around a radio driver, timestamping with the
    /// monotonic-anchored system clock.
    pub fn new(driver: Arc<dyn RadioDriver>, config: PresenceConfig) -> Self {
        Self::with_clock(driver, config, Arc::new(SystemClock::new()))
    }

    /// Build a service with an explicit clock (tests drive time by hand).
    pub fn with_clock(
        driver: Arc<dyn RadioDriver>,
        config: PresenceConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (sink, rx) = EventSink::channel();
        let radio = Arc::new(RadioAvailability::new(driver.is_enabled()));
        let registry = Arc::new(DeviceRegistry::new(
            clock,
            sink.clone(),
            config.disconnection_threshold,
        ));
        let scan = ScanController::new(
            driver.clone(),
            radio.clone(),
            registry.clone(),
            sink.clone(),
            &config,
        );
        let advertise = AdvertiseController::new(
            driver,
            radio.clone(),
            sink,
            config.advertise,
            AdvertisedName::default(),
        );
        Self {
            radio,
            registry,
            scan,
            advertise,
            events: Mutex::new(Some(rx)),
            running: AtomicBool::new(false),
        }
    }

    /// Start the background staleness sweep. At most one start may be in
    /// effect; a second call returns [`PresenceError::AlreadyRunning`].
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<(), PresenceError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(PresenceError::AlreadyRunning);
        }
        self.registry.start_sweeper();
        tracing::info!(service_uuid = %SERVICE_UUID, "presence service started");
        Ok(())
    }

    /// Stop scanning, advertising and the staleness sweep.
    pub async fn shutdown(&self) {
        self.scan.stop().await;
        self.advertise.stop().await;
        self.registry.stop_sweeper();
        self.running.store(false, Ordering::SeqCst);
        tracing::info!("presence service shut down");
    }

    /// Take the event stream. Single subscriber; returns `None` once taken.
    pub fn take_events(&self) -> Option<UnboundedReceiver<PresenceEvent>> {
        self.events.lock().take()
    }

    // ---- radio availability -------------------------------------------------

    /// Feed an OS-level radio availability change. Idempotent; on an actual
    /// edge both controllers pause or resume accordingly.
    pub async fn set_radio_enabled(&self, enabled: bool) {
        if let Some(event) = self.radio.set_enabled(enabled) {
            self.scan.handle_radio_event(event).await;
            self.advertise.handle_radio_event(event).await;
        }
    }

    pub fn is_radio_enabled(&self) -> bool {
        self.radio.is_enabled()
    }

    // ---- driver callbacks ---------------------------------------------------

    /// Feed a sighting delivered by the driver's scan callback.
    pub fn report_sighting(&self, sighting: Sighting) {
        self.registry.on_sighting(sighting);
    }

    /// Feed a driver-reported scan failure.
    pub async fn report_scan_failure(&self) {
        self.scan.handle_scan_failure().await;
    }

    /// Feed a driver-reported advertise failure.
    pub async fn report_advertise_failure(&self) {
        self.advertise.handle_advertise_failure().await;
    }

    // ---- scanning -----------------------------------------------------------

    pub async fn start_continuous_scan(&self) -> Result<(), PresenceError> {
        Ok(self.scan.start_continuous().await?)
    }

    pub async fn start_periodic_scan(&self) -> Result<(), PresenceError> {
        Ok(self.scan.start_periodic().await?)
    }

    pub async fn stop_scan(&self) {
        self.scan.stop().await;
    }

    pub async fn scan_state(&self) -> ScanState {
        self.scan.state().await
    }

    pub async fn set_scan_duration(&self, duration: Duration) {
        self.scan.set_scan_duration(duration).await;
    }

    pub async fn set_wait_duration(&self, duration: Duration) {
        self.scan.set_wait_duration(duration).await;
    }

    // ---- advertising --------------------------------------------------------

    pub async fn start_advertise(&self) -> Result<(), PresenceError> {
        Ok(self.advertise.start().await?)
    }

    pub async fn stop_advertise(&self) {
        self.advertise.stop().await;
    }

    pub async fn ad_state(&self) -> AdState {
        self.advertise.state().await
    }

    pub async fn ad_name_in_use(&self) -> AdvertisedName {
        self.advertise.name_in_use().await
    }

    /// Stage a new advertised name for the next broadcast.
    pub async fn set_advertised_name(&self, candidate: &str) -> Result<(), PresenceError> {
        Ok(self.advertise.set_advertised_name(candidate).await?)
    }

    // ---- device registry ----------------------------------------------------

    /// Snapshot of the current device list.
    pub fn devices(&self) -> Vec<TrackedDevice> {
        self.registry.devices()
    }

    /// Track the sighted device's identity tag.
    pub fn track(&self, sighting: &Sighting) -> Result<(), PresenceError> {
        Ok(self.registry.track(sighting)?)
    }

    /// Ignore the sighted device's identity tag.
    pub fn ignore(&self, sighting: &Sighting) -> Result<(), PresenceError> {
        Ok(self.registry.ignore(sighting)?)
    }
}
