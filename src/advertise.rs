//! Advertise control state machine
//!
//! Structurally parallel to the scan controller but without the periodic
//! dimension. The advertised name is validated at the mutator; a pending name
//! only takes effect on the next transition into `Advertising`.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::codec::{AdvertisedName, NameError};
use crate::events::{EventSink, PresenceEvent};
use crate::radio::{AdvertiseSettings, RadioAvailability, RadioDriver, RadioError, RadioEvent};

/// Advertise machine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdState {
    Stopped,
    WaitingForRadio,
    Advertising,
}

struct AdInner {
    state: AdState,
    /// Name the next advertisement will carry.
    pending_name: AdvertisedName,
    /// Name the current or last advertisement carried.
    name_in_use: AdvertisedName,
}

/// The advertise-control state machine.
#[derive(Clone)]
pub struct AdvertiseController {
    driver: Arc<dyn RadioDriver>,
    radio: Arc<RadioAvailability>,
    events: EventSink,
    settings: AdvertiseSettings,
    inner: Arc<Mutex<AdInner>>,
}

impl AdvertiseController {
    pub fn new(
        driver: Arc<dyn RadioDriver>,
        radio: Arc<RadioAvailability>,
        events: EventSink,
        settings: AdvertiseSettings,
        initial_name: AdvertisedName,
    ) -> Self {
        Self {
            driver,
            radio,
            events,
            settings,
            inner: Arc::new(Mutex::new(AdInner {
                state: AdState::Stopped,
                pending_name: initial_name.clone(),
                name_in_use: initial_name,
            })),
        }
    }

    pub async fn state(&self) -> AdState {
        self.inner.lock().await.state
    }

    /// Name carried by the current or last broadcast.
    pub async fn name_in_use(&self) -> AdvertisedName {
        self.inner.lock().await.name_in_use.clone()
    }

    /// Validate and stage a new advertised name.
    ///
    /// On rejection the in-use name is untouched and the caller surfaces the
    /// failure. A change while already advertising does not restart the
    /// broadcast.
    pub async fn set_advertised_name(&self, candidate: &str) -> Result<(), NameError> {
        let name = AdvertisedName::parse(candidate)?;
        self.inner.lock().await.pending_name = name;
        Ok(())
    }

    /// Start broadcasting the pending name, or wait for the radio.
    pub async fn start(&self) -> Result<(), RadioError> {
        let mut inner = self.inner.lock().await;
        if !self.radio.is_enabled() {
            self.set_state(&mut inner, AdState::WaitingForRadio);
            return Ok(());
        }
        if inner.state == AdState::Advertising {
            if let Err(error) = self.driver.stop_advertise().await {
                tracing::warn!(%error, "failed to stop ongoing advertisement before restart");
            }
        }
        self.begin_advertising(&mut inner).await
    }

    /// Stop broadcasting. Idempotent from `Stopped`.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state == AdState::Stopped {
            return;
        }
        if inner.state == AdState::Advertising {
            if let Err(error) = self.driver.stop_advertise().await {
                tracing::warn!(%error, "failed to stop advertisement");
            }
        }
        self.set_state(&mut inner, AdState::Stopped);
    }

    /// React to a radio availability edge.
    pub async fn handle_radio_event(&self, event: RadioEvent) {
        let mut inner = self.inner.lock().await;
        match event {
            RadioEvent::RadioOff => {
                if inner.state == AdState::Advertising {
                    self.set_state(&mut inner, AdState::WaitingForRadio);
                }
            }
            RadioEvent::RadioOn => {
                if inner.state == AdState::WaitingForRadio {
                    let _ = self.begin_advertising(&mut inner).await;
                }
            }
        }
    }

    /// Driver-reported advertise failure: immediate stop, no retry.
    pub async fn handle_advertise_failure(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state == AdState::Stopped {
            return;
        }
        tracing::warn!("advertise failure reported by driver");
        self.events.emit(PresenceEvent::AdFailed);
        self.set_state(&mut inner, AdState::Stopped);
    }

    async fn begin_advertising(&self, inner: &mut AdInner) -> Result<(), RadioError> {
        inner.name_in_use = inner.pending_name.clone();
        let payload = inner.name_in_use.encode();
        match self.driver.start_advertise(&self.settings, payload).await {
            Ok(()) => {
                self.set_state(inner, AdState::Advertising);
                Ok(())
            }
            Err(error) => {
                tracing::warn!(%error, "driver rejected advertise start");
                self.events.emit(PresenceEvent::AdFailed);
                self.set_state(inner, AdState::Stopped);
                Err(error)
            }
        }
    }

    fn set_state(&self, inner: &mut AdInner, next: AdState) {
        if inner.state != next {
            tracing::debug!(from = ?inner.state, to = ?next, "advertise state changed");
            inner.state = next;
            self.events.emit(PresenceEvent::AdStatusChanged { state: next });
        }
    }
}
