//! Scan control state machine
//!
//! Governs the scan mode (stopped / waiting-for-radio / continuous /
//! periodic-active / periodic-idle). All transitions, whether caller-driven,
//! radio-driven or timer-driven, run under one mutex so a timer firing
//! concurrently with a manual stop can never produce an inconsistent state.
//! Timer tasks additionally carry an epoch that is bumped on every cancel, so
//! a stale timer that lost the abort race cannot resurrect a stopped machine.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::PresenceConfig;
use crate::events::{EventSink, PresenceEvent};
use crate::radio::{RadioAvailability, RadioDriver, RadioError, RadioEvent};
use crate::registry::DeviceRegistry;

/// Scan mode requested by the caller, remembered across radio outages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    Continuous,
    Periodic,
}

/// Scan machine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    Stopped,
    WaitingForRadio { mode: ScanMode },
    Continuous,
    PeriodicActive,
    PeriodicIdle,
}

impl ScanState {
    /// Whether the driver is actively scanning in this state.
    fn driver_scanning(self) -> bool {
        matches!(self, ScanState::Continuous | ScanState::PeriodicActive)
    }
}

struct ScanInner {
    state: ScanState,
    scan_duration: Duration,
    wait_duration: Duration,
    timer: Option<JoinHandle<()>>,
    epoch: u64,
}

/// The scan-control state machine.
#[derive(Clone)]
pub struct ScanController {
    driver: Arc<dyn RadioDriver>,
    radio: Arc<RadioAvailability>,
    registry: Arc<DeviceRegistry>,
    events: EventSink,
    inner: Arc<Mutex<ScanInner>>,
}

impl ScanController {
    pub fn new(
        driver: Arc<dyn RadioDriver>,
        radio: Arc<RadioAvailability>,
        registry: Arc<DeviceRegistry>,
        events: EventSink,
        config: &PresenceConfig,
    ) -> Self {
        Self {
            driver,
            radio,
            registry,
            events,
            inner: Arc::new(Mutex::new(ScanInner {
                state: ScanState::Stopped,
                scan_duration: config.scan_duration,
                wait_duration: config.wait_duration,
                timer: None,
                epoch: 0,
            })),
        }
    }

    pub async fn state(&self) -> ScanState {
        self.inner.lock().await.state
    }

    /// Scan continuously until stopped.
    pub async fn start_continuous(&self) -> Result<(), RadioError> {
        self.start(ScanMode::Continuous).await
    }

    /// Scan in fixed active/idle cycles until stopped.
    pub async fn start_periodic(&self) -> Result<(), RadioError> {
        self.start(ScanMode::Periodic).await
    }

    async fn start(&self, mode: ScanMode) -> Result<(), RadioError> {
        let mut inner = self.inner.lock().await;
        self.cancel_timer(&mut inner);
        if !self.radio.is_enabled() {
            self.set_state(&mut inner, ScanState::WaitingForRadio { mode });
            return Ok(());
        }
        if inner.state.driver_scanning() {
            if let Err(error) = self.driver.stop_scan().await {
                tracing::warn!(%error, "failed to stop ongoing scan before restart");
            }
        }
        self.begin_scanning(&mut inner, mode).await
    }

    /// Stop scanning. Idempotent from `Stopped`; cancels any pending cycle
    /// timer so it cannot fire afterwards.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state == ScanState::Stopped {
            return;
        }
        self.cancel_timer(&mut inner);
        if inner.state.driver_scanning() {
            if let Err(error) = self.driver.stop_scan().await {
                tracing::warn!(%error, "failed to stop scan");
            }
        }
        self.set_state(&mut inner, ScanState::Stopped);
    }

    /// React to a radio availability edge.
    pub async fn handle_radio_event(&self, event: RadioEvent) {
        let mut inner = self.inner.lock().await;
        match event {
            RadioEvent::RadioOff => match inner.state {
                ScanState::Continuous => {
                    self.set_state(
                        &mut inner,
                        ScanState::WaitingForRadio {
                            mode: ScanMode::Continuous,
                        },
                    );
                }
                ScanState::PeriodicActive | ScanState::PeriodicIdle => {
                    self.cancel_timer(&mut inner);
                    self.set_state(
                        &mut inner,
                        ScanState::WaitingForRadio {
                            mode: ScanMode::Periodic,
                        },
                    );
                }
                _ => {}
            },
            RadioEvent::RadioOn => {
                if let ScanState::WaitingForRadio { mode } = inner.state {
                    let _ = self.begin_scanning(&mut inner, mode).await;
                }
            }
        }
    }

    /// Driver-reported scan failure: immediate stop, no retry.
    pub async fn handle_scan_failure(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state == ScanState::Stopped {
            return;
        }
        tracing::warn!("scan failure reported by driver");
        self.cancel_timer(&mut inner);
        self.events.emit(PresenceEvent::ScanFailed);
        self.set_state(&mut inner, ScanState::Stopped);
    }

    pub async fn scan_duration(&self) -> Duration {
        self.inner.lock().await.scan_duration
    }

    pub async fn wait_duration(&self) -> Duration {
        self.inner.lock().await.wait_duration
    }

    /// Update the active window of the periodic cycle; non-positive values
    /// are rejected and the current value kept. Takes effect from the next
    /// armed timer.
    pub async fn set_scan_duration(&self, duration: Duration) {
        if !duration.is_zero() {
            self.inner.lock().await.scan_duration = duration;
        }
    }

    /// Update the idle window of the periodic cycle; non-positive values are
    /// rejected and the current value kept.
    pub async fn set_wait_duration(&self, duration: Duration) {
        if !duration.is_zero() {
            self.inner.lock().await.wait_duration = duration;
        }
    }

    async fn begin_scanning(
        &self,
        inner: &mut ScanInner,
        mode: ScanMode,
    ) -> Result<(), RadioError> {
        match self.driver.start_scan().await {
            Ok(()) => {
                match mode {
                    ScanMode::Continuous => self.set_state(inner, ScanState::Continuous),
                    ScanMode::Periodic => {
                        self.set_state(inner, ScanState::PeriodicActive);
                        self.arm_scan_timer(inner);
                    }
                }
                Ok(())
            }
            Err(error) => {
                tracing::warn!(%error, "driver rejected scan start");
                self.events.emit(PresenceEvent::ScanFailed);
                self.set_state(inner, ScanState::Stopped);
                Err(error)
            }
        }
    }

    /// Active window elapsed: pause the driver and idle out the cycle.
    async fn scan_window_elapsed(&self, epoch: u64) {
        let mut inner = self.inner.lock().await;
        if inner.epoch != epoch || inner.state != ScanState::PeriodicActive {
            return;
        }
        if let Err(error) = self.driver.stop_scan().await {
            tracing::warn!(%error, "failed to pause periodic scan");
        }
        self.set_state(&mut inner, ScanState::PeriodicIdle);
        self.arm_wait_timer(&mut inner);
    }

    /// Idle window elapsed: sweep stale devices, then resume the driver.
    async fn wait_window_elapsed(&self, epoch: u64) {
        let mut inner = self.inner.lock().await;
        if inner.epoch != epoch || inner.state != ScanState::PeriodicIdle {
            return;
        }
        self.registry.sweep_stale();
        let _ = self.begin_scanning(&mut inner, ScanMode::Periodic).await;
    }

    fn arm_scan_timer(&self, inner: &mut ScanInner) {
        inner.epoch += 1;
        let epoch = inner.epoch;
        let duration = inner.scan_duration;
        let controller = self.clone();
        inner.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            controller.scan_window_elapsed(epoch).await;
        }));
    }

    fn arm_wait_timer(&self, inner: &mut ScanInner) {
        inner.epoch += 1;
        let epoch = inner.epoch;
        let duration = inner.wait_duration;
        let controller = self.clone();
        inner.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            controller.wait_window_elapsed(epoch).await;
        }));
    }

    fn cancel_timer(&self, inner: &mut ScanInner) {
        inner.epoch += 1;
        if let Some(timer) = inner.timer.take() {
            timer.abort();
        }
    }

    fn set_state(&self, inner: &mut ScanInner, next: ScanState) {
        if inner.state != next {
            tracing::debug!(from = ?inner.state, to = ?next, "scan state changed");
            inner.state = next;
            self.events.emit(PresenceEvent::ScanStatusChanged { state: next });
        }
    }
}
