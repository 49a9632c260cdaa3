//! End-to-end tests exercising the presence service through its facade:
//! radio outages, periodic cycling, device lifecycle classification and the
//! background staleness sweep.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ble_presence::clock::ManualClock;
use ble_presence::{
    AdState, AdvertiseSettings, AdvertisedName, PresenceConfig, PresenceError, PresenceService,
    PresenceEvent, RadioDriver, RadioError, ScanMode, ScanState, Sighting,
};
use tokio::sync::mpsc::UnboundedReceiver;

#[derive(Default)]
struct RecordingDriver {
    scan_starts: AtomicUsize,
    scan_stops: AtomicUsize,
    ad_starts: AtomicUsize,
    ad_stops: AtomicUsize,
}

#[async_trait]
impl RadioDriver for RecordingDriver {
    async fn start_scan(&self) -> Result<(), RadioError> {
        self.scan_starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), RadioError> {
        self.scan_stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn start_advertise(
        &self,
        _settings: &AdvertiseSettings,
        _service_data: Vec<u8>,
    ) -> Result<(), RadioError> {
        self.ad_starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_advertise(&self) -> Result<(), RadioError> {
        self.ad_stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        true
    }
}

struct Harness {
    service: Arc<PresenceService>,
    driver: Arc<RecordingDriver>,
    clock: Arc<ManualClock>,
    rx: UnboundedReceiver<PresenceEvent>,
}

fn harness() -> Harness {
    let driver = Arc::new(RecordingDriver::default());
    let clock = Arc::new(ManualClock::new(0));
    let service = Arc::new(PresenceService::with_clock(
        driver.clone(),
        PresenceConfig::default(),
        clock.clone(),
    ));
    let rx = service.take_events().expect("event stream");
    Harness {
        service,
        driver,
        clock,
        rx,
    }
}

fn drain(rx: &mut UnboundedReceiver<PresenceEvent>) -> Vec<PresenceEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn sighting(address: &str, tag: Option<&str>, at: u64) -> Sighting {
    Sighting {
        address: address.to_owned(),
        name: tag.map(|t| AdvertisedName::parse(t).expect(t)),
        rssi: -60,
        tx_power: Some(-10),
        timestamp_millis: at,
    }
}

#[tokio::test]
async fn second_start_reports_already_running() {
    let h = harness();
    h.service.start().unwrap();
    assert!(matches!(
        h.service.start(),
        Err(PresenceError::AlreadyRunning)
    ));

    h.service.shutdown().await;
    // After a shutdown the service may be started again.
    h.service.start().unwrap();
    h.service.shutdown().await;
}

#[tokio::test]
async fn event_stream_is_single_subscriber() {
    let h = harness();
    assert!(h.service.take_events().is_none());
}

#[tokio::test]
async fn radio_outage_pauses_scan_and_advertisement_together() {
    let mut h = harness();
    h.service.start_continuous_scan().await.unwrap();
    h.service.start_advertise().await.unwrap();
    drain(&mut h.rx);

    h.service.set_radio_enabled(false).await;
    assert_eq!(
        h.service.scan_state().await,
        ScanState::WaitingForRadio {
            mode: ScanMode::Continuous
        }
    );
    assert_eq!(h.service.ad_state().await, AdState::WaitingForRadio);

    // No driver calls while waiting.
    assert_eq!(h.driver.scan_starts.load(Ordering::SeqCst), 1);
    assert_eq!(h.driver.ad_starts.load(Ordering::SeqCst), 1);

    h.service.set_radio_enabled(true).await;
    assert_eq!(h.service.scan_state().await, ScanState::Continuous);
    assert_eq!(h.service.ad_state().await, AdState::Advertising);
    assert_eq!(h.driver.scan_starts.load(Ordering::SeqCst), 2);
    assert_eq!(h.driver.ad_starts.load(Ordering::SeqCst), 2);

    let events = drain(&mut h.rx);
    assert!(events.contains(&PresenceEvent::ScanStatusChanged {
        state: ScanState::Continuous
    }));
    assert!(events.contains(&PresenceEvent::AdStatusChanged {
        state: AdState::Advertising
    }));
}

#[tokio::test]
async fn redundant_radio_notifications_are_ignored() {
    let mut h = harness();
    h.service.start_continuous_scan().await.unwrap();
    drain(&mut h.rx);

    h.service.set_radio_enabled(true).await; // already on
    assert!(drain(&mut h.rx).is_empty());
    assert_eq!(h.driver.scan_starts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn lifecycle_classification_through_the_facade() {
    let mut h = harness();

    h.service.track(&sighting("zz", Some("ABC"), 0)).unwrap();
    h.service.ignore(&sighting("zz", Some("XYZ"), 0)).unwrap();

    h.service.report_sighting(sighting("aa", Some("ABC"), 100));
    h.service.report_sighting(sighting("bb", Some("XYZ"), 100));
    h.service.report_sighting(sighting("cc", Some("JKL"), 100));
    h.service.report_sighting(sighting("dd", None, 100));

    let events = drain(&mut h.rx);
    assert!(matches!(
        events[0],
        PresenceEvent::TrackedDeviceReconnected { .. }
    ));
    assert!(matches!(events[1], PresenceEvent::ResultAdded { .. }));
    assert!(matches!(events[2], PresenceEvent::NewDeviceDetected { .. }));
    assert!(matches!(events[3], PresenceEvent::ResultAdded { .. }));
    assert_eq!(h.service.devices().len(), 4);
}

#[tokio::test]
async fn tracking_requires_a_decodable_tag() {
    let h = harness();
    assert!(matches!(
        h.service.track(&sighting("aa", None, 0)),
        Err(PresenceError::Registry(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn background_sweep_disconnects_silent_devices() {
    let mut h = harness();
    h.service.start().unwrap();

    let friend = sighting("aa", Some("ABC"), 0);
    h.service.track(&friend).unwrap();
    h.service.report_sighting(friend);
    h.service.report_sighting(sighting("bb", None, 0));
    drain(&mut h.rx);

    // Everything goes silent; the sweeper fires on its own cadence.
    h.clock.set(30_000);
    tokio::time::sleep(Duration::from_millis(5_001)).await;

    let events = drain(&mut h.rx);
    let disconnects = events
        .iter()
        .filter(|e| matches!(e, PresenceEvent::TrackedDeviceDisconnected { .. }))
        .count();
    let removals = events
        .iter()
        .filter(|e| matches!(e, PresenceEvent::ResultRemoved { .. }))
        .count();
    assert_eq!(disconnects, 1);
    assert_eq!(removals, 1);
    assert!(h.service.devices().is_empty());

    h.service.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn periodic_scan_follows_the_configured_cadence() {
    let mut h = harness();
    h.service.start_periodic_scan().await.unwrap();
    assert_eq!(h.service.scan_state().await, ScanState::PeriodicActive);

    // t = 0..10000 active, 10000..15000 idle, active again from 15000.
    tokio::time::sleep(Duration::from_millis(9_999)).await;
    assert_eq!(h.service.scan_state().await, ScanState::PeriodicActive);
    tokio::time::sleep(Duration::from_millis(2)).await;
    assert_eq!(h.service.scan_state().await, ScanState::PeriodicIdle);
    tokio::time::sleep(Duration::from_millis(5_000)).await;
    assert_eq!(h.service.scan_state().await, ScanState::PeriodicActive);

    h.service.stop_scan().await;
    assert_eq!(h.service.scan_state().await, ScanState::Stopped);
    drain(&mut h.rx);
}

#[tokio::test]
async fn advertised_name_lifecycle_through_the_facade() {
    let h = harness();
    assert!(h.service.set_advertised_name("1").await.is_err());
    assert_eq!(h.service.ad_name_in_use().await.as_str(), "New");

    h.service.set_advertised_name("Ab9").await.unwrap();
    h.service.start_advertise().await.unwrap();
    assert_eq!(h.service.ad_name_in_use().await.as_str(), "Ab9");
}

#[tokio::test]
async fn driver_failure_reports_stop_the_machines() {
    let mut h = harness();
    h.service.start_continuous_scan().await.unwrap();
    h.service.start_advertise().await.unwrap();
    drain(&mut h.rx);

    h.service.report_scan_failure().await;
    h.service.report_advertise_failure().await;
    assert_eq!(h.service.scan_state().await, ScanState::Stopped);
    assert_eq!(h.service.ad_state().await, AdState::Stopped);

    let events = drain(&mut h.rx);
    assert!(events.contains(&PresenceEvent::ScanFailed));
    assert!(events.contains(&PresenceEvent::AdFailed));
}
