//! Presence engine demonstration
//!
//! Drives the full service against a simulated radio driver: advertises a
//! name, runs a periodic scan, feeds synthetic sightings, rides out a radio
//! outage and prints the event stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ble_presence::{
    estimate_distance, AdvertiseSettings, AdvertisedName, Clock, PresenceConfig, PresenceService,
    RadioDriver, RadioError, Sighting, SystemClock, SERVICE_UUID,
};
use tracing::info;

/// In-process stand-in for a platform Bluetooth stack.
struct SimulatedDriver {
    enabled: AtomicBool,
}

impl SimulatedDriver {
    fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl RadioDriver for SimulatedDriver {
    async fn start_scan(&self) -> Result<(), RadioError> {
        info!("driver: scan started");
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), RadioError> {
        info!("driver: scan stopped");
        Ok(())
    }

    async fn start_advertise(
        &self,
        settings: &AdvertiseSettings,
        service_data: Vec<u8>,
    ) -> Result<(), RadioError> {
        info!(
            connectable = settings.connectable,
            payload = %String::from_utf8_lossy(&service_data),
            "driver: advertising under {SERVICE_UUID}"
        );
        Ok(())
    }

    async fn stop_advertise(&self) -> Result<(), RadioError> {
        info!("driver: advertising stopped");
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

fn sighting(clock: &SystemClock, address: &str, tag: Option<&str>, rssi: i16) -> Sighting {
    Sighting {
        address: address.to_owned(),
        name: tag.and_then(|t| AdvertisedName::parse(t).ok()),
        rssi,
        tx_power: Some(-7),
        timestamp_millis: clock.now_millis(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let clock = Arc::new(SystemClock::new());
    let driver = Arc::new(SimulatedDriver::new());
    let service = Arc::new(PresenceService::with_clock(
        driver,
        PresenceConfig::default(),
        clock.clone(),
    ));
    service.start()?;

    let mut events = service
        .take_events()
        .ok_or_else(|| anyhow::anyhow!("event stream already taken"))?;
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            info!(?event, "presence event");
        }
    });

    service.set_advertised_name("Dm0").await?;
    service.start_advertise().await?;
    service.start_periodic_scan().await?;

    // A tracked friend, an ignored neighbour and an anonymous passer-by.
    let friend = sighting(&clock, "11:22:33:44:55:66", Some("Amy"), -48);
    let neighbour = sighting(&clock, "77:88:99:AA:BB:CC", Some("TV1"), -80);
    service.track(&friend)?;
    service.ignore(&neighbour)?;

    service.report_sighting(friend.clone());
    service.report_sighting(neighbour);
    service.report_sighting(sighting(&clock, "DE:AD:BE:EF:00:01", None, -66));
    if let Some(metres) = estimate_distance(friend.tx_power, friend.rssi) {
        info!(address = %friend.address, metres, "estimated distance");
    }

    // The friend's MAC rotates but the tag persists: merges, no new entry.
    tokio::time::sleep(Duration::from_secs(2)).await;
    service.report_sighting(sighting(&clock, "11:22:33:44:55:99", Some("Amy"), -52));
    info!(devices = service.devices().len(), "registry snapshot");

    // Radio drops out and comes back; scan and advertisement resume alone.
    service.set_radio_enabled(false).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    service.set_radio_enabled(true).await;

    // Let the periodic cycle and the staleness sweep run for a while.
    tokio::time::sleep(Duration::from_secs(20)).await;
    info!(devices = service.devices().len(), "registry after sweep");

    service.shutdown().await;
    printer.abort();
    Ok(())
}
