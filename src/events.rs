//! Presence event stream
//!
//! One enumeration covers everything the core reports outward; the embedding
//! layer (UI, service glue) consumes it through a single channel.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::advertise::AdState;
use crate::registry::Sighting;
use crate::scan::ScanState;

/// Events emitted by the presence core.
///
/// Device-lifecycle events carry the sighting that triggered them so a
/// consumer can render the device list without querying back.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PresenceEvent {
    /// Scan state machine moved to a new state.
    ScanStatusChanged { state: ScanState },
    /// Advertise state machine moved to a new state.
    AdStatusChanged { state: AdState },
    /// The driver reported a scan failure; scanning has stopped and will not
    /// retry on its own.
    ScanFailed,
    /// The driver reported an advertise failure; advertising has stopped and
    /// will not retry on its own.
    AdFailed,
    /// A device with neither a tracked nor a decodable-new identity entered
    /// the registry.
    ResultAdded { sighting: Sighting },
    /// A sighting merged into an existing registry entry.
    ResultUpdated { sighting: Sighting },
    /// An untracked entry went stale and was evicted.
    ResultRemoved { sighting: Sighting },
    /// First sighting of a device whose tag is neither tracked nor ignored.
    NewDeviceDetected { sighting: Sighting },
    /// A tracked device reappeared after being absent from the registry.
    TrackedDeviceReconnected { sighting: Sighting },
    /// A tracked device went stale and was evicted.
    TrackedDeviceDisconnected { sighting: Sighting },
}

/// Fire-and-forget sender side of the event stream.
///
/// Emission never blocks: the channel is unbounded and a dropped subscriber
/// only costs a trace log, so components may emit while holding their state
/// lock without risking deadlock on a slow consumer.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<PresenceEvent>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<PresenceEvent>) -> Self {
        Self { tx }
    }

    /// Create a sink together with its receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PresenceEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn emit(&self, event: PresenceEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("presence event dropped: no subscriber");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::AdvertisedName;

    fn sighting() -> Sighting {
        Sighting {
            address: "AA:BB:CC:DD:EE:FF".to_owned(),
            name: AdvertisedName::parse("Ab9").ok(),
            rssi: -60,
            tx_power: Some(-10),
            timestamp_millis: 1_000,
        }
    }

    #[test]
    fn emit_without_subscriber_is_harmless() {
        let (sink, rx) = EventSink::channel();
        drop(rx);
        sink.emit(PresenceEvent::ScanFailed);
    }

    #[test]
    fn events_serialize_with_tag() {
        let json = serde_json::to_value(PresenceEvent::NewDeviceDetected {
            sighting: sighting(),
        })
        .unwrap();
        assert_eq!(json["event"], "new_device_detected");
        assert_eq!(json["sighting"]["name"], "Ab9");
        assert_eq!(json["sighting"]["rssi"], -60);
    }
}
