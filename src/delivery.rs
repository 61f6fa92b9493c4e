//! # Result Delivery Module
//!
//! Routes discovery results from the radio to subscribers.
//!
//! ## Flow
//! radio task → `DeliveryTarget::deliver` → unbounded queue → dispatcher
//! thread → every registered `DiscoverySubscriber`
//!
//! `deliver` only enqueues, so the radio is never held up by a slow
//! subscriber. Results can keep arriving after a session was stopped;
//! they are forwarded like any other and say nothing about whether a
//! session is still running.

use crate::error::DeliveryError;
use chrono::{DateTime, Local};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::thread;

/// Request code of the default delivery target
pub const DEFAULT_DELIVERY_TARGET_ID: u32 = 9;

/// Advertisement as reported by the radio, before validation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawAdvertisement {
    pub device_id: Option<String>,
    pub address: Option<String>,
    pub local_name: Option<String>,
    pub rssi: Option<i16>,
    pub manufacturer_data: HashMap<u16, Vec<u8>>,
    pub services: Vec<String>,
}

/// What the radio hands to a delivery target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryPayload {
    Single(RawAdvertisement),
    Batch(Vec<RawAdvertisement>),
}

/// A validated discovery result
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryEvent {
    pub device_id: String,
    pub address: Option<String>,
    pub local_name: Option<String>,
    pub rssi: Option<i16>,
    /// Raw advertisement metadata, left unparsed
    pub manufacturer_data: HashMap<u16, Vec<u8>>,
    pub services: Vec<String>,
    pub received_at: DateTime<Local>,
}

impl DiscoveryEvent {
    /// Name to show in lists, falling back to the identifier
    pub fn display_name(&self) -> &str {
        self.local_name.as_deref().unwrap_or(&self.device_id)
    }
}

impl TryFrom<RawAdvertisement> for DiscoveryEvent {
    type Error = DeliveryError;

    fn try_from(raw: RawAdvertisement) -> Result<Self, Self::Error> {
        let device_id = raw
            .device_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| DeliveryError::MalformedPayload("missing device identifier".to_string()))?;

        Ok(DiscoveryEvent {
            device_id,
            address: raw.address,
            local_name: raw.local_name,
            rssi: raw.rssi,
            manufacturer_data: raw.manufacturer_data,
            services: raw.services,
            received_at: Local::now(),
        })
    }
}

impl DeliveryPayload {
    /// Splits the payload into events, one result per record
    pub fn into_events(self) -> Vec<Result<DiscoveryEvent, DeliveryError>> {
        match self {
            DeliveryPayload::Single(raw) => vec![DiscoveryEvent::try_from(raw)],
            DeliveryPayload::Batch(records) if records.is_empty() => {
                vec![Err(DeliveryError::MalformedPayload("empty result batch".to_string()))]
            }
            DeliveryPayload::Batch(records) => {
                records.into_iter().map(DiscoveryEvent::try_from).collect()
            }
        }
    }
}

/// Receives discovery events on the dispatcher thread
pub trait DiscoverySubscriber: Send {
    fn on_discovery(&self, event: &DiscoveryEvent);
}

/// Forwards events into a channel, e.g. towards the UI thread
impl DiscoverySubscriber for Sender<DiscoveryEvent> {
    fn on_discovery(&self, event: &DiscoveryEvent) {
        if let Err(e) = self.send(event.clone()) {
            log::debug!("Discovery subscriber went away: {}", e);
        }
    }
}

/// Logs every discovery event
pub struct LogSubscriber;

impl DiscoverySubscriber for LogSubscriber {
    fn on_discovery(&self, event: &DiscoveryEvent) {
        log::info!(
            "Discovered {} [{}] address={:?} rssi={:?} services={:?} manufacturer_data={:?}",
            event.display_name(),
            event.device_id,
            event.address,
            event.rssi,
            event.services,
            event.manufacturer_data
        );
    }
}

enum Envelope {
    Payload(DeliveryPayload),
    Shutdown,
}

/// Handle the radio uses to route results back.
///
/// Targets compare equal by id, so the same target can be named again to
/// stop the session it started.
#[derive(Clone)]
pub struct DeliveryTarget {
    id: u32,
    sender: Sender<Envelope>,
}

impl DeliveryTarget {
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Enqueues a payload for the dispatcher. Never blocks.
    pub fn deliver(&self, payload: DeliveryPayload) {
        if self.sender.send(Envelope::Payload(payload)).is_err() {
            log::debug!("Delivery target {} is closed, dropping payload", self.id);
        }
    }
}

impl PartialEq for DeliveryTarget {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for DeliveryTarget {}

impl fmt::Debug for DeliveryTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryTarget").field("id", &self.id).finish()
    }
}

type Subscribers = Arc<Mutex<Vec<Box<dyn DiscoverySubscriber>>>>;

/// Owns the dispatcher thread and the subscriber list
pub struct ResultDeliveryChannel {
    target: DeliveryTarget,
    subscribers: Subscribers,
    dispatcher: Option<thread::JoinHandle<()>>,
}

impl ResultDeliveryChannel {
    /// Creates the channel and starts its dispatcher thread
    pub fn new(target_id: u32) -> Self {
        let (sender, receiver) = unbounded();
        let subscribers: Subscribers = Arc::new(Mutex::new(Vec::new()));

        let subscribers_for_thread = subscribers.clone();
        let dispatcher = thread::Builder::new()
            .name(format!("delivery-{}", target_id))
            .spawn(move || Self::dispatch_loop(receiver, subscribers_for_thread))
            .map_err(|e| log::error!("Failed to spawn delivery thread: {}", e))
            .ok();

        Self {
            target: DeliveryTarget { id: target_id, sender },
            subscribers,
            dispatcher,
        }
    }

    /// The target to hand to the radio
    pub fn target(&self) -> DeliveryTarget {
        self.target.clone()
    }

    pub fn register(&self, subscriber: impl DiscoverySubscriber + 'static) {
        match self.subscribers.lock() {
            Ok(mut subscribers) => subscribers.push(Box::new(subscriber)),
            Err(poisoned) => poisoned.into_inner().push(Box::new(subscriber)),
        }
    }

    fn dispatch_loop(receiver: Receiver<Envelope>, subscribers: Subscribers) {
        loop {
            match receiver.recv() {
                Ok(Envelope::Payload(payload)) => {
                    for result in payload.into_events() {
                        match result {
                            Ok(event) => Self::forward(&subscribers, &event),
                            Err(e) => log::warn!("Discarding discovery result: {}", e),
                        }
                    }
                }
                Ok(Envelope::Shutdown) => {
                    log::debug!("Delivery dispatcher stopped");
                    break;
                }
                Err(_) => {
                    log::debug!("Delivery dispatcher: channel closed");
                    break;
                }
            }
        }
    }

    fn forward(subscribers: &Subscribers, event: &DiscoveryEvent) {
        let subscribers = subscribers.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        for subscriber in subscribers.iter() {
            subscriber.on_discovery(event);
        }
    }
}

impl Drop for ResultDeliveryChannel {
    fn drop(&mut self) {
        // Payloads queued before this point are still dispatched
        let _ = self.target.sender.send(Envelope::Shutdown);

        if let Some(handle) = self.dispatcher.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn advertisement(id: &str, name: &str) -> RawAdvertisement {
        RawAdvertisement {
            device_id: Some(id.to_string()),
            local_name: Some(name.to_string()),
            rssi: Some(-60),
            ..Default::default()
        }
    }

    #[test]
    fn test_single_event_reaches_all_subscribers() {
        let channel = ResultDeliveryChannel::new(DEFAULT_DELIVERY_TARGET_ID);
        let (first_tx, first_rx) = unbounded();
        let (second_tx, second_rx) = unbounded();
        channel.register(first_tx);
        channel.register(second_tx);

        channel
            .target()
            .deliver(DeliveryPayload::Single(advertisement("AA:BB", "Feather nRF52840 Express")));

        let event = first_rx.recv_timeout(Duration::from_secs(1)).expect("first subscriber");
        assert_eq!(event.device_id, "AA:BB");
        assert_eq!(event.display_name(), "Feather nRF52840 Express");
        assert!(second_rx.recv_timeout(Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn test_batch_is_split_into_events() {
        let channel = ResultDeliveryChannel::new(DEFAULT_DELIVERY_TARGET_ID);
        let (tx, rx) = unbounded();
        channel.register(tx);

        channel.target().deliver(DeliveryPayload::Batch(vec![
            advertisement("one", "a"),
            advertisement("two", "b"),
        ]));

        let first = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        let second = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(first.device_id, "one");
        assert_eq!(second.device_id, "two");
    }

    #[test]
    fn test_malformed_records_are_discarded() {
        let channel = ResultDeliveryChannel::new(DEFAULT_DELIVERY_TARGET_ID);
        let (tx, rx) = unbounded();
        channel.register(tx);
        let target = channel.target();

        target.deliver(DeliveryPayload::Single(RawAdvertisement::default()));
        target.deliver(DeliveryPayload::Batch(Vec::new()));
        target.deliver(DeliveryPayload::Batch(vec![
            RawAdvertisement {
                device_id: Some(String::new()),
                ..Default::default()
            },
            advertisement("good", "g"),
        ]));

        let event = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(event.device_id, "good");
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_into_events_reports_malformed() {
        let results = DeliveryPayload::Batch(Vec::new()).into_events();
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(DeliveryError::MalformedPayload(_))));
    }

    #[test]
    fn test_deliver_after_drop_does_not_panic() {
        let channel = ResultDeliveryChannel::new(DEFAULT_DELIVERY_TARGET_ID);
        let target = channel.target();
        drop(channel);
        target.deliver(DeliveryPayload::Single(advertisement("late", "late")));
    }

    #[test]
    fn test_targets_compare_by_id() {
        let channel = ResultDeliveryChannel::new(3);
        assert_eq!(channel.target(), channel.target());
        assert_eq!(channel.target().id(), 3);
    }
}
