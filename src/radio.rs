//! # Radio Module
//!
//! The Bluetooth adapter seen from the scan session controller.
//!
//! ## Key Components
//! - `Radio`: start/stop discovery towards a delivery target
//! - `ScanFilter` / `ScanSettings`: what to report and how
//! - `BtleRadio`: btleplug implementation, one tokio task per session
//!
//! ## Sessions
//! Starting returns as soon as the discovery task is spawned. The task
//! watches the adapter's event stream, keeps advertisements matching the
//! filters and hands them to the delivery target. Stopping sets the
//! session's stop flag; anything already batched is still delivered.
//! A restarted session waits for the stopped one to switch the adapter's
//! scan off before switching it back on.

use crate::delivery::{DeliveryPayload, DeliveryTarget, RawAdvertisement};
use crate::error::ScanError;
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _};
use btleplug::platform::{Adapter, Manager, PeripheralId};
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// How often a discovery task checks its stop flag and pending batch
const SESSION_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Criterion limiting which peripherals are reported
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanFilter {
    /// Exact advertised local name
    pub device_name: Option<String>,
}

impl ScanFilter {
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            device_name: Some(name.into()),
        }
    }

    pub fn matches(&self, local_name: Option<&str>) -> bool {
        match &self.device_name {
            Some(expected) => local_name == Some(expected.as_str()),
            None => true,
        }
    }
}

/// Whether an advertisement passes a filter list; an empty list passes all
pub fn passes_filters(filters: &[ScanFilter], local_name: Option<&str>) -> bool {
    filters.is_empty() || filters.iter().any(|filter| filter.matches(local_name))
}

/// Power/latency trade-off requested from the radio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScanMode {
    LowPower,
    Balanced,
    LowLatency,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSettings {
    pub mode: ScanMode,
    /// Zero delivers every result on its own, otherwise results are batched
    pub report_delay: Duration,
}

impl ScanSettings {
    pub fn low_power() -> Self {
        Self {
            mode: ScanMode::LowPower,
            report_delay: Duration::ZERO,
        }
    }
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self::low_power()
    }
}

/// The Bluetooth adapter as the controller drives it.
///
/// Only the scan session controller holds a `Radio`.
pub trait Radio {
    /// Starts a discovery session routing results to `target`.
    ///
    /// Fails immediately only when the radio cannot scan at all.
    fn start_discovery(
        &mut self,
        filters: &[ScanFilter],
        settings: &ScanSettings,
        target: DeliveryTarget,
    ) -> Result<(), ScanError>;

    /// Stops the session started for `target`
    fn stop_discovery(&mut self, target: &DeliveryTarget);
}

/// Adapter-wide scan switch.
///
/// Stopping affects every session on the adapter, so a new session may only
/// switch scanning on after the previous one has switched it off.
pub trait ScanSwitch: Clone + Send + Sync + 'static {
    fn start_scan(&self) -> BoxFuture<'_, Result<(), btleplug::Error>>;
    fn stop_scan(&self) -> BoxFuture<'_, Result<(), btleplug::Error>>;
}

impl ScanSwitch for Adapter {
    fn start_scan(&self) -> BoxFuture<'_, Result<(), btleplug::Error>> {
        // Name filtering happens in the session, btleplug only filters by service
        Central::start_scan(self, btleplug::api::ScanFilter::default()).boxed()
    }

    fn stop_scan(&self) -> BoxFuture<'_, Result<(), btleplug::Error>> {
        Central::stop_scan(self).boxed()
    }
}

struct Session {
    should_stop: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// Discovery tasks, running or winding down
#[derive(Default)]
struct Sessions {
    running: HashMap<u32, Session>,
    // Stopped tasks that may not have switched the scan off yet
    stopping: Vec<JoinHandle<()>>,
}

impl Sessions {
    fn is_running(&self, id: u32) -> bool {
        self.running.contains_key(&id)
    }

    /// Spawns a session that waits for every stopped session to finish,
    /// switches scanning on, runs `body` until it sees the stop flag and
    /// switches scanning off again.
    fn spawn<S, F, Fut>(&mut self, runtime: &Handle, id: u32, switch: S, body: F)
    where
        S: ScanSwitch,
        F: FnOnce(Arc<AtomicBool>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let should_stop = Arc::new(AtomicBool::new(false));
        let previous = std::mem::take(&mut self.stopping);
        let flag = should_stop.clone();

        let task = runtime.spawn(async move {
            for handle in previous {
                if let Err(e) = handle.await {
                    log::warn!("Previous discovery task ended abnormally: {}", e);
                }
            }

            if let Err(e) = switch.start_scan().await {
                log::error!("Failed to start scan for target {}: {}", id, e);
                return;
            }

            body(flag).await;

            if let Err(e) = switch.stop_scan().await {
                log::error!("Failed to stop scan for target {}: {}", id, e);
            }
        });

        self.running.insert(id, Session { should_stop, task });
    }

    /// Flags the session to stop; false if none was running for `id`
    fn stop(&mut self, id: u32) -> bool {
        let Some(session) = self.running.remove(&id) else {
            return false;
        };
        session.should_stop.store(true, Ordering::Relaxed);
        self.stopping.retain(|handle| !handle.is_finished());
        self.stopping.push(session.task);
        true
    }
}

/// btleplug-backed radio running discovery on a tokio runtime
pub struct BtleRadio {
    runtime: Handle,
    backend: Option<(Manager, Adapter)>,
    sessions: Sessions,
}

impl BtleRadio {
    /// Opens the first Bluetooth adapter.
    ///
    /// A missing adapter is not fatal: the radio is created anyway and every
    /// start reports `RadioUnavailable`. Must be called outside the runtime.
    pub fn open(runtime: Handle) -> Self {
        let backend = match runtime.block_on(Self::find_adapter()) {
            Ok(backend) => Some(backend),
            Err(e) => {
                log::error!("{}", e);
                None
            }
        };

        Self {
            runtime,
            backend,
            sessions: Sessions::default(),
        }
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_some()
    }

    async fn find_adapter() -> Result<(Manager, Adapter), ScanError> {
        let manager = Manager::new()
            .await
            .map_err(|e| ScanError::RadioUnavailable(format!("Failed to create BLE manager: {}", e)))?;

        let adapters = manager
            .adapters()
            .await
            .map_err(|e| ScanError::RadioUnavailable(format!("Failed to get adapters: {}", e)))?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or_else(|| ScanError::RadioUnavailable("No Bluetooth adapter found".to_string()))?;

        Ok((manager, adapter))
    }
}

impl Radio for BtleRadio {
    fn start_discovery(
        &mut self,
        filters: &[ScanFilter],
        settings: &ScanSettings,
        target: DeliveryTarget,
    ) -> Result<(), ScanError> {
        let adapter = match &self.backend {
            Some((_, adapter)) => adapter.clone(),
            None => {
                return Err(ScanError::RadioUnavailable(
                    "No Bluetooth adapter found".to_string(),
                ))
            }
        };

        if self.sessions.is_running(target.id()) {
            return Err(ScanError::AlreadyScanning);
        }

        log::info!(
            "Started scan for target {} ({:?}, filters: {:?})",
            target.id(),
            settings.mode,
            filters
        );

        let id = target.id();
        let filters = filters.to_vec();
        let settings = settings.clone();
        let events_adapter = adapter.clone();
        self.sessions.spawn(&self.runtime, id, adapter, move |should_stop| async move {
            if let Err(e) = watch_advertisements(events_adapter, filters, settings, target, should_stop).await {
                log::error!("Discovery session failed: {}", e);
            }
        });

        Ok(())
    }

    fn stop_discovery(&mut self, target: &DeliveryTarget) {
        if self.sessions.stop(target.id()) {
            log::info!("Stopped scan for target {}.", target.id());
        } else {
            log::warn!("No scan running for target {}", target.id());
        }
    }
}

/// Groups results according to `ScanSettings::report_delay`
struct ReportBatcher {
    delay: Duration,
    pending: Vec<RawAdvertisement>,
    last_flush: Instant,
}

impl ReportBatcher {
    fn new(delay: Duration, now: Instant) -> Self {
        Self {
            delay,
            pending: Vec::new(),
            last_flush: now,
        }
    }

    /// Returns the payload to deliver right away when batching is off
    fn push(&mut self, raw: RawAdvertisement) -> Option<DeliveryPayload> {
        if self.delay.is_zero() {
            return Some(DeliveryPayload::Single(raw));
        }
        self.pending.push(raw);
        None
    }

    /// Releases the pending batch once `delay` has passed since the last flush
    fn poll_flush(&mut self, now: Instant) -> Option<DeliveryPayload> {
        if self.pending.is_empty() || now.saturating_duration_since(self.last_flush) < self.delay {
            return None;
        }
        self.last_flush = now;
        Some(DeliveryPayload::Batch(std::mem::take(&mut self.pending)))
    }

    /// Whatever is still pending when the session ends
    fn finish(self) -> Option<DeliveryPayload> {
        (!self.pending.is_empty()).then_some(DeliveryPayload::Batch(self.pending))
    }
}

async fn watch_advertisements(
    adapter: Adapter,
    filters: Vec<ScanFilter>,
    settings: ScanSettings,
    target: DeliveryTarget,
    should_stop: Arc<AtomicBool>,
) -> Result<(), btleplug::Error> {
    let mut events = adapter.events().await?;
    let mut batcher = ReportBatcher::new(settings.report_delay, Instant::now());
    let mut ticker = tokio::time::interval(SESSION_POLL_INTERVAL);

    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(CentralEvent::DeviceDiscovered(id)) | Some(CentralEvent::DeviceUpdated(id)) => {
                    let Some(raw) = read_advertisement(&adapter, &id).await else {
                        continue;
                    };
                    if !passes_filters(&filters, raw.local_name.as_deref()) {
                        log::debug!("Skipping {:?} ({:?})", raw.device_id, raw.local_name);
                        continue;
                    }
                    if let Some(payload) = batcher.push(raw) {
                        target.deliver(payload);
                    }
                }
                Some(_) => {}
                None => {
                    log::info!("Bluetooth event stream has ended.");
                    break;
                }
            },
            _ = ticker.tick() => {
                if should_stop.load(Ordering::Relaxed) {
                    break;
                }
                if let Some(payload) = batcher.poll_flush(Instant::now()) {
                    target.deliver(payload);
                }
            }
        }
    }

    if let Some(payload) = batcher.finish() {
        target.deliver(payload);
    }
    Ok(())
}

async fn read_advertisement(adapter: &Adapter, id: &PeripheralId) -> Option<RawAdvertisement> {
    let peripheral = match adapter.peripheral(id).await {
        Ok(peripheral) => peripheral,
        Err(e) => {
            log::debug!("Peripheral {:?} vanished: {}", id, e);
            return None;
        }
    };

    let properties = peripheral.properties().await.ok().flatten()?;
    let address = properties.address.to_string();

    Some(RawAdvertisement {
        device_id: Some(address.clone()),
        address: Some(address),
        local_name: properties.local_name,
        rssi: properties.rssi,
        manufacturer_data: properties.manufacturer_data,
        services: properties.services.iter().map(|uuid| uuid.to_string()).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::{ResultDeliveryChannel, DEFAULT_DELIVERY_TARGET_ID};

    #[test]
    fn test_name_filter_is_exact() {
        let filter = ScanFilter::by_name("Feather nRF52840 Express");
        assert!(filter.matches(Some("Feather nRF52840 Express")));
        assert!(!filter.matches(Some("Feather")));
        assert!(!filter.matches(None));
    }

    #[test]
    fn test_empty_filter_list_passes_everything() {
        assert!(passes_filters(&[], None));
        assert!(passes_filters(&[], Some("anything")));

        let filters = vec![ScanFilter::by_name("a"), ScanFilter::by_name("b")];
        assert!(passes_filters(&filters, Some("b")));
        assert!(!passes_filters(&filters, Some("c")));
    }

    #[test]
    fn test_default_settings_are_low_power() {
        let settings = ScanSettings::default();
        assert_eq!(settings.mode, ScanMode::LowPower);
        assert!(settings.report_delay.is_zero());
    }

    fn advertisement(id: &str) -> RawAdvertisement {
        RawAdvertisement {
            device_id: Some(id.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_zero_delay_reports_each_result() {
        let now = Instant::now();
        let mut batcher = ReportBatcher::new(Duration::ZERO, now);

        assert_eq!(
            batcher.push(advertisement("one")),
            Some(DeliveryPayload::Single(advertisement("one")))
        );
        assert_eq!(batcher.poll_flush(now + Duration::from_secs(1)), None);
        assert_eq!(batcher.finish(), None);
    }

    #[test]
    fn test_batch_waits_for_report_delay() {
        let start = Instant::now();
        let delay = Duration::from_millis(500);
        let mut batcher = ReportBatcher::new(delay, start);

        assert_eq!(batcher.push(advertisement("one")), None);
        assert_eq!(batcher.push(advertisement("two")), None);
        assert_eq!(batcher.poll_flush(start + Duration::from_millis(200)), None);

        let flushed_at = start + delay;
        assert_eq!(
            batcher.poll_flush(flushed_at),
            Some(DeliveryPayload::Batch(vec![advertisement("one"), advertisement("two")]))
        );

        // The next batch is timed from the last flush
        assert_eq!(batcher.push(advertisement("three")), None);
        assert_eq!(batcher.poll_flush(flushed_at + Duration::from_millis(499)), None);
        assert_eq!(
            batcher.poll_flush(flushed_at + delay),
            Some(DeliveryPayload::Batch(vec![advertisement("three")]))
        );
    }

    #[test]
    fn test_empty_batch_is_never_flushed() {
        let start = Instant::now();
        let mut batcher = ReportBatcher::new(Duration::from_millis(10), start);
        assert_eq!(batcher.poll_flush(start + Duration::from_secs(5)), None);
        assert_eq!(batcher.finish(), None);
    }

    #[test]
    fn test_finish_flushes_leftovers() {
        let start = Instant::now();
        let mut batcher = ReportBatcher::new(Duration::from_secs(10), start);
        batcher.push(advertisement("late"));

        assert_eq!(
            batcher.finish(),
            Some(DeliveryPayload::Batch(vec![advertisement("late")]))
        );
    }

    /// Records scan on/off calls in order
    #[derive(Clone, Default)]
    struct RecordingSwitch {
        calls: Arc<std::sync::Mutex<Vec<&'static str>>>,
    }

    impl RecordingSwitch {
        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }

        fn wait_for_calls(&self, count: usize) {
            let deadline = Instant::now() + Duration::from_secs(2);
            while self.calls().len() < count && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(5));
            }
        }
    }

    impl ScanSwitch for RecordingSwitch {
        fn start_scan(&self) -> BoxFuture<'_, Result<(), btleplug::Error>> {
            self.calls.lock().unwrap().push("start");
            futures::future::ready(Ok(())).boxed()
        }

        fn stop_scan(&self) -> BoxFuture<'_, Result<(), btleplug::Error>> {
            self.calls.lock().unwrap().push("stop");
            futures::future::ready(Ok(())).boxed()
        }
    }

    async fn wait_for_stop(should_stop: Arc<AtomicBool>) {
        while !should_stop.load(Ordering::Relaxed) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[test]
    fn test_restart_waits_for_previous_session_to_stop() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let switch = RecordingSwitch::default();
        let mut sessions = Sessions::default();

        // Notices its stop flag well after the next session was requested
        sessions.spawn(runtime.handle(), 9, switch.clone(), |should_stop| async move {
            wait_for_stop(should_stop).await;
            tokio::time::sleep(Duration::from_millis(200)).await;
        });
        switch.wait_for_calls(1);

        assert!(sessions.stop(9));
        sessions.spawn(runtime.handle(), 9, switch.clone(), wait_for_stop);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(switch.calls(), vec!["start"]);

        switch.wait_for_calls(3);
        assert_eq!(switch.calls(), vec!["start", "stop", "start"]);
        assert!(sessions.is_running(9));

        assert!(sessions.stop(9));
        switch.wait_for_calls(4);
        assert_eq!(switch.calls(), vec!["start", "stop", "start", "stop"]);
    }

    #[test]
    fn test_stopping_unknown_session_is_noop() {
        let mut sessions = Sessions::default();
        assert!(!sessions.stop(9));
        assert!(!sessions.is_running(9));
    }

    #[test]
    fn test_missing_adapter_fails_immediately() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let mut radio = BtleRadio {
            runtime: runtime.handle().clone(),
            backend: None,
            sessions: Sessions::default(),
        };
        let channel = ResultDeliveryChannel::new(DEFAULT_DELIVERY_TARGET_ID);

        let result = radio.start_discovery(&[], &ScanSettings::default(), channel.target());
        assert!(matches!(result, Err(ScanError::RadioUnavailable(_))));
        assert!(!radio.is_available());

        // Stopping an unknown session is a no-op
        radio.stop_discovery(&channel.target());
    }
}
