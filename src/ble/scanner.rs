//! BLE scanning functionality.
//!
//! Provides the scan session that discovers allowed peripherals and keeps
//! the deduplicated list of candidates.

use futures::stream::StreamExt;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::ble::advertisement::{DeviceId, PeripheralAdvertisement};
use crate::ble::backend::{AdvertisementStream, BleBackend};
use crate::ble::filter::DeviceFilter;
use crate::config::DEFAULT_EVENT_CAPACITY;
use crate::error::{Error, Result};

/// Event emitted by a running scan.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    /// An allowed device was seen for the first time.
    DeviceDiscovered(PeripheralAdvertisement),
    /// A single advertisement failed; the scan keeps running.
    Error {
        /// Readable description of the failure.
        reason: String,
    },
    /// The platform advertisement stream ended. The session is idle again.
    StreamEnded,
}

/// Insertion-ordered list of discovered devices, unique by identity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceList {
    devices: Vec<PeripheralAdvertisement>,
}

impl DeviceList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the advertisement unless its identity is already listed.
    ///
    /// Existing entries are never replaced or refreshed. Returns whether the
    /// advertisement was added.
    pub fn insert_if_absent(&mut self, advertisement: PeripheralAdvertisement) -> bool {
        if self.contains(&advertisement.id) {
            return false;
        }
        self.devices.push(advertisement);
        true
    }

    /// Check whether a device is listed.
    pub fn contains(&self, id: &DeviceId) -> bool {
        self.devices.iter().any(|d| &d.id == id)
    }

    /// Look up a device by identity.
    pub fn get(&self, id: &DeviceId) -> Option<&PeripheralAdvertisement> {
        self.devices.iter().find(|d| &d.id == id)
    }

    /// Number of listed devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Iterate in discovery order.
    pub fn iter(&self) -> impl Iterator<Item = &PeripheralAdvertisement> {
        self.devices.iter()
    }

    /// Remove all devices.
    pub fn clear(&mut self) {
        self.devices.clear();
    }

    /// Copy the devices out in discovery order.
    pub fn to_vec(&self) -> Vec<PeripheralAdvertisement> {
        self.devices.clone()
    }
}

/// Lifecycle of the platform scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum ScanPhase {
    /// No platform scan.
    #[default]
    Idle,
    /// Waiting for the platform to start the scan.
    Starting,
    /// Scan running with an event loop attached.
    Scanning,
}

/// Scan bookkeeping, always updated under one lock.
#[derive(Debug, Default)]
struct ScanState {
    phase: ScanPhase,
    /// Bumped by every start and by a stop that lands while starting.
    generation: u64,
    /// Stop signal for the event loop.
    stop_tx: Option<watch::Sender<bool>>,
    /// Handle to the event loop task.
    scan_handle: Option<JoinHandle<()>>,
    /// Platform stop spawned by a release that has not been awaited yet.
    pending_release: Option<JoinHandle<()>>,
}

/// Scan session for discovering allowed peripherals.
///
/// Starting a scan spawns a task that consumes the backend's advertisement
/// stream, filters it, and appends new devices to the [`DeviceList`]. The list
/// survives [`stop`](Self::stop) and later scans; call [`clear`](Self::clear)
/// to reset it.
pub struct ScanSession {
    /// Platform backend.
    backend: Arc<dyn BleBackend>,
    /// Name filter applied to every advertisement.
    filter: DeviceFilter,
    /// Discovered devices.
    devices: Arc<RwLock<DeviceList>>,
    /// Phase, event loop and pending platform stop.
    state: Arc<Mutex<ScanState>>,
    /// Channel for scan events.
    event_tx: broadcast::Sender<ScanEvent>,
}

impl ScanSession {
    /// Create a scan session with the default event capacity.
    pub fn new(backend: Arc<dyn BleBackend>, filter: DeviceFilter) -> Self {
        Self::with_capacity(backend, filter, DEFAULT_EVENT_CAPACITY)
    }

    /// Create a scan session with a specific event channel capacity.
    pub fn with_capacity(
        backend: Arc<dyn BleBackend>,
        filter: DeviceFilter,
        capacity: usize,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(capacity.max(1));

        Self {
            backend,
            filter,
            devices: Arc::new(RwLock::new(DeviceList::new())),
            state: Arc::new(Mutex::new(ScanState::default())),
            event_tx,
        }
    }

    /// Start scanning for peripherals.
    ///
    /// The scan has no service filter. Calling this while a scan is running
    /// or starting is an error rather than a silent no-op. A platform stop
    /// left behind by a dropped [`ScanGuard`] is awaited first so it cannot
    /// cancel the new scan.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ScanAlreadyActive`] if a scan is running, the backend
    /// error if the platform scan cannot be started, and [`Error::Scan`] if
    /// [`stop`](Self::stop) was called before the platform scan came up. In
    /// that last case the platform scan is stopped again and no events are
    /// delivered.
    pub async fn start(&self) -> Result<()> {
        let (generation, pending_release) = {
            let mut state = self.state.lock();
            if state.phase != ScanPhase::Idle {
                return Err(Error::ScanAlreadyActive);
            }
            state.phase = ScanPhase::Starting;
            state.generation += 1;
            (state.generation, state.pending_release.take())
        };

        if let Some(release) = pending_release {
            let _ = release.await;
        }

        info!("Starting BLE scan");

        let events = match self.backend.start_scan().await {
            Ok(events) => events,
            Err(e) => {
                error!("Failed to start scan: {}", e);
                let mut state = self.state.lock();
                if state.generation == generation {
                    state.phase = ScanPhase::Idle;
                }
                return Err(e);
            }
        };

        {
            let mut state = self.state.lock();
            if state.generation == generation && state.phase == ScanPhase::Starting {
                let (stop_tx, stop_rx) = watch::channel(false);
                state.scan_handle = Some(tokio::spawn(Self::run_event_loop(
                    events,
                    stop_rx,
                    generation,
                    self.filter.clone(),
                    self.devices.clone(),
                    self.state.clone(),
                    self.event_tx.clone(),
                )));
                state.stop_tx = Some(stop_tx);
                state.phase = ScanPhase::Scanning;
                return Ok(());
            }
        }

        info!("Scan stopped while starting, stopping platform scan");
        drop(events);
        if let Err(e) = self.backend.stop_scan().await {
            warn!("Failed to stop cancelled scan: {}", e);
        }

        Err(Error::Scan {
            reason: "scan was stopped while starting".to_string(),
        })
    }

    /// Start scanning and return a guard that stops the scan when dropped.
    pub async fn scoped(self: &Arc<Self>) -> Result<ScanGuard> {
        self.start().await?;
        Ok(ScanGuard {
            session: self.clone(),
        })
    }

    /// Stop scanning. The device list keeps its contents.
    ///
    /// A stop that lands while the platform scan is still starting cancels
    /// that start. The session is idle afterwards even if the platform
    /// refuses to stop.
    pub async fn stop(&self) -> Result<()> {
        let (stop_tx, handle) = {
            let mut state = self.state.lock();
            let phase = state.phase;
            match phase {
                ScanPhase::Idle => {
                    debug!("Not scanning, ignoring stop request");
                    return Ok(());
                }
                ScanPhase::Starting => {
                    debug!("Scan still starting, cancelling it");
                    state.phase = ScanPhase::Idle;
                    state.generation += 1;
                    return Ok(());
                }
                ScanPhase::Scanning => {
                    state.phase = ScanPhase::Idle;
                    (state.stop_tx.take(), state.scan_handle.take())
                }
            }
        };

        info!("Stopping BLE scan");

        if let Some(tx) = stop_tx {
            let _ = tx.send(true);
        }
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        self.backend.stop_scan().await
    }

    /// Check if currently scanning.
    ///
    /// A scan that is still starting does not count.
    pub fn is_scanning(&self) -> bool {
        self.state.lock().phase == ScanPhase::Scanning
    }

    /// Snapshot of discovered devices in discovery order.
    pub fn devices(&self) -> Vec<PeripheralAdvertisement> {
        self.devices.read().to_vec()
    }

    /// Look up a discovered device.
    pub fn device(&self, id: &DeviceId) -> Option<PeripheralAdvertisement> {
        self.devices.read().get(id).cloned()
    }

    /// Number of discovered devices.
    pub fn device_count(&self) -> usize {
        self.devices.read().len()
    }

    /// Forget all discovered devices.
    pub fn clear(&self) {
        self.devices.write().clear();
    }

    /// The filter applied to advertisements.
    pub fn filter(&self) -> &DeviceFilter {
        &self.filter
    }

    /// Subscribe to scan events.
    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.event_tx.subscribe()
    }

    /// Tear down the scan without waiting, for use from `Drop`.
    ///
    /// The platform stop runs on a spawned task; the next
    /// [`start`](Self::start) waits for it.
    fn release(&self) {
        let mut state = self.state.lock();
        let phase = state.phase;
        match phase {
            ScanPhase::Idle => return,
            ScanPhase::Starting => {
                state.phase = ScanPhase::Idle;
                state.generation += 1;
                return;
            }
            ScanPhase::Scanning => state.phase = ScanPhase::Idle,
        }

        if let Some(tx) = state.stop_tx.take() {
            let _ = tx.send(true);
        }
        state.scan_handle = None;

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let backend = self.backend.clone();
                state.pending_release = Some(runtime.spawn(async move {
                    if let Err(e) = backend.stop_scan().await {
                        warn!("Failed to stop scan on release: {}", e);
                    }
                }));
            }
            Err(_) => warn!("No async runtime available, platform scan left running"),
        }
    }

    /// Consume advertisements until stopped or the stream ends.
    async fn run_event_loop(
        mut events: AdvertisementStream,
        mut stop_rx: watch::Receiver<bool>,
        generation: u64,
        filter: DeviceFilter,
        devices: Arc<RwLock<DeviceList>>,
        state: Arc<Mutex<ScanState>>,
        event_tx: broadcast::Sender<ScanEvent>,
    ) {
        loop {
            tokio::select! {
                _ = stop_rx.changed() => {
                    break;
                }
                event = events.next() => {
                    match event {
                        Some(Ok(advertisement)) => {
                            Self::handle_advertisement(advertisement, &filter, &devices, &event_tx);
                        }
                        Some(Err(e)) => {
                            warn!("Scan error: {}", e);
                            let _ = event_tx.send(ScanEvent::Error {
                                reason: e.to_string(),
                            });
                        }
                        None => {
                            debug!("Advertisement stream ended");
                            {
                                let mut state = state.lock();
                                if state.generation == generation
                                    && state.phase == ScanPhase::Scanning
                                {
                                    state.phase = ScanPhase::Idle;
                                    state.stop_tx = None;
                                    state.scan_handle = None;
                                }
                            }
                            let _ = event_tx.send(ScanEvent::StreamEnded);
                            break;
                        }
                    }
                }
            }
        }

        debug!("Scan event loop ended");
    }

    /// Filter an advertisement and record it if it is new.
    fn handle_advertisement(
        advertisement: PeripheralAdvertisement,
        filter: &DeviceFilter,
        devices: &RwLock<DeviceList>,
        event_tx: &broadcast::Sender<ScanEvent>,
    ) {
        let fragment = match filter.matching_fragment(&advertisement) {
            Some(fragment) => fragment,
            None => {
                trace!("Ignoring device {}", advertisement.id);
                return;
            }
        };

        if !devices.write().insert_if_absent(advertisement.clone()) {
            return;
        }

        info!(
            "Discovered {} ({}) matching \"{}\"",
            advertisement.id,
            advertisement.display_name().unwrap_or_default(),
            fragment
        );

        let _ = event_tx.send(ScanEvent::DeviceDiscovered(advertisement));
    }
}

impl Drop for ScanSession {
    fn drop(&mut self) {
        self.release();
    }
}

/// Keeps a scan running for as long as it is alive.
pub struct ScanGuard {
    session: Arc<ScanSession>,
}

impl ScanGuard {
    /// The guarded scan session.
    pub fn session(&self) -> &Arc<ScanSession> {
        &self.session
    }

    /// Stop the scan and wait for the platform to confirm.
    pub async fn stop(self) -> Result<()> {
        self.session.stop().await
    }
}

impl Drop for ScanGuard {
    fn drop(&mut self) {
        self.session.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::backend::MockBleBackend;
    use futures::stream;
    use pretty_assertions::assert_eq;

    fn adv(id: &str, name: &str) -> PeripheralAdvertisement {
        PeripheralAdvertisement::new(id).with_local_name(name)
    }

    fn backend_with(items: Vec<Result<PeripheralAdvertisement>>) -> MockBleBackend {
        let mut backend = MockBleBackend::new();
        let mut items = Some(items);
        backend.expect_start_scan().times(1).returning(move || {
            let items = items.take().unwrap_or_default();
            Ok(stream::iter(items).boxed())
        });
        backend.expect_stop_scan().returning(|| Ok(()));
        backend
    }

    fn idle_backend() -> MockBleBackend {
        let mut backend = MockBleBackend::new();
        backend
            .expect_start_scan()
            .times(1)
            .returning(|| Ok(stream::pending().boxed()));
        backend.expect_stop_scan().returning(|| Ok(()));
        backend
    }

    async fn drain_until_end(rx: &mut broadcast::Receiver<ScanEvent>) -> Vec<ScanEvent> {
        let mut seen = Vec::new();
        loop {
            let event = rx.recv().await.expect("scan event");
            if event == ScanEvent::StreamEnded {
                return seen;
            }
            seen.push(event);
        }
    }

    #[test]
    fn test_device_list_keeps_first_seen() {
        let mut list = DeviceList::new();
        assert!(list.insert_if_absent(adv("a", "Arduino Uno")));
        assert!(!list.insert_if_absent(adv("a", "Arduino Renamed")));
        assert!(list.insert_if_absent(adv("b", "Feather")));

        assert_eq!(list.len(), 2);
        assert_eq!(
            list.get(&DeviceId::new("a")).and_then(|d| d.local_name.clone()),
            Some("Arduino Uno".to_string())
        );
    }

    #[tokio::test]
    async fn test_scan_filters_and_deduplicates() {
        let backend = backend_with(vec![
            Ok(adv("a", "Arduino Nano")),
            Ok(adv("x", "Galaxy Buds")),
            Ok(adv("a", "Arduino Nano (again)")),
            Err(Error::Scan {
                reason: "Bluetooth powered off".to_string(),
            }),
            Ok(adv("b", "ESP32-Relay")),
        ]);
        let session = ScanSession::new(Arc::new(backend), DeviceFilter::default());
        let mut rx = session.subscribe();

        session.start().await.unwrap();
        let events = drain_until_end(&mut rx).await;

        assert_eq!(events.len(), 3);
        assert!(matches!(events[1], ScanEvent::Error { .. }));
        assert_eq!(
            session
                .devices()
                .iter()
                .map(|d| d.id.as_str().to_string())
                .collect::<Vec<_>>(),
            vec!["a", "b"]
        );
        assert_eq!(
            session.device(&DeviceId::new("a")).and_then(|d| d.local_name),
            Some("Arduino Nano".to_string())
        );
    }

    #[tokio::test]
    async fn test_start_twice_is_an_error() {
        let backend = idle_backend();
        let session = ScanSession::new(Arc::new(backend), DeviceFilter::default());

        session.start().await.unwrap();
        assert!(matches!(session.start().await, Err(Error::ScanAlreadyActive)));
        assert!(session.is_scanning());
    }

    #[tokio::test]
    async fn test_stop_keeps_devices() {
        let backend = backend_with(vec![Ok(adv("a", "Feather M0"))]);
        let session = ScanSession::new(Arc::new(backend), DeviceFilter::default());
        let mut rx = session.subscribe();

        session.start().await.unwrap();
        drain_until_end(&mut rx).await;
        session.stop().await.unwrap();

        assert!(!session.is_scanning());
        assert_eq!(session.device_count(), 1);

        session.clear();
        assert_eq!(session.device_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_noop() {
        let mut backend = MockBleBackend::new();
        backend.expect_stop_scan().times(0);
        let session = ScanSession::new(Arc::new(backend), DeviceFilter::default());

        tokio_test::assert_ok!(session.stop().await);
    }

    #[tokio::test]
    async fn test_failed_start_resets_state() {
        let mut backend = MockBleBackend::new();
        backend
            .expect_start_scan()
            .returning(|| Err(Error::BluetoothUnavailable));
        let session = ScanSession::new(Arc::new(backend), DeviceFilter::default());

        assert!(session.start().await.is_err());
        assert!(!session.is_scanning());
    }

    #[tokio::test]
    async fn test_guard_stops_scan_on_drop() {
        let session = Arc::new(ScanSession::new(
            Arc::new(idle_backend()),
            DeviceFilter::default(),
        ));

        let guard = session.scoped().await.unwrap();
        assert!(guard.session().is_scanning());
        drop(guard);

        assert!(!session.is_scanning());
    }

    #[tokio::test]
    async fn test_restart_waits_for_guard_release() {
        let mut seq = mockall::Sequence::new();
        let mut backend = MockBleBackend::new();
        backend
            .expect_start_scan()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(stream::pending().boxed()));
        backend
            .expect_stop_scan()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        backend
            .expect_start_scan()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(stream::pending().boxed()));
        backend
            .expect_stop_scan()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        let session = Arc::new(ScanSession::new(Arc::new(backend), DeviceFilter::default()));

        drop(session.scoped().await.unwrap());
        session.start().await.unwrap();

        assert!(session.is_scanning());
        session.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stream_end_returns_to_idle() {
        let mut backend = MockBleBackend::new();
        backend
            .expect_start_scan()
            .times(2)
            .returning(|| Ok(stream::empty().boxed()));
        backend.expect_stop_scan().returning(|| Ok(()));
        let session = ScanSession::new(Arc::new(backend), DeviceFilter::default());
        let mut rx = session.subscribe();

        session.start().await.unwrap();
        drain_until_end(&mut rx).await;

        assert!(!session.is_scanning());
        tokio_test::assert_ok!(session.stop().await);
        tokio_test::assert_ok!(session.start().await);
    }

    #[tokio::test]
    async fn test_stop_clears_state_when_platform_refuses() {
        let mut backend = MockBleBackend::new();
        backend
            .expect_start_scan()
            .times(2)
            .returning(|| Ok(stream::pending().boxed()));
        backend
            .expect_stop_scan()
            .times(1..)
            .returning(|| Err(Error::BluetoothUnavailable));
        let session = ScanSession::new(Arc::new(backend), DeviceFilter::default());

        session.start().await.unwrap();
        assert!(matches!(session.stop().await, Err(Error::BluetoothUnavailable)));

        assert!(!session.is_scanning());
        tokio_test::assert_ok!(session.start().await);
    }
}
