//! In-memory backend that records every platform call.

#![allow(dead_code)]

use async_trait::async_trait;
use ble_session::ble::{AdvertisementStream, BleBackend, GattTarget, OutboundPayload, WriteKind};
use ble_session::{DeviceId, Error, PeripheralAdvertisement, Result, ScanEvent};
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};

/// A recorded backend call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    StartScan,
    StopScan,
    Connect(DeviceId),
    Discover(DeviceId),
    Disconnect(DeviceId),
    Write {
        id: DeviceId,
        target: GattTarget,
        payload: String,
    },
}

#[derive(Default)]
pub struct FakeBackend {
    advertisements: Mutex<Vec<Result<PeripheralAdvertisement>>>,
    calls: Mutex<Vec<Call>>,
    start_gate: Mutex<Option<Arc<Notify>>>,
    connect_gate: Mutex<Option<Arc<Notify>>>,
    /// End the advertisement stream after the queued items.
    pub end_scan: AtomicBool,
    pub fail_connect: AtomicBool,
    pub fail_discover: AtomicBool,
    pub fail_disconnect: AtomicBool,
    pub fail_write: AtomicBool,
}

impl FakeBackend {
    /// Backend whose next scan yields these advertisements, then stays open.
    pub fn with_advertisements(advertisements: Vec<Result<PeripheralAdvertisement>>) -> Self {
        Self {
            advertisements: Mutex::new(advertisements),
            ..Self::default()
        }
    }

    /// Hold every `start_scan` until the returned gate is notified.
    pub fn gate_start_scan(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.start_gate.lock() = Some(gate.clone());
        gate
    }

    /// Hold every `connect` until the returned gate is notified.
    pub fn gate_connect(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.connect_gate.lock() = Some(gate.clone());
        gate
    }

    /// Wait until `call` has been recorded.
    pub async fn wait_for(&self, call: Call) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !self.calls().contains(&call) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("call was never made")
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn writes(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Write { .. }))
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }

    fn fail_if(flag: &AtomicBool, what: &str) -> Result<()> {
        if flag.load(Ordering::SeqCst) {
            Err(Error::Internal(format!("{} refused", what)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BleBackend for FakeBackend {
    async fn start_scan(&self) -> Result<AdvertisementStream> {
        self.record(Call::StartScan);
        let gate = self.start_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let items = std::mem::take(&mut *self.advertisements.lock());
        if self.end_scan.load(Ordering::SeqCst) {
            Ok(stream::iter(items).boxed())
        } else {
            Ok(stream::iter(items).chain(stream::pending()).boxed())
        }
    }

    async fn stop_scan(&self) -> Result<()> {
        self.record(Call::StopScan);
        Ok(())
    }

    async fn connect(&self, id: &DeviceId) -> Result<()> {
        self.record(Call::Connect(id.clone()));
        let gate = self.connect_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Self::fail_if(&self.fail_connect, "connect")
    }

    async fn discover_services(&self, id: &DeviceId) -> Result<()> {
        self.record(Call::Discover(id.clone()));
        Self::fail_if(&self.fail_discover, "discover")
    }

    async fn disconnect(&self, id: &DeviceId) -> Result<()> {
        self.record(Call::Disconnect(id.clone()));
        Self::fail_if(&self.fail_disconnect, "disconnect")
    }

    async fn write(
        &self,
        id: &DeviceId,
        target: GattTarget,
        payload: &OutboundPayload,
        _kind: WriteKind,
    ) -> Result<()> {
        self.record(Call::Write {
            id: id.clone(),
            target,
            payload: payload.as_base64().to_string(),
        });
        Self::fail_if(&self.fail_write, "write")
    }
}

pub fn named(id: &str, name: &str) -> PeripheralAdvertisement {
    PeripheralAdvertisement::new(id).with_local_name(name)
}

/// Receive exactly `count` scan events.
pub async fn next_events(rx: &mut broadcast::Receiver<ScanEvent>, count: usize) -> Vec<ScanEvent> {
    tokio::time::timeout(Duration::from_secs(5), async {
        let mut seen = Vec::with_capacity(count);
        while seen.len() < count {
            match rx.recv().await {
                Ok(event) => seen.push(event),
                Err(e) => panic!("scan channel closed: {}", e),
            }
        }
        seen
    })
    .await
    .expect("not enough scan events")
}

/// Collect scan events until the advertisement stream ends.
pub async fn events_until_end(rx: &mut broadcast::Receiver<ScanEvent>) -> Vec<ScanEvent> {
    tokio::time::timeout(Duration::from_secs(5), async {
        let mut seen = Vec::new();
        loop {
            match rx.recv().await {
                Ok(ScanEvent::StreamEnded) | Err(_) => return seen,
                Ok(event) => seen.push(event),
            }
        }
    })
    .await
    .expect("scan did not finish")
}
