//! btleplug implementation of the platform backend.

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CentralState, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::StreamExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, trace};

use crate::ble::advertisement::{DeviceId, PeripheralAdvertisement};
use crate::ble::backend::{AdvertisementStream, BleBackend, WriteKind};
use crate::ble::uuids::GattTarget;
use crate::ble::writer::OutboundPayload;
use crate::error::{Error, Result};

type PeripheralCache = Arc<RwLock<HashMap<DeviceId, Peripheral>>>;

/// Backend driving the first Bluetooth adapter through btleplug.
pub struct BtleplugBackend {
    /// The BLE adapter.
    adapter: Adapter,
    /// Peripherals seen while scanning, by identity.
    peripherals: PeripheralCache,
}

impl BtleplugBackend {
    /// Create a backend on the first available adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self::with_adapter(adapter))
    }

    /// Create a backend with a specific adapter.
    pub fn with_adapter(adapter: Adapter) -> Self {
        Self {
            adapter,
            peripherals: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Get the underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// Resolve a device id to a peripheral, asking the adapter on a cache miss.
    async fn peripheral(&self, id: &DeviceId) -> Result<Peripheral> {
        let cached = self.peripherals.read().get(id).cloned();
        if let Some(peripheral) = cached {
            return Ok(peripheral);
        }

        for peripheral in self.adapter.peripherals().await? {
            if peripheral.id().to_string() == id.as_str() {
                self.peripherals
                    .write()
                    .insert(id.clone(), peripheral.clone());
                return Ok(peripheral);
            }
        }

        Err(Error::DeviceNotFound {
            identifier: id.to_string(),
        })
    }

    /// Turn a central event into an advertisement, a scan error, or nothing.
    async fn translate_event(
        event: CentralEvent,
        adapter: &Adapter,
        peripherals: &PeripheralCache,
    ) -> Option<Result<PeripheralAdvertisement>> {
        match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                trace!("Advertisement from {:?}", id);
                Self::advertisement_for(id, adapter, peripherals).await
            }
            CentralEvent::StateUpdate(CentralState::PoweredOff) => Some(Err(Error::Scan {
                reason: "Bluetooth adapter powered off".to_string(),
            })),
            other => {
                trace!("Ignoring central event: {:?}", other);
                None
            }
        }
    }

    async fn advertisement_for(
        id: PeripheralId,
        adapter: &Adapter,
        peripherals: &PeripheralCache,
    ) -> Option<Result<PeripheralAdvertisement>> {
        let peripheral = match adapter.peripheral(&id).await {
            Ok(p) => p,
            Err(e) => {
                return Some(Err(Error::Scan {
                    reason: e.to_string(),
                }))
            }
        };

        let properties = match peripheral.properties().await {
            Ok(Some(p)) => p,
            Ok(None) => return None,
            Err(e) => {
                return Some(Err(Error::Scan {
                    reason: e.to_string(),
                }))
            }
        };

        let device_id = DeviceId::new(id.to_string());
        peripherals.write().insert(device_id.clone(), peripheral);

        let mut advertisement = PeripheralAdvertisement::new(device_id);
        advertisement.local_name = properties.local_name;
        advertisement.rssi = properties.rssi;

        Some(Ok(advertisement))
    }
}

#[async_trait]
impl BleBackend for BtleplugBackend {
    async fn start_scan(&self) -> Result<AdvertisementStream> {
        let events = self.adapter.events().await?;

        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| Error::Scan {
                reason: e.to_string(),
            })?;

        let adapter = self.adapter.clone();
        let peripherals = self.peripherals.clone();

        let stream = events.filter_map(move |event| {
            let adapter = adapter.clone();
            let peripherals = peripherals.clone();
            async move { Self::translate_event(event, &adapter, &peripherals).await }
        });

        Ok(stream.boxed())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.adapter.stop_scan().await?;
        Ok(())
    }

    async fn connect(&self, id: &DeviceId) -> Result<()> {
        let peripheral = self.peripheral(id).await?;
        peripheral.connect().await?;
        debug!("Link up to {}", id);
        Ok(())
    }

    async fn discover_services(&self, id: &DeviceId) -> Result<()> {
        let peripheral = self.peripheral(id).await?;
        peripheral.discover_services().await?;
        debug!(
            "Discovered {} characteristics on {}",
            peripheral.characteristics().len(),
            id
        );
        Ok(())
    }

    async fn disconnect(&self, id: &DeviceId) -> Result<()> {
        let peripheral = self.peripheral(id).await?;
        peripheral.disconnect().await?;
        Ok(())
    }

    async fn write(
        &self,
        id: &DeviceId,
        target: GattTarget,
        payload: &OutboundPayload,
        kind: WriteKind,
    ) -> Result<()> {
        let peripheral = self.peripheral(id).await?;

        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.service_uuid == target.service && c.uuid == target.characteristic)
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: target.characteristic.to_string(),
            })?;

        let data = payload.decode()?;

        let write_type = match kind {
            WriteKind::WithResponse => WriteType::WithResponse,
            WriteKind::WithoutResponse => WriteType::WithoutResponse,
        };

        peripheral
            .write(&characteristic, &data, write_type)
            .await
            .map_err(Error::Bluetooth)?;

        trace!("Wrote {} bytes to {} on {}", data.len(), target, id);

        Ok(())
    }
}
