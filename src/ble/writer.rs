//! Outbound characteristic writes.
//!
//! Payloads travel to the platform as base64 text of their UTF-8 bytes; the
//! backend decodes them back to raw bytes right before the GATT write.

use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{error, trace};

use crate::ble::advertisement::DeviceId;
use crate::ble::backend::{BleBackend, WriteKind};
use crate::ble::connection::ConnectionSession;
use crate::ble::uuids::GattTarget;
use crate::config::RetryPolicy;
use crate::error::{Error, Result};

/// A payload encoded for transmission.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OutboundPayload(String);

impl OutboundPayload {
    /// Encode a string as base64 text of its UTF-8 bytes.
    pub fn encode(text: &str) -> Self {
        Self(BASE64_STANDARD.encode(text.as_bytes()))
    }

    /// Wrap text that is already base64.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPayload`] if the text is not valid base64.
    pub fn from_base64(encoded: impl Into<String>) -> Result<Self> {
        let payload = Self(encoded.into());
        payload.decode()?;
        Ok(payload)
    }

    /// The base64 text.
    pub fn as_base64(&self) -> &str {
        &self.0
    }

    /// Decode back to the bytes sent over the air.
    pub fn decode(&self) -> Result<Bytes> {
        BASE64_STANDARD
            .decode(&self.0)
            .map(Bytes::from)
            .map_err(|e| Error::InvalidPayload {
                context: e.to_string(),
            })
    }
}

impl std::fmt::Display for OutboundPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Writes payloads to the connected device's fixed characteristic.
pub struct CharacteristicWriter {
    /// Platform backend.
    backend: Arc<dyn BleBackend>,
    /// Source of the current connection.
    connection: Arc<ConnectionSession>,
    /// Where payloads are written.
    target: GattTarget,
    /// Retry policy for writes.
    retry: RetryPolicy,
}

impl CharacteristicWriter {
    /// Create a writer for the given target.
    pub fn new(
        backend: Arc<dyn BleBackend>,
        connection: Arc<ConnectionSession>,
        target: GattTarget,
    ) -> Self {
        Self {
            backend,
            connection,
            target,
            retry: RetryPolicy::none(),
        }
    }

    /// Set the retry policy for writes.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The service/characteristic pair written to.
    pub fn target(&self) -> GattTarget {
        self.target
    }

    /// Send a payload without waiting for the result.
    ///
    /// The write runs on a spawned task. Failures are logged and never
    /// reported back; the returned handle may be awaited or dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] immediately if no device is connected.
    pub fn send(&self, payload: &str) -> Result<tokio::task::JoinHandle<()>> {
        let device = self.connection.connected_device().ok_or(Error::NotConnected)?;
        let encoded = OutboundPayload::encode(payload);
        let backend = self.backend.clone();
        let target = self.target;
        let retry = self.retry.clone();

        Ok(tokio::spawn(async move {
            let result =
                write_encoded(backend.as_ref(), &device.id, target, &encoded, &retry).await;
            if let Err(e) = result {
                error!("Failed to write to {} on {}: {}", target, device.id, e);
            }
        }))
    }

    /// Write a payload and wait for the peripheral to acknowledge it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] if no device is connected, or
    /// [`Error::WriteFailed`] if the write fails.
    pub async fn write(&self, payload: &str) -> Result<()> {
        let device = self.connection.connected_device().ok_or(Error::NotConnected)?;
        let encoded = OutboundPayload::encode(payload);
        write_encoded(
            self.backend.as_ref(),
            &device.id,
            self.target,
            &encoded,
            &self.retry,
        )
        .await
    }
}

async fn write_encoded(
    backend: &dyn BleBackend,
    id: &DeviceId,
    target: GattTarget,
    payload: &OutboundPayload,
    retry: &RetryPolicy,
) -> Result<()> {
    trace!("Writing {} to {} on {}", payload, target, id);

    retry
        .run("write", |_| {
            backend.write(id, target, payload, WriteKind::WithResponse)
        })
        .await
        .map_err(|e| match e {
            Error::WriteFailed { .. } => e,
            other => Error::WriteFailed {
                reason: other.to_string(),
            },
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::backend::MockBleBackend;
    use crate::ble::scanner::ScanSession;
    use crate::ble::uuids::{UART_RX_UUID, UART_SERVICE_UUID};
    use crate::ble::filter::DeviceFilter;
    use crate::permissions::{AlwaysGranted, Platform};

    #[test]
    fn test_encode_hello() {
        let payload = OutboundPayload::encode("hello");
        assert_eq!(payload.as_base64(), "aGVsbG8=");
        assert_eq!(payload.decode().unwrap().as_ref(), b"hello");
    }

    #[test]
    fn test_encode_multibyte_utf8() {
        let payload = OutboundPayload::encode("é");
        assert_eq!(payload.as_base64(), "w6k=");
    }

    #[test]
    fn test_from_base64_rejects_garbage() {
        assert!(matches!(
            OutboundPayload::from_base64("not base64!"),
            Err(Error::InvalidPayload { .. })
        ));
        assert!(OutboundPayload::from_base64("QjQ5NDk=").is_ok());
    }

    fn writer_for(backend: MockBleBackend) -> (CharacteristicWriter, Arc<ConnectionSession>) {
        let backend: Arc<dyn BleBackend> = Arc::new(backend);
        let scanner = Arc::new(ScanSession::new(backend.clone(), DeviceFilter::default()));
        let connection = Arc::new(ConnectionSession::new(
            backend.clone(),
            scanner,
            Platform::Desktop,
            Arc::new(AlwaysGranted),
        ));
        let writer = CharacteristicWriter::new(backend, connection.clone(), GattTarget::uart_rx());
        (writer, connection)
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let mut backend = MockBleBackend::new();
        backend.expect_write().times(0);
        let (writer, _connection) = writer_for(backend);

        assert!(matches!(writer.send("hello"), Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn test_send_issues_single_write() {
        let mut backend = MockBleBackend::new();
        backend.expect_connect().returning(|_| Ok(()));
        backend.expect_discover_services().returning(|_| Ok(()));
        backend
            .expect_write()
            .withf(|id, target, payload, kind| {
                id.as_str() == "esp32"
                    && target.service == UART_SERVICE_UUID
                    && target.characteristic == UART_RX_UUID
                    && payload.as_base64() == "aGVsbG8="
                    && *kind == WriteKind::WithResponse
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));
        let (writer, connection) = writer_for(backend);

        connection.connect(&DeviceId::new("esp32")).await.unwrap();
        writer.send("hello").unwrap().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_swallows_write_errors() {
        let mut backend = MockBleBackend::new();
        backend.expect_connect().returning(|_| Ok(()));
        backend.expect_discover_services().returning(|_| Ok(()));
        backend
            .expect_write()
            .times(1)
            .returning(|_, _, _, _| Err(Error::Internal("gatt error".to_string())));
        let (writer, connection) = writer_for(backend);

        connection.connect(&DeviceId::new("esp32")).await.unwrap();
        tokio_test::assert_ok!(writer.send("B4949").unwrap().await);
    }

    #[tokio::test]
    async fn test_write_reports_failure() {
        let mut backend = MockBleBackend::new();
        backend.expect_connect().returning(|_| Ok(()));
        backend.expect_discover_services().returning(|_| Ok(()));
        backend
            .expect_write()
            .times(1)
            .returning(|_, _, _, _| Err(Error::Internal("gatt error".to_string())));
        let (writer, connection) = writer_for(backend);

        connection.connect(&DeviceId::new("esp32")).await.unwrap();
        assert!(matches!(
            writer.write("hello").await,
            Err(Error::WriteFailed { .. })
        ));
    }
}
