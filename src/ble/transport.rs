//! Trait abstraction for the BLE transport to enable testing
//!
//! The connection manager drives a peripheral through these steps; the
//! btleplug implementation lives in the parent module and tests use the
//! mocks below.

use async_trait::async_trait;
use bytes::Bytes;
use std::pin::Pin;
use tokio_stream::Stream;
use uuid::Uuid;

use crate::error::ConnectionError;

/// Event delivered on an active subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeripheralEvent {
    /// Notification payload from the subscribed characteristic
    Notification(Bytes),
    /// The peer dropped the link
    Disconnected,
}

/// Ordered stream of events for one subscription
///
/// Notifications and disconnects share one stream so the manager sees them
/// in transport arrival order. The stream ending counts as a disconnect.
pub type PeripheralEvents = Pin<Box<dyn Stream<Item = PeripheralEvent> + Send>>;

/// Source of peripherals (device selection)
#[async_trait]
pub trait FtmsTransport: Send + Sync + 'static {
    type Peripheral: FtmsPeripheral;

    /// Select one peripheral exposing the FTMS service
    ///
    /// May wait for the user or for a scan; returns
    /// [`ConnectionError::Cancelled`] if selection is abandoned.
    async fn request_peripheral(&self) -> Result<Self::Peripheral, ConnectionError>;
}

/// One selected peripheral and its GATT operations
#[async_trait]
pub trait FtmsPeripheral: Send + Sync + 'static {
    /// Human-readable device name for logs
    fn name(&self) -> String;

    /// Transport-level connect
    async fn connect(&self) -> Result<(), ConnectionError>;

    /// Look up a primary service
    async fn discover_service(&self, service: Uuid) -> Result<(), ConnectionError>;

    /// Look up a characteristic of a previously discovered service
    async fn find_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<(), ConnectionError>;

    /// Enable notifications on a characteristic and return its event stream
    async fn subscribe(&self, characteristic: Uuid) -> Result<PeripheralEvents, ConnectionError>;

    /// Disable notifications on a characteristic
    async fn unsubscribe(&self, characteristic: Uuid) -> Result<(), ConnectionError>;

    /// Transport-level disconnect
    async fn disconnect(&self) -> Result<(), ConnectionError>;
}
