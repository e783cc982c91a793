//! # Connection Module
//!
//! Owns the link to one FTMS peripheral and turns its notifications into
//! [`TelemetryRecord`]s for the rest of the application.
//!
//! This module handles:
//! - The connect handshake (select, connect, service, characteristic, subscribe)
//! - Releasing partially acquired resources when a step fails or the
//!   `connect()` future is dropped
//! - Decoding notifications in arrival order and dropping malformed frames
//! - Converging explicit and peer-initiated disconnects on one transition
//!
//! ## States
//!
//! ```text
//! Disconnected --connect()--> Connecting --subscribed--> Connected
//!       ^                         |                          |
//!       +------ step failed ------+       disconnect() / peer drop
//!       |                                                    |
//!       +-------------------- Disconnecting <----------------+
//! ```

pub mod observer;
pub mod state;

pub use observer::{Observers, Subscription};
pub use state::{ConnectionState, DecodeStats};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::ble::transport::{FtmsPeripheral, FtmsTransport, PeripheralEvent, PeripheralEvents};
use crate::error::ConnectionError;
use crate::ftms::decoder::decode_indoor_bike_data;
use crate::ftms::protocol::{TelemetryRecord, FTMS_SERVICE_UUID, INDOOR_BIKE_DATA_UUID};

/// One Connected period
struct Session<P> {
    peripheral: Arc<P>,
    pump: Option<JoinHandle<()>>,
}

struct Inner<P> {
    state: ConnectionState,
    /// Bumped on every connect attempt so stale tasks cannot touch a newer session
    generation: u64,
    session: Option<Session<P>>,
}

struct Shared<P> {
    inner: Mutex<Inner<P>>,
    data_observers: Observers<TelemetryRecord>,
    connection_observers: Observers<bool>,
    latest: Mutex<Option<TelemetryRecord>>,
    frames_decoded: AtomicU64,
    frames_dropped: AtomicU64,
    /// Background releases of cancelled connect attempts
    releases: Mutex<Vec<JoinHandle<()>>>,
}

/// Connection manager for a single FTMS peripheral
///
/// # Examples
///
/// ```no_run
/// use ftms_bridge::ble::BleTransport;
/// use ftms_bridge::config::BleConfig;
/// use ftms_bridge::connection::ConnectionManager;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let manager = ConnectionManager::new(BleTransport::new(BleConfig::default()));
///
///     manager.on_data_received(|record| println!("{:?}", record.instantaneous_power));
///     manager.on_connection_change(|connected| println!("connected: {}", connected));
///
///     manager.connect().await?;
///     Ok(())
/// }
/// ```
pub struct ConnectionManager<T: FtmsTransport> {
    transport: T,
    shared: Arc<Shared<T::Peripheral>>,
}

impl<T: FtmsTransport> ConnectionManager<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: ConnectionState::Disconnected,
                    generation: 0,
                    session: None,
                }),
                data_observers: Observers::new(),
                connection_observers: Observers::new(),
                latest: Mutex::new(None),
                frames_decoded: AtomicU64::new(0),
                frames_dropped: AtomicU64::new(0),
                releases: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Connect to a peripheral and start receiving telemetry
    ///
    /// Runs the handshake in order: peripheral selection, transport connect,
    /// FTMS service lookup, Indoor Bike Data characteristic lookup,
    /// notification subscription. On success the connection observers
    /// receive `true`.
    ///
    /// No timeout is applied. Dropping the returned future cancels the
    /// attempt: the state returns to `Disconnected` and any peripheral
    /// already acquired is released in the background.
    ///
    /// # Errors
    ///
    /// - [`ConnectionError::AlreadyActive`] if not `Disconnected`
    /// - Any error from a handshake step; the peripheral is released and
    ///   the state returns to `Disconnected`
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        let generation = self.shared.begin_connecting()?;
        let mut attempt = ConnectAttempt {
            shared: Arc::clone(&self.shared),
            generation,
            peripheral: None,
            finished: false,
        };

        match self.handshake(&mut attempt).await {
            Ok(events) => {
                if let Some(peripheral) = attempt.complete() {
                    Shared::enter_connected(&self.shared, generation, peripheral, events);
                }
                Ok(())
            }
            Err(e) => {
                warn!("Connection attempt failed: {}", e);
                if let Some(peripheral) = attempt.peripheral.take() {
                    release(peripheral).await;
                }
                Err(e)
            }
        }
    }

    async fn handshake(
        &self,
        attempt: &mut ConnectAttempt<T::Peripheral>,
    ) -> Result<PeripheralEvents, ConnectionError> {
        let peripheral = Arc::new(self.transport.request_peripheral().await?);
        attempt.peripheral = Some(Arc::clone(&peripheral));

        info!("Connecting to {}...", peripheral.name());
        peripheral.connect().await?;

        debug!("Looking up FTMS service {}", FTMS_SERVICE_UUID);
        peripheral.discover_service(FTMS_SERVICE_UUID).await?;

        debug!("Looking up Indoor Bike Data characteristic {}", INDOOR_BIKE_DATA_UUID);
        peripheral
            .find_characteristic(FTMS_SERVICE_UUID, INDOOR_BIKE_DATA_UUID)
            .await?;

        let events = peripheral.subscribe(INDOOR_BIKE_DATA_UUID).await?;
        debug!("Subscribed to Indoor Bike Data notifications");
        Ok(events)
    }

    /// Disconnect from the peripheral
    ///
    /// Unsubscribes and disconnects the transport, logging (not returning)
    /// failures; the handle is released either way and the connection
    /// observers receive `false`. Does nothing unless `Connected`.
    pub async fn disconnect(&self) {
        let Some((generation, peripheral)) = self.shared.begin_disconnecting() else {
            debug!("disconnect() ignored in state {}", self.state());
            return;
        };
        // Finishes the transition even if this future is dropped mid-way
        let _transition = DisconnectGuard {
            shared: Arc::clone(&self.shared),
            generation,
        };

        info!("Disconnecting from {}...", peripheral.name());
        if let Err(e) = peripheral.unsubscribe(INDOOR_BIKE_DATA_UUID).await {
            warn!("Failed to unsubscribe: {}", e);
        }
        if let Err(e) = peripheral.disconnect().await {
            warn!("Transport disconnect failed: {}", e);
        }
    }

    /// Disconnect and wait for cancelled connect attempts to release
    /// their peripherals
    ///
    /// Call before the runtime shuts down so background releases are not
    /// cut short.
    pub async fn shutdown(&self) {
        self.disconnect().await;

        let pending: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self.shared.releases.lock().unwrap_or_else(|e| e.into_inner()),
        );
        for task in pending {
            if let Err(e) = task.await {
                debug!("Release task ended abnormally: {}", e);
            }
        }
    }

    /// Whether a session is active. Never panics.
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock_inner().state
    }

    /// Name of the connected peripheral
    pub fn peripheral_name(&self) -> Option<String> {
        self.shared
            .lock_inner()
            .session
            .as_ref()
            .map(|session| session.peripheral.name())
    }

    /// Register the telemetry consumer, replacing any previous one
    pub fn on_data_received<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&TelemetryRecord) + Send + Sync + 'static,
    {
        self.shared.data_observers.replace(handler)
    }

    /// Register an additional telemetry consumer
    pub fn add_data_observer<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&TelemetryRecord) + Send + Sync + 'static,
    {
        self.shared.data_observers.add(handler)
    }

    /// Register the connection-state consumer, replacing any previous one
    ///
    /// Receives `true` on reaching `Connected` and `false` on every path
    /// from a session back to `Disconnected`.
    pub fn on_connection_change<F>(&self, handler: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.shared
            .connection_observers
            .replace(move |connected: &bool| handler(*connected))
    }

    /// Register an additional connection-state consumer
    pub fn add_connection_observer<F>(&self, handler: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.shared
            .connection_observers
            .add(move |connected: &bool| handler(*connected))
    }

    /// Most recent successfully decoded record, across sessions
    pub fn latest_record(&self) -> Option<TelemetryRecord> {
        *self.shared.latest.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn decode_stats(&self) -> DecodeStats {
        DecodeStats {
            frames_decoded: self.shared.frames_decoded.load(Ordering::Relaxed),
            frames_dropped: self.shared.frames_dropped.load(Ordering::Relaxed),
        }
    }
}

impl<T: FtmsTransport> Drop for ConnectionManager<T> {
    fn drop(&mut self) {
        let session = self.shared.lock_inner().session.take();
        if let Some(session) = session {
            if let Some(pump) = session.pump {
                pump.abort();
            }
            let _ = spawn_release(session.peripheral);
        }
    }
}

impl<P: FtmsPeripheral> Shared<P> {
    fn lock_inner(&self) -> MutexGuard<'_, Inner<P>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Disconnected -> Connecting
    fn begin_connecting(&self) -> Result<u64, ConnectionError> {
        let mut inner = self.lock_inner();
        if inner.state != ConnectionState::Disconnected {
            return Err(ConnectionError::AlreadyActive(inner.state));
        }
        inner.state = ConnectionState::Connecting;
        inner.generation += 1;
        Ok(inner.generation)
    }

    /// Connecting -> Disconnected for an attempt that never connected
    fn abandon_connecting(&self, generation: u64) {
        let mut inner = self.lock_inner();
        if inner.generation == generation && inner.state == ConnectionState::Connecting {
            inner.state = ConnectionState::Disconnected;
        }
    }

    /// Connecting -> Connected, then start the notification pump
    fn enter_connected(
        shared: &Arc<Self>,
        generation: u64,
        peripheral: Arc<P>,
        events: PeripheralEvents,
    ) {
        let name = peripheral.name();
        {
            let mut inner = shared.lock_inner();
            inner.state = ConnectionState::Connected;
            inner.session = Some(Session {
                peripheral,
                pump: None,
            });
        }

        info!("Connected to {}", name);
        shared.connection_observers.notify(&true);

        let pump = tokio::spawn(Self::pump(Arc::clone(shared), generation, events));

        // A disconnect may have started while observers ran; it could not
        // stop a pump that was not stored yet
        let mut inner = shared.lock_inner();
        let current =
            inner.generation == generation && inner.state == ConnectionState::Connected;
        match inner.session.as_mut() {
            Some(session) if current => session.pump = Some(pump),
            _ => pump.abort(),
        }
    }

    /// Connected -> Disconnecting; stops the pump and hands back the peripheral
    fn begin_disconnecting(&self) -> Option<(u64, Arc<P>)> {
        let mut inner = self.lock_inner();
        if inner.state != ConnectionState::Connected {
            return None;
        }
        let generation = inner.generation;
        let session = inner.session.as_mut()?;
        if let Some(pump) = session.pump.take() {
            pump.abort();
        }
        let peripheral = Arc::clone(&session.peripheral);
        inner.state = ConnectionState::Disconnecting;
        Some((generation, peripheral))
    }

    /// Single transition back to Disconnected for both explicit and
    /// peer-initiated disconnects. Observers receive `false` at most once
    /// per session.
    fn enter_disconnected(&self, generation: u64) {
        let session = {
            let mut inner = self.lock_inner();
            let active = matches!(
                inner.state,
                ConnectionState::Connected | ConnectionState::Disconnecting
            );
            if inner.generation != generation || !active {
                return;
            }
            inner.state = ConnectionState::Disconnected;
            inner.session.take()
        };

        if let Some(session) = session {
            info!("Disconnected from {}", session.peripheral.name());
        }
        self.connection_observers.notify(&false);
    }

    /// Deliver one session's events in arrival order
    async fn pump(shared: Arc<Self>, generation: u64, mut events: PeripheralEvents) {
        while let Some(event) = events.next().await {
            match event {
                PeripheralEvent::Notification(payload) => shared.handle_frame(&payload),
                PeripheralEvent::Disconnected => {
                    info!("Peripheral dropped the connection");
                    break;
                }
            }
        }
        debug!("Notification stream closed");
        shared.enter_disconnected(generation);
    }

    fn handle_frame(&self, payload: &[u8]) {
        match decode_indoor_bike_data(payload) {
            Ok(record) => {
                self.frames_decoded.fetch_add(1, Ordering::Relaxed);
                *self.latest.lock().unwrap_or_else(|e| e.into_inner()) = Some(record);
                self.data_observers.notify(&record);
            }
            Err(e) => {
                let dropped = self.frames_dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    "Dropping malformed Indoor Bike Data frame ({} bytes, {} dropped so far): {}",
                    payload.len(),
                    dropped,
                    e
                );
            }
        }
    }
}

/// Resets an unfinished connect attempt when dropped
struct ConnectAttempt<P: FtmsPeripheral> {
    shared: Arc<Shared<P>>,
    generation: u64,
    peripheral: Option<Arc<P>>,
    finished: bool,
}

impl<P: FtmsPeripheral> ConnectAttempt<P> {
    fn complete(&mut self) -> Option<Arc<P>> {
        self.finished = true;
        self.peripheral.take()
    }
}

impl<P: FtmsPeripheral> Drop for ConnectAttempt<P> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.shared.abandon_connecting(self.generation);
        if let Some(peripheral) = self.peripheral.take() {
            debug!("Connect attempt cancelled, releasing peripheral");
            if let Some(task) = spawn_release(peripheral) {
                let mut releases = self.shared.releases.lock().unwrap_or_else(|e| e.into_inner());
                releases.retain(|task| !task.is_finished());
                releases.push(task);
            }
        }
    }
}

/// Completes a disconnect when dropped
struct DisconnectGuard<P: FtmsPeripheral> {
    shared: Arc<Shared<P>>,
    generation: u64,
}

impl<P: FtmsPeripheral> Drop for DisconnectGuard<P> {
    fn drop(&mut self) {
        self.shared.enter_disconnected(self.generation);
    }
}

async fn release<P: FtmsPeripheral>(peripheral: Arc<P>) {
    if let Err(e) = peripheral.disconnect().await {
        debug!("Releasing {} failed: {}", peripheral.name(), e);
    }
}

fn spawn_release<P: FtmsPeripheral>(peripheral: Arc<P>) -> Option<JoinHandle<()>> {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => Some(handle.spawn(release(peripheral))),
        Err(_) => {
            debug!("No runtime available to release {}", peripheral.name());
            None
        }
    }
}
