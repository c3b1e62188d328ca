// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Alfred Jean LLC

//! `ControllerService`: owns the controller's zone identity, discovers and
//! commissions devices, and maintains a `DeviceSession` per commissioned
//! device with optional background operational-discovery reconnection
//! (§4.2).
//!
//! Grounded on the same `CredentialBroker`-shaped pattern as
//! `mash_device::service::DeviceService`: an `RwLock`-guarded map of named
//! entities, one background task per responsibility spawned from `start`,
//! events emitted on a `broadcast::Sender` outside the lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use mash_core::{
    derive_device_id, Advertiser, Browser, CommissionError, CommissionableService,
    ControllerStateStore, Dialer, DeviceSession, LifecycleError, OperationalService,
    PairingRequestInfo, PaseHandshake, PersistedControllerState, PersistedDevice, Session, Value,
    REMOVE_ZONE_COMMAND_ID, REMOVE_ZONE_ENDPOINT, REMOVE_ZONE_FEATURE,
};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::config::ControllerServiceConfig;
use crate::events::{ControllerEvent, EVENT_CHANNEL_CAPACITY};
use crate::identity::ZoneIdentity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
}

struct ConnectedDeviceRecord {
    host: String,
    port: u16,
    session: Option<Arc<DeviceSession>>,
}

/// The collaborators a `ControllerService` needs from outside this crate
/// (§1/§6 transport, PASE, discovery, persistence seams).
pub struct ControllerServiceDeps {
    pub dialer: Arc<dyn Dialer>,
    pub pase: Arc<dyn PaseHandshake>,
    pub advertiser: Arc<dyn Advertiser>,
    pub browser: Arc<dyn Browser>,
    pub store: Arc<dyn ControllerStateStore>,
}

pub struct ControllerService {
    config: RwLock<ControllerServiceConfig>,
    /// Absent until `generate`d/loaded/`set_identity`d (§8 scenario 6:
    /// "Controller with zoneID unset" is a valid starting state).
    identity: RwLock<Option<ZoneIdentity>>,
    devices: RwLock<HashMap<String, ConnectedDeviceRecord>>,
    dialer: Arc<dyn Dialer>,
    pase: Arc<dyn PaseHandshake>,
    advertiser: Arc<dyn Advertiser>,
    browser: Arc<dyn Browser>,
    store: Arc<dyn ControllerStateStore>,
    /// One cancellation token per in-flight deferred commission, keyed by
    /// discriminator, so `CancelCommissioning` can stop exactly one attempt
    /// (§4.2 step 3d).
    active_pairing_requests: Mutex<HashMap<u16, CancellationToken>>,
    state: RwLock<LifecycleState>,
    events: tokio::sync::broadcast::Sender<ControllerEvent>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl ControllerService {
    pub fn new(
        config: ControllerServiceConfig,
        identity: Option<ZoneIdentity>,
        deps: ControllerServiceDeps,
    ) -> Arc<Self> {
        let (events, _) = tokio::sync::broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            config: RwLock::new(config),
            identity: RwLock::new(identity),
            devices: RwLock::new(HashMap::new()),
            dialer: deps.dialer,
            pase: deps.pase,
            advertiser: deps.advertiser,
            browser: deps.browser,
            store: deps.store,
            active_pairing_requests: Mutex::new(HashMap::new()),
            state: RwLock::new(LifecycleState::Idle),
            events,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    pub async fn lifecycle_state(&self) -> LifecycleState {
        *self.state.read().await
    }

    pub async fn zone_id(&self) -> Option<String> {
        self.identity.read().await.as_ref().map(|i| i.zone_id().to_owned())
    }

    pub async fn set_identity(&self, identity: ZoneIdentity) {
        *self.identity.write().await = Some(identity);
    }

    pub async fn device_count(&self) -> usize {
        self.devices.read().await.len()
    }

    pub async fn is_connected(&self, device_id: &str) -> bool {
        self.devices.read().await.get(device_id).is_some_and(|r| r.session.is_some())
    }

    fn emit(&self, event: ControllerEvent) {
        let _ = self.events.send(event);
    }

    // ── Lifecycle ──────────────────────────────────────────────────────

    pub async fn start(self: &Arc<Self>) -> Result<(), LifecycleError> {
        {
            let mut state = self.state.write().await;
            if !matches!(*state, LifecycleState::Idle | LifecycleState::Stopped) {
                return Err(LifecycleError::AlreadyStarted);
            }
            *state = LifecycleState::Starting;
        }

        if let Ok(persisted) = self.store.load().await {
            self.restore(persisted).await;
        }

        if self.config.read().await.enable_operational_reconnect {
            let handle = tokio::spawn(Arc::clone(self).run_reconnect_listener());
            self.tasks.lock().await.push(handle);
        }

        *self.state.write().await = LifecycleState::Running;
        tracing::info!("controller service started");
        Ok(())
    }

    pub async fn stop(self: &Arc<Self>) -> Result<(), LifecycleError> {
        {
            let mut state = self.state.write().await;
            if *state != LifecycleState::Running {
                return Err(LifecycleError::NotStarted);
            }
            *state = LifecycleState::Stopping;
        }

        self.cancel.cancel();

        let handles: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for handle in handles {
            let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        }

        *self.state.write().await = LifecycleState::Stopped;
        tracing::info!("controller service stopped");
        Ok(())
    }

    async fn restore(&self, persisted: PersistedControllerState) {
        // The zone seed itself isn't modeled in `PersistedControllerState`
        // (§6 persists bookkeeping, not CA material); callers own loading
        // the identity separately and passing it at construction or via
        // `set_identity`. This only restores the known-device bookkeeping
        // so reconnection has something to match against.
        let mut devices = self.devices.write().await;
        for device in persisted.devices {
            devices.insert(
                device.id,
                ConnectedDeviceRecord { host: device.host, port: device.port, session: None },
            );
        }
    }

    async fn persist(&self) {
        let zone_id = self.zone_id().await;
        let devices = self
            .devices
            .read()
            .await
            .iter()
            .map(|(id, record)| PersistedDevice {
                id: id.clone(),
                zone_id: zone_id.clone().unwrap_or_default(),
                host: record.host.clone(),
                port: record.port,
            })
            .collect();
        let state = PersistedControllerState { saved_at_epoch_secs: epoch_secs(), zone_id, devices };
        if let Err(err) = self.store.save(&state).await {
            tracing::warn!(%err, "failed to persist controller state");
        }
    }

    // ── Commissioning ────────────────────────────────────────────────────

    /// Direct commissioning by a resolved service record (§4.2 "Commissioning
    /// by service record").
    pub async fn commission_service(
        self: &Arc<Self>,
        service: CommissionableService,
        setup_code: &str,
    ) -> Result<String, CommissionError> {
        self.dial_and_commission(service.host, service.port, setup_code).await
    }

    /// Commissioning by discriminator, falling back to the deferred
    /// pairing-request protocol when no service record is immediately
    /// visible (§4.2 "Commissioning by discriminator (deferred)").
    pub async fn commission_device(
        self: &Arc<Self>,
        discriminator: u16,
        setup_code: &str,
    ) -> Result<String, CommissionError> {
        if let Some(found) = self.browser.find_by_discriminator(discriminator).await {
            return self.dial_and_commission(found.host, found.port, setup_code).await;
        }

        let Some(zone_id) = self.zone_id().await else {
            self.emit(ControllerEvent::CommissionFailed { discriminator: Some(discriminator) });
            return Err(CommissionError::ZoneIdRequired);
        };

        let cancel = CancellationToken::new();
        self.active_pairing_requests.lock().await.insert(discriminator, cancel.clone());

        let (poll_interval, timeout, zone_name) = {
            let config = self.config.read().await;
            (config.pairing_request_poll_interval, config.pairing_request_timeout, config.zone_name.clone())
        };

        let info = PairingRequestInfo {
            discriminator,
            zone_id,
            zone_name,
            expires_at: std::time::Instant::now() + timeout,
        };
        if let Err(err) = self.advertiser.announce_pairing_request(info).await {
            self.active_pairing_requests.lock().await.remove(&discriminator);
            self.emit(ControllerEvent::CommissionFailed { discriminator: Some(discriminator) });
            return Err(CommissionError::CommissionFailed(err.to_string()));
        }

        let result = self.poll_until_found(discriminator, poll_interval, timeout, cancel).await;

        // §9 invariant 2: on every exit, `StopPairingRequest` is called
        // exactly once and `activePairingRequests[d]` ends up absent,
        // regardless of which branch above produced `result`.
        self.advertiser.stop_pairing_request(discriminator).await;
        self.active_pairing_requests.lock().await.remove(&discriminator);

        match result {
            Ok(service) => self.dial_and_commission(service.host, service.port, setup_code).await,
            Err(err) => {
                self.emit(ControllerEvent::CommissionFailed { discriminator: Some(discriminator) });
                Err(err)
            }
        }
    }

    async fn poll_until_found(
        self: &Arc<Self>,
        discriminator: u16,
        poll_interval: Duration,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<CommissionableService, CommissionError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(CommissionError::CommissioningCancelled),
                _ = self.cancel.cancelled() => return Err(CommissionError::ContextCancelled),
                _ = tokio::time::sleep_until(deadline) => return Err(CommissionError::PairingRequestTimeout),
                _ = ticker.tick() => {
                    if let Some(found) = self.browser.find_by_discriminator(discriminator).await {
                        return Ok(found);
                    }
                }
            }
        }
    }

    /// `CancelCommissioning(discriminator)` (§4.2 step 3d).
    pub async fn cancel_commissioning(&self, discriminator: u16) -> Result<(), CommissionError> {
        let cancel = self.active_pairing_requests.lock().await.get(&discriminator).cloned();
        match cancel {
            Some(token) => {
                token.cancel();
                Ok(())
            }
            None => Err(CommissionError::NoPairingRequestActive),
        }
    }

    async fn dial_and_commission(
        self: &Arc<Self>,
        host: String,
        port: u16,
        setup_code: &str,
    ) -> Result<String, CommissionError> {
        let mut stream = self
            .dialer
            .dial(&host, port, true)
            .await
            .map_err(|err| CommissionError::CommissionFailed(err.to_string()))?;

        let secret = self
            .pase
            .run_as_initiator(&mut *stream, setup_code)
            .await
            .map_err(|_| CommissionError::CommissionFailed("PASE handshake failed".into()))?;

        // Only `deviceID` is derived here (§9 Open Question: the bug where
        // the PASE-derived id also overwrote `controller.zoneID` is fixed by
        // never touching `self.identity` in this path).
        let device_id = derive_device_id(&secret);

        let session_timeout = self.config.read().await.session_timeout;
        let (session, _recv_handle) = DeviceSession::new(stream, session_timeout);

        self.devices.write().await.insert(
            device_id.clone(),
            ConnectedDeviceRecord { host, port, session: Some(session) },
        );
        self.persist().await;

        let zone_id = self.zone_id().await.unwrap_or_default();
        self.emit(ControllerEvent::Commissioned { device_id: device_id.clone(), zone_id });
        Ok(device_id)
    }

    // ── Reconnection (§4.2 "Reconnection") ───────────────────────────────

    async fn run_reconnect_listener(self: Arc<Self>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<OperationalService>();
        self.browser
            .browse_operational(Arc::new(move |service: OperationalService| {
                let _ = tx.send(service);
            }))
            .await;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                service = rx.recv() => {
                    let Some(service) = service else { break };
                    self.attempt_reconnect(service).await;
                }
            }
        }
    }

    /// Unknown device ids are ignored; a device id with a live session is
    /// left alone (§4.2: only "currently-disconnected" devices reconnect).
    async fn attempt_reconnect(self: &Arc<Self>, service: OperationalService) {
        let should_dial = matches!(
            self.devices.read().await.get(&service.device_id),
            Some(record) if record.session.is_none()
        );
        if !should_dial {
            return;
        }

        let stream = match self.dialer.dial(&service.host, service.port, false).await {
            Ok(stream) => stream,
            Err(err) => {
                tracing::warn!(%err, device_id = %service.device_id, "reconnect dial failed");
                return;
            }
        };

        let session_timeout = self.config.read().await.session_timeout;
        let (session, _recv_handle) = DeviceSession::new(stream, session_timeout);

        let mut devices = self.devices.write().await;
        let Some(record) = devices.get_mut(&service.device_id) else { return };
        record.host = service.host;
        record.port = service.port;
        record.session = Some(session);
        drop(devices);

        self.emit(ControllerEvent::DeviceReconnected { device_id: service.device_id });
    }

    // ── Removal / renewal ───────────────────────────────────────────────

    /// `RemoveDevice`: best-effort remote `RemoveZone` invoke, authoritative
    /// local removal regardless of the invoke's outcome (§4.2, §7).
    pub async fn remove_device(self: &Arc<Self>, device_id: &str) -> bool {
        let session = self.devices.read().await.get(device_id).and_then(|r| r.session.clone());
        if let Some(session) = session {
            let zone_id = self.zone_id().await.unwrap_or_default();
            if let Err(err) = session
                .invoke(REMOVE_ZONE_ENDPOINT, REMOVE_ZONE_FEATURE, REMOVE_ZONE_COMMAND_ID, Value::Text(zone_id))
                .await
            {
                tracing::warn!(%err, device_id, "remote RemoveZone invoke failed, removing locally anyway");
            }
            session.close().await;
        }

        let removed = self.devices.write().await.remove(device_id).is_some();
        if removed {
            self.persist().await;
            self.emit(ControllerEvent::DeviceRemoved { device_id: device_id.to_owned() });
        }
        removed
    }

    /// `Renewal`: rotate the Zone CA material without dropping any session
    /// (renewing touches only `self.identity`, never `self.devices`).
    pub async fn renew(&self) -> Result<(), CommissionError> {
        let mut identity = self.identity.write().await;
        let Some(current) = identity.as_ref() else {
            return Err(CommissionError::ZoneIdRequired);
        };
        let renewed = current.renew();
        let zone_id = renewed.zone_id().to_owned();
        *identity = Some(renewed);
        drop(identity);
        self.emit(ControllerEvent::Renewed { zone_id });
        Ok(())
    }
}

fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;
