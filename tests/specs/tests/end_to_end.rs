// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Alfred Jean LLC

//! Cross-service scenarios wiring a `mash_device::DeviceService` and a
//! `mash_controller::ControllerService` together over an in-memory
//! transport, exercising the literal end-to-end scenario table.
//!
//! Scenarios #4 (GRID-then-LOCAL fallback) and #5 (DEC-059 re-entry after
//! removal) are device-internal and already covered by
//! `mash-core::zone_tests` and `mash-device::service_tests`; this file
//! covers only the scenarios that genuinely require both services wired
//! together.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mash_core::{
    Access, Attribute, CallerContext, DataModel, Dialer, DiscoveryError, Endpoint, FakeDiscovery,
    Feature, IncomingConnection, Listener, PaseHandshake, PersistedControllerState,
    PersistedDeviceState, Stream, Value,
};
use mash_controller::{ControllerService, ControllerServiceConfig, ControllerServiceDeps, ZoneIdentity};
use mash_device::{DeviceService, DeviceServiceConfig, DeviceServiceDeps};
use tokio::sync::{mpsc, Mutex};

const SETUP_CODE: &str = "12345678";

/// Minimal data model with one attribute, just enough to exercise a wire
/// round trip through `ProtocolHandler`'s generic read/write dispatch.
fn test_model() -> DataModel {
    DataModel::new().with_endpoint(
        Endpoint::new(0, "probe", "probe").with_feature(
            Feature::new(0).with_attribute(Attribute::new(0, Access::ReadWrite, Value::Uint64(0))),
        ),
    )
}

/// Bridges a controller's `Dialer` directly into a device's `Listener`:
/// every `dial` call creates a fresh `tokio::io::duplex` pair, delivers the
/// device-side half to the listener's accept queue, and returns the
/// controller-side half. Stands in for the real TLS transport, which is out
/// of scope.
struct FakeDialer {
    listener_tx: mpsc::UnboundedSender<IncomingConnection>,
}

#[async_trait]
impl Dialer for FakeDialer {
    async fn dial(&self, _host: &str, _port: u16, skip_verify: bool) -> Result<Box<dyn Stream>, DiscoveryError> {
        let (client_end, device_end) = tokio::io::duplex(8192);
        let conn = if skip_verify {
            IncomingConnection::Commissioning(Box::new(device_end))
        } else {
            IncomingConnection::Operational { zone_id: String::new(), stream: Box::new(device_end) }
        };
        self.listener_tx.send(conn).map_err(|_| DiscoveryError::NotFound)?;
        Ok(Box::new(client_end))
    }
}

struct FakeListener {
    rx: Mutex<mpsc::UnboundedReceiver<IncomingConnection>>,
}

impl FakeListener {
    fn new() -> (Arc<Self>, mpsc::UnboundedSender<IncomingConnection>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { rx: Mutex::new(rx) }), tx)
    }
}

#[async_trait]
impl Listener for FakeListener {
    async fn accept(&self) -> Result<IncomingConnection, DiscoveryError> {
        self.rx.lock().await.recv().await.ok_or(DiscoveryError::NotFound)
    }

    fn local_port(&self) -> u16 {
        9000
    }
}

/// Both roles of the shared secret derivation: succeeds only for the
/// configured setup code, deriving a distinct secret per call so repeated
/// commissions get distinct zone/device ids.
struct FakePase {
    expected_code: String,
    counter: std::sync::atomic::AtomicU64,
}

impl FakePase {
    fn new(expected_code: &str) -> Arc<Self> {
        Arc::new(Self { expected_code: expected_code.to_owned(), counter: std::sync::atomic::AtomicU64::new(0) })
    }
}

#[async_trait]
impl PaseHandshake for FakePase {
    async fn run_as_initiator(
        &self,
        _stream: &mut (dyn Stream),
        setup_code: &str,
    ) -> Result<Vec<u8>, DiscoveryError> {
        if setup_code != self.expected_code {
            return Err(DiscoveryError::NotFound);
        }
        let n = self.counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(format!("fake-shared-secret-{n}").into_bytes())
    }

    async fn run_as_responder(
        &self,
        _stream: &mut (dyn Stream),
        setup_code: &str,
    ) -> Result<Vec<u8>, DiscoveryError> {
        self.run_as_initiator(_stream, setup_code).await
    }
}

struct NullDeviceStore;

#[async_trait]
impl mash_core::DeviceStateStore for NullDeviceStore {
    async fn load(&self) -> anyhow::Result<PersistedDeviceState> {
        Ok(PersistedDeviceState::default())
    }
    async fn save(&self, _state: &PersistedDeviceState) -> anyhow::Result<()> {
        Ok(())
    }
}

struct NullControllerStore;

#[async_trait]
impl mash_core::ControllerStateStore for NullControllerStore {
    async fn load(&self) -> anyhow::Result<PersistedControllerState> {
        Ok(PersistedControllerState::default())
    }
    async fn save(&self, _state: &PersistedControllerState) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Builds a `DeviceService` wired to `discovery` and `listener_tx`, plus
/// the dialer a `ControllerService` in the same test should use to reach it.
fn make_device(
    config: DeviceServiceConfig,
    discovery: &Arc<FakeDiscovery>,
) -> (Arc<DeviceService>, Arc<FakeDialer>) {
    let (listener, listener_tx) = FakeListener::new();
    let pase = FakePase::new(SETUP_CODE);
    let device = DeviceService::new(
        config,
        test_model(),
        DeviceServiceDeps {
            listener,
            pase: pase as Arc<dyn PaseHandshake>,
            advertiser: Arc::clone(discovery) as Arc<dyn mash_core::Advertiser>,
            browser: Arc::clone(discovery) as Arc<dyn mash_core::Browser>,
            store: Arc::new(NullDeviceStore),
        },
    );
    let dialer = Arc::new(FakeDialer { listener_tx });
    (device, dialer)
}

fn make_controller(
    config: ControllerServiceConfig,
    identity: Option<ZoneIdentity>,
    dialer: Arc<FakeDialer>,
    discovery: &Arc<FakeDiscovery>,
) -> Arc<ControllerService> {
    ControllerService::new(
        config,
        identity,
        ControllerServiceDeps {
            dialer: dialer as Arc<dyn Dialer>,
            pase: FakePase::new(SETUP_CODE) as Arc<dyn PaseHandshake>,
            advertiser: Arc::clone(discovery) as Arc<dyn mash_core::Advertiser>,
            browser: Arc::clone(discovery) as Arc<dyn mash_core::Browser>,
            store: Arc::new(NullControllerStore),
        },
    )
}

/// Scenario #1: direct commissioning against an open window succeeds.
#[tokio::test]
async fn scenario_1_direct_commissioning_succeeds() {
    let discovery = FakeDiscovery::new();
    let (device, dialer) = make_device(DeviceServiceConfig::new(1001, SETUP_CODE), &discovery);
    let controller = make_controller(ControllerServiceConfig::new(), Some(ZoneIdentity::generate()), dialer, &discovery);

    device.start().await.unwrap();
    device.enter_commissioning_mode().await.unwrap();
    let mut device_events = device.subscribe_events();
    let mut controller_events = controller.subscribe_events();

    let device_id = controller
        .commission_service(
            mash_core::CommissionableService { discriminator: 1001, host: "device".to_owned(), port: 9000 },
            SETUP_CODE,
        )
        .await
        .unwrap();

    assert_eq!(controller.device_count().await, 1);
    assert_eq!(device.zone_count().await, 1);
    assert!(matches!(
        controller_events.recv().await.unwrap(),
        mash_controller::ControllerEvent::Commissioned { device_id: id, .. } if id == device_id
    ));

    let device_event = tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            match device_events.recv().await.unwrap() {
                mash_device::DeviceEvent::Connected { zone_id } => return zone_id,
                _ => continue,
            }
        }
    })
    .await
    .unwrap();
    assert!(!device_event.is_empty());
}

/// Scenario #2: a wrong setup code fails commissioning on both sides.
#[tokio::test]
async fn scenario_2_wrong_setup_code_fails_both_sides() {
    let discovery = FakeDiscovery::new();
    let (device, dialer) = make_device(DeviceServiceConfig::new(1001, SETUP_CODE), &discovery);
    let controller = make_controller(ControllerServiceConfig::new(), Some(ZoneIdentity::generate()), dialer, &discovery);

    device.start().await.unwrap();
    device.enter_commissioning_mode().await.unwrap();

    let err = controller
        .commission_service(
            mash_core::CommissionableService { discriminator: 1001, host: "device".to_owned(), port: 9000 },
            "87654321",
        )
        .await
        .unwrap_err();

    assert!(matches!(err, mash_core::CommissionError::CommissionFailed(_)));
    assert_eq!(controller.device_count().await, 0);
    assert_eq!(device.zone_count().await, 0);
}

/// Scenario #3: deferred commissioning by discriminator, with the device's
/// pairing-request listener opening its window and the test fixture
/// bridging the controller's announcement into device visibility.
#[tokio::test]
async fn scenario_3_deferred_commissioning_by_discriminator() {
    let discovery = FakeDiscovery::new();
    let (device, dialer) = make_device(
        DeviceServiceConfig::new(2001, SETUP_CODE).with_listen_for_pairing_requests(true),
        &discovery,
    );
    let controller = make_controller(
        ControllerServiceConfig::new()
            .with_pairing_request_poll_interval(Duration::from_millis(50))
            .with_pairing_request_timeout(Duration::from_secs(5)),
        Some(ZoneIdentity::generate()),
        dialer,
        &discovery,
    );

    device.start().await.unwrap();
    let mut device_events = device.subscribe_events();

    // Once the device's window opens in response to the pairing request, make
    // it visible to the controller's poll — the real mDNS advertisement is
    // out of scope (§1); `FakeDiscovery`'s `advertise_commissionable` is
    // bookkeeping-only by design.
    let discovery_clone = Arc::clone(&discovery);
    tokio::spawn(async move {
        loop {
            if let mash_device::DeviceEvent::CommissioningOpened = device_events.recv().await.unwrap() {
                discovery_clone
                    .publish_commissionable(mash_core::CommissionableService {
                        discriminator: 2001,
                        host: "device".to_owned(),
                        port: 9000,
                    })
                    .await;
                break;
            }
        }
    });

    let device_id = controller.commission_device(2001, SETUP_CODE).await.unwrap();
    assert_eq!(controller.device_count().await, 1);
    assert!(controller.is_connected(&device_id).await);
    assert_eq!(device.zone_count().await, 1);

    assert!(matches!(
        controller.cancel_commissioning(2001).await,
        Err(mash_core::CommissionError::NoPairingRequestActive)
    ));
}

/// Scenario #6: an unset controller zone id fails immediately, with no
/// pairing request ever announced.
#[tokio::test]
async fn scenario_6_unset_zone_id_fails_immediately() {
    let discovery = FakeDiscovery::new();
    let (_device, dialer) = make_device(DeviceServiceConfig::new(1234, SETUP_CODE), &discovery);
    let controller = make_controller(ControllerServiceConfig::new(), None, dialer, &discovery);

    let announced = Arc::new(Mutex::new(false));
    let announced_clone = Arc::clone(&announced);
    discovery
        .browse_pairing_requests(Arc::new(move |_info| {
            let announced = Arc::clone(&announced_clone);
            tokio::spawn(async move { *announced.lock().await = true; });
        }))
        .await;

    let err = controller.commission_device(1234, SETUP_CODE).await.unwrap_err();
    assert!(matches!(err, mash_core::CommissionError::ZoneIdRequired));

    tokio::task::yield_now().await;
    assert!(!*announced.lock().await);
}

/// Scenario #7: three concurrent deferred commissions that never resolve
/// all time out and all clean up their pairing-request bookkeeping.
#[tokio::test]
async fn scenario_7_concurrent_deferred_commissions_all_time_out() {
    let discovery = FakeDiscovery::new();
    let (_device, dialer) = make_device(DeviceServiceConfig::new(9999, SETUP_CODE), &discovery);
    let controller = make_controller(
        ControllerServiceConfig::new()
            .with_pairing_request_poll_interval(Duration::from_millis(10))
            .with_pairing_request_timeout(Duration::from_millis(80)),
        Some(ZoneIdentity::generate()),
        dialer,
        &discovery,
    );

    let announced = Arc::new(Mutex::new(std::collections::HashSet::<u16>::new()));
    {
        let announced = Arc::clone(&announced);
        discovery
            .browse_pairing_requests(Arc::new(move |info| {
                let announced = Arc::clone(&announced);
                let discriminator = info.discriminator;
                tokio::spawn(async move { announced.lock().await.insert(discriminator); });
            }))
            .await;
    }

    let results = tokio::join!(
        controller.commission_device(601, SETUP_CODE),
        controller.commission_device(602, SETUP_CODE),
        controller.commission_device(603, SETUP_CODE),
    );

    for result in [results.0, results.1, results.2] {
        assert!(matches!(result, Err(mash_core::CommissionError::PairingRequestTimeout)));
    }

    tokio::task::yield_now().await;
    let announced = announced.lock().await;
    for discriminator in [601, 602, 603] {
        assert!(announced.contains(&discriminator));
        assert!(matches!(
            controller.cancel_commissioning(discriminator).await,
            Err(mash_core::CommissionError::NoPairingRequestActive)
        ));
    }
}

/// The controller's `RemoveDevice` invokes the device's in-band `RemoveZone`
/// command over the real wire codec; the device's own `remove_zone` runs
/// and reopens its commissioning window (DEC-059).
#[tokio::test]
async fn remove_device_triggers_remote_remove_zone_over_the_wire() {
    let discovery = FakeDiscovery::new();
    let (device, dialer) = make_device(DeviceServiceConfig::new(1001, SETUP_CODE), &discovery);
    let controller = make_controller(ControllerServiceConfig::new(), Some(ZoneIdentity::generate()), dialer, &discovery);

    device.start().await.unwrap();
    device.enter_commissioning_mode().await.unwrap();

    let device_id = controller
        .commission_service(
            mash_core::CommissionableService { discriminator: 1001, host: "device".to_owned(), port: 9000 },
            SETUP_CODE,
        )
        .await
        .unwrap();
    assert_eq!(device.zone_count().await, 1);

    let mut device_events = device.subscribe_events();
    let removed = controller.remove_device(&device_id).await;
    assert!(removed);
    assert_eq!(controller.device_count().await, 0);

    let event = tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            match device_events.recv().await.unwrap() {
                event @ mash_device::DeviceEvent::ZoneRemoved { .. } => return event,
                _ => continue,
            }
        }
    })
    .await
    .unwrap();
    assert!(matches!(event, mash_device::DeviceEvent::ZoneRemoved { .. }));
    assert_eq!(device.zone_count().await, 0);
    assert!(device.commissioning_is_open().await);
}

/// After commissioning, the device's model is reachable in its default
/// state through the same `CallerContext` a connected zone's session would
/// be given (the request/response wire round trip itself is exercised by
/// `mash-core::protocol_tests` and `mash-core::session_tests`).
#[tokio::test]
async fn committed_zone_can_read_model_attributes() {
    let discovery = FakeDiscovery::new();
    let (device, dialer) = make_device(DeviceServiceConfig::new(1001, SETUP_CODE), &discovery);
    let controller = make_controller(ControllerServiceConfig::new(), Some(ZoneIdentity::generate()), dialer, &discovery);

    device.start().await.unwrap();
    device.enter_commissioning_mode().await.unwrap();

    controller
        .commission_service(
            mash_core::CommissionableService { discriminator: 1001, host: "device".to_owned(), port: 9000 },
            SETUP_CODE,
        )
        .await
        .unwrap();

    let zones = device.zones().list().await;
    let zone = zones.first().unwrap();

    let model = device.model().read().await;
    let values = model
        .read_attributes(0, 0, &[], CallerContext { peer_zone_index: Some(zone.zone_index) })
        .unwrap();
    assert_eq!(values.get(&0), Some(&Value::Uint64(0)));
}
