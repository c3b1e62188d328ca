// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Alfred Jean LLC

//! Shared wire codec, data model, and session protocol for MASH device and
//! controller services.
//!
//! Grounded on the teacher's `mux` crate: a transport-agnostic core
//! (`ws_mux.rs`, `state.rs`) reused by both a server-style and client-style
//! binary. Here the split is `mash-device` (server role) and
//! `mash-controller` (client role) over this shared `mash-core`.

pub mod discovery;
pub mod error;
pub mod ids;
pub mod model;
pub mod notify;
pub mod pase;
pub mod persistence;
pub mod protocol;
pub mod session;
pub mod subscription;
pub mod transport;
pub mod wire;
pub mod zone;

pub use discovery::{
    Advertiser, Browser, CommissionableService, OperationalHandler, OperationalService,
    PairingRequestInfo,
};
pub use error::{CommissionError, DiscoveryError, LifecycleError, SessionError, StatusCode};
pub use ids::{derive_device_id, derive_zone_id};
pub use model::{Access, Attribute, CallerContext, Command, DataModel, Endpoint, Feature, Value};
pub use notify::{NotificationDispatcher, NotificationSink};
pub use pase::{PaseAttemptTracker, PaseTiers};
pub use persistence::{
    ControllerStateStore, DeviceStateStore, FailsafeSnapshot, JsonFileControllerStateStore,
    JsonFileDeviceStateStore, PersistedControllerState, PersistedDevice, PersistedDeviceState,
};
pub use protocol::{
    ProtocolHandler, RemoveZoneHook, SubscribeOutcome, REMOVE_ZONE_COMMAND_ID,
    REMOVE_ZONE_ENDPOINT, REMOVE_ZONE_FEATURE,
};
pub use session::{DeviceSession, FramedSession, Session, ZoneSession};
pub use subscription::{Subscription, SubscriptionManager};
pub use transport::{Dialer, IncomingConnection, Listener, PaseHandshake, Stream};
pub use wire::{Envelope, Operation};
pub use zone::{ZoneManager, ZoneRecord, ZoneType};

#[cfg(any(test, feature = "test-support"))]
pub use discovery::FakeDiscovery;
