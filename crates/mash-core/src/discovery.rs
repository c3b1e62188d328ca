// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Alfred Jean LLC

//! Discovery collaborator interfaces (§6 "Discovery collaborator").
//!
//! The mDNS browser/advertiser is an external collaborator out of scope to
//! implement for real (§1). `Advertiser`/`Browser` are the seams
//! `mash-device`/`mash-controller` call through; `FakeDiscovery` (behind the
//! `test-support` feature) is a shared in-memory registry used by
//! `tests/specs` to drive the literal end-to-end scenarios.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::DiscoveryError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommissionableService {
    pub discriminator: u16,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationalService {
    pub device_id: String,
    pub zone_id: String,
    pub host: String,
    pub port: u16,
}

/// `{discriminator, zoneID, zoneName, expiresAt}` (§3 "PairingRequestInfo").
#[derive(Debug, Clone)]
pub struct PairingRequestInfo {
    pub discriminator: u16,
    pub zone_id: String,
    pub zone_name: String,
    pub expires_at: Instant,
}

pub type PairingRequestHandler = Arc<dyn Fn(PairingRequestInfo) + Send + Sync>;

/// Callback invoked for every operational service record a browser observes
/// (controller-side reconnection trigger, §4.2 "Reconnection").
pub type OperationalHandler = Arc<dyn Fn(OperationalService) + Send + Sync>;

#[async_trait]
pub trait Advertiser: Send + Sync {
    async fn advertise_commissionable(&self, discriminator: u16) -> Result<(), DiscoveryError>;
    async fn advertise_operational(&self, service: OperationalService) -> Result<(), DiscoveryError>;
    async fn advertise_commissioner(&self) -> Result<(), DiscoveryError>;
    async fn stop_all(&self);
    /// Announce a pairing request soliciting a specific device by
    /// discriminator (§4.2 "Commissioning by discriminator (deferred)").
    async fn announce_pairing_request(&self, info: PairingRequestInfo) -> Result<(), DiscoveryError>;
    async fn stop_pairing_request(&self, discriminator: u16);
}

#[async_trait]
pub trait Browser: Send + Sync {
    /// All currently visible commissionable services for `discriminator`
    /// (used by the deferred-commissioning poll loop, §4.2 step 1/3).
    async fn find_all_by_discriminator(&self, discriminator: u16) -> Vec<CommissionableService>;
    async fn find_by_discriminator(&self, discriminator: u16) -> Option<CommissionableService>;
    /// Register a callback invoked for every pairing request this browser
    /// observes (device-side pairing-request listener, §4.1).
    async fn browse_pairing_requests(&self, handler: PairingRequestHandler);
    /// Register a callback invoked for every operational service record this
    /// browser observes (controller-side reconnection trigger, §4.2).
    async fn browse_operational(&self, handler: OperationalHandler);
    async fn stop(&self);
}

#[cfg(any(test, feature = "test-support"))]
#[derive(Default)]
struct FakeDiscoveryState {
    commissionable: HashMap<u16, CommissionableService>,
    operational: HashMap<String, OperationalService>,
    pairing_requests: HashMap<u16, PairingRequestInfo>,
    pairing_request_listeners: Vec<PairingRequestHandler>,
    operational_listeners: Vec<OperationalHandler>,
}

/// Shared in-memory discovery registry. One instance, cloned into both a
/// device's and a controller's service under test, simulates the two sides
/// observing the same physical broadcast domain.
#[cfg(any(test, feature = "test-support"))]
pub struct FakeDiscovery {
    state: RwLock<FakeDiscoveryState>,
}

#[cfg(any(test, feature = "test-support"))]
impl FakeDiscovery {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { state: RwLock::new(FakeDiscoveryState::default()) })
    }

    /// Test-harness hook: make a commissionable service visible to every
    /// browser sharing this registry.
    pub async fn publish_commissionable(&self, service: CommissionableService) {
        self.state.write().await.commissionable.insert(service.discriminator, service);
    }

    pub async fn withdraw_commissionable(&self, discriminator: u16) {
        self.state.write().await.commissionable.remove(&discriminator);
    }

    pub async fn publish_operational(&self, service: OperationalService) {
        let listeners = {
            let mut state = self.state.write().await;
            state.operational.insert(service.device_id.clone(), service.clone());
            state.operational_listeners.clone()
        };
        for listener in listeners {
            listener(service.clone());
        }
    }

    pub async fn operational_by_device_id(&self, device_id: &str) -> Option<OperationalService> {
        self.state.read().await.operational.get(device_id).cloned()
    }
}

#[cfg(any(test, feature = "test-support"))]
#[async_trait]
impl Advertiser for FakeDiscovery {
    async fn advertise_commissionable(&self, _discriminator: u16) -> Result<(), DiscoveryError> {
        // Bookkeeping only; the test harness makes the device visible by
        // calling `publish_commissionable` once its window is actually open.
        Ok(())
    }

    async fn advertise_operational(&self, service: OperationalService) -> Result<(), DiscoveryError> {
        self.publish_operational(service).await;
        Ok(())
    }

    async fn advertise_commissioner(&self) -> Result<(), DiscoveryError> {
        Ok(())
    }

    async fn stop_all(&self) {}

    async fn announce_pairing_request(&self, info: PairingRequestInfo) -> Result<(), DiscoveryError> {
        let listeners = {
            let mut state = self.state.write().await;
            state.pairing_requests.insert(info.discriminator, info.clone());
            state.pairing_request_listeners.clone()
        };
        for listener in listeners {
            listener(info.clone());
        }
        Ok(())
    }

    async fn stop_pairing_request(&self, discriminator: u16) {
        self.state.write().await.pairing_requests.remove(&discriminator);
    }
}

#[cfg(any(test, feature = "test-support"))]
#[async_trait]
impl Browser for FakeDiscovery {
    async fn find_all_by_discriminator(&self, discriminator: u16) -> Vec<CommissionableService> {
        self.state.read().await.commissionable.get(&discriminator).cloned().into_iter().collect()
    }

    async fn find_by_discriminator(&self, discriminator: u16) -> Option<CommissionableService> {
        self.state.read().await.commissionable.get(&discriminator).cloned()
    }

    async fn browse_pairing_requests(&self, handler: PairingRequestHandler) {
        self.state.write().await.pairing_request_listeners.push(handler);
    }

    async fn browse_operational(&self, handler: OperationalHandler) {
        self.state.write().await.operational_listeners.push(handler);
    }

    async fn stop(&self) {}
}

#[cfg(test)]
#[path = "discovery_tests.rs"]
mod tests;
