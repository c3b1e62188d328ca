// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Alfred Jean LLC

//! Zone records and the zone-type invariant policy (§3, §4.1, invariant 1).
//!
//! Grounded on the teacher's `CredentialBroker` account map
//! (`credential/broker.rs`): an `RwLock`-guarded map of named entities with
//! add/remove operations that enforce a small set of cardinality rules
//! before mutating the map.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::CommissionError;

/// Maximum combined GRID+LOCAL zones a device may hold (§3, §9 DEC: authoritative value is 2).
pub const MAX_ZONES: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ZoneType {
    Grid,
    Local,
    Test,
}

/// A zone record as held on the device side (§3 "Zone record (on device)").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneRecord {
    /// 16-hex-char stable identifier.
    pub id: String,
    pub zone_type: ZoneType,
    pub priority: u8,
    pub connected: bool,
    /// Stable index assigned on first admission, never reused.
    pub zone_index: u8,
    /// True while a failsafe timer is counting down (armed on session
    /// establishment, refreshed by the controller).
    #[serde(default)]
    pub failsafe_armed: bool,
    /// True once an armed timer has expired without a refresh (§4.1 "Failsafe").
    #[serde(default)]
    pub in_failsafe: bool,
}

impl ZoneRecord {
    pub fn new(id: impl Into<String>, zone_type: ZoneType, zone_index: u8) -> Self {
        Self {
            id: id.into(),
            zone_type,
            priority: 0,
            connected: false,
            zone_index,
            failsafe_armed: false,
            in_failsafe: false,
        }
    }
}

/// Enforces "at most one GRID + at most one LOCAL + any number of TEST
/// (gated on a valid enable key), MaxZones = 2 for GRID+LOCAL combined".
pub struct ZoneManager {
    inner: RwLock<ZoneManagerState>,
}

struct ZoneManagerState {
    zones: BTreeMap<String, ZoneRecord>,
    next_zone_index: u8,
    test_enable_key: Option<String>,
}

impl ZoneManager {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(ZoneManagerState {
                zones: BTreeMap::new(),
                next_zone_index: 0,
                test_enable_key: None,
            }),
        }
    }

    /// Configure (or clear) the test-enable key that gates TEST zone admission.
    pub async fn set_test_enable_key(&self, key: Option<String>) {
        self.inner.write().await.test_enable_key = key;
    }

    async fn enable_key_valid(&self, candidate: Option<&str>) -> bool {
        let state = self.inner.read().await;
        match (&state.test_enable_key, candidate) {
            (Some(configured), Some(given)) => configured == given,
            _ => false,
        }
    }

    /// Admit a new zone, enforcing the type cardinality invariants.
    ///
    /// `test_enable_key` must be supplied (and match the configured key) when
    /// `zone_type == Test`; ignored otherwise.
    pub async fn add_zone(
        &self,
        id: impl Into<String>,
        zone_type: ZoneType,
        test_enable_key: Option<&str>,
    ) -> Result<ZoneRecord, CommissionError> {
        if zone_type == ZoneType::Test && !self.enable_key_valid(test_enable_key).await {
            return Err(CommissionError::CommissionFailed(
                "test enable key invalid or not configured".into(),
            ));
        }

        let mut state = self.inner.write().await;

        match zone_type {
            ZoneType::Grid => {
                if state.zones.values().any(|z| z.zone_type == ZoneType::Grid) {
                    return Err(CommissionError::ZoneTypeExists);
                }
            }
            ZoneType::Local => {
                if state.zones.values().any(|z| z.zone_type == ZoneType::Local) {
                    return Err(CommissionError::ZoneTypeExists);
                }
            }
            ZoneType::Test => {}
        }

        if zone_type != ZoneType::Test {
            let non_test_count =
                state.zones.values().filter(|z| z.zone_type != ZoneType::Test).count();
            if non_test_count >= MAX_ZONES as usize {
                return Err(CommissionError::MaxZonesReached);
            }
        }

        let id = id.into();
        let zone_index = state.next_zone_index;
        state.next_zone_index += 1;
        let record = ZoneRecord::new(id.clone(), zone_type, zone_index);
        state.zones.insert(id, record.clone());
        tracing::info!(zone_id = %record.id, ?zone_type, zone_index, "zone admitted");
        Ok(record)
    }

    pub async fn remove_zone(&self, id: &str) -> Option<ZoneRecord> {
        let mut state = self.inner.write().await;
        let removed = state.zones.remove(id);
        if let Some(ref z) = removed {
            tracing::info!(zone_id = %z.id, "zone removed");
        }
        removed
    }

    pub async fn get(&self, id: &str) -> Option<ZoneRecord> {
        self.inner.read().await.zones.get(id).cloned()
    }

    pub async fn set_connected(&self, id: &str, connected: bool) {
        if let Some(z) = self.inner.write().await.zones.get_mut(id) {
            z.connected = connected;
        }
    }

    /// Arm or disarm a zone's failsafe timer bookkeeping flag. The actual
    /// deadline is tracked by the owning `DeviceService`; this is the
    /// persisted summary exposed via `getTestState` and snapshots.
    pub async fn set_failsafe_armed(&self, id: &str, armed: bool) {
        if let Some(z) = self.inner.write().await.zones.get_mut(id) {
            z.failsafe_armed = armed;
        }
    }

    pub async fn set_in_failsafe(&self, id: &str, in_failsafe: bool) {
        if let Some(z) = self.inner.write().await.zones.get_mut(id) {
            z.in_failsafe = in_failsafe;
        }
    }

    pub async fn list(&self) -> Vec<ZoneRecord> {
        self.inner.read().await.zones.values().cloned().collect()
    }

    pub async fn count_non_test(&self) -> usize {
        self.inner.read().await.zones.values().filter(|z| z.zone_type != ZoneType::Test).count()
    }

    /// True when neither a GRID nor a LOCAL slot is occupied, i.e. another
    /// zone can be admitted without exceeding `MaxZones` (used by the
    /// pairing-request listener and DEC-059 re-entry).
    pub async fn has_free_slot(&self) -> bool {
        self.count_non_test().await < MAX_ZONES as usize
    }

    /// Restore from a persisted snapshot (§6 "Persistence").
    pub async fn restore(&self, zones: Vec<ZoneRecord>, next_zone_index: u8) {
        let mut state = self.inner.write().await;
        state.zones = zones.into_iter().map(|z| (z.id.clone(), z)).collect();
        state.next_zone_index = next_zone_index;
    }
}

impl Default for ZoneManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "zone_tests.rs"]
mod tests;
