// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Alfred Jean LLC

//! Per-session subscription registry with two disjoint id spaces (§3 "Subscription", §4.5).
//!
//! Grounded on the teacher's `WsBridge` client registry
//! (`transport/ws_mux.rs`, `upstream/bridge.rs`): an `RwLock`-guarded map
//! keyed by a monotonic id handed out by an `AtomicU64` counter. Here the
//! counter/map pair is duplicated once per direction (inbound/outbound)
//! since the two spaces must never collide or share state (invariant 4).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::sync::RwLock;

use crate::model::Value;

/// A registered subscription (§3 "Subscription").
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: u32,
    pub endpoint_id: u8,
    pub feature_id: u8,
    /// Empty means "all attributes of the feature".
    pub attribute_ids: Vec<u16>,
    pub min_interval: std::time::Duration,
    pub max_interval: std::time::Duration,
    pub last_emitted: std::time::Instant,
    pub last_values: BTreeMap<u16, Value>,
}

impl Subscription {
    pub fn wants_attribute(&self, attr: u16) -> bool {
        self.attribute_ids.is_empty() || self.attribute_ids.contains(&attr)
    }
}

#[derive(Default)]
struct Space {
    next_id: AtomicU32,
    entries: RwLock<BTreeMap<u32, Subscription>>,
}

impl Space {
    async fn add(&self, mut sub: Subscription) -> u32 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        sub.id = id;
        self.entries.write().await.insert(id, sub);
        id
    }

    async fn remove(&self, id: u32) -> Option<Subscription> {
        self.entries.write().await.remove(&id)
    }

    async fn get(&self, id: u32) -> Option<Subscription> {
        self.entries.read().await.get(&id).cloned()
    }

    async fn list(&self) -> Vec<Subscription> {
        self.entries.read().await.values().cloned().collect()
    }

    async fn clear(&self) -> usize {
        let mut guard = self.entries.write().await;
        let n = guard.len();
        guard.clear();
        n
    }

    async fn count(&self) -> usize {
        self.entries.read().await.len()
    }
}

/// Registry of inbound (peer holds against us) and outbound (we hold
/// against peer) subscriptions for one session.
#[derive(Default)]
pub struct SubscriptionManager {
    inbound: Space,
    outbound: Space,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_inbound(&self, sub: Subscription) -> u32 {
        self.inbound.add(sub).await
    }

    pub async fn add_outbound(&self, sub: Subscription) -> u32 {
        self.outbound.add(sub).await
    }

    pub async fn remove_inbound(&self, id: u32) -> Option<Subscription> {
        self.inbound.remove(id).await
    }

    pub async fn remove_outbound(&self, id: u32) -> Option<Subscription> {
        self.outbound.remove(id).await
    }

    pub async fn get_inbound(&self, id: u32) -> Option<Subscription> {
        self.inbound.get(id).await
    }

    pub async fn get_outbound(&self, id: u32) -> Option<Subscription> {
        self.outbound.get(id).await
    }

    pub async fn list_inbound(&self) -> Vec<Subscription> {
        self.inbound.list().await
    }

    pub async fn list_outbound(&self) -> Vec<Subscription> {
        self.outbound.list().await
    }

    /// Every inbound subscription matching `(endpoint, feature)` whose
    /// `attribute_ids` is empty or contains `attr`.
    pub async fn matching_inbound(
        &self,
        endpoint_id: u8,
        feature_id: u8,
        attr: u16,
    ) -> Vec<Subscription> {
        self.inbound
            .list()
            .await
            .into_iter()
            .filter(|s| s.endpoint_id == endpoint_id && s.feature_id == feature_id)
            .filter(|s| s.wants_attribute(attr))
            .collect()
    }

    /// Remove every inbound subscription (session close or owning zone removal).
    /// Never touches outbound state.
    pub async fn clear_inbound(&self) -> usize {
        self.inbound.clear().await
    }

    pub async fn clear_outbound(&self) -> usize {
        self.outbound.clear().await
    }

    pub async fn update_inbound<F: FnOnce(&mut Subscription)>(&self, id: u32, f: F) {
        if let Some(sub) = self.inbound.entries.write().await.get_mut(&id) {
            f(sub);
        }
    }

    pub async fn count_inbound(&self) -> usize {
        self.inbound.count().await
    }

    pub async fn count_outbound(&self) -> usize {
        self.outbound.count().await
    }
}

#[cfg(test)]
#[path = "subscription_tests.rs"]
mod tests;
