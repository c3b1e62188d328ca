// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Alfred Jean LLC

//! Cross-connection attribute-change fan-out (§4.6).
//!
//! Grounded on the teacher's `upstream/health.rs` ticker (a
//! `tokio::time::interval` loop with `MissedTickBehavior::Skip` sweeping
//! registered state) and `events.rs` (broadcasting a mutation to every
//! interested listener). Here the "listener" is a session's own
//! `SubscriptionManager`; the dispatcher is the single place that knows
//! about every session so one background sweep can coalesce and emit
//! notifications for all of them.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::{SessionError, StatusCode};
use crate::model::{CallerContext, DataModel, Value};
use crate::protocol::SubscribeOutcome;
use crate::subscription::{Subscription, SubscriptionManager};
use crate::wire::Envelope;

/// Delivers outbound frames (including `Notification` envelopes) to one
/// connected session. Implemented by the transport layer.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send_notification(&self, envelope: Envelope) -> Result<(), SessionError>;
}

struct SessionEntry {
    subscriptions: Arc<SubscriptionManager>,
    sink: Arc<dyn NotificationSink>,
}

#[derive(Default, Clone)]
struct PendingDelta {
    changes: BTreeMap<u16, Value>,
}

/// Default bounds applied when a subscribe request omits interval hints (§4.6).
pub const DEFAULT_MIN_INTERVAL: std::time::Duration = std::time::Duration::from_secs(1);
pub const DEFAULT_MAX_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);

/// Coalescing tick resolution for the background sweep loop.
const TICK_PERIOD: std::time::Duration = std::time::Duration::from_millis(100);

/// Service-wide registry of every session's inbound subscriptions, plus the
/// background loop that coalesces attribute mutations into per-subscription
/// notifications (§4.6 steps 1-4).
pub struct NotificationDispatcher {
    model: Arc<RwLock<DataModel>>,
    sessions: RwLock<HashMap<u64, SessionEntry>>,
    pending: RwLock<HashMap<(u64, u32), PendingDelta>>,
}

impl NotificationDispatcher {
    pub fn new(model: Arc<RwLock<DataModel>>) -> Arc<Self> {
        Arc::new(Self {
            model,
            sessions: RwLock::new(HashMap::new()),
            pending: RwLock::new(HashMap::new()),
        })
    }

    /// Register a newly established session so the sweep loop can reach it.
    pub async fn register_session(
        &self,
        session_id: u64,
        subscriptions: Arc<SubscriptionManager>,
        sink: Arc<dyn NotificationSink>,
    ) {
        self.sessions.write().await.insert(session_id, SessionEntry { subscriptions, sink });
    }

    /// Purge a session's inbound subscriptions and pending deltas on disconnect.
    pub async fn deregister_session(&self, session_id: u64) {
        if let Some(entry) = self.sessions.write().await.remove(&session_id) {
            entry.subscriptions.clear_inbound().await;
        }
        self.pending.write().await.retain(|(sid, _), _| *sid != session_id);
    }

    /// Clear a still-registered session's inbound subscriptions without
    /// tearing down the session itself (test-state reset, §4.1).
    pub async fn clear_session_subscriptions(&self, session_id: u64) {
        if let Some(entry) = self.sessions.read().await.get(&session_id) {
            entry.subscriptions.clear_inbound().await;
        }
        self.pending.write().await.retain(|(sid, _), _| *sid != session_id);
    }

    /// Number of inbound subscriptions held against a session (diagnostic
    /// snapshot, §4.1 "getTestState").
    pub async fn inbound_subscription_count(&self, session_id: u64) -> usize {
        match self.sessions.read().await.get(&session_id) {
            Some(entry) => entry.subscriptions.count_inbound().await,
            None => 0,
        }
    }

    /// Handle a `Subscribe` request: register the subscription and return an
    /// immediate priming snapshot (§4.6 step 1).
    pub async fn subscribe(
        &self,
        session_id: u64,
        endpoint_id: u8,
        feature_id: u8,
        attribute_ids: Vec<u16>,
        min_interval: Option<std::time::Duration>,
        max_interval: Option<std::time::Duration>,
        ctx: CallerContext,
    ) -> Result<SubscribeOutcome, StatusCode> {
        let current_values = {
            let model = self.model.read().await;
            model.read_attributes(endpoint_id, feature_id, &attribute_ids, ctx)?
        };

        let sessions = self.sessions.read().await;
        let entry = sessions.get(&session_id).ok_or(StatusCode::InvalidParameter)?;

        let sub = Subscription {
            id: 0,
            endpoint_id,
            feature_id,
            attribute_ids,
            min_interval: min_interval.unwrap_or(DEFAULT_MIN_INTERVAL),
            max_interval: max_interval.unwrap_or(DEFAULT_MAX_INTERVAL),
            last_emitted: Instant::now(),
            last_values: current_values.clone(),
        };
        let subscription_id = entry.subscriptions.add_inbound(sub).await;

        Ok(SubscribeOutcome { subscription_id, current_values })
    }

    /// Handle an `Unsubscribe` request. Returns false if the id was unknown.
    pub async fn unsubscribe(&self, session_id: u64, subscription_id: u32) -> bool {
        let sessions = self.sessions.read().await;
        let Some(entry) = sessions.get(&session_id) else {
            return false;
        };
        let removed = entry.subscriptions.remove_inbound(subscription_id).await.is_some();
        if removed {
            self.pending.write().await.remove(&(session_id, subscription_id));
        }
        removed
    }

    /// Record a mutated attribute value, queuing it against every matching
    /// inbound subscription across every session (§4.6 step 2).
    pub async fn notify_change(&self, endpoint_id: u8, feature_id: u8, attribute_id: u16, value: Value) {
        let sessions = self.sessions.read().await;
        let mut pending = self.pending.write().await;
        for (&session_id, entry) in sessions.iter() {
            let matches = entry.subscriptions.matching_inbound(endpoint_id, feature_id, attribute_id).await;
            for sub in matches {
                pending
                    .entry((session_id, sub.id))
                    .or_default()
                    .changes
                    .insert(attribute_id, value.clone());
            }
        }
    }

    /// Spawn the background coalescing/heartbeat loop (§4.6 steps 3-4). The
    /// returned token cancels it.
    pub fn start(self: &Arc<Self>) -> CancellationToken {
        let token = CancellationToken::new();
        let dispatcher = Arc::clone(self);
        let child = token.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TICK_PERIOD);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => dispatcher.sweep().await,
                }
            }
        });
        token
    }

    pub(crate) async fn sweep(&self) {
        let now = Instant::now();
        let sessions = self.sessions.read().await;
        for (&session_id, entry) in sessions.iter() {
            for sub in entry.subscriptions.list_inbound().await {
                let elapsed = now.saturating_duration_since(sub.last_emitted);

                let pending_changes = {
                    let mut pending = self.pending.write().await;
                    pending.remove(&(session_id, sub.id)).map(|p| p.changes)
                };

                let (changes, is_heartbeat) = match pending_changes {
                    Some(changes) if elapsed >= sub.min_interval => (changes, false),
                    Some(changes) => {
                        // Min interval not elapsed yet: put it back for next tick.
                        self.pending
                            .write()
                            .await
                            .entry((session_id, sub.id))
                            .or_default()
                            .changes
                            .extend(changes);
                        continue;
                    }
                    None if elapsed >= sub.max_interval => (sub.last_values.clone(), true),
                    None => continue,
                };

                if changes.is_empty() && !is_heartbeat {
                    continue;
                }

                let envelope = Envelope::Notification {
                    subscription_id: sub.id,
                    endpoint_id: sub.endpoint_id,
                    feature_id: sub.feature_id,
                    changes: changes.clone(),
                };

                if entry.sink.send_notification(envelope).await.is_err() {
                    continue;
                }

                let mut merged = sub.last_values.clone();
                merged.extend(changes);
                entry
                    .subscriptions
                    .update_inbound(sub.id, |s| {
                        s.last_emitted = now;
                        s.last_values = merged;
                    })
                    .await;
            }
        }
    }
}

#[cfg(test)]
#[path = "notify_tests.rs"]
mod tests;
