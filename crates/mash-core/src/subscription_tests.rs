// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::time::{Duration, Instant};

fn sub(endpoint_id: u8, feature_id: u8, attrs: Vec<u16>) -> Subscription {
    Subscription {
        id: 0,
        endpoint_id,
        feature_id,
        attribute_ids: attrs,
        min_interval: Duration::from_secs(1),
        max_interval: Duration::from_secs(60),
        last_emitted: Instant::now(),
        last_values: BTreeMap::new(),
    }
}

#[tokio::test]
async fn inbound_and_outbound_ids_are_independent_and_monotonic() {
    let mgr = SubscriptionManager::new();
    let in1 = mgr.add_inbound(sub(1, 1, vec![])).await;
    let in2 = mgr.add_inbound(sub(1, 2, vec![])).await;
    let out1 = mgr.add_outbound(sub(1, 1, vec![])).await;
    let out2 = mgr.add_outbound(sub(1, 2, vec![])).await;

    assert!(in2 > in1);
    assert!(out2 > out1);
    // Independent spaces: both start from 1.
    assert_eq!(in1, out1);
}

#[tokio::test]
async fn matching_inbound_respects_empty_and_nonempty_attribute_filters() {
    let mgr = SubscriptionManager::new();
    mgr.add_inbound(sub(1, 1, vec![])).await; // wants all
    mgr.add_inbound(sub(1, 1, vec![5])).await; // wants only attr 5
    mgr.add_inbound(sub(1, 2, vec![5])).await; // different feature

    let matches = mgr.matching_inbound(1, 1, 5).await;
    assert_eq!(matches.len(), 2);

    let matches = mgr.matching_inbound(1, 1, 6).await;
    assert_eq!(matches.len(), 1, "only the empty-filter subscription should match attr 6");
}

#[tokio::test]
async fn clear_inbound_never_touches_outbound() {
    let mgr = SubscriptionManager::new();
    mgr.add_inbound(sub(1, 1, vec![])).await;
    mgr.add_outbound(sub(1, 1, vec![])).await;

    let cleared = mgr.clear_inbound().await;
    assert_eq!(cleared, 1);
    assert_eq!(mgr.count_inbound().await, 0);
    assert_eq!(mgr.count_outbound().await, 1);
}

#[tokio::test]
async fn remove_inbound_by_id() {
    let mgr = SubscriptionManager::new();
    let id = mgr.add_inbound(sub(1, 1, vec![])).await;
    assert!(mgr.remove_inbound(id).await.is_some());
    assert!(mgr.get_inbound(id).await.is_none());
}
