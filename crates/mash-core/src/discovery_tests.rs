// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::sync::atomic::{AtomicUsize, Ordering};

#[tokio::test]
async fn find_by_discriminator_sees_published_service() {
    let discovery = FakeDiscovery::new();
    discovery
        .publish_commissionable(CommissionableService {
            discriminator: 1001,
            host: "127.0.0.1".to_owned(),
            port: 9000,
        })
        .await;

    let found = discovery.find_by_discriminator(1001).await.expect("should be visible");
    assert_eq!(found.port, 9000);
    assert!(discovery.find_by_discriminator(9999).await.is_none());
}

#[tokio::test]
async fn withdraw_commissionable_hides_the_service() {
    let discovery = FakeDiscovery::new();
    discovery
        .publish_commissionable(CommissionableService {
            discriminator: 2001,
            host: "127.0.0.1".to_owned(),
            port: 9001,
        })
        .await;
    discovery.withdraw_commissionable(2001).await;

    assert!(discovery.find_all_by_discriminator(2001).await.is_empty());
}

#[tokio::test]
async fn announce_pairing_request_notifies_registered_listeners() {
    let discovery = FakeDiscovery::new();
    let seen = Arc::new(AtomicUsize::new(0));
    let seen_clone = seen.clone();
    discovery
        .browse_pairing_requests(Arc::new(move |_info| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
        }))
        .await;

    discovery
        .announce_pairing_request(PairingRequestInfo {
            discriminator: 2001,
            zone_id: "0123456789abcdef".to_owned(),
            zone_name: "kitchen".to_owned(),
            expires_at: Instant::now(),
        })
        .await
        .expect("announce should succeed");

    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn stop_pairing_request_does_not_notify_future_listeners_of_a_removed_request() {
    let discovery = FakeDiscovery::new();
    discovery
        .announce_pairing_request(PairingRequestInfo {
            discriminator: 3001,
            zone_id: "zone".to_owned(),
            zone_name: "garage".to_owned(),
            expires_at: Instant::now(),
        })
        .await
        .expect("announce should succeed");

    discovery.stop_pairing_request(3001).await;

    let state = discovery.state.read().await;
    assert!(!state.pairing_requests.contains_key(&3001));
}
