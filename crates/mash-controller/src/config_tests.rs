// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn defaults_match_spec() {
    let config = ControllerServiceConfig::new();
    assert_eq!(config.pairing_request_poll_interval, Duration::from_millis(250));
    assert!(config.enable_operational_reconnect);
}

#[test]
fn builder_overrides_apply() {
    let config = ControllerServiceConfig::new()
        .with_zone_name("kitchen")
        .with_pairing_request_poll_interval(Duration::from_millis(50))
        .with_pairing_request_timeout(Duration::from_secs(5))
        .with_operational_reconnect(false);
    assert_eq!(config.zone_name, "kitchen");
    assert_eq!(config.pairing_request_poll_interval, Duration::from_millis(50));
    assert_eq!(config.pairing_request_timeout, Duration::from_secs(5));
    assert!(!config.enable_operational_reconnect);
}
