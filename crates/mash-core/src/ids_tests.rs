// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn device_id_is_deterministic_and_16_hex_chars() {
    let secret = b"a shared secret";
    let a = derive_device_id(secret);
    let b = derive_device_id(secret);
    assert_eq!(a, b);
    assert_eq!(a.len(), 16);
    assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn different_secrets_yield_different_ids() {
    assert_ne!(derive_device_id(b"secret-one"), derive_device_id(b"secret-two"));
}

#[test]
fn device_id_and_zone_id_are_domain_separated() {
    let secret = b"a shared secret";
    assert_ne!(derive_device_id(secret), derive_zone_id(secret));
}
