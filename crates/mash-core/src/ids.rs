// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Alfred Jean LLC

//! Deterministic `deviceID`/`zoneID` derivation from a PASE shared secret
//! (§4.2 "Commissioning by service record", invariant 5).
//!
//! Both peers run PASE independently and must arrive at the same id without
//! either side transmitting it (invariant 5: "derived identically from the
//! shared secret"). A keyed hash with a domain-separation label, truncated
//! to the spec's 16-hex-char zone id width, gives that guarantee.

use sha2::{Digest, Sha256};

const DEVICE_ID_DOMAIN: &[u8] = b"mash-device-id-v1";
const ZONE_ID_DOMAIN: &[u8] = b"mash-zone-id-v1";

/// Derive the stable device id from a PASE shared secret.
pub fn derive_device_id(shared_secret: &[u8]) -> String {
    derive_id(DEVICE_ID_DOMAIN, shared_secret)
}

/// Derive the zone id a device assigns a newly admitted controller, from
/// the same shared secret (§3 "Zone record (on device)": 16-hex-char id).
pub fn derive_zone_id(shared_secret: &[u8]) -> String {
    derive_id(ZONE_ID_DOMAIN, shared_secret)
}

fn derive_id(domain: &[u8], shared_secret: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    hasher.update(shared_secret);
    let digest = hasher.finalize();
    digest.iter().take(8).map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
#[path = "ids_tests.rs"]
mod tests;
