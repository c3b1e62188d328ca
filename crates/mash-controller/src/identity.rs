// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Alfred Jean LLC

//! Controller zone identity: a Zone CA the controller generates or loads,
//! from which a stable `zoneID` is derived (§4.2 "Responsibility").
//!
//! Mirrors `mash_core::ids`'s domain-separated-hash approach: a stable seed
//! hashed with a domain label rather than the `zoneID` itself being
//! generated or transmitted, so `renew()` can rotate certificate material
//! without changing the identity peers already trust.
//!
//! Grounded on the teacher's `credential/pkce.rs` (`rand::rng().fill(...)`
//! for generating verifier bytes).

use rand::Rng;
use sha2::{Digest, Sha256};

const ZONE_CA_DOMAIN: &[u8] = b"mash-controller-zone-ca-v1";

/// A controller's Zone CA identity: a 32-byte seed plus the `zoneID`
/// derived from it (§9 Open Question: `controller.zoneID` stays the
/// certificate-derived identity and must never be overwritten by a
/// PASE-derived `deviceID`).
#[derive(Debug, Clone)]
pub struct ZoneIdentity {
    seed: [u8; 32],
    zone_id: String,
}

impl ZoneIdentity {
    /// Generate a fresh Zone CA identity.
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        rand::rng().fill(&mut seed);
        Self::from_seed(seed)
    }

    /// Load a previously generated identity from its saved seed.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let zone_id = derive_zone_id(&seed);
        Self { seed, zone_id }
    }

    pub fn seed(&self) -> [u8; 32] {
        self.seed
    }

    pub fn zone_id(&self) -> &str {
        &self.zone_id
    }

    /// Negotiate a certificate renewal (§4.2 "Renewal"). Real certificate
    /// issuance is an external-CA collaborator out of scope (§1); this
    /// re-derives from the same seed so the `zoneID` — and every session
    /// keyed by it — is unaffected by the renewal.
    pub fn renew(&self) -> ZoneIdentity {
        Self::from_seed(self.seed)
    }
}

fn derive_zone_id(seed: &[u8; 32]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(ZONE_CA_DOMAIN);
    hasher.update(seed);
    let digest = hasher.finalize();
    digest.iter().take(8).map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
#[path = "identity_tests.rs"]
mod tests;
