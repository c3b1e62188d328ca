// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Alfred Jean LLC

//! PASE setup-code attempt back-off (§4.7).
//!
//! Grounded on the teacher's `credential/refresh.rs::refresh_with_retries`
//! back-off shape, but table-driven across four fixed tiers rather than
//! geometric, since the spec gives fixed per-tier delays rather than a
//! doubling factor.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// The four fixed back-off delays (§4.7). Applied *before* responding to
/// the attempt that follows the one just recorded.
#[derive(Debug, Clone, Copy)]
pub struct PaseTiers {
    pub tier0: Duration,
    pub tier1: Duration,
    pub tier2: Duration,
    pub tier3: Duration,
}

impl Default for PaseTiers {
    fn default() -> Self {
        Self {
            tier0: Duration::ZERO,
            tier1: Duration::from_secs(1),
            tier2: Duration::from_secs(3),
            tier3: Duration::from_secs(10),
        }
    }
}

/// Tracks failed PASE setup-code attempts within one commissioning window
/// and reports the delay the caller should apply before accepting the next
/// attempt.
pub struct PaseAttemptTracker {
    tiers: PaseTiers,
    attempts: AtomicU32,
}

impl PaseAttemptTracker {
    pub fn new(tiers: PaseTiers) -> Self {
        Self { tiers, attempts: AtomicU32::new(0) }
    }

    /// Record a failed attempt and return the delay to apply before the
    /// next one is accepted (invariant 3).
    pub fn record_failure(&self) -> Duration {
        let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        self.tier_for(n)
    }

    fn tier_for(&self, attempt_count: u32) -> Duration {
        match attempt_count {
            1..=3 => self.tiers.tier0,
            4..=6 => self.tiers.tier1,
            7..=10 => self.tiers.tier2,
            _ => self.tiers.tier3,
        }
    }

    /// Reset the attempt count to zero (window close, successful PASE, or
    /// test-state reset).
    pub fn reset(&self) {
        self.attempts.store(0, Ordering::SeqCst);
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Default for PaseAttemptTracker {
    fn default() -> Self {
        Self::new(PaseTiers::default())
    }
}

#[cfg(test)]
#[path = "pase_tests.rs"]
mod tests;
