// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Alfred Jean LLC

//! Device-side lifecycle events (§4.1, §9 "Global mutable state").
//!
//! Grounded on the teacher's `events.rs::MuxEvent` broadcast type: a tagged
//! enum sent on a `tokio::sync::broadcast::Sender` so listeners never block
//! the service's own lock while handling an event.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceEvent {
    CommissioningOpened,
    CommissioningClosed,
    Connected { zone_id: String },
    ZoneRemoved { zone_id: String },
    FailsafeExpired { zone_id: String },
    TestStateReset,
}

/// Default capacity for the event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;
