// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Alfred Jean LLC

//! Controller-side lifecycle events (§4.2, §8 scenario table).
//!
//! Grounded on the teacher's `events.rs::MuxEvent` broadcast type, same as
//! `mash_device::events::DeviceEvent`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControllerEvent {
    Commissioned { device_id: String, zone_id: String },
    CommissionFailed { discriminator: Option<u16> },
    DeviceReconnected { device_id: String },
    DeviceRemoved { device_id: String },
    Renewed { zone_id: String },
}

/// Default capacity for the event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;
