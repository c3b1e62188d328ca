// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Alfred Jean LLC

//! `triggerTestEvent` opcode dispatch and `getTestState` diagnostics
//! (§4.1 "Test-mode triggers").
//!
//! The feature-domain business logic an opcode ultimately drives —
//! measurement power, EV plug state, control/process states, fault/standby/
//! running — is out of scope (§1, "consumed via trigger dispatch"). This
//! module only decodes the 64-bit opcode and routes it: device-domain codes
//! (feature id 0, mirroring feature id 0 being reserved for unsubscribe at
//! the protocol layer, §4.4) are handled directly against `DeviceService`;
//! anything else is forwarded to whatever command the target feature
//! registered under a reserved command id, the same way `ProtocolHandler`
//! routes an ordinary `Invoke`.

use std::collections::BTreeMap;
use std::sync::Arc;

use mash_core::{CallerContext, CommissionError, StatusCode, Value, ZoneType};

use crate::service::DeviceService;

/// Feature id reserved for device-lifecycle opcodes.
pub const DEVICE_DOMAIN_FEATURE: u8 = 0;

/// Endpoint the feature-domain forwarding path targets. Test fixtures model
/// the appliance under test as a single primary endpoint.
const FEATURE_ENDPOINT: u8 = 0;

/// Command id reserved for feature-domain trigger dispatch.
pub const FEATURE_TRIGGER_COMMAND_ID: u8 = 0xFE;

const ENTER_COMMISSIONING: u16 = 0;
const EXIT_COMMISSIONING: u16 = 1;
const FACTORY_RESET: u16 = 2;
const RESET_TEST_STATE: u16 = 3;
const ADJUST_CLOCK_OFFSET: u16 = 4;

/// A 64-bit test opcode: high 16 bits select the feature domain, the next
/// 16 bits select an opcode within it, the low 32 bits carry a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestOpcode(pub u64);

impl TestOpcode {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn feature_id(&self) -> u8 {
        (self.0 >> 48) as u8
    }

    pub fn code(&self) -> u16 {
        ((self.0 >> 32) & 0xFFFF) as u16
    }

    pub fn param(&self) -> u32 {
        (self.0 & 0xFFFF_FFFF) as u32
    }
}

#[derive(Debug, Clone)]
pub enum TestTriggerError {
    UnknownDeviceOpcode(u16),
    FeatureRejected(StatusCode),
    Commission(CommissionError),
}

impl std::fmt::Display for TestTriggerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownDeviceOpcode(code) => write!(f, "unknown device-domain test opcode {code}"),
            Self::FeatureRejected(status) => write!(f, "feature-domain test opcode rejected: {status}"),
            Self::Commission(err) => write!(f, "commissioning action failed: {err}"),
        }
    }
}

impl std::error::Error for TestTriggerError {}

impl From<CommissionError> for TestTriggerError {
    fn from(err: CommissionError) -> Self {
        Self::Commission(err)
    }
}

pub async fn dispatch(service: &Arc<DeviceService>, opcode: TestOpcode) -> Result<(), TestTriggerError> {
    if opcode.feature_id() == DEVICE_DOMAIN_FEATURE {
        dispatch_device_domain(service, opcode).await
    } else {
        dispatch_feature_domain(service, opcode).await
    }
}

async fn dispatch_device_domain(
    service: &Arc<DeviceService>,
    opcode: TestOpcode,
) -> Result<(), TestTriggerError> {
    match opcode.code() {
        ENTER_COMMISSIONING => {
            service.enter_commissioning_mode().await?;
            Ok(())
        }
        EXIT_COMMISSIONING => {
            service.exit_commissioning_mode().await;
            Ok(())
        }
        FACTORY_RESET => {
            service.factory_reset().await;
            Ok(())
        }
        RESET_TEST_STATE => {
            service.reset_test_state().await;
            Ok(())
        }
        ADJUST_CLOCK_OFFSET => {
            // Low 32 bits reinterpreted as a signed millisecond offset.
            let offset_ms = opcode.param() as i32 as i64;
            service.set_clock_offset_ms(offset_ms);
            Ok(())
        }
        other => Err(TestTriggerError::UnknownDeviceOpcode(other)),
    }
}

async fn dispatch_feature_domain(
    service: &Arc<DeviceService>,
    opcode: TestOpcode,
) -> Result<(), TestTriggerError> {
    let model = service.model().read().await;
    let Some(feature) = model.feature(FEATURE_ENDPOINT, opcode.feature_id()) else {
        return Err(TestTriggerError::FeatureRejected(StatusCode::InvalidFeature));
    };
    let Some(command) = feature.commands.get(&FEATURE_TRIGGER_COMMAND_ID) else {
        return Err(TestTriggerError::FeatureRejected(StatusCode::Unsupported));
    };
    match (command.handler)(CallerContext::default(), &Value::Uint64(opcode.0)) {
        Ok(_) => Ok(()),
        Err(code) => Err(TestTriggerError::FeatureRejected(StatusCode::Feature(code))),
    }
}

/// Per-zone fields of `getTestState`'s diagnostic snapshot.
#[derive(Debug, Clone)]
pub struct ZoneDiagnostics {
    pub zone_id: String,
    pub zone_type: ZoneType,
    pub connected: bool,
    pub subscription_count: usize,
    pub failsafe_armed: bool,
    pub in_failsafe: bool,
}

/// `getTestState`'s full diagnostic snapshot (§4.1).
#[derive(Debug, Clone)]
pub struct TestStateSnapshot {
    pub zones: Vec<ZoneDiagnostics>,
    pub clock_offset_ms: i64,
    pub commissioning_open: bool,
    pub active_connection_count: usize,
    pub attribute_values: BTreeMap<(u8, u8, u16), Value>,
}

pub async fn snapshot(service: &DeviceService) -> TestStateSnapshot {
    let mut zones = Vec::new();
    for zone in service.zones().list().await {
        let subscription_count = service.subscription_count(&zone.id).await;
        zones.push(ZoneDiagnostics {
            zone_id: zone.id,
            zone_type: zone.zone_type,
            connected: zone.connected,
            subscription_count,
            failsafe_armed: zone.failsafe_armed,
            in_failsafe: zone.in_failsafe,
        });
    }

    let attribute_values = {
        let model = service.model().read().await;
        let mut values = BTreeMap::new();
        for endpoint in model.endpoints.values() {
            for feature in endpoint.features.values() {
                for attr in feature.attributes.values() {
                    values.insert((endpoint.id, feature.id, attr.id), attr.value.clone());
                }
            }
        }
        values
    };

    TestStateSnapshot {
        zones,
        clock_offset_ms: service.clock_offset_ms(),
        commissioning_open: service.commissioning_is_open().await,
        active_connection_count: service.active_connection_count().await,
        attribute_values,
    }
}

#[cfg(test)]
#[path = "test_trigger_tests.rs"]
mod tests;
