// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Alfred Jean LLC

//! Controller service configuration (§4.2).

use std::time::Duration;

/// Default interval between `FindAllByDiscriminator` polls while a deferred
/// commission is awaiting a pairing-request response (§4.2 step 3).
pub const DEFAULT_PAIRING_REQUEST_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Default time a deferred commission waits for a pairing request to
/// resolve before failing `PairingRequestTimeout` (§4.2 step 3b).
pub const DEFAULT_PAIRING_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Default zone name announced in a pairing request (§4.2 step 2).
pub const DEFAULT_ZONE_NAME: &str = "controller";

#[derive(Debug, Clone)]
pub struct ControllerServiceConfig {
    /// The zone name this controller announces in pairing requests. Real
    /// deployments would let a user name their zone; out of scope here
    /// (§1), so a fixed default is used unless overridden.
    pub zone_name: String,
    pub pairing_request_poll_interval: Duration,
    pub pairing_request_timeout: Duration,
    /// Whether the controller subscribes to `BrowseOperational` and
    /// attempts to reconnect disconnected devices it observes (§4.2
    /// "Reconnection").
    pub enable_operational_reconnect: bool,
    pub session_timeout: Duration,
}

impl ControllerServiceConfig {
    pub fn new() -> Self {
        Self {
            zone_name: DEFAULT_ZONE_NAME.to_owned(),
            pairing_request_poll_interval: DEFAULT_PAIRING_REQUEST_POLL_INTERVAL,
            pairing_request_timeout: DEFAULT_PAIRING_REQUEST_TIMEOUT,
            enable_operational_reconnect: true,
            session_timeout: mash_core::session::DEFAULT_SESSION_TIMEOUT,
        }
    }

    pub fn with_zone_name(mut self, zone_name: impl Into<String>) -> Self {
        self.zone_name = zone_name.into();
        self
    }

    pub fn with_pairing_request_poll_interval(mut self, interval: Duration) -> Self {
        self.pairing_request_poll_interval = interval;
        self
    }

    pub fn with_pairing_request_timeout(mut self, timeout: Duration) -> Self {
        self.pairing_request_timeout = timeout;
        self
    }

    pub fn with_operational_reconnect(mut self, enabled: bool) -> Self {
        self.enable_operational_reconnect = enabled;
        self
    }

    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }
}

impl Default for ControllerServiceConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
