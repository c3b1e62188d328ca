// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Alfred Jean LLC

//! Status codes and error taxonomy shared across the session/protocol layer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Wire-level status code returned in a `Response` envelope.
///
/// Mirrors §6 of the service core spec: success plus a small fixed set of
/// protocol errors, with room for feature-defined codes above `FEATURE_DEFINED_BASE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    Success,
    InvalidEndpoint,
    InvalidFeature,
    InvalidParameter,
    ResourceExhausted,
    Unsupported,
    /// A feature-defined failure, carrying an opaque numeric code.
    Feature(u16),
}

impl StatusCode {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("SUCCESS"),
            Self::InvalidEndpoint => f.write_str("INVALID_ENDPOINT"),
            Self::InvalidFeature => f.write_str("INVALID_FEATURE"),
            Self::InvalidParameter => f.write_str("INVALID_PARAMETER"),
            Self::ResourceExhausted => f.write_str("RESOURCE_EXHAUSTED"),
            Self::Unsupported => f.write_str("UNSUPPORTED"),
            Self::Feature(code) => write!(f, "FEATURE({code})"),
        }
    }
}

/// Errors surfaced by the session layer (§7 "Session").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The outbound call's timeout elapsed before a response arrived.
    Timeout,
    /// The caller's cancellation token fired before a response arrived.
    Cancelled,
    /// `close()` was called while the call was pending.
    ClientClosed,
    /// The peer returned a non-success status.
    Status(StatusCode),
    /// The frame failed to decode (malformed length prefix, bad CBOR, or a
    /// duplicate map key — see §4.3 / invariant 8).
    InvalidCbor(String),
    /// The transport itself failed (read/write error, peer hung up).
    Transport(String),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => f.write_str("call timed out"),
            Self::Cancelled => f.write_str("call cancelled"),
            Self::ClientClosed => f.write_str("session closed"),
            Self::Status(code) => write!(f, "peer returned {code}"),
            Self::InvalidCbor(msg) => write!(f, "invalid CBOR: {msg}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
        }
    }
}

impl std::error::Error for SessionError {}

/// Lifecycle errors shared by `DeviceService` and `ControllerService` (§7 "Lifecycle").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleError {
    AlreadyStarted,
    NotStarted,
}

impl fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyStarted => f.write_str("service already started"),
            Self::NotStarted => f.write_str("service not started"),
        }
    }
}

impl std::error::Error for LifecycleError {}

/// Commissioning errors (§7 "Commissioning").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommissionError {
    CommissionFailed(String),
    ZoneTypeExists,
    MaxZonesReached,
    PairingRequestTimeout,
    CommissioningCancelled,
    NoPairingRequestActive,
    ZoneIdRequired,
    ContextCancelled,
}

impl fmt::Display for CommissionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CommissionFailed(msg) => write!(f, "commissioning failed: {msg}"),
            Self::ZoneTypeExists => f.write_str("a zone of this type already exists"),
            Self::MaxZonesReached => f.write_str("max zones reached"),
            Self::PairingRequestTimeout => f.write_str("pairing request timed out"),
            Self::CommissioningCancelled => f.write_str("commissioning cancelled"),
            Self::NoPairingRequestActive => f.write_str("no pairing request active"),
            Self::ZoneIdRequired => f.write_str("controller zone id is required"),
            Self::ContextCancelled => f.write_str("context cancelled"),
        }
    }
}

impl std::error::Error for CommissionError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    NotFound,
}

impl fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => f.write_str("not found"),
        }
    }
}

impl std::error::Error for DiscoveryError {}
