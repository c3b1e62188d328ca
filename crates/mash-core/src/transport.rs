// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Alfred Jean LLC

//! Transport and PASE-handshake collaborator interfaces (§1 "Out of
//! scope", §2 "Commissioning", §6).
//!
//! The TLS transport and the PASE cryptographic primitive are both external
//! collaborators the core only orchestrates around (§1). These traits are
//! the seams `mash-device`/`mash-controller` dial/accept/handshake through;
//! no production implementation lives in this crate. `tests/specs` bypasses
//! them entirely and wires `Session`s directly over `tokio::io::duplex`.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::DiscoveryError;

/// A live, bidirectional byte stream to a peer, post-handshake. Blanket
/// implemented for anything already satisfying the bounds so callers can
/// box an owned stream and hand it to `FramedSession::new`.
pub trait Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> Stream for T {}

/// Dials the controller side of a connection. `skip_verify` reflects PASE
/// providing its own authentication during commissioning (§2
/// "Commissioning": "a transport with server-cert skipped").
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(
        &self,
        host: &str,
        port: u16,
        skip_verify: bool,
    ) -> Result<Box<dyn Stream>, DiscoveryError>;
}

/// One accepted connection, already classified by the transport as either a
/// fresh commissioning attempt (PASE still to run) or an already-authenticated
/// reconnection to a known zone (mutual-cert validation, out of scope here,
/// already happened). The device never re-derives this itself.
pub enum IncomingConnection {
    Commissioning(Box<dyn Stream>),
    Operational { zone_id: String, stream: Box<dyn Stream> },
}

/// Accepts the device side of a connection.
#[async_trait]
pub trait Listener: Send + Sync {
    async fn accept(&self) -> Result<IncomingConnection, DiscoveryError>;
    fn local_port(&self) -> u16;
}

/// The PASE cryptographic primitive. Out of scope to implement for real
/// (§1); both sides must derive the same shared secret from the same setup
/// code without trusting the transport's certificate.
#[async_trait]
pub trait PaseHandshake: Send + Sync {
    async fn run_as_initiator(
        &self,
        stream: &mut (dyn Stream),
        setup_code: &str,
    ) -> Result<Vec<u8>, DiscoveryError>;

    async fn run_as_responder(
        &self,
        stream: &mut (dyn Stream),
        setup_code: &str,
    ) -> Result<Vec<u8>, DiscoveryError>;
}
