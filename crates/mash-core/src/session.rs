// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Alfred Jean LLC

//! The symmetric, bidirectional framed peer shared by both sides of a
//! connection (§4.3).
//!
//! Grounded on the teacher's `WsBridge` correlation-routing design
//! (`upstream/bridge.rs`): a `HashMap<String, PendingRequest>` keyed by a
//! request id, completed by the receive loop matching a response back to
//! its waiter. Adapted here from mpsc-channel delivery to `oneshot`
//! waiters (so `read`/`write`/`subscribe`/`unsubscribe`/`invoke` simply
//! `.await` the oneshot) and from string client/request ids to a per-session
//! `u32` `messageID` counter.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::error::{SessionError, StatusCode};
use crate::model::Value;
use crate::notify::NotificationSink;
use crate::protocol::ProtocolHandler;
use crate::wire::{decode_frame, encode_frame, read_frame, write_frame, Envelope, Operation};

/// Default outbound-call timeout (§4.3).
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(30);

/// Single, last-setter-wins inbound notification callback.
pub type NotificationHandler = Box<dyn Fn(Envelope) + Send + Sync>;

/// The operations a connected peer exposes to its own service layer.
/// Implemented once by `FramedSession`; `ZoneSession` (device-side) and
/// `DeviceSession` (controller-side) are the same type under two names.
#[async_trait]
pub trait Session: Send + Sync {
    async fn read(&self, endpoint_id: u8, feature_id: u8, attribute_ids: Vec<u16>) -> Result<Value, SessionError>;
    async fn write(&self, endpoint_id: u8, feature_id: u8, changes: Value) -> Result<(), SessionError>;
    async fn subscribe(
        &self,
        endpoint_id: u8,
        feature_id: u8,
        attribute_ids: Vec<u16>,
        min_interval: Option<Duration>,
        max_interval: Option<Duration>,
    ) -> Result<(u32, Value), SessionError>;
    async fn unsubscribe(&self, subscription_id: u32) -> Result<(), SessionError>;
    async fn invoke(
        &self,
        endpoint_id: u8,
        feature_id: u8,
        command_id: u8,
        params: Value,
    ) -> Result<Value, SessionError>;
    async fn send_notification(&self, envelope: Envelope) -> Result<(), SessionError>;
    async fn close(&self);
}

type PendingTable = RwLock<HashMap<u32, oneshot::Sender<Result<Envelope, SessionError>>>>;

/// A bidirectional, length-prefixed-CBOR-framed peer over any
/// `AsyncRead + AsyncWrite` transport.
pub struct FramedSession {
    next_message_id: AtomicU32,
    pending: PendingTable,
    writer: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    protocol: RwLock<Option<Arc<ProtocolHandler>>>,
    notification_handler: RwLock<Option<NotificationHandler>>,
    timeout: Duration,
    cancel: CancellationToken,
}

impl FramedSession {
    /// Split `stream` into its read/write halves, spawn the receive loop,
    /// and return the session handle plus its receive task's join handle.
    pub fn new<S>(stream: S, timeout: Duration) -> (Arc<Self>, tokio::task::JoinHandle<()>)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let session = Arc::new(Self {
            next_message_id: AtomicU32::new(0),
            pending: RwLock::new(HashMap::new()),
            writer: Mutex::new(Box::new(writer)),
            protocol: RwLock::new(None),
            notification_handler: RwLock::new(None),
            timeout,
            cancel: CancellationToken::new(),
        });
        let recv_session = Arc::clone(&session);
        let handle = tokio::spawn(async move { recv_session.receive_loop(reader).await });
        (session, handle)
    }

    /// Bind (or rebind) the inbound-request handler. Absent, every inbound
    /// request is answered `Unsupported` (§4.3 "Inbound request handling").
    pub async fn set_protocol_handler(&self, handler: Arc<ProtocolHandler>) {
        *self.protocol.write().await = Some(handler);
    }

    pub async fn set_notification_handler(&self, handler: NotificationHandler) {
        *self.notification_handler.write().await = Some(handler);
    }

    fn next_id(&self) -> u32 {
        self.next_message_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn send_frame(&self, envelope: &Envelope) -> Result<(), SessionError> {
        let frame = encode_frame(envelope)?;
        let mut writer = self.writer.lock().await;
        write_frame(&mut *writer, &frame[4..]).await
    }

    async fn receive_loop<R: AsyncRead + Unpin>(self: Arc<Self>, mut reader: R) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                frame = read_frame(&mut reader) => {
                    let body = match frame {
                        Ok(body) => body,
                        Err(_) => break,
                    };
                    match decode_frame(&body) {
                        Ok(envelope) => self.on_message(envelope).await,
                        Err(err) => {
                            tracing::warn!(%err, "frame failed to decode");
                            if let Some(message_id) = crate::wire::peek_request_message_id(&body) {
                                let response = Envelope::Response {
                                    message_id,
                                    status: StatusCode::InvalidParameter,
                                    payload: Value::Null,
                                };
                                if let Err(err) = self.send_frame(&response).await {
                                    tracing::warn!(%err, "failed to send response");
                                }
                            }
                        }
                    }
                }
            }
        }
        self.close().await;
    }

    async fn on_message(self: &Arc<Self>, envelope: Envelope) {
        match &envelope {
            Envelope::Request { .. } => {
                let message_id = envelope.message_id().unwrap_or(0);
                let handler = self.protocol.read().await.clone();
                let response = match handler {
                    Some(h) => h.handle(envelope).await,
                    None => Envelope::Response {
                        message_id,
                        status: StatusCode::Unsupported,
                        payload: Value::Null,
                    },
                };
                if let Err(err) = self.send_frame(&response).await {
                    tracing::warn!(%err, "failed to send response");
                }
            }
            Envelope::Response { message_id, .. } => {
                let message_id = *message_id;
                if let Some(tx) = self.pending.write().await.remove(&message_id) {
                    let _ = tx.send(Ok(envelope));
                }
            }
            Envelope::Notification { .. } => {
                if let Some(f) = self.notification_handler.read().await.as_ref() {
                    f(envelope);
                }
            }
        }
    }

    /// Allocate a messageID, send a request, and await its response up to
    /// the session timeout.
    async fn call(
        &self,
        operation: Operation,
        endpoint_id: u8,
        feature_id: u8,
        payload: Value,
    ) -> Result<Envelope, SessionError> {
        let message_id = self.next_id();
        let (tx, rx) = oneshot::channel();
        self.pending.write().await.insert(message_id, tx);

        let request = Envelope::Request { message_id, operation, endpoint_id, feature_id, payload };
        if let Err(err) = self.send_frame(&request).await {
            self.pending.write().await.remove(&message_id);
            return Err(err);
        }

        let result: Result<Envelope, SessionError> = tokio::select! {
            _ = self.cancel.cancelled() => Err(SessionError::ClientClosed),
            res = rx => match res {
                Ok(inner) => inner,
                Err(_) => Err(SessionError::ClientClosed),
            },
            _ = tokio::time::sleep(self.timeout) => {
                self.pending.write().await.remove(&message_id);
                Err(SessionError::Timeout)
            }
        };
        result
    }

    async fn request(
        &self,
        operation: Operation,
        endpoint_id: u8,
        feature_id: u8,
        payload: Value,
    ) -> Result<Value, SessionError> {
        match self.call(operation, endpoint_id, feature_id, payload).await? {
            Envelope::Response { status, payload, .. } if status.is_success() => Ok(payload),
            Envelope::Response { status, .. } => Err(SessionError::Status(status)),
            _ => Err(SessionError::InvalidCbor("expected a response envelope".into())),
        }
    }
}

fn attribute_ids_payload(attribute_ids: Vec<u16>) -> Value {
    Value::List(attribute_ids.into_iter().map(|id| Value::Uint64(u64::from(id))).collect())
}

#[async_trait]
impl Session for FramedSession {
    async fn read(&self, endpoint_id: u8, feature_id: u8, attribute_ids: Vec<u16>) -> Result<Value, SessionError> {
        let payload = Value::Map(BTreeMap::from([
            ("attribute_ids".to_owned(), attribute_ids_payload(attribute_ids)),
        ]));
        self.request(Operation::Read, endpoint_id, feature_id, payload).await
    }

    async fn write(&self, endpoint_id: u8, feature_id: u8, changes: Value) -> Result<(), SessionError> {
        self.request(Operation::Write, endpoint_id, feature_id, changes).await.map(|_| ())
    }

    async fn subscribe(
        &self,
        endpoint_id: u8,
        feature_id: u8,
        attribute_ids: Vec<u16>,
        min_interval: Option<Duration>,
        max_interval: Option<Duration>,
    ) -> Result<(u32, Value), SessionError> {
        let mut fields = BTreeMap::new();
        fields.insert("attribute_ids".to_owned(), attribute_ids_payload(attribute_ids));
        if let Some(min) = min_interval {
            fields.insert("min_interval_ms".to_owned(), Value::Uint64(min.as_millis() as u64));
        }
        if let Some(max) = max_interval {
            fields.insert("max_interval_ms".to_owned(), Value::Uint64(max.as_millis() as u64));
        }

        let payload = self.request(Operation::Subscribe, endpoint_id, feature_id, Value::Map(fields)).await?;
        let Value::Map(map) = payload else {
            return Err(SessionError::InvalidCbor("expected map payload".into()));
        };
        let Some(Value::Uint64(sub_id)) = map.get("sub_id") else {
            return Err(SessionError::InvalidCbor("missing sub_id".into()));
        };
        let current = map.get("current_values").cloned().unwrap_or_else(|| Value::Map(BTreeMap::new()));
        Ok((*sub_id as u32, current))
    }

    async fn unsubscribe(&self, subscription_id: u32) -> Result<(), SessionError> {
        let payload = Value::Map(BTreeMap::from([
            ("sub_id".to_owned(), Value::Uint64(u64::from(subscription_id))),
        ]));
        // Feature 0 is reserved for unsubscribe (§4.4); endpoint is irrelevant.
        self.request(Operation::Unsubscribe, 0, 0, payload).await.map(|_| ())
    }

    async fn invoke(
        &self,
        endpoint_id: u8,
        feature_id: u8,
        command_id: u8,
        params: Value,
    ) -> Result<Value, SessionError> {
        let payload = Value::Map(BTreeMap::from([
            ("command_id".to_owned(), Value::Uint64(u64::from(command_id))),
            ("params".to_owned(), params),
        ]));
        self.request(Operation::Invoke, endpoint_id, feature_id, payload).await
    }

    async fn send_notification(&self, envelope: Envelope) -> Result<(), SessionError> {
        self.send_frame(&envelope).await
    }

    async fn close(&self) {
        self.cancel.cancel();
        for (_, tx) in self.pending.write().await.drain() {
            let _ = tx.send(Err(SessionError::ClientClosed));
        }
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

#[async_trait]
impl NotificationSink for FramedSession {
    async fn send_notification(&self, envelope: Envelope) -> Result<(), SessionError> {
        self.send_frame(&envelope).await
    }
}

/// Device-side view of a connected controller. Same type as `DeviceSession`
/// under the spec's "one design, two names" framing (§4.3).
pub type ZoneSession = FramedSession;

/// Controller-side view of a connected device.
pub type DeviceSession = FramedSession;

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
