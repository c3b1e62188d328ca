// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Alfred Jean LLC

//! Pure-function request handler over the device data model (§4.4).
//!
//! Grounded on the teacher's `handle_client_input` dispatch-by-tag pattern
//! in `transport/ws_mux.rs`: match an operation discriminant, delegate to a
//! per-operation function, return a uniform result. Generalized here from
//! HTTP-proxying to direct, in-process data-model mutation.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::StatusCode;
use crate::model::{CallerContext, DataModel, Value};
use crate::notify::NotificationDispatcher;
use crate::wire::{Envelope, Operation};

/// Result of handling one `Subscribe` request.
pub struct SubscribeOutcome {
    pub subscription_id: u32,
    pub current_values: BTreeMap<u16, Value>,
}

/// Endpoint/feature/command reserved for the in-band `RemoveZone` command a
/// connected peer invokes on itself (§3 "Lifecycles": zones are "destroyed
/// by `RemoveZone` (local) or receipt of a `RemoveZone` command (remote)").
/// Feature 0 is already reserved for device-lifecycle concerns (test
/// triggers use the same id, §4.1), so this reuses it rather than carving
/// out a second reserved range.
pub const REMOVE_ZONE_ENDPOINT: u8 = 0;
pub const REMOVE_ZONE_FEATURE: u8 = 0;
pub const REMOVE_ZONE_COMMAND_ID: u8 = 0xF0;

/// Resolves the cyclic Service ↔ Session ↔ ProtocolHandler ↔ Device
/// dependency (§7 "Cyclic dependencies") the same way as the notification
/// push side: the owning service hands the handler a closure at
/// construction rather than the handler reaching back into the service
/// directly.
pub type RemoveZoneHook =
    Arc<dyn Fn(CallerContext) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Binds one session's inbound requests to a shared data model and the
/// service-wide notification dispatcher.
pub struct ProtocolHandler {
    model: Arc<RwLock<DataModel>>,
    dispatcher: Arc<NotificationDispatcher>,
    /// The session's own id in the dispatcher's per-session registry
    /// (§4.5/§4.6): subscribe registers against this session, unsubscribe
    /// is scoped to it.
    session_id: u64,
    /// Threaded into read hooks and subscribe priming (§4.4).
    peer_zone_index: Option<u8>,
    remove_zone_hook: Option<RemoveZoneHook>,
}

impl ProtocolHandler {
    pub fn new(
        model: Arc<RwLock<DataModel>>,
        dispatcher: Arc<NotificationDispatcher>,
        session_id: u64,
        peer_zone_index: Option<u8>,
    ) -> Self {
        Self { model, dispatcher, session_id, peer_zone_index, remove_zone_hook: None }
    }

    /// Attach the `RemoveZone` hook (§3, §4.2 "RemoveDevice"). Without one,
    /// a peer invoking `RemoveZone` gets `Unsupported`.
    pub fn with_remove_zone_hook(mut self, hook: RemoveZoneHook) -> Self {
        self.remove_zone_hook = Some(hook);
        self
    }

    fn ctx(&self) -> CallerContext {
        CallerContext { peer_zone_index: self.peer_zone_index }
    }

    /// Handle one decoded `Request` envelope, returning the `Response` to send.
    pub async fn handle(&self, request: Envelope) -> Envelope {
        let Envelope::Request { message_id, operation, endpoint_id, feature_id, payload } =
            request
        else {
            return Envelope::Response {
                message_id: request.message_id().unwrap_or(0),
                status: StatusCode::InvalidParameter,
                payload: Value::Null,
            };
        };

        let (status, payload) = match operation {
            Operation::Read => self.read(endpoint_id, feature_id, &payload).await,
            Operation::Write => self.write(endpoint_id, feature_id, &payload).await,
            Operation::Subscribe => self.subscribe(endpoint_id, feature_id, &payload).await,
            Operation::Unsubscribe => self.unsubscribe(&payload).await,
            Operation::Invoke => self.invoke(endpoint_id, feature_id, &payload).await,
        };

        Envelope::Response { message_id, status, payload }
    }

    async fn read(&self, endpoint_id: u8, feature_id: u8, payload: &Value) -> (StatusCode, Value) {
        let attrs = attribute_filter(payload);
        let model = self.model.read().await;
        match model.read_attributes(endpoint_id, feature_id, &attrs, self.ctx()) {
            Ok(values) => (StatusCode::Success, Value::Map(map_to_value(values))),
            Err(status) => (status, Value::Null),
        }
    }

    async fn write(&self, endpoint_id: u8, feature_id: u8, payload: &Value) -> (StatusCode, Value) {
        let Value::Map(changes) = payload else {
            return (StatusCode::InvalidParameter, Value::Null);
        };

        let mut model = self.model.write().await;
        let Some(feature) = model.feature_mut(endpoint_id, feature_id) else {
            return if model.endpoint(endpoint_id).is_none() {
                (StatusCode::InvalidEndpoint, Value::Null)
            } else {
                (StatusCode::InvalidFeature, Value::Null)
            };
        };

        let mut applied = Vec::new();
        for (key, value) in changes {
            let Ok(attr_id) = key.parse::<u16>() else {
                return (StatusCode::InvalidParameter, Value::Null);
            };
            let Some(attr) = feature.attributes.get_mut(&attr_id) else {
                return (StatusCode::InvalidParameter, Value::Null);
            };
            if !attr.access.writable() {
                return (StatusCode::InvalidParameter, Value::Null);
            }
            attr.value = value.clone();
            applied.push((attr_id, value.clone()));
        }
        drop(model);

        for (attr_id, value) in applied {
            self.dispatcher.notify_change(endpoint_id, feature_id, attr_id, value).await;
        }

        (StatusCode::Success, Value::Null)
    }

    async fn subscribe(
        &self,
        endpoint_id: u8,
        feature_id: u8,
        payload: &Value,
    ) -> (StatusCode, Value) {
        if feature_id == 0 {
            // Reserved: feature 0 is the unsubscribe pseudo-feature (§4.4).
            return (StatusCode::InvalidFeature, Value::Null);
        }

        let attrs = attribute_filter(payload);
        let (min, max) = interval_filter(payload);

        {
            let model = self.model.read().await;
            if model.endpoint(endpoint_id).is_none() {
                return (StatusCode::InvalidEndpoint, Value::Null);
            }
            if model.feature(endpoint_id, feature_id).is_none() {
                return (StatusCode::InvalidFeature, Value::Null);
            }
        }

        match self
            .dispatcher
            .subscribe(self.session_id, endpoint_id, feature_id, attrs, min, max, self.ctx())
            .await
        {
            Ok(outcome) => {
                let mut fields = BTreeMap::new();
                fields.insert(
                    "sub_id".to_owned(),
                    Value::Uint64(u64::from(outcome.subscription_id)),
                );
                fields.insert("current_values".to_owned(), Value::Map(map_to_value(outcome.current_values)));
                (StatusCode::Success, Value::Map(fields))
            }
            Err(status) => (status, Value::Null),
        }
    }

    async fn unsubscribe(&self, payload: &Value) -> (StatusCode, Value) {
        let Some(sub_id) = extract_u32(payload, "sub_id") else {
            return (StatusCode::InvalidParameter, Value::Null);
        };
        match self.dispatcher.unsubscribe(self.session_id, sub_id).await {
            true => (StatusCode::Success, Value::Null),
            false => (StatusCode::InvalidParameter, Value::Null),
        }
    }

    async fn invoke(&self, endpoint_id: u8, feature_id: u8, payload: &Value) -> (StatusCode, Value) {
        let params = if let Value::Map(map) = payload {
            map.get("params").cloned().unwrap_or(Value::Null)
        } else {
            Value::Null
        };
        let Some(command_id) = extract_u32(payload, "command_id") else {
            return (StatusCode::InvalidParameter, Value::Null);
        };
        let command_id = command_id as u8;

        if endpoint_id == REMOVE_ZONE_ENDPOINT
            && feature_id == REMOVE_ZONE_FEATURE
            && command_id == REMOVE_ZONE_COMMAND_ID
        {
            return match &self.remove_zone_hook {
                Some(hook) => {
                    hook(self.ctx()).await;
                    (StatusCode::Success, Value::Null)
                }
                None => (StatusCode::Unsupported, Value::Null),
            };
        }

        let model = self.model.read().await;
        let Some(feature) = model.feature(endpoint_id, feature_id) else {
            return if model.endpoint(endpoint_id).is_none() {
                (StatusCode::InvalidEndpoint, Value::Null)
            } else {
                (StatusCode::InvalidFeature, Value::Null)
            };
        };
        let Some(command) = feature.commands.get(&command_id) else {
            return (StatusCode::Unsupported, Value::Null);
        };

        match (command.handler)(self.ctx(), &params) {
            Ok(value) => (StatusCode::Success, value),
            Err(code) => (StatusCode::Feature(code), Value::Null),
        }
    }
}

/// Empty return means "all attributes" (§4.4 Read/Subscribe).
fn attribute_filter(payload: &Value) -> Vec<u16> {
    let Value::Map(map) = payload else {
        return Vec::new();
    };
    let Some(Value::List(items)) = map.get("attribute_ids") else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|v| match v {
            Value::Uint64(n) => u16::try_from(*n).ok(),
            Value::Int64(n) => u16::try_from(*n).ok(),
            _ => None,
        })
        .collect()
}

fn interval_filter(payload: &Value) -> (Option<std::time::Duration>, Option<std::time::Duration>) {
    let min = extract_u32(payload, "min_interval_ms").map(|v| std::time::Duration::from_millis(v.into()));
    let max = extract_u32(payload, "max_interval_ms").map(|v| std::time::Duration::from_millis(v.into()));
    (min, max)
}

fn extract_u32(payload: &Value, key: &str) -> Option<u32> {
    if let Value::Map(map) = payload {
        match map.get(key)? {
            Value::Uint64(v) => u32::try_from(*v).ok(),
            Value::Int64(v) => u32::try_from(*v).ok(),
            _ => None,
        }
    } else {
        None
    }
}

fn map_to_value(values: BTreeMap<u16, Value>) -> BTreeMap<String, Value> {
    values.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
