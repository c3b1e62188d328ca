// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Alfred Jean LLC

//! The device data model: endpoints, features, attributes, and commands (§3).

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A typed attribute value. Closed rather than an open JSON value so that
/// round-trip CBOR encoding is deterministic (invariant 7) and ordered
/// consistently via `BTreeMap` for map-valued attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int64(i64),
    Uint64(u64),
    Float64(f64),
    Text(String),
    #[serde(with = "serde_bytes")]
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Uint64(v) => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{v}"),
            Self::Text(s) => f.write_str(s),
            Self::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Self::List(items) => write!(f, "<list of {}>", items.len()),
            Self::Map(_) => f.write_str("<map>"),
        }
    }
}

/// Access mode of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Access {
    ReadOnly,
    ReadWrite,
    WriteOnly,
}

impl Access {
    pub fn readable(&self) -> bool {
        matches!(self, Self::ReadOnly | Self::ReadWrite)
    }

    pub fn writable(&self) -> bool {
        matches!(self, Self::ReadWrite | Self::WriteOnly)
    }
}

/// Context threaded into read hooks and subscribe priming: which zone the
/// caller belongs to, if any (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CallerContext {
    pub peer_zone_index: Option<u8>,
}

/// A closure that synthesizes an attribute value instead of returning the
/// stored one, given the caller's zone context.
pub type ReadHook = Box<dyn Fn(CallerContext, &Value) -> Value + Send + Sync>;

/// A single attribute on a feature.
pub struct Attribute {
    pub id: u16,
    pub access: Access,
    pub default: Value,
    pub value: Value,
    pub read_hook: Option<ReadHook>,
}

impl fmt::Debug for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attribute")
            .field("id", &self.id)
            .field("access", &self.access)
            .field("default", &self.default)
            .field("value", &self.value)
            .field("read_hook", &self.read_hook.is_some())
            .finish()
    }
}

impl Attribute {
    pub fn new(id: u16, access: Access, default: Value) -> Self {
        Self { id, access, value: default.clone(), default, read_hook: None }
    }

    pub fn with_read_hook(mut self, hook: ReadHook) -> Self {
        self.read_hook = Some(hook);
        self
    }

    /// Resolve the value to report to a caller, applying the read hook if present.
    pub fn resolve(&self, ctx: CallerContext) -> Value {
        match &self.read_hook {
            Some(hook) => hook(ctx, &self.value),
            None => self.value.clone(),
        }
    }

    pub fn reset_to_default(&mut self) {
        self.value = self.default.clone();
    }
}

/// A command handler: given raw params and the caller's zone context,
/// produces either a success payload or a feature-defined failure code.
pub type CommandHandler =
    Box<dyn Fn(CallerContext, &Value) -> Result<Value, u16> + Send + Sync>;

pub struct Command {
    pub id: u8,
    pub handler: CommandHandler,
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command").field("id", &self.id).finish()
    }
}

/// A feature owns attributes (keyed by u16 id) and commands (keyed by u8 id).
#[derive(Debug, Default)]
pub struct Feature {
    pub id: u8,
    pub attributes: BTreeMap<u16, Attribute>,
    pub commands: BTreeMap<u8, Command>,
}

impl Feature {
    pub fn new(id: u8) -> Self {
        Self { id, attributes: BTreeMap::new(), commands: BTreeMap::new() }
    }

    pub fn with_attribute(mut self, attr: Attribute) -> Self {
        self.attributes.insert(attr.id, attr);
        self
    }

    pub fn with_command(mut self, cmd: Command) -> Self {
        self.commands.insert(cmd.id, cmd);
        self
    }
}

/// An endpoint groups features under a type tag and label.
#[derive(Debug, Default)]
pub struct Endpoint {
    pub id: u8,
    pub type_tag: String,
    pub label: String,
    pub features: BTreeMap<u8, Feature>,
}

impl Endpoint {
    pub fn new(id: u8, type_tag: impl Into<String>, label: impl Into<String>) -> Self {
        Self { id, type_tag: type_tag.into(), label: label.into(), features: BTreeMap::new() }
    }

    pub fn with_feature(mut self, feature: Feature) -> Self {
        self.features.insert(feature.id, feature);
        self
    }
}

/// The device's full data model: a tree of endpoints.
#[derive(Debug, Default)]
pub struct DataModel {
    pub endpoints: BTreeMap<u8, Endpoint>,
}

impl DataModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoints.insert(endpoint.id, endpoint);
        self
    }

    pub fn endpoint(&self, id: u8) -> Option<&Endpoint> {
        self.endpoints.get(&id)
    }

    pub fn endpoint_mut(&mut self, id: u8) -> Option<&mut Endpoint> {
        self.endpoints.get_mut(&id)
    }

    pub fn feature(&self, endpoint_id: u8, feature_id: u8) -> Option<&Feature> {
        self.endpoint(endpoint_id)?.features.get(&feature_id)
    }

    pub fn feature_mut(&mut self, endpoint_id: u8, feature_id: u8) -> Option<&mut Feature> {
        self.endpoint_mut(endpoint_id)?.features.get_mut(&feature_id)
    }

    /// Read all (or filtered) attribute values of one feature, applying each
    /// attribute's read hook with the caller's zone context. Shared by
    /// `ProtocolHandler::read` and `NotificationDispatcher`'s priming/
    /// heartbeat snapshots so both apply identical read-hook semantics.
    pub fn read_attributes(
        &self,
        endpoint_id: u8,
        feature_id: u8,
        attribute_ids: &[u16],
        ctx: CallerContext,
    ) -> Result<BTreeMap<u16, Value>, crate::error::StatusCode> {
        let feature = self
            .endpoint(endpoint_id)
            .ok_or(crate::error::StatusCode::InvalidEndpoint)?
            .features
            .get(&feature_id)
            .ok_or(crate::error::StatusCode::InvalidFeature)?;

        let wanted: Box<dyn Fn(&u16) -> bool> = if attribute_ids.is_empty() {
            Box::new(|_| true)
        } else {
            let set = attribute_ids.to_vec();
            Box::new(move |id: &u16| set.contains(id))
        };

        Ok(feature
            .attributes
            .iter()
            .filter(|(id, _)| wanted(id))
            .map(|(id, attr)| (*id, attr.resolve(ctx)))
            .collect())
    }
}
