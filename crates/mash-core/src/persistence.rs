// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Alfred Jean LLC

//! Opaque on-disk persistence stores (§6 "Persistence").
//!
//! Grounded on the teacher's `credential/persist.rs`: write-tmp-then-rename
//! JSON files. The reference implementation runs those as plain sync
//! functions; here they're wrapped in `tokio::task::spawn_blocking` since
//! the store traits are called from async service code.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::zone::{ZoneRecord, ZoneType};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FailsafeSnapshot {
    pub armed: bool,
    #[serde(default)]
    pub expires_at_epoch_secs: Option<u64>,
}

/// `DeviceStateStore`'s saved document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistedDeviceState {
    pub saved_at_epoch_secs: u64,
    /// Legacy id→index mapping, kept only for backward-compatible loads.
    #[serde(default)]
    pub zone_index_map: BTreeMap<String, u8>,
    #[serde(default)]
    pub zones: Vec<ZoneRecord>,
    #[serde(default)]
    pub failsafe_state: BTreeMap<String, FailsafeSnapshot>,
}

impl PersistedDeviceState {
    /// Backward-compatible zone reconstruction: if `zones` is empty but
    /// `zone_index_map` is not, synthesize LOCAL/disconnected records from
    /// the legacy index map (§6 "Persistence").
    pub fn effective_zones(&self) -> Vec<ZoneRecord> {
        if !self.zones.is_empty() || self.zone_index_map.is_empty() {
            return self.zones.clone();
        }
        self.zone_index_map
            .iter()
            .map(|(id, &zone_index)| {
                let mut record = ZoneRecord::new(id.clone(), ZoneType::Local, zone_index);
                record.connected = false;
                record
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedDevice {
    pub id: String,
    pub zone_id: String,
    pub host: String,
    pub port: u16,
}

/// `ControllerStateStore`'s saved document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistedControllerState {
    pub saved_at_epoch_secs: u64,
    #[serde(default)]
    pub zone_id: Option<String>,
    #[serde(default)]
    pub devices: Vec<PersistedDevice>,
}

#[async_trait]
pub trait DeviceStateStore: Send + Sync {
    async fn load(&self) -> anyhow::Result<PersistedDeviceState>;
    async fn save(&self, state: &PersistedDeviceState) -> anyhow::Result<()>;
}

#[async_trait]
pub trait ControllerStateStore: Send + Sync {
    async fn load(&self) -> anyhow::Result<PersistedControllerState>;
    async fn save(&self, state: &PersistedControllerState) -> anyhow::Result<()>;
}

fn load_json<T: serde::de::DeserializeOwned + Default>(path: &Path) -> anyhow::Result<T> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(serde_json::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e.into()),
    }
}

fn save_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// JSON-file-backed `DeviceStateStore`.
pub struct JsonFileDeviceStateStore {
    path: PathBuf,
}

impl JsonFileDeviceStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl DeviceStateStore for JsonFileDeviceStateStore {
    async fn load(&self) -> anyhow::Result<PersistedDeviceState> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || load_json(&path)).await?
    }

    async fn save(&self, state: &PersistedDeviceState) -> anyhow::Result<()> {
        let path = self.path.clone();
        let state = state.clone();
        tokio::task::spawn_blocking(move || save_json(&path, &state)).await?
    }
}

/// JSON-file-backed `ControllerStateStore`.
pub struct JsonFileControllerStateStore {
    path: PathBuf,
}

impl JsonFileControllerStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ControllerStateStore for JsonFileControllerStateStore {
    async fn load(&self) -> anyhow::Result<PersistedControllerState> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || load_json(&path)).await?
    }

    async fn save(&self, state: &PersistedControllerState) -> anyhow::Result<()> {
        let path = self.path.clone();
        let state = state.clone();
        tokio::task::spawn_blocking(move || save_json(&path, &state)).await?
    }
}

#[cfg(test)]
#[path = "persistence_tests.rs"]
mod tests;
