// Communication layer - the shared key/value bus between assemblies

//! # Communication Layer
//!
//! Assemblies never call each other. Everything they need to know about
//! dependencies owned elsewhere goes through a key/value bus:
//!
//! - `nb_users/{component}/{dependency}` - reference count, put by the owner
//! - `refusing/{component}/{dependency}` - provide ports refusing new uses
//! - `data/{component}/{dependency}` - payload of a data-provide port
//! - `{CONN|DECONN}/{syncing}/{to_sync}/{dep_provide}/{dep_use}` - handshake markers
//! - `wait/{assembly}/{component}` - `ACTIVE` / `INACTIVE`
//! - `barrier/{assembly}` - number of wait-all barriers the assembly reached
//!
//! ## Layering
//!
//! [`KeyValueBus`] is the raw transport: get, put, delete and a bounded
//! wait for a key to appear. [`InMemoryBus`] backs single-process runs and
//! tests; the NATS key/value implementation lives in `nats_communication`.
//!
//! [`CommunicationClient`] sits on top and speaks in typed operations. It is
//! built once and handed to the assembly; it also holds the cache used to
//! avoid re-publishing an unchanged component status.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{ComponentId, DependencyId};
use crate::{ConcertoError, Result};

/// Key naming scheme shared by every assembly on the bus
pub mod keys {
    use super::MarkerKind;

    pub fn nb_users(component: &str, dependency: &str) -> String {
        format!("nb_users/{}/{}", component, dependency)
    }

    pub fn refusing(component: &str, dependency: &str) -> String {
        format!("refusing/{}/{}", component, dependency)
    }

    pub fn data(component: &str, dependency: &str) -> String {
        format!("data/{}/{}", component, dependency)
    }

    /// Marker published by `syncing` towards `to_sync`; the peer publishes the
    /// same key with the two component names swapped
    pub fn marker(
        kind: MarkerKind,
        syncing: &str,
        to_sync: &str,
        dep_provide: &str,
        dep_use: &str,
    ) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            kind.as_str(),
            syncing,
            to_sync,
            dep_provide,
            dep_use
        )
    }

    pub fn wait(assembly: &str, component: &str) -> String {
        format!("wait/{}/{}", assembly, component)
    }

    pub fn barrier(assembly: &str) -> String {
        format!("barrier/{}", assembly)
    }
}

/// Raw key/value transport
///
/// Implementations must be safe to share between tasks. Missing keys are
/// `Ok(None)`, not errors.
#[async_trait]
pub trait KeyValueBus: Send + Sync {
    async fn put(&self, key: &str, value: Bytes) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Waits at most `within` for `key` to exist.
    ///
    /// The default implementation polls. Transports with push notification
    /// override it to subscribe instead; callers cannot tell the difference.
    async fn wait_for_key(&self, key: &str, within: Duration) -> Result<bool> {
        let deadline = tokio::time::Instant::now() + within;
        let step = (within / 5).max(Duration::from_millis(1));
        loop {
            if self.get(key).await?.is_some() {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(step).await;
        }
    }
}

/// In-process bus
///
/// Cloning shares the underlying map, so several assemblies in one process
/// (or one test) can talk to each other through clones of the same bus.
#[derive(Clone, Default)]
pub struct InMemoryBus {
    entries: Arc<DashMap<String, Bytes>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// All keys currently set, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl KeyValueBus for InMemoryBus {
    async fn put(&self, key: &str, value: Bytes) -> Result<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

/// Handshake marker kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerKind {
    Conn,
    Deconn,
}

impl MarkerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MarkerKind::Conn => "CONN",
            MarkerKind::Deconn => "DECONN",
        }
    }
}

/// Activity of a component as published under `wait/...`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentStatus {
    Active,
    Inactive,
}

impl ComponentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ComponentStatus::Active => "ACTIVE",
            ComponentStatus::Inactive => "INACTIVE",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "ACTIVE" => Some(ComponentStatus::Active),
            "INACTIVE" => Some(ComponentStatus::Inactive),
            _ => None,
        }
    }
}

/// Typed access to the bus, one instance per assembly process
pub struct CommunicationClient {
    bus: Arc<dyn KeyValueBus>,
    // last status published per `wait/` key
    last_status: Mutex<HashMap<String, ComponentStatus>>,
}

impl CommunicationClient {
    pub fn new(bus: Arc<dyn KeyValueBus>) -> Self {
        Self {
            bus,
            last_status: Mutex::new(HashMap::new()),
        }
    }

    /// Client over a fresh, private in-memory bus
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryBus::new()))
    }

    pub fn bus(&self) -> &Arc<dyn KeyValueBus> {
        &self.bus
    }

    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .bus
            .get(key)
            .await?
            .map(|raw| String::from_utf8_lossy(&raw).into_owned()))
    }

    pub async fn put_nb_users(
        &self,
        component: &ComponentId,
        dependency: &DependencyId,
        nb_users: u64,
    ) -> Result<()> {
        let key = keys::nb_users(component.as_str(), dependency.as_str());
        debug!("put {} = {}", key, nb_users);
        self.bus.put(&key, Bytes::from(nb_users.to_string())).await
    }

    /// Reference count of a remote port; an unpublished count reads as 0
    pub async fn get_nb_users(&self, component: &ComponentId, dependency: &DependencyId) -> Result<u64> {
        let key = keys::nb_users(component.as_str(), dependency.as_str());
        match self.get_string(&key).await? {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .map_err(|e| {
                    ConcertoError::Communication(anyhow::anyhow!("Invalid value for {}: {}", key, e))
                }),
            None => Ok(0),
        }
    }

    pub async fn put_refusing(
        &self,
        component: &ComponentId,
        dependency: &DependencyId,
        refusing: bool,
    ) -> Result<()> {
        let key = keys::refusing(component.as_str(), dependency.as_str());
        self.bus.put(&key, Bytes::from(refusing.to_string())).await
    }

    pub async fn get_refusing(&self, component: &ComponentId, dependency: &DependencyId) -> Result<bool> {
        let key = keys::refusing(component.as_str(), dependency.as_str());
        Ok(matches!(self.get_string(&key).await?.as_deref(), Some("true")))
    }

    pub async fn put_data(
        &self,
        component: &ComponentId,
        dependency: &DependencyId,
        data: &serde_json::Value,
    ) -> Result<()> {
        let key = keys::data(component.as_str(), dependency.as_str());
        let payload = serde_json::to_vec(data)?;
        self.bus.put(&key, Bytes::from(payload)).await
    }

    pub async fn get_data(
        &self,
        component: &ComponentId,
        dependency: &DependencyId,
    ) -> Result<Option<serde_json::Value>> {
        let key = keys::data(component.as_str(), dependency.as_str());
        match self.bus.get(&key).await? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn put_marker(
        &self,
        kind: MarkerKind,
        syncing: &ComponentId,
        to_sync: &ComponentId,
        dep_provide: &DependencyId,
        dep_use: &DependencyId,
    ) -> Result<()> {
        let key = keys::marker(
            kind,
            syncing.as_str(),
            to_sync.as_str(),
            dep_provide.as_str(),
            dep_use.as_str(),
        );
        debug!("put marker {}", key);
        self.bus.put(&key, Bytes::from_static(b"1")).await
    }

    /// Waits at most `within` for the peer's marker (the key published by
    /// `syncing` towards `to_sync`)
    pub async fn await_marker(
        &self,
        kind: MarkerKind,
        syncing: &ComponentId,
        to_sync: &ComponentId,
        dep_provide: &DependencyId,
        dep_use: &DependencyId,
        within: Duration,
    ) -> Result<bool> {
        let key = keys::marker(
            kind,
            syncing.as_str(),
            to_sync.as_str(),
            dep_provide.as_str(),
            dep_use.as_str(),
        );
        self.bus.wait_for_key(&key, within).await
    }

    pub async fn delete_marker(
        &self,
        kind: MarkerKind,
        syncing: &ComponentId,
        to_sync: &ComponentId,
        dep_provide: &DependencyId,
        dep_use: &DependencyId,
    ) -> Result<()> {
        let key = keys::marker(
            kind,
            syncing.as_str(),
            to_sync.as_str(),
            dep_provide.as_str(),
            dep_use.as_str(),
        );
        self.bus.delete(&key).await
    }

    /// Publishes a component status, skipping the write when the same value
    /// was the last one this client sent for that key
    pub async fn put_status(
        &self,
        assembly: &str,
        component: &ComponentId,
        status: ComponentStatus,
    ) -> Result<()> {
        let key = keys::wait(assembly, component.as_str());
        let unchanged = self.last_status.lock().get(&key) == Some(&status);
        if unchanged {
            return Ok(());
        }
        debug!("put {} = {}", key, status.as_str());
        self.bus.put(&key, Bytes::from_static(status.as_str().as_bytes())).await?;
        self.last_status.lock().insert(key, status);
        Ok(())
    }

    pub async fn get_status(
        &self,
        assembly: &str,
        component: &ComponentId,
    ) -> Result<Option<ComponentStatus>> {
        let key = keys::wait(assembly, component.as_str());
        Ok(self
            .get_string(&key)
            .await?
            .and_then(|raw| ComponentStatus::parse(raw.trim())))
    }

    pub async fn put_barrier(&self, assembly: &str, reached: u64) -> Result<()> {
        let key = keys::barrier(assembly);
        self.bus.put(&key, Bytes::from(reached.to_string())).await
    }

    pub async fn get_barrier(&self, assembly: &str) -> Result<u64> {
        let key = keys::barrier(assembly);
        Ok(self
            .get_string(&key)
            .await?
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .unwrap_or(0))
    }
}
