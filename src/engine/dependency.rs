// Run-time dependency ports

//! # Ports
//!
//! A [`Port`] is the run-time side of a [`DependencyDefinition`]: a shared
//! [`PortState`] (reference count, refusing flag, payload) plus the list of
//! connections it takes part in.
//!
//! The state sits behind an `Arc<RwLock<_>>` so that a connection can read
//! the count of the port at its other end without holding a reference to the
//! component that owns it. Only the owning component ever writes it.
//!
//! Counts of ports with a remote peer are mirrored to the communication
//! layer on every change, since the peer assembly has no other way to see
//! them.
//!
//! [`DependencyDefinition`]: crate::models::DependencyDefinition

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::communication::CommunicationClient;
use super::connection::{Connection, ConnectionId, Endpoint, LocalDependency};
use crate::invariant_violation;
use crate::models::{ComponentId, DependencyId, DependencyType};
use crate::{ConcertoError, Result};

/// Mutable state of a port
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortState {
    pub nb_users: u64,
    pub refusing: bool,
    pub data: Option<Value>,
    /// Bumped on every write
    #[serde(default)]
    pub data_version: u64,
    /// Last version pushed to the bus
    #[serde(skip)]
    pub published_version: u64,
}

/// Run-time dependency of one component
///
/// Cloning a port is cheap and shares its state and connection list; action
/// contexts hold clones to read and write payloads while the owning
/// component keeps stepping.
#[derive(Clone)]
pub struct Port {
    pub component: ComponentId,
    pub name: DependencyId,
    pub kind: DependencyType,
    state: Arc<RwLock<PortState>>,
    connections: Arc<RwLock<Vec<Arc<Connection>>>>,
}

impl Port {
    pub fn new(component: ComponentId, name: DependencyId, kind: DependencyType) -> Self {
        Self {
            component,
            name,
            kind,
            state: Arc::new(RwLock::new(PortState::default())),
            connections: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Endpoint to hand to a new connection
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::Local(LocalDependency {
            component: self.component.clone(),
            dependency: self.name.clone(),
            kind: self.kind,
            state: self.state.clone(),
        })
    }

    fn qualified_name(&self) -> String {
        format!("{}.{}", self.component, self.name)
    }

    pub fn state(&self) -> PortState {
        self.state.read().clone()
    }

    /// Overwrites the state with a checkpointed one
    pub fn restore(&self, state: PortState) {
        *self.state.write() = state;
    }

    pub fn nb_users(&self) -> u64 {
        self.state.read().nb_users
    }

    pub fn is_refusing(&self) -> bool {
        self.state.read().refusing
    }

    /// Adds a connection; the same connection may be added more than once
    pub fn connect(&self, connection: Arc<Connection>) {
        self.connections.write().push(connection);
    }

    /// Removes one occurrence of the connection, returning whether it was
    /// there
    pub fn disconnect(&self, id: &ConnectionId) -> bool {
        let mut connections = self.connections.write();
        match connections.iter().position(|c| c.id() == id) {
            Some(pos) => {
                connections.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.connections.read().clone()
    }

    pub fn is_connected(&self) -> bool {
        !self.connections.read().is_empty()
    }

    pub fn has_remote_peer(&self) -> bool {
        self.connections.read().iter().any(|c| c.has_remote())
    }

    /// Increments the reference count
    pub async fn start_using(&self, comm: &CommunicationClient) -> Result<()> {
        let nb_users = {
            let mut state = self.state.write();
            state.nb_users += 1;
            state.nb_users
        };
        debug!("{} start using ({} users)", self.qualified_name(), nb_users);
        if self.has_remote_peer() {
            comm.put_nb_users(&self.component, &self.name, nb_users).await?;
        }
        Ok(())
    }

    /// Decrements the reference count; going below zero aborts the process
    pub async fn stop_using(&self, comm: &CommunicationClient) -> Result<()> {
        let nb_users = {
            let mut state = self.state.write();
            if state.nb_users == 0 {
                invariant_violation!("{} stop_using with no users", self.qualified_name());
            }
            state.nb_users -= 1;
            state.nb_users
        };
        debug!("{} stop using ({} users)", self.qualified_name(), nb_users);
        if self.has_remote_peer() {
            comm.put_nb_users(&self.component, &self.name, nb_users).await?;
        }
        Ok(())
    }

    /// Use family: some connection has a provider in use
    pub async fn is_served(&self, comm: &CommunicationClient) -> Result<bool> {
        if !self.kind.is_use_family() {
            return Ok(false);
        }
        for connection in self.connections() {
            if connection.is_active(comm).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Provide family: some consumer is still attached
    pub async fn is_locked(&self, comm: &CommunicationClient) -> Result<bool> {
        if !self.kind.is_provide_family() {
            return Ok(false);
        }
        for connection in self.connections() {
            if connection.is_locked(comm).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Use family: no connected provider refuses new uses
    pub async fn is_allowed(&self, comm: &CommunicationClient) -> Result<bool> {
        if !self.kind.is_use_family() {
            return Ok(true);
        }
        for connection in self.connections() {
            if connection.is_refusing(comm).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Served and allowed, the condition for engaging a use port
    pub async fn is_usable(&self, comm: &CommunicationClient) -> Result<bool> {
        Ok(self.is_served(comm).await? && self.is_allowed(comm).await?)
    }

    pub async fn set_refusing(&self, refusing: bool, comm: &CommunicationClient) -> Result<()> {
        self.state.write().refusing = refusing;
        if self.has_remote_peer() {
            comm.put_refusing(&self.component, &self.name, refusing).await?;
        }
        Ok(())
    }

    /// Payload of the port
    ///
    /// A data-provide port returns its own payload. A data-use port returns
    /// the payload of the first active provider it is connected to.
    pub async fn read(&self, comm: &CommunicationClient) -> Result<Option<Value>> {
        if !self.kind.is_readable() {
            return Err(ConcertoError::NotReadable(self.qualified_name()));
        }
        if self.kind.is_provide_family() {
            return Ok(self.state.read().data.clone());
        }
        for connection in self.connections() {
            if connection.is_active(comm).await? {
                return connection.provider_data(comm).await;
            }
        }
        Err(ConcertoError::NoActiveProvider(self.qualified_name()))
    }

    pub fn write(&self, value: Value) -> Result<()> {
        if !self.kind.is_writable() {
            return Err(ConcertoError::NotWritable(self.qualified_name()));
        }
        let mut state = self.state.write();
        state.data = Some(value);
        state.data_version += 1;
        Ok(())
    }

    /// Pushes the whole state to the bus for a freshly connected remote peer
    pub async fn publish(&self, comm: &CommunicationClient) -> Result<()> {
        let state = self.state();
        comm.put_nb_users(&self.component, &self.name, state.nb_users).await?;
        if self.kind.is_provide_family() {
            comm.put_refusing(&self.component, &self.name, state.refusing).await?;
        }
        if let Some(data) = &state.data {
            comm.put_data(&self.component, &self.name, data).await?;
        }
        self.state.write().published_version = state.data_version;
        Ok(())
    }

    /// Pushes the payload if it changed since the last push and a remote
    /// peer may read it
    pub async fn publish_data(&self, comm: &CommunicationClient) -> Result<()> {
        if !self.kind.is_writable() || !self.has_remote_peer() {
            return Ok(());
        }
        let (data, version) = {
            let state = self.state.read();
            if state.data_version == state.published_version {
                return Ok(());
            }
            (state.data.clone(), state.data_version)
        };
        if let Some(data) = data {
            comm.put_data(&self.component, &self.name, &data).await?;
        }
        self.state.write().published_version = version;
        Ok(())
    }
}

impl std::fmt::Debug for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Port")
            .field("component", &self.component)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("state", &*self.state.read())
            .field("connections", &self.connections.read().len())
            .finish()
    }
}
