// Connections - pairing a use port with a provide port

//! # Connections
//!
//! A [`Connection`] joins one Use-family port with one Provide-family port,
//! possibly across assemblies. It records no state of its own: whether it is
//! *active* (the provider is in use) or *locked* (the consumer is still
//! attached) is read from the two ports' reference counts every time.
//!
//! Each side is an [`Endpoint`]: either a port of a local component, read
//! straight from its shared state, or a [`RemoteDependency`] whose values
//! are only ever read through the communication layer.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::communication::CommunicationClient;
use super::dependency::PortState;
use crate::models::{ComponentId, DependencyId, DependencyType};
use crate::{ConcertoError, Result};

/// Canonical connection name, use side first
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    pub fn build(
        use_component: &ComponentId,
        use_dependency: &DependencyId,
        provide_component: &ComponentId,
        provide_dependency: &DependencyId,
    ) -> Self {
        ConnectionId(format!(
            "{}/{}:{}/{}",
            use_component, use_dependency, provide_component, provide_dependency
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Port owned by a component of this assembly
#[derive(Clone)]
pub struct LocalDependency {
    pub component: ComponentId,
    pub dependency: DependencyId,
    pub kind: DependencyType,
    pub(crate) state: Arc<RwLock<PortState>>,
}

/// Stand-in for a port owned by another assembly
///
/// Never written locally; every read goes through the communication layer,
/// which is the only authority on its current value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDependency {
    pub component: ComponentId,
    pub dependency: DependencyId,
}

impl RemoteDependency {
    pub fn new<C: Into<ComponentId>, D: Into<DependencyId>>(component: C, dependency: D) -> Self {
        Self {
            component: component.into(),
            dependency: dependency.into(),
        }
    }

    pub async fn nb_users(&self, comm: &CommunicationClient) -> Result<u64> {
        comm.get_nb_users(&self.component, &self.dependency).await
    }

    pub async fn is_refusing(&self, comm: &CommunicationClient) -> Result<bool> {
        comm.get_refusing(&self.component, &self.dependency).await
    }

    pub async fn data(&self, comm: &CommunicationClient) -> Result<Option<serde_json::Value>> {
        comm.get_data(&self.component, &self.dependency).await
    }
}

/// One side of a connection
#[derive(Clone)]
pub enum Endpoint {
    Local(LocalDependency),
    Remote(RemoteDependency),
}

impl Endpoint {
    pub fn component(&self) -> &ComponentId {
        match self {
            Endpoint::Local(local) => &local.component,
            Endpoint::Remote(remote) => &remote.component,
        }
    }

    pub fn dependency(&self) -> &DependencyId {
        match self {
            Endpoint::Local(local) => &local.dependency,
            Endpoint::Remote(remote) => &remote.dependency,
        }
    }

    /// Kind of the port, known only for local ports
    pub fn kind(&self) -> Option<DependencyType> {
        match self {
            Endpoint::Local(local) => Some(local.kind),
            Endpoint::Remote(_) => None,
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Endpoint::Remote(_))
    }

    pub async fn nb_users(&self, comm: &CommunicationClient) -> Result<u64> {
        match self {
            Endpoint::Local(local) => Ok(local.state.read().nb_users),
            Endpoint::Remote(remote) => remote.nb_users(comm).await,
        }
    }

    pub async fn is_refusing(&self, comm: &CommunicationClient) -> Result<bool> {
        match self {
            Endpoint::Local(local) => Ok(local.state.read().refusing),
            Endpoint::Remote(remote) => remote.is_refusing(comm).await,
        }
    }

    pub async fn data(&self, comm: &CommunicationClient) -> Result<Option<serde_json::Value>> {
        match self {
            Endpoint::Local(local) => Ok(local.state.read().data.clone()),
            Endpoint::Remote(remote) => remote.data(comm).await,
        }
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Local(local) => write!(f, "Local({}.{})", local.component, local.dependency),
            Endpoint::Remote(remote) => {
                write!(f, "Remote({}.{})", remote.component, remote.dependency)
            }
        }
    }
}

/// Pairing of a use port and a provide port
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    use_side: Endpoint,
    provide_side: Endpoint,
}

impl Connection {
    /// Orders two endpoints as (use, provide), validating their kinds.
    ///
    /// With two local ports the kinds must be Use<->Provide or
    /// DataUse<->DataProvide. With one remote port the local kind decides
    /// the roles and the remote one is taken to be its counterpart.
    fn order(a: Endpoint, b: Endpoint) -> Result<(Endpoint, Endpoint)> {
        match (a.kind(), b.kind()) {
            (Some(ka), Some(kb)) => {
                if !ka.is_compatible_with(kb) {
                    return Err(ConcertoError::IncompatibleDependencies {
                        left: format!("{}.{}", a.component(), a.dependency()),
                        left_type: ka.to_string(),
                        right: format!("{}.{}", b.component(), b.dependency()),
                        right_type: kb.to_string(),
                    });
                }
                if ka.is_use_family() {
                    Ok((a, b))
                } else {
                    Ok((b, a))
                }
            }
            (Some(ka), None) => {
                if ka.is_use_family() {
                    Ok((a, b))
                } else {
                    Ok((b, a))
                }
            }
            (None, Some(kb)) => {
                if kb.is_use_family() {
                    Ok((b, a))
                } else {
                    Ok((a, b))
                }
            }
            (None, None) => Err(ConcertoError::InvalidBinding {
                dependency: format!("{}.{}", a.dependency(), b.dependency()),
                reason: "a connection needs at least one local port".to_string(),
            }),
        }
    }

    pub fn new(a: Endpoint, b: Endpoint) -> Result<Self> {
        let (use_side, provide_side) = Self::order(a, b)?;
        let id = ConnectionId::build(
            use_side.component(),
            use_side.dependency(),
            provide_side.component(),
            provide_side.dependency(),
        );
        Ok(Self {
            id,
            use_side,
            provide_side,
        })
    }

    /// Canonical id two endpoints would get, without building the connection
    pub fn id_for(a: &Endpoint, b: &Endpoint) -> Result<ConnectionId> {
        let (use_side, provide_side) = Self::order(a.clone(), b.clone())?;
        Ok(ConnectionId::build(
            use_side.component(),
            use_side.dependency(),
            provide_side.component(),
            provide_side.dependency(),
        ))
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn use_side(&self) -> &Endpoint {
        &self.use_side
    }

    pub fn provide_side(&self) -> &Endpoint {
        &self.provide_side
    }

    pub fn has_remote(&self) -> bool {
        self.use_side.is_remote() || self.provide_side.is_remote()
    }

    pub fn remote_side(&self) -> Option<&RemoteDependency> {
        match (&self.use_side, &self.provide_side) {
            (Endpoint::Remote(remote), _) | (_, Endpoint::Remote(remote)) => Some(remote),
            _ => None,
        }
    }

    pub fn involves(&self, component: &ComponentId) -> bool {
        self.use_side.component() == component || self.provide_side.component() == component
    }

    /// The provider is in use
    pub async fn is_active(&self, comm: &CommunicationClient) -> Result<bool> {
        Ok(self.provide_side.nb_users(comm).await? > 0)
    }

    /// The consumer is still attached
    pub async fn is_locked(&self, comm: &CommunicationClient) -> Result<bool> {
        Ok(self.use_side.nb_users(comm).await? != 0)
    }

    pub async fn can_remove(&self, comm: &CommunicationClient) -> Result<bool> {
        Ok(!self.is_locked(comm).await?)
    }

    pub async fn is_refusing(&self, comm: &CommunicationClient) -> Result<bool> {
        self.provide_side.is_refusing(comm).await
    }

    pub async fn provider_data(&self, comm: &CommunicationClient) -> Result<Option<serde_json::Value>> {
        self.provide_side.data(comm).await
    }
}
