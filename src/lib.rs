// Concerto - Rust Edition
// Deployment and live reconfiguration of distributed components driven by Petri nets

//! # Concerto Library
//!
//! Concerto coordinates the deployment and reconfiguration of software
//! components. Each component describes its own deployment process as a small
//! Petri net (places, transitions, docks) plus typed dependency ports that have
//! to be connected to other components before some steps may proceed. This file
//! is the **library root**: it declares the module tree, the crate error type and
//! the flat re-exports external crates use.
//!
//! ## Core Components
//!
//! ### Domain Models (`models`)
//! - [`PlaceId`] / [`TransitionId`] / [`DependencyId`] / [`ComponentId`]: names
//! - [`Place`] / [`Dock`]: nodes of the per-component net and their attachment points
//! - [`TransitionDefinition`]: an edge between two places carrying an action
//! - [`DependencyType`]: `Use`, `DataUse`, `Provide`, `DataProvide`
//! - [`Group`]: a token counter spanning several places
//! - [`Instruction`]: the reconfiguration vocabulary
//!
//! ### Engine (`engine`)
//! - [`ComponentType`]: the registration table a component is built from
//! - [`Component`]: the four-phase operational-semantics interpreter
//! - [`Connection`]: pairing of a use port with a provide port
//! - [`Assembly`]: the instruction loop, the CONN/DECONN handshake and the
//!   wait/wait-all barrier
//! - [`CommunicationClient`]: typed access to the shared key/value bus
//! - [`CheckpointStore`]: save and restore of the run-time state
//!
//! ## Example
//!
//! ```rust,no_run
//! use concerto::{Assembly, AssemblyConfig, CommunicationClient, ComponentRegistry, ComponentType, DependencyType, Binding};
//! use std::sync::Arc;
//!
//! # async fn demo() -> concerto::Result<()> {
//! let provider = ComponentType::builder("provider")
//!     .places(["initial", "running"])
//!     .initial_place("initial")
//!     .transition("run", "initial", "running", "run")
//!     .dependency("service", DependencyType::Provide, [Binding::place("running")])
//!     .build()?;
//!
//! let mut registry = ComponentRegistry::new();
//! registry.register_type(provider);
//!
//! let comm = Arc::new(CommunicationClient::in_memory());
//! let mut assembly = Assembly::open(AssemblyConfig::default(), Arc::new(registry), comm)?;
//! assembly.add_component("p", "provider", serde_json::Value::Null).await?;
//! assembly.push_behavior("p", "run").await?;
//! assembly.wait_all().await?;
//! # Ok(())
//! # }
//! ```

// Core domain models: names, places, docks, groups, instructions
pub mod models;

// Execution engine: components, ports, connections, assembly, communication
pub mod engine;

pub use models::{
    Binding, ComponentId, ComponentSnapshot, DebugSnapshot, DependencyDefinition,
    DependencyId, DependencyType, Dock, DockDirection, ErrorReport, Group, GroupDefinition,
    GroupOperation, Instruction, Place, PlaceId, TransitionDefinition, TransitionId,
};

pub use engine::{
    action::{Action, ActionContext},
    assembly::Assembly,
    checkpoint::{AssemblyCheckpoint, CheckpointStore},
    communication::{
        CommunicationClient, ComponentStatus, InMemoryBus, KeyValueBus, MarkerKind,
    },
    component::{Component, ComponentEnv},
    component_type::{ComponentType, ComponentTypeBuilder},
    config::{AssemblyConfig, FailurePolicy, SleepPolicy},
    connection::{Connection, ConnectionId, Endpoint, RemoteDependency},
    dependency::{Port, PortState},
    nats_communication::{NatsBus, NatsCommunicationConfig},
    registry::ComponentRegistry,
};

use thiserror::Error;

/// Errors raised by Concerto operations
///
/// Configuration errors (duplicate names, unknown references, incompatible
/// ports, unknown behaviors, double initialization) are surfaced immediately
/// to whoever built the component or assembly. Action failures are not
/// errors at this level: they are recorded as [`ErrorReport`]s. Invariant
/// violations abort the process and never show up here.
#[derive(Error, Debug)]
pub enum ConcertoError {
    /// A place, transition, dependency, group or component name is used twice
    #[error("Duplicate {kind} name: {name}")]
    DuplicateName { kind: &'static str, name: String },

    #[error("Unknown place: {0}")]
    UnknownPlace(String),

    #[error("Unknown transition: {0}")]
    UnknownTransition(String),

    #[error("Unknown dependency {dependency} on component {component}")]
    UnknownDependency { component: String, dependency: String },

    #[error("Unknown group: {0}")]
    UnknownGroup(String),

    #[error("Unknown behavior {behavior} for component {component}")]
    UnknownBehavior { component: String, behavior: String },

    /// A transition references an action that was never registered
    #[error("Unknown action {action} referenced by transition {transition}")]
    UnknownAction { transition: String, action: String },

    #[error("Unknown component: {0}")]
    UnknownComponent(String),

    #[error("Unknown component type: {0}")]
    UnknownComponentType(String),

    /// Connecting anything other than Use/Provide or DataUse/DataProvide
    #[error("Cannot connect {left} ({left_type}) with {right} ({right_type})")]
    IncompatibleDependencies {
        left: String,
        left_type: String,
        right: String,
        right_type: String,
    },

    /// A dependency is bound to an element it cannot gate
    #[error("Invalid binding of dependency {dependency}: {reason}")]
    InvalidBinding { dependency: String, reason: String },

    #[error("Component {0} is already initialized")]
    AlreadyInitialized(String),

    #[error("Component {0} is not initialized")]
    NotInitialized(String),

    #[error("Dependency {0} cannot be read")]
    NotReadable(String),

    #[error("Dependency {0} cannot be written")]
    NotWritable(String),

    /// `read` on a use port with no active connection
    #[error("Dependency {0} has no active provider")]
    NoActiveProvider(String),

    /// A component cannot be deleted while connections still reference it
    #[error("Component {0} still has connections")]
    StillConnected(String),

    /// `disconnect` between two local ports that are not connected
    #[error("No connection {0}")]
    NotConnected(String),

    /// Errors from the key/value bus
    #[error("Communication error: {0}")]
    Communication(#[from] anyhow::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    /// The sleep policy fired: the state was checkpointed and the process
    /// should exit with `code` to be restarted later
    #[error("Assembly is going to sleep (exit code {code})")]
    Sleeping { code: i32 },
}

impl From<config::ConfigError> for ConcertoError {
    fn from(err: config::ConfigError) -> Self {
        ConcertoError::Config(err.to_string())
    }
}

/// Type alias for Results that use the crate error type
pub type Result<T> = std::result::Result<T, ConcertoError>;

/// Logs an invariant violation and aborts the whole process.
///
/// Reference counts going negative or group counters dropping below zero
/// mean the run-time state is corrupt; continuing would only spread it.
#[macro_export]
macro_rules! invariant_violation {
    ($($arg:tt)*) => {{
        tracing::error!("invariant violation: {}", format!($($arg)*));
        std::process::abort()
    }};
}
