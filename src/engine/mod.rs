// Concerto Engine
// This contains the run-time side: components, ports, assemblies and the bus

//! # Concerto Engine Module
//!
//! This module turns the plain net descriptions of `models/` into running
//! components and coordinates them. The engine is the layer between the
//! domain models and the outside world (the key/value bus shared with other
//! assemblies, checkpoint files, user actions).
//!
//! ## Architecture Overview
//!
//! - **Domain Models**: names, places, docks, groups, instructions (in `models/`)
//! - **Engine Layer**: interpretation and coordination (this module)
//! - **Binary**: the operator CLI (in `bin/concerto.rs`)
//!
//! ## Engine Components
//!
//! ### Components (`component_type`, `component`, `action`)
//! - A registration table per component type, validated when it is built
//! - The four-phase step interpreter over index arenas
//! - Transition actions running on the blocking pool, reported through a
//!   one-shot completion channel
//!
//! ### Ports and Connections (`dependency`, `connection`)
//! - Reference-counted ports with their payload
//! - Connections between a use port and a provide port, either local or
//!   reaching a component owned by another assembly
//!
//! ### Assembly (`assembly`, `registry`, `checkpoint`, `config`)
//! - The instruction loop, the CONN/DECONN handshake and the barrier
//! - Type tags to component factories
//! - Checkpoint files for sleep and resume
//!
//! ### Communication (`communication`, `nats_communication`)
//! - Typed key/value access shared by every assembly of a deployment
//! - In-memory bus for tests and single-process deployments
//! - NATS JetStream key/value bus for distributed ones

/// Action callbacks, the context they run with and transition run state
pub mod action;

/// Assembly: instruction queue, handshake, barrier and sleep policy
pub mod assembly;

/// Checkpoint model and file store
pub mod checkpoint;

/// Key naming, the bus trait, the in-memory bus and the typed client
pub mod communication;

/// Component instances and the step interpreter
pub mod component;

/// Component type registration table and its builder
pub mod component_type;

/// Engine settings
pub mod config;

/// Connections and their endpoints
pub mod connection;

/// Run-time dependency ports
pub mod dependency;

/// NATS JetStream key/value bus
pub mod nats_communication;

/// Type tag to component factory table
pub mod registry;

#[cfg(test)]
mod assembly_tests;
