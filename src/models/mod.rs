// Core domain models for Concerto
// Plain, engine-independent data structures of the component nets

//! # Domain Models Module
//!
//! This module contains the structural building blocks of a component's
//! deployment net. Nothing here talks to the communication layer or spawns
//! threads: these are the immutable shapes (places, docks, transition and
//! dependency definitions) plus the small pieces of run-time bookkeeping that
//! are pure arithmetic (group token counters).
//!
//! ## Arena indices
//!
//! A component stores its places, docks, transitions, ports and groups in
//! per-component vectors. Cross references between them are plain indices
//! ([`PlaceIdx`], [`DockIdx`], ...) rather than owning pointers, so the
//! `Dock -> Place -> Dock` and `Port -> Connection -> Port` cycles of the
//! model never turn into reference cycles.

// PlaceId, Place, Dock and DockDirection
pub mod place;

// TransitionId and TransitionDefinition
pub mod transition;

// DependencyId, DependencyType, DependencyDefinition and Binding
pub mod dependency;

// GroupDefinition, Group and GroupOperation
pub mod group;

// ComponentId and the reconfiguration Instruction vocabulary
pub mod instruction;

// ErrorReport and debug snapshots
pub mod report;

/// Index of a place inside its component
pub type PlaceIdx = usize;
/// Index of a dock inside its component
pub type DockIdx = usize;
/// Index of a transition inside its component
pub type TransitionIdx = usize;
/// Index of a dependency port inside its component
pub type DependencyIdx = usize;
/// Index of a group inside its component
pub type GroupIdx = usize;

pub use place::{Dock, DockDirection, Place, PlaceId};
pub use transition::{TransitionDefinition, TransitionId, INIT_BEHAVIOR, INIT_TRANSITION};
pub use dependency::{Binding, DependencyDefinition, DependencyId, DependencyType};
pub use group::{Group, GroupDefinition, GroupOperation};
pub use instruction::{ComponentId, Instruction, InstructionKind};
pub use report::{ComponentSnapshot, DebugSnapshot, ErrorReport};
