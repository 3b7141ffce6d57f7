// Transition definitions - the edges of a component's deployment net

//! # Transition Definitions
//!
//! A `TransitionDefinition` is the user-supplied description of one edge:
//! - the place the token leaves (source) and the place it reaches (destination)
//! - the behavior it belongs to ("deploy", "stop", "update", ...)
//! - the idset its input dock joins on the destination place
//! - the name of the registered action to run, with static arguments
//!
//! Definitions are plain data. The engine turns them into run-time
//! transitions with docks and an execution state when a component is built.

use serde::{Deserialize, Serialize};

use super::place::PlaceId;

/// Behavior of the synthetic transition that puts the first token on the
/// initial place
pub const INIT_BEHAVIOR: &str = "_init";

/// Name of the synthetic initial transition
pub const INIT_TRANSITION: &str = "_init";

/// Name of a transition, unique within its component
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransitionId(pub String);

impl TransitionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn new<S: Into<String>>(name: S) -> Self {
        TransitionId(name.into())
    }
}

impl From<&str> for TransitionId {
    fn from(s: &str) -> Self {
        TransitionId(s.to_string())
    }
}

impl From<String> for TransitionId {
    fn from(s: String) -> Self {
        TransitionId(s)
    }
}

impl std::fmt::Display for TransitionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Description of one transition of a component type
///
/// ## Examples:
///
/// **Plain step**: `TransitionDefinition::new("install", "initial", "installed", "deploy")`
///
/// **Synchronized join**: two transitions reaching "configured" with the same
/// idset must both complete before "configured" activates.
///
/// **With an action**:
/// ```rust
/// # use concerto::TransitionDefinition;
/// let t = TransitionDefinition::new("install", "initial", "installed", "deploy")
///     .with_action("apt_install")
///     .with_args(vec![serde_json::json!("nginx")]);
/// assert_eq!(t.action.as_deref(), Some("apt_install"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionDefinition {
    pub name: TransitionId,
    pub source: PlaceId,
    pub destination: PlaceId,
    pub behavior: String,
    pub idset: u32,
    /// Registered action to run; `None` means the transition completes as
    /// soon as it starts
    pub action: Option<String>,
    /// Static arguments handed to the action on every run
    pub args: Vec<serde_json::Value>,
}

impl TransitionDefinition {
    pub fn new<I, S, D, B>(name: I, source: S, destination: D, behavior: B) -> Self
    where
        I: Into<TransitionId>,
        S: Into<PlaceId>,
        D: Into<PlaceId>,
        B: Into<String>,
    {
        TransitionDefinition {
            name: name.into(),
            source: source.into(),
            destination: destination.into(),
            behavior: behavior.into(),
            idset: 0,
            action: None,
            args: vec![],
        }
    }

    pub fn with_idset(mut self, idset: u32) -> Self {
        self.idset = idset;
        self
    }

    pub fn with_action<A: Into<String>>(mut self, action: A) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_args(mut self, args: Vec<serde_json::Value>) -> Self {
        self.args = args;
        self
    }
}
