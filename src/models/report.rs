// Error reports and debug snapshots

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ComponentId, TransitionId};

/// A failed transition action
///
/// Action failures never stop the engine. They are recorded against the
/// (component, transition) pair and surfaced through the error-report
/// queries of components and assemblies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub id: Uuid,
    pub component: ComponentId,
    pub transition: TransitionId,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ErrorReport {
    pub fn new<M: Into<String>>(component: ComponentId, transition: TransitionId, message: M) -> Self {
        Self {
            id: Uuid::new_v4(),
            component,
            transition,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

impl std::fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {}.{}: {}",
            self.timestamp.to_rfc3339(),
            self.component,
            self.transition,
            self.message
        )
    }
}

/// Active sets of one component, by name
///
/// Docks are named `"<transition>:in"` / `"<transition>:out"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentSnapshot {
    pub name: String,
    pub behavior: Option<String>,
    pub queued_behaviors: Vec<String>,
    pub active_places: Vec<String>,
    pub active_transitions: Vec<String>,
    pub active_input_docks: Vec<String>,
    pub active_output_docks: Vec<String>,
    pub idle: bool,
}

/// State of a whole assembly, returned by timed waits and debug queries
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DebugSnapshot {
    pub assembly: String,
    pub components: Vec<ComponentSnapshot>,
    pub active_components: Vec<String>,
    pub connections: Vec<String>,
    pub pending_instructions: Vec<String>,
    pub error_reports: Vec<ErrorReport>,
}

impl DebugSnapshot {
    pub fn component(&self, name: &str) -> Option<&ComponentSnapshot> {
        self.components.iter().find(|c| c.name == name)
    }
}
