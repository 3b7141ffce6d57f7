// Reconfiguration instructions - the programmatic surface of an assembly

use serde::{Deserialize, Serialize};

use super::DependencyId;

/// Name of a component instance, unique across the assemblies that share a
/// communication bus
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentId(pub String);

impl ComponentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn new<S: Into<String>>(name: S) -> Self {
        ComponentId(name.into())
    }
}

impl From<&str> for ComponentId {
    fn from(s: &str) -> Self {
        ComponentId(s.to_string())
    }
}

impl From<String> for ComponentId {
    fn from(s: String) -> Self {
        ComponentId(s)
    }
}

impl From<&ComponentId> for ComponentId {
    fn from(id: &ComponentId) -> Self {
        id.clone()
    }
}

impl std::fmt::Display for ComponentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One step of a reconfiguration program
///
/// Instructions are queued on an assembly and applied one at a time; the
/// assembly keeps stepping its components until the current instruction
/// reports completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Instruction {
    /// Instantiate a registered component type
    Add {
        name: ComponentId,
        component_type: String,
        args: serde_json::Value,
    },
    /// Remove an idle, disconnected component
    Delete { name: ComponentId },
    Connect {
        component1: ComponentId,
        dependency1: DependencyId,
        component2: ComponentId,
        dependency2: DependencyId,
    },
    Disconnect {
        component1: ComponentId,
        dependency1: DependencyId,
        component2: ComponentId,
        dependency2: DependencyId,
    },
    PushBehavior {
        name: ComponentId,
        behavior: String,
    },
    /// Finishes once the named component (local or remote) is idle
    Wait { name: ComponentId },
    /// Global barrier over local components and the remote assemblies this
    /// one is connected to
    WaitAll { wait_for_refusing_provide: bool },
}

/// Discriminant of an [`Instruction`], used in logs and snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstructionKind {
    Add,
    Delete,
    Connect,
    Disconnect,
    PushBehavior,
    Wait,
    WaitAll,
}

impl Instruction {
    pub fn add<N: Into<ComponentId>, T: Into<String>>(
        name: N,
        component_type: T,
        args: serde_json::Value,
    ) -> Self {
        Instruction::Add {
            name: name.into(),
            component_type: component_type.into(),
            args,
        }
    }

    pub fn delete<N: Into<ComponentId>>(name: N) -> Self {
        Instruction::Delete { name: name.into() }
    }

    pub fn connect<C1, D1, C2, D2>(c1: C1, d1: D1, c2: C2, d2: D2) -> Self
    where
        C1: Into<ComponentId>,
        D1: Into<DependencyId>,
        C2: Into<ComponentId>,
        D2: Into<DependencyId>,
    {
        Instruction::Connect {
            component1: c1.into(),
            dependency1: d1.into(),
            component2: c2.into(),
            dependency2: d2.into(),
        }
    }

    pub fn disconnect<C1, D1, C2, D2>(c1: C1, d1: D1, c2: C2, d2: D2) -> Self
    where
        C1: Into<ComponentId>,
        D1: Into<DependencyId>,
        C2: Into<ComponentId>,
        D2: Into<DependencyId>,
    {
        Instruction::Disconnect {
            component1: c1.into(),
            dependency1: d1.into(),
            component2: c2.into(),
            dependency2: d2.into(),
        }
    }

    pub fn push_behavior<N: Into<ComponentId>, B: Into<String>>(name: N, behavior: B) -> Self {
        Instruction::PushBehavior {
            name: name.into(),
            behavior: behavior.into(),
        }
    }

    pub fn wait<N: Into<ComponentId>>(name: N) -> Self {
        Instruction::Wait { name: name.into() }
    }

    pub fn wait_all() -> Self {
        Instruction::WaitAll {
            wait_for_refusing_provide: false,
        }
    }

    pub fn kind(&self) -> InstructionKind {
        match self {
            Instruction::Add { .. } => InstructionKind::Add,
            Instruction::Delete { .. } => InstructionKind::Delete,
            Instruction::Connect { .. } => InstructionKind::Connect,
            Instruction::Disconnect { .. } => InstructionKind::Disconnect,
            Instruction::PushBehavior { .. } => InstructionKind::PushBehavior,
            Instruction::Wait { .. } => InstructionKind::Wait,
            Instruction::WaitAll { .. } => InstructionKind::WaitAll,
        }
    }
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Instruction::Add {
                name,
                component_type,
                ..
            } => write!(f, "add({}, {})", name, component_type),
            Instruction::Delete { name } => write!(f, "del({})", name),
            Instruction::Connect {
                component1,
                dependency1,
                component2,
                dependency2,
            } => write!(
                f,
                "connect({}.{}, {}.{})",
                component1, dependency1, component2, dependency2
            ),
            Instruction::Disconnect {
                component1,
                dependency1,
                component2,
                dependency2,
            } => write!(
                f,
                "disconnect({}.{}, {}.{})",
                component1, dependency1, component2, dependency2
            ),
            Instruction::PushBehavior { name, behavior } => {
                write!(f, "push_b({}, {})", name, behavior)
            }
            Instruction::Wait { name } => write!(f, "wait({})", name),
            Instruction::WaitAll {
                wait_for_refusing_provide,
            } => write!(f, "wait_all(refusing={})", wait_for_refusing_provide),
        }
    }
}
