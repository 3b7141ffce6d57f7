// Dependency definitions - typed ports of a component

use serde::{Deserialize, Serialize};

/// Name of a dependency port, unique within its component
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DependencyId(pub String);

impl DependencyId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn new<S: Into<String>>(name: S) -> Self {
        DependencyId(name.into())
    }
}

impl From<&str> for DependencyId {
    fn from(s: &str) -> Self {
        DependencyId(s.to_string())
    }
}

impl From<String> for DependencyId {
    fn from(s: String) -> Self {
        DependencyId(s)
    }
}

impl std::fmt::Display for DependencyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of a dependency port
///
/// Use-family ports gate transitions (and places or groups) on an active
/// provider. Provide-family ports are activated by the token being at their
/// bound places and refuse to be left while a consumer still uses them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DependencyType {
    Use,
    DataUse,
    Provide,
    DataProvide,
}

impl DependencyType {
    pub fn is_use_family(self) -> bool {
        matches!(self, DependencyType::Use | DependencyType::DataUse)
    }

    pub fn is_provide_family(self) -> bool {
        !self.is_use_family()
    }

    /// Only Use<->Provide and DataUse<->DataProvide may be connected
    pub fn is_compatible_with(self, other: DependencyType) -> bool {
        matches!(
            (self, other),
            (DependencyType::Use, DependencyType::Provide)
                | (DependencyType::Provide, DependencyType::Use)
                | (DependencyType::DataUse, DependencyType::DataProvide)
                | (DependencyType::DataProvide, DependencyType::DataUse)
        )
    }

    /// The kind a connected peer must have
    pub fn counterpart(self) -> DependencyType {
        match self {
            DependencyType::Use => DependencyType::Provide,
            DependencyType::Provide => DependencyType::Use,
            DependencyType::DataUse => DependencyType::DataProvide,
            DependencyType::DataProvide => DependencyType::DataUse,
        }
    }

    pub fn is_readable(self) -> bool {
        matches!(self, DependencyType::DataUse | DependencyType::DataProvide)
    }

    pub fn is_writable(self) -> bool {
        self == DependencyType::DataProvide
    }
}

impl std::fmt::Display for DependencyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DependencyType::Use => "use",
            DependencyType::DataUse => "data-use",
            DependencyType::Provide => "provide",
            DependencyType::DataProvide => "data-provide",
        };
        write!(f, "{}", name)
    }
}

/// Element of the net a dependency is bound to
///
/// Names live in separate namespaces (a place and a transition may share a
/// name), so the kind of element is explicit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "lowercase")]
pub enum Binding {
    Place(String),
    Transition(String),
    Group(String),
}

impl Binding {
    pub fn place<S: Into<String>>(name: S) -> Self {
        Binding::Place(name.into())
    }

    pub fn transition<S: Into<String>>(name: S) -> Self {
        Binding::Transition(name.into())
    }

    pub fn group<S: Into<String>>(name: S) -> Self {
        Binding::Group(name.into())
    }
}

/// Description of one dependency port of a component type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyDefinition {
    pub name: DependencyId,
    pub kind: DependencyType,
    pub bindings: Vec<Binding>,
}

impl DependencyDefinition {
    pub fn new<N, I>(name: N, kind: DependencyType, bindings: I) -> Self
    where
        N: Into<DependencyId>,
        I: IntoIterator<Item = Binding>,
    {
        Self {
            name: name.into(),
            kind,
            bindings: bindings.into_iter().collect(),
        }
    }
}
