// Places and docks - the nodes of a component's deployment net
//
// A component's deployment process is a small Petri net:
//
// ```
//   [initial] --install--> [installed] --configure--> [configured] --run--> [running]
// ```
//
// **Places** hold the deployment token. Which places currently hold it is
// run-time configuration owned by the component, never stored on the place.
//
// **Docks** attach a transition to a place. Every transition owns exactly one
// output dock on its source place and one input dock on its destination
// place. Docks are grouped by behavior (the named scenario the transition
// belongs to) and input docks are further grouped by idset: a place only
// activates once every input dock of one idset has received a token.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use super::{DependencyIdx, DockIdx, GroupIdx, PlaceIdx, TransitionIdx};

/// Name of a place, unique within its component
///
/// Examples: "initial", "installed", "configured", "running"
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlaceId(pub String);

impl PlaceId {
    /// Get the place identifier as a string slice
    ///
    /// ```rust
    /// # use concerto::PlaceId;
    /// let place = PlaceId::from("installed");
    /// assert_eq!(place.as_str(), "installed");
    /// ```
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn new<S: Into<String>>(name: S) -> Self {
        PlaceId(name.into())
    }
}

impl From<&str> for PlaceId {
    fn from(s: &str) -> Self {
        PlaceId(s.to_string())
    }
}

impl From<String> for PlaceId {
    fn from(s: String) -> Self {
        PlaceId(s)
    }
}

impl std::fmt::Display for PlaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Direction of a dock relative to its place
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DockDirection {
    /// Destination side of a transition: a token arrives here
    Input,
    /// Source side of a transition: a token leaves from here
    Output,
}

/// Attachment point of one transition on one place
///
/// Immutable after creation. Identity is (place, direction, transition).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dock {
    pub place: PlaceIdx,
    pub direction: DockDirection,
    pub transition: TransitionIdx,
}

impl Dock {
    pub fn input(place: PlaceIdx, transition: TransitionIdx) -> Self {
        Self {
            place,
            direction: DockDirection::Input,
            transition,
        }
    }

    pub fn output(place: PlaceIdx, transition: TransitionIdx) -> Self {
        Self {
            place,
            direction: DockDirection::Output,
            transition,
        }
    }
}

/// A node of the component net
///
/// Holds, per behavior, the output docks leaving it and, per behavior and
/// idset, the input docks entering it. Also remembers the dependency ports
/// and groups bound to it so the interpreter can gate on them without
/// scanning the whole component.
#[derive(Debug, Clone)]
pub struct Place {
    pub name: PlaceId,
    output_docks: HashMap<String, Vec<DockIdx>>,
    input_docks: HashMap<String, BTreeMap<u32, Vec<DockIdx>>>,
    dependencies: Vec<DependencyIdx>,
    groups: Vec<GroupIdx>,
}

impl Place {
    pub fn new<P: Into<PlaceId>>(name: P) -> Self {
        Self {
            name: name.into(),
            output_docks: HashMap::new(),
            input_docks: HashMap::new(),
            dependencies: Vec::new(),
            groups: Vec::new(),
        }
    }

    pub fn add_output_dock(&mut self, behavior: &str, dock: DockIdx) {
        self.output_docks
            .entry(behavior.to_string())
            .or_default()
            .push(dock);
    }

    pub fn add_input_dock(&mut self, behavior: &str, idset: u32, dock: DockIdx) {
        self.input_docks
            .entry(behavior.to_string())
            .or_default()
            .entry(idset)
            .or_default()
            .push(dock);
    }

    /// Output docks leaving this place under `behavior` (empty if none)
    pub fn output_docks(&self, behavior: &str) -> &[DockIdx] {
        self.output_docks
            .get(behavior)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn has_output_docks(&self, behavior: &str) -> bool {
        !self.output_docks(behavior).is_empty()
    }

    /// All input docks of one synchronization set
    ///
    /// The place activates once every dock returned here holds a token.
    pub fn input_dock_set(&self, behavior: &str, idset: u32) -> &[DockIdx] {
        self.input_docks
            .get(behavior)
            .and_then(|sets| sets.get(&idset))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Behaviors that have at least one dock on this place
    pub fn behaviors(&self) -> impl Iterator<Item = &str> {
        self.output_docks
            .keys()
            .chain(self.input_docks.keys())
            .map(String::as_str)
    }

    pub fn bind_dependency(&mut self, dependency: DependencyIdx) {
        self.dependencies.push(dependency);
    }

    pub fn dependencies(&self) -> &[DependencyIdx] {
        &self.dependencies
    }

    pub fn add_group(&mut self, group: GroupIdx) {
        if !self.groups.contains(&group) {
            self.groups.push(group);
        }
    }

    pub fn groups(&self) -> &[GroupIdx] {
        &self.groups
    }
}
