// Groups - token counters spanning several places of one component
//
// A group lets a dependency gate on "the token is somewhere in this part of
// the net" instead of on a single place. The group counts the tokens inside
// its boundary: tokens sitting on member places and tokens travelling along
// member transitions (a transition is a member when both of its ends are).
//
// Crossing the boundary is described by a GroupOperation carrying the change
// in token count. The activation and deactivation rules below compare the
// current count against the delta exactly as the deployment model defines
// them; components rely on these precise rules, so they are kept as they are.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::{DependencyIdx, PlaceId, PlaceIdx, TransitionIdx};
use crate::invariant_violation;

/// Description of a group in a component type: a name and its member places
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupDefinition {
    pub name: String,
    pub places: Vec<PlaceId>,
}

impl GroupDefinition {
    pub fn new<N, I, P>(name: N, places: I) -> Self
    where
        N: Into<String>,
        I: IntoIterator<Item = P>,
        P: Into<PlaceId>,
    {
        Self {
            name: name.into(),
            places: places.into_iter().map(Into::into).collect(),
        }
    }
}

/// Change in a group's token count caused by one place activation or one
/// place being left
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupOperation {
    pub delta: i64,
}

impl GroupOperation {
    pub fn new(delta: i64) -> Self {
        Self { delta }
    }

    pub fn is_nothing(&self) -> bool {
        self.delta == 0
    }
}

/// Run-time group of a component
#[derive(Debug, Clone)]
pub struct Group {
    pub name: String,
    places: BTreeSet<PlaceIdx>,
    transitions: BTreeSet<TransitionIdx>,
    dependencies: Vec<DependencyIdx>,
    nb_tokens: i64,
}

impl Group {
    pub fn new<N: Into<String>>(name: N) -> Self {
        Self {
            name: name.into(),
            places: BTreeSet::new(),
            transitions: BTreeSet::new(),
            dependencies: Vec::new(),
            nb_tokens: 0,
        }
    }

    pub fn add_place(&mut self, place: PlaceIdx) {
        self.places.insert(place);
    }

    pub fn add_transition(&mut self, transition: TransitionIdx) {
        self.transitions.insert(transition);
    }

    pub fn contains_place(&self, place: PlaceIdx) -> bool {
        self.places.contains(&place)
    }

    pub fn contains_transition(&self, transition: TransitionIdx) -> bool {
        self.transitions.contains(&transition)
    }

    pub fn places(&self) -> impl Iterator<Item = PlaceIdx> + '_ {
        self.places.iter().copied()
    }

    pub fn transitions(&self) -> impl Iterator<Item = TransitionIdx> + '_ {
        self.transitions.iter().copied()
    }

    pub fn bind_dependency(&mut self, dependency: DependencyIdx) {
        self.dependencies.push(dependency);
    }

    pub fn dependencies(&self) -> &[DependencyIdx] {
        &self.dependencies
    }

    pub fn nb_tokens(&self) -> i64 {
        self.nb_tokens
    }

    /// Restores a checkpointed counter
    pub fn set_nb_tokens(&mut self, nb_tokens: i64) {
        if nb_tokens < 0 {
            invariant_violation!("group {} restored with {} tokens", self.name, nb_tokens);
        }
        self.nb_tokens = nb_tokens;
    }

    /// Operation for `place` activating after consuming the input docks of
    /// `consumed` transitions
    pub fn entering_operation(&self, place: PlaceIdx, consumed: &[TransitionIdx]) -> GroupOperation {
        let arriving = i64::from(self.contains_place(place));
        let leaving_transitions = consumed
            .iter()
            .filter(|t| self.contains_transition(**t))
            .count() as i64;
        GroupOperation::new(arriving - leaving_transitions)
    }

    /// Operation for `place` being left through the output docks of
    /// `produced` transitions
    pub fn leaving_operation(&self, place: PlaceIdx, produced: &[TransitionIdx]) -> GroupOperation {
        let departing = i64::from(self.contains_place(place));
        let entering_transitions = produced
            .iter()
            .filter(|t| self.contains_transition(**t))
            .count() as i64;
        GroupOperation::new(entering_transitions - departing)
    }

    /// The group goes from empty to holding a token
    pub fn is_activating(&self, operation: GroupOperation) -> bool {
        self.nb_tokens == 0 && operation.delta > 0
    }

    /// The group loses its last token
    pub fn is_deactivating(&self, operation: GroupOperation) -> bool {
        self.nb_tokens > 0 && self.nb_tokens == -operation.delta
    }

    pub fn apply(&mut self, operation: GroupOperation) {
        let next = self.nb_tokens + operation.delta;
        if next < 0 {
            invariant_violation!(
                "group {} would hold {} tokens after delta {}",
                self.name,
                next,
                operation.delta
            );
        }
        self.nb_tokens = next;
    }
}
