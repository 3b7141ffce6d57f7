// Component types - the registration table a component is built from

//! # Component Types
//!
//! A [`ComponentType`] is everything needed to instantiate a component:
//! places, the initial place, transitions, dependency ports, groups and the
//! table of named actions the transitions refer to.
//!
//! Types are assembled with [`ComponentTypeBuilder`] and validated once in
//! [`ComponentTypeBuilder::build`]: duplicate names, references to unknown
//! places, transitions, groups or actions, and dependencies bound to
//! elements they cannot gate all fail there rather than at first use.
//!
//! ```rust
//! use concerto::{Binding, ComponentType, DependencyType};
//!
//! let user = ComponentType::builder("user")
//!     .places(["initial", "running"])
//!     .initial_place("initial")
//!     .action("start", |_ctx, _args| Ok(()))
//!     .transition_with_action("run", "initial", "running", "run", "start")
//!     .dependency("service", DependencyType::Use, [Binding::transition("run")])
//!     .build()
//!     .unwrap();
//!
//! assert!(user.has_behavior("run"));
//! assert!(!user.has_behavior("stop"));
//! ```

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;

use super::action::{Action, ActionContext};
use crate::models::{
    Binding, DependencyDefinition, DependencyId, DependencyType, GroupDefinition, PlaceId,
    TransitionDefinition, INIT_BEHAVIOR, INIT_TRANSITION,
};
use crate::{ConcertoError, Result};

/// Validated description of a kind of component
#[derive(Clone)]
pub struct ComponentType {
    pub name: String,
    pub places: Vec<PlaceId>,
    pub initial_place: PlaceId,
    pub transitions: Vec<TransitionDefinition>,
    pub dependencies: Vec<DependencyDefinition>,
    pub groups: Vec<GroupDefinition>,
    actions: HashMap<String, Action>,
    behaviors: BTreeSet<String>,
}

impl ComponentType {
    pub fn builder<N: Into<String>>(name: N) -> ComponentTypeBuilder {
        ComponentTypeBuilder::new(name)
    }

    pub fn action(&self, name: &str) -> Option<&Action> {
        self.actions.get(name)
    }

    /// Behaviors with at least one transition
    pub fn behaviors(&self) -> impl Iterator<Item = &str> {
        self.behaviors.iter().map(String::as_str)
    }

    pub fn has_behavior(&self, behavior: &str) -> bool {
        self.behaviors.contains(behavior)
    }

    pub fn dependency(&self, name: &DependencyId) -> Option<&DependencyDefinition> {
        self.dependencies.iter().find(|d| &d.name == name)
    }
}

impl std::fmt::Debug for ComponentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut actions: Vec<&String> = self.actions.keys().collect();
        actions.sort();
        f.debug_struct("ComponentType")
            .field("name", &self.name)
            .field("places", &self.places)
            .field("initial_place", &self.initial_place)
            .field("transitions", &self.transitions)
            .field("dependencies", &self.dependencies)
            .field("groups", &self.groups)
            .field("actions", &actions)
            .finish()
    }
}

/// Builder for [`ComponentType`]
pub struct ComponentTypeBuilder {
    name: String,
    places: Vec<PlaceId>,
    initial_place: Option<PlaceId>,
    transitions: Vec<TransitionDefinition>,
    dependencies: Vec<DependencyDefinition>,
    groups: Vec<GroupDefinition>,
    actions: HashMap<String, Action>,
    duplicate_action: Option<String>,
}

impl ComponentTypeBuilder {
    pub fn new<N: Into<String>>(name: N) -> Self {
        Self {
            name: name.into(),
            places: Vec::new(),
            initial_place: None,
            transitions: Vec::new(),
            dependencies: Vec::new(),
            groups: Vec::new(),
            actions: HashMap::new(),
            duplicate_action: None,
        }
    }

    pub fn place<P: Into<PlaceId>>(mut self, name: P) -> Self {
        self.places.push(name.into());
        self
    }

    pub fn places<I, P>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PlaceId>,
    {
        self.places.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn initial_place<P: Into<PlaceId>>(mut self, name: P) -> Self {
        self.initial_place = Some(name.into());
        self
    }

    /// Registers a named action transitions can refer to
    pub fn action<N, F>(mut self, name: N, action: F) -> Self
    where
        N: Into<String>,
        F: Fn(&ActionContext, &[Value]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.actions.insert(name.clone(), Arc::new(action)).is_some() {
            self.duplicate_action.get_or_insert(name);
        }
        self
    }

    /// Transition without an action: it completes as soon as it starts
    pub fn transition<T, S, D, B>(self, name: T, source: S, destination: D, behavior: B) -> Self
    where
        T: Into<crate::models::TransitionId>,
        S: Into<PlaceId>,
        D: Into<PlaceId>,
        B: Into<String>,
    {
        self.transition_def(TransitionDefinition::new(name, source, destination, behavior))
    }

    pub fn transition_with_action<T, S, D, B, A>(
        self,
        name: T,
        source: S,
        destination: D,
        behavior: B,
        action: A,
    ) -> Self
    where
        T: Into<crate::models::TransitionId>,
        S: Into<PlaceId>,
        D: Into<PlaceId>,
        B: Into<String>,
        A: Into<String>,
    {
        self.transition_def(
            TransitionDefinition::new(name, source, destination, behavior).with_action(action),
        )
    }

    pub fn transition_def(mut self, definition: TransitionDefinition) -> Self {
        self.transitions.push(definition);
        self
    }

    pub fn dependency<N, I>(mut self, name: N, kind: DependencyType, bindings: I) -> Self
    where
        N: Into<DependencyId>,
        I: IntoIterator<Item = Binding>,
    {
        self.dependencies
            .push(DependencyDefinition::new(name, kind, bindings));
        self
    }

    pub fn group<N, I, P>(mut self, name: N, places: I) -> Self
    where
        N: Into<String>,
        I: IntoIterator<Item = P>,
        P: Into<PlaceId>,
    {
        self.groups.push(GroupDefinition::new(name, places));
        self
    }

    /// Validates every name and reference and produces the type
    pub fn build(self) -> Result<ComponentType> {
        if let Some(name) = self.duplicate_action {
            return Err(ConcertoError::DuplicateName { kind: "action", name });
        }

        let mut place_set = HashSet::new();
        for place in &self.places {
            if !place_set.insert(place) {
                return Err(ConcertoError::DuplicateName {
                    kind: "place",
                    name: place.to_string(),
                });
            }
        }

        let initial_place = self.initial_place.ok_or_else(|| {
            ConcertoError::Config(format!("component type {} has no initial place", self.name))
        })?;
        if !place_set.contains(&initial_place) {
            return Err(ConcertoError::UnknownPlace(initial_place.to_string()));
        }

        let mut transition_set = HashSet::new();
        let mut behaviors = BTreeSet::new();
        for transition in &self.transitions {
            if transition.name.as_str() == INIT_TRANSITION
                || !transition_set.insert(transition.name.as_str())
            {
                return Err(ConcertoError::DuplicateName {
                    kind: "transition",
                    name: transition.name.to_string(),
                });
            }
            for place in [&transition.source, &transition.destination] {
                if !place_set.contains(place) {
                    return Err(ConcertoError::UnknownPlace(format!(
                        "{} (transition {})",
                        place, transition.name
                    )));
                }
            }
            if transition.behavior == INIT_BEHAVIOR {
                return Err(ConcertoError::Config(format!(
                    "transition {} uses the reserved behavior {}",
                    transition.name, INIT_BEHAVIOR
                )));
            }
            if let Some(action) = &transition.action {
                if !self.actions.contains_key(action) {
                    return Err(ConcertoError::UnknownAction {
                        transition: transition.name.to_string(),
                        action: action.clone(),
                    });
                }
            }
            behaviors.insert(transition.behavior.clone());
        }

        let mut group_set = HashSet::new();
        for group in &self.groups {
            if !group_set.insert(group.name.as_str()) {
                return Err(ConcertoError::DuplicateName {
                    kind: "group",
                    name: group.name.clone(),
                });
            }
            if let Some(place) = group.places.iter().find(|p| !place_set.contains(p)) {
                return Err(ConcertoError::UnknownPlace(format!(
                    "{} (group {})",
                    place, group.name
                )));
            }
        }

        let mut dependency_set = HashSet::new();
        for dependency in &self.dependencies {
            if !dependency_set.insert(dependency.name.as_str()) {
                return Err(ConcertoError::DuplicateName {
                    kind: "dependency",
                    name: dependency.name.to_string(),
                });
            }
            for binding in &dependency.bindings {
                match binding {
                    Binding::Place(place) => {
                        if !place_set.contains(&PlaceId::from(place.as_str())) {
                            return Err(ConcertoError::UnknownPlace(place.clone()));
                        }
                    }
                    Binding::Transition(transition) => {
                        if !transition_set.contains(transition.as_str()) {
                            return Err(ConcertoError::UnknownTransition(transition.clone()));
                        }
                        if !dependency.kind.is_use_family() {
                            return Err(ConcertoError::InvalidBinding {
                                dependency: dependency.name.to_string(),
                                reason: format!(
                                    "a {} port cannot gate transition {}",
                                    dependency.kind, transition
                                ),
                            });
                        }
                    }
                    Binding::Group(group) => {
                        if !group_set.contains(group.as_str()) {
                            return Err(ConcertoError::UnknownGroup(group.clone()));
                        }
                    }
                }
            }
        }

        Ok(ComponentType {
            name: self.name,
            places: self.places,
            initial_place,
            transitions: self.transitions,
            dependencies: self.dependencies,
            groups: self.groups,
            actions: self.actions,
            behaviors,
        })
    }
}
