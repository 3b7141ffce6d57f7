// Components - the per-component operational-semantics interpreter

//! # Components
//!
//! A [`Component`] is one instance of a [`ComponentType`]: the net
//! (places, docks, transitions, ports and groups stored in index arenas)
//! together with its run-time configuration:
//!
//! - active places, active transitions, active input docks and active
//!   output docks
//! - the selected behavior and the FIFO of queued behaviors
//! - the places already visited under the current behavior
//!
//! ## One step
//!
//! [`Component::semantics`] never blocks. It runs four phases, always in
//! this order, each working from a snapshot of its input set taken when
//! the phase starts:
//!
//! 1. **input docks -> place**: a place activates once every input dock of
//!    one idset holds a token and every use port it engages is served
//! 2. **place -> output docks**: an active place is left through all its
//!    output docks for the behavior unless a provide port it releases is
//!    still locked
//! 3. **output dock -> transition**: a transition starts once its use
//!    ports are served, its action going to the blocking pool
//! 4. **transition -> input dock**: a finished action delivers its token
//!    to the destination's input dock
//!
//! The component is idle when nothing is in flight and no unvisited active
//! place has output docks for the behavior. An idle component moves on to
//! its next queued behavior, or drops its behavior when none is queued.
//!
//! ## Rust Learning Notes:
//!
//! Every `await` in a phase is a read or write on the communication layer;
//! the borrow checker forces each phase to collect the indices it needs
//! before awaiting, which is also what makes the snapshot semantics
//! explicit.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::action::{ActionContext, Transition, TransitionState};
use super::checkpoint::{ComponentCheckpoint, DockCheckpoint, TransitionCheckpoint};
use super::communication::CommunicationClient;
use super::component_type::ComponentType;
use super::config::FailurePolicy;
use super::connection::Connection;
use super::dependency::Port;
use crate::models::{
    Binding, ComponentId, ComponentSnapshot, DependencyId, DependencyIdx, Dock, DockDirection,
    DockIdx, ErrorReport, Group, GroupIdx, GroupOperation, Place, PlaceId, PlaceIdx,
    TransitionId, TransitionIdx, INIT_BEHAVIOR, INIT_TRANSITION,
};
use crate::{ConcertoError, Result};

/// What a component needs from its assembly to run
#[derive(Clone)]
pub struct ComponentEnv {
    pub comm: Arc<CommunicationClient>,
    pub dry_run: bool,
    pub failure_policy: FailurePolicy,
}

impl ComponentEnv {
    pub fn new(comm: Arc<CommunicationClient>) -> Self {
        Self {
            comm,
            dry_run: false,
            failure_policy: FailurePolicy::default(),
        }
    }
}

pub struct Component {
    id: ComponentId,
    type_tag: String,
    component_type: Arc<ComponentType>,
    args: Value,

    places: Vec<Place>,
    place_index: HashMap<PlaceId, PlaceIdx>,
    docks: Vec<Dock>,
    transitions: Vec<Transition>,
    transition_index: HashMap<TransitionId, TransitionIdx>,
    init_transition: TransitionIdx,
    ports: Vec<Port>,
    port_index: HashMap<DependencyId, DependencyIdx>,
    // shared with running actions
    ports_by_name: Arc<HashMap<DependencyId, Port>>,
    groups: Vec<Group>,

    active_places: BTreeSet<PlaceIdx>,
    active_transitions: BTreeSet<TransitionIdx>,
    active_input_docks: BTreeSet<DockIdx>,
    active_output_docks: BTreeSet<DockIdx>,
    behavior: Option<String>,
    queued_behaviors: VecDeque<String>,
    visited_places: BTreeSet<PlaceIdx>,

    error_reports: Vec<ErrorReport>,
    env: Option<ComponentEnv>,
    restored: bool,
    progressed: bool,
}

impl Component {
    /// Builds the net of `component_type` for a new instance named `id`
    pub fn new(id: ComponentId, component_type: Arc<ComponentType>, args: Value) -> Result<Self> {
        let mut places: Vec<Place> = component_type
            .places
            .iter()
            .map(|name| Place::new(name.clone()))
            .collect();
        let place_index: HashMap<PlaceId, PlaceIdx> = component_type
            .places
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.clone(), idx))
            .collect();
        let lookup_place = |name: &PlaceId| {
            place_index
                .get(name)
                .copied()
                .ok_or_else(|| ConcertoError::UnknownPlace(name.to_string()))
        };

        let mut docks = Vec::new();
        let mut transitions = Vec::new();
        let mut transition_index = HashMap::new();

        for definition in &component_type.transitions {
            let idx = transitions.len();
            let source = lookup_place(&definition.source)?;
            let destination = lookup_place(&definition.destination)?;

            let output_dock = docks.len();
            docks.push(Dock::output(source, idx));
            places[source].add_output_dock(&definition.behavior, output_dock);

            let input_dock = docks.len();
            docks.push(Dock::input(destination, idx));
            places[destination].add_input_dock(&definition.behavior, definition.idset, input_dock);

            let action = match &definition.action {
                Some(name) => Some(component_type.action(name).cloned().ok_or_else(|| {
                    ConcertoError::UnknownAction {
                        transition: definition.name.to_string(),
                        action: name.clone(),
                    }
                })?),
                None => None,
            };

            transition_index.insert(definition.name.clone(), idx);
            transitions.push(Transition {
                name: definition.name.clone(),
                source: Some(source),
                destination,
                behavior: definition.behavior.clone(),
                idset: definition.idset,
                action,
                args: definition.args.clone(),
                output_dock: Some(output_dock),
                input_dock,
                dependencies: Vec::new(),
                state: TransitionState::Idle,
            });
        }

        // the synthetic transition putting the first token on the initial place
        let init_transition = transitions.len();
        let initial = lookup_place(&component_type.initial_place)?;
        let init_dock = docks.len();
        docks.push(Dock::input(initial, init_transition));
        places[initial].add_input_dock(INIT_BEHAVIOR, 0, init_dock);
        transition_index.insert(TransitionId::from(INIT_TRANSITION), init_transition);
        transitions.push(Transition {
            name: TransitionId::from(INIT_TRANSITION),
            source: None,
            destination: initial,
            behavior: INIT_BEHAVIOR.to_string(),
            idset: 0,
            action: None,
            args: Vec::new(),
            output_dock: None,
            input_dock: init_dock,
            dependencies: Vec::new(),
            state: TransitionState::Idle,
        });

        let mut groups = Vec::new();
        let mut group_index = HashMap::new();
        for definition in &component_type.groups {
            let idx = groups.len();
            let mut group = Group::new(definition.name.clone());
            for place in &definition.places {
                let place = lookup_place(place)?;
                group.add_place(place);
                places[place].add_group(idx);
            }
            for (t, transition) in transitions.iter().enumerate() {
                if let Some(source) = transition.source {
                    if group.contains_place(source) && group.contains_place(transition.destination) {
                        group.add_transition(t);
                    }
                }
            }
            group_index.insert(definition.name.clone(), idx);
            groups.push(group);
        }

        let mut ports = Vec::new();
        let mut port_index = HashMap::new();
        for definition in &component_type.dependencies {
            let idx = ports.len();
            for binding in &definition.bindings {
                match binding {
                    Binding::Place(name) => {
                        let place = lookup_place(&PlaceId::from(name.as_str()))?;
                        places[place].bind_dependency(idx);
                    }
                    Binding::Transition(name) => {
                        let t = transition_index
                            .get(&TransitionId::from(name.as_str()))
                            .copied()
                            .ok_or_else(|| ConcertoError::UnknownTransition(name.clone()))?;
                        transitions[t].dependencies.push(idx);
                    }
                    Binding::Group(name) => {
                        let g = group_index
                            .get(name)
                            .copied()
                            .ok_or_else(|| ConcertoError::UnknownGroup(name.clone()))?;
                        groups[g].bind_dependency(idx);
                    }
                }
            }
            port_index.insert(definition.name.clone(), idx);
            ports.push(Port::new(id.clone(), definition.name.clone(), definition.kind));
        }
        let ports_by_name: Arc<HashMap<DependencyId, Port>> = Arc::new(
            ports
                .iter()
                .map(|port| (port.name.clone(), port.clone()))
                .collect(),
        );

        Ok(Self {
            id,
            type_tag: component_type.name.clone(),
            component_type,
            args,
            places,
            place_index,
            docks,
            transitions,
            transition_index,
            init_transition,
            ports,
            port_index,
            ports_by_name,
            groups,
            active_places: BTreeSet::new(),
            active_transitions: BTreeSet::new(),
            active_input_docks: BTreeSet::new(),
            active_output_docks: BTreeSet::new(),
            behavior: None,
            queued_behaviors: VecDeque::new(),
            visited_places: BTreeSet::new(),
            error_reports: Vec::new(),
            env: None,
            restored: false,
            progressed: false,
        })
    }

    pub fn id(&self) -> &ComponentId {
        &self.id
    }

    /// Registry tag this component was instantiated from
    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    pub(crate) fn set_type_tag<T: Into<String>>(&mut self, tag: T) {
        self.type_tag = tag.into();
    }

    pub fn component_type(&self) -> &Arc<ComponentType> {
        &self.component_type
    }

    pub fn args(&self) -> &Value {
        &self.args
    }

    pub fn is_initialized(&self) -> bool {
        self.env.is_some()
    }

    /// Attaches the component to its assembly and, unless its state was
    /// restored from a checkpoint, puts the first token in flight towards
    /// the initial place
    pub fn initialize(&mut self, env: ComponentEnv) -> Result<()> {
        if self.env.is_some() {
            return Err(ConcertoError::AlreadyInitialized(self.id.to_string()));
        }
        self.env = Some(env);
        if !self.restored {
            // a behavior selected before initialization runs after the first token lands
            if let Some(behavior) = self.behavior.take() {
                self.queued_behaviors.push_front(behavior);
            }
            self.transitions[self.init_transition].state = TransitionState::Finished(Ok(()));
            self.active_transitions.insert(self.init_transition);
            self.behavior = Some(INIT_BEHAVIOR.to_string());
        }
        Ok(())
    }

    fn env(&self) -> Result<ComponentEnv> {
        self.env
            .clone()
            .ok_or_else(|| ConcertoError::NotInitialized(self.id.to_string()))
    }

    pub fn behavior(&self) -> Option<&str> {
        self.behavior.as_deref()
    }

    pub fn queued_behaviors(&self) -> impl Iterator<Item = &str> {
        self.queued_behaviors.iter().map(String::as_str)
    }

    /// Selects `behavior` now if none is active, otherwise queues it
    pub fn queue_behavior(&mut self, behavior: &str) -> Result<()> {
        if !self.component_type.has_behavior(behavior) {
            return Err(ConcertoError::UnknownBehavior {
                component: self.id.to_string(),
                behavior: behavior.to_string(),
            });
        }
        if self.behavior.is_none() {
            info!("{}: behavior {}", self.id, behavior);
            self.behavior = Some(behavior.to_string());
            self.visited_places.clear();
        } else {
            debug!("{}: queued behavior {}", self.id, behavior);
            self.queued_behaviors.push_back(behavior.to_string());
        }
        Ok(())
    }

    pub fn port(&self, dependency: &DependencyId) -> Result<&Port> {
        self.port_index
            .get(dependency)
            .map(|idx| &self.ports[*idx])
            .ok_or_else(|| ConcertoError::UnknownDependency {
                component: self.id.to_string(),
                dependency: dependency.to_string(),
            })
    }

    pub fn ports(&self) -> &[Port] {
        &self.ports
    }

    /// Connections of every port, each listed once
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        let mut seen = HashSet::new();
        let mut connections = Vec::new();
        for port in &self.ports {
            for connection in port.connections() {
                if seen.insert(connection.id().clone()) {
                    connections.push(connection);
                }
            }
        }
        connections
    }

    pub async fn read(&self, dependency: &str) -> Result<Option<Value>> {
        let env = self.env()?;
        self.port(&DependencyId::from(dependency))?
            .read(&env.comm)
            .await
    }

    pub fn write(&self, dependency: &str, value: Value) -> Result<()> {
        self.port(&DependencyId::from(dependency))?.write(value)
    }

    pub async fn set_refusing(&self, dependency: &str, refusing: bool) -> Result<()> {
        let env = self.env()?;
        self.port(&DependencyId::from(dependency))?
            .set_refusing(refusing, &env.comm)
            .await
    }

    pub fn error_reports(&self) -> &[ErrorReport] {
        &self.error_reports
    }

    /// Whether the last step moved anything
    pub fn progressed(&self) -> bool {
        self.progressed
    }

    pub fn has_running_actions(&self) -> bool {
        self.active_transitions
            .iter()
            .any(|t| self.transitions[*t].state.is_running())
    }

    pub fn has_active_transitions(&self) -> bool {
        !self.active_transitions.is_empty()
    }

    fn is_idle_configuration(&self) -> bool {
        if !self.active_transitions.is_empty()
            || !self.active_output_docks.is_empty()
            || !self.active_input_docks.is_empty()
        {
            return false;
        }
        match &self.behavior {
            Some(behavior) => !self.active_places.iter().any(|p| {
                !self.visited_places.contains(p) && self.places[*p].has_output_docks(behavior)
            }),
            None => true,
        }
    }

    /// Runs one non-blocking step and returns whether the component is idle
    pub async fn semantics(&mut self) -> Result<bool> {
        let env = self.env()?;
        let comm = env.comm.clone();
        let mut progressed = false;

        if !self.active_input_docks.is_empty() {
            progressed |= self.input_docks_to_places(&comm).await?;
        }
        if !self.active_places.is_empty() {
            progressed |= self.places_to_output_docks(&comm).await?;
        }
        if !self.active_output_docks.is_empty() {
            progressed |= self.start_transitions(&comm, env.dry_run).await?;
        }
        if !self.active_transitions.is_empty() {
            progressed |= self
                .end_transitions(&comm, env.dry_run, env.failure_policy)
                .await?;
        }

        for port in &self.ports {
            port.publish_data(&comm).await?;
        }

        let idle = if self.is_idle_configuration() {
            match self.queued_behaviors.pop_front() {
                Some(next) => {
                    info!("{}: behavior {}", self.id, next);
                    self.behavior = Some(next);
                    self.visited_places.clear();
                    progressed = true;
                    false
                }
                None => {
                    if self.behavior.take().is_some() {
                        debug!("{}: idle", self.id);
                    }
                    true
                }
            }
        } else {
            false
        };

        self.progressed = progressed;
        Ok(idle)
    }

    /// Group operations for a place crossing, keyed by group
    fn group_operations<F>(&self, place: PlaceIdx, operation: F) -> Vec<(GroupIdx, GroupOperation)>
    where
        F: Fn(&Group) -> GroupOperation,
    {
        self.places[place]
            .groups()
            .iter()
            .map(|g| (*g, operation(&self.groups[*g])))
            .collect()
    }

    async fn input_docks_to_places(&mut self, comm: &CommunicationClient) -> Result<bool> {
        let snapshot: Vec<DockIdx> = self.active_input_docks.iter().copied().collect();
        let mut considered = HashSet::new();
        let mut progressed = false;

        'docks: for dock in snapshot {
            if !self.active_input_docks.contains(&dock) {
                continue;
            }
            let place = self.docks[dock].place;
            let transition = &self.transitions[self.docks[dock].transition];
            let (behavior, idset) = (transition.behavior.clone(), transition.idset);
            if !considered.insert((place, behavior.clone(), idset)) {
                continue;
            }

            let set = self.places[place].input_dock_set(&behavior, idset).to_vec();
            if set.is_empty() || !set.iter().all(|d| self.active_input_docks.contains(d)) {
                continue;
            }
            let consumed: Vec<TransitionIdx> =
                set.iter().map(|d| self.docks[*d].transition).collect();

            let operations =
                self.group_operations(place, |g| g.entering_operation(place, &consumed));
            let mut engaged: Vec<DependencyIdx> = self.places[place].dependencies().to_vec();
            for (g, operation) in &operations {
                if self.groups[*g].is_activating(*operation) {
                    engaged.extend_from_slice(self.groups[*g].dependencies());
                }
            }

            for dep in &engaged {
                let port = &self.ports[*dep];
                if port.kind.is_use_family() && !port.is_usable(comm).await? {
                    debug!(
                        "{}: {} waits for {}",
                        self.id, self.places[place].name, port.name
                    );
                    continue 'docks;
                }
            }

            for d in &set {
                self.active_input_docks.remove(d);
            }
            self.active_places.insert(place);
            self.visited_places.remove(&place);
            for (g, operation) in operations {
                self.groups[g].apply(operation);
            }
            for dep in engaged {
                self.ports[dep].start_using(comm).await?;
            }
            debug!("{}: entered {}", self.id, self.places[place].name);
            progressed = true;
        }
        Ok(progressed)
    }

    async fn places_to_output_docks(&mut self, comm: &CommunicationClient) -> Result<bool> {
        let Some(behavior) = self.behavior.clone() else {
            return Ok(false);
        };
        let snapshot: Vec<PlaceIdx> = self.active_places.iter().copied().collect();
        let mut progressed = false;

        'places: for place in snapshot {
            if self.visited_places.contains(&place) {
                continue;
            }
            let output_docks = self.places[place].output_docks(&behavior).to_vec();
            if output_docks.is_empty() {
                self.visited_places.insert(place);
                continue;
            }
            let produced: Vec<TransitionIdx> = output_docks
                .iter()
                .map(|d| self.docks[*d].transition)
                .collect();

            let operations =
                self.group_operations(place, |g| g.leaving_operation(place, &produced));
            let mut released: Vec<DependencyIdx> = self.places[place].dependencies().to_vec();
            for (g, operation) in &operations {
                if self.groups[*g].is_deactivating(*operation) {
                    released.extend_from_slice(self.groups[*g].dependencies());
                }
            }

            for dep in &released {
                let port = &self.ports[*dep];
                if port.kind.is_provide_family() && port.is_locked(comm).await? {
                    debug!(
                        "{}: {} held by users of {}",
                        self.id, self.places[place].name, port.name
                    );
                    continue 'places;
                }
            }

            self.active_places.remove(&place);
            self.active_output_docks.extend(output_docks);
            self.visited_places.insert(place);
            for (g, operation) in operations {
                self.groups[g].apply(operation);
            }
            for dep in released {
                self.ports[dep].stop_using(comm).await?;
            }
            debug!("{}: left {}", self.id, self.places[place].name);
            progressed = true;
        }
        Ok(progressed)
    }

    fn action_context(&self, transition: TransitionIdx, comm: &Arc<CommunicationClient>) -> ActionContext {
        ActionContext::new(
            self.id.clone(),
            self.transitions[transition].name.clone(),
            self.args.clone(),
            self.ports_by_name.clone(),
            comm.clone(),
            tokio::runtime::Handle::current(),
        )
    }

    async fn start_transitions(&mut self, comm: &Arc<CommunicationClient>, dry_run: bool) -> Result<bool> {
        let snapshot: Vec<DockIdx> = self.active_output_docks.iter().copied().collect();
        let mut progressed = false;

        'docks: for dock in snapshot {
            let t = self.docks[dock].transition;
            if !self.transitions[t].state.is_idle() {
                continue;
            }
            let dependencies = self.transitions[t].dependencies.clone();
            for dep in &dependencies {
                if !self.ports[*dep].is_usable(comm).await? {
                    continue 'docks;
                }
            }
            for dep in &dependencies {
                self.ports[*dep].start_using(comm).await?;
            }

            self.active_output_docks.remove(&dock);
            self.active_transitions.insert(t);
            let context = self.action_context(t, comm);
            self.transitions[t].start(context, dry_run).await;
            info!("{}: started {}", self.id, self.transitions[t].name);
            progressed = true;
        }
        Ok(progressed)
    }

    async fn end_transitions(
        &mut self,
        comm: &Arc<CommunicationClient>,
        dry_run: bool,
        policy: FailurePolicy,
    ) -> Result<bool> {
        let snapshot: Vec<TransitionIdx> = self.active_transitions.iter().copied().collect();
        let mut progressed = false;

        for t in snapshot {
            if self.transitions[t].state.is_idle() {
                // interrupted by a checkpoint while running: run it again
                warn!("{}: restarting {}", self.id, self.transitions[t].name);
                let context = self.action_context(t, comm);
                self.transitions[t].start(context, dry_run).await;
                progressed = true;
                continue;
            }
            let Some(outcome) = self.transitions[t].poll() else {
                continue;
            };
            if let Err(message) = outcome {
                let name = self.transitions[t].name.clone();
                warn!("{}: action of {} failed: {}", self.id, name, message);
                self.error_reports
                    .push(ErrorReport::new(self.id.clone(), name, message.clone()));
                if policy == FailurePolicy::Hold {
                    self.transitions[t].state = TransitionState::Failed(message);
                    progressed = true;
                    continue;
                }
            }

            let dependencies = self.transitions[t].dependencies.clone();
            for dep in dependencies {
                self.ports[dep].stop_using(comm).await?;
            }
            self.active_input_docks.insert(self.transitions[t].input_dock);
            self.active_transitions.remove(&t);
            self.transitions[t].state = TransitionState::Idle;
            if t != self.init_transition {
                info!("{}: finished {}", self.id, self.transitions[t].name);
            }
            progressed = true;
        }
        Ok(progressed)
    }

    fn dock_name(&self, dock: DockIdx) -> String {
        let d = &self.docks[dock];
        let direction = match d.direction {
            DockDirection::Input => "in",
            DockDirection::Output => "out",
        };
        format!("{}:{}", self.transitions[d.transition].name, direction)
    }

    pub fn snapshot(&self) -> ComponentSnapshot {
        ComponentSnapshot {
            name: self.id.to_string(),
            behavior: self.behavior.clone(),
            queued_behaviors: self.queued_behaviors.iter().cloned().collect(),
            active_places: self
                .active_places
                .iter()
                .map(|p| self.places[*p].name.to_string())
                .collect(),
            active_transitions: self
                .active_transitions
                .iter()
                .map(|t| self.transitions[*t].name.to_string())
                .collect(),
            active_input_docks: self
                .active_input_docks
                .iter()
                .map(|d| self.dock_name(*d))
                .collect(),
            active_output_docks: self
                .active_output_docks
                .iter()
                .map(|d| self.dock_name(*d))
                .collect(),
            idle: self.is_idle_configuration(),
        }
    }

    pub fn checkpoint(&self) -> ComponentCheckpoint {
        let dock = |d: &DockIdx| DockCheckpoint {
            transition: self.transitions[self.docks[*d].transition].name.to_string(),
            direction: self.docks[*d].direction,
        };
        ComponentCheckpoint {
            name: self.id.to_string(),
            type_tag: self.type_tag.clone(),
            args: self.args.clone(),
            behavior: self.behavior.clone(),
            queued_behaviors: self.queued_behaviors.iter().cloned().collect(),
            active_places: self
                .active_places
                .iter()
                .map(|p| self.places[*p].name.to_string())
                .collect(),
            visited_places: self
                .visited_places
                .iter()
                .map(|p| self.places[*p].name.to_string())
                .collect(),
            active_transitions: self
                .active_transitions
                .iter()
                .map(|t| {
                    let transition = &self.transitions[*t];
                    TransitionCheckpoint {
                        name: transition.name.to_string(),
                        outcome: match &transition.state {
                            TransitionState::Finished(Ok(())) => Some(Ok(())),
                            TransitionState::Finished(Err(e)) | TransitionState::Failed(e) => {
                                Some(Err(e.clone()))
                            }
                            TransitionState::Idle | TransitionState::Running(_) => None,
                        },
                    }
                })
                .collect(),
            active_input_docks: self.active_input_docks.iter().map(dock).collect(),
            active_output_docks: self.active_output_docks.iter().map(dock).collect(),
            groups: self
                .groups
                .iter()
                .map(|g| (g.name.clone(), g.nb_tokens()))
                .collect::<BTreeMap<_, _>>(),
            ports: self
                .ports
                .iter()
                .map(|p| (p.name.to_string(), p.state()))
                .collect::<BTreeMap<_, _>>(),
            error_reports: self.error_reports.clone(),
        }
    }

    fn lookup_place(&self, name: &str) -> Result<PlaceIdx> {
        self.place_index
            .get(&PlaceId::from(name))
            .copied()
            .ok_or_else(|| ConcertoError::UnknownPlace(name.to_string()))
    }

    fn lookup_transition(&self, name: &str) -> Result<TransitionIdx> {
        self.transition_index
            .get(&TransitionId::from(name))
            .copied()
            .ok_or_else(|| ConcertoError::UnknownTransition(name.to_string()))
    }

    fn lookup_dock(&self, dock: &DockCheckpoint) -> Result<DockIdx> {
        let t = self.lookup_transition(&dock.transition)?;
        let transition = &self.transitions[t];
        match dock.direction {
            DockDirection::Input => Ok(transition.input_dock),
            DockDirection::Output => transition
                .output_dock
                .ok_or_else(|| ConcertoError::UnknownTransition(dock.transition.clone())),
        }
    }

    /// Loads a checkpointed run-time configuration; must precede
    /// [`Component::initialize`]
    pub fn restore(&mut self, checkpoint: &ComponentCheckpoint) -> Result<()> {
        if self.env.is_some() {
            return Err(ConcertoError::AlreadyInitialized(self.id.to_string()));
        }
        for behavior in &checkpoint.queued_behaviors {
            if !self.component_type.has_behavior(behavior) {
                return Err(ConcertoError::UnknownBehavior {
                    component: self.id.to_string(),
                    behavior: behavior.clone(),
                });
            }
        }

        self.active_places = checkpoint
            .active_places
            .iter()
            .map(|p| self.lookup_place(p))
            .collect::<Result<_>>()?;
        self.visited_places = checkpoint
            .visited_places
            .iter()
            .map(|p| self.lookup_place(p))
            .collect::<Result<_>>()?;
        self.active_input_docks = checkpoint
            .active_input_docks
            .iter()
            .map(|d| self.lookup_dock(d))
            .collect::<Result<_>>()?;
        self.active_output_docks = checkpoint
            .active_output_docks
            .iter()
            .map(|d| self.lookup_dock(d))
            .collect::<Result<_>>()?;

        self.active_transitions.clear();
        for saved in &checkpoint.active_transitions {
            let t = self.lookup_transition(&saved.name)?;
            self.transitions[t].state = match &saved.outcome {
                Some(Ok(())) => TransitionState::Finished(Ok(())),
                Some(Err(message)) => TransitionState::Failed(message.clone()),
                None => TransitionState::Idle,
            };
            self.active_transitions.insert(t);
        }

        for (name, nb_tokens) in &checkpoint.groups {
            let group = self
                .groups
                .iter_mut()
                .find(|g| &g.name == name)
                .ok_or_else(|| ConcertoError::UnknownGroup(name.clone()))?;
            group.set_nb_tokens(*nb_tokens);
        }
        for (name, state) in &checkpoint.ports {
            self.port(&DependencyId::from(name.as_str()))?
                .restore(state.clone());
        }

        self.behavior = checkpoint.behavior.clone();
        self.queued_behaviors = checkpoint.queued_behaviors.iter().cloned().collect();
        self.error_reports = checkpoint.error_reports.clone();
        self.restored = true;
        Ok(())
    }
}

impl std::fmt::Debug for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Component")
            .field("id", &self.id)
            .field("type_tag", &self.type_tag)
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DependencyType;
    use std::time::Duration;

    fn env() -> ComponentEnv {
        ComponentEnv::new(Arc::new(CommunicationClient::in_memory()))
    }

    fn build(component_type: ComponentType, name: &str) -> Component {
        Component::new(ComponentId::from(name), Arc::new(component_type), Value::Null).unwrap()
    }

    async fn run_until_idle(component: &mut Component) {
        for _ in 0..500 {
            if component.semantics().await.unwrap() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("{} never became idle: {:?}", component.id(), component.snapshot());
    }

    fn sequential() -> ComponentType {
        ComponentType::builder("sequential")
            .places(["initial", "installed", "running"])
            .initial_place("initial")
            .action("noop", |_, _| Ok(()))
            .transition_with_action("install", "initial", "installed", "deploy", "noop")
            .transition_with_action("run", "installed", "running", "deploy", "noop")
            .transition("stop", "running", "installed", "stop")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_initialize_places_token_on_initial_place() {
        let mut component = build(sequential(), "svc");
        assert!(matches!(
            component.semantics().await,
            Err(ConcertoError::NotInitialized(_))
        ));

        component.initialize(env()).unwrap();
        assert!(matches!(
            component.initialize(env()),
            Err(ConcertoError::AlreadyInitialized(_))
        ));

        run_until_idle(&mut component).await;
        let snapshot = component.snapshot();
        assert_eq!(snapshot.active_places, vec!["initial"]);
        assert_eq!(snapshot.behavior, None);
        assert!(snapshot.idle);
    }

    #[tokio::test]
    async fn test_behaviors_run_in_queue_order() {
        let mut component = build(sequential(), "svc");
        component.initialize(env()).unwrap();
        component.queue_behavior("deploy").unwrap();
        component.queue_behavior("stop").unwrap();
        assert!(matches!(
            component.queue_behavior("update"),
            Err(ConcertoError::UnknownBehavior { .. })
        ));

        run_until_idle(&mut component).await;
        assert_eq!(component.snapshot().active_places, vec!["installed"]);
        assert_eq!(component.queued_behaviors().count(), 0);
    }

    #[tokio::test]
    async fn test_idle_component_is_a_fixed_point() {
        let mut component = build(sequential(), "svc");
        component.initialize(env()).unwrap();
        component.queue_behavior("deploy").unwrap();
        run_until_idle(&mut component).await;

        let before = component.snapshot();
        for _ in 0..5 {
            assert!(component.semantics().await.unwrap());
            assert!(!component.progressed());
        }
        assert_eq!(component.snapshot(), before);
    }

    #[tokio::test]
    async fn test_join_waits_for_whole_idset() {
        let component_type = ComponentType::builder("join")
            .places(["initial", "left", "right", "done"])
            .initial_place("initial")
            .transition("go_left", "initial", "left", "deploy")
            .transition("go_right", "initial", "right", "deploy")
            .transition("join_left", "left", "done", "deploy")
            .transition_def(
                crate::models::TransitionDefinition::new("join_right", "right", "done", "deploy")
                    .with_idset(0),
            )
            .build()
            .unwrap();
        let mut component = build(component_type, "j");
        component.initialize(env()).unwrap();
        component.queue_behavior("deploy").unwrap();
        run_until_idle(&mut component).await;

        assert_eq!(component.snapshot().active_places, vec!["done"]);
    }

    #[tokio::test]
    async fn test_failed_action_is_held_and_reported() {
        let component_type = ComponentType::builder("fragile")
            .places(["initial", "running"])
            .initial_place("initial")
            .action("fail", |_, _| Err(anyhow::anyhow!("exit status 1")))
            .transition_with_action("run", "initial", "running", "deploy", "fail")
            .build()
            .unwrap();

        let mut held = build(component_type.clone(), "held");
        held.initialize(env()).unwrap();
        held.queue_behavior("deploy").unwrap();
        for _ in 0..50 {
            held.semantics().await.unwrap();
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert_eq!(held.error_reports().len(), 1);
        assert_eq!(held.error_reports()[0].transition.as_str(), "run");
        assert_eq!(held.snapshot().active_transitions, vec!["run"]);
        assert!(!held.semantics().await.unwrap());

        let mut proceeding = build(component_type, "proceeding");
        proceeding
            .initialize(ComponentEnv {
                failure_policy: FailurePolicy::Proceed,
                ..env()
            })
            .unwrap();
        proceeding.queue_behavior("deploy").unwrap();
        run_until_idle(&mut proceeding).await;
        assert_eq!(proceeding.error_reports().len(), 1);
        assert_eq!(proceeding.snapshot().active_places, vec!["running"]);
    }

    #[tokio::test]
    async fn test_running_transition_is_not_started_again() {
        use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

        let starts = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(AtomicBool::new(false));
        let (counter, gate) = (starts.clone(), release.clone());
        let component_type = ComponentType::builder("slow")
            .places(["initial", "running"])
            .initial_place("initial")
            .action("slow", move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                while !gate.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Ok(())
            })
            .transition_with_action("run", "initial", "running", "deploy", "slow")
            .build()
            .unwrap();
        let mut component = build(component_type, "slow");
        component.initialize(env()).unwrap();
        component.queue_behavior("deploy").unwrap();

        for _ in 0..20 {
            assert!(!component.semantics().await.unwrap());
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert_eq!(component.snapshot().active_transitions, vec!["run"]);
        assert!(component.has_running_actions());

        release.store(true, Ordering::SeqCst);
        run_until_idle(&mut component).await;
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert_eq!(component.snapshot().active_places, vec!["running"]);
    }

    #[tokio::test]
    async fn test_unconnected_use_blocks_transition() {
        let component_type = ComponentType::builder("user")
            .places(["initial", "running"])
            .initial_place("initial")
            .transition("run", "initial", "running", "run")
            .dependency("service", DependencyType::Use, [Binding::transition("run")])
            .build()
            .unwrap();
        let mut component = build(component_type, "u");
        component.initialize(env()).unwrap();
        component.queue_behavior("run").unwrap();

        for _ in 0..10 {
            assert!(!component.semantics().await.unwrap());
        }
        let snapshot = component.snapshot();
        assert_eq!(snapshot.active_output_docks, vec!["run:out"]);
        assert!(snapshot.active_transitions.is_empty());
    }

    #[tokio::test]
    async fn test_provide_bound_to_place_counts_token() {
        let component_type = ComponentType::builder("provider")
            .places(["initial", "running"])
            .initial_place("initial")
            .transition("run", "initial", "running", "run")
            .transition("stop", "running", "initial", "stop")
            .dependency("service", DependencyType::Provide, [Binding::place("running")])
            .build()
            .unwrap();
        let mut component = build(component_type, "p");
        component.initialize(env()).unwrap();
        component.queue_behavior("run").unwrap();
        run_until_idle(&mut component).await;
        let service = DependencyId::from("service");
        assert_eq!(component.port(&service).unwrap().nb_users(), 1);

        component.queue_behavior("stop").unwrap();
        run_until_idle(&mut component).await;
        assert_eq!(component.port(&service).unwrap().nb_users(), 0);
    }

    #[tokio::test]
    async fn test_checkpoint_restores_configuration() {
        let component_type = Arc::new(
            ComponentType::builder("provider")
                .places(["initial", "running"])
                .initial_place("initial")
                .transition("run", "initial", "running", "run")
                .transition("stop", "running", "initial", "stop")
                .dependency("service", DependencyType::Provide, [Binding::place("running")])
                .group("up", ["running"])
                .build()
                .unwrap(),
        );
        let mut component =
            Component::new(ComponentId::from("p"), component_type.clone(), Value::Null).unwrap();
        component.initialize(env()).unwrap();
        component.queue_behavior("run").unwrap();
        run_until_idle(&mut component).await;
        component.queue_behavior("stop").unwrap();
        component.queue_behavior("run").unwrap();
        // stop is selected, run stays queued
        let saved = component.checkpoint();

        let mut restored =
            Component::new(ComponentId::from("p"), component_type, Value::Null).unwrap();
        restored.restore(&saved).unwrap();
        restored.initialize(env()).unwrap();
        assert_eq!(restored.checkpoint(), saved);
        assert_eq!(restored.snapshot(), component.snapshot());

        run_until_idle(&mut restored).await;
        assert_eq!(restored.snapshot().active_places, vec!["running"]);
        assert_eq!(
            restored.port(&DependencyId::from("service")).unwrap().nb_users(),
            1
        );
    }
}
