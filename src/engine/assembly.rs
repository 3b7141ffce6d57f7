// Assembly - the reconfiguration instruction loop
// Owns components and connections, talks to peer assemblies through the bus

//! # Assemblies
//!
//! An [`Assembly`] is one coordinator: it owns a set of [`Component`]s, the
//! [`Connection`]s between their ports and a queue of [`Instruction`]s.
//!
//! Every structural call (`add_component`, `connect`, `wait_all`, ...)
//! appends an instruction and then drives the queue. Driving means applying
//! the head instruction; while it is not finished, one semantics pass runs
//! over every active component, the sleep policy is checked and the loop
//! sleeps for `poll_interval` before trying again. The API looks
//! synchronous but is a polling loop underneath.
//!
//! ## Distributed handshake
//!
//! A connection to a component owned by another assembly is only complete
//! once both sides have published a `CONN` marker for it. Each side puts its
//! own marker on every attempt and waits a little for the symmetric one;
//! re-putting a marker is harmless, so the loop simply retries. Disconnects
//! use `DECONN` markers and first wait until the connection is no longer
//! locked by its consumer.
//!
//! ## Barrier
//!
//! `wait_all` finishes once every local component is idle and every remote
//! assembly this one is connected to reports its components `INACTIVE`.
//! Unless waiting for refusing provides, the peer must also have reached
//! at least as many barriers as this assembly (`barrier/{assembly}`), so
//! neither side acts on the other's idleness before it has seen the
//! barrier itself.
//!
//! ## Sleep and resume
//!
//! With the sleep policy enabled, a loop that makes no progress for long
//! enough saves a checkpoint and returns [`ConcertoError::Sleeping`]. The
//! next [`Assembly::open`] with the same name resumes from that file and
//! skips the instructions the checkpoint already counts as done.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::checkpoint::{AssemblyCheckpoint, CheckpointStore, ConnectionCheckpoint};
use super::communication::{CommunicationClient, ComponentStatus, MarkerKind};
use super::component::{Component, ComponentEnv};
use super::config::AssemblyConfig;
use super::connection::{Connection, ConnectionId, Endpoint, RemoteDependency};
use super::dependency::Port;
use super::registry::ComponentRegistry;
use crate::models::{ComponentId, DebugSnapshot, DependencyId, ErrorReport, Instruction};
use crate::{ConcertoError, Result};

/// Progress of the instruction at the head of the queue
enum Stage {
    Requested,
    /// The local half of a connect or disconnect is done; `Connection` is
    /// kept for the marker exchange
    LocalDone(Arc<Connection>),
    /// `wait_all` has published this assembly's barrier count
    BarrierPublished,
}

struct PendingInstruction {
    instruction: Instruction,
    stage: Stage,
}

impl PendingInstruction {
    fn new(instruction: Instruction) -> Self {
        Self {
            instruction,
            stage: Stage::Requested,
        }
    }
}

pub struct Assembly {
    config: AssemblyConfig,
    registry: Arc<ComponentRegistry>,
    comm: Arc<CommunicationClient>,
    store: CheckpointStore,
    components: BTreeMap<ComponentId, Component>,
    connections: BTreeMap<ConnectionId, Arc<Connection>>,
    /// Remote component -> id of the assembly owning it
    remote_components: BTreeMap<ComponentId, String>,
    active_components: BTreeSet<ComponentId>,
    queue: VecDeque<PendingInstruction>,
    instructions_done: u64,
    instructions_to_skip: u64,
    barriers_reached: u64,
    // the last published barrier still waits for a `wait_all` to complete
    barrier_open: bool,
    // reports of deleted components
    retired_reports: Vec<ErrorReport>,
    opened_at: Instant,
    last_progress: Instant,
}

impl Assembly {
    /// Opens the assembly named in `config`, resuming from its checkpoint
    /// file when there is one
    pub fn open(
        config: AssemblyConfig,
        registry: Arc<ComponentRegistry>,
        comm: Arc<CommunicationClient>,
    ) -> Result<Self> {
        let store = CheckpointStore::from_config(&config);
        let checkpoint = store.load(&config.name)?;
        let now = Instant::now();
        let mut assembly = Self {
            config,
            registry,
            comm,
            store,
            components: BTreeMap::new(),
            connections: BTreeMap::new(),
            remote_components: BTreeMap::new(),
            active_components: BTreeSet::new(),
            queue: VecDeque::new(),
            instructions_done: 0,
            instructions_to_skip: 0,
            barriers_reached: 0,
            barrier_open: false,
            retired_reports: Vec::new(),
            opened_at: now,
            last_progress: now,
        };
        match checkpoint {
            Some(checkpoint) => assembly.restore(&checkpoint)?,
            None => info!("Assembly {}: cold start", assembly.config.name),
        }
        Ok(assembly)
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &AssemblyConfig {
        &self.config
    }

    pub fn communication(&self) -> &Arc<CommunicationClient> {
        &self.comm
    }

    pub fn component(&self, name: &str) -> Option<&Component> {
        self.components.get(&ComponentId::from(name))
    }

    pub fn components(&self) -> impl Iterator<Item = &Component> {
        self.components.values()
    }

    pub fn connection(&self, id: &ConnectionId) -> Option<&Arc<Connection>> {
        self.connections.get(id)
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.active_components.contains(&ComponentId::from(name))
    }

    pub fn instructions_done(&self) -> u64 {
        self.instructions_done
    }

    fn component_env(&self) -> ComponentEnv {
        ComponentEnv {
            comm: self.comm.clone(),
            dry_run: self.config.dry_run,
            failure_policy: self.config.failure_policy,
        }
    }

    /// Records that `component` lives in the assembly `assembly`
    pub fn declare_remote<C: Into<ComponentId>, A: Into<String>>(
        &mut self,
        component: C,
        assembly: A,
    ) -> Result<()> {
        let component = component.into();
        if self.components.contains_key(&component) {
            return Err(ConcertoError::DuplicateName {
                kind: "component",
                name: component.to_string(),
            });
        }
        let assembly = assembly.into();
        debug!("{}: {} is owned by {}", self.config.name, component, assembly);
        self.remote_components.insert(component, assembly);
        Ok(())
    }

    // ---- instruction API ----------------------------------------------

    pub async fn add_component<N: Into<ComponentId>, T: Into<String>>(
        &mut self,
        name: N,
        component_type: T,
        args: Value,
    ) -> Result<()> {
        self.execute(Instruction::add(name, component_type, args)).await
    }

    pub async fn del_component<N: Into<ComponentId>>(&mut self, name: N) -> Result<()> {
        self.execute(Instruction::delete(name)).await
    }

    pub async fn connect<C1, D1, C2, D2>(&mut self, c1: C1, d1: D1, c2: C2, d2: D2) -> Result<()>
    where
        C1: Into<ComponentId>,
        D1: Into<DependencyId>,
        C2: Into<ComponentId>,
        D2: Into<DependencyId>,
    {
        self.execute(Instruction::connect(c1, d1, c2, d2)).await
    }

    pub async fn disconnect<C1, D1, C2, D2>(&mut self, c1: C1, d1: D1, c2: C2, d2: D2) -> Result<()>
    where
        C1: Into<ComponentId>,
        D1: Into<DependencyId>,
        C2: Into<ComponentId>,
        D2: Into<DependencyId>,
    {
        self.execute(Instruction::disconnect(c1, d1, c2, d2)).await
    }

    pub async fn push_behavior<N: Into<ComponentId>, B: Into<String>>(
        &mut self,
        name: N,
        behavior: B,
    ) -> Result<()> {
        self.execute(Instruction::push_behavior(name, behavior)).await
    }

    pub async fn wait<N: Into<ComponentId>>(&mut self, name: N) -> Result<()> {
        self.execute(Instruction::wait(name)).await
    }

    pub async fn wait_all(&mut self) -> Result<()> {
        self.execute(Instruction::wait_all()).await
    }

    pub async fn wait_all_with(&mut self, wait_for_refusing_provide: bool) -> Result<()> {
        self.execute(Instruction::WaitAll {
            wait_for_refusing_provide,
        })
        .await
    }

    /// Barrier with a deadline; returns whether it was reached and the
    /// state of the assembly at that point
    pub async fn wait_all_with_timeout(&mut self, timeout: Duration) -> Result<(bool, DebugSnapshot)> {
        let finished = self
            .execute_with_timeout(Instruction::wait_all(), timeout)
            .await?;
        Ok((finished, self.debug_snapshot()))
    }

    /// Sets the refusing flag of a local provide port
    pub async fn set_refusing(&mut self, component: &str, dependency: &str, refusing: bool) -> Result<()> {
        self.components
            .get(&ComponentId::from(component))
            .ok_or_else(|| ConcertoError::UnknownComponent(component.to_string()))?
            .set_refusing(dependency, refusing)
            .await
    }

    /// Appends an instruction without driving the queue
    ///
    /// After a resume, instructions the checkpoint counts as done are
    /// dropped here instead of being queued.
    pub fn enqueue(&mut self, instruction: Instruction) {
        if self.instructions_to_skip > 0 {
            self.instructions_to_skip -= 1;
            info!(
                "{}: {} was done before the restart, skipping",
                self.config.name, instruction
            );
            return;
        }
        debug!("{}: queued {}", self.config.name, instruction);
        self.queue.push_back(PendingInstruction::new(instruction));
    }

    /// Queues and runs a whole reconfiguration program
    pub async fn run_program<I>(&mut self, program: I) -> Result<()>
    where
        I: IntoIterator<Item = Instruction>,
    {
        for instruction in program {
            self.enqueue(instruction);
        }
        self.run(None).await.map(|_| ())
    }

    pub async fn execute(&mut self, instruction: Instruction) -> Result<()> {
        self.enqueue(instruction);
        self.run(None).await.map(|_| ())
    }

    /// Runs an instruction for at most `timeout`
    ///
    /// An instruction that does not finish in time is dropped from the
    /// queue; whatever it already did locally stays done.
    pub async fn execute_with_timeout(&mut self, instruction: Instruction, timeout: Duration) -> Result<bool> {
        self.enqueue(instruction);
        let finished = self.run(Some(Instant::now() + timeout)).await?;
        if !finished {
            if let Some(pending) = self.queue.pop_front() {
                warn!(
                    "{}: {} did not finish within {:?}",
                    self.config.name, pending.instruction, timeout
                );
            }
        }
        Ok(finished)
    }

    // ---- the loop -------------------------------------------------------

    /// Drives the queue; an error discards the instructions queued behind
    /// the failing one
    async fn run(&mut self, deadline: Option<Instant>) -> Result<bool> {
        let outcome = self.drive(deadline).await;
        if outcome.is_err() && !self.queue.is_empty() {
            warn!(
                "{}: dropping {} queued instruction(s) after an error",
                self.config.name,
                self.queue.len()
            );
            self.queue.clear();
        }
        outcome
    }

    async fn drive(&mut self, deadline: Option<Instant>) -> Result<bool> {
        while let Some(mut pending) = self.queue.pop_front() {
            info!("{}: {}", self.config.name, pending.instruction);
            loop {
                if self.apply(&mut pending).await? {
                    break;
                }
                self.step().await?;
                if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                    self.queue.push_front(pending);
                    return Ok(false);
                }
                tokio::time::sleep(self.config.poll_interval()).await;
            }
            self.instructions_done += 1;
            info!("{}: {} done", self.config.name, pending.instruction);
        }
        Ok(true)
    }

    /// One semantics pass over every active component
    async fn step(&mut self) -> Result<()> {
        let active: Vec<ComponentId> = self.active_components.iter().cloned().collect();
        let mut progressed = false;

        for id in active {
            let Some(component) = self.components.get_mut(&id) else {
                self.active_components.remove(&id);
                continue;
            };
            let idle = component.semantics().await?;
            progressed |= component.progressed();
            if idle {
                debug!("{}: {} is idle", self.config.name, id);
                self.active_components.remove(&id);
                self.comm
                    .put_status(&self.config.name, &id, ComponentStatus::Inactive)
                    .await?;
            }
        }

        let now = Instant::now();
        if progressed {
            self.last_progress = now;
        }
        self.check_sleep(progressed, now)
    }

    fn check_sleep(&self, progressed: bool, now: Instant) -> Result<()> {
        let policy = &self.config.sleep_policy;
        if !policy.enabled || self.components.values().any(Component::has_running_actions) {
            return Ok(());
        }
        let stalled =
            !progressed && now.duration_since(self.last_progress) >= policy.waiting_rate();
        let quiet = now.duration_since(self.opened_at) >= policy.initial_timeout()
            && !self.components.values().any(Component::has_active_transitions);
        if !(stalled || quiet) {
            return Ok(());
        }
        let code = policy.exit_code;
        info!(
            "{}: nothing to do for now, checkpointing and going to sleep",
            self.config.name
        );
        self.save_checkpoint()?;
        Err(ConcertoError::Sleeping { code })
    }

    async fn apply(&mut self, pending: &mut PendingInstruction) -> Result<bool> {
        match pending.instruction.clone() {
            Instruction::Add {
                name,
                component_type,
                args,
            } => self.apply_add(name, &component_type, args).await,
            Instruction::Delete { name } => self.apply_delete(&name).await,
            Instruction::Connect {
                component1,
                dependency1,
                component2,
                dependency2,
            } => {
                self.apply_connect(&mut pending.stage, &component1, &dependency1, &component2, &dependency2)
                    .await
            }
            Instruction::Disconnect {
                component1,
                dependency1,
                component2,
                dependency2,
            } => {
                self.apply_disconnect(&mut pending.stage, &component1, &dependency1, &component2, &dependency2)
                    .await
            }
            Instruction::PushBehavior { name, behavior } => {
                self.apply_push_behavior(&name, &behavior).await
            }
            Instruction::Wait { name } => self.apply_wait(&name).await,
            Instruction::WaitAll {
                wait_for_refusing_provide,
            } => {
                self.apply_wait_all(&mut pending.stage, wait_for_refusing_provide)
                    .await
            }
        }
    }

    async fn apply_add(&mut self, name: ComponentId, component_type: &str, args: Value) -> Result<bool> {
        if self.components.contains_key(&name) || self.remote_components.contains_key(&name) {
            return Err(ConcertoError::DuplicateName {
                kind: "component",
                name: name.to_string(),
            });
        }
        let mut component = self.registry.instantiate(component_type, &name, &args)?;
        component.initialize(self.component_env())?;
        self.components.insert(name.clone(), component);
        self.active_components.insert(name.clone());
        self.comm
            .put_status(&self.config.name, &name, ComponentStatus::Active)
            .await?;
        Ok(true)
    }

    async fn apply_delete(&mut self, name: &ComponentId) -> Result<bool> {
        let component = self
            .components
            .get(name)
            .ok_or_else(|| ConcertoError::UnknownComponent(name.to_string()))?;
        if self.active_components.contains(name) {
            return Ok(false);
        }
        if !component.connections().is_empty() {
            return Err(ConcertoError::StillConnected(name.to_string()));
        }
        if let Some(component) = self.components.remove(name) {
            self.retired_reports
                .extend(component.error_reports().iter().cloned());
        }
        self.comm
            .put_status(&self.config.name, name, ComponentStatus::Inactive)
            .await?;
        Ok(true)
    }

    async fn apply_push_behavior(&mut self, name: &ComponentId, behavior: &str) -> Result<bool> {
        self.components
            .get_mut(name)
            .ok_or_else(|| ConcertoError::UnknownComponent(name.to_string()))?
            .queue_behavior(behavior)?;
        self.active_components.insert(name.clone());
        self.comm
            .put_status(&self.config.name, name, ComponentStatus::Active)
            .await?;
        Ok(true)
    }

    async fn apply_wait(&self, name: &ComponentId) -> Result<bool> {
        if self.components.contains_key(name) {
            return Ok(!self.active_components.contains(name));
        }
        match self.remote_components.get(name) {
            Some(assembly) => Ok(self.comm.get_status(assembly, name).await?
                == Some(ComponentStatus::Inactive)),
            None => Err(ConcertoError::UnknownComponent(name.to_string())),
        }
    }

    async fn apply_wait_all(&mut self, stage: &mut Stage, wait_for_refusing_provide: bool) -> Result<bool> {
        if !self.active_components.is_empty() {
            return Ok(false);
        }
        if !matches!(stage, Stage::BarrierPublished) {
            // a retried barrier keeps the number its first attempt published
            if !self.barrier_open {
                self.barriers_reached += 1;
                self.barrier_open = true;
            }
            self.comm
                .put_barrier(&self.config.name, self.barriers_reached)
                .await?;
            *stage = Stage::BarrierPublished;
        }

        for (assembly, components) in self.remote_dependencies() {
            for component in &components {
                if self.comm.get_status(&assembly, component).await? != Some(ComponentStatus::Inactive) {
                    debug!("{}: waiting for {} of {}", self.config.name, component, assembly);
                    return Ok(false);
                }
            }
            if !wait_for_refusing_provide
                && self.comm.get_barrier(&assembly).await? < self.barriers_reached
            {
                debug!("{}: waiting for the barrier of {}", self.config.name, assembly);
                return Ok(false);
            }
        }
        self.barrier_open = false;
        Ok(true)
    }

    /// Remote assemblies this one is connected to, with the components
    /// declared for each of them
    fn remote_dependencies(&self) -> BTreeMap<String, Vec<ComponentId>> {
        let assemblies: BTreeSet<&String> = self
            .connections
            .values()
            .filter_map(|c| c.remote_side())
            .filter_map(|remote| self.remote_components.get(&remote.component))
            .collect();
        let mut dependencies: BTreeMap<String, Vec<ComponentId>> = BTreeMap::new();
        for (component, assembly) in &self.remote_components {
            if assemblies.contains(assembly) {
                dependencies
                    .entry(assembly.clone())
                    .or_default()
                    .push(component.clone());
            }
        }
        dependencies
    }

    // ---- connections ----------------------------------------------------

    fn endpoint(&self, component: &ComponentId, dependency: &DependencyId) -> Result<Endpoint> {
        if let Some(local) = self.components.get(component) {
            return Ok(local.port(dependency)?.endpoint());
        }
        if self.remote_components.contains_key(component) {
            return Ok(Endpoint::Remote(RemoteDependency::new(
                component.clone(),
                dependency.clone(),
            )));
        }
        Err(ConcertoError::UnknownComponent(component.to_string()))
    }

    fn local_port(&self, endpoint: &Endpoint) -> Result<Option<&Port>> {
        match endpoint {
            Endpoint::Local(local) => match self.components.get(&local.component) {
                Some(component) => Ok(Some(component.port(&local.dependency)?)),
                None => Ok(None),
            },
            Endpoint::Remote(_) => Ok(None),
        }
    }

    fn attach(&self, connection: &Arc<Connection>) -> Result<()> {
        for endpoint in [connection.use_side(), connection.provide_side()] {
            if let Some(port) = self.local_port(endpoint)? {
                port.connect(connection.clone());
            }
        }
        Ok(())
    }

    fn detach(&self, connection: &Connection) -> Result<()> {
        for endpoint in [connection.use_side(), connection.provide_side()] {
            if let Some(port) = self.local_port(endpoint)? {
                port.disconnect(connection.id());
            }
        }
        Ok(())
    }

    async fn apply_connect(
        &mut self,
        stage: &mut Stage,
        c1: &ComponentId,
        d1: &DependencyId,
        c2: &ComponentId,
        d2: &DependencyId,
    ) -> Result<bool> {
        if let Stage::Requested = stage {
            let candidate = Connection::new(self.endpoint(c1, d1)?, self.endpoint(c2, d2)?)?;
            let connection = match self.connections.get(candidate.id()).cloned() {
                Some(existing) => existing,
                None => {
                    let connection = Arc::new(candidate);
                    self.attach(&connection)?;
                    if connection.has_remote() {
                        for endpoint in [connection.use_side(), connection.provide_side()] {
                            if let Some(port) = self.local_port(endpoint)? {
                                port.publish(&self.comm).await?;
                            }
                        }
                    }
                    self.connections
                        .insert(connection.id().clone(), connection.clone());
                    info!("{}: connected {}", self.config.name, connection.id());
                    connection
                }
            };
            *stage = Stage::LocalDone(connection);
        }
        match stage {
            Stage::LocalDone(connection) => {
                let connection = connection.clone();
                self.handshake(&connection, MarkerKind::Conn).await
            }
            _ => Ok(false),
        }
    }

    async fn apply_disconnect(
        &mut self,
        stage: &mut Stage,
        c1: &ComponentId,
        d1: &DependencyId,
        c2: &ComponentId,
        d2: &DependencyId,
    ) -> Result<bool> {
        if let Stage::Requested = stage {
            let candidate = Connection::new(self.endpoint(c1, d1)?, self.endpoint(c2, d2)?)?;
            let connection = match self.connections.get(candidate.id()).cloned() {
                Some(existing) => {
                    if !existing.can_remove(&self.comm).await? {
                        debug!(
                            "{}: {} is still in use, deferring",
                            self.config.name,
                            existing.id()
                        );
                        return Ok(false);
                    }
                    self.detach(&existing)?;
                    self.connections.remove(existing.id());
                    info!("{}: disconnected {}", self.config.name, existing.id());
                    existing
                }
                None if !candidate.has_remote() => {
                    return Err(ConcertoError::NotConnected(candidate.id().to_string()));
                }
                None => Arc::new(candidate),
            };
            *stage = Stage::LocalDone(connection);
        }
        match stage {
            Stage::LocalDone(connection) => {
                let connection = connection.clone();
                self.handshake(&connection, MarkerKind::Deconn).await
            }
            _ => Ok(false),
        }
    }

    /// Exchanges `kind` markers with the owner of the remote side; local
    /// connections agree at once
    async fn handshake(&self, connection: &Connection, kind: MarkerKind) -> Result<bool> {
        let Some(remote) = connection.remote_side() else {
            return Ok(true);
        };
        let local = if connection.use_side().is_remote() {
            connection.provide_side()
        } else {
            connection.use_side()
        };
        let dep_provide = connection.provide_side().dependency();
        let dep_use = connection.use_side().dependency();

        self.comm
            .put_marker(kind, local.component(), &remote.component, dep_provide, dep_use)
            .await?;
        let agreed = self
            .comm
            .await_marker(
                kind,
                &remote.component,
                local.component(),
                dep_provide,
                dep_use,
                self.config.handshake_interval(),
            )
            .await?;
        if !agreed {
            debug!(
                "{}: no {} from {} yet",
                self.config.name,
                kind.as_str(),
                remote.component
            );
            return Ok(false);
        }

        let stale = match kind {
            MarkerKind::Conn => MarkerKind::Deconn,
            MarkerKind::Deconn => MarkerKind::Conn,
        };
        self.comm
            .delete_marker(stale, local.component(), &remote.component, dep_provide, dep_use)
            .await?;
        Ok(true)
    }

    // ---- reports, snapshots, checkpoints ---------------------------------

    pub fn error_reports(&self) -> Vec<ErrorReport> {
        let mut reports = self.retired_reports.clone();
        for component in self.components.values() {
            reports.extend(component.error_reports().iter().cloned());
        }
        reports.sort_by_key(|r| r.timestamp);
        reports
    }

    pub fn debug_snapshot(&self) -> DebugSnapshot {
        DebugSnapshot {
            assembly: self.config.name.clone(),
            components: self.components.values().map(Component::snapshot).collect(),
            active_components: self
                .active_components
                .iter()
                .map(ToString::to_string)
                .collect(),
            connections: self.connections.keys().map(ToString::to_string).collect(),
            pending_instructions: self
                .queue
                .iter()
                .map(|p| p.instruction.to_string())
                .collect(),
            error_reports: self.error_reports(),
        }
    }

    pub fn checkpoint(&self) -> AssemblyCheckpoint {
        AssemblyCheckpoint {
            name: self.config.name.clone(),
            saved_at: chrono::Utc::now(),
            components: self.components.values().map(Component::checkpoint).collect(),
            connections: self
                .connections
                .values()
                .map(|c| ConnectionCheckpoint {
                    use_component: c.use_side().component().to_string(),
                    use_dependency: c.use_side().dependency().to_string(),
                    provide_component: c.provide_side().component().to_string(),
                    provide_dependency: c.provide_side().dependency().to_string(),
                })
                .collect(),
            remote_components: self
                .remote_components
                .iter()
                .map(|(c, a)| (c.to_string(), a.clone()))
                .collect(),
            active_components: self
                .active_components
                .iter()
                .map(ToString::to_string)
                .collect(),
            instructions_done: self.instructions_done,
            barriers_reached: self.barriers_reached,
            barrier_open: self.barrier_open,
        }
    }

    pub fn save_checkpoint(&self) -> Result<PathBuf> {
        self.store.save(&self.checkpoint())
    }

    /// Removes this assembly's checkpoint so the next open cold starts
    pub fn clear_checkpoint(&self) -> Result<bool> {
        self.store.clear(&self.config.name)
    }

    fn restore(&mut self, checkpoint: &AssemblyCheckpoint) -> Result<()> {
        info!(
            "Assembly {}: resuming from checkpoint of {} ({} instructions done)",
            self.config.name, checkpoint.saved_at, checkpoint.instructions_done
        );
        for (component, assembly) in &checkpoint.remote_components {
            self.remote_components
                .insert(ComponentId::from(component.as_str()), assembly.clone());
        }

        for saved in &checkpoint.components {
            let id = ComponentId::from(saved.name.as_str());
            let mut component = self
                .registry
                .instantiate(&saved.type_tag, &id, &saved.args)?;
            component.restore(saved)?;
            component.initialize(self.component_env())?;
            self.components.insert(id, component);
        }

        for saved in &checkpoint.connections {
            let use_side = self.endpoint(
                &ComponentId::from(saved.use_component.as_str()),
                &DependencyId::from(saved.use_dependency.as_str()),
            )?;
            let provide_side = self.endpoint(
                &ComponentId::from(saved.provide_component.as_str()),
                &DependencyId::from(saved.provide_dependency.as_str()),
            )?;
            let connection = Arc::new(Connection::new(use_side, provide_side)?);
            self.attach(&connection)?;
            self.connections
                .insert(connection.id().clone(), connection);
        }

        self.active_components = checkpoint
            .active_components
            .iter()
            .map(|c| ComponentId::from(c.as_str()))
            .collect();
        self.instructions_done = checkpoint.instructions_done;
        self.instructions_to_skip = checkpoint.instructions_done;
        self.barriers_reached = checkpoint.barriers_reached;
        self.barrier_open = checkpoint.barrier_open;
        Ok(())
    }
}

impl std::fmt::Debug for Assembly {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Assembly")
            .field("name", &self.config.name)
            .field("components", &self.components.keys().collect::<Vec<_>>())
            .field("connections", &self.connections.keys().collect::<Vec<_>>())
            .field("active_components", &self.active_components)
            .field("pending", &self.queue.len())
            .finish()
    }
}
