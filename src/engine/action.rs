// Transition actions and their execution state

//! # Actions
//!
//! An [`Action`] is the user code attached to a transition, registered by
//! name on a component type. It runs on tokio's blocking pool so that a
//! long `apt install` never stalls the control loop, and reports back
//! through a one-shot channel that the component scan polls.
//!
//! ## Transition state
//!
//! ```text
//!   Idle --start--> Running(rx) --rx fired--> (token delivered) --> Idle
//!                        |
//!                        +--> Failed (failure policy Hold: stays active)
//! ```
//!
//! A transition only starts from `Idle`, so one transition never has two
//! actions in flight. A panicking action drops its sender; the scan sees a
//! closed channel and reports it like any other failure.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::communication::CommunicationClient;
use super::dependency::Port;
use crate::models::{ComponentId, DependencyId, DependencyIdx, DockIdx, PlaceIdx, TransitionId};
use crate::{ConcertoError, Result};

/// User code run when a transition fires
///
/// Receives the context of the running transition and the static
/// arguments of the transition definition.
pub type Action = Arc<dyn Fn(&ActionContext, &[Value]) -> anyhow::Result<()> + Send + Sync>;

/// Outcome of one action run; the error is the rendered failure message
pub type ActionOutcome = std::result::Result<(), String>;

/// What a running action can see of its component
#[derive(Clone)]
pub struct ActionContext {
    component: ComponentId,
    transition: TransitionId,
    component_args: Value,
    ports: Arc<HashMap<DependencyId, Port>>,
    comm: Arc<CommunicationClient>,
    runtime: tokio::runtime::Handle,
}

impl ActionContext {
    pub(crate) fn new(
        component: ComponentId,
        transition: TransitionId,
        component_args: Value,
        ports: Arc<HashMap<DependencyId, Port>>,
        comm: Arc<CommunicationClient>,
        runtime: tokio::runtime::Handle,
    ) -> Self {
        Self {
            component,
            transition,
            component_args,
            ports,
            comm,
            runtime,
        }
    }

    pub fn component(&self) -> &ComponentId {
        &self.component
    }

    pub fn transition(&self) -> &TransitionId {
        &self.transition
    }

    /// Arguments the component was instantiated with
    pub fn component_args(&self) -> &Value {
        &self.component_args
    }

    fn port(&self, dependency: &str) -> Result<&Port> {
        self.ports
            .get(&DependencyId::from(dependency))
            .ok_or_else(|| ConcertoError::UnknownDependency {
                component: self.component.to_string(),
                dependency: dependency.to_string(),
            })
    }

    /// Reads a payload; blocks the action thread while a remote value is fetched
    pub fn read(&self, dependency: &str) -> Result<Option<Value>> {
        let port = self.port(dependency)?;
        self.runtime.block_on(port.read(&self.comm))
    }

    pub fn write(&self, dependency: &str, value: Value) -> Result<()> {
        self.port(dependency)?.write(value)
    }
}

/// Execution state of a run-time transition
#[derive(Debug)]
pub enum TransitionState {
    Idle,
    Running(oneshot::Receiver<ActionOutcome>),
    /// Completed, token not yet delivered
    Finished(ActionOutcome),
    /// Failed and held by the failure policy
    Failed(String),
}

impl TransitionState {
    pub fn is_idle(&self) -> bool {
        matches!(self, TransitionState::Idle)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, TransitionState::Running(_))
    }
}

/// Run-time transition of a component
pub struct Transition {
    pub name: TransitionId,
    /// `None` for the synthetic initial transition
    pub source: Option<PlaceIdx>,
    pub destination: PlaceIdx,
    pub behavior: String,
    pub idset: u32,
    pub action: Option<Action>,
    pub args: Vec<Value>,
    pub output_dock: Option<DockIdx>,
    pub input_dock: DockIdx,
    /// Use-family ports bound to this transition
    pub dependencies: Vec<DependencyIdx>,
    pub state: TransitionState,
}

impl Transition {
    /// Starts the action. Without an action the transition is finished at
    /// once. In dry-run mode the action is awaited before returning.
    pub async fn start(&mut self, context: ActionContext, dry_run: bool) {
        let Some(action) = self.action.clone() else {
            self.state = TransitionState::Finished(Ok(()));
            return;
        };
        let args = self.args.clone();
        let name = self.name.clone();
        let (tx, rx) = oneshot::channel();

        debug!("{}: starting action of {}", context.component(), name);
        let handle = tokio::task::spawn_blocking(move || {
            let outcome = action(&context, &args).map_err(|e| format!("{:#}", e));
            // the receiver is gone only if the component was dropped
            let _ = tx.send(outcome);
        });

        if dry_run {
            if let Err(e) = handle.await {
                warn!("action of {} did not complete: {}", name, e);
            }
        }
        self.state = TransitionState::Running(rx);
    }

    /// Outcome of the action if it has completed since the last poll
    pub fn poll(&mut self) -> Option<ActionOutcome> {
        match &mut self.state {
            TransitionState::Running(rx) => match rx.try_recv() {
                Ok(outcome) => Some(outcome),
                Err(oneshot::error::TryRecvError::Empty) => None,
                Err(oneshot::error::TryRecvError::Closed) => {
                    Some(Err("action panicked".to_string()))
                }
            },
            TransitionState::Finished(outcome) => Some(outcome.clone()),
            TransitionState::Idle | TransitionState::Failed(_) => None,
        }
    }
}

impl std::fmt::Debug for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transition")
            .field("name", &self.name)
            .field("source", &self.source)
            .field("destination", &self.destination)
            .field("behavior", &self.behavior)
            .field("idset", &self.idset)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn context(ports: HashMap<DependencyId, Port>) -> ActionContext {
        ActionContext::new(
            ComponentId::from("db"),
            TransitionId::from("install"),
            serde_json::json!({"version": 16}),
            Arc::new(ports),
            Arc::new(CommunicationClient::in_memory()),
            tokio::runtime::Handle::current(),
        )
    }

    fn transition(action: Option<Action>) -> Transition {
        Transition {
            name: TransitionId::from("install"),
            source: Some(0),
            destination: 1,
            behavior: "deploy".to_string(),
            idset: 0,
            action,
            args: vec![serde_json::json!("pkg")],
            output_dock: Some(0),
            input_dock: 1,
            dependencies: vec![],
            state: TransitionState::Idle,
        }
    }

    async fn wait_outcome(t: &mut Transition) -> ActionOutcome {
        for _ in 0..200 {
            if let Some(outcome) = t.poll() {
                return outcome;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("action never completed");
    }

    #[tokio::test]
    async fn test_transition_without_action_finishes_immediately() {
        let mut t = transition(None);
        t.start(context(HashMap::new()), false).await;
        assert_eq!(t.poll(), Some(Ok(())));
    }

    #[tokio::test]
    async fn test_action_receives_args_and_completes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let action: Action = Arc::new(move |ctx, args| {
            assert_eq!(ctx.component_args()["version"], 16);
            assert_eq!(args, &[serde_json::json!("pkg")]);
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let mut t = transition(Some(action));
        t.start(context(HashMap::new()), false).await;
        assert!(t.state.is_running());
        assert_eq!(wait_outcome(&mut t).await, Ok(()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dry_run_completes_before_returning() {
        let action: Action = Arc::new(|_, _| Ok(()));
        let mut t = transition(Some(action));
        t.start(context(HashMap::new()), true).await;
        assert_eq!(t.poll(), Some(Ok(())));
    }

    #[tokio::test]
    async fn test_failure_and_panic_become_outcomes() {
        let failing: Action = Arc::new(|_, _| Err(anyhow::anyhow!("disk full")));
        let mut t = transition(Some(failing));
        t.start(context(HashMap::new()), true).await;
        let outcome = t.poll().unwrap();
        assert!(outcome.unwrap_err().contains("disk full"));

        let panicking: Action = Arc::new(|_, _| panic!("boom"));
        let mut t = transition(Some(panicking));
        t.start(context(HashMap::new()), true).await;
        assert_eq!(t.poll(), Some(Err("action panicked".to_string())));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_context_reads_and_writes_ports() {
        use crate::models::DependencyType;

        let port = Port::new(
            ComponentId::from("db"),
            DependencyId::from("config"),
            DependencyType::DataProvide,
        );
        let mut ports = HashMap::new();
        ports.insert(port.name.clone(), port.clone());

        let action: Action = Arc::new(|ctx, _| {
            ctx.write("config", serde_json::json!({"port": 5432}))?;
            let value = ctx.read("config")?;
            anyhow::ensure!(value == Some(serde_json::json!({"port": 5432})));
            anyhow::ensure!(ctx.read("missing").is_err());
            Ok(())
        });
        let mut t = transition(Some(action));
        t.start(context(ports), false).await;
        assert_eq!(wait_outcome(&mut t).await, Ok(()));
        assert_eq!(port.state().data_version, 1);
    }
}
