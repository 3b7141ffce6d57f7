// End-to-end assembly scenarios over the in-memory bus

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tempfile::TempDir;

use super::assembly::Assembly;
use super::checkpoint::CheckpointStore;
use super::communication::{CommunicationClient, ComponentStatus, InMemoryBus};
use super::component_type::ComponentType;
use super::config::{AssemblyConfig, FailurePolicy, SleepPolicy};
use super::connection::ConnectionId;
use super::registry::ComponentRegistry;
use crate::models::{Binding, ComponentId, DependencyId, DependencyType, Instruction};
use crate::ConcertoError;

fn config(dir: &TempDir, name: &str) -> AssemblyConfig {
    AssemblyConfig {
        name: name.to_string(),
        checkpoint_dir: dir.path().to_string_lossy().into_owned(),
        poll_interval_ms: 2,
        handshake_interval_ms: 5,
        ..Default::default()
    }
}

fn counting_action(
    runs: &Arc<AtomicUsize>,
) -> impl Fn(&super::action::ActionContext, &[Value]) -> anyhow::Result<()> + Send + Sync + 'static {
    let runs = runs.clone();
    move |_, _| {
        runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// `initial --run--> running`, provide port on `running`
fn provider(runs: &Arc<AtomicUsize>) -> ComponentType {
    ComponentType::builder("provider")
        .places(["initial", "running"])
        .initial_place("initial")
        .action("start", counting_action(runs))
        .transition_with_action("run", "initial", "running", "run", "start")
        .dependency("service", DependencyType::Provide, [Binding::place("running")])
        .build()
        .unwrap()
}

/// `initial --run--> running --stop--> initial`, use port on `run` and `running`
fn user(runs: &Arc<AtomicUsize>) -> ComponentType {
    ComponentType::builder("user")
        .places(["initial", "running"])
        .initial_place("initial")
        .action("start", counting_action(runs))
        .transition_with_action("run", "initial", "running", "run", "start")
        .transition("stop", "running", "initial", "stop")
        .dependency(
            "service",
            DependencyType::Use,
            [Binding::transition("run"), Binding::place("running")],
        )
        .build()
        .unwrap()
}

/// install -> configure -> run, each step needing the database
fn sequential_app() -> ComponentType {
    ComponentType::builder("app")
        .places(["initial", "installed", "configured", "running"])
        .initial_place("initial")
        .action("noop", |_, _| Ok(()))
        .transition_with_action("install", "initial", "installed", "deploy", "noop")
        .transition_with_action("configure", "installed", "configured", "deploy", "noop")
        .transition_with_action("run", "configured", "running", "deploy", "noop")
        .transition("stop", "running", "initial", "stop")
        .dependency(
            "db",
            DependencyType::Use,
            [
                Binding::transition("install"),
                Binding::transition("configure"),
                Binding::transition("run"),
                Binding::place("running"),
            ],
        )
        .build()
        .unwrap()
}

/// Provide port bound to a group spanning `configured` and `running`
fn grouped_db() -> ComponentType {
    ComponentType::builder("grouped")
        .places(["initial", "configured", "running"])
        .initial_place("initial")
        .transition("configure", "initial", "configured", "deploy")
        .transition("start", "configured", "running", "deploy")
        .transition("stop", "running", "initial", "stop")
        .group("up", ["configured", "running"])
        .dependency("service", DependencyType::Provide, [Binding::group("up")])
        .build()
        .unwrap()
}

/// Separate behaviors into `configured` and on to `running`; both are in
/// the group the provide port is bound to
fn staged_db() -> ComponentType {
    ComponentType::builder("staged")
        .places(["initial", "configured", "running"])
        .initial_place("initial")
        .transition("configure", "initial", "configured", "configure")
        .transition("start", "configured", "running", "start")
        .transition("unconfigure", "configured", "initial", "stop")
        .group("up", ["configured", "running"])
        .dependency("service", DependencyType::Provide, [Binding::group("up")])
        .build()
        .unwrap()
}

fn failing() -> ComponentType {
    ComponentType::builder("failing")
        .places(["initial", "running"])
        .initial_place("initial")
        .action("boom", |_, _| Err(anyhow::anyhow!("boom")))
        .transition_with_action("run", "initial", "running", "run", "boom")
        .build()
        .unwrap()
}

fn registry(runs: &Arc<AtomicUsize>) -> Arc<ComponentRegistry> {
    let mut registry = ComponentRegistry::new();
    registry.register_type(provider(runs));
    registry.register_type(user(runs));
    registry.register_type(sequential_app());
    registry.register_type(grouped_db());
    registry.register_type(staged_db());
    registry.register_type(failing());
    Arc::new(registry)
}

fn open(config: AssemblyConfig, runs: &Arc<AtomicUsize>) -> Assembly {
    Assembly::open(
        config,
        registry(runs),
        Arc::new(CommunicationClient::in_memory()),
    )
    .unwrap()
}

fn deployment() -> Vec<Instruction> {
    vec![
        Instruction::add("provider", "provider", Value::Null),
        Instruction::add("user", "user", Value::Null),
        Instruction::connect("user", "service", "provider", "service"),
        Instruction::push_behavior("provider", "run"),
        Instruction::push_behavior("user", "run"),
        Instruction::wait_all(),
    ]
}

#[tokio::test]
async fn test_provider_and_user_deploy() {
    let dir = tempfile::tempdir().unwrap();
    let runs = Arc::new(AtomicUsize::new(0));
    let mut assembly = open(config(&dir, "scenario_a"), &runs);

    assembly.add_component("provider", "provider", Value::Null).await.unwrap();
    assembly.add_component("user", "user", Value::Null).await.unwrap();
    assembly.connect("user", "service", "provider", "service").await.unwrap();
    assembly.push_behavior("provider", "run").await.unwrap();
    assembly.push_behavior("user", "run").await.unwrap();
    assembly.wait_all().await.unwrap();

    assert_eq!(runs.load(Ordering::SeqCst), 2);
    let snapshot = assembly.debug_snapshot();
    for name in ["provider", "user"] {
        let component = snapshot.component(name).unwrap();
        assert_eq!(component.active_places, vec!["running"]);
        assert!(component.active_transitions.is_empty());
        assert!(component.idle);
    }
    assert!(snapshot.active_components.is_empty());
    assert_eq!(snapshot.connections, vec!["user/service:provider/service"]);
    assert!(assembly.error_reports().is_empty());

    let held = assembly
        .component("user")
        .unwrap()
        .port(&DependencyId::from("service"))
        .unwrap()
        .nb_users();
    assert_eq!(held, 1);

    // a second barrier on an idle assembly changes nothing
    assembly.wait_all().await.unwrap();
    assert_eq!(assembly.debug_snapshot().components, snapshot.components);
    assert_eq!(assembly.instructions_done(), 7);
}

#[tokio::test]
async fn test_use_cannot_connect_to_use() {
    let dir = tempfile::tempdir().unwrap();
    let runs = Arc::new(AtomicUsize::new(0));
    let mut assembly = open(config(&dir, "use_use"), &runs);
    assembly.add_component("u1", "user", Value::Null).await.unwrap();
    assembly.add_component("u2", "user", Value::Null).await.unwrap();
    assembly.add_component("p", "provider", Value::Null).await.unwrap();

    let err = assembly
        .connect("u1", "service", "u2", "service")
        .await
        .unwrap_err();
    assert!(matches!(err, ConcertoError::IncompatibleDependencies { .. }));
    assert!(assembly.debug_snapshot().connections.is_empty());

    // provide side first is fine, the id is still use side first
    assembly.connect("p", "service", "u1", "service").await.unwrap();
    assert_eq!(
        assembly.debug_snapshot().connections,
        vec!["u1/service:p/service"]
    );
}

#[tokio::test]
async fn test_configuration_errors_surface_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let runs = Arc::new(AtomicUsize::new(0));
    let mut assembly = open(config(&dir, "errors"), &runs);
    assembly.add_component("p", "provider", Value::Null).await.unwrap();

    assert!(matches!(
        assembly.add_component("p", "provider", Value::Null).await,
        Err(ConcertoError::DuplicateName { .. })
    ));
    assert!(matches!(
        assembly.add_component("q", "nginx", Value::Null).await,
        Err(ConcertoError::UnknownComponentType(_))
    ));
    assert!(matches!(
        assembly.push_behavior("p", "update").await,
        Err(ConcertoError::UnknownBehavior { .. })
    ));
    assert!(matches!(
        assembly.push_behavior("ghost", "run").await,
        Err(ConcertoError::UnknownComponent(_))
    ));
    assert!(matches!(
        assembly.connect("p", "service", "ghost", "service").await,
        Err(ConcertoError::UnknownComponent(_))
    ));
    assert!(matches!(
        assembly.connect("p", "missing", "p", "service").await,
        Err(ConcertoError::UnknownDependency { .. })
    ));
    assert!(assembly.debug_snapshot().pending_instructions.is_empty());
}

#[tokio::test]
async fn test_disconnect_waits_until_connection_can_be_removed() {
    let dir = tempfile::tempdir().unwrap();
    let runs = Arc::new(AtomicUsize::new(0));
    let mut assembly = open(config(&dir, "scenario_b"), &runs);

    assembly.add_component("db", "provider", Value::Null).await.unwrap();
    assembly.add_component("app", "app", Value::Null).await.unwrap();
    assembly.connect("app", "db", "db", "service").await.unwrap();
    assembly.push_behavior("db", "run").await.unwrap();
    assembly.push_behavior("app", "deploy").await.unwrap();
    assembly.wait_all().await.unwrap();
    assert_eq!(
        assembly.debug_snapshot().component("app").unwrap().active_places,
        vec!["running"]
    );

    let id = ConnectionId::build(
        &ComponentId::from("app"),
        &DependencyId::from("db"),
        &ComponentId::from("db"),
        &DependencyId::from("service"),
    );
    let connection = assembly.connection(&id).unwrap().clone();
    let comm = assembly.communication().clone();
    assert!(connection.is_active(&comm).await.unwrap());
    assert!(!connection.can_remove(&comm).await.unwrap());

    // served and in use: the disconnect cannot proceed
    let done = assembly
        .execute_with_timeout(
            Instruction::disconnect("app", "db", "db", "service"),
            Duration::from_millis(50),
        )
        .await
        .unwrap();
    assert!(!done);
    assert_eq!(assembly.debug_snapshot().connections.len(), 1);
    assert!(matches!(
        assembly.del_component("db").await,
        Err(ConcertoError::StillConnected(_))
    ));

    assembly.push_behavior("app", "stop").await.unwrap();
    assembly.disconnect("app", "db", "db", "service").await.unwrap();
    assert!(connection.can_remove(&comm).await.unwrap());
    assert!(assembly.debug_snapshot().connections.is_empty());

    assembly.wait("app").await.unwrap();
    assert_eq!(
        assembly.debug_snapshot().component("app").unwrap().active_places,
        vec!["initial"]
    );

    assembly.del_component("app").await.unwrap();
    assert!(assembly.component("app").is_none());
    assert_eq!(
        comm.get_status("scenario_b", &ComponentId::from("app"))
            .await
            .unwrap(),
        Some(ComponentStatus::Inactive)
    );
}

#[tokio::test]
async fn test_group_bound_provide_stays_locked_while_used() {
    let dir = tempfile::tempdir().unwrap();
    let runs = Arc::new(AtomicUsize::new(0));
    let mut assembly = open(config(&dir, "scenario_c"), &runs);

    assembly.add_component("db", "grouped", Value::Null).await.unwrap();
    assembly.add_component("web", "user", Value::Null).await.unwrap();
    assembly.connect("web", "service", "db", "service").await.unwrap();
    assembly.push_behavior("db", "deploy").await.unwrap();
    assembly.push_behavior("web", "run").await.unwrap();
    assembly.wait_all().await.unwrap();

    let comm = assembly.communication().clone();
    let service = DependencyId::from("service");
    let port = assembly.component("db").unwrap().port(&service).unwrap().clone();
    assert_eq!(port.nb_users(), 1);
    assert!(port.is_locked(&comm).await.unwrap());

    // leaving the group is held back while web uses the service
    assembly.push_behavior("db", "stop").await.unwrap();
    let done = assembly
        .execute_with_timeout(Instruction::wait("db"), Duration::from_millis(50))
        .await
        .unwrap();
    assert!(!done);
    assert_eq!(
        assembly.debug_snapshot().component("db").unwrap().active_places,
        vec!["running"]
    );
    assert!(port.is_locked(&comm).await.unwrap());

    assembly.push_behavior("web", "stop").await.unwrap();
    assembly.wait_all().await.unwrap();
    assert_eq!(
        assembly.debug_snapshot().component("db").unwrap().active_places,
        vec!["initial"]
    );
    assert!(!port.is_locked(&comm).await.unwrap());
    assert_eq!(port.nb_users(), 0);
}

#[tokio::test]
async fn test_failed_action_holds_the_barrier() {
    let dir = tempfile::tempdir().unwrap();
    let runs = Arc::new(AtomicUsize::new(0));
    let mut assembly = open(config(&dir, "hold"), &runs);

    assembly.add_component("f", "failing", Value::Null).await.unwrap();
    assembly.push_behavior("f", "run").await.unwrap();
    let (finished, snapshot) = assembly
        .wait_all_with_timeout(Duration::from_millis(100))
        .await
        .unwrap();

    assert!(!finished);
    assert_eq!(snapshot.error_reports.len(), 1);
    assert_eq!(snapshot.error_reports[0].component.as_str(), "f");
    assert!(snapshot.error_reports[0].message.contains("boom"));
    assert_eq!(snapshot.component("f").unwrap().active_transitions, vec!["run"]);
    assert_eq!(snapshot.active_components, vec!["f"]);
}

#[tokio::test]
async fn test_failed_action_proceeds_when_configured() {
    let dir = tempfile::tempdir().unwrap();
    let runs = Arc::new(AtomicUsize::new(0));
    let mut assembly = open(
        AssemblyConfig {
            failure_policy: FailurePolicy::Proceed,
            ..config(&dir, "proceed")
        },
        &runs,
    );

    assembly.add_component("f", "failing", Value::Null).await.unwrap();
    assembly.push_behavior("f", "run").await.unwrap();
    assembly.wait_all().await.unwrap();

    let reports = assembly.error_reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].transition.as_str(), "run");
    assert_eq!(
        assembly.debug_snapshot().component("f").unwrap().active_places,
        vec!["running"]
    );
}

#[tokio::test]
async fn test_dry_run_deploys() {
    let dir = tempfile::tempdir().unwrap();
    let runs = Arc::new(AtomicUsize::new(0));
    let mut assembly = open(
        AssemblyConfig {
            dry_run: true,
            ..config(&dir, "dry")
        },
        &runs,
    );

    assembly.run_program(deployment()).await.unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert!(assembly.debug_snapshot().active_components.is_empty());
}

#[tokio::test]
async fn test_checkpoint_round_trip_and_resume() {
    let dir = tempfile::tempdir().unwrap();
    let runs = Arc::new(AtomicUsize::new(0));

    let (before, components) = {
        let mut assembly = open(config(&dir, "resume"), &runs);
        assembly.run_program(deployment()).await.unwrap();
        assembly.save_checkpoint().unwrap();
        (assembly.checkpoint(), assembly.debug_snapshot())
    };
    assert_eq!(runs.load(Ordering::SeqCst), 2);

    let mut resumed = open(config(&dir, "resume"), &runs);
    let after = resumed.checkpoint();
    assert_eq!(after.components, before.components);
    assert_eq!(after.connections, before.connections);
    assert_eq!(after.active_components, before.active_components);
    assert_eq!(resumed.debug_snapshot().components, components.components);
    assert_eq!(resumed.instructions_done(), 6);
    assert_eq!(
        resumed
            .component("user")
            .unwrap()
            .port(&DependencyId::from("service"))
            .unwrap()
            .nb_users(),
        1
    );

    // replaying the program does not add or run anything twice
    resumed.run_program(deployment()).await.unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(resumed.instructions_done(), 6);

    // past the replayed prefix instructions run again
    resumed.push_behavior("user", "stop").await.unwrap();
    resumed.wait("user").await.unwrap();
    assert_eq!(resumed.instructions_done(), 8);

    assert!(resumed.clear_checkpoint().unwrap());
    assert!(!CheckpointStore::new(dir.path()).exists("resume"));
}

#[tokio::test]
async fn test_sleep_policy_checkpoints_and_exits() {
    let dir = tempfile::tempdir().unwrap();
    let runs = Arc::new(AtomicUsize::new(0));
    let sleepy = AssemblyConfig {
        sleep_policy: SleepPolicy {
            enabled: true,
            initial_timeout_ms: 0,
            waiting_rate_ms: 60_000,
            exit_code: 42,
        },
        ..config(&dir, "sleepy")
    };

    {
        let mut assembly = open(sleepy, &runs);
        assembly.declare_remote("ghost", "elsewhere").unwrap();
        assembly.add_component("p", "provider", Value::Null).await.unwrap();
        let err = assembly.wait("ghost").await.unwrap_err();
        assert!(matches!(err, ConcertoError::Sleeping { code: 42 }));
    }
    assert!(CheckpointStore::new(dir.path()).exists("sleepy"));

    let mut resumed = open(config(&dir, "sleepy"), &runs);
    assert_eq!(resumed.instructions_done(), 1);
    resumed
        .run_program(vec![
            Instruction::add("p", "provider", Value::Null),
            Instruction::push_behavior("p", "run"),
            Instruction::wait("p"),
        ])
        .await
        .unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(
        resumed.debug_snapshot().component("p").unwrap().active_places,
        vec!["running"]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_assemblies_handshake_over_shared_bus() {
    let dir = tempfile::tempdir().unwrap();
    let runs = Arc::new(AtomicUsize::new(0));
    let bus = InMemoryBus::new();
    let front_comm = Arc::new(CommunicationClient::new(Arc::new(bus.clone())));
    let back_comm = Arc::new(CommunicationClient::new(Arc::new(bus.clone())));

    let mut front = Assembly::open(config(&dir, "front"), registry(&runs), front_comm).unwrap();
    let mut back = Assembly::open(config(&dir, "back"), registry(&runs), back_comm).unwrap();
    front.declare_remote("db", "back").unwrap();
    back.declare_remote("web", "front").unwrap();

    let deploy_front = async {
        front.add_component("web", "user", Value::Null).await?;
        front.connect("web", "service", "db", "service").await?;
        front.push_behavior("web", "run").await?;
        front.wait_all().await?;
        Ok::<_, ConcertoError>(())
    };
    let deploy_back = async {
        back.add_component("db", "provider", Value::Null).await?;
        back.connect("db", "service", "web", "service").await?;
        back.push_behavior("db", "run").await?;
        back.wait_all().await?;
        Ok::<_, ConcertoError>(())
    };
    let (f, b) = tokio::time::timeout(Duration::from_secs(10), async {
        tokio::join!(deploy_front, deploy_back)
    })
    .await
    .expect("deployment did not converge");
    f.unwrap();
    b.unwrap();

    assert_eq!(runs.load(Ordering::SeqCst), 2);
    let keys = bus.keys();
    assert!(keys.contains(&"CONN/web/db/service/service".to_string()));
    assert!(keys.contains(&"CONN/db/web/service/service".to_string()));

    let comm = front.communication().clone();
    assert_eq!(
        comm.get_nb_users(&ComponentId::from("web"), &DependencyId::from("service"))
            .await
            .unwrap(),
        1
    );
    assert!(
        comm.get_nb_users(&ComponentId::from("db"), &DependencyId::from("service"))
            .await
            .unwrap()
            >= 1
    );
    assert_eq!(comm.get_barrier("front").await.unwrap(), 1);
    assert_eq!(comm.get_barrier("back").await.unwrap(), 1);

    // web leaves, then both sides agree on the disconnect
    let undeploy_front = async {
        front.push_behavior("web", "stop").await?;
        front.wait("web").await?;
        front.disconnect("web", "service", "db", "service").await?;
        Ok::<_, ConcertoError>(())
    };
    let undeploy_back = async {
        back.wait("web").await?;
        back.disconnect("db", "service", "web", "service").await?;
        Ok::<_, ConcertoError>(())
    };
    let (f, b) = tokio::time::timeout(Duration::from_secs(10), async {
        tokio::join!(undeploy_front, undeploy_back)
    })
    .await
    .expect("disconnect did not converge");
    f.unwrap();
    b.unwrap();

    let keys = bus.keys();
    assert!(keys.contains(&"DECONN/web/db/service/service".to_string()));
    assert!(keys.contains(&"DECONN/db/web/service/service".to_string()));
    assert!(!keys.iter().any(|k| k.starts_with("CONN/")));
    assert!(front.debug_snapshot().connections.is_empty());
    assert!(back.debug_snapshot().connections.is_empty());
}

#[tokio::test]
async fn test_failed_program_discards_remaining_instructions() {
    let dir = tempfile::tempdir().unwrap();
    let runs = Arc::new(AtomicUsize::new(0));
    let mut assembly = open(config(&dir, "failed_program"), &runs);

    let err = assembly
        .run_program(vec![
            Instruction::add("p", "provider", Value::Null),
            Instruction::push_behavior("ghost", "run"),
            Instruction::push_behavior("p", "run"),
        ])
        .await
        .unwrap_err();
    assert!(matches!(err, ConcertoError::UnknownComponent(_)));
    assert!(assembly.debug_snapshot().pending_instructions.is_empty());

    // nothing left over runs with the next, unrelated instruction
    assembly.wait("p").await.unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert_eq!(
        assembly.debug_snapshot().component("p").unwrap().active_places,
        vec!["initial"]
    );
}

#[tokio::test]
async fn test_disconnect_of_unconnected_local_ports_fails() {
    let dir = tempfile::tempdir().unwrap();
    let runs = Arc::new(AtomicUsize::new(0));
    let mut assembly = open(config(&dir, "not_connected"), &runs);
    assembly.add_component("p", "provider", Value::Null).await.unwrap();
    assembly.add_component("u", "user", Value::Null).await.unwrap();

    assert!(matches!(
        assembly.disconnect("u", "service", "p", "service").await,
        Err(ConcertoError::NotConnected(_))
    ));
    assert!(assembly.debug_snapshot().pending_instructions.is_empty());

    assembly.connect("u", "service", "p", "service").await.unwrap();
    assembly.disconnect("u", "service", "p", "service").await.unwrap();
    assert!(assembly.debug_snapshot().connections.is_empty());
}

#[tokio::test]
async fn test_group_bound_provide_locked_in_every_member_place() {
    let dir = tempfile::tempdir().unwrap();
    let runs = Arc::new(AtomicUsize::new(0));
    let mut assembly = open(config(&dir, "staged"), &runs);

    assembly.add_component("db", "staged", Value::Null).await.unwrap();
    assembly.add_component("web", "user", Value::Null).await.unwrap();
    assembly.connect("web", "service", "db", "service").await.unwrap();
    assembly.push_behavior("db", "configure").await.unwrap();
    assembly.push_behavior("web", "run").await.unwrap();
    assembly.wait_all().await.unwrap();
    assert_eq!(
        assembly.debug_snapshot().component("db").unwrap().active_places,
        vec!["configured"]
    );

    let comm = assembly.communication().clone();
    let port = assembly
        .component("db")
        .unwrap()
        .port(&DependencyId::from("service"))
        .unwrap()
        .clone();
    assert!(port.is_locked(&comm).await.unwrap());

    // leaving `configured` would empty the group
    assembly.push_behavior("db", "stop").await.unwrap();
    let done = assembly
        .execute_with_timeout(Instruction::wait("db"), Duration::from_millis(50))
        .await
        .unwrap();
    assert!(!done);
    assert_eq!(
        assembly.debug_snapshot().component("db").unwrap().active_places,
        vec!["configured"]
    );

    assembly.push_behavior("web", "stop").await.unwrap();
    assembly.wait_all().await.unwrap();
    assert_eq!(
        assembly.debug_snapshot().component("db").unwrap().active_places,
        vec!["initial"]
    );
    assert!(!port.is_locked(&comm).await.unwrap());
}

#[tokio::test]
async fn test_refusing_provide_holds_back_new_users() {
    let dir = tempfile::tempdir().unwrap();
    let runs = Arc::new(AtomicUsize::new(0));
    let mut assembly = open(config(&dir, "refusing"), &runs);

    assembly.add_component("p", "provider", Value::Null).await.unwrap();
    assembly.add_component("u", "user", Value::Null).await.unwrap();
    assembly.connect("u", "service", "p", "service").await.unwrap();
    assembly.push_behavior("p", "run").await.unwrap();
    assembly.wait("p").await.unwrap();

    assert!(matches!(
        assembly.set_refusing("ghost", "service", true).await,
        Err(ConcertoError::UnknownComponent(_))
    ));
    assembly.set_refusing("p", "service", true).await.unwrap();
    let port = assembly
        .component("p")
        .unwrap()
        .port(&DependencyId::from("service"))
        .unwrap()
        .clone();
    assert!(port.state().refusing);

    assembly.push_behavior("u", "run").await.unwrap();
    let done = assembly
        .execute_with_timeout(Instruction::wait("u"), Duration::from_millis(50))
        .await
        .unwrap();
    assert!(!done);
    let snapshot = assembly.debug_snapshot();
    let user = snapshot.component("u").unwrap();
    assert_eq!(user.active_output_docks, vec!["run:out"]);
    assert!(user.active_transitions.is_empty());
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    assembly.set_refusing("p", "service", false).await.unwrap();
    assembly.wait("u").await.unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(
        assembly.debug_snapshot().component("u").unwrap().active_places,
        vec!["running"]
    );
}

/// Deploys `web` on front and `db` on back, connected across the bus
async fn deploy_pair(front: &mut Assembly, back: &mut Assembly) {
    front.declare_remote("db", back.name().to_string()).unwrap();
    back.declare_remote("web", front.name().to_string()).unwrap();
    let deploy_front = async {
        front.add_component("web", "user", Value::Null).await?;
        front.connect("web", "service", "db", "service").await?;
        front.push_behavior("web", "run").await?;
        Ok::<_, ConcertoError>(())
    };
    let deploy_back = async {
        back.add_component("db", "provider", Value::Null).await?;
        back.connect("db", "service", "web", "service").await?;
        back.push_behavior("db", "run").await?;
        back.wait("db").await?;
        Ok::<_, ConcertoError>(())
    };
    let (f, b) = tokio::time::timeout(Duration::from_secs(10), async {
        tokio::join!(deploy_front, deploy_back)
    })
    .await
    .expect("deployment did not converge");
    f.unwrap();
    b.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_barrier_retried_after_timeout_keeps_its_number() {
    let dir = tempfile::tempdir().unwrap();
    let runs = Arc::new(AtomicUsize::new(0));
    let bus = InMemoryBus::new();
    let mut front = Assembly::open(
        config(&dir, "front"),
        registry(&runs),
        Arc::new(CommunicationClient::new(Arc::new(bus.clone()))),
    )
    .unwrap();
    let mut back = Assembly::open(
        config(&dir, "back"),
        registry(&runs),
        Arc::new(CommunicationClient::new(Arc::new(bus.clone()))),
    )
    .unwrap();
    deploy_pair(&mut front, &mut back).await;

    // back has not reached the barrier yet
    let (finished, _) = front
        .wait_all_with_timeout(Duration::from_millis(20))
        .await
        .unwrap();
    assert!(!finished);

    let retry_front = async { front.wait_all().await };
    let late_back = async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        back.wait_all().await
    };
    let (f, b) = tokio::time::timeout(Duration::from_secs(10), async {
        tokio::join!(retry_front, late_back)
    })
    .await
    .expect("barrier did not complete after the retry");
    f.unwrap();
    b.unwrap();

    let comm = CommunicationClient::new(Arc::new(bus.clone()));
    assert_eq!(comm.get_barrier("front").await.unwrap(), 1);
    assert_eq!(comm.get_barrier("back").await.unwrap(), 1);
    assert_eq!(front.checkpoint().barriers_reached, 1);
    assert!(!front.checkpoint().barrier_open);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_wait_for_refusing_provide_skips_barrier_receipt() {
    let dir = tempfile::tempdir().unwrap();
    let runs = Arc::new(AtomicUsize::new(0));
    let bus = InMemoryBus::new();
    let mut front = Assembly::open(
        config(&dir, "front"),
        registry(&runs),
        Arc::new(CommunicationClient::new(Arc::new(bus.clone()))),
    )
    .unwrap();
    let mut back = Assembly::open(
        config(&dir, "back"),
        registry(&runs),
        Arc::new(CommunicationClient::new(Arc::new(bus.clone()))),
    )
    .unwrap();
    deploy_pair(&mut front, &mut back).await;
    tokio::time::timeout(Duration::from_secs(10), front.wait("web"))
        .await
        .expect("web did not start")
        .unwrap();

    // the refusing flag of a port with a remote peer reaches the bus
    back.set_refusing("db", "service", true).await.unwrap();
    let comm = CommunicationClient::new(Arc::new(bus.clone()));
    assert!(comm
        .get_refusing(&ComponentId::from("db"), &DependencyId::from("service"))
        .await
        .unwrap());

    // back never issues a barrier, so a plain one cannot complete
    let (finished, _) = front
        .wait_all_with_timeout(Duration::from_millis(200))
        .await
        .unwrap();
    assert!(!finished);

    tokio::time::timeout(Duration::from_secs(10), front.wait_all_with(true))
        .await
        .expect("refusing barrier did not complete")
        .unwrap();
    assert_eq!(comm.get_barrier("front").await.unwrap(), 1);
    assert_eq!(comm.get_barrier("back").await.unwrap(), 0);
    assert_eq!(
        front.debug_snapshot().component("web").unwrap().active_places,
        vec!["running"]
    );
}
