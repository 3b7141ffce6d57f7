//! Concerto CLI
//!
//! Operator tool for Concerto assemblies: runs the bundled provider/user
//! demo, inspects and clears checkpoint files, and reads the component
//! status that assemblies publish on the NATS key/value bucket.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use concerto::{
    Assembly, AssemblyConfig, Binding, CheckpointStore, CommunicationClient, ComponentId,
    ComponentRegistry, ComponentStatus, ComponentType, ConcertoError, DebugSnapshot,
    DependencyType, Instruction, NatsBus, NatsCommunicationConfig,
};
use dotenv::dotenv;
use serde_json::Value;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "concerto")]
#[command(about = "Concerto CLI - deploy and inspect component assemblies")]
#[command(version = "0.1")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Assembly configuration file (TOML, JSON or YAML)
    #[arg(long, env = "CONCERTO_CONFIG")]
    config: Option<PathBuf>,

    /// NATS server URL
    #[arg(long, env = "NATS_URL", default_value = "nats://localhost:4222")]
    nats_url: String,

    /// NATS key/value bucket shared by the assemblies
    #[arg(long, default_value = "concerto")]
    bucket: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy a provider and a user connected through one service port
    Demo {
        /// Run actions on the control thread
        #[arg(long)]
        dry_run: bool,

        /// Use the NATS bucket instead of an in-memory bus
        #[arg(long)]
        nats: bool,

        /// Give up after this many seconds
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },

    /// Checkpoint file management
    Checkpoint {
        #[command(subcommand)]
        action: CheckpointCommands,
    },

    /// Show the published status of components of an assembly
    Status {
        /// Assembly id owning the components
        #[arg(long)]
        assembly: String,

        /// Component names
        #[arg(required = true)]
        components: Vec<String>,
    },
}

#[derive(Subcommand)]
enum CheckpointCommands {
    /// Print the checkpoint of an assembly
    Show {
        name: String,

        /// Print the raw JSON document
        #[arg(long)]
        json: bool,
    },

    /// Delete the checkpoint so the next start is a cold start
    Clear {
        name: String,

        /// Confirm the deletion
        #[arg(long)]
        confirm: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)),
        )
        .init();

    let config = AssemblyConfig::load(cli.config.as_deref())?;
    let nats = NatsCommunicationConfig {
        url: cli.nats_url.clone(),
        bucket: cli.bucket.clone(),
        ..Default::default()
    };

    let outcome = match cli.command {
        Commands::Demo {
            dry_run,
            nats: use_nats,
            timeout,
        } => {
            let config = AssemblyConfig {
                dry_run: dry_run || config.dry_run,
                ..config
            };
            run_demo(config, use_nats.then_some(nats), Duration::from_secs(timeout)).await
        }
        Commands::Checkpoint { action } => handle_checkpoint(&config, action),
        Commands::Status {
            assembly,
            components,
        } => show_status(nats, &assembly, &components).await,
    };

    match outcome {
        Err(ConcertoError::Sleeping { code }) => {
            info!("Assembly checkpointed, exiting with status {}", code);
            process::exit(code);
        }
        other => Ok(other?),
    }
}

fn demo_registry() -> concerto::Result<ComponentRegistry> {
    let step = |ctx: &concerto::ActionContext, _args: &[Value]| {
        info!("{}: running {}", ctx.component(), ctx.transition());
        std::thread::sleep(Duration::from_millis(200));
        Ok::<(), anyhow::Error>(())
    };

    let mut registry = ComponentRegistry::new();
    registry.register_type(
        ComponentType::builder("provider")
            .places(["initial", "running"])
            .initial_place("initial")
            .action("start", step)
            .transition_with_action("run", "initial", "running", "run", "start")
            .dependency("service", DependencyType::Provide, [Binding::place("running")])
            .build()?,
    );
    registry.register_type(
        ComponentType::builder("user")
            .places(["initial", "running"])
            .initial_place("initial")
            .action("start", step)
            .transition_with_action("run", "initial", "running", "run", "start")
            .dependency(
                "service",
                DependencyType::Use,
                [Binding::transition("run"), Binding::place("running")],
            )
            .build()?,
    );
    Ok(registry)
}

async fn run_demo(
    config: AssemblyConfig,
    nats: Option<NatsCommunicationConfig>,
    timeout: Duration,
) -> concerto::Result<()> {
    let comm = match nats {
        Some(nats) => CommunicationClient::new(Arc::new(NatsBus::connect(nats).await?)),
        None => CommunicationClient::in_memory(),
    };
    let mut assembly = Assembly::open(config, Arc::new(demo_registry()?), Arc::new(comm))?;

    println!("\n{}", "🎼 Concerto demo".bold());
    println!("==================");

    assembly
        .run_program(vec![
            Instruction::add("provider", "provider", Value::Null),
            Instruction::add("user", "user", Value::Null),
            Instruction::connect("user", "service", "provider", "service"),
            Instruction::push_behavior("provider", "run"),
            Instruction::push_behavior("user", "run"),
        ])
        .await?;

    let (finished, snapshot) = assembly.wait_all_with_timeout(timeout).await?;
    print_snapshot(&snapshot);
    if finished {
        println!("\n{}", "✅ Deployment finished".green());
        assembly.clear_checkpoint()?;
    } else {
        println!(
            "\n{}",
            format!("⏳ Deployment still running after {:?}", timeout).yellow()
        );
    }
    Ok(())
}

fn print_snapshot(snapshot: &DebugSnapshot) {
    println!("\nAssembly {}", snapshot.assembly.bold());
    for component in &snapshot.components {
        let state = if component.idle {
            "idle".green()
        } else {
            "active".yellow()
        };
        println!("  {} [{}]", component.name.bold(), state);
        println!("    places:      {}", component.active_places.join(", "));
        if !component.active_transitions.is_empty() {
            println!("    transitions: {}", component.active_transitions.join(", "));
        }
        if let Some(behavior) = &component.behavior {
            println!("    behavior:    {}", behavior);
        }
    }
    if !snapshot.connections.is_empty() {
        println!("  connections:");
        for connection in &snapshot.connections {
            println!("    {}", connection);
        }
    }
    for report in &snapshot.error_reports {
        println!("  {}", report.to_string().red());
    }
}

fn handle_checkpoint(config: &AssemblyConfig, action: CheckpointCommands) -> concerto::Result<()> {
    let store = CheckpointStore::from_config(config);
    match action {
        CheckpointCommands::Show { name, json } => {
            let Some(checkpoint) = store.load(&name)? else {
                println!("No checkpoint for {} in {}", name, store.dir().display());
                return Ok(());
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&checkpoint)?);
                return Ok(());
            }
            println!("\n📦 Checkpoint {}", checkpoint.name.bold());
            println!("==================================");
            println!("Saved at:          {}", checkpoint.saved_at.to_rfc3339());
            println!("Instructions done: {}", checkpoint.instructions_done);
            println!("Barriers reached:  {}", checkpoint.barriers_reached);
            println!("\nComponents ({})", checkpoint.components.len());
            for component in &checkpoint.components {
                let active = checkpoint.active_components.contains(&component.name);
                println!(
                    "  {} ({}){}",
                    component.name.bold(),
                    component.type_tag,
                    if active { " active".yellow().to_string() } else { String::new() }
                );
                println!("    places: {}", component.active_places.join(", "));
                for (port, state) in &component.ports {
                    println!(
                        "    port {}: {} user(s){}",
                        port,
                        state.nb_users,
                        if state.refusing { ", refusing" } else { "" }
                    );
                }
            }
            println!("\nConnections ({})", checkpoint.connections.len());
            for connection in &checkpoint.connections {
                println!(
                    "  {}.{} -> {}.{}",
                    connection.use_component,
                    connection.use_dependency,
                    connection.provide_component,
                    connection.provide_dependency
                );
            }
            for (component, assembly) in &checkpoint.remote_components {
                println!("  remote {} owned by {}", component, assembly);
            }
        }
        CheckpointCommands::Clear { name, confirm } => {
            if !confirm {
                error!("❌ Clearing a checkpoint requires --confirm flag for safety");
                return Ok(());
            }
            if store.clear(&name)? {
                println!("{}", format!("✅ Removed checkpoint {}", name).green());
            } else {
                println!("No checkpoint for {}", name);
            }
        }
    }
    Ok(())
}

async fn show_status(
    nats: NatsCommunicationConfig,
    assembly: &str,
    components: &[String],
) -> concerto::Result<()> {
    let comm = CommunicationClient::new(Arc::new(NatsBus::connect(nats).await?));

    println!("\n📊 Assembly {}", assembly.bold());
    println!("Barriers reached: {}", comm.get_barrier(assembly).await?);
    for name in components {
        let status = comm.get_status(assembly, &ComponentId::from(name.as_str())).await?;
        let shown = match status {
            Some(ComponentStatus::Active) => "ACTIVE".yellow(),
            Some(ComponentStatus::Inactive) => "INACTIVE".green(),
            None => "unknown".dimmed(),
        };
        println!("  {}: {}", name, shown);
    }
    Ok(())
}
