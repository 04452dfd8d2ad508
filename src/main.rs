use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use fieldflow::external::{ConsoleTransport, MemoryBusiness, MemoryIdentity, MemoryMedia, Transport};
use fieldflow::{
    init_telemetry, ActorId, Collaborators, Coordinator, FieldflowConfig, InputRouter,
    ShutdownCoordinator, StateStore, Step, WorkflowRegistry,
};
use fieldflow::workflows::Role;

#[derive(Parser)]
#[command(name = "fieldflow")]
#[command(about = "Conversational multi-step field workflow coordinator")]
#[command(long_about = "Fieldflow walks drivers, warehouse staff, operators and new registrants \
                       through their multi-step workflows one message at a time, and commits the \
                       collected data to the business API exactly once. Try 'fieldflow console' \
                       for an interactive demo.")]
struct Cli {
    /// Configuration file (defaults to ./fieldflow.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive workflows from stdin with in-memory collaborators
    Console {
        /// Actor speaking until a line starts with @<actor>
        #[arg(long, default_value = "driver-1")]
        actor: String,
    },
    /// List persisted sessions
    Sessions {
        /// Only sessions parked at this state, e.g. awaiting_quantity
        #[arg(long)]
        state: Option<String>,
    },
    /// Drop an actor's session
    Reset {
        actor: String,
    },
    /// Print the effective configuration
    Config {
        /// Also write it to this file
        #[arg(long)]
        write: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    FieldflowConfig::load_env_file()?;
    let config = match &cli.config {
        Some(path) => FieldflowConfig::load_from(path)?,
        None => FieldflowConfig::load()?,
    };

    tokio::runtime::Runtime::new()?.block_on(async {
        match cli.command {
            Commands::Console { actor } => console_command(config, actor).await,
            Commands::Sessions { state } => sessions_command(config, state).await,
            Commands::Reset { actor } => reset_command(config, actor).await,
            Commands::Config { write } => config_command(config, write),
        }
    })
}

fn demo_identity() -> MemoryIdentity {
    MemoryIdentity::new()
        .with_actor("driver-1", "Dana", &[Role::Driver])
        .with_actor("ware-1", "Wes", &[Role::Warehouse])
        .with_actor("op-1", "Oli", &[Role::Operator])
        .with_actor("sup-1", "Sam", &[Role::Supervisor])
        .with_actor("sup-2", "Sky", &[Role::Supervisor])
}

fn demo_business() -> MemoryBusiness {
    MemoryBusiness::new()
        .with_item("SKU-7", "item-7", "Cola 0.5l")
        .with_item("SKU-9", "item-9", "Crisps 40g")
}

async fn console_command(config: FieldflowConfig, actor: String) -> Result<()> {
    init_telemetry(&config.observability)?;

    let store = Arc::new(StateStore::from_config(&config.store, WorkflowRegistry::standard()).await?);
    let transport: Arc<dyn Transport> = Arc::new(ConsoleTransport::new(ActorId::new(actor.as_str())));
    let coordinator = Arc::new(Coordinator::new(
        store,
        Collaborators {
            identity: Arc::new(demo_identity()),
            business: Arc::new(demo_business()),
            media: Arc::new(MemoryMedia::default()),
            transport: transport.clone(),
        },
        &config,
    ));

    let report = coordinator.recover().await;
    println!("📋 Recovered {} session(s), {} expired while offline", report.rearmed, report.expired);
    println!("💬 Speaking as {actor}. Switch with @<actor>; send photo:<id>, loc:<lat>,<lon>, choose:<key> or cancel.");
    println!("   Demo actors: driver-1, ware-1, op-1, sup-1, sup-2. Anyone else registers.");
    println!();

    let router = InputRouter::new(coordinator.clone(), &config.input);
    let shutdown = ShutdownCoordinator::new();
    let receiver = shutdown.subscribe();

    tokio::select! {
        result = router.run(transport, receiver) => result?,
        signal = shutdown.wait_for_signal() => signal?,
    }

    ShutdownCoordinator::shutdown_all_services(&coordinator, router.drain()).await
}

async fn sessions_command(config: FieldflowConfig, state: Option<String>) -> Result<()> {
    let filter: Option<Step> = state
        .map(|s| s.parse::<Step>())
        .transpose()
        .map_err(|e| anyhow!(e))?;

    let store = StateStore::from_config(&config.store, WorkflowRegistry::standard()).await?;
    let sessions: Vec<_> = store
        .list_sessions()
        .await
        .into_iter()
        .filter(|s| filter.map_or(true, |state| s.state == state))
        .collect();

    if sessions.is_empty() {
        println!("📭 No sessions in the {} store", store.backend_name());
        return Ok(());
    }

    println!("📋 {} session(s) in the {} store:", sessions.len(), store.backend_name());
    for session in sessions {
        let expires = session
            .expires_at
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "  {:<16} {:<20} {:<30} expires {}",
            session.actor_id.as_str(),
            session.workflow.as_str(),
            session.state.as_str(),
            expires
        );
    }
    Ok(())
}

async fn reset_command(config: FieldflowConfig, actor: String) -> Result<()> {
    let store = StateStore::from_config(&config.store, WorkflowRegistry::standard()).await?;
    let actor = ActorId::new(actor);

    match store.get(&actor).await.active() {
        Some(session) => {
            store.clear(&actor).await;
            println!("🧹 Reset {} (was {} at {})", actor, session.workflow, session.state);
        }
        None => println!("✅ {actor} has no active session"),
    }
    Ok(())
}

fn config_command(config: FieldflowConfig, write: Option<PathBuf>) -> Result<()> {
    println!("{}", toml::to_string_pretty(&config)?);
    if let Some(path) = write {
        config.save_to_file(&path)?;
        println!("💾 Written to {}", path.display());
    }
    Ok(())
}
