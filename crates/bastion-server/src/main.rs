use std::future::IntoFuture;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use bastion_core::Settings;
use bastion_engine::DeployMode;

#[derive(Parser, Debug)]
#[command(name = "bastion", version, about = "Bastion - Secure MCP Gateway")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the gateway (REST facade + MCP JSON-RPC surface).
    ///
    /// Listens on SERVER_PORT and talks to the policy engine at
    /// POLICY_ENGINE_URL.
    Gateway,

    /// Start the policy engine.
    ///
    /// Listens on ENGINE_PORT. ENABLE_EVALUATION / ENABLE_MANAGEMENT pick
    /// the deploy mode; evaluation-only nodes open POLICY_DIR read-only
    /// and watch it for external changes.
    Engine,

    /// Start gateway and engine in one process.
    Run,

    /// Validate settings, registry files, and the policy directory, then
    /// exit.
    Check,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(Settings::log_filter()))
        .init();

    let outcome = match cli.cmd {
        Command::Gateway => serve_gateway().await,
        Command::Engine => serve_engine().await,
        Command::Run => run_combined().await,
        Command::Check => check().await,
    };

    if let Err(e) = outcome {
        tracing::error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

fn load_settings() -> anyhow::Result<Settings> {
    Settings::from_env().map_err(|e| anyhow::anyhow!("invalid environment: {e}"))
}

async fn serve_gateway() -> anyhow::Result<()> {
    let settings = load_settings()?;
    let port = settings.port;
    let state = bastion_gateway::AppState::init(settings).await?;
    let app = bastion_gateway::router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "gateway listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn serve_engine() -> anyhow::Result<()> {
    let settings = load_settings()?;
    let state = bastion_engine::EngineState::init(&settings).await?;

    if state.mode == DeployMode::EvaluationOnly {
        bastion_engine::spawn_watcher(state.store.clone(), settings.policy_reload_secs);
    }

    let app = bastion_engine::router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", settings.engine_port)).await?;
    tracing::info!(port = settings.engine_port, "policy engine listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn run_combined() -> anyhow::Result<()> {
    let settings = load_settings()?;

    let engine_state = bastion_engine::EngineState::init(&settings).await?;
    if engine_state.mode == DeployMode::EvaluationOnly {
        bastion_engine::spawn_watcher(engine_state.store.clone(), settings.policy_reload_secs);
    }
    let engine_app = bastion_engine::router(engine_state);
    let engine_listener = tokio::net::TcpListener::bind(("0.0.0.0", settings.engine_port)).await?;
    tracing::info!(port = settings.engine_port, "policy engine listening");

    let gateway_port = settings.port;
    let gateway_state = bastion_gateway::AppState::init(settings).await?;
    let gateway_app = bastion_gateway::router(gateway_state);
    let gateway_listener = tokio::net::TcpListener::bind(("0.0.0.0", gateway_port)).await?;
    tracing::info!(port = gateway_port, "gateway listening");

    tokio::try_join!(
        axum::serve(engine_listener, engine_app).into_future(),
        axum::serve(gateway_listener, gateway_app).into_future(),
    )?;
    Ok(())
}

async fn check() -> anyhow::Result<()> {
    let settings = load_settings()?;
    println!("settings: ok (gateway :{}, engine :{})", settings.port, settings.engine_port);

    bastion_gateway::registry::ServerRegistry::open(&settings.servers_file)
        .map(|_| println!("servers file: ok ({})", settings.servers_file.display()))
        .map_err(|e| anyhow::anyhow!("servers file: {e}"))?;

    bastion_gateway::groups::GroupRegistry::open(&settings.groups_file)
        .map(|_| println!("groups file: ok ({})", settings.groups_file.display()))
        .map_err(|e| anyhow::anyhow!("groups file: {e}"))?;

    if settings.policy_dir.exists() {
        let store = bastion_policy::PolicyStore::open(&settings.policy_dir, true)
            .await
            .map_err(|e| anyhow::anyhow!("policy dir: {e}"))?;
        let count = store.list(&bastion_policy::PolicyFilter::default()).await.len();
        println!("policy dir: ok ({count} policies)");
    } else {
        println!(
            "policy dir: missing ({}); it will be created on first engine start",
            settings.policy_dir.display()
        );
    }

    Ok(())
}
