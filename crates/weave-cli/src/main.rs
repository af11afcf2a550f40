use std::sync::Arc;

use clap::{Parser, Subcommand};

use weave_core::config::Config;
use weave_gateway::{AppState, EventHub};
use weave_store::ArtifactStore;
use weave_sync::{HttpRemote, JsonlThreadStore, RemoteApi, SyncReconciler};

#[derive(Parser)]
#[command(
    name = "weave",
    about = "Canvas artifact backend — caches, streams, and syncs agent-generated artifacts",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the event gateway server
    Serve {
        /// Port to listen on (default: 18790)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Show effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    // Load config
    let config_path = cli
        .config
        .map(std::path::PathBuf::from)
        .unwrap_or_else(Config::config_path);
    let config = Config::load(&config_path)?;

    match cli.command {
        Commands::Serve { port } => {
            let port = port.unwrap_or_else(|| config.gateway_port());

            let store = Arc::new(ArtifactStore::new(config.artifact_ttl()));
            store.spawn_sweeper(config.sweep_interval());

            let remote: Option<Arc<dyn RemoteApi>> = config
                .remote_base_url()
                .map(|url| Arc::new(HttpRemote::new(url)) as Arc<dyn RemoteApi>);
            let local = Arc::new(JsonlThreadStore::new(config.sync_data_dir()));
            let sync = Arc::new(SyncReconciler::new(local, remote));

            let state = Arc::new(AppState {
                store,
                hub: Arc::new(EventHub::new()),
                sync,
            });
            tracing::info!(port, "Starting weave gateway");
            weave_gateway::start_gateway(state, &config.gateway_bind(), port).await?;
        }
        Commands::Config => {
            println!("Config: {}", config_path.display());
            println!("Artifact TTL: {:?}", config.artifact_ttl());
            println!("Sweep interval: {:?}", config.sweep_interval());
            println!("Gateway: {}:{}", config.gateway_bind(), config.gateway_port());
            println!(
                "Remote sync: {}",
                config.remote_base_url().unwrap_or_else(|| "local-only".into())
            );
            println!("Sync data dir: {}", config.sync_data_dir().display());
        }
    }

    Ok(())
}
