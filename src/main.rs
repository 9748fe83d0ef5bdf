//! WolfSync - Content Replication Manager
//!
//! Keeps user content replicated across a fleet of storage nodes by
//! comparing logical clocks between each user's primary and secondaries
//! and issuing sync requests where secondaries have fallen behind.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wolfsync::api::{AppState, HttpServer};
use wolfsync::config::{LoggingConfig, WolfSyncConfig};
use wolfsync::error::Result;
use wolfsync::network::{
    DiscoveryClient, HttpDiscoveryClient, HttpPeerClient, HttpRegistryClient, PeerClient,
};
use wolfsync::queue::{QueueName, WorkerPool};
use wolfsync::replication::{
    seed_cycle_queue, ClockComparator, CycleHandler, CycleOrchestrator, IdentityResolver,
    ShardSelector, SyncDispatcher, SyncJobHandler, SyncMonitor,
};
use wolfsync::state::{ClockStore, StateStore};

/// WolfSync - Content Replication Manager
#[derive(Parser)]
#[command(name = "wolfsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "wolfsync.toml")]
    config: PathBuf,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the WolfSync node
    Start,

    /// Check node status
    Status {
        /// Node address to query
        #[arg(short, long, default_value = "localhost:8080")]
        address: String,
    },

    /// Trigger a manual sync for one user to one secondary
    Sync {
        /// Node address to query
        #[arg(short, long, default_value = "localhost:8080")]
        address: String,

        /// Wallet of the user to sync
        #[arg(long)]
        wallet: String,

        /// Secondary endpoint that should receive the user's content
        #[arg(long)]
        secondary: String,
    },

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "wolfsync.toml")]
        output: PathBuf,

        /// This node's public endpoint
        #[arg(long, default_value = "https://cn1.example.com")]
        endpoint: String,
    },

    /// Validate configuration file
    Validate,

    /// Show node information
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start => run_start(cli.config, cli.log_level).await,
        Commands::Status { address } => {
            init_logging(&LoggingConfig::default(), cli.log_level);
            run_status(address).await
        }
        Commands::Sync {
            address,
            wallet,
            secondary,
        } => {
            init_logging(&LoggingConfig::default(), cli.log_level);
            run_sync(address, wallet, secondary).await
        }
        Commands::Init { output, endpoint } => run_init(output, endpoint),
        Commands::Validate => run_validate(cli.config),
        Commands::Info => run_info(cli.config),
    }
}

/// Initialize logging
fn init_logging(config: &LoggingConfig, override_level: Option<String>) {
    let level = override_level.unwrap_or_else(|| config.level.clone());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);

    match (&config.file, config.format.as_str()) {
        (Some(path), _) => {
            match std::fs::OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => registry
                    .with(
                        tracing_subscriber::fmt::layer()
                            .with_ansi(false)
                            .with_writer(Arc::new(file)),
                    )
                    .init(),
                Err(e) => {
                    registry.with(tracing_subscriber::fmt::layer()).init();
                    tracing::warn!("Failed to open log file {:?}: {}; logging to stderr", path, e);
                }
            }
        }
        (None, "json") => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        (None, _) => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Start the WolfSync node
async fn run_start(config_path: PathBuf, log_level: Option<String>) -> Result<()> {
    // Load configuration before logging is up; config errors go to stderr
    let config = match WolfSyncConfig::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration from {:?}: {}", config_path, e);
            eprintln!("Please check that the config file exists and is valid TOML");
            return Err(e);
        }
    };

    init_logging(&config.logging, log_level);
    tracing::info!("Starting WolfSync node {}", config.node.endpoint);

    // Ensure directories exist
    if let Err(e) = std::fs::create_dir_all(config.data_dir()) {
        tracing::error!("Failed to create data directory {:?}: {}", config.data_dir(), e);
        return Err(e.into());
    }

    // Open durable state (node state, user clocks, job queues)
    let store = match StateStore::open(config.state_dir()) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            tracing::error!("Failed to open state store: {}", e);
            return Err(e);
        }
    };

    // Jobs left active by a previous crash go back to pending
    let recovered = store.recover_orphans().await?;
    if recovered > 0 {
        tracing::info!("Recovered {} orphaned jobs back to pending", recovered);
    }

    // HTTP clients for the registry, discovery providers and peer nodes
    let registry = Arc::new(HttpRegistryClient::new(
        config.registry.endpoint.clone(),
        config.request_timeout(),
    )?);
    let discovery: Arc<dyn DiscoveryClient> = Arc::new(HttpDiscoveryClient::new(
        config.discovery.providers.clone(),
        config.request_timeout(),
    )?);
    let peers: Arc<dyn PeerClient> = Arc::new(HttpPeerClient::new(config.request_timeout())?);

    let identity = Arc::new(IdentityResolver::new(
        registry,
        config.node.endpoint.clone(),
        config.node.service_provider_id,
    ));
    let dispatcher = SyncDispatcher::new(Arc::clone(&store), config.node.endpoint.clone());

    let shutdown = CancellationToken::new();
    let mut tasks = Vec::new();

    if config.replication.enabled {
        let shard = ShardSelector::new(Arc::clone(&discovery), config.replication.modulo_base);
        let clocks: Arc<dyn ClockStore> = Arc::clone(&store) as Arc<dyn ClockStore>;
        let comparator = ClockComparator::new(Arc::clone(&peers), clocks);
        let orchestrator = Arc::new(CycleOrchestrator::new(
            Arc::clone(&identity),
            shard,
            comparator,
            dispatcher.clone(),
            Arc::clone(&store),
            config.node.endpoint.clone(),
            config.replication.modulo_base,
        ));

        // Any cycle jobs from a previous run are stale; start a fresh chain
        seed_cycle_queue(&store).await?;
        tracing::info!(
            "Replication cycle chain seeded (delay {:?}, modulo base {})",
            config.cycle_delay(),
            config.replication.modulo_base
        );

        let monitor = SyncMonitor::new(
            Arc::clone(&peers),
            config.max_monitoring_duration(),
            config.monitoring_retry_delay(),
        );
        let cycle_handler = Arc::new(CycleHandler::new(
            Arc::clone(&orchestrator),
            Arc::clone(&store),
            config.cycle_delay(),
            shutdown.clone(),
        ));
        let sync_handler = Arc::new(SyncJobHandler::new(
            Arc::clone(&peers),
            monitor,
            shutdown.clone(),
        ));

        // One cycle at a time; sync jobs fan out up to the configured cap
        let cycle_pool = WorkerPool::new(
            Arc::clone(&store),
            QueueName::Cycle,
            1,
            Duration::from_millis(500),
        );
        let sync_pool = WorkerPool::new(
            Arc::clone(&store),
            QueueName::Sync,
            config.replication.max_parallel_sync_jobs,
            Duration::from_millis(500),
        );

        let cycle_shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            cycle_pool.run(cycle_handler, cycle_shutdown).await;
        }));
        let sync_shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            sync_pool.run(sync_handler, sync_shutdown).await;
        }));
    } else {
        tracing::warn!("Replication is disabled; running HTTP API only");
    }

    // HTTP API
    let app_state = Arc::new(AppState {
        endpoint: config.node.endpoint.clone(),
        replication_enabled: config.replication.enabled,
        dev_mode: config.replication.dev_mode,
        modulo_base: config.replication.modulo_base,
        store: Arc::clone(&store),
        identity: Arc::clone(&identity),
        discovery: Arc::clone(&discovery),
        dispatcher,
        started_at: std::time::Instant::now(),
    });
    let http_server = HttpServer::new(config.api.clone(), app_state);
    let http_shutdown = shutdown.clone();
    tasks.push(tokio::spawn(async move {
        if let Err(e) = http_server.start(http_shutdown).await {
            tracing::error!("HTTP server error: {}", e);
        }
    }));

    // Run until interrupted, then drain workers
    tokio::signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal");
    shutdown.cancel();

    for task in tasks {
        let _ = task.await;
    }

    tracing::info!("WolfSync shutdown complete");
    Ok(())
}

/// Check node status over HTTP
async fn run_status(address: String) -> Result<()> {
    let url = format!("http://{}/status", address);

    match reqwest::get(&url).await {
        Ok(response) => {
            let status: serde_json::Value = response
                .json()
                .await
                .map_err(|e| wolfsync::error::Error::Network(e.to_string()))?;
            println!("{}", serde_json::to_string_pretty(&status).unwrap_or_default());
            Ok(())
        }
        Err(e) => {
            eprintln!("Failed to get status: {}", e);
            Err(wolfsync::error::Error::Network(e.to_string()))
        }
    }
}

/// Trigger a manual sync over HTTP
async fn run_sync(address: String, wallet: String, secondary: String) -> Result<()> {
    let url = format!("http://{}/manual_sync", address);
    let body = serde_json::json!({
        "wallet": wallet,
        "secondary_endpoint": secondary,
    });

    let client = reqwest::Client::new();
    match client.post(&url).json(&body).send().await {
        Ok(response) => {
            let status = response.status();
            let reply: serde_json::Value = response
                .json()
                .await
                .map_err(|e| wolfsync::error::Error::Network(e.to_string()))?;
            if status.is_success() {
                println!("Manual sync enqueued:");
            } else {
                eprintln!("Manual sync rejected ({}):", status);
            }
            println!("{}", serde_json::to_string_pretty(&reply).unwrap_or_default());
            Ok(())
        }
        Err(e) => {
            eprintln!("Failed to request sync: {}", e);
            Err(wolfsync::error::Error::Network(e.to_string()))
        }
    }
}

/// Initialize configuration file
fn run_init(output: PathBuf, endpoint: String) -> Result<()> {
    let config_content = format!(
        r#"# WolfSync Configuration
# Generated configuration file

[node]
endpoint = "{endpoint}"
data_dir = "/var/lib/wolfsync"
# Known service provider id; 0 means resolve from the registry at runtime
service_provider_id = 0

[registry]
endpoint = "https://registry.example.com"

[discovery]
providers = ["https://dp1.example.com", "https://dp2.example.com"]

[replication]
enabled = true
modulo_base = 24
max_parallel_sync_jobs = 10
max_monitoring_duration_ms = 360000
monitoring_retry_delay_ms = 15000
cycle_delay_ms = 3600000
# dev_mode shortens the cycle delay to dev_cycle_delay_ms
dev_mode = false
dev_cycle_delay_ms = 3000
request_timeout_secs = 30

[api]
enabled = true
bind_address = "0.0.0.0:8080"
cors_enabled = false

[logging]
level = "info"
format = "pretty"
# file = "/var/log/wolfsync/wolfsync.log"
"#
    );

    std::fs::write(&output, config_content)?;
    println!("Configuration file created: {}", output.display());
    println!("\nEdit the file to set your registry and discovery providers.");
    println!("Then start with: wolfsync start --config {}", output.display());

    Ok(())
}

/// Validate configuration
fn run_validate(config_path: PathBuf) -> Result<()> {
    match WolfSyncConfig::from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Endpoint:       {}", config.node.endpoint);
            println!("  Registry:       {}", config.registry.endpoint);
            println!("  Providers:      {}", config.discovery.providers.len());
            println!("  Modulo Base:    {}", config.replication.modulo_base);
            println!("  Parallel Syncs: {}", config.replication.max_parallel_sync_jobs);
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}

/// Show node information
fn run_info(config_path: PathBuf) -> Result<()> {
    let config = WolfSyncConfig::from_file(&config_path)?;

    println!("WolfSync Node Information");
    println!("=========================");
    println!();
    println!("Endpoint:         {}", config.node.endpoint);
    println!("Data Directory:   {}", config.data_dir().display());
    println!("Provider ID:      {}", if config.node.service_provider_id == 0 {
        "(resolve from registry)".to_string()
    } else {
        config.node.service_provider_id.to_string()
    });
    println!();
    println!("Registry:         {}", config.registry.endpoint);
    println!("Discovery:        {:?}", config.discovery.providers);
    println!();
    println!("Replication Configuration:");
    println!("  Enabled:        {}", config.replication.enabled);
    println!("  Modulo Base:    {}", config.replication.modulo_base);
    println!("  Parallel Syncs: {}", config.replication.max_parallel_sync_jobs);
    println!("  Cycle Delay:    {:?}", config.cycle_delay());
    println!("  Monitoring:     {:?} cap, {:?} poll interval",
        config.max_monitoring_duration(),
        config.monitoring_retry_delay());
    println!();
    println!("API Configuration:");
    println!("  Enabled:        {}", config.api.enabled);
    println!("  Bind Address:   {}", config.api.bind_address);

    Ok(())
}
