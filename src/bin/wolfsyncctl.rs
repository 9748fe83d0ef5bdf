//! WolfSyncCtl - Command line tool for managing WolfSync nodes
//!
//! Usage:
//!   wolfsyncctl status         - Show node status
//!   wolfsyncctl queue          - Show the sync queue
//!   wolfsyncctl sync ...       - Trigger a manual sync
//!   wolfsyncctl check-config   - Check configuration file for errors
//!   wolfsyncctl watch          - Live queue view (Ctrl+C to exit)

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::PathBuf;

/// WolfSync Node Control Tool
#[derive(Parser)]
#[command(name = "wolfsyncctl")]
#[command(about = "Control and monitor WolfSync nodes", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "/etc/wolfsync/config.toml")]
    config: PathBuf,

    /// API endpoint to connect to (overrides config)
    #[arg(short, long)]
    endpoint: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show status of the local node
    Status,
    /// Show pending and active sync jobs
    Queue,
    /// Trigger a manual sync for one user to one secondary
    Sync {
        /// Wallet of the user to sync
        #[arg(long)]
        wallet: String,
        /// Secondary endpoint that should receive the user's content
        #[arg(long)]
        secondary: String,
    },
    /// Check configuration file for errors
    CheckConfig {
        /// Path to config file to check (defaults to --config path)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Live queue view (updates every 2 seconds, Ctrl+C to exit)
    Watch,
}

// ============ API Response Types ============

#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(default)]
    endpoint: String,
    #[serde(default)]
    service_provider_id: Option<u64>,
    #[serde(default)]
    discovery_provider: Option<String>,
    #[serde(default)]
    replication_enabled: bool,
    #[serde(default)]
    dev_mode: bool,
    #[serde(default)]
    modulo_base: u64,
    #[serde(default)]
    current_slice: Option<u64>,
    #[serde(default)]
    cycle_started_at: Option<String>,
    #[serde(default)]
    cycle_queue: QueueCounts,
    #[serde(default)]
    sync_queue: QueueCounts,
    #[serde(default)]
    uptime_seconds: u64,
}

#[derive(Debug, Deserialize, Default)]
struct QueueCounts {
    #[serde(default)]
    pending: u64,
    #[serde(default)]
    active: u64,
}

#[derive(Debug, Deserialize)]
struct QueueResponse {
    #[serde(default)]
    pending: Vec<JobView>,
    #[serde(default)]
    active: Vec<JobView>,
}

#[allow(dead_code)]
#[derive(Debug, Deserialize)]
struct JobView {
    #[serde(default)]
    id: i64,
    #[serde(default)]
    priority: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    enqueued_at: String,
    sync: Option<SyncInfo>,
}

#[allow(dead_code)]
#[derive(Debug, Deserialize)]
struct SyncInfo {
    #[serde(default)]
    user_wallet: String,
    #[serde(default)]
    primary_endpoint: String,
    #[serde(default)]
    secondary_endpoint: String,
    #[serde(default)]
    primary_clock_snapshot: u64,
    #[serde(default)]
    sync_type: String,
}

#[derive(Debug, Deserialize)]
struct ManualSyncResponse {
    #[serde(default)]
    job_id: i64,
    #[serde(default)]
    priority: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    error: String,
    #[serde(default)]
    code: String,
}

// ============ Config ============

#[derive(Debug, Deserialize, Default)]
struct Config {
    #[serde(default)]
    api: ApiConfig,
}

#[derive(Debug, Deserialize)]
struct ApiConfig {
    #[serde(default = "default_api_bind")]
    bind_address: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_api_bind(),
        }
    }
}

fn default_api_bind() -> String {
    "0.0.0.0:8080".to_string()
}

/// Resolve the API endpoint: an explicit --endpoint wins, then the bind
/// address from the config file, then localhost:8080. A wildcard bind is
/// rewritten to loopback since we are talking to the local daemon.
fn api_endpoint(cli: &Cli) -> String {
    if let Some(endpoint) = &cli.endpoint {
        return endpoint.clone();
    }

    let addr = std::fs::read_to_string(&cli.config)
        .ok()
        .and_then(|content| toml::from_str::<Config>(&content).ok())
        .map(|config| config.api.bind_address)
        .unwrap_or_else(default_api_bind);

    match addr.strip_prefix("0.0.0.0:") {
        Some(port) => format!("http://127.0.0.1:{}", port),
        None => format!("http://{}", addr),
    }
}

// ============ Main ============

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let endpoint = api_endpoint(&cli);

    let result = match &cli.command {
        Commands::Status => show_status(&endpoint).await,
        Commands::Queue => show_queue(&endpoint).await,
        Commands::Sync { wallet, secondary } => trigger_sync(&endpoint, wallet, secondary).await,
        Commands::CheckConfig { file } => {
            let config_path = file.clone().unwrap_or_else(|| cli.config.clone());
            check_config(&config_path)
        }
        Commands::Watch => watch(&endpoint).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

// ============ Commands ============

async fn show_status(endpoint: &str) -> anyhow::Result<()> {
    let status = fetch_status(endpoint).await?;

    println!();
    println!("Node Status");
    println!("===========");
    println!();
    println!("Endpoint:      {}", status.endpoint);
    match status.service_provider_id {
        Some(id) => println!("Provider ID:   {}", id),
        None => println!("Provider ID:   \x1b[33munresolved\x1b[0m"),
    }
    match &status.discovery_provider {
        Some(dp) => println!("Discovery:     {}", dp),
        None => println!("Discovery:     \x1b[33mnone selected\x1b[0m"),
    }
    if status.replication_enabled {
        println!("Replication:   \x1b[32mENABLED\x1b[0m");
    } else {
        println!("Replication:   \x1b[31mDISABLED\x1b[0m");
    }
    println!(
        "Mode:          {}",
        if status.dev_mode { "development" } else { "production" }
    );
    match status.current_slice {
        Some(slice) => println!("Cycle Slice:   {} / {}", slice, status.modulo_base),
        None => println!("Cycle Slice:   not yet assigned"),
    }
    if let Some(started) = &status.cycle_started_at {
        println!("Cycle Started: {}", started);
    }
    println!(
        "Cycle Queue:   {} pending, {} active",
        status.cycle_queue.pending, status.cycle_queue.active
    );
    println!(
        "Sync Queue:    {} pending, {} active",
        status.sync_queue.pending, status.sync_queue.active
    );
    println!("Uptime:        {}", format_duration_secs(status.uptime_seconds));
    println!();

    Ok(())
}

async fn show_queue(endpoint: &str) -> anyhow::Result<()> {
    let url = format!("{}/queue", endpoint);
    let client = reqwest::Client::new();

    let response = client.get(&url).send().await?;
    if !response.status().is_success() {
        bail!("API error: {}", response.status());
    }

    let queue: QueueResponse = response.json().await?;

    println!();
    println!(
        "WolfSync Queue (wolfsyncctl v{})",
        env!("CARGO_PKG_VERSION")
    );
    println!("========================================");
    println!();
    println!(
        "Pending: {}  |  Active: {}",
        queue.pending.len(),
        queue.active.len()
    );
    println!();

    // Print table header
    println!(
        "{:<8} {:<10} {:<10} {:<44} {:<36}",
        "JOB ID", "PRIORITY", "STATE", "WALLET", "SECONDARY"
    );
    println!("{}", "-".repeat(110));

    for job in queue.active.iter().chain(queue.pending.iter()) {
        // Pad state to fixed width BEFORE adding color codes
        let state_padded = format!("{:<10}", job.state);
        let state_colored = match job.state.as_str() {
            "active" => format!("\x1b[32m{}\x1b[0m", state_padded), // Green
            "pending" => format!("\x1b[33m{}\x1b[0m", state_padded), // Yellow
            _ => state_padded,
        };

        // Pad priority to fixed width BEFORE adding color codes
        let priority_padded = format!("{:<10}", job.priority);
        let priority_colored = match job.priority.as_str() {
            "HIGH" => format!("\x1b[1;34m{}\x1b[0m", priority_padded), // Bold Blue
            _ => priority_padded,
        };

        let (wallet, secondary) = match &job.sync {
            Some(sync) => (sync.user_wallet.as_str(), sync.secondary_endpoint.as_str()),
            None => ("?", "?"),
        };

        println!(
            "{:<8} {} {} {:<44} {:<36}",
            job.id, priority_colored, state_colored, wallet, secondary
        );
    }
    println!();

    Ok(())
}

async fn trigger_sync(endpoint: &str, wallet: &str, secondary: &str) -> anyhow::Result<()> {
    let url = format!("{}/manual_sync", endpoint);
    let client = reqwest::Client::new();
    let body = serde_json::json!({
        "wallet": wallet,
        "secondary_endpoint": secondary,
    });

    let response = client.post(&url).json(&body).send().await?;

    if response.status().is_success() {
        let reply: ManualSyncResponse = response.json().await?;
        println!("\x1b[32m✓\x1b[0m Manual sync enqueued");
        println!("  Job ID:   {}", reply.job_id);
        println!("  Priority: {}", reply.priority);
        println!("  Wallet:   {}", wallet);
        println!("  Target:   {}", secondary);
    } else {
        let status = response.status();
        let err: ApiError = response
            .json()
            .await
            .unwrap_or_else(|_| ApiError {
                error: "unknown error".to_string(),
                code: String::new(),
            });
        bail!("Sync rejected ({}): {} [{}]", status, err.error, err.code);
    }

    Ok(())
}

// ============ Config Check ============

/// Full configuration structure for validation
#[allow(dead_code)]
#[derive(Debug, Deserialize)]
struct FullConfig {
    node: Option<NodeSection>,
    registry: Option<RegistrySection>,
    discovery: Option<DiscoverySection>,
    replication: Option<ReplicationSection>,
    api: Option<ApiConfig>,
}

#[allow(dead_code)]
#[derive(Debug, Deserialize)]
struct NodeSection {
    endpoint: Option<String>,
    data_dir: Option<String>,
    service_provider_id: Option<u64>,
}

#[allow(dead_code)]
#[derive(Debug, Deserialize)]
struct RegistrySection {
    endpoint: Option<String>,
}

#[allow(dead_code)]
#[derive(Debug, Deserialize)]
struct DiscoverySection {
    providers: Option<Vec<String>>,
}

#[allow(dead_code)]
#[derive(Debug, Deserialize)]
struct ReplicationSection {
    enabled: Option<bool>,
    modulo_base: Option<u64>,
    max_parallel_sync_jobs: Option<usize>,
    dev_mode: Option<bool>,
}

fn check_config(path: &PathBuf) -> anyhow::Result<()> {
    println!();
    println!("\x1b[1;36m╔══════════════════════════════════════════════════════════════╗\x1b[0m");
    println!("\x1b[1;36m║\x1b[0m             \x1b[1;37mWolfSync Configuration Check\x1b[0m                     \x1b[1;36m║\x1b[0m");
    println!("\x1b[1;36m╚══════════════════════════════════════════════════════════════╝\x1b[0m");
    println!();

    if !path.exists() {
        println!("\x1b[1;31m✗ ERROR:\x1b[0m no config file at {}", path.display());
        return Ok(());
    }
    println!("\x1b[1;32m✓\x1b[0m Config file: {}", path.display());

    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;

    let mut warnings = Vec::new();
    let mut errors = Vec::new();

    // Check for common typos in raw content
    if content.contains("endpont") || content.contains("enpoint") {
        errors.push("Typo detected: misspelled 'endpoint'".to_string());
    }
    if content.contains("\nprovider =") && !content.contains("providers") {
        errors.push("Typo detected: 'provider' should be 'providers' (a list)".to_string());
    }

    let config: FullConfig = match toml::from_str(&content) {
        Ok(config) => config,
        Err(e) => {
            println!("\x1b[1;31m✗ ERROR:\x1b[0m not valid TOML: {}", e);
            return Ok(());
        }
    };
    println!("\x1b[1;32m✓\x1b[0m Config file is valid TOML");

    // Validate [node] section
    if let Some(ref node) = config.node {
        match &node.endpoint {
            Some(endpoint) => {
                if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                    errors.push(format!(
                        "[node] endpoint '{}' must include a scheme (https://...)",
                        endpoint
                    ));
                } else if endpoint.contains("localhost") || endpoint.contains("127.0.0.1") {
                    warnings.push(format!(
                        "[node] endpoint '{}' is localhost - peers cannot reach this node",
                        endpoint
                    ));
                } else {
                    println!("\x1b[1;32m✓\x1b[0m Node endpoint: {}", endpoint);
                }
            }
            None => errors.push("[node] endpoint is required".to_string()),
        }
    } else {
        errors.push("[node] section is missing".to_string());
    }

    // Validate [registry] section
    match config.registry.as_ref().and_then(|r| r.endpoint.as_ref()) {
        Some(registry) => println!("\x1b[1;32m✓\x1b[0m Registry: {}", registry),
        None => errors.push("[registry] endpoint is required".to_string()),
    }

    let replication_enabled = config
        .replication
        .as_ref()
        .and_then(|r| r.enabled)
        .unwrap_or(true);

    // Validate [discovery] section
    match config.discovery.as_ref().and_then(|d| d.providers.as_ref()) {
        Some(providers) if !providers.is_empty() => {
            println!("\x1b[1;32m✓\x1b[0m Discovery providers: {}", providers.len());
            for provider in providers {
                println!("    - {}", provider);
            }
        }
        _ if replication_enabled => {
            errors.push(
                "[discovery] providers must be configured while replication is enabled".to_string(),
            );
        }
        _ => {
            warnings.push("[discovery] providers not configured - replication disabled".to_string());
        }
    }

    // Validate [replication] section
    if let Some(ref replication) = config.replication {
        if replication.modulo_base == Some(0) {
            errors.push("[replication] modulo_base must be at least 1".to_string());
        }
        if replication.max_parallel_sync_jobs == Some(0) {
            errors.push("[replication] max_parallel_sync_jobs must be at least 1".to_string());
        }
        if replication.dev_mode == Some(true) {
            warnings
                .push("[replication] dev_mode is enabled - cycles run every few seconds".to_string());
        }
    }

    println!();
    if !warnings.is_empty() {
        println!("\x1b[1;33m{} warning(s):\x1b[0m", warnings.len());
        for warning in &warnings {
            println!("  \x1b[33m⚠\x1b[0m  {}", warning);
        }
        println!();
    }
    if !errors.is_empty() {
        println!("\x1b[1;31m{} error(s):\x1b[0m", errors.len());
        for error in &errors {
            println!("  \x1b[31m✗\x1b[0m  {}", error);
        }
        println!();
        println!("\x1b[1;31mFix the errors above before starting wolfsync.\x1b[0m");
    } else {
        println!("\x1b[1;32m✓ Configuration looks good\x1b[0m");
    }
    println!();

    Ok(())
}

// ============ Watch ============

async fn watch(endpoint: &str) -> anyhow::Result<()> {
    // Hide cursor
    print!("\x1b[?25l");

    loop {
        // Clear screen and move cursor to top
        print!("\x1b[H\x1b[J");

        println!();
        println!("  \x1b[1;36mWolfSync Live Queue\x1b[0m");
        println!("  {}", "=".repeat(50));
        println!();

        match fetch_status(endpoint).await {
            Ok(status) => {
                let slice_display = status
                    .current_slice
                    .map(|s| format!("{} / {}", s, status.modulo_base))
                    .unwrap_or_else(|| "unassigned".to_string());
                println!("  Node:        {}", status.endpoint);
                println!("  Cycle Slice: {}", slice_display);
                println!(
                    "  Cycle Queue: {} pending, {} active",
                    status.cycle_queue.pending, status.cycle_queue.active
                );
                println!(
                    "  Sync Queue:  \x1b[33m{}\x1b[0m pending, \x1b[32m{}\x1b[0m active",
                    status.sync_queue.pending, status.sync_queue.active
                );
                println!();
                println!("  Uptime:      {}", format_duration_secs(status.uptime_seconds));
            }
            Err(e) => {
                println!("  \x1b[31mConnection Error: {}\x1b[0m", e);
                println!("  Is WolfSync running?");
            }
        }

        println!();
        println!("  \x1b[2mCtrl+C to exit\x1b[0m");

        tokio::select! {
            _ = tokio::time::sleep(std::time::Duration::from_secs(2)) => {}
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    // Show cursor again
    print!("\x1b[?25h");
    println!();
    println!("Watch stopped.");

    Ok(())
}

// ============ Helpers ============

async fn fetch_status(endpoint: &str) -> anyhow::Result<StatusResponse> {
    let url = format!("{}/status", endpoint);
    let client = reqwest::Client::new();

    let response = client.get(&url).send().await?;
    if !response.status().is_success() {
        bail!("API error: {}", response.status());
    }

    Ok(response.json().await?)
}

/// Format seconds as human-readable duration
fn format_duration_secs(secs: u64) -> String {
    match secs {
        0..=59 => format!("{}s", secs),
        60..=3599 => format!("{}m {}s", secs / 60, secs % 60),
        _ => format!("{}h {}m", secs / 3600, (secs % 3600) / 60),
    }
}
