//! Primary Selector - Primary/Secondary Role Client
//!
//! Command line wrapper: configuration scaffolding and validation, plus an
//! in-process failover simulation.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::task::JoinSet;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use primary_selector::config::SelectorConfig;
use primary_selector::election::{ConnectionState, PrimarySelector};
use primary_selector::error::{Error, Result};
use primary_selector::local::{LocalCoordinator, LocalSession};
use primary_selector::state::Role;

/// How long a simulation round waits for a primary to be elected
const ELECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Primary Selector - primary/secondary role client
#[derive(Parser)]
#[command(name = "primary-selector")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "primary-selector.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides [logging] level
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "primary-selector.toml")]
        output: PathBuf,

        /// Address this node binds to (host:port)
        #[arg(long, default_value = "127.0.0.1:19998")]
        bind_address: String,
    },

    /// Validate configuration file
    Validate,

    /// Run several participants against an in-process coordinator and
    /// force a failover every round
    Simulate {
        /// Number of participants
        #[arg(short, long, default_value_t = 3)]
        participants: usize,

        /// Number of failovers to force
        #[arg(short, long, default_value_t = 3)]
        rounds: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let logging = SelectorConfig::from_file(&cli.config)
        .map(|config| config.logging)
        .unwrap_or_default();
    let level = cli.log_level.clone().unwrap_or(logging.level);
    init_logging(&level, &logging.format);

    match cli.command {
        Commands::Init {
            output,
            bind_address,
        } => run_init(output, bind_address),
        Commands::Validate => run_validate(cli.config),
        Commands::Simulate {
            participants,
            rounds,
        } => run_simulate(cli.config, participants, rounds).await,
    }
}

fn init_logging(level: &str, format: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Write a commented default configuration file
fn run_init(output: PathBuf, bind_address: String) -> Result<()> {
    let config_content = format!(
        r#"# Primary Selector Configuration
# Generated configuration file

[node]
bind_address = "{bind_address}"

[election]
election_path = "/election"
leader_path = "/leader"

[coordinator]
address = "localhost:2181"
# address = "zk1:2181,zk2:2181,zk3:2181"

[retry]
base_sleep_ms = 1000
max_retries = 3
max_sleep_ms = 30000

[logging]
level = "info"
format = "pretty"
"#
    );

    // Refuse to write something we could not load back
    SelectorConfig::from_str(&config_content)?;

    std::fs::write(&output, config_content)?;
    println!("Configuration file created: {}", output.display());
    println!("Then validate with: primary-selector --config {} validate", output.display());

    Ok(())
}

/// Validate configuration
fn run_validate(config_path: PathBuf) -> Result<()> {
    let config = match SelectorConfig::from_file(&config_path) {
        Ok(config) => config,
        Err(e) => {
            println!("✗ Configuration is invalid: {}", e);
            return Err(e);
        }
    };

    println!("✓ Configuration is valid");
    println!();
    println!("  Bind Address:   {}", config.node.bind_address);
    println!("  Election Path:  {}", config.election.election_path);
    println!("  Leader Path:    {}", config.election.leader_path);
    println!("  Coordinator:    {}", config.coordinator.address);
    println!(
        "  Retry:          {} x {} ms (max {} ms)",
        config.retry.max_retries, config.retry.base_sleep_ms, config.retry.max_sleep_ms
    );

    Ok(())
}

/// Run an in-process failover simulation
async fn run_simulate(config_path: PathBuf, participants: usize, rounds: usize) -> Result<()> {
    if participants == 0 {
        return Err(Error::Config("at least one participant is required".into()));
    }

    let config = if config_path.exists() {
        SelectorConfig::from_file(&config_path)?
    } else {
        tracing::info!("No configuration at {:?}, using defaults", config_path);
        SelectorConfig::default()
    };

    let (host, base_port) = config
        .node
        .bind_address
        .rsplit_once(':')
        .and_then(|(host, port)| port.parse::<u16>().ok().map(|port| (host, port)))
        .ok_or_else(|| Error::InvalidAddress(config.node.bind_address.clone()))?;

    let coordinator = LocalCoordinator::new();
    let mut selectors = Vec::with_capacity(participants);
    for i in 0..participants {
        let port = u16::try_from(i)
            .ok()
            .and_then(|offset| base_port.checked_add(offset))
            .ok_or_else(|| Error::Config(format!("too many participants for port {}", base_port)))?;

        let selector = Arc::new(PrimarySelector::from_config(&coordinator, &config)?);
        selector.start(&format!("{}:{}", host, port))?;
        selectors.push(selector);
    }
    tracing::info!("Started {} participants", participants);

    let outcome = tokio::select! {
        result = simulate_rounds(&coordinator, &config, &selectors, rounds) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal");
            Ok(())
        }
    };

    // Closing joins the election threads
    let closing = selectors.clone();
    tokio::task::spawn_blocking(move || {
        for selector in &closing {
            if let Err(e) = selector.close() {
                tracing::warn!("Failed to close {:?}: {}", selector.identity(), e);
            }
        }
    })
    .await
    .map_err(|e| Error::Internal(e.to_string()))?;

    outcome
}

async fn simulate_rounds(
    coordinator: &LocalCoordinator,
    config: &SelectorConfig,
    selectors: &[Arc<PrimarySelector<LocalSession>>],
    rounds: usize,
) -> Result<()> {
    let leader_path = match config.election.leader_path.trim_end_matches('/') {
        "" => "/",
        path => path,
    };

    for round in 1..=rounds {
        let primary = tokio::time::timeout(ELECTION_TIMEOUT, wait_for_primary(selectors))
            .await
            .map_err(|_| Error::Internal("no primary elected in time".into()))??;
        let identity = primary.identity().unwrap_or_default().to_string();

        // The marker is published right after promotion
        tokio::time::sleep(Duration::from_millis(50)).await;

        println!("Round {}: {} is {}", round, identity, primary.role());
        println!("  markers:      {:?}", coordinator.children(leader_path)?);
        println!("  participants: {:?}", primary.participants()?);

        let session = primary.session().id();
        coordinator.set_connectivity(session, ConnectionState::Lost);
        println!("  {} lost its session and is now {}", identity, primary.role());
        coordinator.set_connectivity(session, ConnectionState::Reconnected);
    }

    Ok(())
}

/// Resolve with the first selector that becomes primary
async fn wait_for_primary(
    selectors: &[Arc<PrimarySelector<LocalSession>>],
) -> Result<Arc<PrimarySelector<LocalSession>>> {
    let mut waits = JoinSet::new();
    for selector in selectors {
        let selector = selector.clone();
        waits.spawn(async move {
            let reached = selector.wait_for_role_async(Role::Primary).await;
            reached.map(|_| selector)
        });
    }

    let mut last_error = Error::Internal("no participants".into());
    while let Some(joined) = waits.join_next().await {
        match joined {
            Ok(Ok(selector)) => {
                waits.abort_all();
                return Ok(selector);
            }
            Ok(Err(e)) => last_error = e,
            Err(e) => last_error = Error::Internal(e.to_string()),
        }
    }

    Err(last_error)
}
