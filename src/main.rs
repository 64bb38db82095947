mod api;
mod bridge;
mod chain;
mod config;
mod coordinator;
mod db;
mod hash;
mod merkle;
mod metrics;
mod queue;
mod quorum;
mod registry;
mod retry;
mod types;
mod watcher;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use bridge::{DestinationBridge, SourceBridge};
use chain::ChainClient;
use config::Config;
use coordinator::{AttestationLoop, CoordinatorManager, ValidationLoop};
use queue::DurableQueue;
use quorum::{QuorumLedger, ValidatorSet};
use registry::ContractRegistry;
use retry::RetryConfig;
use watcher::ImportWatcher;

#[derive(Parser)]
#[command(name = "bridge-validator", about = "Burn/mint bridge validator", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a sample .env configuration file
    InitConfig {
        /// Destination path for the sample file
        #[arg(long, default_value = ".env")]
        path: PathBuf,
    },
    /// Run the validator
    Launch {
        /// Development mode: verbose logging, no production guardrails
        #[arg(long)]
        dev: bool,
        /// Override the source chain signing credential
        #[arg(long)]
        source_password: Option<String>,
        /// Override the destination chain signing credential
        #[arg(long)]
        dest_password: Option<String>,
    },
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    match cli.command {
        Command::InitConfig { path } => {
            if config::init_sample_env(&path)? {
                println!("Wrote sample configuration to {}", path.display());
            } else {
                println!("{} already exists, leaving it untouched", path.display());
            }
            Ok(())
        }
        Command::Launch {
            dev,
            source_password,
            dest_password,
        } => tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?
            .block_on(launch(dev, source_password, dest_password)),
    }
}

async fn launch(
    dev: bool,
    source_password: Option<String>,
    dest_password: Option<String>,
) -> eyre::Result<()> {
    init_logging(dev);

    tracing::info!("Starting bridge validator");

    let mut config = Config::load()?;
    if let Some(password) = source_password {
        config.source.password = password;
    }
    if let Some(password) = dest_password {
        config.destination.password = password;
    }
    tracing::info!(
        source = %config.source.chain_name,
        destination = %config.destination.chain_name,
        validators = config.validators.len(),
        threshold = config.quorum_threshold,
        "Configuration loaded"
    );

    // Manifests are parsed before anything connects; a broken deployment
    // description must not get as far as the pipeline
    let source_registry = ContractRegistry::from_file(&config.source.manifest_path)?;
    let dest_registry = ContractRegistry::from_file(&config.destination.manifest_path)?;

    let db = db::create_pool(&config.database_url, config.max_db_connections).await?;
    tracing::info!("Database connected");
    db::run_migrations(&db).await?;

    let source_key = signing_key(&config.source.password, dev, &config.source.chain_name)?;
    let dest_key = signing_key(
        &config.destination.password,
        dev,
        &config.destination.chain_name,
    )?;
    if source_key.is_none() || dest_key.is_none() {
        tracing::warn!("Running without signing credentials, votes cannot be submitted");
    }

    let source_client = Arc::new(ChainClient::new(
        config.source.chain_name.clone(),
        &config.source.node_url,
        source_registry,
        source_key,
        config.rpc_call_timeout,
    )?);
    let dest_client = Arc::new(ChainClient::new(
        config.destination.chain_name.clone(),
        &config.destination.node_url,
        dest_registry,
        dest_key,
        config.rpc_call_timeout,
    )?);

    let source_bridge = Arc::new(SourceBridge::new(source_client.clone()));
    let dest_bridge = Arc::new(DestinationBridge::new(dest_client.clone()));

    let work_queue = Arc::new(DurableQueue::new(db.clone(), config.queue_lease));

    let retry = RetryConfig {
        max_attempts: config.retry_attempts,
        ..RetryConfig::default()
    };

    let validator_set = ValidatorSet::new(config.validators.clone(), config.quorum_threshold)?;
    let quorum_ledger = QuorumLedger::new(validator_set);

    let validation = Arc::new(ValidationLoop::new(
        work_queue.clone(),
        source_bridge.clone(),
        dest_bridge.clone(),
        retry.clone(),
        config.destination.confirmation_depth,
        config.source.confirmation_depth,
        config.sync_lag_tolerance,
    ));
    let attestation = Arc::new(AttestationLoop::new(
        work_queue.clone(),
        source_bridge,
        dest_bridge,
        quorum_ledger,
        config.destination.address,
        retry,
    ));
    let coordinator = CoordinatorManager::new(validation, attestation, config.poll_interval);

    let import_watcher = ImportWatcher::new(
        dest_client,
        db.clone(),
        work_queue,
        config.poll_interval,
    )?;

    let (watcher_shutdown_tx, watcher_shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
    let (coordinator_shutdown_tx, coordinator_shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);

    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = watcher_shutdown_tx.send(()).await;
        let _ = coordinator_shutdown_tx.send(()).await;
    });

    let api_addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.api_port));
    let api_db = db.clone();
    tokio::spawn(async move {
        if let Err(e) = api::start_api_server(api_addr, api_db).await {
            tracing::error!(error = %e, "API server error");
        }
    });

    tracing::info!("Pipeline started");

    tokio::join!(
        import_watcher.run(watcher_shutdown_rx),
        coordinator.run(coordinator_shutdown_rx),
    );

    tracing::info!("Bridge validator stopped");
    Ok(())
}

/// Resolve a chain's signing credential. An empty password is allowed in
/// dev mode and yields a signerless, read-only client; in production it is
/// a configuration error caught before anything connects.
fn signing_key<'a>(password: &'a str, dev: bool, chain_name: &str) -> eyre::Result<Option<&'a str>> {
    if !password.is_empty() {
        return Ok(Some(password));
    }
    if dev {
        return Ok(None);
    }
    Err(eyre::eyre!(
        "No signing credential for chain {chain_name}; set its password or launch with --dev"
    ))
}

/// Initialize tracing/logging with structured output
fn init_logging(dev: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let default_filter = if dev {
        "debug"
    } else {
        "info,bridge_validator=debug"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(filter)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signing_key_passes_credential_through() {
        assert_eq!(signing_key("0xabc", false, "src").unwrap(), Some("0xabc"));
        assert_eq!(signing_key("0xabc", true, "src").unwrap(), Some("0xabc"));
    }

    #[test]
    fn test_empty_password_allowed_in_dev() {
        assert_eq!(signing_key("", true, "src").unwrap(), None);
    }

    #[test]
    fn test_empty_password_rejected_in_production() {
        let err = signing_key("", false, "srcnet").unwrap_err();
        assert!(err.to_string().contains("srcnet"));
    }

    // A dev-mode empty password must still produce a working read-only
    // client, not a key-parse failure.
    #[test]
    fn test_dev_empty_password_builds_signerless_client() {
        let registry = ContractRegistry::from_json(
            r#"{"bridge": {"address": "0x1111111111111111111111111111111111111111", "abi": []}}"#,
        )
        .unwrap();
        let key = signing_key("", true, "srcnet").unwrap();
        let client = ChainClient::new(
            "srcnet".to_string(),
            "http://localhost:8545",
            registry,
            key,
            std::time::Duration::from_secs(10),
        )
        .unwrap();
        assert!(client.signer_address().is_none());
    }
}

/// Wait for shutdown signals (SIGINT/SIGTERM)
async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
