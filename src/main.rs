use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use twitch_snapshot::config::{load_config, SecretBackend, SnapshotterConfig};
use twitch_snapshot::credentials::{
    CredentialSource, SecretStore, SecretsManagerSource, MASTER_KEY_ENV,
};
use twitch_snapshot::orchestrator::{
    InvocationResponse, Orchestrator, RunSettings, SnapshotScheduler,
};
use twitch_snapshot::snapshot::ObjectStoreSink;

#[derive(Parser)]
#[command(name = "twitch-snapshot")]
#[command(about = "Capture Twitch live streams as Parquet snapshots")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true, env = "SNAPSHOT_CONFIG")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Capture one snapshot and print the invocation response
    Run,
    /// Capture snapshots on a fixed interval until interrupted
    Schedule {
        #[arg(long)]
        interval_secs: Option<u64>,
    },
    /// Manage the encrypted secret store
    Secrets {
        #[command(subcommand)]
        command: SecretsCommand,
    },
}

#[derive(Subcommand)]
enum SecretsCommand {
    /// Store a secret, reading its JSON payload from stdin
    Put { name: String },
    List,
    Delete { name: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "twitch_snapshot=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{:#}", e), "twitch-snapshot failed");
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(cli: Cli) -> Result<ExitCode> {
    let config = resolve_config(cli.config.as_deref())?;

    match cli.command {
        Command::Run => Ok(run(&config).await),
        Command::Schedule { interval_secs } => {
            let interval = interval_secs.unwrap_or(config.schedule.interval_secs);
            schedule(&config, interval).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Secrets { command } => {
            secrets(&config, command)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn resolve_config(path: Option<&std::path::Path>) -> Result<SnapshotterConfig> {
    let mut config = match path {
        Some(path) => load_config(path)?,
        None => SnapshotterConfig::default(),
    };
    config.apply_env_overrides(|key| std::env::var(key).ok());
    Ok(config)
}

fn open_secret_store(config: &SnapshotterConfig) -> Result<SecretStore> {
    let key = std::env::var(MASTER_KEY_ENV)
        .with_context(|| format!("{} must be set to a base64 32-byte key", MASTER_KEY_ENV))?;
    SecretStore::new(&config.secrets.database, &key)
}

async fn credential_source(config: &SnapshotterConfig) -> Result<Arc<dyn CredentialSource>> {
    Ok(match config.secrets.backend {
        SecretBackend::Sqlite => Arc::new(open_secret_store(config)?),
        SecretBackend::Aws => Arc::new(
            SecretsManagerSource::connect(
                &config.storage.region,
                config.secrets.endpoint.as_deref(),
                config.storage.access_key_id.as_deref(),
                config.storage.secret_access_key.as_deref(),
            )
            .await,
        ),
    })
}

async fn build_orchestrator(config: &SnapshotterConfig) -> Result<Orchestrator> {
    config.validate()?;
    let settings = RunSettings::from_config(config)?;
    let credentials = credential_source(config).await?;
    let sink = Arc::new(ObjectStoreSink::from_config(&config.storage)?);
    Ok(Orchestrator::new(settings, credentials, sink))
}

async fn run(config: &SnapshotterConfig) -> ExitCode {
    let response = match build_orchestrator(config).await {
        Ok(orchestrator) => {
            orchestrator
                .handle(&serde_json::Value::Null, &serde_json::Value::Null)
                .await
        }
        Err(e) => {
            error!(error = %format!("{:#}", e), "Failed to set up snapshot run");
            InvocationResponse::failure()
        }
    };

    match serde_json::to_string(&response) {
        Ok(json) => println!("{}", json),
        Err(e) => error!(error = %e, "Failed to render response"),
    }

    if response.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn schedule(config: &SnapshotterConfig, interval_secs: u64) -> Result<()> {
    if interval_secs == 0 {
        anyhow::bail!("--interval-secs must be greater than zero");
    }
    let orchestrator = Arc::new(build_orchestrator(config).await?);
    let handle = SnapshotScheduler::new(orchestrator, Duration::from_secs(interval_secs)).start();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutting down snapshot scheduler");
    handle.abort();
    Ok(())
}

/// Manages the local SQLite store. Secrets Manager secrets are managed with
/// AWS tooling.
fn secrets(config: &SnapshotterConfig, command: SecretsCommand) -> Result<()> {
    let store = open_secret_store(config)?;

    match command {
        SecretsCommand::Put { name } => {
            let mut payload = String::new();
            std::io::stdin()
                .read_to_string(&mut payload)
                .context("Failed to read secret from stdin")?;
            store.put(&name, payload.trim())?;
            info!(secret = %name, "Secret stored");
        }
        SecretsCommand::List => {
            for name in store.list()? {
                println!("{}", name);
            }
        }
        SecretsCommand::Delete { name } => {
            if store.delete(&name)? {
                info!(secret = %name, "Secret deleted");
            } else {
                anyhow::bail!("Secret {} not found", name);
            }
        }
    }
    Ok(())
}
