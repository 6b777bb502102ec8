//! cert-updater - Main entry point
//!
//! Issues or renews one certificate per invocation, with certbot state kept
//! in object storage between runs.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use cert_updater::store::ObjectStore;
use cert_updater::{
    CertbotClient, FileStore, MemoryPublisher, Publisher, RunOutcome, StateArchive, Updater,
};
use cert_updater_config::{StoreLocation, UpdaterConfig};

/// cert-updater - certbot with state persisted in object storage
#[derive(Parser, Debug)]
#[command(name = "cert-updater")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging (debug level)
    #[arg(long = "verbose", global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long = "json-logs", global = true, env = "UPDATER_JSON_LOGS")]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Issue or renew the certificate (default)
    Run {
        /// JSON event document layered over the environment
        #[arg(short = 'e', long = "event")]
        event: Option<PathBuf>,
    },
    /// Validate and print the resolved configuration
    Check {
        #[arg(short = 'e', long = "event")]
        event: Option<PathBuf>,
    },
    /// Print the stored manifest summary
    Status {
        #[arg(short = 'e', long = "event")]
        event: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Run { event: None });

    let event = match &command {
        Commands::Run { event } | Commands::Check { event } | Commands::Status { event } => {
            event.as_deref()
        }
    };
    let config = load_config(event)?;
    init_logging(&config.log_level, cli.verbose, cli.json_logs);

    match command {
        Commands::Run { .. } => run(config),
        Commands::Check { .. } => check(&config),
        Commands::Status { .. } => status(config),
    }
}

fn load_config(event: Option<&Path>) -> Result<UpdaterConfig> {
    let event = match event {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Failed to read event file {}", path.display()))?;
            let value: serde_json::Value = serde_json::from_str(&text)
                .with_context(|| format!("Event file {} is not valid JSON", path.display()))?;
            Some(value)
        }
        None => None,
    };
    UpdaterConfig::load(event).context("Failed to load configuration")
}

fn init_logging(level: &str, verbose: bool, json: bool) {
    let default_level = if verbose { "debug" } else { level };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")
}

/// Run one issuance or renewal
fn run(config: UpdaterConfig) -> Result<()> {
    config.validate().context("Configuration validation failed")?;

    runtime()?.block_on(async {
        let store = build_store(&config).await?;
        let publisher = build_publisher(&config).await?;
        let client = Arc::new(CertbotClient::from_config(&config));
        let updater = Updater::from_config(&config, store, publisher, client);

        let outcome = updater.run().await.context("Certificate update failed")?;
        match &outcome {
            RunOutcome::Skipped => info!("Finished: nothing configured"),
            RunOutcome::NotDue => info!("Finished: certificate not due"),
            RunOutcome::Issued(manifest) | RunOutcome::Renewed(manifest) => info!(
                key = %updater.archive().manifest_key(&manifest.cert_name),
                timestamp = %manifest.timestamp,
                "Finished: manifest updated"
            ),
        }
        Ok::<_, anyhow::Error>(())
    })
}

/// Validate and print the resolved configuration
fn check(config: &UpdaterConfig) -> Result<()> {
    config.validate().context("Configuration validation failed")?;

    if config.identity.is_empty() {
        println!("cert-updater: no domains configured, a run would do nothing");
        return Ok(());
    }

    println!("cert-updater: configuration is valid");
    println!("  cert name:         {}", config.identity.cert_name());
    println!("  domains:           {}", config.identity.domains().join(", "));
    println!("  email:             {}", config.email);
    println!("  store:             {}", config.store);
    println!("  bucket:            {}", config.bucket);
    println!("  prefix:            {}", config.prefix);
    println!("  environment:       {}", config.environment);
    println!("  acme server:       {}", config.acme_server);
    println!(
        "  notification:      {}",
        config.notification.as_deref().unwrap_or("(disabled)")
    );
    println!("  certbot:           {}", config.certbot.display());
    println!("  dns plugin:        {}", config.dns_plugin);
    println!("  issuance fallback: {}", config.issuance_fallback);
    Ok(())
}

/// Print what the store holds for the configured certificate
fn status(config: UpdaterConfig) -> Result<()> {
    config.validate().context("Configuration validation failed")?;
    anyhow::ensure!(!config.identity.is_empty(), "No domains configured");

    runtime()?.block_on(async {
        let store = build_store(&config).await?;
        let archive = StateArchive::new(store, &config.prefix);
        let cert_name = config.identity.cert_name();
        let key = archive.manifest_key(cert_name);

        match archive.load(cert_name).await {
            Ok(manifest) => {
                let generations = archive.generations(cert_name).await?;
                println!("cert-updater: {cert_name}");
                println!("  manifest:    {key}");
                println!("  timestamp:   {}", manifest.timestamp);
                println!("  domains:     {}", manifest.domains.join(", "));
                println!("  cert:        {}", manifest.cert.cert);
                println!("  chain:       {}", manifest.cert.chain);
                println!("  fullchain:   {}", manifest.cert.fullchain);
                println!("  privkey:     {}", manifest.cert.privkey);
                println!("  generations: {}", generations.len());
            }
            Err(err) if err.is_not_found() => {
                println!("cert-updater: {cert_name} not initialized (no object at {key})");
            }
            Err(err) => return Err(err).context("Failed to read manifest"),
        }
        Ok::<_, anyhow::Error>(())
    })
}

async fn build_store(config: &UpdaterConfig) -> Result<Arc<dyn ObjectStore>> {
    match &config.store {
        StoreLocation::File(dir) => {
            info!(root = %dir.display(), "Using local directory store");
            Ok(Arc::new(FileStore::new(dir)))
        }
        #[cfg(feature = "aws")]
        StoreLocation::S3 => Ok(Arc::new(
            cert_updater::store::S3Store::from_env(&config.bucket).await,
        )),
        #[cfg(not(feature = "aws"))]
        StoreLocation::S3 => anyhow::bail!("S3 storage requires the `aws` feature"),
    }
}

async fn build_publisher(config: &UpdaterConfig) -> Result<Arc<dyn Publisher>> {
    match &config.notification {
        None => Ok(Arc::new(MemoryPublisher::new())),
        #[cfg(feature = "aws")]
        Some(_) => Ok(Arc::new(cert_updater::notify::SnsPublisher::from_env().await)),
        #[cfg(not(feature = "aws"))]
        Some(topic) => anyhow::bail!("Publishing to {topic} requires the `aws` feature"),
    }
}
