//! Polyglot Relay - Concurrent Catalog Translation
//!
//! Command line entry point: loads configuration, wires the translation
//! client and checkpoint store into the engine, and maps the run outcome to
//! a process exit code.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use polyglot_relay::catalog::{seed_checkpoint, Catalog};
use polyglot_relay::checkpoint::{CheckpointRecord, CheckpointStatus, CheckpointStore, JsonlCheckpointStore};
use polyglot_relay::cli::{Args, Commands};
use polyglot_relay::client::keys::ApiKeyRing;
use polyglot_relay::client::ClientFactory;
use polyglot_relay::config::Config;
use polyglot_relay::engine::Engine;
use polyglot_relay::error::RelayError;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = setup_logging(args.verbose) {
        eprintln!("{:#}", e);
        return ExitCode::from(2);
    }

    match run(args).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            let code = e
                .downcast_ref::<RelayError>()
                .map(RelayError::exit_code)
                .unwrap_or(2);
            if code == 130 {
                warn!("{:#}", e);
            } else {
                error!("{:#}", e);
            }
            ExitCode::from(code)
        }
    }
}

async fn run(args: Args) -> Result<u8> {
    let config = load_config(args.config.as_deref())?;

    match args.command {
        Commands::Translate { input, output, target_lang, workers, checkpoint } => {
            let mut config = config;
            if let Some(lang) = target_lang {
                config.engine.target_language = lang;
            }
            if let Some(workers) = workers {
                config.engine.workers = workers;
            }
            if let Some(path) = checkpoint {
                config.checkpoint.path = path;
            }
            config.validate()?;
            translate(config, &input, &output).await
        }
        Commands::Status { checkpoint } => {
            let path = checkpoint.unwrap_or(config.checkpoint.path);
            status(&path).await?;
            Ok(0)
        }
        Commands::Compact { checkpoint } => {
            let path = checkpoint.unwrap_or(config.checkpoint.path);
            let store = JsonlCheckpointStore::open(&path).await?;
            let kept = store.compact().await?;
            println!("Compacted {} to {} records", path.display(), kept);
            Ok(0)
        }
        Commands::InitConfig { path } => {
            if path.exists() {
                return Err(RelayError::Config(format!("{} already exists", path.display())).into());
            }
            Config::default().save_to_file(&path)?;
            println!("Wrote default configuration to {}", path.display());
            Ok(0)
        }
    }
}

async fn translate(config: Config, input: &Path, output: &Path) -> Result<u8> {
    info!(
        input = %input.display(),
        output = %output.display(),
        target = %config.engine.target_language,
        "Translating catalog"
    );

    let catalog = Catalog::read(input).await?;
    let entries = catalog.entries();

    let store = Arc::new(
        JsonlCheckpointStore::open(&config.checkpoint.path)
            .await
            .with_context(|| format!("opening checkpoint {}", config.checkpoint.path.display()))?,
    );

    // translations already present in the input, or in the output of an
    // earlier run, are not paid for again
    let mut seeded = seed_checkpoint(store.as_ref(), &entries).await?;
    if let Some(previous) = Catalog::read_previous(output, catalog.format()).await {
        seeded += seed_checkpoint(store.as_ref(), &previous.entries()).await?;
    }
    if seeded > 0 {
        info!(seeded, "Seeded checkpoint with existing translations");
    }

    let keys = ApiKeyRing::from_env(&config.client.api_key_env);
    let client = ClientFactory::create(&config.client, keys)?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight translations");
            signal.cancel();
        }
    });

    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .context("invalid progress template")?
            .progress_chars("#>-"),
    );

    let units: Vec<_> = entries.into_iter().map(|e| e.unit).collect();
    let engine = Engine::new(config.engine.clone(), client, store.clone()).with_progress(bar);
    let report = engine.run(&units, shutdown).await?;

    catalog.write(&report.output, output).await?;
    print!("{}", report.summary);

    if config.checkpoint.compact_on_finish {
        store.compact().await?;
    }

    Ok(report.summary.exit_code())
}

async fn status(path: &Path) -> Result<()> {
    let store = JsonlCheckpointStore::open(path).await?;
    let records = store.load().await?;

    let mut failed: Vec<&CheckpointRecord> = records
        .iter()
        .filter(|r| r.status == CheckpointStatus::FailedPermanent)
        .collect();
    failed.sort_by(|a, b| a.key.cmp(&b.key));

    println!("Checkpoint: {}", path.display());
    println!("Records: {}", records.len());
    println!("Succeeded: {}", records.len() - failed.len());
    println!("Failed: {}", failed.len());
    for record in failed {
        match &record.last_error {
            Some(err) => println!("  FAILED {} {}", record.key, err),
            None => println!("  FAILED {}", record.key),
        }
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)?,
        None => {
            // Try config.toml in the current directory first
            let local = PathBuf::from("config.toml");
            if local.exists() {
                info!("Found config.toml in current directory, loading...");
                Config::from_file(&local)?
            } else {
                Config::default()
            }
        }
    };
    Ok(config)
}

/// Setup logging to both console and file
fn setup_logging(verbose: bool) -> Result<()> {
    let log_dir = std::env::current_dir()?.join(".polyglot-relay").join("log");
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = rolling::daily(&log_dir, "polyglot-relay.log");
    let (non_blocking_file, guard) = non_blocking(file_appender);
    // Keep the guard alive for the duration of the program
    std::mem::forget(guard);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(true);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        "Logging initialized - console: {}, file: {}",
        log_level,
        log_dir.join("polyglot-relay.log").display()
    );
    Ok(())
}
