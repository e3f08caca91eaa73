//! kubesync - keeps a cluster catalog in sync with kubeconfig files.
//!
//! Watches the default kubeconfig directory plus every configured sync
//! entry and prints catalog changes until interrupted.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use kubesync::{
    load_settings, CatalogEvent, CatalogEventKind, ClusterCatalog, ClusterStore,
    KubeconfigSyncManager, SyncSettings, SyncTargetSet,
};
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kubesync")]
#[command(about = "Watch kubeconfig files and folders and keep a cluster catalog in sync")]
#[command(version)]
struct Cli {
    /// Settings file (YAML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Preferences file holding the user's sync entries
    #[arg(short, long, value_name = "FILE")]
    preferences: Option<PathBuf>,

    /// Additional kubeconfig file or folder to sync (repeatable)
    #[arg(short, long = "sync", value_name = "PATH")]
    sync: Vec<String>,

    /// Write the `--sync` paths back into the preferences file
    #[arg(long, requires = "preferences")]
    save: bool,

    /// Emit catalog events and logs as JSON lines
    #[arg(long)]
    json: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// Installs the tracing subscriber and routes `log` records into it.
fn init_logging(verbose: bool, json: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if json {
        tracing::subscriber::set_global_default(
            registry.with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            ),
        )
    } else {
        tracing::subscriber::set_global_default(
            registry.with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)),
        )
    };

    if let Err(e) = installed {
        eprintln!("Failed to install log subscriber: {}", e);
    }
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("Failed to bridge log records: {}", e);
    }
}

async fn run(cli: Cli) -> kubesync::Result<()> {
    let settings = match &cli.config {
        Some(path) => load_settings(path)?,
        None => SyncSettings::default(),
    };

    let targets = match &cli.preferences {
        Some(path) => SyncTargetSet::load(path, settings.event_capacity)?,
        None => SyncTargetSet::new(settings.event_capacity),
    };
    for path in &cli.sync {
        targets.insert(path);
    }
    if cli.save {
        if let Some(path) = &cli.preferences {
            targets.save(path)?;
            info!("Saved {} sync entries to {}", targets.len(), path.display());
        }
    }

    let catalog = ClusterCatalog::new(settings.event_capacity);
    let mut events = catalog.subscribe();

    info!(
        directory = %settings.kubeconfig_directory.display(),
        entries = targets.len(),
        "Starting kubeconfig sync"
    );
    let manager = KubeconfigSyncManager::new(
        settings,
        targets,
        Arc::new(ClusterStore::new()),
        catalog,
    );
    manager.start();

    let (shutdown_tx, mut shutdown_rx) = mpsc::unbounded_channel();
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(());
    }) {
        warn!("Failed to install Ctrl-C handler: {}", e);
    }

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            event = events.recv() => match event {
                Ok(event) => print_event(&event, cli.json),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Skipped {} catalog events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    info!("Shutting down");
    manager.stop();
    info!("Catalog holds {} clusters", manager.catalog().len());
    Ok(())
}

fn print_event(event: &CatalogEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!("Failed to serialize catalog event: {}", e),
        }
        return;
    }

    let marker = match event.kind {
        CatalogEventKind::Added => '+',
        CatalogEventKind::Updated => '~',
        CatalogEventKind::Removed => '-',
    };
    let entity = &event.entity;
    println!(
        "{} {:<24} {:<40} {}",
        marker,
        entity.metadata.name,
        entity.spec.server.as_deref().unwrap_or("-"),
        entity.spec.kubeconfig_path
    );
}
