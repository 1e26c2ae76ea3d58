//! Watch a vault and log the domain events its metadata changes produce.
//!
//! Usage: `vault-metadata-cache [VAULT_ROOT] [CONFIG_YAML]`

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vault_metadata_cache::{prelude::*, run_sync_loop};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("vault_metadata_cache=debug".parse()?),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let root = match args.next() {
        Some(root) => PathBuf::from(root),
        None => std::env::current_dir().context("Failed to read current directory")?,
    };
    let mut config = match args.next() {
        Some(path) => VaultConfig::from_yaml_file(path.as_ref())
            .with_context(|| format!("Failed to load config from {path}"))?,
        None => VaultConfig::default(),
    };
    config.root = root;

    let provider = Arc::new(LocalVaultProvider::open(&config).await?);
    tracing::info!(root = %provider.root().display(), "Opening vault");

    let sync = VaultSync::new(provider.clone(), &config);
    let store = sync.store();
    for kind in [
        DomainEventKind::StatusChanged,
        DomainEventKind::TaskFileChanged,
        DomainEventKind::KanbanChanged,
        DomainEventKind::DocumentMetadataChanged,
        DomainEventKind::FileRenamed,
    ] {
        store.on(kind, move |event| {
            match event {
                DomainEvent::FileRenamed { old_path, new_path } => tracing::info!(
                    "[{}] {} -> {}",
                    kind,
                    old_path.display(),
                    new_path.display()
                ),
                _ => {
                    if let Some(file) = event.file() {
                        tracing::info!("[{}] {}", kind, file);
                    }
                }
            }
            Ok(())
        });
    }

    sync.start()?;
    store.wait_until_ready().await;
    tracing::info!(files = store.len().await, "Metadata cache ready");

    let mut watcher = DebouncedFileWatcher::new(config.debounce_ms, config.poll_interval_ms)?;
    watcher.watch(provider.root())?;
    if watcher.is_using_polling(provider.root()) {
        tracing::info!("Using polling fallback for the vault root");
    }

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
        }
        tracing::info!("Shutting down");
        shutdown.cancel();
    });

    run_sync_loop(&mut watcher, &provider, 50, cancel).await;

    sync.stop().await;
    let stats = store.stats();
    tracing::info!(
        adds = stats.adds,
        updates = stats.updates,
        events = stats.events_published,
        "Done"
    );
    Ok(())
}
