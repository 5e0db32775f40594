use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::cli::config::{self, Config, StoreKind};
use crate::cli::ServeArgs;
use crate::fanout::FanoutConfig;
use crate::native::{build_router, init_tracing};
use crate::registry::FanoutRegistry;
use crate::store::{FileLogStore, LogStore, MemoryLogStore};

/// Config file (explicit path, or ./.logfanout.toml when present) with flags on top.
pub fn resolve_config(args: &ServeArgs) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => config::load_config_from_path(path)?,
        None => config::try_load_config().unwrap_or_default(),
    };

    if let Some(listen) = &args.listen {
        config.listen_addr = listen.clone();
    }
    if let Some(dir) = &args.data_dir {
        config.data_dir = Some(dir.clone());
    }
    if args.memory {
        config.store = StoreKind::Memory;
    }
    if let Some(ms) = args.send_timeout_ms {
        config.send_timeout_ms = ms;
    }

    Ok(config)
}

async fn open_store(config: &Config) -> Result<Arc<dyn LogStore>> {
    match config.store {
        StoreKind::Memory => Ok(Arc::new(MemoryLogStore::new())),
        StoreKind::File => {
            let dir = config.resolve_data_dir()?;
            let store = FileLogStore::open(&dir)
                .await
                .with_context(|| format!("Failed to open log store at {}", dir.display()))?;
            Ok(Arc::new(store))
        }
    }
}

pub async fn execute_serve(args: ServeArgs) -> Result<()> {
    init_tracing(args.log_json);

    let config = resolve_config(&args)?;
    let store = open_store(&config).await?;
    let registry = Arc::new(FanoutRegistry::new(
        store,
        FanoutConfig {
            send_timeout: config.send_timeout(),
        },
    ));

    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    info!(
        addr = %config.listen_addr,
        store = ?config.store,
        send_timeout_ms = config.send_timeout_ms,
        "logfanout listening"
    );

    // Viewer sockets only end once their fan-out closes them, so finish every
    // build before waiting on connections to drain.
    let shutdown_registry = registry.clone();
    axum::serve(listener, build_router(registry))
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down, closing open build logs");
            shutdown_registry.close_all().await;
        })
        .await?;

    Ok(())
}
