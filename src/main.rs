//! ipcounter - count IPv4 addresses into a key-value store
//!
//! Reads the input file, increments one counter per address line, lists
//! every counter back and writes the report with the import time appended.

use anyhow::Context;
use clap::Parser;
use ipcounter::config::{Backend, Config};
use ipcounter::file::FileHandler;
use ipcounter::service::Service;
use ipcounter::storage::{CounterEngine, RespStorage, Storage};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    info!(
        version = ipcounter::VERSION,
        backend = ?config.backend,
        mode = %config.mode(),
        "Starting"
    );

    // The remote store is kept concrete so it can be closed on the way out
    let remote = match config.backend {
        Backend::Resp => Some(Arc::new(
            RespStorage::connect_pool(&config.host, config.port, config.pool_size())
                .await
                .with_context(|| format!("failed to connect to {}", config.store_address()))?,
        )),
        Backend::Memory => None,
    };
    let storage: Arc<dyn Storage> = match &remote {
        Some(remote) => Arc::clone(remote) as Arc<dyn Storage>,
        None => Arc::new(CounterEngine::new()) as Arc<dyn Storage>,
    };

    let result = run(&config, storage).await;
    if let Some(remote) = remote {
        remote.close().await;
    }

    match result {
        Ok(()) => {
            info!("Done");
            Ok(())
        }
        Err(e) => {
            error!(error = %format!("{:#}", e), "Run failed");
            Err(e)
        }
    }
}

async fn run(config: &Config, storage: Arc<dyn Storage>) -> anyhow::Result<()> {
    let mut service = Service::new(storage);
    if let Some(limit) = config.concurrency {
        service = service.with_concurrency_limit(limit);
    }
    let mode = config.mode();
    let files = FileHandler::default();

    let reader = files
        .open_read(&config.input)
        .await
        .with_context(|| format!("failed to open {}", config.input))?;

    let elapsed = service
        .import(reader, &config.namespace, &config.set, mode)
        .await
        .context("import failed")?;

    let mut content = service
        .export(&config.namespace, &config.set, mode)
        .await
        .context("export failed")?;
    content.push_str(&format!("\nTotal time {} seconds", elapsed));

    files
        .create_write(&config.output, &content)
        .await
        .with_context(|| format!("failed to write {}", config.output))?;

    Ok(())
}
