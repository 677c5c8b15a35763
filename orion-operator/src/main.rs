use anyhow::{Context, Result};
use clap::Parser;
use kube::CustomResourceExt;
use orion_controller::{Engine, KubeStore, PlacementResolver};
use orion_models::Application;
use std::path::Path;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;
mod config;
mod controller;
mod health;
mod simulate;

use cli::{Args, Mode};
use config::Config;

/// Initialize tracing: console output always, plus a plain-text log file
/// under `log_dir` when one is configured.
///
/// The returned guard must be held for the lifetime of the program or
/// buffered file output is lost.
fn initialize_tracing(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "info,\
         orion_controller=debug,\
         orion_operator=debug,\
         kube=warn"
            .into()
    });

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let file_appender = tracing_appender::rolling::daily(dir, "orion-operator.log");
            let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
            let layer = fmt::layer().with_writer(file_writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load()?;

    let _guard = initialize_tracing(config.log_dir.as_deref())?;

    match args.mode {
        Mode::Run { health_addr } => run_operator(config, health_addr).await,
        Mode::Crd => {
            print!("{}", serde_yaml::to_string(&Application::crd())?);
            Ok(())
        }
        Mode::Simulate {
            name,
            image,
            replicas,
            database,
            cache,
            object_store,
        } => {
            let status = simulate::run(simulate::SimulateOptions {
                name,
                image,
                replicas,
                database,
                cache,
                object_store,
            })
            .await?;
            print!("{}", serde_yaml::to_string(&status)?);
            Ok(())
        }
    }
}

async fn run_operator(config: Config, health_addr: Option<std::net::SocketAddr>) -> Result<()> {
    let health_addr = health_addr.unwrap_or(config.health_addr);

    tracing::info!("Starting Orion operator");
    tracing::info!("  Ambient environment: {:?}", config.ambient);
    tracing::info!("  Cloud region: {}", config.cloud_region);

    let store = KubeStore::try_default().await?;
    let client = store.client().clone();

    let engine = Engine::new(
        Arc::new(store),
        PlacementResolver::new(config.ambient.is_local()),
        Arc::new(config.secret_provider()),
        config.cloud_settings(),
    )
    .context("Failed to load infrastructure templates")?;

    let readiness = health::Readiness::new();
    let health_handle = {
        let readiness = readiness.clone();
        tokio::spawn(async move {
            if let Err(e) = health::start_server(health_addr, readiness).await {
                tracing::error!("Health server error: {}", e);
            }
        })
    };

    let result = controller::run(client, controller::Context::new(engine), readiness).await;

    tracing::info!("Shutting down...");
    health_handle.abort();

    result
}
