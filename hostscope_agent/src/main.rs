//! hostscope_agent: collects host metrics and exports them over HTTP.

mod cli;
mod config;
mod server;

use std::env;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use cli::CliError;
use hostscope::{available_names, startup, MetricSet, MetricsSink};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = match cli::parse_args(env::args()) {
        Ok(v) => v,
        Err(CliError::Help(usage)) => {
            println!("{usage}");
            return Ok(());
        }
        Err(CliError::Invalid(msg)) => {
            eprintln!("{msg}");
            std::process::exit(2);
        }
    };

    if let Some(domain) = args.list.as_deref() {
        for name in available_names(domain)? {
            println!("{name}");
        }
        return Ok(());
    }

    let mut cfg = config::load(args.config.as_deref())?;
    cfg.apply_args(&args);

    let (registry, errors) = startup(cfg.startup_config()?).await;
    for e in &errors {
        warn!("{e}");
    }
    if registry.is_empty() {
        bail!("no devices could be started");
    }
    info!("devices: {}", registry.names().join(", "));

    let metrics = Arc::new(MetricSet::new());
    let sink: Option<&dyn MetricsSink> = cfg.export_port.map(|_| metrics.as_ref() as &dyn MetricsSink);
    let running = registry.spawn(sink);

    match cfg.export_port {
        Some(port) => {
            server::serve(port, Arc::clone(&metrics), running.readers().clone()).await?;
        }
        None => {
            tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
        }
    }

    let stopped = running.stopped_devices();
    if !stopped.is_empty() {
        info!("devices that stopped early: {}", stopped.join(", "));
    }
    running.shutdown().await;
    Ok(())
}
