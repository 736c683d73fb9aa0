//! rrlb - a round-robin HTTP reverse-proxy load balancer
//!
//! Usage:
//!     rrlb --config <path>
//!     rrlb --listen 0.0.0.0:8000 --backend http://10.0.0.1:80 --backend http://10.0.0.2:80
//!
//! See --help for more options.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use rrlb::backend::{HttpProbe, Probe, Selector, parse_address};
use rrlb::config::{
    BackendConfig, Config, ConfigError, HealthCheckMode, parse_config, validate_config,
};
use rrlb::frontend::FrontendListener;
use rrlb::health::{CachedProbe, HealthChecker, HealthConfig, HealthState};
use rrlb::metrics::{MetricsCollector, MetricsServer};
use rrlb::util::{ShutdownSignal, init_logging, wait_for_signal};

/// A round-robin HTTP reverse-proxy load balancer.
#[derive(Parser, Debug)]
#[command(name = "rrlb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Address to listen on (overrides the config file)
    #[arg(long, value_name = "ADDR")]
    listen: Option<SocketAddr>,

    /// Backend URI, repeat in round-robin order (replaces configured backends)
    #[arg(short, long = "backend", value_name = "URI")]
    backends: Vec<String>,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => parse_config(path).with_context(|| {
            format!("failed to load configuration from '{}'", path.display())
        })?,
        None => Config::default(),
    };
    apply_overrides(&mut config, &cli);

    init_logging(&config.global.log_level, &config.global.log_format)
        .context("failed to initialize logging")?;

    if let Err(e) = validate_config(&config) {
        error!(error = %e, "invalid configuration");
        return Err(ConfigError::ValidationError(e).into());
    }

    if cli.validate {
        info!("Configuration is valid");
        println!("Configuration is valid.");
        println!("  Listen: {}", config.listen);
        println!("  Health checks: {:?}", config.health_check.mode);
        println!("  Backends: {}", config.backends.len());
        for backend in &config.backends {
            println!("    - {}", backend.address);
        }
        return Ok(());
    }

    info!(
        config_path = ?cli.config,
        listen = %config.listen,
        backends = config.backends.len(),
        health_mode = ?config.health_check.mode,
        "rrlb starting"
    );

    for (index, backend) in config.backends.iter().enumerate() {
        info!(index, address = %backend.address, "configured backend");
    }

    if let Err(e) = run(config) {
        error!(error = %format!("{:#}", e), "fatal error");
        return Err(e);
    }
    Ok(())
}

/// Command line values take precedence over the file.
fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    if !cli.backends.is_empty() {
        config.backends = cli.backends.iter().map(BackendConfig::new).collect();
    }
    if let Some(ref level) = cli.log_level {
        config.global.log_level = level.clone();
    }
}

/// Run the load balancer with the given configuration.
fn run(config: Config) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    runtime.block_on(run_async(config))
}

/// Async entry point for the load balancer.
async fn run_async(config: Config) -> Result<()> {
    let shutdown = ShutdownSignal::new();
    let metrics = MetricsCollector::new();

    let (probe, checker) = build_liveness(&config, &metrics)?;
    let selector = Selector::from_config(&config.backends, probe)
        .context("failed to build backend pool")?;

    let mut handles = Vec::new();

    if let Some(checker) = checker {
        handles.push(tokio::spawn(checker.run(shutdown.subscribe())));
    }

    let metrics_config = &config.global.metrics;
    if metrics_config.enabled {
        let server = MetricsServer::bind(
            metrics_config.address,
            metrics_config.path.clone(),
            metrics.clone(),
        )
        .await
        .with_context(|| format!("failed to bind metrics server on {}", metrics_config.address))?;
        handles.push(tokio::spawn(server.run(shutdown.subscribe())));
    }

    let listener = FrontendListener::bind(
        config.listen,
        Arc::new(selector),
        config.proxy.clone(),
        metrics,
    )
    .await
    .with_context(|| format!("failed to bind listener on {}", config.listen))?;
    handles.push(tokio::spawn(listener.run(shutdown.subscribe())));

    info!("rrlb is running");
    info!("press Ctrl+C to stop");

    wait_for_signal().await;
    shutdown.shutdown();

    for handle in handles {
        let _ = handle.await;
    }

    info!("rrlb shut down complete");
    Ok(())
}

/// Pick the liveness capability for the configured mode.
///
/// Background mode also returns the checker that keeps the cache fresh.
fn build_liveness(
    config: &Config,
    metrics: &MetricsCollector,
) -> Result<(Arc<dyn Probe>, Option<HealthChecker>)> {
    let http_probe = HttpProbe::from_config(&config.health_check);

    match config.health_check.mode {
        HealthCheckMode::OnDemand => {
            let probe: Arc<dyn Probe> = Arc::new(http_probe.with_metrics(metrics.clone()));
            Ok((probe, None))
        }
        HealthCheckMode::Background => {
            let targets = config
                .backends
                .iter()
                .map(|b| parse_address(&b.address))
                .collect::<Result<Vec<_>, _>>()?;

            let state = Arc::new(HealthState::with_config(HealthConfig::from(
                &config.health_check,
            )));
            let checker = HealthChecker::new(
                Arc::clone(&state),
                http_probe,
                targets,
                config.health_check.interval,
                metrics.clone(),
            );

            let probe: Arc<dyn Probe> = Arc::new(CachedProbe::new(state));
            Ok((probe, Some(checker)))
        }
    }
}
