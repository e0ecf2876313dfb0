use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tokio::select;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use ekspose_operator::cache::WatchSource;
use ekspose_operator::config::{
    OperatorConfig, DEFAULT_HEALTH_PORT, DEFAULT_MAX_RETRIES, DEFAULT_WORKERS,
};
use ekspose_operator::controllers::{self, ControllerContext};
use ekspose_operator::gateway::KubeGateway;
use ekspose_operator::health::{run_health_server, HealthState};

/// Expose every Deployment through a Service and an Ingress
#[derive(Parser, Debug)]
#[command(name = "ekspose-operator")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to a kubeconfig file (inferred from the environment when absent)
    #[arg(long)]
    kubeconfig: Option<PathBuf>,

    /// Number of concurrent reconcile workers
    #[arg(long, env = "EKSPOSE_WORKERS", default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    /// Port for the /healthz and /readyz endpoints
    #[arg(long, env = "EKSPOSE_HEALTH_PORT", default_value_t = DEFAULT_HEALTH_PORT)]
    health_port: u16,

    /// Backed-off retries per Deployment after a transient failure
    #[arg(long, env = "EKSPOSE_MAX_RETRIES", default_value_t = DEFAULT_MAX_RETRIES)]
    max_retries: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON formatting for production
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
                .with_current_span(false),
        )
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = OperatorConfig::new(args.workers, args.health_port, args.max_retries)
        .context("Invalid operator configuration")?;

    info!(
        workers = config.workers(),
        health_port = config.health_port(),
        max_retries = config.max_retries(),
        "ekspose-operator starting"
    );

    let client = build_client(args.kubeconfig.as_ref())
        .await
        .context("Failed to create Kubernetes client")?;

    info!("Connected to Kubernetes cluster");

    let (source, cache) = WatchSource::new(client.clone());
    let ctx = Arc::new(ControllerContext::new(
        Arc::new(KubeGateway::new(client)),
        cache,
        config.max_retries(),
    ));

    let health = Arc::new(HealthState::new());
    {
        let health = Arc::clone(&health);
        let port = config.health_port();
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health, port).await {
                error!(error = %e, "Health check server failed");
            }
        });
    }

    let shutdown = CancellationToken::new();
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to setup SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to setup SIGINT handler")?;
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            select! {
                _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully"),
                _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully"),
            }
            shutdown.cancel();
        });
    }

    controllers::run(ctx, source, &config, health, shutdown)
        .await
        .context("Controller failure")?;

    info!("Shutdown complete");
    Ok(())
}

/// Client from an explicit kubeconfig, or the in-cluster/default config
async fn build_client(kubeconfig: Option<&PathBuf>) -> Result<Client> {
    let config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .with_context(|| format!("Failed to read kubeconfig {}", path.display()))?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?
        }
        None => Config::infer().await?,
    };

    Ok(Client::try_from(config)?)
}
