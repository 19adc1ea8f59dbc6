//! Operator serving the load generator API and running the reclaimers.
use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use lg_operator::{
    generator::{KubeGateway, Manager},
    service::{self, http, Service},
    settings::Settings,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path of the configuration file.
    #[arg(long, env = "LG_OPERATOR_CONFIG", default_value = "./config.yaml")]
    cfg: PathBuf,

    /// Export traces to this OTLP endpoint.
    #[arg(long, env = "LG_OPERATOR_OTLP_ENDPOINT")]
    otlp_endpoint: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = Settings::load(&args.cfg)
        .with_context(|| format!("failed to load configuration from {}", args.cfg.display()))?;
    lg_common::telemetry::init(args.otlp_endpoint.clone(), settings.log_level().as_deref())
        .await?;
    settings.validate()?;

    info!(?args.cfg, ?args.otlp_endpoint, "starting operator");

    let client = Client::try_default().await?;
    let version = client.apiserver_version().await?;
    info!(
        version = %version.git_version,
        platform = %version.platform,
        "connected to cluster"
    );

    let settings = Arc::new(settings);
    let gateway = KubeGateway::new(client, &settings.namespace()?);
    let manager = Arc::new(Manager::new(Arc::new(gateway), settings.clone()));

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    let reclaimers =
        service::start_reclaimers(manager.clone(), settings.clone(), shutdown.clone());
    let router = http::router(Service::new(manager.clone()), shutdown.clone());
    let served = http::serve(router, settings.http_port()?, shutdown.clone()).await;

    shutdown.cancel();
    for reclaimer in reclaimers {
        if let Err(err) = reclaimer.await {
            warn!(%err, "reclaimer task failed");
        }
    }
    // Creations cancelled by the shutdown are still deleting their objects.
    manager.wait_rollbacks().await;
    lg_common::telemetry::shutdown();
    served
}

/// Cancel `shutdown` on SIGINT or SIGTERM.
async fn cancel_on_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(%err, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(%err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutting down");
    shutdown.cancel();
}
