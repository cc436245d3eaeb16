// muti-metroo-agent: runs one mesh node — dials/accepts peers, maintains
// routing tables via the flood protocol, and serves local SOCKS5 ingress
// and/or TCP exit egress depending on configuration.

use std::path::PathBuf;

use agent::Orchestrator;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn config_path() -> PathBuf {
    std::env::var("MUTI_METROO_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/etc/muti-metroo/agent.toml"))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "muti-metroo-agent starting");

    let path = config_path();
    let config = match mm_config::load_from_path(&path) {
        Ok(config) => config,
        Err(e) => {
            error!(path = %path.display(), error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let identity = match mm_config::load_or_create(&config.agent.data_dir, config.agent.private_key) {
        Ok(identity) => identity,
        Err(e) => {
            error!(error = %e, "failed to load or create agent identity");
            std::process::exit(1);
        }
    };
    info!(agent_id = %identity.agent_id, "identity loaded");

    let orchestrator = Orchestrator::new(config, identity);

    if let Err(e) = orchestrator.run(shutdown_signal()).await {
        error!(error = %e, "agent exited with an error");
        std::process::exit(1);
    }

    info!("muti-metroo-agent shut down gracefully");
    std::process::exit(130);
}

/// Waits for SIGTERM or Ctrl-C (SIGINT) and returns to trigger graceful
/// shutdown.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); }
        _ = terminate => { info!("received SIGTERM, shutting down"); }
    }
}
