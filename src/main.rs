use std::sync::Arc;

use tts_proxy::cli::{self, Command};
use tts_proxy::config::ConfigStore;
use tts_proxy::errors::ProxyError;
use tts_proxy::metrics::Metrics;
use tts_proxy::server::{self, AppContext};
use tts_proxy::{health, hostkey};

fn credentials_from_env() -> (Arc<str>, Arc<str>) {
    let username = std::env::var("SSH_USERNAME").unwrap_or_else(|_| "ritts".to_string());
    let password = std::env::var("SSH_PASSWORD").unwrap_or_else(|_| "ritts".to_string());
    (username.into(), password.into())
}

#[tokio::main]
async fn main() -> Result<(), ProxyError> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match cli::parse(&args) {
        Ok(cmd) => cmd,
        Err(usage) => {
            eprintln!("{usage}");
            std::process::exit(2);
        }
    };

    let store = ConfigStore::from_env();

    if !matches!(command, Command::Serve) {
        if let Err(err) = cli::run(command, &store).await {
            eprintln!("tts-proxy: {err}");
            std::process::exit(1);
        }
        return Ok(());
    }

    let host_key = hostkey::load_or_create()?;
    let mapping = store.snapshot()?;
    let ports = mapping.listen_ports();
    let (username, password) = credentials_from_env();

    let metrics = Metrics::new();
    let ctx = AppContext {
        config_store: Arc::new(store),
        metrics: metrics.clone(),
        username,
        password,
    };

    tracing::info!(port_count = ports.len(), "starting tts-proxy");

    tokio::select! {
        _ = server::run_listener_fleet(ports, host_key, ctx) => {
            tracing::warn!("listener fleet exited");
        }
        result = health::serve(metrics) => {
            if let Err(err) = result {
                tracing::error!(%err, "health endpoint exited");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received shutdown signal");
        }
    }

    Ok(())
}
