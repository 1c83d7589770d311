//! `csf-agent` entry point.
//!
//! Thin by design: loads configuration, wires tracing and signal handling,
//! registers the (out-of-scope, reference-only) evaluator/renderer, and
//! hands off to [`csf_agent::Agent::run`]. All engine logic lives in the
//! library crate.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use csf_agent::Agent;
use csf_config::{ClientConfig, LogFormat};
use csf_evaluator::{EvaluatorHost, NullRenderer, ReferenceEvaluator};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");

    let config_paths = config_paths_from_args();
    let path_refs: Vec<&std::path::Path> = config_paths.iter().map(|p| p.as_path()).collect();
    let config: ClientConfig = csf_config::load_typed(&path_refs).context("failed to load client configuration")?;

    init_tracing(&config.logging);

    if !config.client.enabled {
        tracing::info!("client disabled in configuration; exiting without scanning");
        return Ok(());
    }

    let cancel = CancellationToken::new();
    spawn_shutdown_listener(cancel.clone());

    let mut host = EvaluatorHost::new();
    host.register_evaluator(Box::new(ReferenceEvaluator));
    host.register_renderer(Box::new(NullRenderer));

    let agent = Agent::build(config, Arc::new(host)).context("failed to build agent")?;

    tracing::info!("csf-agent starting");
    agent.run(&cancel).await;
    tracing::info!("csf-agent shut down cleanly");

    Ok(())
}

fn config_paths_from_args() -> Vec<PathBuf> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        vec![PathBuf::from("config/client.yaml")]
    } else {
        args.into_iter().map(PathBuf::from).collect()
    }
}

fn init_tracing(logging: &csf_config::LoggingConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        match logging.level {
            csf_config::LogLevel::Debug => "debug",
            csf_config::LogLevel::Info => "info",
            csf_config::LogLevel::Warn => "warn",
            csf_config::LogLevel::Error => "error",
        }
        .into()
    });

    match logging.format {
        LogFormat::Json => {
            tracing_subscriber::fmt().with_env_filter(env_filter).json().init();
        }
        LogFormat::Text => {
            tracing_subscriber::fmt().with_env_filter(env_filter).init();
        }
    }
}

fn spawn_shutdown_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received; draining in-flight work");
            cancel.cancel();
        }
    });
}
