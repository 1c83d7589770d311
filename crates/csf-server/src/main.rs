//! `csf-server` entry point.
//!
//! Thin by design: load config, build shared state, spawn background work,
//! wire middleware, serve. All route handlers live in `routes.rs`; all
//! shared state lives in `state.rs`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::http::Method;
use csf_config::secrets::{resolve_jwt_secret, RunMode};
use csf_config::{LogFormat, ServerConfig};
use csf_db::{Repository, Store};
use csf_server::{janitors, routes, state::AppState};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");

    let config_paths = config_paths_from_args();
    let path_refs: Vec<&std::path::Path> = config_paths.iter().map(|p| p.as_path()).collect();
    let config: ServerConfig = csf_config::load_typed(&path_refs).context("failed to load server configuration")?;

    init_tracing(&config.logging);

    let mode = RunMode::from_env();
    let store = Store::connect(&config.database.url).await.context("failed to connect to database")?;
    store.migrate().await.context("failed to run database migrations")?;

    let jwt_secret = resolve_jwt_secret(mode, config.auth.jwt.secret.clone()).context("failed to resolve jwt secret")?;
    let static_fallback_keys = config
        .auth
        .static_keys
        .iter()
        .map(|entry| {
            if entry.hashed {
                csf_auth::StaticKey::BcryptHash(entry.value.clone())
            } else {
                csf_auth::StaticKey::Plain(entry.value.clone())
            }
        })
        .collect();
    warn_on_static_keys(&config.auth.static_keys);

    bootstrap_first_admin(&store, mode).await.context("failed to bootstrap initial admin user")?;

    let repo: Arc<dyn Repository> = Arc::new(store);
    let state = Arc::new(AppState::new(
        repo.clone(),
        jwt_secret,
        static_fallback_keys,
        &config.auth.jwt,
        config.dashboard.clone(),
    ));

    let cancel = CancellationToken::new();
    janitors::spawn_all(repo, cancel.clone());
    spawn_shutdown_listener(cancel.clone());

    let app = routes::build_router(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(dashboard_cors());

    let addr = SocketAddr::new(config.server.host.parse().context("invalid server.host")?, config.server.port);
    tracing::info!("csf-server listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let serve_cancel = cancel.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(serve_cancel.cancelled_owned())
            .await
    });

    cancel.cancelled().await;
    match tokio::time::timeout(SHUTDOWN_GRACE, server).await {
        Ok(joined) => joined.context("server task panicked")?.context("server crashed")?,
        Err(_) => tracing::warn!("in-flight requests did not drain within the shutdown grace period"),
    }

    tracing::info!("csf-server shut down cleanly");
    Ok(())
}

/// Deprecation notice for the legacy static-key fallback: named so operators
/// can tell which configured entry authenticated a given request from the
/// logs, without printing the secret itself.
fn warn_on_static_keys(static_keys: &[csf_config::StaticKeyEntry]) {
    for entry in static_keys {
        let prefix: String = entry.value.chars().take(8).collect();
        tracing::warn!(
            name = %entry.name,
            prefix = %prefix,
            "static machine-key fallback configured; migrate this caller to a database-issued key"
        );
    }
}

/// First-run convenience: if no users exist yet, create a
/// single administrator with a well-known default credential so the
/// dashboard is reachable at all. The credential is logged prominently at
/// `warn` level on every startup that still finds it active; operators are
/// expected to rotate it immediately in any shared deployment.
const BOOTSTRAP_ADMIN_USERNAME: &str = "admin";
const BOOTSTRAP_ADMIN_PASSWORD: &str = "admin";

async fn bootstrap_first_admin(store: &Store, mode: RunMode) -> Result<()> {
    if store.user_count().await? > 0 {
        return Ok(());
    }

    let bcrypt_hash = bcrypt::hash(BOOTSTRAP_ADMIN_PASSWORD, bcrypt::DEFAULT_COST)
        .context("failed to hash bootstrap password")?;
    store
        .create_user(BOOTSTRAP_ADMIN_USERNAME, &bcrypt_hash, csf_types::UserRole::Admin)
        .await?;

    tracing::warn!(
        username = BOOTSTRAP_ADMIN_USERNAME,
        password = BOOTSTRAP_ADMIN_PASSWORD,
        mode = ?mode,
        "no users existed; created a default administrator with a well-known password. \
         Log in and rotate this password immediately."
    );
    Ok(())
}

fn config_paths_from_args() -> Vec<PathBuf> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        vec![PathBuf::from("config/server.yaml")]
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

/// The dashboard can be served from any origin operators point it at, so
/// CORS here is permissive rather than enumerated.
fn dashboard_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}

fn spawn_shutdown_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            cancel.cancel();
        }
    });
}
