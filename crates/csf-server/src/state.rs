//! Shared runtime state for `csf-server`.
//!
//! A single `Clone`-able struct built once at startup and threaded through
//! every handler via `State<Arc<AppState>>`. The repository is held as
//! `Arc<dyn csf_db::Repository>` rather than a concrete `Store` so the
//! router can be exercised in-process against an in-memory fake
//! (`csf-testkit`).

use std::sync::Arc;

use csf_auth::AuthService;
use csf_config::secrets::JwtSecret;
use csf_db::Repository;

pub type SharedAuth = AuthService<Arc<dyn Repository>>;

/// Static build metadata included in the health response.
#[derive(Clone, Debug)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
    pub commit: Option<&'static str>,
}

impl Default for BuildInfo {
    fn default() -> Self {
        Self {
            service: "csf-server",
            version: env!("CARGO_PKG_VERSION"),
            commit: option_env!("CSF_GIT_SHA"),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repository>,
    pub auth: Arc<SharedAuth>,
    pub build: BuildInfo,
    pub dashboard: csf_config::DashboardConfig,
}

impl AppState {
    pub fn new(
        repo: Arc<dyn Repository>,
        jwt_secret: JwtSecret,
        static_fallback_keys: Vec<csf_auth::StaticKey>,
        jwt_config: &csf_config::JwtConfig,
        dashboard: csf_config::DashboardConfig,
    ) -> Self {
        let auth = AuthService::new(repo.clone(), jwt_secret, static_fallback_keys, jwt_config);
        Self { repo, auth: Arc::new(auth), build: BuildInfo::default(), dashboard }
    }
}
