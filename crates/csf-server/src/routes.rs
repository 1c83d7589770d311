//! Axum router and HTTP handlers for `csf-server`.
//!
//! `build_router` is the single entry point; handlers are `pub(crate)` so
//! in-process tests (`tower::ServiceExt::oneshot`) can compose the router
//! directly. Prefix-identifier routes (`/api/v1/clients/:id`) dispatch to
//! a single handler per resource that parses the trailing segment. Cargo.toml
//! pins `axum = "0.7"` (matchit 0.7), so path parameters use the `:id` form —
//! axum 0.8's `{id}` brace syntax would register as a literal static segment.

use std::sync::Arc;

use axum::extract::{Extension, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware as axum_middleware;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use csf_auth::machine_key;
use csf_types::{
    ClearHistoryResponse, ClientInfo, DashboardSummary, ErrorKind, GenerateApiKeyRequest, GenerateApiKeyResponse,
    HealthResponse, LoginRequest, LoginResponse, MeResponse, Principal, RefreshRequest, RegisterClientRequest,
    Submission, SubmissionSummary, SubmitResponse, ToggleApiKeyRequest,
};
use uuid::Uuid;

use crate::error::ServerError;
use crate::middleware::{record_auth_failure, remote_addr, require_admin, require_principal};
use crate::state::AppState;

/// Build the complete application router wired to the given shared state.
/// `/api/v1/health` is the only route not gated by [`require_principal`].
pub fn build_router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/api/v1/compliance/submit", post(submit_compliance))
        .route("/api/v1/clients/register", post(register_client))
        .route("/api/v1/compliance/status/:id", get(compliance_status))
        .route("/api/v1/clients", get(list_clients))
        .route("/api/v1/clients/:id", get(client_detail))
        .route("/api/v1/clients/:id/submissions", get(client_submissions))
        .route("/api/v1/clients/clear-history/:id", post(clear_client_history))
        .route("/api/v1/dashboard/summary", get(dashboard_summary))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/me", get(me))
        .route("/api/v1/apikeys", get(list_api_keys))
        .route("/api/v1/apikeys/generate", post(generate_api_key))
        .route("/api/v1/apikeys/toggle", post(toggle_api_key))
        .route("/api/v1/apikeys/delete", post(delete_api_key))
        .route_layer(axum_middleware::from_fn_with_state(state.clone(), require_principal));

    let public = Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/auth/login", post(login))
        .route("/api/auth/refresh", post(refresh));

    public.merge(protected).with_state(state)
}

// ---------------------------------------------------------------------------
// GET /api/v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.repo.ping().await.is_err() {
        return (StatusCode::SERVICE_UNAVAILABLE, Json(HealthResponse { status: "down", version: state.build.version, commit: None }))
            .into_response();
    }

    (
        StatusCode::OK,
        Json(HealthResponse { status: "ok", version: state.build.version, commit: state.build.commit }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// POST /api/v1/compliance/submit
// ---------------------------------------------------------------------------

pub(crate) async fn submit_compliance(
    State(state): State<Arc<AppState>>,
    Json(submission): Json<Submission>,
) -> Result<impl IntoResponse, ServerError> {
    if submission.client_id.trim().is_empty() {
        return Err(ServerError::validation("client_id must not be empty"));
    }

    state.repo.save_submission(&submission).await?;

    Ok((
        StatusCode::OK,
        Json(SubmitResponse { submission_id: submission.submission_id, status: "accepted", received_at: Utc::now() }),
    ))
}

// ---------------------------------------------------------------------------
// POST /api/v1/clients/register
// ---------------------------------------------------------------------------

pub(crate) async fn register_client(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RegisterClientRequest>,
) -> Result<impl IntoResponse, ServerError> {
    if body.client_id.trim().is_empty() {
        return Err(ServerError::validation("client_id must not be empty"));
    }

    state.repo.upsert_client_liveness(&body.client_id, &body.hostname, &body.system_info, Utc::now()).await?;
    Ok(StatusCode::CREATED)
}

// ---------------------------------------------------------------------------
// GET /api/v1/compliance/status/:id
// ---------------------------------------------------------------------------

pub(crate) async fn compliance_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SubmissionSummary>, ServerError> {
    let submission = state.repo.get_submission(id).await?.ok_or_else(|| ServerError::not_found("no such submission"))?;
    Ok(Json(SubmissionSummary::from(&submission)))
}

// ---------------------------------------------------------------------------
// GET /api/v1/clients
// ---------------------------------------------------------------------------

pub(crate) async fn list_clients(State(state): State<Arc<AppState>>) -> Result<Json<Vec<ClientInfo>>, ServerError> {
    Ok(Json(state.repo.list_clients().await?))
}

// ---------------------------------------------------------------------------
// GET /api/v1/clients/:id
// ---------------------------------------------------------------------------

pub(crate) async fn client_detail(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ClientInfo>, ServerError> {
    let client = state.repo.get_client(&id).await?.ok_or_else(|| ServerError::not_found("no such client"))?;
    Ok(Json(client))
}

// ---------------------------------------------------------------------------
// GET /api/v1/clients/:id/submissions
// ---------------------------------------------------------------------------

pub(crate) async fn client_submissions(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<SubmissionSummary>>, ServerError> {
    state.repo.get_client(&id).await?.ok_or_else(|| ServerError::not_found("no such client"))?;
    Ok(Json(state.repo.list_client_submissions(&id).await?))
}

// ---------------------------------------------------------------------------
// POST /api/v1/clients/clear-history/:id
// ---------------------------------------------------------------------------

pub(crate) async fn clear_client_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ClearHistoryResponse>, ServerError> {
    state.repo.get_client(&id).await?.ok_or_else(|| ServerError::not_found("no such client"))?;
    let deleted_count = state.repo.clear_client_history(&id).await?;
    Ok(Json(ClearHistoryResponse { deleted_count }))
}

// ---------------------------------------------------------------------------
// GET /api/v1/dashboard/summary
// ---------------------------------------------------------------------------

pub(crate) async fn dashboard_summary(State(state): State<Arc<AppState>>) -> Result<Json<DashboardSummary>, ServerError> {
    Ok(Json(state.repo.dashboard_summary().await?))
}

// ---------------------------------------------------------------------------
// POST /api/auth/login
// ---------------------------------------------------------------------------

pub(crate) async fn login(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ServerError> {
    let addr = remote_addr(&headers, None);
    match state.auth.login(&body.username, &body.password, Utc::now()).await {
        Ok((access_token, refresh_token, expires_at)) => Ok(Json(LoginResponse { access_token, refresh_token, expires_at })),
        Err(e) => {
            record_auth_failure(&state, &body.username, &e.to_string(), &addr).await;
            Err(e.into())
        }
    }
}

// ---------------------------------------------------------------------------
// POST /api/auth/refresh
// ---------------------------------------------------------------------------

pub(crate) async fn refresh(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<RefreshRequest>,
) -> Result<Json<LoginResponse>, ServerError> {
    let addr = remote_addr(&headers, None);
    let token_id = Uuid::parse_str(&body.refresh_token).map_err(|_| ServerError::new(ErrorKind::Authentication, "malformed refresh token"))?;

    match state.auth.refresh(token_id, Utc::now()).await {
        Ok((access_token, refresh_token, expires_at)) => Ok(Json(LoginResponse { access_token, refresh_token, expires_at })),
        Err(e) => {
            record_auth_failure(&state, &body.refresh_token, &e.to_string(), &addr).await;
            Err(e.into())
        }
    }
}

// ---------------------------------------------------------------------------
// POST /api/auth/logout
// ---------------------------------------------------------------------------

pub(crate) async fn logout(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<RefreshRequest>,
) -> Result<StatusCode, ServerError> {
    let Principal::UserToken { token_id, expires_at, .. } = principal else {
        return Err(ServerError::new(ErrorKind::Authorization, "logout requires a user token"));
    };
    let refresh_token_id =
        Uuid::parse_str(&body.refresh_token).map_err(|_| ServerError::validation("malformed refresh token"))?;

    state.auth.logout(token_id, expires_at, refresh_token_id).await?;
    Ok(StatusCode::OK)
}

// ---------------------------------------------------------------------------
// GET /api/auth/me
// ---------------------------------------------------------------------------

pub(crate) async fn me(Extension(principal): Extension<Principal>) -> Json<MeResponse> {
    Json(MeResponse { principal })
}

// ---------------------------------------------------------------------------
// GET /api/v1/apikeys
// ---------------------------------------------------------------------------

pub(crate) async fn list_api_keys(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Vec<csf_types::ApiKeySummary>>, ServerError> {
    require_admin(&principal)?;
    let keys = state.repo.list_machine_keys().await?;
    Ok(Json(
        keys.into_iter()
            .map(|k| csf_types::ApiKeySummary {
                id: k.id,
                name: k.name,
                display_prefix: k.display_prefix,
                created_by: k.created_by,
                created_at: k.created_at,
                last_used_at: k.last_used_at,
                expires_at: k.expires_at,
                active: k.active,
            })
            .collect(),
    ))
}

// ---------------------------------------------------------------------------
// POST /api/v1/apikeys/generate
// ---------------------------------------------------------------------------

pub(crate) async fn generate_api_key(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<GenerateApiKeyRequest>,
) -> Result<Json<GenerateApiKeyResponse>, ServerError> {
    require_admin(&principal)?;
    if body.name.trim().is_empty() {
        return Err(ServerError::validation("name must not be empty"));
    }

    let (plain_key, bcrypt_hash, display_prefix) =
        machine_key::generate_key().map_err(|e| ServerError::new(ErrorKind::Permanent, e.to_string()))?;

    let id = state
        .repo
        .create_machine_key(&body.name, &bcrypt_hash, &display_prefix, principal.display_name(), Utc::now(), body.expires_at)
        .await?;

    Ok(Json(GenerateApiKeyResponse { id, plain_key, display_prefix }))
}

// ---------------------------------------------------------------------------
// POST /api/v1/apikeys/toggle
// ---------------------------------------------------------------------------

pub(crate) async fn toggle_api_key(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<ToggleApiKeyRequest>,
) -> Result<StatusCode, ServerError> {
    require_admin(&principal)?;
    state.repo.set_machine_key_active(body.id, body.active).await?;
    Ok(StatusCode::OK)
}

// ---------------------------------------------------------------------------
// POST /api/v1/apikeys/delete
// ---------------------------------------------------------------------------

pub(crate) async fn delete_api_key(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<csf_types::DeleteApiKeyRequest>,
) -> Result<StatusCode, ServerError> {
    require_admin(&principal)?;
    state.repo.delete_machine_key(body.id).await?;
    Ok(StatusCode::OK)
}
