//! In-process scenario tests for `csf-server`'s HTTP endpoints.
//!
//! These tests spin up the Axum router **without** binding a TCP socket:
//! each test calls `routes::build_router` and drives it via
//! `tower::ServiceExt::oneshot` against an in-memory
//! [`csf_testkit::FakeRepository`] — no Postgres instance required.

use std::sync::Arc;

use axum::http::StatusCode;
use chrono::Utc;
use csf_config::secrets::{resolve_jwt_secret, RunMode};
use csf_server::{routes, state::AppState};
use csf_testkit::{http, FakeRepository};
use csf_types::{CheckOutcome, CheckStatus, RegisterClientRequest, Submission, SystemInfo};
use uuid::Uuid;

fn make_state() -> Arc<AppState> {
    let repo: Arc<dyn csf_db::Repository> = Arc::new(FakeRepository::new());
    let jwt_secret = resolve_jwt_secret(RunMode::Development, Some("test-signing-secret".into())).unwrap();
    Arc::new(AppState::new(repo, jwt_secret, Vec::new(), &csf_config::JwtConfig::default(), csf_config::DashboardConfig::default()))
}

fn make_router() -> axum::Router {
    routes::build_router(make_state())
}

fn sample_system_info() -> SystemInfo {
    SystemInfo {
        os_id: "windows".into(),
        os_build: "19045".into(),
        arch: "x86_64".into(),
        domain: "CORP".into(),
        primary_ipv4: "10.0.0.5".into(),
        primary_mac: "aa:bb:cc:dd:ee:ff".into(),
    }
}

fn sample_submission(client_id: &str, status: CheckStatus) -> Submission {
    let checks = vec![CheckOutcome {
        name: "reg.password_policy".into(),
        description: "minimum password length".into(),
        status,
        expected: "14".into(),
        actual: "14".into(),
        message: "observed".into(),
    }];
    Submission::new(Uuid::new_v4(), client_id, client_id, Utc::now(), "baseline", "1", checks, Vec::new(), sample_system_info())
}

// ---------------------------------------------------------------------------
// GET /api/v1/health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_returns_200_ok_when_store_is_reachable() {
    let router = make_router();
    let (status, body) = http::call(router, http::get("/api/v1/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn health_returns_503_when_store_is_down() {
    let repo = Arc::new(FakeRepository::new());
    repo.set_healthy(false);
    let repo_dyn: Arc<dyn csf_db::Repository> = repo;
    let jwt_secret = resolve_jwt_secret(RunMode::Development, Some("test-signing-secret".into())).unwrap();
    let state = Arc::new(AppState::new(repo_dyn, jwt_secret, Vec::new(), &csf_config::JwtConfig::default(), csf_config::DashboardConfig::default()));

    let (status, body) = http::call(routes::build_router(state), http::get("/api/v1/health")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "down");
}

// ---------------------------------------------------------------------------
// Unauthenticated access to a protected route is rejected
// ---------------------------------------------------------------------------

#[tokio::test]
async fn protected_route_without_credential_returns_401() {
    let router = make_router();
    let (status, _) = http::call(router, http::get("/api/v1/clients")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// ---------------------------------------------------------------------------
// POST /api/v1/compliance/submit, gated by a machine key
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submit_compliance_rejects_empty_client_id() {
    let repo = Arc::new(FakeRepository::new());
    let (plain_key, bcrypt_hash, prefix) = csf_auth::machine_key::generate_key().unwrap();
    repo.seed_machine_key(csf_types::MachineKeyRecord {
        id: 1,
        name: "ci-runner".into(),
        bcrypt_hash,
        display_prefix: prefix,
        created_by: "admin".into(),
        created_at: Utc::now(),
        last_used_at: None,
        expires_at: None,
        active: true,
    });
    let repo_dyn: Arc<dyn csf_db::Repository> = repo;
    let jwt_secret = resolve_jwt_secret(RunMode::Development, Some("test-signing-secret".into())).unwrap();
    let state = Arc::new(AppState::new(repo_dyn, jwt_secret, Vec::new(), &csf_config::JwtConfig::default(), csf_config::DashboardConfig::default()));

    let mut submission = sample_submission("client-a", CheckStatus::Pass);
    submission.client_id = "   ".into();

    let req = http::post_json_auth("/api/v1/compliance/submit", &plain_key, &submission);
    let (status, _) = http::call(routes::build_router(state), req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn submit_compliance_then_list_clients_round_trips() {
    let repo = Arc::new(FakeRepository::new());
    let (plain_key, bcrypt_hash, prefix) = csf_auth::machine_key::generate_key().unwrap();
    repo.seed_machine_key(csf_types::MachineKeyRecord {
        id: 1,
        name: "ci-runner".into(),
        bcrypt_hash,
        display_prefix: prefix,
        created_by: "admin".into(),
        created_at: Utc::now(),
        last_used_at: None,
        expires_at: None,
        active: true,
    });
    let repo_dyn: Arc<dyn csf_db::Repository> = repo;
    let jwt_secret = resolve_jwt_secret(RunMode::Development, Some("test-signing-secret".into())).unwrap();
    let state = Arc::new(AppState::new(repo_dyn, jwt_secret, Vec::new(), &csf_config::JwtConfig::default(), csf_config::DashboardConfig::default()));

    let submission = sample_submission("client-a", CheckStatus::Pass);
    let submit_req = http::post_json_auth("/api/v1/compliance/submit", &plain_key, &submission);
    let (status, body) = http::call(routes::build_router(state.clone()), submit_req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "accepted");

    let list_req = http::get_auth("/api/v1/clients", &plain_key);
    let (status, body) = http::call(routes::build_router(state), list_req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["client_id"], "client-a");
}

#[tokio::test]
async fn duplicate_submission_id_returns_conflict() {
    let repo = Arc::new(FakeRepository::new());
    let (plain_key, bcrypt_hash, prefix) = csf_auth::machine_key::generate_key().unwrap();
    repo.seed_machine_key(csf_types::MachineKeyRecord {
        id: 1,
        name: "ci-runner".into(),
        bcrypt_hash,
        display_prefix: prefix,
        created_by: "admin".into(),
        created_at: Utc::now(),
        last_used_at: None,
        expires_at: None,
        active: true,
    });
    let repo_dyn: Arc<dyn csf_db::Repository> = repo;
    let jwt_secret = resolve_jwt_secret(RunMode::Development, Some("test-signing-secret".into())).unwrap();
    let state = Arc::new(AppState::new(repo_dyn, jwt_secret, Vec::new(), &csf_config::JwtConfig::default(), csf_config::DashboardConfig::default()));

    let submission = sample_submission("client-a", CheckStatus::Pass);
    let first = http::post_json_auth("/api/v1/compliance/submit", &plain_key, &submission);
    let (status, _) = http::call(routes::build_router(state.clone()), first).await;
    assert_eq!(status, StatusCode::OK);

    let replay = http::post_json_auth("/api/v1/compliance/submit", &plain_key, &submission);
    let (status, _) = http::call(routes::build_router(state), replay).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

// ---------------------------------------------------------------------------
// POST /api/v1/clients/register
// ---------------------------------------------------------------------------

#[tokio::test]
async fn register_client_rejects_empty_client_id() {
    let repo = Arc::new(FakeRepository::new());
    let (plain_key, bcrypt_hash, prefix) = csf_auth::machine_key::generate_key().unwrap();
    repo.seed_machine_key(csf_types::MachineKeyRecord {
        id: 1,
        name: "ci-runner".into(),
        bcrypt_hash,
        display_prefix: prefix,
        created_by: "admin".into(),
        created_at: Utc::now(),
        last_used_at: None,
        expires_at: None,
        active: true,
    });
    let repo_dyn: Arc<dyn csf_db::Repository> = repo;
    let jwt_secret = resolve_jwt_secret(RunMode::Development, Some("test-signing-secret".into())).unwrap();
    let state = Arc::new(AppState::new(repo_dyn, jwt_secret, Vec::new(), &csf_config::JwtConfig::default(), csf_config::DashboardConfig::default()));

    let body = RegisterClientRequest { client_id: "".into(), hostname: "HOST".into(), system_info: sample_system_info() };
    let req = http::post_json_auth("/api/v1/clients/register", &plain_key, &body);
    let (status, _) = http::call(routes::build_router(state), req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// GET /api/v1/clients/:id and /api/v1/compliance/status/:id for a real id
// ---------------------------------------------------------------------------

#[tokio::test]
async fn client_detail_returns_200_for_a_real_client_id() {
    let repo = Arc::new(FakeRepository::new());
    let (plain_key, bcrypt_hash, prefix) = csf_auth::machine_key::generate_key().unwrap();
    repo.seed_machine_key(csf_types::MachineKeyRecord {
        id: 1,
        name: "ci-runner".into(),
        bcrypt_hash,
        display_prefix: prefix,
        created_by: "admin".into(),
        created_at: Utc::now(),
        last_used_at: None,
        expires_at: None,
        active: true,
    });
    let repo_dyn: Arc<dyn csf_db::Repository> = repo;
    let jwt_secret = resolve_jwt_secret(RunMode::Development, Some("test-signing-secret".into())).unwrap();
    let state = Arc::new(AppState::new(repo_dyn, jwt_secret, Vec::new(), &csf_config::JwtConfig::default(), csf_config::DashboardConfig::default()));

    let submission = sample_submission("client-a", CheckStatus::Pass);
    let submit_req = http::post_json_auth("/api/v1/compliance/submit", &plain_key, &submission);
    let (status, _) = http::call(routes::build_router(state.clone()), submit_req).await;
    assert_eq!(status, StatusCode::OK);

    let detail_req = http::get_auth("/api/v1/clients/client-a", &plain_key);
    let (status, body) = http::call(routes::build_router(state), detail_req).await;
    assert_eq!(status, StatusCode::OK, "real-id route must dispatch to the handler, not fall through to a 404 route-miss");
    assert_eq!(body["client_id"], "client-a");
}

#[tokio::test]
async fn compliance_status_returns_200_for_a_real_submission_id() {
    let repo = Arc::new(FakeRepository::new());
    let (plain_key, bcrypt_hash, prefix) = csf_auth::machine_key::generate_key().unwrap();
    repo.seed_machine_key(csf_types::MachineKeyRecord {
        id: 1,
        name: "ci-runner".into(),
        bcrypt_hash,
        display_prefix: prefix,
        created_by: "admin".into(),
        created_at: Utc::now(),
        last_used_at: None,
        expires_at: None,
        active: true,
    });
    let repo_dyn: Arc<dyn csf_db::Repository> = repo;
    let jwt_secret = resolve_jwt_secret(RunMode::Development, Some("test-signing-secret".into())).unwrap();
    let state = Arc::new(AppState::new(repo_dyn, jwt_secret, Vec::new(), &csf_config::JwtConfig::default(), csf_config::DashboardConfig::default()));

    let submission = sample_submission("client-a", CheckStatus::Pass);
    let submit_req = http::post_json_auth("/api/v1/compliance/submit", &plain_key, &submission);
    let (status, _) = http::call(routes::build_router(state.clone()), submit_req).await;
    assert_eq!(status, StatusCode::OK);

    let status_req = http::get_auth(&format!("/api/v1/compliance/status/{}", submission.submission_id), &plain_key);
    let (status, body) = http::call(routes::build_router(state), status_req).await;
    assert_eq!(status, StatusCode::OK, "real-id route must dispatch to the handler, not fall through to a 404 route-miss");
    assert_eq!(body["submission_id"], submission.submission_id.to_string());
}

// ---------------------------------------------------------------------------
// GET /api/v1/clients/:id for an unknown client
// ---------------------------------------------------------------------------

#[tokio::test]
async fn client_detail_returns_404_for_unknown_client() {
    let repo = Arc::new(FakeRepository::new());
    let (plain_key, bcrypt_hash, prefix) = csf_auth::machine_key::generate_key().unwrap();
    repo.seed_machine_key(csf_types::MachineKeyRecord {
        id: 1,
        name: "ci-runner".into(),
        bcrypt_hash,
        display_prefix: prefix,
        created_by: "admin".into(),
        created_at: Utc::now(),
        last_used_at: None,
        expires_at: None,
        active: true,
    });
    let repo_dyn: Arc<dyn csf_db::Repository> = repo;
    let jwt_secret = resolve_jwt_secret(RunMode::Development, Some("test-signing-secret".into())).unwrap();
    let state = Arc::new(AppState::new(repo_dyn, jwt_secret, Vec::new(), &csf_config::JwtConfig::default(), csf_config::DashboardConfig::default()));

    let req = http::get_auth("/api/v1/clients/does-not-exist", &plain_key);
    let (status, _) = http::call(routes::build_router(state), req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Login, then use the access token against a protected route
// ---------------------------------------------------------------------------

#[tokio::test]
async fn login_then_me_returns_admin_principal() {
    let repo = Arc::new(FakeRepository::new());
    let hash = bcrypt::hash("correct horse battery staple", bcrypt::DEFAULT_COST).unwrap();
    repo.seed_user(csf_types::UserRecord {
        username: "admin".into(),
        bcrypt_hash: hash,
        role: csf_types::UserRole::Admin,
        created_at: Utc::now(),
        last_login: None,
        token_generation: 0,
    });
    let repo_dyn: Arc<dyn csf_db::Repository> = repo;
    let jwt_secret = resolve_jwt_secret(RunMode::Development, Some("test-signing-secret".into())).unwrap();
    let state = Arc::new(AppState::new(repo_dyn, jwt_secret, Vec::new(), &csf_config::JwtConfig::default(), csf_config::DashboardConfig::default()));

    let login_body = csf_types::LoginRequest { username: "admin".into(), password: "correct horse battery staple".into() };
    let login_req = http::post_json("/api/auth/login", &login_body);
    let (status, body) = http::call(routes::build_router(state.clone()), login_req).await;
    assert_eq!(status, StatusCode::OK);
    let access_token = body["access_token"].as_str().unwrap().to_string();

    let me_req = http::get_auth("/api/auth/me", &access_token);
    let (status, body) = http::call(routes::build_router(state), me_req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["principal"]["role"], "admin");
}

#[tokio::test]
async fn login_with_wrong_password_returns_generic_401() {
    let repo = Arc::new(FakeRepository::new());
    let hash = bcrypt::hash("correct horse battery staple", bcrypt::DEFAULT_COST).unwrap();
    repo.seed_user(csf_types::UserRecord {
        username: "admin".into(),
        bcrypt_hash: hash,
        role: csf_types::UserRole::Admin,
        created_at: Utc::now(),
        last_login: None,
        token_generation: 0,
    });
    let repo_dyn: Arc<dyn csf_db::Repository> = repo.clone();
    let jwt_secret = resolve_jwt_secret(RunMode::Development, Some("test-signing-secret".into())).unwrap();
    let state = Arc::new(AppState::new(repo_dyn, jwt_secret, Vec::new(), &csf_config::JwtConfig::default(), csf_config::DashboardConfig::default()));

    let login_body = csf_types::LoginRequest { username: "admin".into(), password: "wrong".into() };
    let login_req = http::post_json("/api/auth/login", &login_body);
    let (status, body) = http::call(routes::build_router(state), login_req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    // The four rejection reasons are never distinguishable from the response body.
    assert_eq!(body["error"]["message"], "authentication failed");
    assert_eq!(repo.audit_events().len(), 1, "failed login must be recorded in the audit log");
}

// ---------------------------------------------------------------------------
// Non-admin principals cannot reach the API key admin surface
// ---------------------------------------------------------------------------

#[tokio::test]
async fn viewer_cannot_generate_api_key() {
    let repo = Arc::new(FakeRepository::new());
    let hash = bcrypt::hash("viewer-pass", bcrypt::DEFAULT_COST).unwrap();
    repo.seed_user(csf_types::UserRecord {
        username: "viewer".into(),
        bcrypt_hash: hash,
        role: csf_types::UserRole::Viewer,
        created_at: Utc::now(),
        last_login: None,
        token_generation: 0,
    });
    let repo_dyn: Arc<dyn csf_db::Repository> = repo;
    let jwt_secret = resolve_jwt_secret(RunMode::Development, Some("test-signing-secret".into())).unwrap();
    let state = Arc::new(AppState::new(repo_dyn, jwt_secret, Vec::new(), &csf_config::JwtConfig::default(), csf_config::DashboardConfig::default()));

    let login_body = csf_types::LoginRequest { username: "viewer".into(), password: "viewer-pass".into() };
    let login_req = http::post_json("/api/auth/login", &login_body);
    let (_, body) = http::call(routes::build_router(state.clone()), login_req).await;
    let access_token = body["access_token"].as_str().unwrap().to_string();

    let gen_body = csf_types::GenerateApiKeyRequest { name: "new-key".into(), expires_at: None };
    let gen_req = http::post_json_auth("/api/v1/apikeys/generate", &access_token, &gen_body);
    let (status, _) = http::call(routes::build_router(state), gen_req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

// ---------------------------------------------------------------------------
// Unknown routes return 404
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_route_returns_404() {
    let router = make_router();
    let (status, _) = http::call(router, http::get("/api/v1/does-not-exist")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
