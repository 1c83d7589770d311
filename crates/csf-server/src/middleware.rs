//! Credential discovery + principal attachment for every protected route.
//!
//! Tries, in order: a browser session cookie, a bearer credential in the
//! `Authorization` header, and a bearer credential in a dedicated cookie —
//! the three-source discovery order `csf-auth::discover_credential`
//! implements.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderMap};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use csf_auth::discover_credential;
use csf_types::{ErrorKind, Principal};

use crate::error::ServerError;
use crate::state::AppState;

fn parse_cookies(headers: &HeaderMap) -> HashMap<String, String> {
    let mut out = HashMap::new();
    let Some(raw) = headers.get(header::COOKIE).and_then(|v| v.to_str().ok()) else {
        return out;
    };
    for pair in raw.split(';') {
        if let Some((k, v)) = pair.trim().split_once('=') {
            out.insert(k.to_string(), v.to_string());
        }
    }
    out
}

pub(crate) fn remote_addr(headers: &HeaderMap, connect_info: Option<SocketAddr>) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            return first.trim().to_string();
        }
    }
    connect_info.map(|a| a.to_string()).unwrap_or_else(|| "unknown".to_string())
}

/// `axum::middleware::from_fn_with_state` target for every route except
/// `/api/v1/health`. Resolves a [`Principal`] and attaches it to the
/// request's extensions for downstream extraction; on failure, records an
/// audit event and returns `401` without distinguishing the reason.
pub async fn require_principal(State(state): State<Arc<AppState>>, mut req: Request, next: Next) -> Response {
    let headers = req.headers().clone();
    let connect_info = req.extensions().get::<ConnectInfo<SocketAddr>>().map(|c| c.0);
    let addr = remote_addr(&headers, connect_info);
    let cookies = parse_cookies(&headers);
    let auth_header = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok());

    let credential = discover_credential(auth_header, |name| cookies.get(name).map(|s| s.as_str()));

    let Some(credential) = credential else {
        record_auth_failure(&state, "none presented", "missing credential", &addr).await;
        return ServerError::new(ErrorKind::Authentication, "no credential presented").into_response();
    };

    match state.auth.authenticate(&credential, Utc::now()).await {
        Ok(principal) => {
            req.extensions_mut().insert(principal);
            next.run(req).await
        }
        Err(e) => {
            record_auth_failure(&state, credential.token(), &e.to_string(), &addr).await;
            ServerError::from(e).into_response()
        }
    }
}

pub(crate) async fn record_auth_failure(state: &AppState, principal_attempt: &str, reason: &str, remote_addr: &str) {
    let attempt_prefix: String = principal_attempt.chars().take(8).collect();
    if let Err(e) = state.repo.insert_audit_event(&attempt_prefix, reason, remote_addr, false, Utc::now()).await {
        tracing::warn!(error = %e, "failed to record authentication-failure audit event");
    }
}

/// Require that `principal` carries the admin role. Machine keys never
/// satisfy this check — admin-only endpoints are user-token only.
pub fn require_admin(principal: &Principal) -> Result<(), ServerError> {
    match principal.role() {
        Some(csf_types::UserRole::Admin) => Ok(()),
        _ => Err(ServerError::new(ErrorKind::Authorization, "admin role required")),
    }
}
