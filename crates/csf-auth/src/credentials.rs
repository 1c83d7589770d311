//! Credential discovery: pulls a bearer-style credential out of a request,
//! independent of the HTTP framework in front of it. Tried in order: the
//! browser session cookie, the `Authorization: Bearer` header, then a
//! dedicated bearer cookie.

pub const SESSION_COOKIE: &str = "csf_session";
pub const BEARER_COOKIE: &str = "csf_bearer";

/// One discovered credential, tagged by where it came from. The caller
/// decides how to validate each kind (session cookie and bearer cookie both
/// carry an access token in this scheme; only their presentation differs).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    SessionCookie(String),
    AuthorizationHeader(String),
    BearerCookie(String),
}

impl Credential {
    pub fn token(&self) -> &str {
        match self {
            Credential::SessionCookie(t) => t,
            Credential::AuthorizationHeader(t) => t,
            Credential::BearerCookie(t) => t,
        }
    }
}

/// Discover a credential given the raw `Authorization` header value (if any)
/// and a lookup function for cookies by name. Order: session cookie,
/// `Authorization` header (`Bearer <token>` or the raw value), bearer
/// cookie.
pub fn discover_credential<'a>(
    authorization_header: Option<&'a str>,
    cookie: impl Fn(&str) -> Option<&'a str>,
) -> Option<Credential> {
    if let Some(token) = cookie(SESSION_COOKIE) {
        if !token.is_empty() {
            return Some(Credential::SessionCookie(token.to_string()));
        }
    }

    if let Some(header) = authorization_header {
        let token = header
            .split_once(' ')
            .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("Bearer"))
            .map(|(_, rest)| rest)
            .unwrap_or(header);
        if !token.is_empty() {
            return Some(Credential::AuthorizationHeader(token.to_string()));
        }
    }

    if let Some(token) = cookie(BEARER_COOKIE) {
        if !token.is_empty() {
            return Some(Credential::BearerCookie(token.to_string()));
        }
    }

    None
}
