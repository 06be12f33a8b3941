//! Credential extraction from request headers.
//!
//! Malformed input (bad base64, missing separator, empty cookie value) is
//! never an error here; it simply yields no credential.

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::http::request::Headers;

/// Name of the cookie correlating a browser with its server-side session.
pub const SESSION_COOKIE: &str = "session_id";

/// A caller-supplied proof of identity.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Basic { username: String, password: String },
    Bearer { token: String },
    ApiKey { token: String },
    SessionCookie { session_id: String },
    None,
}

impl Credential {
    /// Scheme label for logs and metrics. Never includes secret material.
    pub fn scheme(&self) -> &'static str {
        match self {
            Credential::Basic { .. } => "basic",
            Credential::Bearer { .. } => "bearer",
            Credential::ApiKey { .. } => "apikey",
            Credential::SessionCookie { .. } => "cookie",
            Credential::None => "none",
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .finish_non_exhaustive(),
            Credential::SessionCookie { session_id } => f
                .debug_struct("SessionCookie")
                .field("session_id", &redact(session_id))
                .finish(),
            other => f.write_str(other.scheme()),
        }
    }
}

/// Extract the single credential that takes priority for this request.
///
/// The `Authorization` header wins over the session cookie whenever it
/// carries a recognized scheme.
pub fn extract(headers: &Headers) -> Credential {
    if let Some(credential) = authorization(headers) {
        return credential;
    }
    match session_cookie(headers) {
        Some(session_id) => Credential::SessionCookie { session_id },
        None => Credential::None,
    }
}

/// Decode the `Authorization` header, if present and well-formed.
pub fn authorization(headers: &Headers) -> Option<Credential> {
    let value = headers.get("authorization")?.trim();
    let (scheme, rest) = value.split_once(' ')?;
    let rest = rest.trim();
    if rest.is_empty() {
        return None;
    }

    if scheme.eq_ignore_ascii_case("basic") {
        let decoded = STANDARD.decode(rest).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (username, password) = decoded.split_once(':')?;
        Some(Credential::Basic {
            username: username.to_string(),
            password: password.to_string(),
        })
    } else if scheme.eq_ignore_ascii_case("bearer") {
        Some(Credential::Bearer {
            token: rest.to_string(),
        })
    } else if scheme.eq_ignore_ascii_case("apikey") {
        Some(Credential::ApiKey {
            token: rest.to_string(),
        })
    } else {
        None
    }
}

/// Find the `session_id` cookie value.
pub fn session_cookie(headers: &Headers) -> Option<String> {
    headers
        .get("cookie")?
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| name.trim() == SESSION_COOKIE)
        .map(|(_, value)| value.trim().trim_matches('"'))
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Short, log-safe prefix of a session id.
pub fn redact(session_id: &str) -> String {
    let prefix: String = session_id.chars().take(6).collect();
    format!("{prefix}…")
}
