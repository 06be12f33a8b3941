//! Responses the gateway produces itself.
//!
//! # Responsibilities
//! - Turn a `Challenge` or `Redirect` verdict into a response
//! - Serialize it as raw HTTP/1.1 bytes for the socket adapter
//! - Convert it into an axum `Response` for the HTTP adapter
//!
//! # Design Decisions
//! - Challenges are `200 OK` login pages, not `401`, so browsers render
//!   the form instead of a native credential dialog
//! - Redirects after login are `303 See Other` so the retry is a `GET`
//! - The session cookie is scoped to `/` for the whole protected site

use axum::body::Body;
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::Response;

use crate::auth::credential::SESSION_COOKIE;
use crate::auth::resolver::{Challenge, Verdict};
use crate::http::login::render_login_page;

/// A complete response that never touches the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayResponse {
    pub status: StatusCode,
    pub headers: Vec<(&'static str, String)>,
    pub body: Vec<u8>,
}

impl GatewayResponse {
    fn new(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    /// Login page, optionally handing out a pending session cookie.
    pub fn challenge(challenge: &Challenge) -> Self {
        let page = render_login_page(challenge.prompt);
        let mut response = Self::new(StatusCode::OK, page)
            .with_header("Content-Type", "text/html; charset=utf-8")
            .with_header("Cache-Control", "no-store");
        if let Some(id) = &challenge.set_cookie {
            response = response.with_header("Set-Cookie", session_cookie(id));
        }
        response
    }

    /// Send the client back to where it was going.
    pub fn redirect(location: &str) -> Self {
        Self::new(StatusCode::SEE_OTHER, Vec::new())
            .with_header("Location", location)
            .with_header("Cache-Control", "no-store")
    }

    /// Plain-text error, used when a request cannot be parsed.
    pub fn error(status: StatusCode, message: &str) -> Self {
        Self::new(status, message.as_bytes().to_vec())
            .with_header("Content-Type", "text/plain; charset=utf-8")
    }

    /// Response for a verdict that does not forward.
    pub fn from_verdict(verdict: &Verdict) -> Option<Self> {
        match verdict {
            Verdict::Forward(_) => None,
            Verdict::Challenge(challenge) => Some(Self::challenge(challenge)),
            Verdict::Redirect { location } => Some(Self::redirect(location)),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Serialize as an HTTP/1.1 response.
    pub fn to_bytes(&self, close: bool) -> Vec<u8> {
        let mut head = format!(
            "HTTP/1.1 {} {}\r\n",
            self.status.as_u16(),
            self.status.canonical_reason().unwrap_or("")
        );
        for (name, value) in &self.headers {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(&strip_line_breaks(value));
            head.push_str("\r\n");
        }
        head.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        head.push_str(if close {
            "Connection: close\r\n"
        } else {
            "Connection: keep-alive\r\n"
        });
        head.push_str("\r\n");

        let mut bytes = head.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }

    pub fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        for (name, value) in self.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value),
            ) {
                (Ok(name), Ok(value)) => {
                    response.headers_mut().append(name, value);
                }
                _ => tracing::warn!(header = name, "Dropping unrepresentable response header"),
            }
        }
        response
            .headers_mut()
            .entry(header::CONTENT_TYPE)
            .or_insert(HeaderValue::from_static("text/plain; charset=utf-8"));
        response
    }
}

fn session_cookie(id: &str) -> String {
    format!("{SESSION_COOKIE}={id}; Path=/; HttpOnly; SameSite=Lax")
}

fn strip_line_breaks(value: &str) -> String {
    value.chars().filter(|c| *c != '\r' && *c != '\n').collect()
}
