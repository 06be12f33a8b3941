//! The authentication decision.
//!
//! Every request to a protected path is judged exactly once, checks are
//! applied in a fixed order and the first success wins:
//!
//! ```text
//! excluded path ───────────────────────────────▶ Forward
//! Authorization (Basic / Bearer / ApiKey) ok ──▶ Forward
//! session_id cookie signed in and fresh ───────▶ Forward
//! POST + cookie (login form)
//!     empty password ──────────────────────────▶ Challenge(PasswordRequired)
//!     valid password, session signed in ───────▶ Redirect(target)
//!     otherwise ───────────────────────────────▶ Challenge(InvalidCredentials)
//! anything else ───────────────────────────────▶ Challenge(SignIn)
//! ```
//!
//! A challenge carries a fresh pending session id whenever the client did
//! not present a cookie the store still knows about.

use std::sync::Arc;

use crate::auth::account::Account;
use crate::auth::credential::{self, redact, Credential};
use crate::auth::session::SessionStore;
use crate::http::request::{split_path, Headers, ParsedRequest};
use crate::observability::metrics;

/// Paths forwarded without any checks by default.
pub const DEFAULT_EXCLUDED_PATHS: &[&str] = &["/favicon.ico"];

/// Adapter-neutral view of one request.
#[derive(Debug, Clone, Default)]
pub struct AuthRequest {
    pub method: String,
    /// Request target including the query string.
    pub target: String,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl AuthRequest {
    pub fn new(method: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            target: target.into(),
            ..Self::default()
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn path(&self) -> &str {
        split_path(&self.target)
    }
}

impl From<ParsedRequest> for AuthRequest {
    fn from(req: ParsedRequest) -> Self {
        Self {
            method: req.method,
            target: req.target,
            headers: req.headers,
            body: req.body,
        }
    }
}

/// Why a request was let through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    ExcludedPath,
    Token,
    Password,
    Session,
}

impl Admission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Admission::ExcludedPath => "excluded_path",
            Admission::Token => "token",
            Admission::Password => "password",
            Admission::Session => "session",
        }
    }
}

/// Message variant shown on the login page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginPrompt {
    SignIn,
    PasswordRequired,
    InvalidCredentials,
}

impl LoginPrompt {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoginPrompt::SignIn => "sign_in",
            LoginPrompt::PasswordRequired => "password_required",
            LoginPrompt::InvalidCredentials => "invalid_credentials",
        }
    }
}

/// Login page to send back instead of contacting the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub prompt: LoginPrompt,
    /// New pending session id to hand out as the `session_id` cookie.
    pub set_cookie: Option<String>,
}

/// The single outcome for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Forward(Admission),
    Challenge(Challenge),
    Redirect { location: String },
}

impl Verdict {
    pub fn is_forward(&self) -> bool {
        matches!(self, Verdict::Forward(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Forward(_) => "forward",
            Verdict::Challenge(_) => "challenge",
            Verdict::Redirect { .. } => "redirect",
        }
    }

    fn reason(&self) -> &'static str {
        match self {
            Verdict::Forward(admission) => admission.as_str(),
            Verdict::Challenge(challenge) => challenge.prompt.as_str(),
            Verdict::Redirect { .. } => "signed_in",
        }
    }
}

/// Orchestrates credential checks against the account and session store.
///
/// Holds no per-request state; safe to share across connections.
#[derive(Debug, Clone)]
pub struct Authenticator {
    account: Account,
    sessions: Arc<SessionStore>,
    excluded_paths: Vec<String>,
}

impl Authenticator {
    pub fn new(account: Account, sessions: Arc<SessionStore>) -> Self {
        Self {
            account,
            sessions,
            excluded_paths: DEFAULT_EXCLUDED_PATHS.iter().map(|p| p.to_string()).collect(),
        }
    }

    pub fn with_excluded_paths(mut self, paths: Vec<String>) -> Self {
        self.excluded_paths = paths;
        self
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    /// Judge one complete request.
    pub fn authenticate(&self, request: &AuthRequest) -> Verdict {
        let verdict = self.decide(request);
        metrics::record_verdict(verdict.label(), verdict.reason());
        tracing::debug!(
            method = %request.method,
            path = %request.path(),
            verdict = verdict.label(),
            reason = verdict.reason(),
            "Authentication decided"
        );
        verdict
    }

    fn decide(&self, request: &AuthRequest) -> Verdict {
        if self.excluded_paths.iter().any(|p| p == request.path()) {
            return Verdict::Forward(Admission::ExcludedPath);
        }

        if let Some(credential) = credential::authorization(&request.headers) {
            if let Some(admission) = self.check_authorization(&credential) {
                return Verdict::Forward(admission);
            }
            tracing::debug!(scheme = credential.scheme(), "Authorization credential rejected");
        }

        let session_id = credential::session_cookie(&request.headers);
        if let Some(id) = session_id.as_deref() {
            if self.sessions.verify(id) {
                return Verdict::Forward(Admission::Session);
            }
        }

        match session_id.as_deref() {
            Some(id) if request.method.eq_ignore_ascii_case("POST") => {
                self.submit_login(id, request)
            }
            other => self.challenge(LoginPrompt::SignIn, other),
        }
    }

    fn check_authorization(&self, credential: &Credential) -> Option<Admission> {
        match credential {
            Credential::Basic { username, password } if username.is_empty() => {
                self.account.verify_token(password).then_some(Admission::Token)
            }
            Credential::Basic { username, password } => self
                .account
                .verify_password(username, password)
                .then_some(Admission::Password),
            Credential::Bearer { token } | Credential::ApiKey { token } => {
                self.account.verify_token(token).then_some(Admission::Token)
            }
            Credential::SessionCookie { .. } | Credential::None => None,
        }
    }

    /// Handle a login form posted back with the pending session cookie.
    fn submit_login(&self, session_id: &str, request: &AuthRequest) -> Verdict {
        let form = LoginForm::decode(&request.body);

        if form.password.is_empty() {
            tracing::info!(
                session = %redact(session_id),
                username = %form.username,
                "Login attempted with empty password"
            );
            metrics::record_login("empty_password");
            return self.challenge(LoginPrompt::PasswordRequired, Some(session_id));
        }

        if !self.account.verify_password(&form.username, &form.password) {
            tracing::warn!(
                session = %redact(session_id),
                username = %form.username,
                "Login failed"
            );
            metrics::record_login("invalid");
            return self.challenge(LoginPrompt::InvalidCredentials, Some(session_id));
        }

        if !self.sessions.sign_in(session_id) {
            // Correct password but the pending session is gone; start over.
            tracing::info!(session = %redact(session_id), "Login for unknown session, reissuing");
            metrics::record_login("stale_session");
            return self.challenge(LoginPrompt::SignIn, None);
        }

        tracing::info!(
            session = %redact(session_id),
            username = %form.username,
            "Signed in"
        );
        metrics::record_login("success");
        Verdict::Redirect {
            location: redirect_target(&request.target),
        }
    }

    fn challenge(&self, prompt: LoginPrompt, session_id: Option<&str>) -> Verdict {
        let known = session_id.is_some_and(|id| self.sessions.is_known(id));
        let set_cookie = (!known).then(|| self.sessions.create().id);
        Verdict::Challenge(Challenge { prompt, set_cookie })
    }
}

/// Same-origin path to send the browser to after login. Targets a browser
/// could resolve to another host become `/`.
fn redirect_target(target: &str) -> String {
    if target.starts_with('/') && !target.starts_with("//") && !target.starts_with("/\\") {
        target.to_string()
    } else {
        "/".to_string()
    }
}

/// `application/x-www-form-urlencoded` login fields. Missing fields decode empty.
#[derive(Debug, Default, PartialEq, Eq)]
struct LoginForm {
    username: String,
    password: String,
}

impl LoginForm {
    fn decode(body: &[u8]) -> Self {
        let mut form = LoginForm::default();
        let mut seen_user = false;
        let mut seen_pass = false;
        for (key, value) in url::form_urlencoded::parse(body) {
            match key.as_ref() {
                "username" if !seen_user => {
                    form.username = value.into_owned();
                    seen_user = true;
                }
                "password" if !seen_pass => {
                    form.password = value.into_owned();
                    seen_pass = true;
                }
                _ => {}
            }
        }
        form
    }
}
