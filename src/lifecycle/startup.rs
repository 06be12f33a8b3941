//! Startup orchestration.
//!
//! # Responsibilities
//! - Turn validated configuration into the shared authenticator
//! - Start background tasks (session sweeper)
//! - Bind the listener and run the selected adapter until shutdown
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - The listener binds last, so traffic only arrives once sessions and
//!   credentials are ready

use std::sync::Arc;

use tokio::net::TcpListener;

use crate::auth::account::{generate_token, Account, StaticUsers};
use crate::auth::resolver::Authenticator;
use crate::auth::session::{SessionStore, SessionSweeper};
use crate::config::{AuthConfig, GatewayConfig};
use crate::error::GatewayError;
use crate::http::HttpServer;
use crate::lifecycle::shutdown::Shutdown;
use crate::net::listener::{Listener, ListenerError};
use crate::net::socket::SocketServer;

/// Which proxy adapter fronts the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adapter {
    /// Full HTTP handling, every request judged.
    Http,
    /// Raw TCP relay that judges every request on the connection.
    Socket,
}

impl Adapter {
    pub fn as_str(&self) -> &'static str {
        match self {
            Adapter::Http => "http",
            Adapter::Socket => "socket",
        }
    }
}

/// Fill in a random API token when none is configured.
///
/// Returns true if one was generated.
pub fn ensure_api_token(auth: &mut AuthConfig) -> bool {
    if auth.api_token.as_deref().is_some_and(|t| !t.is_empty()) {
        return false;
    }
    let token = generate_token();
    tracing::info!(api_token = %token, "No API token configured, generated one for this run");
    auth.api_token = Some(token);
    true
}

/// Build the authenticator and its session store from configuration.
pub fn build_authenticator(config: &GatewayConfig) -> Arc<Authenticator> {
    let users = StaticUsers::new(config.auth.users.iter());
    if users.is_empty() {
        tracing::warn!("No users configured, browser login is disabled");
    }

    let account = Account::new(config.auth.api_token.clone(), Arc::new(users));
    let sessions = Arc::new(SessionStore::new(config.session.lifetime()));
    Arc::new(
        Authenticator::new(account, sessions).with_excluded_paths(config.auth.excluded_paths.clone()),
    )
}

/// Run the gateway until `shutdown` is triggered.
pub async fn run(
    mut config: GatewayConfig,
    adapter: Adapter,
    shutdown: Shutdown,
) -> Result<(), GatewayError> {
    ensure_api_token(&mut config.auth);
    let authenticator = build_authenticator(&config);

    let sweeper = SessionSweeper::new(
        Arc::clone(authenticator.sessions()),
        config.session.sweep_interval(),
    );
    let sweeper = tokio::spawn(sweeper.run(shutdown.subscribe()));

    tracing::info!(
        adapter = adapter.as_str(),
        bind_address = %config.listener.bind_address,
        target = %config.target.url,
        session_lifetime_hours = config.session.lifetime_hours,
        "Gateway starting"
    );

    let result = match adapter {
        Adapter::Http => {
            let server = HttpServer::new(&config, authenticator)?;
            let listener = TcpListener::bind(&config.listener.bind_address)
                .await
                .map_err(|source| ListenerError::Bind {
                    address: config.listener.bind_address.clone(),
                    source,
                })?;
            server.run(listener, shutdown.subscribe()).await
        }
        Adapter::Socket => {
            let server = SocketServer::new(&config, authenticator)?;
            let listener = Listener::bind(&config.listener).await?;
            server.run(listener, shutdown.subscribe()).await
        }
    };

    // The server may have stopped on its own; make sure the sweeper does too.
    shutdown.trigger();
    if let Err(e) = sweeper.await {
        tracing::warn!(error = %e, "Session sweeper task failed");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::resolver::{AuthRequest, Verdict};

    #[test]
    fn generates_token_only_when_missing() {
        let mut auth = AuthConfig::default();
        assert!(ensure_api_token(&mut auth));
        let token = auth.api_token.clone().unwrap();
        assert_eq!(token.len(), 32);

        assert!(!ensure_api_token(&mut auth));
        assert_eq!(auth.api_token.as_deref(), Some(token.as_str()));

        auth.api_token = Some(String::new());
        assert!(ensure_api_token(&mut auth));
    }

    #[test]
    fn authenticator_uses_configured_credentials() {
        let mut config = GatewayConfig::default();
        config.auth.api_token = Some("secret".into());
        config.auth.users.insert("demo".into(), "test".into());
        config.auth.excluded_paths = vec!["/health".into()];

        let authenticator = build_authenticator(&config);
        assert!(authenticator.account().verify_token("secret"));
        assert!(authenticator.account().verify_password("demo", "test"));
        assert!(authenticator
            .authenticate(&AuthRequest::new("GET", "/health"))
            .is_forward());
        assert!(matches!(
            authenticator.authenticate(&AuthRequest::new("GET", "/favicon.ico")),
            Verdict::Challenge(_)
        ));
    }
}
