//! Top-level error type for starting and running the gateway.

use thiserror::Error;

use crate::config::ConfigError;
use crate::net::listener::ListenerError;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("invalid target url {url:?}: {reason}")]
    Target { url: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
