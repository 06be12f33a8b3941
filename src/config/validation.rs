//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (lifetime within bounds, limits > 0)
//! - Check the target URL and bind address are usable
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::GatewayConfig;

/// Ten years. Longer lifetimes risk overflowing `Instant` arithmetic.
pub const MAX_LIFETIME_HOURS: u64 = 87_600;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("listener.bind_address {0:?} is not a socket address")]
    BindAddress(String),

    #[error("listener.max_connections must be greater than zero")]
    MaxConnections,

    #[error("target.url {0:?} is not an http:// URL with a host")]
    TargetUrl(String),

    #[error("session.lifetime_hours must be between 1 and {}", MAX_LIFETIME_HOURS)]
    Lifetime,

    #[error("session.sweep_interval_secs must be greater than zero")]
    SweepInterval,

    #[error("limits.{0} must be greater than zero")]
    Limit(&'static str),

    #[error("auth.excluded_paths entry {0:?} must start with '/'")]
    ExcludedPath(String),

    #[error("auth.users entry {0:?} has an empty password")]
    EmptyPassword(String),

    #[error("observability.metrics_address {0:?} is not a socket address")]
    MetricsAddress(String),
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(config.listener.bind_address.clone()));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::MaxConnections);
    }

    let target_ok = Url::parse(&config.target.url)
        .map(|u| u.scheme() == "http" && u.host_str().is_some())
        .unwrap_or(false);
    if !target_ok {
        errors.push(ValidationError::TargetUrl(config.target.url.clone()));
    }

    if !(1..=MAX_LIFETIME_HOURS).contains(&config.session.lifetime_hours) {
        errors.push(ValidationError::Lifetime);
    }
    if config.session.sweep_interval_secs == 0 {
        errors.push(ValidationError::SweepInterval);
    }

    if config.limits.max_header_bytes == 0 {
        errors.push(ValidationError::Limit("max_header_bytes"));
    }
    if config.limits.max_body_bytes == 0 {
        errors.push(ValidationError::Limit("max_body_bytes"));
    }

    for path in &config.auth.excluded_paths {
        if !path.starts_with('/') {
            errors.push(ValidationError::ExcludedPath(path.clone()));
        }
    }
    for (user, password) in &config.auth.users {
        if password.is_empty() {
            errors.push(ValidationError::EmptyPassword(user.clone()));
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::MetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
