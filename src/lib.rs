//! Authenticating gateway library.
//!
//! Decides, per request, whether to forward to the protected backend,
//! answer with a login challenge or redirect after a successful login.
//! Two adapters share the decision: an HTTP server (`http::server`) and a
//! raw TCP relay (`net::socket`).

pub mod auth;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use auth::{Authenticator, Verdict};
pub use config::schema::GatewayConfig;
pub use error::GatewayError;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use net::SocketServer;
