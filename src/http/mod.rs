//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Raw bytes (socket adapter)
//!     → request.rs (incremental request parsing)
//! axum request (HTTP adapter)
//!     → server.rs (body buffering, header conversion)
//!
//! Verdict
//!     → response.rs (challenge / redirect / error rendering)
//!         ↳ login.rs (login page HTML)
//!     → Send to client
//! ```

pub mod login;
pub mod request;
pub mod response;
pub mod server;

pub use request::{Headers, ParseError, Parsed, ParsedRequest, RequestHeader};
pub use response::GatewayResponse;
pub use server::HttpServer;
