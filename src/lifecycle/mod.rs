//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validated config → API token → Authenticator → Sweeper → Listener
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     Broadcast → stop accepting → drain connections → stop sweeper → exit
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then auth state, then listeners
//! - Shutdown has a grace period: open connections are abandoned after it

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::{shutdown_signal, spawn_signal_handler};
pub use startup::{build_authenticator, ensure_api_token, Adapter};
