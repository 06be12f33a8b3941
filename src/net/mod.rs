//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → connection.rs (ID assignment, in-flight tracking)
//!     → socket.rs (buffer → authenticate → answer or relay)
//!         ↳ upstream.rs (backend address, connect timeout)
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for graceful shutdown

pub mod connection;
pub mod listener;
pub mod socket;
pub mod upstream;

pub use connection::{ConnectionId, ConnectionTracker};
pub use listener::{Listener, ListenerError};
pub use socket::{SocketProxy, SocketServer};
pub use upstream::UpstreamTarget;
