//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! auth / http / net subsystems produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters and gauges)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Secrets never reach logs: session ids are truncated, passwords and
//!   tokens are never recorded
//! - Metrics are cheap and no-ops until a recorder is installed

pub mod logging;
pub mod metrics;
