//! Authentication subsystem.
//!
//! # Data Flow
//! ```text
//! Parsed request (socket adapter) or axum request (HTTP adapter)
//!     → credential.rs (Authorization header / session_id cookie)
//!     → resolver.rs (ordered checks, login form handling)
//!         ↳ account.rs (static token, password verifier)
//!         ↳ session.rs (pending / signed-in sessions)
//!     → Verdict: Forward | Challenge | Redirect
//! ```
//!
//! # Design Decisions
//! - One verdict per request; adapters never re-run checks
//! - Credential and session failures never surface as errors, only as
//!   challenge variants
//! - The session store is the only shared mutable state

pub mod account;
pub mod credential;
pub mod resolver;
pub mod session;

pub use account::{Account, PasswordVerifier, StaticUsers};
pub use credential::Credential;
pub use resolver::{Admission, AuthRequest, Authenticator, Challenge, LoginPrompt, Verdict};
pub use session::{Session, SessionStore, SessionSweeper};
