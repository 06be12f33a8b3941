//! Session store.
//!
//! # Responsibilities
//! - Issue unguessable session identifiers for the login flow
//! - Track pending vs. signed-in state and absolute expiry
//! - Evict expired entries in the background
//!
//! # Design Decisions
//! - Backed by `DashMap`: sharded locks, so unrelated sessions never
//!   contend and each read-modify-write is atomic per entry
//! - Verification always re-checks expiry; eviction only bounds memory
//! - Entries are never handed out by reference

use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use dashmap::{mapref::entry::Entry, DashMap};
use rand::{rngs::OsRng, RngCore};
use tokio::sync::broadcast;
use tokio::time;

use crate::auth::credential::redact;
use crate::observability::metrics;

/// Default session lifetime: 24 hours.
pub const DEFAULT_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

const SESSION_ID_BYTES: usize = 32;

/// Snapshot of one session's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub signed_in: bool,
    pub issued_at: Instant,
    /// `None` while pending.
    pub expires_at: Option<Instant>,
}

impl Session {
    fn pending(id: String, now: Instant) -> Self {
        Self {
            id,
            signed_in: false,
            issued_at: now,
            expires_at: None,
        }
    }

    /// Signed in and not yet expired.
    pub fn is_valid_at(&self, now: Instant) -> bool {
        self.signed_in && self.expires_at.is_some_and(|expiry| now < expiry)
    }

    fn is_stale_at(&self, now: Instant, lifetime: Duration) -> bool {
        match self.expires_at {
            Some(expiry) => now >= expiry,
            // Pending sessions that were never completed age out after one lifetime.
            None => now.saturating_duration_since(self.issued_at) >= lifetime,
        }
    }
}

/// Concurrency-safe map from session id to sign-in state.
#[derive(Debug)]
pub struct SessionStore {
    sessions: DashMap<String, Session>,
    lifetime: Duration,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_LIFETIME)
    }
}

impl SessionStore {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            lifetime,
        }
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Issue a new pending session.
    pub fn create(&self) -> Session {
        self.create_at(Instant::now())
    }

    /// True iff the session exists, is signed in, and has not expired.
    pub fn verify(&self, id: &str) -> bool {
        self.verify_at(id, Instant::now())
    }

    /// Mark a pending session as signed in, starting its lifetime.
    ///
    /// Unknown ids are left untouched; returns whether a session was updated.
    pub fn sign_in(&self, id: &str) -> bool {
        self.sign_in_at(id, Instant::now())
    }

    /// True if the id names a session that has not gone stale.
    pub fn is_known(&self, id: &str) -> bool {
        let now = Instant::now();
        self.sessions
            .get(id)
            .is_some_and(|s| !s.is_stale_at(now, self.lifetime))
    }

    /// Snapshot of a session, if present.
    pub fn get(&self, id: &str) -> Option<Session> {
        self.sessions.get(id).map(|s| s.value().clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop expired and abandoned pending sessions. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub(crate) fn create_at(&self, now: Instant) -> Session {
        loop {
            let id = generate_session_id();
            if let Entry::Vacant(slot) = self.sessions.entry(id.clone()) {
                let session = Session::pending(id, now);
                slot.insert(session.clone());
                metrics::record_sessions(self.sessions.len());
                tracing::debug!(session = %redact(&session.id), "Pending session issued");
                return session;
            }
        }
    }

    pub(crate) fn verify_at(&self, id: &str, now: Instant) -> bool {
        self.sessions.get(id).is_some_and(|s| s.is_valid_at(now))
    }

    pub(crate) fn sign_in_at(&self, id: &str, now: Instant) -> bool {
        match self.sessions.get_mut(id) {
            Some(mut session) => match now.checked_add(self.lifetime) {
                Some(expiry) => {
                    session.signed_in = true;
                    session.expires_at = Some(expiry);
                    true
                }
                None => {
                    tracing::error!(
                        lifetime_secs = self.lifetime.as_secs(),
                        "Session lifetime overflows the clock, sign-in refused"
                    );
                    false
                }
            },
            None => false,
        }
    }

    pub(crate) fn sweep_at(&self, now: Instant) -> usize {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, session| !session.is_stale_at(now, self.lifetime));
        let after = self.sessions.len();
        metrics::record_sessions(after);
        before.saturating_sub(after)
    }
}

/// 256 bits from the OS RNG, URL-safe so it can travel in a cookie unquoted.
fn generate_session_id() -> String {
    let mut bytes = [0u8; SESSION_ID_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Periodically evicts stale sessions until shutdown.
pub struct SessionSweeper {
    store: Arc<SessionStore>,
    interval: Duration,
}

impl SessionSweeper {
    pub fn new(store: Arc<SessionStore>, interval: Duration) -> Self {
        Self { store, interval }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Session sweeper starting");

        let mut ticker = time::interval(self.interval);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = self.store.sweep_expired();
                    if removed > 0 {
                        tracing::debug!(removed, remaining = self.store.len(), "Swept stale sessions");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Session sweeper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}
