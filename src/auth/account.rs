//! Credential verification.
//!
//! Two independent checks gate access: a single static API token shared by
//! machine clients, and per-user passwords for the interactive login. Either
//! one succeeding is sufficient.

use std::collections::HashMap;
use std::sync::Arc;

use argon2::password_hash::{self, SaltString};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier as _};
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};
use subtle::ConstantTimeEq;

/// Length of a generated API token.
pub const GENERATED_TOKEN_LEN: usize = 32;

/// Capability to check a username/password pair.
///
/// Implementations may be slow (password hashing); callers must not hold
/// shared locks while invoking them.
pub trait PasswordVerifier: Send + Sync {
    fn verify_password(&self, username: &str, password: &str) -> bool;
}

/// How a configured password is stored.
#[derive(Clone)]
enum StoredPassword {
    Plain(String),
    /// PHC string, e.g. `$argon2id$v=19$...`.
    Argon2(String),
}

impl StoredPassword {
    fn parse(value: String) -> Self {
        if value.starts_with("$argon2") {
            StoredPassword::Argon2(value)
        } else {
            StoredPassword::Plain(value)
        }
    }

    fn matches(&self, candidate: &str) -> bool {
        match self {
            StoredPassword::Plain(expected) => constant_time_eq(expected, candidate),
            StoredPassword::Argon2(phc) => match PasswordHash::new(phc) {
                Ok(parsed) => Argon2::default()
                    .verify_password(candidate.as_bytes(), &parsed)
                    .is_ok(),
                Err(e) => {
                    tracing::error!(error = %e, "Stored password hash is unreadable");
                    false
                }
            },
        }
    }
}

/// Users loaded from configuration. Entries starting with `$argon2` are
/// verified as argon2 hashes, anything else is compared as plaintext.
#[derive(Clone, Default)]
pub struct StaticUsers {
    users: HashMap<String, StoredPassword>,
}

impl StaticUsers {
    pub fn new<I, K, V>(users: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            users: users
                .into_iter()
                .map(|(name, password)| (name.into(), StoredPassword::parse(password.into())))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl std::fmt::Debug for StaticUsers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticUsers")
            .field("users", &self.users.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl PasswordVerifier for StaticUsers {
    fn verify_password(&self, username: &str, password: &str) -> bool {
        self.users
            .get(username)
            .is_some_and(|stored| stored.matches(password))
    }
}

/// Static token plus password verification strategy.
#[derive(Clone)]
pub struct Account {
    token: Option<String>,
    passwords: Arc<dyn PasswordVerifier>,
}

impl Account {
    pub fn new(token: Option<String>, passwords: Arc<dyn PasswordVerifier>) -> Self {
        Self {
            token: token.filter(|t| !t.is_empty()),
            passwords,
        }
    }

    /// Timing-safe equality against the configured static token.
    pub fn verify_token(&self, candidate: &str) -> bool {
        match &self.token {
            Some(token) => !candidate.is_empty() && constant_time_eq(token, candidate),
            None => false,
        }
    }

    /// Check a user's password. Empty passwords are rejected without
    /// consulting the underlying verifier.
    pub fn verify_password(&self, username: &str, password: &str) -> bool {
        if password.is_empty() {
            return false;
        }
        self.passwords.verify_password(username, password)
    }

    /// `Authorization: Basic` semantics: an empty username means the
    /// password field carries the static token.
    pub fn verify_basic(&self, username: &str, password: &str) -> bool {
        if username.is_empty() {
            self.verify_token(password)
        } else {
            self.verify_password(username, password)
        }
    }
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

/// Random alphanumeric token for when none is configured.
pub fn generate_token() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(GENERATED_TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// Produce an argon2id PHC string suitable for the `auth.users` table.
pub fn hash_password(password: &str) -> Result<String, password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)?
        .to_string())
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn account() -> Account {
        Account::new(
            Some("test".into()),
            Arc::new(StaticUsers::new([("demo", "test")])),
        )
    }

    #[test]
    fn token_equality() {
        let account = account();
        assert!(account.verify_token("test"));
        assert!(!account.verify_token("tes"));
        assert!(!account.verify_token("test1"));
        assert!(!account.verify_token(""));
    }

    #[test]
    fn no_token_configured_rejects_everything() {
        let account = Account::new(Some(String::new()), Arc::new(StaticUsers::default()));
        assert!(!account.verify_token(""));
        assert!(!account.verify_token("anything"));
    }

    #[test]
    fn plaintext_passwords() {
        let account = account();
        assert!(account.verify_password("demo", "test"));
        assert!(!account.verify_password("demo", "wrong"));
        assert!(!account.verify_password("nobody", "test"));
    }

    #[test]
    fn argon2_passwords() {
        let phc = hash_password("s3cret").unwrap();
        assert!(phc.starts_with("$argon2id$"));
        let users = StaticUsers::new([("alice".to_string(), phc)]);
        assert!(users.verify_password("alice", "s3cret"));
        assert!(!users.verify_password("alice", "S3cret"));
    }

    #[test]
    fn corrupt_hash_never_matches() {
        let users = StaticUsers::new([("alice", "$argon2id$garbage")]);
        assert!(!users.verify_password("alice", "$argon2id$garbage"));
    }

    #[test]
    fn basic_with_empty_username_checks_token() {
        let account = account();
        assert!(account.verify_basic("", "test"));
        assert!(account.verify_basic("demo", "test"));
        assert!(!account.verify_basic("", "wrong"));
    }

    struct CountingVerifier(AtomicUsize);

    impl PasswordVerifier for CountingVerifier {
        fn verify_password(&self, _username: &str, _password: &str) -> bool {
            self.0.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    #[test]
    fn empty_password_never_reaches_verifier() {
        let counter = Arc::new(CountingVerifier(AtomicUsize::new(0)));
        let account = Account::new(None, counter.clone());
        assert!(!account.verify_password("demo", ""));
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
        assert!(account.verify_password("demo", "x"));
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn generated_tokens() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), GENERATED_TOKEN_LEN);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn debug_hides_token() {
        assert!(!format!("{:?}", account()).contains("test"));
    }
}
