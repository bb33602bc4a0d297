//! Pending OAuth sessions, binding a provider callback to the user who started it.
//!
//! Entries live only in this process's memory. A restart drops every pending
//! session and all in-flight links must be restarted. Running more than one
//! instance behind a load balancer requires moving this map to a shared store
//! with atomic get-and-delete (e.g. a networked cache).

use super::{LinkError, LinkResult};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::rngs::OsRng;
use rand::RngCore;
use std::sync::Arc;

/// Random bytes per session token (256 bits)
const TOKEN_BYTES: usize = 32;

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[cfg(test)]
#[derive(Debug)]
pub struct ManualClock {
    now: std::sync::Mutex<DateTime<Utc>>,
}

#[cfg(test)]
impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: std::sync::Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// A pending linking attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionEntry {
    pub subject_id: String,
    pub provider: String,
    /// Email reported by the identity verifier at initiate time
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Single-use session tokens with a TTL.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<String, SessionEntry>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl SessionRegistry {
    /// Registry on the system clock.
    pub fn new(ttl_seconds: i64) -> anyhow::Result<Self> {
        Self::with_clock(ttl_seconds, Arc::new(SystemClock))
    }

    /// Fails unless `ttl_seconds` is positive and representable as a duration.
    pub fn with_clock(ttl_seconds: i64, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        if ttl_seconds <= 0 {
            anyhow::bail!("Session TTL must be positive, got {} seconds", ttl_seconds);
        }
        let ttl = Duration::try_seconds(ttl_seconds)
            .ok_or_else(|| anyhow::anyhow!("Session TTL of {} seconds is out of range", ttl_seconds))?;

        Ok(Self {
            sessions: Arc::new(DashMap::new()),
            ttl,
            clock,
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Stores a new pending session and returns its token.
    ///
    /// The token is 32 bytes from the OS CSPRNG, URL-safe base64 without padding.
    pub fn create(&self, subject_id: &str, provider: &str, email: Option<&str>) -> String {
        let token = generate_token();
        let entry = SessionEntry {
            subject_id: subject_id.to_string(),
            provider: provider.to_string(),
            email: email.map(str::to_string),
            created_at: self.clock.now(),
        };

        self.sessions.insert(token.clone(), entry);
        token
    }

    /// Removes the session and checks it against the callback.
    ///
    /// The entry is deleted before any check, so a token can succeed at most
    /// once and a mismatched or expired attempt also burns it.
    pub fn consume(
        &self,
        token: &str,
        expected_subject_id: &str,
        expected_provider: &str,
    ) -> LinkResult<SessionEntry> {
        let (_, entry) = self
            .sessions
            .remove(token)
            .ok_or(LinkError::SessionNotFound)?;

        if self.is_expired(&entry, self.clock.now()) {
            return Err(LinkError::SessionNotFound);
        }

        if entry.subject_id != expected_subject_id || entry.provider != expected_provider {
            return Err(LinkError::SessionMismatch);
        }

        Ok(entry)
    }

    /// Drops expired sessions, returning how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.sessions.len();
        self.sessions.retain(|_, entry| !self.is_expired(entry, now));
        before.saturating_sub(self.sessions.len())
    }

    /// Number of pending sessions (for monitoring)
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn is_expired(&self, entry: &SessionEntry, now: DateTime<Utc>) -> bool {
        now - entry.created_at > self.ttl
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Shortened token for log lines.
pub fn redact(token: &str) -> String {
    let prefix: String = token.chars().take(8).collect();
    format!("{}…", prefix)
}

/// Background task to periodically evict expired sessions
pub async fn run_session_cleanup(registry: SessionRegistry, interval_seconds: u64) {
    let mut interval =
        tokio::time::interval(tokio::time::Duration::from_secs(interval_seconds.max(1)));

    loop {
        interval.tick().await;
        let removed = registry.cleanup_expired();
        tracing::debug!(
            removed,
            remaining = registry.len(),
            "OAuth session cleanup complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manual_registry(ttl_seconds: i64) -> (SessionRegistry, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let registry = SessionRegistry::with_clock(ttl_seconds, clock.clone()).unwrap();
        (registry, clock)
    }

    #[test]
    fn test_token_shape() {
        let registry = SessionRegistry::new(600).unwrap();
        let token = registry.create("u1", "outlook", None);

        // 32 bytes -> 43 base64 chars without padding
        assert_eq!(token.len(), 43);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_eq!(URL_SAFE_NO_PAD.decode(&token).unwrap().len(), TOKEN_BYTES);
    }

    #[test]
    fn test_tokens_are_unique() {
        let registry = SessionRegistry::new(600).unwrap();
        let tokens: std::collections::HashSet<_> = (0..100)
            .map(|_| registry.create("u1", "outlook", None))
            .collect();
        assert_eq!(tokens.len(), 100);
        assert_eq!(registry.len(), 100);
    }

    #[test]
    fn test_consume_succeeds_once() {
        let registry = SessionRegistry::new(600).unwrap();
        let token = registry.create("u1", "outlook", Some("u1@example.com"));

        let entry = registry.consume(&token, "u1", "outlook").unwrap();
        assert_eq!(entry.subject_id, "u1");
        assert_eq!(entry.provider, "outlook");
        assert_eq!(entry.email.as_deref(), Some("u1@example.com"));

        assert!(matches!(
            registry.consume(&token, "u1", "outlook"),
            Err(LinkError::SessionNotFound)
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unknown_token() {
        let registry = SessionRegistry::new(600).unwrap();
        assert!(matches!(
            registry.consume("never-issued", "u1", "outlook"),
            Err(LinkError::SessionNotFound)
        ));
    }

    #[test]
    fn test_provider_mismatch_burns_session() {
        let registry = SessionRegistry::new(600).unwrap();
        let token = registry.create("u1", "outlook", None);
        let other = registry.create("u2", "outlook", None);

        assert!(matches!(
            registry.consume(&token, "u1", "pipedrive"),
            Err(LinkError::SessionMismatch)
        ));

        // Single-use even on mismatch; only the presented token is removed
        assert!(matches!(
            registry.consume(&token, "u1", "outlook"),
            Err(LinkError::SessionNotFound)
        ));
        assert_eq!(registry.len(), 1);
        assert!(registry.consume(&other, "u2", "outlook").is_ok());
    }

    #[test]
    fn test_subject_mismatch() {
        let registry = SessionRegistry::new(600).unwrap();
        let token = registry.create("u1", "outlook", None);

        assert!(matches!(
            registry.consume(&token, "attacker", "outlook"),
            Err(LinkError::SessionMismatch)
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_expired_session_rejected() {
        let (registry, clock) = manual_registry(600);
        let token = registry.create("u1", "outlook", None);

        clock.advance(Duration::seconds(601));

        assert!(matches!(
            registry.consume(&token, "u1", "outlook"),
            Err(LinkError::SessionNotFound)
        ));
    }

    #[test]
    fn test_session_valid_at_ttl_boundary() {
        let (registry, clock) = manual_registry(600);
        let token = registry.create("u1", "outlook", None);

        clock.advance(Duration::seconds(600));
        assert!(registry.consume(&token, "u1", "outlook").is_ok());
    }

    #[test]
    fn test_cleanup_removes_only_expired() {
        let (registry, clock) = manual_registry(60);

        registry.create("u1", "outlook", None);
        registry.create("u2", "pipedrive", None);
        clock.advance(Duration::seconds(61));
        let fresh = registry.create("u3", "outlook", None);

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.cleanup_expired(), 2);
        assert_eq!(registry.len(), 1);
        assert!(registry.consume(&fresh, "u3", "outlook").is_ok());
    }

    #[test]
    fn test_concurrent_consume_single_winner() {
        let registry = SessionRegistry::new(600).unwrap();
        let token = registry.create("u1", "outlook", None);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                let token = token.clone();
                std::thread::spawn(move || registry.consume(&token, "u1", "outlook").is_ok())
            })
            .collect();

        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(successes, 1);
    }

    #[test]
    fn test_ttl_must_be_positive() {
        assert!(SessionRegistry::new(0).is_err());
        assert!(SessionRegistry::new(-1).is_err());
        assert_eq!(SessionRegistry::new(1).unwrap().ttl(), Duration::seconds(1));
    }

    #[test]
    fn test_ttl_out_of_range_is_error() {
        let result = std::panic::catch_unwind(|| SessionRegistry::new(10_000_000_000_000_000));
        assert!(result.expect("must not panic").is_err());
        assert!(SessionRegistry::new(i64::MAX).is_err());
    }

    #[test]
    fn test_redact() {
        assert_eq!(redact("abcdefghijklmnop"), "abcdefgh…");
        assert_eq!(redact("abc"), "abc…");
    }

    #[tokio::test]
    async fn test_cleanup_task_evicts() {
        let (registry, clock) = manual_registry(1);
        registry.create("u1", "outlook", None);
        clock.advance(Duration::seconds(5));

        let task = tokio::spawn(run_session_cleanup(registry.clone(), 1));
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

        assert!(registry.is_empty());
        task.abort();
    }
}
