//! Admin session guard — bcrypt-checked login issuing expiring bearer tokens.
//!
//! Sessions are held in process memory and injected through the shared
//! application state; a restart invalidates every session.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use tracing::warn;
use uuid::Uuid;

use crate::errors::{ApiError, Result};

/// Absolute session lifetime from issuance.
pub const SESSION_TTL_HOURS: i64 = 24;

pub struct SessionStore {
    ttl: Duration,
    sessions: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Verify `password` against the stored bcrypt hash and mint a session
    /// token on success.
    pub fn issue(&self, password_hash: &str, password: &str) -> Result<String> {
        let matches = bcrypt::verify(password, password_hash)
            .map_err(|e| ApiError::Internal(anyhow::anyhow!("bcrypt verify: {e}")))?;
        if !matches {
            warn!("failed admin login attempt");
            return Err(ApiError::Auth("incorrect password".to_string()));
        }

        let token = Uuid::new_v4().simple().to_string();
        self.sessions
            .lock()
            .unwrap()
            .insert(token.clone(), Utc::now());
        Ok(token)
    }

    /// Fail closed: unknown and expired tokens are both rejected. Expired
    /// tokens are dropped on detection.
    pub fn validate(&self, token: &str) -> Result<()> {
        let mut sessions = self.sessions.lock().unwrap();
        let Some(issued_at) = sessions.get(token).copied() else {
            return Err(ApiError::Auth(
                "not authenticated, please log in".to_string(),
            ));
        };
        if Utc::now() - issued_at > self.ttl {
            sessions.remove(token);
            return Err(ApiError::Auth(
                "session expired, please log in again".to_string(),
            ));
        }
        Ok(())
    }

    /// Idempotent: revoking an unknown or already-revoked token is a no-op.
    pub fn revoke(&self, token: &str) {
        self.sessions.lock().unwrap().remove(token);
    }

    #[cfg(test)]
    fn backdate(&self, token: &str, issued_at: DateTime<Utc>) {
        self.sessions
            .lock()
            .unwrap()
            .insert(token.to_string(), issued_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(password: &str) -> String {
        bcrypt::hash(password, 4).unwrap()
    }

    #[test]
    fn issue_and_validate() {
        let store = SessionStore::new(Duration::hours(SESSION_TTL_HOURS));
        let token = store.issue(&hash("s3cret"), "s3cret").unwrap();
        assert!(store.validate(&token).is_ok());
    }

    #[test]
    fn wrong_password_is_rejected() {
        let store = SessionStore::new(Duration::hours(SESSION_TTL_HOURS));
        let err = store.issue(&hash("s3cret"), "nope").unwrap_err();
        assert!(matches!(err, ApiError::Auth(_)));
    }

    #[test]
    fn unknown_token_is_rejected() {
        let store = SessionStore::new(Duration::hours(SESSION_TTL_HOURS));
        assert!(matches!(
            store.validate("no-such-token"),
            Err(ApiError::Auth(_))
        ));
    }

    #[test]
    fn token_expires_after_ttl() {
        let store = SessionStore::new(Duration::hours(SESSION_TTL_HOURS));
        let token = store.issue(&hash("s3cret"), "s3cret").unwrap();

        // One minute past the 24 h window.
        store.backdate(
            &token,
            Utc::now() - Duration::hours(SESSION_TTL_HOURS) - Duration::minutes(1),
        );
        assert!(matches!(store.validate(&token), Err(ApiError::Auth(_))));

        // Expired tokens are removed, so a second check fails the same way.
        assert!(matches!(store.validate(&token), Err(ApiError::Auth(_))));
    }

    #[test]
    fn revoke_is_idempotent() {
        let store = SessionStore::new(Duration::hours(SESSION_TTL_HOURS));
        let token = store.issue(&hash("s3cret"), "s3cret").unwrap();
        store.revoke(&token);
        store.revoke(&token);
        assert!(store.validate(&token).is_err());
    }
}
