//! Database models for interactive sessions.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::types::{SessionId, UserId};

/// Database request for creating a session. Only digests and ciphertext are accepted.
#[derive(Debug, Clone)]
pub struct SessionCreateDBRequest {
    pub user_id: UserId,
    pub access_token_hash: String,
    pub refresh_token_id: String,
    pub refresh_token_encrypted: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
    pub access_token_hash: String,
    pub refresh_token_id: String,
    pub refresh_token_encrypted: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub is_revoked: bool,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_revoked && !self.is_expired_at(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn session(expires_at: DateTime<Utc>, is_revoked: bool) -> Session {
        Session {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            access_token_hash: "h".to_string(),
            refresh_token_id: "r".to_string(),
            refresh_token_encrypted: None,
            expires_at,
            ip_address: None,
            user_agent: None,
            is_revoked,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_validity() {
        let now = Utc::now();
        assert!(session(now + Duration::hours(1), false).is_valid_at(now));
        assert!(!session(now + Duration::hours(1), true).is_valid_at(now));
        assert!(!session(now, false).is_valid_at(now));
        assert!(!session(now - Duration::seconds(1), false).is_valid_at(now));
    }
}
