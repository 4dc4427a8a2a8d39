//! Database models for console API tokens.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::types::{ApiTokenId, UserId};

/// Database request for creating an API token. The plaintext never reaches this layer.
#[derive(Debug, Clone)]
pub struct ApiTokenCreateDBRequest {
    pub user_id: UserId,
    pub name: String,
    pub token_hash: String,
    pub token_prefix: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub scopes: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct ApiToken {
    pub id: ApiTokenId,
    pub user_id: UserId,
    pub name: String,
    pub token_hash: String,
    pub token_prefix: String,
    /// `None` never expires
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub is_revoked: bool,
    pub scopes: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
}

impl ApiToken {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_revoked && !self.is_expired_at(now)
    }
}

/// Per-user token counts. `expired` counts unrevoked tokens past expiry.
#[derive(Debug, Clone, Default, PartialEq, Eq, FromRow)]
pub struct ApiTokenStats {
    pub total: i64,
    pub active: i64,
    pub revoked: i64,
    pub expired: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn token(expires_at: Option<DateTime<Utc>>, is_revoked: bool) -> ApiToken {
        ApiToken {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "ci".to_string(),
            token_hash: "h".to_string(),
            token_prefix: "pc_abcde".to_string(),
            expires_at,
            last_used_at: None,
            is_revoked,
            scopes: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_no_expiry_never_expires() {
        let t = token(None, false);
        assert!(!t.is_expired_at(Utc::now() + Duration::days(365 * 100)));
        assert!(t.is_valid_at(Utc::now()));
    }

    #[test]
    fn test_expired_or_revoked_is_invalid() {
        let now = Utc::now();
        assert!(!token(Some(now - Duration::seconds(1)), false).is_valid_at(now));
        assert!(!token(Some(now + Duration::days(1)), true).is_valid_at(now));
        assert!(token(Some(now + Duration::days(1)), false).is_valid_at(now));
    }
}
