use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Refresh token record. Only the revocation fields ever change after insert,
/// and records are never deleted so rotation chains can be walked.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct RefreshToken {
    pub token_id: Uuid,
    pub principal_id: Uuid,
    /// SHA-256 of the opaque token handed to the client.
    pub token_hash: String,
    pub issued_utc: DateTime<Utc>,
    pub expires_utc: DateTime<Utc>,
    pub created_by_ip: String,
    pub revoked_utc: Option<DateTime<Utc>>,
    pub revoked_by_ip: Option<String>,
    /// Successor minted when this token was rotated.
    pub replaced_by_token_id: Option<Uuid>,
}

/// Who revoked a token, and when.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revocation {
    pub revoked_utc: DateTime<Utc>,
    pub revoked_by_ip: String,
}

impl RefreshToken {
    pub fn new(
        principal_id: Uuid,
        token_hash: String,
        issued_utc: DateTime<Utc>,
        expires_utc: DateTime<Utc>,
        created_by_ip: String,
    ) -> Self {
        Self {
            token_id: Uuid::new_v4(),
            principal_id,
            token_hash,
            issued_utc,
            expires_utc,
            created_by_ip,
            revoked_utc: None,
            revoked_by_ip: None,
            replaced_by_token_id: None,
        }
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_utc.is_some()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_utc <= now
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_revoked() && !self.is_expired_at(now)
    }

    /// Apply a revocation in place. Used by storage adapters only.
    pub(crate) fn revoke(&mut self, revocation: &Revocation, replaced_by: Option<Uuid>) {
        self.revoked_utc = Some(revocation.revoked_utc);
        self.revoked_by_ip = Some(revocation.revoked_by_ip.clone());
        self.replaced_by_token_id = replaced_by;
    }
}
