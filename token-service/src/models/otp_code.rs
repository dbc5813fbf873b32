//! One-time passcode model.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use super::hash_secret;

/// A pending passcode. At most one exists per principal; it is deleted when
/// consumed, replaced or guessed wrong too often. Only `attempt_count` changes
/// in place.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct OneTimePasscode {
    pub otp_id: Uuid,
    pub principal_id: Uuid,
    /// SHA-256 of the code sent to the principal.
    pub code_hash: String,
    pub expires_utc: DateTime<Utc>,
    pub created_utc: DateTime<Utc>,
    /// Wrong codes submitted so far.
    pub attempt_count: i32,
}

impl OneTimePasscode {
    pub fn new(
        principal_id: Uuid,
        code: &str,
        now: DateTime<Utc>,
        expires_utc: DateTime<Utc>,
    ) -> Self {
        Self {
            otp_id: Uuid::new_v4(),
            principal_id,
            code_hash: hash_secret(code),
            expires_utc,
            created_utc: now,
            attempt_count: 0,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_utc <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_code_is_not_stored_in_plaintext() {
        let now = Utc::now();
        let otp = OneTimePasscode::new(Uuid::new_v4(), "123456", now, now + Duration::minutes(5));
        assert_ne!(otp.code_hash, "123456");
        assert_eq!(otp.code_hash, hash_secret("123456"));
    }

    #[test]
    fn test_expiry_boundary() {
        let now = Utc::now();
        let otp = OneTimePasscode::new(Uuid::new_v4(), "123456", now, now + Duration::minutes(5));
        assert!(!otp.is_expired_at(now));
        assert!(otp.is_expired_at(now + Duration::minutes(5)));
    }
}
