//! One-time passcode issuance and validation.

use chrono::Duration;
use rand::Rng;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use super::clock::Clock;
use super::error::AuthError;
use super::store::OtpStore;
use crate::config::OtpConfig;
use crate::models::{hash_secret, OneTimePasscode};

/// A passcode that was just stored, together with the plaintext code for delivery.
#[derive(Debug, Clone)]
pub struct IssuedOtp {
    pub passcode: OneTimePasscode,
    pub code: String,
}

#[derive(Clone)]
pub struct OtpManager {
    store: Arc<dyn OtpStore>,
    clock: Arc<dyn Clock>,
    expiry: Duration,
    length: usize,
    max_attempts: i32,
}

impl OtpManager {
    pub fn new(store: Arc<dyn OtpStore>, clock: Arc<dyn Clock>, config: &OtpConfig) -> Self {
        Self {
            store,
            clock,
            expiry: Duration::minutes(config.expiry_minutes),
            length: config.length,
            max_attempts: config.max_attempts,
        }
    }

    pub fn expiry_minutes(&self) -> i64 {
        self.expiry.num_minutes()
    }

    /// Issue a fresh passcode for the principal, superseding any earlier one.
    pub async fn request(&self, principal_id: Uuid) -> Result<IssuedOtp, AuthError> {
        let code = generate_code(self.length);
        let now = self.clock.now();
        let expires_utc = now
            .checked_add_signed(self.expiry)
            .ok_or_else(|| anyhow::anyhow!("passcode expiry out of range"))?;
        let passcode = OneTimePasscode::new(principal_id, &code, now, expires_utc);

        self.store.replace_otp(&passcode).await?;

        tracing::info!(
            principal_id = %principal_id,
            otp_id = %passcode.otp_id,
            expires_utc = %passcode.expires_utc,
            "One-time passcode issued"
        );

        Ok(IssuedOtp { passcode, code })
    }

    /// Check and consume the principal's passcode.
    ///
    /// Missing, mismatched, expired, exhausted and already-consumed codes all
    /// fail with `InvalidCredential`. Each mismatch counts against the
    /// passcode, which is discarded after `max_attempts` wrong guesses.
    pub async fn validate(&self, principal_id: Uuid, submitted: &str) -> Result<(), AuthError> {
        let passcode = self
            .store
            .find_otp_for_principal(principal_id)
            .await?
            .ok_or(AuthError::InvalidCredential)?;

        if passcode.attempt_count >= self.max_attempts {
            self.store.consume_otp(passcode.otp_id).await?;
            return Err(AuthError::InvalidCredential);
        }

        let submitted_hash = hash_secret(submitted.trim());
        let matches: bool = submitted_hash
            .as_bytes()
            .ct_eq(passcode.code_hash.as_bytes())
            .into();
        if !matches {
            let alive = self
                .store
                .record_failed_otp_attempt(passcode.otp_id, self.max_attempts)
                .await?;
            if alive {
                tracing::debug!(principal_id = %principal_id, "Passcode mismatch");
            } else {
                tracing::warn!(
                    principal_id = %principal_id,
                    otp_id = %passcode.otp_id,
                    "Passcode discarded after too many wrong guesses"
                );
            }
            return Err(AuthError::InvalidCredential);
        }

        if passcode.is_expired_at(self.clock.now()) {
            // Expired codes are useless; clear them so the next request starts clean.
            self.store.consume_otp(passcode.otp_id).await?;
            tracing::debug!(principal_id = %principal_id, "Passcode expired");
            return Err(AuthError::InvalidCredential);
        }

        if !self.store.consume_otp(passcode.otp_id).await? {
            // Consumed or superseded between read and delete.
            return Err(AuthError::InvalidCredential);
        }

        tracing::info!(
            principal_id = %principal_id,
            otp_id = %passcode.otp_id,
            "Passcode consumed"
        );
        Ok(())
    }
}

/// Generate a random numeric code of the given length.
fn generate_code(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}
