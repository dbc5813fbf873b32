//! Refresh token issuance, rotation and revocation.
//!
//! Tokens are 512-bit random values handed to the client once; only their
//! SHA-256 digest is stored. Each rotation revokes the presented token and
//! links it to its successor, so a principal's session is a chain that can be
//! walked forward for forensics.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Duration;
use rand::{rngs::OsRng, RngCore};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use super::clock::Clock;
use super::error::AuthError;
use super::store::RefreshTokenStore;
use crate::config::{RefreshConfig, ReusePolicy};
use crate::models::{hash_secret, RefreshToken, Revocation};

const TOKEN_BYTES: usize = 64;

/// A stored refresh token plus the opaque value the client must present.
#[derive(Debug, Clone)]
pub struct IssuedRefreshToken {
    pub token: String,
    pub record: RefreshToken,
}

#[derive(Clone)]
pub struct RefreshTokenManager {
    store: Arc<dyn RefreshTokenStore>,
    clock: Arc<dyn Clock>,
    expiry: Duration,
    reuse_policy: ReusePolicy,
}

impl RefreshTokenManager {
    pub fn new(
        store: Arc<dyn RefreshTokenStore>,
        clock: Arc<dyn Clock>,
        config: &RefreshConfig,
    ) -> Self {
        Self {
            store,
            clock,
            expiry: Duration::days(config.expiry_days),
            reuse_policy: config.reuse_policy,
        }
    }

    fn mint(&self, principal_id: Uuid, client_ip: &str) -> Result<IssuedRefreshToken, AuthError> {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        let token = URL_SAFE_NO_PAD.encode(bytes);

        let now = self.clock.now();
        let expires_utc = now
            .checked_add_signed(self.expiry)
            .ok_or_else(|| anyhow::anyhow!("refresh token expiry out of range"))?;
        let record = RefreshToken::new(
            principal_id,
            hash_secret(&token),
            now,
            expires_utc,
            client_ip.to_string(),
        );
        Ok(IssuedRefreshToken { token, record })
    }

    fn revocation(&self, client_ip: &str) -> Revocation {
        Revocation {
            revoked_utc: self.clock.now(),
            revoked_by_ip: client_ip.to_string(),
        }
    }

    /// Create and store a new active refresh token (start of a chain).
    pub async fn generate(
        &self,
        principal_id: Uuid,
        client_ip: &str,
    ) -> Result<IssuedRefreshToken, AuthError> {
        let issued = self.mint(principal_id, client_ip)?;
        self.store.insert_refresh_token(&issued.record).await?;

        tracing::info!(
            principal_id = %principal_id,
            token_id = %issued.record.token_id,
            "Refresh token issued"
        );
        Ok(issued)
    }

    /// Look up a presented token and check that it is still usable.
    pub async fn validate(&self, token: &str) -> Result<RefreshToken, AuthError> {
        let record = self.find(token).await?;
        self.check(&record)?;
        Ok(record)
    }

    async fn find(&self, token: &str) -> Result<RefreshToken, AuthError> {
        if token.is_empty() {
            return Err(AuthError::InvalidCredential);
        }

        self.store
            .find_refresh_token_by_hash(&hash_secret(token))
            .await?
            .ok_or(AuthError::InvalidCredential)
    }

    /// Revoked takes precedence over expired.
    fn check(&self, record: &RefreshToken) -> Result<(), AuthError> {
        if record.is_revoked() {
            tracing::warn!(
                principal_id = %record.principal_id,
                token_id = %record.token_id,
                replaced_by = ?record.replaced_by_token_id,
                "Revoked refresh token presented"
            );
            return Err(AuthError::Revoked);
        }

        if record.is_expired_at(self.clock.now()) {
            return Err(AuthError::Expired);
        }

        Ok(())
    }

    /// Exchange a valid token for its successor.
    ///
    /// At most one of several concurrent rotations of the same token succeeds;
    /// the others fail with `Revoked`.
    pub async fn rotate(
        &self,
        token: &str,
        client_ip: &str,
    ) -> Result<IssuedRefreshToken, AuthError> {
        let presented = self.find(token).await?;
        match self.check(&presented) {
            Err(AuthError::Revoked) => {
                // Cascade from the record already loaded.
                self.handle_reuse(&presented, client_ip).await?;
                return Err(AuthError::Revoked);
            }
            other => other?,
        }

        let successor = self.mint(presented.principal_id, client_ip)?;
        let rotated = self
            .store
            .rotate_refresh_token(
                presented.token_id,
                &self.revocation(client_ip),
                &successor.record,
            )
            .await?;

        if !rotated {
            tracing::warn!(
                principal_id = %presented.principal_id,
                token_id = %presented.token_id,
                "Refresh token rotated concurrently"
            );
            return Err(AuthError::Revoked);
        }

        tracing::info!(
            principal_id = %presented.principal_id,
            token_id = %presented.token_id,
            successor_id = %successor.record.token_id,
            "Refresh token rotated"
        );
        Ok(successor)
    }

    async fn handle_reuse(&self, record: &RefreshToken, client_ip: &str) -> Result<(), AuthError> {
        if self.reuse_policy != ReusePolicy::RevokeAll {
            return Ok(());
        }

        let revoked = self.revoke_all(record.principal_id, client_ip).await?;
        tracing::warn!(
            principal_id = %record.principal_id,
            revoked,
            "Refresh token reuse detected, revoked all active tokens"
        );
        Ok(())
    }

    /// Revoke one active token without issuing a successor (logout).
    pub async fn revoke(&self, token: &str, client_ip: &str) -> Result<(), AuthError> {
        let record = self.validate(token).await?;

        if !self
            .store
            .revoke_refresh_token(record.token_id, &self.revocation(client_ip))
            .await?
        {
            return Err(AuthError::Revoked);
        }

        tracing::info!(
            principal_id = %record.principal_id,
            token_id = %record.token_id,
            "Refresh token revoked"
        );
        Ok(())
    }

    /// Revoke every active token of a principal. Returns how many were revoked.
    pub async fn revoke_all(&self, principal_id: Uuid, client_ip: &str) -> Result<u64, AuthError> {
        let revoked = self
            .store
            .revoke_all_refresh_tokens(principal_id, &self.revocation(client_ip))
            .await?;
        tracing::info!(principal_id = %principal_id, revoked, "Refresh tokens revoked");
        Ok(revoked)
    }

    /// Walk the rotation chain forward from `token_id`, inclusive.
    pub async fn chain(&self, token_id: Uuid) -> Result<Vec<RefreshToken>, AuthError> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut next = Some(token_id);

        while let Some(id) = next {
            if !seen.insert(id) {
                return Err(AuthError::Unexpected(anyhow::anyhow!(
                    "refresh token chain loops at {}",
                    id
                )));
            }
            let Some(token) = self.store.find_refresh_token_by_id(id).await? else {
                break;
            };
            next = token.replaced_by_token_id;
            chain.push(token);
        }

        if chain.is_empty() {
            return Err(AuthError::NotFound);
        }
        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{InMemoryStore, ManualClock};

    fn manager(policy: ReusePolicy) -> (RefreshTokenManager, Arc<InMemoryStore>, Arc<ManualClock>) {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::default());
        let manager = RefreshTokenManager::new(
            store.clone(),
            clock.clone(),
            &RefreshConfig {
                expiry_days: 7,
                reuse_policy: policy,
            },
        );
        (manager, store, clock)
    }

    #[tokio::test]
    async fn test_generated_token_is_opaque_and_hashed() {
        let (manager, store, _) = manager(ReusePolicy::Reject);
        let principal_id = Uuid::new_v4();

        let issued = manager.generate(principal_id, "10.0.0.1").await.unwrap();
        // 64 bytes, base64url without padding.
        assert_eq!(issued.token.len(), 86);
        assert_ne!(issued.record.token_hash, issued.token);

        let stored = store.refresh_tokens_for(principal_id);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].created_by_ip, "10.0.0.1");
    }

    #[tokio::test]
    async fn test_validate_unknown_and_empty() {
        let (manager, _, _) = manager(ReusePolicy::Reject);
        assert!(matches!(
            manager.validate("").await,
            Err(AuthError::InvalidCredential)
        ));
        assert!(matches!(
            manager.validate("not-a-token").await,
            Err(AuthError::InvalidCredential)
        ));
    }

    #[tokio::test]
    async fn test_validate_expired() {
        let (manager, _, clock) = manager(ReusePolicy::Reject);
        let issued = manager.generate(Uuid::new_v4(), "ip").await.unwrap();

        clock.advance(Duration::days(8));
        assert!(matches!(
            manager.validate(&issued.token).await,
            Err(AuthError::Expired)
        ));
    }

    #[tokio::test]
    async fn test_rotation_links_chain() {
        let (manager, _, _) = manager(ReusePolicy::Reject);
        let principal_id = Uuid::new_v4();

        let first = manager.generate(principal_id, "ip-1").await.unwrap();
        let second = manager.rotate(&first.token, "ip-2").await.unwrap();
        let third = manager.rotate(&second.token, "ip-3").await.unwrap();

        let chain = manager.chain(first.record.token_id).await.unwrap();
        let ids: Vec<Uuid> = chain.iter().map(|t| t.token_id).collect();
        assert_eq!(
            ids,
            vec![
                first.record.token_id,
                second.record.token_id,
                third.record.token_id
            ]
        );
        assert_eq!(chain[0].revoked_by_ip.as_deref(), Some("ip-2"));
        assert!(chain[2].revoked_utc.is_none());
    }

    #[tokio::test]
    async fn test_revoke_then_reuse() {
        let (manager, _, _) = manager(ReusePolicy::Reject);
        let issued = manager.generate(Uuid::new_v4(), "ip").await.unwrap();

        manager.revoke(&issued.token, "ip").await.unwrap();
        assert!(matches!(
            manager.revoke(&issued.token, "ip").await,
            Err(AuthError::Revoked)
        ));
        assert!(matches!(
            manager.rotate(&issued.token, "ip").await,
            Err(AuthError::Revoked)
        ));
    }

    #[tokio::test]
    async fn test_reuse_with_reject_policy_keeps_other_tokens() {
        let (manager, store, clock) = manager(ReusePolicy::Reject);
        let principal_id = Uuid::new_v4();

        let first = manager.generate(principal_id, "ip").await.unwrap();
        let second = manager.rotate(&first.token, "ip").await.unwrap();
        assert!(matches!(
            manager.rotate(&first.token, "ip").await,
            Err(AuthError::Revoked)
        ));

        let now = clock.now();
        let active: Vec<_> = store
            .refresh_tokens_for(principal_id)
            .into_iter()
            .filter(|t| t.is_active_at(now))
            .collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].token_id, second.record.token_id);
    }

    #[tokio::test]
    async fn test_reuse_with_revoke_all_policy() {
        let (manager, _, _) = manager(ReusePolicy::RevokeAll);
        let principal_id = Uuid::new_v4();

        let first = manager.generate(principal_id, "ip").await.unwrap();
        let second = manager.rotate(&first.token, "ip").await.unwrap();
        let other_device = manager.generate(principal_id, "ip").await.unwrap();

        assert!(matches!(
            manager.rotate(&first.token, "attacker").await,
            Err(AuthError::Revoked)
        ));
        assert!(matches!(
            manager.validate(&second.token).await,
            Err(AuthError::Revoked)
        ));
        assert!(matches!(
            manager.validate(&other_device.token).await,
            Err(AuthError::Revoked)
        ));
    }

    #[tokio::test]
    async fn test_expiry_overflow_is_an_error_not_a_panic() {
        let store = Arc::new(InMemoryStore::new());
        let manager = RefreshTokenManager::new(
            store.clone(),
            Arc::new(ManualClock::default()),
            &RefreshConfig {
                expiry_days: 200_000_000,
                reuse_policy: ReusePolicy::Reject,
            },
        );
        let principal_id = Uuid::new_v4();

        let result = manager.generate(principal_id, "ip").await;
        assert!(matches!(result, Err(AuthError::Unexpected(_))));
        assert!(store.refresh_tokens_for(principal_id).is_empty());
    }

    #[tokio::test]
    async fn test_chain_of_unknown_token() {
        let (manager, _, _) = manager(ReusePolicy::Reject);
        assert!(matches!(
            manager.chain(Uuid::new_v4()).await,
            Err(AuthError::NotFound)
        ));
    }
}
