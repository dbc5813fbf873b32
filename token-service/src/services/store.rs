//! Storage seams consumed by the token-lifecycle components.
//!
//! Implemented by [`Database`](super::Database) for PostgreSQL and by
//! [`InMemoryStore`](super::InMemoryStore) for tests and local runs.

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{OneTimePasscode, Principal, RefreshToken, Revocation};

/// Resolves principals by identifier or external handle.
#[async_trait]
pub trait PrincipalDirectory: Send + Sync {
    async fn find_principal_by_id(&self, principal_id: Uuid) -> anyhow::Result<Option<Principal>>;

    /// Case-insensitive lookup by email.
    async fn find_principal_by_email(&self, email: &str) -> anyhow::Result<Option<Principal>>;
}

/// Read side of role membership.
#[async_trait]
pub trait RoleAssignmentStore: Send + Sync {
    async fn find_role_names(&self, principal_id: Uuid) -> anyhow::Result<Vec<String>>;
}

#[async_trait]
pub trait OtpStore: Send + Sync {
    /// Atomically drop every passcode of `otp.principal_id` and store `otp`.
    /// Concurrent calls for one principal leave exactly one passcode behind.
    async fn replace_otp(&self, otp: &OneTimePasscode) -> anyhow::Result<()>;

    async fn find_otp_for_principal(
        &self,
        principal_id: Uuid,
    ) -> anyhow::Result<Option<OneTimePasscode>>;

    /// Delete a passcode. Returns `false` if it was already gone, so only one
    /// caller can ever consume a given passcode.
    async fn consume_otp(&self, otp_id: Uuid) -> anyhow::Result<bool>;

    /// Count one wrong guess against a passcode, deleting it once
    /// `max_attempts` is reached. Returns `true` while the passcode survives.
    async fn record_failed_otp_attempt(
        &self,
        otp_id: Uuid,
        max_attempts: i32,
    ) -> anyhow::Result<bool>;
}

#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn insert_refresh_token(&self, token: &RefreshToken) -> anyhow::Result<()>;

    async fn find_refresh_token_by_hash(
        &self,
        token_hash: &str,
    ) -> anyhow::Result<Option<RefreshToken>>;

    async fn find_refresh_token_by_id(&self, token_id: Uuid)
        -> anyhow::Result<Option<RefreshToken>>;

    /// Revoke `presented_id` and insert `successor` as one atomic step.
    ///
    /// The revocation only applies while the presented token is unrevoked.
    /// Returns `false` (and inserts nothing) when another caller got there first.
    async fn rotate_refresh_token(
        &self,
        presented_id: Uuid,
        revocation: &Revocation,
        successor: &RefreshToken,
    ) -> anyhow::Result<bool>;

    /// Revoke a single unrevoked token. Returns `false` if it was already revoked.
    async fn revoke_refresh_token(
        &self,
        token_id: Uuid,
        revocation: &Revocation,
    ) -> anyhow::Result<bool>;

    /// Revoke every active token of a principal; returns how many were revoked.
    async fn revoke_all_refresh_tokens(
        &self,
        principal_id: Uuid,
        revocation: &Revocation,
    ) -> anyhow::Result<u64>;
}

#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn health_check(&self) -> anyhow::Result<()>;
}

/// Everything the service needs from one backing store.
pub trait Storage:
    PrincipalDirectory + RoleAssignmentStore + OtpStore + RefreshTokenStore + HealthCheck
{
}

impl<T> Storage for T where
    T: PrincipalDirectory + RoleAssignmentStore + OtpStore + RefreshTokenStore + HealthCheck
{
}
