//! PostgreSQL-backed storage for the token service.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use uuid::Uuid;

use super::store::{
    HealthCheck, OtpStore, PrincipalDirectory, RefreshTokenStore, RoleAssignmentStore,
};
use crate::models::{OneTimePasscode, Principal, RefreshToken, Revocation};

/// PostgreSQL database wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database wrapper from a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl HealthCheck for Database {
    async fn health_check(&self) -> anyhow::Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Database health check failed: {}", e);
                anyhow::anyhow!("Database health check failed: {}", e)
            })?;
        Ok(())
    }
}

// ==================== Principal Operations ====================

#[async_trait]
impl PrincipalDirectory for Database {
    async fn find_principal_by_id(&self, principal_id: Uuid) -> anyhow::Result<Option<Principal>> {
        let principal = sqlx::query_as::<_, Principal>(
            "SELECT principal_id, email, created_utc FROM principals WHERE principal_id = $1",
        )
        .bind(principal_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(principal)
    }

    async fn find_principal_by_email(&self, email: &str) -> anyhow::Result<Option<Principal>> {
        let principal = sqlx::query_as::<_, Principal>(
            "SELECT principal_id, email, created_utc FROM principals WHERE LOWER(email) = LOWER($1)",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(principal)
    }
}

// ==================== Role Operations ====================

#[async_trait]
impl RoleAssignmentStore for Database {
    async fn find_role_names(&self, principal_id: Uuid) -> anyhow::Result<Vec<String>> {
        let names = sqlx::query_scalar::<_, String>(
            r#"
            SELECT r.role_name FROM principal_roles pr
            JOIN roles r ON r.role_id = pr.role_id
            WHERE pr.principal_id = $1
            ORDER BY r.role_name
            "#,
        )
        .bind(principal_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(names)
    }
}

// ==================== OTP Operations ====================

#[async_trait]
impl OtpStore for Database {
    async fn replace_otp(&self, otp: &OneTimePasscode) -> anyhow::Result<()> {
        // principal_id is unique, so the upsert is the delete-then-insert in one statement.
        sqlx::query(
            r#"
            INSERT INTO one_time_passcodes
                (otp_id, principal_id, code_hash, expires_utc, created_utc, attempt_count)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (principal_id) DO UPDATE
            SET otp_id = EXCLUDED.otp_id,
                code_hash = EXCLUDED.code_hash,
                expires_utc = EXCLUDED.expires_utc,
                created_utc = EXCLUDED.created_utc,
                attempt_count = EXCLUDED.attempt_count
            "#,
        )
        .bind(otp.otp_id)
        .bind(otp.principal_id)
        .bind(&otp.code_hash)
        .bind(otp.expires_utc)
        .bind(otp.created_utc)
        .bind(otp.attempt_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_otp_for_principal(
        &self,
        principal_id: Uuid,
    ) -> anyhow::Result<Option<OneTimePasscode>> {
        let otp = sqlx::query_as::<_, OneTimePasscode>(
            "SELECT * FROM one_time_passcodes WHERE principal_id = $1",
        )
        .bind(principal_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(otp)
    }

    async fn consume_otp(&self, otp_id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM one_time_passcodes WHERE otp_id = $1")
            .bind(otp_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_failed_otp_attempt(
        &self,
        otp_id: Uuid,
        max_attempts: i32,
    ) -> anyhow::Result<bool> {
        let mut tx = self.pool.begin().await?;

        // The increment locks the row, so concurrent guesses are counted one by one.
        let attempts = sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE one_time_passcodes
            SET attempt_count = attempt_count + 1
            WHERE otp_id = $1
            RETURNING attempt_count
            "#,
        )
        .bind(otp_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(attempts) = attempts else {
            tx.rollback().await?;
            return Ok(false);
        };

        if attempts >= max_attempts {
            sqlx::query("DELETE FROM one_time_passcodes WHERE otp_id = $1")
                .bind(otp_id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            return Ok(false);
        }

        tx.commit().await?;
        Ok(true)
    }
}

// ==================== Refresh Token Operations ====================

#[async_trait]
impl RefreshTokenStore for Database {
    async fn insert_refresh_token(&self, token: &RefreshToken) -> anyhow::Result<()> {
        insert_refresh_token(&mut *self.pool.acquire().await?, token).await
    }

    async fn find_refresh_token_by_hash(
        &self,
        token_hash: &str,
    ) -> anyhow::Result<Option<RefreshToken>> {
        let token = sqlx::query_as::<_, RefreshToken>(
            "SELECT * FROM refresh_tokens WHERE token_hash = $1",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(token)
    }

    async fn find_refresh_token_by_id(
        &self,
        token_id: Uuid,
    ) -> anyhow::Result<Option<RefreshToken>> {
        let token =
            sqlx::query_as::<_, RefreshToken>("SELECT * FROM refresh_tokens WHERE token_id = $1")
                .bind(token_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(token)
    }

    async fn rotate_refresh_token(
        &self,
        presented_id: Uuid,
        revocation: &Revocation,
        successor: &RefreshToken,
    ) -> anyhow::Result<bool> {
        let mut tx = self.pool.begin().await?;

        // The row lock taken here serializes concurrent rotations of one token;
        // the loser re-evaluates `revoked_utc IS NULL` and matches nothing.
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked_utc = $2, revoked_by_ip = $3, replaced_by_token_id = $4
            WHERE token_id = $1 AND revoked_utc IS NULL
            "#,
        )
        .bind(presented_id)
        .bind(revocation.revoked_utc)
        .bind(&revocation.revoked_by_ip)
        .bind(successor.token_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        insert_refresh_token(&mut *tx, successor).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn revoke_refresh_token(
        &self,
        token_id: Uuid,
        revocation: &Revocation,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked_utc = $2, revoked_by_ip = $3
            WHERE token_id = $1 AND revoked_utc IS NULL
            "#,
        )
        .bind(token_id)
        .bind(revocation.revoked_utc)
        .bind(&revocation.revoked_by_ip)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn revoke_all_refresh_tokens(
        &self,
        principal_id: Uuid,
        revocation: &Revocation,
    ) -> anyhow::Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked_utc = $2, revoked_by_ip = $3
            WHERE principal_id = $1 AND revoked_utc IS NULL AND expires_utc > $2
            "#,
        )
        .bind(principal_id)
        .bind(revocation.revoked_utc)
        .bind(&revocation.revoked_by_ip)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

async fn insert_refresh_token(
    conn: &mut sqlx::PgConnection,
    token: &RefreshToken,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO refresh_tokens (
            token_id, principal_id, token_hash, issued_utc, expires_utc,
            created_by_ip, revoked_utc, revoked_by_ip, replaced_by_token_id
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(token.token_id)
    .bind(token.principal_id)
    .bind(&token.token_hash)
    .bind(token.issued_utc)
    .bind(token.expires_utc)
    .bind(&token.created_by_ip)
    .bind(token.revoked_utc)
    .bind(&token.revoked_by_ip)
    .bind(token.replaced_by_token_id)
    .execute(conn)
    .await?;
    Ok(())
}
