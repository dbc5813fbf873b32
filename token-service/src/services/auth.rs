//! Authentication flows: request a passcode, log in with it, refresh a session.
//!
//! `AuthFlow` holds no state of its own. Each operation takes a cancellation
//! token; it is honoured up to and including the step that commits, and
//! ignored afterwards so a committed rotation always reaches the caller.

use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::error::AuthError;
use super::jwt::AccessTokenIssuer;
use super::notifier::OtpNotifier;
use super::otp::OtpManager;
use super::refresh::RefreshTokenManager;
use super::store::PrincipalDirectory;
use crate::models::Principal;

/// Access token plus the refresh token that renews it.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub principal_id: Uuid,
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
}

#[derive(Clone)]
pub struct AuthFlow {
    directory: Arc<dyn PrincipalDirectory>,
    otp: OtpManager,
    access: AccessTokenIssuer,
    refresh: RefreshTokenManager,
    notifier: Arc<dyn OtpNotifier>,
}

impl AuthFlow {
    pub fn new(
        directory: Arc<dyn PrincipalDirectory>,
        otp: OtpManager,
        access: AccessTokenIssuer,
        refresh: RefreshTokenManager,
        notifier: Arc<dyn OtpNotifier>,
    ) -> Self {
        Self {
            directory,
            otp,
            access,
            refresh,
            notifier,
        }
    }

    pub fn access_tokens(&self) -> &AccessTokenIssuer {
        &self.access
    }

    pub fn refresh_tokens(&self) -> &RefreshTokenManager {
        &self.refresh
    }

    /// Issue and deliver a passcode.
    ///
    /// Succeeds for unknown emails too, so the response never reveals whether
    /// an account exists.
    #[tracing::instrument(skip(self, email, cancel))]
    pub async fn request_otp(
        &self,
        email: &str,
        cancel: &CancellationToken,
    ) -> Result<(), AuthError> {
        let Some(principal) = cancellable(cancel, self.find_principal(email.trim())).await? else {
            tracing::info!("Passcode requested for unknown email");
            return Ok(());
        };

        let issued = cancellable(cancel, self.otp.request(principal.principal_id)).await?;

        if let Err(e) = self
            .notifier
            .send_otp(&principal.email, &issued.code, self.otp.expiry_minutes())
            .await
        {
            tracing::error!(
                principal_id = %principal.principal_id,
                error = %e,
                "Failed to deliver passcode"
            );
        }

        Ok(())
    }

    /// Exchange a passcode for a fresh token pair.
    #[tracing::instrument(skip(self, email, code, cancel))]
    pub async fn login_with_otp(
        &self,
        email: &str,
        code: &str,
        client_ip: &str,
        cancel: &CancellationToken,
    ) -> Result<TokenPair, AuthError> {
        let principal = cancellable(cancel, self.find_principal(email.trim()))
            .await?
            .ok_or(AuthError::NotFound)?;

        cancellable(cancel, self.otp.validate(principal.principal_id, code)).await?;

        // The passcode is spent; finish the login regardless of cancellation.
        let access_token = self.access.issue(principal.principal_id).await?;
        let refresh = self
            .refresh
            .generate(principal.principal_id, client_ip)
            .await?;

        tracing::info!(principal_id = %principal.principal_id, "Login with passcode succeeded");

        Ok(TokenPair {
            principal_id: principal.principal_id,
            access_token,
            refresh_token: refresh.token,
            expires_in: self.access.access_token_expiry_seconds(),
        })
    }

    /// Rotate a refresh token and mint a new access token for its principal.
    ///
    /// `Revoked` is passed through unchanged: it means a rotated-away token was
    /// replayed and the session must end.
    #[tracing::instrument(skip(self, refresh_token, cancel))]
    pub async fn refresh_session(
        &self,
        refresh_token: &str,
        client_ip: &str,
        cancel: &CancellationToken,
    ) -> Result<TokenPair, AuthError> {
        let rotated = cancellable(cancel, self.refresh.rotate(refresh_token, client_ip)).await;
        let successor = match rotated {
            Err(AuthError::Revoked) => {
                tracing::warn!("Refresh rejected: revoked token replayed, terminating session");
                return Err(AuthError::Revoked);
            }
            other => other?,
        };

        let principal_id = successor.record.principal_id;
        let access_token = self.access.issue(principal_id).await?;

        Ok(TokenPair {
            principal_id,
            access_token,
            refresh_token: successor.token,
            expires_in: self.access.access_token_expiry_seconds(),
        })
    }

    /// Revoke the presented refresh token.
    #[tracing::instrument(skip(self, refresh_token, cancel))]
    pub async fn logout(
        &self,
        refresh_token: &str,
        client_ip: &str,
        cancel: &CancellationToken,
    ) -> Result<(), AuthError> {
        cancellable(cancel, self.refresh.revoke(refresh_token, client_ip)).await
    }

    async fn find_principal(&self, email: &str) -> Result<Option<Principal>, AuthError> {
        Ok(self.directory.find_principal_by_email(email).await?)
    }
}

/// Run `fut` unless `cancel` fires first. Dropping an in-flight storage future
/// rolls back its transaction.
async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, AuthError>
where
    F: Future<Output = Result<T, AuthError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AuthError::Cancelled),
        result = fut => result,
    }
}
