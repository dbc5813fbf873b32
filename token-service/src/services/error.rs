use service_core::error::AppError;
use thiserror::Error;

/// Failure of a token-lifecycle operation.
///
/// Every variant except `Unexpected` is a recoverable domain outcome.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid credential")]
    InvalidCredential,

    #[error("Credential expired")]
    Expired,

    /// A rotated or logged-out refresh token was presented again.
    #[error("Refresh token revoked")]
    Revoked,

    #[error("Principal not found")]
    NotFound,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Unexpected error: {0}")]
    Unexpected(#[from] anyhow::Error),
}

impl AuthError {
    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::InvalidCredential => "invalid_credential",
            AuthError::Expired => "expired",
            AuthError::Revoked => "revoked",
            AuthError::NotFound => "not_found",
            AuthError::Cancelled => "cancelled",
            AuthError::Unexpected(_) => "unexpected",
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredential
            | AuthError::Expired
            | AuthError::Revoked
            | AuthError::NotFound => {
                tracing::info!(reason = err.kind(), "Authentication rejected");
                AppError::Unauthorized(anyhow::anyhow!(err.to_string()))
            }
            AuthError::Cancelled => AppError::Cancelled,
            AuthError::Unexpected(e) => AppError::InternalError(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use service_core::axum::http::StatusCode;

    #[test]
    fn test_credential_failures_collapse_to_unauthorized() {
        for err in [
            AuthError::InvalidCredential,
            AuthError::Expired,
            AuthError::Revoked,
            AuthError::NotFound,
        ] {
            let app: AppError = err.into();
            assert_eq!(app.status(), StatusCode::UNAUTHORIZED);
        }
    }

    #[test]
    fn test_storage_failure_is_internal() {
        let app: AppError = AuthError::Unexpected(anyhow::anyhow!("connection reset")).into();
        assert_eq!(app.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
