use chrono::Duration;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use std::sync::Arc;
use uuid::Uuid;

use super::clock::Clock;
use super::error::AuthError;
use super::roles::RoleResolver;
use crate::config::JwtConfig;

/// Mints HS256 access tokens carrying the principal's current roles.
#[derive(Clone)]
pub struct AccessTokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    audience: String,
    access_token_expiry_minutes: i64,
    roles: RoleResolver,
    clock: Arc<dyn Clock>,
}

/// Claims for access tokens (short-lived)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Subject (principal ID)
    pub sub: String,
    /// One entry per assigned role
    #[serde(rename = "role", default)]
    pub roles: Vec<String>,
    pub iss: String,
    pub aud: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// JWT ID
    pub jti: String,
}

impl AccessTokenIssuer {
    /// Build the issuer from validated key material. A bad key is a start-up error.
    pub fn new(
        config: &JwtConfig,
        roles: RoleResolver,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AppError> {
        config.validate()?;

        let secret = config.signing_key.expose_secret().as_bytes();

        tracing::info!(
            issuer = %config.issuer,
            audience = %config.audience,
            "Access token issuer initialized with HS256 key"
        );

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            access_token_expiry_minutes: config.access_token_expiry_minutes,
            roles,
            clock,
        })
    }

    /// Issue an access token from the principal's roles as they are right now.
    pub async fn issue(&self, principal_id: Uuid) -> Result<String, AuthError> {
        let roles = self.roles.roles_for(principal_id).await?;
        let now = self.clock.now();
        let exp = now
            .checked_add_signed(Duration::minutes(self.access_token_expiry_minutes))
            .ok_or_else(|| anyhow::anyhow!("access token expiry out of range"))?;

        let claims = AccessTokenClaims {
            sub: principal_id.to_string(),
            roles,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to encode access token: {}", e))?;

        tracing::debug!(principal_id = %principal_id, roles = ?claims.roles, "Access token issued");
        Ok(token)
    }

    /// Validate signature, expiry, issuer and audience, and return the claims.
    pub fn verify(&self, token: &str) -> Result<AccessTokenClaims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);

        decode::<AccessTokenClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidCredential,
            })
    }

    /// Get access token expiry in seconds (for client info)
    pub fn access_token_expiry_seconds(&self) -> i64 {
        self.access_token_expiry_minutes * 60
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{InMemoryStore, ManualClock};
    use secrecy::SecretString;
    use std::collections::HashSet;

    const TEST_KEY: &str = "test-signing-key-that-is-long-enough-for-hs256";

    fn config() -> JwtConfig {
        JwtConfig {
            signing_key: SecretString::new(TEST_KEY.to_string()),
            issuer: "https://auth.test".to_string(),
            audience: "test-clients".to_string(),
            access_token_expiry_minutes: 15,
        }
    }

    fn issuer(store: Arc<InMemoryStore>, clock: Arc<ManualClock>) -> AccessTokenIssuer {
        AccessTokenIssuer::new(&config(), RoleResolver::new(store), clock)
            .expect("valid test config")
    }

    #[test]
    fn test_short_key_fails_at_construction() {
        let mut config = config();
        config.signing_key = SecretString::new("short".to_string());
        let store = Arc::new(InMemoryStore::new());
        let result = AccessTokenIssuer::new(
            &config,
            RoleResolver::new(store),
            Arc::new(ManualClock::default()),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_token_carries_exactly_assigned_roles() {
        let store = Arc::new(InMemoryStore::new());
        let principal = store.add_principal("grace@example.com");
        store.assign_role(principal.principal_id, "B");
        store.assign_role(principal.principal_id, "A");

        let issuer = issuer(store, Arc::new(ManualClock::default()));
        let token = issuer.issue(principal.principal_id).await.unwrap();
        let claims = issuer.verify(&token).unwrap();

        assert_eq!(claims.sub, principal.principal_id.to_string());
        let roles: HashSet<String> = claims.roles.into_iter().collect();
        assert_eq!(roles, HashSet::from(["A".to_string(), "B".to_string()]));
        assert_eq!(claims.iss, "https://auth.test");
        assert_eq!(claims.aud, "test-clients");
        assert_eq!(claims.exp - claims.iat, 15 * 60);
    }

    #[tokio::test]
    async fn test_role_change_applies_on_next_issue() {
        let store = Arc::new(InMemoryStore::new());
        let principal = store.add_principal("grace@example.com");
        store.assign_role(principal.principal_id, "reviewer");

        let issuer = issuer(store.clone(), Arc::new(ManualClock::default()));
        let before = issuer.issue(principal.principal_id).await.unwrap();

        store.unassign_role(principal.principal_id, "reviewer");
        store.assign_role(principal.principal_id, "editor");
        let after = issuer.issue(principal.principal_id).await.unwrap();

        assert_eq!(issuer.verify(&before).unwrap().roles, vec!["reviewer"]);
        assert_eq!(issuer.verify(&after).unwrap().roles, vec!["editor"]);
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::default());
        clock.advance(Duration::hours(-2));

        let issuer = issuer(store, clock);
        let token = issuer.issue(Uuid::new_v4()).await.unwrap();
        assert!(matches!(issuer.verify(&token), Err(AuthError::Expired)));
    }

    #[tokio::test]
    async fn test_wrong_audience_rejected() {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::default());
        let token = issuer(store.clone(), clock.clone())
            .issue(Uuid::new_v4())
            .await
            .unwrap();

        let mut other = config();
        other.audience = "someone-else".to_string();
        let other = AccessTokenIssuer::new(&other, RoleResolver::new(store), clock).unwrap();
        assert!(matches!(
            other.verify(&token),
            Err(AuthError::InvalidCredential)
        ));
    }

    #[tokio::test]
    async fn test_tampered_token_rejected() {
        let store = Arc::new(InMemoryStore::new());
        let issuer = issuer(store, Arc::new(ManualClock::default()));
        let token = issuer.issue(Uuid::new_v4()).await.unwrap();

        let mut tampered = token.clone();
        tampered.push('x');
        assert!(matches!(
            issuer.verify(&tampered),
            Err(AuthError::InvalidCredential)
        ));
    }
}
