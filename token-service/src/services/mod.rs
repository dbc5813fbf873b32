//! Token lifecycle services.
//!
//! Components, leaves first: [`RoleResolver`], [`OtpManager`],
//! [`AccessTokenIssuer`], [`RefreshTokenManager`], composed by [`AuthFlow`].

mod auth;
mod clock;
mod database;
pub mod error;
mod jwt;
mod memory;
mod notifier;
mod otp;
mod refresh;
mod roles;
pub mod store;

pub use auth::{AuthFlow, TokenPair};
pub use clock::{Clock, ManualClock, SystemClock};
pub use database::Database;
pub use error::AuthError;
pub use jwt::{AccessTokenClaims, AccessTokenIssuer};
pub use memory::InMemoryStore;
pub use notifier::{EmailNotifier, OtpNotifier, RecordingNotifier};
pub use otp::{IssuedOtp, OtpManager};
pub use refresh::{IssuedRefreshToken, RefreshTokenManager};
pub use roles::RoleResolver;
pub use store::{
    HealthCheck, OtpStore, PrincipalDirectory, RefreshTokenStore, RoleAssignmentStore, Storage,
};

use service_core::error::AppError;
use std::sync::Arc;

use crate::config::{JwtConfig, OtpConfig, RefreshConfig};

/// Wire every component onto a single backing store.
pub fn build_auth_flow<S>(
    store: Arc<S>,
    notifier: Arc<dyn OtpNotifier>,
    clock: Arc<dyn Clock>,
    jwt: &JwtConfig,
    otp: &OtpConfig,
    refresh: &RefreshConfig,
) -> Result<AuthFlow, AppError>
where
    S: Storage + 'static,
{
    otp.validate()?;
    refresh.validate()?;

    let roles = RoleResolver::new(store.clone());
    let access = AccessTokenIssuer::new(jwt, roles, clock.clone())?;
    let otp = OtpManager::new(store.clone(), clock.clone(), otp);
    let refresh = RefreshTokenManager::new(store.clone(), clock, refresh);

    Ok(AuthFlow::new(store, otp, access, refresh, notifier))
}
