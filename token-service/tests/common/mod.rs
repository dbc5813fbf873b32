//! Shared fixtures for token-service integration tests.
//!
//! Everything runs against the in-process store, a manual clock and a
//! notifier that records codes instead of mailing them.

#![allow(dead_code)]

use secrecy::SecretString;
use std::sync::Arc;
use token_service::{
    build_router,
    config::{Environment, JwtConfig, OtpConfig, RefreshConfig, ReusePolicy},
    services::{build_auth_flow, AuthFlow, InMemoryStore, ManualClock, RecordingNotifier},
    AppState,
};
use tokio_util::sync::CancellationToken;

pub const TEST_SIGNING_KEY: &str = "integration-test-signing-key-0123456789abcdef";
pub const TEST_IP: &str = "198.51.100.23";

pub fn jwt_config() -> JwtConfig {
    JwtConfig {
        signing_key: SecretString::new(TEST_SIGNING_KEY.to_string()),
        issuer: "https://auth.test".to_string(),
        audience: "test-clients".to_string(),
        access_token_expiry_minutes: 15,
    }
}

pub fn otp_config() -> OtpConfig {
    OtpConfig {
        expiry_minutes: 5,
        length: 6,
        max_attempts: 5,
    }
}

pub fn refresh_config(reuse_policy: ReusePolicy) -> RefreshConfig {
    RefreshConfig {
        expiry_days: 7,
        reuse_policy,
    }
}

pub struct TestContext {
    pub store: Arc<InMemoryStore>,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<RecordingNotifier>,
    pub flow: AuthFlow,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_policy(ReusePolicy::Reject)
    }

    pub fn with_policy(reuse_policy: ReusePolicy) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::default());
        let notifier = Arc::new(RecordingNotifier::new());

        let flow = build_auth_flow(
            store.clone(),
            notifier.clone(),
            clock.clone(),
            &jwt_config(),
            &otp_config(),
            &refresh_config(reuse_policy),
        )
        .expect("valid test configuration");

        Self {
            store,
            clock,
            notifier,
            flow,
        }
    }

    /// Request a passcode for `email` and log in with the delivered code.
    pub async fn login(&self, email: &str) -> token_service::services::TokenPair {
        let cancel = CancellationToken::new();
        self.flow.request_otp(email, &cancel).await.expect("request otp");
        let code = self.notifier.last_code_for(email).expect("code delivered");
        self.flow
            .login_with_otp(email, &code, TEST_IP, &cancel)
            .await
            .expect("login")
    }
}

/// Router plus the handles needed to seed and inspect it.
pub struct TestApp {
    pub router: axum::Router,
    pub store: Arc<InMemoryStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub state: AppState,
}

impl TestApp {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::new());

        let state = AppState::new(
            Environment::Dev,
            vec![],
            &jwt_config(),
            &otp_config(),
            &refresh_config(ReusePolicy::Reject),
            store.clone(),
            notifier.clone(),
            Arc::new(ManualClock::default()),
        )
        .expect("valid test configuration");

        Self {
            router: build_router(state.clone()),
            store,
            notifier,
            state,
        }
    }
}
