use secrecy::{ExposeSecret, SecretString};
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::fmt::Display;
use std::str::FromStr;

/// Shortest accepted HS256 key, in bytes.
pub const MIN_SIGNING_KEY_LEN: usize = 32;

pub const MAX_ACCESS_TOKEN_EXPIRY_MINUTES: i64 = 24 * 60;
pub const MAX_OTP_EXPIRY_MINUTES: i64 = 60;
pub const MAX_OTP_ATTEMPTS: i32 = 20;
pub const MAX_REFRESH_TOKEN_EXPIRY_DAYS: i64 = 365;

#[derive(Debug)]
pub struct TokenConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub allowed_origins: Vec<String>,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub otp: OtpConfig,
    pub refresh: RefreshConfig,
    pub smtp: SmtpConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug)]
pub struct JwtConfig {
    pub signing_key: SecretString,
    pub issuer: String,
    pub audience: String,
    pub access_token_expiry_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct OtpConfig {
    pub expiry_minutes: i64,
    pub length: usize,
    /// Wrong guesses allowed before the passcode is discarded.
    pub max_attempts: i32,
}

#[derive(Debug, Clone)]
pub struct RefreshConfig {
    pub expiry_days: i64,
    pub reuse_policy: ReusePolicy,
}

/// What to do when an already-rotated refresh token is presented again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReusePolicy {
    /// Fail the exchange and leave the principal's other tokens alone.
    #[default]
    Reject,
    /// Fail the exchange and revoke every active token of the principal.
    RevokeAll,
}

#[derive(Debug)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: SecretString,
    pub from: String,
}

impl TokenConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let environment: Environment = env::var("ENVIRONMENT")
            .unwrap_or_else(|_| "dev".to_string())
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = TokenConfig {
            common: common_config,
            environment,
            service_name: get_env("SERVICE_NAME", Some("token-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            allowed_origins: get_env("ALLOWED_ORIGINS", Some("http://localhost:3000"), is_prod)?
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect(),
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", Some("10"), is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", Some("1"), is_prod)?,
            },
            jwt: JwtConfig {
                signing_key: SecretString::new(get_env("JWT_SIGNING_KEY", None, is_prod)?),
                issuer: get_env("JWT_ISSUER", Some("token-service"), is_prod)?,
                audience: get_env("JWT_AUDIENCE", Some("token-service-clients"), is_prod)?,
                access_token_expiry_minutes: parse_env(
                    "JWT_ACCESS_TOKEN_EXPIRY_MINUTES",
                    Some("15"),
                    is_prod,
                )?,
            },
            otp: OtpConfig {
                expiry_minutes: parse_env("OTP_EXPIRY_MINUTES", Some("5"), is_prod)?,
                length: parse_env("OTP_LENGTH", Some("6"), is_prod)?,
                max_attempts: parse_env("OTP_MAX_ATTEMPTS", Some("5"), is_prod)?,
            },
            refresh: RefreshConfig {
                expiry_days: parse_env("REFRESH_TOKEN_EXPIRY_DAYS", Some("7"), is_prod)?,
                reuse_policy: parse_env("REFRESH_REUSE_POLICY", Some("reject"), is_prod)?,
            },
            smtp: SmtpConfig {
                host: get_env("SMTP_HOST", Some("localhost"), is_prod)?,
                port: parse_env("SMTP_PORT", Some("1025"), is_prod)?,
                user: get_env("SMTP_USER", Some(""), is_prod)?,
                password: SecretString::new(get_env("SMTP_PASSWORD", Some(""), is_prod)?),
                from: get_env("SMTP_FROM", Some("no-reply@localhost"), is_prod)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        self.jwt.validate()?;
        self.otp.validate()?;
        self.refresh.validate()?;

        if self.database.min_connections > self.database.max_connections {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "DATABASE_MIN_CONNECTIONS must not exceed DATABASE_MAX_CONNECTIONS"
            )));
        }

        if self.smtp.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "SMTP_PORT must be greater than 0"
            )));
        }

        Ok(())
    }
}

impl JwtConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.signing_key.expose_secret().len() < MIN_SIGNING_KEY_LEN {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_SIGNING_KEY must be at least {} bytes",
                MIN_SIGNING_KEY_LEN
            )));
        }

        if self.issuer.trim().is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_ISSUER must not be empty"
            )));
        }

        if self.audience.trim().is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_AUDIENCE must not be empty"
            )));
        }

        if !(1..=MAX_ACCESS_TOKEN_EXPIRY_MINUTES).contains(&self.access_token_expiry_minutes) {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_ACCESS_TOKEN_EXPIRY_MINUTES must be between 1 and {}",
                MAX_ACCESS_TOKEN_EXPIRY_MINUTES
            )));
        }

        Ok(())
    }
}

impl OtpConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        if !(1..=MAX_OTP_EXPIRY_MINUTES).contains(&self.expiry_minutes) {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "OTP_EXPIRY_MINUTES must be between 1 and {}",
                MAX_OTP_EXPIRY_MINUTES
            )));
        }

        if !(1..=MAX_OTP_ATTEMPTS).contains(&self.max_attempts) {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "OTP_MAX_ATTEMPTS must be between 1 and {}",
                MAX_OTP_ATTEMPTS
            )));
        }

        if !(4..=10).contains(&self.length) {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "OTP_LENGTH must be between 4 and 10"
            )));
        }

        Ok(())
    }
}

impl RefreshConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        if !(1..=MAX_REFRESH_TOKEN_EXPIRY_DAYS).contains(&self.expiry_days) {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "REFRESH_TOKEN_EXPIRY_DAYS must be between 1 and {}",
                MAX_REFRESH_TOKEN_EXPIRY_DAYS
            )));
        }
        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: Option<&str>, is_prod: bool) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: Display,
{
    get_env(key, default, is_prod)?
        .trim()
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

impl FromStr for ReusePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "reject" => Ok(ReusePolicy::Reject),
            "revoke_all" => Ok(ReusePolicy::RevokeAll),
            _ => Err(format!("Invalid refresh reuse policy: {}", s)),
        }
    }
}
