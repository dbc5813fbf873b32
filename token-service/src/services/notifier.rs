use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    Message, SmtpTransport, Transport,
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use std::sync::Mutex;
use std::time::Duration;

use crate::config::SmtpConfig;

/// Delivers a freshly issued passcode to the principal's contact address.
#[async_trait]
pub trait OtpNotifier: Send + Sync {
    async fn send_otp(
        &self,
        to_email: &str,
        code: &str,
        expires_in_minutes: i64,
    ) -> Result<(), AppError>;
}

#[derive(Clone)]
pub struct EmailNotifier {
    mailer: SmtpTransport,
    from_email: String,
}

impl EmailNotifier {
    pub fn new(config: &SmtpConfig) -> Result<Self, AppError> {
        let mailer = if config.user.is_empty() {
            // Local relay (mail catcher) without TLS or auth.
            SmtpTransport::builder_dangerous(&config.host)
                .port(config.port)
                .timeout(Some(Duration::from_secs(10)))
                .build()
        } else {
            let creds = Credentials::new(
                config.user.clone(),
                config.password.expose_secret().clone(),
            );
            SmtpTransport::relay(&config.host)
                .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e.to_string())))?
                .credentials(creds)
                .port(config.port)
                .timeout(Some(Duration::from_secs(10)))
                .build()
        };

        tracing::info!(host = %config.host, port = config.port, "Email notifier initialized");

        Ok(Self {
            mailer,
            from_email: config.from.clone(),
        })
    }

    async fn send_email(
        &self,
        to_email: &str,
        subject: &str,
        plain_body: String,
        html_body: String,
    ) -> Result<(), AppError> {
        let email = Message::builder()
            .from(
                self.from_email
                    .parse()
                    .map_err(|e: lettre::address::AddressError| AppError::InternalError(e.into()))?,
            )
            .to(to_email
                .parse()
                .map_err(|e: lettre::address::AddressError| AppError::InternalError(e.into()))?)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(plain_body),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html_body),
                    ),
            )
            .map_err(|e| AppError::InternalError(e.into()))?;

        // SmtpTransport is blocking.
        let mailer = self.mailer.clone();
        let result = tokio::task::spawn_blocking(move || mailer.send(&email))
            .await
            .map_err(|e| AppError::InternalError(e.into()))?;

        match result {
            Ok(_) => {
                tracing::info!(subject = %subject, "Email sent successfully");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to send email");
                Err(AppError::EmailError(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl OtpNotifier for EmailNotifier {
    async fn send_otp(
        &self,
        to_email: &str,
        code: &str,
        expires_in_minutes: i64,
    ) -> Result<(), AppError> {
        let plain_body = format!(
            "Your sign-in code is {}.\n\nIt expires in {} minutes. If you did not request it, you can ignore this email.",
            code, expires_in_minutes
        );
        let html_body = format!(
            r###"<html>
    <body style="font-family: Arial, sans-serif;">
        <h2>Your sign-in code</h2>
        <p style="font-size: 28px; letter-spacing: 6px; font-weight: bold;">{}</p>
        <p>It expires in {} minutes.</p>
        <p style="color: #666;">If you did not request it, you can ignore this email.</p>
    </body>
</html>"###,
            code, expires_in_minutes
        );

        self.send_email(to_email, "Your sign-in code", plain_body, html_body)
            .await
    }
}

/// Keeps every delivered code in memory instead of sending it.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent code delivered to `email`.
    pub fn last_code_for(&self, email: &str) -> Option<String> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .rev()
            .find(|(to, _)| to.eq_ignore_ascii_case(email))
            .map(|(_, code)| code.clone())
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl OtpNotifier for RecordingNotifier {
    async fn send_otp(
        &self,
        to_email: &str,
        code: &str,
        _expires_in_minutes: i64,
    ) -> Result<(), AppError> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((to_email.to_string(), code.to_string()));
        Ok(())
    }
}
