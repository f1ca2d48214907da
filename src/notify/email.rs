//! SMTP email notifier via lettre.

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use tracing::{info, warn};

use crate::config::SmtpConfig;
use crate::error::NotifyError;
use crate::notify::Notifier;

/// Sends email over SMTP. SMS and WhatsApp have no transport here and
/// are logged as skipped.
pub struct SmtpNotifier {
    config: SmtpConfig,
}

impl SmtpNotifier {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    fn send_blocking(&self, to: &str, subject: &str, body: &str) -> Result<(), NotifyError> {
        let creds = Credentials::new(self.config.username.clone(), self.config.password.clone());

        let transport = SmtpTransport::relay(&self.config.host)
            .map_err(|e| NotifyError::Smtp(format!("SMTP relay error: {e}")))?
            .port(self.config.port)
            .credentials(creds)
            .build();

        let email = Message::builder()
            .from(
                self.config
                    .from_address
                    .parse()
                    .map_err(|e| NotifyError::Smtp(format!("Invalid from address: {e}")))?,
            )
            .to(to
                .parse()
                .map_err(|e| NotifyError::Smtp(format!("Invalid to address: {e}")))?)
            .subject(subject)
            .body(body.to_string())
            .map_err(|e| NotifyError::Smtp(format!("Failed to build email: {e}")))?;

        transport
            .send(&email)
            .map_err(|e| NotifyError::Smtp(format!("SMTP send failed: {e}")))?;

        info!(to, "Email sent");
        Ok(())
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<(), NotifyError> {
        self.send_blocking(to, subject, body)
    }

    async fn send_sms(&self, to: &str, _body: &str) -> Result<(), NotifyError> {
        warn!(to, "SMS transport not configured, skipping");
        Ok(())
    }

    async fn send_whatsapp(&self, to: &str, _body: &str) -> Result<(), NotifyError> {
        warn!(to, "WhatsApp transport not configured, skipping");
        Ok(())
    }
}
