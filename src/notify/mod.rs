//! Outbound notification channels.

pub mod email;
pub mod nudge;

use async_trait::async_trait;
use tracing::info;

use crate::error::NotifyError;

/// Outbound message delivery, one method per channel.
///
/// Workflow code treats every send as best-effort: failures are logged
/// and never abort the workflow that triggered them.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<(), NotifyError>;
    async fn send_sms(&self, to: &str, body: &str) -> Result<(), NotifyError>;
    async fn send_whatsapp(&self, to: &str, body: &str) -> Result<(), NotifyError>;
}

/// Notifier that only logs. Used when no SMTP config is present, and in
/// tests.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_email(&self, to: &str, subject: &str, _body: &str) -> Result<(), NotifyError> {
        info!(to, subject, "Email (log only)");
        Ok(())
    }

    async fn send_sms(&self, to: &str, _body: &str) -> Result<(), NotifyError> {
        info!(to, "SMS (log only)");
        Ok(())
    }

    async fn send_whatsapp(&self, to: &str, _body: &str) -> Result<(), NotifyError> {
        info!(to, "WhatsApp (log only)");
        Ok(())
    }
}
