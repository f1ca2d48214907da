//! Configuration types, built from environment variables.

use std::time::Duration;

use secrecy::SecretString;

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: String,
    /// Address the HTTP surface binds to.
    pub bind_addr: String,
    /// Bearer secret for the provisioning webhook. `None` disables the route.
    pub webhook_secret: Option<SecretString>,
    /// Slack incoming-webhook URL for IT nudges. `None` logs instead.
    pub slack_webhook_url: Option<String>,
    /// Cooldown between IT nudges for the same step.
    pub nudge_cooldown: Duration,
    /// SMTP settings for outbound email. `None` falls back to log-only dispatch.
    pub smtp: Option<SmtpConfig>,
}

impl Config {
    /// Build config from environment variables with sensible defaults.
    pub fn from_env() -> Self {
        let db_path = std::env::var("JOURNEY_OS_DB")
            .unwrap_or_else(|_| "data/journey-os.db".to_string());
        let bind_addr = std::env::var("JOURNEY_OS_BIND")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        let webhook_secret = std::env::var("WEBHOOK_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .map(SecretString::from);
        let slack_webhook_url = std::env::var("SLACK_WEBHOOK_URL")
            .ok()
            .filter(|s| !s.is_empty());
        let nudge_cooldown_hours: u64 = std::env::var("NUDGE_COOLDOWN_HOURS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(4);

        Self {
            db_path,
            bind_addr,
            webhook_secret,
            slack_webhook_url,
            nudge_cooldown: Duration::from_secs(nudge_cooldown_hours * 3600),
            smtp: SmtpConfig::from_env(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: "data/journey-os.db".to_string(),
            bind_addr: "0.0.0.0:8080".to_string(),
            webhook_secret: None,
            slack_webhook_url: None,
            nudge_cooldown: Duration::from_secs(4 * 3600),
            smtp: None,
        }
    }
}

/// SMTP configuration for the email notifier.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_address: String,
}

impl SmtpConfig {
    /// Build config from environment variables.
    /// Returns `None` if `SMTP_HOST` is not set (email dispatch disabled).
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("SMTP_HOST").ok()?;
        let port: u16 = std::env::var("SMTP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(587);
        let username = std::env::var("SMTP_USERNAME").unwrap_or_default();
        let password = std::env::var("SMTP_PASSWORD").unwrap_or_default();
        let from_address =
            std::env::var("SMTP_FROM_ADDRESS").unwrap_or_else(|_| username.clone());

        Some(Self {
            host,
            port,
            username,
            password,
            from_address,
        })
    }
}
