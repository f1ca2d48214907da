//! Error types for journey-os.

use uuid::Uuid;

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Failed to open database: {0}")]
    Open(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl DatabaseError {
    /// Map a libsql error from a write statement, promoting unique-index
    /// violations to `Constraint` so callers can distinguish conflicts.
    pub fn from_write(context: &str, e: libsql::Error) -> Self {
        let text = e.to_string();
        if text.contains("UNIQUE constraint failed") {
            DatabaseError::Constraint(format!("{context}: {text}"))
        } else {
            DatabaseError::Query(format!("{context}: {text}"))
        }
    }
}

/// Journey engine errors — compilation, step transitions, identity flip.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("No journey exists for user {user_id}")]
    JourneyNotFound { user_id: Uuid },

    #[error("User {user_id} already has a journey for template {template_id}")]
    DuplicateJourney { user_id: Uuid, template_id: Uuid },

    #[error("Step {step_id} cannot transition from {from} to {to}")]
    InvalidTransition {
        step_id: Uuid,
        from: crate::journey::model::StepStatus,
        to: crate::journey::model::StepStatus,
    },

    #[error("Unknown checklist item {label:?} on step {step_id}")]
    InvalidChecklist { step_id: Uuid, label: String },
}

/// Notification channel errors. Confined to the notify module; workflow
/// callers log these and never propagate them.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("SMTP send failed: {0}")]
    Smtp(String),

    #[error("Webhook call failed: {0}")]
    Webhook(String),
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
