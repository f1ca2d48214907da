//! Flat user profile consumed by the condition evaluator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::users::{Country, UserRecord, UserStatus};

/// The profile shape conditions are matched against.
///
/// Derived from a user + cluster record on every evaluation and never
/// cached, so it always reflects the latest identity mutations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub country: Country,
    pub cluster_name: String,
    #[serde(default)]
    pub position: Option<String>,
    pub status: UserStatus,
    pub has_corporate_email: bool,
    pub has_sso_auth: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl UserProfile {
    /// Build the profile from a persisted user record.
    pub fn from_user(user: &UserRecord) -> Self {
        Self {
            country: user.cluster.country,
            cluster_name: user.cluster.name.clone(),
            position: user.position.clone(),
            status: user.status,
            has_corporate_email: user.corporate_email.is_some(),
            has_sso_auth: user.sso_authenticated_at.is_some(),
            created_at: user.created_at,
            tags: user.tags.clone(),
        }
    }
}
