//! Employee records, clusters, and access-provisioning rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::store::{Store, queries};

/// The system name of the corporate-identity provisioning record.
pub const GOOGLE_WORKSPACE: &str = "Google Workspace";

/// Operating country of a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Country {
    VE,
    CO,
    AR,
}

impl Country {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VE => "VE",
            Self::CO => "CO",
            Self::AR => "AR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "VE" => Some(Self::VE),
            "CO" => Some(Self::CO),
            "AR" => Some(Self::AR),
            _ => None,
        }
    }
}

impl std::fmt::Display for Country {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Employment status of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserStatus {
    PreHire,
    Active,
    Suspended,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreHire => "PRE_HIRE",
            Self::Active => "ACTIVE",
            Self::Suspended => "SUSPENDED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PRE_HIRE" => Some(Self::PreHire),
            "ACTIVE" => Some(Self::Active),
            "SUSPENDED" => Some(Self::Suspended),
            _ => None,
        }
    }
}

impl std::fmt::Display for UserStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An organizational cluster (site + country).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub id: Uuid,
    pub name: String,
    pub country: Country,
}

/// A persisted employee record, joined with its cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: Uuid,
    pub full_name: String,
    pub personal_email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corporate_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
    pub status: UserStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sso_authenticated_at: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub cluster: Cluster,
}

/// Status of an access-provisioning request for one external system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProvisioningStatus {
    Requested,
    Provisioned,
    Rejected,
}

impl ProvisioningStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "REQUESTED",
            Self::Provisioned => "PROVISIONED",
            Self::Rejected => "REJECTED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "REQUESTED" => Some(Self::Requested),
            "PROVISIONED" => Some(Self::Provisioned),
            "REJECTED" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// An access-provisioning record keyed by (user, system name).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessProvisioning {
    pub id: Uuid,
    pub user_id: Uuid,
    pub system_name: String,
    pub status: ProvisioningStatus,
}

/// Mark the user as having authenticated through Google SSO.
pub async fn record_sso_login(store: &Store, user_id: Uuid) -> Result<()> {
    queries::set_sso_authenticated_at(&*store.conn().await, user_id, Some(Utc::now())).await?;
    tracing::info!(user_id = %user_id, "SSO login recorded");
    Ok(())
}
