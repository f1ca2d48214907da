//! Communication template model.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle events that can trigger communications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerEvent {
    UserCreated,
    IdentityFlipped,
    StepCompleted,
    JourneyCompleted,
}

impl TriggerEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserCreated => "USER_CREATED",
            Self::IdentityFlipped => "IDENTITY_FLIPPED",
            Self::StepCompleted => "STEP_COMPLETED",
            Self::JourneyCompleted => "JOURNEY_COMPLETED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "USER_CREATED" => Some(Self::UserCreated),
            "IDENTITY_FLIPPED" => Some(Self::IdentityFlipped),
            "STEP_COMPLETED" => Some(Self::StepCompleted),
            "JOURNEY_COMPLETED" => Some(Self::JourneyCompleted),
            _ => None,
        }
    }
}

/// Delivery channel for one communication template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommChannel {
    Email,
    Sms,
    Whatsapp,
}

impl CommChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "EMAIL",
            Self::Sms => "SMS",
            Self::Whatsapp => "WHATSAPP",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "EMAIL" => Some(Self::Email),
            "SMS" => Some(Self::Sms),
            "WHATSAPP" => Some(Self::Whatsapp),
            _ => None,
        }
    }
}

/// A reusable message tied to a trigger event.
///
/// `conditions` uses the same schema as template-step conditions, so one
/// trigger can fan out differently by country or cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunicationTemplate {
    pub id: Uuid,
    pub name: String,
    pub trigger: TriggerEvent,
    pub channel: CommChannel,
    pub subject: Option<String>,
    pub body_content: String,
    pub conditions: Option<serde_json::Value>,
    pub is_active: bool,
}
