//! Template data model — templates, steps, and content blocks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What kind of interaction a step asks of the employee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepType {
    Info,
    Action,
    Approval,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Action => "ACTION",
            Self::Approval => "APPROVAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INFO" => Some(Self::Info),
            "ACTION" => Some(Self::Action),
            "APPROVAL" => Some(Self::Approval),
            _ => None,
        }
    }
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of a content block inside a step's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContentBlockType {
    RichText,
    VideoEmbed,
    PdfLink,
    Checklist,
    FormLink,
}

/// Optional presentation metadata on a content block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentBlockMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "thumbnailUrl")]
    pub thumbnail_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "fileName")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "checklistItems")]
    pub checklist_items: Option<Vec<String>>,
}

/// One ordered block of step content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentBlock {
    pub id: String,
    #[serde(rename = "type")]
    pub block_type: ContentBlockType,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<ContentBlockMeta>,
}

/// Ordered sequence of content blocks attached to a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentPayload {
    pub blocks: Vec<ContentBlock>,
}

impl ContentPayload {
    /// Labels of all checklist items across CHECKLIST blocks, in order.
    /// These are the valid keys of a journey step's checklist state.
    pub fn checklist_labels(&self) -> Vec<&str> {
        self.blocks
            .iter()
            .filter(|b| b.block_type == ContentBlockType::Checklist)
            .filter_map(|b| b.meta.as_ref())
            .filter_map(|m| m.checklist_items.as_ref())
            .flatten()
            .map(String::as_str)
            .collect()
    }
}

/// A single authored step within a journey template.
///
/// `order_index` values within a template always form a contiguous 1..N
/// sequence; the admin operations renumber on delete and reorder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateStep {
    pub id: Uuid,
    pub journey_template_id: Uuid,
    pub order_index: i64,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub step_type: StepType,
    /// Raw stored conditions. Validated at evaluation time, not on load.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_payload: Option<ContentPayload>,
    /// Legacy hard-gate flag, predates structured conditions. Still
    /// authoritative for the rollback re-lock rule.
    pub requires_corporate_email: bool,
    pub is_optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_minutes: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_name: Option<String>,
}

/// A versioned journey template with ordered steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JourneyTemplate {
    pub id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Monotonic, incremented on publish, never decremented.
    pub version: i64,
    pub is_active: bool,
    /// Gates whether the whole template applies to a user. Same shape
    /// and semantics as step conditions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applicability: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}
