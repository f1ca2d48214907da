//! Journey data model — per-user compiled journeys and their steps.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::templates::TemplateStep;

/// Lifecycle status of a compiled journey.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JourneyStatus {
    InProgress,
    Completed,
}

impl JourneyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "IN_PROGRESS" => Some(Self::InProgress),
            "COMPLETED" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// Per-user status of one journey step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Locked,
    Pending,
    Completed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Locked => "LOCKED",
            Self::Pending => "PENDING",
            Self::Completed => "COMPLETED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "LOCKED" => Some(Self::Locked),
            "PENDING" => Some(Self::Pending),
            "COMPLETED" => Some(Self::Completed),
            _ => None,
        }
    }

    /// Whether `self → target` is a legal transition under normal
    /// operation. Forward-only: LOCKED → PENDING → COMPLETED, never
    /// LOCKED → COMPLETED directly. The identity-flip rollback performs
    /// privileged reverse transitions outside this check.
    pub fn can_transition_to(&self, target: StepStatus) -> bool {
        use StepStatus::*;
        matches!((self, target), (Locked, Pending) | (Pending, Completed))
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Checklist bookkeeping on a step: item label → checked.
///
/// Independent of step status; toggling items never transitions the step.
pub type ChecklistState = BTreeMap<String, bool>;

/// A compiled, per-user journey pinned to one template version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserJourney {
    pub id: Uuid,
    pub user_id: Uuid,
    pub journey_template_id: Uuid,
    /// Template version at compile time. Journeys are never recompiled
    /// when the template changes later.
    pub compiled_from_version: i64,
    pub status: JourneyStatus,
    pub progress_percentage: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// One per-user step row inside a journey.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JourneyStep {
    pub id: Uuid,
    pub user_journey_id: Uuid,
    pub template_step_id: Uuid,
    /// User-specific sequence position. Distinct from the template's
    /// order index, since excluded steps shift it.
    pub resolved_order: i64,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub checklist_state: ChecklistState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_nudged_at: Option<DateTime<Utc>>,
}

/// A journey step joined with its template-step snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JourneyStepDetail {
    pub step: JourneyStep,
    pub template_step: TemplateStep,
}

/// A journey with its steps ordered by resolved order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JourneyWithSteps {
    pub journey: UserJourney,
    pub steps: Vec<JourneyStepDetail>,
}
