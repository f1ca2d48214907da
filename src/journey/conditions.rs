//! Condition evaluator — pure predicate deciding step/template inclusion.
//!
//! Conditions are stored as semi-structured JSON on template steps and
//! templates. The schema is strict: unknown keys fail validation, and a
//! step with malformed conditions is excluded rather than over-included
//! (fail closed). An absent condition set means "universal".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::journey::profile::UserProfile;
use crate::users::{Country, UserStatus};

/// Structured condition set attached to a template step or template.
///
/// Keys combine with AND; values within one list combine with OR.
/// `position` entries are case-insensitive substring matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StepConditions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<Vec<Country>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_status: Option<Vec<UserStatus>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_corporate_email: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_sso_auth: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hired_after: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hired_before: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

/// The clause that excluded a step, for compilation previews.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Clause {
    /// The condition JSON failed strict validation.
    Malformed,
    Country,
    Cluster,
    Position,
    UserStatus,
    CorporateEmail,
    SsoAuth,
    HiredAfter,
    HiredBefore,
    Tags,
}

impl Clause {
    /// Human-readable exclusion reason for previews.
    pub fn describe(&self) -> String {
        match self {
            Self::Malformed => "conditions failed validation".into(),
            Self::Country => "country not in allowed list".into(),
            Self::Cluster => "cluster not in allowed list".into(),
            Self::Position => "position does not match".into(),
            Self::UserStatus => "user status not in allowed list".into(),
            Self::CorporateEmail => "corporate email requirement not met".into(),
            Self::SsoAuth => "SSO authentication requirement not met".into(),
            Self::HiredAfter => "hired before the allowed window".into(),
            Self::HiredBefore => "hired after the allowed window".into(),
            Self::Tags => "no matching tag".into(),
        }
    }
}

/// Evaluate a raw stored condition set against a profile.
///
/// `None` (or JSON null) is the universal condition and always matches.
/// Malformed JSON fails closed: the step is excluded.
pub fn evaluate(raw: Option<&serde_json::Value>, profile: &UserProfile) -> bool {
    first_failing_clause(raw, profile).is_none()
}

/// Like [`evaluate`], but names the first failing clause. `None` means
/// the profile satisfies every populated clause (the step is included).
pub fn first_failing_clause(
    raw: Option<&serde_json::Value>,
    profile: &UserProfile,
) -> Option<Clause> {
    let raw = match raw {
        None => return None,
        Some(v) if v.is_null() => return None,
        Some(v) => v,
    };

    let conditions: StepConditions = match serde_json::from_value(raw.clone()) {
        Ok(c) => c,
        Err(_) => return Some(Clause::Malformed),
    };

    if let Some(countries) = &conditions.country
        && !countries.is_empty()
        && !countries.contains(&profile.country)
    {
        return Some(Clause::Country);
    }

    if let Some(clusters) = &conditions.cluster
        && !clusters.is_empty()
        && !clusters.iter().any(|c| c == &profile.cluster_name)
    {
        return Some(Clause::Cluster);
    }

    if let Some(positions) = &conditions.position
        && !positions.is_empty()
    {
        let Some(position) = &profile.position else {
            return Some(Clause::Position);
        };
        let lower = position.to_lowercase();
        if !positions.iter().any(|p| lower.contains(&p.to_lowercase())) {
            return Some(Clause::Position);
        }
    }

    if let Some(statuses) = &conditions.user_status
        && !statuses.is_empty()
        && !statuses.contains(&profile.status)
    {
        return Some(Clause::UserStatus);
    }

    if let Some(required) = conditions.requires_corporate_email
        && profile.has_corporate_email != required
    {
        return Some(Clause::CorporateEmail);
    }

    if let Some(required) = conditions.requires_sso_auth
        && profile.has_sso_auth != required
    {
        return Some(Clause::SsoAuth);
    }

    if let Some(after) = conditions.hired_after
        && profile.created_at < after
    {
        return Some(Clause::HiredAfter);
    }

    if let Some(before) = conditions.hired_before
        && profile.created_at > before
    {
        return Some(Clause::HiredBefore);
    }

    if let Some(tags) = &conditions.tags
        && !tags.is_empty()
        && !tags.iter().any(|t| profile.tags.contains(t))
    {
        return Some(Clause::Tags);
    }

    None
}

/// Editor-side normalization: JSON null and `{}` become `None`.
pub fn normalize(raw: Option<serde_json::Value>) -> Option<serde_json::Value> {
    match raw {
        None => None,
        Some(v) if v.is_null() => None,
        Some(v) if v.as_object().is_some_and(|o| o.is_empty()) => None,
        other => other,
    }
}

/// Lenient read of `requiresCorporateEmail: true` from raw conditions.
///
/// Used by the identity-flip rollback to find hard-gated steps; unlike
/// [`evaluate`], this does not validate the rest of the structure.
pub fn condition_requires_corporate_email(raw: Option<&serde_json::Value>) -> bool {
    raw.and_then(|v| v.get("requiresCorporateEmail"))
        .and_then(|b| b.as_bool())
        .unwrap_or(false)
}
