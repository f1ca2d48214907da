//! IT nudge — Slack reminder for a stalled journey step.
//!
//! Nudges go to an incoming-webhook URL with a per-step cooldown so the
//! IT channel is not spammed about the same step.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{NotifyError, Result};
use crate::store::{queries, Store};

/// Result of a nudge attempt.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NudgeResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_available_at: Option<DateTime<Utc>>,
}

/// Send a Slack nudge for one journey step, honoring the cooldown.
///
/// Delivery failures are reported in the result and logged, never
/// propagated; only database errors surface.
pub async fn send_it_nudge(
    store: &Store,
    http: &reqwest::Client,
    webhook_url: Option<&str>,
    cooldown: Duration,
    step_id: Uuid,
) -> Result<NudgeResult> {
    let detail = queries::get_step_detail(&*store.conn().await, step_id).await?;
    let now = Utc::now();

    if let Some(last) = detail.step.last_nudged_at {
        let next = last + chrono::Duration::from_std(cooldown).unwrap_or(chrono::Duration::hours(4));
        if next > now {
            return Ok(NudgeResult {
                success: false,
                message: "Nudge cooldown active".into(),
                next_available_at: Some(next),
            });
        }
    }

    let Some(url) = webhook_url else {
        warn!(step_id = %step_id, "No Slack webhook configured, nudge skipped");
        return Ok(NudgeResult {
            success: false,
            message: "Slack webhook not configured".into(),
            next_available_at: None,
        });
    };

    let journey = queries::get_journey(&*store.conn().await, detail.step.user_journey_id).await?;
    let user = queries::get_user(&*store.conn().await, journey.user_id).await?;

    let payload = json!({
        "blocks": [
            {
                "type": "header",
                "text": { "type": "plain_text", "text": "Onboarding step needs attention" }
            },
            {
                "type": "section",
                "fields": [
                    { "type": "mrkdwn", "text": format!("*Employee:*\n{}", user.full_name) },
                    { "type": "mrkdwn", "text": format!("*Step:*\n{}", detail.template_step.title) },
                    { "type": "mrkdwn", "text": format!("*Cluster:*\n{} ({})", user.cluster.name, user.cluster.country) },
                    { "type": "mrkdwn", "text": format!("*Waiting since:*\n{}", journey.created_at.format("%Y-%m-%d")) }
                ]
            }
        ]
    });

    match post_webhook(http, url, &payload).await {
        Ok(()) => {
            queries::set_last_nudged_at(&*store.conn().await, step_id, now).await?;
            info!(step_id = %step_id, user_id = %user.id, "IT nudge sent");
            Ok(NudgeResult {
                success: true,
                message: "Nudge sent".into(),
                next_available_at: Some(
                    now + chrono::Duration::from_std(cooldown).unwrap_or(chrono::Duration::hours(4)),
                ),
            })
        }
        Err(e) => {
            warn!(step_id = %step_id, error = %e, "IT nudge delivery failed");
            Ok(NudgeResult {
                success: false,
                message: format!("Delivery failed: {e}"),
                next_available_at: None,
            })
        }
    }
}

async fn post_webhook(
    http: &reqwest::Client,
    url: &str,
    payload: &serde_json::Value,
) -> std::result::Result<(), NotifyError> {
    let response = http
        .post(url)
        .json(payload)
        .send()
        .await
        .map_err(|e| NotifyError::Webhook(format!("Slack request failed: {e}")))?;
    if !response.status().is_success() {
        return Err(NotifyError::Webhook(format!(
            "Slack returned {}",
            response.status()
        )));
    }
    Ok(())
}
