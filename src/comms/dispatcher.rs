//! Communication dispatcher.
//!
//! Fans a trigger event out to the matching active templates, filters by
//! conditions, interpolates `{{user.*}}` placeholders, and delivers via
//! the notifier. The communication-log unique index on (user, template)
//! makes dispatch idempotent: a template fires at most once per user.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::comms::model::{CommChannel, TriggerEvent};
use crate::error::{DatabaseError, Result};
use crate::journey::conditions;
use crate::journey::profile::UserProfile;
use crate::notify::Notifier;
use crate::store::{queries, Store};
use crate::users::UserRecord;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{user\.(\w+)\}\}").unwrap());

/// Counts from one dispatch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub sent: usize,
    /// Already dispatched earlier, or no recipient on file.
    pub skipped: usize,
    pub failed: usize,
}

/// Replace `{{user.*}}` placeholders with profile values. Unknown
/// placeholders render as an empty string.
pub fn interpolate(template: &str, user: &UserRecord) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures<'_>| match &caps[1] {
            "fullName" => user.full_name.clone(),
            "firstName" => user
                .full_name
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_string(),
            "personalEmail" => user.personal_email.clone(),
            "corporateEmail" => user.corporate_email.clone().unwrap_or_default(),
            "position" => user.position.clone().unwrap_or_default(),
            "clusterName" => user.cluster.name.clone(),
            "country" => user.cluster.country.as_str().to_string(),
            _ => String::new(),
        })
        .into_owned()
}

/// Dispatch every matching communication for one user and trigger.
///
/// Delivery is best-effort: send failures are recorded on the log row
/// and counted, never propagated.
pub async fn dispatch_communications(
    store: &Store,
    notifier: &dyn Notifier,
    user_id: Uuid,
    trigger: TriggerEvent,
) -> Result<DispatchSummary> {
    let user = queries::get_user(&*store.conn().await, user_id).await?;
    let profile = UserProfile::from_user(&user);
    let templates = queries::list_active_comm_templates(&*store.conn().await, trigger).await?;

    let mut summary = DispatchSummary::default();
    for template in templates {
        if !conditions::evaluate(template.conditions.as_ref(), &profile) {
            continue;
        }

        // Claim the (user, template) slot before sending.
        let log_id =
            match queries::insert_comm_log(&*store.conn().await, user_id, template.id, trigger).await {
                Ok(id) => id,
                Err(DatabaseError::Constraint(_)) => {
                    summary.skipped += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

        let recipient = match template.channel {
            CommChannel::Email => Some(
                user.corporate_email
                    .clone()
                    .unwrap_or_else(|| user.personal_email.clone()),
            ),
            CommChannel::Sms | CommChannel::Whatsapp => user.phone_number.clone(),
        };
        let Some(recipient) = recipient else {
            warn!(
                user_id = %user_id,
                template = %template.name,
                channel = template.channel.as_str(),
                "No recipient on file, communication skipped"
            );
            queries::set_comm_log_status(&*store.conn().await, log_id, "SKIPPED").await?;
            summary.skipped += 1;
            continue;
        };

        let body = interpolate(&template.body_content, &user);
        let subject = template
            .subject
            .as_deref()
            .map(|s| interpolate(s, &user))
            .unwrap_or_else(|| template.name.clone());

        let outcome = match template.channel {
            CommChannel::Email => notifier.send_email(&recipient, &subject, &body).await,
            CommChannel::Sms => notifier.send_sms(&recipient, &body).await,
            CommChannel::Whatsapp => notifier.send_whatsapp(&recipient, &body).await,
        };
        match outcome {
            Ok(()) => {
                queries::set_comm_log_status(&*store.conn().await, log_id, "SENT").await?;
                summary.sent += 1;
            }
            Err(e) => {
                warn!(
                    user_id = %user_id,
                    template = %template.name,
                    error = %e,
                    "Communication delivery failed"
                );
                queries::set_comm_log_status(&*store.conn().await, log_id, "FAILED").await?;
                summary.failed += 1;
            }
        }
    }

    info!(
        user_id = %user_id,
        trigger = trigger.as_str(),
        sent = summary.sent,
        skipped = summary.skipped,
        failed = summary.failed,
        "Communications dispatched"
    );
    Ok(summary)
}
