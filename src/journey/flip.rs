//! The identity flip — corporate credential activation and its rollback.
//!
//! When IT provisions a corporate account, one transaction records the
//! new email, activates the user, completes the identity approval step,
//! unlocks every locked step, and marks the workspace provisioning as
//! done. Communications go out only after the commit. The rollback
//! reverses the flip when provisioning was reported by mistake.

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::comms::dispatcher::dispatch_communications;
use crate::comms::model::TriggerEvent;
use crate::error::{DatabaseError, EngineError, Result};
use crate::journey::conditions;
use crate::journey::model::{JourneyStepDetail, StepStatus};
use crate::journey::progress::progress_percentage;
use crate::notify::Notifier;
use crate::store::{queries, Store};
use crate::templates::StepType;
use crate::users::{ProvisioningStatus, UserRecord, UserStatus, GOOGLE_WORKSPACE};

/// What the flip changed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityFlipOutcome {
    pub journey_id: Uuid,
    /// The identity step, when this flip newly completed it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_step_id: Option<Uuid>,
    pub unlocked_step_count: usize,
    pub new_progress: i64,
}

/// Locate the identity approval step in a compiled journey.
///
/// The identity step is an APPROVAL step sitting at position 2, by
/// resolved order or by the template's authored order. The authored
/// order covers journeys where an earlier step was filtered out and the
/// approval slid into first place. First match in resolved order wins.
pub fn find_identity_step(steps: &[JourneyStepDetail]) -> Option<&JourneyStepDetail> {
    steps.iter().find(|d| {
        d.template_step.step_type == StepType::Approval
            && (d.step.resolved_order == 2 || d.template_step.order_index == 2)
    })
}

/// Flip a user's identity to the corporate account.
///
/// Atomic: the user mutation, the identity-step completion, the unlocks,
/// the progress write, and the provisioning update all commit together.
/// A user without a journey aborts the whole flip, including the email
/// write. Re-running a completed flip is harmless: nothing new completes
/// or unlocks and the outcome reports the unchanged progress.
pub async fn process_identity_flip(
    store: &Store,
    notifier: &dyn Notifier,
    user_id: Uuid,
    corporate_email: &str,
) -> Result<IdentityFlipOutcome> {
    let tx = store.begin().await?;

    queries::set_user_identity(&tx, user_id, Some(corporate_email), UserStatus::Active).await?;
    let user = queries::get_user(&tx, user_id).await?;

    let journey = queries::get_first_journey_for_user(&tx, user_id)
        .await?
        .ok_or(EngineError::JourneyNotFound { user_id })?;
    let steps = queries::list_step_details(&tx, journey.id).await?;

    let now = Utc::now();
    let prior_completed = steps
        .iter()
        .filter(|d| d.step.status == StepStatus::Completed)
        .count();

    let completed_step_id = match find_identity_step(&steps) {
        Some(identity) if identity.step.status != StepStatus::Completed => {
            queries::set_step_status(&tx, identity.step.id, StepStatus::Completed, Some(now))
                .await?;
            Some(identity.step.id)
        }
        _ => None,
    };

    let mut unlocked_step_count = 0;
    for detail in &steps {
        if detail.step.status == StepStatus::Locked && Some(detail.step.id) != completed_step_id {
            queries::set_step_status(&tx, detail.step.id, StepStatus::Pending, None).await?;
            unlocked_step_count += 1;
        }
    }

    let completed = prior_completed + usize::from(completed_step_id.is_some());
    let new_progress = progress_percentage(completed, steps.len());
    queries::set_journey_progress(&tx, journey.id, new_progress).await?;

    let provisioned =
        queries::set_provisioning_status(&tx, user_id, GOOGLE_WORKSPACE, ProvisioningStatus::Provisioned)
            .await?;

    tx.commit()
        .await
        .map_err(|e| DatabaseError::Query(format!("commit identity flip: {e}")))?;

    info!(
        user_id = %user_id,
        journey_id = %journey.id,
        completed_step = ?completed_step_id,
        unlocked = unlocked_step_count,
        progress = new_progress,
        provisioning_rows = provisioned,
        "Identity flip committed"
    );

    // Communications are outside the transaction: a delivery failure
    // must not undo a committed flip. The baseline notification always
    // goes out; configured templates fan out on top of it.
    send_identity_notifications(notifier, &user, corporate_email).await;
    if let Err(e) =
        dispatch_communications(store, notifier, user_id, TriggerEvent::IdentityFlipped).await
    {
        warn!(user_id = %user_id, error = %e, "Post-flip communications failed");
    }

    Ok(IdentityFlipOutcome {
        journey_id: journey.id,
        completed_step_id,
        unlocked_step_count,
        new_progress,
    })
}

/// Baseline omnichannel notification after a committed flip: email to
/// the new corporate address, SMS and WhatsApp when a phone number is
/// on file. Best-effort like the template dispatcher.
async fn send_identity_notifications(
    notifier: &dyn Notifier,
    user: &UserRecord,
    corporate_email: &str,
) {
    let first_name = user.full_name.split_whitespace().next().unwrap_or_default();
    let body = format!(
        "Hola {first_name}, tu cuenta corporativa {corporate_email} ya está activa. \
         Inicia sesión para continuar tu onboarding."
    );

    if let Err(e) = notifier
        .send_email(corporate_email, "Tu cuenta corporativa está lista", &body)
        .await
    {
        warn!(user_id = %user.id, error = %e, "Identity flip email failed");
    }

    match user.phone_number.as_deref() {
        Some(phone) => {
            if let Err(e) = notifier.send_sms(phone, &body).await {
                warn!(user_id = %user.id, error = %e, "Identity flip SMS failed");
            }
            if let Err(e) = notifier.send_whatsapp(phone, &body).await {
                warn!(user_id = %user.id, error = %e, "Identity flip WhatsApp failed");
            }
        }
        None => {
            info!(user_id = %user.id, "No phone number on file, SMS and WhatsApp skipped");
        }
    }
}

/// Reverse an identity flip reported by mistake.
///
/// Clears the corporate email, SSO marker, and active status, returns the
/// identity step to PENDING, re-locks every step gated on the corporate
/// email (structured condition or legacy flag, whatever its current
/// status), and returns the workspace provisioning to REQUESTED.
/// Progress recomputes under a restrictive rule: only the first step in
/// resolved order counts, since a rolled-back journey is back in its
/// fresh state. Work completed between flip and rollback on later,
/// ungated steps keeps its status but not its progress credit.
pub async fn rollback_identity_flip(store: &Store, user_id: Uuid) -> Result<IdentityFlipOutcome> {
    let tx = store.begin().await?;

    queries::set_user_identity(&tx, user_id, None, UserStatus::PreHire).await?;
    queries::set_sso_authenticated_at(&tx, user_id, None).await?;

    let journey = queries::get_first_journey_for_user(&tx, user_id)
        .await?
        .ok_or(EngineError::JourneyNotFound { user_id })?;
    let steps = queries::list_step_details(&tx, journey.id).await?;

    let identity_step_id = find_identity_step(&steps).map(|d| d.step.id);
    if let Some(step_id) = identity_step_id {
        queries::set_step_status(&tx, step_id, StepStatus::Pending, None).await?;
    }

    let mut relocked = 0;
    for detail in &steps {
        let gated = detail.template_step.requires_corporate_email
            || conditions::condition_requires_corporate_email(
                detail.template_step.conditions.as_ref(),
            );
        if gated {
            queries::set_step_status(&tx, detail.step.id, StepStatus::Locked, None).await?;
            relocked += 1;
        }
    }

    // Only step 1 can plausibly remain completed in the fresh state
    let completed = usize::from(
        steps
            .first()
            .is_some_and(|d| d.step.status == StepStatus::Completed),
    );
    let new_progress = progress_percentage(completed, steps.len());
    queries::set_journey_progress(&tx, journey.id, new_progress).await?;

    queries::set_provisioning_status(&tx, user_id, GOOGLE_WORKSPACE, ProvisioningStatus::Requested)
        .await?;

    tx.commit()
        .await
        .map_err(|e| DatabaseError::Query(format!("commit identity rollback: {e}")))?;

    info!(
        user_id = %user_id,
        journey_id = %journey.id,
        relocked,
        progress = new_progress,
        "Identity flip rolled back"
    );
    Ok(IdentityFlipOutcome {
        journey_id: journey.id,
        completed_step_id: identity_step_id,
        unlocked_step_count: relocked,
        new_progress,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journey::compiler::compile_journey;
    use crate::journey::model::JourneyStatus;
    use crate::journey::progress::complete_step;
    use crate::notify::testing::RecordingNotifier;
    use crate::notify::LogNotifier;
    use crate::templates::{JourneyTemplate, TemplateStep};
    use crate::users::{Cluster, Country, UserRecord};
    use serde_json::json;

    struct Fixture {
        user_id: Uuid,
        journey_id: Uuid,
        steps: Vec<JourneyStepDetail>,
    }

    /// Three-step journey: welcome ACTION, identity APPROVAL at index 2,
    /// then an email-gated ACTION.
    async fn seed(store: &Store) -> Fixture {
        let cluster = Cluster {
            id: Uuid::new_v4(),
            name: "CENDIS".into(),
            country: Country::VE,
        };
        queries::insert_cluster(&*store.conn().await, &cluster).await.unwrap();
        let user = UserRecord {
            id: Uuid::new_v4(),
            full_name: "Maria Rivas".into(),
            personal_email: format!("{}@example.com", Uuid::new_v4()),
            corporate_email: None,
            phone_number: None,
            position: None,
            status: UserStatus::PreHire,
            sso_authenticated_at: None,
            tags: vec![],
            created_at: Utc::now(),
            cluster,
        };
        queries::insert_user(&*store.conn().await, &user).await.unwrap();
        queries::insert_provisioning(
            &*store.conn().await,
            &crate::users::AccessProvisioning {
                id: Uuid::new_v4(),
                user_id: user.id,
                system_name: GOOGLE_WORKSPACE.into(),
                status: ProvisioningStatus::Requested,
            },
        )
        .await
        .unwrap();

        let template = JourneyTemplate {
            id: Uuid::new_v4(),
            name: "Onboarding".into(),
            description: None,
            version: 1,
            is_active: true,
            applicability: None,
            created_at: Utc::now(),
        };
        queries::insert_template(&*store.conn().await, &template).await.unwrap();

        // The third step is hard-gated through the legacy flag: the
        // evaluator ignores it, so the step compiles in as LOCKED and
        // waits for the flip to unlock it.
        let specs: [(&str, StepType, bool); 3] = [
            ("Welcome", StepType::Action, false),
            ("Corporate identity", StepType::Approval, false),
            ("Set up workspace", StepType::Action, true),
        ];
        for (i, (title, step_type, gated)) in specs.into_iter().enumerate() {
            queries::insert_template_step(
                &*store.conn().await,
                &TemplateStep {
                    id: Uuid::new_v4(),
                    journey_template_id: template.id,
                    order_index: (i + 1) as i64,
                    title: title.into(),
                    description: None,
                    step_type,
                    conditions: None,
                    content_payload: None,
                    requires_corporate_email: gated,
                    is_optional: false,
                    estimated_minutes: None,
                    icon_name: None,
                },
            )
            .await
            .unwrap();
        }

        let journey = compile_journey(store, user.id, template.id).await.unwrap();

        let steps = queries::list_step_details(&*store.conn().await, journey.id)
            .await
            .unwrap();
        Fixture {
            user_id: user.id,
            journey_id: journey.id,
            steps,
        }
    }

    fn detail(step_type: StepType, resolved_order: i64, order_index: i64) -> JourneyStepDetail {
        JourneyStepDetail {
            step: crate::journey::model::JourneyStep {
                id: Uuid::new_v4(),
                user_journey_id: Uuid::new_v4(),
                template_step_id: Uuid::new_v4(),
                resolved_order,
                status: StepStatus::Locked,
                completed_at: None,
                checklist_state: Default::default(),
                last_nudged_at: None,
            },
            template_step: TemplateStep {
                id: Uuid::new_v4(),
                journey_template_id: Uuid::new_v4(),
                order_index,
                title: "step".into(),
                description: None,
                step_type,
                conditions: None,
                content_payload: None,
                requires_corporate_email: false,
                is_optional: false,
                estimated_minutes: None,
                icon_name: None,
            },
        }
    }

    #[test]
    fn identity_step_found_by_resolved_or_authored_order() {
        // Approval at resolved order 2
        let steps = vec![
            detail(StepType::Action, 1, 1),
            detail(StepType::Approval, 2, 3),
        ];
        assert_eq!(
            find_identity_step(&steps).map(|d| d.step.id),
            Some(steps[1].step.id)
        );

        // A filtered-out first step slid the approval to resolved order
        // 1; the authored index still identifies it
        let steps = vec![detail(StepType::Approval, 1, 2), detail(StepType::Action, 2, 3)];
        assert_eq!(
            find_identity_step(&steps).map(|d| d.step.id),
            Some(steps[0].step.id)
        );

        // An ACTION step at position 2 is not an identity step
        let steps = vec![detail(StepType::Action, 1, 1), detail(StepType::Action, 2, 2)];
        assert!(find_identity_step(&steps).is_none());
    }

    #[tokio::test]
    async fn flip_completes_identity_unlocks_rest_and_provisions() {
        let store = Store::open_in_memory().await.unwrap();
        let fx = seed(&store).await;

        let outcome =
            process_identity_flip(&store, &LogNotifier, fx.user_id, "maria@company.com")
                .await
                .unwrap();

        assert_eq!(outcome.journey_id, fx.journey_id);
        assert_eq!(outcome.completed_step_id, Some(fx.steps[1].step.id));
        // Step 3 was locked; step 1 was already pending
        assert_eq!(outcome.unlocked_step_count, 1);
        assert_eq!(outcome.new_progress, 33);

        let user = queries::get_user(&*store.conn().await, fx.user_id).await.unwrap();
        assert_eq!(user.corporate_email.as_deref(), Some("maria@company.com"));
        assert_eq!(user.status, UserStatus::Active);

        let steps = queries::list_step_details(&*store.conn().await, fx.journey_id)
            .await
            .unwrap();
        assert_eq!(steps[0].step.status, StepStatus::Pending);
        assert_eq!(steps[1].step.status, StepStatus::Completed);
        assert_eq!(steps[2].step.status, StepStatus::Pending);

        let provisioning =
            queries::get_provisioning_status(&*store.conn().await, fx.user_id, GOOGLE_WORKSPACE)
                .await
                .unwrap();
        assert_eq!(provisioning, Some(ProvisioningStatus::Provisioned));

        let journey = queries::get_journey(&*store.conn().await, fx.journey_id).await.unwrap();
        assert_eq!(journey.status, JourneyStatus::InProgress);
    }

    /// Four-step template, Colombian profile: the VE-only step drops at
    /// compile, the legacy-gated step stays in LOCKED, and the flip
    /// completes the identity approval while unlocking the gate.
    #[tokio::test]
    async fn flip_after_filtered_compile() {
        let store = Store::open_in_memory().await.unwrap();
        let cluster = Cluster {
            id: Uuid::new_v4(),
            name: "Bogota Norte".into(),
            country: Country::CO,
        };
        queries::insert_cluster(&*store.conn().await, &cluster).await.unwrap();
        let user = UserRecord {
            id: Uuid::new_v4(),
            full_name: "Carlos Duque".into(),
            personal_email: "carlos@example.com".into(),
            corporate_email: None,
            phone_number: None,
            position: None,
            status: UserStatus::PreHire,
            sso_authenticated_at: None,
            tags: vec![],
            created_at: Utc::now(),
            cluster,
        };
        queries::insert_user(&*store.conn().await, &user).await.unwrap();

        let template = JourneyTemplate {
            id: Uuid::new_v4(),
            name: "Onboarding".into(),
            description: None,
            version: 1,
            is_active: true,
            applicability: None,
            created_at: Utc::now(),
        };
        queries::insert_template(&*store.conn().await, &template).await.unwrap();
        let specs: [(&str, StepType, Option<serde_json::Value>, bool); 4] = [
            ("Welcome", StepType::Action, None, false),
            ("Corporate identity", StepType::Approval, None, false),
            ("Venezuela paperwork", StepType::Action, Some(json!({"country": ["VE"]})), false),
            ("Workspace setup", StepType::Action, None, true),
        ];
        for (i, (title, step_type, conditions, gated)) in specs.into_iter().enumerate() {
            queries::insert_template_step(
                &*store.conn().await,
                &TemplateStep {
                    id: Uuid::new_v4(),
                    journey_template_id: template.id,
                    order_index: (i + 1) as i64,
                    title: title.into(),
                    description: None,
                    step_type,
                    conditions,
                    content_payload: None,
                    requires_corporate_email: gated,
                    is_optional: false,
                    estimated_minutes: None,
                    icon_name: None,
                },
            )
            .await
            .unwrap();
        }

        let journey = compile_journey(&store, user.id, template.id).await.unwrap();
        let steps = queries::list_step_details(&*store.conn().await, journey.id)
            .await
            .unwrap();
        let titles: Vec<&str> = steps.iter().map(|d| d.template_step.title.as_str()).collect();
        assert_eq!(titles, vec!["Welcome", "Corporate identity", "Workspace setup"]);
        let orders: Vec<i64> = steps.iter().map(|d| d.step.resolved_order).collect();
        assert_eq!(orders, vec![1, 2, 3]);

        let outcome = process_identity_flip(&store, &LogNotifier, user.id, "carlos@company.com")
            .await
            .unwrap();
        assert_eq!(outcome.completed_step_id, Some(steps[1].step.id));
        assert_eq!(outcome.new_progress, 33);

        let steps = queries::list_step_details(&*store.conn().await, journey.id)
            .await
            .unwrap();
        assert_eq!(steps[1].step.status, StepStatus::Completed);
        assert_eq!(steps[2].step.status, StepStatus::Pending);
    }

    #[tokio::test]
    async fn flip_notifies_on_every_channel_when_phone_is_on_file() {
        let store = Store::open_in_memory().await.unwrap();
        let fx = seed(&store).await;
        store
            .conn()
            .await
            .execute(
                "UPDATE users SET phone_number = ?1 WHERE id = ?2",
                libsql::params!["+584141112233", fx.user_id.to_string()],
            )
            .await
            .unwrap();

        let notifier = RecordingNotifier::default();
        process_identity_flip(&store, &notifier, fx.user_id, "maria@company.com")
            .await
            .unwrap();

        let emails = notifier.emails.lock().unwrap();
        assert_eq!(emails.len(), 1);
        assert_eq!(emails[0].0, "maria@company.com");
        assert_eq!(notifier.sms.lock().unwrap().len(), 1);
        assert_eq!(notifier.whatsapp.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn flip_without_phone_still_emails() {
        let store = Store::open_in_memory().await.unwrap();
        let fx = seed(&store).await;

        let notifier = RecordingNotifier::default();
        process_identity_flip(&store, &notifier, fx.user_id, "maria@company.com")
            .await
            .unwrap();

        assert_eq!(notifier.emails.lock().unwrap().len(), 1);
        assert!(notifier.sms.lock().unwrap().is_empty());
        assert!(notifier.whatsapp.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn flip_is_idempotent() {
        let store = Store::open_in_memory().await.unwrap();
        let fx = seed(&store).await;

        let first = process_identity_flip(&store, &LogNotifier, fx.user_id, "maria@company.com")
            .await
            .unwrap();
        let second = process_identity_flip(&store, &LogNotifier, fx.user_id, "maria@company.com")
            .await
            .unwrap();

        assert_eq!(second.completed_step_id, None);
        assert_eq!(second.unlocked_step_count, 0);
        assert_eq!(second.new_progress, first.new_progress);
    }

    #[tokio::test]
    async fn flip_without_journey_leaves_user_untouched() {
        let store = Store::open_in_memory().await.unwrap();
        let cluster = Cluster {
            id: Uuid::new_v4(),
            name: "CENDIS".into(),
            country: Country::VE,
        };
        queries::insert_cluster(&*store.conn().await, &cluster).await.unwrap();
        let user = UserRecord {
            id: Uuid::new_v4(),
            full_name: "No Journey".into(),
            personal_email: "nj@example.com".into(),
            corporate_email: None,
            phone_number: None,
            position: None,
            status: UserStatus::PreHire,
            sso_authenticated_at: None,
            tags: vec![],
            created_at: Utc::now(),
            cluster,
        };
        queries::insert_user(&*store.conn().await, &user).await.unwrap();

        let err = process_identity_flip(&store, &LogNotifier, user.id, "nj@company.com")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Engine(EngineError::JourneyNotFound { .. })
        ));

        // The email write rolled back with everything else
        let reloaded = queries::get_user(&*store.conn().await, user.id).await.unwrap();
        assert_eq!(reloaded.corporate_email, None);
        assert_eq!(reloaded.status, UserStatus::PreHire);
    }

    #[tokio::test]
    async fn rollback_inverts_a_fresh_flip() {
        let store = Store::open_in_memory().await.unwrap();
        let fx = seed(&store).await;

        process_identity_flip(&store, &LogNotifier, fx.user_id, "maria@company.com")
            .await
            .unwrap();
        let outcome = rollback_identity_flip(&store, fx.user_id).await.unwrap();
        assert_eq!(outcome.new_progress, 0);

        let user = queries::get_user(&*store.conn().await, fx.user_id).await.unwrap();
        assert_eq!(user.corporate_email, None);
        assert_eq!(user.status, UserStatus::PreHire);
        assert_eq!(user.sso_authenticated_at, None);

        let steps = queries::list_step_details(&*store.conn().await, fx.journey_id)
            .await
            .unwrap();
        assert_eq!(steps[0].step.status, StepStatus::Pending);
        assert_eq!(steps[1].step.status, StepStatus::Pending);
        assert_eq!(steps[1].step.completed_at, None);
        // The email-gated step went back to locked
        assert_eq!(steps[2].step.status, StepStatus::Locked);

        let provisioning =
            queries::get_provisioning_status(&*store.conn().await, fx.user_id, GOOGLE_WORKSPACE)
                .await
                .unwrap();
        assert_eq!(provisioning, Some(ProvisioningStatus::Requested));
    }

    #[tokio::test]
    async fn rollback_preserves_work_done_after_flip() {
        let store = Store::open_in_memory().await.unwrap();
        let fx = seed(&store).await;

        process_identity_flip(&store, &LogNotifier, fx.user_id, "maria@company.com")
            .await
            .unwrap();
        // User completes the welcome step after the flip
        complete_step(&store, fx.steps[0].step.id).await.unwrap();

        let outcome = rollback_identity_flip(&store, fx.user_id).await.unwrap();

        let steps = queries::list_step_details(&*store.conn().await, fx.journey_id)
            .await
            .unwrap();
        assert_eq!(steps[0].step.status, StepStatus::Completed);
        assert_eq!(steps[1].step.status, StepStatus::Pending);
        assert_eq!(steps[2].step.status, StepStatus::Locked);
        // One of three steps still counts
        assert_eq!(outcome.new_progress, 33);
    }
}
