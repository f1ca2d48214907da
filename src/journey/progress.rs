//! Step completion and journey progress.

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::error::{DatabaseError, EngineError, Result};
use crate::journey::model::{ChecklistState, JourneyStatus, JourneyStepDetail, StepStatus};
use crate::store::{queries, Store};

/// Percentage of completed steps, rounded half-up. Zero-step journeys
/// report 0.
pub fn progress_percentage(completed: usize, total: usize) -> i64 {
    if total == 0 {
        return 0;
    }
    ((completed as f64 / total as f64) * 100.0).round() as i64
}

/// Complete a PENDING step and recompute journey progress.
///
/// Rejects any step not currently PENDING: locked steps must be unlocked
/// first and completed steps stay completed. When the last step finishes
/// the journey flips to COMPLETED.
pub async fn complete_step(store: &Store, step_id: Uuid) -> Result<JourneyStepDetail> {
    let tx = store.begin().await?;

    let detail = queries::get_step_detail(&tx, step_id).await?;
    if !detail.step.status.can_transition_to(StepStatus::Completed) {
        return Err(EngineError::InvalidTransition {
            step_id,
            from: detail.step.status,
            to: StepStatus::Completed,
        }
        .into());
    }

    let now = Utc::now();
    queries::set_step_status(&tx, step_id, StepStatus::Completed, Some(now)).await?;

    let journey_id = detail.step.user_journey_id;
    let steps = queries::list_step_details(&tx, journey_id).await?;
    let total = steps.len();
    let completed = steps
        .iter()
        .filter(|s| s.step.status == StepStatus::Completed)
        .count();
    let progress = progress_percentage(completed, total);
    queries::set_journey_progress(&tx, journey_id, progress).await?;

    if completed == total {
        queries::set_journey_status(&tx, journey_id, JourneyStatus::Completed, Some(now)).await?;
    }

    tx.commit()
        .await
        .map_err(|e| DatabaseError::Query(format!("commit complete_step: {e}")))?;

    info!(
        step_id = %step_id,
        journey_id = %journey_id,
        progress,
        journey_done = completed == total,
        "Step completed"
    );
    queries::get_step_detail(&*store.conn().await, step_id)
        .await
        .map_err(Into::into)
}

/// Recompute and persist a journey's progress from its current steps.
pub async fn recompute_progress(store: &Store, journey_id: Uuid) -> Result<i64> {
    let steps = queries::list_step_details(&*store.conn().await, journey_id).await?;
    let completed = steps
        .iter()
        .filter(|s| s.step.status == StepStatus::Completed)
        .count();
    let progress = progress_percentage(completed, steps.len());
    queries::set_journey_progress(&*store.conn().await, journey_id, progress).await?;
    Ok(progress)
}

/// Replace a step's checklist state.
///
/// Every submitted label must exist in the step's checklist content
/// block. Checklist completion never changes step status.
pub async fn update_checklist(
    store: &Store,
    step_id: Uuid,
    state: ChecklistState,
) -> Result<JourneyStepDetail> {
    let detail = queries::get_step_detail(&*store.conn().await, step_id).await?;
    let known: Vec<&str> = detail
        .template_step
        .content_payload
        .as_ref()
        .map(|p| p.checklist_labels())
        .unwrap_or_default();

    if let Some(unknown) = state.keys().find(|label| !known.contains(&label.as_str())) {
        return Err(EngineError::InvalidChecklist {
            step_id,
            label: unknown.clone(),
        }
        .into());
    }

    queries::set_checklist_state(&*store.conn().await, step_id, &state).await?;
    queries::get_step_detail(&*store.conn().await, step_id)
        .await
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journey::compiler::compile_journey;
    use crate::store::Store;
    use crate::templates::model::{
        ContentBlock, ContentBlockMeta, ContentBlockType, ContentPayload, StepType,
    };
    use crate::templates::{JourneyTemplate, TemplateStep};
    use crate::users::{Cluster, Country, UserRecord, UserStatus};

    #[test]
    fn percentage_rounds_half_up() {
        assert_eq!(progress_percentage(0, 0), 0);
        assert_eq!(progress_percentage(0, 3), 0);
        assert_eq!(progress_percentage(1, 3), 33);
        assert_eq!(progress_percentage(2, 3), 67);
        assert_eq!(progress_percentage(3, 3), 100);
        assert_eq!(progress_percentage(1, 8), 13);
        assert_eq!(progress_percentage(1, 2), 50);
    }

    async fn seed_journey(store: &Store, step_count: usize) -> (Uuid, Vec<JourneyStepDetail>) {
        let cluster = Cluster {
            id: Uuid::new_v4(),
            name: "CENDIS".into(),
            country: Country::VE,
        };
        queries::insert_cluster(&*store.conn().await, &cluster).await.unwrap();
        let user = UserRecord {
            id: Uuid::new_v4(),
            full_name: "Test User".into(),
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
        for i in 0..step_count {
            let checklist = (i == 0).then(|| ContentPayload {
                blocks: vec![ContentBlock {
                    id: "b1".into(),
                    block_type: ContentBlockType::Checklist,
                    value: String::new(),
                    meta: Some(ContentBlockMeta {
                        label: None,
                        thumbnail_url: None,
                        file_name: None,
                        checklist_items: Some(vec!["Read handbook".into(), "Sign NDA".into()]),
                    }),
                }],
            });
            let step = TemplateStep {
                id: Uuid::new_v4(),
                journey_template_id: template.id,
                order_index: (i + 1) as i64,
                title: format!("Step {}", i + 1),
                description: None,
                step_type: StepType::Action,
                conditions: None,
                content_payload: checklist,
                requires_corporate_email: false,
                is_optional: false,
                estimated_minutes: None,
                icon_name: None,
            };
            queries::insert_template_step(&*store.conn().await, &step).await.unwrap();
        }

        let journey = compile_journey(store, user.id, template.id).await.unwrap();
        let steps = queries::list_step_details(&*store.conn().await, journey.id)
            .await
            .unwrap();
        (journey.id, steps)
    }

    #[tokio::test]
    async fn completing_pending_step_updates_progress() {
        let store = Store::open_in_memory().await.unwrap();
        let (journey_id, steps) = seed_journey(&store, 3).await;

        let done = complete_step(&store, steps[0].step.id).await.unwrap();
        assert_eq!(done.step.status, StepStatus::Completed);
        assert!(done.step.completed_at.is_some());

        let journey = queries::get_journey(&*store.conn().await, journey_id).await.unwrap();
        assert_eq!(journey.progress_percentage, 33);
        assert_eq!(journey.status, JourneyStatus::InProgress);
    }

    #[tokio::test]
    async fn locked_step_cannot_complete() {
        let store = Store::open_in_memory().await.unwrap();
        let (_, steps) = seed_journey(&store, 3).await;

        let err = complete_step(&store, steps[1].step.id).await.unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Engine(EngineError::InvalidTransition {
                from: StepStatus::Locked,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn completing_completed_step_is_rejected() {
        let store = Store::open_in_memory().await.unwrap();
        let (_, steps) = seed_journey(&store, 2).await;

        complete_step(&store, steps[0].step.id).await.unwrap();
        let err = complete_step(&store, steps[0].step.id).await.unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Engine(EngineError::InvalidTransition {
                from: StepStatus::Completed,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn last_step_completes_journey() {
        let store = Store::open_in_memory().await.unwrap();
        let (journey_id, steps) = seed_journey(&store, 2).await;

        complete_step(&store, steps[0].step.id).await.unwrap();
        // Unlock the second step the way the flip would
        queries::set_step_status(&*store.conn().await, steps[1].step.id, StepStatus::Pending, None)
            .await
            .unwrap();
        complete_step(&store, steps[1].step.id).await.unwrap();

        let journey = queries::get_journey(&*store.conn().await, journey_id).await.unwrap();
        assert_eq!(journey.status, JourneyStatus::Completed);
        assert_eq!(journey.progress_percentage, 100);
        assert!(journey.completed_at.is_some());
    }

    #[tokio::test]
    async fn recompute_matches_step_statuses() {
        let store = Store::open_in_memory().await.unwrap();
        let (journey_id, steps) = seed_journey(&store, 3).await;

        // Mark two of three completed behind the engine's back
        for detail in steps.iter().take(2) {
            queries::set_step_status(
                &*store.conn().await,
                detail.step.id,
                StepStatus::Completed,
                Some(Utc::now()),
            )
            .await
            .unwrap();
        }

        let progress = recompute_progress(&store, journey_id).await.unwrap();
        assert_eq!(progress, 67);
        let journey = queries::get_journey(&*store.conn().await, journey_id).await.unwrap();
        assert_eq!(journey.progress_percentage, 67);
    }

    #[tokio::test]
    async fn checklist_round_trips_and_rejects_unknown_labels() {
        let store = Store::open_in_memory().await.unwrap();
        let (_, steps) = seed_journey(&store, 1).await;
        let step_id = steps[0].step.id;

        let mut state = ChecklistState::new();
        state.insert("Read handbook".into(), true);
        state.insert("Sign NDA".into(), false);
        let detail = update_checklist(&store, step_id, state.clone()).await.unwrap();
        assert_eq!(detail.step.checklist_state, state);
        // Checklist never transitions the step
        assert_eq!(detail.step.status, StepStatus::Pending);

        let mut bad = ChecklistState::new();
        bad.insert("Not a real item".into(), true);
        let err = update_checklist(&store, step_id, bad).await.unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Engine(EngineError::InvalidChecklist { .. })
        ));
    }
}
