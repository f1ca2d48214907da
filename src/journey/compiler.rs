//! Journey compilation — turn a template into a per-user journey.
//!
//! Compilation filters template steps through the user's profile, assigns
//! a contiguous resolved order to the survivors, and pins the template
//! version. Compiled journeys are immutable snapshots: later template
//! edits never touch them.

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{DatabaseError, EngineError, Result};
use crate::journey::conditions;
use crate::journey::model::{JourneyStatus, JourneyStep, StepStatus, UserJourney};
use crate::journey::profile::UserProfile;
use crate::store::{queries, Store};
use crate::templates::TemplateStep;

/// Compile one template into a journey for one user.
///
/// Runs in a single transaction: the journey row and all step rows land
/// together or not at all. The first included step starts PENDING, the
/// rest LOCKED. A user can hold at most one journey per template; a
/// second compile for the same pair fails on the unique constraint.
pub async fn compile_journey(
    store: &Store,
    user_id: Uuid,
    template_id: Uuid,
) -> Result<UserJourney> {
    let tx = store.begin().await?;

    let user = queries::get_user(&tx, user_id).await?;
    let template = queries::get_template(&tx, template_id).await?;
    let template_steps = queries::list_template_steps(&tx, template_id).await?;

    let profile = UserProfile::from_user(&user);
    let included: Vec<&TemplateStep> = template_steps
        .iter()
        .filter(|s| conditions::evaluate(s.conditions.as_ref(), &profile))
        .collect();

    let journey = UserJourney {
        id: Uuid::new_v4(),
        user_id,
        journey_template_id: template_id,
        compiled_from_version: template.version,
        status: JourneyStatus::InProgress,
        progress_percentage: 0,
        completed_at: None,
        created_at: Utc::now(),
    };
    queries::insert_journey(&tx, &journey)
        .await
        .map_err(|e| match e {
            DatabaseError::Constraint(_) => crate::error::Error::Engine(
                EngineError::DuplicateJourney {
                    user_id,
                    template_id,
                },
            ),
            other => other.into(),
        })?;

    for (i, template_step) in included.iter().enumerate() {
        let status = if i == 0 {
            StepStatus::Pending
        } else {
            StepStatus::Locked
        };
        let step = JourneyStep {
            id: Uuid::new_v4(),
            user_journey_id: journey.id,
            template_step_id: template_step.id,
            resolved_order: (i + 1) as i64,
            status,
            completed_at: None,
            checklist_state: Default::default(),
            last_nudged_at: None,
        };
        queries::insert_journey_step(&tx, &step).await?;
    }

    tx.commit()
        .await
        .map_err(|e| DatabaseError::Query(format!("commit compile_journey: {e}")))?;

    info!(
        user_id = %user_id,
        template_id = %template_id,
        template_version = template.version,
        steps = included.len(),
        excluded = template_steps.len() - included.len(),
        "Journey compiled"
    );
    Ok(journey)
}

/// Compile every applicable active template the user has no journey for.
///
/// Each template compiles in its own transaction, so one failure does
/// not abort the rest. Returns the journeys created.
pub async fn compile_all_journeys_for_user(
    store: &Store,
    user_id: Uuid,
) -> Result<Vec<UserJourney>> {
    let user = queries::get_user(&*store.conn().await, user_id).await?;
    let profile = UserProfile::from_user(&user);
    let existing = queries::list_journey_template_ids_for_user(&*store.conn().await, user_id).await?;
    let templates = queries::list_active_templates(&*store.conn().await).await?;

    let mut compiled = Vec::new();
    for template in templates {
        if existing.contains(&template.id) {
            continue;
        }
        if !conditions::evaluate(template.applicability.as_ref(), &profile) {
            continue;
        }
        match compile_journey(store, user_id, template.id).await {
            Ok(journey) => compiled.push(journey),
            // Concurrent compile beat us to this template; the unique
            // constraint guarantees there is exactly one journey.
            Err(crate::error::Error::Engine(EngineError::DuplicateJourney { .. })) => {
                warn!(user_id = %user_id, template_id = %template.id, "Journey already exists, skipping");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(compiled)
}

/// Dry-run view of one template step for one user.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepPreview {
    pub template_step_id: Uuid,
    pub title: String,
    pub included: bool,
    /// Human-readable reason when excluded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excluded_by: Option<String>,
    /// Assigned only to included steps, 1-based and contiguous.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_order: Option<i64>,
}

/// Evaluate a template against a user without writing anything.
pub async fn preview_compilation(
    store: &Store,
    user_id: Uuid,
    template_id: Uuid,
) -> Result<Vec<StepPreview>> {
    let user = queries::get_user(&*store.conn().await, user_id).await?;
    let template_steps = queries::list_template_steps(&*store.conn().await, template_id).await?;
    let profile = UserProfile::from_user(&user);

    let mut next_order = 1i64;
    let previews = template_steps
        .iter()
        .map(|step| {
            let failing = conditions::first_failing_clause(step.conditions.as_ref(), &profile);
            let included = failing.is_none();
            let resolved_order = included.then(|| {
                let order = next_order;
                next_order += 1;
                order
            });
            StepPreview {
                template_step_id: step.id,
                title: step.title.clone(),
                included,
                excluded_by: failing.map(|c| c.describe()),
                resolved_order,
            }
        })
        .collect();
    Ok(previews)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journey::model::StepStatus;
    use crate::store::Store;
    use crate::templates::model::StepType;
    use crate::templates::{JourneyTemplate, TemplateStep};
    use crate::users::{Cluster, Country, UserRecord, UserStatus};
    use serde_json::json;

    async fn seed_user(store: &Store, country: Country) -> UserRecord {
        let cluster = Cluster {
            id: Uuid::new_v4(),
            name: "CENDIS".into(),
            country,
        };
        queries::insert_cluster(&*store.conn().await, &cluster).await.unwrap();
        let user = UserRecord {
            id: Uuid::new_v4(),
            full_name: "Maria Rivas".into(),
            personal_email: format!("{}@example.com", Uuid::new_v4()),
            corporate_email: None,
            phone_number: None,
            position: Some("Nurse".into()),
            status: UserStatus::PreHire,
            sso_authenticated_at: None,
            tags: vec![],
            created_at: Utc::now(),
            cluster,
        };
        queries::insert_user(&*store.conn().await, &user).await.unwrap();
        user
    }

    async fn seed_template(store: &Store, steps: &[(&str, Option<serde_json::Value>)]) -> Uuid {
        let template = JourneyTemplate {
            id: Uuid::new_v4(),
            name: "Onboarding".into(),
            description: None,
            version: 3,
            is_active: true,
            applicability: None,
            created_at: Utc::now(),
        };
        queries::insert_template(&*store.conn().await, &template).await.unwrap();
        for (i, (title, conditions)) in steps.iter().enumerate() {
            let step = TemplateStep {
                id: Uuid::new_v4(),
                journey_template_id: template.id,
                order_index: (i + 1) as i64,
                title: title.to_string(),
                description: None,
                step_type: StepType::Action,
                conditions: conditions.clone(),
                content_payload: None,
                requires_corporate_email: false,
                is_optional: false,
                estimated_minutes: None,
                icon_name: None,
            };
            queries::insert_template_step(&*store.conn().await, &step).await.unwrap();
        }
        template.id
    }

    #[tokio::test]
    async fn compile_filters_and_assigns_contiguous_order() {
        let store = Store::open_in_memory().await.unwrap();
        let user = seed_user(&store, Country::VE).await;
        let template_id = seed_template(
            &store,
            &[
                ("Welcome", None),
                ("Colombia only", Some(json!({"country": ["CO"]}))),
                ("Sign contract", None),
                ("Venezuela only", Some(json!({"country": ["VE"]}))),
            ],
        )
        .await;

        let journey = compile_journey(&store, user.id, template_id).await.unwrap();
        assert_eq!(journey.compiled_from_version, 3);
        assert_eq!(journey.progress_percentage, 0);

        let steps = queries::list_step_details(&*store.conn().await, journey.id)
            .await
            .unwrap();
        assert_eq!(steps.len(), 3);
        let orders: Vec<i64> = steps.iter().map(|s| s.step.resolved_order).collect();
        assert_eq!(orders, vec![1, 2, 3]);
        // Relative template order preserved
        let titles: Vec<&str> = steps.iter().map(|s| s.template_step.title.as_str()).collect();
        assert_eq!(titles, vec!["Welcome", "Sign contract", "Venezuela only"]);
        // First step pending, rest locked
        assert_eq!(steps[0].step.status, StepStatus::Pending);
        assert_eq!(steps[1].step.status, StepStatus::Locked);
        assert_eq!(steps[2].step.status, StepStatus::Locked);
    }

    #[tokio::test]
    async fn compile_zero_step_journey_is_valid() {
        let store = Store::open_in_memory().await.unwrap();
        let user = seed_user(&store, Country::AR).await;
        let template_id =
            seed_template(&store, &[("VE only", Some(json!({"country": ["VE"]})))]).await;

        let journey = compile_journey(&store, user.id, template_id).await.unwrap();
        let steps = queries::list_step_details(&*store.conn().await, journey.id)
            .await
            .unwrap();
        assert!(steps.is_empty());
        assert_eq!(journey.progress_percentage, 0);
    }

    #[tokio::test]
    async fn duplicate_compile_rejected() {
        let store = Store::open_in_memory().await.unwrap();
        let user = seed_user(&store, Country::VE).await;
        let template_id = seed_template(&store, &[("Welcome", None)]).await;

        compile_journey(&store, user.id, template_id).await.unwrap();
        let err = compile_journey(&store, user.id, template_id)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Engine(EngineError::DuplicateJourney { .. })
        ));
    }

    #[tokio::test]
    async fn compile_missing_user_writes_nothing() {
        let store = Store::open_in_memory().await.unwrap();
        let template_id = seed_template(&store, &[("Welcome", None)]).await;

        let err = compile_journey(&store, Uuid::new_v4(), template_id)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Database(DatabaseError::NotFound { entity: "user", .. })
        ));

        let mut rows = store
            .conn()
            .await
            .query("SELECT COUNT(*) FROM user_journeys", ())
            .await
            .unwrap();
        let count: i64 = rows.next().await.unwrap().unwrap().get(0).unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn malformed_conditions_exclude_step() {
        let store = Store::open_in_memory().await.unwrap();
        let user = seed_user(&store, Country::VE).await;
        let template_id = seed_template(
            &store,
            &[
                ("Good", None),
                ("Bad", Some(json!({"counrty": ["VE"]}))),
            ],
        )
        .await;

        let journey = compile_journey(&store, user.id, template_id).await.unwrap();
        let steps = queries::list_step_details(&*store.conn().await, journey.id)
            .await
            .unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].template_step.title, "Good");
    }

    #[tokio::test]
    async fn preview_reports_exclusions_without_writing() {
        let store = Store::open_in_memory().await.unwrap();
        let user = seed_user(&store, Country::VE).await;
        let template_id = seed_template(
            &store,
            &[
                ("Welcome", None),
                ("CO only", Some(json!({"country": ["CO"]}))),
            ],
        )
        .await;

        let previews = preview_compilation(&store, user.id, template_id)
            .await
            .unwrap();
        assert_eq!(previews.len(), 2);
        assert!(previews[0].included);
        assert_eq!(previews[0].resolved_order, Some(1));
        assert!(!previews[1].included);
        assert!(previews[1].excluded_by.is_some());
        assert_eq!(previews[1].resolved_order, None);

        let mut rows = store
            .conn()
            .await
            .query("SELECT COUNT(*) FROM user_journeys", ())
            .await
            .unwrap();
        let count: i64 = rows.next().await.unwrap().unwrap().get(0).unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn compile_all_respects_applicability_and_dedup() {
        let store = Store::open_in_memory().await.unwrap();
        let user = seed_user(&store, Country::VE).await;

        let applicable = seed_template(&store, &[("Welcome", None)]).await;
        let not_applicable = JourneyTemplate {
            id: Uuid::new_v4(),
            name: "CO onboarding".into(),
            description: None,
            version: 1,
            is_active: true,
            applicability: Some(json!({"country": ["CO"]})),
            created_at: Utc::now(),
        };
        queries::insert_template(&*store.conn().await, &not_applicable)
            .await
            .unwrap();

        let first = compile_all_journeys_for_user(&store, user.id).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].journey_template_id, applicable);

        // Second run finds nothing new
        let second = compile_all_journeys_for_user(&store, user.id).await.unwrap();
        assert!(second.is_empty());
    }
}
