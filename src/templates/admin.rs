//! Template authoring operations.
//!
//! Order indices stay contiguous from 1: creation appends at the end,
//! deletion closes the gap, and reordering rewrites the whole sequence.
//! Template edits never touch journeys already compiled from the
//! template.

use tracing::info;
use uuid::Uuid;

use crate::error::{DatabaseError, Result};
use crate::journey::conditions;
use crate::store::{queries, Store};
use crate::templates::model::{ContentPayload, StepType, TemplateStep};

/// Fields for a new template step. Order is assigned, not chosen.
#[derive(Debug, Clone)]
pub struct NewStep {
    pub title: String,
    pub description: Option<String>,
    pub step_type: StepType,
    pub conditions: Option<serde_json::Value>,
    pub content_payload: Option<ContentPayload>,
    pub requires_corporate_email: bool,
    pub is_optional: bool,
    pub estimated_minutes: Option<i64>,
    pub icon_name: Option<String>,
}

/// Partial update for an existing step. `None` leaves a field alone;
/// conditions pass through normalization, so `null`/`{}` clears them.
#[derive(Debug, Clone, Default)]
pub struct StepPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub step_type: Option<StepType>,
    pub conditions: Option<serde_json::Value>,
    pub content_payload: Option<ContentPayload>,
    pub requires_corporate_email: Option<bool>,
    pub is_optional: Option<bool>,
    pub estimated_minutes: Option<i64>,
    pub icon_name: Option<String>,
}

/// Append a step at the end of a template.
pub async fn create_step(
    store: &Store,
    template_id: Uuid,
    new: NewStep,
) -> Result<TemplateStep> {
    // Existence check; a bad template id should not surface as a
    // foreign-key error string.
    queries::get_template(&*store.conn().await, template_id).await?;

    let max = queries::max_order_index(&*store.conn().await, template_id).await?;
    let step = TemplateStep {
        id: Uuid::new_v4(),
        journey_template_id: template_id,
        order_index: max + 1,
        title: new.title,
        description: new.description,
        step_type: new.step_type,
        conditions: conditions::normalize(new.conditions),
        content_payload: new.content_payload,
        requires_corporate_email: new.requires_corporate_email,
        is_optional: new.is_optional,
        estimated_minutes: new.estimated_minutes,
        icon_name: new.icon_name,
    };
    queries::insert_template_step(&*store.conn().await, &step).await?;
    info!(template_id = %template_id, step_id = %step.id, order = step.order_index, "Step created");
    Ok(step)
}

/// Apply a patch to a step. Order cannot change here; use
/// [`reorder_steps`].
pub async fn update_step(store: &Store, step_id: Uuid, patch: StepPatch) -> Result<TemplateStep> {
    let mut step = queries::get_template_step(&*store.conn().await, step_id).await?;
    if let Some(title) = patch.title {
        step.title = title;
    }
    if let Some(description) = patch.description {
        step.description = Some(description);
    }
    if let Some(step_type) = patch.step_type {
        step.step_type = step_type;
    }
    if let Some(raw) = patch.conditions {
        step.conditions = conditions::normalize(Some(raw));
    }
    if let Some(payload) = patch.content_payload {
        step.content_payload = Some(payload);
    }
    if let Some(flag) = patch.requires_corporate_email {
        step.requires_corporate_email = flag;
    }
    if let Some(flag) = patch.is_optional {
        step.is_optional = flag;
    }
    if let Some(minutes) = patch.estimated_minutes {
        step.estimated_minutes = Some(minutes);
    }
    if let Some(icon) = patch.icon_name {
        step.icon_name = Some(icon);
    }
    queries::update_template_step(&*store.conn().await, &step).await?;
    Ok(step)
}

/// Delete a step and renumber the steps above it.
pub async fn delete_step(store: &Store, step_id: Uuid) -> Result<()> {
    let tx = store.begin().await?;
    let step = queries::get_template_step(&tx, step_id).await?;
    queries::delete_template_step(&tx, step_id).await?;
    queries::shift_order_indices_down(&tx, step.journey_template_id, step.order_index).await?;
    tx.commit()
        .await
        .map_err(|e| DatabaseError::Query(format!("commit delete_step: {e}")))?;
    info!(template_id = %step.journey_template_id, step_id = %step_id, "Step deleted");
    Ok(())
}

/// Rewrite a template's step order to match `ordered_ids`.
///
/// The id list must be exactly the template's current steps. Two
/// phases: park every step at a negative index, then assign 1..N. The
/// unique index on (template, order) would otherwise reject the swap
/// mid-flight.
pub async fn reorder_steps(
    store: &Store,
    template_id: Uuid,
    ordered_ids: &[Uuid],
) -> Result<Vec<TemplateStep>> {
    let tx = store.begin().await?;
    let current = queries::list_template_steps(&tx, template_id).await?;

    if current.len() != ordered_ids.len()
        || !current.iter().all(|s| ordered_ids.contains(&s.id))
    {
        return Err(DatabaseError::Constraint(format!(
            "reorder for template {template_id} must list all {} steps exactly once",
            current.len()
        ))
        .into());
    }

    for (i, id) in ordered_ids.iter().enumerate() {
        queries::set_step_order_index(&tx, *id, -((i + 1) as i64)).await?;
    }
    for (i, id) in ordered_ids.iter().enumerate() {
        queries::set_step_order_index(&tx, *id, (i + 1) as i64).await?;
    }

    tx.commit()
        .await
        .map_err(|e| DatabaseError::Query(format!("commit reorder_steps: {e}")))?;
    info!(template_id = %template_id, steps = ordered_ids.len(), "Steps reordered");
    queries::list_template_steps(&*store.conn().await, template_id)
        .await
        .map_err(Into::into)
}

/// Bump the template version and activate it. Existing journeys keep
/// the version they were compiled from.
pub async fn publish_template(store: &Store, template_id: Uuid) -> Result<i64> {
    let version = queries::publish_template(&*store.conn().await, template_id).await?;
    info!(template_id = %template_id, version, "Template published");
    Ok(version)
}
