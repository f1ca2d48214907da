//! Query functions over a libSQL connection.
//!
//! Every function takes `&Connection`, so the same code runs against the
//! store's shared connection or inside a `Transaction` (which derefs to
//! `Connection`). Workflow atomicity lives in the callers.

use chrono::{DateTime, Utc};
use libsql::{Connection, Row, params};
use uuid::Uuid;

use crate::comms::model::{CommunicationTemplate, TriggerEvent};
use crate::error::DatabaseError;
use crate::journey::model::{
    ChecklistState, JourneyStatus, JourneyStep, JourneyStepDetail, StepStatus, UserJourney,
};
use crate::templates::model::{ContentPayload, JourneyTemplate, StepType, TemplateStep};
use crate::users::{AccessProvisioning, Cluster, Country, ProvisioningStatus, UserRecord, UserStatus};

// ── Helpers ─────────────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(ndt.and_utc());
    }
    Err(DatabaseError::Serialization(format!("bad datetime: {s}")))
}

fn parse_opt_datetime(s: Option<String>) -> Result<Option<DateTime<Utc>>, DatabaseError> {
    s.map(|s| parse_datetime(&s)).transpose()
}

fn parse_uuid(s: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s).map_err(|e| DatabaseError::Serialization(format!("bad uuid {s}: {e}")))
}

fn parse_json_opt(s: Option<String>) -> Result<Option<serde_json::Value>, DatabaseError> {
    s.map(|s| {
        serde_json::from_str(&s)
            .map_err(|e| DatabaseError::Serialization(format!("bad json column: {e}")))
    })
    .transpose()
}

fn opt_text(v: &Option<String>) -> libsql::Value {
    match v {
        Some(s) => libsql::Value::Text(s.clone()),
        None => libsql::Value::Null,
    }
}

fn opt_rfc3339(v: &Option<DateTime<Utc>>) -> libsql::Value {
    match v {
        Some(dt) => libsql::Value::Text(dt.to_rfc3339()),
        None => libsql::Value::Null,
    }
}

fn query_err(context: &str) -> impl FnOnce(libsql::Error) -> DatabaseError + '_ {
    move |e| DatabaseError::Query(format!("{context}: {e}"))
}

async fn fetch_one(
    conn: &Connection,
    sql: &str,
    params: impl libsql::params::IntoParams,
    context: &str,
) -> Result<Option<Row>, DatabaseError> {
    let mut rows = conn.query(sql, params).await.map_err(query_err(context))?;
    rows.next().await.map_err(query_err(context))
}

// ── Users & clusters ────────────────────────────────────────────────

const USER_COLUMNS: &str = "u.id, u.full_name, u.personal_email, u.corporate_email, \
     u.phone_number, u.position, u.status, u.sso_authenticated_at, u.tags, u.created_at, \
     c.id, c.name, c.country";

fn row_to_user(row: &Row) -> Result<UserRecord, DatabaseError> {
    let id: String = row.get(0).map_err(query_err("user id"))?;
    let status: String = row.get(6).map_err(query_err("user status"))?;
    let tags_json: String = row.get(8).map_err(query_err("user tags"))?;
    let created: String = row.get(9).map_err(query_err("user created_at"))?;
    let cluster_id: String = row.get(10).map_err(query_err("cluster id"))?;
    let country: String = row.get(12).map_err(query_err("cluster country"))?;

    Ok(UserRecord {
        id: parse_uuid(&id)?,
        full_name: row.get(1).map_err(query_err("user full_name"))?,
        personal_email: row.get(2).map_err(query_err("user personal_email"))?,
        corporate_email: row.get::<String>(3).ok(),
        phone_number: row.get::<String>(4).ok(),
        position: row.get::<String>(5).ok(),
        status: UserStatus::parse(&status)
            .ok_or_else(|| DatabaseError::Serialization(format!("bad user status: {status}")))?,
        sso_authenticated_at: parse_opt_datetime(row.get::<String>(7).ok())?,
        tags: serde_json::from_str(&tags_json)
            .map_err(|e| DatabaseError::Serialization(format!("bad tags json: {e}")))?,
        created_at: parse_datetime(&created)?,
        cluster: Cluster {
            id: parse_uuid(&cluster_id)?,
            name: row.get(11).map_err(query_err("cluster name"))?,
            country: Country::parse(&country).ok_or_else(|| {
                DatabaseError::Serialization(format!("bad cluster country: {country}"))
            })?,
        },
    })
}

pub async fn insert_cluster(conn: &Connection, cluster: &Cluster) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO clusters (id, name, country) VALUES (?1, ?2, ?3)",
        params![
            cluster.id.to_string(),
            cluster.name.clone(),
            cluster.country.as_str()
        ],
    )
    .await
    .map_err(|e| DatabaseError::from_write("insert_cluster", e))?;
    Ok(())
}

pub async fn insert_user(conn: &Connection, user: &UserRecord) -> Result<(), DatabaseError> {
    let tags = serde_json::to_string(&user.tags)
        .map_err(|e| DatabaseError::Serialization(format!("tags: {e}")))?;
    conn.execute(
        "INSERT INTO users (id, cluster_id, full_name, personal_email, corporate_email, \
         phone_number, position, status, sso_authenticated_at, tags, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            user.id.to_string(),
            user.cluster.id.to_string(),
            user.full_name.clone(),
            user.personal_email.clone(),
            opt_text(&user.corporate_email),
            opt_text(&user.phone_number),
            opt_text(&user.position),
            user.status.as_str(),
            opt_rfc3339(&user.sso_authenticated_at),
            tags,
            user.created_at.to_rfc3339(),
        ],
    )
    .await
    .map_err(|e| DatabaseError::from_write("insert_user", e))?;
    Ok(())
}

/// Load a user joined with its cluster. Errors with NotFound on a miss.
pub async fn get_user(conn: &Connection, id: Uuid) -> Result<UserRecord, DatabaseError> {
    let row = fetch_one(
        conn,
        &format!("SELECT {USER_COLUMNS} FROM users u JOIN clusters c ON c.id = u.cluster_id WHERE u.id = ?1"),
        params![id.to_string()],
        "get_user",
    )
    .await?;
    match row {
        Some(row) => row_to_user(&row),
        None => Err(DatabaseError::NotFound {
            entity: "user",
            id: id.to_string(),
        }),
    }
}

/// Set corporate email and employment status in one statement.
pub async fn set_user_identity(
    conn: &Connection,
    user_id: Uuid,
    corporate_email: Option<&str>,
    status: UserStatus,
) -> Result<(), DatabaseError> {
    let affected = conn
        .execute(
            "UPDATE users SET corporate_email = ?1, status = ?2 WHERE id = ?3",
            params![
                opt_text(&corporate_email.map(String::from)),
                status.as_str(),
                user_id.to_string()
            ],
        )
        .await
        .map_err(|e| DatabaseError::from_write("set_user_identity", e))?;
    if affected == 0 {
        return Err(DatabaseError::NotFound {
            entity: "user",
            id: user_id.to_string(),
        });
    }
    Ok(())
}

pub async fn set_sso_authenticated_at(
    conn: &Connection,
    user_id: Uuid,
    at: Option<DateTime<Utc>>,
) -> Result<(), DatabaseError> {
    let affected = conn
        .execute(
            "UPDATE users SET sso_authenticated_at = ?1 WHERE id = ?2",
            params![opt_rfc3339(&at), user_id.to_string()],
        )
        .await
        .map_err(|e| DatabaseError::from_write("set_sso_authenticated_at", e))?;
    if affected == 0 {
        return Err(DatabaseError::NotFound {
            entity: "user",
            id: user_id.to_string(),
        });
    }
    Ok(())
}

// ── Access provisioning ─────────────────────────────────────────────

pub async fn insert_provisioning(
    conn: &Connection,
    record: &AccessProvisioning,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO access_provisioning (id, user_id, system_name, status, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            record.id.to_string(),
            record.user_id.to_string(),
            record.system_name.clone(),
            record.status.as_str(),
            Utc::now().to_rfc3339(),
        ],
    )
    .await
    .map_err(|e| DatabaseError::from_write("insert_provisioning", e))?;
    Ok(())
}

/// Update every provisioning row for (user, system). Returns rows touched.
pub async fn set_provisioning_status(
    conn: &Connection,
    user_id: Uuid,
    system_name: &str,
    status: ProvisioningStatus,
) -> Result<u64, DatabaseError> {
    conn.execute(
        "UPDATE access_provisioning SET status = ?1, updated_at = ?2 \
         WHERE user_id = ?3 AND system_name = ?4",
        params![
            status.as_str(),
            Utc::now().to_rfc3339(),
            user_id.to_string(),
            system_name
        ],
    )
    .await
    .map_err(|e| DatabaseError::from_write("set_provisioning_status", e))
}

pub async fn get_provisioning_status(
    conn: &Connection,
    user_id: Uuid,
    system_name: &str,
) -> Result<Option<ProvisioningStatus>, DatabaseError> {
    let row = fetch_one(
        conn,
        "SELECT status FROM access_provisioning WHERE user_id = ?1 AND system_name = ?2",
        params![user_id.to_string(), system_name],
        "get_provisioning_status",
    )
    .await?;
    match row {
        Some(row) => {
            let s: String = row.get(0).map_err(query_err("provisioning status"))?;
            Ok(ProvisioningStatus::parse(&s))
        }
        None => Ok(None),
    }
}

// ── Journey templates & steps ───────────────────────────────────────

fn row_to_template(row: &Row) -> Result<JourneyTemplate, DatabaseError> {
    let id: String = row.get(0).map_err(query_err("template id"))?;
    let created: String = row.get(6).map_err(query_err("template created_at"))?;
    Ok(JourneyTemplate {
        id: parse_uuid(&id)?,
        name: row.get(1).map_err(query_err("template name"))?,
        description: row.get::<String>(2).ok(),
        version: row.get(3).map_err(query_err("template version"))?,
        is_active: row.get::<i64>(4).map_err(query_err("template is_active"))? != 0,
        applicability: parse_json_opt(row.get::<String>(5).ok())?,
        created_at: parse_datetime(&created)?,
    })
}

const TEMPLATE_COLUMNS: &str =
    "id, name, description, version, is_active, applicability, created_at";

pub async fn insert_template(
    conn: &Connection,
    template: &JourneyTemplate,
) -> Result<(), DatabaseError> {
    let applicability = template
        .applicability
        .as_ref()
        .map(|v| v.to_string());
    conn.execute(
        "INSERT INTO journey_templates (id, name, description, version, is_active, applicability, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            template.id.to_string(),
            template.name.clone(),
            opt_text(&template.description),
            template.version,
            template.is_active as i64,
            opt_text(&applicability),
            template.created_at.to_rfc3339(),
        ],
    )
    .await
    .map_err(|e| DatabaseError::from_write("insert_template", e))?;
    Ok(())
}

pub async fn get_template(conn: &Connection, id: Uuid) -> Result<JourneyTemplate, DatabaseError> {
    let row = fetch_one(
        conn,
        &format!("SELECT {TEMPLATE_COLUMNS} FROM journey_templates WHERE id = ?1"),
        params![id.to_string()],
        "get_template",
    )
    .await?;
    match row {
        Some(row) => row_to_template(&row),
        None => Err(DatabaseError::NotFound {
            entity: "journey_template",
            id: id.to_string(),
        }),
    }
}

pub async fn list_active_templates(
    conn: &Connection,
) -> Result<Vec<JourneyTemplate>, DatabaseError> {
    let mut rows = conn
        .query(
            &format!(
                "SELECT {TEMPLATE_COLUMNS} FROM journey_templates WHERE is_active = 1 ORDER BY created_at ASC"
            ),
            (),
        )
        .await
        .map_err(query_err("list_active_templates"))?;
    let mut templates = Vec::new();
    while let Some(row) = rows.next().await.map_err(query_err("list_active_templates"))? {
        templates.push(row_to_template(&row)?);
    }
    Ok(templates)
}

/// Increment the template version and mark it active (publish).
pub async fn publish_template(conn: &Connection, id: Uuid) -> Result<i64, DatabaseError> {
    let affected = conn
        .execute(
            "UPDATE journey_templates SET version = version + 1, is_active = 1 WHERE id = ?1",
            params![id.to_string()],
        )
        .await
        .map_err(|e| DatabaseError::from_write("publish_template", e))?;
    if affected == 0 {
        return Err(DatabaseError::NotFound {
            entity: "journey_template",
            id: id.to_string(),
        });
    }
    let row = fetch_one(
        conn,
        "SELECT version FROM journey_templates WHERE id = ?1",
        params![id.to_string()],
        "publish_template",
    )
    .await?;
    row.ok_or(DatabaseError::NotFound {
        entity: "journey_template",
        id: id.to_string(),
    })?
    .get(0)
    .map_err(query_err("publish_template version"))
}

const STEP_COLUMNS: &str = "id, journey_template_id, order_index, title, description, step_type, \
     conditions, content_payload, requires_corporate_email, is_optional, estimated_minutes, icon_name";

fn row_to_template_step(row: &Row) -> Result<TemplateStep, DatabaseError> {
    row_to_template_step_at(row, 0)
}

/// Map a template step starting at column `base` (for joined selects).
fn row_to_template_step_at(row: &Row, base: i32) -> Result<TemplateStep, DatabaseError> {
    let id: String = row.get(base).map_err(query_err("step id"))?;
    let template_id: String = row.get(base + 1).map_err(query_err("step template id"))?;
    let step_type: String = row.get(base + 5).map_err(query_err("step type"))?;
    let content_payload = match parse_json_opt(row.get::<String>(base + 7).ok())? {
        Some(v) => Some(
            serde_json::from_value::<ContentPayload>(v)
                .map_err(|e| DatabaseError::Serialization(format!("bad content payload: {e}")))?,
        ),
        None => None,
    };
    Ok(TemplateStep {
        id: parse_uuid(&id)?,
        journey_template_id: parse_uuid(&template_id)?,
        order_index: row.get(base + 2).map_err(query_err("step order_index"))?,
        title: row.get(base + 3).map_err(query_err("step title"))?,
        description: row.get::<String>(base + 4).ok(),
        step_type: StepType::parse(&step_type)
            .ok_or_else(|| DatabaseError::Serialization(format!("bad step type: {step_type}")))?,
        conditions: parse_json_opt(row.get::<String>(base + 6).ok())?,
        content_payload,
        requires_corporate_email: row
            .get::<i64>(base + 8)
            .map_err(query_err("step requires_corporate_email"))?
            != 0,
        is_optional: row.get::<i64>(base + 9).map_err(query_err("step is_optional"))? != 0,
        estimated_minutes: row.get::<i64>(base + 10).ok(),
        icon_name: row.get::<String>(base + 11).ok(),
    })
}

pub async fn insert_template_step(
    conn: &Connection,
    step: &TemplateStep,
) -> Result<(), DatabaseError> {
    let conditions = step.conditions.as_ref().map(|v| v.to_string());
    let content_payload = step
        .content_payload
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| DatabaseError::Serialization(format!("content payload: {e}")))?;
    conn.execute(
        "INSERT INTO template_steps (id, journey_template_id, order_index, title, description, \
         step_type, conditions, content_payload, requires_corporate_email, is_optional, \
         estimated_minutes, icon_name) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            step.id.to_string(),
            step.journey_template_id.to_string(),
            step.order_index,
            step.title.clone(),
            opt_text(&step.description),
            step.step_type.as_str(),
            opt_text(&conditions),
            opt_text(&content_payload),
            step.requires_corporate_email as i64,
            step.is_optional as i64,
            match step.estimated_minutes {
                Some(m) => libsql::Value::Integer(m),
                None => libsql::Value::Null,
            },
            opt_text(&step.icon_name),
        ],
    )
    .await
    .map_err(|e| DatabaseError::from_write("insert_template_step", e))?;
    Ok(())
}

/// Full-row update of a template step (identified by `step.id`).
pub async fn update_template_step(
    conn: &Connection,
    step: &TemplateStep,
) -> Result<(), DatabaseError> {
    let conditions = step.conditions.as_ref().map(|v| v.to_string());
    let content_payload = step
        .content_payload
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| DatabaseError::Serialization(format!("content payload: {e}")))?;
    let affected = conn
        .execute(
            "UPDATE template_steps SET title = ?1, description = ?2, step_type = ?3, \
             conditions = ?4, content_payload = ?5, requires_corporate_email = ?6, \
             is_optional = ?7, estimated_minutes = ?8, icon_name = ?9 WHERE id = ?10",
            params![
                step.title.clone(),
                opt_text(&step.description),
                step.step_type.as_str(),
                opt_text(&conditions),
                opt_text(&content_payload),
                step.requires_corporate_email as i64,
                step.is_optional as i64,
                match step.estimated_minutes {
                    Some(m) => libsql::Value::Integer(m),
                    None => libsql::Value::Null,
                },
                opt_text(&step.icon_name),
                step.id.to_string(),
            ],
        )
        .await
        .map_err(|e| DatabaseError::from_write("update_template_step", e))?;
    if affected == 0 {
        return Err(DatabaseError::NotFound {
            entity: "template_step",
            id: step.id.to_string(),
        });
    }
    Ok(())
}

pub async fn get_template_step(
    conn: &Connection,
    id: Uuid,
) -> Result<TemplateStep, DatabaseError> {
    let row = fetch_one(
        conn,
        &format!("SELECT {STEP_COLUMNS} FROM template_steps WHERE id = ?1"),
        params![id.to_string()],
        "get_template_step",
    )
    .await?;
    match row {
        Some(row) => row_to_template_step(&row),
        None => Err(DatabaseError::NotFound {
            entity: "template_step",
            id: id.to_string(),
        }),
    }
}

/// Steps of a template in ascending authored order.
pub async fn list_template_steps(
    conn: &Connection,
    template_id: Uuid,
) -> Result<Vec<TemplateStep>, DatabaseError> {
    let mut rows = conn
        .query(
            &format!(
                "SELECT {STEP_COLUMNS} FROM template_steps \
                 WHERE journey_template_id = ?1 ORDER BY order_index ASC"
            ),
            params![template_id.to_string()],
        )
        .await
        .map_err(query_err("list_template_steps"))?;
    let mut steps = Vec::new();
    while let Some(row) = rows.next().await.map_err(query_err("list_template_steps"))? {
        steps.push(row_to_template_step(&row)?);
    }
    Ok(steps)
}

pub async fn max_order_index(
    conn: &Connection,
    template_id: Uuid,
) -> Result<i64, DatabaseError> {
    let row = fetch_one(
        conn,
        "SELECT COALESCE(MAX(order_index), 0) FROM template_steps WHERE journey_template_id = ?1",
        params![template_id.to_string()],
        "max_order_index",
    )
    .await?;
    match row {
        Some(row) => row.get(0).map_err(query_err("max_order_index")),
        None => Ok(0),
    }
}

pub async fn set_step_order_index(
    conn: &Connection,
    step_id: Uuid,
    order_index: i64,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE template_steps SET order_index = ?1 WHERE id = ?2",
        params![order_index, step_id.to_string()],
    )
    .await
    .map_err(|e| DatabaseError::from_write("set_step_order_index", e))?;
    Ok(())
}

pub async fn delete_template_step(conn: &Connection, step_id: Uuid) -> Result<(), DatabaseError> {
    conn.execute(
        "DELETE FROM template_steps WHERE id = ?1",
        params![step_id.to_string()],
    )
    .await
    .map_err(|e| DatabaseError::from_write("delete_template_step", e))?;
    Ok(())
}

/// Close the gap left by a deleted step: decrement every higher index.
pub async fn shift_order_indices_down(
    conn: &Connection,
    template_id: Uuid,
    above: i64,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE template_steps SET order_index = order_index - 1 \
         WHERE journey_template_id = ?1 AND order_index > ?2",
        params![template_id.to_string(), above],
    )
    .await
    .map_err(|e| DatabaseError::from_write("shift_order_indices_down", e))?;
    Ok(())
}

// ── User journeys ───────────────────────────────────────────────────

const JOURNEY_COLUMNS: &str = "id, user_id, journey_template_id, compiled_from_version, status, \
     progress_percentage, completed_at, created_at";

fn row_to_journey(row: &Row) -> Result<UserJourney, DatabaseError> {
    let id: String = row.get(0).map_err(query_err("journey id"))?;
    let user_id: String = row.get(1).map_err(query_err("journey user_id"))?;
    let template_id: String = row.get(2).map_err(query_err("journey template_id"))?;
    let status: String = row.get(4).map_err(query_err("journey status"))?;
    let created: String = row.get(7).map_err(query_err("journey created_at"))?;
    Ok(UserJourney {
        id: parse_uuid(&id)?,
        user_id: parse_uuid(&user_id)?,
        journey_template_id: parse_uuid(&template_id)?,
        compiled_from_version: row.get(3).map_err(query_err("journey version"))?,
        status: JourneyStatus::parse(&status)
            .ok_or_else(|| DatabaseError::Serialization(format!("bad journey status: {status}")))?,
        progress_percentage: row.get(5).map_err(query_err("journey progress"))?,
        completed_at: parse_opt_datetime(row.get::<String>(6).ok())?,
        created_at: parse_datetime(&created)?,
    })
}

pub async fn insert_journey(conn: &Connection, journey: &UserJourney) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO user_journeys (id, user_id, journey_template_id, compiled_from_version, \
         status, progress_percentage, completed_at, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            journey.id.to_string(),
            journey.user_id.to_string(),
            journey.journey_template_id.to_string(),
            journey.compiled_from_version,
            journey.status.as_str(),
            journey.progress_percentage,
            opt_rfc3339(&journey.completed_at),
            journey.created_at.to_rfc3339(),
        ],
    )
    .await
    .map_err(|e| DatabaseError::from_write("insert_journey", e))?;
    Ok(())
}

pub async fn insert_journey_step(
    conn: &Connection,
    step: &JourneyStep,
) -> Result<(), DatabaseError> {
    let checklist = serde_json::to_string(&step.checklist_state)
        .map_err(|e| DatabaseError::Serialization(format!("checklist: {e}")))?;
    conn.execute(
        "INSERT INTO user_journey_steps (id, user_journey_id, template_step_id, resolved_order, \
         status, completed_at, checklist_state, last_nudged_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            step.id.to_string(),
            step.user_journey_id.to_string(),
            step.template_step_id.to_string(),
            step.resolved_order,
            step.status.as_str(),
            opt_rfc3339(&step.completed_at),
            checklist,
            opt_rfc3339(&step.last_nudged_at),
        ],
    )
    .await
    .map_err(|e| DatabaseError::from_write("insert_journey_step", e))?;
    Ok(())
}

pub async fn get_journey(conn: &Connection, id: Uuid) -> Result<UserJourney, DatabaseError> {
    let row = fetch_one(
        conn,
        &format!("SELECT {JOURNEY_COLUMNS} FROM user_journeys WHERE id = ?1"),
        params![id.to_string()],
        "get_journey",
    )
    .await?;
    match row {
        Some(row) => row_to_journey(&row),
        None => Err(DatabaseError::NotFound {
            entity: "user_journey",
            id: id.to_string(),
        }),
    }
}

/// Template ids the user already has journeys for (dedup set for bulk compile).
pub async fn list_journey_template_ids_for_user(
    conn: &Connection,
    user_id: Uuid,
) -> Result<Vec<Uuid>, DatabaseError> {
    let mut rows = conn
        .query(
            "SELECT journey_template_id FROM user_journeys WHERE user_id = ?1",
            params![user_id.to_string()],
        )
        .await
        .map_err(query_err("list_journey_template_ids_for_user"))?;
    let mut ids = Vec::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(query_err("list_journey_template_ids_for_user"))?
    {
        let id: String = row.get(0).map_err(query_err("journey template id"))?;
        ids.push(parse_uuid(&id)?);
    }
    Ok(ids)
}

pub async fn list_journeys_for_user(
    conn: &Connection,
    user_id: Uuid,
) -> Result<Vec<UserJourney>, DatabaseError> {
    let mut rows = conn
        .query(
            &format!(
                "SELECT {JOURNEY_COLUMNS} FROM user_journeys WHERE user_id = ?1 ORDER BY created_at ASC"
            ),
            params![user_id.to_string()],
        )
        .await
        .map_err(query_err("list_journeys_for_user"))?;
    let mut journeys = Vec::new();
    while let Some(row) = rows.next().await.map_err(query_err("list_journeys_for_user"))? {
        journeys.push(row_to_journey(&row)?);
    }
    Ok(journeys)
}

/// The user's first journey (oldest), or `None`.
pub async fn get_first_journey_for_user(
    conn: &Connection,
    user_id: Uuid,
) -> Result<Option<UserJourney>, DatabaseError> {
    let row = fetch_one(
        conn,
        &format!(
            "SELECT {JOURNEY_COLUMNS} FROM user_journeys WHERE user_id = ?1 \
             ORDER BY created_at ASC LIMIT 1"
        ),
        params![user_id.to_string()],
        "get_first_journey_for_user",
    )
    .await?;
    row.map(|row| row_to_journey(&row)).transpose()
}

// ── Journey steps (joined with template snapshot) ───────────────────

const JOINED_STEP_COLUMNS: &str = "s.id, s.user_journey_id, s.template_step_id, s.resolved_order, \
     s.status, s.completed_at, s.checklist_state, s.last_nudged_at, \
     t.id, t.journey_template_id, t.order_index, t.title, t.description, t.step_type, \
     t.conditions, t.content_payload, t.requires_corporate_email, t.is_optional, \
     t.estimated_minutes, t.icon_name";

fn row_to_step_detail(row: &Row) -> Result<JourneyStepDetail, DatabaseError> {
    let id: String = row.get(0).map_err(query_err("journey step id"))?;
    let journey_id: String = row.get(1).map_err(query_err("journey step journey id"))?;
    let template_step_id: String = row.get(2).map_err(query_err("journey step template id"))?;
    let status: String = row.get(4).map_err(query_err("journey step status"))?;
    let checklist_json: String = row.get(6).map_err(query_err("journey step checklist"))?;

    let step = JourneyStep {
        id: parse_uuid(&id)?,
        user_journey_id: parse_uuid(&journey_id)?,
        template_step_id: parse_uuid(&template_step_id)?,
        resolved_order: row.get(3).map_err(query_err("journey step resolved_order"))?,
        status: StepStatus::parse(&status)
            .ok_or_else(|| DatabaseError::Serialization(format!("bad step status: {status}")))?,
        completed_at: parse_opt_datetime(row.get::<String>(5).ok())?,
        checklist_state: serde_json::from_str(&checklist_json)
            .map_err(|e| DatabaseError::Serialization(format!("bad checklist json: {e}")))?,
        last_nudged_at: parse_opt_datetime(row.get::<String>(7).ok())?,
    };
    let template_step = row_to_template_step_at(row, 8)?;
    Ok(JourneyStepDetail {
        step,
        template_step,
    })
}

/// Steps of a journey with their template snapshots, ordered by resolved
/// order with the template's authored order as tiebreak.
pub async fn list_step_details(
    conn: &Connection,
    journey_id: Uuid,
) -> Result<Vec<JourneyStepDetail>, DatabaseError> {
    let mut rows = conn
        .query(
            &format!(
                "SELECT {JOINED_STEP_COLUMNS} FROM user_journey_steps s \
                 JOIN template_steps t ON t.id = s.template_step_id \
                 WHERE s.user_journey_id = ?1 \
                 ORDER BY s.resolved_order ASC, t.order_index ASC"
            ),
            params![journey_id.to_string()],
        )
        .await
        .map_err(query_err("list_step_details"))?;
    let mut details = Vec::new();
    while let Some(row) = rows.next().await.map_err(query_err("list_step_details"))? {
        details.push(row_to_step_detail(&row)?);
    }
    Ok(details)
}

pub async fn get_step_detail(
    conn: &Connection,
    step_id: Uuid,
) -> Result<JourneyStepDetail, DatabaseError> {
    let row = fetch_one(
        conn,
        &format!(
            "SELECT {JOINED_STEP_COLUMNS} FROM user_journey_steps s \
             JOIN template_steps t ON t.id = s.template_step_id WHERE s.id = ?1"
        ),
        params![step_id.to_string()],
        "get_step_detail",
    )
    .await?;
    match row {
        Some(row) => row_to_step_detail(&row),
        None => Err(DatabaseError::NotFound {
            entity: "user_journey_step",
            id: step_id.to_string(),
        }),
    }
}

pub async fn set_step_status(
    conn: &Connection,
    step_id: Uuid,
    status: StepStatus,
    completed_at: Option<DateTime<Utc>>,
) -> Result<(), DatabaseError> {
    let affected = conn
        .execute(
            "UPDATE user_journey_steps SET status = ?1, completed_at = ?2 WHERE id = ?3",
            params![status.as_str(), opt_rfc3339(&completed_at), step_id.to_string()],
        )
        .await
        .map_err(|e| DatabaseError::from_write("set_step_status", e))?;
    if affected == 0 {
        return Err(DatabaseError::NotFound {
            entity: "user_journey_step",
            id: step_id.to_string(),
        });
    }
    Ok(())
}

pub async fn set_checklist_state(
    conn: &Connection,
    step_id: Uuid,
    state: &ChecklistState,
) -> Result<(), DatabaseError> {
    let json = serde_json::to_string(state)
        .map_err(|e| DatabaseError::Serialization(format!("checklist: {e}")))?;
    let affected = conn
        .execute(
            "UPDATE user_journey_steps SET checklist_state = ?1 WHERE id = ?2",
            params![json, step_id.to_string()],
        )
        .await
        .map_err(|e| DatabaseError::from_write("set_checklist_state", e))?;
    if affected == 0 {
        return Err(DatabaseError::NotFound {
            entity: "user_journey_step",
            id: step_id.to_string(),
        });
    }
    Ok(())
}

pub async fn set_last_nudged_at(
    conn: &Connection,
    step_id: Uuid,
    at: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE user_journey_steps SET last_nudged_at = ?1 WHERE id = ?2",
        params![at.to_rfc3339(), step_id.to_string()],
    )
    .await
    .map_err(|e| DatabaseError::from_write("set_last_nudged_at", e))?;
    Ok(())
}

pub async fn set_journey_progress(
    conn: &Connection,
    journey_id: Uuid,
    progress: i64,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE user_journeys SET progress_percentage = ?1 WHERE id = ?2",
        params![progress, journey_id.to_string()],
    )
    .await
    .map_err(|e| DatabaseError::from_write("set_journey_progress", e))?;
    Ok(())
}

pub async fn set_journey_status(
    conn: &Connection,
    journey_id: Uuid,
    status: JourneyStatus,
    completed_at: Option<DateTime<Utc>>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE user_journeys SET status = ?1, completed_at = ?2 WHERE id = ?3",
        params![status.as_str(), opt_rfc3339(&completed_at), journey_id.to_string()],
    )
    .await
    .map_err(|e| DatabaseError::from_write("set_journey_status", e))?;
    Ok(())
}

// ── Communication templates & log ───────────────────────────────────

fn row_to_comm_template(row: &Row) -> Result<CommunicationTemplate, DatabaseError> {
    let id: String = row.get(0).map_err(query_err("comm template id"))?;
    let trigger: String = row.get(2).map_err(query_err("comm template trigger"))?;
    let channel: String = row.get(3).map_err(query_err("comm template channel"))?;
    Ok(CommunicationTemplate {
        id: parse_uuid(&id)?,
        name: row.get(1).map_err(query_err("comm template name"))?,
        trigger: TriggerEvent::parse(&trigger).ok_or_else(|| {
            DatabaseError::Serialization(format!("bad trigger event: {trigger}"))
        })?,
        channel: crate::comms::model::CommChannel::parse(&channel).ok_or_else(|| {
            DatabaseError::Serialization(format!("bad comm channel: {channel}"))
        })?,
        subject: row.get::<String>(4).ok(),
        body_content: row.get(5).map_err(query_err("comm template body"))?,
        conditions: parse_json_opt(row.get::<String>(6).ok())?,
        is_active: row.get::<i64>(7).map_err(query_err("comm template is_active"))? != 0,
    })
}

pub async fn insert_comm_template(
    conn: &Connection,
    template: &CommunicationTemplate,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO communication_templates (id, name, trigger_event, channel, subject, \
         body_content, conditions, is_active) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            template.id.to_string(),
            template.name.clone(),
            template.trigger.as_str(),
            template.channel.as_str(),
            opt_text(&template.subject),
            template.body_content.clone(),
            opt_text(&template.conditions.as_ref().map(|v| v.to_string())),
            template.is_active as i64,
        ],
    )
    .await
    .map_err(|e| DatabaseError::from_write("insert_comm_template", e))?;
    Ok(())
}

pub async fn list_active_comm_templates(
    conn: &Connection,
    trigger: TriggerEvent,
) -> Result<Vec<CommunicationTemplate>, DatabaseError> {
    let mut rows = conn
        .query(
            "SELECT id, name, trigger_event, channel, subject, body_content, conditions, is_active \
             FROM communication_templates WHERE trigger_event = ?1 AND is_active = 1",
            params![trigger.as_str()],
        )
        .await
        .map_err(query_err("list_active_comm_templates"))?;
    let mut templates = Vec::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(query_err("list_active_comm_templates"))?
    {
        templates.push(row_to_comm_template(&row)?);
    }
    Ok(templates)
}

/// Insert the idempotency-guard log row for one (user, template) dispatch.
/// A unique-constraint violation means this communication already went out.
pub async fn insert_comm_log(
    conn: &Connection,
    user_id: Uuid,
    template_id: Uuid,
    trigger: TriggerEvent,
) -> Result<Uuid, DatabaseError> {
    let id = Uuid::new_v4();
    conn.execute(
        "INSERT INTO communication_log (id, user_id, template_id, trigger_event, status, created_at) \
         VALUES (?1, ?2, ?3, ?4, 'PENDING', ?5)",
        params![
            id.to_string(),
            user_id.to_string(),
            template_id.to_string(),
            trigger.as_str(),
            Utc::now().to_rfc3339(),
        ],
    )
    .await
    .map_err(|e| DatabaseError::from_write("insert_comm_log", e))?;
    Ok(id)
}

pub async fn set_comm_log_status(
    conn: &Connection,
    log_id: Uuid,
    status: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE communication_log SET status = ?1 WHERE id = ?2",
        params![status, log_id.to_string()],
    )
    .await
    .map_err(|e| DatabaseError::from_write("set_comm_log_status", e))?;
    Ok(())
}
