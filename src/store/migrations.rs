//! Version-tracked database migrations.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "initial_schema",
    sql: r#"
        CREATE TABLE IF NOT EXISTS clusters (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            country TEXT NOT NULL,
            UNIQUE(name, country)
        );

        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            cluster_id TEXT NOT NULL REFERENCES clusters(id),
            full_name TEXT NOT NULL,
            personal_email TEXT NOT NULL UNIQUE,
            corporate_email TEXT,
            phone_number TEXT,
            position TEXT,
            status TEXT NOT NULL DEFAULT 'PRE_HIRE',
            sso_authenticated_at TEXT,
            tags TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_users_cluster ON users(cluster_id);
        CREATE INDEX IF NOT EXISTS idx_users_status ON users(status);

        CREATE TABLE IF NOT EXISTS access_provisioning (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            system_name TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'REQUESTED',
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_provisioning_user_system
            ON access_provisioning(user_id, system_name);

        CREATE TABLE IF NOT EXISTS journey_templates (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            version INTEGER NOT NULL DEFAULT 1,
            is_active INTEGER NOT NULL DEFAULT 1,
            applicability TEXT,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_templates_active ON journey_templates(is_active);

        CREATE TABLE IF NOT EXISTS template_steps (
            id TEXT PRIMARY KEY,
            journey_template_id TEXT NOT NULL REFERENCES journey_templates(id) ON DELETE CASCADE,
            order_index INTEGER NOT NULL,
            title TEXT NOT NULL,
            description TEXT,
            step_type TEXT NOT NULL,
            conditions TEXT,
            content_payload TEXT,
            requires_corporate_email INTEGER NOT NULL DEFAULT 0,
            is_optional INTEGER NOT NULL DEFAULT 0,
            estimated_minutes INTEGER,
            icon_name TEXT,
            UNIQUE(journey_template_id, order_index)
        );

        CREATE TABLE IF NOT EXISTS user_journeys (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            journey_template_id TEXT NOT NULL REFERENCES journey_templates(id),
            compiled_from_version INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'IN_PROGRESS',
            progress_percentage INTEGER NOT NULL DEFAULT 0,
            completed_at TEXT,
            created_at TEXT NOT NULL,
            UNIQUE(user_id, journey_template_id)
        );
        CREATE INDEX IF NOT EXISTS idx_journeys_user ON user_journeys(user_id);

        CREATE TABLE IF NOT EXISTS user_journey_steps (
            id TEXT PRIMARY KEY,
            user_journey_id TEXT NOT NULL REFERENCES user_journeys(id) ON DELETE CASCADE,
            template_step_id TEXT NOT NULL REFERENCES template_steps(id),
            resolved_order INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'LOCKED',
            completed_at TEXT,
            checklist_state TEXT NOT NULL DEFAULT '{}',
            last_nudged_at TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_journey_steps_journey
            ON user_journey_steps(user_journey_id);
        CREATE INDEX IF NOT EXISTS idx_journey_steps_status
            ON user_journey_steps(status);

        CREATE TABLE IF NOT EXISTS communication_templates (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            trigger_event TEXT NOT NULL,
            channel TEXT NOT NULL,
            subject TEXT,
            body_content TEXT NOT NULL,
            conditions TEXT,
            is_active INTEGER NOT NULL DEFAULT 1
        );
        CREATE INDEX IF NOT EXISTS idx_comm_templates_trigger
            ON communication_templates(trigger_event);

        CREATE TABLE IF NOT EXISTS communication_log (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            template_id TEXT NOT NULL,
            trigger_event TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'PENDING',
            created_at TEXT NOT NULL,
            UNIQUE(user_id, template_id)
        );
    "#,
}];

/// Run all pending migrations against the given connection.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > current_version) {
        conn.execute_batch(migration.sql).await.map_err(|e| {
            DatabaseError::Migration(format!(
                "Migration v{} ({}) failed: {e}",
                migration.version, migration.name
            ))
        })?;
        conn.execute(
            "INSERT INTO _migrations (version, name) VALUES (?1, ?2)",
            libsql::params![migration.version, migration.name],
        )
        .await
        .map_err(|e| {
            DatabaseError::Migration(format!(
                "Failed to record migration v{}: {e}",
                migration.version
            ))
        })?;
        tracing::info!(version = migration.version, name = migration.name, "Migration applied");
    }

    Ok(())
}

async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;
    match rows.next().await {
        Ok(Some(row)) => row
            .get::<i64>(0)
            .map_err(|e| DatabaseError::Migration(format!("Bad migration version row: {e}"))),
        Ok(None) => Ok(0),
        Err(e) => Err(DatabaseError::Migration(format!(
            "Failed to read migration version: {e}"
        ))),
    }
}
