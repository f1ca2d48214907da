//! Database handle — libSQL connection wrapper.

use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

use libsql::{Connection, Database as LibSqlDatabase, Transaction};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::info;

use crate::error::DatabaseError;
use crate::store::migrations;

/// Shared database handle.
///
/// One connection serves every caller, guarded by an async `Mutex`: a
/// workflow transaction owns the connection for its whole span, and a
/// plain read or write takes the lock per call. Concurrent workflows
/// queue instead of failing, and a standalone write can never land
/// inside another workflow's open transaction.
pub struct Store {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Arc<Mutex<Connection>>,
}

/// A workflow transaction holding the connection lock.
///
/// Dropping it without `commit()` rolls back and releases the lock, so
/// `?` inside a workflow aborts the whole unit.
pub struct StoreTransaction {
    // Field order matters: the transaction must roll back before the
    // lock is released.
    tx: Transaction,
    _conn: OwnedMutexGuard<Connection>,
}

impl StoreTransaction {
    pub async fn commit(self) -> libsql::Result<()> {
        self.tx.commit().await
    }
}

impl Deref for StoreTransaction {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.tx
    }
}

impl Store {
    /// Open (or create) a local database file and run migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Open(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Open(format!("Failed to open database: {e}")))?;
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Open(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;

        info!(path = %path.display(), "Database opened");
        Ok(Self {
            db: Arc::new(db),
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory database (for tests).
    pub async fn open_in_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| DatabaseError::Open(format!("Failed to create in-memory database: {e}")))?;
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Open(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;

        Ok(Self {
            db: Arc::new(db),
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Lock the connection for one operation.
    pub async fn conn(&self) -> OwnedMutexGuard<Connection> {
        Arc::clone(&self.conn).lock_owned().await
    }

    /// Begin a transaction. Concurrent workflows queue on the
    /// connection lock rather than erroring.
    pub async fn begin(&self) -> Result<StoreTransaction, DatabaseError> {
        let conn = Arc::clone(&self.conn).lock_owned().await;
        let tx = conn
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("begin transaction: {e}")))?;
        Ok(StoreTransaction { tx, _conn: conn })
    }
}
