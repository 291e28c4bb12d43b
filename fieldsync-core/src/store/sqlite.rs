use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::Path;
use std::str::FromStr;

use super::{OperationStore, StoreError};
use crate::operation::{Operation, OperationId, OperationKind, OperationState};

#[derive(sqlx::FromRow)]
struct OperationRow {
    id: String,
    kind: String,
    resource: String,
    payload: String,
    enqueued_at: String,
    retry_count: i64,
    last_error: Option<String>,
    state: String,
}

impl OperationRow {
    fn into_operation(self) -> Result<Operation, StoreError> {
        let corrupt = |e: String| StoreError::Corrupt(self.id.clone(), e);

        let id = OperationId::from_str(&self.id).map_err(|e| corrupt(e.to_string()))?;
        let kind = OperationKind::from_str(&self.kind).map_err(|e| corrupt(e.to_string()))?;
        let state = OperationState::from_str(&self.state).map_err(|e| corrupt(e.to_string()))?;
        let payload = serde_json::from_str(&self.payload).map_err(|e| corrupt(e.to_string()))?;
        let enqueued_at = DateTime::parse_from_rfc3339(&self.enqueued_at)
            .map_err(|e| corrupt(e.to_string()))?
            .with_timezone(&Utc);
        let retry_count = u32::try_from(self.retry_count)
            .map_err(|_| corrupt(format!("negative retry count {}", self.retry_count)))?;

        Ok(Operation {
            id,
            kind,
            resource: self.resource,
            payload,
            enqueued_at,
            retry_count,
            last_error: self.last_error,
            state,
        })
    }
}

/// Fixed-width timestamps so that text ordering matches time ordering.
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// SQLite-backed operation store.
///
/// Uses WAL journaling with `synchronous = FULL`, so a write that returned
/// successfully survives a crash or power loss.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `path` and runs migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Io(parent.to_path_buf(), e))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Self::from_pool(pool).await
    }

    /// Wraps an existing pool, running migrations on it.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl OperationStore for SqliteStore {
    async fn load_all(&self) -> Result<Vec<Operation>, StoreError> {
        let rows: Vec<OperationRow> =
            sqlx::query_as("SELECT * FROM operations ORDER BY enqueued_at, rowid")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(OperationRow::into_operation).collect()
    }

    async fn get(&self, id: &OperationId) -> Result<Option<Operation>, StoreError> {
        let row: Option<OperationRow> = sqlx::query_as("SELECT * FROM operations WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(OperationRow::into_operation).transpose()
    }

    async fn put(&self, op: &Operation) -> Result<(), StoreError> {
        let payload = serde_json::to_string(&op.payload)
            .map_err(|e| StoreError::Serialization(op.id, e))?;

        sqlx::query(
            r#"
            INSERT INTO operations (id, kind, resource, payload, enqueued_at, retry_count, last_error, state)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                kind = excluded.kind,
                resource = excluded.resource,
                payload = excluded.payload,
                enqueued_at = excluded.enqueued_at,
                retry_count = excluded.retry_count,
                last_error = excluded.last_error,
                state = excluded.state
            "#,
        )
        .bind(op.id.to_string())
        .bind(op.kind.as_str())
        .bind(&op.resource)
        .bind(&payload)
        .bind(format_timestamp(&op.enqueued_at))
        .bind(i64::from(op.retry_count))
        .bind(&op.last_error)
        .bind(op.state.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, id: &OperationId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM operations WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM operations")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
