//! Cursor and derived-fact state.
//!
//! A [`StateStore`] is a flat string key-value store that outlives a run. The
//! export only uses it through [`RunState`], which owns the key layout:
//! - `updated`: watermark of the last successful run, RFC 3339
//! - `prsha.<repo>.<pr>`: hash of the first commit seen on a pull request

use crate::db::pool::DbPool;
use crate::error::AppError;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Key holding the run watermark.
pub const WATERMARK_KEY: &str = "updated";

/// Durable key-value state.
///
/// Implementations must accept concurrent writes to different keys.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Value for `key`, `None` when it was never set.
    async fn get(&self, key: &str) -> Result<Option<String>, AppError>;

    /// Set `key`, replacing any previous value.
    async fn set(&self, key: &str, value: &str) -> Result<(), AppError>;
}

/// State store backed by the `export_state` table.
///
/// Rows are partitioned by `scope`, normally the customer id, so several
/// customers can share one database file.
#[derive(Debug, Clone)]
pub struct SqliteStateStore {
    pool: DbPool,
    scope: String,
}

impl SqliteStateStore {
    pub fn new(pool: DbPool, scope: impl Into<String>) -> Self {
        Self {
            pool,
            scope: scope.into(),
        }
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM export_state WHERE scope = ? AND key = ?")
                .bind(&self.scope)
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| AppError::state_for_key(e.to_string(), key))?;

        Ok(row.map(|(value,)| value))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO export_state (scope, key, value, updated_at)
            VALUES (?, ?, ?, strftime('%s', 'now'))
            ON CONFLICT(scope, key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&self.scope)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::state_for_key(e.to_string(), key))?;

        Ok(())
    }
}

/// In-memory state store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored key.
    pub async fn snapshot(&self) -> HashMap<String, String> {
        self.values.read().await.clone()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), AppError> {
        self.values
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Key of the first-commit fact for a pull request.
pub fn first_commit_key(repo_id: &str, pr_id: &str) -> String {
    format!("prsha.{}.{}", repo_id, pr_id)
}

/// Typed view over a [`StateStore`] for one run.
#[derive(Clone)]
pub struct RunState {
    store: Arc<dyn StateStore>,
}

impl RunState {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Watermark of the last successful run, `None` before the first one.
    pub async fn watermark(&self) -> Result<Option<DateTime<Utc>>, AppError> {
        let Some(value) = self.store.get(WATERMARK_KEY).await? else {
            return Ok(None);
        };

        DateTime::parse_from_rfc3339(&value)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|e| {
                AppError::state_for_key(format!("Invalid watermark {:?}: {}", value, e), WATERMARK_KEY)
            })
    }

    pub async fn set_watermark(&self, at: DateTime<Utc>) -> Result<(), AppError> {
        let value = at.to_rfc3339_opts(SecondsFormat::AutoSi, true);
        self.store.set(WATERMARK_KEY, &value).await?;
        log::debug!("[state] watermark set to {}", value);
        Ok(())
    }

    /// First commit hash recorded for a pull request.
    pub async fn first_commit_sha(&self, repo_id: &str, pr_id: &str) -> Result<Option<String>, AppError> {
        let value = self.store.get(&first_commit_key(repo_id, pr_id)).await?;
        Ok(value.filter(|sha| !sha.is_empty()))
    }

    pub async fn set_first_commit_sha(&self, repo_id: &str, pr_id: &str, sha: &str) -> Result<(), AppError> {
        self.store.set(&first_commit_key(repo_id, pr_id), sha).await
    }
}
