//! SQLite storage backing the export state store.
//!
//! The schema version lives in `PRAGMA user_version`; each script in
//! [`MIGRATIONS`] moves it up by one.

pub mod pool;

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    #[error("Cannot prepare state directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("State database is at schema version {found}, newer than this build supports ({supported})")]
    SchemaTooNew { found: i64, supported: i64 },
}

/// Schema scripts in version order. Script `i` upgrades version `i` to `i + 1`.
const MIGRATIONS: &[&str] = &[include_str!("migrations/0001_export_state.sql")];

/// File name of the state database inside a data directory.
pub fn get_db_path(data_dir: &Path) -> PathBuf {
    data_dir.join("bitbucket-export.db")
}

/// Open (creating if needed) the state database and bring its schema up to date.
pub async fn initialize(db_path: &Path) -> Result<pool::DbPool, DbError> {
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| DbError::Directory {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let pool = pool::create_pool(db_path).await?;
    upgrade_schema(&pool).await?;
    Ok(pool)
}

async fn upgrade_schema(pool: &pool::DbPool) -> Result<(), DbError> {
    let supported = MIGRATIONS.len() as i64;
    let (found,): (i64,) = sqlx::query_as("PRAGMA user_version").fetch_one(pool).await?;

    if found > supported {
        return Err(DbError::SchemaTooNew { found, supported });
    }

    for (index, script) in MIGRATIONS.iter().enumerate().skip(found as usize) {
        let version = index as i64 + 1;
        log::debug!("[state] upgrading schema to version {}", version);

        let mut tx = pool.begin().await?;
        sqlx::raw_sql(script).execute(&mut *tx).await?;
        // PRAGMA takes no bind parameters
        sqlx::raw_sql(&format!("PRAGMA user_version = {}", version))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
    }

    Ok(())
}
