//! Bitbucket export - incremental extraction of repositories, users and pull
//! requests from the Bitbucket API into a record sink.
//!
//! The host runtime owns configuration loading, the logger and the sink's
//! destination. This library exposes the pipeline:
//!
//! ```no_run
//! # async fn run() -> Result<(), bitbucket_export::error::AppError> {
//! use bitbucket_export::config::ExportConfig;
//! use bitbucket_export::services::{ExportEngine, JsonLinesSink, SqliteStateStore};
//! use std::sync::Arc;
//!
//! let config = ExportConfig::from_json_file("export.json".as_ref())?;
//! let pool = bitbucket_export::db::initialize("state/bitbucket-export.db".as_ref()).await?;
//! let store = Arc::new(SqliteStateStore::new(pool, config.customer_id.clone()));
//! let out = tokio::fs::File::create("export.jsonl")
//!     .await
//!     .map_err(|e| bitbucket_export::error::AppError::sink(e.to_string()))?;
//! let sink = Arc::new(JsonLinesSink::new(out));
//!
//! let summary = ExportEngine::from_config(config, store, sink, None)?
//!     .run_export()
//!     .await?;
//! println!("exported {} pull requests", summary.pull_requests);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;

pub use config::ExportConfig;
pub use error::AppError;
pub use services::{ExportEngine, ExportSummary};
