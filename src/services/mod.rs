//! Export services.
//!
//! This module contains the pipeline: the Bitbucket client and its
//! credentials, payload conversion, the state store, the sinks and the
//! engine that ties them together.

pub mod bitbucket_client;
pub mod bitbucket_types;
pub mod convert;
pub mod credentials;
pub mod export_engine;
pub mod fan_out;
pub mod markdown;
pub mod sink;
pub mod state;
pub mod validate;

pub use bitbucket_client::{BitbucketClient, BitbucketClientConfig, PageStream};
pub use credentials::{Credentials, OAuthTokenEndpoint, TokenRefresher};
pub use export_engine::{ExportEngine, ExportSummary};
pub use sink::{JsonLinesSink, MemorySink, Sink};
pub use state::{MemoryStateStore, RunState, SqliteStateStore, StateStore};
pub use validate::validate_accounts;
