//! Incremental export engine.
//!
//! One run:
//! 1. Reads the watermark (unless historical) and notes the run start time
//! 2. Discovers scopes and walks their repositories one at a time
//! 3. Per pull request page: fans out comment and commit listings, then emits
//!    the pull requests once every listing of the page has finished
//! 4. Streams records through one bounded channel per kind into the sink
//! 5. Flushes the sink, then commits the run start time as the new watermark,
//!    only on success

use crate::config::{AuthConfig, ExportConfig};
use crate::error::AppError;
use crate::models::{PullRequestStatus, Record, RecordKind};
use crate::services::bitbucket_client::{decode_batch, BitbucketClient, BitbucketClientConfig};
use crate::services::bitbucket_types::{
    RawComment, RawCommit, RawMember, RawPullRequest, RawRepository,
};
use crate::services::convert::{
    convert_comment, convert_commit, convert_pull_request, convert_repo, convert_user,
    derive_reviews, normalize_date, ConvertContext,
};
use crate::services::credentials::{Credentials, TokenRefresher};
use crate::services::fan_out::{BoundedFanOut, PR_FETCH_CONCURRENCY};
use crate::services::sink::Sink;
use crate::services::state::{RunState, StateStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Records buffered per output channel before producers wait on the sink.
const OUTPUT_CHANNEL_CAPACITY: usize = 64;

const ALL_KINDS: [RecordKind; 7] = [
    RecordKind::Repo,
    RecordKind::User,
    RecordKind::PullRequest,
    RecordKind::PullRequestComment,
    RecordKind::PullRequestCommit,
    RecordKind::PullRequestReview,
    RecordKind::PullRequestReviewRequest,
];

/// Outcome of a successful run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExportSummary {
    pub repos: usize,
    pub users: usize,
    pub pull_requests: usize,
    pub comments: usize,
    pub commits: usize,
    pub reviews: usize,
    pub review_requests: usize,

    /// Watermark the run filtered on; `None` for a full export.
    pub watermark_used: Option<DateTime<Utc>>,

    /// Watermark stored for the next run.
    pub watermark_committed: Option<DateTime<Utc>>,

    pub duration_ms: u64,
}

impl ExportSummary {
    /// Number of records emitted for a kind.
    pub fn count(&self, kind: RecordKind) -> usize {
        match kind {
            RecordKind::Repo => self.repos,
            RecordKind::User => self.users,
            RecordKind::PullRequest => self.pull_requests,
            RecordKind::PullRequestComment => self.comments,
            RecordKind::PullRequestCommit => self.commits,
            RecordKind::PullRequestReview => self.reviews,
            RecordKind::PullRequestReviewRequest => self.review_requests,
        }
    }

    fn set_count(&mut self, kind: RecordKind, count: usize) {
        let slot = match kind {
            RecordKind::Repo => &mut self.repos,
            RecordKind::User => &mut self.users,
            RecordKind::PullRequest => &mut self.pull_requests,
            RecordKind::PullRequestComment => &mut self.comments,
            RecordKind::PullRequestCommit => &mut self.commits,
            RecordKind::PullRequestReview => &mut self.reviews,
            RecordKind::PullRequestReviewRequest => &mut self.review_requests,
        };
        *slot = count;
    }
}

/// Senders of the per-kind output channels.
#[derive(Clone)]
struct Outputs {
    senders: Arc<HashMap<RecordKind, mpsc::Sender<Record>>>,
}

impl Outputs {
    async fn send(&self, record: impl Into<Record>) -> Result<(), AppError> {
        let record = record.into();
        let kind = record.kind();
        let sender = self
            .senders
            .get(&kind)
            .ok_or_else(|| AppError::internal(format!("No output channel for {}", kind)))?;

        sender
            .send(record)
            .await
            .map_err(|_| AppError::sink(format!("Output channel for {} closed", kind)))
    }
}

/// Forward one channel into the sink, counting records.
///
/// The first sink error is reported on `errors` and stops this forwarder;
/// dropping its receiver makes every later send to the channel fail.
fn spawn_forwarder(
    kind: RecordKind,
    mut records: mpsc::Receiver<Record>,
    sink: Arc<dyn Sink>,
    errors: mpsc::Sender<AppError>,
) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let mut count = 0usize;
        while let Some(record) = records.recv().await {
            let id = record.id().to_string();
            if let Err(e) = sink.write(record).await {
                log::error!("[export] sink rejected {} {}: {}", kind, id, e);
                // only the first error is kept
                let _ = errors.try_send(e);
                return count;
            }
            count += 1;
        }
        log::info!("[export] finished sending {} {}", count, kind);
        count
    })
}

/// Everything a pull request sub-fetch task needs, cloned per task.
#[derive(Clone)]
struct RepoTask {
    client: BitbucketClient,
    ctx: ConvertContext,
    state: RunState,
    outputs: Outputs,
    full_name: String,
    repo_ref_id: String,
}

impl RepoTask {
    /// List comments updated after the watermark, if any.
    async fn fetch_comments(
        self,
        pr_id: i64,
        watermark: Option<DateTime<Utc>>,
    ) -> Result<(), AppError> {
        let pr_ref_id = pr_id.to_string();
        let mut pages =
            self.client
                .list_pull_request_comments(&self.full_name, pr_id, watermark.as_ref());

        while let Some(batch) = pages.next_page().await {
            for raw in decode_batch::<RawComment>("pull request comment", batch)? {
                let comment = convert_comment(&self.ctx, &raw, &self.repo_ref_id, &pr_ref_id);
                self.outputs.send(comment).await?;
            }
        }
        pages.finish().await?;
        Ok(())
    }

    /// List commits, recording the first hash seen as the pull request's
    /// first commit. Never watermark-filtered, or the first commit could be
    /// missed.
    async fn fetch_commits(self, pr_id: i64) -> Result<(), AppError> {
        let pr_ref_id = pr_id.to_string();
        let mut pages = self.client.list_pull_request_commits(&self.full_name, pr_id);
        let mut first_recorded = false;

        while let Some(batch) = pages.next_page().await {
            for raw in decode_batch::<RawCommit>("pull request commit", batch)? {
                if !first_recorded {
                    self.state
                        .set_first_commit_sha(&self.repo_ref_id, &pr_ref_id, &raw.hash)
                        .await?;
                    first_recorded = true;
                }
                let commit = convert_commit(&self.ctx, &raw, &self.repo_ref_id, &pr_ref_id);
                self.outputs.send(commit).await?;
            }
        }
        pages.finish().await?;
        Ok(())
    }
}

/// Whether a pull request is newer than the watermark.
///
/// Without a watermark everything is new. A pull request without an update
/// time is never newer than a watermark.
pub fn updated_after(updated_on: Option<DateTime<Utc>>, watermark: Option<DateTime<Utc>>) -> bool {
    match watermark {
        None => true,
        Some(watermark) => normalize_date(updated_on).is_some_and(|updated| updated > watermark),
    }
}

/// Incremental export engine.
pub struct ExportEngine {
    client: BitbucketClient,
    state: RunState,
    sink: Arc<dyn Sink>,
    config: ExportConfig,
    ctx: ConvertContext,
}

impl ExportEngine {
    pub fn new(
        config: ExportConfig,
        client: BitbucketClient,
        store: Arc<dyn StateStore>,
        sink: Arc<dyn Sink>,
    ) -> Self {
        let ctx = ConvertContext::new(config.customer_id.clone(), config.ref_type.clone());
        Self {
            client,
            state: RunState::new(store),
            sink,
            config,
            ctx,
        }
    }

    /// Build an engine and its client from configuration.
    ///
    /// OAuth2 configurations need a refresher for the one-shot refresh on 401.
    pub fn from_config(
        config: ExportConfig,
        store: Arc<dyn StateStore>,
        sink: Arc<dyn Sink>,
        refresher: Option<Arc<dyn TokenRefresher>>,
    ) -> Result<Self, AppError> {
        config.validate()?;

        let credentials = match (&config.auth, refresher) {
            (AuthConfig::Basic { username, password }, _) => Credentials::basic(username, password),
            (
                AuthConfig::OAuth2 {
                    access_token,
                    refresh_token,
                },
                Some(refresher),
            ) => Credentials::oauth(access_token.clone(), refresh_token.clone(), refresher),
            (AuthConfig::OAuth2 { .. }, None) => {
                return Err(AppError::invalid_input_field(
                    "oauth2 auth needs a token refresher",
                    "auth",
                ));
            }
        };

        let client = BitbucketClient::new(
            BitbucketClientConfig {
                base_url: config.base_url.clone(),
                ref_type: config.ref_type.clone(),
                timeout_secs: config.timeout_secs,
            },
            credentials,
        )?;

        Ok(Self::new(config, client, store, sink))
    }

    /// Run one export.
    ///
    /// Any error aborts the run and leaves the stored watermark untouched.
    pub async fn run_export(&self) -> Result<ExportSummary, AppError> {
        let started_at = Utc::now();
        let clock = Instant::now();

        let watermark = if self.config.historical {
            None
        } else {
            self.state.watermark().await?
        };
        log::info!(
            "[export] starting {} export for customer {}",
            if watermark.is_some() { "incremental" } else { "historical" },
            self.config.customer_id
        );
        if let Some(watermark) = watermark {
            log::debug!("[export] exporting changes after {}", watermark);
        }

        let (errors_tx, mut errors) = mpsc::channel::<AppError>(1);
        let mut senders = HashMap::new();
        let mut forwarders = Vec::with_capacity(ALL_KINDS.len());
        for kind in ALL_KINDS {
            let (tx, rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
            senders.insert(kind, tx);
            forwarders.push((
                kind,
                spawn_forwarder(kind, rx, Arc::clone(&self.sink), errors_tx.clone()),
            ));
        }
        drop(errors_tx);
        let outputs = Outputs {
            senders: Arc::new(senders),
        };

        let extracted = self.extract(&outputs, watermark, &mut errors).await;
        drop(outputs);

        if let Err(e) = extracted {
            // a sink failure closes channels, so prefer its error over the
            // "channel closed" error the producer saw
            let e = errors.try_recv().unwrap_or(e);
            log::error!("[export] export failed: {}", e);
            return Err(e);
        }

        let mut summary = ExportSummary {
            watermark_used: watermark,
            ..Default::default()
        };
        for (kind, forwarder) in forwarders {
            let count = forwarder
                .await
                .map_err(|e| AppError::internal(format!("Forwarder for {} failed: {}", kind, e)))?;
            summary.set_count(kind, count);
        }

        if let Ok(e) = errors.try_recv() {
            log::error!("[export] export failed: {}", e);
            return Err(e);
        }

        if let Err(e) = self.sink.flush().await {
            log::error!("[export] export failed: {}", e);
            return Err(e);
        }
        self.state.set_watermark(started_at).await?;
        summary.watermark_committed = Some(started_at);
        summary.duration_ms = clock.elapsed().as_millis() as u64;

        log::info!(
            "[export] finished in {}ms: {} repos, {} users, {} pull requests, {} comments, {} commits, {} reviews, {} review requests",
            summary.duration_ms,
            summary.repos,
            summary.users,
            summary.pull_requests,
            summary.comments,
            summary.commits,
            summary.reviews,
            summary.review_requests
        );

        Ok(summary)
    }

    async fn extract(
        &self,
        outputs: &Outputs,
        watermark: Option<DateTime<Utc>>,
        errors: &mut mpsc::Receiver<AppError>,
    ) -> Result<(), AppError> {
        let mut scopes: Vec<String> = self
            .client
            .all_workspaces()
            .await?
            .into_iter()
            .map(|w| w.slug)
            .collect();
        // not deduplicated; records are id-keyed downstream
        scopes.extend(self.config.accounts.iter().cloned());
        log::debug!("[export] {} scope(s) to export", scopes.len());

        for scope in &scopes {
            check_aborted(errors)?;
            self.export_scope(scope, outputs, watermark, errors).await?;
        }

        Ok(())
    }

    async fn export_scope(
        &self,
        scope: &str,
        outputs: &Outputs,
        watermark: Option<DateTime<Utc>>,
        errors: &mut mpsc::Receiver<AppError>,
    ) -> Result<(), AppError> {
        log::debug!("[export] exporting scope {}", scope);

        let mut repos = self.client.list_repositories(scope);
        while let Some(batch) = repos.next_page().await {
            for raw in decode_batch::<RawRepository>("repository", batch)? {
                if !self.config.includes_repo(scope, &raw.full_name) {
                    log::debug!("[export] skipping filtered repository {}", raw.full_name);
                    continue;
                }
                check_aborted(errors)?;

                outputs.send(convert_repo(&self.ctx, &raw)).await?;
                self.export_pull_requests(&raw, outputs, watermark, errors)
                    .await?;
            }
        }
        repos.finish().await?;

        self.export_users(scope, outputs).await
    }

    async fn export_users(&self, scope: &str, outputs: &Outputs) -> Result<(), AppError> {
        let mut members = self.client.list_workspace_members(scope);
        while let Some(batch) = members.next_page().await {
            for member in decode_batch::<RawMember>("user", batch)? {
                outputs.send(convert_user(&self.ctx, &member.user)).await?;
            }
        }
        members.finish().await?;
        Ok(())
    }

    /// Export the pull requests of one repository, one page at a time.
    async fn export_pull_requests(
        &self,
        repo: &RawRepository,
        outputs: &Outputs,
        watermark: Option<DateTime<Utc>>,
        errors: &mut mpsc::Receiver<AppError>,
    ) -> Result<(), AppError> {
        log::debug!("[export] exporting pull requests of {}", repo.full_name);

        let task = RepoTask {
            client: self.client.clone(),
            ctx: self.ctx.clone(),
            state: self.state.clone(),
            outputs: outputs.clone(),
            full_name: repo.full_name.clone(),
            repo_ref_id: repo.uuid.clone(),
        };

        let mut pages = self
            .client
            .list_pull_requests(&repo.full_name, watermark.as_ref());
        while let Some(batch) = pages.next_page().await {
            check_aborted(errors)?;
            let batch = decode_batch::<RawPullRequest>("pull request", batch)?;
            self.export_pull_request_batch(&task, &batch, watermark).await?;
        }
        pages.finish().await?;
        Ok(())
    }

    /// Two stages per page: sub-fetches for every pull request, a join, then
    /// the pull requests themselves. The join guarantees every first-commit
    /// lookup below sees what the commit listings recorded.
    async fn export_pull_request_batch(
        &self,
        task: &RepoTask,
        batch: &[RawPullRequest],
        watermark: Option<DateTime<Utc>>,
    ) -> Result<(), AppError> {
        let mut group = BoundedFanOut::new(PR_FETCH_CONCURRENCY);
        for pr in batch {
            group.spawn(task.clone().fetch_comments(pr.id, watermark));
            group.spawn(task.clone().fetch_commits(pr.id));

            let (reviews, requests) = derive_reviews(&self.ctx, pr, &task.repo_ref_id);
            for review in reviews {
                task.outputs.send(review).await?;
            }
            for request in requests {
                task.outputs.send(request).await?;
            }
        }
        group.join().await?;

        for pr in batch {
            if !updated_after(pr.updated_on, watermark) {
                log::debug!(
                    "[export] skipping pull request {} of {}, not updated since last run",
                    pr.id,
                    task.full_name
                );
                continue;
            }

            let pr_ref_id = pr.id.to_string();
            let first_sha = self
                .state
                .first_commit_sha(&task.repo_ref_id, &pr_ref_id)
                .await?;
            if first_sha.is_none() {
                log::info!(
                    "[export] no first commit sha found for pull request {} of {}",
                    pr.id,
                    task.full_name
                );
            }

            let record = convert_pull_request(&self.ctx, pr, &task.repo_ref_id, first_sha.as_deref());
            if record.status == PullRequestStatus::Unknown {
                log::warn!(
                    "[export] pull request {} of {} has unknown state {:?}",
                    pr.id,
                    task.full_name,
                    pr.state
                );
            }
            task.outputs.send(record).await?;
        }

        Ok(())
    }
}

/// Fail fast once a forwarder has reported an error.
fn check_aborted(errors: &mut mpsc::Receiver<AppError>) -> Result<(), AppError> {
    match errors.try_recv() {
        Ok(e) => Err(e),
        Err(_) => Ok(()),
    }
}
