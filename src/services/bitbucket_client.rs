//! Bitbucket API client.
//!
//! Provides the HTTP client for the Bitbucket 2.0 API with per-request
//! authorization, one-shot token refresh and cursor pagination.

use crate::error::AppError;
use crate::services::bitbucket_types::{
    PageEnvelope, RawCurrentUser, RawWebhook, RawWorkspace, WebhookPayload,
};
use crate::services::credentials::Credentials;
use chrono::{DateTime, Utc};
use reqwest::{header, Client, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Public Bitbucket Cloud API root.
pub const DEFAULT_BASE_URL: &str = "https://api.bitbucket.org/2.0";

/// Page size used for pull request listings and their sub-resources.
pub const PULL_REQUEST_PAGE_LEN: &str = "50";

/// Page size used for scope and repository listings.
pub const SCOPE_PAGE_LEN: &str = "100";

/// Query string pairs sent with a list request.
pub type QueryParams = Vec<(String, String)>;

/// Bitbucket API client configuration.
#[derive(Debug, Clone)]
pub struct BitbucketClientConfig {
    /// API root, e.g. `https://api.bitbucket.org/2.0`.
    pub base_url: String,

    /// Integration kind passed to the token refresher.
    pub ref_type: String,

    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for BitbucketClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            ref_type: "bitbucket".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Bitbucket API client.
///
/// Cheap to clone; clones share the HTTP connection pool and credentials.
#[derive(Debug, Clone)]
pub struct BitbucketClient {
    client: Client,
    config: BitbucketClientConfig,
    credentials: Credentials,
}

/// Lazy sequence of raw page batches from one list request.
///
/// Pages are produced by a background task into a single-slot channel, so at
/// most one unconsumed page is buffered. The producer's outcome is reported by
/// [`PageStream::finish`], never through the page sequence itself.
pub struct PageStream {
    endpoint: String,
    pages: mpsc::Receiver<Vec<serde_json::Value>>,
    producer: JoinHandle<Result<usize, AppError>>,
}

impl PageStream {
    /// Next page batch, or `None` once the producer has stopped.
    pub async fn next_page(&mut self) -> Option<Vec<serde_json::Value>> {
        self.pages.recv().await
    }

    /// Wait for the producer and return the number of records it fetched.
    pub async fn finish(self) -> Result<usize, AppError> {
        drop(self.pages);
        self.producer.await.map_err(|e| {
            AppError::internal(format!("Pagination task for {} failed: {}", self.endpoint, e))
        })?
    }

    /// Drain every page, decoding each record as `T`.
    pub async fn collect_all<T: DeserializeOwned>(mut self, entity: &str) -> Result<Vec<T>, AppError> {
        let mut all = Vec::new();
        while let Some(batch) = self.next_page().await {
            all.extend(decode_batch::<T>(entity, batch)?);
        }
        self.finish().await?;
        Ok(all)
    }
}

/// Decode a raw page batch into typed records.
///
/// A single malformed record fails the whole batch.
pub fn decode_batch<T: DeserializeOwned>(
    entity: &str,
    batch: Vec<serde_json::Value>,
) -> Result<Vec<T>, AppError> {
    batch
        .into_iter()
        .map(|value| {
            serde_json::from_value(value).map_err(|e| AppError::conversion(entity, e.to_string()))
        })
        .collect()
}

/// Extract the `page` cursor from a next-page link.
pub fn next_cursor(next: &str, endpoint: &str) -> Result<String, AppError> {
    let url = Url::parse(next).map_err(|e| {
        AppError::protocol(format!("malformed next link {:?}: {}", next, e), endpoint)
    })?;

    url.query_pairs()
        .find(|(key, _)| key == "page")
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::protocol(format!("no `page` in next link {:?}", next), endpoint))
}

/// Replace or append a query parameter.
fn set_param(params: &mut QueryParams, key: &str, value: String) {
    match params.iter_mut().find(|(k, _)| k == key) {
        Some(entry) => entry.1 = value,
        None => params.push((key.to_string(), value)),
    }
}

/// Encode each segment of a `scope/name` style path.
pub fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Add the `updated_on` filter (when a watermark is given) and the
/// newest-first sort.
fn push_updated_filter(params: &mut QueryParams, updated_after: Option<&DateTime<Utc>>) {
    if let Some(since) = updated_after {
        params.push((
            "q".to_string(),
            format!("updated_on > {}", format_filter_time(since)),
        ));
    }
    params.push(("sort".to_string(), "-updated_on".to_string()));
}

/// Format a watermark the way the `q` filter expects it.
pub fn format_filter_time(time: &DateTime<Utc>) -> String {
    time.format("%Y-%m-%dT%H:%M:%S%.6f%:z").to_string()
}

impl BitbucketClient {
    /// Create a new Bitbucket client.
    pub fn new(config: BitbucketClientConfig, credentials: Credentials) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config,
            credentials,
        })
    }

    pub fn ref_type(&self) -> &str {
        &self.config.ref_type
    }

    /// Get the full URL for an endpoint relative to the API root.
    fn api_url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }

    /// Send a request with the current authorization header.
    ///
    /// A 401 triggers at most one refresh and one retry of the same request.
    /// Basic credentials cannot refresh, so their 401 is final.
    async fn send_authorized<F>(&self, build: F, endpoint: &str) -> Result<Response, AppError>
    where
        F: Fn() -> RequestBuilder,
    {
        let auth = self.credentials.authorization_header();
        let response = build().header(header::AUTHORIZATION, &auth).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        match &self.credentials {
            Credentials::Basic(_) => {
                log::warn!("[client] credentials rejected for {}", endpoint);
                Err(AppError::authentication("Bitbucket rejected the configured credentials"))
            }
            Credentials::OAuth(oauth) => {
                log::debug!("[client] 401 from {}, refreshing token", endpoint);
                oauth.refresh(&self.config.ref_type, &auth).await?;

                let retry = build()
                    .header(header::AUTHORIZATION, oauth.authorization_header())
                    .send()
                    .await?;
                if retry.status() == StatusCode::UNAUTHORIZED {
                    log::error!("[client] refreshed token rejected for {}", endpoint);
                    return Err(AppError::authentication_expired(
                        "Bitbucket rejected the refreshed access token",
                    ));
                }
                Ok(retry)
            }
        }
    }

    /// Handle API response errors.
    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: Response,
        endpoint: &str,
    ) -> Result<T, AppError> {
        let status = response.status();

        if status.is_success() {
            let body = response.bytes().await?;
            serde_json::from_slice::<T>(&body).map_err(|e| {
                AppError::conversion(endpoint, format!("Failed to parse response: {}", e))
            })
        } else {
            let status_code = status.as_u16();
            let body = response.text().await.unwrap_or_default();
            // Bitbucket returns errors as {"type": "error", "error": {"message": "..."}}
            let body_message = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| {
                    v.pointer("/error/message")
                        .and_then(|m| m.as_str())
                        .map(str::to_string)
                });

            let message = match (status, &body_message) {
                (StatusCode::FORBIDDEN, _) => "Access denied".to_string(),
                (StatusCode::NOT_FOUND, _) => "Resource not found".to_string(),
                (StatusCode::TOO_MANY_REQUESTS, _) => "Rate limit exceeded".to_string(),
                (_, Some(msg)) => msg.clone(),
                _ => format!("Request failed ({}): {}", status_code, body),
            };

            Err(AppError::api_full(message, status_code, endpoint))
        }
    }

    /// GET an endpoint and decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(String, String)],
    ) -> Result<T, AppError> {
        let url = self.api_url(endpoint);
        let response = self
            .send_authorized(|| self.client.get(&url).query(params), endpoint)
            .await?;
        self.handle_response(response, endpoint).await
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<T, AppError> {
        let url = self.api_url(endpoint);
        let response = self
            .send_authorized(|| self.client.post(&url).json(body), endpoint)
            .await?;
        self.handle_response(response, endpoint).await
    }

    /// Start a paginated listing.
    ///
    /// The first request uses `params` as given; each following request
    /// substitutes the `page` cursor taken from the previous page's `next`
    /// link. Listing stops when a page has no `next`.
    pub fn list(&self, endpoint: &str, params: QueryParams) -> PageStream {
        let (tx, rx) = mpsc::channel(1);
        let client = self.clone();
        let task_endpoint = endpoint.to_string();

        let producer = tokio::spawn(async move {
            let endpoint = task_endpoint;
            let mut params = params;
            let mut total = 0usize;

            loop {
                let page: PageEnvelope = client.get_json(&endpoint, &params).await?;
                total += page.values.len();

                if !page.values.is_empty() && tx.send(page.values).await.is_err() {
                    log::debug!("[client] consumer of {} went away, stopping", endpoint);
                    return Ok(total);
                }

                match page.next.as_deref() {
                    None | Some("") => break,
                    Some(next) => {
                        let cursor = next_cursor(next, &endpoint)?;
                        set_param(&mut params, "page", cursor);
                    }
                }
            }

            log::debug!("[client] listed {} records from {}", total, endpoint);
            Ok(total)
        });

        PageStream {
            endpoint: endpoint.to_string(),
            pages: rx,
            producer,
        }
    }

    /// Total number of records a listing would return, from a single
    /// one-record page.
    pub async fn count(&self, endpoint: &str, params: QueryParams) -> Result<i64, AppError> {
        let mut params = params;
        set_param(&mut params, "pagelen", "1".to_string());

        let page: PageEnvelope = self.get_json(endpoint, &params).await?;
        page.size
            .ok_or_else(|| AppError::protocol("count response has no `size`", endpoint))
    }

    /// The account the credentials belong to.
    pub async fn current_user(&self) -> Result<RawCurrentUser, AppError> {
        self.get_json("user", &[]).await
    }

    /// Scopes the authenticated account is a member of.
    pub fn list_workspaces(&self) -> PageStream {
        self.list(
            "workspaces",
            vec![
                ("pagelen".to_string(), SCOPE_PAGE_LEN.to_string()),
                ("role".to_string(), "member".to_string()),
            ],
        )
    }

    pub async fn all_workspaces(&self) -> Result<Vec<RawWorkspace>, AppError> {
        self.list_workspaces().collect_all("workspace").await
    }

    pub fn list_repositories(&self, scope: &str) -> PageStream {
        self.list(
            &format!("repositories/{}", encode_path(scope)),
            vec![("pagelen".to_string(), SCOPE_PAGE_LEN.to_string())],
        )
    }

    pub async fn count_repositories(&self, scope: &str) -> Result<i64, AppError> {
        self.count(&format!("repositories/{}", encode_path(scope)), Vec::new())
            .await
    }

    pub fn list_workspace_members(&self, scope: &str) -> PageStream {
        self.list(
            &format!("workspaces/{}/members", encode_path(scope)),
            vec![("pagelen".to_string(), SCOPE_PAGE_LEN.to_string())],
        )
    }

    /// Open, merged and superseded pull requests, newest update first.
    ///
    /// With a watermark only pull requests updated after it are listed.
    pub fn list_pull_requests(
        &self,
        repo_full_name: &str,
        updated_after: Option<&DateTime<Utc>>,
    ) -> PageStream {
        let mut params: QueryParams = ["MERGED", "SUPERSEDED", "OPEN"]
            .iter()
            .map(|state| ("state".to_string(), state.to_string()))
            .collect();
        push_updated_filter(&mut params, updated_after);
        params.push(("pagelen".to_string(), PULL_REQUEST_PAGE_LEN.to_string()));

        self.list(
            &format!("repositories/{}/pullrequests", encode_path(repo_full_name)),
            params,
        )
    }

    /// Comments of a pull request, newest update first. With a watermark only
    /// comments updated after it are listed.
    pub fn list_pull_request_comments(
        &self,
        repo_full_name: &str,
        pr_id: i64,
        updated_after: Option<&DateTime<Utc>>,
    ) -> PageStream {
        let mut params = QueryParams::new();
        push_updated_filter(&mut params, updated_after);
        params.push(("pagelen".to_string(), PULL_REQUEST_PAGE_LEN.to_string()));

        self.list(
            &format!(
                "repositories/{}/pullrequests/{}/comments",
                encode_path(repo_full_name),
                pr_id
            ),
            params,
        )
    }

    pub fn list_pull_request_commits(&self, repo_full_name: &str, pr_id: i64) -> PageStream {
        self.list(
            &format!(
                "repositories/{}/pullrequests/{}/commits",
                encode_path(repo_full_name),
                pr_id
            ),
            vec![("pagelen".to_string(), PULL_REQUEST_PAGE_LEN.to_string())],
        )
    }

    /// Register a notification hook on a repository.
    pub async fn create_webhook(
        &self,
        repo_full_name: &str,
        url: &str,
        description: &str,
        events: &[&str],
    ) -> Result<RawWebhook, AppError> {
        let payload = WebhookPayload {
            description: description.to_string(),
            url: url.to_string(),
            active: true,
            events: events.iter().map(|e| e.to_string()).collect(),
        };

        let endpoint = format!("repositories/{}/hooks", encode_path(repo_full_name));
        let hook: RawWebhook = self.post_json(&endpoint, &payload).await?;
        log::info!("[client] created hook {} on {}", hook.uuid, repo_full_name);
        Ok(hook)
    }
}
