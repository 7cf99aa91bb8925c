//! End-to-end export runs against a mock Bitbucket API.
//!
//! Each test mounts a small workspace (one scope, one repository, a few pull
//! requests) and drives `ExportEngine::run_export` into an in-memory sink.

use async_trait::async_trait;
use bitbucket_export::config::ExportConfig;
use bitbucket_export::error::AppError;
use bitbucket_export::models::{ids, PullRequestStatus, Record, RecordKind, ReviewState};
use bitbucket_export::services::state::WATERMARK_KEY;
use bitbucket_export::services::{
    ExportEngine, MemorySink, MemoryStateStore, Sink, SqliteStateStore, StateStore,
};
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::tempdir;
use wiremock::matchers::{method, path, path_regex, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

const REPO_UUID: &str = "{repo-widgets}";

fn config(server: &MockServer, extra: &str) -> ExportConfig {
    ExportConfig::from_json_str(&format!(
        r#"{{
            "base_url": "{}",
            "customer_id": "cust-1",
            "auth": {{ "type": "basic", "username": "dev", "password": "secret" }}
            {}
        }}"#,
        server.uri(),
        extra
    ))
    .unwrap()
}

fn page(values: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "values": values }))
}

async fn mount_page(server: &MockServer, at: &str, values: Value) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(page(values))
        .mount(server)
        .await;
}

fn pull_request(id: i64, updated_on: &str) -> Value {
    json!({
        "id": id,
        "title": format!("Change {}", id),
        "description": "Implements the *thing*",
        "state": "OPEN",
        "author": { "uuid": "{author}" },
        "created_on": "2024-03-01T09:00:00+00:00",
        "updated_on": updated_on,
        "source": { "branch": { "name": format!("feature/{}", id) } },
        "participants": []
    })
}

fn merged_pull_request() -> Value {
    json!({
        "id": 1,
        "title": "Add widgets",
        "description": "Adds **widgets**",
        "state": "MERGED",
        "author": { "uuid": "{author}" },
        "closed_by": { "uuid": "{merger}" },
        "created_on": "2024-03-01T09:00:00+00:00",
        "updated_on": "2024-03-02T10:00:00+00:00",
        "source": { "branch": { "name": "feature/widgets" } },
        "merge_commit": { "hash": "m1" },
        "links": { "html": { "href": "https://bitbucket.org/acme/widgets/pull-requests/1" } },
        "participants": [
            { "role": "REVIEWER", "approved": true,
              "participated_on": "2024-03-02T08:00:00+00:00", "user": { "uuid": "{reviewer}" } },
            { "role": "PARTICIPANT", "approved": false, "participated_on": null,
              "user": { "uuid": "{bystander}" } }
        ]
    })
}

fn commit(hash: &str) -> Value {
    json!({
        "hash": hash,
        "message": format!("commit {}", hash),
        "date": "2024-03-01T09:30:00+00:00",
        "author": { "raw": "Dev <dev@example.com>", "user": { "uuid": "{author}" } }
    })
}

/// One scope `acme` with repository `acme/widgets` and one member.
async fn mount_scope(server: &MockServer) {
    mount_page(server, "/workspaces", json!([{ "slug": "acme", "uuid": "{acme}" }])).await;
    mount_page(
        server,
        "/repositories/acme",
        json!([{
            "uuid": REPO_UUID,
            "full_name": "acme/widgets",
            "mainbranch": { "name": "main" },
            "updated_on": "2024-01-01T00:00:00+00:00"
        }]),
    )
    .await;
    mount_page(
        server,
        "/workspaces/acme/members",
        json!([{ "user": { "uuid": "{author}", "display_name": "Dev", "nickname": "dev" } }]),
    )
    .await;
}

/// The merged pull request with two comments and three commits, the commits
/// split over two pages in the order c3, c1, c2.
async fn mount_merged_pull_request(server: &MockServer) {
    mount_page(
        server,
        "/repositories/acme/widgets/pullrequests",
        json!([merged_pull_request()]),
    )
    .await;
    mount_page(
        server,
        "/repositories/acme/widgets/pullrequests/1/comments",
        json!([
            { "id": 101, "content": { "raw": "Looks good" }, "user": { "uuid": "{reviewer}" },
              "created_on": "2024-03-01T11:00:00+00:00" },
            { "id": 102, "content": { "raw": "Thanks!" }, "user": { "uuid": "{author}" },
              "created_on": "2024-03-01T12:00:00+00:00" }
        ]),
    )
    .await;

    Mock::given(method("GET"))
        .and(path("/repositories/acme/widgets/pullrequests/1/commits"))
        .and(query_param_is_missing("page"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "values": [commit("c3")],
            "next": format!(
                "{}/repositories/acme/widgets/pullrequests/1/commits?pagelen=50&page=2",
                server.uri()
            )
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repositories/acme/widgets/pullrequests/1/commits"))
        .and(query_param("page", "2"))
        .respond_with(page(json!([commit("c1"), commit("c2")])))
        .mount(server)
        .await;
}

#[tokio::test]
async fn full_export_emits_every_record_once() {
    let server = MockServer::start().await;
    mount_scope(&server).await;
    mount_merged_pull_request(&server).await;

    let store = Arc::new(MemoryStateStore::new());
    let sink = Arc::new(MemorySink::new());
    let engine = ExportEngine::from_config(config(&server, ""), store.clone(), sink.clone(), None)
        .unwrap();

    let summary = engine.run_export().await.unwrap();

    assert_eq!(summary.repos, 1);
    assert_eq!(summary.users, 1);
    assert_eq!(summary.pull_requests, 1);
    assert_eq!(summary.comments, 2);
    assert_eq!(summary.commits, 3);
    assert_eq!(summary.reviews, 1);
    assert_eq!(summary.review_requests, 0);
    assert!(summary.watermark_used.is_none());
    assert_eq!(sink.records().await.len(), 9);

    let prs = sink.of_kind(RecordKind::PullRequest).await;
    let Record::PullRequest(pr) = &prs[0] else {
        panic!("expected a pull request record");
    };
    assert_eq!(pr.status, PullRequestStatus::Merged);
    assert_eq!(pr.merge_sha.as_deref(), Some("m1"));
    assert!(pr.merge_commit_id.is_some());
    assert_eq!(pr.first_commit_sha.as_deref(), Some("c3"));
    assert_eq!(
        pr.first_commit_id,
        Some(ids::commit_id("cust-1", "c3", "bitbucket", &pr.repo_id))
    );

    let reviews = sink.of_kind(RecordKind::PullRequestReview).await;
    let Record::PullRequestReview(review) = &reviews[0] else {
        panic!("expected a review record");
    };
    assert_eq!(review.state, ReviewState::Approved);
    assert_eq!(review.user_ref_id, "{reviewer}");
    assert_eq!(review.pull_request_id, pr.id);

    let state = store.snapshot().await;
    assert_eq!(
        state.get(&format!("prsha.{}.1", REPO_UUID)).map(String::as_str),
        Some("c3")
    );
    assert!(state.contains_key(WATERMARK_KEY));
    assert!(summary.watermark_committed.is_some());
}

#[tokio::test]
async fn incremental_export_skips_pull_requests_not_updated_since_watermark() {
    let server = MockServer::start().await;
    mount_scope(&server).await;

    // the server filter is mocked as absent so the client-side guard is what
    // keeps the stale pull request out
    Mock::given(method("GET"))
        .and(path("/repositories/acme/widgets/pullrequests"))
        .and(query_param("q", "updated_on > 2024-03-05T00:00:00.000000+00:00"))
        .and(query_param("sort", "-updated_on"))
        .respond_with(page(json!([
            pull_request(2, "2024-03-06T00:00:00+00:00"),
            pull_request(1, "2024-03-05T00:00:00+00:00")
        ])))
        .expect(1)
        .mount(&server)
        .await;

    for id in [1, 2] {
        // comments share the watermark filter, commits are always listed whole
        Mock::given(method("GET"))
            .and(path(format!("/repositories/acme/widgets/pullrequests/{}/comments", id)))
            .and(query_param("q", "updated_on > 2024-03-05T00:00:00.000000+00:00"))
            .and(query_param("sort", "-updated_on"))
            .respond_with(page(json!([])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/repositories/acme/widgets/pullrequests/{}/commits", id)))
            .and(query_param_is_missing("q"))
            .respond_with(page(json!([commit(&format!("head-{}", id))])))
            .expect(1)
            .mount(&server)
            .await;
    }

    let store = Arc::new(MemoryStateStore::new());
    store.set(WATERMARK_KEY, "2024-03-05T00:00:00Z").await.unwrap();
    let sink = Arc::new(MemorySink::new());

    let summary = ExportEngine::from_config(config(&server, ""), store.clone(), sink.clone(), None)
        .unwrap()
        .run_export()
        .await
        .unwrap();

    assert_eq!(
        summary.watermark_used,
        Some(Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap())
    );
    // sub-resources of both were fetched, only the newer one is emitted
    assert_eq!(summary.commits, 2);
    assert_eq!(summary.pull_requests, 1);

    let prs = sink.of_kind(RecordKind::PullRequest).await;
    let Record::PullRequest(pr) = &prs[0] else {
        panic!("expected a pull request record");
    };
    assert_eq!(pr.ref_id, "2");
    assert_eq!(pr.first_commit_sha.as_deref(), Some("head-2"));

    let committed = store.get(WATERMARK_KEY).await.unwrap().unwrap();
    assert_ne!(committed, "2024-03-05T00:00:00Z");
}

#[tokio::test]
async fn historical_flag_ignores_stored_watermark() {
    let server = MockServer::start().await;
    mount_scope(&server).await;

    Mock::given(method("GET"))
        .and(path("/repositories/acme/widgets/pullrequests"))
        .and(query_param_is_missing("q"))
        .respond_with(page(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStateStore::new());
    store.set(WATERMARK_KEY, "2024-03-05T00:00:00Z").await.unwrap();

    let summary = ExportEngine::from_config(
        config(&server, r#", "historical": true"#),
        store,
        Arc::new(MemorySink::new()),
        None,
    )
    .unwrap()
    .run_export()
    .await
    .unwrap();

    assert!(summary.watermark_used.is_none());
    assert_eq!(summary.repos, 1);
}

struct RejectingSink;

#[async_trait]
impl Sink for RejectingSink {
    async fn write(&self, _record: Record) -> Result<(), AppError> {
        Err(AppError::sink("downstream unavailable"))
    }
}

#[tokio::test]
async fn sink_failure_aborts_run_and_keeps_watermark() {
    let server = MockServer::start().await;
    mount_scope(&server).await;
    mount_merged_pull_request(&server).await;

    let store = Arc::new(MemoryStateStore::new());
    store.set(WATERMARK_KEY, "2024-01-01T00:00:00Z").await.unwrap();

    let err = ExportEngine::from_config(
        config(&server, ""),
        store.clone(),
        Arc::new(RejectingSink),
        None,
    )
    .unwrap()
    .run_export()
    .await
    .unwrap_err();

    assert!(matches!(err, AppError::Sink { .. }), "unexpected error: {err}");
    assert_eq!(
        store.get(WATERMARK_KEY).await.unwrap().as_deref(),
        Some("2024-01-01T00:00:00Z")
    );
}

/// Accepts every record but cannot make them durable.
struct UnflushableSink(MemorySink);

#[async_trait]
impl Sink for UnflushableSink {
    async fn write(&self, record: Record) -> Result<(), AppError> {
        self.0.write(record).await
    }

    async fn flush(&self) -> Result<(), AppError> {
        Err(AppError::sink("disk detached"))
    }
}

#[tokio::test]
async fn flush_failure_aborts_run_and_keeps_watermark() {
    let server = MockServer::start().await;
    mount_scope(&server).await;
    mount_merged_pull_request(&server).await;

    let store = Arc::new(MemoryStateStore::new());
    store.set(WATERMARK_KEY, "2024-01-01T00:00:00Z").await.unwrap();
    let sink = Arc::new(UnflushableSink(MemorySink::new()));

    let err = ExportEngine::from_config(config(&server, ""), store.clone(), sink.clone(), None)
        .unwrap()
        .run_export()
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Sink { .. }), "unexpected error: {err}");
    // every record reached the sink, the watermark still did not move
    assert_eq!(sink.0.records().await.len(), 9);
    assert_eq!(
        store.get(WATERMARK_KEY).await.unwrap().as_deref(),
        Some("2024-01-01T00:00:00Z")
    );
}

#[tokio::test]
async fn sub_fetches_are_bounded_and_finish_before_pull_requests_are_emitted() {
    const PULL_REQUESTS: i64 = 12;
    const DELAY: Duration = Duration::from_millis(200);

    let server = MockServer::start().await;
    mount_scope(&server).await;

    let prs: Vec<Value> = (1..=PULL_REQUESTS)
        .map(|id| pull_request(id, "2024-03-06T00:00:00+00:00"))
        .collect();
    mount_page(&server, "/repositories/acme/widgets/pullrequests", json!(prs)).await;

    Mock::given(method("GET"))
        .and(path_regex(r"^/repositories/acme/widgets/pullrequests/\d+/comments$"))
        .respond_with(page(json!([])).set_delay(DELAY))
        .mount(&server)
        .await;
    for id in 1..=PULL_REQUESTS {
        Mock::given(method("GET"))
            .and(path(format!("/repositories/acme/widgets/pullrequests/{}/commits", id)))
            .respond_with(page(json!([commit(&format!("first-{}", id))])).set_delay(DELAY))
            .expect(1)
            .mount(&server)
            .await;
    }

    let sink = Arc::new(MemorySink::new());
    let started = Instant::now();
    let summary = ExportEngine::from_config(
        config(&server, ""),
        Arc::new(MemoryStateStore::new()),
        sink.clone(),
        None,
    )
    .unwrap()
    .run_export()
    .await
    .unwrap();
    let elapsed = started.elapsed();

    // 24 delayed listings, at most 10 in flight: no fewer than three rounds
    assert!(
        elapsed >= DELAY * 3,
        "sub-fetches ran with more than 10 in flight ({elapsed:?})"
    );
    assert_eq!(summary.pull_requests, PULL_REQUESTS as usize);
    assert_eq!(summary.commits, PULL_REQUESTS as usize);

    // every pull request waited for its own delayed commit listing
    for record in sink.of_kind(RecordKind::PullRequest).await {
        let Record::PullRequest(pr) = record else {
            panic!("expected a pull request record");
        };
        assert_eq!(
            pr.first_commit_sha.as_deref(),
            Some(format!("first-{}", pr.ref_id).as_str())
        );
    }
}

#[tokio::test]
async fn listing_failure_aborts_run_without_watermark() {
    let server = MockServer::start().await;
    mount_page(&server, "/workspaces", json!([{ "slug": "acme" }])).await;
    Mock::given(method("GET"))
        .and(path("/repositories/acme"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStateStore::new());
    let err = ExportEngine::from_config(
        config(&server, ""),
        store.clone(),
        Arc::new(MemorySink::new()),
        None,
    )
    .unwrap()
    .run_export()
    .await
    .unwrap_err();

    assert_eq!(err.status_code(), Some(403));
    assert_eq!(store.get(WATERMARK_KEY).await.unwrap(), None);
}

#[tokio::test]
async fn repository_filters_and_explicit_accounts() {
    let server = MockServer::start().await;
    mount_page(&server, "/workspaces", json!([{ "slug": "acme" }])).await;
    mount_page(
        &server,
        "/repositories/acme",
        json!([
            { "uuid": "{widgets}", "full_name": "acme/widgets" },
            { "uuid": "{legacy}", "full_name": "acme/legacy" }
        ]),
    )
    .await;
    mount_page(&server, "/workspaces/acme/members", json!([])).await;
    mount_page(&server, "/repositories/acme/widgets/pullrequests", json!([])).await;

    Mock::given(method("GET"))
        .and(path("/repositories/acme/legacy/pullrequests"))
        .respond_with(page(json!([])))
        .expect(0)
        .mount(&server)
        .await;

    // configured scope on top of the discovered ones
    Mock::given(method("GET"))
        .and(path("/repositories/solo"))
        .respond_with(page(json!([])))
        .expect(1)
        .mount(&server)
        .await;
    mount_page(&server, "/workspaces/solo/members", json!([])).await;

    let sink = Arc::new(MemorySink::new());
    let summary = ExportEngine::from_config(
        config(
            &server,
            r#", "accounts": ["solo"], "exclusions": { "acme": ["acme/legacy"] }"#,
        ),
        Arc::new(MemoryStateStore::new()),
        sink.clone(),
        None,
    )
    .unwrap()
    .run_export()
    .await
    .unwrap();

    assert_eq!(summary.repos, 1);
    let repos = sink.of_kind(RecordKind::Repo).await;
    assert!(matches!(&repos[0], Record::Repo(r) if r.name == "acme/widgets"));
}

#[tokio::test]
async fn sqlite_state_makes_second_run_incremental() {
    let server = MockServer::start().await;
    mount_scope(&server).await;
    mount_merged_pull_request(&server).await;

    let dir = tempdir().unwrap();
    let pool = bitbucket_export::db::initialize(&dir.path().join("state.db"))
        .await
        .unwrap();
    let store = Arc::new(SqliteStateStore::new(pool.clone(), "cust-1"));

    let first = ExportEngine::from_config(
        config(&server, ""),
        store.clone(),
        Arc::new(MemorySink::new()),
        None,
    )
    .unwrap()
    .run_export()
    .await
    .unwrap();
    assert!(first.watermark_used.is_none());
    assert_eq!(first.pull_requests, 1);
    assert_eq!(
        store.get(&format!("prsha.{}.1", REPO_UUID)).await.unwrap().as_deref(),
        Some("c3")
    );

    let second = ExportEngine::from_config(
        config(&server, ""),
        store.clone(),
        Arc::new(MemorySink::new()),
        None,
    )
    .unwrap()
    .run_export()
    .await
    .unwrap();
    assert_eq!(second.watermark_used, first.watermark_committed);
    // the mock ignores `q`; the pull request predates the new watermark
    assert_eq!(second.pull_requests, 0);
    assert_eq!(second.repos, 1);

    let requests = server.received_requests().await.unwrap();
    let filtered = requests
        .iter()
        .filter(|r| r.url.path() == "/repositories/acme/widgets/pullrequests")
        .filter(|r| r.url.query_pairs().any(|(k, _)| k == "q"))
        .count();
    assert_eq!(filtered, 1);

    pool.close().await;
}
