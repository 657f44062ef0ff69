use std::sync::atomic::{AtomicUsize, Ordering};

use caa_audit::client::RemoteItem;
use caa_audit::logsink::TaskLogger;
use reqwest::Client;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Fails the first `fail_times` requests with a 500, then succeeds — deterministic regardless
/// of how many mocks wiremock has mounted, unlike layering two `Mock`s on the same route.
struct FlakyThenOk {
    fail_times: usize,
    calls: AtomicUsize,
}

impl Respond for FlakyThenOk {
    fn respond(&self, _: &Request) -> ResponseTemplate {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_times {
            ResponseTemplate::new(500)
        } else {
            ResponseTemplate::new(200).set_body_json(json!({"is_dark": false}))
        }
    }
}

fn item(server: &MockServer, identifier: &str, task_dir: &std::path::Path) -> RemoteItem {
    RemoteItem::with_base_url(Client::new(), identifier, task_dir, server.uri())
}

#[tokio::test]
async fn metadata_is_fetched_and_cached_on_disk() {
    let server = MockServer::start().await;
    let task_dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/metadata/mbid-abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"is_dark": false})))
        .expect(1)
        .mount(&server)
        .await;

    let remote = item(&server, "mbid-abc", task_dir.path());
    let log = TaskLogger::new("mbid-abc");

    let first = remote.metadata(&log).await.unwrap();
    assert_eq!(first["is_dark"], json!(false));

    // Second call must be served from the on-disk cache: the mock's expect(1) would fail
    // the server's own verification on drop if it were hit again.
    let second = remote.metadata(&log).await.unwrap();
    assert_eq!(second, first);
}

#[tokio::test]
async fn empty_metadata_confirmed_404_is_not_an_error() {
    let server = MockServer::start().await;
    let task_dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/metadata/gone"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/details/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let remote = item(&server, "gone", task_dir.path());
    let log = TaskLogger::new("gone");

    let value = remote.metadata(&log).await.unwrap();
    assert!(value.as_object().unwrap().is_empty());
}

#[tokio::test]
async fn caa_index_missing_is_none_not_an_error() {
    let server = MockServer::start().await;
    let task_dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/download/mbid-abc/index.json"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let remote = item(&server, "mbid-abc", task_dir.path());
    let log = TaskLogger::new("mbid-abc");

    assert!(remote.caa_index(&log).await.unwrap().is_none());
}

#[tokio::test]
async fn caa_index_present_is_cached_and_returned() {
    let server = MockServer::start().await;
    let task_dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/download/mbid-abc/index.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"release": "x", "images": []})))
        .expect(1)
        .mount(&server)
        .await;

    let remote = item(&server, "mbid-abc", task_dir.path());
    let log = TaskLogger::new("mbid-abc");

    let first = remote.caa_index(&log).await.unwrap().unwrap();
    let second = remote.caa_index(&log).await.unwrap().unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn has_pending_tasks_reads_summary_counts() {
    let server = MockServer::start().await;
    let task_dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/services/tasks.php"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "value": {"summary": {"queued": 0, "running": 1}},
        })))
        .mount(&server)
        .await;

    let remote = item(&server, "mbid-abc", task_dir.path());
    let log = TaskLogger::new("mbid-abc");

    assert!(remote.has_pending_tasks(&log).await.unwrap());
}

#[tokio::test]
async fn has_pending_tasks_false_when_all_counts_zero() {
    let server = MockServer::start().await;
    let task_dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/services/tasks.php"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "value": {"summary": {"queued": 0, "running": 0}},
        })))
        .mount(&server)
        .await;

    let remote = item(&server, "mbid-abc", task_dir.path());
    let log = TaskLogger::new("mbid-abc");

    assert!(!remote.has_pending_tasks(&log).await.unwrap());
}

#[tokio::test]
async fn transient_failure_is_retried_until_success() {
    let server = MockServer::start().await;
    let task_dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/metadata/retry-me"))
        .respond_with(FlakyThenOk {
            fail_times: 2,
            calls: AtomicUsize::new(0),
        })
        .expect(3)
        .mount(&server)
        .await;

    let remote = item(&server, "retry-me", task_dir.path());
    let log = TaskLogger::new("retry-me");

    let value = remote.metadata(&log).await.unwrap();
    assert_eq!(value["is_dark"], json!(false));
}
