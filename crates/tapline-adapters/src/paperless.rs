//! Adapter exposing Paperless-ngx document statistics and the actual document storage size.
//!
//! Paperless does not report how much storage documents take, so the adapter lists all document IDs
//! and sums the `Content-Length` of HEAD requests to their download endpoints. This is expensive,
//! hence the long default cache TTL.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tapline::{
    mapping::{number_or_zero, optional_section, str_or},
    Adapter, Auth, Error, Exposition, GaugeValue, Result, UpstreamClient,
};

/// Default port of the adapter server.
pub const DEFAULT_PORT: u16 = 8080;
/// Default Paperless base URL.
pub const DEFAULT_URL: &str = "http://localhost:8776";
/// Default snapshot cache TTL.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

const NAME: &str = "paperless";
const STATISTICS_PATH: &str = "/api/statistics/";
const TASKS_PATH: &str = "/api/tasks/";
const PAGE_SIZE: u32 = 100;

fn documents_page_path(page: u32) -> String {
    format!("/api/documents/?page={page}&page_size={PAGE_SIZE}&fields=id")
}

fn download_path(id: u64) -> String {
    format!("/api/documents/{id}/download/")
}

/// Number of documents with a certain MIME type.
#[derive(Debug, Clone, PartialEq)]
pub struct FileTypeCount {
    /// MIME type (`unknown` if missing).
    pub mime_type: String,
    /// Number of documents.
    pub count: GaugeValue,
}

/// Task counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskCounts {
    /// Tasks with the `STARTED` status.
    pub active: u64,
    /// Tasks with the `PENDING` status.
    pub pending: u64,
    /// Tasks with the `FAILURE` status.
    pub failed: u64,
}

/// Paperless statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaperlessSnapshot {
    /// Total number of documents.
    pub documents: GaugeValue,
    /// Total number of characters across all documents.
    pub character_count: GaugeValue,
    /// Document counts by MIME type.
    pub file_types: Vec<FileTypeCount>,
    /// Sum of document download sizes.
    pub storage_bytes: u64,
    /// Task counts; all zero if tasks could not be fetched.
    pub tasks: TaskCounts,
}

#[derive(Debug, Deserialize)]
struct DocumentRef {
    id: u64,
}

/// Maps file type counts from the `/api/statistics/` response.
pub fn map_file_types(statistics: &Value) -> Vec<FileTypeCount> {
    let Some(Value::Array(entries)) = statistics.get("document_file_type_counts") else {
        return vec![];
    };
    entries
        .iter()
        .map(|entry| FileTypeCount {
            mime_type: str_or(entry, "mime_type", "unknown").to_owned(),
            count: number_or_zero(entry, "mime_type_count"),
        })
        .collect()
}

/// Counts tasks from the `/api/tasks/` response by their (case-insensitive) status.
pub fn count_tasks(tasks: &[Value]) -> TaskCounts {
    let mut counts = TaskCounts::default();
    for task in tasks {
        match str_or(task, "status", "").to_uppercase().as_str() {
            "STARTED" => counts.active += 1,
            "PENDING" => counts.pending += 1,
            "FAILURE" => counts.failed += 1,
            _ => { /* other statuses are not reported */ }
        }
    }
    counts
}

/// Paperless-ngx adapter.
#[derive(Debug)]
pub struct PaperlessAdapter {
    client: UpstreamClient,
}

impl PaperlessAdapter {
    /// Creates an adapter authenticating with the specified API token.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is not a valid header value, or if the HTTP client
    /// cannot be built.
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self> {
        let auth = Auth::header("Authorization", &format!("Token {token}"))?;
        Ok(Self {
            client: UpstreamClient::new(base_url, auth, timeout)?,
        })
    }

    async fn storage_bytes(&self) -> Result<u64> {
        let documents: Vec<DocumentRef> = self.client.get_paginated(documents_page_path).await?;
        let mut total = 0_u64;
        for document in &documents {
            total = total.saturating_add(self.client.content_length(&download_path(document.id)).await);
        }
        tracing::debug!(
            documents = documents.len(),
            storage_bytes = total,
            "Summed Paperless document sizes"
        );
        Ok(total)
    }
}

#[async_trait]
impl Adapter for PaperlessAdapter {
    type Snapshot = PaperlessSnapshot;

    fn name(&self) -> &'static str {
        NAME
    }

    fn upstream_url(&self) -> &str {
        self.client.base_url()
    }

    async fn refresh(&self) -> Result<PaperlessSnapshot> {
        let statistics: Value = self.client.get_json(STATISTICS_PATH).await?;
        if !statistics.is_object() {
            return Err(Error::bad_response(
                self.client.url(STATISTICS_PATH),
                "expected a JSON object",
            ));
        }
        let storage_bytes = self.storage_bytes().await?;
        let tasks = self.client.get_json::<Vec<Value>>(TASKS_PATH).await;
        let tasks = optional_section(NAME, "tasks", tasks)
            .map(|tasks| count_tasks(&tasks))
            .unwrap_or_default();
        Ok(PaperlessSnapshot {
            documents: number_or_zero(&statistics, "documents_total"),
            character_count: number_or_zero(&statistics, "character_count"),
            file_types: map_file_types(&statistics),
            storage_bytes,
            tasks,
        })
    }

    fn summary(&self, snapshot: &PaperlessSnapshot) -> Value {
        json!({
            "documents": snapshot.documents,
            "storage_bytes": snapshot.storage_bytes,
            "active_tasks": snapshot.tasks.active,
            "pending_tasks": snapshot.tasks.pending,
            "failed_tasks": snapshot.tasks.failed,
        })
    }

    fn render(&self, snapshot: &PaperlessSnapshot, exposition: &mut Exposition) {
        exposition
            .gauge("paperless_documents_total", "Total number of documents")
            .set(snapshot.documents);
        exposition
            .gauge(
                "paperless_storage_bytes",
                "Total size of all documents in bytes",
            )
            .set(snapshot.storage_bytes);
        exposition
            .gauge(
                "paperless_character_count",
                "Total characters across all documents",
            )
            .set(snapshot.character_count);
        exposition
            .gauge("paperless_tasks_active", "Currently running tasks")
            .set(snapshot.tasks.active);
        exposition
            .gauge("paperless_tasks_pending", "Pending tasks in queue")
            .set(snapshot.tasks.pending);
        exposition
            .gauge("paperless_tasks_failed", "Failed tasks")
            .set(snapshot.tasks.failed);

        let mut family = exposition.gauge(
            "paperless_documents_by_type",
            "Number of documents by MIME type",
        );
        for file_type in &snapshot.file_types {
            family.sample(&[("mime_type", &file_type.mime_type)], file_type.count);
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use tapline::testing::{MockResponse, MockUpstream};

    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn statistics() -> Value {
        json!({
            "documents_total": 3,
            "documents_inbox": 1,
            "character_count": 12_345,
            "document_file_type_counts": [
                { "mime_type": "application/pdf", "mime_type_count": 2 },
                { "mime_type": "image/\"png\"", "mime_type_count": 1 },
                {},
            ],
        })
    }

    async fn paperless_upstream() -> MockUpstream {
        MockUpstream::builder()
            .route(STATISTICS_PATH, MockResponse::json(&statistics()))
            .route(
                &documents_page_path(1),
                MockResponse::json(&json!({
                    "count": 3,
                    "next": "http://paperless/api/documents/?page=2",
                    "results": [{ "id": 1 }, { "id": 2 }],
                })),
            )
            .route(
                &documents_page_path(2),
                MockResponse::json(&json!({ "count": 3, "next": null, "results": [{ "id": 5 }] })),
            )
            .route(&download_path(1), MockResponse::sized(1_000))
            .route(&download_path(2), MockResponse::sized(234))
            // Document 5 has no download route, so its size counts as 0.
            .route(
                TASKS_PATH,
                MockResponse::json(&json!([
                    { "status": "STARTED" },
                    { "status": "pending" },
                    { "status": "PENDING" },
                    { "status": "FAILURE" },
                    { "status": "SUCCESS" },
                    {},
                ])),
            )
            .start()
            .await
    }

    #[tokio::test]
    async fn summing_storage_and_counting_tasks() {
        let upstream = paperless_upstream().await;
        let adapter = PaperlessAdapter::new(&upstream.base_url(), "secret", TIMEOUT).unwrap();
        let snapshot = adapter.refresh().await.unwrap();

        assert_eq!(snapshot.storage_bytes, 1_234);
        assert_eq!(
            snapshot.tasks,
            TaskCounts {
                active: 1,
                pending: 2,
                failed: 1
            }
        );
        assert_eq!(
            adapter.summary(&snapshot).to_string(),
            r#"{"documents":3,"storage_bytes":1234,"active_tasks":1,"pending_tasks":2,"failed_tasks":1}"#
        );

        let requests = upstream.requests();
        assert!(requests
            .iter()
            .all(|req| req.header("authorization") == Some("Token secret")));
        let heads: Vec<_> = requests
            .iter()
            .filter(|req| req.method == "HEAD")
            .map(|req| req.path.as_str())
            .collect();
        assert_eq!(
            heads,
            [download_path(1), download_path(2), download_path(5)]
        );
    }

    #[tokio::test]
    async fn rendering_metrics() {
        let upstream = paperless_upstream().await;
        let adapter = PaperlessAdapter::new(&upstream.base_url(), "secret", TIMEOUT).unwrap();
        let snapshot = adapter.refresh().await.unwrap();

        let mut exposition = Exposition::new(adapter.label_sanitizer());
        adapter.render(&snapshot, &mut exposition);
        let expected = "\
            # HELP paperless_documents_total Total number of documents\n\
            # TYPE paperless_documents_total gauge\n\
            paperless_documents_total 3\n\
            # HELP paperless_storage_bytes Total size of all documents in bytes\n\
            # TYPE paperless_storage_bytes gauge\n\
            paperless_storage_bytes 1234\n\
            # HELP paperless_character_count Total characters across all documents\n\
            # TYPE paperless_character_count gauge\n\
            paperless_character_count 12345\n\
            # HELP paperless_tasks_active Currently running tasks\n\
            # TYPE paperless_tasks_active gauge\n\
            paperless_tasks_active 1\n\
            # HELP paperless_tasks_pending Pending tasks in queue\n\
            # TYPE paperless_tasks_pending gauge\n\
            paperless_tasks_pending 2\n\
            # HELP paperless_tasks_failed Failed tasks\n\
            # TYPE paperless_tasks_failed gauge\n\
            paperless_tasks_failed 1\n\
            # HELP paperless_documents_by_type Number of documents by MIME type\n\
            # TYPE paperless_documents_by_type gauge\n\
            paperless_documents_by_type{mime_type=\"application/pdf\"} 2\n\
            paperless_documents_by_type{mime_type=\"image/png\"} 1\n\
            paperless_documents_by_type{mime_type=\"unknown\"} 0\n";
        assert_eq!(exposition.finish(), expected);
    }

    #[tokio::test]
    async fn failed_tasks_fetch_yields_zero_counts() {
        let upstream = paperless_upstream().await;
        upstream.set_route(TASKS_PATH, MockResponse::text(500, "oops"));
        let adapter = PaperlessAdapter::new(&upstream.base_url(), "secret", TIMEOUT).unwrap();

        let snapshot = adapter.refresh().await.unwrap();
        assert_eq!(snapshot.tasks, TaskCounts::default());
        assert_eq!(snapshot.storage_bytes, 1_234);
    }

    #[tokio::test]
    async fn failed_listing_fails_refresh() {
        let upstream = paperless_upstream().await;
        upstream.set_route(&documents_page_path(2), MockResponse::text(502, "bad gateway"));
        let adapter = PaperlessAdapter::new(&upstream.base_url(), "secret", TIMEOUT).unwrap();

        let err = adapter.refresh().await.unwrap_err();
        assert_matches!(
            err,
            Error::BadUpstreamResponse { url, .. } if url.contains("page=2")
        );
    }

    #[tokio::test]
    async fn failed_statistics_fail_refresh() {
        let upstream = MockUpstream::builder().start().await;
        let adapter = PaperlessAdapter::new(&upstream.base_url(), "secret", TIMEOUT).unwrap();

        let err = adapter.refresh().await.unwrap_err();
        assert_matches!(err, Error::BadUpstreamResponse { .. });
        // Storage is not computed if statistics are unavailable.
        assert_eq!(upstream.requests().len(), 1);
    }

    #[test]
    fn document_without_id_is_rejected() {
        let page: std::result::Result<tapline::Page<DocumentRef>, _> =
            serde_json::from_value(json!({ "results": [{ "title": "no id" }] }));
        assert!(page.is_err());
    }
}
