//! Adapter aggregating Immich job queue counts and library statistics.
//!
//! Job queues are the primary data: failing to fetch them fails the request. Library statistics
//! are optional; they may require an admin API key, so they can be fetched with a separate key
//! and are simply omitted if the call fails.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tapline::{
    mapping::{is_truthy, number_or_zero, optional_section},
    Adapter, Auth, Exposition, GaugeValue, Result, UpstreamClient,
};

/// Default port of the adapter server.
pub const DEFAULT_PORT: u16 = 8080;
/// Default Immich base URL.
pub const DEFAULT_URL: &str = "http://localhost:2283";

const NAME: &str = "immich";
const JOBS_PATH: &str = "/api/jobs";
const STATISTICS_PATH: &str = "/api/server/statistics";
const API_KEY_HEADER: &str = "x-api-key";

/// Job counts of a single queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueReading {
    /// Queue name, used as the `queue` label.
    pub queue: String,
    /// Active jobs.
    pub active: GaugeValue,
    /// Waiting jobs.
    pub waiting: GaugeValue,
    /// Failed jobs.
    pub failed: GaugeValue,
    /// Delayed jobs.
    pub delayed: GaugeValue,
    /// Whether the queue is paused.
    pub paused: bool,
}

/// Library statistics summed over all users.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LibraryStatistics {
    /// Number of photos.
    pub photos: GaugeValue,
    /// Number of videos.
    pub videos: GaugeValue,
    /// Used storage in bytes.
    pub usage_bytes: GaugeValue,
}

/// Immich job queues with optional library statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImmichSnapshot {
    /// Job queues in the order they are reported by Immich.
    pub queues: Vec<QueueReading>,
    /// Library statistics; `None` if they could not be fetched.
    pub statistics: Option<LibraryStatistics>,
}

impl ImmichSnapshot {
    /// Active jobs across all queues.
    pub fn total_active(&self) -> GaugeValue {
        self.queues.iter().map(|queue| queue.active).sum()
    }

    /// Waiting jobs across all queues.
    pub fn total_waiting(&self) -> GaugeValue {
        self.queues.iter().map(|queue| queue.waiting).sum()
    }

    /// Failed jobs across all queues.
    pub fn total_failed(&self) -> GaugeValue {
        self.queues.iter().map(|queue| queue.failed).sum()
    }
}

/// Maps the `/api/jobs` response, an object keyed by queue name.
pub fn map_jobs(jobs: &Map<String, Value>) -> Vec<QueueReading> {
    jobs.iter()
        .map(|(queue, info)| {
            let counts = info.get("jobCounts").unwrap_or(&Value::Null);
            QueueReading {
                queue: queue.clone(),
                active: number_or_zero(counts, "active"),
                waiting: number_or_zero(counts, "waiting"),
                failed: number_or_zero(counts, "failed"),
                delayed: number_or_zero(counts, "delayed"),
                paused: is_truthy(counts.get("paused")),
            }
        })
        .collect()
}

/// Maps the `/api/server/statistics` response. Returns `None` for an empty response.
pub fn map_statistics(stats: &Value) -> Option<LibraryStatistics> {
    if !is_truthy(Some(stats)) {
        return None;
    }
    let users = stats
        .get("usageByUser")
        .and_then(Value::as_array)
        .map_or(&[][..], Vec::as_slice);
    let sum = |key: &str| users.iter().map(|user| number_or_zero(user, key)).sum();
    Some(LibraryStatistics {
        photos: sum("photos"),
        videos: sum("videos"),
        usage_bytes: sum("usage"),
    })
}

/// Immich adapter.
#[derive(Debug)]
pub struct ImmichAdapter {
    jobs_client: UpstreamClient,
    statistics_client: UpstreamClient,
}

impl ImmichAdapter {
    /// Creates an adapter authenticating with `api_key`. Statistics are fetched with `stats_api_key`
    /// if it is provided and non-empty, and with `api_key` otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if a key is not a valid header value, or if the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        api_key: &str,
        stats_api_key: Option<&str>,
        timeout: Duration,
    ) -> Result<Self> {
        let jobs_client =
            UpstreamClient::new(base_url, Auth::header(API_KEY_HEADER, api_key)?, timeout)?;
        let stats_api_key = stats_api_key.filter(|key| !key.is_empty()).unwrap_or(api_key);
        let statistics_client = jobs_client.with_auth(Auth::header(API_KEY_HEADER, stats_api_key)?);
        Ok(Self {
            jobs_client,
            statistics_client,
        })
    }
}

#[async_trait]
impl Adapter for ImmichAdapter {
    type Snapshot = ImmichSnapshot;

    fn name(&self) -> &'static str {
        NAME
    }

    fn upstream_url(&self) -> &str {
        self.jobs_client.base_url()
    }

    async fn refresh(&self) -> Result<ImmichSnapshot> {
        let (jobs, statistics) = tokio::join!(
            self.jobs_client.get_json::<Map<String, Value>>(JOBS_PATH),
            self.statistics_client.get_json::<Value>(STATISTICS_PATH),
        );
        let queues = map_jobs(&jobs?);
        let statistics = optional_section(NAME, "statistics", statistics)
            .as_ref()
            .and_then(map_statistics);
        Ok(ImmichSnapshot { queues, statistics })
    }

    fn summary(&self, snapshot: &ImmichSnapshot) -> Value {
        json!({
            "active": snapshot.total_active(),
            "waiting": snapshot.total_waiting(),
            "failed": snapshot.total_failed(),
            "queues": snapshot.queues.len(),
        })
    }

    fn render(&self, snapshot: &ImmichSnapshot, exposition: &mut Exposition) {
        let fields: [(&str, &str, fn(&QueueReading) -> GaugeValue); 5] = [
            ("immich_jobs_active", "Number of active jobs", |q| q.active),
            ("immich_jobs_waiting", "Number of waiting jobs", |q| q.waiting),
            ("immich_jobs_failed", "Number of failed jobs", |q| q.failed),
            ("immich_jobs_delayed", "Number of delayed jobs", |q| q.delayed),
            ("immich_jobs_paused", "Whether the queue is paused", |q| q.paused.into()),
        ];
        for (name, help, field) in fields {
            let mut family = exposition.gauge(name, help);
            for queue in &snapshot.queues {
                family.sample(&[("queue", &queue.queue)], field(queue));
            }
        }

        exposition
            .gauge(
                "immich_jobs_active_total",
                "Total active jobs across all queues",
            )
            .set(snapshot.total_active());
        exposition
            .gauge(
                "immich_jobs_waiting_total",
                "Total waiting jobs across all queues",
            )
            .set(snapshot.total_waiting());
        exposition
            .gauge(
                "immich_jobs_failed_total",
                "Total failed jobs across all queues",
            )
            .set(snapshot.total_failed());

        if let Some(statistics) = &snapshot.statistics {
            exposition
                .gauge("immich_photos_total", "Total number of photos")
                .set(statistics.photos);
            exposition
                .gauge("immich_videos_total", "Total number of videos")
                .set(statistics.videos);
            exposition
                .gauge("immich_storage_bytes", "Total storage used in bytes")
                .set(statistics.usage_bytes);
        }
    }
}
