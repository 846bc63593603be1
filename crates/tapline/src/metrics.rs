//! Internal metrics for the adapter itself.

use std::time::Duration;

use vise::{Buckets, Counter, EncodeLabelSet, EncodeLabelValue, Family, Global, Histogram, Metrics, Unit};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EncodeLabelValue, EncodeLabelSet)]
#[metrics(label = "outcome", rename_all = "snake_case")]
pub(crate) enum CacheOutcome {
    Hit,
    Miss,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EncodeLabelValue, EncodeLabelSet)]
#[metrics(label = "route", rename_all = "snake_case")]
pub(crate) enum Route {
    Summary,
    Metrics,
    Health,
    NotFound,
}

#[derive(Debug, Metrics)]
#[metrics(prefix = "tapline")]
pub(crate) struct AdapterMetrics {
    /// Time spent refreshing a snapshot from the upstream, including mapping.
    #[metrics(buckets = Buckets::LATENCIES, unit = Unit::Seconds)]
    pub refresh_latency: Histogram<Duration>,
    /// Snapshot cache lookups by outcome.
    pub cache: Family<CacheOutcome, Counter>,
    /// Inbound requests by route.
    pub requests: Family<Route, Counter>,
    /// Inbound requests that failed with an internal error, by route.
    pub request_errors: Family<Route, Counter>,
    /// Upstream HTTP requests issued.
    pub upstream_requests: Counter,
    /// Access token exchanges performed by the credential provider.
    pub token_exchanges: Counter,
}

#[vise::register]
pub(crate) static METRICS: Global<AdapterMetrics> = Global::new();
