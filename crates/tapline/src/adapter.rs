//! The [`Adapter`] trait implemented by every deployment.

use async_trait::async_trait;
use serde::Serialize;

use crate::{
    exposition::{Exposition, LabelSanitizer},
    Result,
};

/// Status reported by the `/health` route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// The adapter has usable data.
    Ok,
    /// No usable data has been obtained yet.
    NoData,
}

/// Upstream-specific part of a polling metrics adapter.
///
/// An adapter fetches and maps upstream data into a typed snapshot ([`Self::refresh()`]);
/// the server caches snapshots and turns them into a JSON summary ([`Self::summary()`])
/// or a metrics exposition ([`Self::render()`]). Mapping and rendering must not fail on
/// missing upstream fields.
#[async_trait]
pub trait Adapter: Send + Sync + 'static {
    /// Flat record produced from upstream data.
    type Snapshot: Send + Sync + 'static;

    /// Short name used in logs (e.g., `glances`).
    fn name(&self) -> &'static str;

    /// Base URL of the polled upstream, for logging.
    fn upstream_url(&self) -> &str;

    /// Fetches upstream data and maps it into a snapshot.
    ///
    /// Failures of optional sections should be handled inside (the section is omitted);
    /// errors returned from here fail the current request.
    async fn refresh(&self) -> Result<Self::Snapshot>;

    /// JSON summary served on the root route.
    fn summary(&self, snapshot: &Self::Snapshot) -> serde_json::Value;

    /// Renders the snapshot into the metrics exposition.
    fn render(&self, snapshot: &Self::Snapshot, exposition: &mut Exposition);

    /// Sanitizer for label values in [`Self::render()`].
    fn label_sanitizer(&self) -> LabelSanitizer {
        LabelSanitizer::Strip
    }

    /// Health of the adapter judged by the cached snapshot (never triggers a refresh).
    /// Returns `None` if the adapter does not expose the `/health` route, which is the default.
    fn health(&self, cached: Option<&Self::Snapshot>) -> Option<HealthStatus> {
        let _ = cached;
        None
    }
}
