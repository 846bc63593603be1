//! Core of polling metrics adapters: small HTTP services that poll a self-hosted upstream
//! (a system monitor, an alerting service, a photo library etc.), map its JSON into a flat
//! snapshot, and serve the snapshot as a JSON summary and in the Prometheus text exposition format.
//!
//! # Overview
//!
//! - [`Adapter`] is implemented by each upstream-specific adapter. It fetches and maps
//!   upstream data and knows how to summarize and render the resulting snapshot.
//! - [`AdapterServer`] serves an adapter over HTTP, caching snapshots in a [`SnapshotCache`].
//! - [`UpstreamClient`] performs authenticated JSON requests to the upstream, with timeouts,
//!   pagination and `HEAD` size probes.
//! - [`TokenProvider`] obtains OAuth2 access tokens using a refresh token.
//! - [`Exposition`] renders gauges with proper `HELP` / `TYPE` headers and label sanitization.
//!
//! # Examples
//!
//! ```no_run
//! use async_trait::async_trait;
//! use serde_json::json;
//! use tapline::{Adapter, AdapterServer, Exposition, UpstreamClient};
//! # use std::{net::Ipv4Addr, time::Duration};
//!
//! #[derive(Debug)]
//! struct Uptime(UpstreamClient);
//!
//! #[async_trait]
//! impl Adapter for Uptime {
//!     type Snapshot = f64;
//!
//!     fn name(&self) -> &'static str {
//!         "uptime"
//!     }
//!
//!     fn upstream_url(&self) -> &str {
//!         self.0.base_url()
//!     }
//!
//!     async fn refresh(&self) -> tapline::Result<f64> {
//!         let value: serde_json::Value = self.0.get_json("/api/uptime").await?;
//!         Ok(value["seconds"].as_f64().unwrap_or(0.0))
//!     }
//!
//!     fn summary(&self, snapshot: &f64) -> serde_json::Value {
//!         json!({ "uptime": snapshot })
//!     }
//!
//!     fn render(&self, snapshot: &f64, exposition: &mut Exposition) {
//!         exposition
//!             .gauge("uptime_seconds", "Upstream uptime")
//!             .set(*snapshot);
//!     }
//! }
//!
//! # async fn test_intro() -> anyhow::Result<()> {
//! let client = UpstreamClient::new("http://localhost:8000", Default::default(), Duration::from_secs(10))?;
//! AdapterServer::new(Uptime(client), Duration::from_secs(30))
//!     .start((Ipv4Addr::UNSPECIFIED, 9100).into())
//!     .await?;
//! # Ok(())
//! # }
//! ```

// Linter settings.
#![warn(missing_debug_implementations, missing_docs, bare_trait_objects)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::must_use_candidate, clippy::module_name_repetitions)]

pub use crate::{
    adapter::{Adapter, HealthStatus},
    cache::SnapshotCache,
    clock::{Clock, ManualClock, SystemClock},
    credentials::{OAuthCredentials, TokenProvider, EXPIRY_MARGIN},
    error::{Error, Result},
    exposition::{Exposition, GaugeFamily, GaugeValue, LabelSanitizer},
    server::{AdapterServer, BoundServer},
    upstream::{Auth, Page, UpstreamClient},
};

mod adapter;
mod cache;
mod clock;
mod credentials;
mod error;
pub mod exposition;
pub mod mapping;
mod metrics;
mod server;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod upstream;

#[cfg(doctest)]
doc_comment::doctest!("../README.md");
