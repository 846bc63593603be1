//! Polling metrics adapters built on [`tapline`]: one module per supported upstream, plus
//! the command-line interface of the `tapline` binary that runs one adapter per process.
//!
//! | Adapter | Upstream | Default port | Default cache TTL |
//! |---------|----------|--------------|-------------------|
//! | [`glances`] | Glances system monitor | 9101 | none |
//! | [`grafana`] | Grafana alert rules | 8080 | 30s |
//! | [`immich`] | Immich job queues and library statistics | 8080 | none |
//! | [`paperless`] | Paperless-ngx statistics and storage | 8080 | 300s |
//! | [`nest`] | Google Nest thermostat (Smart Device Management API) | 9102 | 60s |

// Linter settings.
#![warn(missing_debug_implementations, missing_docs, bare_trait_objects)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::must_use_candidate, clippy::module_name_repetitions)]

pub mod cli;
pub mod glances;
pub mod grafana;
pub mod immich;
pub mod nest;
pub mod paperless;
