//! Command-line interface of the `tapline` binary. Each subcommand runs a single adapter.
//!
//! All options can be supplied via environment variables, so that the binary is a drop-in
//! replacement for containerized exporters configured with `.env` files.

use std::{
    net::{Ipv4Addr, SocketAddr},
    time::Duration,
};

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tapline::{Adapter, AdapterServer, Auth, UpstreamClient};
use tracing_subscriber::EnvFilter;

use crate::{glances, grafana, immich, nest, paperless};

/// Polling metrics adapters for self-hosted services.
#[derive(Debug, Parser)]
#[command(name = "tapline", version, about)]
pub struct Cli {
    /// Options shared by all adapters.
    #[command(flatten)]
    pub common: CommonArgs,
    /// Adapter to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Format of log output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Options shared by all adapters.
#[derive(Debug, Args)]
pub struct CommonArgs {
    /// Port to listen on. Defaults to the adapter-specific port.
    #[arg(long, env = "PORT", global = true)]
    pub port: Option<u16>,
    /// Snapshot cache TTL in seconds; 0 disables caching. Defaults to the adapter-specific TTL.
    #[arg(long, env = "CACHE_TTL", global = true)]
    pub cache_ttl: Option<u64>,
    /// Timeout for upstream requests in seconds.
    #[arg(long, env = "UPSTREAM_TIMEOUT_SECS", default_value_t = 10, global = true)]
    pub upstream_timeout: u64,
    /// Append internal adapter metrics to the `/metrics` output.
    #[arg(long, env = "TAPLINE_SELF_METRICS", global = true)]
    pub self_metrics: bool,
    /// Format of log output. The log level is controlled by `RUST_LOG`.
    #[arg(long, env = "TAPLINE_LOG_FORMAT", value_enum, default_value_t, global = true)]
    pub log_format: LogFormat,
}

impl CommonArgs {
    fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout)
    }

    fn cache_ttl_or(&self, default: Duration) -> Duration {
        self.cache_ttl.map_or(default, Duration::from_secs)
    }
}

/// Adapter to run.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Glances system monitor (CPU, memory, load, filesystems, network, sensors).
    Glances(GlancesArgs),
    /// Grafana alert rule states.
    Grafana(GrafanaArgs),
    /// Immich job queues and library statistics.
    Immich(ImmichArgs),
    /// Paperless-ngx document statistics and storage size.
    Paperless(PaperlessArgs),
    /// Google Nest thermostat via the Smart Device Management API.
    Nest(NestArgs),
}

/// Options of the Glances adapter.
#[derive(Debug, Args)]
pub struct GlancesArgs {
    /// Base URL of the Glances web server.
    #[arg(long, env = "GLANCES_URL", default_value = glances::DEFAULT_URL)]
    pub url: String,
}

/// Options of the Grafana adapter.
#[derive(Debug, Args)]
pub struct GrafanaArgs {
    /// Base URL of Grafana.
    #[arg(long, env = "GRAFANA_URL", default_value = grafana::DEFAULT_URL)]
    pub url: String,
    /// Service account token; requests are unauthenticated if not set.
    #[arg(long, env = "GRAFANA_TOKEN", hide_env_values = true)]
    pub token: Option<String>,
}

/// Options of the Immich adapter.
#[derive(Debug, Args)]
pub struct ImmichArgs {
    /// Base URL of Immich.
    #[arg(long, env = "IMMICH_URL", default_value = immich::DEFAULT_URL)]
    pub url: String,
    /// API key used for all requests.
    #[arg(long, env = "IMMICH_API_KEY", hide_env_values = true, default_value = "")]
    pub api_key: String,
    /// Admin API key for library statistics; defaults to the main API key.
    #[arg(long, env = "IMMICH_STATS_API_KEY", hide_env_values = true)]
    pub stats_api_key: Option<String>,
}

/// Options of the Paperless adapter.
#[derive(Debug, Args)]
pub struct PaperlessArgs {
    /// Base URL of Paperless-ngx.
    #[arg(long, env = "PAPERLESS_URL", default_value = paperless::DEFAULT_URL)]
    pub url: String,
    /// API token.
    #[arg(long, env = "PAPERLESS_TOKEN", hide_env_values = true, default_value = "")]
    pub token: String,
}

/// Options of the Nest adapter.
#[derive(Debug, Args)]
pub struct NestArgs {
    /// Interval between polls of the SDM API in seconds; overridden by `--cache-ttl`.
    #[arg(long, env = "POLL_INTERVAL", default_value_t = nest::DEFAULT_POLL_INTERVAL.as_secs())]
    pub poll_interval: u64,
    /// Device Access project ID.
    #[arg(long, env = "SDM_PROJECT_ID")]
    pub project_id: Option<String>,
    /// OAuth client ID.
    #[arg(long, env = "GOOGLE_CLIENT_ID")]
    pub client_id: Option<String>,
    /// OAuth client secret.
    #[arg(long, env = "GOOGLE_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,
    /// OAuth refresh token.
    #[arg(long, env = "GOOGLE_REFRESH_TOKEN", hide_env_values = true)]
    pub refresh_token: Option<String>,
    /// Base URL of the SDM API.
    #[arg(long, env = "SDM_API_BASE", default_value = nest::DEFAULT_API_BASE)]
    pub api_base: String,
    /// OAuth2 token endpoint.
    #[arg(long, env = "GOOGLE_TOKEN_URL", default_value = nest::DEFAULT_TOKEN_URL)]
    pub token_url: String,
}

impl NestArgs {
    /// Converts arguments to adapter settings.
    pub fn settings(&self) -> nest::NestSettings {
        nest::NestSettings {
            project_id: self.project_id.clone().unwrap_or_default(),
            client_id: self.client_id.clone().unwrap_or_default(),
            client_secret: self.client_secret.clone().unwrap_or_default(),
            refresh_token: self.refresh_token.clone().unwrap_or_default(),
            api_base: self.api_base.clone(),
            token_url: self.token_url.clone(),
        }
    }
}

/// Installs the global `tracing` subscriber. The filter is read from `RUST_LOG` (`info` by default).
pub fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

impl Cli {
    /// Runs the selected adapter until the process receives Ctrl+C.
    ///
    /// # Errors
    ///
    /// Returns an error if the adapter cannot be initialized, or if the server fails.
    pub async fn run(self) -> anyhow::Result<()> {
        let common = &self.common;
        let timeout = common.upstream_timeout();
        match self.command {
            Command::Glances(args) => {
                let client = UpstreamClient::new(&args.url, Auth::None, timeout)?;
                let adapter = glances::GlancesAdapter::new(client);
                serve(adapter, common, glances::DEFAULT_PORT, Duration::ZERO).await
            }
            Command::Grafana(args) => {
                let auth = args
                    .token
                    .filter(|token| !token.is_empty())
                    .map_or(Auth::None, Auth::Bearer);
                let client = UpstreamClient::new(&args.url, auth, timeout)?;
                let adapter = grafana::GrafanaAdapter::new(client);
                serve(adapter, common, grafana::DEFAULT_PORT, grafana::DEFAULT_CACHE_TTL).await
            }
            Command::Immich(args) => {
                let adapter = immich::ImmichAdapter::new(
                    &args.url,
                    &args.api_key,
                    args.stats_api_key.as_deref(),
                    timeout,
                )?;
                serve(adapter, common, immich::DEFAULT_PORT, Duration::ZERO).await
            }
            Command::Paperless(args) => {
                let adapter = paperless::PaperlessAdapter::new(&args.url, &args.token, timeout)?;
                serve(adapter, common, paperless::DEFAULT_PORT, paperless::DEFAULT_CACHE_TTL).await
            }
            Command::Nest(args) => {
                let poll_interval = Duration::from_secs(args.poll_interval);
                let adapter = nest::NestAdapter::new(args.settings())
                    .context("cannot start Nest adapter")?;
                serve(adapter, common, nest::DEFAULT_PORT, poll_interval).await
            }
        }
    }
}

async fn serve<A: Adapter>(
    adapter: A,
    common: &CommonArgs,
    default_port: u16,
    default_ttl: Duration,
) -> anyhow::Result<()> {
    let bind_address = SocketAddr::from((Ipv4Addr::UNSPECIFIED, common.port.unwrap_or(default_port)));
    AdapterServer::new(adapter, common.cache_ttl_or(default_ttl))
        .with_self_metrics(common.self_metrics)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(%err, "Failed listening to Ctrl+C; shutting down");
            }
        })
        .start(bind_address)
        .await
        .with_context(|| format!("failed serving on {bind_address}"))
}
