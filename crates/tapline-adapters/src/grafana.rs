//! Adapter summarizing alert rule states from Grafana's Prometheus-compatible rules API.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tapline::{
    mapping::{str_or, EnumReading},
    Adapter, Error, Exposition, LabelSanitizer, Result, UpstreamClient,
};

/// Default port of the adapter server.
pub const DEFAULT_PORT: u16 = 8080;
/// Default Grafana base URL.
pub const DEFAULT_URL: &str = "http://localhost:3030";
/// Default snapshot cache TTL.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);

const RULES_PATH: &str = "/api/prometheus/grafana/api/v1/rules";
const STATE_CODES: &[(&str, u8)] = &[("firing", 2), ("pending", 1)];

/// State of a single alert rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertRule {
    /// Rule name (`unknown` if missing).
    pub name: String,
    /// Value of the `severity` label (`unknown` if missing).
    pub severity: String,
    /// Rule state: `firing` (2), `pending` (1) or anything else (0, normal).
    pub state: EnumReading,
}

/// Alert rule counts by state together with per-rule states.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlertsSnapshot {
    /// Number of firing rules.
    pub firing: u64,
    /// Number of pending rules.
    pub pending: u64,
    /// Number of rules in any other state.
    pub normal: u64,
    /// All rules in the order they are listed by Grafana.
    pub rules: Vec<AlertRule>,
}

impl AlertsSnapshot {
    /// Total number of rules.
    pub fn total(&self) -> u64 {
        self.firing + self.pending + self.normal
    }

    /// Names of firing rules.
    pub fn firing_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.rules
            .iter()
            .filter(|rule| rule.state.code == 2)
            .map(|rule| rule.name.as_str())
    }
}

/// Maps the rules API response (`{"data": {"groups": [{"rules": [...]}]}}`).
pub fn map_rules(payload: &Value) -> AlertsSnapshot {
    let groups = payload
        .get("data")
        .and_then(|data| data.get("groups"))
        .and_then(Value::as_array)
        .map_or(&[][..], Vec::as_slice);

    let mut snapshot = AlertsSnapshot::default();
    let rules = groups
        .iter()
        .filter_map(|group| group.get("rules")?.as_array())
        .flatten();
    for rule in rules {
        let state = EnumReading::new(str_or(rule, "state", "inactive"), STATE_CODES);
        match state.code {
            2 => snapshot.firing += 1,
            1 => snapshot.pending += 1,
            _ => snapshot.normal += 1,
        }
        let severity = rule
            .get("labels")
            .map_or("unknown", |labels| str_or(labels, "severity", "unknown"));
        snapshot.rules.push(AlertRule {
            name: str_or(rule, "name", "unknown").to_owned(),
            severity: severity.to_owned(),
            state,
        });
    }
    snapshot
}

/// Grafana alerts adapter.
#[derive(Debug)]
pub struct GrafanaAdapter {
    client: UpstreamClient,
}

impl GrafanaAdapter {
    /// Creates an adapter polling the Grafana instance behind `client`.
    pub fn new(client: UpstreamClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Adapter for GrafanaAdapter {
    type Snapshot = AlertsSnapshot;

    fn name(&self) -> &'static str {
        "grafana"
    }

    fn upstream_url(&self) -> &str {
        self.client.base_url()
    }

    async fn refresh(&self) -> Result<AlertsSnapshot> {
        let payload: Value = self.client.get_json(RULES_PATH).await?;
        if !payload.is_object() {
            return Err(Error::bad_response(
                self.client.url(RULES_PATH),
                "expected a JSON object",
            ));
        }
        let snapshot = map_rules(&payload);
        tracing::debug!(
            firing = snapshot.firing,
            pending = snapshot.pending,
            total = snapshot.total(),
            "Mapped Grafana alert rules"
        );
        Ok(snapshot)
    }

    fn summary(&self, snapshot: &AlertsSnapshot) -> Value {
        let per_alert: Vec<_> = snapshot
            .rules
            .iter()
            .map(|rule| json!([rule.name, rule.severity, rule.state.code]))
            .collect();
        json!({
            "firing": snapshot.firing,
            "pending": snapshot.pending,
            "normal": snapshot.normal,
            "total": snapshot.total(),
            "alerts": snapshot.firing_names().collect::<Vec<_>>(),
            "per_alert": per_alert,
        })
    }

    fn render(&self, snapshot: &AlertsSnapshot, exposition: &mut Exposition) {
        exposition
            .gauge("grafana_alerts_firing", "Number of currently firing alerts")
            .set(snapshot.firing);
        exposition
            .gauge("grafana_alerts_pending", "Number of pending alerts")
            .set(snapshot.pending);
        exposition
            .gauge("grafana_alerts_normal", "Number of normal/inactive alerts")
            .set(snapshot.normal);
        exposition
            .gauge("grafana_alerts_total", "Total number of alert rules")
            .set(snapshot.total());

        let mut family = exposition.gauge(
            "grafana_alert_state",
            "Per-alert state (0=normal, 1=pending, 2=firing)",
        );
        for rule in &snapshot.rules {
            family.sample(
                &[("alertname", &rule.name), ("severity", &rule.severity)],
                rule.state.code,
            );
        }
    }

    fn label_sanitizer(&self) -> LabelSanitizer {
        LabelSanitizer::EscapeQuotes
    }
}
