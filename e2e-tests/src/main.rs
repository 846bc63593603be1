//! Mock upstream app serving canned API responses for all supported adapters from a single server.

use serde_json::json;
use tapline::testing::{MockResponse, MockUpstream, MockUpstreamBuilder};

/// SDM project ID expected by the mocked devices endpoint.
const NEST_PROJECT_ID: &str = "e2e-project";

fn glances(builder: MockUpstreamBuilder) -> MockUpstreamBuilder {
    builder
        .route("/api/4/cpu", MockResponse::json(&json!({ "total": 7.5 })))
        .route(
            "/api/4/mem",
            MockResponse::json(&json!({ "used": 1_073_741_824_u64, "total": 4_294_967_296_u64, "percent": 25.0 })),
        )
        .route(
            "/api/4/load",
            MockResponse::json(&json!({ "min1": 0.42, "min5": 0.3, "min15": 0.25 })),
        )
        .route(
            "/api/4/fs",
            MockResponse::json(&json!([
                { "mnt_point": "/", "used": 5_000, "size": 20_000, "percent": 25.0 },
                { "mnt_point": "/data", "used": 750, "size": 1_000, "percent": 75.0 },
                { "mnt_point": "/data", "used": 1, "size": 1, "percent": 100.0 },
            ])),
        )
        .route(
            "/api/4/network",
            MockResponse::json(&json!([
                { "interface_name": "eth0", "bytes_recv_rate_per_sec": 2048, "bytes_sent_rate_per_sec": 512 },
            ])),
        )
        // Sensors are intentionally broken; other sections must still be served.
        .route("/api/4/sensors", MockResponse::text(500, "sensors unavailable"))
}

fn grafana(builder: MockUpstreamBuilder) -> MockUpstreamBuilder {
    let rules = json!({
        "status": "success",
        "data": {
            "groups": [{
                "name": "homelab",
                "rules": [
                    { "name": "DiskAlmostFull", "state": "firing", "labels": { "severity": "critical" } },
                    { "name": "Backup \"nightly\"", "state": "inactive", "labels": { "severity": "info" } },
                ],
            }],
        },
    });
    builder.route(
        "/api/prometheus/grafana/api/v1/rules",
        MockResponse::json(&rules),
    )
}

fn immich(builder: MockUpstreamBuilder) -> MockUpstreamBuilder {
    let jobs = json!({
        "thumbnailGeneration": { "jobCounts": { "active": 2, "waiting": 5, "failed": 0, "delayed": 0, "paused": 0 } },
        "faceDetection": { "jobCounts": { "active": 1, "waiting": 0, "failed": 3, "delayed": 1, "paused": 1 } },
    });
    let statistics = json!({
        "photos": 150,
        "videos": 10,
        "usage": 123_456,
        "usageByUser": [
            { "userName": "admin", "photos": 100, "videos": 10, "usage": 100_000 },
            { "userName": "guest", "photos": 50, "videos": 0, "usage": 23_456 },
        ],
    });
    builder
        .route("/api/jobs", MockResponse::json(&jobs))
        .route("/api/server/statistics", MockResponse::json(&statistics))
}

fn paperless(builder: MockUpstreamBuilder) -> MockUpstreamBuilder {
    let statistics = json!({
        "documents_total": 2,
        "character_count": 4_096,
        "document_file_type_counts": [
            { "mime_type": "application/pdf", "mime_type_count": 2 },
        ],
    });
    builder
        .route("/api/statistics/", MockResponse::json(&statistics))
        .route(
            "/api/documents/?page=1&page_size=100&fields=id",
            MockResponse::json(&json!({ "count": 2, "next": null, "results": [{ "id": 10 }, { "id": 11 }] })),
        )
        .route("/api/documents/10/download/", MockResponse::sized(300))
        .route("/api/documents/11/download/", MockResponse::sized(200))
        .route(
            "/api/tasks/",
            MockResponse::json(&json!([{ "status": "STARTED" }, { "status": "SUCCESS" }])),
        )
}

fn nest(builder: MockUpstreamBuilder) -> MockUpstreamBuilder {
    let devices = json!({
        "devices": [{
            "name": format!("enterprises/{NEST_PROJECT_ID}/devices/thermostat-1"),
            "type": "sdm.devices.types.THERMOSTAT",
            "traits": {
                "sdm.devices.traits.Temperature": { "ambientTemperatureCelsius": 21.5 },
                "sdm.devices.traits.Humidity": { "ambientHumidityPercent": 40 },
                "sdm.devices.traits.ThermostatMode": { "mode": "HEATCOOL" },
                "sdm.devices.traits.ThermostatHvac": { "status": "COOLING" },
                "sdm.devices.traits.ThermostatTemperatureSetpoint": { "heatCelsius": 19.0, "coolCelsius": 24.0 },
                "sdm.devices.traits.Connectivity": { "status": "ONLINE" },
            },
        }],
    });
    builder
        .route(
            "/token",
            MockResponse::json(&json!({ "access_token": "e2e-access-token", "expires_in": 3_600 })),
        )
        .route(
            &format!("/enterprises/{NEST_PROJECT_ID}/devices"),
            MockResponse::json(&devices),
        )
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let builder = MockUpstream::builder();
    let builder = nest(paperless(immich(grafana(glances(builder)))));
    let upstream = builder.start().await;

    println!("local_addr={}", upstream.local_addr());
    // ^ Print the local server address so that it can be used in integration tests
    tokio::signal::ctrl_c().await.ok();
}
