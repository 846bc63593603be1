//! Adapter for the Glances system monitor REST API (v4).
//!
//! Each API section (CPU, memory, load, filesystems, network and sensors) is fetched independently;
//! a section that cannot be fetched is omitted from the output while the others are still served.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use tapline::{
    mapping::{number_or_zero, optional_section, str_or},
    Adapter, Exposition, GaugeValue, LabelSanitizer, Result, UpstreamClient,
};

/// Default port of the adapter server.
pub const DEFAULT_PORT: u16 = 9101;
/// Default Glances base URL.
pub const DEFAULT_URL: &str = "http://localhost:61208";

const NAME: &str = "glances";
const API_PREFIX: &str = "/api/4";
const SANITIZER: LabelSanitizer = LabelSanitizer::Strip;

/// Memory usage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MemoryReading {
    /// Used memory in bytes.
    pub used: GaugeValue,
    /// Total memory in bytes.
    pub total: GaugeValue,
    /// Usage percentage.
    pub percent: GaugeValue,
}

/// Load averages.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LoadReading {
    /// 1-minute load average.
    pub min1: GaugeValue,
    /// 5-minute load average.
    pub min5: GaugeValue,
    /// 15-minute load average.
    pub min15: GaugeValue,
}

/// Usage of a mounted filesystem.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilesystemReading {
    /// Mount point, used as the `mountpoint` label.
    pub mountpoint: String,
    /// Used bytes.
    pub used: GaugeValue,
    /// Total size in bytes.
    pub size: GaugeValue,
    /// Usage percentage.
    pub percent: GaugeValue,
}

/// Throughput of a network interface.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterfaceReading {
    /// Interface name, used as the `interface` label.
    pub interface: String,
    /// Received bytes per second.
    pub rx_bytes_per_sec: GaugeValue,
    /// Sent bytes per second.
    pub tx_bytes_per_sec: GaugeValue,
}

/// Reading of a CPU core temperature sensor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorReading {
    /// Sensor label.
    pub label: String,
    /// Temperature in Celsius.
    pub celsius: GaugeValue,
}

/// Flat record produced from all Glances sections. Sections that could not be fetched are `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GlancesSnapshot {
    /// Total CPU usage percentage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_percent: Option<GaugeValue>,
    /// Memory usage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryReading>,
    /// Load averages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load: Option<LoadReading>,
    /// Filesystems, de-duplicated by mount point.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filesystems: Option<Vec<FilesystemReading>>,
    /// Network interfaces.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<Vec<InterfaceReading>>,
    /// CPU core temperature sensors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperatures: Option<Vec<SensorReading>>,
}

/// Maps the `cpu` section.
pub fn map_cpu(cpu: &Value) -> GaugeValue {
    number_or_zero(cpu, "total")
}

/// Maps the `mem` section.
pub fn map_memory(mem: &Value) -> MemoryReading {
    MemoryReading {
        used: number_or_zero(mem, "used"),
        total: number_or_zero(mem, "total"),
        percent: number_or_zero(mem, "percent"),
    }
}

/// Maps the `load` section.
pub fn map_load(load: &Value) -> LoadReading {
    LoadReading {
        min1: number_or_zero(load, "min1"),
        min5: number_or_zero(load, "min5"),
        min15: number_or_zero(load, "min15"),
    }
}

/// Maps the `fs` section. Glances may list the same mount point several times (e.g., for bind mounts);
/// only the first entry for each (sanitized) mount point is kept.
pub fn map_filesystems(entries: &[Value]) -> Vec<FilesystemReading> {
    let mut seen = HashSet::new();
    entries
        .iter()
        .filter_map(|fs| {
            let mountpoint = SANITIZER.apply(str_or(fs, "mnt_point", "unknown")).into_owned();
            if !seen.insert(mountpoint.clone()) {
                return None;
            }
            Some(FilesystemReading {
                mountpoint,
                used: number_or_zero(fs, "used"),
                size: number_or_zero(fs, "size"),
                percent: number_or_zero(fs, "percent"),
            })
        })
        .collect()
}

/// Maps the `network` section.
pub fn map_network(entries: &[Value]) -> Vec<InterfaceReading> {
    entries
        .iter()
        .map(|iface| InterfaceReading {
            interface: str_or(iface, "interface_name", "unknown").to_owned(),
            rx_bytes_per_sec: number_or_zero(iface, "bytes_recv_rate_per_sec"),
            tx_bytes_per_sec: number_or_zero(iface, "bytes_sent_rate_per_sec"),
        })
        .collect()
}

/// Maps the `sensors` section, keeping only CPU core temperature sensors.
pub fn map_sensors(entries: &[Value]) -> Vec<SensorReading> {
    entries
        .iter()
        .filter(|sensor| sensor.get("type").and_then(Value::as_str) == Some("temperature_core"))
        .map(|sensor| SensorReading {
            label: str_or(sensor, "label", "unknown").to_owned(),
            celsius: number_or_zero(sensor, "value"),
        })
        .collect()
}

/// Glances adapter.
#[derive(Debug)]
pub struct GlancesAdapter {
    client: UpstreamClient,
}

impl GlancesAdapter {
    /// Creates an adapter polling the Glances instance behind `client`.
    pub fn new(client: UpstreamClient) -> Self {
        Self { client }
    }

    async fn fetch<T: DeserializeOwned>(&self, section: &str) -> Result<T> {
        self.client.get_json(&format!("{API_PREFIX}/{section}")).await
    }
}

#[async_trait]
impl Adapter for GlancesAdapter {
    type Snapshot = GlancesSnapshot;

    fn name(&self) -> &'static str {
        NAME
    }

    fn upstream_url(&self) -> &str {
        self.client.base_url()
    }

    async fn refresh(&self) -> Result<GlancesSnapshot> {
        let (cpu, mem, load, fs, network, sensors) = tokio::join!(
            self.fetch::<Map<String, Value>>("cpu"),
            self.fetch::<Map<String, Value>>("mem"),
            self.fetch::<Map<String, Value>>("load"),
            self.fetch::<Vec<Value>>("fs"),
            self.fetch::<Vec<Value>>("network"),
            self.fetch::<Vec<Value>>("sensors"),
        );

        Ok(GlancesSnapshot {
            cpu_percent: optional_section(NAME, "cpu", cpu).map(|cpu| map_cpu(&cpu.into())),
            memory: optional_section(NAME, "mem", mem).map(|mem| map_memory(&mem.into())),
            load: optional_section(NAME, "load", load).map(|load| map_load(&load.into())),
            filesystems: optional_section(NAME, "fs", fs).map(|fs| map_filesystems(&fs)),
            network: optional_section(NAME, "network", network).map(|net| map_network(&net)),
            temperatures: optional_section(NAME, "sensors", sensors).map(|s| map_sensors(&s)),
        })
    }

    fn summary(&self, snapshot: &GlancesSnapshot) -> Value {
        serde_json::to_value(snapshot).unwrap()
        // ^ `unwrap()` is safe; the snapshot only contains strings and numbers
    }

    fn render(&self, snapshot: &GlancesSnapshot, exposition: &mut Exposition) {
        if let Some(cpu_percent) = snapshot.cpu_percent {
            exposition
                .gauge("glances_cpu_percent", "CPU usage percentage")
                .set(cpu_percent);
        }

        if let Some(memory) = &snapshot.memory {
            exposition
                .gauge("glances_memory_used_bytes", "Memory used in bytes")
                .set(memory.used);
            exposition
                .gauge("glances_memory_total_bytes", "Total memory in bytes")
                .set(memory.total);
            exposition
                .gauge("glances_memory_percent", "Memory usage percentage")
                .set(memory.percent);
        }

        if let Some(load) = &snapshot.load {
            exposition
                .gauge("glances_load_1", "1-minute load average")
                .set(load.min1);
            exposition
                .gauge("glances_load_5", "5-minute load average")
                .set(load.min5);
            exposition
                .gauge("glances_load_15", "15-minute load average")
                .set(load.min15);
        }

        if let Some(filesystems) = &snapshot.filesystems {
            let fields: [(&str, &str, fn(&FilesystemReading) -> GaugeValue); 3] = [
                ("glances_fs_used_bytes", "Filesystem used bytes", |fs| fs.used),
                ("glances_fs_size_bytes", "Filesystem total size bytes", |fs| fs.size),
                ("glances_fs_percent", "Filesystem usage percentage", |fs| fs.percent),
            ];
            for (name, help, field) in fields {
                let mut family = exposition.gauge(name, help);
                for fs in filesystems {
                    family.sample(&[("mountpoint", &fs.mountpoint)], field(fs));
                }
            }
        }

        if let Some(network) = &snapshot.network {
            let mut family = exposition.gauge(
                "glances_network_rx_bytes_per_sec",
                "Network bytes received per second",
            );
            for iface in network {
                family.sample(&[("interface", &iface.interface)], iface.rx_bytes_per_sec);
            }
            let mut family = exposition.gauge(
                "glances_network_tx_bytes_per_sec",
                "Network bytes sent per second",
            );
            for iface in network {
                family.sample(&[("interface", &iface.interface)], iface.tx_bytes_per_sec);
            }
        }

        if let Some(temperatures) = &snapshot.temperatures {
            let mut family =
                exposition.gauge("glances_temperature_celsius", "Temperature sensor reading");
            for sensor in temperatures {
                family.sample(&[("label", &sensor.label)], sensor.celsius);
            }
        }
    }

    fn label_sanitizer(&self) -> LabelSanitizer {
        SANITIZER
    }
}
