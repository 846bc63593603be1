//! Adapter for a Google Nest thermostat polled via the Smart Device Management (SDM) API.
//!
//! The SDM API is authenticated with short-lived OAuth2 access tokens, which are obtained from
//! a long-lived refresh token by [`TokenProvider`]. The first device whose type contains
//! `THERMOSTAT` is reported; if there is no such device, the adapter serves a "no data" response.

use std::{
    sync::{Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tapline::{
    mapping::{celsius_to_fahrenheit, rfc3339_to_epoch_seconds, str_or, EnumReading},
    Adapter, Auth, Exposition, GaugeValue, HealthStatus, OAuthCredentials, Result, TokenProvider,
    UpstreamClient,
};

/// Default port of the adapter server.
pub const DEFAULT_PORT: u16 = 9102;
/// Default poll interval, i.e. the snapshot cache TTL.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
/// Default base URL of the SDM API.
pub const DEFAULT_API_BASE: &str = "https://smartdevicemanagement.googleapis.com/v1";
/// Default OAuth2 token endpoint.
pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

const DEVICE_TIMEOUT: Duration = Duration::from_secs(15);
const TOKEN_TIMEOUT: Duration = Duration::from_secs(10);

const MODE_CODES: &[(&str, u8)] = &[("OFF", 0), ("HEAT", 1), ("COOL", 2), ("HEATCOOL", 3)];
const ECO_CODES: &[(&str, u8)] = &[("MANUAL_ECO", 1)];
const HVAC_CODES: &[(&str, u8)] = &[("OFF", 0), ("HEATING", 1), ("COOLING", 2)];

/// Settings of the Nest adapter. Empty strings are treated as missing.
#[derive(Clone, Default)]
pub struct NestSettings {
    /// SDM project ID.
    pub project_id: String,
    /// OAuth client ID.
    pub client_id: String,
    /// OAuth client secret.
    pub client_secret: String,
    /// OAuth refresh token.
    pub refresh_token: String,
    /// Base URL of the SDM API.
    pub api_base: String,
    /// OAuth2 token endpoint.
    pub token_url: String,
}

impl std::fmt::Debug for NestSettings {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("NestSettings")
            .field("project_id", &self.project_id)
            .field("client_id", &self.client_id)
            .field("api_base", &self.api_base)
            .field("token_url", &self.token_url)
            .finish_non_exhaustive()
    }
}

impl NestSettings {
    /// Returns environment variable names of the required settings that are missing.
    pub fn missing(&self) -> Vec<&'static str> {
        [
            ("SDM_PROJECT_ID", &self.project_id),
            ("GOOGLE_CLIENT_ID", &self.client_id),
            ("GOOGLE_CLIENT_SECRET", &self.client_secret),
            ("GOOGLE_REFRESH_TOKEN", &self.refresh_token),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.is_empty().then_some(name))
        .collect()
    }
}

/// Errors creating a [`NestAdapter`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SetupError {
    /// Some of the required settings are missing.
    #[error("missing required settings: {}", .0.join(", "))]
    MissingSettings(Vec<&'static str>),
    /// HTTP clients cannot be initialized.
    #[error("cannot initialize Nest adapter: {0}")]
    Client(#[from] tapline::Error),
}

/// Temperature reported in Celsius together with its Fahrenheit conversion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Temperature {
    /// Temperature in Celsius as reported by the API.
    pub celsius: GaugeValue,
    /// Temperature in Fahrenheit rounded to one decimal place.
    pub fahrenheit: f64,
}

impl Temperature {
    fn from_field(object: &Value, key: &str) -> Option<Self> {
        let celsius = object.get(key).and_then(GaugeValue::from_json)?;
        Some(Self {
            celsius,
            fahrenheit: celsius_to_fahrenheit(celsius.as_f64()),
        })
    }
}

/// Thermostat readings.
#[derive(Debug, Clone, PartialEq)]
pub struct ThermostatReading {
    /// Last segment of the device name.
    pub device_id: String,
    /// Ambient temperature.
    pub ambient: Option<Temperature>,
    /// Ambient humidity in percent.
    pub humidity: Option<GaugeValue>,
    /// Thermostat mode: `OFF` (0), `HEAT` (1), `COOL` (2) or `HEATCOOL` (3).
    pub mode: EnumReading,
    /// Eco mode: `MANUAL_ECO` (1) or anything else (0).
    pub eco_mode: EnumReading,
    /// Eco heat setpoint.
    pub eco_heat: Option<Temperature>,
    /// Eco cool setpoint.
    pub eco_cool: Option<Temperature>,
    /// Heat setpoint.
    pub target_heat: Option<Temperature>,
    /// Cool setpoint.
    pub target_cool: Option<Temperature>,
    /// HVAC status: `OFF` (0), `HEATING` (1) or `COOLING` (2).
    pub hvac_status: EnumReading,
    /// Whether the fan timer is on.
    pub fan_active: bool,
    /// Expiration of the fan timer as Unix epoch seconds.
    pub fan_timer_end_seconds: Option<f64>,
    /// Whether the device is online.
    pub online: bool,
}

fn device_trait<'a>(traits: &'a Value, name: &str) -> &'a Value {
    traits
        .get(format!("sdm.devices.traits.{name}"))
        .unwrap_or(&Value::Null)
}

/// Maps a single SDM device into thermostat readings.
pub fn map_thermostat(device: &Value) -> ThermostatReading {
    let name = str_or(device, "name", "unknown");
    let device_id = name.rsplit('/').next().unwrap_or(name);
    let traits = device.get("traits").unwrap_or(&Value::Null);

    let temperature = device_trait(traits, "Temperature");
    let humidity = device_trait(traits, "Humidity");
    let mode = device_trait(traits, "ThermostatMode");
    let eco = device_trait(traits, "ThermostatEco");
    let setpoint = device_trait(traits, "ThermostatTemperatureSetpoint");
    let hvac = device_trait(traits, "ThermostatHvac");
    let fan = device_trait(traits, "Fan");
    let connectivity = device_trait(traits, "Connectivity");

    ThermostatReading {
        device_id: device_id.to_owned(),
        ambient: Temperature::from_field(temperature, "ambientTemperatureCelsius"),
        humidity: humidity
            .get("ambientHumidityPercent")
            .and_then(GaugeValue::from_json),
        mode: EnumReading::new(str_or(mode, "mode", "OFF"), MODE_CODES),
        eco_mode: EnumReading::new(str_or(eco, "mode", "OFF"), ECO_CODES),
        eco_heat: Temperature::from_field(eco, "heatCelsius"),
        eco_cool: Temperature::from_field(eco, "coolCelsius"),
        target_heat: Temperature::from_field(setpoint, "heatCelsius"),
        target_cool: Temperature::from_field(setpoint, "coolCelsius"),
        hvac_status: EnumReading::new(str_or(hvac, "status", "OFF"), HVAC_CODES),
        fan_active: str_or(fan, "timerMode", "OFF") == "ON",
        fan_timer_end_seconds: fan
            .get("timerTimeout")
            .and_then(Value::as_str)
            .and_then(rfc3339_to_epoch_seconds),
        online: str_or(connectivity, "status", "OFFLINE") == "ONLINE",
    }
}

/// Finds the first thermostat in the devices list response and maps it.
pub fn find_thermostat(devices: &Value) -> Option<ThermostatReading> {
    devices
        .get("devices")?
        .as_array()?
        .iter()
        .find(|device| str_or(device, "type", "").contains("THERMOSTAT"))
        .map(map_thermostat)
}

/// Nest thermostat adapter.
#[derive(Debug)]
pub struct NestAdapter {
    client: UpstreamClient,
    tokens: TokenProvider,
    devices_path: String,
    /// Connectivity of the last thermostat found; survives polls that find no thermostat.
    last_online: Mutex<Option<bool>>,
}

impl NestAdapter {
    /// Creates an adapter from the provided settings.
    ///
    /// # Errors
    ///
    /// Returns an error if any required setting is missing, or if HTTP clients cannot be built.
    pub fn new(settings: NestSettings) -> Result<Self, SetupError> {
        let missing = settings.missing();
        if !missing.is_empty() {
            return Err(SetupError::MissingSettings(missing));
        }

        let client = UpstreamClient::new(&settings.api_base, Auth::None, DEVICE_TIMEOUT)?;
        let credentials = OAuthCredentials {
            token_url: settings.token_url,
            client_id: settings.client_id,
            client_secret: settings.client_secret,
            refresh_token: settings.refresh_token,
        };
        Ok(Self {
            client,
            tokens: TokenProvider::new(credentials, TOKEN_TIMEOUT)?,
            devices_path: format!("/enterprises/{}/devices", settings.project_id),
            last_online: Mutex::new(None),
        })
    }

    fn last_online(&self) -> Option<bool> {
        *self.last_online.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn insert_temperature(summary: &mut Map<String, Value>, key: &str, temperature: Option<&Temperature>) {
    if let Some(temperature) = temperature {
        summary.insert(key.to_owned(), json!(temperature.fahrenheit));
    }
}

fn render_temperature(
    exposition: &mut Exposition,
    name: &str,
    help: &str,
    temperature: Option<&Temperature>,
) {
    let Some(temperature) = temperature else {
        return;
    };
    let celsius_name = format!("{name}_celsius");
    exposition
        .gauge(&celsius_name, &format!("{help} in Celsius"))
        .set(temperature.celsius);
    let fahrenheit_name = format!("{name}_fahrenheit");
    exposition
        .gauge(&fahrenheit_name, &format!("{help} in Fahrenheit"))
        .set(temperature.fahrenheit);
}

#[async_trait]
impl Adapter for NestAdapter {
    type Snapshot = Option<ThermostatReading>;

    fn name(&self) -> &'static str {
        "nest"
    }

    fn upstream_url(&self) -> &str {
        self.client.base_url()
    }

    async fn refresh(&self) -> Result<Option<ThermostatReading>> {
        let token = self.tokens.access_token().await?;
        let devices: Value = self
            .client
            .get_json_with_bearer(&self.devices_path, &token)
            .await?;
        let reading = find_thermostat(&devices);
        if let Some(reading) = &reading {
            *self.last_online.lock().unwrap_or_else(PoisonError::into_inner) = Some(reading.online);
        } else {
            tracing::warn!(path = %self.devices_path, "No thermostat among SDM devices");
        }
        Ok(reading)
    }

    fn summary(&self, snapshot: &Option<ThermostatReading>) -> Value {
        let Some(reading) = snapshot else {
            return json!({ "error": "no data" });
        };

        let mut summary = Map::new();
        if let Some(ambient) = &reading.ambient {
            summary.insert("temperature_f".to_owned(), json!(ambient.fahrenheit));
            summary.insert("temperature_c".to_owned(), json!(ambient.celsius));
        }
        insert_temperature(&mut summary, "target_heat_f", reading.target_heat.as_ref());
        insert_temperature(&mut summary, "target_cool_f", reading.target_cool.as_ref());
        if let Some(humidity) = reading.humidity {
            summary.insert("humidity".to_owned(), json!(humidity));
        }
        summary.insert("hvac_status".to_owned(), json!(reading.hvac_status.raw));
        summary.insert("mode".to_owned(), json!(reading.mode.raw));
        summary.insert("eco_mode".to_owned(), json!(reading.eco_mode.raw));
        insert_temperature(&mut summary, "eco_heat_f", reading.eco_heat.as_ref());
        insert_temperature(&mut summary, "eco_cool_f", reading.eco_cool.as_ref());
        summary.insert("fan_active".to_owned(), json!(reading.fan_active));
        summary.insert("online".to_owned(), json!(reading.online));
        Value::Object(summary)
    }

    fn render(&self, snapshot: &Option<ThermostatReading>, exposition: &mut Exposition) {
        let Some(reading) = snapshot else {
            exposition.comment("No thermostat data available");
            return;
        };

        render_temperature(
            exposition,
            "nest_ambient_temperature",
            "Current room temperature",
            reading.ambient.as_ref(),
        );
        render_temperature(
            exposition,
            "nest_target_temperature_heat",
            "Heat setpoint",
            reading.target_heat.as_ref(),
        );
        render_temperature(
            exposition,
            "nest_target_temperature_cool",
            "Cool setpoint",
            reading.target_cool.as_ref(),
        );
        if let Some(humidity) = reading.humidity {
            exposition
                .gauge("nest_humidity_percent", "Current room humidity percentage")
                .set(humidity);
        }
        exposition
            .gauge("nest_hvac_status", "HVAC status: 0=OFF, 1=HEATING, 2=COOLING")
            .set(reading.hvac_status.code);
        exposition
            .gauge(
                "nest_thermostat_mode",
                "Thermostat mode: 0=OFF, 1=HEAT, 2=COOL, 3=HEATCOOL",
            )
            .set(reading.mode.code);
        exposition
            .gauge("nest_eco_mode", "Eco mode: 0=OFF, 1=MANUAL_ECO")
            .set(reading.eco_mode.code);
        render_temperature(
            exposition,
            "nest_eco_temperature_heat",
            "Eco heat setpoint",
            reading.eco_heat.as_ref(),
        );
        render_temperature(
            exposition,
            "nest_eco_temperature_cool",
            "Eco cool setpoint",
            reading.eco_cool.as_ref(),
        );
        exposition
            .gauge("nest_fan_active", "Fan timer: 0=OFF, 1=ON")
            .set(reading.fan_active);
        if let Some(timer_end) = reading.fan_timer_end_seconds {
            exposition
                .gauge(
                    "nest_fan_timer_end_seconds",
                    "Unix timestamp when fan timer expires",
                )
                .set(timer_end);
        }
        exposition
            .gauge(
                "nest_connectivity",
                "Device connectivity: 0=OFFLINE, 1=ONLINE",
            )
            .set(reading.online);
    }

    fn health(&self, cached: Option<&Option<ThermostatReading>>) -> Option<HealthStatus> {
        // Polls that find no thermostat keep the health of the last reading.
        let online = cached
            .and_then(Option::as_ref)
            .map(|reading| reading.online)
            .or_else(|| self.last_online())
            .unwrap_or(false);
        Some(if online {
            HealthStatus::Ok
        } else {
            HealthStatus::NoData
        })
    }
}
