//! Helpers shared by field mappers of all deployments.
//!
//! Mappers work on decoded JSON and never fail on missing data: numeric fields fall back to 0,
//! optional fields become `None`, and unknown enum values map to code 0.

use chrono::DateTime;
use serde_json::Value;

use crate::{exposition::GaugeValue, Error};

/// Converts a Celsius temperature to Fahrenheit, rounded to one decimal place.
///
/// Rounding is applied to the exact binary value of the unrounded result, so that 0.25 °C
/// (32.45000000000000284 °F) maps to 32.5 °F, while the exact tie 21.25 °C (70.25 °F) maps to 70.2 °F.
pub fn celsius_to_fahrenheit(celsius: f64) -> f64 {
    let fahrenheit = celsius * 9.0 / 5.0 + 32.0;
    // Fixed-precision formatting rounds the exact value; scaling by 10 would not.
    format!("{fahrenheit:.1}").parse().unwrap_or(fahrenheit)
}

/// Parses an RFC 3339 timestamp into Unix epoch seconds (with a fractional part).
/// Returns `None` if the timestamp is malformed.
pub fn rfc3339_to_epoch_seconds(timestamp: &str) -> Option<f64> {
    let parsed = DateTime::parse_from_rfc3339(timestamp).ok()?;
    #[allow(clippy::cast_precision_loss)]
    let seconds = parsed.timestamp() as f64 + f64::from(parsed.timestamp_subsec_nanos()) / 1e9;
    Some(seconds)
}

/// Enum-like upstream string together with its numeric code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumReading {
    /// Numeric code reported as a gauge; 0 for unknown values.
    pub code: u8,
    /// Original upstream string.
    pub raw: String,
}

impl EnumReading {
    /// Maps `raw` using `table`. Values missing from the table get code 0.
    pub fn new(raw: &str, table: &[(&str, u8)]) -> Self {
        let code = table
            .iter()
            .find_map(|&(name, code)| (name == raw).then_some(code))
            .unwrap_or(0);
        Self {
            code,
            raw: raw.to_owned(),
        }
    }
}

/// Returns a numeric field of a JSON object, or integer 0 if it is missing or not a number.
pub fn number_or_zero(object: &Value, key: &str) -> GaugeValue {
    object
        .get(key)
        .and_then(GaugeValue::from_json)
        .unwrap_or_default()
}

/// Returns an integer count from a JSON object, or 0 if it is missing. Floats are truncated.
#[allow(clippy::cast_possible_truncation)]
pub fn count_or_zero(object: &Value, key: &str) -> i64 {
    match object.get(key).and_then(GaugeValue::from_json) {
        Some(GaugeValue::Int(value)) => value,
        Some(GaugeValue::Float(value)) => value as i64,
        None => 0,
    }
}

/// Returns a string field of a JSON object, or `default` if it is missing or not a string.
pub fn str_or<'a>(object: &'a Value, key: &str, default: &'a str) -> &'a str {
    object.get(key).and_then(Value::as_str).unwrap_or(default)
}

/// Checks whether a JSON value is "truthy": `true`, a non-zero number or a non-empty string.
pub fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(number)) => number.as_f64().is_some_and(|value| value != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(fields)) => !fields.is_empty(),
    }
}

/// Turns the result of fetching an optional section into an `Option`, logging the error.
///
/// A failed section never aborts its siblings; the section is simply omitted from the output.
pub fn optional_section<T>(adapter: &str, section: &str, result: Result<T, Error>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(
                %err,
                adapter,
                section,
                kind = err.kind(),
                "Section `{section}` is unavailable; omitting it"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    #[allow(clippy::float_cmp)]
    fn converting_celsius_to_fahrenheit() {
        assert_eq!(celsius_to_fahrenheit(0.0), 32.0);
        assert_eq!(celsius_to_fahrenheit(100.0), 212.0);
        assert_eq!(celsius_to_fahrenheit(21.5), 70.7);
        assert_eq!(celsius_to_fahrenheit(-40.0), -40.0);
        assert_eq!(celsius_to_fahrenheit(21.25), 70.2);
        assert_eq!(celsius_to_fahrenheit(19.444), 67.0);
        // Near-ties are rounded by their exact binary value.
        assert_eq!(celsius_to_fahrenheit(0.25), 32.5);
        assert_eq!(celsius_to_fahrenheit(3.25), 37.9);
        assert_eq!(celsius_to_fahrenheit(10.25), 50.5);
    }

    #[test]
    fn parsing_rfc3339_timestamps() {
        let seconds = rfc3339_to_epoch_seconds("2024-01-01T00:00:00Z").unwrap();
        assert!((seconds - 1_704_067_200.0).abs() < 1e-6);
        let seconds = rfc3339_to_epoch_seconds("2024-01-01T01:00:00.5+01:00").unwrap();
        assert!((seconds - 1_704_067_200.5).abs() < 1e-6);

        assert_eq!(rfc3339_to_epoch_seconds("yesterday"), None);
        assert_eq!(rfc3339_to_epoch_seconds(""), None);
    }

    #[test]
    fn mapping_enums() {
        const MODES: &[(&str, u8)] = &[("OFF", 0), ("HEAT", 1), ("COOL", 2)];

        assert_eq!(EnumReading::new("COOL", MODES).code, 2);
        let unknown = EnumReading::new("SUPERHEAT", MODES);
        assert_eq!(unknown.code, 0);
        assert_eq!(unknown.raw, "SUPERHEAT");
    }

    #[test]
    fn reading_json_fields_leniently() {
        let object = json!({ "int": 5, "float": 2.5, "text": "x", "flag": true, "zero": 0 });

        assert_eq!(number_or_zero(&object, "int"), GaugeValue::Int(5));
        assert_eq!(number_or_zero(&object, "float"), GaugeValue::Float(2.5));
        assert_eq!(number_or_zero(&object, "missing"), GaugeValue::Int(0));
        assert_eq!(number_or_zero(&object, "text"), GaugeValue::Int(0));
        assert_eq!(count_or_zero(&object, "float"), 2);
        assert_eq!(count_or_zero(&object, "missing"), 0);
        assert_eq!(str_or(&object, "text", "unknown"), "x");
        assert_eq!(str_or(&object, "int", "unknown"), "unknown");

        assert!(is_truthy(object.get("flag")));
        assert!(is_truthy(object.get("int")));
        assert!(!is_truthy(object.get("zero")));
        assert!(!is_truthy(object.get("missing")));
    }

    #[test]
    fn failed_optional_section_is_omitted() {
        let ok: Result<u32, Error> = Ok(1);
        assert_eq!(optional_section("test", "ok", ok), Some(1));
        let failed: Result<u32, Error> = Err(Error::Internal("boom".into()));
        assert_eq!(optional_section("test", "failed", failed), None);
    }
}
