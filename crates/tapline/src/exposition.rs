//! Rendering of flat records into the Prometheus text exposition format (version 0.0.4).
//!
//! All metrics produced by adapters are gauges. Each metric family is written as a `# HELP` line,
//! a `# TYPE` line and its samples, one per line:
//!
//! ```text
//! # HELP glances_fs_used_bytes Filesystem used bytes
//! # TYPE glances_fs_used_bytes gauge
//! glances_fs_used_bytes{mountpoint="/data"} 10
//! ```

use std::{borrow::Cow, fmt, fmt::Write as _, iter, ops};

use serde::{Serialize, Serializer};

/// Content type of the rendered exposition.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// How label values are made safe before being placed between double quotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LabelSanitizer {
    /// Removes backslashes and double quotes outright: `foo"bar\baz` becomes `foobarbaz`.
    #[default]
    Strip,
    /// Backslash-escapes double quotes and leaves everything else intact:
    /// `foo"bar\baz` becomes `foo\"bar\baz`.
    EscapeQuotes,
}

impl LabelSanitizer {
    /// Applies this sanitizer to a label value.
    pub fn apply(self, value: &str) -> Cow<'_, str> {
        match self {
            Self::Strip if value.contains(['\\', '"']) => {
                Cow::Owned(value.chars().filter(|&ch| ch != '\\' && ch != '"').collect())
            }
            Self::EscapeQuotes if value.contains('"') => Cow::Owned(value.replace('"', "\\\"")),
            Self::Strip | Self::EscapeQuotes => Cow::Borrowed(value),
        }
    }
}

/// Numeric value of a gauge sample.
///
/// Integers and floats are kept apart so that counts render as `2` and measurements as `45.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GaugeValue {
    /// Integer value.
    Int(i64),
    /// Floating-point value.
    Float(f64),
}

impl Default for GaugeValue {
    fn default() -> Self {
        Self::Int(0)
    }
}

impl GaugeValue {
    /// Reads a JSON number, keeping its integer / float form. Returns `None` for non-numbers.
    #[allow(clippy::cast_precision_loss)] // unavoidable for `u64` values above `i64::MAX`
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        let serde_json::Value::Number(number) = value else {
            return None;
        };
        Some(if let Some(int) = number.as_i64() {
            Self::Int(int)
        } else if let Some(uint) = number.as_u64() {
            Self::Float(uint as f64)
        } else {
            Self::Float(number.as_f64().unwrap_or(0.0))
        })
    }

    /// Returns this value as a float.
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Int(value) => value as f64,
            Self::Float(value) => value,
        }
    }
}

impl From<i64> for GaugeValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for GaugeValue {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<u8> for GaugeValue {
    fn from(value: u8) -> Self {
        Self::Int(value.into())
    }
}

impl From<u32> for GaugeValue {
    fn from(value: u32) -> Self {
        Self::Int(value.into())
    }
}

impl From<u64> for GaugeValue {
    #[allow(clippy::cast_precision_loss)]
    fn from(value: u64) -> Self {
        i64::try_from(value).map_or_else(|_| Self::Float(value as f64), Self::Int)
    }
}

impl From<usize> for GaugeValue {
    fn from(value: usize) -> Self {
        Self::from(value as u64)
    }
}

impl From<f64> for GaugeValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for GaugeValue {
    fn from(value: bool) -> Self {
        Self::Int(value.into())
    }
}

impl fmt::Display for GaugeValue {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Int(value) => write!(formatter, "{value}"),
            Self::Float(value) if value.is_nan() => formatter.write_str("NaN"),
            Self::Float(value) if value.is_infinite() => {
                formatter.write_str(if value > 0.0 { "+Inf" } else { "-Inf" })
            }
            // `Debug` yields the shortest round-trip representation and keeps `.0` for integral values.
            Self::Float(value) => write!(formatter, "{value:?}"),
        }
    }
}

/// Sums keep integer form while both operands are integers (and the sum fits into `i64`).
impl ops::Add for GaugeValue {
    type Output = Self;

    #[allow(clippy::cast_precision_loss)]
    fn add(self, rhs: Self) -> Self {
        match (self, rhs) {
            (Self::Int(lhs), Self::Int(rhs)) => lhs
                .checked_add(rhs)
                .map_or_else(|| Self::Float(self.as_f64() + rhs as f64), Self::Int),
            _ => Self::Float(self.as_f64() + rhs.as_f64()),
        }
    }
}

impl iter::Sum for GaugeValue {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), ops::Add::add)
    }
}

impl Serialize for GaugeValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match *self {
            Self::Int(value) => serializer.serialize_i64(value),
            Self::Float(value) => serializer.serialize_f64(value),
        }
    }
}

/// Builder of a metrics exposition.
///
/// Families are emitted in the order they are declared via [`Self::gauge()`].
#[derive(Debug)]
pub struct Exposition {
    buffer: String,
    sanitizer: LabelSanitizer,
}

impl Exposition {
    /// Creates an empty exposition that sanitizes label values with the specified sanitizer.
    pub fn new(sanitizer: LabelSanitizer) -> Self {
        Self {
            buffer: String::with_capacity(1_024),
            sanitizer,
        }
    }

    /// Starts a gauge family, writing its `HELP` and `TYPE` lines.
    pub fn gauge<'a>(&'a mut self, name: &'a str, help: &str) -> GaugeFamily<'a> {
        writeln!(self.buffer, "# HELP {name} {help}").unwrap();
        writeln!(self.buffer, "# TYPE {name} gauge").unwrap();
        // ^ `unwrap()`s are safe; writing to a string never fails.
        GaugeFamily {
            exposition: self,
            name,
        }
    }

    /// Writes a free-form comment line.
    pub fn comment(&mut self, text: &str) {
        writeln!(self.buffer, "# {text}").unwrap();
    }

    /// Returns the rendered text. It always ends with exactly one newline.
    pub fn finish(mut self) -> String {
        if self.buffer.is_empty() {
            self.buffer.push('\n');
        }
        self.buffer
    }
}

/// Gauge family being written to an [`Exposition`].
#[derive(Debug)]
#[must_use = "Family without samples only has HELP and TYPE lines"]
pub struct GaugeFamily<'a> {
    exposition: &'a mut Exposition,
    name: &'a str,
}

impl GaugeFamily<'_> {
    /// Writes an unlabeled sample.
    pub fn set(self, value: impl Into<GaugeValue>) {
        let value: GaugeValue = value.into();
        writeln!(self.exposition.buffer, "{} {value}", self.name).unwrap();
    }

    /// Writes a sample with the specified labels. Label values are sanitized.
    pub fn sample(&mut self, labels: &[(&str, &str)], value: impl Into<GaugeValue>) -> &mut Self {
        let value: GaugeValue = value.into();
        let buffer = &mut self.exposition.buffer;
        let sanitizer = self.exposition.sanitizer;
        buffer.push_str(self.name);
        if !labels.is_empty() {
            buffer.push('{');
            for (i, &(label, label_value)) in labels.iter().enumerate() {
                if i > 0 {
                    buffer.push(',');
                }
                write!(buffer, "{label}=\"{}\"", sanitizer.apply(label_value)).unwrap();
            }
            buffer.push('}');
        }
        writeln!(buffer, " {value}").unwrap();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizing_label_values() {
        let value = r#"foo"bar\baz"#;
        assert_eq!(LabelSanitizer::Strip.apply(value), "foobarbaz");
        assert_eq!(LabelSanitizer::EscapeQuotes.apply(value), r#"foo\"bar\baz"#);

        assert!(matches!(LabelSanitizer::Strip.apply("/data"), Cow::Borrowed("/data")));
        assert!(matches!(
            LabelSanitizer::EscapeQuotes.apply(r"C:\"),
            Cow::Borrowed(r"C:\")
        ));
    }

    #[test]
    fn formatting_gauge_values() {
        let cases = [
            (GaugeValue::Int(2), "2"),
            (GaugeValue::Int(-7), "-7"),
            (GaugeValue::Float(45.0), "45.0"),
            (GaugeValue::Float(70.7), "70.7"),
            (GaugeValue::Float(0.25), "0.25"),
            (GaugeValue::Float(f64::NAN), "NaN"),
            (GaugeValue::Float(f64::INFINITY), "+Inf"),
            (GaugeValue::Float(f64::NEG_INFINITY), "-Inf"),
            (GaugeValue::from(true), "1"),
            (GaugeValue::from(u64::MAX), "1.8446744073709552e19"),
        ];
        for (value, expected) in cases {
            assert_eq!(value.to_string(), expected, "{value:?}");
        }
    }

    #[test]
    fn reading_json_numbers() {
        let value: serde_json::Value = serde_json::json!([3, 2.5, "3", null]);
        let values: Vec<_> = value
            .as_array()
            .unwrap()
            .iter()
            .map(GaugeValue::from_json)
            .collect();
        assert_eq!(
            values,
            [Some(GaugeValue::Int(3)), Some(GaugeValue::Float(2.5)), None, None]
        );
    }

    #[test]
    fn summing_values() {
        let ints = [GaugeValue::Int(2), GaugeValue::Int(3)];
        assert_eq!(ints.into_iter().sum::<GaugeValue>(), GaugeValue::Int(5));
        let mixed = [GaugeValue::Int(2), GaugeValue::Float(0.5)];
        assert_eq!(mixed.into_iter().sum::<GaugeValue>(), GaugeValue::Float(2.5));
        assert_eq!(iter::empty().sum::<GaugeValue>(), GaugeValue::Int(0));
        assert_eq!(
            GaugeValue::Int(i64::MAX) + GaugeValue::Int(1),
            GaugeValue::Float(i64::MAX as f64 + 1.0)
        );
    }

    #[test]
    fn rendering_families() {
        let mut exposition = Exposition::new(LabelSanitizer::Strip);
        exposition.gauge("test_plain", "Plain gauge").set(3);
        exposition
            .gauge("test_labeled", "Labeled gauge")
            .sample(&[("mountpoint", "/data")], 10)
            .sample(&[("mountpoint", "/\"odd\\")], 1.5)
            .sample(&[("a", "1"), ("b", "2")], 0);
        let _ = exposition.gauge("test_empty", "Family without samples");
        let rendered = exposition.finish();

        let expected = "\
            # HELP test_plain Plain gauge\n\
            # TYPE test_plain gauge\n\
            test_plain 3\n\
            # HELP test_labeled Labeled gauge\n\
            # TYPE test_labeled gauge\n\
            test_labeled{mountpoint=\"/data\"} 10\n\
            test_labeled{mountpoint=\"/odd\"} 1.5\n\
            test_labeled{a=\"1\",b=\"2\"} 0\n\
            # HELP test_empty Family without samples\n\
            # TYPE test_empty gauge\n";
        assert_eq!(rendered, expected);
    }

    #[test]
    fn escaping_sanitizer_in_exposition() {
        let mut exposition = Exposition::new(LabelSanitizer::EscapeQuotes);
        exposition
            .gauge("test_state", "State")
            .sample(&[("alertname", r#"foo"bar\baz"#)], 2);
        let rendered = exposition.finish();
        assert!(
            rendered.contains(r#"test_state{alertname="foo\"bar\baz"} 2"#),
            "{rendered}"
        );
    }

    #[test]
    fn empty_exposition_is_single_newline() {
        assert_eq!(Exposition::new(LabelSanitizer::Strip).finish(), "\n");
    }
}
