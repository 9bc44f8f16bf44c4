//! Time-series point model and InfluxDB v2 line protocol encoding.
//!
//! Line protocol format:
//! ```text
//! measurement,tag1=val1,tag2=val2 field1=val1,field2=val2 timestamp_ns
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Measurement every log point is written to.
pub const MEASUREMENT: &str = "logs";

/// Tag key carrying the adapter-wide application name.
pub const TAG_APP: &str = "app";
/// Tag key carrying the logical subsystem that emitted the record.
pub const TAG_SCOPE: &str = "scope";
/// Tag key carrying the rendered severity.
pub const TAG_LEVEL: &str = "level";

/// Written in place of an empty tag value, which line protocol rejects.
pub const EMPTY_TAG_VALUE: &str = "!EMPTY";

/// A value that can be stored in a point field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// 64-bit floating point.
    Float(f64),
    /// 64-bit signed integer.
    Integer(i64),
    /// 64-bit unsigned integer.
    UInteger(u64),
    /// UTF-8 string.
    String(String),
    /// Boolean value.
    Boolean(bool),
}

impl FieldValue {
    /// Format this value for line protocol.
    ///
    /// - Float: written as-is (e.g., `3.14`); NaN and infinities have no
    ///   line protocol form and are written as the strings `"NaN"`,
    ///   `"+Inf"` and `"-Inf"`
    /// - Integer: suffixed with `i` (e.g., `42i`)
    /// - UInteger: suffixed with `u` (e.g., `42u`)
    /// - String: quoted with double quotes, inner quotes and backslashes escaped
    /// - Boolean: `true` or `false`
    pub fn to_line_protocol(&self) -> String {
        match self {
            FieldValue::Float(v) if v.is_finite() => format!("{}", v),
            FieldValue::Float(v) => format!("\"{}\"", non_finite_text(*v)),
            FieldValue::Integer(v) => format!("{}i", v),
            FieldValue::UInteger(v) => format!("{}u", v),
            FieldValue::String(v) => {
                let escaped = v.replace('\\', "\\\\").replace('"', "\\\"");
                format!("\"{}\"", escaped)
            }
            FieldValue::Boolean(v) => v.to_string(),
        }
    }

    /// Borrow the inner string, if this is a string field.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }
}

/// Text for a float that line protocol cannot carry as a number.
pub(crate) fn non_finite_text(v: f64) -> &'static str {
    if v.is_nan() {
        "NaN"
    } else if v.is_sign_positive() {
        "+Inf"
    } else {
        "-Inf"
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_line_protocol())
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::String(v)
    }
}

/// A single timestamped record destined for the time-series store.
///
/// Points are built once per log call by [`crate::builder::PointBuilder`]
/// and moved into the sink; nothing mutates them afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    measurement: String,
    tags: BTreeMap<String, String>,
    fields: BTreeMap<String, FieldValue>,
    timestamp: DateTime<Utc>,
}

impl Point {
    pub fn new(
        measurement: impl Into<String>,
        tags: BTreeMap<String, String>,
        fields: BTreeMap<String, FieldValue>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            measurement: measurement.into(),
            tags,
            fields,
            timestamp,
        }
    }

    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Timestamp in nanoseconds since the Unix epoch.
    ///
    /// Dates outside the representable nanosecond range (roughly 1677..2262)
    /// clamp to zero rather than failing the write.
    pub fn timestamp_nanos(&self) -> i64 {
        self.timestamp.timestamp_nanos_opt().unwrap_or(0)
    }

    /// Encode this point as one line of line protocol.
    ///
    /// Tags are emitted sorted by key, fields in key order. A point with no
    /// fields is still encoded; the builder guarantees `message` is present.
    pub fn to_line_protocol(&self) -> String {
        let mut line = escape_measurement(&self.measurement);

        for (key, value) in &self.tags {
            line.push(',');
            line.push_str(&escape_key(key));
            line.push('=');
            if value.is_empty() {
                line.push_str(EMPTY_TAG_VALUE);
            } else {
                line.push_str(&escape_key(value));
            }
        }

        line.push(' ');

        for (i, (key, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                line.push(',');
            }
            line.push_str(&escape_key(key));
            line.push('=');
            line.push_str(&value.to_line_protocol());
        }

        line.push(' ');
        line.push_str(&self.timestamp_nanos().to_string());
        line
    }
}

/// Encode a batch of points as a newline-separated line protocol body.
pub fn encode_batch(points: &[Point]) -> String {
    let mut body = String::with_capacity(points.len() * 128);
    for point in points {
        body.push_str(&point.to_line_protocol());
        body.push('\n');
    }
    body
}

/// Spaces and commas must be escaped in measurement names.
fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

/// Tag keys, tag values and field keys share the same escaping rules:
/// commas, equals signs and spaces are backslash-escaped. Line breaks are
/// not representable, so they are escaped as well.
fn escape_key(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
}
