use crate::kv::{merge_key_values, render_format, render_parts};
use crate::point::{FieldValue, Point, MEASUREMENT, TAG_APP, TAG_LEVEL, TAG_SCOPE};
use crate::record::{LogRecord, MessageSource};
use chrono::Utc;
use serde::Deserialize;
use std::collections::BTreeMap;

/// Field name for the rendered message.
pub const FIELD_MESSAGE: &str = "message";
/// Field name for the captured call site.
pub const FIELD_CALLER: &str = "caller";
/// Field name for the captured stack.
pub const FIELD_STACK: &str = "stack";
/// Field name holding the JSON blob under [`FieldEncoding::Blob`].
pub const FIELD_VALUES: &str = "values";

/// Separator between stack frames in the `stack` field.
pub const STACK_SEPARATOR: &str = "\r\n";

/// How structured key/values are laid out in a point's field set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldEncoding {
    /// Every key/value pair becomes its own top-level field.
    #[default]
    Flat,
    /// The whole field map is serialized as JSON into a single `values`
    /// field, next to a top-level `message`. Keeps the field set fixed
    /// for stores that query it as a schema.
    Blob,
}

/// Turns [`LogRecord`]s into [`Point`]s.
///
/// Stateless apart from the adapter-wide app name and encoding, so one
/// instance can be shared across threads without locking.
#[derive(Debug, Clone)]
pub struct PointBuilder {
    app: String,
    encoding: FieldEncoding,
}

impl PointBuilder {
    pub fn new(app: impl Into<String>, encoding: FieldEncoding) -> Self {
        Self {
            app: app.into(),
            encoding,
        }
    }

    pub fn app(&self) -> &str {
        &self.app
    }

    pub fn encoding(&self) -> FieldEncoding {
        self.encoding
    }

    /// Build the point for one log call. Never fails.
    pub fn build(&self, record: &LogRecord) -> Point {
        let timestamp = Utc::now();

        let mut tags = BTreeMap::new();
        tags.insert(TAG_APP.to_string(), self.app.clone());
        tags.insert(TAG_SCOPE.to_string(), record.scope.clone());
        tags.insert(TAG_LEVEL.to_string(), record.level.to_string());

        let message = render_message(&record.message);

        let mut fields = BTreeMap::new();
        fields.insert(FIELD_MESSAGE.to_string(), FieldValue::String(message.clone()));
        if !record.caller.is_empty() {
            fields.insert(
                FIELD_CALLER.to_string(),
                FieldValue::String(record.caller.clone()),
            );
        }
        if !record.stack.is_empty() {
            fields.insert(
                FIELD_STACK.to_string(),
                FieldValue::String(record.stack.join(STACK_SEPARATOR)),
            );
        }
        merge_key_values(&mut fields, &record.key_values);

        let fields = match self.encoding {
            FieldEncoding::Flat => fields,
            FieldEncoding::Blob => {
                let blob = serde_json::to_string(&fields).unwrap_or_else(|_| "{}".to_string());
                let mut wrapped = BTreeMap::new();
                wrapped.insert(FIELD_MESSAGE.to_string(), FieldValue::String(message));
                wrapped.insert(FIELD_VALUES.to_string(), FieldValue::String(blob));
                wrapped
            }
        };

        Point::new(MEASUREMENT, tags, fields, timestamp)
    }
}

/// Normalize any message shape to a single string.
pub fn render_message(source: &MessageSource) -> String {
    match source {
        MessageSource::Text(s) => s.clone(),
        MessageSource::Parts(parts) => render_parts(parts),
        MessageSource::Format { format, args } => render_format(format, args),
    }
}
