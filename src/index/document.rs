//! Conversion of events into index documents.

use crate::event::{EventRecord, ExceptionInfo, MAX_EXCEPTION_DEPTH, PropertyValue};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Serialize)]
struct IndexDocument<'a> {
    // Flattened first, so that the fixed fields below win on name clashes.
    #[serde(flatten)]
    fields: &'a HashMap<String, PropertyValue>,

    #[serde(rename = "@timestamp", serialize_with = "ts_rfc3339")]
    timestamp: DateTime<Utc>,
    level: &'static str,
    #[serde(rename = "messageTemplate")]
    message_template: &'a str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    exceptions: Option<Vec<ExceptionEntry<'a>>>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ExceptionEntry<'a> {
    depth: usize,
    class_name: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    stack_trace_string: Option<String>,
}

fn ts_rfc3339<S>(dt: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    s.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn exception_entries(exception: &ExceptionInfo) -> Vec<ExceptionEntry<'_>> {
    exception
        .chain()
        .take(MAX_EXCEPTION_DEPTH)
        .enumerate()
        .map(|(depth, cause)| ExceptionEntry {
            depth,
            class_name: &cause.type_name,
            message: &cause.message,
            stack_trace_string: (!cause.stack_trace.is_empty())
                .then(|| cause.stack_trace.join("\n")),
        })
        .collect()
}

/// Builds the document stored in the remote index for the given event.
pub fn to_document(record: &EventRecord) -> serde_json::Result<Value> {
    serde_json::to_value(IndexDocument {
        fields: &record.properties,
        timestamp: record.timestamp,
        level: record.level.as_str(),
        message_template: &record.message_template,
        message: record.render_message(),
        exceptions: record.exception.as_ref().map(exception_entries),
    })
}
