//! The structured log event flowing through the pipeline.
//!
//! An [`EventRecord`] keeps its message template unrendered and carries its values as named,
//! typed [`PropertyValue`]s. Sinks render or serialize it independently.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt::{Display, Formatter};
use std::net::IpAddr;
use std::str::FromStr;

pub mod template;

/// Upper bound for walking nested exception causes.
pub const MAX_EXCEPTION_DEPTH: usize = 16;

/// Property name carrying the logical source (module path, logger category) of an event.
pub const SOURCE_CONTEXT: &str = "SourceContext";

/// Source context used for events the pipeline emits about itself.
pub const SELF_LOG_SOURCE: &str = "wasabi_logship::selflog";

/// Severity of an event, ordered from least to most severe.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Level {
    Verbose,
    Debug,
    Information,
    Warning,
    Error,
    Fatal,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Verbose => "Verbose",
            Level::Debug => "Debug",
            Level::Information => "Information",
            Level::Warning => "Warning",
            Level::Error => "Error",
            Level::Fatal => "Fatal",
        }
    }

    /// Three letter abbreviation used by the text sinks.
    pub fn abbreviation(&self) -> &'static str {
        match self {
            Level::Verbose => "VRB",
            Level::Debug => "DBG",
            Level::Information => "INF",
            Level::Warning => "WRN",
            Level::Error => "ERR",
            Level::Fatal => "FTL",
        }
    }
}

impl Display for Level {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "verbose" | "trace" => Ok(Level::Verbose),
            "debug" => Ok(Level::Debug),
            "information" | "info" => Ok(Level::Information),
            "warning" | "warn" => Ok(Level::Warning),
            "error" => Ok(Level::Error),
            "fatal" | "critical" => Ok(Level::Fatal),
            _ => Err(anyhow::anyhow!("Unknown log level: '{}'", value)),
        }
    }
}

impl From<tracing::Level> for Level {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE => Level::Verbose,
            tracing::Level::DEBUG => Level::Debug,
            tracing::Level::INFO => Level::Information,
            tracing::Level::WARN => Level::Warning,
            tracing::Level::ERROR => Level::Error,
        }
    }
}

/// A typed property value attached to an event.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    List(Vec<PropertyValue>),
    Map(BTreeMap<String, PropertyValue>),
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Float(value) => Some(*value),
            PropertyValue::Integer(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, PropertyValue>> {
        match self {
            PropertyValue::Map(map) => Some(map),
            _ => None,
        }
    }
}

/// Renders values the way they appear inside a rendered message: strings are quoted,
/// everything else is written plainly.
impl Display for PropertyValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PropertyValue::Null => f.write_str("null"),
            PropertyValue::Bool(value) => write!(f, "{}", value),
            PropertyValue::Integer(value) => write!(f, "{}", value),
            PropertyValue::Float(value) => write!(f, "{}", value),
            PropertyValue::String(value) => write!(f, "\"{}\"", value),
            PropertyValue::List(values) => {
                f.write_str("[")?;
                for (index, value) in values.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", value)?;
                }
                f.write_str("]")
            }
            PropertyValue::Map(map) => {
                f.write_str("{")?;
                for (index, (key, value)) in map.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", key, value)?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

impl From<&String> for PropertyValue {
    fn from(value: &String) -> Self {
        PropertyValue::String(value.clone())
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        PropertyValue::Integer(value as i64)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Integer(value)
    }
}

impl From<u16> for PropertyValue {
    fn from(value: u16) -> Self {
        PropertyValue::Integer(value as i64)
    }
}

impl From<u32> for PropertyValue {
    fn from(value: u32) -> Self {
        PropertyValue::Integer(value as i64)
    }
}

impl From<u64> for PropertyValue {
    fn from(value: u64) -> Self {
        PropertyValue::Integer(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<usize> for PropertyValue {
    fn from(value: usize) -> Self {
        PropertyValue::Integer(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Float(value)
    }
}

impl From<IpAddr> for PropertyValue {
    fn from(value: IpAddr) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl<T: Into<PropertyValue>> From<Option<T>> for PropertyValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(PropertyValue::Null)
    }
}

impl<T: Into<PropertyValue>> From<Vec<T>> for PropertyValue {
    fn from(values: Vec<T>) -> Self {
        PropertyValue::List(values.into_iter().map(Into::into).collect())
    }
}

/// Structured description of an error attached to an event.
#[derive(Clone, Debug, PartialEq)]
pub struct ExceptionInfo {
    pub type_name: String,
    pub message: String,
    pub stack_trace: Vec<String>,
    pub source: Option<Box<ExceptionInfo>>,
}

impl ExceptionInfo {
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        ExceptionInfo {
            type_name: type_name.into(),
            message: message.into(),
            stack_trace: Vec::new(),
            source: None,
        }
    }

    pub fn with_stack_frame(mut self, frame: impl Into<String>) -> Self {
        self.stack_trace.push(frame.into());
        self
    }

    pub fn with_source(mut self, source: ExceptionInfo) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Captures an error and its `source()` chain, bounded by [`MAX_EXCEPTION_DEPTH`].
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut chain = Vec::new();
        let mut current = Some(err);
        while let Some(err) = current {
            if chain.len() >= MAX_EXCEPTION_DEPTH {
                break;
            }
            chain.push(ExceptionInfo::new(error_type_name(err), err.to_string()));
            current = err.source();
        }

        fold_chain(chain)
    }

    /// Captures an `anyhow::Error` including its context chain.
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        let chain = err
            .chain()
            .take(MAX_EXCEPTION_DEPTH)
            .map(|cause| ExceptionInfo::new(error_type_name(cause), cause.to_string()))
            .collect();

        fold_chain(chain)
    }

    /// Iterates over this exception and all of its nested causes, outermost first.
    pub fn chain(&self) -> impl Iterator<Item = &ExceptionInfo> {
        std::iter::successors(Some(self), |info| info.source.as_deref())
    }
}

impl Display for ExceptionInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.type_name, self.message)
    }
}

fn fold_chain(chain: Vec<ExceptionInfo>) -> ExceptionInfo {
    chain
        .into_iter()
        .rev()
        .reduce(|inner, outer| outer.with_source(inner))
        .unwrap_or_else(|| ExceptionInfo::new("Error", ""))
}

fn error_type_name(err: &(dyn std::error::Error + 'static)) -> String {
    if err.is::<std::io::Error>() {
        "std::io::Error".to_string()
    } else {
        // Trait objects don't expose their concrete type, the debug rendering usually starts
        // with the type or variant name which is the best available approximation.
        let debug = format!("{:?}", err);
        let name: String = debug
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == ':')
            .collect();

        if name.is_empty() { "Error".to_string() } else { name }
    }
}

/// The canonical structured log event.
#[derive(Clone, Debug, PartialEq)]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    pub message_template: String,
    pub properties: HashMap<String, PropertyValue>,
    pub exception: Option<ExceptionInfo>,
}

impl EventRecord {
    pub fn new(level: Level, message_template: impl Into<String>) -> Self {
        EventRecord {
            timestamp: Utc::now(),
            level,
            message_template: message_template.into(),
            properties: HashMap::new(),
            exception: None,
        }
    }

    /// Creates an event describing the pipeline's own health. These are only ever handed to
    /// local sinks.
    pub fn diagnostic(level: Level, message_template: impl Into<String>) -> Self {
        EventRecord::new(level, message_template).with_property(SOURCE_CONTEXT, SELF_LOG_SOURCE)
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.set_property(name, value);
        self
    }

    pub fn with_exception(mut self, exception: ExceptionInfo) -> Self {
        self.exception = Some(exception);
        self
    }

    /// Sets a property, replacing any previous value with the same name.
    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<PropertyValue>) {
        self.properties.insert(name.into(), value.into());
    }

    /// Sets a property only if no value with the same name is present yet.
    pub fn add_property_if_absent(
        &mut self,
        name: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) {
        self.properties.entry(name.into()).or_insert_with(|| value.into());
    }

    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    pub fn source_context(&self) -> Option<&str> {
        self.property(SOURCE_CONTEXT).and_then(PropertyValue::as_str)
    }

    pub fn is_diagnostic(&self) -> bool {
        self.source_context() == Some(SELF_LOG_SOURCE)
    }

    /// Renders the message template using the event's properties.
    pub fn render_message(&self) -> String {
        template::render(&self.message_template, &self.properties)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Outer {
        inner: std::io::Error,
    }

    impl Display for Outer {
        fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
            f.write_str("outer failed")
        }
    }

    impl std::error::Error for Outer {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            Some(&self.inner)
        }
    }

    #[test]
    fn levels_are_ordered_by_severity() {
        assert!(Level::Verbose < Level::Debug);
        assert!(Level::Information < Level::Warning);
        assert!(Level::Error < Level::Fatal);
    }

    #[test]
    fn levels_parse_common_aliases() {
        assert_eq!("info".parse::<Level>().unwrap(), Level::Information);
        assert_eq!("Warning".parse::<Level>().unwrap(), Level::Warning);
        assert_eq!(" trace ".parse::<Level>().unwrap(), Level::Verbose);
        assert!("loud".parse::<Level>().is_err());
    }

    #[test]
    fn later_property_writes_win() {
        let mut record = EventRecord::new(Level::Information, "test");
        record.set_property("Key", "first");
        record.set_property("Key", "second");
        record.add_property_if_absent("Key", "third");

        assert_eq!(record.property("Key"), Some(&PropertyValue::from("second")));
    }

    #[test]
    fn property_keys_are_case_sensitive() {
        let record = EventRecord::new(Level::Information, "test")
            .with_property("key", 1)
            .with_property("Key", 2);

        assert_eq!(record.properties.len(), 2);
    }

    #[test]
    fn from_error_walks_the_source_chain() {
        let err = Outer {
            inner: std::io::Error::other("disk on fire"),
        };
        let info = ExceptionInfo::from_error(&err);

        assert_eq!(info.type_name, "Outer");
        assert_eq!(info.message, "outer failed");
        let inner = info.source.as_deref().unwrap();
        assert_eq!(inner.type_name, "std::io::Error");
        assert_eq!(inner.message, "disk on fire");
        assert_eq!(info.chain().count(), 2);
    }

    #[test]
    fn from_anyhow_keeps_context_messages() {
        let err = anyhow::anyhow!("connection refused").context("Failed to reach index");
        let info = ExceptionInfo::from_anyhow(&err);
        let messages: Vec<_> = info.chain().map(|cause| cause.message.as_str()).collect();

        assert_eq!(messages, vec!["Failed to reach index", "connection refused"]);
    }

    #[test]
    fn diagnostic_events_are_marked_as_self_log() {
        let record = EventRecord::diagnostic(Level::Warning, "Sink failed");
        assert!(record.is_diagnostic());
        assert!(!EventRecord::new(Level::Warning, "x").is_diagnostic());
    }
}
