//! Typed configuration of the logging pipeline.
//!
//! The configuration is read once at startup, usually via [`PipelineConfig::from_env`]. It can
//! also be deserialized (camelCase keys, every field optional) when it is embedded in a larger
//! application config.

use crate::event::Level;
use crate::index::{DeliveryOptions, OverflowPolicy};
use crate::logging::LevelSwitch;
use crate::request::{DEFAULT_REQUEST_TEMPLATE, RequestLoggingOptions};
use anyhow::{Context, anyhow, ensure};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineConfig {
    /// Base URL of the search cluster. The remote index sink is disabled when absent.
    pub index_uri: Option<String>,
    pub index_username: Option<String>,
    pub index_password: Option<String>,
    pub index_name: String,
    /// Deployment environment label attached to every event.
    pub environment: String,
    /// Message template of request completion events.
    pub message_template: String,
    pub request_level: Level,
    pub log_level: Level,
    /// Minimum levels per source prefix.
    pub level_overrides: BTreeMap<String, Level>,
    pub batch_size: usize,
    pub batch_interval_ms: u64,
    pub buffer_capacity: usize,
    pub overflow_policy: OverflowPolicy,
    pub max_retries: u32,
    pub request_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            index_uri: None,
            index_username: None,
            index_password: None,
            index_name: "timeseries".to_string(),
            environment: "development".to_string(),
            message_template: DEFAULT_REQUEST_TEMPLATE.to_string(),
            request_level: Level::Debug,
            log_level: Level::Information,
            level_overrides: BTreeMap::new(),
            batch_size: 50,
            batch_interval_ms: 2_000,
            buffer_capacity: 100_000,
            overflow_policy: OverflowPolicy::DropOldest,
            max_retries: 5,
            request_timeout_ms: 10_000,
        }
    }
}

impl PipelineConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Reads the configuration using the given variable lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let read = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let mut config = PipelineConfig {
            index_uri: read("OPENSEARCH_URL"),
            index_username: read("OPENSEARCH_USER"),
            index_password: read("OPENSEARCH_PASS"),
            ..PipelineConfig::default()
        };

        if let Some(index_name) = read("LOG_INDEX_NAME") {
            config.index_name = index_name;
        }
        if let Some(environment) = read("APP_ENVIRONMENT") {
            config.environment = environment;
        }
        if let Some(template) = read("REQUEST_LOG_TEMPLATE") {
            config.message_template = template;
        }
        if let Some(overrides) = read("LOG_LEVEL_OVERRIDES") {
            config.level_overrides = parse_level_overrides(&overrides)?;
        }
        if let Some(policy) = read("LOG_OVERFLOW_POLICY") {
            config.overflow_policy = parse_overflow_policy(&policy)?;
        }

        parse_into(&read, "REQUEST_LOG_LEVEL", &mut config.request_level)?;
        parse_into(&read, "LOG_LEVEL", &mut config.log_level)?;
        parse_into(&read, "LOG_BATCH_SIZE", &mut config.batch_size)?;
        parse_into(&read, "LOG_BATCH_INTERVAL_MS", &mut config.batch_interval_ms)?;
        parse_into(&read, "LOG_BUFFER_CAPACITY", &mut config.buffer_capacity)?;
        parse_into(&read, "LOG_MAX_RETRIES", &mut config.max_retries)?;
        parse_into(&read, "LOG_REQUEST_TIMEOUT_MS", &mut config.request_timeout_ms)?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.batch_size >= 1, "The batch size must be at least 1");
        ensure!(
            self.buffer_capacity >= self.batch_size,
            "The buffer capacity ({}) must not be smaller than the batch size ({})",
            self.buffer_capacity,
            self.batch_size
        );
        ensure!(
            self.batch_interval_ms > 0,
            "The batch interval must be greater than zero"
        );
        ensure!(
            self.request_timeout_ms > 0,
            "The request timeout must be greater than zero"
        );
        ensure!(!self.index_name.is_empty(), "The index name must not be empty");

        Ok(())
    }

    pub fn credentials(&self) -> Option<(String, String)> {
        self.index_username.as_ref().map(|user| {
            (
                user.clone(),
                self.index_password.clone().unwrap_or_default(),
            )
        })
    }

    pub fn delivery_options(&self) -> DeliveryOptions {
        DeliveryOptions {
            index_name: self.index_name.clone(),
            batch_size: self.batch_size,
            batch_interval: Duration::from_millis(self.batch_interval_ms),
            buffer_capacity: self.buffer_capacity,
            overflow_policy: self.overflow_policy,
            max_retries: self.max_retries,
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            ..DeliveryOptions::default()
        }
    }

    pub fn level_switch(&self) -> LevelSwitch {
        self.level_overrides
            .iter()
            .fold(LevelSwitch::new(self.log_level), |switch, (source, level)| {
                switch.with_override(source.as_str(), *level)
            })
    }

    pub fn request_options(&self) -> RequestLoggingOptions {
        RequestLoggingOptions {
            message_template: self.message_template.clone(),
            level: self.request_level,
        }
    }
}

fn parse_into<T>(
    read: &impl Fn(&str) -> Option<String>,
    name: &str,
    target: &mut T,
) -> anyhow::Result<()>
where
    T: FromStr,
    T::Err: Display,
{
    if let Some(value) = read(name) {
        *target = value
            .parse()
            .map_err(|err| anyhow!("{}", err))
            .with_context(|| format!("Invalid value '{}' for {}", value, name))?;
    }

    Ok(())
}

/// Parses `source=Level` pairs separated by commas, e.g. `hyper=Warning,shop::db=Debug`.
fn parse_level_overrides(value: &str) -> anyhow::Result<BTreeMap<String, Level>> {
    let mut overrides = BTreeMap::new();
    for entry in value.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
        let (source, level) = entry
            .split_once('=')
            .with_context(|| format!("Invalid level override '{}', expected source=Level", entry))?;
        let level = level
            .parse::<Level>()
            .with_context(|| format!("Invalid level override '{}'", entry))?;
        overrides.insert(source.trim().to_string(), level);
    }

    Ok(overrides)
}

fn parse_overflow_policy(value: &str) -> anyhow::Result<OverflowPolicy> {
    match value.to_ascii_lowercase().as_str() {
        "dropoldest" | "drop_oldest" => Ok(OverflowPolicy::DropOldest),
        "rejectnewest" | "reject_newest" => Ok(OverflowPolicy::RejectNewest),
        _ => Err(anyhow!("Unknown overflow policy: '{}'", value)),
    }
}
