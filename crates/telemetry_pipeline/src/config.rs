//! Pipeline configuration.
//!
//! Defaults match the demo setup: a local collector on port 4318, a 2048-item
//! queue per signal, 512-item batches every second and a 500ms export
//! deadline. [`PipelineConfig::from_env`] reads the standard `OTEL_*`
//! variables on top of those defaults.

use crate::error::ConfigError;
use crate::exporter::ExporterKind;
use crate::processor::BatchConfig;
use crate::retry::RetryConfig;
use crate::signal::SignalKind;
use std::time::Duration;

pub const ENV_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
pub const ENV_SERVICE_NAME: &str = "OTEL_SERVICE_NAME";
pub const ENV_SERVICE_VERSION: &str = "OTEL_SERVICE_VERSION";
pub const ENV_MAX_QUEUE_SIZE: &str = "OTEL_BSP_MAX_QUEUE_SIZE";
pub const ENV_MAX_EXPORT_BATCH_SIZE: &str = "OTEL_BSP_MAX_EXPORT_BATCH_SIZE";
pub const ENV_SCHEDULE_DELAY: &str = "OTEL_BSP_SCHEDULE_DELAY";
pub const ENV_EXPORT_TIMEOUT: &str = "OTEL_BSP_EXPORT_TIMEOUT";
pub const ENV_SHUTDOWN_TIMEOUT: &str = "OTEL_SHUTDOWN_TIMEOUT";
pub const ENV_EXPORT_RETRIES: &str = "TELEMETRY_EXPORT_RETRIES";
pub const ENV_EXPORTER: &str = "TELEMETRY_EXPORTER";

pub const DEFAULT_ENDPOINT: &str = "http://localhost:4318";
pub const DEFAULT_SERVICE_NAME: &str = "cpp-example";

/// Configuration for the whole pipeline (all three signals).
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Collector base URL; export paths are appended to it.
    pub endpoint: String,
    pub service_name: String,
    pub service_version: String,
    pub max_queue_size: usize,
    pub max_export_batch_size: usize,
    pub export_interval: Duration,
    pub export_timeout: Duration,
    /// Deadline for the final flush of each processor.
    pub shutdown_timeout: Duration,
    /// Retries per batch inside the HTTP exporter (0 disables retry).
    pub export_max_retries: u32,
    pub exporter: ExporterKind,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            max_queue_size: 2048,
            max_export_batch_size: 512,
            export_interval: Duration::from_millis(1000),
            export_timeout: Duration::from_millis(500),
            shutdown_timeout: Duration::from_millis(2000),
            export_max_retries: 0,
            exporter: ExporterKind::OtlpHttp,
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the collector endpoint. A trailing `/` is removed.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = normalize_endpoint(endpoint.into());
        self
    }

    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    pub fn with_service_version(mut self, version: impl Into<String>) -> Self {
        self.service_version = version.into();
        self
    }

    pub fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    pub fn with_max_export_batch_size(mut self, size: usize) -> Self {
        self.max_export_batch_size = size;
        self
    }

    pub fn with_export_interval(mut self, interval: Duration) -> Self {
        self.export_interval = interval;
        self
    }

    pub fn with_export_timeout(mut self, timeout: Duration) -> Self {
        self.export_timeout = timeout;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_export_max_retries(mut self, retries: u32) -> Self {
        self.export_max_retries = retries;
        self
    }

    pub fn with_exporter(mut self, exporter: ExporterKind) -> Self {
        self.exporter = exporter;
        self
    }

    /// Defaults overridden by the process environment, then validated.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) but reads variables through `lookup`.
    ///
    /// Variables that are unset or blank keep their default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(endpoint) = get(ENV_ENDPOINT) {
            config = config.with_endpoint(endpoint.trim());
        }
        if let Some(name) = get(ENV_SERVICE_NAME) {
            config.service_name = name;
        }
        if let Some(version) = get(ENV_SERVICE_VERSION) {
            config.service_version = version;
        }
        if let Some(value) = get(ENV_MAX_QUEUE_SIZE) {
            config.max_queue_size = parse_number(ENV_MAX_QUEUE_SIZE, &value)?;
        }
        if let Some(value) = get(ENV_MAX_EXPORT_BATCH_SIZE) {
            config.max_export_batch_size = parse_number(ENV_MAX_EXPORT_BATCH_SIZE, &value)?;
        }
        if let Some(value) = get(ENV_SCHEDULE_DELAY) {
            config.export_interval = parse_millis(ENV_SCHEDULE_DELAY, &value)?;
        }
        if let Some(value) = get(ENV_EXPORT_TIMEOUT) {
            config.export_timeout = parse_millis(ENV_EXPORT_TIMEOUT, &value)?;
        }
        if let Some(value) = get(ENV_SHUTDOWN_TIMEOUT) {
            config.shutdown_timeout = parse_millis(ENV_SHUTDOWN_TIMEOUT, &value)?;
        }
        if let Some(value) = get(ENV_EXPORT_RETRIES) {
            config.export_max_retries = parse_number(ENV_EXPORT_RETRIES, &value)?;
        }
        if let Some(value) = get(ENV_EXPORTER) {
            config.exporter =
                ExporterKind::parse(&value).ok_or_else(|| ConfigError::InvalidValue {
                    key: ENV_EXPORTER,
                    value: value.clone(),
                    reason: "expected one of otlp, stdout, none".to_string(),
                })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks sizes, durations and the endpoint scheme.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_queue_size == 0 {
            return Err(ConfigError::Zero {
                field: "max_queue_size",
            });
        }
        if self.max_export_batch_size == 0 {
            return Err(ConfigError::Zero {
                field: "max_export_batch_size",
            });
        }
        if self.max_export_batch_size > self.max_queue_size {
            return Err(ConfigError::BatchExceedsQueue {
                batch: self.max_export_batch_size,
                queue: self.max_queue_size,
            });
        }
        for (field, value) in [
            ("export_interval", self.export_interval),
            ("export_timeout", self.export_timeout),
            ("shutdown_timeout", self.shutdown_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::Zero { field });
            }
        }
        if self.exporter == ExporterKind::OtlpHttp
            && !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://"))
        {
            return Err(ConfigError::InvalidEndpoint(self.endpoint.clone()));
        }
        Ok(())
    }

    /// Full export URL for one signal, e.g. `http://localhost:4318/v1/traces`.
    pub fn signal_url(&self, kind: SignalKind) -> String {
        format!("{}{}", self.endpoint, kind.export_path())
    }

    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig::from(self)
    }

    /// Retry policy for the HTTP exporter, sized to fit inside `export_timeout`.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::within(self.export_timeout, self.export_max_retries)
    }
}

impl From<&PipelineConfig> for BatchConfig {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            max_queue_size: config.max_queue_size,
            max_export_batch_size: config.max_export_batch_size,
            export_interval: config.export_interval,
            export_timeout: config.export_timeout,
        }
    }
}

fn normalize_endpoint(mut endpoint: String) -> String {
    while endpoint.ends_with('/') {
        endpoint.pop();
    }
    endpoint
}

fn parse_number<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            key,
            value: value.to_string(),
            reason: e.to_string(),
        })
}

fn parse_millis(key: &'static str, value: &str) -> Result<Duration, ConfigError> {
    parse_number::<u64>(key, value).map(Duration::from_millis)
}
