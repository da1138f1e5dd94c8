use crate::resource::Resource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

/// Current time as Unix nanoseconds.
pub(crate) fn now_unix_nanos() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

/// The three telemetry signal kinds, each with its own queue and processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Traces,
    Metrics,
    Logs,
}

impl SignalKind {
    pub const ALL: [SignalKind; 3] = [SignalKind::Traces, SignalKind::Metrics, SignalKind::Logs];

    /// Export path appended to the collector endpoint.
    pub fn export_path(self) -> &'static str {
        match self {
            Self::Traces => "/v1/traces",
            Self::Metrics => "/v1/metrics",
            Self::Logs => "/v1/logs",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Traces => "traces",
            Self::Metrics => "metrics",
            Self::Logs => "logs",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attribute value types for telemetry metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Array(Vec<String>),
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Vec<String>> for AttributeValue {
    fn from(value: Vec<String>) -> Self {
        Self::Array(value)
    }
}

/// Sorted attribute map; ordering keeps encoded payloads stable.
pub type Attributes = BTreeMap<String, AttributeValue>;

/// A single key/value attribute, used on the producer API.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyValue {
    pub key: String,
    pub value: AttributeValue,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

pub(crate) fn collect_attributes(attrs: &[KeyValue]) -> Attributes {
    attrs
        .iter()
        .map(|kv| (kv.key.clone(), kv.value.clone()))
        .collect()
}

/// Span execution status
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SpanStatus {
    /// Span status unknown
    #[default]
    Unset,
    /// Span completed successfully
    Ok,
    /// Span completed with error
    Error { description: String },
}

impl SpanStatus {
    pub fn error(description: impl Into<String>) -> Self {
        Self::Error {
            description: description.into(),
        }
    }
}

/// Span kind as defined by OpenTelemetry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SpanKind {
    /// Internal operation span
    #[default]
    Internal,
    /// Server-side RPC span
    Server,
    /// Client-side RPC span
    Client,
    /// Producer span (messaging)
    Producer,
    /// Consumer span (messaging)
    Consumer,
}

/// Represents a single distributed tracing span
#[derive(Debug, Clone)]
pub struct Span {
    /// Unique trace identifier (128-bit)
    pub trace_id: u128,
    /// Unique span identifier (64-bit)
    pub span_id: u64,
    /// Parent span identifier (0 if root span)
    pub parent_span_id: u64,
    /// Span start time (Unix nanoseconds)
    pub start_time: u64,
    /// Span end time (Unix nanoseconds)
    pub end_time: u64,
    /// Operation name
    pub name: String,
    pub kind: SpanKind,
    pub attributes: Attributes,
    pub status: SpanStatus,
    /// Instrumentation scope (tracer name)
    pub scope: Arc<str>,
    pub resource: Resource,
}

impl Span {
    /// Creates a new span starting now
    pub fn new(
        trace_id: u128,
        span_id: u64,
        parent_span_id: u64,
        name: String,
        kind: SpanKind,
    ) -> Self {
        let now = now_unix_nanos();
        Self {
            trace_id,
            span_id,
            parent_span_id,
            start_time: now,
            end_time: now,
            name,
            kind,
            attributes: Attributes::new(),
            status: SpanStatus::Unset,
            scope: Arc::from(""),
            resource: Resource::empty(),
        }
    }

    /// Marks the span as completed with the given status
    pub fn finish(&mut self, status: SpanStatus) {
        self.end_time = now_unix_nanos().max(self.start_time);
        self.status = status;
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        self.attributes.insert(key.into(), value.into());
    }

    /// Duration of the span in nanoseconds
    pub fn duration_nanos(&self) -> u64 {
        self.end_time.saturating_sub(self.start_time)
    }
}

/// A recorded measurement value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    U64(u64),
    F64(f64),
}

/// One counter measurement (delta since the previous point).
#[derive(Debug, Clone)]
pub struct MetricPoint {
    /// Instrument name
    pub name: String,
    pub description: String,
    pub unit: String,
    pub value: MetricValue,
    pub attributes: Attributes,
    pub time_unix_nano: u64,
    pub scope: Arc<str>,
    pub resource: Resource,
}

impl MetricPoint {
    pub fn new(name: impl Into<String>, value: MetricValue) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            unit: String::new(),
            value,
            attributes: Attributes::new(),
            time_unix_nano: now_unix_nanos(),
            scope: Arc::from(""),
            resource: Resource::empty(),
        }
    }
}

/// Log severity with OTLP severity numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl Severity {
    /// OTLP `SeverityNumber` for the base level of each range.
    pub fn number(self) -> u8 {
        match self {
            Self::Trace => 1,
            Self::Debug => 5,
            Self::Info => 9,
            Self::Warn => 13,
            Self::Error => 17,
            Self::Fatal => 21,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Fatal => "FATAL",
        }
    }
}

impl From<tracing::Level> for Severity {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE => Self::Trace,
            tracing::Level::DEBUG => Self::Debug,
            tracing::Level::INFO => Self::Info,
            tracing::Level::WARN => Self::Warn,
            tracing::Level::ERROR => Self::Error,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogRecord {
    pub time_unix_nano: u64,
    pub observed_time_unix_nano: u64,
    pub severity: Severity,
    pub body: String,
    pub attributes: Attributes,
    /// Trace correlation, set when the record was emitted inside a span
    pub trace_id: Option<u128>,
    pub span_id: Option<u64>,
    pub scope: Arc<str>,
    pub resource: Resource,
}

impl LogRecord {
    pub fn new(severity: Severity, body: impl Into<String>) -> Self {
        let now = now_unix_nanos();
        Self {
            time_unix_nano: now,
            observed_time_unix_nano: now,
            severity,
            body: body.into(),
            attributes: Attributes::new(),
            trace_id: None,
            span_id: None,
            scope: Arc::from(""),
            resource: Resource::empty(),
        }
    }
}

/// A telemetry item of any signal kind.
#[derive(Debug, Clone)]
pub enum TelemetryItem {
    Span(Span),
    Metric(MetricPoint),
    Log(LogRecord),
}

impl TelemetryItem {
    pub fn kind(&self) -> SignalKind {
        match self {
            Self::Span(_) => SignalKind::Traces,
            Self::Metric(_) => SignalKind::Metrics,
            Self::Log(_) => SignalKind::Logs,
        }
    }

    /// Creation timestamp (span start, measurement time, log time).
    pub fn timestamp(&self) -> u64 {
        match self {
            Self::Span(span) => span.start_time,
            Self::Metric(point) => point.time_unix_nano,
            Self::Log(record) => record.time_unix_nano,
        }
    }

    pub fn resource(&self) -> &Resource {
        match self {
            Self::Span(span) => &span.resource,
            Self::Metric(point) => &point.resource,
            Self::Log(record) => &record.resource,
        }
    }

    pub fn scope(&self) -> &str {
        match self {
            Self::Span(span) => &span.scope,
            Self::Metric(point) => &point.scope,
            Self::Log(record) => &record.scope,
        }
    }

    pub(crate) fn set_resource(&mut self, resource: Resource) {
        match self {
            Self::Span(span) => span.resource = resource,
            Self::Metric(point) => point.resource = resource,
            Self::Log(record) => record.resource = resource,
        }
    }
}

impl From<Span> for TelemetryItem {
    fn from(span: Span) -> Self {
        Self::Span(span)
    }
}

impl From<MetricPoint> for TelemetryItem {
    fn from(point: MetricPoint) -> Self {
        Self::Metric(point)
    }
}

impl From<LogRecord> for TelemetryItem {
    fn from(record: LogRecord) -> Self {
        Self::Log(record)
    }
}

/// Ordered group of items of one signal kind, handed to an exporter by value.
#[derive(Debug, Clone)]
pub struct Batch {
    kind: SignalKind,
    items: Vec<TelemetryItem>,
    /// Batch creation timestamp
    pub timestamp: SystemTime,
}

impl Batch {
    /// Creates a batch from items already known to be of `kind`.
    pub fn new(kind: SignalKind, items: Vec<TelemetryItem>) -> Self {
        debug_assert!(
            items.iter().all(|item| item.kind() == kind),
            "batch of kind {} contains items of another kind",
            kind
        );
        Self {
            kind,
            items,
            timestamp: SystemTime::now(),
        }
    }

    pub fn kind(&self) -> SignalKind {
        self.kind
    }

    pub fn items(&self) -> &[TelemetryItem] {
        &self.items
    }

    pub fn into_items(self) -> Vec<TelemetryItem> {
        self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_paths() {
        assert_eq!(SignalKind::Traces.export_path(), "/v1/traces");
        assert_eq!(SignalKind::Metrics.export_path(), "/v1/metrics");
        assert_eq!(SignalKind::Logs.export_path(), "/v1/logs");
    }

    #[test]
    fn test_span_finish_sets_status_and_end() {
        let mut span = Span::new(1, 2, 0, "op".to_string(), SpanKind::Server);
        span.set_attribute("http.method", "GET");
        span.finish(SpanStatus::Ok);

        assert!(span.end_time >= span.start_time);
        assert_eq!(span.status, SpanStatus::Ok);
        assert_eq!(
            span.attributes.get("http.method"),
            Some(&AttributeValue::String("GET".to_string()))
        );
    }

    #[test]
    fn test_item_kind_matches_variant() {
        let span: TelemetryItem = Span::new(1, 1, 0, "s".into(), SpanKind::Internal).into();
        let point: TelemetryItem = MetricPoint::new("c", MetricValue::U64(1)).into();
        let log: TelemetryItem = LogRecord::new(Severity::Info, "hi").into();

        assert_eq!(span.kind(), SignalKind::Traces);
        assert_eq!(point.kind(), SignalKind::Metrics);
        assert_eq!(log.kind(), SignalKind::Logs);
    }

    #[test]
    fn test_severity_numbers_are_ordered() {
        assert!(Severity::Info.number() < Severity::Warn.number());
        assert_eq!(Severity::from(tracing::Level::ERROR), Severity::Error);
    }
}
