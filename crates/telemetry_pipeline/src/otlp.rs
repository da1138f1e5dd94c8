//! Minimal OTLP/JSON request bodies.
//!
//! Covers the subset of the OTLP JSON mapping this pipeline produces: one
//! request per batch, items grouped by resource, then by instrumentation
//! scope, in first-seen order. Ids are lowercase hex, 64-bit integers and
//! timestamps are decimal strings.

use crate::exporter::ExportError;
use crate::resource::Resource;
use crate::signal::{
    AttributeValue, Attributes, Batch, LogRecord, MetricPoint, MetricValue, SignalKind, Span,
    SpanKind, SpanStatus, TelemetryItem,
};
use serde::Serialize;

// Delta temporality: every point is the increment since the previous export.
const AGGREGATION_TEMPORALITY_DELTA: u8 = 1;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
enum AnyValue<'a> {
    StringValue(&'a str),
    IntValue(String),
    DoubleValue(f64),
    BoolValue(bool),
    ArrayValue { values: Vec<AnyValue<'a>> },
}

impl<'a> From<&'a AttributeValue> for AnyValue<'a> {
    fn from(value: &'a AttributeValue) -> Self {
        match value {
            AttributeValue::String(s) => Self::StringValue(s),
            AttributeValue::Int(i) => Self::IntValue(i.to_string()),
            AttributeValue::Float(f) => Self::DoubleValue(*f),
            AttributeValue::Bool(b) => Self::BoolValue(*b),
            AttributeValue::Array(values) => Self::ArrayValue {
                values: values.iter().map(|s| Self::StringValue(s)).collect(),
            },
        }
    }
}

#[derive(Serialize)]
struct KeyValue<'a> {
    key: &'a str,
    value: AnyValue<'a>,
}

fn key_values<'a>(iter: impl Iterator<Item = (&'a String, &'a AttributeValue)>) -> Vec<KeyValue<'a>> {
    iter.map(|(key, value)| KeyValue {
        key,
        value: value.into(),
    })
    .collect()
}

fn attributes(attrs: &Attributes) -> Vec<KeyValue<'_>> {
    key_values(attrs.iter())
}

#[derive(Serialize)]
struct OtlpResource<'a> {
    attributes: Vec<KeyValue<'a>>,
}

#[derive(Serialize)]
struct Scope<'a> {
    name: &'a str,
}

// ---------------------------------------------------------------------------
// Traces
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportTraceServiceRequest<'a> {
    resource_spans: Vec<ResourceSpans<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResourceSpans<'a> {
    resource: OtlpResource<'a>,
    scope_spans: Vec<ScopeSpans<'a>>,
}

#[derive(Serialize)]
struct ScopeSpans<'a> {
    scope: Scope<'a>,
    spans: Vec<OtlpSpan<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OtlpSpan<'a> {
    trace_id: String,
    span_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    parent_span_id: String,
    name: &'a str,
    kind: u8,
    start_time_unix_nano: String,
    end_time_unix_nano: String,
    attributes: Vec<KeyValue<'a>>,
    status: Status<'a>,
}

#[derive(Serialize)]
struct Status<'a> {
    code: u8,
    #[serde(skip_serializing_if = "str::is_empty")]
    message: &'a str,
}

fn span_kind(kind: SpanKind) -> u8 {
    match kind {
        SpanKind::Internal => 1,
        SpanKind::Server => 2,
        SpanKind::Client => 3,
        SpanKind::Producer => 4,
        SpanKind::Consumer => 5,
    }
}

fn status(status: &SpanStatus) -> Status<'_> {
    match status {
        SpanStatus::Unset => Status { code: 0, message: "" },
        SpanStatus::Ok => Status { code: 1, message: "" },
        SpanStatus::Error { description } => Status {
            code: 2,
            message: description,
        },
    }
}

fn encode_span(span: &Span) -> OtlpSpan<'_> {
    OtlpSpan {
        trace_id: format!("{:032x}", span.trace_id),
        span_id: format!("{:016x}", span.span_id),
        parent_span_id: if span.parent_span_id == 0 {
            String::new()
        } else {
            format!("{:016x}", span.parent_span_id)
        },
        name: &span.name,
        kind: span_kind(span.kind),
        start_time_unix_nano: span.start_time.to_string(),
        end_time_unix_nano: span.end_time.to_string(),
        attributes: attributes(&span.attributes),
        status: status(&span.status),
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportMetricsServiceRequest<'a> {
    resource_metrics: Vec<ResourceMetrics<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResourceMetrics<'a> {
    resource: OtlpResource<'a>,
    scope_metrics: Vec<ScopeMetrics<'a>>,
}

#[derive(Serialize)]
struct ScopeMetrics<'a> {
    scope: Scope<'a>,
    metrics: Vec<Metric<'a>>,
}

#[derive(Serialize)]
struct Metric<'a> {
    name: &'a str,
    description: &'a str,
    unit: &'a str,
    sum: Sum<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Sum<'a> {
    data_points: Vec<NumberDataPoint<'a>>,
    aggregation_temporality: u8,
    is_monotonic: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NumberDataPoint<'a> {
    attributes: Vec<KeyValue<'a>>,
    time_unix_nano: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    as_int: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    as_double: Option<f64>,
}

fn encode_point(point: &MetricPoint) -> NumberDataPoint<'_> {
    let (as_int, as_double) = match point.value {
        MetricValue::U64(v) => (Some(v.to_string()), None),
        MetricValue::F64(v) => (None, Some(v)),
    };
    NumberDataPoint {
        attributes: attributes(&point.attributes),
        time_unix_nano: point.time_unix_nano.to_string(),
        as_int,
        as_double,
    }
}

/// Groups points of the same instrument into one metric, first-seen order.
fn encode_metrics<'a>(points: Vec<&'a MetricPoint>) -> Vec<Metric<'a>> {
    let mut metrics: Vec<Metric<'a>> = Vec::new();
    for point in points {
        let data_point = encode_point(point);
        match metrics.iter_mut().find(|m| m.name == point.name) {
            Some(metric) => metric.sum.data_points.push(data_point),
            None => metrics.push(Metric {
                name: &point.name,
                description: &point.description,
                unit: &point.unit,
                sum: Sum {
                    data_points: vec![data_point],
                    aggregation_temporality: AGGREGATION_TEMPORALITY_DELTA,
                    is_monotonic: true,
                },
            }),
        }
    }
    metrics
}

// ---------------------------------------------------------------------------
// Logs
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportLogsServiceRequest<'a> {
    resource_logs: Vec<ResourceLogs<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResourceLogs<'a> {
    resource: OtlpResource<'a>,
    scope_logs: Vec<ScopeLogs<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ScopeLogs<'a> {
    scope: Scope<'a>,
    log_records: Vec<OtlpLogRecord<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OtlpLogRecord<'a> {
    time_unix_nano: String,
    observed_time_unix_nano: String,
    severity_number: u8,
    severity_text: &'static str,
    body: AnyValue<'a>,
    attributes: Vec<KeyValue<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    span_id: Option<String>,
}

fn encode_log(record: &LogRecord) -> OtlpLogRecord<'_> {
    OtlpLogRecord {
        time_unix_nano: record.time_unix_nano.to_string(),
        observed_time_unix_nano: record.observed_time_unix_nano.to_string(),
        severity_number: record.severity.number(),
        severity_text: record.severity.as_str(),
        body: AnyValue::StringValue(&record.body),
        attributes: attributes(&record.attributes),
        trace_id: record.trace_id.map(|id| format!("{:032x}", id)),
        span_id: record.span_id.map(|id| format!("{:016x}", id)),
    }
}

// ---------------------------------------------------------------------------
// Grouping
// ---------------------------------------------------------------------------

/// Items bucketed by resource, then scope, preserving first-seen order.
type Grouped<'a> = Vec<(&'a Resource, Vec<(&'a str, Vec<&'a TelemetryItem>)>)>;

fn group(items: &[TelemetryItem]) -> Grouped<'_> {
    let mut grouped: Grouped<'_> = Vec::new();
    for item in items {
        let resource = item.resource();
        let idx = match grouped.iter().position(|(r, _)| *r == resource) {
            Some(idx) => idx,
            None => {
                grouped.push((resource, Vec::new()));
                grouped.len() - 1
            }
        };
        let scopes = &mut grouped[idx].1;
        match scopes.iter_mut().find(|(name, _)| *name == item.scope()) {
            Some((_, bucket)) => bucket.push(item),
            None => scopes.push((item.scope(), vec![item])),
        }
    }
    grouped
}

fn otlp_resource(resource: &Resource) -> OtlpResource<'_> {
    OtlpResource {
        attributes: key_values(resource.iter()),
    }
}

fn to_value(batch: &Batch) -> Result<serde_json::Value, serde_json::Error> {
    let grouped = group(batch.items());
    match batch.kind() {
        SignalKind::Traces => {
            let resource_spans = grouped
                .into_iter()
                .map(|(resource, scopes)| ResourceSpans {
                    resource: otlp_resource(resource),
                    scope_spans: scopes
                        .into_iter()
                        .map(|(name, items)| ScopeSpans {
                            scope: Scope { name },
                            spans: items
                                .into_iter()
                                .filter_map(|item| match item {
                                    TelemetryItem::Span(span) => Some(encode_span(span)),
                                    _ => None,
                                })
                                .collect(),
                        })
                        .collect(),
                })
                .collect();
            serde_json::to_value(ExportTraceServiceRequest { resource_spans })
        }
        SignalKind::Metrics => {
            let resource_metrics = grouped
                .into_iter()
                .map(|(resource, scopes)| ResourceMetrics {
                    resource: otlp_resource(resource),
                    scope_metrics: scopes
                        .into_iter()
                        .map(|(name, items)| ScopeMetrics {
                            scope: Scope { name },
                            metrics: encode_metrics(
                                items
                                    .into_iter()
                                    .filter_map(|item| match item {
                                        TelemetryItem::Metric(point) => Some(point),
                                        _ => None,
                                    })
                                    .collect(),
                            ),
                        })
                        .collect(),
                })
                .collect();
            serde_json::to_value(ExportMetricsServiceRequest { resource_metrics })
        }
        SignalKind::Logs => {
            let resource_logs = grouped
                .into_iter()
                .map(|(resource, scopes)| ResourceLogs {
                    resource: otlp_resource(resource),
                    scope_logs: scopes
                        .into_iter()
                        .map(|(name, items)| ScopeLogs {
                            scope: Scope { name },
                            log_records: items
                                .into_iter()
                                .filter_map(|item| match item {
                                    TelemetryItem::Log(record) => Some(encode_log(record)),
                                    _ => None,
                                })
                                .collect(),
                        })
                        .collect(),
                })
                .collect();
            serde_json::to_value(ExportLogsServiceRequest { resource_logs })
        }
    }
}

/// Encodes `batch` as an OTLP/JSON request body.
pub fn encode(batch: &Batch) -> Result<Vec<u8>, ExportError> {
    let value = to_value(batch).map_err(|e| ExportError::Serialization(e.to_string()))?;
    serde_json::to_vec(&value).map_err(|e| ExportError::Serialization(e.to_string()))
}

/// Pretty-printed form of [`encode`], for console output.
pub fn encode_pretty(batch: &Batch) -> Result<String, ExportError> {
    let value = to_value(batch).map_err(|e| ExportError::Serialization(e.to_string()))?;
    serde_json::to_string_pretty(&value).map_err(|e| ExportError::Serialization(e.to_string()))
}
