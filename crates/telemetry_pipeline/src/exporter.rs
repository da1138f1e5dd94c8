use crate::otlp;
use crate::signal::{Batch, SignalKind, TelemetryItem};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Why a batch did not reach the collector. The processor drops the batch
/// whatever the variant; [`is_retryable`](Self::is_retryable) decides what
/// a [`RetryingExporter`](crate::retry::RetryingExporter) tries again.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExportError {
    /// Connection refused, DNS failure or reset
    #[error("transport error: {0}")]
    Transport(String),
    /// The sink answered with a non-success status
    #[error("rejected by sink with status {status}: {body}")]
    Rejected { status: u16, body: String },
    /// The batch could not be encoded as OTLP/JSON
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Every attempt failed or the retry budget ran out
    #[error("all retry attempts exhausted after {attempts} tries")]
    RetriesExhausted { attempts: u32 },
    /// The request, or the processor's export deadline, expired
    #[error("export operation timed out")]
    Timeout,
}

impl ExportError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout => true,
            Self::Rejected { status, .. } => matches!(status, 408 | 429 | 502 | 503 | 504),
            Self::Serialization(_) | Self::RetriesExhausted { .. } => false,
        }
    }
}

/// Outcome of one export call.
pub type ExportResult = Result<(), ExportError>;

/// Delivers one batch of a single signal kind to a collector.
///
/// Called only from the processor's background task, one batch at a time.
/// The processor abandons the returned future once `export_timeout` passes
/// and reports `ExportError::Timeout`, so an implementation that talks to
/// the network should give up on its own before that point. Whatever the
/// result, the processor never sends the same batch again; wrap the
/// exporter in [`RetryingExporter`](crate::retry::RetryingExporter) for
/// retries that stay inside the deadline.
///
/// `export` returns `impl Future`, so `dyn Exporter` is not possible; the
/// processor holds exporters as `Arc<dyn ExporterBoxed>`.
pub trait Exporter: Send + Sync {
    fn export(&self, batch: Batch) -> impl Future<Output = ExportResult> + Send;

    /// Short label used in pipeline diagnostics.
    fn name(&self) -> &str;
}

/// [`Exporter`] behind a boxed future, so exporters of different types can
/// share one processor type.
pub trait ExporterBoxed: Send + Sync {
    fn export_boxed(
        &self,
        batch: Batch,
    ) -> Pin<Box<dyn Future<Output = ExportResult> + Send + '_>>;

    fn name(&self) -> &str;
}

impl<T: Exporter> ExporterBoxed for T {
    fn export_boxed(
        &self,
        batch: Batch,
    ) -> Pin<Box<dyn Future<Output = ExportResult> + Send + '_>> {
        Box::pin(self.export(batch))
    }

    fn name(&self) -> &str {
        Exporter::name(self)
    }
}

/// Stdout exporter for local debugging
pub struct StdoutExporter {
    verbose: bool,
}

impl StdoutExporter {
    /// With `verbose`, prints the OTLP/JSON payload; otherwise one summary line per item.
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    fn summarize(item: &TelemetryItem) -> String {
        match item {
            TelemetryItem::Span(span) => format!(
                "span trace_id={:032x} span_id={:016x} name={} duration={}ns status={:?}",
                span.trace_id,
                span.span_id,
                span.name,
                span.duration_nanos(),
                span.status
            ),
            TelemetryItem::Metric(point) => {
                format!("metric name={} value={:?}", point.name, point.value)
            }
            TelemetryItem::Log(record) => {
                format!("log severity={} body={:?}", record.severity.as_str(), record.body)
            }
        }
    }
}

impl Exporter for StdoutExporter {
    async fn export(&self, batch: Batch) -> ExportResult {
        if self.verbose {
            let payload = otlp::encode_pretty(&batch)?;
            println!("{}", payload);
        } else {
            println!("=== Exporting {} {} ===", batch.len(), batch.kind());
            for item in batch.items() {
                println!("{}", Self::summarize(item));
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "stdout"
    }
}

/// Null exporter that discards every batch
pub struct NullExporter;

impl NullExporter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NullExporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Exporter for NullExporter {
    async fn export(&self, _batch: Batch) -> ExportResult {
        Ok(())
    }

    fn name(&self) -> &str {
        "null"
    }
}

/// Exporter kind selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExporterKind {
    /// OTLP/JSON over HTTP to the configured endpoint
    #[default]
    OtlpHttp,
    Stdout,
    None,
}

impl ExporterKind {
    pub(crate) fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "otlp" | "otlp-http" | "http" => Some(Self::OtlpHttp),
            "stdout" | "console" => Some(Self::Stdout),
            "none" | "null" => Some(Self::None),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExporterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::OtlpHttp => "otlp",
            Self::Stdout => "stdout",
            Self::None => "none",
        })
    }
}

/// Test exporter that records every exported batch
#[cfg(test)]
pub struct TestExporter {
    batches: std::sync::Mutex<Vec<Batch>>,
}

#[cfg(test)]
impl TestExporter {
    pub fn new() -> Self {
        Self {
            batches: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn exported_count(&self) -> usize {
        self.batches.lock().unwrap().iter().map(Batch::len).sum()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().unwrap().iter().map(Batch::len).collect()
    }

    pub fn all_items(&self) -> Vec<TelemetryItem> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .flat_map(|b| b.items().iter().cloned())
            .collect()
    }

    pub fn kinds(&self) -> Vec<SignalKind> {
        self.batches.lock().unwrap().iter().map(Batch::kind).collect()
    }
}

#[cfg(test)]
impl Exporter for TestExporter {
    async fn export(&self, batch: Batch) -> ExportResult {
        self.batches.lock().unwrap().push(batch);
        Ok(())
    }

    fn name(&self) -> &str {
        "test"
    }
}

/// Slow exporter for timeout testing
#[cfg(test)]
pub struct SlowExporter {
    delay: std::time::Duration,
    attempts: std::sync::atomic::AtomicU64,
}

#[cfg(test)]
impl SlowExporter {
    pub fn new(delay: std::time::Duration) -> Self {
        Self {
            delay,
            attempts: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn attempts(&self) -> u64 {
        self.attempts.load(std::sync::atomic::Ordering::Relaxed)
    }
}

#[cfg(test)]
impl Exporter for SlowExporter {
    async fn export(&self, _batch: Batch) -> ExportResult {
        self.attempts
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        tokio::time::sleep(self.delay).await;
        Ok(())
    }

    fn name(&self) -> &str {
        "slow"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{LogRecord, Severity, Span, SpanKind};

    fn span_batch(n: u64) -> Batch {
        let items = (0..n)
            .map(|i| Span::new(1, i + 1, 0, format!("op-{}", i), SpanKind::Internal).into())
            .collect();
        Batch::new(SignalKind::Traces, items)
    }

    #[tokio::test]
    async fn test_stdout_exporter() {
        let exporter = StdoutExporter::new(false);
        assert!(exporter.export(span_batch(2)).await.is_ok());

        let verbose = StdoutExporter::new(true);
        let logs = Batch::new(
            SignalKind::Logs,
            vec![LogRecord::new(Severity::Info, "hello").into()],
        );
        assert!(verbose.export(logs).await.is_ok());
    }

    #[tokio::test]
    async fn test_null_exporter() {
        let exporter = NullExporter::new();
        assert!(exporter.export(span_batch(1000)).await.is_ok());
    }

    #[tokio::test]
    async fn test_test_exporter() {
        let exporter = TestExporter::new();
        exporter.export(span_batch(10)).await.unwrap();
        assert_eq!(exporter.exported_count(), 10);
        assert_eq!(exporter.kinds(), vec![SignalKind::Traces]);
    }

    #[test]
    fn test_retryable_classification() {
        assert!(ExportError::Timeout.is_retryable());
        assert!(ExportError::Transport("refused".into()).is_retryable());
        assert!(ExportError::Rejected { status: 503, body: String::new() }.is_retryable());
        assert!(!ExportError::Rejected { status: 400, body: String::new() }.is_retryable());
        assert!(!ExportError::Serialization("bad".into()).is_retryable());
    }

    #[test]
    fn test_exporter_kind_parse() {
        assert_eq!(ExporterKind::parse("OTLP"), Some(ExporterKind::OtlpHttp));
        assert_eq!(ExporterKind::parse("stdout"), Some(ExporterKind::Stdout));
        assert_eq!(ExporterKind::parse("none"), Some(ExporterKind::None));
        assert_eq!(ExporterKind::parse("zipkin"), None);
    }
}
