//! Telemetry Export Pipeline
//!
//! Batched export of spans, counter metrics and log records to an OTLP/HTTP
//! collector. Producers enqueue into a bounded per-signal queue without ever
//! waiting on I/O; one background task per signal drains the queue in
//! bounded batches on a timer (or early when a full batch is waiting) and
//! hands each batch to an exporter under a deadline.
//!
//! ```rust,ignore
//! let registry = ProviderRegistry::new();
//! registry.initialize(&PipelineConfig::from_env()?)?;
//!
//! registry.tracer("app").in_span("work", |span| span.set_attribute("k", "v"));
//! registry.meter("app").u64_counter("jobs").build().add(1, &[]);
//! registry.logger("app").info("done");
//!
//! registry.shutdown_all().await?;
//! ```
//!
//! The registry is an ordinary value: pass it where it is needed.

mod invariants;

pub mod config;
pub mod context;
pub mod error;
pub mod exporter;
pub mod http_exporter;
pub mod log_bridge;
pub mod logger;
pub mod meter;
pub mod otlp;
pub mod processor;
pub mod provider;
pub mod queue;
pub mod registry;
pub mod resource;
pub mod retry;
pub mod signal;
pub mod tracer;

// Re-export main types
pub use config::PipelineConfig;
pub use context::{ContextError, SpanContext, TRACEPARENT_HEADER};
pub use error::{ConfigError, ProcessorError, QueueError, RegistryError};
pub use exporter::{
    ExportError, ExportResult, Exporter, ExporterBoxed, ExporterKind, NullExporter, StdoutExporter,
};
pub use http_exporter::OtlpHttpExporter;
pub use log_bridge::LogBridgeLayer;
pub use logger::Logger;
pub use meter::{Counter, CounterBuilder, CounterValue, Meter};
pub use processor::{BatchConfig, BatchProcessor, MetricsSnapshot, ProcessorMetrics};
pub use provider::{
    LoggerProvider, MeterProvider, Shutdownable, ShutdownableBoxed, SignalState, TracerProvider,
};
pub use queue::SignalQueue;
pub use registry::{ProviderRegistry, SignalExporters};
pub use resource::{Resource, ResourceBuilder, ResourceTagger};
pub use retry::{RetryConfig, RetryingExporter};
pub use signal::{
    AttributeValue, Attributes, Batch, KeyValue, LogRecord, MetricPoint, MetricValue, Severity,
    SignalKind, Span, SpanKind, SpanStatus, TelemetryItem,
};
pub use tracer::{ActiveSpan, SpanBuilder, Tracer};
