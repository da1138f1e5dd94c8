//! Explicit holder of the three signal providers.
//!
//! There is no global registry: create one, share it (usually as axum state
//! behind an `Arc`), and call [`ProviderRegistry::shutdown_all`] before exit.

use crate::config::PipelineConfig;
use crate::error::{ProcessorError, RegistryError};
use crate::exporter::{ExporterBoxed, ExporterKind, NullExporter, StdoutExporter};
use crate::http_exporter::OtlpHttpExporter;
use crate::logger::Logger;
use crate::meter::Meter;
use crate::processor::{BatchProcessor, MetricsSnapshot};
use crate::provider::{
    LoggerProvider, MeterProvider, ShutdownableBoxed, SignalState, TracerProvider,
};
use crate::resource::{Resource, ResourceTagger};
use crate::retry::RetryingExporter;
use crate::signal::SignalKind;
use crate::tracer::Tracer;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// One exporter per signal kind.
#[derive(Clone)]
pub struct SignalExporters {
    pub traces: Arc<dyn ExporterBoxed>,
    pub metrics: Arc<dyn ExporterBoxed>,
    pub logs: Arc<dyn ExporterBoxed>,
}

impl SignalExporters {
    /// The same exporter for every signal.
    pub fn shared(exporter: Arc<dyn ExporterBoxed>) -> Self {
        Self {
            traces: Arc::clone(&exporter),
            metrics: Arc::clone(&exporter),
            logs: exporter,
        }
    }

    /// Exporters selected by `config.exporter`.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, RegistryError> {
        match config.exporter {
            ExporterKind::OtlpHttp => Ok(Self {
                traces: http_exporter(config, SignalKind::Traces)?,
                metrics: http_exporter(config, SignalKind::Metrics)?,
                logs: http_exporter(config, SignalKind::Logs)?,
            }),
            ExporterKind::Stdout => Ok(Self::shared(Arc::new(StdoutExporter::new(false)))),
            ExporterKind::None => Ok(Self::shared(Arc::new(NullExporter::new()))),
        }
    }

    fn for_kind(&self, kind: SignalKind) -> Arc<dyn ExporterBoxed> {
        match kind {
            SignalKind::Traces => Arc::clone(&self.traces),
            SignalKind::Metrics => Arc::clone(&self.metrics),
            SignalKind::Logs => Arc::clone(&self.logs),
        }
    }
}

fn http_exporter(
    config: &PipelineConfig,
    kind: SignalKind,
) -> Result<Arc<dyn ExporterBoxed>, RegistryError> {
    if config.export_max_retries == 0 {
        let http = OtlpHttpExporter::new(kind, &config.endpoint, config.export_timeout)
            .map_err(|source| RegistryError::Exporter { signal: kind, source })?;
        return Ok(Arc::new(http));
    }

    // attempts plus backoff together fit inside the processor's export deadline
    let retry = config.retry_config();
    let request_timeout = retry.attempt_timeout().unwrap_or(config.export_timeout);
    let http = OtlpHttpExporter::new(kind, &config.endpoint, request_timeout)
        .map_err(|source| RegistryError::Exporter { signal: kind, source })?;
    Ok(Arc::new(RetryingExporter::new(http, retry)))
}

struct Providers {
    resource: Resource,
    traces: TracerProvider,
    metrics: MeterProvider,
    logs: LoggerProvider,
    shutdown_timeout: Duration,
}

impl Providers {
    fn all(&self) -> [&dyn ShutdownableBoxed; 3] {
        [&self.traces, &self.metrics, &self.logs]
    }

    fn metrics_for(&self, kind: SignalKind) -> MetricsSnapshot {
        match kind {
            SignalKind::Traces => self.traces.metrics(),
            SignalKind::Metrics => self.metrics.metrics(),
            SignalKind::Logs => self.logs.metrics(),
        }
    }

    fn state_for(&self, kind: SignalKind) -> SignalState {
        match kind {
            SignalKind::Traces => self.traces.state(),
            SignalKind::Metrics => self.metrics.state(),
            SignalKind::Logs => self.logs.state(),
        }
    }
}

/// Tracer, meter and logger providers for one process.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: OnceLock<Providers>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the resource, exporters and processors described by `config`.
    ///
    /// Must be called inside a tokio runtime.
    pub fn initialize(&self, config: &PipelineConfig) -> Result<(), RegistryError> {
        if self.providers.get().is_some() {
            return Err(RegistryError::AlreadyInitialized);
        }
        config.validate()?;
        let exporters = SignalExporters::from_config(config)?;
        self.initialize_with_exporters(config, exporters)
    }

    /// Like [`initialize`](Self::initialize) with caller-supplied exporters.
    pub fn initialize_with_exporters(
        &self,
        config: &PipelineConfig,
        exporters: SignalExporters,
    ) -> Result<(), RegistryError> {
        if self.providers.get().is_some() {
            return Err(RegistryError::AlreadyInitialized);
        }
        config.validate()?;

        let resource = Resource::builder()
            .with_service_name(config.service_name.clone())
            .with_service_version(config.service_version.clone())
            .build();
        let tagger = ResourceTagger::new(resource.clone());
        let batch = config.batch_config();
        let processor = |kind: SignalKind| -> Result<BatchProcessor, ProcessorError> {
            BatchProcessor::new(kind, batch.clone(), exporters.for_kind(kind))
        };

        let providers = Providers {
            traces: TracerProvider::new(processor(SignalKind::Traces)?, tagger.clone()),
            metrics: MeterProvider::new(processor(SignalKind::Metrics)?, tagger.clone()),
            logs: LoggerProvider::new(processor(SignalKind::Logs)?, tagger),
            resource,
            shutdown_timeout: config.shutdown_timeout,
        };

        // a concurrent initialize may have won; ours is dropped and its tasks aborted
        self.providers
            .set(providers)
            .map_err(|_| RegistryError::AlreadyInitialized)?;

        tracing::info!(
            service = %config.service_name,
            exporter = %config.exporter,
            endpoint = %config.endpoint,
            "telemetry pipeline initialized"
        );
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.providers.get().is_some()
    }

    pub fn state(&self, kind: SignalKind) -> SignalState {
        self.providers
            .get()
            .map_or(SignalState::Uninitialized, |p| p.state_for(kind))
    }

    pub fn resource(&self) -> Option<&Resource> {
        self.providers.get().map(|p| &p.resource)
    }

    pub fn metrics(&self, kind: SignalKind) -> Option<MetricsSnapshot> {
        self.providers.get().map(|p| p.metrics_for(kind))
    }

    /// A tracer for scope `name`, or a no-op tracer if not active.
    pub fn tracer(&self, name: &str) -> Tracer {
        self.providers
            .get()
            .map_or_else(Tracer::noop, |p| p.traces.tracer(name))
    }

    pub fn meter(&self, name: &str) -> Meter {
        self.providers
            .get()
            .map_or_else(Meter::noop, |p| p.metrics.meter(name))
    }

    pub fn logger(&self, name: &str) -> Logger {
        self.providers
            .get()
            .map_or_else(Logger::noop, |p| p.logs.logger(name))
    }

    /// Exports everything currently queued for all signals.
    pub async fn force_flush_all(&self, timeout: Duration) -> Result<(), RegistryError> {
        let Some(p) = self.providers.get() else {
            return Ok(());
        };
        let (traces, metrics, logs) = tokio::join!(
            p.traces.force_flush(timeout),
            p.metrics.force_flush(timeout),
            p.logs.force_flush(timeout),
        );
        traces?;
        metrics?;
        logs?;
        Ok(())
    }

    /// Shuts every provider down concurrently, each bounded by the
    /// configured shutdown timeout. Later calls return `Ok(())` immediately.
    pub async fn shutdown_all(&self) -> Result<(), RegistryError> {
        let Some(p) = self.providers.get() else {
            return Ok(());
        };
        let deadline = p.shutdown_timeout;
        let [traces, metrics, logs] = p.all();

        let results = tokio::join!(
            traces.shutdown_boxed(deadline),
            metrics.shutdown_boxed(deadline),
            logs.shutdown_boxed(deadline),
        );

        let mut signals = Vec::new();
        let mut lost = 0;
        for (provider, result) in p.all().into_iter().zip([results.0, results.1, results.2]) {
            if let Err(error) = result {
                lost += error.lost_items();
                signals.push(provider.signal());
            }
        }

        if signals.is_empty() {
            tracing::info!("telemetry pipeline shut down");
            return Ok(());
        }

        tracing::warn!(?signals, lost, "telemetry pipeline shutdown incomplete");
        Err(RegistryError::ShutdownIncomplete { signals, lost })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporter::TestExporter;
    use crate::signal::{KeyValue, Severity, TelemetryItem};

    fn test_config() -> PipelineConfig {
        PipelineConfig::new()
            .with_service_name("registry-test")
            .with_export_interval(Duration::from_secs(60))
    }

    #[test]
    fn test_uninitialized_registry_is_noop() {
        let registry = ProviderRegistry::new();

        assert!(registry.tracer("t").is_noop());
        assert!(registry.meter("m").is_noop());
        assert!(registry.logger("l").is_noop());
        for kind in SignalKind::ALL {
            assert_eq!(registry.state(kind), SignalState::Uninitialized);
            assert!(registry.metrics(kind).is_none());
        }

        registry.tracer("t").in_span("span", |span| span.set_attribute("k", 1i64));
        registry.logger("l").info("dropped");
    }

    #[tokio::test]
    async fn test_initialize_twice_fails() {
        let registry = ProviderRegistry::new();
        let exporters = SignalExporters::shared(Arc::new(TestExporter::new()));

        registry
            .initialize_with_exporters(&test_config(), exporters.clone())
            .unwrap();
        assert!(matches!(
            registry.initialize_with_exporters(&test_config(), exporters),
            Err(RegistryError::AlreadyInitialized)
        ));
        assert!(matches!(
            registry.initialize(&test_config()),
            Err(RegistryError::AlreadyInitialized)
        ));
        registry.shutdown_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let registry = ProviderRegistry::new();
        let config = test_config().with_max_queue_size(0);

        assert!(matches!(
            registry.initialize(&config),
            Err(RegistryError::Config(_))
        ));
        assert!(!registry.is_initialized());
    }

    #[tokio::test]
    async fn test_all_signals_reach_their_exporter() {
        let traces = Arc::new(TestExporter::new());
        let metrics = Arc::new(TestExporter::new());
        let logs = Arc::new(TestExporter::new());
        let registry = ProviderRegistry::new();
        registry
            .initialize_with_exporters(
                &test_config(),
                SignalExporters {
                    traces: traces.clone(),
                    metrics: metrics.clone(),
                    logs: logs.clone(),
                },
            )
            .unwrap();

        let span = registry.tracer("svc").start_span("op");
        let context = span.context();
        span.end();
        registry
            .meter("svc")
            .u64_counter("hello.requests")
            .build()
            .add(1, &[KeyValue::new("endpoint", "/hello")]);
        registry
            .logger("svc")
            .emit_in_context(&context, Severity::Info, "hello", &[]);

        registry.force_flush_all(Duration::from_secs(1)).await.unwrap();

        assert_eq!(traces.exported_count(), 1);
        assert_eq!(metrics.exported_count(), 1);
        match &logs.all_items()[0] {
            TelemetryItem::Log(record) => {
                assert_eq!(record.trace_id, Some(context.trace_id));
                assert_eq!(record.span_id, Some(context.span_id));
                assert_eq!(record.resource.service_name(), Some("registry-test"));
            }
            other => panic!("expected log, got {:?}", other),
        }

        registry.shutdown_all().await.unwrap();
        for kind in SignalKind::ALL {
            assert_eq!(registry.state(kind), SignalState::Shutdown);
        }
        assert!(registry.tracer("svc").is_noop());
    }

    #[tokio::test]
    async fn test_shutdown_all_is_idempotent() {
        let exporter = Arc::new(TestExporter::new());
        let registry = ProviderRegistry::new();
        registry
            .initialize_with_exporters(&test_config(), SignalExporters::shared(exporter.clone()))
            .unwrap();

        registry.logger("svc").info("once");
        registry.shutdown_all().await.unwrap();
        registry.shutdown_all().await.unwrap();

        assert_eq!(exporter.batch_sizes(), vec![1]);
    }
}
