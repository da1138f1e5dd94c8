//! `tracing` → log pipeline bridge.
//!
//! Install [`LogBridgeLayer`] on a `tracing_subscriber` registry and every
//! application event becomes a [`LogRecord`] on the logs queue. The
//! pipeline's own diagnostics, and those of the HTTP stack it exports
//! through, are skipped so exporting a log can never produce another one.

use crate::logger::Logger;
use crate::registry::ProviderRegistry;
use crate::signal::{AttributeValue, Attributes, LogRecord, Severity};
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

const SKIPPED_TARGETS: &[&str] = &[
    env!("CARGO_CRATE_NAME"),
    "hyper",
    "hyper_util",
    "reqwest",
    "h2",
    "rustls",
];

pub struct LogBridgeLayer {
    source: LoggerSource,
}

enum LoggerSource {
    Fixed(Logger),
    /// Resolved on the first event after the registry is initialized.
    Deferred {
        registry: Arc<ProviderRegistry>,
        scope: String,
        logger: OnceLock<Logger>,
    },
}

impl LogBridgeLayer {
    pub fn new(logger: Logger) -> Self {
        Self {
            source: LoggerSource::Fixed(logger),
        }
    }

    /// Bridges into `registry` once it is initialized, so the subscriber
    /// can be installed first and still see the pipeline's startup events.
    /// Events before initialization are not bridged.
    pub fn for_registry(registry: Arc<ProviderRegistry>, scope: impl Into<String>) -> Self {
        Self {
            source: LoggerSource::Deferred {
                registry,
                scope: scope.into(),
                logger: OnceLock::new(),
            },
        }
    }

    fn logger(&self) -> Option<&Logger> {
        let logger = match &self.source {
            LoggerSource::Fixed(logger) => logger,
            LoggerSource::Deferred {
                registry,
                scope,
                logger,
            } => match logger.get() {
                Some(logger) => logger,
                None if registry.is_initialized() => {
                    logger.get_or_init(|| registry.logger(scope))
                }
                None => return None,
            },
        };
        (!logger.is_noop()).then_some(logger)
    }
}

fn is_skipped(target: &str) -> bool {
    SKIPPED_TARGETS.iter().any(|skipped| {
        target == *skipped
            || target
                .strip_prefix(skipped)
                .is_some_and(|rest| rest.starts_with("::"))
    })
}

impl<S: Subscriber> Layer<S> for LogBridgeLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let Some(logger) = self.logger() else {
            return;
        };
        let metadata = event.metadata();
        if is_skipped(metadata.target()) {
            return;
        }

        let mut visitor = RecordVisitor::default();
        event.record(&mut visitor);

        let mut record = LogRecord::new(Severity::from(*metadata.level()), visitor.body);
        record.attributes = visitor.attributes;
        record
            .attributes
            .insert("log.target".to_string(), metadata.target().into());
        logger.emit_record(record);
    }
}

#[derive(Default)]
struct RecordVisitor {
    body: String,
    attributes: Attributes,
}

impl RecordVisitor {
    fn insert(&mut self, field: &Field, value: AttributeValue) {
        match (field.name(), value) {
            ("message", AttributeValue::String(body)) => self.body = body,
            (name, value) => {
                self.attributes.insert(name.to_string(), value);
            }
        }
    }
}

impl Visit for RecordVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.insert(field, AttributeValue::String(format!("{:?}", value)));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, value.into());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        let value = i64::try_from(value)
            .map(AttributeValue::Int)
            .unwrap_or_else(|_| AttributeValue::String(value.to_string()));
        self.insert(field, value);
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, value.into());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, value.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::exporter::TestExporter;
    use crate::registry::SignalExporters;
    use crate::signal::TelemetryItem;
    use std::sync::Mutex;
    use std::time::Duration;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn test_skipped_targets() {
        assert!(is_skipped("telemetry_pipeline"));
        assert!(is_skipped("telemetry_pipeline::processor"));
        assert!(is_skipped("hyper::proto::h1"));
        assert!(!is_skipped("hyperion"));
        assert!(!is_skipped("hello_server"));
    }

    #[tokio::test]
    async fn test_events_become_log_records() {
        let exporter = Arc::new(TestExporter::new());
        let registry = ProviderRegistry::new();
        registry
            .initialize_with_exporters(&PipelineConfig::new(), SignalExporters::shared(exporter.clone()))
            .unwrap();

        let subscriber =
            tracing_subscriber::registry().with(LogBridgeLayer::new(registry.logger("bridge")));
        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(target: "app", user_id = 42u64, ok = true, "request {} failed", 7);
            tracing::info!("pipeline diagnostics are not bridged");
        });

        registry.force_flush_all(Duration::from_secs(1)).await.unwrap();
        let items = exporter.all_items();
        assert_eq!(items.len(), 1);

        let TelemetryItem::Log(record) = &items[0] else {
            panic!("expected a log record");
        };
        assert_eq!(record.severity, Severity::Warn);
        assert_eq!(record.body, "request 7 failed");
        assert_eq!(record.attributes.get("user_id"), Some(&AttributeValue::Int(42)));
        assert_eq!(record.attributes.get("ok"), Some(&AttributeValue::Bool(true)));
        assert_eq!(
            record.attributes.get("log.target"),
            Some(&AttributeValue::String("app".to_string()))
        );
        registry.shutdown_all().await.unwrap();
    }

    /// Records the message of every event it sees.
    struct MessageRecorder(Arc<Mutex<Vec<String>>>);

    impl<S: Subscriber> Layer<S> for MessageRecorder {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            let mut visitor = RecordVisitor::default();
            event.record(&mut visitor);
            self.0.lock().unwrap().push(visitor.body);
        }
    }

    #[tokio::test]
    async fn test_deferred_bridge_sees_startup_and_later_events() {
        let exporter = Arc::new(TestExporter::new());
        let registry = Arc::new(ProviderRegistry::new());
        let messages = Arc::new(Mutex::new(Vec::new()));

        let subscriber = tracing_subscriber::registry()
            .with(MessageRecorder(Arc::clone(&messages)))
            .with(LogBridgeLayer::for_registry(Arc::clone(&registry), "bridge"));
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: "app", "before initialize");
            registry
                .initialize_with_exporters(
                    &PipelineConfig::new(),
                    SignalExporters::shared(exporter.clone()),
                )
                .unwrap();
            tracing::info!(target: "app", "after initialize");
        });

        assert!(messages
            .lock()
            .unwrap()
            .iter()
            .any(|m| m == "telemetry pipeline initialized"));

        registry.force_flush_all(Duration::from_secs(1)).await.unwrap();
        let bodies: Vec<String> = exporter
            .all_items()
            .into_iter()
            .filter_map(|item| match item {
                TelemetryItem::Log(record) => Some(record.body),
                _ => None,
            })
            .collect();
        assert_eq!(bodies, ["after initialize"]);
        registry.shutdown_all().await.unwrap();
    }
}
