//! Per-signal providers and their shutdown capability.
//!
//! Each provider owns one [`BatchProcessor`] and hands out cheap producer
//! handles ([`Tracer`], [`Meter`], [`Logger`]) that share an [`Emitter`]
//! pointing at the processor's queue.

use crate::error::ProcessorError;
use crate::logger::Logger;
use crate::meter::Meter;
use crate::processor::{BatchProcessor, MetricsSnapshot};
use crate::queue::SignalQueue;
use crate::resource::ResourceTagger;
use crate::signal::{SignalKind, TelemetryItem};
use crate::tracer::Tracer;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Lifecycle of one signal kind inside a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalState {
    Uninitialized,
    Active,
    ShuttingDown,
    Shutdown,
}

impl SignalState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Active,
            2 => Self::ShuttingDown,
            3 => Self::Shutdown,
            _ => Self::Uninitialized,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Uninitialized => 0,
            Self::Active => 1,
            Self::ShuttingDown => 2,
            Self::Shutdown => 3,
        }
    }
}

#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    fn new(state: SignalState) -> Self {
        Self(AtomicU8::new(state.as_u8()))
    }

    pub(crate) fn get(&self) -> SignalState {
        SignalState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Moves `from -> to`; returns `false` if the current state is not `from`.
    fn transition(&self, from: SignalState, to: SignalState) -> bool {
        self.0
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn set(&self, state: SignalState) {
        self.0.store(state.as_u8(), Ordering::Release);
    }
}

/// Tags items with the resource and enqueues them; shared by all producers
/// of one signal kind.
pub(crate) struct Emitter {
    kind: SignalKind,
    queue: Arc<SignalQueue<TelemetryItem>>,
    tagger: ResourceTagger,
    state: Arc<StateCell>,
}

impl Emitter {
    pub(crate) fn new(
        kind: SignalKind,
        queue: Arc<SignalQueue<TelemetryItem>>,
        tagger: ResourceTagger,
        state: Arc<StateCell>,
    ) -> Self {
        Self {
            kind,
            queue,
            tagger,
            state,
        }
    }

    /// Never blocks and never fails; overflow is counted by the queue.
    pub(crate) fn emit(&self, item: impl Into<TelemetryItem>) {
        if !self.is_active() {
            return;
        }
        let item = self.tagger.tagged(item.into());
        debug_assert_eq!(item.kind(), self.kind);
        if let Err(error) = self.queue.enqueue(item) {
            tracing::trace!(signal = %self.kind, %error, "item dropped");
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.state.get() == SignalState::Active
    }
}

/// Something that can be flushed and stopped within a deadline.
///
/// # Note on Object Safety
///
/// `shutdown` returns `impl Future`, so this trait is not object-safe.
/// Use [`ShutdownableBoxed`] to hold providers as trait objects.
pub trait Shutdownable: Send + Sync {
    fn signal(&self) -> SignalKind;

    /// Exports what is queued and stops. Calls after the first are no-ops.
    fn shutdown(&self, deadline: Duration)
        -> impl Future<Output = Result<(), ProcessorError>> + Send;
}

/// Object-safe version of [`Shutdownable`].
pub trait ShutdownableBoxed: Send + Sync {
    fn signal(&self) -> SignalKind;

    fn shutdown_boxed(
        &self,
        deadline: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<(), ProcessorError>> + Send + '_>>;
}

impl<T: Shutdownable> ShutdownableBoxed for T {
    fn signal(&self) -> SignalKind {
        Shutdownable::signal(self)
    }

    fn shutdown_boxed(
        &self,
        deadline: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<(), ProcessorError>> + Send + '_>> {
        Box::pin(self.shutdown(deadline))
    }
}

/// State shared by the three concrete providers.
struct SignalPipeline {
    processor: BatchProcessor,
    emitter: Arc<Emitter>,
    state: Arc<StateCell>,
}

impl SignalPipeline {
    fn new(processor: BatchProcessor, tagger: ResourceTagger) -> Self {
        let state = Arc::new(StateCell::new(SignalState::Active));
        let emitter = Arc::new(Emitter::new(
            processor.kind(),
            Arc::clone(processor.queue()),
            tagger,
            Arc::clone(&state),
        ));
        Self {
            processor,
            emitter,
            state,
        }
    }

    fn active_emitter(&self) -> Option<Arc<Emitter>> {
        self.emitter.is_active().then(|| Arc::clone(&self.emitter))
    }

    async fn shutdown(&self, deadline: Duration) -> Result<(), ProcessorError> {
        if !self
            .state
            .transition(SignalState::Active, SignalState::ShuttingDown)
        {
            return Ok(());
        }
        let result = self.processor.shutdown(deadline).await;
        self.state.set(SignalState::Shutdown);
        result
    }
}

macro_rules! signal_provider {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        pub struct $name {
            pipeline: SignalPipeline,
        }

        impl $name {
            pub(crate) fn new(processor: BatchProcessor, tagger: ResourceTagger) -> Self {
                Self {
                    pipeline: SignalPipeline::new(processor, tagger),
                }
            }

            pub fn state(&self) -> SignalState {
                self.pipeline.state.get()
            }

            pub fn metrics(&self) -> MetricsSnapshot {
                self.pipeline.processor.snapshot()
            }

            pub fn processor(&self) -> &BatchProcessor {
                &self.pipeline.processor
            }

            pub async fn force_flush(&self, timeout: Duration) -> Result<(), ProcessorError> {
                self.pipeline.processor.force_flush(timeout).await
            }
        }

        impl Shutdownable for $name {
            fn signal(&self) -> SignalKind {
                self.pipeline.processor.kind()
            }

            async fn shutdown(&self, deadline: Duration) -> Result<(), ProcessorError> {
                self.pipeline.shutdown(deadline).await
            }
        }
    };
}

signal_provider!(
    /// Owns the span pipeline and creates [`Tracer`]s.
    TracerProvider
);
signal_provider!(
    /// Owns the metric pipeline and creates [`Meter`]s.
    MeterProvider
);
signal_provider!(
    /// Owns the log pipeline and creates [`Logger`]s.
    LoggerProvider
);

impl TracerProvider {
    /// A tracer for instrumentation scope `name`; no-op once shut down.
    pub fn tracer(&self, name: &str) -> Tracer {
        match self.pipeline.active_emitter() {
            Some(emitter) => Tracer::new(name, emitter),
            None => Tracer::noop(),
        }
    }
}

impl MeterProvider {
    pub fn meter(&self, name: &str) -> Meter {
        match self.pipeline.active_emitter() {
            Some(emitter) => Meter::new(name, emitter),
            None => Meter::noop(),
        }
    }
}

impl LoggerProvider {
    pub fn logger(&self, name: &str) -> Logger {
        match self.pipeline.active_emitter() {
            Some(emitter) => Logger::new(name, emitter),
            None => Logger::noop(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporter::TestExporter;
    use crate::processor::BatchConfig;
    use crate::resource::Resource;

    fn provider(exporter: Arc<TestExporter>) -> TracerProvider {
        let processor =
            BatchProcessor::new(SignalKind::Traces, BatchConfig::default(), exporter).unwrap();
        let resource = Resource::builder().with_service_name("provider-test").build();
        TracerProvider::new(processor, ResourceTagger::new(resource))
    }

    #[test]
    fn test_state_transitions() {
        let cell = StateCell::new(SignalState::Active);
        assert!(cell.transition(SignalState::Active, SignalState::ShuttingDown));
        assert!(!cell.transition(SignalState::Active, SignalState::ShuttingDown));
        assert_eq!(cell.get(), SignalState::ShuttingDown);
        cell.set(SignalState::Shutdown);
        assert_eq!(cell.get(), SignalState::Shutdown);
    }

    #[tokio::test]
    async fn test_spans_are_tagged_with_resource() {
        let exporter = Arc::new(TestExporter::new());
        let provider = provider(exporter.clone());

        provider.tracer("tests").start_span("work").end();
        Shutdownable::shutdown(&provider, Duration::from_secs(1))
            .await
            .unwrap();

        let items = exporter.all_items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].resource().service_name(), Some("provider-test"));
        assert_eq!(items[0].scope(), "tests");
    }

    #[tokio::test]
    async fn test_shutdown_makes_producers_noop() {
        let exporter = Arc::new(TestExporter::new());
        let provider = provider(exporter.clone());
        let tracer = provider.tracer("tests");

        provider.shutdown_boxed(Duration::from_secs(1)).await.unwrap();
        assert_eq!(provider.state(), SignalState::Shutdown);

        tracer.start_span("late").end();
        assert!(provider.tracer("tests").is_noop());
        assert_eq!(provider.metrics().queue_dropped, 0);
        assert_eq!(exporter.exported_count(), 0);

        // second call does nothing
        provider.shutdown_boxed(Duration::from_secs(1)).await.unwrap();
    }
}
