//! Error types for the pipeline outside the export path.
//!
//! Export failures live next to the exporter trait in [`crate::exporter`].

use crate::signal::SignalKind;
use thiserror::Error;

/// Errors returned by [`SignalQueue::enqueue`](crate::SignalQueue::enqueue).
///
/// Neither variant is fatal: the item is dropped and counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The queue is at `max_queue_size`; the incoming item was dropped.
    #[error("queue overflow: capacity {capacity} reached, item dropped")]
    Overflow {
        /// Configured capacity of the queue.
        capacity: usize,
    },
    /// The queue has been closed by a processor shutdown.
    #[error("queue is closed")]
    Closed,
}

impl QueueError {
    /// Returns `true` if a later enqueue may succeed.
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Overflow { .. })
    }
}

/// Invalid pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
    /// A size or duration that must be positive was zero.
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
    /// `max_export_batch_size` is larger than `max_queue_size`.
    #[error("max_export_batch_size ({batch}) must not exceed max_queue_size ({queue})")]
    BatchExceedsQueue { batch: usize, queue: usize },
    /// The endpoint is not an http(s) URL.
    #[error("endpoint {0:?} must start with http:// or https://")]
    InvalidEndpoint(String),
}

/// Errors from [`BatchProcessor`](crate::BatchProcessor) control operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProcessorError {
    /// The processor has already been shut down.
    #[error("{0} processor has been shut down")]
    ShutDown(SignalKind),
    /// No tokio runtime was available to spawn the background task.
    #[error("a tokio runtime is required to start the {0} processor")]
    NoRuntime(SignalKind),
    /// The final flush did not finish within the shutdown deadline.
    #[error("{signal} shutdown timed out; {lost} items were not exported")]
    ShutdownTimeout { signal: SignalKind, lost: usize },
    /// A forced flush did not finish in time.
    #[error("{0} flush timed out")]
    FlushTimeout(SignalKind),
}

impl ProcessorError {
    /// Number of items known to be lost because of this error.
    pub fn lost_items(&self) -> usize {
        match self {
            Self::ShutdownTimeout { lost, .. } => *lost,
            _ => 0,
        }
    }
}

/// Errors from [`ProviderRegistry`](crate::ProviderRegistry).
#[derive(Debug, Error)]
pub enum RegistryError {
    /// `initialize` was called on a registry that is already initialized.
    #[error("provider registry is already initialized")]
    AlreadyInitialized,
    /// Configuration rejected during initialization.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    /// An exporter could not be constructed.
    #[error("failed to build {signal} exporter: {source}")]
    Exporter {
        signal: SignalKind,
        #[source]
        source: crate::exporter::ExportError,
    },
    /// A processor could not be started or stopped cleanly.
    #[error(transparent)]
    Processor(#[from] ProcessorError),
    /// One or more signals did not flush completely during shutdown.
    #[error("shutdown incomplete for {signals:?}; {lost} items were not exported")]
    ShutdownIncomplete {
        signals: Vec<SignalKind>,
        lost: usize,
    },
}
