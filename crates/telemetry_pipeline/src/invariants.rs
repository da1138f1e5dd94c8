//! Debug assertion macros for pipeline invariants.
//!
//! Only active in debug builds (`#[cfg(debug_assertions)]`), so there is
//! zero overhead in release builds.

// =============================================================================
// INV-Q-01: Bounded Queue
// =============================================================================

/// Assert that the queue never holds more than its capacity.
///
/// **Invariant**: `0 ≤ len ≤ max_queue_size`
///
/// Used in: `SignalQueue::enqueue()` after a successful push
macro_rules! debug_assert_queue_bounded {
    ($len:expr, $capacity:expr) => {
        debug_assert!(
            $len <= $capacity,
            "INV-Q-01 violated: queue holds {} items, capacity is {}",
            $len,
            $capacity
        )
    };
}

// =============================================================================
// INV-Q-02: Drain Accounting
// =============================================================================

/// Assert that drained + remaining equals what the queue held before.
///
/// **Invariant**: `drained + remaining == before`
///
/// Used in: `SignalQueue::drain()`
macro_rules! debug_assert_drain_accounted {
    ($before:expr, $drained:expr, $remaining:expr) => {
        debug_assert!(
            $drained + $remaining == $before,
            "INV-Q-02 violated: drained {} + remaining {} != {} queued",
            $drained,
            $remaining,
            $before
        )
    };
}

// =============================================================================
// INV-BP-01: Bounded Batch
// =============================================================================

/// Assert that a batch handed to an exporter respects `max_export_batch_size`.
///
/// **Invariant**: `batch.len() ≤ max_export_batch_size`
///
/// Used in: `BatchProcessor` right before `export_boxed()`
macro_rules! debug_assert_batch_bounded {
    ($len:expr, $max:expr) => {
        debug_assert!(
            $len <= $max,
            "INV-BP-01 violated: batch of {} items exceeds max_export_batch_size {}",
            $len,
            $max
        )
    };
}

// =============================================================================
// INV-RES-01/02: Bounded Retry
// =============================================================================

/// Assert that retry attempts and backoff delays stay within their bounds.
///
/// Used in: `RetryingExporter::export()`
macro_rules! debug_assert_retry_bounded {
    ($attempt:expr, $max_attempts:expr, $delay:expr, $max_delay:expr) => {
        debug_assert!(
            $attempt < $max_attempts,
            "INV-RES-01 violated: attempt {} exceeds max_attempts {}",
            $attempt,
            $max_attempts
        );
        debug_assert!(
            $delay <= $max_delay,
            "INV-RES-02 violated: delay {:?} exceeds max_delay {:?}",
            $delay,
            $max_delay
        );
    };
}

// =============================================================================
// Re-exports for crate-internal use
// =============================================================================

pub(crate) use debug_assert_batch_bounded;
pub(crate) use debug_assert_drain_accounted;
pub(crate) use debug_assert_queue_bounded;
pub(crate) use debug_assert_retry_bounded;
