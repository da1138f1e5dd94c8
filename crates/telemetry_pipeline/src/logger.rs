use crate::context::SpanContext;
use crate::provider::Emitter;
use crate::signal::{collect_attributes, KeyValue, LogRecord, Severity};
use std::fmt;
use std::sync::Arc;

/// Emits log records for one instrumentation scope.
#[derive(Clone)]
pub struct Logger {
    scope: Arc<str>,
    emitter: Option<Arc<Emitter>>,
}

impl Logger {
    pub(crate) fn new(scope: &str, emitter: Arc<Emitter>) -> Self {
        Self {
            scope: Arc::from(scope),
            emitter: Some(emitter),
        }
    }

    pub fn noop() -> Self {
        Self {
            scope: Arc::from(""),
            emitter: None,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.emitter.is_none()
    }

    pub fn emit(&self, severity: Severity, body: impl Into<String>, attributes: &[KeyValue]) {
        if self.is_noop() {
            return;
        }
        let mut record = LogRecord::new(severity, body);
        record.attributes = collect_attributes(attributes);
        self.emit_record(record);
    }

    /// Like [`emit`](Self::emit), correlated with `context` when it is valid.
    pub fn emit_in_context(
        &self,
        context: &SpanContext,
        severity: Severity,
        body: impl Into<String>,
        attributes: &[KeyValue],
    ) {
        if self.is_noop() {
            return;
        }
        let mut record = LogRecord::new(severity, body);
        record.attributes = collect_attributes(attributes);
        if context.is_valid() {
            record.trace_id = Some(context.trace_id);
            record.span_id = Some(context.span_id);
        }
        self.emit_record(record);
    }

    /// Emits a fully built record under this logger's scope.
    pub fn emit_record(&self, mut record: LogRecord) {
        if let Some(emitter) = self.emitter.as_ref() {
            record.scope = Arc::clone(&self.scope);
            emitter.emit(record);
        }
    }

    pub fn info(&self, body: impl Into<String>) {
        self.emit(Severity::Info, body, &[]);
    }

    pub fn warn(&self, body: impl Into<String>) {
        self.emit(Severity::Warn, body, &[]);
    }

    pub fn error(&self, body: impl Into<String>) {
        self.emit(Severity::Error, body, &[]);
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("scope", &self.scope)
            .field("noop", &self.is_noop())
            .finish()
    }
}
