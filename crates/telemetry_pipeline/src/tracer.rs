use crate::context::SpanContext;
use crate::provider::Emitter;
use crate::signal::{AttributeValue, KeyValue, Span, SpanKind, SpanStatus};
use std::fmt;
use std::sync::Arc;

/// Creates spans for one instrumentation scope.
///
/// Cloning is cheap. A no-op tracer (from an uninitialized or shut-down
/// registry) hands out spans that record nothing.
#[derive(Clone)]
pub struct Tracer {
    scope: Arc<str>,
    emitter: Option<Arc<Emitter>>,
}

impl Tracer {
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

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn span_builder(&self, name: impl Into<String>) -> SpanBuilder<'_> {
        SpanBuilder {
            tracer: self,
            name: name.into(),
            kind: SpanKind::Internal,
            parent: None,
            attributes: Vec::new(),
        }
    }

    /// Starts an internal root span.
    pub fn start_span(&self, name: impl Into<String>) -> ActiveSpan {
        self.span_builder(name).start()
    }

    /// Runs `f` inside a new span and ends the span when `f` returns.
    pub fn in_span<T, F>(&self, name: impl Into<String>, f: F) -> T
    where
        F: FnOnce(&mut ActiveSpan) -> T,
    {
        let mut span = self.start_span(name);
        let out = f(&mut span);
        span.end();
        out
    }
}

impl fmt::Debug for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer")
            .field("scope", &self.scope)
            .field("noop", &self.is_noop())
            .finish()
    }
}

pub struct SpanBuilder<'a> {
    tracer: &'a Tracer,
    name: String,
    kind: SpanKind,
    parent: Option<SpanContext>,
    attributes: Vec<KeyValue>,
}

impl<'a> SpanBuilder<'a> {
    pub fn with_kind(mut self, kind: SpanKind) -> Self {
        self.kind = kind;
        self
    }

    /// Makes the span a child of `parent`. An invalid parent is ignored.
    pub fn with_parent(mut self, parent: SpanContext) -> Self {
        self.parent = parent.is_valid().then_some(parent);
        self
    }

    pub fn with_attribute(
        mut self,
        key: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Self {
        self.attributes.push(KeyValue::new(key, value));
        self
    }

    pub fn with_attributes(mut self, attributes: impl IntoIterator<Item = KeyValue>) -> Self {
        self.attributes.extend(attributes);
        self
    }

    pub fn start(self) -> ActiveSpan {
        let Some(emitter) = self.tracer.emitter.as_ref() else {
            return ActiveSpan::noop();
        };

        let (context, parent_span_id) = match self.parent {
            Some(parent) => (parent.child(), parent.span_id),
            None => (SpanContext::new_root(), 0),
        };

        let mut span = Span::new(
            context.trace_id,
            context.span_id,
            parent_span_id,
            self.name,
            self.kind,
        );
        span.scope = Arc::clone(&self.tracer.scope);
        for KeyValue { key, value } in self.attributes {
            span.attributes.insert(key, value);
        }

        ActiveSpan {
            inner: Some(Recording {
                span,
                emitter: Arc::clone(emitter),
            }),
            context,
        }
    }
}

struct Recording {
    span: Span,
    emitter: Arc<Emitter>,
}

/// A started span. Ends on [`end`](Self::end) or when dropped.
pub struct ActiveSpan {
    inner: Option<Recording>,
    context: SpanContext,
}

impl ActiveSpan {
    fn noop() -> Self {
        Self {
            inner: None,
            context: SpanContext::INVALID,
        }
    }

    /// Context to propagate to children; invalid for no-op spans.
    pub fn context(&self) -> SpanContext {
        self.context
    }

    pub fn is_recording(&self) -> bool {
        self.inner.is_some()
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        if let Some(recording) = self.inner.as_mut() {
            recording.span.set_attribute(key, value);
        }
    }

    pub fn set_status(&mut self, status: SpanStatus) {
        if let Some(recording) = self.inner.as_mut() {
            recording.span.status = status;
        }
    }

    pub fn end(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if let Some(Recording { mut span, emitter }) = self.inner.take() {
            let status = std::mem::take(&mut span.status);
            span.finish(status);
            emitter.emit(span);
        }
    }
}

impl Drop for ActiveSpan {
    fn drop(&mut self) {
        self.finish();
    }
}

impl fmt::Debug for ActiveSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveSpan")
            .field("context", &self.context)
            .field("recording", &self.is_recording())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_tracer() {
        let tracer = Tracer::noop();
        let mut span = tracer.start_span("nothing");
        span.set_attribute("k", "v");

        assert!(tracer.is_noop());
        assert!(!span.is_recording());
        assert_eq!(span.context(), SpanContext::INVALID);
        assert_eq!(tracer.in_span("closure", |_| 42), 42);
    }

    #[test]
    fn test_invalid_parent_ignored() {
        let tracer = Tracer::noop();
        let builder = tracer.span_builder("x").with_parent(SpanContext::INVALID);
        assert!(builder.parent.is_none());

        let parent = SpanContext::new_root();
        let builder = tracer.span_builder("x").with_parent(parent);
        assert_eq!(builder.parent, Some(parent));
    }
}
