//! Monotonic counters. Every `add` becomes one delta point on the metrics
//! queue; there is no in-process aggregation.

use crate::provider::Emitter;
use crate::signal::{collect_attributes, KeyValue, MetricPoint, MetricValue};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Creates instruments for one instrumentation scope.
#[derive(Clone)]
pub struct Meter {
    scope: Arc<str>,
    emitter: Option<Arc<Emitter>>,
}

impl Meter {
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

    pub fn u64_counter(&self, name: impl Into<String>) -> CounterBuilder<'_, u64> {
        CounterBuilder::new(self, name.into())
    }

    pub fn f64_counter(&self, name: impl Into<String>) -> CounterBuilder<'_, f64> {
        CounterBuilder::new(self, name.into())
    }
}

impl fmt::Debug for Meter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Meter")
            .field("scope", &self.scope)
            .field("noop", &self.is_noop())
            .finish()
    }
}

/// Numeric types a counter can record.
pub trait CounterValue: Copy + Send + Sync + 'static {
    /// `None` for values a monotonic counter must not record.
    fn to_metric_value(self) -> Option<MetricValue>;
}

impl CounterValue for u64 {
    fn to_metric_value(self) -> Option<MetricValue> {
        Some(MetricValue::U64(self))
    }
}

impl CounterValue for f64 {
    fn to_metric_value(self) -> Option<MetricValue> {
        (self.is_finite() && self >= 0.0).then_some(MetricValue::F64(self))
    }
}

pub struct CounterBuilder<'a, T> {
    meter: &'a Meter,
    name: String,
    description: String,
    unit: String,
    _value: PhantomData<T>,
}

impl<'a, T: CounterValue> CounterBuilder<'a, T> {
    fn new(meter: &'a Meter, name: String) -> Self {
        Self {
            meter,
            name,
            description: String::new(),
            unit: String::new(),
            _value: PhantomData,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn build(self) -> Counter<T> {
        let inner = self.meter.emitter.as_ref().map(|emitter| {
            Arc::new(Instrument {
                name: self.name,
                description: self.description,
                unit: self.unit,
                scope: Arc::clone(&self.meter.scope),
                emitter: Arc::clone(emitter),
            })
        });
        Counter {
            inner,
            _value: PhantomData,
        }
    }
}

struct Instrument {
    name: String,
    description: String,
    unit: String,
    scope: Arc<str>,
    emitter: Arc<Emitter>,
}

/// A monotonic counter; cheap to clone and share across handlers.
pub struct Counter<T> {
    inner: Option<Arc<Instrument>>,
    _value: PhantomData<T>,
}

impl<T> Clone for Counter<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _value: PhantomData,
        }
    }
}

impl<T: CounterValue> Counter<T> {
    /// Records `value`. Negative or non-finite floats are ignored.
    pub fn add(&self, value: T, attributes: &[KeyValue]) {
        let Some(instrument) = self.inner.as_ref() else {
            return;
        };
        let Some(value) = value.to_metric_value() else {
            tracing::debug!(instrument = %instrument.name, "ignored invalid counter increment");
            return;
        };

        let mut point = MetricPoint::new(instrument.name.clone(), value);
        point.description.clone_from(&instrument.description);
        point.unit.clone_from(&instrument.unit);
        point.attributes = collect_attributes(attributes);
        point.scope = Arc::clone(&instrument.scope);
        instrument.emitter.emit(point);
    }

    pub fn is_noop(&self) -> bool {
        self.inner.is_none()
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.as_ref().map(|i| i.name.as_str())
    }
}

impl<T> fmt::Debug for Counter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Counter")
            .field("name", &self.inner.as_ref().map(|i| i.name.as_str()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_counter_rejects_negative() {
        assert_eq!(1.5f64.to_metric_value(), Some(MetricValue::F64(1.5)));
        assert_eq!((-1.0f64).to_metric_value(), None);
        assert_eq!(f64::NAN.to_metric_value(), None);
        assert_eq!(7u64.to_metric_value(), Some(MetricValue::U64(7)));
    }

    #[test]
    fn test_noop_counter() {
        let counter = Meter::noop()
            .u64_counter("hello.requests")
            .with_description("requests served")
            .build();
        counter.add(1, &[KeyValue::new("endpoint", "/hello")]);
        assert!(counter.is_noop());
        assert_eq!(counter.name(), None);
    }
}
