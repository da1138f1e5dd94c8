//! Span context and W3C `traceparent` propagation.
//!
//! Only the `traceparent` header (version `00`) is understood. `tracestate`
//! and sampling decisions beyond the sampled flag are not handled.

use std::fmt;
use thiserror::Error;

/// W3C Trace Context header name for traceparent
pub const TRACEPARENT_HEADER: &str = "traceparent";

const FLAG_SAMPLED: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("traceparent must have 4 dash-separated fields")]
    Malformed,
    #[error("unsupported traceparent version {0:?}")]
    UnsupportedVersion(u8),
    #[error("traceparent field has invalid length or hex digits")]
    InvalidField,
    #[error("trace id and span id must be non-zero")]
    ZeroId,
}

/// Identity of a span that children can link to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanContext {
    pub trace_id: u128,
    pub span_id: u64,
    pub trace_flags: u8,
}

impl SpanContext {
    /// The invalid context returned by no-op spans.
    pub const INVALID: SpanContext = SpanContext {
        trace_id: 0,
        span_id: 0,
        trace_flags: 0,
    };

    pub fn new(trace_id: u128, span_id: u64, sampled: bool) -> Self {
        Self {
            trace_id,
            span_id,
            trace_flags: if sampled { FLAG_SAMPLED } else { 0 },
        }
    }

    /// Fresh root context with random ids.
    pub fn new_root() -> Self {
        Self::new(generate_trace_id(), generate_span_id(), true)
    }

    /// Context for a child of `self`: same trace, new span id.
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id,
            span_id: generate_span_id(),
            trace_flags: self.trace_flags,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.trace_id != 0 && self.span_id != 0
    }

    pub fn is_sampled(&self) -> bool {
        self.trace_flags & FLAG_SAMPLED == FLAG_SAMPLED
    }

    /// Format as W3C traceparent header value
    pub fn to_traceparent(&self) -> String {
        format!(
            "00-{:032x}-{:016x}-{:02x}",
            self.trace_id, self.span_id, self.trace_flags
        )
    }

    /// Parse from W3C traceparent header value
    pub fn from_traceparent(value: &str) -> Result<Self, ContextError> {
        let parts: Vec<&str> = value.trim().split('-').collect();
        if parts.len() != 4 {
            return Err(ContextError::Malformed);
        }

        let version = parse_hex_u8(parts[0])?;
        if version != 0 {
            return Err(ContextError::UnsupportedVersion(version));
        }

        let (trace_id, span_id, flags) = (parts[1], parts[2], parts[3]);
        if trace_id.len() != 32 || span_id.len() != 16 || !is_hex(trace_id) || !is_hex(span_id) {
            return Err(ContextError::InvalidField);
        }

        let trace_id =
            u128::from_str_radix(trace_id, 16).map_err(|_| ContextError::InvalidField)?;
        let span_id = u64::from_str_radix(span_id, 16).map_err(|_| ContextError::InvalidField)?;
        let trace_flags = parse_hex_u8(flags)?;

        let context = Self {
            trace_id,
            span_id,
            trace_flags,
        };
        if !context.is_valid() {
            return Err(ContextError::ZeroId);
        }
        Ok(context)
    }
}

impl fmt::Display for SpanContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_traceparent())
    }
}

fn parse_hex_u8(field: &str) -> Result<u8, ContextError> {
    if field.len() != 2 || !is_hex(field) {
        return Err(ContextError::InvalidField);
    }
    u8::from_str_radix(field, 16).map_err(|_| ContextError::InvalidField)
}

fn is_hex(field: &str) -> bool {
    field.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Random non-zero 128-bit trace id.
pub(crate) fn generate_trace_id() -> u128 {
    loop {
        let id: u128 = rand::random();
        if id != 0 {
            return id;
        }
    }
}

/// Random non-zero 64-bit span id.
pub(crate) fn generate_span_id() -> u64 {
    loop {
        let id: u64 = rand::random();
        if id != 0 {
            return id;
        }
    }
}
