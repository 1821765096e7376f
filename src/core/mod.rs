//! Core domain model, errors and configuration for Lantern.
//!
//! This module contains the telemetry types shared by the receivers,
//! the storage backends and the query services.

pub mod config;
pub mod error;
pub mod retry;
pub mod semconv;
pub mod types;

// Re-export commonly used types
pub use config::{BackendKind, Config, ConfigBuilder};
pub use error::{LanternError, Result};
pub use types::{
    Attribute, AttributeValue, InstrumentationScope, Resource, Span, SpanBuilder, SpanEvent,
    SpanId, SpanKind, SpanLink, StatusCode, TraceId,
};
