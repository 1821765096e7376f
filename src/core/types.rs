//! Canonical telemetry model.
//!
//! Every span that enters Lantern is converted into these types once, at
//! ingestion, and never mutated afterwards. Readers materialize the same types
//! back out of storage, so the model is the only shape shared by receivers,
//! backends and query services.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Hex-encoded trace identifier. The empty string means "absent".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraceId(String);

/// Hex-encoded span identifier. The empty string means "absent".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpanId(String);

/// Renders an 8-byte id as the big-endian u64 in 16 lowercase hex characters.
fn render_u64(bytes: &[u8]) -> String {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    format!("{:016x}", u64::from_be_bytes(buf))
}

impl TraceId {
    /// Wraps an already rendered id.
    pub fn new<S: Into<String>>(id: S) -> Self {
        TraceId(id.into())
    }

    /// Renders raw OTLP trace id bytes.
    ///
    /// A 16-byte id whose high 8 bytes are zero renders as 16 characters
    /// (low half only); any other 16-byte id renders as 32 characters. The
    /// width is therefore not fixed, and consumers comparing ids must compare
    /// rendered strings produced by this function.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        match bytes.len() {
            0 => TraceId(String::new()),
            8 => TraceId(render_u64(bytes)),
            16 => {
                let (high, low) = bytes.split_at(8);
                if high.iter().all(|b| *b == 0) {
                    TraceId(render_u64(low))
                } else {
                    TraceId(format!("{}{}", render_u64(high), render_u64(low)))
                }
            },
            _ => TraceId(hex::encode(bytes)),
        }
    }

    /// Returns the string representation of the trace ID
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true for the absent sentinel
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the inner string value
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl SpanId {
    /// Wraps an already rendered id.
    pub fn new<S: Into<String>>(id: S) -> Self {
        SpanId(id.into())
    }

    /// Renders raw OTLP span id bytes (8 bytes → 16 hex chars, empty → "").
    pub fn from_bytes(bytes: &[u8]) -> Self {
        match bytes.len() {
            0 => SpanId(String::new()),
            8 => SpanId(render_u64(bytes)),
            _ => SpanId(hex::encode(bytes)),
        }
    }

    /// Returns the string representation of the span ID
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true for the absent sentinel
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the inner string value
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Span status code as reported by the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    Unset,
    Ok,
    Error,
}

impl StatusCode {
    /// OTLP wire value to status code; unknown values fall back to `Unset`.
    pub fn from_otlp(code: i32) -> Self {
        match code {
            1 => StatusCode::Ok,
            2 => StatusCode::Error,
            _ => StatusCode::Unset,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCode::Unset => "UNSET",
            StatusCode::Ok => "OK",
            StatusCode::Error => "ERROR",
        }
    }
}

/// Role of a span in its trace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SpanKind {
    #[default]
    Unspecified,
    Internal,
    Server,
    Client,
    Producer,
    Consumer,
}

impl SpanKind {
    /// OTLP wire value to span kind; unknown values map to `Unspecified`.
    pub fn from_otlp(kind: i32) -> Self {
        match kind {
            1 => SpanKind::Internal,
            2 => SpanKind::Server,
            3 => SpanKind::Client,
            4 => SpanKind::Producer,
            5 => SpanKind::Consumer,
            _ => SpanKind::Unspecified,
        }
    }

    /// Lowercase name used by Jaeger (`span.kind` tag, operation listings).
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanKind::Unspecified => "unspecified",
            SpanKind::Internal => "internal",
            SpanKind::Server => "server",
            SpanKind::Client => "client",
            SpanKind::Producer => "producer",
            SpanKind::Consumer => "consumer",
        }
    }

    /// Parses the lowercase name; the empty string is not a kind.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "unspecified" => Some(SpanKind::Unspecified),
            "internal" => Some(SpanKind::Internal),
            "server" => Some(SpanKind::Server),
            "client" => Some(SpanKind::Client),
            "producer" => Some(SpanKind::Producer),
            "consumer" => Some(SpanKind::Consumer),
            _ => None,
        }
    }
}

/// Typed attribute value.
///
/// Arrays and key-value lists are flattened into `String` at conversion time
/// and do not round-trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    String(String),
    Bool(bool),
    Int(i64),
    Double(f64),
    Bytes(Vec<u8>),
}

impl AttributeValue {
    /// Tag naming the value kind, matching Jaeger's `type` field.
    pub fn value_type(&self) -> &'static str {
        match self {
            AttributeValue::String(_) => "string",
            AttributeValue::Bool(_) => "bool",
            AttributeValue::Int(_) => "int64",
            AttributeValue::Double(_) => "float64",
            AttributeValue::Bytes(_) => "binary",
        }
    }

    /// Text rendering for sinks that only understand strings.
    pub fn to_text(&self) -> String {
        match self {
            AttributeValue::String(s) => s.clone(),
            AttributeValue::Bool(b) => b.to_string(),
            AttributeValue::Int(i) => i.to_string(),
            AttributeValue::Double(d) => d.to_string(),
            AttributeValue::Bytes(bytes) => hex::encode(bytes),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::String(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Int(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Double(value)
    }
}

/// A key/value annotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub key: String,
    pub value: AttributeValue,
}

impl Attribute {
    pub fn new<K: Into<String>, V: Into<AttributeValue>>(key: K, value: V) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Finds the first attribute with `key`.
pub fn find_attribute<'a>(attributes: &'a [Attribute], key: &str) -> Option<&'a AttributeValue> {
    attributes.iter().find(|a| a.key == key).map(|a| &a.value)
}

/// The process that produced a span or metric.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub service_name: String,
    pub service_instance_id: String,
    pub attributes: Vec<Attribute>,
}

/// Instrumentation library that emitted the span.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstrumentationScope {
    pub name: String,
    pub version: String,
}

/// Reference to another span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanLink {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub trace_state: Option<String>,
    pub attributes: Vec<Attribute>,
}

/// Timestamped occurrence inside a span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanEvent {
    pub time_unix_nano: u64,
    pub name: String,
    pub attributes: Vec<Attribute>,
}

/// A single timed operation within a trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    /// Empty for root spans
    pub parent_span_id: SpanId,
    pub name: String,
    pub start_time_unix_nano: u64,
    pub end_time_unix_nano: u64,
    /// `end - start` with wrapping subtraction; an end before the start
    /// yields a huge value rather than an error.
    pub duration_nanos: u64,
    pub status_code: Option<StatusCode>,
    pub status_message: Option<String>,
    pub kind: SpanKind,
    pub resource: Resource,
    pub scope: InstrumentationScope,
    pub trace_flags: u32,
    pub trace_state: Option<String>,
    pub links: Vec<SpanLink>,
    pub attributes: Vec<Attribute>,
    pub events: Vec<SpanEvent>,
    pub dropped_attributes_count: u32,
}

impl Span {
    /// Creates a new span builder
    pub fn builder() -> SpanBuilder {
        SpanBuilder::default()
    }

    /// Returns true if this span has no parent
    pub fn is_root(&self) -> bool {
        self.parent_span_id.is_empty()
    }

    pub fn has_error(&self) -> bool {
        self.status_code == Some(StatusCode::Error)
    }

    pub fn service_name(&self) -> &str {
        &self.resource.service_name
    }

    /// Gets a span attribute value by key
    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        find_attribute(&self.attributes, key)
    }
}

/// Builder for Span instances
#[derive(Default)]
pub struct SpanBuilder {
    trace_id: TraceId,
    span_id: SpanId,
    parent_span_id: SpanId,
    name: String,
    start_time_unix_nano: u64,
    end_time_unix_nano: u64,
    status_code: Option<StatusCode>,
    status_message: Option<String>,
    kind: SpanKind,
    resource: Resource,
    scope: InstrumentationScope,
    trace_flags: u32,
    trace_state: Option<String>,
    links: Vec<SpanLink>,
    attributes: Vec<Attribute>,
    events: Vec<SpanEvent>,
    dropped_attributes_count: u32,
}

impl SpanBuilder {
    pub fn trace_id(mut self, trace_id: TraceId) -> Self {
        self.trace_id = trace_id;
        self
    }

    pub fn span_id(mut self, span_id: SpanId) -> Self {
        self.span_id = span_id;
        self
    }

    pub fn parent_span_id(mut self, parent_span_id: SpanId) -> Self {
        self.parent_span_id = parent_span_id;
        self
    }

    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    pub fn start_time_unix_nano(mut self, nanos: u64) -> Self {
        self.start_time_unix_nano = nanos;
        self
    }

    pub fn end_time_unix_nano(mut self, nanos: u64) -> Self {
        self.end_time_unix_nano = nanos;
        self
    }

    pub fn status(mut self, code: StatusCode, message: Option<String>) -> Self {
        self.status_code = Some(code);
        self.status_message = message;
        self
    }

    pub fn kind(mut self, kind: SpanKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn resource(mut self, resource: Resource) -> Self {
        self.resource = resource;
        self
    }

    pub fn scope(mut self, scope: InstrumentationScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn trace_flags(mut self, flags: u32) -> Self {
        self.trace_flags = flags;
        self
    }

    pub fn trace_state(mut self, state: Option<String>) -> Self {
        self.trace_state = state;
        self
    }

    pub fn link(mut self, link: SpanLink) -> Self {
        self.links.push(link);
        self
    }

    pub fn attribute<K: Into<String>, V: Into<AttributeValue>>(mut self, key: K, value: V) -> Self {
        self.attributes.push(Attribute::new(key, value));
        self
    }

    pub fn attributes(mut self, attributes: Vec<Attribute>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn event(mut self, event: SpanEvent) -> Self {
        self.events.push(event);
        self
    }

    pub fn dropped_attributes_count(mut self, count: u32) -> Self {
        self.dropped_attributes_count = count;
        self
    }

    pub fn build(self) -> Span {
        Span {
            duration_nanos: self.end_time_unix_nano.wrapping_sub(self.start_time_unix_nano),
            trace_id: self.trace_id,
            span_id: self.span_id,
            parent_span_id: self.parent_span_id,
            name: self.name,
            start_time_unix_nano: self.start_time_unix_nano,
            end_time_unix_nano: self.end_time_unix_nano,
            status_code: self.status_code,
            status_message: self.status_message,
            kind: self.kind,
            resource: self.resource,
            scope: self.scope,
            trace_flags: self.trace_flags,
            trace_state: self.trace_state,
            links: self.links,
            attributes: self.attributes,
            events: self.events,
            dropped_attributes_count: self.dropped_attributes_count,
        }
    }
}
