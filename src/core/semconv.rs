//! OpenTelemetry semantic convention keys used by Lantern.

/// Resource attribute keys.
pub mod resource {
    pub const SERVICE_NAME: &str = "service.name";
    pub const SERVICE_INSTANCE_ID: &str = "service.instance.id";
}

/// Tag keys synthesized when spans are rendered for Jaeger.
pub mod jaeger {
    pub const SPAN_KIND: &str = "span.kind";
    pub const OTEL_STATUS_CODE: &str = "otel.status_code";
    pub const OTEL_STATUS_DESCRIPTION: &str = "otel.status_description";
    pub const OTEL_SCOPE_NAME: &str = "otel.scope.name";
    pub const OTEL_SCOPE_VERSION: &str = "otel.scope.version";
    pub const ERROR: &str = "error";
    /// Field holding the event name in a span log
    pub const EVENT: &str = "event";
}
