//! Jaeger UI JSON model.
//!
//! Field names follow the Jaeger query service JSON (`traceID`, `spanID`,
//! `processID`, microsecond times).

use crate::core::{Attribute, AttributeValue, Resource, Span, SpanKind, StatusCode, TraceId};
use crate::core::semconv::jaeger as keys;
use crate::core::semconv::resource::SERVICE_NAME;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

const CHILD_OF: &str = "CHILD_OF";
const FOLLOWS_FROM: &str = "FOLLOWS_FROM";

/// Response envelope shared by every Jaeger endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JaegerResponse<T> {
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JaegerError>,
}

impl<T> JaegerResponse<T> {
    pub fn ok(data: T) -> Self {
        Self { data, error: None }
    }

    pub fn with_error(data: T, code: u16, message: impl Into<String>) -> Self {
        Self {
            data,
            error: Some(JaegerError {
                code,
                message: message.into(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JaegerError {
    pub code: u16,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JaegerTrace {
    #[serde(rename = "traceID")]
    pub trace_id: String,
    pub spans: Vec<JaegerSpan>,
    pub processes: BTreeMap<String, JaegerProcess>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub warnings: Vec<String>,
}

impl JaegerTrace {
    /// Builds a trace, giving every distinct resource one process key
    /// (`p1`, `p2`, ...) in order of first appearance.
    pub fn from_spans(trace_id: &TraceId, spans: &[Span]) -> Self {
        let mut seen: Vec<(&Resource, String)> = Vec::new();
        let mut processes = BTreeMap::new();
        let mut jaeger_spans = Vec::with_capacity(spans.len());

        for span in spans {
            let process_id = match seen.iter().find(|(resource, _)| *resource == &span.resource) {
                Some((_, key)) => key.clone(),
                None => {
                    let key = format!("p{}", seen.len() + 1);
                    processes.insert(key.clone(), JaegerProcess::from_resource(&span.resource));
                    seen.push((&span.resource, key.clone()));
                    key
                },
            };
            jaeger_spans.push(JaegerSpan::from_span(span, process_id));
        }

        JaegerTrace {
            trace_id: trace_id.to_string(),
            spans: jaeger_spans,
            processes,
            warnings: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JaegerSpan {
    #[serde(rename = "traceID")]
    pub trace_id: String,
    #[serde(rename = "spanID")]
    pub span_id: String,
    pub operation_name: String,
    pub references: Vec<JaegerReference>,
    pub flags: u32,
    /// Microseconds since the epoch
    pub start_time: u64,
    /// Microseconds
    pub duration: u64,
    pub tags: Vec<JaegerKeyValue>,
    pub logs: Vec<JaegerLog>,
    #[serde(rename = "processID")]
    pub process_id: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub warnings: Vec<String>,
}

impl JaegerSpan {
    pub fn from_span(span: &Span, process_id: String) -> Self {
        let mut references = Vec::with_capacity(span.links.len() + 1);
        if !span.parent_span_id.is_empty() {
            references.push(JaegerReference {
                ref_type: CHILD_OF.to_string(),
                trace_id: span.trace_id.to_string(),
                span_id: span.parent_span_id.to_string(),
            });
        }
        references.extend(span.links.iter().map(|link| JaegerReference {
            ref_type: FOLLOWS_FROM.to_string(),
            trace_id: link.trace_id.to_string(),
            span_id: link.span_id.to_string(),
        }));

        let mut warnings = Vec::new();
        if span.dropped_attributes_count > 0 {
            warnings.push(format!(
                "{} attribute(s) dropped during conversion",
                span.dropped_attributes_count
            ));
        }

        JaegerSpan {
            trace_id: span.trace_id.to_string(),
            span_id: span.span_id.to_string(),
            operation_name: span.name.clone(),
            references,
            flags: span.trace_flags,
            start_time: span.start_time_unix_nano / 1_000,
            duration: span.duration_nanos / 1_000,
            tags: span_tags(span),
            logs: span
                .events
                .iter()
                .map(|event| {
                    let mut fields = vec![JaegerKeyValue::string(keys::EVENT, &event.name)];
                    fields.extend(event.attributes.iter().map(JaegerKeyValue::from_attribute));
                    JaegerLog {
                        timestamp: event.time_unix_nano / 1_000,
                        fields,
                    }
                })
                .collect(),
            process_id,
            warnings,
        }
    }
}

/// Span attributes plus the synthetic tags Jaeger expects for kind, status
/// and instrumentation scope.
fn span_tags(span: &Span) -> Vec<JaegerKeyValue> {
    let mut tags: Vec<JaegerKeyValue> =
        span.attributes.iter().map(JaegerKeyValue::from_attribute).collect();

    if span.kind != SpanKind::Unspecified {
        tags.push(JaegerKeyValue::string(keys::SPAN_KIND, span.kind.as_str()));
    }
    if let Some(code) = span.status_code.filter(|c| *c != StatusCode::Unset) {
        tags.push(JaegerKeyValue::string(keys::OTEL_STATUS_CODE, code.as_str()));
    }
    if span.has_error() {
        tags.push(JaegerKeyValue {
            key: keys::ERROR.to_string(),
            value_type: "bool".to_string(),
            value: Value::Bool(true),
        });
    }
    if let Some(message) = span.status_message.as_deref().filter(|m| !m.is_empty()) {
        tags.push(JaegerKeyValue::string(keys::OTEL_STATUS_DESCRIPTION, message));
    }
    if !span.scope.name.is_empty() {
        tags.push(JaegerKeyValue::string(keys::OTEL_SCOPE_NAME, &span.scope.name));
    }
    if !span.scope.version.is_empty() {
        tags.push(JaegerKeyValue::string(keys::OTEL_SCOPE_VERSION, &span.scope.version));
    }
    tags
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JaegerReference {
    pub ref_type: String,
    #[serde(rename = "traceID")]
    pub trace_id: String,
    #[serde(rename = "spanID")]
    pub span_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JaegerKeyValue {
    pub key: String,
    #[serde(rename = "type")]
    pub value_type: String,
    pub value: Value,
}

impl JaegerKeyValue {
    pub fn string(key: &str, value: &str) -> Self {
        Self {
            key: key.to_string(),
            value_type: "string".to_string(),
            value: Value::String(value.to_string()),
        }
    }

    pub fn from_attribute(attribute: &Attribute) -> Self {
        let value = match &attribute.value {
            AttributeValue::String(s) => Value::String(s.clone()),
            AttributeValue::Bool(b) => Value::Bool(*b),
            AttributeValue::Int(i) => Value::from(*i),
            AttributeValue::Double(d) => Value::from(*d),
            AttributeValue::Bytes(_) => Value::String(attribute.value.to_text()),
        };
        Self {
            key: attribute.key.clone(),
            value_type: attribute.value.value_type().to_string(),
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JaegerLog {
    /// Microseconds since the epoch
    pub timestamp: u64,
    pub fields: Vec<JaegerKeyValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JaegerProcess {
    pub service_name: String,
    pub tags: Vec<JaegerKeyValue>,
}

impl JaegerProcess {
    /// Resource attributes become process tags; the service name is carried
    /// separately and not repeated as a tag.
    pub fn from_resource(resource: &Resource) -> Self {
        Self {
            service_name: resource.service_name.clone(),
            tags: resource
                .attributes
                .iter()
                .filter(|a| a.key != SERVICE_NAME)
                .map(JaegerKeyValue::from_attribute)
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{SpanEvent, SpanId, SpanLink};
    use pretty_assertions::assert_eq;

    fn resource(service: &str) -> Resource {
        Resource {
            service_name: service.to_string(),
            service_instance_id: String::new(),
            attributes: vec![
                Attribute::new(SERVICE_NAME, service),
                Attribute::new("host.name", "box-1"),
            ],
        }
    }

    fn span(id: &str, parent: &str, service: &str) -> Span {
        Span::builder()
            .trace_id(TraceId::new("abc"))
            .span_id(SpanId::new(id))
            .parent_span_id(SpanId::new(parent))
            .name("op")
            .start_time_unix_nano(2_000_000)
            .end_time_unix_nano(5_000_000)
            .resource(resource(service))
            .build()
    }

    #[test]
    fn test_processes_deduplicated_in_order() {
        let spans = vec![span("a", "", "web"), span("b", "a", "db"), span("c", "a", "web")];
        let trace = JaegerTrace::from_spans(&TraceId::new("abc"), &spans);

        assert_eq!(trace.processes.len(), 2);
        assert_eq!(trace.processes["p1"].service_name, "web");
        assert_eq!(trace.processes["p2"].service_name, "db");
        let ids: Vec<&str> = trace.spans.iter().map(|s| s.process_id.as_str()).collect();
        assert_eq!(ids, vec!["p1", "p2", "p1"]);
        assert_eq!(trace.processes["p1"].tags, vec![JaegerKeyValue::string("host.name", "box-1")]);
    }

    #[test]
    fn test_span_references_and_times() {
        let mut child = span("b", "a", "web");
        child.links.push(SpanLink {
            trace_id: TraceId::new("other"),
            span_id: SpanId::new("x"),
            trace_state: None,
            attributes: vec![],
        });
        let jaeger = JaegerSpan::from_span(&child, "p1".into());

        assert_eq!(jaeger.start_time, 2_000);
        assert_eq!(jaeger.duration, 3_000);
        assert_eq!(jaeger.references.len(), 2);
        assert_eq!(jaeger.references[0].ref_type, CHILD_OF);
        assert_eq!(jaeger.references[0].span_id, "a");
        assert_eq!(jaeger.references[1].ref_type, FOLLOWS_FROM);
        assert_eq!(jaeger.references[1].trace_id, "other");

        let root = JaegerSpan::from_span(&span("a", "", "web"), "p1".into());
        assert!(root.references.is_empty());
    }

    #[test]
    fn test_status_and_kind_tags() {
        let mut s = span("a", "", "web");
        s.kind = SpanKind::Server;
        s.status_code = Some(StatusCode::Error);
        s.status_message = Some("boom".into());
        s.attributes.push(Attribute::new("retries", 3i64));
        let tags = JaegerSpan::from_span(&s, "p1".into()).tags;

        let find = |key: &str| tags.iter().find(|t| t.key == key).cloned();
        assert_eq!(find("retries").unwrap().value_type, "int64");
        assert_eq!(find("retries").unwrap().value, Value::from(3));
        assert_eq!(find("span.kind").unwrap().value, Value::from("server"));
        assert_eq!(find("otel.status_code").unwrap().value, Value::from("ERROR"));
        assert_eq!(find("error").unwrap().value, Value::Bool(true));
        assert_eq!(find("otel.status_description").unwrap().value, Value::from("boom"));
    }

    #[test]
    fn test_events_become_logs() {
        let mut s = span("a", "", "web");
        s.events.push(SpanEvent {
            time_unix_nano: 3_000_000,
            name: "exception".into(),
            attributes: vec![Attribute::new("exception.type", "IOError")],
        });
        let logs = JaegerSpan::from_span(&s, "p1".into()).logs;
        assert_eq!(logs[0].timestamp, 3_000);
        assert_eq!(logs[0].fields[0], JaegerKeyValue::string("event", "exception"));
        assert_eq!(logs[0].fields[1].key, "exception.type");
    }

    #[test]
    fn test_response_serialization() {
        let body = serde_json::to_value(JaegerResponse::<Vec<JaegerTrace>>::with_error(
            vec![],
            404,
            "trace not found",
        ))
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({"data": [], "error": {"code": 404, "message": "trace not found"}})
        );
        let ok = serde_json::to_value(JaegerResponse::ok(vec!["svc"])).unwrap();
        assert_eq!(ok, serde_json::json!({"data": ["svc"]}));
    }
}
