//! OTLP span conversion.
//!
//! Conversion is pure: it never fails a span. An attribute whose value has no
//! kind set is skipped, logged at `warn` and counted in the span's
//! `dropped_attributes_count`.

use crate::core::semconv::resource::{SERVICE_INSTANCE_ID, SERVICE_NAME};
use crate::core::{
    Attribute, AttributeValue, InstrumentationScope, LanternError, Resource, Result, Span,
    SpanEvent, SpanId, SpanKind, SpanLink, StatusCode, TraceId,
};
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::common::v1::{
    any_value::Value as OtlpValue, AnyValue, InstrumentationScope as OtlpScope, KeyValue,
};
use opentelemetry_proto::tonic::resource::v1::Resource as OtlpResource;
use opentelemetry_proto::tonic::trace::v1::Span as OtlpSpan;

/// Converts one OTLP value into the attribute union. Arrays and key/value
/// lists are flattened to text.
pub fn convert_value(value: &AnyValue) -> Result<AttributeValue> {
    match &value.value {
        Some(OtlpValue::StringValue(s)) => Ok(AttributeValue::String(s.clone())),
        Some(OtlpValue::BoolValue(b)) => Ok(AttributeValue::Bool(*b)),
        Some(OtlpValue::IntValue(i)) => Ok(AttributeValue::Int(*i)),
        Some(OtlpValue::DoubleValue(d)) => Ok(AttributeValue::Double(*d)),
        Some(OtlpValue::BytesValue(b)) => Ok(AttributeValue::Bytes(b.clone())),
        Some(OtlpValue::ArrayValue(_)) | Some(OtlpValue::KvlistValue(_)) => {
            Ok(AttributeValue::String(render_value(value)))
        },
        None => Err(LanternError::conversion("attribute value has no kind set")),
    }
}

/// Text form of a nested value.
fn render_value(value: &AnyValue) -> String {
    match &value.value {
        Some(OtlpValue::StringValue(s)) => format!("{:?}", s),
        Some(OtlpValue::BoolValue(b)) => b.to_string(),
        Some(OtlpValue::IntValue(i)) => i.to_string(),
        Some(OtlpValue::DoubleValue(d)) => d.to_string(),
        Some(OtlpValue::BytesValue(b)) => hex::encode(b),
        Some(OtlpValue::ArrayValue(array)) => {
            let items: Vec<String> = array.values.iter().map(render_value).collect();
            format!("[{}]", items.join(","))
        },
        Some(OtlpValue::KvlistValue(list)) => {
            let items: Vec<String> = list
                .values
                .iter()
                .map(|kv| match &kv.value {
                    Some(v) => format!("{:?}:{}", kv.key, render_value(v)),
                    None => format!("{:?}:null", kv.key),
                })
                .collect();
            format!("{{{}}}", items.join(","))
        },
        None => "null".to_string(),
    }
}

/// Converts attributes, returning them with the number that were skipped.
pub fn convert_attributes(attributes: &[KeyValue]) -> (Vec<Attribute>, u32) {
    let mut converted = Vec::with_capacity(attributes.len());
    let mut dropped = 0u32;
    for kv in attributes {
        let value = kv
            .value
            .as_ref()
            .ok_or_else(|| LanternError::conversion("attribute has no value"))
            .and_then(convert_value);
        match value {
            Ok(value) => converted.push(Attribute {
                key: kv.key.clone(),
                value,
            }),
            Err(e) => {
                tracing::warn!("Dropping attribute {:?}: {}", kv.key, e);
                dropped = dropped.saturating_add(1);
            },
        }
    }
    (converted, dropped)
}

fn string_attribute(attributes: &[Attribute], key: &str) -> String {
    attributes
        .iter()
        .find(|a| a.key == key)
        .map(|a| a.value.to_text())
        .unwrap_or_default()
}

/// Builds the canonical resource, pulling out the service identity.
pub fn to_resource(resource: Option<&OtlpResource>) -> Resource {
    let Some(resource) = resource else {
        return Resource::default();
    };
    let (attributes, _) = convert_attributes(&resource.attributes);
    Resource {
        service_name: string_attribute(&attributes, SERVICE_NAME),
        service_instance_id: string_attribute(&attributes, SERVICE_INSTANCE_ID),
        attributes,
    }
}

pub fn to_scope(scope: Option<&OtlpScope>) -> InstrumentationScope {
    scope
        .map(|s| InstrumentationScope {
            name: s.name.clone(),
            version: s.version.clone(),
        })
        .unwrap_or_default()
}

fn non_empty(text: &str) -> Option<String> {
    (!text.is_empty()).then(|| text.to_string())
}

/// Converts one OTLP span. Total: every input produces a span.
pub fn to_span(span: &OtlpSpan, resource: &Resource, scope: &InstrumentationScope) -> Span {
    let (attributes, mut dropped) = convert_attributes(&span.attributes);
    dropped = dropped.saturating_add(span.dropped_attributes_count);

    let mut builder = Span::builder()
        .trace_id(TraceId::from_bytes(&span.trace_id))
        .span_id(SpanId::from_bytes(&span.span_id))
        .parent_span_id(SpanId::from_bytes(&span.parent_span_id))
        .name(span.name.clone())
        .start_time_unix_nano(span.start_time_unix_nano)
        .end_time_unix_nano(span.end_time_unix_nano)
        .kind(SpanKind::from_otlp(span.kind))
        .resource(resource.clone())
        .scope(scope.clone())
        .trace_flags(span.flags)
        .trace_state(non_empty(&span.trace_state))
        .attributes(attributes);

    if let Some(status) = &span.status {
        builder = builder.status(StatusCode::from_otlp(status.code), non_empty(&status.message));
    }

    for event in &span.events {
        let (attributes, event_dropped) = convert_attributes(&event.attributes);
        dropped = dropped.saturating_add(event_dropped);
        builder = builder.event(SpanEvent {
            time_unix_nano: event.time_unix_nano,
            name: event.name.clone(),
            attributes,
        });
    }

    for link in &span.links {
        let (attributes, link_dropped) = convert_attributes(&link.attributes);
        dropped = dropped.saturating_add(link_dropped);
        builder = builder.link(SpanLink {
            trace_id: TraceId::from_bytes(&link.trace_id),
            span_id: SpanId::from_bytes(&link.span_id),
            trace_state: non_empty(&link.trace_state),
            attributes,
        });
    }

    builder.dropped_attributes_count(dropped).build()
}

/// Flattens an export request into canonical spans.
pub fn spans_from_request(request: &ExportTraceServiceRequest) -> Vec<Span> {
    let mut spans = Vec::new();
    for resource_spans in &request.resource_spans {
        let resource = to_resource(resource_spans.resource.as_ref());
        for scope_spans in &resource_spans.scope_spans {
            let scope = to_scope(scope_spans.scope.as_ref());
            spans.extend(scope_spans.spans.iter().map(|s| to_span(s, &resource, &scope)));
        }
    }
    spans
}
