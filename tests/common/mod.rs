//! Common test utilities and fixtures.

#![allow(dead_code)]

use lantern_lib::core::{Resource, Span, SpanId, SpanKind, StatusCode, TraceId};
use lantern_lib::metrics::{Labels, MetricMetadata, MetricType, Sample, TimeSeries};

pub const MS: u64 = 1_000_000;

/// Test fixture builder for spans with sensible defaults.
pub struct TestSpanBuilder {
    trace: String,
    span: String,
    parent: Option<String>,
    service: String,
    name: String,
    kind: SpanKind,
    start_ms: u64,
    duration_ms: u64,
    error: bool,
    attributes: Vec<(String, String)>,
}

impl TestSpanBuilder {
    pub fn new(trace: &str, span: &str) -> Self {
        Self {
            trace: trace.to_string(),
            span: span.to_string(),
            parent: None,
            service: "frontend".to_string(),
            name: "GET /".to_string(),
            kind: SpanKind::Server,
            start_ms: 1_000,
            duration_ms: 10,
            error: false,
            attributes: Vec::new(),
        }
    }

    pub fn parent(mut self, parent: &str) -> Self {
        self.parent = Some(parent.to_string());
        self
    }

    pub fn service(mut self, service: &str) -> Self {
        self.service = service.to_string();
        self
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn kind(mut self, kind: SpanKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn start_ms(mut self, ms: u64) -> Self {
        self.start_ms = ms;
        self
    }

    pub fn duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = ms;
        self
    }

    pub fn with_error(mut self) -> Self {
        self.error = true;
        self
    }

    pub fn attribute(mut self, key: &str, value: &str) -> Self {
        self.attributes.push((key.to_string(), value.to_string()));
        self
    }

    pub fn build(self) -> Span {
        let start = self.start_ms * MS;
        let mut builder = Span::builder()
            .trace_id(TraceId::new(self.trace))
            .span_id(SpanId::new(self.span))
            .name(self.name)
            .kind(self.kind)
            .start_time_unix_nano(start)
            .end_time_unix_nano(start + self.duration_ms * MS)
            .resource(Resource {
                service_name: self.service,
                ..Default::default()
            });
        if let Some(parent) = self.parent {
            builder = builder.parent_span_id(SpanId::new(parent));
        }
        if self.error {
            builder = builder.status(StatusCode::Error, Some("boom".to_string()));
        }
        for (key, value) in self.attributes {
            builder = builder.attribute(key, value);
        }
        builder.build()
    }
}

/// Two traces: `t1` (frontend -> backend, starts at 1s) and `t2`
/// (frontend only, starts at 5s, slow).
pub fn sample_spans() -> Vec<Span> {
    vec![
        TestSpanBuilder::new("t1", "a").start_ms(1_000).duration_ms(50).build(),
        TestSpanBuilder::new("t1", "b")
            .parent("a")
            .service("backend")
            .name("SELECT users")
            .kind(SpanKind::Client)
            .start_ms(1_010)
            .duration_ms(20)
            .attribute("db.system", "postgresql")
            .build(),
        TestSpanBuilder::new("t2", "c")
            .name("POST /checkout")
            .start_ms(5_000)
            .duration_ms(900)
            .with_error()
            .build(),
    ]
}

pub fn labels(pairs: &[(&str, &str)]) -> Labels {
    Labels::from_pairs(pairs.iter().copied())
}

pub fn series(pairs: &[(&str, &str)], points: &[(i64, f64)]) -> TimeSeries {
    TimeSeries::new(
        labels(pairs),
        points.iter().map(|&(t, v)| Sample::new(t, v)).collect(),
    )
}

pub fn metadata(name: &str, service: &str, metric_type: MetricType, help: &str) -> MetricMetadata {
    MetricMetadata {
        metric_name: name.to_string(),
        service_name: service.to_string(),
        metric_type,
        help: help.to_string(),
        unit: String::new(),
    }
}

/// `http_requests_total` for two methods plus a gauge, sampled every 15s.
pub fn sample_series() -> Vec<TimeSeries> {
    vec![
        series(
            &[("__name__", "http_requests_total"), ("job", "api"), ("method", "GET")],
            &[(0, 0.0), (15, 10.0), (30, 20.0), (45, 30.0), (60, 40.0)],
        ),
        series(
            &[("__name__", "http_requests_total"), ("job", "api"), ("method", "POST")],
            &[(0, 0.0), (15, 2.0), (30, 4.0), (45, 6.0), (60, 8.0)],
        ),
        series(
            &[("__name__", "queue_depth"), ("job", "worker")],
            &[(100, 3.0), (115, 5.0)],
        ),
    ]
}
