//! OTLP metric conversion.
//!
//! Every data point becomes a sample on a Prometheus-style series labeled
//! with the sanitized metric name, `job` (service name), `instance` (service
//! instance id) and the sanitized data point attributes. Histograms and
//! summaries expand into the usual `_bucket`, `_sum` and `_count` series.

use crate::core::Resource;
use crate::metrics::{
    sanitize_label_name, Labels, LabelsBuilder, MetricMetadata, MetricType, Sample, TimeSeries,
    METRIC_NAME,
};
use crate::receiver::convert::{convert_attributes, to_resource};
use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
use opentelemetry_proto::tonic::common::v1::KeyValue;
use opentelemetry_proto::tonic::metrics::v1::{
    metric::Data, number_data_point::Value as NumberValue, AggregationTemporality, Metric,
    NumberDataPoint,
};
use std::collections::BTreeMap;

const JOB_LABEL: &str = "job";
const INSTANCE_LABEL: &str = "instance";
const BUCKET_LABEL: &str = "le";
const QUANTILE_LABEL: &str = "quantile";

/// Series and catalog records produced from one export request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConvertedMetrics {
    pub series: Vec<TimeSeries>,
    pub metadata: Vec<MetricMetadata>,
}

impl ConvertedMetrics {
    pub fn sample_count(&self) -> usize {
        self.series.iter().map(|s| s.samples.len()).sum()
    }
}

fn nanos_to_secs(nanos: u64) -> i64 {
    (nanos / 1_000_000_000) as i64
}

/// `le` and `quantile` values in Prometheus notation.
fn bound_label(value: f64) -> String {
    if value == f64::INFINITY {
        "+Inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        value.to_string()
    }
}

fn number_value(point: &NumberDataPoint) -> Option<f64> {
    match point.value.as_ref()? {
        NumberValue::AsDouble(v) => Some(*v),
        NumberValue::AsInt(v) => Some(*v as f64),
    }
}

/// Accumulates samples per label set while a request is converted.
#[derive(Default)]
struct SeriesSink {
    series: BTreeMap<Labels, Vec<Sample>>,
}

impl SeriesSink {
    fn push(&mut self, labels: Labels, timestamp: i64, value: f64) {
        self.series.entry(labels).or_default().push(Sample::new(timestamp, value));
    }

    fn finish(self) -> Vec<TimeSeries> {
        self.series
            .into_iter()
            .map(|(labels, samples)| {
                let mut series = TimeSeries::new(labels, samples);
                series.normalize();
                series
            })
            .collect()
    }
}

/// Labels shared by every series of one metric from one resource.
struct MetricScope<'a> {
    name: String,
    resource: &'a Resource,
}

impl MetricScope<'_> {
    fn labels(&self, suffix: &str, attributes: &[KeyValue]) -> LabelsBuilder {
        let (attributes, _) = convert_attributes(attributes);
        let mut builder = Labels::builder().add_range(
            attributes
                .into_iter()
                .map(|a| (sanitize_label_name(&a.key), a.value.to_text())),
        );
        if !self.resource.service_name.is_empty() {
            builder = builder.add(JOB_LABEL, self.resource.service_name.as_str());
        }
        if !self.resource.service_instance_id.is_empty() {
            builder = builder.add(INSTANCE_LABEL, self.resource.service_instance_id.as_str());
        }
        builder.add(METRIC_NAME, format!("{}{}", self.name, suffix))
    }
}

fn metric_type(metric: &Metric) -> MetricType {
    match &metric.data {
        Some(Data::Gauge(_)) => MetricType::Gauge,
        Some(Data::Sum(sum)) if sum.is_monotonic => MetricType::Counter,
        Some(Data::Sum(_)) => MetricType::Gauge,
        Some(Data::Histogram(_)) | Some(Data::ExponentialHistogram(_)) => MetricType::Histogram,
        Some(Data::Summary(_)) => MetricType::Summary,
        None => MetricType::Unknown,
    }
}

fn convert_metric(metric: &Metric, scope: &MetricScope<'_>, sink: &mut SeriesSink) {
    let Some(data) = &metric.data else {
        tracing::debug!("Metric {} carries no data", metric.name);
        return;
    };

    match data {
        Data::Gauge(gauge) => {
            for point in &gauge.data_points {
                if let Some(value) = number_value(point) {
                    let labels = scope.labels("", &point.attributes).build();
                    sink.push(labels, nanos_to_secs(point.time_unix_nano), value);
                }
            }
        },
        Data::Sum(sum) => {
            if sum.aggregation_temporality == AggregationTemporality::Delta as i32 {
                tracing::debug!("Storing delta sum {} as reported", metric.name);
            }
            for point in &sum.data_points {
                if let Some(value) = number_value(point) {
                    let labels = scope.labels("", &point.attributes).build();
                    sink.push(labels, nanos_to_secs(point.time_unix_nano), value);
                }
            }
        },
        Data::Histogram(histogram) => {
            for point in &histogram.data_points {
                let ts = nanos_to_secs(point.time_unix_nano);
                let mut cumulative = 0u64;
                for (bound, count) in point.explicit_bounds.iter().zip(&point.bucket_counts) {
                    cumulative = cumulative.saturating_add(*count);
                    let labels = scope
                        .labels("_bucket", &point.attributes)
                        .add(BUCKET_LABEL, bound_label(*bound))
                        .build();
                    sink.push(labels, ts, cumulative as f64);
                }
                let labels = scope
                    .labels("_bucket", &point.attributes)
                    .add(BUCKET_LABEL, bound_label(f64::INFINITY))
                    .build();
                sink.push(labels, ts, point.count as f64);

                if let Some(sum) = point.sum {
                    sink.push(scope.labels("_sum", &point.attributes).build(), ts, sum);
                }
                sink.push(scope.labels("_count", &point.attributes).build(), ts, point.count as f64);
            }
        },
        Data::ExponentialHistogram(histogram) => {
            for point in &histogram.data_points {
                let ts = nanos_to_secs(point.time_unix_nano);
                if let Some(sum) = point.sum {
                    sink.push(scope.labels("_sum", &point.attributes).build(), ts, sum);
                }
                sink.push(scope.labels("_count", &point.attributes).build(), ts, point.count as f64);
            }
        },
        Data::Summary(summary) => {
            for point in &summary.data_points {
                let ts = nanos_to_secs(point.time_unix_nano);
                for quantile in &point.quantile_values {
                    let labels = scope
                        .labels("", &point.attributes)
                        .add(QUANTILE_LABEL, bound_label(quantile.quantile))
                        .build();
                    sink.push(labels, ts, quantile.value);
                }
                sink.push(scope.labels("_sum", &point.attributes).build(), ts, point.sum);
                sink.push(scope.labels("_count", &point.attributes).build(), ts, point.count as f64);
            }
        },
    }
}

/// Flattens an export request into series and metadata records.
pub fn metrics_from_request(request: &ExportMetricsServiceRequest) -> ConvertedMetrics {
    let mut sink = SeriesSink::default();
    let mut metadata = Vec::new();

    for resource_metrics in &request.resource_metrics {
        let resource = to_resource(resource_metrics.resource.as_ref());
        for scope_metrics in &resource_metrics.scope_metrics {
            for metric in &scope_metrics.metrics {
                let scope = MetricScope {
                    name: sanitize_label_name(&metric.name),
                    resource: &resource,
                };
                metadata.push(MetricMetadata {
                    metric_name: scope.name.clone(),
                    service_name: resource.service_name.clone(),
                    metric_type: metric_type(metric),
                    help: metric.description.clone(),
                    unit: metric.unit.clone(),
                });
                convert_metric(metric, &scope, &mut sink);
            }
        }
    }

    ConvertedMetrics {
        series: sink.finish(),
        metadata,
    }
}
