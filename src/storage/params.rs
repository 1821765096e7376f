//! Query parameter types shared by every storage contract.
//!
//! The selection rules live here as well, so every backend filters, orders
//! and limits results the same way and only differs in how it finds the
//! candidates.

use crate::core::types::find_attribute;
use crate::core::{Span, SpanKind, TraceId};
use crate::metrics::{matches_all, LabelMatcher, Labels, Sample, TimeSeries};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Selects series for `PrometheusMetricReader::get_time_series`.
#[derive(Debug, Clone, Default)]
pub struct TimeSeriesQueryParameters {
    pub matchers: Vec<LabelMatcher>,
    /// Inclusive lower bound, unix seconds
    pub start_sec: i64,
    /// Inclusive upper bound, unix seconds
    pub end_sec: i64,
    /// Maximum number of series; `None` means unbounded
    pub limit: Option<usize>,
    /// Step of the range query the series are fetched for, if any
    pub interval: Option<Duration>,
}

impl TimeSeriesQueryParameters {
    pub fn new(matchers: Vec<LabelMatcher>, start_sec: i64, end_sec: i64) -> Self {
        Self {
            matchers,
            start_sec,
            end_sec,
            limit: None,
            interval: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns the series restricted to the query range, or `None` when the
    /// labels do not match or no sample falls in range.
    pub fn select(&self, labels: &Labels, samples: &[Sample]) -> Option<TimeSeries> {
        if !matches_all(&self.matchers, labels) {
            return None;
        }
        let mut series = TimeSeries::new(labels.clone(), samples.to_vec());
        series.normalize();
        let in_range = series.samples_between(self.start_sec, self.end_sec).to_vec();
        if in_range.is_empty() {
            return None;
        }
        series.samples = in_range;
        Some(series)
    }
}

/// Sorts selected series by labels and applies the limit.
pub fn finish_series(mut series: Vec<TimeSeries>, limit: Option<usize>) -> Vec<TimeSeries> {
    series.sort_by(|a, b| a.labels.cmp(&b.labels));
    if let Some(limit) = limit {
        series.truncate(limit);
    }
    series
}

/// Parameters for label name listings.
#[derive(Debug, Clone, Default)]
pub struct LabelNamesQueryParameters {
    /// Restricts to series matching every matcher; empty selects all
    pub matchers: Vec<LabelMatcher>,
    pub start_sec: Option<i64>,
    pub end_sec: Option<i64>,
    pub limit: Option<usize>,
}

/// Parameters for the values of one label.
#[derive(Debug, Clone, Default)]
pub struct LabelValuesQueryParameters {
    pub label_name: String,
    pub matchers: Vec<LabelMatcher>,
    pub start_sec: Option<i64>,
    pub end_sec: Option<i64>,
    pub limit: Option<usize>,
}

/// True if a series is visible to a label listing: it matches and, when
/// bounds are given, has a sample inside them.
pub fn series_visible(
    matchers: &[LabelMatcher],
    start_sec: Option<i64>,
    end_sec: Option<i64>,
    labels: &Labels,
    samples: &[Sample],
) -> bool {
    if !matches_all(matchers, labels) {
        return false;
    }
    if start_sec.is_none() && end_sec.is_none() {
        return true;
    }
    let start = start_sec.unwrap_or(i64::MIN);
    let end = end_sec.unwrap_or(i64::MAX);
    samples
        .iter()
        .any(|s| s.timestamp_unix_sec >= start && s.timestamp_unix_sec <= end)
}

/// Sorted, deduplicated and limited string listing.
pub fn finish_listing(values: BTreeSet<String>, limit: Option<usize>) -> Vec<String> {
    let values = values.into_iter();
    match limit {
        Some(limit) => values.take(limit).collect(),
        None => values.collect(),
    }
}

/// Parameters for metric metadata listings.
#[derive(Debug, Clone, Default)]
pub struct MetricMetadataQueryParameters {
    /// Only this metric, when set
    pub metric_name: Option<String>,
    /// Maximum number of metrics returned
    pub limit: Option<usize>,
}

/// An operation as listed by Jaeger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Operation {
    pub name: String,
    pub span_kind: SpanKind,
}

/// Parameters for operation listings.
#[derive(Debug, Clone, Default)]
pub struct OperationQueryParameters {
    pub service_name: String,
    /// Restricts to one span kind when set
    pub span_kind: Option<SpanKind>,
}

/// Trace search parameters.
///
/// A trace matches when at least one of its spans satisfies every criterion.
#[derive(Debug, Clone)]
pub struct JaegerTraceQueryParameters {
    pub service_name: Option<String>,
    pub operation_name: Option<String>,
    /// Every tag must equal a span or resource attribute rendered as text
    pub tags: BTreeMap<String, String>,
    /// Inclusive bounds on span start, unix nanoseconds
    pub start_time_min: Option<u64>,
    pub start_time_max: Option<u64>,
    pub duration_min: Option<Duration>,
    pub duration_max: Option<Duration>,
    pub num_traces: usize,
}

impl Default for JaegerTraceQueryParameters {
    fn default() -> Self {
        Self {
            service_name: None,
            operation_name: None,
            tags: BTreeMap::new(),
            start_time_min: None,
            start_time_max: None,
            duration_min: None,
            duration_max: None,
            num_traces: 20,
        }
    }
}

impl JaegerTraceQueryParameters {
    pub fn matches_span(&self, span: &Span) -> bool {
        if let Some(service) = &self.service_name {
            if span.service_name() != service {
                return false;
            }
        }
        if let Some(operation) = &self.operation_name {
            if &span.name != operation {
                return false;
            }
        }
        if let Some(min) = self.start_time_min {
            if span.start_time_unix_nano < min {
                return false;
            }
        }
        if let Some(max) = self.start_time_max {
            if span.start_time_unix_nano > max {
                return false;
            }
        }
        let duration = Duration::from_nanos(span.duration_nanos);
        if self.duration_min.map_or(false, |min| duration < min) {
            return false;
        }
        if self.duration_max.map_or(false, |max| duration > max) {
            return false;
        }

        self.tags.iter().all(|(key, expected)| {
            span.attribute(key)
                .or_else(|| find_attribute(&span.resource.attributes, key))
                .map_or(false, |value| value.to_text() == *expected)
        })
    }
}

/// Latest span start of a trace, or `None` when no span matches the query.
pub fn matching_recency(spans: &[Span], query: &JaegerTraceQueryParameters) -> Option<u64> {
    if !spans.iter().any(|s| query.matches_span(s)) {
        return None;
    }
    Some(spans.iter().map(|s| s.start_time_unix_nano).max().unwrap_or(0))
}

/// Orders matched traces most recent first and keeps `num_traces`.
///
/// Ties break on the trace id so the order is stable across backends.
pub fn rank_trace_ids(mut matched: Vec<(u64, TraceId)>, num_traces: usize) -> Vec<TraceId> {
    matched.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    matched.into_iter().take(num_traces).map(|(_, id)| id).collect()
}

/// Orders a trace's spans by start time, then span id.
pub fn sort_trace(spans: &mut [Span]) {
    spans.sort_by(|a, b| {
        a.start_time_unix_nano
            .cmp(&b.start_time_unix_nano)
            .then_with(|| a.span_id.cmp(&b.span_id))
    });
}
