//! Storage contracts.
//!
//! Receivers write through [`TelemetryWriter`] and the query services read
//! through the reader traits. Nothing backend specific crosses these traits,
//! and every backend must answer each reader method with the same results
//! for the same writes.
//!
//! Every method takes a cancellation token and checks it before doing any
//! work; a cancelled call fails with [`LanternError::Cancelled`].

use crate::core::{LanternError, Result, Span, SpanId, TraceId};
use crate::metrics::{MetricMetadata, TimeSeries};
use crate::query::jaeger::JaegerTrace;
use crate::storage::params::{
    JaegerTraceQueryParameters, LabelNamesQueryParameters, LabelValuesQueryParameters,
    MetricMetadataQueryParameters, Operation, OperationQueryParameters,
    TimeSeriesQueryParameters,
};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Fails fast when the caller has given up.
pub fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(LanternError::Cancelled)
    } else {
        Ok(())
    }
}

/// Appends a batch of telemetry.
///
/// Writes are not idempotent: writing the same span twice stores it twice.
/// Metric metadata writers are the exception and upsert on
/// (metric name, service name), keeping the first record seen.
#[async_trait]
pub trait TelemetryWriter<T>: Send + Sync
where
    T: Send + Sync + 'static,
{
    async fn write(&self, batch: &[T], cancel: &CancellationToken) -> Result<()>;
}

/// Span-level reads.
#[async_trait]
pub trait SpanReader: Send + Sync {
    /// Ids of matching traces, most recent first, at most `query.num_traces`.
    async fn find_trace_ids(
        &self,
        query: &JaegerTraceQueryParameters,
        cancel: &CancellationToken,
    ) -> Result<Vec<TraceId>>;

    /// All spans of a trace ordered by start time; `TraceNotFound` when no
    /// span of the trace was ever written.
    async fn get_trace(&self, trace_id: &TraceId, cancel: &CancellationToken) -> Result<Vec<Span>>;

    async fn get_span(
        &self,
        trace_id: &TraceId,
        span_id: &SpanId,
        cancel: &CancellationToken,
    ) -> Result<Option<Span>>;
}

/// Service and operation catalog, maintained at span write time.
#[async_trait]
pub trait JaegerSpanMetadataReader: Send + Sync {
    /// Service names, sorted.
    async fn get_services(&self, cancel: &CancellationToken) -> Result<Vec<String>>;

    /// Operations of one service, sorted by name then kind.
    async fn get_operations(
        &self,
        query: &OperationQueryParameters,
        cancel: &CancellationToken,
    ) -> Result<Vec<Operation>>;
}

/// Fully materialized Jaeger traces.
///
/// The provided methods are written against [`SpanReader`], so a backend
/// only overrides them when it can do better than per-trace lookups.
#[async_trait]
pub trait JaegerSpanReader: SpanReader + JaegerSpanMetadataReader {
    async fn find_traces(
        &self,
        query: &JaegerTraceQueryParameters,
        cancel: &CancellationToken,
    ) -> Result<Vec<JaegerTrace>> {
        check_cancelled(cancel)?;
        let ids = self.find_trace_ids(query, cancel).await?;
        self.find_traces_by_id(&ids, None, None, cancel).await
    }

    /// Traces for the given ids in request order. Unknown ids are skipped;
    /// with bounds, a trace is kept only if one of its spans starts inside
    /// them.
    async fn find_traces_by_id(
        &self,
        trace_ids: &[TraceId],
        start_time_min: Option<u64>,
        start_time_max: Option<u64>,
        cancel: &CancellationToken,
    ) -> Result<Vec<JaegerTrace>> {
        check_cancelled(cancel)?;
        let min = start_time_min.unwrap_or(0);
        let max = start_time_max.unwrap_or(u64::MAX);

        let mut traces = Vec::with_capacity(trace_ids.len());
        for trace_id in trace_ids {
            let spans = match self.get_trace(trace_id, cancel).await {
                Ok(spans) => spans,
                Err(LanternError::TraceNotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            let in_bounds = spans
                .iter()
                .any(|s| s.start_time_unix_nano >= min && s.start_time_unix_nano <= max);
            if in_bounds {
                traces.push(JaegerTrace::from_spans(trace_id, &spans));
            }
        }
        Ok(traces)
    }
}

/// Series reads for PromQL evaluation and the label APIs.
#[async_trait]
pub trait PrometheusMetricReader: Send + Sync {
    /// Matching series with their samples inside the query range, sorted by
    /// labels. Series without samples in range are omitted.
    async fn get_time_series(
        &self,
        query: &TimeSeriesQueryParameters,
        cancel: &CancellationToken,
    ) -> Result<Vec<TimeSeries>>;

    async fn get_label_names(
        &self,
        query: &LabelNamesQueryParameters,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>>;

    async fn get_label_values(
        &self,
        query: &LabelValuesQueryParameters,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>>;
}

/// Metric catalog reads.
#[async_trait]
pub trait PrometheusMetricMetadataReader: Send + Sync {
    /// Metadata records sorted by metric name then service name. The limit
    /// counts distinct metric names.
    async fn get_metric_metadata(
        &self,
        query: &MetricMetadataQueryParameters,
        cancel: &CancellationToken,
    ) -> Result<Vec<MetricMetadata>>;
}

/// Applies the metadata listing rules to an unordered set of records.
pub fn finish_metadata(
    mut records: Vec<MetricMetadata>,
    query: &MetricMetadataQueryParameters,
) -> Vec<MetricMetadata> {
    if let Some(name) = &query.metric_name {
        records.retain(|m| &m.metric_name == name);
    }
    records.sort_by(|a, b| a.key().cmp(&b.key()));

    if let Some(limit) = query.limit {
        let mut names = 0;
        let mut last: Option<String> = None;
        records.retain(|m| {
            if last.as_deref() != Some(m.metric_name.as_str()) {
                names += 1;
                last = Some(m.metric_name.clone());
            }
            names <= limit
        });
    }
    records
}
