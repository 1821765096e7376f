//! In-memory storage backend.
//!
//! Spans are indexed by trace id, series by their label set with a
//! secondary index on metric name, and the Jaeger catalog is kept as a
//! service → operations map updated on every span write.

use crate::core::{LanternError, Result, Span, SpanId, TraceId};
use crate::metrics::{
    LabelMatcher, Labels, MatchType, MetricMetadata, Sample, TimeSeries, METRIC_NAME,
};
use crate::storage::contracts::{
    check_cancelled, finish_metadata, JaegerSpanMetadataReader, JaegerSpanReader,
    PrometheusMetricMetadataReader, PrometheusMetricReader, SpanReader, TelemetryWriter,
};
use crate::storage::params::{
    finish_listing, finish_series, matching_recency, rank_trace_ids, series_visible, sort_trace,
    JaegerTraceQueryParameters, LabelNamesQueryParameters, LabelValuesQueryParameters,
    MetricMetadataQueryParameters, Operation, OperationQueryParameters,
    TimeSeriesQueryParameters,
};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;

/// Indexed in-memory store.
#[derive(Default)]
pub struct MemoryStorage {
    /// Trace id to its spans, in write order
    traces: DashMap<TraceId, Vec<Span>>,
    /// Service name to its operations
    operations: DashMap<String, BTreeSet<Operation>>,
    /// Label set to samples, kept sorted and deduplicated
    series: DashMap<Labels, Vec<Sample>>,
    /// Metric name to the label sets carrying it
    series_by_name: DashMap<String, HashSet<Labels>>,
    /// (metric, service) to its first metadata record
    metadata: DashMap<(String, String), MetricMetadata>,
    spans_written: AtomicU64,
    samples_written: AtomicU64,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn span_count(&self) -> u64 {
        self.spans_written.load(Ordering::Relaxed)
    }

    pub fn sample_count(&self) -> u64 {
        self.samples_written.load(Ordering::Relaxed)
    }

    pub fn series_count(&self) -> usize {
        self.series.len()
    }

    /// Label sets that could match, narrowed through the name index when a
    /// matcher pins `__name__` to a non-empty value. Unnamed series are not
    /// indexed, so `__name__=""` falls back to a full scan.
    fn candidates(&self, matchers: &[LabelMatcher]) -> Vec<Labels> {
        let pinned = matchers.iter().find(|m| {
            m.name() == METRIC_NAME && m.match_type() == MatchType::Equal && !m.matches_empty()
        });

        match pinned {
            Some(m) => self
                .series_by_name
                .get(m.value())
                .map(|set| set.iter().cloned().collect())
                .unwrap_or_default(),
            None => self.series.iter().map(|e| e.key().clone()).collect(),
        }
    }

    /// Runs `visit` on every series visible to a label listing.
    fn for_each_visible<F>(
        &self,
        matchers: &[LabelMatcher],
        start_sec: Option<i64>,
        end_sec: Option<i64>,
        mut visit: F,
    ) where
        F: FnMut(&Labels),
    {
        for labels in self.candidates(matchers) {
            if let Some(samples) = self.series.get(&labels) {
                if series_visible(matchers, start_sec, end_sec, &labels, samples.value()) {
                    visit(&labels);
                }
            }
        }
    }
}

#[async_trait]
impl TelemetryWriter<Span> for MemoryStorage {
    async fn write(&self, batch: &[Span], cancel: &CancellationToken) -> Result<()> {
        check_cancelled(cancel)?;
        for span in batch {
            self.operations
                .entry(span.service_name().to_string())
                .or_default()
                .insert(Operation {
                    name: span.name.clone(),
                    span_kind: span.kind,
                });
            self.traces.entry(span.trace_id.clone()).or_default().push(span.clone());
        }
        self.spans_written.fetch_add(batch.len() as u64, Ordering::Relaxed);
        tracing::debug!("Stored {} spans in memory", batch.len());
        Ok(())
    }
}

#[async_trait]
impl TelemetryWriter<TimeSeries> for MemoryStorage {
    async fn write(&self, batch: &[TimeSeries], cancel: &CancellationToken) -> Result<()> {
        check_cancelled(cancel)?;
        let mut samples = 0u64;
        for series in batch {
            if let Some(name) = series.labels.metric_name() {
                self.series_by_name
                    .entry(name.to_string())
                    .or_default()
                    .insert(series.labels.clone());
            }

            let mut entry = self.series.entry(series.labels.clone()).or_default();
            let mut merged = TimeSeries::new(Labels::empty(), std::mem::take(entry.value_mut()));
            merged.samples.extend_from_slice(&series.samples);
            merged.normalize();
            *entry.value_mut() = merged.samples;
            samples += series.samples.len() as u64;
        }
        self.samples_written.fetch_add(samples, Ordering::Relaxed);
        Ok(())
    }
}

#[async_trait]
impl TelemetryWriter<MetricMetadata> for MemoryStorage {
    async fn write(&self, batch: &[MetricMetadata], cancel: &CancellationToken) -> Result<()> {
        check_cancelled(cancel)?;
        for record in batch {
            self.metadata.entry(record.key()).or_insert_with(|| record.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl SpanReader for MemoryStorage {
    async fn find_trace_ids(
        &self,
        query: &JaegerTraceQueryParameters,
        cancel: &CancellationToken,
    ) -> Result<Vec<TraceId>> {
        check_cancelled(cancel)?;
        let matched = self
            .traces
            .iter()
            .filter_map(|e| matching_recency(e.value(), query).map(|t| (t, e.key().clone())))
            .collect();
        Ok(rank_trace_ids(matched, query.num_traces))
    }

    async fn get_trace(&self, trace_id: &TraceId, cancel: &CancellationToken) -> Result<Vec<Span>> {
        check_cancelled(cancel)?;
        let mut spans = self
            .traces
            .get(trace_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| LanternError::TraceNotFound(trace_id.to_string()))?;
        sort_trace(&mut spans);
        Ok(spans)
    }

    async fn get_span(
        &self,
        trace_id: &TraceId,
        span_id: &SpanId,
        cancel: &CancellationToken,
    ) -> Result<Option<Span>> {
        check_cancelled(cancel)?;
        Ok(self
            .traces
            .get(trace_id)
            .and_then(|e| e.value().iter().find(|s| &s.span_id == span_id).cloned()))
    }
}

#[async_trait]
impl JaegerSpanMetadataReader for MemoryStorage {
    async fn get_services(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        check_cancelled(cancel)?;
        let services: BTreeSet<String> = self.operations.iter().map(|e| e.key().clone()).collect();
        Ok(services.into_iter().collect())
    }

    async fn get_operations(
        &self,
        query: &OperationQueryParameters,
        cancel: &CancellationToken,
    ) -> Result<Vec<Operation>> {
        check_cancelled(cancel)?;
        Ok(self
            .operations
            .get(&query.service_name)
            .map(|ops| {
                ops.iter()
                    .filter(|op| query.span_kind.map_or(true, |k| op.span_kind == k))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

impl JaegerSpanReader for MemoryStorage {}

#[async_trait]
impl PrometheusMetricReader for MemoryStorage {
    async fn get_time_series(
        &self,
        query: &TimeSeriesQueryParameters,
        cancel: &CancellationToken,
    ) -> Result<Vec<TimeSeries>> {
        check_cancelled(cancel)?;
        let selected = self
            .candidates(&query.matchers)
            .into_iter()
            .filter_map(|labels| {
                let samples = self.series.get(&labels)?;
                query.select(&labels, samples.value())
            })
            .collect();
        Ok(finish_series(selected, query.limit))
    }

    async fn get_label_names(
        &self,
        query: &LabelNamesQueryParameters,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        check_cancelled(cancel)?;
        let mut names = BTreeSet::new();
        self.for_each_visible(&query.matchers, query.start_sec, query.end_sec, |labels| {
            names.extend(labels.names().map(str::to_string));
        });
        Ok(finish_listing(names, query.limit))
    }

    async fn get_label_values(
        &self,
        query: &LabelValuesQueryParameters,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        check_cancelled(cancel)?;
        let mut values = BTreeSet::new();
        self.for_each_visible(&query.matchers, query.start_sec, query.end_sec, |labels| {
            if let Some(value) = labels.get(&query.label_name) {
                values.insert(value.to_string());
            }
        });
        Ok(finish_listing(values, query.limit))
    }
}

#[async_trait]
impl PrometheusMetricMetadataReader for MemoryStorage {
    async fn get_metric_metadata(
        &self,
        query: &MetricMetadataQueryParameters,
        cancel: &CancellationToken,
    ) -> Result<Vec<MetricMetadata>> {
        check_cancelled(cancel)?;
        let records = self.metadata.iter().map(|e| e.value().clone()).collect();
        Ok(finish_metadata(records, query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Resource;

    fn span(trace: &str, id: &str, start: u64) -> Span {
        Span::builder()
            .trace_id(TraceId::new(trace))
            .span_id(SpanId::new(id))
            .name("GET /")
            .start_time_unix_nano(start)
            .end_time_unix_nano(start + 10)
            .resource(Resource {
                service_name: "frontend".to_string(),
                ..Default::default()
            })
            .build()
    }

    #[tokio::test]
    async fn test_span_counters() {
        let storage = MemoryStorage::new();
        let cancel = CancellationToken::new();
        storage
            .write(&[span("t1", "a", 1), span("t1", "b", 2)], &cancel)
            .await
            .unwrap();
        assert_eq!(storage.span_count(), 2);
        assert_eq!(storage.get_trace(&TraceId::new("t1"), &cancel).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_name_index_narrows_candidates() {
        let storage = MemoryStorage::new();
        let cancel = CancellationToken::new();
        let up = Labels::from_pairs([("__name__", "up"), ("job", "a")]);
        let down = Labels::from_pairs([("__name__", "down"), ("job", "a")]);
        storage
            .write(
                &[
                    TimeSeries::new(up.clone(), vec![Sample::new(1, 1.0)]),
                    TimeSeries::new(down, vec![Sample::new(1, 0.0)]),
                ],
                &cancel,
            )
            .await
            .unwrap();

        assert_eq!(storage.candidates(&[LabelMatcher::metric_name("up")]), vec![up]);
        assert_eq!(storage.candidates(&[]).len(), 2);
        assert_eq!(storage.series_count(), 2);
    }

    #[tokio::test]
    async fn test_empty_name_matcher_scans_unnamed_series() {
        let storage = MemoryStorage::new();
        let cancel = CancellationToken::new();
        let unnamed = Labels::from_pairs([("job", "api")]);
        storage
            .write(&[TimeSeries::new(unnamed.clone(), vec![Sample::new(10, 1.0)])], &cancel)
            .await
            .unwrap();

        let matchers = [LabelMatcher::metric_name(""), LabelMatcher::equal("job", "api")];
        assert_eq!(storage.candidates(&matchers), vec![unnamed]);
    }

    #[tokio::test]
    async fn test_cancelled_write_is_rejected() {
        let storage = MemoryStorage::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = storage.write(&[span("t1", "a", 1)], &cancel).await.unwrap_err();
        assert!(matches!(err, LanternError::Cancelled));
        assert_eq!(storage.span_count(), 0);
    }
}
