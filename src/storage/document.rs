//! Embedded document store.
//!
//! Each write batch becomes one document: the batch encoded with `bincode`
//! and compressed with `lz4_flex`. Documents are grouped in three
//! collections (spans, series, metadata) and read back by scanning.
//!
//! With a data directory every collection is also appended to its own
//! segment file, one length-prefixed document per frame, and the segments
//! are replayed when the store is opened.

use crate::core::{LanternError, Result, Span, SpanId, TraceId};
use crate::metrics::{Labels, MetricMetadata, Sample, TimeSeries};
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
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use ahash::{AHashMap, AHashSet};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Upper bound on one frame, guarding replay against a corrupt length.
const MAX_FRAME_BYTES: usize = 256 * 1024 * 1024;

/// One stored batch.
#[derive(Debug, Clone)]
struct Document {
    payload: Vec<u8>,
}

impl Document {
    fn encode<T: Serialize>(batch: &[T]) -> Result<Self> {
        let raw = bincode::serialize(batch)?;
        Ok(Self {
            payload: lz4_flex::compress_prepend_size(&raw),
        })
    }

    fn decode<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        let raw = lz4_flex::decompress_size_prepended(&self.payload)
            .map_err(|e| LanternError::Encoding(format!("corrupt document: {}", e)))?;
        Ok(bincode::deserialize(&raw)?)
    }
}

/// Named document list with an optional append-only segment file.
struct Collection {
    name: &'static str,
    documents: RwLock<Vec<Document>>,
    segment: Mutex<Option<File>>,
}

impl Collection {
    fn in_memory(name: &'static str) -> Self {
        Self {
            name,
            documents: RwLock::new(Vec::new()),
            segment: Mutex::new(None),
        }
    }

    /// Opens `<dir>/<name>.seg`, replaying any frames already in it.
    fn open(name: &'static str, dir: &Path) -> Result<Self> {
        let path = dir.join(format!("{}.seg", name));
        let documents = if path.exists() {
            read_segment(&path)?
        } else {
            Vec::new()
        };
        tracing::info!("Replayed {} {} documents from {}", documents.len(), name, path.display());

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            name,
            documents: RwLock::new(documents),
            segment: Mutex::new(Some(file)),
        })
    }

    fn append(&self, document: Document) -> Result<()> {
        if let Some(file) = self.segment.lock().as_mut() {
            let len = u32::try_from(document.payload.len())
                .map_err(|_| LanternError::storage(format!("{} document too large", self.name)))?;
            file.write_all(&len.to_le_bytes())?;
            file.write_all(&document.payload)?;
            file.flush()?;
        }
        self.documents.write().push(document);
        Ok(())
    }

    fn scan<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        let documents = self.documents.read();
        let mut items = Vec::new();
        for document in documents.iter() {
            items.extend(document.decode::<T>()?);
        }
        Ok(items)
    }

    fn len(&self) -> usize {
        self.documents.read().len()
    }
}

/// Reads length-prefixed frames; a truncated tail frame ends the replay.
fn read_segment(path: &Path) -> Result<Vec<Document>> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut documents = Vec::new();

    loop {
        let mut len = [0u8; 4];
        match reader.read_exact(&mut len) {
            Ok(()) => {},
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_le_bytes(len) as usize;
        if len > MAX_FRAME_BYTES {
            return Err(LanternError::storage(format!(
                "segment {} has an oversized frame ({} bytes)",
                path.display(),
                len
            )));
        }

        let mut payload = vec![0u8; len];
        match reader.read_exact(&mut payload) {
            Ok(()) => documents.push(Document { payload }),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                tracing::warn!("Ignoring truncated frame at the end of {}", path.display());
                break;
            },
            Err(e) => return Err(e.into()),
        }
    }

    Ok(documents)
}

/// Document-oriented backend.
pub struct DocumentStorage {
    spans: Collection,
    series: Collection,
    metadata: Collection,
    /// Service catalog rebuilt on replay and kept current on write
    operations: RwLock<BTreeMap<String, BTreeSet<Operation>>>,
    /// Keys already holding a metadata record
    metadata_keys: Mutex<AHashSet<(String, String)>>,
    data_dir: Option<PathBuf>,
}

impl DocumentStorage {
    /// A store that lives only in memory.
    pub fn in_memory() -> Self {
        Self {
            spans: Collection::in_memory("spans"),
            series: Collection::in_memory("series"),
            metadata: Collection::in_memory("metadata"),
            operations: RwLock::new(BTreeMap::new()),
            metadata_keys: Mutex::new(AHashSet::new()),
            data_dir: None,
        }
    }

    /// Opens (or creates) a store backed by segment files in `dir`.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let storage = Self {
            spans: Collection::open("spans", dir)?,
            series: Collection::open("series", dir)?,
            metadata: Collection::open("metadata", dir)?,
            operations: RwLock::new(BTreeMap::new()),
            metadata_keys: Mutex::new(AHashSet::new()),
            data_dir: Some(dir.to_path_buf()),
        };

        for span in storage.spans.scan::<Span>()? {
            storage.catalog(&span);
        }
        storage
            .metadata_keys
            .lock()
            .extend(storage.metadata.scan::<MetricMetadata>()?.iter().map(MetricMetadata::key));

        Ok(storage)
    }

    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    /// Number of documents across all collections.
    pub fn document_count(&self) -> usize {
        self.spans.len() + self.series.len() + self.metadata.len()
    }

    fn catalog(&self, span: &Span) {
        self.operations
            .write()
            .entry(span.service_name().to_string())
            .or_default()
            .insert(Operation {
                name: span.name.clone(),
                span_kind: span.kind,
            });
    }

    /// All spans grouped by trace id.
    fn traces(&self) -> Result<AHashMap<TraceId, Vec<Span>>> {
        let mut traces: AHashMap<TraceId, Vec<Span>> = AHashMap::new();
        for span in self.spans.scan::<Span>()? {
            traces.entry(span.trace_id.clone()).or_default().push(span);
        }
        Ok(traces)
    }

    /// All series merged across documents; later writes win on duplicate
    /// timestamps.
    fn merged_series(&self) -> Result<AHashMap<Labels, Vec<Sample>>> {
        let mut merged: AHashMap<Labels, Vec<Sample>> = AHashMap::new();
        for series in self.series.scan::<TimeSeries>()? {
            merged.entry(series.labels).or_default().extend(series.samples);
        }
        for samples in merged.values_mut() {
            let mut series = TimeSeries::new(Labels::empty(), std::mem::take(samples));
            series.normalize();
            *samples = series.samples;
        }
        Ok(merged)
    }
}

#[async_trait]
impl TelemetryWriter<Span> for DocumentStorage {
    async fn write(&self, batch: &[Span], cancel: &CancellationToken) -> Result<()> {
        check_cancelled(cancel)?;
        if batch.is_empty() {
            return Ok(());
        }
        self.spans.append(Document::encode(batch)?)?;
        for span in batch {
            self.catalog(span);
        }
        tracing::debug!("Stored a {}-span document", batch.len());
        Ok(())
    }
}

#[async_trait]
impl TelemetryWriter<TimeSeries> for DocumentStorage {
    async fn write(&self, batch: &[TimeSeries], cancel: &CancellationToken) -> Result<()> {
        check_cancelled(cancel)?;
        if batch.is_empty() {
            return Ok(());
        }
        self.series.append(Document::encode(batch)?)
    }
}

#[async_trait]
impl TelemetryWriter<MetricMetadata> for DocumentStorage {
    async fn write(&self, batch: &[MetricMetadata], cancel: &CancellationToken) -> Result<()> {
        check_cancelled(cancel)?;
        let mut keys = self.metadata_keys.lock();
        let mut seen = AHashSet::new();
        let fresh: Vec<MetricMetadata> = batch
            .iter()
            .filter(|m| !keys.contains(&m.key()) && seen.insert(m.key()))
            .cloned()
            .collect();
        if fresh.is_empty() {
            return Ok(());
        }

        // Keys are claimed only once the document is durable, so a failed
        // append can be retried.
        self.metadata.append(Document::encode(&fresh)?)?;
        keys.extend(seen);
        Ok(())
    }
}

#[async_trait]
impl SpanReader for DocumentStorage {
    async fn find_trace_ids(
        &self,
        query: &JaegerTraceQueryParameters,
        cancel: &CancellationToken,
    ) -> Result<Vec<TraceId>> {
        check_cancelled(cancel)?;
        let matched = self
            .traces()?
            .into_iter()
            .filter_map(|(id, spans)| matching_recency(&spans, query).map(|t| (t, id)))
            .collect();
        Ok(rank_trace_ids(matched, query.num_traces))
    }

    async fn get_trace(&self, trace_id: &TraceId, cancel: &CancellationToken) -> Result<Vec<Span>> {
        check_cancelled(cancel)?;
        let mut spans: Vec<Span> = self
            .spans
            .scan::<Span>()?
            .into_iter()
            .filter(|s| &s.trace_id == trace_id)
            .collect();
        if spans.is_empty() {
            return Err(LanternError::TraceNotFound(trace_id.to_string()));
        }
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
            .spans
            .scan::<Span>()?
            .into_iter()
            .find(|s| &s.trace_id == trace_id && &s.span_id == span_id))
    }
}

#[async_trait]
impl JaegerSpanMetadataReader for DocumentStorage {
    async fn get_services(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        check_cancelled(cancel)?;
        Ok(self.operations.read().keys().cloned().collect())
    }

    async fn get_operations(
        &self,
        query: &OperationQueryParameters,
        cancel: &CancellationToken,
    ) -> Result<Vec<Operation>> {
        check_cancelled(cancel)?;
        Ok(self
            .operations
            .read()
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

impl JaegerSpanReader for DocumentStorage {}

#[async_trait]
impl PrometheusMetricReader for DocumentStorage {
    async fn get_time_series(
        &self,
        query: &TimeSeriesQueryParameters,
        cancel: &CancellationToken,
    ) -> Result<Vec<TimeSeries>> {
        check_cancelled(cancel)?;
        let selected = self
            .merged_series()?
            .iter()
            .filter_map(|(labels, samples)| query.select(labels, samples))
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
        for (labels, samples) in &self.merged_series()? {
            if series_visible(&query.matchers, query.start_sec, query.end_sec, labels, samples) {
                names.extend(labels.names().map(str::to_string));
            }
        }
        Ok(finish_listing(names, query.limit))
    }

    async fn get_label_values(
        &self,
        query: &LabelValuesQueryParameters,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        check_cancelled(cancel)?;
        let mut values = BTreeSet::new();
        for (labels, samples) in &self.merged_series()? {
            if series_visible(&query.matchers, query.start_sec, query.end_sec, labels, samples) {
                if let Some(value) = labels.get(&query.label_name) {
                    values.insert(value.to_string());
                }
            }
        }
        Ok(finish_listing(values, query.limit))
    }
}

#[async_trait]
impl PrometheusMetricMetadataReader for DocumentStorage {
    async fn get_metric_metadata(
        &self,
        query: &MetricMetadataQueryParameters,
        cancel: &CancellationToken,
    ) -> Result<Vec<MetricMetadata>> {
        check_cancelled(cancel)?;
        Ok(finish_metadata(self.metadata.scan()?, query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Resource;
    use tempfile::TempDir;

    fn span(trace: &str, id: &str, service: &str) -> Span {
        Span::builder()
            .trace_id(TraceId::new(trace))
            .span_id(SpanId::new(id))
            .name("work")
            .start_time_unix_nano(100)
            .end_time_unix_nano(200)
            .resource(Resource {
                service_name: service.to_string(),
                ..Default::default()
            })
            .build()
    }

    #[test]
    fn test_document_round_trip() {
        let batch = vec![span("t1", "a", "svc")];
        let document = Document::encode(&batch).unwrap();
        assert_eq!(document.decode::<Span>().unwrap(), batch);
    }

    #[test]
    fn test_corrupt_document() {
        let document = Document {
            payload: vec![1],
        };
        assert!(document.decode::<Span>().is_err());
    }

    #[tokio::test]
    async fn test_segments_replay_on_open() {
        let dir = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        {
            let storage = DocumentStorage::open(dir.path()).unwrap();
            storage
                .write(&[span("t1", "a", "svc"), span("t1", "b", "svc")], &cancel)
                .await
                .unwrap();
            storage.write(&[span("t2", "c", "other")], &cancel).await.unwrap();
            assert_eq!(storage.document_count(), 2);
        }

        let reopened = DocumentStorage::open(dir.path()).unwrap();
        assert_eq!(reopened.document_count(), 2);
        assert_eq!(reopened.get_trace(&TraceId::new("t1"), &cancel).await.unwrap().len(), 2);
        assert_eq!(
            reopened.get_services(&cancel).await.unwrap(),
            vec!["other".to_string(), "svc".to_string()]
        );
    }

    #[tokio::test]
    async fn test_truncated_tail_is_ignored() {
        let dir = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        {
            let storage = DocumentStorage::open(dir.path()).unwrap();
            storage.write(&[span("t1", "a", "svc")], &cancel).await.unwrap();
        }
        let mut file = OpenOptions::new()
            .append(true)
            .open(dir.path().join("spans.seg"))
            .unwrap();
        file.write_all(&100u32.to_le_bytes()).unwrap();
        file.write_all(&[1, 2, 3]).unwrap();
        drop(file);

        let reopened = DocumentStorage::open(dir.path()).unwrap();
        assert_eq!(reopened.get_trace(&TraceId::new("t1"), &cancel).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_metadata_keys_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        let first = MetricMetadata {
            metric_name: "up".into(),
            service_name: "svc".into(),
            metric_type: crate::metrics::MetricType::Gauge,
            help: "first".into(),
            unit: String::new(),
        };
        {
            let storage = DocumentStorage::open(dir.path()).unwrap();
            storage.write(&[first.clone()], &cancel).await.unwrap();
        }

        let reopened = DocumentStorage::open(dir.path()).unwrap();
        let second = MetricMetadata {
            help: "second".into(),
            ..first.clone()
        };
        reopened.write(&[second], &cancel).await.unwrap();
        let all = reopened
            .get_metric_metadata(&MetricMetadataQueryParameters::default(), &cancel)
            .await
            .unwrap();
        assert_eq!(all, vec![first]);
    }
}
