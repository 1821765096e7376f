//! Storage layer.
//!
//! The contracts in [`contracts`] are the only way the rest of Lantern
//! touches stored telemetry. Exactly one backend serves them per process,
//! chosen by `storage.backend` in the configuration.

use crate::core::config::StorageConfig;
use crate::core::{BackendKind, Result, Span};
use crate::metrics::{MetricMetadata, TimeSeries};
use std::sync::Arc;

pub mod contracts;
pub mod document;
pub mod memory;
pub mod params;

pub use contracts::{
    check_cancelled, JaegerSpanMetadataReader, JaegerSpanReader, PrometheusMetricMetadataReader,
    PrometheusMetricReader, SpanReader, TelemetryWriter,
};
pub use document::DocumentStorage;
pub use memory::MemoryStorage;
pub use params::{
    JaegerTraceQueryParameters, LabelNamesQueryParameters, LabelValuesQueryParameters,
    MetricMetadataQueryParameters, Operation, OperationQueryParameters,
    TimeSeriesQueryParameters,
};

/// Every contract a backend must implement.
pub trait Backend:
    TelemetryWriter<Span>
    + TelemetryWriter<TimeSeries>
    + TelemetryWriter<MetricMetadata>
    + JaegerSpanReader
    + PrometheusMetricReader
    + PrometheusMetricMetadataReader
    + 'static
{
}

impl<B> Backend for B where
    B: TelemetryWriter<Span>
        + TelemetryWriter<TimeSeries>
        + TelemetryWriter<MetricMetadata>
        + JaegerSpanReader
        + PrometheusMetricReader
        + PrometheusMetricMetadataReader
        + 'static
{
}

/// The contracts of one backend, handed out as independent trait objects.
#[derive(Clone)]
pub struct Storage {
    pub span_writer: Arc<dyn TelemetryWriter<Span>>,
    pub series_writer: Arc<dyn TelemetryWriter<TimeSeries>>,
    pub metadata_writer: Arc<dyn TelemetryWriter<MetricMetadata>>,
    pub span_reader: Arc<dyn JaegerSpanReader>,
    pub metric_reader: Arc<dyn PrometheusMetricReader>,
    pub metric_metadata_reader: Arc<dyn PrometheusMetricMetadataReader>,
}

impl Storage {
    pub fn from_backend<B: Backend>(backend: Arc<B>) -> Self {
        Self {
            span_writer: Arc::clone(&backend) as Arc<dyn TelemetryWriter<Span>>,
            series_writer: Arc::clone(&backend) as Arc<dyn TelemetryWriter<TimeSeries>>,
            metadata_writer: Arc::clone(&backend) as Arc<dyn TelemetryWriter<MetricMetadata>>,
            span_reader: Arc::clone(&backend) as Arc<dyn JaegerSpanReader>,
            metric_reader: Arc::clone(&backend) as Arc<dyn PrometheusMetricReader>,
            metric_metadata_reader: backend as Arc<dyn PrometheusMetricMetadataReader>,
        }
    }

    /// A fresh in-memory store, mostly for tests.
    pub fn in_memory() -> Self {
        Self::from_backend(Arc::new(MemoryStorage::new()))
    }
}

/// Opens the configured backend.
pub fn open(config: &StorageConfig) -> Result<Storage> {
    match config.backend {
        BackendKind::Memory => {
            tracing::info!("Using in-memory storage");
            Ok(Storage::in_memory())
        },
        BackendKind::Document => {
            let backend = match &config.data_dir {
                Some(dir) => {
                    tracing::info!("Using document storage at {}", dir.display());
                    DocumentStorage::open(dir)?
                },
                None => {
                    tracing::info!("Using document storage without persistence");
                    DocumentStorage::in_memory()
                },
            };
            Ok(Storage::from_backend(Arc::new(backend)))
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_open_memory_backend() {
        let storage = open(&StorageConfig::default()).unwrap();
        let services = storage.span_reader.get_services(&CancellationToken::new()).await.unwrap();
        assert!(services.is_empty());
    }

    #[tokio::test]
    async fn test_open_document_backend_with_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            backend: BackendKind::Document,
            data_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        open(&config).unwrap();
        assert!(dir.path().join("spans.seg").exists());
    }
}
