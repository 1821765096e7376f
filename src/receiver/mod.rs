//! OpenTelemetry receivers.
//!
//! OTLP traces and metrics arrive over gRPC (tonic) and HTTP (axum), are
//! converted into the canonical model and handed to the ingestion buffer.
//! A full buffer surfaces as `RESOURCE_EXHAUSTED` on gRPC and 503 on HTTP so
//! exporters back off and retry.

pub mod buffer;
pub mod convert;
pub mod http;
pub mod metrics;

pub use buffer::{spawn_writer, IngestBatch, IngestQueue, IngestStatsSnapshot};
pub use convert::{spans_from_request, to_span};
pub use metrics::{metrics_from_request, ConvertedMetrics};

use crate::core::{LanternError, Result};
use opentelemetry_proto::tonic::collector::metrics::v1::{
    metrics_service_server::{MetricsService, MetricsServiceServer},
    ExportMetricsServiceRequest, ExportMetricsServiceResponse,
};
use opentelemetry_proto::tonic::collector::trace::v1::{
    trace_service_server::{TraceService, TraceServiceServer},
    ExportTraceServiceRequest, ExportTraceServiceResponse,
};
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tonic::{transport::Server, Request, Response, Status};

/// Converts OTLP requests and queues them for the writer.
#[derive(Clone)]
pub struct OtelReceiver {
    queue: IngestQueue,
}

impl OtelReceiver {
    pub fn new(queue: IngestQueue) -> Self {
        Self { queue }
    }

    /// Queues the spans of one export request; returns how many were accepted.
    pub fn accept_traces(&self, request: &ExportTraceServiceRequest) -> Result<usize> {
        let spans = spans_from_request(request);
        let count = spans.len();
        tracing::debug!("Received {} spans", count);
        self.queue.push_spans(spans)?;
        Ok(count)
    }

    /// Queues the series and metadata of one export request; returns the
    /// number of samples accepted.
    pub fn accept_metrics(&self, request: &ExportMetricsServiceRequest) -> Result<usize> {
        let metrics = metrics_from_request(request);
        let count = metrics.sample_count();
        tracing::debug!(
            "Received {} samples across {} series",
            count,
            metrics.series.len()
        );
        self.queue.push_metrics(metrics)?;
        Ok(count)
    }

    /// Serves `TraceService` and `MetricsService` until `shutdown` fires.
    pub async fn serve_grpc(self, addr: SocketAddr, shutdown: CancellationToken) -> Result<()> {
        tracing::info!("OTLP gRPC receiver listening on {}", addr);

        Server::builder()
            .add_service(TraceServiceServer::new(GrpcTraceService {
                receiver: self.clone(),
            }))
            .add_service(MetricsServiceServer::new(GrpcMetricsService { receiver: self }))
            .serve_with_shutdown(addr, async move { shutdown.cancelled().await })
            .await
            .map_err(|e| {
                if e.to_string().contains("Address already in use") {
                    LanternError::network(format!("Port {} already in use", addr.port()))
                } else {
                    LanternError::protocol(format!("gRPC server error on {}: {}", addr, e))
                }
            })?;

        tracing::info!("OTLP gRPC receiver stopped");
        Ok(())
    }

    /// Serves `/v1/traces` and `/v1/metrics` until `shutdown` fires.
    pub async fn serve_http(self, addr: SocketAddr, shutdown: CancellationToken) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
            LanternError::network(format!("Failed to bind OTLP HTTP receiver to {}: {}", addr, e))
        })?;
        tracing::info!("OTLP HTTP receiver listening on {}", addr);

        axum::serve(listener, http::create_http_router(self))
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| LanternError::protocol(format!("OTLP HTTP server error: {}", e)))?;

        tracing::info!("OTLP HTTP receiver stopped");
        Ok(())
    }
}

/// Maps ingestion failures onto gRPC codes exporters understand.
fn to_status(err: LanternError) -> Status {
    match err {
        LanternError::BufferFull => Status::resource_exhausted(err.to_string()),
        LanternError::BufferClosed => Status::unavailable(err.to_string()),
        other => Status::internal(other.to_string()),
    }
}

struct GrpcTraceService {
    receiver: OtelReceiver,
}

#[tonic::async_trait]
impl TraceService for GrpcTraceService {
    async fn export(
        &self,
        request: Request<ExportTraceServiceRequest>,
    ) -> std::result::Result<Response<ExportTraceServiceResponse>, Status> {
        self.receiver.accept_traces(request.get_ref()).map_err(to_status)?;
        Ok(Response::new(ExportTraceServiceResponse {
            partial_success: None,
        }))
    }
}

struct GrpcMetricsService {
    receiver: OtelReceiver,
}

#[tonic::async_trait]
impl MetricsService for GrpcMetricsService {
    async fn export(
        &self,
        request: Request<ExportMetricsServiceRequest>,
    ) -> std::result::Result<Response<ExportMetricsServiceResponse>, Status> {
        self.receiver.accept_metrics(request.get_ref()).map_err(to_status)?;
        Ok(Response::new(ExportMetricsServiceResponse {
            partial_success: None,
        }))
    }
}
