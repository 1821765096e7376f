//! OTLP/HTTP receiver.
//!
//! Accepts binary protobuf on `POST /v1/traces` and `POST /v1/metrics` and
//! answers with the protobuf-encoded export response.

use crate::core::LanternError;
use crate::receiver::OtelReceiver;
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use opentelemetry_proto::tonic::collector::metrics::v1::{
    ExportMetricsServiceRequest, ExportMetricsServiceResponse,
};
use opentelemetry_proto::tonic::collector::trace::v1::{
    ExportTraceServiceRequest, ExportTraceServiceResponse,
};
use prost::Message;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

const PROTOBUF: &str = "application/x-protobuf";

pub fn create_http_router(receiver: OtelReceiver) -> Router {
    Router::new()
        .route("/v1/traces", post(handle_traces))
        .route("/v1/metrics", post(handle_metrics))
        .route("/health", get(health_check))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(receiver)
}

fn require_protobuf(headers: &HeaderMap) -> Result<(), HttpError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(PROTOBUF);
    if content_type.starts_with(PROTOBUF) || content_type.starts_with("application/octet-stream") {
        Ok(())
    } else {
        Err(HttpError::UnsupportedMediaType(content_type.to_string()))
    }
}

fn protobuf_response<M: Message>(message: M) -> Response {
    (StatusCode::OK, [(header::CONTENT_TYPE, PROTOBUF)], message.encode_to_vec()).into_response()
}

async fn handle_traces(
    State(receiver): State<OtelReceiver>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, HttpError> {
    require_protobuf(&headers)?;
    let request = ExportTraceServiceRequest::decode(body)
        .map_err(|e| HttpError::BadRequest(format!("Failed to decode trace export: {}", e)))?;
    receiver.accept_traces(&request)?;
    Ok(protobuf_response(ExportTraceServiceResponse {
        partial_success: None,
    }))
}

async fn handle_metrics(
    State(receiver): State<OtelReceiver>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, HttpError> {
    require_protobuf(&headers)?;
    let request = ExportMetricsServiceRequest::decode(body)
        .map_err(|e| HttpError::BadRequest(format!("Failed to decode metrics export: {}", e)))?;
    receiver.accept_metrics(&request)?;
    Ok(protobuf_response(ExportMetricsServiceResponse {
        partial_success: None,
    }))
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// HTTP-specific error type.
#[derive(Debug)]
pub enum HttpError {
    BadRequest(String),
    UnsupportedMediaType(String),
    Unavailable(String),
    Internal(String),
}

impl From<LanternError> for HttpError {
    fn from(err: LanternError) -> Self {
        match err {
            LanternError::BufferFull | LanternError::BufferClosed => {
                HttpError::Unavailable(err.to_string())
            },
            other => HttpError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            HttpError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            HttpError::UnsupportedMediaType(content_type) => (
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                format!("unsupported content type {:?}, expected {}", content_type, PROTOBUF),
            ),
            HttpError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            HttpError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        if status.is_server_error() {
            tracing::warn!("OTLP HTTP request failed: {}", message);
        }
        (status, message).into_response()
    }
}
