//! Jaeger query endpoints.

use super::{request_token, ApiState};
use crate::core::{LanternError, SpanKind};
use crate::query::jaeger::{parse_trace_id, translate_trace_query, JaegerResponse, TraceSearchQuery};
use crate::storage::OperationQueryParameters;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::SystemTime;

pub(super) fn routes() -> Router<ApiState> {
    Router::new()
        .route("/api/services", get(services_handler))
        .route("/api/services/:service/operations", get(service_operations_handler))
        .route("/api/operations", get(operations_handler))
        .route("/api/traces", get(search_handler))
        .route("/api/traces/:id", get(trace_handler))
}

/// Renders a failure in the Jaeger envelope with `data: null`.
fn error_response(err: LanternError) -> Response {
    let status = if err.is_validation() {
        StatusCode::BAD_REQUEST
    } else if matches!(err, LanternError::NotFound(_) | LanternError::TraceNotFound(_)) {
        StatusCode::NOT_FOUND
    } else {
        tracing::error!("Jaeger query failed: {}", err);
        StatusCode::INTERNAL_SERVER_ERROR
    };
    let body = JaegerResponse::with_error(serde_json::Value::Null, status.as_u16(), err.to_string());
    (status, Json(body)).into_response()
}

fn ok<T: Serialize>(data: T) -> Response {
    Json(JaegerResponse::ok(data)).into_response()
}

/// GET /api/services
async fn services_handler(State(state): State<ApiState>) -> Response {
    let (cancel, _guard) = request_token();
    match state.storage.span_reader.get_services(&cancel).await {
        Ok(services) => ok(services),
        Err(e) => error_response(e),
    }
}

/// GET /api/services/{service}/operations: operation names only.
async fn service_operations_handler(
    State(state): State<ApiState>,
    Path(service): Path<String>,
) -> Response {
    let (cancel, _guard) = request_token();
    let query = OperationQueryParameters {
        service_name: service,
        span_kind: None,
    };
    match state.storage.span_reader.get_operations(&query, &cancel).await {
        Ok(operations) => {
            let names: BTreeSet<String> = operations.into_iter().map(|o| o.name).collect();
            ok(names)
        },
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationsQuery {
    service: Option<String>,
    span_kind: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JaegerOperation {
    name: String,
    span_kind: &'static str,
}

/// GET /api/operations?service=&spanKind=
async fn operations_handler(
    State(state): State<ApiState>,
    Query(params): Query<OperationsQuery>,
) -> Response {
    let (cancel, _guard) = request_token();
    let Some(service) = params.service.filter(|s| !s.is_empty()) else {
        return error_response(LanternError::validation("parameter 'service' is required"));
    };
    let span_kind = match params.span_kind.as_deref().filter(|k| !k.is_empty()) {
        None => None,
        Some(kind) => match SpanKind::parse(kind) {
            Some(kind) => Some(kind),
            None => {
                return error_response(LanternError::validation(format!(
                    "unsupported spanKind {:?}",
                    kind
                )))
            },
        },
    };

    let query = OperationQueryParameters {
        service_name: service,
        span_kind,
    };
    match state.storage.span_reader.get_operations(&query, &cancel).await {
        Ok(operations) => ok(operations
            .into_iter()
            .map(|o| JaegerOperation {
                name: o.name,
                span_kind: match o.span_kind {
                    SpanKind::Unspecified => "",
                    kind => kind.as_str(),
                },
            })
            .collect::<Vec<_>>()),
        Err(e) => error_response(e),
    }
}

/// GET /api/traces
async fn search_handler(
    State(state): State<ApiState>,
    Query(raw): Query<TraceSearchQuery>,
) -> Response {
    let (cancel, _guard) = request_token();
    let params = match translate_trace_query(&raw, &state.query, SystemTime::now()) {
        Ok(params) => params,
        Err(e) => return error_response(e),
    };
    tracing::debug!("Trace search {:?}", params);
    match state.storage.span_reader.find_traces(&params, &cancel).await {
        Ok(traces) => ok(traces),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Default, Deserialize)]
struct TraceBounds {
    /// Unix microseconds
    start: Option<u64>,
    end: Option<u64>,
}

/// GET /api/traces/{id}
async fn trace_handler(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(bounds): Query<TraceBounds>,
) -> Response {
    let (cancel, _guard) = request_token();
    let trace_id = match parse_trace_id(&id) {
        Ok(id) => id,
        Err(e) => return error_response(e),
    };
    let min = bounds.start.map(|us| us.saturating_mul(1_000));
    let max = bounds.end.map(|us| us.saturating_mul(1_000));

    match state
        .storage
        .span_reader
        .find_traces_by_id(std::slice::from_ref(&trace_id), min, max, &cancel)
        .await
    {
        Ok(traces) if traces.is_empty() => {
            let body = JaegerResponse::with_error(Vec::<()>::new(), 404, "trace not found");
            (StatusCode::NOT_FOUND, Json(body)).into_response()
        },
        Ok(traces) => ok(traces),
        Err(e) => error_response(e),
    }
}
