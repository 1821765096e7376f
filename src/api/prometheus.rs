//! Prometheus HTTP API endpoints.
//!
//! Every endpoint accepts its parameters either in the query string or as a
//! form body, as Prometheus does.

use super::{request_token, ApiState};
use crate::core::{LanternError, Result};
use crate::metrics::Labels;
use crate::query::prometheus::{
    metadata_data, translate_instant_query, translate_label_names_query,
    translate_label_values_query, translate_metadata_query, translate_range_query,
    translate_series_query, PromResponse, QueryData,
};
use crate::storage::params::finish_listing;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Form, Json, Router,
};
use serde::Serialize;
use std::collections::BTreeSet;
use std::time::{SystemTime, UNIX_EPOCH};

type Pairs = Vec<(String, String)>;

pub(super) fn routes() -> Router<ApiState> {
    Router::new()
        .route("/api/v1/query", get(instant_query).post(instant_query))
        .route("/api/v1/query_range", get(range_query).post(range_query))
        .route("/api/v1/labels", get(label_names).post(label_names))
        .route("/api/v1/label/:name/values", get(label_values))
        .route("/api/v1/series", get(series).post(series))
        .route("/api/v1/metadata", get(metadata))
}

fn respond<T: Serialize>(result: Result<T>) -> Response {
    match result {
        Ok(data) => Json(PromResponse::success(data)).into_response(),
        Err(err) => {
            let status = if err.is_validation() {
                StatusCode::BAD_REQUEST
            } else if matches!(err, LanternError::Cancelled | LanternError::Timeout { .. }) {
                StatusCode::SERVICE_UNAVAILABLE
            } else {
                tracing::error!("Prometheus query failed: {}", err);
                StatusCode::INTERNAL_SERVER_ERROR
            };
            (status, Json(PromResponse::<()>::error(&err))).into_response()
        },
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

async fn instant_query(State(state): State<ApiState>, Form(pairs): Form<Pairs>) -> Response {
    let (cancel, _guard) = request_token();
    let result = async {
        let request = translate_instant_query(&pairs, now_secs())?;
        let value = state.engine.instant_query(&request.query, request.time, &cancel).await?;
        Ok(QueryData::from(value))
    }
    .await;
    respond(result)
}

async fn range_query(State(state): State<ApiState>, Form(pairs): Form<Pairs>) -> Response {
    let (cancel, _guard) = request_token();
    let result = async {
        let request = translate_range_query(&pairs)?;
        let series = state.engine.range_query(&request.query, request.range, &cancel).await?;
        Ok(QueryData::from(series))
    }
    .await;
    respond(result)
}

async fn label_names(State(state): State<ApiState>, Form(pairs): Form<Pairs>) -> Response {
    let (cancel, _guard) = request_token();
    let result = async {
        let sets = translate_label_names_query(&pairs)?;
        let limit = sets.first().and_then(|p| p.limit);
        let mut names = BTreeSet::new();
        for params in &sets {
            names.extend(state.storage.metric_reader.get_label_names(params, &cancel).await?);
        }
        Ok(finish_listing(names, limit))
    }
    .await;
    respond(result)
}

async fn label_values(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Form(pairs): Form<Pairs>,
) -> Response {
    let (cancel, _guard) = request_token();
    let result = async {
        let sets = translate_label_values_query(&name, &pairs)?;
        let limit = sets.first().and_then(|p| p.limit);
        let mut values = BTreeSet::new();
        for params in &sets {
            values.extend(state.storage.metric_reader.get_label_values(params, &cancel).await?);
        }
        Ok(finish_listing(values, limit))
    }
    .await;
    respond(result)
}

async fn series(State(state): State<ApiState>, Form(pairs): Form<Pairs>) -> Response {
    let (cancel, _guard) = request_token();
    let result = async {
        let sets = translate_series_query(&pairs)?;
        let limit = sets.first().and_then(|p| p.limit);
        let mut found: BTreeSet<Labels> = BTreeSet::new();
        for params in &sets {
            let series = state.storage.metric_reader.get_time_series(params, &cancel).await?;
            found.extend(series.into_iter().map(|s| s.labels));
        }
        let found: Vec<Labels> = match limit {
            Some(limit) => found.into_iter().take(limit).collect(),
            None => found.into_iter().collect(),
        };
        Ok(found)
    }
    .await;
    respond(result)
}

async fn metadata(State(state): State<ApiState>, Form(pairs): Form<Pairs>) -> Response {
    let (cancel, _guard) = request_token();
    let result = async {
        let params = translate_metadata_query(&pairs)?;
        let records = state
            .storage
            .metric_metadata_reader
            .get_metric_metadata(&params, &cancel)
            .await?;
        Ok(metadata_data(records))
    }
    .await;
    respond(result)
}
