//! Jaeger query surface: request translation and the response model.

pub mod model;

pub use model::{
    JaegerError, JaegerKeyValue, JaegerLog, JaegerProcess, JaegerReference, JaegerResponse,
    JaegerSpan, JaegerTrace,
};

use crate::core::config::QueryConfig;
use crate::core::{LanternError, Result, TraceId};
use crate::query::duration::{lookback_start_nanos, parse_lookback};
use crate::storage::params::JaegerTraceQueryParameters;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// `lookback` value meaning "use the explicit start and end".
const CUSTOM_LOOKBACK: &str = "custom";

/// Raw `/api/traces` query string. Everything stays text until translation
/// so malformed values turn into validation errors rather than rejections.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceSearchQuery {
    pub service: Option<String>,
    pub operation: Option<String>,
    /// JSON object of tag name to value
    pub tags: Option<String>,
    /// Unix microseconds
    pub start: Option<String>,
    /// Unix microseconds
    pub end: Option<String>,
    pub lookback: Option<String>,
    pub min_duration: Option<String>,
    pub max_duration: Option<String>,
    pub limit: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn micros_to_nanos(name: &str, value: &str) -> Result<u64> {
    let micros: u64 = value
        .parse()
        .map_err(|_| LanternError::validation(format!("invalid {}: {:?}", name, value)))?;
    Ok(micros.saturating_mul(1_000))
}

fn system_nanos(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Parses the `tags` JSON object. Non-string values are compared by their
/// JSON text.
fn parse_tags(raw: &str) -> Result<BTreeMap<String, String>> {
    let object: serde_json::Map<String, serde_json::Value> = serde_json::from_str(raw)
        .map_err(|e| LanternError::validation(format!("malformed tags parameter: {}", e)))?;
    Ok(object
        .into_iter()
        .map(|(k, v)| match v {
            serde_json::Value::String(s) => (k, s),
            other => (k, other.to_string()),
        })
        .collect())
}

/// Turns a Jaeger search request into storage parameters.
///
/// A `lookback` other than `custom` wins over `start`/`end` and is measured
/// back from `now`. Without either, the configured default lookback
/// applies.
pub fn translate_trace_query(
    raw: &TraceSearchQuery,
    limits: &QueryConfig,
    now: SystemTime,
) -> Result<JaegerTraceQueryParameters> {
    let mut params = JaegerTraceQueryParameters {
        service_name: non_empty(&raw.service).map(str::to_string),
        operation_name: non_empty(&raw.operation).map(str::to_string),
        num_traces: limits.default_trace_limit,
        ..Default::default()
    };

    if let Some(tags) = non_empty(&raw.tags) {
        params.tags = parse_tags(tags)?;
    }

    match non_empty(&raw.lookback).filter(|l| *l != CUSTOM_LOOKBACK) {
        Some(lookback) => {
            let lookback = parse_lookback(lookback)
                .ok_or_else(|| LanternError::validation(format!("invalid lookback: {:?}", lookback)))?;
            params.start_time_min = Some(lookback_start_nanos(now, lookback));
            params.start_time_max = Some(system_nanos(now));
        },
        None => {
            let end = match non_empty(&raw.end) {
                Some(end) => micros_to_nanos("end", end)?,
                None => system_nanos(now),
            };
            let start = match non_empty(&raw.start) {
                Some(start) => micros_to_nanos("start", start)?,
                None => lookback_start_nanos(now, limits.default_lookback),
            };
            if start > end {
                return Err(LanternError::validation("start must not be after end"));
            }
            params.start_time_min = Some(start);
            params.start_time_max = Some(end);
        },
    }

    if let Some(min) = non_empty(&raw.min_duration) {
        params.duration_min = Some(
            parse_lookback(min)
                .ok_or_else(|| LanternError::validation(format!("invalid minDuration: {:?}", min)))?,
        );
    }
    if let Some(max) = non_empty(&raw.max_duration) {
        params.duration_max = Some(
            parse_lookback(max)
                .ok_or_else(|| LanternError::validation(format!("invalid maxDuration: {:?}", max)))?,
        );
    }
    if let (Some(min), Some(max)) = (params.duration_min, params.duration_max) {
        if min > max {
            return Err(LanternError::validation("minDuration must not exceed maxDuration"));
        }
    }

    if let Some(limit) = non_empty(&raw.limit) {
        let limit: usize = limit
            .parse()
            .map_err(|_| LanternError::validation(format!("invalid limit: {:?}", limit)))?;
        if limit > 0 {
            params.num_traces = limit.min(limits.max_trace_limit);
        }
    }

    Ok(params)
}

/// Validates a trace id from a URL and brings it to the stored width: a
/// 32-character id whose high half is zero is stored with 16 characters.
pub fn parse_trace_id(raw: &str) -> Result<TraceId> {
    let id = raw.trim().to_ascii_lowercase();
    if id.is_empty() || id.len() > 32 || !id.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(LanternError::validation(format!("malformed trace id: {:?}", raw)));
    }

    let padded = format!("{:0>32}", id);
    let (high, low) = padded.split_at(16);
    if high.chars().all(|c| c == '0') {
        Ok(TraceId::new(low))
    } else {
        Ok(TraceId::new(padded))
    }
}
