//! Prometheus HTTP API: request translation and the response envelope.
//!
//! Query strings arrive as raw `(name, value)` pairs because `match[]` may
//! repeat. Translation never talks to storage; it only validates and builds
//! parameter objects, so every failure here is a `bad_data` response.

use crate::core::{LanternError, Result};
use crate::metrics::{is_label_name_valid, LabelMatcher, Labels, MetricMetadata, TimeSeries};
use crate::query::duration::parse_duration;
use crate::query::engine::{EvalRange, InstantSample, QueryValue};
use crate::query::promql::parse_selector;
use crate::storage::params::{
    LabelNamesQueryParameters, LabelValuesQueryParameters, MetricMetadataQueryParameters,
    TimeSeriesQueryParameters,
};
use chrono::DateTime;
use serde::Serialize;
use std::collections::BTreeMap;

const MATCH_PARAM: &str = "match[]";

fn param<'a>(pairs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    pairs
        .iter()
        .rev()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.trim())
        .filter(|v| !v.is_empty())
}

fn match_sets(pairs: &[(String, String)]) -> Result<Vec<Vec<LabelMatcher>>> {
    pairs
        .iter()
        .filter(|(k, _)| k == MATCH_PARAM)
        .map(|(_, v)| parse_selector(v))
        .collect()
}

/// Timestamps beyond this many seconds from the epoch are rejected so that
/// window arithmetic stays far from `i64` overflow.
pub const MAX_TIMESTAMP_SECS: i64 = i64::MAX / 4;

/// Parses a timestamp given as unix seconds (possibly fractional) or
/// RFC 3339. Fractions are truncated to whole seconds.
pub fn parse_time(name: &str, value: &str) -> Result<i64> {
    let secs = match value.parse::<f64>() {
        Ok(secs) if secs.is_finite() => {
            let secs = secs.floor();
            if secs.abs() > MAX_TIMESTAMP_SECS as f64 {
                return Err(out_of_range(name, value));
            }
            secs as i64
        },
        _ => DateTime::parse_from_rfc3339(value)
            .map(|t| t.timestamp())
            .map_err(|_| LanternError::validation(format!("invalid {}: {:?}", name, value)))?,
    };
    if !(-MAX_TIMESTAMP_SECS..=MAX_TIMESTAMP_SECS).contains(&secs) {
        return Err(out_of_range(name, value));
    }
    Ok(secs)
}

fn out_of_range(name: &str, value: &str) -> LanternError {
    LanternError::validation(format!("{} out of range: {:?}", name, value))
}

/// Parses a step given as seconds or as a duration string.
pub fn parse_step(value: &str) -> Result<i64> {
    let secs = match value.parse::<f64>() {
        Ok(secs) if secs.is_finite() => secs as i64,
        _ => parse_duration(value)
            .map(|d| d.as_secs() as i64)
            .ok_or_else(|| LanternError::validation(format!("invalid step: {:?}", value)))?,
    };
    if secs <= 0 {
        return Err(LanternError::validation(
            "zero or negative query resolution step widths are not accepted",
        ));
    }
    Ok(secs)
}

fn parse_limit(pairs: &[(String, String)]) -> Result<Option<usize>> {
    match param(pairs, "limit") {
        None => Ok(None),
        Some(raw) => {
            let limit: usize = raw
                .parse()
                .map_err(|_| LanternError::validation(format!("invalid limit: {:?}", raw)))?;
            Ok((limit > 0).then_some(limit))
        },
    }
}

fn optional_time(pairs: &[(String, String)], name: &str) -> Result<Option<i64>> {
    param(pairs, name).map(|v| parse_time(name, v)).transpose()
}

fn bounds(pairs: &[(String, String)]) -> Result<(Option<i64>, Option<i64>)> {
    let start = optional_time(pairs, "start")?;
    let end = optional_time(pairs, "end")?;
    if let (Some(start), Some(end)) = (start, end) {
        if start > end {
            return Err(LanternError::validation("end timestamp must not be before start time"));
        }
    }
    Ok((start, end))
}

fn required<'a>(pairs: &'a [(String, String)], name: &str) -> Result<&'a str> {
    param(pairs, name)
        .ok_or_else(|| LanternError::validation(format!("missing required parameter {:?}", name)))
}

/// `/api/v1/query`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstantQueryRequest {
    pub query: String,
    pub time: i64,
}

pub fn translate_instant_query(pairs: &[(String, String)], now: i64) -> Result<InstantQueryRequest> {
    Ok(InstantQueryRequest {
        query: required(pairs, "query")?.to_string(),
        time: optional_time(pairs, "time")?.unwrap_or(now),
    })
}

/// `/api/v1/query_range`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeQueryRequest {
    pub query: String,
    pub range: EvalRange,
}

pub fn translate_range_query(pairs: &[(String, String)]) -> Result<RangeQueryRequest> {
    let query = required(pairs, "query")?.to_string();
    let start = parse_time("start", required(pairs, "start")?)?;
    let end = parse_time("end", required(pairs, "end")?)?;
    let step = parse_step(required(pairs, "step")?)?;
    if end < start {
        return Err(LanternError::validation("end timestamp must not be before start time"));
    }
    Ok(RangeQueryRequest {
        query,
        range: EvalRange { start, end, step },
    })
}

/// `/api/v1/series`: one parameter set per `match[]`, at least one required.
pub fn translate_series_query(pairs: &[(String, String)]) -> Result<Vec<TimeSeriesQueryParameters>> {
    let sets = match_sets(pairs)?;
    if sets.is_empty() {
        return Err(LanternError::validation("no match[] parameter provided"));
    }
    let (start, end) = bounds(pairs)?;
    let limit = parse_limit(pairs)?;
    Ok(sets
        .into_iter()
        .map(|matchers| TimeSeriesQueryParameters {
            matchers,
            start_sec: start.unwrap_or(i64::MIN),
            end_sec: end.unwrap_or(i64::MAX),
            limit,
            interval: None,
        })
        .collect())
}

/// `/api/v1/labels`: one parameter set per `match[]`, or a single
/// unfiltered set when none is given.
pub fn translate_label_names_query(
    pairs: &[(String, String)],
) -> Result<Vec<LabelNamesQueryParameters>> {
    let (start_sec, end_sec) = bounds(pairs)?;
    let limit = parse_limit(pairs)?;
    let mut sets = match_sets(pairs)?;
    if sets.is_empty() {
        sets.push(Vec::new());
    }
    Ok(sets
        .into_iter()
        .map(|matchers| LabelNamesQueryParameters {
            matchers,
            start_sec,
            end_sec,
            limit,
        })
        .collect())
}

/// `/api/v1/label/{name}/values`
pub fn translate_label_values_query(
    label_name: &str,
    pairs: &[(String, String)],
) -> Result<Vec<LabelValuesQueryParameters>> {
    if !is_label_name_valid(label_name) {
        return Err(LanternError::validation(format!("invalid label name: {:?}", label_name)));
    }
    Ok(translate_label_names_query(pairs)?
        .into_iter()
        .map(|p| LabelValuesQueryParameters {
            label_name: label_name.to_string(),
            matchers: p.matchers,
            start_sec: p.start_sec,
            end_sec: p.end_sec,
            limit: p.limit,
        })
        .collect())
}

/// `/api/v1/metadata`
pub fn translate_metadata_query(pairs: &[(String, String)]) -> Result<MetricMetadataQueryParameters> {
    Ok(MetricMetadataQueryParameters {
        metric_name: param(pairs, "metric").map(str::to_string),
        limit: parse_limit(pairs)?,
    })
}

/// Renders a sample value the way Prometheus does.
pub fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "+Inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        value.to_string()
    }
}

/// Standard `{status, data}` envelope.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromResponse<T> {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> PromResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            status: "success",
            data: Some(data),
            error_type: None,
            error: None,
        }
    }

    pub fn error(error: &LanternError) -> Self {
        let error_type = match error {
            LanternError::Validation(_) | LanternError::InvalidWindow { .. } => "bad_data",
            LanternError::Cancelled => "canceled",
            LanternError::Timeout { .. } => "timeout",
            LanternError::NotFound(_) => "not_found",
            _ => "internal",
        };
        Self {
            status: "error",
            data: None,
            error_type: Some(error_type),
            error: Some(error.to_string()),
        }
    }
}

/// `(timestamp, "value")` as found in `value` and `values`.
pub type PromPoint = (i64, String);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromVectorSample {
    pub metric: Labels,
    pub value: PromPoint,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromMatrixSeries {
    pub metric: Labels,
    pub values: Vec<PromPoint>,
}

impl From<InstantSample> for PromVectorSample {
    fn from(sample: InstantSample) -> Self {
        Self {
            metric: sample.labels,
            value: (sample.timestamp, format_value(sample.value)),
        }
    }
}

impl From<TimeSeries> for PromMatrixSeries {
    fn from(series: TimeSeries) -> Self {
        Self {
            metric: series.labels,
            values: series
                .samples
                .iter()
                .map(|s| (s.timestamp_unix_sec, format_value(s.value)))
                .collect(),
        }
    }
}

/// `data` of the query endpoints.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "resultType", content = "result", rename_all = "lowercase")]
pub enum QueryData {
    Vector(Vec<PromVectorSample>),
    Matrix(Vec<PromMatrixSeries>),
}

impl From<QueryValue> for QueryData {
    fn from(value: QueryValue) -> Self {
        match value {
            QueryValue::Vector(v) => QueryData::Vector(v.into_iter().map(Into::into).collect()),
            QueryValue::Matrix(m) => QueryData::Matrix(m.into_iter().map(Into::into).collect()),
        }
    }
}

impl From<Vec<TimeSeries>> for QueryData {
    fn from(series: Vec<TimeSeries>) -> Self {
        QueryData::Matrix(series.into_iter().map(Into::into).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromMetadataEntry {
    #[serde(rename = "type")]
    pub metric_type: &'static str,
    pub help: String,
    pub unit: String,
}

/// `data` of `/api/v1/metadata`: metric name to its entries.
pub fn metadata_data(records: Vec<MetricMetadata>) -> BTreeMap<String, Vec<PromMetadataEntry>> {
    let mut data: BTreeMap<String, Vec<PromMetadataEntry>> = BTreeMap::new();
    for record in records {
        let entry = PromMetadataEntry {
            metric_type: record.metric_type.as_str(),
            help: record.help,
            unit: record.unit,
        };
        let entries = data.entry(record.metric_name).or_default();
        if !entries.contains(&entry) {
            entries.push(entry);
        }
    }
    data
}
