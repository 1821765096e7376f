//! Time series and metric catalog types.

use crate::metrics::labels::Labels;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One (timestamp, value) point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp_unix_sec: i64,
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp_unix_sec: i64, value: f64) -> Self {
        Self {
            timestamp_unix_sec,
            value,
        }
    }
}

/// A label set with its samples, sorted ascending by timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    pub labels: Labels,
    pub samples: Vec<Sample>,
}

impl TimeSeries {
    pub fn new(labels: Labels, samples: Vec<Sample>) -> Self {
        Self { labels, samples }
    }

    /// Sorts samples and keeps the last value written for a duplicated
    /// timestamp.
    pub fn normalize(&mut self) {
        self.samples.sort_by_key(|s| s.timestamp_unix_sec);
        let mut deduped: Vec<Sample> = Vec::with_capacity(self.samples.len());
        for sample in self.samples.drain(..) {
            match deduped.last_mut() {
                Some(last) if last.timestamp_unix_sec == sample.timestamp_unix_sec => *last = sample,
                _ => deduped.push(sample),
            }
        }
        self.samples = deduped;
    }

    /// Samples with `start <= t <= end`.
    pub fn samples_between(&self, start: i64, end: i64) -> &[Sample] {
        let lo = self.samples.partition_point(|s| s.timestamp_unix_sec < start);
        let hi = self.samples.partition_point(|s| s.timestamp_unix_sec <= end);
        if lo >= hi {
            &[]
        } else {
            &self.samples[lo..hi]
        }
    }
}

/// Prometheus metric type as derived from the OTLP data kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
    Summary,
    Unknown,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
            MetricType::Histogram => "histogram",
            MetricType::Summary => "summary",
            MetricType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Catalog entry for a metric as reported by one service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricMetadata {
    pub metric_name: String,
    pub service_name: String,
    pub metric_type: MetricType,
    pub help: String,
    pub unit: String,
}

impl MetricMetadata {
    /// Natural key used by upserting metadata writers.
    pub fn key(&self) -> (String, String) {
        (self.metric_name.clone(), self.service_name.clone())
    }
}
