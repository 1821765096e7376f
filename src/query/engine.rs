//! PromQL subset evaluation.
//!
//! Every query is evaluated over a grid of steps. Each series fetched from
//! storage is walked once by its own [`MatrixEnumerator`], one window per
//! step, and series are walked in parallel on the rayon pool from a
//! blocking task. Instant queries are a one-step grid.

use crate::core::config::QueryConfig;
use crate::core::{LanternError, Result};
use crate::metrics::{LabelMatcher, Labels, MatrixEnumerator, Sample, TimeSeries};
use crate::query::promql::{parse_expr, AggregateOp, Expr, Grouping, RangeFunction};
use crate::storage::{PrometheusMetricReader, TimeSeriesQueryParameters};
use futures::future::BoxFuture;
use rayon::prelude::*;
use ahash::AHashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Evaluation grid: `start`, `start + step`, ... up to and including `end`
/// when it falls on the grid. All values are unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalRange {
    pub start: i64,
    pub end: i64,
    pub step: i64,
}

impl EvalRange {
    pub fn instant(time: i64) -> Self {
        Self {
            start: time,
            end: time,
            step: 1,
        }
    }

    pub fn len(&self) -> usize {
        if self.is_empty() || self.step <= 0 {
            return 0;
        }
        let steps = self.end.saturating_sub(self.start) / self.step;
        usize::try_from(steps).map_or(usize::MAX, |n| n.saturating_add(1))
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    pub fn steps(&self) -> impl Iterator<Item = i64> + '_ {
        let step = self.step;
        (0..self.len() as i64).map(move |i| self.start + i * step)
    }
}

/// One point of an instant vector.
#[derive(Debug, Clone, PartialEq)]
pub struct InstantSample {
    pub labels: Labels,
    pub timestamp: i64,
    pub value: f64,
}

/// Result of an instant query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryValue {
    Vector(Vec<InstantSample>),
    Matrix(Vec<TimeSeries>),
}

/// A series evaluated on the grid; `None` where it has no value.
#[derive(Debug, Clone)]
struct StepSeries {
    labels: Labels,
    points: Vec<Option<f64>>,
}

/// Evaluates PromQL against a metric reader.
pub struct QueryEngine {
    reader: Arc<dyn PrometheusMetricReader>,
    lookback_delta: i64,
    max_points: usize,
    max_series: usize,
}

impl QueryEngine {
    pub fn new(reader: Arc<dyn PrometheusMetricReader>, config: &QueryConfig, max_series: usize) -> Self {
        Self {
            reader,
            lookback_delta: config.lookback_delta.as_secs().max(1) as i64,
            max_points: config.max_points_per_series,
            max_series,
        }
    }

    /// Evaluates `query` at `time`.
    pub async fn instant_query(
        &self,
        query: &str,
        time: i64,
        cancel: &CancellationToken,
    ) -> Result<QueryValue> {
        let expr = parse_expr(query)?;
        tracing::debug!("Instant query {:?} at {}", query, time);

        if let Expr::Range(matrix) = &expr {
            let window = duration_secs(matrix.range);
            let series = self
                .fetch(&matrix.selector.matchers, window_start(time, window), time, None, cancel)
                .await?;
            return Ok(QueryValue::Matrix(series));
        }

        let range = EvalRange::instant(time);
        let vector = self
            .eval(&expr, &range, cancel)
            .await?
            .into_iter()
            .filter_map(|s| {
                s.points.first().copied().flatten().map(|value| InstantSample {
                    labels: s.labels,
                    timestamp: time,
                    value,
                })
            })
            .collect();
        Ok(QueryValue::Vector(vector))
    }

    /// Evaluates `query` over the grid and returns one series per result
    /// label set.
    pub async fn range_query(
        &self,
        query: &str,
        range: EvalRange,
        cancel: &CancellationToken,
    ) -> Result<Vec<TimeSeries>> {
        if range.step <= 0 {
            return Err(LanternError::validation("step must be positive"));
        }
        if range.is_empty() {
            return Err(LanternError::validation("end must not be before start"));
        }
        if range.len() > self.max_points {
            return Err(LanternError::validation(format!(
                "exceeded maximum resolution of {} points per series",
                self.max_points
            )));
        }

        let expr = parse_expr(query)?;
        if expr.is_matrix() {
            return Err(LanternError::validation(
                "range vector selectors are only allowed in instant queries",
            ));
        }
        tracing::debug!("Range query {:?} over {:?}", query, range);

        let steps: Vec<i64> = range.steps().collect();
        Ok(self
            .eval(&expr, &range, cancel)
            .await?
            .into_iter()
            .map(|s| {
                let samples = steps
                    .iter()
                    .zip(s.points)
                    .filter_map(|(t, v)| v.map(|v| Sample::new(*t, v)))
                    .collect();
                TimeSeries::new(s.labels, samples)
            })
            .collect())
    }

    async fn fetch(
        &self,
        matchers: &[LabelMatcher],
        start: i64,
        end: i64,
        interval: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<Vec<TimeSeries>> {
        let params = TimeSeriesQueryParameters {
            matchers: matchers.to_vec(),
            start_sec: start,
            end_sec: end,
            limit: Some(self.max_series.saturating_add(1)),
            interval,
        };
        let series = self.reader.get_time_series(&params, cancel).await?;
        if series.len() > self.max_series {
            return Err(LanternError::validation(format!(
                "query selects more than {} series",
                self.max_series
            )));
        }
        Ok(series)
    }

    fn eval<'a>(
        &'a self,
        expr: &'a Expr,
        range: &'a EvalRange,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Vec<StepSeries>>> {
        Box::pin(async move {
            let interval = Some(Duration::from_secs(range.step as u64));
            match expr {
                Expr::Selector(selector) => {
                    let window = self.lookback_delta;
                    let series = self
                        .fetch(&selector.matchers, window_start(range.start, window), range.end, interval, cancel)
                        .await?;
                    walk_all(series, *range, window, |s| s.labels.clone(), |w| {
                        w.back().map(|s| s.value)
                    })
                    .await
                },
                Expr::Call { function, arg } => {
                    let window = duration_secs(arg.range);
                    let series = self
                        .fetch(&arg.selector.matchers, window_start(range.start, window), range.end, interval, cancel)
                        .await?;
                    let function = *function;
                    walk_all(
                        series,
                        *range,
                        window,
                        move |s| {
                            if function.keeps_metric_name() {
                                s.labels.clone()
                            } else {
                                s.labels.drop_metric_name()
                            }
                        },
                        move |w| apply_range_function(function, w, window),
                    )
                    .await
                },
                Expr::Aggregate { op, grouping, expr } => {
                    let inner = self.eval(expr, range, cancel).await?;
                    Ok(aggregate(*op, grouping, inner, range.len()))
                },
                Expr::Range(_) => Err(LanternError::validation(
                    "range vector selector must be wrapped in a function",
                )),
            }
        })
    }
}

fn duration_secs(duration: Duration) -> i64 {
    i64::try_from(duration.as_secs()).unwrap_or(i64::MAX).max(1)
}

/// First second of the window `[t - window + 1, t]`.
fn window_start(t: i64, window: i64) -> i64 {
    t.saturating_sub(window.saturating_sub(1))
}

/// Walks every series over the grid on the blocking pool so the runtime
/// workers stay free while rayon does the work.
async fn walk_all<L, F>(
    series: Vec<TimeSeries>,
    range: EvalRange,
    window: i64,
    labels: L,
    point: F,
) -> Result<Vec<StepSeries>>
where
    L: Fn(&TimeSeries) -> Labels + Send + Sync + 'static,
    F: Fn(&VecDeque<Sample>) -> Option<f64> + Send + Sync + 'static,
{
    tokio::task::spawn_blocking(move || walk_series(&series, &range, window, labels, point)).await?
}

/// Walks every series over the grid with windows `[t - window + 1, t]`.
fn walk_series<L, F>(
    series: &[TimeSeries],
    range: &EvalRange,
    window: i64,
    labels: L,
    point: F,
) -> Result<Vec<StepSeries>>
where
    L: Fn(&TimeSeries) -> Labels + Sync,
    F: Fn(&VecDeque<Sample>) -> Option<f64> + Sync,
{
    let walked: Vec<StepSeries> = series
        .par_iter()
        .map(|s| {
            let mut enumerator = MatrixEnumerator::new(&s.samples);
            let mut buffer = VecDeque::new();
            let mut points = Vec::with_capacity(range.len());
            for t in range.steps() {
                let samples = enumerator.enumerate(window_start(t, window), t, Some(&mut buffer))?;
                points.push(point(samples));
            }
            Ok(StepSeries {
                labels: labels(s),
                points,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(walked
        .into_iter()
        .filter(|s| s.points.iter().any(Option::is_some))
        .collect())
}

/// Sum of increases, treating any drop as a counter reset.
fn counter_increase(samples: &VecDeque<Sample>) -> Option<f64> {
    if samples.len() < 2 {
        return None;
    }
    let mut increase = 0.0;
    let mut previous = samples.front()?.value;
    for sample in samples.iter().skip(1) {
        if sample.value < previous {
            increase += sample.value;
        } else {
            increase += sample.value - previous;
        }
        previous = sample.value;
    }
    Some(increase)
}

fn apply_range_function(function: RangeFunction, samples: &VecDeque<Sample>, window: i64) -> Option<f64> {
    let values = || samples.iter().map(|s| s.value);
    match function {
        RangeFunction::Rate => counter_increase(samples).map(|inc| inc / window as f64),
        RangeFunction::Increase => counter_increase(samples),
        RangeFunction::Delta => {
            if samples.len() < 2 {
                return None;
            }
            Some(samples.back()?.value - samples.front()?.value)
        },
        RangeFunction::AvgOverTime => {
            if samples.is_empty() {
                return None;
            }
            Some(values().sum::<f64>() / samples.len() as f64)
        },
        RangeFunction::MinOverTime => values().reduce(f64::min),
        RangeFunction::MaxOverTime => values().reduce(f64::max),
        RangeFunction::SumOverTime => {
            if samples.is_empty() {
                return None;
            }
            Some(values().sum())
        },
        RangeFunction::CountOverTime => {
            if samples.is_empty() {
                return None;
            }
            Some(samples.len() as f64)
        },
        RangeFunction::LastOverTime => samples.back().map(|s| s.value),
    }
}

fn aggregate(op: AggregateOp, grouping: &Grouping, inner: Vec<StepSeries>, steps: usize) -> Vec<StepSeries> {
    let mut groups: AHashMap<Labels, Vec<StepSeries>> = AHashMap::new();
    for series in inner {
        let key = match grouping {
            Grouping::All => Labels::empty(),
            Grouping::By(names) => series.labels.match_labels(true, names),
            Grouping::Without(names) => series.labels.match_labels(false, names),
        };
        groups.entry(key).or_default().push(series);
    }

    let mut out: Vec<StepSeries> = groups
        .into_iter()
        .map(|(labels, members)| {
            let points = (0..steps)
                .map(|i| {
                    let values: Vec<f64> = members.iter().filter_map(|m| m.points[i]).collect();
                    if values.is_empty() {
                        return None;
                    }
                    Some(match op {
                        AggregateOp::Sum => values.iter().sum(),
                        AggregateOp::Avg => values.iter().sum::<f64>() / values.len() as f64,
                        AggregateOp::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
                        AggregateOp::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                        AggregateOp::Count => values.len() as f64,
                    })
                })
                .collect();
            StepSeries { labels, points }
        })
        .collect();

    out.sort_by(|a, b| a.labels.cmp(&b.labels));
    out
}
