//! Query side of Lantern.
//!
//! Jaeger and Prometheus requests are translated into storage parameters
//! here; PromQL expressions are parsed and evaluated against the metric
//! reader.

pub mod duration;
pub mod engine;
pub mod jaeger;
pub mod prometheus;
pub mod promql;

pub use duration::{lookback_start_nanos, parse_duration, parse_lookback};
pub use engine::{EvalRange, InstantSample, QueryEngine, QueryValue};
pub use jaeger::{parse_trace_id, translate_trace_query, TraceSearchQuery};
pub use promql::{parse_expr, parse_selector, Expr};
