//! Lantern - an OpenTelemetry backend with Jaeger and Prometheus query APIs.
//!
//! Spans and metrics arrive over OTLP (gRPC on 4317, HTTP on 4318), are
//! converted into a canonical model and written through storage contracts.
//! The same data is then served back through the Jaeger query API and the
//! Prometheus HTTP API, including a PromQL subset.
//!
//! # Architecture
//!
//! - `receiver`: OTLP gRPC and HTTP endpoints plus the ingestion buffer
//! - `storage`: writer and reader contracts with memory and document backends
//! - `metrics`: label sets, matchers and the matrix enumerator
//! - `query`: Jaeger translation, PromQL parsing and evaluation
//! - `api`: the query HTTP surface
//! - `core`: domain model, errors and configuration
//! - `cli`: command-line entry point
//!
//! # Example
//!
//! ```no_run
//! use lantern_lib::core::Config;
//! use lantern_lib::Application;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let app = Application::new(Config::default())?;
//!     app.run().await?;
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod api;
pub mod application;
pub mod cli;
pub mod core;
pub mod metrics;
pub mod query;
pub mod receiver;
pub mod storage;

pub use crate::application::Application;
pub use crate::core::{Config, LanternError, Result};
