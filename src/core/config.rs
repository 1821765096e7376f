//! Configuration management for Lantern.
//!
//! This module provides configuration handling with:
//! - YAML file support
//! - CLI argument overrides (see `cli`)
//! - Validation and defaults

use crate::core::{LanternError, Result};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Complete configuration for Lantern
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listener configuration
    pub server: ServerConfig,
    /// Storage backend selection
    pub storage: StorageConfig,
    /// Ingestion buffer and writer loop
    pub ingest: IngestConfig,
    /// Query limits and defaults
    pub query: QueryConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Debug mode
    #[serde(skip)]
    pub debug: bool,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// GRPC port for the OTLP receiver
    pub grpc_port: u16,
    /// HTTP port for the OTLP receiver
    pub http_port: u16,
    /// Port for the Jaeger and Prometheus query API
    pub query_port: u16,
    /// Bind address for all listeners
    pub bind_address: IpAddr,
    /// Enable permissive CORS on the query API
    pub enable_cors: bool,
}

/// Which storage implementation backs the contracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Indexed in-memory store
    Memory,
    /// Embedded document store with optional on-disk segments
    Document,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: BackendKind,
    /// Segment directory for the document backend; `None` keeps it in memory
    pub data_dir: Option<PathBuf>,
    /// Hard cap on series returned by a single time series query
    pub max_series_per_query: usize,
}

/// Ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Number of batches the buffer holds before producers are rejected
    pub buffer_capacity: usize,
    /// Spans or series accumulated before a write is forced
    pub max_batch_size: usize,
    /// Flush partially filled batches after this long
    #[serde(with = "humantime_serde")]
    pub flush_interval: Duration,
    /// Write attempts per batch before it is dropped
    pub retry_attempts: u32,
    /// Fixed pause between write attempts
    #[serde(with = "humantime_serde")]
    pub retry_backoff: Duration,
}

/// Query configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Traces returned when the caller gives no limit
    pub default_trace_limit: usize,
    /// Upper bound on any trace limit
    pub max_trace_limit: usize,
    /// How far back an instant selector looks for its latest sample
    #[serde(with = "humantime_serde")]
    pub lookback_delta: Duration,
    /// Maximum steps in one range query
    pub max_points_per_series: usize,
    /// Default lookback when a Jaeger search has no time bounds
    #[serde(with = "humantime_serde")]
    pub default_lookback: Duration,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: LogLevel,
}

/// Log levels
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            grpc_port: 4317,
            http_port: 4318,
            query_port: 16686,
            bind_address: IpAddr::from([0, 0, 0, 0]),
            enable_cors: true,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            backend: BackendKind::Memory,
            data_dir: None,
            max_series_per_query: 10_000,
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        IngestConfig {
            buffer_capacity: 1024,
            max_batch_size: 512,
            flush_interval: Duration::from_millis(200),
            retry_attempts: 3,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        QueryConfig {
            default_trace_limit: 20,
            max_trace_limit: 1500,
            lookback_delta: Duration::from_secs(300),
            max_points_per_series: 11_000,
            default_lookback: Duration::from_secs(3600),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: LogLevel::Info,
        }
    }
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Result<Self> {
        let config = Config::default();
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let ports = [self.server.grpc_port, self.server.http_port, self.server.query_port];
        for (i, port) in ports.iter().enumerate() {
            if ports[i + 1..].contains(port) {
                return Err(LanternError::config(format!(
                    "GRPC, HTTP and query ports must be different: {} is used twice",
                    port
                )));
            }
        }

        if self.ingest.buffer_capacity == 0 {
            return Err(LanternError::config("ingest.buffer_capacity must be greater than 0"));
        }

        if self.ingest.max_batch_size == 0 {
            return Err(LanternError::config("ingest.max_batch_size must be greater than 0"));
        }

        if self.ingest.retry_attempts == 0 {
            return Err(LanternError::config("ingest.retry_attempts must be at least 1"));
        }

        if self.storage.max_series_per_query == 0 {
            return Err(LanternError::config("storage.max_series_per_query must be greater than 0"));
        }

        if self.query.default_trace_limit == 0
            || self.query.default_trace_limit > self.query.max_trace_limit
        {
            return Err(LanternError::config(format!(
                "query.default_trace_limit must be between 1 and max_trace_limit ({})",
                self.query.max_trace_limit
            )));
        }

        if self.query.max_points_per_series == 0 {
            return Err(LanternError::config("query.max_points_per_series must be greater than 0"));
        }

        Ok(())
    }
}

impl LogLevel {
    /// Convert to tracing filter string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Configuration builder for programmatic construction
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        ConfigBuilder::default()
    }

    /// Load configuration from YAML string
    pub fn from_yaml(mut self, yaml: &str) -> Result<Self> {
        self.config = serde_yaml::from_str(yaml)
            .map_err(|e| LanternError::config(format!("Failed to parse YAML config: {}", e)))?;
        Ok(self)
    }

    pub fn grpc_port(mut self, port: u16) -> Self {
        self.config.server.grpc_port = port;
        self
    }

    pub fn http_port(mut self, port: u16) -> Self {
        self.config.server.http_port = port;
        self
    }

    pub fn query_port(mut self, port: u16) -> Self {
        self.config.server.query_port = port;
        self
    }

    pub fn backend(mut self, backend: BackendKind) -> Self {
        self.config.storage.backend = backend;
        self
    }

    pub fn data_dir(mut self, path: PathBuf) -> Self {
        self.config.storage.data_dir = Some(path);
        self
    }

    pub fn retry_attempts(mut self, attempts: u32) -> Self {
        self.config.ingest.retry_attempts = attempts;
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}
