//! Command-line interface for Lantern.
//!
//! Run `lantern` with no arguments to start every listener on the standard
//! OTLP and Jaeger ports with in-memory storage.

use crate::core::config::{BackendKind, ConfigBuilder};
use crate::core::{Config, LanternError, Result};
use clap::Parser;
use std::path::PathBuf;

/// OpenTelemetry backend with Jaeger and Prometheus query APIs
#[derive(Parser, Debug, Default)]
#[command(name = "lantern")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// GRPC port for the OTLP receiver
    #[arg(long, env = "LANTERN_GRPC_PORT")]
    pub grpc_port: Option<u16>,

    /// HTTP port for the OTLP receiver
    #[arg(long, env = "LANTERN_HTTP_PORT")]
    pub http_port: Option<u16>,

    /// Port for the Jaeger and Prometheus query API
    #[arg(long, env = "LANTERN_QUERY_PORT")]
    pub query_port: Option<u16>,

    /// Configuration file path (default: ~/.config/lantern/config.yaml)
    #[arg(short, long, env = "LANTERN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Storage backend: memory or document
    #[arg(long, env = "LANTERN_BACKEND", value_parser = parse_backend)]
    pub backend: Option<BackendKind>,

    /// Segment directory for the document backend
    #[arg(long, env = "LANTERN_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, env = "LANTERN_DEBUG")]
    pub debug: bool,

    /// Validate configuration and exit
    #[arg(long)]
    pub check_config: bool,
}

fn parse_backend(value: &str) -> std::result::Result<BackendKind, String> {
    match value.to_ascii_lowercase().as_str() {
        "memory" => Ok(BackendKind::Memory),
        "document" => Ok(BackendKind::Document),
        other => Err(format!("unknown backend {:?}, expected memory or document", other)),
    }
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Load configuration with proper precedence:
    /// 1. CLI arguments and their environment variables
    /// 2. Config file
    /// 3. Defaults
    pub async fn load_config(&self) -> Result<Config> {
        let mut builder = ConfigBuilder::new();

        let config_path = match &self.config {
            Some(path) => path.clone(),
            None => match dirs::config_dir().map(|d| d.join("lantern").join("config.yaml")) {
                Some(path) if path.exists() => path,
                _ => return self.apply_overrides(builder),
            },
        };

        match tokio::fs::read_to_string(&config_path).await {
            Ok(content) => {
                builder = builder.from_yaml(&content)?;
                tracing::info!("Loaded configuration from {:?}", config_path);
            },
            Err(e) if self.config.is_some() => {
                return Err(LanternError::config(format!(
                    "Failed to read config file {:?}: {}",
                    config_path, e
                )));
            },
            Err(_) => {
                tracing::debug!("No config file found at {:?}, using defaults", config_path);
            },
        }

        self.apply_overrides(builder)
    }

    fn apply_overrides(&self, mut builder: ConfigBuilder) -> Result<Config> {
        if let Some(port) = self.grpc_port {
            builder = builder.grpc_port(port);
        }
        if let Some(port) = self.http_port {
            builder = builder.http_port(port);
        }
        if let Some(port) = self.query_port {
            builder = builder.query_port(port);
        }
        if let Some(backend) = self.backend {
            builder = builder.backend(backend);
        }
        if let Some(dir) = &self.data_dir {
            builder = builder.data_dir(dir.clone());
        }

        builder.debug(self.debug).build()
    }

    /// Initialize logging. `RUST_LOG` wins, then `--debug`, then
    /// `LANTERN_LOG_LEVEL`, then `info`.
    pub fn init_logging(&self) -> Result<()> {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

        let env_log_level =
            std::env::var("LANTERN_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let log_level = if self.debug {
            "debug"
        } else {
            env_log_level.as_str()
        };

        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(self.debug)
            .with_line_number(self.debug)
            .compact();

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| LanternError::config(format!("Failed to initialize logging: {}", e)))?;

        Ok(())
    }
}

/// Execute the Lantern command line.
pub async fn execute(cli: Cli) -> Result<()> {
    cli.init_logging()?;

    let config = cli.load_config().await?;

    if cli.check_config {
        println!("Configuration is valid!");
        println!("  GRPC port:  {}", config.server.grpc_port);
        println!("  HTTP port:  {}", config.server.http_port);
        println!("  Query port: {}", config.server.query_port);
        println!("  Backend:    {:?}", config.storage.backend);
        return Ok(());
    }

    crate::application::Application::new(config)?.run().await
}
