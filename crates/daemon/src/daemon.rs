//! Daemon startup and main loop for the recast daemon
//!
//! Provides the daemon entry point, startup sequence, and the sweep loop.

use crate::config::{Config, ConfigError};
use crate::pipeline::{Pipeline, SweepReport};
use crate::startup::{run_startup_checks, StartupError};
use crate::tool::ToolRunner;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

/// Error type for daemon operations
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Startup check failed
    #[error("Startup check failed: {0}")]
    Startup(#[from] StartupError),

    /// A sweep task panicked or was cancelled
    #[error("Sweep aborted: {0}")]
    Sweep(String),
}

/// Daemon state containing all runtime components
pub struct Daemon {
    /// Configuration loaded from file and environment
    pub config: Config,
    pipeline: Arc<Pipeline>,
}

impl Daemon {
    /// Initialize the daemon with configuration from file
    ///
    /// This performs the full startup sequence:
    /// 1. Load config from file
    /// 2. Apply environment overrides and validate
    /// 3. Run startup checks (tool availability, missing paths)
    pub fn new<P: AsRef<Path>>(config_path: P) -> Result<Self, DaemonError> {
        let config = Config::load(config_path)?;
        Self::with_config(config)
    }

    /// Initialize the daemon with an existing configuration
    pub fn with_config(config: Config) -> Result<Self, DaemonError> {
        run_startup_checks(&config)?;
        Ok(Self::new_without_checks(config))
    }

    /// Initialize the daemon without running startup checks
    ///
    /// Useful when the external tools are known to be present, or in tests.
    pub fn new_without_checks(config: Config) -> Self {
        let pipeline = Arc::new(Pipeline::with_process_runner(config.clone()));
        Self { config, pipeline }
    }

    /// Initialize the daemon around a custom tool runner
    pub fn with_runner(config: Config, runner: Arc<dyn ToolRunner>) -> Self {
        let pipeline = Arc::new(Pipeline::new(config.clone(), runner));
        Self { config, pipeline }
    }

    pub fn pipeline(&self) -> Arc<Pipeline> {
        self.pipeline.clone()
    }

    /// Run a single sweep on its own task.
    ///
    /// A panic anywhere inside the sweep is caught at the task boundary and
    /// returned as [`DaemonError::Sweep`].
    pub async fn run_once(&self) -> Result<SweepReport, DaemonError> {
        let pipeline = self.pipeline.clone();
        let report = tokio::spawn(async move { pipeline.run_sweep().await })
            .await
            .map_err(|e| DaemonError::Sweep(e.to_string()))?;

        info!(
            discovered = report.discovered(),
            completed = report.completed(),
            abandoned = report.abandoned(),
            rejected = report.rejected(),
            "sweep complete"
        );
        Ok(report)
    }

    /// Run the daemon main loop
    ///
    /// Sweeps every segment, sleeps for the idle interval, and repeats until
    /// the process is stopped. A failed sweep is logged and the loop goes on.
    pub async fn run(&self) -> Result<(), DaemonError> {
        let idle = self.config.library.idle_interval();
        info!(
            segments = self.config.library.segments.len(),
            idle_secs = idle.as_secs(),
            "daemon started"
        );
        loop {
            if let Err(e) = self.run_once().await {
                error!(error = %e, "sweep failed, retrying after idle interval");
            }
            tokio::time::sleep(idle).await;
        }
    }
}
