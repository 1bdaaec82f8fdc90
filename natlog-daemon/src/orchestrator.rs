//! Daemon orchestration -- wiring, startup ordering, and shutdown.
//!
//! The [`Orchestrator`] is the central coordinator of `natlog-daemon`.
//! It validates configuration, installs the metrics recorder, builds the
//! storage connection and the pipeline, serves the HTTP API, and waits
//! for a shutdown signal or a fatal pipeline error.
//!
//! # Startup Order
//!
//! 1. Metrics recorder (so every later component records)
//! 2. HTTP API listener bind
//! 3. Pipeline: rules compiled, storage pinged, collectors bound, tasks spawned
//! 4. HTTP API serving
//!
//! # Shutdown
//!
//! The pipeline is stopped first (cancels collectors, listener, and the batch
//! engine), then the API server and background tasks.

use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use natlog_core::config::NatlogConfig;
use natlog_core::metrics as m;
use natlog_core::pipeline::{HealthStatus, Pipeline};
use natlog_pipeline::{
    ClickHouseConfig, ClickHouseConnection, NatlogPipeline, NatlogPipelineBuilder,
    NatlogPipelineError, PipelineConfig, StorageConnection,
};

use crate::{api, metrics_server};

/// Interval between uptime gauge updates.
const UPTIME_UPDATE_SECS: u64 = 10;

/// The main daemon orchestrator.
pub struct Orchestrator<S: StorageConnection = ClickHouseConnection> {
    /// Loaded and validated configuration.
    config: NatlogConfig,
    /// The collection pipeline.
    pipeline: NatlogPipeline<S>,
    /// Fatal errors reported by pipeline tasks.
    fatal_rx: mpsc::Receiver<NatlogPipelineError>,
    /// Cancels daemon-level background tasks (API, uptime).
    cancel: CancellationToken,
    /// Daemon-level background tasks.
    tasks: Vec<JoinHandle<()>>,
    /// Bound HTTP API address, once started.
    api_addr: Option<SocketAddr>,
    /// Daemon start time (for uptime reporting).
    start_time: Instant,
}

/// Why the main loop ended.
#[derive(Debug)]
pub enum ShutdownReason {
    /// An OS signal or an external shutdown future completed.
    Signal(&'static str),
    /// A pipeline task hit an unrecoverable error.
    Fatal(NatlogPipelineError),
}

impl Orchestrator<ClickHouseConnection> {
    /// Load configuration from disk and build the orchestrator.
    ///
    /// # Errors
    ///
    /// - Configuration file cannot be read, parsed, or validated
    /// - The ClickHouse client cannot be built
    pub async fn build(config_path: &Path) -> Result<Self> {
        let config = NatlogConfig::load(config_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
        Self::build_from_config(config)
    }

    /// Build from an already-loaded configuration, connecting to ClickHouse.
    pub fn build_from_config(config: NatlogConfig) -> Result<Self> {
        let storage = ClickHouseConnection::new(ClickHouseConfig::from_core(&config.storage))
            .map_err(|e| anyhow::anyhow!("failed to create storage client: {}", e))?;
        tracing::info!(
            address = %config.storage.address,
            database = %config.storage.database,
            "storage client created"
        );
        Self::build_with_storage(config, Arc::new(storage))
    }
}

impl<S: StorageConnection> Orchestrator<S> {
    /// Build from configuration and an explicit storage connection.
    pub fn build_with_storage(config: NatlogConfig, storage: Arc<S>) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
            record_build_info();
        }

        let mut pipeline = NatlogPipelineBuilder::new()
            .config(PipelineConfig::from_core(&config))
            .storage(storage)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build pipeline: {}", e))?;
        let fatal_rx = pipeline
            .take_fatal_receiver()
            .ok_or_else(|| anyhow::anyhow!("pipeline fatal channel already taken"))?;

        tracing::info!("orchestrator initialized");

        Ok(Self {
            config,
            pipeline,
            fatal_rx,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
            api_addr: None,
            start_time: Instant::now(),
        })
    }

    /// Start everything and block until SIGTERM/SIGINT or a fatal error.
    ///
    /// # Errors
    ///
    /// Returns an error if startup fails or the pipeline reports a fatal
    /// error; the caller exits non-zero.
    pub async fn run(&mut self) -> Result<()> {
        let mut signals = ShutdownSignals::install()?;
        self.run_until(async move { signals.recv().await }).await
    }

    /// Start everything and block until `shutdown` completes or a fatal error.
    pub async fn run_until(&mut self, shutdown: impl Future<Output = &'static str>) -> Result<()> {
        self.start().await?;
        self.wait(shutdown).await
    }

    /// Bind the API, start the pipeline, and spawn background tasks.
    ///
    /// # Errors
    ///
    /// Returns an error if the API listener cannot be bound or the pipeline
    /// fails to start (rule errors, unreachable storage, bind failures).
    pub async fn start(&mut self) -> Result<()> {
        let api_listener = if self.config.api.enabled {
            Some(api::bind(&self.config.api.bind).await?)
        } else {
            None
        };

        self.pipeline
            .start()
            .await
            .map_err(|e| anyhow::anyhow!("failed to start pipeline: {}", e))?;

        if let Some(listener) = api_listener {
            let router = api::router(self.pipeline.storage());
            let (addr, task) = api::spawn_server(listener, router, self.cancel.clone())?;
            self.api_addr = Some(addr);
            self.tasks.push(task);
        }
        if self.config.metrics.enabled {
            self.tasks
                .push(spawn_uptime_updater(self.start_time, self.cancel.clone()));
        }

        tracing::info!("natlog-daemon running");
        Ok(())
    }

    /// Block until `shutdown` completes or a fatal error, then shut down.
    pub async fn wait(&mut self, shutdown: impl Future<Output = &'static str>) -> Result<()> {
        let reason = tokio::select! {
            signal = shutdown => ShutdownReason::Signal(signal),
            fatal = self.fatal_rx.recv() => match fatal {
                Some(e) => ShutdownReason::Fatal(e),
                None => ShutdownReason::Fatal(NatlogPipelineError::Channel(
                    "fatal error channel closed".to_owned(),
                )),
            },
        };

        match &reason {
            ShutdownReason::Signal(signal) => {
                tracing::info!(signal = signal, "shutdown signal received");
            }
            ShutdownReason::Fatal(e) => {
                tracing::error!(error = %e, "fatal pipeline error, shutting down");
            }
        }

        self.shutdown().await;

        match reason {
            ShutdownReason::Signal(_) => Ok(()),
            ShutdownReason::Fatal(e) => Err(anyhow::anyhow!("pipeline failed: {}", e)),
        }
    }

    async fn shutdown(&mut self) {
        if let Err(e) = self.pipeline.stop().await {
            tracing::error!(error = %e, "failed to stop pipeline");
        }

        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "background task ended abnormally");
            }
        }
        tracing::info!(
            uptime_secs = self.start_time.elapsed().as_secs(),
            "natlog-daemon shut down"
        );
    }

    /// Current pipeline health.
    pub async fn health(&self) -> HealthStatus {
        self.pipeline.health_check().await
    }

    /// Bound HTTP API address, if the API is enabled and started.
    pub fn api_addr(&self) -> Option<SocketAddr> {
        self.api_addr
    }

    /// The pipeline this orchestrator drives.
    pub fn pipeline(&self) -> &NatlogPipeline<S> {
        &self.pipeline
    }

    /// Get a reference to the loaded configuration.
    pub fn config(&self) -> &NatlogConfig {
        &self.config
    }
}

/// SIGTERM and SIGINT handlers.
struct ShutdownSignals {
    sigterm: tokio::signal::unix::Signal,
    sigint: tokio::signal::unix::Signal,
}

impl ShutdownSignals {
    fn install() -> Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        Ok(Self {
            sigterm: signal(SignalKind::terminate())
                .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?,
            sigint: signal(SignalKind::interrupt())
                .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?,
        })
    }

    /// Wait for either signal and return its name.
    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.sigterm.recv() => "SIGTERM",
            _ = self.sigint.recv() => "SIGINT",
        }
    }
}

/// Record the build info gauge (always 1, with version label).
fn record_build_info() {
    metrics::gauge!(m::DAEMON_BUILD_INFO, "version" => env!("CARGO_PKG_VERSION")).set(1.0);
}

/// Spawn a background task that periodically updates the uptime metric.
fn spawn_uptime_updater(start_time: Instant, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(tokio::time::Duration::from_secs(UPTIME_UPDATE_SECS));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    #[allow(clippy::cast_precision_loss)]
                    metrics::gauge!(m::DAEMON_UPTIME_SECONDS).set(start_time.elapsed().as_secs() as f64);
                }
                () = cancel.cancelled() => {
                    tracing::debug!("uptime updater shutting down");
                    break;
                }
            }
        }
    })
}
