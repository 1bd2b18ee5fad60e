// src/config.rs

//! Manages server configuration: loading, resolving derived values, and validation.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::num::NonZeroUsize;
use std::time::Duration;
use tracing::{info, warn};

/// Socket-level settings for the multiplexer.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NetworkConfig {
    /// How long one multiplexer iteration waits for readiness before it
    /// re-checks for shutdown.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Disable Nagle's algorithm on accepted sockets.
    #[serde(default = "default_tcp_nodelay")]
    pub tcp_nodelay: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            tcp_nodelay: default_tcp_nodelay(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    200
}
fn default_tcp_nodelay() -> bool {
    true
}

/// Sizes of the three worker pools and the optional dispatch deadline.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_receive_workers")]
    pub receive_workers: usize,
    /// `0` sizes the pool from the available hardware parallelism.
    #[serde(default)]
    pub dispatch_workers: usize,
    /// `0` sizes the pool from the available hardware parallelism.
    #[serde(default)]
    pub send_workers: usize,
    /// Deadline for one command execution in milliseconds. `0` disables it.
    #[serde(default)]
    pub dispatch_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            receive_workers: default_receive_workers(),
            dispatch_workers: 0,
            send_workers: 0,
            dispatch_timeout_ms: 0,
        }
    }
}

fn default_receive_workers() -> usize {
    4
}

impl PipelineConfig {
    pub fn resolved_dispatch_workers(&self) -> usize {
        resolve_workers(self.dispatch_workers)
    }

    pub fn resolved_send_workers(&self) -> usize {
        resolve_workers(self.send_workers)
    }

    pub fn dispatch_timeout(&self) -> Option<Duration> {
        (self.dispatch_timeout_ms > 0).then(|| Duration::from_millis(self.dispatch_timeout_ms))
    }
}

fn resolve_workers(configured: usize) -> usize {
    if configured > 0 {
        return configured;
    }
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(4)
}

/// Configuration for the Prometheus metrics exporter.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct MetricsConfig {
    /// If true, an HTTP server will be started to expose Prometheus metrics.
    #[serde(default)]
    pub enabled: bool,
    /// The port for the Prometheus metrics server.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_port() -> u16 {
    9464
}

/// The configuration as written in the TOML file.
#[derive(Deserialize, Debug)]
struct RawConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default = "default_max_clients")]
    max_clients: usize,
    #[serde(default)]
    network: NetworkConfig,
    #[serde(default)]
    pipeline: PipelineConfig,
    #[serde(default)]
    metrics: MetricsConfig,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    5454
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_max_clients() -> usize {
    10000
}

/// Represents the final, validated server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub max_clients: usize,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            max_clients: default_max_clients(),
            network: NetworkConfig::default(),
            pipeline: PipelineConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Creates a new `Config` instance by reading and parsing a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        Self::from_toml_str(&contents).with_context(|| format!("Invalid config file '{path}'"))
    }

    /// Parses and validates configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(contents).context("Failed to parse TOML")?;

        let config = Config {
            host: raw.host,
            port: raw.port,
            log_level: raw.log_level,
            max_clients: raw.max_clients,
            network: raw.network,
            pipeline: raw.pipeline,
            metrics: raw.metrics,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.network.poll_interval_ms)
    }

    /// Validates the configuration to ensure logical consistency.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(anyhow!("port cannot be 0"));
        }
        if self.host.trim().is_empty() {
            return Err(anyhow!("host cannot be empty"));
        }
        if self.max_clients == 0 {
            return Err(anyhow!("max_clients cannot be 0"));
        }
        if self.network.poll_interval_ms == 0 {
            return Err(anyhow!("network.poll_interval_ms cannot be 0"));
        }
        if self.network.poll_interval_ms > 5_000 {
            warn!(
                "network.poll_interval_ms is {} ms; shutdown will be slow to take effect.",
                self.network.poll_interval_ms
            );
        }
        if self.pipeline.receive_workers == 0 {
            return Err(anyhow!("pipeline.receive_workers cannot be 0"));
        }

        if self.metrics.enabled {
            if self.metrics.port == 0 {
                return Err(anyhow!("metrics.port cannot be 0"));
            }
            if self.metrics.port == self.port {
                return Err(anyhow!(
                    "metrics.port cannot be the same as the main server port"
                ));
            }
        }
        Ok(())
    }

    /// Logs key configuration parameters at startup.
    pub fn log_summary(&self) {
        info!(
            "Pipeline: {} receive / {} dispatch / {} send workers.",
            self.pipeline.receive_workers,
            self.pipeline.resolved_dispatch_workers(),
            self.pipeline.resolved_send_workers()
        );
        match self.pipeline.dispatch_timeout() {
            Some(limit) => info!("Dispatch deadline set to {} ms.", limit.as_millis()),
            None => warn!("No dispatch deadline: a stuck command holds its connection indefinitely."),
        }
    }
}
