//! CLI argument definitions for natlog-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::Parser;

use natlog_core::config::NatlogConfig;

/// NAT log collector daemon.
///
/// Receives syslog from NAT devices, extracts fields with regex rules,
/// and stores typed rows in ClickHouse in batches.
#[derive(Parser, Debug)]
#[command(name = "natlog-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to natlog.toml configuration file.
    #[arg(short, long, default_value = "/etc/natlog/natlog.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate configuration file and exit without starting the daemon.
    #[arg(long)]
    pub validate: bool,
}

impl DaemonCli {
    /// Apply command-line overrides on top of a loaded configuration.
    pub fn apply_overrides(&self, config: &mut NatlogConfig) {
        if let Some(level) = &self.log_level {
            config.general.log_level.clone_from(level);
        }
        if let Some(format) = &self.log_format {
            config.general.log_format.clone_from(format);
        }
    }
}
