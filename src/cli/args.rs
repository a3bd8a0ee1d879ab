//! Command-line argument parsing

use crate::logging::LogFormat;
use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "registry-relay")]
#[command(about = "Reverse proxy for Docker Registry v2 upstreams with bearer-token relay")]
#[command(version, author)]
pub struct Args {
    /// Configuration file path
    #[arg(
        long = "config",
        short = 'c',
        help = "Path to a JSON configuration file"
    )]
    pub config: Option<String>,

    /// Listen address
    #[arg(
        long = "listen",
        short = 'l',
        help = "Address to listen on, e.g. 0.0.0.0:8080"
    )]
    pub listen: Option<String>,

    /// Base domain for the built-in route table
    #[arg(
        long = "domain",
        short = 'd',
        default_value = "localhost",
        help = "Base domain of the built-in routes (docker.<domain>, ghcr.<domain>, ...), used without --config"
    )]
    pub domain: String,

    /// Route unknown hosts to a fixed upstream
    #[arg(
        long = "debug",
        help = "Send requests for unknown hosts to --debug-upstream"
    )]
    pub debug: bool,

    #[arg(
        long = "debug-upstream",
        help = "Upstream used for unknown hosts in debug mode"
    )]
    pub debug_upstream: Option<String>,

    #[arg(
        long = "local-address",
        help = "Realm prefix advertised in debug mode, e.g. http://localhost:8080"
    )]
    pub local_address: Option<String>,

    /// Timeout in seconds for upstream calls
    #[arg(
        long = "timeout",
        short = 't',
        help = "Seconds to wait for upstream response headers"
    )]
    pub timeout: Option<u64>,

    /// Verbose output
    #[arg(
        long = "verbose",
        short = 'v',
        help = "Enable verbose output"
    )]
    pub verbose: bool,

    #[arg(
        long = "log-format",
        default_value = "text",
        help = "Log output format: text, json"
    )]
    pub log_format: String,

    /// Validate configuration and exit
    #[arg(
        long = "check-config",
        help = "Validate the configuration and exit without serving"
    )]
    pub check_config: bool,
}

impl Args {
    /// Validate arguments
    pub fn validate(&self) -> Result<(), String> {
        if let Some(path) = &self.config {
            if !std::path::Path::new(path).exists() {
                return Err(format!("Config file does not exist: {}", path));
            }
        }

        if self.timeout == Some(0) {
            return Err("Timeout must be greater than 0".to_string());
        }

        if self.domain.trim().is_empty() {
            return Err("Domain cannot be empty".to_string());
        }

        self.log_format()?;

        Ok(())
    }

    pub fn log_format(&self) -> Result<LogFormat, String> {
        self.log_format.parse()
    }

    /// Fill in settings the command line left unset from `REGISTRY_RELAY_*`
    pub fn from_env(mut self) -> Self {
        if self.config.is_none() {
            self.config = std::env::var("REGISTRY_RELAY_CONFIG").ok();
        }

        if self.listen.is_none() {
            self.listen = std::env::var("REGISTRY_RELAY_LISTEN").ok();
        }

        if self.debug_upstream.is_none() {
            self.debug_upstream = std::env::var("REGISTRY_RELAY_DEBUG_UPSTREAM").ok();
        }

        if self.timeout.is_none() {
            if let Ok(timeout) = std::env::var("REGISTRY_RELAY_TIMEOUT") {
                self.timeout = timeout.parse().ok();
            }
        }

        if std::env::var("REGISTRY_RELAY_DEBUG").is_ok() {
            self.debug = true;
        }

        if std::env::var("REGISTRY_RELAY_VERBOSE").is_ok() {
            self.verbose = true;
        }

        self
    }
}
