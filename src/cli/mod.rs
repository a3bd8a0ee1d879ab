//! Command line interface module
//!
//! Argument parsing, the configuration file model and the runner that
//! validates both and starts the server.

pub mod args;
pub mod config;
pub mod runner;

pub use args::Args;
pub use config::{ProxyConfig, RouteConfig};
pub use runner::Runner;
