//! Runner: turns parsed arguments into a validated configuration and serves it

use crate::cli::args::Args;
use crate::cli::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::logging::Logger;
use crate::proxy::server::{Relay, build_router};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

pub struct Runner {
    config: ProxyConfig,
    check_only: bool,
    output: Logger,
}

impl Runner {
    pub fn new(args: Args) -> Result<Self> {
        let output = Logger::new("runner", args.verbose);
        args.validate().map_err(ProxyError::Config)?;

        let config = Self::build_config(&args)?;
        config.validate()?;

        Ok(Self {
            config,
            check_only: args.check_config,
            output,
        })
    }

    /// File (or built-in routes), then command-line overrides
    fn build_config(args: &Args) -> Result<ProxyConfig> {
        let mut config = match &args.config {
            Some(path) => ProxyConfig::load(Path::new(path))?,
            None => ProxyConfig {
                routes: ProxyConfig::default_routes(&args.domain),
                ..ProxyConfig::default()
            },
        };

        if let Some(listen) = &args.listen {
            config.listen = listen.clone();
        }
        if args.debug {
            config.debug = true;
        }
        if let Some(upstream) = &args.debug_upstream {
            config.debug_upstream = Some(upstream.clone());
        }
        if let Some(local) = &args.local_address {
            config.local_address = Some(local.clone());
        }
        if let Some(timeout) = args.timeout {
            config.upstream_timeout_secs = timeout;
        }
        Ok(config)
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub async fn run(self) -> Result<()> {
        self.print_summary();
        if self.check_only {
            self.output.info("Configuration is valid");
            return Ok(());
        }

        let addr: SocketAddr = self
            .config
            .listen
            .parse()
            .map_err(|e| ProxyError::Config(format!("Invalid listen address {}: {}", self.config.listen, e)))?;

        let relay = Arc::new(Relay::new(self.config.clone(), self.output.scoped("relay"))?);
        let app = build_router(relay);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        self.output.info(&format!("Listening on {}", listener.local_addr()?));

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(self.output.clone()))
            .await?;

        self.output.info("Server stopped");
        Ok(())
    }

    fn print_summary(&self) {
        let mut items = vec![
            ("Listen", self.config.listen.clone()),
            ("Routes", self.config.routes.len().to_string()),
            (
                "Upstream timeout",
                format!("{}s", self.config.upstream_timeout_secs),
            ),
        ];
        if self.config.debug {
            items.push((
                "Debug upstream",
                self.config.debug_upstream.clone().unwrap_or_default(),
            ));
        }
        self.output.summary("Registry relay configuration", &items);

        for route in &self.config.routes {
            let kind = route
                .kind
                .map(|k| format!(" ({:?})", k))
                .unwrap_or_default();
            self.output
                .detail(&format!("{} -> {}{}", route.host, route.upstream, kind));
        }
    }
}

async fn shutdown_signal(output: Logger) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => output.info("Shutdown signal received, draining connections"),
        Err(e) => output.error(&format!("Failed to listen for shutdown signal: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_builtin_routes_under_domain() {
        let args = Args::parse_from(["registry-relay", "--domain", "mirror.test"]);
        let runner = Runner::new(args).unwrap();
        let hosts: Vec<&str> = runner
            .config()
            .routes
            .iter()
            .map(|r| r.host.as_str())
            .collect();
        assert!(hosts.contains(&"docker.mirror.test"));
        assert!(hosts.contains(&"ghcr.mirror.test"));
    }

    #[test]
    fn test_overrides_applied() {
        let args = Args::parse_from([
            "registry-relay",
            "--listen",
            "127.0.0.1:9000",
            "--timeout",
            "7",
            "--debug",
            "--debug-upstream",
            "https://quay.io",
        ]);
        let runner = Runner::new(args).unwrap();
        assert_eq!(runner.config().listen, "127.0.0.1:9000");
        assert_eq!(runner.config().upstream_timeout_secs, 7);
        assert!(runner.config().debug);
    }

    #[test]
    fn test_debug_without_upstream_rejected() {
        let args = Args::parse_from(["registry-relay", "--debug"]);
        assert!(matches!(Runner::new(args), Err(ProxyError::Config(_))));
    }
}
