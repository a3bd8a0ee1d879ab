//! Configuration management module

use crate::error::{ProxyError, Result};
use crate::proxy::routes::UpstreamKind;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Flagship registry API endpoint
pub const DOCKER_HUB_UPSTREAM: &str = "https://registry-1.docker.io";

/// One `host -> upstream` entry of the routing table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    pub host: String,
    pub upstream: String,
    /// Detected from the upstream URL when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<UpstreamKind>,
}

impl RouteConfig {
    pub fn new(host: impl Into<String>, upstream: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            upstream: upstream.into(),
            kind: None,
        }
    }

    pub fn with_kind(mut self, kind: UpstreamKind) -> Self {
        self.kind = Some(kind);
        self
    }
}

/// Proxy configuration, immutable once the server starts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub listen: String,
    pub routes: Vec<RouteConfig>,
    /// Route unknown hosts to `debug_upstream`
    pub debug: bool,
    pub debug_upstream: Option<String>,
    /// Realm prefix advertised in debug mode, e.g. `http://localhost:8080`
    pub local_address: Option<String>,
    /// Scheme clients use to reach the proxy (TLS is terminated in front of it)
    pub public_scheme: String,
    pub upstream_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Largest textual body buffered for hostname rewriting
    pub max_rewrite_bytes: usize,
    pub user_agent: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
            routes: Vec::new(),
            debug: false,
            debug_upstream: None,
            local_address: None,
            public_scheme: "https".to_string(),
            upstream_timeout_secs: 30,
            connect_timeout_secs: 10,
            max_rewrite_bytes: 8 * 1024 * 1024,
            user_agent: concat!("registry-relay/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl ProxyConfig {
    /// Load a JSON configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::Config(format!("Cannot read config file {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
            .map_err(|e| ProxyError::Config(format!("Invalid config file {}: {}", path.display(), e)))
    }

    pub fn from_json(content: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }

    /// The classic mirror set, one subdomain per upstream under `domain`
    pub fn default_routes(domain: &str) -> Vec<RouteConfig> {
        vec![
            RouteConfig::new(format!("docker.{}", domain), DOCKER_HUB_UPSTREAM),
            RouteConfig::new(format!("quay.{}", domain), "https://quay.io"),
            RouteConfig::new(format!("gcr.{}", domain), "https://gcr.io"),
            RouteConfig::new(format!("k8s-gcr.{}", domain), "https://k8s.gcr.io"),
            RouteConfig::new(format!("k8s.{}", domain), "https://registry.k8s.io"),
            RouteConfig::new(format!("ghcr.{}", domain), "https://ghcr.io"),
            RouteConfig::new(format!("cloudsmith.{}", domain), "https://docker.cloudsmith.io"),
            RouteConfig::new(format!("ecr.{}", domain), "https://public.ecr.aws"),
            RouteConfig::new(format!("docker-ce.{}", domain), "https://download.docker.com")
                .with_kind(UpstreamKind::Passthrough),
            RouteConfig::new(format!("translate.{}", domain), "https://translate.googleapis.com")
                .with_kind(UpstreamKind::Passthrough),
        ]
    }

    pub fn validate(&self) -> Result<()> {
        if self.routes.is_empty() && !self.debug {
            return Err(ProxyError::Config(
                "At least one route is required".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for route in &self.routes {
            if route.host.trim().is_empty() {
                return Err(ProxyError::Config("Route host cannot be empty".to_string()));
            }
            if !seen.insert(route.host.to_ascii_lowercase()) {
                return Err(ProxyError::Config(format!(
                    "Duplicate route for host: {}",
                    route.host
                )));
            }
            validate_upstream(&route.upstream)?;
        }

        if self.debug {
            match &self.debug_upstream {
                Some(upstream) => validate_upstream(upstream)?,
                None => {
                    return Err(ProxyError::Config(
                        "Debug mode requires debug_upstream".to_string(),
                    ));
                }
            }
        }

        if self.public_scheme != "http" && self.public_scheme != "https" {
            return Err(ProxyError::Config(format!(
                "public_scheme must be http or https, got {}",
                self.public_scheme
            )));
        }

        if self.upstream_timeout_secs == 0 || self.connect_timeout_secs == 0 {
            return Err(ProxyError::Config(
                "Timeouts must be greater than 0".to_string(),
            ));
        }

        if self.listen.parse::<std::net::SocketAddr>().is_err() {
            return Err(ProxyError::Config(format!(
                "Invalid listen address: {}",
                self.listen
            )));
        }

        Ok(())
    }
}

fn validate_upstream(upstream: &str) -> Result<()> {
    if !upstream.starts_with("http://") && !upstream.starts_with("https://") {
        return Err(ProxyError::Config(format!(
            "Invalid upstream: {}. Must start with http:// or https://",
            upstream
        )));
    }
    url::Url::parse(upstream)
        .map_err(|e| ProxyError::Config(format!("Invalid upstream {}: {}", upstream, e)))?;
    Ok(())
}
