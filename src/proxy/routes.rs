//! Host-based routing table and upstream resolution

use crate::cli::config::{ProxyConfig, RouteConfig};
use crate::error::{ProxyError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use url::Url;

/// Hostname of the flagship registry's API endpoint
pub const DOCKER_HUB_REGISTRY_HOST: &str = "registry-1.docker.io";

/// How an upstream is treated by the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamKind {
    /// Library-namespace canonicalization, blob-redirect resolution, unsigned-payload marker
    DockerHub,
    /// Any other v2 registry: challenge relay, redirects followed
    Registry,
    /// No registry semantics at all (download mirrors, plain APIs)
    Passthrough,
}

impl UpstreamKind {
    /// Infer the kind from the upstream URL when the configuration leaves it out
    pub fn detect(upstream: &Url) -> Self {
        match upstream.host_str() {
            Some(host) if host.eq_ignore_ascii_case(DOCKER_HUB_REGISTRY_HOST) => {
                UpstreamKind::DockerHub
            }
            _ => UpstreamKind::Registry,
        }
    }

    pub fn is_docker_hub(self) -> bool {
        self == UpstreamKind::DockerHub
    }

    pub fn speaks_registry_auth(self) -> bool {
        self != UpstreamKind::Passthrough
    }
}

/// One proxy hostname bound to one upstream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub upstream: Url,
    pub kind: UpstreamKind,
}

impl Route {
    pub fn new(upstream: Url, kind: Option<UpstreamKind>) -> Self {
        let kind = kind.unwrap_or_else(|| UpstreamKind::detect(&upstream));
        Self { upstream, kind }
    }

    /// Upstream base without a trailing slash, ready for path concatenation
    pub fn base(&self) -> &str {
        self.upstream.as_str().trim_end_matches('/')
    }

    /// `host[:port]` as it appears inside upstream URLs and bodies
    pub fn upstream_authority(&self) -> String {
        let host = self.upstream.host_str().unwrap_or_default();
        match self.upstream.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }
}

/// Immutable routing table, built once at startup
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: HashMap<String, Route>,
    debug_fallback: Option<Route>,
}

impl RouteTable {
    pub fn from_config(config: &ProxyConfig) -> Result<Self> {
        let mut routes = HashMap::new();
        for entry in &config.routes {
            let (host, route) = Self::build_route(entry)?;
            if routes.insert(host.clone(), route).is_some() {
                return Err(ProxyError::Config(format!("Duplicate route for host: {}", host)));
            }
        }

        let debug_fallback = match (config.debug, &config.debug_upstream) {
            (true, Some(upstream)) => {
                let url = Url::parse(upstream).map_err(|e| {
                    ProxyError::Config(format!("Invalid debug upstream {}: {}", upstream, e))
                })?;
                Some(Route::new(url, None))
            }
            _ => None,
        };

        Ok(Self {
            routes,
            debug_fallback,
        })
    }

    fn build_route(entry: &RouteConfig) -> Result<(String, Route)> {
        let url = Url::parse(&entry.upstream).map_err(|e| {
            ProxyError::Config(format!("Invalid upstream {} for {}: {}", entry.upstream, entry.host, e))
        })?;
        Ok((normalize_host(&entry.host), Route::new(url, entry.kind)))
    }

    /// Resolve an inbound `Host` value. Unknown hosts fall back to the debug
    /// upstream only when one is configured.
    pub fn resolve(&self, host: &str) -> Option<&Route> {
        self.routes
            .get(&normalize_host(host))
            .or(self.debug_fallback.as_ref())
    }

    /// Resolve or produce the diagnostic 404 error
    pub fn resolve_or_error(&self, host: &str) -> Result<&Route> {
        self.resolve(host).ok_or_else(|| ProxyError::UnknownHost {
            host: host.to_string(),
            routes: self.known_routes(),
        })
    }

    /// Hostname → upstream listing for diagnostics, in stable order
    pub fn known_routes(&self) -> BTreeMap<String, String> {
        self.routes
            .iter()
            .map(|(host, route)| (host.clone(), route.base().to_string()))
            .collect()
    }
}

/// Lowercase and strip any `:port` suffix (bracketed IPv6 literals kept intact)
pub fn normalize_host(host: &str) -> String {
    let host = host.trim();
    let without_port = if host.starts_with('[') {
        match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        }
    } else {
        match host.rsplit_once(':') {
            Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
            _ => host,
        }
    };
    without_port.trim_end_matches('.').to_ascii_lowercase()
}
