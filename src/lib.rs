//! Registry Relay Library
//!
//! A stateless reverse proxy for Docker Registry v2 upstreams. Each proxy
//! hostname maps to one upstream; the relay answers the `/v2/` version check
//! with a challenge pointing at its own `/v2/auth`, forwards token requests to
//! the upstream's real realm with canonical scopes, and forwards everything
//! else with upstream hostnames rewritten to the proxy's.

pub mod cli;
pub mod error;
pub mod logging;
pub mod proxy;
pub mod registry;

pub use cli::{Args, ProxyConfig, RouteConfig, Runner};
pub use error::{ProxyError, Result};
pub use logging::Logger;
pub use proxy::{Relay, build_router};
