//! The relay itself: routing, forwarding and response rewriting
//!
//! Registry-specific authentication lives in [`crate::registry`]; this module
//! owns the HTTP plumbing around it.

pub mod context;
pub mod forward;
pub mod rewrite;
pub mod routes;
pub mod server;
pub mod transport;

pub use context::{Endpoint, ProxyRequestContext};
pub use routes::{Route, RouteTable, UpstreamKind};
pub use server::{Relay, build_router};
