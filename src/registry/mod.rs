//! Registry module for Docker Registry HTTP API v2 authentication
//!
//! Challenge parsing, scope canonicalization, the `/v2/` capability probe and
//! the token relay. None of it holds state: every request rediscovers the
//! upstream realm.

pub mod auth;
pub mod challenge;
pub mod scope;
pub mod token;

pub use auth::{AuthProber, ProbeResult};
pub use challenge::AuthChallenge;
pub use token::TokenRelay;
