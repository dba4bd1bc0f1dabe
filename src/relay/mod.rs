//! Reverse-proxy relay between the gift page and the upstream authority.
//!
//! The relay accepts the page's validation and business calls, attaches
//! the caller's address and user agent, and forwards them to `BACKEND_URL`.
//! Upstream answers pass through untouched; failures to get an answer are
//! mapped to fixed JSON bodies.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use giftgate::relay::{RelayConfig, relay_routes};
//!
//! let config = RelayConfig::from_env()?;
//! let app = axum::Router::new().merge(relay_routes(config));
//! ```

mod config;
mod error;
mod extractor;
mod routes;
mod state;

pub use config::RelayConfig;
pub use error::{Capability, RelayError};
pub use extractor::CallerIdentity;
pub use routes::{relay_routes, serve};
