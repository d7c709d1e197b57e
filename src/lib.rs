//! API gateway for the content planning dashboard.
//!
//! Relays every request under `/api/` to one upstream JSON API and relays
//! the answer back, so the browser only ever talks to a single origin.

pub mod admin;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;

pub use config::schema::GatewayConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
