//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Request handlers and background tasks produce:
//!     → logging.rs (structured log events, per-request spans)
//!     → metrics.rs (counters, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Request ID flows through every log line of a request
//! - Metrics are cheap (no-ops until a recorder is installed)

pub mod logging;
pub mod metrics;
