//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, tracing, limits)
//!     → request.rs (method check, path segments, header filtering)
//!     → forward.rs (one upstream call, no retry)
//!     → response.rs (relay status, content type, body)
//!     → error.rs (typed failures → 500 JSON or relayed upstream reply)
//!     → Send to client
//! ```

pub mod error;
pub mod forward;
pub mod request;
pub mod response;
pub mod server;

pub use error::{ProxyError, SetupError};
pub use forward::{forward, Upstream};
pub use request::{ForwardMethod, InboundRequest};
pub use response::UpstreamReply;
pub use server::{AppState, HttpServer, X_REQUEST_ID};
