//! Proxy errors and their wire representation.
//!
//! Every failure on the forwarding path is a [`ProxyError`]. The only place
//! it becomes bytes on the wire is its `IntoResponse` impl.

use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{BoxError, Json};
use serde::Serialize;
use thiserror::Error;

use crate::http::response::UpstreamReply;

/// Label carried by every synthesized 500 body.
pub const INTERNAL_ERROR_LABEL: &str = "Internal Server Error";

/// Detail used when an error has no message of its own.
pub const UNKNOWN_ERROR: &str = "Unknown error";

/// Failures while forwarding a request.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The upstream could not be reached, or its body could not be read.
    #[error("{}", chain_of(.source))]
    Network {
        url: String,
        #[source]
        source: BoxError,
    },

    /// The upstream answered with a non-2xx status.
    #[error("upstream answered {}", .0.status)]
    UpstreamStatus(UpstreamReply),

    /// The inbound request could not be turned into an upstream request.
    #[error("{reason}")]
    MalformedRequest { reason: String },

    /// The method is not one the gateway forwards.
    #[error("method {0} is not forwarded")]
    UnsupportedMethod(Method),
}

/// JSON body of a synthesized error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub details: String,
}

impl ProxyError {
    pub fn network(uri: &Uri, source: impl Into<BoxError>) -> Self {
        Self::Network {
            url: uri.to_string(),
            source: source.into(),
        }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedRequest {
            reason: reason.into(),
        }
    }

    /// Status code the caller will see.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::UpstreamStatus(reply) => reply.status,
            Self::UnsupportedMethod(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::Network { .. } | Self::MalformedRequest { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short label used for metrics.
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Network { .. } => "network",
            Self::UpstreamStatus(_) => "upstream_status",
            Self::MalformedRequest { .. } => "malformed",
            Self::UnsupportedMethod(_) => "rejected",
        }
    }

    /// The error message, or [`UNKNOWN_ERROR`] when it is empty.
    pub fn details(&self) -> String {
        let message = self.to_string();
        if message.trim().is_empty() {
            UNKNOWN_ERROR.to_string()
        } else {
            message
        }
    }

    /// Emit the log line matching the severity of this error.
    pub fn log(&self) {
        match self {
            Self::Network { url, .. } => {
                tracing::error!(url = %url, error = %self.details(), "Upstream request failed");
            }
            Self::UpstreamStatus(reply) => {
                tracing::warn!(status = %reply.status, "Upstream returned an error status");
            }
            Self::MalformedRequest { .. } => {
                tracing::error!(error = %self.details(), "Malformed request");
            }
            Self::UnsupportedMethod(method) => {
                tracing::debug!(method = %method, "Method not forwarded");
            }
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        match self {
            Self::UpstreamStatus(reply) => reply.into_response(),
            Self::UnsupportedMethod(_) => {
                let body = ErrorBody {
                    error: "Method Not Allowed",
                    details: self.details(),
                };
                (StatusCode::METHOD_NOT_ALLOWED, Json(body)).into_response()
            }
            Self::Network { .. } | Self::MalformedRequest { .. } => {
                let body = ErrorBody {
                    error: INTERNAL_ERROR_LABEL,
                    details: self.details(),
                };
                (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
            }
        }
    }
}

fn chain_of(source: &BoxError) -> String {
    let source: &(dyn std::error::Error + 'static) = &**source;
    error_chain(source)
}

/// Join an error with its sources: `outer: inner: root`.
fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(inner) = source {
        let text = inner.to_string();
        if !text.is_empty() && !message.contains(&text) {
            if !message.is_empty() {
                message.push_str(": ");
            }
            message.push_str(&text);
        }
        source = inner.source();
    }
    message
}

/// Errors while building the gateway's shared state.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("invalid upstream configuration: {0}")]
    Upstream(String),
}
