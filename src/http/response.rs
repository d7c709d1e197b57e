//! Response handling and transformation.
//!
//! # Responsibilities
//! - Read the upstream response in full (status, content type, body)
//! - Relay it to the client without re-parsing the body
//! - Default the content type to `application/json`
//!
//! # Design Decisions
//! - Body bytes are relayed as-is; nothing is decoded or re-encoded
//! - `Content-Encoding` travels with the body it describes

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use hyper::body::Incoming;

/// Content type used when the upstream does not send one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// A fully read upstream response.
#[derive(Debug, Clone)]
pub struct UpstreamReply {
    pub status: StatusCode,
    pub content_type: Option<HeaderValue>,
    pub content_encoding: Option<HeaderValue>,
    pub body: Bytes,
}

impl UpstreamReply {
    /// Read status, relevant headers and the whole body.
    pub async fn read(response: hyper::Response<Incoming>) -> Result<Self, axum::Error> {
        let (parts, body) = response.into_parts();
        let content_type = parts.headers.get(header::CONTENT_TYPE).cloned();
        let content_encoding = parts.headers.get(header::CONTENT_ENCODING).cloned();
        let body = axum::body::to_bytes(Body::new(body), usize::MAX).await?;
        let status = parts.status;

        Ok(Self {
            status,
            content_type,
            content_encoding,
            body,
        })
    }

    /// Content type relayed to the client.
    pub fn content_type(&self) -> HeaderValue {
        self.content_type
            .clone()
            .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_CONTENT_TYPE))
    }

    /// Body preview for trace logs.
    pub fn preview(&self, limit: usize) -> String {
        body_preview(&self.body, limit)
    }
}

impl IntoResponse for UpstreamReply {
    fn into_response(self) -> Response {
        let content_type = self.content_type();
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        response.headers_mut().insert(header::CONTENT_TYPE, content_type);
        if let Some(encoding) = self.content_encoding {
            response.headers_mut().insert(header::CONTENT_ENCODING, encoding);
        }
        response
    }
}

/// Lossy UTF-8 view of at most `limit` bytes.
pub fn body_preview(body: &[u8], limit: usize) -> String {
    if body.len() <= limit {
        String::from_utf8_lossy(body).into_owned()
    } else {
        format!("{}… ({} bytes)", String::from_utf8_lossy(&body[..limit]), body.len())
    }
}
