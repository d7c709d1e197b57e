//! Request handling and transformation.
//!
//! # Responsibilities
//! - Restrict forwarding to GET, POST, PUT, DELETE, PATCH
//! - Split the inbound path into segments below the API prefix
//! - Build the upstream URL (base + prefix + segments + raw query)
//! - Filter headers the outbound client must recompute (Host, framing)
//!
//! # Design Decisions
//! - The query string is forwarded verbatim, never re-encoded
//! - Bodies are read in full and bounded by `security.max_body_size`
//! - Dot segments are refused so a request cannot climb out of the prefix

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, HeaderName, Method, Request, Uri};
use url::Url;

use crate::http::error::ProxyError;

/// Headers that never travel upstream unchanged.
///
/// `Host` must name the upstream; the framing headers describe the inbound
/// connection and the client recomputes them for the body it actually sends.
const STRIPPED_HEADERS: [HeaderName; 4] = [
    header::HOST,
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
    header::CONNECTION,
];

/// Header values hidden from trace logs, and dropped on a cross-host redirect.
pub const REDACTED_HEADERS: [HeaderName; 3] = [
    header::AUTHORIZATION,
    header::COOKIE,
    header::PROXY_AUTHORIZATION,
];

/// Methods the gateway forwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
}

impl ForwardMethod {
    /// Map an HTTP method, `None` for anything the gateway refuses.
    pub fn from_method(method: &Method) -> Option<Self> {
        match *method {
            Method::GET => Some(Self::Get),
            Method::POST => Some(Self::Post),
            Method::PUT => Some(Self::Put),
            Method::DELETE => Some(Self::Delete),
            Method::PATCH => Some(Self::Patch),
            _ => None,
        }
    }

    pub fn as_method(self) -> Method {
        match self {
            Self::Get => Method::GET,
            Self::Post => Method::POST,
            Self::Put => Method::PUT,
            Self::Delete => Method::DELETE,
            Self::Patch => Method::PATCH,
        }
    }

    /// Whether the inbound body is forwarded.
    pub fn carries_body(self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Patch)
    }
}

/// A client request reduced to what gets forwarded.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: ForwardMethod,
    /// Path components below the API prefix, in order.
    pub path_segments: Vec<String>,
    /// Raw query string without the leading `?`.
    pub query: Option<String>,
    pub headers: HeaderMap,
    /// Present only for methods that carry a body.
    pub body: Option<Bytes>,
}

impl InboundRequest {
    /// Extract the forwardable parts of an axum request.
    pub async fn from_request(
        request: Request<Body>,
        api_prefix: &str,
        max_body_size: usize,
    ) -> Result<Self, ProxyError> {
        let (parts, body) = request.into_parts();

        let method = ForwardMethod::from_method(&parts.method)
            .ok_or_else(|| ProxyError::UnsupportedMethod(parts.method.clone()))?;
        let path_segments = path_segments(parts.uri.path(), api_prefix)?;
        let query = parts
            .uri
            .query()
            .filter(|q| !q.is_empty())
            .map(str::to_owned);

        let body = if method.carries_body() {
            let bytes = axum::body::to_bytes(body, max_body_size)
                .await
                .map_err(|e| ProxyError::malformed(format!("failed to read request body: {}", e)))?;
            Some(bytes)
        } else {
            None
        };

        Ok(Self {
            method,
            path_segments,
            query,
            headers: parts.headers,
            body,
        })
    }
}

/// Whether `path` is the prefix itself or lies below it.
pub fn is_under_prefix(path: &str, api_prefix: &str) -> bool {
    match path.strip_prefix(api_prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Split the part of `path` below `api_prefix` into non-empty segments.
pub fn path_segments(path: &str, api_prefix: &str) -> Result<Vec<String>, ProxyError> {
    let rest = path
        .strip_prefix(api_prefix)
        .ok_or_else(|| ProxyError::malformed(format!("path '{}' is outside '{}'", path, api_prefix)))?;

    let mut segments = Vec::new();
    for segment in rest.split('/').filter(|s| !s.is_empty()) {
        if is_dot_segment(segment) {
            return Err(ProxyError::malformed(format!("path '{}' contains a dot segment", path)));
        }
        segments.push(segment.to_string());
    }
    Ok(segments)
}

fn is_dot_segment(segment: &str) -> bool {
    let lowered = segment.to_ascii_lowercase();
    let decoded = lowered.replace("%2e", ".");
    decoded == "." || decoded == ".."
}

/// Build `<base><prefix>/<segments>[?query]`.
///
/// Segments and query are the raw inbound bytes, already checked by the
/// inbound URI parser; they go into the outbound `Uri` as they are.
pub fn upstream_uri(
    base: &Url,
    api_prefix: &str,
    segments: &[String],
    query: Option<&str>,
) -> Result<Uri, ProxyError> {
    let mut raw = String::from(base.as_str().trim_end_matches('/'));
    raw.push_str(api_prefix);
    raw.push('/');
    raw.push_str(&segments.join("/"));
    if let Some(query) = query {
        raw.push('?');
        raw.push_str(query);
    }

    Uri::try_from(raw.as_str())
        .map_err(|e| ProxyError::malformed(format!("invalid upstream URL '{}': {}", raw, e)))
}

/// Copy of `headers` without the stripped set.
pub fn forwarded_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = headers.clone();
    for name in STRIPPED_HEADERS.iter() {
        forwarded.remove(name);
    }
    forwarded
}

/// Render headers for trace logs with credentials masked.
pub fn redacted(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let shown = if REDACTED_HEADERS.contains(name) {
                "<redacted>".to_string()
            } else {
                String::from_utf8_lossy(value.as_bytes()).into_owned()
            };
            (name.as_str().to_string(), shown)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn base(url: &str) -> Url {
        Url::parse(url).unwrap()
    }

    fn segments(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn method_mapping() {
        for method in [Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::PATCH] {
            let mapped = ForwardMethod::from_method(&method).unwrap();
            assert_eq!(mapped.as_method(), method);
        }
        assert_eq!(ForwardMethod::from_method(&Method::OPTIONS), None);
        assert_eq!(ForwardMethod::from_method(&Method::HEAD), None);

        assert!(ForwardMethod::Post.carries_body());
        assert!(ForwardMethod::Patch.carries_body());
        assert!(!ForwardMethod::Get.carries_body());
        assert!(!ForwardMethod::Delete.carries_body());
    }

    #[test]
    fn prefix_detection() {
        assert!(is_under_prefix("/api", "/api"));
        assert!(is_under_prefix("/api/content-plans", "/api"));
        assert!(!is_under_prefix("/apiary", "/api"));
        assert!(!is_under_prefix("/healthz", "/api"));
    }

    #[test]
    fn segments_drop_empty_components() {
        assert_eq!(path_segments("/api/a/b/c", "/api").unwrap(), segments(&["a", "b", "c"]));
        assert_eq!(path_segments("/api//a///b/", "/api").unwrap(), segments(&["a", "b"]));
        assert!(path_segments("/api", "/api").unwrap().is_empty());
    }

    #[test]
    fn segments_refuse_dot_segments() {
        assert!(path_segments("/api/../admin", "/api").is_err());
        assert!(path_segments("/api/a/%2E%2e/b", "/api").is_err());
        assert!(path_segments("/api/./a", "/api").is_err());
        assert!(path_segments("/api/v1.2/a", "/api").is_ok());
    }

    #[test]
    fn url_joins_segments() {
        let uri = upstream_uri(&base("http://web:8000"), "/api", &segments(&["a", "b", "c"]), None).unwrap();
        assert_eq!(uri.to_string(), "http://web:8000/api/a/b/c");
    }

    #[test]
    fn url_ignores_trailing_slash_on_base() {
        let uri = upstream_uri(&base("http://web:8000/"), "/api", &segments(&["foo"]), None).unwrap();
        assert_eq!(uri.to_string(), "http://web:8000/api/foo");
    }

    #[test]
    fn url_keeps_base_path() {
        let uri = upstream_uri(&base("https://backend.internal/v2"), "/api", &segments(&["plans"]), None).unwrap();
        assert_eq!(uri.to_string(), "https://backend.internal/v2/api/plans");
    }

    #[test]
    fn url_appends_query_verbatim() {
        let uri = upstream_uri(
            &base("http://web:8000"),
            "/api",
            &segments(&["foo"]),
            Some("y=2&x=1&x=3&q=a%20b"),
        )
        .unwrap();
        assert_eq!(uri.to_string(), "http://web:8000/api/foo?y=2&x=1&x=3&q=a%20b");
        assert_eq!(uri.query(), Some("y=2&x=1&x=3&q=a%20b"));
    }

    #[test]
    fn url_is_not_reencoded() {
        let uri = upstream_uri(
            &base("http://web:8000"),
            "/api",
            &segments(&["plans", "{id}"]),
            Some("name=O'Brien&sort=-created"),
        )
        .unwrap();
        assert_eq!(uri.path(), "/api/plans/{id}");
        assert_eq!(uri.query(), Some("name=O'Brien&sort=-created"));
    }

    #[test]
    fn header_filtering() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("dashboard.example.com"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("7"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.append("x-tag", HeaderValue::from_static("one"));
        headers.append("x-tag", HeaderValue::from_static("two"));

        let forwarded = forwarded_headers(&headers);
        assert!(forwarded.get(header::HOST).is_none());
        assert!(forwarded.get(header::CONTENT_LENGTH).is_none());
        assert!(forwarded.get(header::CONNECTION).is_none());
        assert_eq!(forwarded.get(header::AUTHORIZATION).unwrap(), "Bearer abc");
        let tags: Vec<_> = forwarded.get_all("x-tag").iter().collect();
        assert_eq!(tags, vec!["one", "two"]);
    }

    #[test]
    fn redaction_masks_credentials() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));

        let shown = redacted(&headers);
        assert!(shown.contains(&("authorization".to_string(), "<redacted>".to_string())));
        assert!(shown.contains(&("accept".to_string(), "application/json".to_string())));
    }

    #[tokio::test]
    async fn from_request_drops_body_for_get() {
        let request = Request::builder()
            .method(Method::GET)
            .uri("/api/foo/bar?x=1")
            .body(Body::from("ignored"))
            .unwrap();

        let inbound = InboundRequest::from_request(request, "/api", 1024).await.unwrap();
        assert_eq!(inbound.method, ForwardMethod::Get);
        assert_eq!(inbound.path_segments, segments(&["foo", "bar"]));
        assert_eq!(inbound.query.as_deref(), Some("x=1"));
        assert!(inbound.body.is_none());
    }

    #[tokio::test]
    async fn from_request_reads_body_for_post() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/content-plans?")
            .body(Body::from(r#"{"a":1}"#))
            .unwrap();

        let inbound = InboundRequest::from_request(request, "/api", 1024).await.unwrap();
        assert_eq!(inbound.query, None);
        assert_eq!(inbound.body.as_deref(), Some(&br#"{"a":1}"#[..]));
    }

    #[tokio::test]
    async fn from_request_enforces_body_limit() {
        let request = Request::builder()
            .method(Method::PUT)
            .uri("/api/content-plans/42")
            .body(Body::from(vec![b'x'; 64]))
            .unwrap();

        let err = InboundRequest::from_request(request, "/api", 16).await.unwrap_err();
        assert!(matches!(err, ProxyError::MalformedRequest { .. }));
    }

    #[tokio::test]
    async fn from_request_refuses_other_methods() {
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/api/foo")
            .body(Body::empty())
            .unwrap();

        let err = InboundRequest::from_request(request, "/api", 1024).await.unwrap_err();
        assert!(matches!(err, ProxyError::UnsupportedMethod(m) if m == Method::OPTIONS));
    }
}
