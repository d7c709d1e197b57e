//! Upstream forwarding.
//!
//! One inbound request produces exactly one upstream request. There is no
//! retry: a failure is returned to the caller immediately. Redirects the
//! upstream answers with are followed the way a browser `fetch` would.

use std::time::{Duration, Instant};

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, Method, Request, StatusCode, Uri};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use url::Url;

use crate::config::GatewayConfig;
use crate::http::error::{ProxyError, SetupError};
use crate::http::request::{forwarded_headers, redacted, upstream_uri, InboundRequest, REDACTED_HEADERS};
use crate::http::response::{body_preview, UpstreamReply};

/// Bytes of a body shown in trace logs.
const LOG_PREVIEW_BYTES: usize = 2048;

/// Redirect hops followed before the last 3xx is relayed as is.
const MAX_REDIRECTS: usize = 10;

type UpstreamClient = Client<HttpsConnector<HttpConnector>, Body>;

/// The upstream API and the client used to reach it.
#[derive(Debug, Clone)]
pub struct Upstream {
    base: Url,
    api_prefix: String,
    client: UpstreamClient,
}

impl Upstream {
    /// Build from a validated configuration.
    pub fn from_config(config: &GatewayConfig) -> Result<Self, SetupError> {
        let raw = config
            .upstream
            .base_url
            .as_deref()
            .ok_or_else(|| SetupError::Upstream("upstream.base_url is not set".to_string()))?;
        let base = Url::parse(raw).map_err(|e| SetupError::Upstream(format!("'{}': {}", raw, e)))?;

        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_connect_timeout(config.timeouts.connect_secs.map(Duration::from_secs));

        let https = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .wrap_connector(http);

        Ok(Self {
            base,
            api_prefix: config.upstream.api_prefix.clone(),
            client: Client::builder(TokioExecutor::new()).build(https),
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn api_prefix(&self) -> &str {
        &self.api_prefix
    }
}

/// Forward `request` to the upstream and read the whole reply.
///
/// Non-2xx replies come back as [`ProxyError::UpstreamStatus`] so callers can
/// tell them apart; their wire form is the reply itself.
pub async fn forward(upstream: &Upstream, request: InboundRequest) -> Result<UpstreamReply, ProxyError> {
    let mut uri = upstream_uri(
        &upstream.base,
        &upstream.api_prefix,
        &request.path_segments,
        request.query.as_deref(),
    )?;
    let mut method = request.method.as_method();
    let mut headers = forwarded_headers(&request.headers);
    let mut body = request.body;

    tracing::debug!(method = %method, url = %uri, "Forwarding request upstream");
    tracing::trace!(
        headers = ?redacted(&headers),
        body = %body.as_deref().map(|b| body_preview(b, LOG_PREVIEW_BYTES)).unwrap_or_default(),
        "Forwarded request detail"
    );

    let started = Instant::now();
    let mut hops = 0;
    let response = loop {
        let outbound = outbound_request(&method, &uri, &headers, body.clone());
        let response = upstream
            .client
            .request(outbound)
            .await
            .map_err(|e| ProxyError::network(&uri, e))?;

        let next = match redirect_target(&uri, &response) {
            Some(next) if hops < MAX_REDIRECTS => next,
            _ => break response,
        };
        hops += 1;

        let status = response.status();
        if status == StatusCode::SEE_OTHER
            || (method == Method::POST && matches!(status, StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND))
        {
            method = Method::GET;
            body = None;
            headers.remove(header::CONTENT_TYPE);
        }
        if next.authority() != uri.authority() {
            for name in REDACTED_HEADERS.iter() {
                headers.remove(name);
            }
        }

        tracing::debug!(status = %status, location = %next, "Following upstream redirect");
        uri = next;
    };

    let reply = UpstreamReply::read(response)
        .await
        .map_err(|e| ProxyError::network(&uri, e))?;

    tracing::debug!(
        status = %reply.status,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Upstream responded"
    );
    tracing::trace!(body = %reply.preview(LOG_PREVIEW_BYTES), "Upstream response body");

    if reply.status.is_success() {
        Ok(reply)
    } else {
        Err(ProxyError::UpstreamStatus(reply))
    }
}

fn outbound_request(method: &Method, uri: &Uri, headers: &HeaderMap, body: Option<Bytes>) -> Request<Body> {
    let mut request = Request::new(body.map(Body::from).unwrap_or_else(Body::empty));
    *request.method_mut() = method.clone();
    *request.uri_mut() = uri.clone();
    *request.headers_mut() = headers.clone();
    request
}

/// Where a redirect points, resolved against the URI that produced it.
fn redirect_target<B>(current: &Uri, response: &hyper::Response<B>) -> Option<Uri> {
    if !matches!(
        response.status(),
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    ) {
        return None;
    }

    let location = response.headers().get(header::LOCATION)?.to_str().ok()?;
    let resolved = Url::parse(&current.to_string()).ok()?.join(location).ok()?;
    if !matches!(resolved.scheme(), "http" | "https") {
        return None;
    }
    Uri::try_from(resolved.as_str()).ok()
}
