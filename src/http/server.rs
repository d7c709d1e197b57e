//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with all handlers
//! - Wire up middleware (request ID, tracing, in-flight limit, timeout)
//! - Hold the active configuration behind an atomic swap
//! - Forward `/api/*` requests to the upstream
//! - Apply configuration updates and shut down on signal

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::admin::setup_admin_router;
use crate::config::GatewayConfig;
use crate::http::error::SetupError;
use crate::http::forward::{forward, Upstream};
use crate::http::request::{is_under_prefix, InboundRequest};
use crate::observability::metrics;

/// Header carrying the per-request correlation ID.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Everything a request needs, swapped as a unit on reload.
#[derive(Debug)]
pub struct GatewayState {
    pub config: GatewayConfig,
    pub upstream: Upstream,
}

impl GatewayState {
    pub fn new(config: GatewayConfig) -> Result<Self, SetupError> {
        let upstream = Upstream::from_config(&config)?;
        Ok(Self { config, upstream })
    }
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub inner: Arc<ArcSwap<GatewayState>>,
    pub reloads: Arc<AtomicUsize>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: GatewayConfig) -> Result<Self, SetupError> {
        Ok(Self {
            inner: Arc::new(ArcSwap::from_pointee(GatewayState::new(config)?)),
            reloads: Arc::new(AtomicUsize::new(0)),
            started_at: Instant::now(),
        })
    }

    /// The state a request should use from start to finish.
    pub fn snapshot(&self) -> Arc<GatewayState> {
        self.inner.load_full()
    }

    /// Replace the active configuration. In-flight requests keep their snapshot.
    pub fn apply_config(&self, config: GatewayConfig) -> Result<(), SetupError> {
        let next = GatewayState::new(config)?;
        let current = self.snapshot();

        if current.config.listener != next.config.listener {
            tracing::warn!("Listener settings changed; they take effect after a restart");
        }
        if current.config.timeouts.request_secs != next.config.timeouts.request_secs {
            tracing::warn!("Request timeout changed; it takes effect after a restart");
        }

        tracing::info!(
            upstream = %next.upstream.base(),
            api_prefix = %next.upstream.api_prefix(),
            "Configuration applied"
        );
        self.inner.store(Arc::new(next));
        self.reloads.fetch_add(1, Ordering::Relaxed);
        metrics::record_config_reload();
        Ok(())
    }

    pub fn reload_count(&self) -> usize {
        self.reloads.load(Ordering::Relaxed)
    }
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
    state: AppState,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: GatewayConfig) -> Result<Self, SetupError> {
        let state = AppState::new(config.clone())?;
        let router = Self::build_router(&config, state.clone());
        Ok(Self { router, state })
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &GatewayConfig, state: AppState) -> Router {
        let in_flight = Arc::new(Semaphore::new(config.listener.max_connections));

        let router = Router::new()
            .route("/healthz", get(healthz))
            .merge(setup_admin_router(state.clone()))
            .fallback(proxy_handler)
            .with_state(state)
            .layer(middleware::from_fn_with_state(in_flight, limit_in_flight));

        let router = match config.timeouts.request_secs {
            Some(secs) => router.layer(TimeoutLayer::with_status_code(
                StatusCode::REQUEST_TIMEOUT,
                Duration::from_secs(secs),
            )),
            None => router,
        };

        router
            .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                let request_id = request
                    .headers()
                    .get(X_REQUEST_ID)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("unknown");
                tracing::info_span!(
                    "request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %request_id,
                )
            }))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// The fully layered router, for in-process use.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Run the server, accepting connections on the given listener.
    ///
    /// Configuration updates arriving on `config_updates` are applied as they
    /// come; the server drains and returns once `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<GatewayConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        let snapshot = self.state.snapshot();
        tracing::info!(
            address = %addr,
            upstream = %snapshot.upstream.base(),
            api_prefix = %snapshot.upstream.api_prefix(),
            "HTTP server starting"
        );

        let state = self.state.clone();
        let updates = tokio::spawn(async move {
            while let Some(config) = config_updates.recv().await {
                if let Err(e) = state.apply_config(config) {
                    tracing::error!(error = %e, "Rejected configuration update");
                }
            }
        });

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        updates.abort();
        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Liveness probe. Never touches the upstream.
async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Hold a permit for the lifetime of the request (backpressure, not rejection).
async fn limit_in_flight(
    State(in_flight): State<Arc<Semaphore>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    match in_flight.acquire_owned().await {
        Ok(_permit) => next.run(request).await,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

/// Main proxy handler.
/// Relays anything under the API prefix; everything else is a 404.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start_time = Instant::now();
    let snapshot = state.snapshot();
    let method = request.method().clone();
    let api_prefix = snapshot.upstream.api_prefix();

    if !is_under_prefix(request.uri().path(), api_prefix) {
        tracing::debug!(path = %request.uri().path(), "Path outside the API prefix");
        return StatusCode::NOT_FOUND.into_response();
    }

    let result = match InboundRequest::from_request(
        request,
        api_prefix,
        snapshot.config.security.max_body_size,
    )
    .await
    {
        Ok(inbound) => forward(&snapshot.upstream, inbound).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(reply) => {
            metrics::record_request(method.as_str(), reply.status.as_u16(), "success", start_time);
            reply.into_response()
        }
        Err(err) => {
            err.log();
            metrics::record_request(method.as_str(), err.status().as_u16(), err.outcome(), start_time);
            err.into_response()
        }
    }
}

/// Read the request ID assigned to a response, if any.
pub fn request_id(response: &Response) -> Option<&HeaderValue> {
    response.headers().get(X_REQUEST_ID)
}
