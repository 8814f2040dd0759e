//! HTTP server setup and request forwarding.
//!
//! # Responsibilities
//! - Create the Axum router and wire up middleware (tracing, request ID)
//! - Run the interceptor's request and response phases around each call
//! - Forward to the destination list in order, with backoff between attempts
//! - Own the background tasks (session cleanup, health monitor, admin API)
//! - Apply configuration updates while running

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, request::Parts, HeaderName, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::ProxyConfig;
use crate::health::MonitorHandle;
use crate::interceptor::{Exchange, LoadBalancingInterceptor, Outcome, RequestHead, ResponseHead};
use crate::lifecycle::Shutdown;
use crate::load_balancer::balancer::Balancer;
use crate::resilience::backoff::failover_delay;

const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Headers that apply to a single connection and are not forwarded.
const HOP_BY_HOP: [HeaderName; 7] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    HeaderName::from_static("proxy-connection"),
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub interceptor: Arc<LoadBalancingInterceptor>,
    pub client: Client<HttpConnector, Body>,
    pub config: Arc<ArcSwap<ProxyConfig>>,
}

impl AppState {
    pub fn balancer(&self) -> &Arc<Balancer> {
        self.interceptor.balancer()
    }
}

/// HTTP server for the balancing proxy.
pub struct HttpServer {
    router: Router,
    state: AppState,
}

impl HttpServer {
    /// Create a server with a fresh balancer built from `config`.
    pub fn new(config: ProxyConfig) -> Self {
        let balancer = Arc::new(Balancer::new(config.balancer.name.clone()));
        Self::with_balancer(balancer, config)
    }

    /// Create a server dispatching through an existing balancer.
    pub fn with_balancer(balancer: Arc<Balancer>, config: ProxyConfig) -> Self {
        let interceptor = Arc::new(LoadBalancingInterceptor::from_config(balancer, &config));

        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_secs(config.timeouts.connect_secs)));
        let client = Client::builder(TokioExecutor::new()).build(connector);

        let state = AppState {
            interceptor,
            client,
            config: Arc::new(ArcSwap::from_pointee(config)),
        };

        let router = Self::build_router(state.clone());
        Self { router, state }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid))
    }

    pub fn interceptor(&self) -> &Arc<LoadBalancingInterceptor> {
        &self.state.interceptor
    }

    pub fn balancer(&self) -> &Arc<Balancer> {
        self.state.balancer()
    }

    /// The configuration currently in effect.
    pub fn config(&self) -> Arc<ProxyConfig> {
        self.state.config.load_full()
    }

    /// Run the server until `shutdown` is triggered.
    ///
    /// Configuration received on `config_updates` is applied without restarting.
    pub async fn run(
        self,
        listener: TcpListener,
        config_updates: Option<mpsc::UnboundedReceiver<ProxyConfig>>,
        shutdown: Shutdown,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        let config = self.config();
        tracing::info!(
            address = %addr,
            cluster = %self.state.interceptor.cluster(),
            strategy = ?self.state.interceptor.strategy(),
            "HTTP server starting"
        );

        let balancer = self.balancer().clone();
        balancer.start_cleanup(Duration::from_millis(config.balancer.cleanup_interval_ms));

        let monitor = MonitorHandle::start(balancer.clone(), config.health_check.clone(), shutdown.clone());

        if config.admin.enabled {
            spawn_admin(self.state.clone(), &config.admin.bind_address, &shutdown).await?;
        }

        if let Some(updates) = config_updates {
            tokio::spawn(apply_updates(self.state.clone(), monitor, updates, shutdown.clone()));
        }

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown.signalled())
            .await?;

        balancer.stop_cleanup();
        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn spawn_admin(state: AppState, bind_address: &str, shutdown: &Shutdown) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Admin API listening");

    let app = crate::admin::setup_admin_router(state);
    let stop = shutdown.signalled();
    tokio::spawn(async move {
        let served = axum::serve(listener, app).with_graceful_shutdown(stop).await;
        if let Err(e) = served {
            tracing::error!(error = %e, "Admin API failed");
        }
    });
    Ok(())
}

async fn apply_updates(
    state: AppState,
    mut monitor: MonitorHandle,
    mut updates: mpsc::UnboundedReceiver<ProxyConfig>,
    shutdown: Shutdown,
) {
    let stop = shutdown.signalled();
    tokio::pin!(stop);
    loop {
        tokio::select! {
            update = updates.recv() => {
                let Some(new_config) = update else { break };
                let old_config = state.config.load_full();

                state.interceptor.apply_config(&new_config);
                if new_config.balancer.cleanup_interval_ms != old_config.balancer.cleanup_interval_ms {
                    state
                        .balancer()
                        .start_cleanup(Duration::from_millis(new_config.balancer.cleanup_interval_ms));
                }
                monitor.reconfigure(&new_config.health_check);
                state.config.store(Arc::new(new_config));
                tracing::info!("Configuration applied");
            }
            _ = &mut stop => break,
        }
    }
}

/// Main proxy handler.
/// Runs the request phase, forwards to the destinations, runs the response phase.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let config = state.config.load_full();
    let request_id = request
        .headers()
        .get(&X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let (parts, body) = request.into_parts();

    // The body is replayed for every failover attempt.
    let body = match axum::body::to_bytes(body, config.listener.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(request_id = %request_id, error = %e, "Request body rejected");
            return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response();
        }
    };

    let mut exchange = Exchange::new(
        RequestHead::new(parts.method.clone(), parts.uri.clone(), parts.headers.clone())
            .with_body(body.clone()),
    );

    match state.interceptor.handle_request(&mut exchange) {
        Ok(Outcome::Continue) => {}
        Ok(Outcome::Abort) => {
            let status = exchange
                .response()
                .map_or(StatusCode::INTERNAL_SERVER_ERROR, |r| r.status);
            return (status, "No node available").into_response();
        }
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "Request phase failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }
    }

    let mut dispatched = DispatchedExchange {
        interceptor: &state.interceptor,
        exchange,
    };
    let response = forward(&state, &config, &parts, &body, &request_id, &mut dispatched.exchange).await;
    dispatched.complete();
    response
}

/// An exchange between its request and response phases.
///
/// If the handler future is dropped first (the client went away), the
/// dispatched node's in-flight slot is released without recording an outcome.
struct DispatchedExchange<'a> {
    interceptor: &'a LoadBalancingInterceptor,
    exchange: Exchange,
}

impl DispatchedExchange<'_> {
    fn complete(mut self) {
        self.interceptor.handle_response(&mut self.exchange);
    }
}

impl Drop for DispatchedExchange<'_> {
    fn drop(&mut self) {
        self.interceptor.handle_abandoned(&mut self.exchange);
    }
}

/// Try each destination in order; the first usable answer wins.
async fn forward(
    state: &AppState,
    config: &ProxyConfig,
    parts: &Parts,
    body: &Bytes,
    request_id: &str,
    exchange: &mut Exchange,
) -> Response {
    let destinations = exchange.destinations().to_vec();
    let request_timeout = Duration::from_secs(config.timeouts.request_secs);

    for (attempt, destination) in destinations.iter().enumerate() {
        if attempt > 0 {
            let delay = failover_delay(attempt as u32, &config.retries);
            tracing::info!(request_id = %request_id, attempt, delay = ?delay, destination = %destination, "Failing over");
            time::sleep(delay).await;
        }

        let request = match build_request(parts, destination, body) {
            Ok(req) => req,
            Err(e) => {
                tracing::error!(request_id = %request_id, destination = %destination, error = %e, "Invalid destination");
                exchange.record_failed_destination(destination.clone());
                continue;
            }
        };

        let is_last = attempt + 1 == destinations.len();
        match time::timeout(request_timeout, state.client.request(request)).await {
            Ok(Ok(response)) if is_retryable(response.status()) && !is_last => {
                tracing::warn!(request_id = %request_id, destination = %destination, status = %response.status(), "Node unavailable");
                exchange.record_failed_destination(destination.clone());
            }
            Ok(Ok(response)) => {
                let (parts, body) = response.into_parts();
                exchange.set_response(ResponseHead::new(parts.status, parts.headers.clone()));
                return Response::from_parts(parts, Body::new(body));
            }
            Ok(Err(e)) => {
                tracing::warn!(request_id = %request_id, destination = %destination, error = %e, "Upstream error");
                exchange.record_failed_destination(destination.clone());
            }
            Err(_) => {
                tracing::warn!(request_id = %request_id, destination = %destination, "Upstream timeout");
                exchange.record_failed_destination(destination.clone());
            }
        }
    }

    tracing::error!(request_id = %request_id, attempts = destinations.len(), "All destinations failed");
    exchange.set_response(ResponseHead::bad_gateway());
    (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response()
}

fn build_request(parts: &Parts, destination: &str, body: &Bytes) -> Result<Request<Body>, axum::http::Error> {
    let mut builder = Request::builder()
        .method(parts.method.clone())
        .uri(destination);

    if let Some(headers) = builder.headers_mut() {
        for (name, value) in parts.headers.iter() {
            if name != header::HOST && !HOP_BY_HOP.contains(name) {
                headers.append(name.clone(), value.clone());
            }
        }
    }

    builder.body(Body::from(body.clone()))
}

fn is_retryable(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
    )
}
