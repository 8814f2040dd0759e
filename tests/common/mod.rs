//! Shared utilities for integration testing.
#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{header, StatusCode, Uri},
    response::IntoResponse,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use cluster_balancer::config::ProxyConfig;
use cluster_balancer::http::HttpServer;
use cluster_balancer::lifecycle::Shutdown;
use cluster_balancer::load_balancer::Balancer;
use cluster_balancer::NodeAddr;

/// Start a backend that answers `"{name} {path?query}"`.
///
/// `/login` additionally sets `JSESSIONID=sess-{name}`.
pub async fn start_backend(name: &'static str) -> SocketAddr {
    let app = Router::new().fallback(move |uri: Uri| async move {
        let body = format!("{} {}", name, uri.path_and_query().map_or("/", |pq| pq.as_str()));
        if uri.path() == "/login" {
            (
                [(header::SET_COOKIE, format!("JSESSIONID=sess-{}; Path=/", name))],
                body,
            )
                .into_response()
        } else {
            body.into_response()
        }
    });
    serve(app).await
}

/// Start a backend whose status and body come from `f`.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn() -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let app = Router::new().fallback(move || {
        let f = f.clone();
        async move {
            let (status, body) = f().await;
            (StatusCode::from_u16(status).unwrap_or(StatusCode::OK), body)
        }
    });
    serve(app).await
}

async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// An address nothing listens on.
pub async fn dead_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub fn node(addr: SocketAddr) -> NodeAddr {
    NodeAddr::new(addr.ip().to_string(), addr.port())
}

/// A running proxy and the handles tests need to drive it.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub balancer: Arc<Balancer>,
    pub updates: mpsc::UnboundedSender<ProxyConfig>,
    pub shutdown: Shutdown,
}

impl TestProxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestProxy {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Config with fast failover and the given nodes in the default cluster.
pub fn config_with(nodes: &[SocketAddr]) -> ProxyConfig {
    let mut config: ProxyConfig = toml::from_str("").unwrap();
    config.retries.base_delay_ms = 1;
    config.retries.max_delay_ms = 5;
    config.timeouts.request_secs = 5;
    config.clusters.push(cluster_balancer::config::ClusterConfig {
        name: config.balancer.cluster.clone(),
        nodes: nodes.iter().copied().map(node).collect(),
    });
    config
}

pub async fn start_proxy(config: ProxyConfig) -> TestProxy {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = HttpServer::new(config);
    let balancer = server.balancer().clone();
    let shutdown = Shutdown::new();
    let (updates, rx) = mpsc::unbounded_channel();

    let server_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let _ = server.run(listener, Some(rx), server_shutdown).await;
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    TestProxy {
        addr,
        balancer,
        updates,
        shutdown,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
