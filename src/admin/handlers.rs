use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::config::StrategyKind;
use crate::http::server::AppState;
use crate::load_balancer::node::{HealthState, NodeStatsSnapshot};

#[derive(Debug, Serialize, Deserialize)]
pub struct SystemStatus {
    pub version: String,
    pub status: String,
    pub balancer: String,
    pub cluster: String,
    pub strategy: StrategyKind,
    pub session_timeout_ms: u64,
    pub cleanup_running: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NodeStatus {
    pub address: String,
    pub health: HealthState,
    pub in_flight: usize,
    pub dispatch_count: u64,
    pub sessions: usize,
    pub stats: NodeStatsSnapshot,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClusterStatus {
    pub name: String,
    pub sessions: usize,
    pub nodes: Vec<NodeStatus>,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let balancer = state.balancer();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: "operational".to_string(),
        balancer: balancer.name().to_string(),
        cluster: state.interceptor.cluster().to_string(),
        strategy: state.interceptor.strategy(),
        session_timeout_ms: balancer.session_timeout().as_millis() as u64,
        cleanup_running: balancer.is_cleanup_running(),
    })
}

pub async fn get_clusters(State(state): State<AppState>) -> Json<Vec<ClusterStatus>> {
    let clusters = state
        .balancer()
        .clusters()
        .iter()
        .map(|cluster| {
            let sessions = cluster.sessions();
            ClusterStatus {
                name: cluster.name().to_string(),
                sessions: sessions.len(),
                nodes: cluster
                    .nodes()
                    .iter()
                    .map(|node| NodeStatus {
                        address: node.to_string(),
                        health: node.health(),
                        in_flight: node.in_flight(),
                        dispatch_count: node.dispatch_count(),
                        sessions: sessions.count_for(node),
                        stats: node.stats(),
                    })
                    .collect(),
            }
        })
        .collect();

    Json(clusters)
}
