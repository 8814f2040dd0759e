//! Read-only admin API.
//!
//! # Endpoints
//! - `GET /admin/status`: balancer name, dispatch cluster, strategy
//! - `GET /admin/clusters`: nodes, health, load and sessions per cluster
//!
//! Every endpoint requires `Authorization: Bearer <api_key>`.

pub mod auth;
pub mod handlers;

use axum::{middleware, routing::get, Router};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::server::AppState;

pub fn setup_admin_router(state: AppState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/clusters", get(get_clusters))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
