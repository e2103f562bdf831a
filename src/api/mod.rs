pub mod balance;
pub mod health;
pub mod ledger;
pub mod members;
pub mod network;
pub mod reconciliation;

use crate::config::Config;
use crate::db::Repository;
use crate::engine::{BalanceProjector, ReconciliationGuard, TopologyManager};
use crate::orchestration::Orchestrator;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub config: Config,
    pub orchestrator: Arc<Orchestrator>,
    pub topology: Arc<TopologyManager>,
    pub projector: Arc<BalanceProjector>,
    pub guard: Arc<ReconciliationGuard>,
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/v1/members", post(members::enroll_member))
        .route("/v1/members/:id/position", get(network::get_position))
        .route("/v1/members/:id/ancestors", get(network::get_ancestors))
        .route(
            "/v1/ledger/entries",
            post(ledger::record_entry).get(ledger::get_entries),
        )
        .route("/v1/ledger/entries/:id/reverse", post(ledger::reverse_entry))
        .route("/v1/balance", get(balance::get_balance))
        .route("/v1/reconciliation/scan", post(reconciliation::run_scan))
        .route(
            "/v1/reconciliation/anomalies",
            get(reconciliation::get_anomalies),
        )
        .layer(cors)
        .with_state(state)
}
