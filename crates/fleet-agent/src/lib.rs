//! fleet-agent: the private protocol between the fleet manager and the
//! agents running on each data plane cluster, plus the admin operations.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | PUT | `/api/v1/agent-clusters/{id}/status` | Cluster capacity report |
//! | GET | `/api/v1/agent-clusters/{id}/kafkas` | Instances the agent should run |
//! | PUT | `/api/v1/agent-clusters/{id}/kafkas/status` | Per-instance status reports |
//! | POST | `/api/v1/admin/kafkas/{id}/placement` | Place a request now |
//! | POST | `/api/v1/admin/kafkas/{id}/suspend` | Suspend or resume a request |
//! | GET | `/healthz` | Liveness |

pub mod auth;
pub mod error;
pub mod handlers;
pub mod response;
pub mod service;

use axum::Router;
use axum::routing::{get, post, put};
use fleet_core::FleetContext;

pub use error::{AgentError, AgentResult};
pub use service::{AgentInstance, AgentService};

/// Shared state for the handlers.
#[derive(Clone)]
pub struct AgentState {
    pub ctx: FleetContext,
    pub service: AgentService,
}

/// Build the agent and admin router.
pub fn build_router(ctx: FleetContext) -> Router {
    let state = AgentState {
        service: AgentService::new(ctx.clone()),
        ctx,
    };

    let agent_routes = Router::new()
        .route("/{id}/status", put(handlers::update_cluster_status))
        .route("/{id}/kafkas", get(handlers::get_instance_requests))
        .route("/{id}/kafkas/status", put(handlers::update_instance_request_status));

    let admin_routes = Router::new()
        .route("/kafkas/{id}/placement", post(handlers::place_instance_request))
        .route("/kafkas/{id}/suspend", post(handlers::suspend_resume));

    Router::new()
        .nest("/api/v1/agent-clusters", agent_routes)
        .nest("/api/v1/admin", admin_routes)
        .with_state(state)
        .route("/healthz", get(|| async { "ok" }))
}
