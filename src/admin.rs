//! Gateway status API and the role/redirect middleware.
//!
//! The middleware is the hook a front-door proxy uses to keep writes on
//! the leader: followers redirect to the leader's base address, and while
//! no leader is known the request is rejected with 503. Raft RPC paths
//! are exempt so consensus traffic is never redirected.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::raft::{RaftNode, RaftRole};
use crate::sync::StateApplier;

#[derive(Clone)]
pub struct AdminState {
    pub raft: Arc<RaftNode>,
    pub applier: Arc<StateApplier>,
}

pub fn admin_router(state: AdminState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/cluster", get(cluster_status_handler))
        .route("/api/sessions", get(sessions_handler))
        .route("/api/storage", get(storage_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn run_admin(addr: SocketAddr, state: AdminState, cancel: CancellationToken) {
    let app = admin_router(state);
    tracing::info!(addr = %addr, "starting gateway status server");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "failed to bind status server");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
    {
        tracing::error!(error = %e, "status server failed");
    }
}

/// Redirects or rejects requests that land on a non-leader.
pub async fn redirect_to_leader(
    State(raft): State<Arc<RaftNode>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if !path.starts_with("/raft") {
        let status = raft.status().await;
        if status.started {
            match status.state {
                RaftRole::Leader => {}
                RaftRole::Follower => match status.leader_base_url {
                    Some(base) => {
                        return Redirect::temporary(&format!("{}{}", base, path)).into_response();
                    }
                    None => {
                        return (
                            StatusCode::SERVICE_UNAVAILABLE,
                            Json(json!({
                                "state": "Follower",
                                "message": "Leader is not elected yet"
                            })),
                        )
                            .into_response();
                    }
                },
                RaftRole::Candidate => {
                    return (
                        StatusCode::SERVICE_UNAVAILABLE,
                        Json(json!({"state": "Candidate"})),
                    )
                        .into_response();
                }
            }
        }
    }
    next.run(request).await
}

async fn cluster_status_handler(State(state): State<AdminState>) -> impl IntoResponse {
    Json(state.raft.status().await)
}

async fn sessions_handler(State(state): State<AdminState>) -> impl IntoResponse {
    Json(state.applier.sessions())
}

async fn storage_handler(State(state): State<AdminState>) -> impl IntoResponse {
    Json(state.applier.storage())
}
