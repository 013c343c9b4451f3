use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{info, warn};

use affiliations_core::{FamilyKernel, LedgerError, TreeOptions};
use records::{
    ApiError, ErrorCode, RelationKind, RelationSummary, RelationsResponse, SpendRequest,
    SpendResponse, TreeLayout, WalletSummary, WalletsResponse, SCHEMA_VERSION_V1,
};

const SECRET_HEADER: &str = "x-secret";

include!("error.rs");
include!("state.rs");
include!("routes/query.rs");
include!("routes/spend.rs");
include!("util.rs");

pub async fn serve(
    addr: SocketAddr,
    kernel: FamilyKernel,
    env_secret: Option<String>,
) -> Result<(), ServerError> {
    let state = AppState::new(kernel, env_secret);
    let app = router(state);

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "facade listening");
    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/health", get(get_health))
        .route(
            "/v1/affiliations/{guild_id}/{user_id}",
            get(get_affiliations),
        )
        .route("/v1/relations/{guild_id}/{user_id}", get(get_relations))
        .route("/v1/casino/spend", post(post_spend))
        .route("/v1/family/{guild_id}/{key}/tree", get(get_family_tree))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .with_state(state)
}
