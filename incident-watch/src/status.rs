use axum::extract::{Query, State};
use axum::{routing::get, Json, Router};
use incident_model::Incident;
use serde::Deserialize;
use std::sync::Arc;
use sync_core::{SyncContext, SyncStatus};

#[derive(Debug, Default, Deserialize)]
pub struct IncidentsParams {
    #[serde(default)]
    pub active: bool,
}

pub fn status_router(ctx: Arc<SyncContext>) -> Router {
    Router::new()
        .route("/status", get(handle_status))
        .route("/incidents", get(handle_incidents))
        .with_state(ctx)
}

async fn handle_status(State(ctx): State<Arc<SyncContext>>) -> Json<SyncStatus> {
    Json(ctx.status())
}

async fn handle_incidents(
    State(ctx): State<Arc<SyncContext>>,
    Query(params): Query<IncidentsParams>,
) -> Json<Vec<Incident>> {
    let mut incidents = ctx.snapshot();
    if params.active {
        incidents.retain(Incident::is_open);
    }
    Json(incidents)
}
