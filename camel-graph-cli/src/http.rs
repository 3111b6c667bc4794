//! HTTP query layer: topology snapshots as JSON plus the static UI

use std::path::Path;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use camel_graph_core::topology::Instance;
use serde::Deserialize;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub instance: Arc<Instance>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DataQuery {
    env: Option<String>,
}

pub fn router(state: AppState, public_dir: &Path) -> Router {
    Router::new()
        .route("/data", get(data))
        .fallback_service(ServeDir::new(public_dir))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// `/data?env=<name>` answers with that environment; an unknown or missing
/// name gets the whole instance
async fn data(State(state): State<AppState>, Query(query): Query<DataQuery>) -> Response {
    if let Some(name) = query.env.as_deref().filter(|n| !n.is_empty()) {
        match state.instance.environment(name) {
            Some(env) => return Json(env.snapshot().await).into_response(),
            None => tracing::debug!(env = name, "unknown environment, serving the whole instance"),
        }
    }
    Json(state.instance.snapshot().await).into_response()
}
