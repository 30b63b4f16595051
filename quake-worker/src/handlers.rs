use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::{routing, Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use quake_common::event::Event;
use quake_common::health::{HealthRegistry, HealthStatus};
use quake_common::metrics;
use quake_common::store::EventStore;
use serde::Deserialize;
use tracing::error;

const DEFAULT_RECENT_LIMIT: i64 = 20;
const MAX_RECENT_LIMIT: i64 = 500;

#[derive(Clone)]
pub struct AppState {
    pub store: EventStore,
    pub liveness: HealthRegistry,
}

pub fn app(state: AppState, metrics: Option<PrometheusHandle>) -> Router {
    Router::new()
        .route("/", routing::get(index))
        .route("/_liveness", routing::get(liveness))
        .route("/recent", routing::get(recent))
        .route(
            "/metrics",
            routing::get(move || match metrics {
                Some(ref recorder_handle) => std::future::ready(recorder_handle.render()),
                None => std::future::ready("no metrics recorder installed".to_owned()),
            }),
        )
        .layer(axum::middleware::from_fn(metrics::track_metrics))
        .with_state(state)
}

pub async fn index() -> &'static str {
    "quakewatch worker"
}

async fn liveness(State(state): State<AppState>) -> HealthStatus {
    state.liveness.get_status()
}

#[derive(Deserialize)]
pub struct RecentParams {
    limit: Option<i64>,
}

/// The most recently ingested events, newest first. Limits above the maximum are capped.
async fn recent(
    State(state): State<AppState>,
    Query(params): Query<RecentParams>,
) -> Result<Json<Vec<Event>>, (StatusCode, String)> {
    let limit = params.limit.unwrap_or(DEFAULT_RECENT_LIMIT);
    if limit < 1 {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("limit must be at least 1, got {}", limit),
        ));
    }
    let limit = limit.min(MAX_RECENT_LIMIT);

    state.store.recent(limit).await.map(Json).map_err(|err| {
        error!("failed to read recent events: {}", err);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "failed to read recent events".to_owned(),
        )
    })
}
