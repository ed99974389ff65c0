use crate::metrics::Metrics;
use crate::vitals::{VitalsAggregator, VitalsResponse};
use axum::body::Body;
use axum::extract::State;
use axum::http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::error;

#[derive(Clone)]
pub struct HttpAppState {
    pub metrics: Arc<Metrics>,
    pub aggregator: Arc<Mutex<VitalsAggregator>>,
}

pub fn build_router(metrics: Arc<Metrics>, aggregator: Arc<Mutex<VitalsAggregator>>) -> Router {
    Router::new()
        .route("/", get(vitals_handler))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .with_state(HttpAppState {
            metrics,
            aggregator,
        })
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn metrics_handler(State(state): State<HttpAppState>) -> Response {
    state.metrics.inc_scrape_count();
    match state.metrics.encode_metrics() {
        Ok(encoded) => {
            let mut response = Response::new(Body::from(encoded));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {err}"),
        )
            .into_response(),
    }
}

// Passes hold the lock for their full duration so delta baselines never interleave.
async fn vitals_handler(State(state): State<HttpAppState>) -> Response {
    let mut guard = state.aggregator.clone().lock_owned().await;
    match tokio::task::spawn_blocking(move || guard.sample()).await {
        Ok(record) => Json(VitalsResponse::from(&record)).into_response(),
        Err(err) => {
            error!(error = %err, "sampling pass aborted");
            (StatusCode::INTERNAL_SERVER_ERROR, "sampling pass aborted").into_response()
        }
    }
}
