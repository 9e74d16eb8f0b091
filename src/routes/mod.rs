mod health;
mod metrics;
mod predict;

use crate::server::SharedState;
use axum::{
    routing::{get, post},
    Router,
};

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health::healthcheck))
        .route("/metrics", get(metrics::metrics_handler))
        .route("/models", get(predict::list_models))
        .route("/models/{model}/predict", post(predict::predict_by_path))
        .route("/predict", post(predict::predict_by_query))
}
