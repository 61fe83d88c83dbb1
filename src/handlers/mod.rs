mod health;
mod metrics;
mod subscribe;

pub use health::health_handler;
pub use metrics::metrics_handler;
pub use subscribe::subscribe_handler;

use axum::{Router, routing::get};
use std::sync::Arc;

use crate::state::AppState;

// Every path reaches the pipeline; routing is decided after admission.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new().fallback(subscribe_handler).with_state(state)
}

pub fn metrics_router() -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
}
