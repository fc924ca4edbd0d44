// HTTP routes

mod http;

use axum::{Router, routing::get};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::controller::Controller;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) controller: Arc<Controller>,
    /// Cancelled on shutdown; each scrape scans under a child token.
    pub(crate) shutdown: CancellationToken,
}

pub fn app(controller: Arc<Controller>, shutdown: CancellationToken) -> Router {
    let state = AppState {
        controller,
        shutdown,
    };
    Router::new()
        .route("/metrics", get(http::metrics_handler)) // GET /metrics
        .with_state(state)
}
