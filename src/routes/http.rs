// GET /metrics: scan, then render whatever gauge state exists.

use axum::{
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use std::time::Instant;

use super::AppState;

const PLAIN_TEXT: &str = "text/plain; charset=utf-8";

/// Every scrape runs a full scan against the daemon before rendering.
/// A failed scan still serves the last known values, behind a 500 and the error line.
pub(super) async fn metrics_handler(State(state): State<AppState>) -> Response {
    tracing::info!(path = "/metrics", "new incoming request");
    let started = Instant::now();

    let cancel = state.shutdown.child_token();
    let collected = state.controller.collect(&cancel).await;
    let rendered = state.controller.render();

    let response = match (collected, rendered) {
        (Ok(()), Ok(body)) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, state.controller.content_type())],
            body,
        )
            .into_response(),
        (Err(e), Ok(body)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, PLAIN_TEXT)],
            format!("{}\n{}", e, body),
        )
            .into_response(),
        (_, Err(e)) => {
            tracing::error!(error = %e, "failed to render metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, PLAIN_TEXT)],
                e.to_string(),
            )
                .into_response()
        }
    };

    tracing::info!(
        path = "/metrics",
        status = response.status().as_u16(),
        duration_ms = started.elapsed().as_millis() as u64,
        "request processed"
    );
    response
}
