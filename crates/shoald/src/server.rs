//! HTTP entry surface and heartbeat loop.
//!
//! Every inbound request — any path, any method — lands in the fallback
//! handler and goes through [`Controller::fetch`], which either serves
//! the registry snapshot (monitoring endpoint) or forwards to a
//! container. The heartbeat runs as its own task on a fixed interval
//! with a watch-channel shutdown.

use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::response::Response;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::controller::Controller;

/// Cap on buffered request bodies forwarded to containers.
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Build the entry-surface router.
pub fn build_router(controller: Controller) -> axum::Router {
    axum::Router::new()
        .fallback(forward)
        .with_state(controller)
}

async fn forward(
    State(controller): State<Controller>,
    request: axum::extract::Request,
) -> Response {
    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "request body rejected");
            return Response::builder()
                .status(http::StatusCode::PAYLOAD_TOO_LARGE)
                .body(Body::empty())
                .expect("static response");
        }
    };

    let response = controller
        .fetch(http::Request::from_parts(parts, bytes))
        .await;
    let (parts, body) = response.into_parts();
    Response::from_parts(parts, Body::from(body))
}

/// Run the heartbeat until shutdown.
pub async fn run_heartbeat(controller: Controller, mut shutdown: watch::Receiver<bool>) {
    let interval = Duration::from_millis(controller.config().heartbeat_interval_ms);
    info!(interval_ms = interval.as_millis() as u64, "heartbeat started");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                controller.heartbeat().await;
            }
            _ = shutdown.changed() => {
                info!("heartbeat shutting down");
                break;
            }
        }
    }
}
