//! A3: the HTTP status endpoint. Serves the most recently rendered DOT graph
//! from a lock-free `ArcSwap`, published as a whole-string replacement by
//! whichever `Controller` last ran `stabilize`.

use std::net::SocketAddr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::Router;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Shared handle to the published DOT rendering. Readers (the status route)
/// and the single writer (a `Controller::stabilize` call) never contend for a
/// lock: `store` is an atomic pointer swap, so a reader always observes a
/// complete rendering, never a partial write.
pub type DotPublisher = Arc<ArcSwap<String>>;

pub fn new_publisher() -> DotPublisher {
    Arc::new(ArcSwap::from_pointee("digraph {}".to_string()))
}

#[derive(Debug, thiserror::Error)]
pub enum StatusServerError {
    #[error("failed to bind status server on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

async fn status_handler(publisher: axum::extract::State<DotPublisher>) -> impl IntoResponse {
    let body = publisher.0.load_full().as_ref().clone();
    (
        StatusCode::OK,
        [("content-type", "text/vnd.graphviz")],
        body,
    )
}

/// Serves `GET /` returning the current DOT text until `cancel` fires.
pub async fn serve(
    addr: SocketAddr,
    publisher: DotPublisher,
    cancel: CancellationToken,
) -> Result<(), StatusServerError> {
    let app = Router::new()
        .route("/", get(status_handler))
        .with_state(publisher);

    info!("status endpoint listening on {addr}");
    let server = axum_server::bind(addr)
        .serve(app.into_make_service())
        .with_cancellation_token(&cancel);

    if let Some(Err(source)) = server.await {
        return Err(StatusServerError::Bind { addr, source });
    }
    Ok(())
}
