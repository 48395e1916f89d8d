//! HTTP API over [`BatchService`].
//!
//! Routes live in [`routes`], handlers in `handlers`, and the mapping from
//! [`crate::BatchError`] to status codes in `error`.

mod error;
mod handlers;
mod routes;

pub use error::ErrorBody;
pub use handlers::content_disposition;
pub use routes::create_router;

use crate::batch::BatchService;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

/// Shared state for the web server.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<BatchService>,
}

impl AppState {
    pub fn new(service: Arc<BatchService>) -> Self {
        Self { service }
    }
}

/// Serve the API on `addr` until `shutdown` resolves.
pub async fn serve(
    service: Arc<BatchService>,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let app = create_router(AppState::new(service));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}
