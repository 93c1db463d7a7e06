//! HTTP helper endpoints.
//!
//! Two endpoints sit beside the control channel: a plain-text liveness probe
//! at `/` and a display-name generator at `/new-user`. The ids handed out
//! here are labels for the UI layer only; registry identities are allocated
//! on the control channel and the two are never linked.

use axum::routing::get;
use axum::{Json, Router};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

/// Body of the liveness probe response.
pub const LIVENESS_MESSAGE: &str = "peercall signaling server is running";

/// Length of generated display-name ids.
const USER_ID_LEN: usize = 12;

/// Response body of `GET /new-user`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub user_id: String,
}

/// Build the helper-endpoint router.
pub fn router() -> Router {
    Router::new()
        .route("/", get(liveness))
        .route("/new-user", get(new_user))
        .layer(TraceLayer::new_for_http())
}

async fn liveness() -> &'static str {
    LIVENESS_MESSAGE
}

async fn new_user() -> Json<NewUser> {
    let user_id = random_user_id();
    debug!("Issued display-name id {}", user_id);
    Json(NewUser { user_id })
}

/// Random lower-case base-36 token.
fn random_user_id() -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    (0..USER_ID_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Serve the helper endpoints until the shutdown signal arrives.
pub(crate) async fn serve(listener: TcpListener, mut shutdown_rx: broadcast::Receiver<()>) {
    let server = axum::serve(listener, router()).with_graceful_shutdown(async move {
        let _ = shutdown_rx.recv().await;
    });
    if let Err(e) = server.await {
        error!("HTTP listener failed: {}", e);
    }
}
