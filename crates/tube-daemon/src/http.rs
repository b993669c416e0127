use crate::core::DaemonEvent;
use crate::store::SnapshotStore;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use tube_core::cache::CacheStats;
use tube_core::protocol::{Command, PlayerSnapshot};

#[derive(Clone)]
struct HttpState {
    store: Arc<SnapshotStore>,
    event_tx: mpsc::Sender<DaemonEvent>,
}

#[derive(Deserialize)]
struct LoadRequest {
    url: String,
}

pub fn start_server(
    bind_address: String,
    port: u16,
    store: Arc<SnapshotStore>,
    event_tx: mpsc::Sender<DaemonEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(store, event_tx);

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

fn router(store: Arc<SnapshotStore>, event_tx: mpsc::Sender<DaemonEvent>) -> Router {
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/cache", get(get_cache))
        .route("/api/toggle", post(toggle))
        .route("/api/play", post(play))
        .route("/api/pause", post(pause))
        .route("/api/stop", post(stop))
        .route("/api/next", post(next))
        .route("/api/prev", post(prev))
        .route("/api/clear", post(clear))
        .route("/api/select/:idx", post(select))
        .route("/api/remove/:idx", post(remove))
        .route("/api/seek/:permille", post(seek))
        .route("/api/load", post(load))
        .layer(CorsLayer::permissive())
        .with_state(HttpState { store, event_tx })
}

async fn dispatch(state: &HttpState, cmd: Command) -> StatusCode {
    info!("HTTP API: {:?}", cmd);
    if state
        .event_tx
        .send(DaemonEvent::ClientCommand(cmd))
        .await
        .is_err()
    {
        error!("Failed to forward HTTP command");
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    StatusCode::ACCEPTED
}

async fn get_state(State(state): State<HttpState>) -> Json<PlayerSnapshot> {
    Json(state.store.get_state().await)
}

async fn get_cache(State(state): State<HttpState>) -> Result<Json<CacheStats>, StatusCode> {
    let (reply_tx, reply_rx) = oneshot::channel();
    state
        .event_tx
        .send(DaemonEvent::CacheStatsRequest(reply_tx))
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    reply_rx
        .await
        .map(Json)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

async fn toggle(State(state): State<HttpState>) -> StatusCode {
    dispatch(&state, Command::TogglePlay).await
}

async fn play(State(state): State<HttpState>) -> StatusCode {
    dispatch(&state, Command::Play).await
}

async fn pause(State(state): State<HttpState>) -> StatusCode {
    dispatch(&state, Command::Pause).await
}

async fn stop(State(state): State<HttpState>) -> StatusCode {
    dispatch(&state, Command::Stop).await
}

async fn next(State(state): State<HttpState>) -> StatusCode {
    dispatch(&state, Command::Next).await
}

async fn prev(State(state): State<HttpState>) -> StatusCode {
    dispatch(&state, Command::Prev).await
}

async fn clear(State(state): State<HttpState>) -> StatusCode {
    dispatch(&state, Command::Clear).await
}

async fn select(State(state): State<HttpState>, Path(idx): Path<usize>) -> StatusCode {
    dispatch(&state, Command::Select { index: idx }).await
}

async fn remove(State(state): State<HttpState>, Path(idx): Path<usize>) -> StatusCode {
    dispatch(&state, Command::Remove { index: idx }).await
}

/// Seek position in thousandths of the track; values above 1000 clamp.
async fn seek(State(state): State<HttpState>, Path(permille): Path<u32>) -> StatusCode {
    let fraction = f64::from(permille) / 1000.0;
    dispatch(&state, Command::SeekFraction { fraction }).await
}

async fn load(State(state): State<HttpState>, Json(req): Json<LoadRequest>) -> StatusCode {
    dispatch(&state, Command::LoadUrl { url: req.url }).await
}
