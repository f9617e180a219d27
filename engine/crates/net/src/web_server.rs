use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use session::ConnectionId;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::services::{ServeDir, ServeFile};

use crate::channels::{
    NetToWorld, RegisterSession, RegisterTx, SessionWriteRx, UnregisterTx, WorldTx,
};
use crate::protocol::decode_client_message;
use crate::rate_limiter::{ConnectionLimiter, ConnectionLimits};

/// Channel ends the web server needs to talk to the world thread and the
/// output router.
#[derive(Clone)]
pub struct ServerChannels {
    pub world_tx: WorldTx,
    pub register_tx: RegisterTx,
    pub unregister_tx: UnregisterTx,
}

#[derive(Debug, Clone, Default)]
pub struct WebServerConfig {
    /// Serve files from this directory (SPA fallback to index.html).
    pub static_dir: Option<PathBuf>,
    pub limits: ConnectionLimits,
}

/// Shared state for the axum WebSocket handler.
#[derive(Clone)]
struct AppState {
    next_connection_id: Arc<AtomicU64>,
    channels: ServerChannels,
    limiter: Arc<Mutex<ConnectionLimiter>>,
    max_input_length: usize,
}

/// Bind `addr` and serve until the shutdown flag flips to true.
pub async fn run_web_server_with_shutdown(
    addr: String,
    channels: ServerChannels,
    config: WebServerConfig,
    shutdown_rx: watch::Receiver<bool>,
) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Web server listening on {}", addr);
    serve(listener, channels, config, Some(shutdown_rx)).await
}

/// Serve on an already-bound listener. The `/ws` route handles WebSocket
/// upgrades.
pub async fn serve(
    listener: TcpListener,
    channels: ServerChannels,
    config: WebServerConfig,
    shutdown_rx: Option<watch::Receiver<bool>>,
) -> Result<(), std::io::Error> {
    let state = AppState {
        next_connection_id: Arc::new(AtomicU64::new(1)),
        channels,
        max_input_length: config.limits.max_input_length,
        limiter: ConnectionLimiter::new(config.limits),
    };

    let mut app = Router::new()
        .route("/ws", get(ws_upgrade_handler))
        .with_state(state);

    if let Some(dir) = config.static_dir {
        let index_path = dir.join("index.html");
        let serve_dir = ServeDir::new(&dir).not_found_service(ServeFile::new(index_path));
        app = app.fallback_service(serve_dir);
        tracing::info!(dir = %dir.display(), "Serving static files");
    }

    let service = app.into_make_service_with_connect_info::<SocketAddr>();

    if let Some(mut rx) = shutdown_rx {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                while !*rx.borrow() {
                    if rx.changed().await.is_err() {
                        return;
                    }
                }
                tracing::info!("Web server shutting down gracefully");
            })
            .await
    } else {
        axum::serve(listener, service).await
    }
}

async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    let admitted = state
        .limiter
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .try_admit(peer.ip());
    if let Err(rejection) = admitted {
        tracing::warn!(%peer, "Rejecting WebSocket connection: {}", rejection);
        return (StatusCode::SERVICE_UNAVAILABLE, rejection.to_string()).into_response();
    }

    let failed_limiter = state.limiter.clone();
    ws.on_failed_upgrade(move |e| {
        tracing::warn!(%peer, "WebSocket upgrade failed: {}", e);
        failed_limiter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .release(peer.ip());
    })
    .on_upgrade(move |socket| handle_ws_connection(socket, state, peer))
}

async fn handle_ws_connection(socket: WebSocket, state: AppState, peer: SocketAddr) {
    let connection_id = ConnectionId(state.next_connection_id.fetch_add(1, Ordering::Relaxed));
    tracing::info!(%connection_id, %peer, "New WebSocket connection");

    let (mut ws_writer, mut ws_reader) = socket.split();

    let (write_tx, mut write_rx): (_, SessionWriteRx) = tokio::sync::mpsc::unbounded_channel();

    // Register with the output router before the world thread can answer.
    let _ = state.channels.register_tx.send(RegisterSession {
        connection_id,
        write_tx,
    });
    let _ = state
        .channels
        .world_tx
        .send(NetToWorld::Connected { connection_id });

    // Writer task: forward routed frames as WS text frames
    let writer_handle = tokio::spawn(async move {
        while let Some(text) = write_rx.recv().await {
            if ws_writer.send(Message::Text(text.into())).await.is_err() {
                return;
            }
        }
        // Router dropped our writer (shutdown or forced disconnect).
        let _ = ws_writer.close().await;
    });

    while let Some(result) = ws_reader.next().await {
        match result {
            Ok(Message::Text(text)) => {
                match decode_client_message(text.as_str(), state.max_input_length) {
                    Ok(message) => {
                        let _ = state.channels.world_tx.send(NetToWorld::Message {
                            connection_id,
                            message,
                        });
                    }
                    Err(e) => {
                        tracing::debug!(%connection_id, "Dropping client frame: {}", e);
                    }
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {} // Ignore binary, ping, pong
            Err(e) => {
                tracing::debug!(%connection_id, "WebSocket read error: {}", e);
                break;
            }
        }
    }

    let _ = state
        .channels
        .world_tx
        .send(NetToWorld::Disconnected { connection_id });
    let _ = state.channels.unregister_tx.send(connection_id);
    state
        .limiter
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .release(peer.ip());

    writer_handle.abort();
    tracing::info!(%connection_id, "WebSocket session ended");
}
