use crate::ais_logic::config::RelayConfig;
use crate::ais_logic::state::AppState;
use anyhow::{Context, Result};
use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use axum_server::tls_rustls::RustlsConfig;
use lib_relay::core::ReadyState;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;

/// Builds the HTTP surface: `/ws` for subscribers, `/health` for liveness and
/// the bundled client UI for everything else.
pub fn router(state: AppState, static_dir: &Path) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .fallback_service(ServeDir::new(static_dir))
        .layer(cors)
        .with_state(state)
}

pub async fn run(config: RelayConfig, app_state: AppState, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
    let app = router(app_state, &config.static_dir);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    if let Some(tls) = config.tls {
        let tls_config = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
            .await
            .with_context(|| format!("Failed to load TLS configuration from {}", tls.cert_path.display()))?;

        let handle = axum_server::Handle::new();
        let signal_handle = handle.clone();
        tokio::spawn(async move {
            shutdown.recv().await.ok();
            log::info!("Downstream server shutting down.");
            signal_handle.graceful_shutdown(Some(Duration::from_secs(10)));
        });

        log::info!("Downstream server listening on wss://{}/ws", addr);
        axum_server::bind_rustls(addr, tls_config)
            .handle(handle)
            .serve(app.into_make_service())
            .await?;
    } else {
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        log::info!("Downstream server listening on ws://{}/ws", addr);
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.recv().await.ok();
                log::info!("Downstream server shutting down.");
            })
            .await?;
    }
    Ok(())
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

// Liveness only: stays 200 while the upstream is reconnecting.
async fn health_handler() -> StatusCode {
    StatusCode::OK
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let (client_id, mut frames) = state.registry.register();

    loop {
        tokio::select! {
            // Handle incoming messages from the client
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Close(_))) => {
                        state.registry.set_ready_state(client_id, ReadyState::Closing);
                        break;
                    }
                    Some(Ok(_)) => {} // clients have nothing to say to the relay
                    Some(Err(e)) => {
                        log::debug!("Client {} read error: {}", client_id, e);
                        state.registry.set_ready_state(client_id, ReadyState::Closed);
                        break;
                    }
                    None => break,
                }
            }
            // Greeting first, then upstream frames in receipt order
            outbound = frames.recv() => {
                let Some(frame) = outbound else { break };
                if socket.send(Message::Text(frame.to_string().into())).await.is_err() {
                    break; // client disconnected
                }
            }
        }
    }

    state.registry.unregister(client_id);
}
