//! The front-end WebSocket channel: Axum upgrade handling, one task per
//! client session, subscribe requests handed to the gateway and outbound
//! frames drained from the client's bus channel.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use futures_util::StreamExt;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};

use lib_routing::{FrontendBus, SubscriptionGateway};

use crate::routing_logic::model::{ClientMessage, ServerMessage};

/// Shared state for the front-end routes.
pub struct DownstreamContext {
    pub bus: Arc<FrontendBus>,
    pub gateway: Arc<SubscriptionGateway>,
}

/// Serves the front-end channel on an already-bound listener. Binding
/// happens in `main`, before any backend supervisor is spawned, so no
/// upstream subscription can be sent while the outbound side is missing.
pub async fn run(
    ctx: Arc<DownstreamContext>,
    listener: std::net::TcpListener,
    tls: Option<(PathBuf, PathBuf)>,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    let app = Router::new()
        .route("/condors", get(ws_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(ctx);

    if let Some((cert_path, key_path)) = tls {
        log::info!("Front-end channel serving with TLS");
        let tls_config = RustlsConfig::from_pem_file(cert_path, key_path).await?;
        axum_server::from_tcp_rustls(listener, tls_config)
            .serve(app.into_make_service())
            .await?;
    } else {
        let listener = tokio::net::TcpListener::from_std(listener)?;
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.recv().await.ok();
                log::info!("Front-end channel shutting down.");
            })
            .await?;
    }
    Ok(())
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(ctx): State<Arc<DownstreamContext>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, ctx))
}

async fn health_handler() -> impl IntoResponse {
    (axum::http::StatusCode::OK, "OK")
}

async fn handle_socket(mut socket: WebSocket, ctx: Arc<DownstreamContext>) {
    let (client_id, mut rx) = ctx.bus.add_client();
    log::info!("Client {} connected", client_id);

    loop {
        tokio::select! {
            // Subscribe requests from the client
            msg = socket.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(client_msg) => {
                                if let Some(topics) = client_msg.subscribe {
                                    for topic in topics {
                                        ctx.gateway.handle_subscribe(client_id, &topic);
                                    }
                                }
                            }
                            Err(e) => log::debug!("Ignoring unparseable message from client {}: {}", client_id, e),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
            // Frames routed to this client (replay and live fan-out share
            // the channel, so a replay is always written first)
            frame = rx.recv() => {
                match frame {
                    Some(frame) => {
                        let server_msg = ServerMessage {
                            topic: &frame.topic,
                            payload: &frame.payload,
                        };
                        match serde_json::to_string(&server_msg) {
                            Ok(json) => {
                                if socket.send(Message::Text(json.into())).await.is_err() {
                                    break; // client disconnected
                                }
                            }
                            Err(e) => log::error!("Could not serialize outbound frame: {}", e),
                        }
                    }
                    None => break,
                }
            }
        }
    }

    ctx.bus.remove_client(client_id);
    log::info!("Client {} disconnected", client_id);
}
