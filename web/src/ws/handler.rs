use crate::AppState;
use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use log::*;
use presence::{ConnectionId, Handshake};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};

/// Why a connection ended. Only logged; every reason is handled the same way.
#[derive(Debug, Clone, Copy, PartialEq)]
enum CloseReason {
    ClientClose,
    TransportClose,
    TransportError,
    PingTimeout,
    ServerClose,
}

impl CloseReason {
    fn as_str(&self) -> &'static str {
        match self {
            CloseReason::ClientClose => "client close",
            CloseReason::TransportClose => "transport close",
            CloseReason::TransportError => "transport error",
            CloseReason::PingTimeout => "ping timeout",
            CloseReason::ServerClose => "server close",
        }
    }
}

/// Websocket endpoint. The handshake query carries `userId` and an optional
/// `sessionId` identifying the browser tab.
pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(handshake): Query<Handshake>,
    State(app_state): State<AppState>,
) -> impl IntoResponse {
    debug!("Upgrading websocket for user {:?}", handshake.user_id());

    ws.on_upgrade(move |socket| run_connection(socket, app_state, handshake))
}

/// Drive one websocket from open to close.
///
/// The socket is attached to the transport before the presence actor
/// registers it and detached before the actor deregisters it.
async fn run_connection(socket: WebSocket, app_state: AppState, handshake: Handshake) {
    let connection_id = ConnectionId::new();
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    app_state.transport.attach(connection_id.clone(), tx);
    if let Err(e) = app_state
        .presence
        .connection_opened(connection_id.clone(), handshake)
    {
        error!("Failed to register connection {connection_id}: {e}");
    }
    info!(
        "Websocket connection {connection_id} opened ({} open)",
        app_state.transport.len()
    );

    let ping_interval = app_state.config.ping_interval();
    let ping_timeout = app_state.config.ping_timeout();
    let mut ping_timer = interval_at(Instant::now() + ping_interval, ping_interval);
    let mut last_seen = Instant::now();

    let reason = loop {
        tokio::select! {
            frame = rx.recv() => match frame {
                Some(frame) => {
                    if ws_sender.send(Message::Text(frame.into())).await.is_err() {
                        break CloseReason::TransportError;
                    }
                }
                None => break CloseReason::ServerClose,
            },
            incoming = ws_receiver.next() => match incoming {
                Some(Ok(Message::Close(frame))) => {
                    debug!("Connection {connection_id} close frame: {frame:?}");
                    break CloseReason::ClientClose;
                }
                // Any traffic, pongs included, proves the client is alive.
                Some(Ok(_)) => last_seen = Instant::now(),
                Some(Err(e)) => {
                    debug!("Connection {connection_id} receive error: {e}");
                    break CloseReason::TransportError;
                }
                None => break CloseReason::TransportClose,
            },
            _ = ping_timer.tick() => {
                if last_seen.elapsed() > ping_timeout {
                    break CloseReason::PingTimeout;
                }
                if ws_sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break CloseReason::TransportError;
                }
            }
        }
    };

    app_state.transport.detach(&connection_id);
    if let Err(e) = app_state
        .presence
        .connection_closed(connection_id.clone(), reason.as_str())
    {
        warn!("Failed to deregister connection {connection_id}: {e}");
    }

    let _ = ws_sender.close().await;
    info!(
        "Websocket connection {connection_id} closed. Reason: {} ({} open)",
        reason.as_str(),
        app_state.transport.len()
    );
}
