//! Connection handlers for the Palaver server.
//!
//! This module binds the websocket transport to the realtime core: it
//! generates connection identifiers, wires the connect/disconnect hooks to
//! the lifecycle manager, drains each connection's outbound queue, and
//! dispatches decoded client events to the presence coordinator and relay
//! engine.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use palaver_core::{
    ConnectionRegistry, LifecycleManager, PresenceCoordinator, RelayEngine, RelayError,
    RoomDirectory,
};
use palaver_protocol::{codec, ClientEvent, ServerEvent};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Live connections and their outbound queues.
    pub registry: Arc<ConnectionRegistry>,
    /// Room membership.
    pub rooms: Arc<RoomDirectory>,
    /// Join/leave orchestration.
    pub coordinator: PresenceCoordinator,
    /// Message and typing fan-out.
    pub relay: RelayEngine,
    /// Connect/disconnect binding.
    pub lifecycle: LifecycleManager,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let rooms = Arc::new(RoomDirectory::new());

        Self {
            coordinator: PresenceCoordinator::new(registry.clone(), rooms.clone()),
            relay: RelayEngine::new(registry.clone(), rooms.clone()),
            lifecycle: LifecycleManager::new(registry.clone(), rooms.clone()),
            registry,
            rooms,
            config,
        }
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    // Build router
    let app = Router::new()
        .route(&config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Palaver server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": state.registry.connection_count(),
        "rooms": state.rooms.room_count(),
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.registry.connection_count() >= state.config.limits.max_connections {
        warn!("Connection limit reached, rejecting upgrade");
        metrics::record_error("connection_limit");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    ws.on_upgrade(move |socket| handle_websocket(socket, state))
        .into_response()
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    // Generate connection ID
    let connection_id = format!(
        "conn_{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default()
    );

    debug!(connection = %connection_id, "WebSocket connected");

    // Outbound queue: the per-connection send primitive handed to the core
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ServerEvent>();

    if let Err(e) = state.lifecycle.on_connect(connection_id.clone(), event_tx) {
        error!(connection = %connection_id, error = %e, "Connect hook rejected");
        metrics::record_error("duplicate_connection");
        return;
    }

    // Split the WebSocket
    let (mut sender, mut receiver) = socket.split();

    // Read buffer for partial frames
    let mut read_buffer = BytesMut::with_capacity(4096);

    // Message processing loop
    loop {
        tokio::select! {
            biased;

            // Drain events fanned out to this connection
            Some(event) = event_rx.recv() => {
                match codec::encode(&event) {
                    Ok(data) => {
                        metrics::record_event(data.len(), "outbound");
                        if sender.send(Message::Binary(data.to_vec())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!(connection = %connection_id, error = %e, "Outbound encode failed");
                        metrics::record_error("encode");
                    }
                }
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        if data.len() > state.config.limits.max_message_size {
                            warn!(
                                connection = %connection_id,
                                size = data.len(),
                                "Inbound frame over size limit, dropping"
                            );
                            metrics::record_error("oversize");
                            continue;
                        }

                        let start = Instant::now();
                        read_buffer.extend_from_slice(&data);

                        if !drain_frames(&mut read_buffer, &connection_id, &state) {
                            break;
                        }

                        metrics::record_latency(start.elapsed().as_secs_f64());
                    }
                    Some(Ok(Message::Text(text))) => {
                        // Treat text as binary
                        read_buffer.extend_from_slice(text.as_bytes());

                        if !drain_frames(&mut read_buffer, &connection_id, &state) {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        // Ignore pongs
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    // Cleanup: leave every joined room with user-left notices, then unregister
    state.lifecycle.on_disconnect(&connection_id);
    metrics::set_active_rooms(state.rooms.room_count());

    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Decode and dispatch every complete frame in the read buffer.
///
/// Returns `false` when the stream can no longer be parsed and the
/// connection must be dropped (a corrupt length-prefixed stream cannot be
/// resynchronized).
fn drain_frames(read_buffer: &mut BytesMut, connection_id: &str, state: &Arc<AppState>) -> bool {
    loop {
        let buffered = read_buffer.len();
        match codec::decode_from::<ClientEvent>(read_buffer) {
            Ok(Some(event)) => {
                metrics::record_event(buffered - read_buffer.len(), "inbound");
                handle_event(event, connection_id, state);
            }
            Ok(None) => return true,
            Err(e) => {
                warn!(connection = %connection_id, error = %e, "Undecodable frame, closing");
                metrics::record_error("decode");
                return false;
            }
        }
    }
}

/// Dispatch a decoded client event to the core.
fn handle_event(event: ClientEvent, connection_id: &str, state: &Arc<AppState>) {
    let name = event.name();

    let result = match event {
        ClientEvent::JoinRoom { room, user_id } => {
            let result = state.coordinator.handle_join(connection_id, &room, &user_id);
            if result.is_ok() {
                metrics::record_join();
                metrics::set_active_rooms(state.rooms.room_count());
            }
            result
        }
        ClientEvent::LeaveRoom { room, user_id } => {
            let result = state.coordinator.handle_leave(connection_id, &room, &user_id);
            if result.is_ok() {
                metrics::set_active_rooms(state.rooms.room_count());
            }
            result
        }
        ClientEvent::SendMessage {
            room,
            message,
            user_id,
        } => state
            .relay
            .handle_message(connection_id, &room, &user_id, &message),
        ClientEvent::Typing {
            room,
            user_id,
            is_typing,
        } => state
            .relay
            .handle_typing(connection_id, &room, &user_id, is_typing),
    };

    match result {
        Ok(recipients) => {
            debug!(connection = %connection_id, event = name, recipients, "Event handled");
        }
        // Dropped silently at the protocol level
        Err(RelayError::InvalidPayload(reason)) => {
            debug!(connection = %connection_id, event = name, reason, "Invalid payload dropped");
            metrics::record_error("invalid_payload");
        }
        Err(e) => {
            error!(connection = %connection_id, event = name, error = %e, "Event handling fault");
            metrics::record_error("logic_fault");
        }
    }
}
