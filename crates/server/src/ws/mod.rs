// Live channel: one socket per connection, one event loop per socket.
//
// The loop multiplexes three sources — heartbeat ticks, the outbound
// fan-out queue, and inbound frames. Handler failures become scoped
// `error` frames on the same connection; the transport never sees an
// uncaught failure and the connection stays open.

pub mod handler;

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
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use palaver_common::protocol::ws::{decode_client_event, encode_server_event, ServerEvent};

use crate::broadcast::Broadcaster;
use crate::dispatch::CommandDispatcher;
use crate::error::ErrorCode;
use crate::ledger::MessageLedger;
use crate::registry::RoomRegistry;

pub(crate) const HEARTBEAT_INTERVAL_MS: u64 = 15_000;
pub(crate) const HEARTBEAT_TIMEOUT_MS: u64 = 10_000;
pub(crate) const MAX_FRAME_BYTES: usize = 65_536;

#[derive(Clone)]
pub struct WsState {
    pub registry: Arc<RoomRegistry>,
    pub ledger: Arc<MessageLedger>,
    pub broadcaster: Broadcaster,
    pub dispatcher: Arc<CommandDispatcher>,
}

pub fn router(state: WsState) -> Router {
    Router::new().route("/ws", get(ws_upgrade)).with_state(state)
}

async fn ws_upgrade(State(state): State<WsState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.max_frame_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: WsState, mut socket: WebSocket) {
    let connection_id = Uuid::new_v4();
    let (outbound_sender, mut outbound_receiver) = mpsc::unbounded_channel::<ServerEvent>();

    // Heartbeat: server pings every HEARTBEAT_INTERVAL_MS, disconnects if
    // no pong arrives within HEARTBEAT_TIMEOUT_MS.
    let mut heartbeat_interval =
        tokio::time::interval(std::time::Duration::from_millis(HEARTBEAT_INTERVAL_MS));
    heartbeat_interval.reset(); // skip immediate first tick
    let mut last_pong = Instant::now();
    let heartbeat_timeout = std::time::Duration::from_millis(HEARTBEAT_TIMEOUT_MS);

    loop {
        tokio::select! {
            _ = heartbeat_interval.tick() => {
                if last_pong.elapsed() > heartbeat_timeout {
                    warn!(connection_id = %connection_id, "heartbeat timeout, disconnecting");
                    break;
                }
                if socket.send(Message::Ping(vec![].into())).await.is_err() {
                    break;
                }
            }
            maybe_outbound = outbound_receiver.recv() => {
                match maybe_outbound {
                    Some(event) => {
                        if send_event(&mut socket, &event).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            maybe_message = socket.recv() => {
                let Some(message) = maybe_message else {
                    break;
                };

                match message {
                    Ok(Message::Text(raw_frame)) => {
                        let event = match decode_client_event(&raw_frame) {
                            Ok(event) => event,
                            Err(error) => {
                                debug!(connection_id = %connection_id, error = %error, "undecodable frame");
                                let _ = outbound_sender.send(ErrorCode::InvalidInput.event());
                                continue;
                            }
                        };

                        if let Err(error_event) =
                            handler::handle_event(&state, connection_id, &outbound_sender, event)
                                .await
                        {
                            let _ = outbound_sender.send(error_event);
                        }
                    }
                    Ok(Message::Ping(payload)) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Pong(_)) => {
                        last_pong = Instant::now();
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
        }
    }

    // Disconnect tears down only the membership; mutations already in
    // flight complete on their own tasks.
    if let Some(membership) = state.registry.unregister(connection_id).await {
        state
            .broadcaster
            .publish_excluding(
                &membership.room_id,
                &ServerEvent::UserLeft { username: membership.participant },
                connection_id,
            )
            .await;
    }
}

async fn send_event(socket: &mut WebSocket, event: &ServerEvent) -> Result<(), ()> {
    let encoded = encode_server_event(event).map_err(|_| ())?;
    socket.send(Message::Text(encoded.into())).await.map_err(|_| ())
}
