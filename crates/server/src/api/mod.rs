// Request/response surface: room creation, joining, and history.
//
// These are the only operations that surface structured HTTP errors;
// everything else rides the live channel.

use std::sync::Arc;

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};

use palaver_common::types::{Message, Room, RoomId};

use crate::error::ChatError;
use crate::ledger::MessageLedger;
use crate::registry::RoomRegistry;
use crate::validation::{validate_room_id, validate_room_name, validate_username};

/// History page size when the query omits `limit`.
const DEFAULT_HISTORY_LIMIT: usize = 50;
const MAX_HISTORY_LIMIT: usize = 200;

#[derive(Clone)]
pub struct ApiState {
    pub registry: Arc<RoomRegistry>,
    pub ledger: Arc<MessageLedger>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/rooms", post(create_room))
        .route("/api/rooms/{room_id}/join", post(join_room))
        .route("/api/rooms/{room_id}/messages", get(message_history))
        .with_state(state)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateRoomRequest {
    pub name: String,
    pub username: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateRoomResponse {
    pub room_id: RoomId,
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JoinRoomRequest {
    pub username: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JoinRoomResponse {
    pub room: Room,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

async fn create_room(
    State(state): State<ApiState>,
    Json(payload): Json<CreateRoomRequest>,
) -> Result<(StatusCode, Json<CreateRoomResponse>), ChatError> {
    let name = validate_room_name(&payload.name)?;
    let username = validate_username(&payload.username)?;

    let room = state.registry.create_room(name, username).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateRoomResponse { room_id: room.room_id, name: room.name }),
    ))
}

async fn join_room(
    State(state): State<ApiState>,
    Path(room_id): Path<String>,
    Json(payload): Json<JoinRoomRequest>,
) -> Result<Json<JoinRoomResponse>, ChatError> {
    let room_id = RoomId::new(validate_room_id(&room_id)?);
    let username = validate_username(&payload.username)?;

    let room = state.registry.join(&room_id, username).await?;

    Ok(Json(JoinRoomResponse { room }))
}

async fn message_history(
    State(state): State<ApiState>,
    Path(room_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<Message>>, ChatError> {
    let room_id = RoomId::new(validate_room_id(&room_id)?);
    let limit = normalize_limit(query.limit);

    let messages = state.ledger.recent(&room_id, limit).await?;

    Ok(Json(messages))
}

fn normalize_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, MAX_HISTORY_LIMIT)
}
