// In-memory backend: development default and unit-test double.
//
// Messages live in per-room insertion order, which doubles as the
// creation-timestamp order the contract requires (ties broken by
// insertion sequence).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use palaver_common::types::{AiMode, Message, Room, RoomId};

use super::{NewMessage, StoreError};

#[derive(Debug, Default)]
pub struct MemoryRooms {
    rooms: HashMap<RoomId, MemoryRoom>,
}

#[derive(Debug)]
struct MemoryRoom {
    room: Room,
    messages: Vec<Message>,
}

pub(super) fn create_room(state: &mut MemoryRooms, room: &Room) -> Result<(), StoreError> {
    state
        .rooms
        .insert(room.room_id.clone(), MemoryRoom { room: room.clone(), messages: Vec::new() });
    Ok(())
}

pub(super) fn room(state: &MemoryRooms, room_id: &RoomId) -> Result<Option<Room>, StoreError> {
    Ok(state.rooms.get(room_id).map(|entry| entry.room.clone()))
}

pub(super) fn join_room(
    state: &mut MemoryRooms,
    room_id: &RoomId,
    username: &str,
) -> Result<Room, StoreError> {
    let entry = state.rooms.get_mut(room_id).ok_or(StoreError::RoomNotFound)?;
    entry.room.add_participant(username);
    Ok(entry.room.clone())
}

pub(super) fn add_message(
    state: &mut MemoryRooms,
    draft: NewMessage,
) -> Result<Message, StoreError> {
    let entry = state.rooms.get_mut(&draft.room_id).ok_or(StoreError::RoomNotFound)?;
    let message = Message {
        id: Uuid::new_v4(),
        room_id: draft.room_id,
        sender: draft.sender,
        text: draft.text,
        attachment: draft.attachment,
        created_at: Utc::now(),
        edited: false,
        pinned: false,
        reactions: Default::default(),
        read_by: Default::default(),
        is_ai: draft.is_ai,
    };
    entry.messages.push(message.clone());
    Ok(message)
}

pub(super) fn message(
    state: &MemoryRooms,
    room_id: &RoomId,
    message_id: Uuid,
) -> Result<Message, StoreError> {
    let entry = state.rooms.get(room_id).ok_or(StoreError::RoomNotFound)?;
    entry
        .messages
        .iter()
        .find(|message| message.id == message_id)
        .cloned()
        .ok_or(StoreError::MessageNotFound)
}

pub(super) fn messages(
    state: &MemoryRooms,
    room_id: &RoomId,
    limit: usize,
) -> Result<Vec<Message>, StoreError> {
    // Unknown rooms yield an empty history, matching the Postgres query.
    let Some(entry) = state.rooms.get(room_id) else {
        return Ok(Vec::new());
    };
    let start = entry.messages.len().saturating_sub(limit);
    Ok(entry.messages[start..].to_vec())
}

pub(super) fn update_ai_mode(
    state: &mut MemoryRooms,
    room_id: &RoomId,
    mode: AiMode,
) -> Result<(), StoreError> {
    let entry = state.rooms.get_mut(room_id).ok_or(StoreError::RoomNotFound)?;
    entry.room.ai_mode = mode;
    Ok(())
}

pub(super) fn add_reaction(
    state: &mut MemoryRooms,
    room_id: &RoomId,
    message_id: Uuid,
    emoji: &str,
    reactor: &str,
) -> Result<Message, StoreError> {
    mutate_message(state, room_id, message_id, |message| {
        message.add_reaction(emoji, reactor);
    })
}

pub(super) fn edit_message(
    state: &mut MemoryRooms,
    room_id: &RoomId,
    message_id: Uuid,
    new_text: &str,
) -> Result<Message, StoreError> {
    mutate_message(state, room_id, message_id, |message| {
        message.text = new_text.to_owned();
        message.edited = true;
    })
}

pub(super) fn delete_message(
    state: &mut MemoryRooms,
    room_id: &RoomId,
    message_id: Uuid,
) -> Result<(), StoreError> {
    let entry = state.rooms.get_mut(room_id).ok_or(StoreError::RoomNotFound)?;
    let before = entry.messages.len();
    entry.messages.retain(|message| message.id != message_id);
    if entry.messages.len() == before {
        return Err(StoreError::MessageNotFound);
    }
    Ok(())
}

pub(super) fn mark_read(
    state: &mut MemoryRooms,
    room_id: &RoomId,
    message_id: Uuid,
    reader: &str,
) -> Result<Message, StoreError> {
    mutate_message(state, room_id, message_id, |message| {
        message.mark_read(reader);
    })
}

pub(super) fn set_pinned(
    state: &mut MemoryRooms,
    room_id: &RoomId,
    message_id: Uuid,
    pinned: bool,
) -> Result<Message, StoreError> {
    mutate_message(state, room_id, message_id, |message| {
        message.pinned = pinned;
    })
}

pub(super) fn rooms_for_summary(
    state: &MemoryRooms,
    cutoff: DateTime<Utc>,
) -> Result<Vec<Room>, StoreError> {
    Ok(state
        .rooms
        .values()
        .filter(|entry| entry.room.last_summary < cutoff)
        .map(|entry| entry.room.clone())
        .collect())
}

pub(super) fn update_last_summary(
    state: &mut MemoryRooms,
    room_id: &RoomId,
    at: DateTime<Utc>,
) -> Result<(), StoreError> {
    let entry = state.rooms.get_mut(room_id).ok_or(StoreError::RoomNotFound)?;
    entry.room.last_summary = at;
    Ok(())
}

fn mutate_message(
    state: &mut MemoryRooms,
    room_id: &RoomId,
    message_id: Uuid,
    apply: impl FnOnce(&mut Message),
) -> Result<Message, StoreError> {
    let entry = state.rooms.get_mut(room_id).ok_or(StoreError::RoomNotFound)?;
    let message = entry
        .messages
        .iter_mut()
        .find(|message| message.id == message_id)
        .ok_or(StoreError::MessageNotFound)?;
    apply(message);
    Ok(message.clone())
}
