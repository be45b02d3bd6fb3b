// Postgres backend.
//
// Messages are queried newest-first for index locality and reversed
// before returning, so callers always see ascending creation order.
// `seq` breaks creation-timestamp ties.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use uuid::Uuid;

use palaver_common::types::{AiMode, Message, Room, RoomId};

use super::{NewMessage, StoreError};

const SCHEMA_DDL: &str = "
CREATE TABLE IF NOT EXISTS rooms (
    room_id      TEXT PRIMARY KEY,
    name         TEXT NOT NULL,
    participants TEXT[] NOT NULL DEFAULT '{}',
    ai_mode      TEXT NOT NULL DEFAULT 'summarizer',
    last_summary TIMESTAMPTZ NOT NULL DEFAULT now(),
    created_at   TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS messages (
    id         UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    room_id    TEXT NOT NULL REFERENCES rooms(room_id),
    seq        BIGSERIAL,
    sender     TEXT NOT NULL,
    body       TEXT NOT NULL DEFAULT '',
    attachment JSONB,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    edited     BOOLEAN NOT NULL DEFAULT FALSE,
    pinned     BOOLEAN NOT NULL DEFAULT FALSE,
    reactions  JSONB NOT NULL DEFAULT '{}'::jsonb,
    read_by    TEXT[] NOT NULL DEFAULT '{}',
    is_ai      BOOLEAN NOT NULL DEFAULT FALSE
);

CREATE INDEX IF NOT EXISTS messages_room_created_idx
    ON messages (room_id, created_at DESC, seq DESC);

CREATE INDEX IF NOT EXISTS rooms_last_summary_idx
    ON rooms (last_summary);
";

const MESSAGE_COLUMNS: &str =
    "id, room_id, sender, body, attachment, created_at, edited, pinned, reactions, read_by, is_ai";

pub(super) async fn ensure_schema(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::raw_sql(SCHEMA_DDL).execute(pool).await?;
    Ok(())
}

#[derive(Debug, sqlx::FromRow)]
struct RoomRow {
    room_id: String,
    name: String,
    participants: Vec<String>,
    ai_mode: String,
    last_summary: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl RoomRow {
    fn into_room(self) -> Room {
        Room {
            room_id: RoomId::new(self.room_id),
            name: self.name,
            participants: self.participants,
            // Rows predating a mode rename fall back to the default
            // rather than poisoning every read of the room.
            ai_mode: self.ai_mode.parse().unwrap_or_default(),
            last_summary: self.last_summary,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    id: Uuid,
    room_id: String,
    sender: String,
    body: String,
    attachment: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    edited: bool,
    pinned: bool,
    reactions: serde_json::Value,
    read_by: Vec<String>,
    is_ai: bool,
}

impl MessageRow {
    fn into_message(self) -> Message {
        Message {
            id: self.id,
            room_id: RoomId::new(self.room_id),
            sender: self.sender,
            text: self.body,
            attachment: self.attachment.and_then(|value| serde_json::from_value(value).ok()),
            created_at: self.created_at,
            edited: self.edited,
            pinned: self.pinned,
            reactions: serde_json::from_value::<BTreeMap<String, BTreeSet<String>>>(self.reactions)
                .unwrap_or_default(),
            read_by: self.read_by.into_iter().collect(),
            is_ai: self.is_ai,
        }
    }
}

pub(super) async fn create_room(pool: &PgPool, room: &Room) -> Result<(), StoreError> {
    sqlx::query(
        "
        INSERT INTO rooms (room_id, name, participants, ai_mode, last_summary, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        ",
    )
    .bind(room.room_id.as_str())
    .bind(&room.name)
    .bind(&room.participants)
    .bind(room.ai_mode.as_str())
    .bind(room.last_summary)
    .bind(room.created_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub(super) async fn room(pool: &PgPool, room_id: &RoomId) -> Result<Option<Room>, StoreError> {
    let row = sqlx::query_as::<_, RoomRow>(
        "
        SELECT room_id, name, participants, ai_mode, last_summary, created_at
        FROM rooms
        WHERE room_id = $1
        ",
    )
    .bind(room_id.as_str())
    .fetch_optional(pool)
    .await?;
    Ok(row.map(RoomRow::into_room))
}

pub(super) async fn join_room(
    pool: &PgPool,
    room_id: &RoomId,
    username: &str,
) -> Result<Room, StoreError> {
    // Atomic array union: duplicate joins leave the roster untouched.
    let row = sqlx::query_as::<_, RoomRow>(
        "
        UPDATE rooms
        SET participants = CASE
            WHEN $2 = ANY(participants) THEN participants
            ELSE array_append(participants, $2)
        END
        WHERE room_id = $1
        RETURNING room_id, name, participants, ai_mode, last_summary, created_at
        ",
    )
    .bind(room_id.as_str())
    .bind(username)
    .fetch_optional(pool)
    .await?
    .ok_or(StoreError::RoomNotFound)?;
    Ok(row.into_room())
}

pub(super) async fn add_message(pool: &PgPool, draft: NewMessage) -> Result<Message, StoreError> {
    let attachment = draft
        .attachment
        .as_ref()
        .map(|attachment| serde_json::to_value(attachment).unwrap_or_default());

    let row = sqlx::query_as::<_, MessageRow>(&format!(
        "
        INSERT INTO messages (room_id, sender, body, attachment, is_ai)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING {MESSAGE_COLUMNS}
        "
    ))
    .bind(draft.room_id.as_str())
    .bind(&draft.sender)
    .bind(&draft.text)
    .bind(attachment)
    .bind(draft.is_ai)
    .fetch_one(pool)
    .await?;
    Ok(row.into_message())
}

pub(super) async fn message(
    pool: &PgPool,
    room_id: &RoomId,
    message_id: Uuid,
) -> Result<Message, StoreError> {
    let row = sqlx::query_as::<_, MessageRow>(&format!(
        "
        SELECT {MESSAGE_COLUMNS}
        FROM messages
        WHERE room_id = $1 AND id = $2
        "
    ))
    .bind(room_id.as_str())
    .bind(message_id)
    .fetch_optional(pool)
    .await?
    .ok_or(StoreError::MessageNotFound)?;
    Ok(row.into_message())
}

pub(super) async fn messages(
    pool: &PgPool,
    room_id: &RoomId,
    limit: usize,
) -> Result<Vec<Message>, StoreError> {
    let mut rows = sqlx::query_as::<_, MessageRow>(&format!(
        "
        SELECT {MESSAGE_COLUMNS}
        FROM messages
        WHERE room_id = $1
        ORDER BY created_at DESC, seq DESC
        LIMIT $2
        "
    ))
    .bind(room_id.as_str())
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;
    rows.reverse();
    Ok(rows.into_iter().map(MessageRow::into_message).collect())
}

pub(super) async fn update_ai_mode(
    pool: &PgPool,
    room_id: &RoomId,
    mode: AiMode,
) -> Result<(), StoreError> {
    let result = sqlx::query("UPDATE rooms SET ai_mode = $2 WHERE room_id = $1")
        .bind(room_id.as_str())
        .bind(mode.as_str())
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::RoomNotFound);
    }
    Ok(())
}

pub(super) async fn add_reaction(
    pool: &PgPool,
    room_id: &RoomId,
    message_id: Uuid,
    emoji: &str,
    reactor: &str,
) -> Result<Message, StoreError> {
    // Read-modify-write: the caller holds the room lock across this call.
    let mut current = message(pool, room_id, message_id).await?;
    current.add_reaction(emoji, reactor);
    write_reactions(pool, room_id, message_id, &current).await?;
    Ok(current)
}

pub(super) async fn edit_message(
    pool: &PgPool,
    room_id: &RoomId,
    message_id: Uuid,
    new_text: &str,
) -> Result<Message, StoreError> {
    let row = sqlx::query_as::<_, MessageRow>(&format!(
        "
        UPDATE messages
        SET body = $3, edited = TRUE
        WHERE room_id = $1 AND id = $2
        RETURNING {MESSAGE_COLUMNS}
        "
    ))
    .bind(room_id.as_str())
    .bind(message_id)
    .bind(new_text)
    .fetch_optional(pool)
    .await?
    .ok_or(StoreError::MessageNotFound)?;
    Ok(row.into_message())
}

pub(super) async fn delete_message(
    pool: &PgPool,
    room_id: &RoomId,
    message_id: Uuid,
) -> Result<(), StoreError> {
    let result = sqlx::query("DELETE FROM messages WHERE room_id = $1 AND id = $2")
        .bind(room_id.as_str())
        .bind(message_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::MessageNotFound);
    }
    Ok(())
}

pub(super) async fn mark_read(
    pool: &PgPool,
    room_id: &RoomId,
    message_id: Uuid,
    reader: &str,
) -> Result<Message, StoreError> {
    // Atomic array union, same shape as the roster join.
    let row = sqlx::query_as::<_, MessageRow>(&format!(
        "
        UPDATE messages
        SET read_by = CASE
            WHEN $3 = ANY(read_by) THEN read_by
            ELSE array_append(read_by, $3)
        END
        WHERE room_id = $1 AND id = $2
        RETURNING {MESSAGE_COLUMNS}
        "
    ))
    .bind(room_id.as_str())
    .bind(message_id)
    .bind(reader)
    .fetch_optional(pool)
    .await?
    .ok_or(StoreError::MessageNotFound)?;
    Ok(row.into_message())
}

pub(super) async fn set_pinned(
    pool: &PgPool,
    room_id: &RoomId,
    message_id: Uuid,
    pinned: bool,
) -> Result<Message, StoreError> {
    let row = sqlx::query_as::<_, MessageRow>(&format!(
        "
        UPDATE messages
        SET pinned = $3
        WHERE room_id = $1 AND id = $2
        RETURNING {MESSAGE_COLUMNS}
        "
    ))
    .bind(room_id.as_str())
    .bind(message_id)
    .bind(pinned)
    .fetch_optional(pool)
    .await?
    .ok_or(StoreError::MessageNotFound)?;
    Ok(row.into_message())
}

pub(super) async fn rooms_for_summary(
    pool: &PgPool,
    cutoff: DateTime<Utc>,
) -> Result<Vec<Room>, StoreError> {
    let rows = sqlx::query_as::<_, RoomRow>(
        "
        SELECT room_id, name, participants, ai_mode, last_summary, created_at
        FROM rooms
        WHERE last_summary < $1
        ",
    )
    .bind(cutoff)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(RoomRow::into_room).collect())
}

pub(super) async fn update_last_summary(
    pool: &PgPool,
    room_id: &RoomId,
    at: DateTime<Utc>,
) -> Result<(), StoreError> {
    let result = sqlx::query("UPDATE rooms SET last_summary = $2 WHERE room_id = $1")
        .bind(room_id.as_str())
        .bind(at)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::RoomNotFound);
    }
    Ok(())
}

async fn write_reactions(
    pool: &PgPool,
    room_id: &RoomId,
    message_id: Uuid,
    message: &Message,
) -> Result<(), StoreError> {
    let reactions = serde_json::to_value(&message.reactions).unwrap_or_default();
    let result = sqlx::query("UPDATE messages SET reactions = $3 WHERE room_id = $1 AND id = $2")
        .bind(room_id.as_str())
        .bind(message_id)
        .bind(reactions)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::MessageNotFound);
    }
    Ok(())
}
