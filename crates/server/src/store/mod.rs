// Persistence gateway for rooms and messages.
//
// The engine depends only on `RoomStore`; the Postgres and in-memory
// backends are interchangeable. Identifier and timestamp assignment for
// messages happens here, on write — callers must not pre-assign them.
//
// Concurrency contract: callers serialize mutations per room (the
// registry's room lock is held across every call that mutates), so the
// non-monotonic operations may read-modify-write. The monotonic ones
// (participant join, read-by add) still use atomic array updates on the
// Postgres side.

mod memory;
mod postgres;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use palaver_common::types::{AiMode, Attachment, Message, Room, RoomId};

pub use memory::MemoryRooms;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("room not found")]
    RoomNotFound,

    #[error("message not found")]
    MessageNotFound,

    #[error("store query failed: {0}")]
    Backend(#[from] sqlx::Error),
}

/// Draft for a message append; the store fills in id and timestamp.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub room_id: RoomId,
    pub sender: String,
    pub text: String,
    pub attachment: Option<Attachment>,
    pub is_ai: bool,
}

/// Durable store for rooms and messages.
#[derive(Clone)]
pub enum RoomStore {
    Postgres(PgPool),
    Memory(Arc<RwLock<MemoryRooms>>),
}

impl RoomStore {
    /// Fresh in-memory store (development default, and tests).
    pub fn memory() -> Self {
        Self::Memory(Arc::new(RwLock::new(MemoryRooms::default())))
    }

    /// Connect to Postgres and make sure the schema exists.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url).await?;
        postgres::ensure_schema(&pool).await?;
        Ok(Self::Postgres(pool))
    }

    pub async fn create_room(&self, room: &Room) -> Result<(), StoreError> {
        match self {
            Self::Postgres(pool) => postgres::create_room(pool, room).await,
            Self::Memory(state) => memory::create_room(&mut *state.write().await, room),
        }
    }

    pub async fn room(&self, room_id: &RoomId) -> Result<Option<Room>, StoreError> {
        match self {
            Self::Postgres(pool) => postgres::room(pool, room_id).await,
            Self::Memory(state) => memory::room(&*state.read().await, room_id),
        }
    }

    pub async fn room_exists(&self, room_id: &RoomId) -> Result<bool, StoreError> {
        Ok(self.room(room_id).await?.is_some())
    }

    /// Idempotent roster add; returns the updated room.
    pub async fn join_room(&self, room_id: &RoomId, username: &str) -> Result<Room, StoreError> {
        match self {
            Self::Postgres(pool) => postgres::join_room(pool, room_id, username).await,
            Self::Memory(state) => memory::join_room(&mut *state.write().await, room_id, username),
        }
    }

    /// Persist a draft; assigns id and creation timestamp.
    pub async fn add_message(&self, draft: NewMessage) -> Result<Message, StoreError> {
        match self {
            Self::Postgres(pool) => postgres::add_message(pool, draft).await,
            Self::Memory(state) => memory::add_message(&mut *state.write().await, draft),
        }
    }

    pub async fn message(
        &self,
        room_id: &RoomId,
        message_id: Uuid,
    ) -> Result<Message, StoreError> {
        match self {
            Self::Postgres(pool) => postgres::message(pool, room_id, message_id).await,
            Self::Memory(state) => memory::message(&*state.read().await, room_id, message_id),
        }
    }

    /// The most recent `limit` messages, oldest first.
    pub async fn messages(
        &self,
        room_id: &RoomId,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        match self {
            Self::Postgres(pool) => postgres::messages(pool, room_id, limit).await,
            Self::Memory(state) => memory::messages(&*state.read().await, room_id, limit),
        }
    }

    pub async fn update_ai_mode(&self, room_id: &RoomId, mode: AiMode) -> Result<(), StoreError> {
        match self {
            Self::Postgres(pool) => postgres::update_ai_mode(pool, room_id, mode).await,
            Self::Memory(state) => {
                memory::update_ai_mode(&mut *state.write().await, room_id, mode)
            }
        }
    }

    pub async fn add_reaction(
        &self,
        room_id: &RoomId,
        message_id: Uuid,
        emoji: &str,
        reactor: &str,
    ) -> Result<Message, StoreError> {
        match self {
            Self::Postgres(pool) => {
                postgres::add_reaction(pool, room_id, message_id, emoji, reactor).await
            }
            Self::Memory(state) => {
                memory::add_reaction(&mut *state.write().await, room_id, message_id, emoji, reactor)
            }
        }
    }

    pub async fn edit_message(
        &self,
        room_id: &RoomId,
        message_id: Uuid,
        new_text: &str,
    ) -> Result<Message, StoreError> {
        match self {
            Self::Postgres(pool) => {
                postgres::edit_message(pool, room_id, message_id, new_text).await
            }
            Self::Memory(state) => {
                memory::edit_message(&mut *state.write().await, room_id, message_id, new_text)
            }
        }
    }

    /// Hard delete; there is no tombstone and no recovery.
    pub async fn delete_message(
        &self,
        room_id: &RoomId,
        message_id: Uuid,
    ) -> Result<(), StoreError> {
        match self {
            Self::Postgres(pool) => postgres::delete_message(pool, room_id, message_id).await,
            Self::Memory(state) => {
                memory::delete_message(&mut *state.write().await, room_id, message_id)
            }
        }
    }

    pub async fn mark_read(
        &self,
        room_id: &RoomId,
        message_id: Uuid,
        reader: &str,
    ) -> Result<Message, StoreError> {
        match self {
            Self::Postgres(pool) => postgres::mark_read(pool, room_id, message_id, reader).await,
            Self::Memory(state) => {
                memory::mark_read(&mut *state.write().await, room_id, message_id, reader)
            }
        }
    }

    pub async fn set_pinned(
        &self,
        room_id: &RoomId,
        message_id: Uuid,
        pinned: bool,
    ) -> Result<Message, StoreError> {
        match self {
            Self::Postgres(pool) => postgres::set_pinned(pool, room_id, message_id, pinned).await,
            Self::Memory(state) => {
                memory::set_pinned(&mut *state.write().await, room_id, message_id, pinned)
            }
        }
    }

    /// Rooms whose last summary is older than `cutoff`.
    pub async fn rooms_for_summary(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Room>, StoreError> {
        match self {
            Self::Postgres(pool) => postgres::rooms_for_summary(pool, cutoff).await,
            Self::Memory(state) => memory::rooms_for_summary(&*state.read().await, cutoff),
        }
    }

    pub async fn update_last_summary(
        &self,
        room_id: &RoomId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        match self {
            Self::Postgres(pool) => postgres::update_last_summary(pool, room_id, at).await,
            Self::Memory(state) => {
                memory::update_last_summary(&mut *state.write().await, room_id, at)
            }
        }
    }
}
