// Room registry: authoritative room metadata plus the ephemeral
// connection-to-room map.
//
// Presence is connection-scoped, not identity-scoped — the same display
// name may hold several live memberships (two tabs, two devices). The
// roster on the room record is the coarser, persistent list.
//
// The registry also owns the per-room lock table. Every mutation of a
// room's state (roster, mode, any ledger operation) runs under that
// room's lock, held across the persistence call, so concurrent mutations
// to one room serialize while unrelated rooms proceed in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use palaver_common::protocol::ws::ServerEvent;
use palaver_common::types::{AiMode, Room, RoomId};

use crate::store::{RoomStore, StoreError};

/// One logical lock per room identifier.
#[derive(Default)]
pub struct RoomLocks {
    locks: RwLock<HashMap<RoomId, Arc<Mutex<()>>>>,
}

impl RoomLocks {
    /// Acquire the lock for a room, creating it on first use. The guard
    /// is owned so it can be held across store calls and awaits.
    pub async fn acquire(&self, room_id: &RoomId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut guard = self.locks.write().await;
            guard.entry(room_id.clone()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        lock.lock_owned().await
    }
}

/// Live binding of a connection to a (room, participant) pair.
#[derive(Debug, Clone)]
pub struct ConnectionMembership {
    pub room_id: RoomId,
    pub participant: String,
    pub(crate) outbound: mpsc::UnboundedSender<ServerEvent>,
}

pub struct RoomRegistry {
    store: RoomStore,
    locks: Arc<RoomLocks>,
    connections: RwLock<HashMap<Uuid, ConnectionMembership>>,
}

impl RoomRegistry {
    pub fn new(store: RoomStore) -> Self {
        Self {
            store,
            locks: Arc::new(RoomLocks::default()),
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// The shared lock table, for the ledger.
    pub fn locks(&self) -> Arc<RoomLocks> {
        Arc::clone(&self.locks)
    }

    /// Create a room with the creator as sole participant and the default
    /// AI mode. The identifier is generated here; timestamps start now.
    pub async fn create_room(&self, name: &str, creator: &str) -> Result<Room, StoreError> {
        let now = Utc::now();
        let room = Room {
            room_id: RoomId::generate(),
            name: name.to_owned(),
            participants: vec![creator.to_owned()],
            ai_mode: AiMode::default(),
            last_summary: now,
            created_at: now,
        };
        self.store.create_room(&room).await?;
        Ok(room)
    }

    /// Add a participant to the roster (idempotent) and return the
    /// current snapshot. Callers still emit a join notification per call
    /// — rejoining from a second device is visible to the room.
    pub async fn join(&self, room_id: &RoomId, username: &str) -> Result<Room, StoreError> {
        let _guard = self.locks.acquire(room_id).await;
        self.store.join_room(room_id, username).await
    }

    pub async fn room(&self, room_id: &RoomId) -> Result<Option<Room>, StoreError> {
        self.store.room(room_id).await
    }

    /// Persist a validated mode change and echo the accepted mode.
    pub async fn set_ai_mode(&self, room_id: &RoomId, mode: AiMode) -> Result<AiMode, StoreError> {
        let _guard = self.locks.acquire(room_id).await;
        self.store.update_ai_mode(room_id, mode).await?;
        Ok(mode)
    }

    /// Establish a membership for a live connection. A connection holds
    /// at most one membership; joining a second room replaces the first.
    pub async fn register_connection(
        &self,
        connection_id: Uuid,
        room_id: RoomId,
        participant: String,
        outbound: mpsc::UnboundedSender<ServerEvent>,
    ) {
        let mut guard = self.connections.write().await;
        guard.insert(connection_id, ConnectionMembership { room_id, participant, outbound });
    }

    /// Tear down a connection's membership, returning it so the caller
    /// can emit the leave notification. No-op when the connection never
    /// joined (or already left).
    pub async fn unregister(&self, connection_id: Uuid) -> Option<ConnectionMembership> {
        self.connections.write().await.remove(&connection_id)
    }

    pub async fn membership(&self, connection_id: Uuid) -> Option<ConnectionMembership> {
        self.connections.read().await.get(&connection_id).cloned()
    }

    /// Outbound senders for every live membership in a room, optionally
    /// skipping the originating connection. Senders are collected under
    /// the read lock and used outside it.
    pub(crate) async fn outbound_for_room(
        &self,
        room_id: &RoomId,
        exclude: Option<Uuid>,
    ) -> Vec<mpsc::UnboundedSender<ServerEvent>> {
        let guard = self.connections.read().await;
        guard
            .iter()
            .filter(|(connection_id, _)| Some(**connection_id) != exclude)
            .filter(|(_, membership)| &membership.room_id == room_id)
            .map(|(_, membership)| membership.outbound.clone())
            .collect()
    }
}
