// Message ledger: every per-room message mutation, serialized under the
// room lock and applied through the persistence gateway.
//
// Invariants enforced here rather than in the store:
// - a message needs text or an attachment (participant appends only);
// - system messages (`is_ai`) are append-only — no participant-facing
//   edit, delete, reaction, or read-tracking;
// - edit and delete require the actor to be the original sender.

use std::sync::Arc;

use uuid::Uuid;

use palaver_common::types::{Attachment, Message, RoomId};

use crate::assistant::ASSISTANT_SENDER;
use crate::registry::RoomLocks;
use crate::store::{NewMessage, RoomStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("room not found")]
    RoomNotFound,

    #[error("message not found")]
    MessageNotFound,

    #[error("message needs text or an attachment")]
    EmptyMessage,

    #[error("{0}")]
    Forbidden(&'static str),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for LedgerError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::RoomNotFound => Self::RoomNotFound,
            StoreError::MessageNotFound => Self::MessageNotFound,
            other => Self::Store(other),
        }
    }
}

pub struct MessageLedger {
    store: RoomStore,
    locks: Arc<RoomLocks>,
}

impl MessageLedger {
    pub fn new(store: RoomStore, locks: Arc<RoomLocks>) -> Self {
        Self { store, locks }
    }

    /// Append a participant message. The store assigns id and timestamp.
    pub async fn append(
        &self,
        room_id: &RoomId,
        sender: &str,
        text: &str,
        attachment: Option<Attachment>,
    ) -> Result<Message, LedgerError> {
        let text = text.trim();
        if text.is_empty() && attachment.is_none() {
            return Err(LedgerError::EmptyMessage);
        }

        let _guard = self.locks.acquire(room_id).await;
        if !self.store.room_exists(room_id).await? {
            return Err(LedgerError::RoomNotFound);
        }
        let message = self
            .store
            .add_message(NewMessage {
                room_id: room_id.clone(),
                sender: sender.to_owned(),
                text: text.to_owned(),
                attachment,
                is_ai: false,
            })
            .await?;
        Ok(message)
    }

    /// Append an assistant reply. Participant-facing validation does not
    /// apply on this path; replies are non-empty by construction upstream.
    pub async fn append_system(&self, room_id: &RoomId, text: &str) -> Result<Message, LedgerError> {
        let _guard = self.locks.acquire(room_id).await;
        if !self.store.room_exists(room_id).await? {
            return Err(LedgerError::RoomNotFound);
        }
        let message = self
            .store
            .add_message(NewMessage {
                room_id: room_id.clone(),
                sender: ASSISTANT_SENDER.to_owned(),
                text: text.to_owned(),
                attachment: None,
                is_ai: true,
            })
            .await?;
        Ok(message)
    }

    pub async fn edit(
        &self,
        room_id: &RoomId,
        message_id: Uuid,
        new_text: &str,
        editor: &str,
    ) -> Result<Message, LedgerError> {
        let new_text = new_text.trim();

        let _guard = self.locks.acquire(room_id).await;
        let current = self.store.message(room_id, message_id).await?;
        if current.is_ai {
            return Err(LedgerError::Forbidden("system messages cannot be edited"));
        }
        if current.sender != editor {
            return Err(LedgerError::Forbidden("only the sender may edit a message"));
        }
        if new_text.is_empty() && current.attachment.is_none() {
            return Err(LedgerError::EmptyMessage);
        }
        let message = self.store.edit_message(room_id, message_id, new_text).await?;
        Ok(message)
    }

    /// Hard delete — no history is kept.
    pub async fn delete(
        &self,
        room_id: &RoomId,
        message_id: Uuid,
        actor: &str,
    ) -> Result<(), LedgerError> {
        let _guard = self.locks.acquire(room_id).await;
        let current = self.store.message(room_id, message_id).await?;
        if current.is_ai {
            return Err(LedgerError::Forbidden("system messages cannot be deleted"));
        }
        if current.sender != actor {
            return Err(LedgerError::Forbidden("only the sender may delete a message"));
        }
        self.store.delete_message(room_id, message_id).await?;
        Ok(())
    }

    /// Idempotent per (message, emoji, reactor); reactions are monotonic.
    pub async fn add_reaction(
        &self,
        room_id: &RoomId,
        message_id: Uuid,
        emoji: &str,
        reactor: &str,
    ) -> Result<Message, LedgerError> {
        let _guard = self.locks.acquire(room_id).await;
        let current = self.store.message(room_id, message_id).await?;
        if current.is_ai {
            return Err(LedgerError::Forbidden("system messages cannot be reacted to"));
        }
        let message = self.store.add_reaction(room_id, message_id, emoji, reactor).await?;
        Ok(message)
    }

    /// Idempotent read acknowledgment.
    pub async fn mark_read(
        &self,
        room_id: &RoomId,
        message_id: Uuid,
        reader: &str,
    ) -> Result<Message, LedgerError> {
        let _guard = self.locks.acquire(room_id).await;
        let current = self.store.message(room_id, message_id).await?;
        if current.is_ai {
            return Err(LedgerError::Forbidden("system messages are not read-tracked"));
        }
        let message = self.store.mark_read(room_id, message_id, reader).await?;
        Ok(message)
    }

    /// Pin-when-pinned (and unpin-when-unpinned) are no-op transitions,
    /// never errors. Pinning applies to system messages too.
    pub async fn set_pinned(
        &self,
        room_id: &RoomId,
        message_id: Uuid,
        pinned: bool,
    ) -> Result<Message, LedgerError> {
        let _guard = self.locks.acquire(room_id).await;
        let message = self.store.set_pinned(room_id, message_id, pinned).await?;
        Ok(message)
    }

    /// Most recent `limit` messages, oldest first.
    pub async fn recent(&self, room_id: &RoomId, limit: usize) -> Result<Vec<Message>, LedgerError> {
        Ok(self.store.messages(room_id, limit).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RoomRegistry;

    async fn ledger_with_room() -> (MessageLedger, RoomId) {
        let store = RoomStore::memory();
        let registry = RoomRegistry::new(store.clone());
        let room = registry.create_room("Standup", "Alice").await.unwrap();
        (MessageLedger::new(store, registry.locks()), room.room_id)
    }

    #[tokio::test]
    async fn append_rejects_empty_body_without_attachment() {
        let (ledger, room_id) = ledger_with_room().await;

        assert!(matches!(
            ledger.append(&room_id, "Alice", "   ", None).await,
            Err(LedgerError::EmptyMessage)
        ));

        let attachment =
            Attachment { url: "https://files.example/a.png".into(), name: "a.png".into() };
        let message =
            ledger.append(&room_id, "Alice", "", Some(attachment)).await.expect("attachment only");
        assert!(message.text.is_empty());
        assert!(message.attachment.is_some());
    }

    #[tokio::test]
    async fn append_to_unknown_room_is_not_found() {
        let (ledger, _room_id) = ledger_with_room().await;
        assert!(matches!(
            ledger.append(&RoomId::new("missing0"), "Alice", "hi", None).await,
            Err(LedgerError::RoomNotFound)
        ));
    }

    #[tokio::test]
    async fn reactions_commute_and_deduplicate() {
        let (ledger, room_id) = ledger_with_room().await;
        let message = ledger.append(&room_id, "Alice", "hello", None).await.unwrap();

        // Arrival order and duplicates must not matter.
        ledger.add_reaction(&room_id, message.id, "👍", "Bob").await.unwrap();
        ledger.add_reaction(&room_id, message.id, "👍", "Carol").await.unwrap();
        ledger.add_reaction(&room_id, message.id, "👍", "Bob").await.unwrap();
        let updated = ledger.add_reaction(&room_id, message.id, "👍", "Carol").await.unwrap();

        let reactors = &updated.reactions["👍"];
        assert_eq!(reactors.len(), 2);
        assert!(reactors.contains("Bob") && reactors.contains("Carol"));
    }

    #[tokio::test]
    async fn edit_enforces_sender_match_and_sets_flag() {
        let (ledger, room_id) = ledger_with_room().await;
        let message = ledger.append(&room_id, "Alice", "helo", None).await.unwrap();

        assert!(matches!(
            ledger.edit(&room_id, message.id, "hello", "Bob").await,
            Err(LedgerError::Forbidden(_))
        ));

        let edited = ledger.edit(&room_id, message.id, "hello", "Alice").await.unwrap();
        assert_eq!(edited.text, "hello");
        assert!(edited.edited);
    }

    #[tokio::test]
    async fn delete_makes_the_message_unreachable() {
        let (ledger, room_id) = ledger_with_room().await;
        let message = ledger.append(&room_id, "Alice", "oops", None).await.unwrap();

        assert!(matches!(
            ledger.delete(&room_id, message.id, "Bob").await,
            Err(LedgerError::Forbidden(_))
        ));
        ledger.delete(&room_id, message.id, "Alice").await.unwrap();

        assert!(ledger.recent(&room_id, 10).await.unwrap().is_empty());
        for result in [
            ledger.edit(&room_id, message.id, "x", "Alice").await.err(),
            ledger.add_reaction(&room_id, message.id, "👍", "Bob").await.err(),
            ledger.mark_read(&room_id, message.id, "Bob").await.err(),
        ] {
            assert!(matches!(result, Some(LedgerError::MessageNotFound)));
        }
    }

    #[tokio::test]
    async fn system_messages_are_append_only() {
        let (ledger, room_id) = ledger_with_room().await;
        let system = ledger.append_system(&room_id, "summary of the chat").await.unwrap();
        assert!(system.is_ai);
        assert_eq!(system.sender, ASSISTANT_SENDER);

        assert!(matches!(
            ledger.edit(&room_id, system.id, "tampered", ASSISTANT_SENDER).await,
            Err(LedgerError::Forbidden(_))
        ));
        assert!(matches!(
            ledger.delete(&room_id, system.id, ASSISTANT_SENDER).await,
            Err(LedgerError::Forbidden(_))
        ));
        assert!(matches!(
            ledger.add_reaction(&room_id, system.id, "👍", "Bob").await,
            Err(LedgerError::Forbidden(_))
        ));
        assert!(matches!(
            ledger.mark_read(&room_id, system.id, "Bob").await,
            Err(LedgerError::Forbidden(_))
        ));

        // Pinning a summary is allowed.
        let pinned = ledger.set_pinned(&room_id, system.id, true).await.unwrap();
        assert!(pinned.pinned);
    }

    #[tokio::test]
    async fn pin_unpin_pin_lands_pinned_with_no_errors() {
        let (ledger, room_id) = ledger_with_room().await;
        let message = ledger.append(&room_id, "Alice", "keep this", None).await.unwrap();

        assert!(ledger.set_pinned(&room_id, message.id, true).await.unwrap().pinned);
        assert!(!ledger.set_pinned(&room_id, message.id, false).await.unwrap().pinned);
        // Re-pin, including the no-op repeat.
        assert!(ledger.set_pinned(&room_id, message.id, true).await.unwrap().pinned);
        assert!(ledger.set_pinned(&room_id, message.id, true).await.unwrap().pinned);
    }

    #[tokio::test]
    async fn mark_read_is_idempotent() {
        let (ledger, room_id) = ledger_with_room().await;
        let message = ledger.append(&room_id, "Alice", "read me", None).await.unwrap();

        ledger.mark_read(&room_id, message.id, "Bob").await.unwrap();
        let updated = ledger.mark_read(&room_id, message.id, "Bob").await.unwrap();
        assert_eq!(updated.read_by.len(), 1);
        assert!(updated.read_by.contains("Bob"));
    }

    #[tokio::test]
    async fn concurrent_reactions_from_distinct_reactors_both_land() {
        let (ledger, room_id) = ledger_with_room().await;
        let ledger = Arc::new(ledger);
        let message_id = ledger.append(&room_id, "Alice", "race me", None).await.unwrap().id;

        let mut tasks = Vec::new();
        for reactor in ["Bob", "Carol", "Dave", "Erin"] {
            let ledger = Arc::clone(&ledger);
            let room_id = room_id.clone();
            tasks.push(tokio::spawn(async move {
                ledger.add_reaction(&room_id, message_id, "🎉", reactor).await
            }));
        }
        for task in tasks {
            task.await.expect("task should not panic").expect("reaction should apply");
        }

        let latest = ledger.recent(&room_id, 1).await.unwrap().pop().unwrap();
        assert_eq!(latest.reactions["🎉"].len(), 4);
    }
}
