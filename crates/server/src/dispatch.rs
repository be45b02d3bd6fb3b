// Inline AI invocation: `@AI <command>`.
//
// Dispatch is fire-and-forget relative to the message-append path — the
// sender's acknowledgment never waits on the collaborator. The reply
// broadcast is deferred by a short delay so the triggering message's
// broadcast lands first on clients; that delay is presentation only, not
// a correctness requirement.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, warn};

use palaver_common::protocol::ws::ServerEvent;
use palaver_common::types::{AiMode, RoomId};

use crate::assistant::{Collaborator, UNAVAILABLE_REPLY};
use crate::broadcast::Broadcaster;
use crate::ledger::MessageLedger;
use crate::registry::RoomRegistry;

/// Case-sensitive invocation marker checked after trimming.
pub const AI_PREFIX: &str = "@AI";

/// Transcript depth handed to the collaborator.
pub const AI_CONTEXT_MESSAGES: usize = 10;

/// Deferred-broadcast delay for the reply.
pub const AI_REPLY_DELAY_MS: u64 = 1_000;

/// Classify a message body. Returns the command remainder when the body
/// invokes the assistant, `None` for plain messages.
pub fn ai_command(text: &str) -> Option<&str> {
    let rest = text.trim().strip_prefix(AI_PREFIX)?;
    Some(rest.trim())
}

/// Map free-text commands onto a mode: case-insensitive substring
/// containment, first match wins, falling back to the room's configured
/// mode.
pub fn mode_for_command(command: &str, room_mode: AiMode) -> AiMode {
    let lowered = command.to_lowercase();
    if lowered.contains("summarize") {
        AiMode::Summarizer
    } else if lowered.contains("next steps") {
        AiMode::Brainstorm
    } else if lowered.contains("explain") {
        AiMode::Research
    } else {
        room_mode
    }
}

#[derive(Clone)]
pub struct CommandDispatcher {
    registry: Arc<RoomRegistry>,
    ledger: Arc<MessageLedger>,
    broadcaster: Broadcaster,
    collaborator: Arc<dyn Collaborator>,
}

impl CommandDispatcher {
    pub fn new(
        registry: Arc<RoomRegistry>,
        ledger: Arc<MessageLedger>,
        broadcaster: Broadcaster,
        collaborator: Arc<dyn Collaborator>,
    ) -> Self {
        Self { registry, ledger, broadcaster, collaborator }
    }

    /// Spawn an assistant reply when the body invokes `@AI`. Returns the
    /// task handle (tests await it; the socket loop drops it).
    pub fn maybe_dispatch(&self, room_id: &RoomId, text: &str) -> Option<JoinHandle<()>> {
        let command = ai_command(text)?.to_owned();
        let dispatcher = self.clone();
        let room_id = room_id.clone();
        Some(tokio::spawn(async move {
            dispatcher.respond(room_id, command).await;
        }))
    }

    /// Produce and publish exactly one assistant reply. The collaborator
    /// failing (or being unconfigured) degrades to the fixed fallback
    /// text — the room is never left without a reply.
    async fn respond(&self, room_id: RoomId, command: String) {
        let room_mode = match self.registry.room(&room_id).await {
            Ok(Some(room)) => room.ai_mode,
            Ok(None) => {
                warn!(room_id = %room_id, "AI dispatch for a room that no longer exists");
                return;
            }
            Err(error) => {
                warn!(room_id = %room_id, error = %error, "failed to load room for AI dispatch");
                AiMode::default()
            }
        };
        let mode = mode_for_command(&command, room_mode);

        let transcript = match self.ledger.recent(&room_id, AI_CONTEXT_MESSAGES).await {
            Ok(messages) => messages,
            Err(error) => {
                warn!(room_id = %room_id, error = %error, "failed to load AI context, replying without it");
                Vec::new()
            }
        };

        let reply = match self.collaborator.generate(&transcript, mode).await {
            Ok(text) => text,
            Err(error) => {
                warn!(room_id = %room_id, mode = %mode, error = %error, "collaborator call failed, using fallback reply");
                UNAVAILABLE_REPLY.to_owned()
            }
        };

        let message = match self.ledger.append_system(&room_id, &reply).await {
            Ok(message) => message,
            Err(error) => {
                error!(room_id = %room_id, error = %error, "failed to append assistant reply");
                return;
            }
        };

        tokio::time::sleep(Duration::from_millis(AI_REPLY_DELAY_MS)).await;
        self.broadcaster.publish(&room_id, &ServerEvent::NewMessage { message }).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::{AssistantError, GenerateFuture};
    use crate::store::RoomStore;
    use palaver_common::types::Message;
    use std::sync::Mutex;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    #[test]
    fn prefix_detection_is_trimmed_and_case_sensitive() {
        assert_eq!(ai_command("@AI summarize"), Some("summarize"));
        assert_eq!(ai_command("  @AI   explain this  "), Some("explain this"));
        assert_eq!(ai_command("@AI"), Some(""));
        assert_eq!(ai_command("@ai summarize"), None);
        assert_eq!(ai_command("hello @AI"), None);
        assert_eq!(ai_command("hello"), None);
    }

    #[test]
    fn command_classification_is_first_match_wins() {
        let room_mode = AiMode::Moderator;
        assert_eq!(mode_for_command("please summarize this", room_mode), AiMode::Summarizer);
        // "summarize" wins even when a later keyword also appears.
        assert_eq!(mode_for_command("summarize then explain", room_mode), AiMode::Summarizer);
        assert_eq!(mode_for_command("what are our Next Steps?", room_mode), AiMode::Brainstorm);
        assert_eq!(mode_for_command("EXPLAIN the outage", room_mode), AiMode::Research);
        assert_eq!(mode_for_command("carry on", room_mode), AiMode::Moderator);
        assert_eq!(mode_for_command("", room_mode), AiMode::Moderator);
    }

    /// Collaborator double that records what it was asked and replies
    /// with canned text.
    struct Canned {
        reply: Result<String, ()>,
        calls: Mutex<Vec<(usize, AiMode)>>,
    }

    impl Canned {
        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self { reply: Ok(reply.to_owned()), calls: Mutex::new(Vec::new()) })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self { reply: Err(()), calls: Mutex::new(Vec::new()) })
        }
    }

    impl Collaborator for Canned {
        fn generate<'a>(&'a self, transcript: &'a [Message], mode: AiMode) -> GenerateFuture<'a> {
            self.calls.lock().unwrap().push((transcript.len(), mode));
            let reply = self.reply.clone();
            Box::pin(async move {
                reply.map_err(|_| AssistantError::Request("canned failure".to_owned()))
            })
        }
    }

    struct Setup {
        registry: Arc<RoomRegistry>,
        ledger: Arc<MessageLedger>,
        dispatcher: Arc<CommandDispatcher>,
        room_id: RoomId,
    }

    async fn setup(collaborator: Arc<dyn Collaborator>) -> Setup {
        let store = RoomStore::memory();
        let registry = Arc::new(RoomRegistry::new(store.clone()));
        let ledger = Arc::new(MessageLedger::new(store, registry.locks()));
        let broadcaster = Broadcaster::new(Arc::clone(&registry));
        let dispatcher = Arc::new(CommandDispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&ledger),
            broadcaster,
            collaborator,
        ));
        let room = registry.create_room("Standup", "Alice").await.unwrap();
        Setup { registry, ledger, dispatcher, room_id: room.room_id }
    }

    #[tokio::test(start_paused = true)]
    async fn summarize_command_appends_exactly_one_system_reply() {
        let collaborator = Canned::replying("Here is a summary.");
        let s = setup(Arc::clone(&collaborator) as Arc<dyn Collaborator>).await;

        s.ledger.append(&s.room_id, "Alice", "hello", None).await.unwrap();
        let trigger = s.ledger.append(&s.room_id, "Bob", "@AI summarize", None).await.unwrap();

        let handle = s
            .dispatcher
            .maybe_dispatch(&s.room_id, &trigger.text)
            .expect("@AI body should dispatch");
        handle.await.unwrap();

        let history = s.ledger.recent(&s.room_id, 10).await.unwrap();
        assert_eq!(history.len(), 3);
        let reply = history.last().unwrap();
        assert!(reply.is_ai);
        assert_eq!(reply.text, "Here is a summary.");

        // Summarizer mode was forced and the 2-message context was sent,
        // including the triggering message.
        let calls = collaborator.calls.lock().unwrap();
        assert_eq!(calls.as_slice(), &[(2, AiMode::Summarizer)]);
    }

    #[tokio::test(start_paused = true)]
    async fn collaborator_failure_degrades_to_the_fallback_reply() {
        let s = setup(Canned::failing() as Arc<dyn Collaborator>).await;
        s.ledger.append(&s.room_id, "Bob", "@AI summarize", None).await.unwrap();

        s.dispatcher.maybe_dispatch(&s.room_id, "@AI summarize").unwrap().await.unwrap();

        let history = s.ledger.recent(&s.room_id, 10).await.unwrap();
        assert_eq!(history.len(), 2);
        let reply = history.last().unwrap();
        assert!(reply.is_ai);
        assert_eq!(reply.text, UNAVAILABLE_REPLY);
    }

    #[tokio::test(start_paused = true)]
    async fn bare_command_falls_back_to_the_room_mode() {
        let collaborator = Canned::replying("moderated");
        let s = setup(Arc::clone(&collaborator) as Arc<dyn Collaborator>).await;
        s.registry.set_ai_mode(&s.room_id, AiMode::Moderator).await.unwrap();
        s.ledger.append(&s.room_id, "Bob", "@AI help us out", None).await.unwrap();

        s.dispatcher.maybe_dispatch(&s.room_id, "@AI help us out").unwrap().await.unwrap();

        let calls = collaborator.calls.lock().unwrap();
        assert_eq!(calls.as_slice(), &[(1, AiMode::Moderator)]);
    }

    #[tokio::test(start_paused = true)]
    async fn reply_broadcast_reaches_room_members_after_the_delay() {
        let collaborator = Canned::replying("summary text");
        let s = setup(collaborator as Arc<dyn Collaborator>).await;

        let (sender, mut receiver) = mpsc::unbounded_channel();
        s.registry
            .register_connection(Uuid::new_v4(), s.room_id.clone(), "Alice".into(), sender)
            .await;
        s.ledger.append(&s.room_id, "Alice", "@AI summarize", None).await.unwrap();

        s.dispatcher.maybe_dispatch(&s.room_id, "@AI summarize").unwrap().await.unwrap();

        match receiver.try_recv().expect("reply should be broadcast") {
            ServerEvent::NewMessage { message } => {
                assert!(message.is_ai);
                assert_eq!(message.text, "summary text");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn plain_messages_do_not_dispatch() {
        let s = setup(Canned::replying("nope") as Arc<dyn Collaborator>).await;
        assert!(s.dispatcher.maybe_dispatch(&s.room_id, "just chatting").is_none());
    }
}
