// Per-event handlers for the live channel.
//
// Every handler returns `Err(frame)` for failures scoped to the
// originating connection; successful mutations broadcast to the room
// before returning. Broadcast order therefore matches application order
// for a given room.

use tokio::sync::mpsc;
use uuid::Uuid;

use palaver_common::protocol::ws::{ClientEvent, ServerEvent};
use palaver_common::types::{AiMode, Attachment, RoomId};

use super::WsState;
use crate::error::{ChatError, ErrorCode};
use crate::validation::{validate_text, validate_username};

pub(crate) async fn handle_event(
    state: &WsState,
    connection_id: Uuid,
    outbound: &mpsc::UnboundedSender<ServerEvent>,
    event: ClientEvent,
) -> Result<(), ServerEvent> {
    match event {
        ClientEvent::JoinRoom { room_id, username } => {
            handle_join(state, connection_id, outbound, room_id, username).await
        }
        ClientEvent::SendMessage { room_id, sender, text, attachment } => {
            handle_send(state, room_id, sender, text, attachment).await
        }
        ClientEvent::ChangeAiMode { room_id, mode } => {
            handle_change_ai_mode(state, room_id, mode).await
        }
        ClientEvent::Typing { room_id, username } => {
            let event = ServerEvent::UserTyping { username };
            state.broadcaster.publish_excluding(&room_id, &event, connection_id).await;
            Ok(())
        }
        ClientEvent::StopTyping { room_id, username } => {
            let event = ServerEvent::UserStopTyping { username };
            state.broadcaster.publish_excluding(&room_id, &event, connection_id).await;
            Ok(())
        }
        ClientEvent::AddReaction { room_id, message_id, emoji, username } => {
            let message = state
                .ledger
                .add_reaction(&room_id, message_id, &emoji, &username)
                .await
                .map_err(error_frame)?;
            state
                .broadcaster
                .publish(
                    &room_id,
                    &ServerEvent::ReactionAdded { message_id: message.id, emoji, username },
                )
                .await;
            Ok(())
        }
        ClientEvent::EditMessage { room_id, message_id, new_text } => {
            handle_edit(state, connection_id, room_id, message_id, new_text).await
        }
        ClientEvent::DeleteMessage { room_id, message_id } => {
            handle_delete(state, connection_id, room_id, message_id).await
        }
        ClientEvent::MarkRead { room_id, message_id, username } => {
            state
                .ledger
                .mark_read(&room_id, message_id, &username)
                .await
                .map_err(error_frame)?;
            // The reader already shows the receipt locally.
            state
                .broadcaster
                .publish_excluding(
                    &room_id,
                    &ServerEvent::MessageRead { message_id, username },
                    connection_id,
                )
                .await;
            Ok(())
        }
        ClientEvent::PinMessage { room_id, message_id } => {
            state.ledger.set_pinned(&room_id, message_id, true).await.map_err(error_frame)?;
            state.broadcaster.publish(&room_id, &ServerEvent::MessagePinned { message_id }).await;
            Ok(())
        }
        ClientEvent::UnpinMessage { room_id, message_id } => {
            state.ledger.set_pinned(&room_id, message_id, false).await.map_err(error_frame)?;
            state
                .broadcaster
                .publish(&room_id, &ServerEvent::MessageUnpinned { message_id })
                .await;
            Ok(())
        }
    }
}

/// Join: roster add (idempotent), then membership registration, then a
/// join notification to the others. A failed join registers nothing.
async fn handle_join(
    state: &WsState,
    connection_id: Uuid,
    outbound: &mpsc::UnboundedSender<ServerEvent>,
    room_id: RoomId,
    username: String,
) -> Result<(), ServerEvent> {
    let username = validate_username(&username).map_err(ChatError::into_event)?.to_owned();

    state.registry.join(&room_id, &username).await.map_err(error_frame)?;
    state
        .registry
        .register_connection(connection_id, room_id.clone(), username.clone(), outbound.clone())
        .await;
    state
        .broadcaster
        .publish_excluding(&room_id, &ServerEvent::UserJoined { username }, connection_id)
        .await;
    Ok(())
}

async fn handle_send(
    state: &WsState,
    room_id: RoomId,
    sender: String,
    text: String,
    attachment: Option<Attachment>,
) -> Result<(), ServerEvent> {
    let sender = validate_username(&sender).map_err(ChatError::into_event)?.to_owned();
    let text = validate_text(&text).map_err(ChatError::into_event)?.to_owned();

    let message =
        state.ledger.append(&room_id, &sender, &text, attachment).await.map_err(error_frame)?;
    state
        .broadcaster
        .publish(&room_id, &ServerEvent::NewMessage { message })
        .await;

    // Fire-and-forget: the sender's acknowledgment does not wait on this.
    let _ = state.dispatcher.maybe_dispatch(&room_id, &text);
    Ok(())
}

async fn handle_change_ai_mode(
    state: &WsState,
    room_id: RoomId,
    mode: String,
) -> Result<(), ServerEvent> {
    let mode: AiMode = mode
        .parse()
        .map_err(|_| ChatError::from_code(ErrorCode::InvalidMode).into_event())?;

    let accepted = state.registry.set_ai_mode(&room_id, mode).await.map_err(error_frame)?;
    state.broadcaster.publish(&room_id, &ServerEvent::AiModeChanged { mode: accepted }).await;
    Ok(())
}

/// Edits and deletes derive the actor from the connection's membership —
/// the registered participant name, not a frame field a client could
/// spoof more easily.
async fn handle_edit(
    state: &WsState,
    connection_id: Uuid,
    room_id: RoomId,
    message_id: Uuid,
    new_text: String,
) -> Result<(), ServerEvent> {
    let actor = acting_participant(state, connection_id).await?;
    let new_text = validate_text(&new_text).map_err(ChatError::into_event)?.to_owned();

    let message = state
        .ledger
        .edit(&room_id, message_id, &new_text, &actor)
        .await
        .map_err(error_frame)?;
    state.broadcaster.publish(&room_id, &ServerEvent::MessageEdited { message }).await;
    Ok(())
}

async fn handle_delete(
    state: &WsState,
    connection_id: Uuid,
    room_id: RoomId,
    message_id: Uuid,
) -> Result<(), ServerEvent> {
    let actor = acting_participant(state, connection_id).await?;

    state.ledger.delete(&room_id, message_id, &actor).await.map_err(error_frame)?;
    state.broadcaster.publish(&room_id, &ServerEvent::MessageDeleted { message_id }).await;
    Ok(())
}

async fn acting_participant(
    state: &WsState,
    connection_id: Uuid,
) -> Result<String, ServerEvent> {
    state
        .registry
        .membership(connection_id)
        .await
        .map(|membership| membership.participant)
        .ok_or_else(|| {
            ChatError::new(ErrorCode::Forbidden, "join a room before modifying messages")
                .into_event()
        })
}

fn error_frame(error: impl Into<ChatError>) -> ServerEvent {
    error.into().into_event()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::{AssistantClient, Collaborator};
    use crate::broadcast::Broadcaster;
    use crate::dispatch::CommandDispatcher;
    use crate::ledger::MessageLedger;
    use crate::registry::RoomRegistry;
    use crate::store::RoomStore;
    use std::sync::Arc;

    struct Harness {
        state: WsState,
        room_id: RoomId,
    }

    async fn harness() -> Harness {
        let store = RoomStore::memory();
        let registry = Arc::new(RoomRegistry::new(store.clone()));
        let ledger = Arc::new(MessageLedger::new(store, registry.locks()));
        let broadcaster = Broadcaster::new(Arc::clone(&registry));
        let collaborator: Arc<dyn Collaborator> = Arc::new(
            AssistantClient::new("http://localhost:0/v1", "test-model", None)
                .expect("client should build"),
        );
        let dispatcher = Arc::new(CommandDispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&ledger),
            broadcaster.clone(),
            collaborator,
        ));
        let state = WsState { registry, ledger, broadcaster, dispatcher };
        let room = state.registry.create_room("Standup", "Alice").await.unwrap();
        Harness { state, room_id: room.room_id }
    }

    async fn connect(
        harness: &Harness,
        username: &str,
    ) -> (Uuid, mpsc::UnboundedReceiver<ServerEvent>) {
        let connection_id = Uuid::new_v4();
        let (sender, receiver) = mpsc::unbounded_channel();
        handle_event(
            &harness.state,
            connection_id,
            &sender,
            ClientEvent::JoinRoom { room_id: harness.room_id.clone(), username: username.into() },
        )
        .await
        .expect("join should succeed");
        (connection_id, receiver)
    }

    fn error_code(event: &ServerEvent) -> &str {
        match event {
            ServerEvent::Error { code, .. } => code,
            other => panic!("expected error frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn join_notifies_existing_members_but_not_the_joiner() {
        let harness = harness().await;
        let (_alice, mut alice_rx) = connect(&harness, "Alice").await;
        let (_bob, mut bob_rx) = connect(&harness, "Bob").await;

        assert_eq!(
            alice_rx.try_recv().expect("alice sees bob join"),
            ServerEvent::UserJoined { username: "Bob".into() }
        );
        assert!(bob_rx.try_recv().is_err(), "joiner gets no echo");
    }

    #[tokio::test]
    async fn join_unknown_room_yields_not_found_frame_and_no_membership() {
        let harness = harness().await;
        let connection_id = Uuid::new_v4();
        let (sender, _receiver) = mpsc::unbounded_channel();

        let error = handle_event(
            &harness.state,
            connection_id,
            &sender,
            ClientEvent::JoinRoom { room_id: RoomId::new("missing0"), username: "Bob".into() },
        )
        .await
        .expect_err("join should fail");

        assert_eq!(error_code(&error), "NOT_FOUND");
        assert!(harness.state.registry.membership(connection_id).await.is_none());
    }

    #[tokio::test]
    async fn send_broadcasts_to_everyone_including_the_sender() {
        let harness = harness().await;
        let (alice, mut alice_rx) = connect(&harness, "Alice").await;
        let (_bob, mut bob_rx) = connect(&harness, "Bob").await;
        let _ = alice_rx.try_recv(); // drain bob's join notification

        let (sender, _rx) = mpsc::unbounded_channel();
        handle_event(
            &harness.state,
            alice,
            &sender,
            ClientEvent::SendMessage {
                room_id: harness.room_id.clone(),
                sender: "Alice".into(),
                text: "hello".into(),
                attachment: None,
            },
        )
        .await
        .expect("send should succeed");

        for receiver in [&mut alice_rx, &mut bob_rx] {
            match receiver.try_recv().expect("message should be delivered") {
                ServerEvent::NewMessage { message } => assert_eq!(message.text, "hello"),
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn empty_send_yields_an_empty_message_frame() {
        let harness = harness().await;
        let (alice, _alice_rx) = connect(&harness, "Alice").await;

        let (sender, _rx) = mpsc::unbounded_channel();
        let error = handle_event(
            &harness.state,
            alice,
            &sender,
            ClientEvent::SendMessage {
                room_id: harness.room_id.clone(),
                sender: "Alice".into(),
                text: "   ".into(),
                attachment: None,
            },
        )
        .await
        .expect_err("empty send should fail");

        assert_eq!(error_code(&error), "EMPTY_MESSAGE");
    }

    #[tokio::test]
    async fn invalid_mode_is_rejected_not_defaulted() {
        let harness = harness().await;
        let (alice, mut alice_rx) = connect(&harness, "Alice").await;

        let (sender, _rx) = mpsc::unbounded_channel();
        let error = handle_event(
            &harness.state,
            alice,
            &sender,
            ClientEvent::ChangeAiMode { room_id: harness.room_id.clone(), mode: "oracle".into() },
        )
        .await
        .expect_err("invalid mode should fail");
        assert_eq!(error_code(&error), "INVALID_MODE");
        assert!(alice_rx.try_recv().is_err(), "no mode-changed broadcast");

        handle_event(
            &harness.state,
            alice,
            &sender,
            ClientEvent::ChangeAiMode {
                room_id: harness.room_id.clone(),
                mode: "brainstorm".into(),
            },
        )
        .await
        .expect("valid mode should apply");
        assert_eq!(
            alice_rx.try_recv().unwrap(),
            ServerEvent::AiModeChanged { mode: AiMode::Brainstorm }
        );
    }

    #[tokio::test]
    async fn typing_is_broadcast_to_others_only() {
        let harness = harness().await;
        let (alice, mut alice_rx) = connect(&harness, "Alice").await;
        let (_bob, mut bob_rx) = connect(&harness, "Bob").await;
        let _ = alice_rx.try_recv();

        let (sender, _rx) = mpsc::unbounded_channel();
        handle_event(
            &harness.state,
            alice,
            &sender,
            ClientEvent::Typing { room_id: harness.room_id.clone(), username: "Alice".into() },
        )
        .await
        .unwrap();

        assert_eq!(
            bob_rx.try_recv().unwrap(),
            ServerEvent::UserTyping { username: "Alice".into() }
        );
        assert!(alice_rx.try_recv().is_err(), "typer gets no echo");
    }

    #[tokio::test]
    async fn edit_uses_the_membership_identity() {
        let harness = harness().await;
        let (alice, mut alice_rx) = connect(&harness, "Alice").await;
        let (bob, _bob_rx) = connect(&harness, "Bob").await;
        let _ = alice_rx.try_recv();

        let message =
            harness.state.ledger.append(&harness.room_id, "Alice", "helo", None).await.unwrap();

        let (sender, _rx) = mpsc::unbounded_channel();
        // Bob's connection cannot edit Alice's message.
        let error = handle_event(
            &harness.state,
            bob,
            &sender,
            ClientEvent::EditMessage {
                room_id: harness.room_id.clone(),
                message_id: message.id,
                new_text: "hijacked".into(),
            },
        )
        .await
        .expect_err("cross-sender edit should fail");
        assert_eq!(error_code(&error), "FORBIDDEN");

        // An unjoined connection cannot edit at all.
        let error = handle_event(
            &harness.state,
            Uuid::new_v4(),
            &sender,
            ClientEvent::EditMessage {
                room_id: harness.room_id.clone(),
                message_id: message.id,
                new_text: "hijacked".into(),
            },
        )
        .await
        .expect_err("memberless edit should fail");
        assert_eq!(error_code(&error), "FORBIDDEN");

        handle_event(
            &harness.state,
            alice,
            &sender,
            ClientEvent::EditMessage {
                room_id: harness.room_id.clone(),
                message_id: message.id,
                new_text: "hello".into(),
            },
        )
        .await
        .expect("sender edit should succeed");

        match alice_rx.try_recv().unwrap() {
            ServerEvent::MessageEdited { message } => {
                assert_eq!(message.text, "hello");
                assert!(message.edited);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn mark_read_notifies_others_only() {
        let harness = harness().await;
        let (_alice, mut alice_rx) = connect(&harness, "Alice").await;
        let (bob, mut bob_rx) = connect(&harness, "Bob").await;
        let _ = alice_rx.try_recv();

        let message =
            harness.state.ledger.append(&harness.room_id, "Alice", "read me", None).await.unwrap();

        let (sender, _rx) = mpsc::unbounded_channel();
        handle_event(
            &harness.state,
            bob,
            &sender,
            ClientEvent::MarkRead {
                room_id: harness.room_id.clone(),
                message_id: message.id,
                username: "Bob".into(),
            },
        )
        .await
        .unwrap();

        assert_eq!(
            alice_rx.try_recv().unwrap(),
            ServerEvent::MessageRead { message_id: message.id, username: "Bob".into() }
        );
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn reaction_on_missing_message_is_not_found() {
        let harness = harness().await;
        let (alice, _alice_rx) = connect(&harness, "Alice").await;

        let (sender, _rx) = mpsc::unbounded_channel();
        let error = handle_event(
            &harness.state,
            alice,
            &sender,
            ClientEvent::AddReaction {
                room_id: harness.room_id.clone(),
                message_id: Uuid::new_v4(),
                emoji: "👍".into(),
                username: "Alice".into(),
            },
        )
        .await
        .expect_err("reaction on missing message should fail");
        assert_eq!(error_code(&error), "NOT_FOUND");
    }
}
