// Room-scoped event fan-out.
//
// Delivery is fire-and-forget: senders are collected under the registry
// read lock and used outside it, and a connection that disconnected
// between selection and send is simply skipped — one dead subscriber
// never fails the publish for the rest.

use std::sync::Arc;

use uuid::Uuid;

use palaver_common::protocol::ws::ServerEvent;
use palaver_common::types::RoomId;

use crate::registry::RoomRegistry;

#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<RoomRegistry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<RoomRegistry>) -> Self {
        Self { registry }
    }

    /// Deliver to every live membership in the room. Returns the number
    /// of connections the event was handed to.
    pub async fn publish(&self, room_id: &RoomId, event: &ServerEvent) -> usize {
        self.fan_out(room_id, event, None).await
    }

    /// Deliver to everyone except the originating connection — used for
    /// events the origin already applied locally (typing, presence,
    /// read receipts).
    pub async fn publish_excluding(
        &self,
        room_id: &RoomId,
        event: &ServerEvent,
        exclude: Uuid,
    ) -> usize {
        self.fan_out(room_id, event, Some(exclude)).await
    }

    async fn fan_out(
        &self,
        room_id: &RoomId,
        event: &ServerEvent,
        exclude: Option<Uuid>,
    ) -> usize {
        let recipients = self.registry.outbound_for_room(room_id, exclude).await;

        let mut delivered = 0;
        for recipient in recipients {
            if recipient.send(event.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }
}
