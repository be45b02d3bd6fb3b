// Periodic auto-summary task.
//
// Independent of any connection: each tick selects rooms whose last
// summary is older than the period, summarizes the ones with enough
// recent traffic, and broadcasts the result. A failure in one room never
// aborts the rest of the tick — the room simply stays eligible and is
// retried next time.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use palaver_common::protocol::ws::ServerEvent;
use palaver_common::types::{AiMode, Room};

use crate::assistant::Collaborator;
use crate::broadcast::Broadcaster;
use crate::ledger::MessageLedger;
use crate::store::RoomStore;

/// Tick period, and the staleness bound on `last_summary`.
pub const SUMMARY_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Transcript depth handed to the summarizer.
pub const SUMMARY_CONTEXT_MESSAGES: usize = 20;

/// Rooms with fewer recent messages are skipped (and stay eligible).
pub const SUMMARY_MIN_MESSAGES: usize = 5;

/// Marker prefix on scheduler-produced system messages.
pub const AUTO_SUMMARY_PREFIX: &str = "**Auto Summary**: ";

#[derive(Debug, Default, PartialEq, Eq)]
pub struct TickOutcome {
    pub summarized: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct SummaryScheduler {
    store: RoomStore,
    ledger: Arc<MessageLedger>,
    broadcaster: Broadcaster,
    collaborator: Arc<dyn Collaborator>,
    period: Duration,
}

impl SummaryScheduler {
    pub fn new(
        store: RoomStore,
        ledger: Arc<MessageLedger>,
        broadcaster: Broadcaster,
        collaborator: Arc<dyn Collaborator>,
    ) -> Self {
        Self { store, ledger, broadcaster, collaborator, period: SUMMARY_INTERVAL }
    }

    #[cfg(test)]
    fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Run forever on the configured period.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; freshly created rooms are not
        // stale yet, so consuming it here costs nothing.
        interval.tick().await;

        loop {
            interval.tick().await;
            let outcome = self.tick().await;
            debug!(
                summarized = outcome.summarized,
                skipped = outcome.skipped,
                failed = outcome.failed,
                "summary tick finished"
            );
        }
    }

    /// One scheduler pass. Public so tests can drive it directly.
    pub async fn tick(&self) -> TickOutcome {
        let staleness = chrono::Duration::from_std(self.period)
            .unwrap_or_else(|_| chrono::Duration::minutes(10));
        let cutoff = Utc::now() - staleness;

        let due = match self.store.rooms_for_summary(cutoff).await {
            Ok(rooms) => rooms,
            Err(error) => {
                error!(error = %error, "failed to select rooms for summary");
                return TickOutcome::default();
            }
        };

        let mut outcome = TickOutcome::default();
        for room in due {
            match self.summarize_room(&room).await {
                Ok(true) => outcome.summarized += 1,
                Ok(false) => outcome.skipped += 1,
                Err(error) => {
                    outcome.failed += 1;
                    warn!(
                        room_id = %room.room_id,
                        error = %error,
                        "auto-summary failed, room stays eligible"
                    );
                }
            }
        }
        outcome
    }

    /// Returns `Ok(false)` when the room was skipped for low volume —
    /// its timestamp is left untouched so it stays eligible next tick.
    async fn summarize_room(&self, room: &Room) -> anyhow::Result<bool> {
        let transcript = self
            .ledger
            .recent(&room.room_id, SUMMARY_CONTEXT_MESSAGES)
            .await
            .context("loading recent messages")?;
        if transcript.len() < SUMMARY_MIN_MESSAGES {
            return Ok(false);
        }

        let summary = self
            .collaborator
            .generate(&transcript, AiMode::Summarizer)
            .await
            .context("collaborator call")?;

        let message = self
            .ledger
            .append_system(&room.room_id, &format!("{AUTO_SUMMARY_PREFIX}{summary}"))
            .await
            .context("appending auto summary")?;
        self.store
            .update_last_summary(&room.room_id, Utc::now())
            .await
            .context("refreshing last-summary timestamp")?;

        self.broadcaster.publish(&room.room_id, &ServerEvent::NewMessage { message }).await;
        Ok(true)
    }
}
