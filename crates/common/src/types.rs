// Core domain types shared across all palaver crates.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Entropy behind a generated room identifier. 6 bytes encode to 8
/// URL-safe characters, which is shareable by hand and collision-safe at
/// any realistic room count.
const ROOM_ID_BYTES: usize = 6;

/// Opaque, externally shareable room identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Generate a fresh 8-character identifier from random bytes.
    pub fn generate() -> Self {
        let mut bytes = [0u8; ROOM_ID_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(raw: &str) -> Self {
        Self(raw.to_owned())
    }
}

/// Instruction template selector for the AI collaborator.
///
/// Invalid values are rejected at the edges (`InvalidAiMode`), never
/// silently defaulted, when a participant sets the mode explicitly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiMode {
    #[default]
    Summarizer,
    Brainstorm,
    Moderator,
    Research,
}

impl AiMode {
    pub const ALL: [AiMode; 4] =
        [AiMode::Summarizer, AiMode::Brainstorm, AiMode::Moderator, AiMode::Research];

    pub const fn as_str(self) -> &'static str {
        match self {
            AiMode::Summarizer => "summarizer",
            AiMode::Brainstorm => "brainstorm",
            AiMode::Moderator => "moderator",
            AiMode::Research => "research",
        }
    }
}

impl fmt::Display for AiMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid AI mode `{0}`")]
pub struct InvalidAiMode(pub String);

impl FromStr for AiMode {
    type Err = InvalidAiMode;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "summarizer" => Ok(AiMode::Summarizer),
            "brainstorm" => Ok(AiMode::Brainstorm),
            "moderator" => Ok(AiMode::Moderator),
            "research" => Ok(AiMode::Research),
            other => Err(InvalidAiMode(other.to_owned())),
        }
    }
}

/// File reference carried by a message. The URL is treated as opaque.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub url: String,
    pub name: String,
}

/// A chat room: participant roster plus AI configuration.
///
/// Rooms are never deleted; lifecycle termination is out of scope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Room {
    pub room_id: RoomId,
    pub name: String,
    /// Insertion-ordered, duplicates collapse. Presence is tracked
    /// separately per connection; this is the coarser historical roster.
    pub participants: Vec<String>,
    pub ai_mode: AiMode,
    pub last_summary: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Room {
    /// Add a participant to the roster. Returns `false` when the name was
    /// already present (idempotent join).
    pub fn add_participant(&mut self, name: &str) -> bool {
        if self.participants.iter().any(|existing| existing == name) {
            return false;
        }
        self.participants.push(name.to_owned());
        true
    }
}

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Assigned by the persistence gateway on creation.
    pub id: Uuid,
    pub room_id: RoomId,
    pub sender: String,
    /// May be empty when an attachment is present.
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub edited: bool,
    #[serde(default)]
    pub pinned: bool,
    /// Emoji → set of reactor display names. Monotonic: there is no
    /// un-react operation, and re-adding is a no-op.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub reactions: BTreeMap<String, BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub read_by: BTreeSet<String>,
    /// Assistant-authored system message: append-only, immune to
    /// participant-facing edit/delete/react/read-tracking.
    #[serde(default)]
    pub is_ai: bool,
}

impl Message {
    /// Record a reaction. Returns `false` when this (emoji, reactor) pair
    /// was already present.
    pub fn add_reaction(&mut self, emoji: &str, reactor: &str) -> bool {
        self.reactions.entry(emoji.to_owned()).or_default().insert(reactor.to_owned())
    }

    /// Record a read acknowledgment. Returns `false` when already read.
    pub fn mark_read(&mut self, reader: &str) -> bool {
        self.read_by.insert(reader.to_owned())
    }
}
