//! Typed models for the remote tables
//!
//! The remote data service stores loosely structured rows; this module
//! gives each table a typed shape that is serialized to and from row
//! payloads at the store boundary. Everything the coordinator, quiz engine
//! and aggregator exchange with the remote store passes through one of
//! these models.

use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay};
use uuid::Uuid;

use crate::{
    code::JoinCode,
    store::{Row, StoreError},
};

/// Names of the remote collections the core reads and writes
pub mod tables {
    /// Registered player profiles
    pub const PROFILES: &str = "profiles";
    /// Lobby rows: code, host, subject and status
    pub const LOBBIES: &str = "lobbies";
    /// Lobby membership rows with per-player completion tracking
    pub const LOBBY_PLAYERS: &str = "lobby_players";
    /// One row per (lobby, player, question) answer submission
    pub const ANSWERS: &str = "answers";
    /// Per-(lobby, player) score counters
    pub const SCORES: &str = "scores";
}

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug,
            Copy,
            Clone,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            DeserializeFromStr,
            SerializeDisplay,
        )]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            /// Creates a new random identifier (same as `new()`)
            fn default() -> Self {
                Self::new()
            }
        }

        impl Display for $name {
            /// Formats the identifier as a UUID string
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            /// Parses an identifier from a UUID string
            ///
            /// # Errors
            ///
            /// Returns a `uuid::Error` if the string is not a valid UUID.
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::from_str(s)?))
            }
        }

        impl From<$name> for serde_json::Value {
            /// Converts the identifier into its string form for row filters
            fn from(id: $name) -> Self {
                serde_json::Value::String(id.to_string())
            }
        }
    };
}

uuid_id! {
    /// A unique identifier for a registered player
    PlayerId
}

uuid_id! {
    /// A unique identifier for a lobby
    LobbyId
}

/// The lifecycle phase recorded on a lobby row
///
/// Transitions are strictly one-directional: `Waiting` → `InProgress` →
/// `Completed`. The derived ordering reflects this progression and is used
/// to reject regressions when reconciling remote updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LobbyStatus {
    /// Gathering players; the host may still pick a subject
    Waiting,
    /// The quiz is running; no new players may join
    InProgress,
    /// Every member finished their round
    Completed,
}

/// A registered player profile as stored remotely
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRow {
    /// The player's unique identifier
    pub id: PlayerId,
    /// Self-assigned display name
    pub name: String,
    /// When the profile was registered
    pub created_at: DateTime<Utc>,
}

/// A lobby as stored remotely
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LobbyRow {
    /// The lobby's unique identifier
    pub id: LobbyId,
    /// Short code players use to join
    pub code: JoinCode,
    /// The player who created the lobby
    pub host_id: PlayerId,
    /// Selected quiz subject, unset until the host picks one
    pub subject: Option<String>,
    /// Current lifecycle phase
    pub status: LobbyStatus,
}

/// A lobby membership as stored remotely
///
/// Unique per (lobby, player) pair; joins either reject duplicates or
/// upsert idempotently on that key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MembershipRow {
    /// The lobby the player belongs to
    pub lobby_id: LobbyId,
    /// The member
    pub player_id: PlayerId,
    /// Whether the player has finished their round
    #[serde(default)]
    pub finished: bool,
    /// When the player finished, if they have
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl MembershipRow {
    /// Creates a fresh, unfinished membership for a (lobby, player) pair
    pub fn new(lobby_id: LobbyId, player_id: PlayerId) -> Self {
        Self {
            lobby_id,
            player_id,
            finished: false,
            completed_at: None,
        }
    }
}

/// One player's recorded answer to one question, as stored remotely
///
/// Upserted with conflict key (lobby, player, question) so resubmission
/// overwrites rather than duplicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerRow {
    /// The lobby the answer was given in
    pub lobby_id: LobbyId,
    /// The answering player
    pub player_id: PlayerId,
    /// The question being answered
    pub question_id: String,
    /// The answer text the player chose
    pub answer: String,
    /// Whether the answer matched the question's correct answer
    pub is_correct: bool,
}

/// A per-(lobby, player) score counter, as stored remotely
///
/// Mutated exclusively through the store's atomic increment operation;
/// the core never writes a score value it computed itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRow {
    /// The lobby the score was earned in
    pub lobby_id: LobbyId,
    /// The scoring player
    pub player_id: PlayerId,
    /// Count of correct answers so far
    pub score: i64,
}

/// Serializes a typed model into a generic row payload
///
/// # Panics
///
/// This function panics if the value does not serialize to a JSON object,
/// which cannot happen for the struct models in this module.
pub fn to_row<T: Serialize>(value: &T) -> Row {
    match serde_json::to_value(value).expect("default serializer cannot fail") {
        serde_json::Value::Object(map) => map,
        _ => unreachable!("row models serialize to JSON objects"),
    }
}

/// Deserializes a generic row payload into a typed model
///
/// # Errors
///
/// Returns [`StoreError::Backend`] when the row does not have the
/// expected shape, with the serde failure message attached.
pub fn from_row<T: serde::de::DeserializeOwned>(row: Row) -> Result<T, StoreError> {
    serde_json::from_value(serde_json::Value::Object(row))
        .map_err(|e| StoreError::Backend(format!("malformed row: {e}")))
}
