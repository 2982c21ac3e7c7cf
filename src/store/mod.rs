//! Generic remote data service interface
//!
//! The core never talks to a concrete database product. Everything it
//! needs from the backing store is expressed here as two capabilities:
//! a structured request/response interface over table-like collections
//! ([`DataService`]) and a change-notification subscription delivering the
//! post-change row image for a given topic and lobby ([`EventStream`]).
//!
//! Change payloads are loosely structured rows on the wire; they are
//! validated into the [`ChangeEvent`] tagged union at the subscription
//! boundary, before the coordinator or roster ever sees them. Malformed
//! payloads are logged and dropped there.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::records::{
    self, AnswerRow, LobbyId, LobbyRow, MembershipRow, PlayerId, ScoreRow,
};

/// A loosely structured row as exchanged with the remote store
pub type Row = serde_json::Map<String, serde_json::Value>;

/// An equality filter on one row column
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    /// Column the filter applies to
    pub column: String,
    /// Value the column must equal
    pub value: serde_json::Value,
}

impl Filter {
    /// Creates an equality filter for `column == value`
    pub fn eq(column: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }
}

/// An ordering directive for a select
#[derive(Debug, Clone, Copy)]
pub struct Order {
    /// Column to order by
    pub column: &'static str,
    /// Whether larger values come first
    pub descending: bool,
}

/// The logical change-notification topics a client can subscribe to
///
/// Each topic corresponds to one remote table, filtered down to a single
/// lobby's rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    /// Updates to the lobby row itself (status and subject)
    Lobby,
    /// Membership list changes, including per-player completion
    Membership,
    /// Score counter changes
    Scores,
    /// Answer record changes
    Answers,
}

impl Topic {
    /// The remote table this topic observes
    pub fn table(self) -> &'static str {
        match self {
            Topic::Lobby => records::tables::LOBBIES,
            Topic::Membership => records::tables::LOBBY_PLAYERS,
            Topic::Scores => records::tables::SCORES,
            Topic::Answers => records::tables::ANSWERS,
        }
    }

    /// The row column carrying the lobby identity for this topic
    ///
    /// Lobby rows are keyed by their own `id`; every other observed table
    /// references the lobby through a `lobby_id` column.
    pub fn lobby_column(self) -> &'static str {
        match self {
            Topic::Lobby => "id",
            _ => "lobby_id",
        }
    }
}

/// A validated change notification for one subscribed topic
///
/// This is the typed shape of the loosely structured payloads the wire
/// delivers: one variant per topic, carrying the post-change row image.
#[derive(Debug, Clone, derive_more::From)]
pub enum ChangeEvent {
    /// The lobby row changed (status or subject)
    Lobby(LobbyRow),
    /// A membership row was inserted, updated or deleted
    Membership(MembershipRow),
    /// A score counter changed
    Score(ScoreRow),
    /// An answer record was written
    Answer(AnswerRow),
}

impl ChangeEvent {
    /// Validates a raw row payload into the event shape for its topic
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError::Backend`] when the payload does not match
    /// the topic's row shape.
    pub fn decode(topic: Topic, row: Row) -> Result<Self, StoreError> {
        Ok(match topic {
            Topic::Lobby => Self::Lobby(records::from_row(row)?),
            Topic::Membership => Self::Membership(records::from_row(row)?),
            Topic::Scores => Self::Score(records::from_row(row)?),
            Topic::Answers => Self::Answer(records::from_row(row)?),
        })
    }

    /// The topic this event belongs to
    pub fn topic(&self) -> Topic {
        match self {
            ChangeEvent::Lobby(_) => Topic::Lobby,
            ChangeEvent::Membership(_) => Topic::Membership,
            ChangeEvent::Score(_) => Topic::Scores,
            ChangeEvent::Answer(_) => Topic::Answers,
        }
    }
}

/// A live change subscription for one (topic, lobby) pair
///
/// Dropping the stream cancels the subscription; the backend prunes the
/// dead registration on its next delivery attempt. Payload validation
/// happens here, at the subscription boundary: malformed rows are logged
/// and skipped so consumers only ever observe well-formed [`ChangeEvent`]s.
#[derive(Debug)]
pub struct EventStream {
    topic: Topic,
    rx: mpsc::UnboundedReceiver<Row>,
}

impl EventStream {
    /// Creates a stream delivering raw rows from the given channel
    pub fn new(topic: Topic, rx: mpsc::UnboundedReceiver<Row>) -> Self {
        Self { topic, rx }
    }

    /// Creates a stream that yields nothing and reports closure immediately
    pub fn closed(topic: Topic) -> Self {
        let (_, rx) = mpsc::unbounded_channel();
        Self { topic, rx }
    }

    /// The topic this stream observes
    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Receives the next validated change event
    ///
    /// Returns `None` once the subscription is closed. Malformed payloads
    /// are dropped with a warning rather than surfaced.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        while let Some(row) = self.rx.recv().await {
            match ChangeEvent::decode(self.topic, row) {
                Ok(event) => return Some(event),
                Err(error) => {
                    tracing::warn!(topic = ?self.topic, %error, "dropping malformed change payload");
                }
            }
        }
        None
    }

    /// Receives an already-delivered change event without waiting
    ///
    /// Returns `None` when no valid event is queued right now; like
    /// [`EventStream::recv`], malformed payloads are dropped with a
    /// warning.
    pub fn try_next(&mut self) -> Option<ChangeEvent> {
        while let Ok(row) = self.rx.try_recv() {
            match ChangeEvent::decode(self.topic, row) {
                Ok(event) => return Some(event),
                Err(error) => {
                    tracing::warn!(topic = ?self.topic, %error, "dropping malformed change payload");
                }
            }
        }
        None
    }
}

/// Errors surfaced by the remote data service
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The call exceeded the request timeout; safe to retry
    #[error("remote operation timed out")]
    Timeout,
    /// The write conflicted with an existing row
    #[error("conflicting row already exists")]
    Conflict,
    /// No row matched where exactly one was required
    #[error("no matching row")]
    Missing,
    /// The backend rejected or failed the operation
    #[error("backend failure: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether the failure is transient and the operation safe to retry
    ///
    /// Distinguishes a timed-out call from a definitive rejection such as
    /// [`StoreError::Conflict`]; callers must not treat the latter as
    /// retryable.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Timeout)
    }
}

/// The request/response interface of the remote data service
///
/// Implementations are injected into the coordinator, quiz engine and
/// aggregator; nothing in the core holds an ambient connection. All row
/// payloads are JSON objects and all filters are column equalities, which
/// is the least common denominator the original backing store offers.
#[async_trait]
pub trait DataService: Send + Sync {
    /// Queries rows from `table` matching every filter, optionally ordered
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the query fails or times out.
    async fn select(
        &self,
        table: &str,
        filters: &[Filter],
        order: Option<Order>,
    ) -> Result<Vec<Row>, StoreError>;

    /// Inserts a row into `table`, returning the stored image
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the insert fails or times out.
    async fn insert(&self, table: &str, row: Row) -> Result<Row, StoreError>;

    /// Merges `patch` into every row matching the filters
    ///
    /// Returns the post-update images of the affected rows.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the update fails or times out.
    async fn update(
        &self,
        table: &str,
        filters: &[Filter],
        patch: Row,
    ) -> Result<Vec<Row>, StoreError>;

    /// Inserts `row`, or replaces the existing row sharing its values in
    /// `conflict_columns` (last write wins)
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the upsert fails or times out.
    async fn upsert(
        &self,
        table: &str,
        row: Row,
        conflict_columns: &[&str],
    ) -> Result<Row, StoreError>;

    /// Deletes every row matching the filters, returning how many
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the delete fails or times out.
    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<usize, StoreError>;

    /// Atomically increments the score counter for (lobby, player)
    ///
    /// This must execute as a single indivisible server-side operation,
    /// linearizable per (lobby, player): it is never a client-side
    /// read-modify-write, so concurrent or retried correct answers cannot
    /// clobber each other's increments. A missing counter row starts at
    /// zero and is created with value one.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the increment fails or times out.
    async fn increment_score(&self, lobby: LobbyId, player: PlayerId)
        -> Result<(), StoreError>;

    /// Opens a change subscription for one (topic, lobby) pair
    ///
    /// Delivery is level-consistent: a notification always reflects a row
    /// state at least as new as the write that triggered it. Cancellation
    /// is by dropping the returned stream.
    fn subscribe(&self, topic: Topic, lobby: LobbyId) -> EventStream;

    /// Queries at most one row from `table` matching every filter
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the underlying query fails or times out.
    async fn select_one(
        &self,
        table: &str,
        filters: &[Filter],
    ) -> Result<Option<Row>, StoreError> {
        Ok(self.select(table, filters, None).await?.into_iter().next())
    }
}

/// Runs a remote call under the configured request timeout
///
/// Timeouts map to [`StoreError::Timeout`], the transient variant, so
/// callers can tell an unanswered call apart from a definitive rejection.
///
/// # Errors
///
/// Returns the inner error, or [`StoreError::Timeout`] when the deadline
/// elapses first.
pub async fn with_timeout<T>(
    future: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreError> {
    let limit = std::time::Duration::from_millis(crate::constants::store::REQUEST_TIMEOUT_MS);
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout),
    }
}
