//! Crate-wide error taxonomy
//!
//! Validation errors (auth, host and subject preconditions, name checks)
//! are raised synchronously before any remote call and surfaced directly
//! for user-facing messaging. Remote operation failures are wrapped with
//! the operation they happened in; the UI layer is expected to render a
//! transient notification and leave state unchanged. Best-effort
//! bookkeeping failures during answer submission are logged only and
//! never reach this type.

use thiserror::Error;

use crate::{session::NameError, store::StoreError};

/// Errors surfaced by the lobby, session and results operations
#[derive(Error, Debug)]
pub enum Error {
    /// No player is registered in this session
    #[error("no registered player for this session")]
    AuthRequired,
    /// The player already belongs to a lobby and cannot create or join another
    #[error("already a member of a lobby")]
    AlreadyInLobby,
    /// The player already joined this specific lobby
    #[error("already joined this lobby")]
    AlreadyMember,
    /// No lobby exists for the given join code
    #[error("no lobby with that code")]
    NotFound,
    /// The lobby has started or finished and accepts no new players
    #[error("lobby is no longer accepting players")]
    AlreadyInProgress,
    /// The operation is reserved for the lobby host
    #[error("only the host can do that")]
    NotHost,
    /// The game cannot start before the host selects a subject
    #[error("no subject selected")]
    NoSubject,
    /// Results were requested before the lobby completed
    #[error("results are not ready yet")]
    NotReady,
    /// The supplied display name was rejected
    #[error("invalid display name: {0}")]
    InvalidName(#[from] NameError),
    /// A remote store operation failed
    #[error("remote operation `{op}` failed: {source}")]
    Remote {
        /// The operation that was being performed
        op: &'static str,
        /// The underlying store failure
        source: StoreError,
    },
}

impl Error {
    /// Wraps a store failure with the operation it happened in
    pub(crate) fn remote(op: &'static str, source: StoreError) -> Self {
        tracing::error!(op, %source, "remote operation failed");
        Self::Remote { op, source }
    }
}
