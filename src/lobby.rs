//! Lobby lifecycle and reconciliation
//!
//! This module contains the single authority for lobby membership and
//! phase transitions on a client. The coordinator issues every lobby
//! mutation (create, join, subject select, start, leave) against the
//! remote store and reconciles the local cached lobby against the
//! authoritative remote row: on any change notification for the tracked
//! lobby, the remote `status` and `subject` overwrite the local copy,
//! the host's own writes included. Phase changes are level-triggered
//! state, not edge-triggered messages — a client that attaches late still
//! observes the correct current phase.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::{
    GamePhase,
    code::JoinCode,
    error::Error,
    records::{self, LobbyId, LobbyRow, LobbyStatus, MembershipRow},
    session::SessionStore,
    store::{ChangeEvent, DataService, EventStream, Filter, Topic, with_timeout},
};

/// The client-local view of the lobby this session belongs to
///
/// Mirrors the remote lobby row plus the one client-local fact the row
/// cannot carry: whether this client is the host. The mirror is a cache;
/// `status` and `subject` are always superseded by the next authoritative
/// remote image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lobby {
    /// The lobby's unique identifier
    pub id: LobbyId,
    /// Short code other players use to join
    pub code: JoinCode,
    /// Whether this client created the lobby (never shared remotely)
    pub host: bool,
    /// Selected quiz subject, unset until the host picks one
    pub subject: Option<String>,
    /// Current lifecycle phase as last reconciled
    pub status: LobbyStatus,
}

impl Lobby {
    /// The game phase this lobby's status places the client in
    pub fn phase(&self) -> GamePhase {
        match self.status {
            LobbyStatus::Waiting => GamePhase::Lobby,
            LobbyStatus::InProgress => GamePhase::Quiz,
            LobbyStatus::Completed => GamePhase::Results,
        }
    }

    fn from_remote(row: &LobbyRow, host: bool) -> Self {
        Self {
            id: row.id,
            code: row.code,
            host,
            subject: row.subject.clone(),
            status: row.status,
        }
    }
}

/// Owns lobby lifecycle and keeps the local view consistent with the
/// remote source of truth
///
/// One coordinator exists per client. It holds at most one live lobby
/// subscription, replaced whenever the tracked lobby identity changes and
/// dropped on leave; exclusive ownership of the stream is what guards
/// against stale deliveries from a previously tracked lobby. Every local
/// lobby mutation is mirrored to the session store before control
/// returns, so a reload restores the same membership.
pub struct LobbyCoordinator {
    service: Arc<dyn DataService>,
    session: SessionStore,
    lobby_tx: watch::Sender<Option<Lobby>>,
    events: Option<EventStream>,
}

impl std::fmt::Debug for LobbyCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LobbyCoordinator")
            .field("lobby", &*self.lobby_tx.borrow())
            .finish_non_exhaustive()
    }
}

impl LobbyCoordinator {
    /// Creates a coordinator over the given service and session
    ///
    /// Restores a persisted lobby snapshot if the session has one and
    /// re-attaches the change subscription for it, so a reloaded client
    /// keeps tracking its lobby.
    pub fn new(service: Arc<dyn DataService>, session: SessionStore) -> Self {
        let restored: Option<Lobby> = session.restore_lobby();
        let events = restored
            .as_ref()
            .map(|lobby| service.subscribe(Topic::Lobby, lobby.id));
        Self {
            service,
            session,
            lobby_tx: watch::Sender::new(restored),
            events,
        }
    }

    /// The injected remote data service
    pub fn service(&self) -> Arc<dyn DataService> {
        Arc::clone(&self.service)
    }

    /// The session store holding the local identity
    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    /// Mutable access to the session store (registration, renames)
    pub fn session_mut(&mut self) -> &mut SessionStore {
        &mut self.session
    }

    /// The current local lobby view, if the client is in one
    pub fn lobby(&self) -> Option<Lobby> {
        self.lobby_tx.borrow().clone()
    }

    /// A watch handle over the local lobby view
    ///
    /// The channel always holds the latest reconciled state, so observers
    /// that subscribe late read the current value immediately.
    pub fn watch_lobby(&self) -> watch::Receiver<Option<Lobby>> {
        self.lobby_tx.subscribe()
    }

    /// The game phase the client is currently in
    pub fn phase(&self) -> GamePhase {
        self.lobby().map_or(GamePhase::Home, |lobby| lobby.phase())
    }

    /// Creates a new lobby with this client as host
    ///
    /// Generates a collision-checked join code, inserts the lobby row
    /// (`status = waiting`, no subject) and the creator's membership row,
    /// then tracks the lobby locally with the host flag set. If the
    /// membership insert fails, the freshly created lobby row is deleted
    /// best-effort so no playerless lobby is left behind.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AuthRequired`] without a registered player,
    /// [`Error::AlreadyInLobby`] when already tracking a lobby, and
    /// [`Error::Remote`] when any store operation fails.
    pub async fn create_lobby(&mut self) -> Result<Lobby, Error> {
        let profile = self.session.profile().ok_or(Error::AuthRequired)?.clone();
        if self.lobby().is_some() {
            return Err(Error::AlreadyInLobby);
        }

        let code = with_timeout(JoinCode::generate(self.service.as_ref()))
            .await
            .map_err(|source| Error::remote("generate join code", source))?;

        let row = LobbyRow {
            id: LobbyId::new(),
            code,
            host_id: profile.id,
            subject: None,
            status: LobbyStatus::Waiting,
        };
        with_timeout(self.service.insert(records::tables::LOBBIES, records::to_row(&row)))
            .await
            .map_err(|source| Error::remote("create lobby", source))?;

        let membership = MembershipRow::new(row.id, profile.id);
        let inserted = with_timeout(
            self.service
                .insert(records::tables::LOBBY_PLAYERS, records::to_row(&membership)),
        )
        .await;
        if let Err(source) = inserted {
            // Roll the lobby row back so a playerless lobby is not left
            // squatting on the code.
            if let Err(error) = with_timeout(
                self.service
                    .delete(records::tables::LOBBIES, &[Filter::eq("id", row.id)]),
            )
            .await
            {
                tracing::warn!(lobby = %row.id, %error, "failed to roll back lobby creation");
            }
            return Err(Error::remote("create lobby membership", source));
        }

        let lobby = Lobby::from_remote(&row, true);
        tracing::info!(lobby = %lobby.id, code = %lobby.code, "created lobby");
        self.set_lobby(Some(lobby.clone()));
        Ok(lobby)
    }

    /// Joins an existing lobby by its code
    ///
    /// Updates the player's display name first when one is supplied, looks
    /// the lobby up by the case-normalized code, and inserts a membership
    /// row after checking the lobby is still waiting and this player is
    /// not already a member.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AuthRequired`] without a registered player,
    /// [`Error::AlreadyInLobby`] when already tracking a lobby,
    /// [`Error::InvalidName`] for a rejected display name,
    /// [`Error::NotFound`] when no lobby holds the code,
    /// [`Error::AlreadyInProgress`] when the lobby is not waiting,
    /// [`Error::AlreadyMember`] on a duplicate join, and
    /// [`Error::Remote`] when a store operation fails.
    pub async fn join_lobby(&mut self, name: &str, code: &str) -> Result<Lobby, Error> {
        let profile = self.session.profile().ok_or(Error::AuthRequired)?.clone();
        if self.lobby().is_some() {
            return Err(Error::AlreadyInLobby);
        }

        if !name.trim().is_empty() {
            self.session.update_name(self.service.as_ref(), name).await?;
        }

        let code: JoinCode = code.parse().map_err(|_| Error::NotFound)?;
        let row = with_timeout(
            self.service
                .select_one(records::tables::LOBBIES, &[Filter::eq("code", code)]),
        )
        .await
        .map_err(|source| Error::remote("find lobby", source))?
        .ok_or(Error::NotFound)?;
        let row: LobbyRow =
            records::from_row(row).map_err(|source| Error::remote("find lobby", source))?;

        if row.status != LobbyStatus::Waiting {
            return Err(Error::AlreadyInProgress);
        }

        let member = with_timeout(self.service.select_one(
            records::tables::LOBBY_PLAYERS,
            &[
                Filter::eq("lobby_id", row.id),
                Filter::eq("player_id", profile.id),
            ],
        ))
        .await
        .map_err(|source| Error::remote("check membership", source))?;
        if member.is_some() {
            return Err(Error::AlreadyMember);
        }

        let membership = MembershipRow::new(row.id, profile.id);
        with_timeout(
            self.service
                .insert(records::tables::LOBBY_PLAYERS, records::to_row(&membership)),
        )
        .await
        .map_err(|source| Error::remote("join lobby", source))?;

        let lobby = Lobby::from_remote(&row, false);
        tracing::info!(lobby = %lobby.id, code = %lobby.code, "joined lobby");
        self.set_lobby(Some(lobby.clone()));
        Ok(lobby)
    }

    /// Starts the game for every member of the lobby
    ///
    /// Flips the remote status to `in_progress`. The change notification
    /// advances every subscribed client — this one included — to the quiz
    /// phase; the host never pushes questions to anyone. The local status
    /// is also set optimistically so the host's own view advances without
    /// waiting for the echo; the echo supersedes it either way.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotHost`] when this client is not the lobby host,
    /// [`Error::NoSubject`] while no subject is selected, and
    /// [`Error::Remote`] when the status update fails.
    pub async fn start_game(&mut self) -> Result<(), Error> {
        let mut lobby = self.lobby().filter(|l| l.host).ok_or(Error::NotHost)?;
        if lobby.subject.as_deref().is_none_or(str::is_empty) {
            return Err(Error::NoSubject);
        }

        let mut patch = crate::store::Row::new();
        patch.insert(
            "status".to_owned(),
            serde_json::to_value(LobbyStatus::InProgress)
                .expect("default serializer cannot fail"),
        );
        with_timeout(self.service.update(
            records::tables::LOBBIES,
            &[Filter::eq("id", lobby.id)],
            patch,
        ))
        .await
        .map_err(|source| Error::remote("start game", source))?;

        lobby.status = LobbyStatus::InProgress;
        self.set_lobby(Some(lobby));
        Ok(())
    }

    /// Selects or changes the quiz subject
    ///
    /// Writes the subject to the remote lobby row only. The local view is
    /// deliberately not touched here: it updates through the same
    /// reconciliation path as a remote-origin change, so the host's own
    /// write is not special-cased.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotHost`] when this client is not the lobby host,
    /// [`Error::AlreadyInProgress`] once the lobby has left the waiting
    /// phase, and [`Error::Remote`] when the update fails.
    pub async fn update_subject(&mut self, subject: &str) -> Result<(), Error> {
        let lobby = self.lobby().filter(|l| l.host).ok_or(Error::NotHost)?;
        if lobby.status != LobbyStatus::Waiting {
            return Err(Error::AlreadyInProgress);
        }

        let mut patch = crate::store::Row::new();
        patch.insert(
            "subject".to_owned(),
            serde_json::Value::String(subject.to_owned()),
        );
        with_timeout(self.service.update(
            records::tables::LOBBIES,
            &[Filter::eq("id", lobby.id)],
            patch,
        ))
        .await
        .map_err(|source| Error::remote("update subject", source))?;
        Ok(())
    }

    /// Leaves the current lobby
    ///
    /// Deletes this player's membership row. When the leaving player is
    /// the host, the lobby row and every remaining membership are deleted
    /// too, ending the game for everyone — there is no host handoff.
    /// Without a tracked lobby this is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AuthRequired`] without a registered player and
    /// [`Error::Remote`] when deleting the caller's membership fails. The
    /// host's cascade deletes are best-effort and only logged.
    pub async fn leave_lobby(&mut self) -> Result<(), Error> {
        let Some(lobby) = self.lobby() else {
            return Ok(());
        };
        let profile = self.session.profile().ok_or(Error::AuthRequired)?.clone();

        with_timeout(self.service.delete(
            records::tables::LOBBY_PLAYERS,
            &[
                Filter::eq("lobby_id", lobby.id),
                Filter::eq("player_id", profile.id),
            ],
        ))
        .await
        .map_err(|source| Error::remote("leave lobby", source))?;

        if lobby.host {
            for (table, filters) in [
                (records::tables::LOBBIES, vec![Filter::eq("id", lobby.id)]),
                (
                    records::tables::LOBBY_PLAYERS,
                    vec![Filter::eq("lobby_id", lobby.id)],
                ),
            ] {
                if let Err(error) = with_timeout(self.service.delete(table, &filters)).await {
                    tracing::warn!(lobby = %lobby.id, table, %error, "cascade delete failed");
                }
            }
        }

        tracing::info!(lobby = %lobby.id, host = lobby.host, "left lobby");
        self.set_lobby(None);
        Ok(())
    }

    /// Waits for the next authoritative change to the tracked lobby
    ///
    /// Receives change notifications from the lobby subscription, applies
    /// the reconciliation rule, and returns the updated local view once a
    /// notification actually changed it. Returns `None` when no lobby is
    /// tracked or the subscription closed (for instance because the host
    /// deleted the lobby).
    pub async fn next_change(&mut self) -> Option<Lobby> {
        loop {
            let event = self.events.as_mut()?.recv().await?;
            if let ChangeEvent::Lobby(row) = event {
                if let Some(lobby) = self.reconcile(&row) {
                    return Some(lobby);
                }
            }
        }
    }

    /// Applies one authoritative lobby row image to the local view
    ///
    /// Remote `status` and `subject` overwrite the local copy. Status is
    /// monotonic: a notification carrying an earlier lifecycle phase than
    /// the one already observed is ignored rather than rolled back.
    /// Returns the updated view when anything changed.
    fn reconcile(&mut self, row: &LobbyRow) -> Option<Lobby> {
        let mut lobby = self.lobby()?;
        if lobby.id != row.id {
            return None;
        }

        let mut changed = false;
        if row.status > lobby.status {
            lobby.status = row.status;
            changed = true;
        }
        if row.subject != lobby.subject {
            lobby.subject.clone_from(&row.subject);
            changed = true;
        }
        if !changed {
            return None;
        }

        tracing::debug!(lobby = %lobby.id, status = ?lobby.status, "reconciled lobby");
        self.set_lobby(Some(lobby.clone()));
        Some(lobby)
    }

    /// Replaces the local lobby view, mirroring it to the session store
    /// and keeping exactly one subscription for the tracked lobby
    fn set_lobby(&mut self, lobby: Option<Lobby>) {
        let previous_id = self.lobby().map(|l| l.id);

        match &lobby {
            Some(lobby) => self.session.save_lobby(lobby),
            None => self.session.clear_lobby(),
        }

        match &lobby {
            Some(lobby) if previous_id != Some(lobby.id) => {
                self.events = Some(self.service.subscribe(Topic::Lobby, lobby.id));
            }
            None => {
                self.events = None;
            }
            _ => {}
        }

        self.lobby_tx.send_replace(lobby);
    }
}
