//! Live per-player lobby standings
//!
//! During a round each client shows who is in the lobby, their current
//! score and whether they have finished. This module keeps that view
//! current: it holds one change subscription per relevant topic
//! (membership, scores, answers) and re-reads the authoritative rows
//! whenever any of them reports a change for the tracked lobby.
//!
//! Refreshes are serialized through `&mut self`, so at most one fetch per
//! roster is ever in flight and a stale completion can never overwrite a
//! newer one. Dropping the roster tears all three subscriptions down.

use std::sync::Arc;

use itertools::Itertools;

use crate::{
    error::Error,
    records::{self, LobbyId, MembershipRow, PlayerId, ProfileRow, ScoreRow},
    store::{DataService, EventStream, Filter, Topic, with_timeout},
};

/// One player's standing as shown during a round
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerStanding {
    /// The player
    pub player_id: PlayerId,
    /// Display name, or "Unknown" when no profile row was found
    pub name: String,
    /// Authoritative score as last fetched
    pub score: i64,
    /// Whether the player finished their round
    pub finished: bool,
}

/// Keeps a lobby's player list, scores and completion flags current
pub struct Roster {
    service: Arc<dyn DataService>,
    lobby_id: LobbyId,
    membership_events: EventStream,
    score_events: EventStream,
    answer_events: EventStream,
    standings: Vec<PlayerStanding>,
}

impl std::fmt::Debug for Roster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Roster")
            .field("lobby_id", &self.lobby_id)
            .field("standings", &self.standings)
            .finish_non_exhaustive()
    }
}

impl Roster {
    /// Creates a roster for one lobby and opens its three subscriptions
    ///
    /// The standings start empty; call [`Roster::refresh`] for the first
    /// fill.
    pub fn new(service: Arc<dyn DataService>, lobby_id: LobbyId) -> Self {
        let membership_events = service.subscribe(Topic::Membership, lobby_id);
        let score_events = service.subscribe(Topic::Scores, lobby_id);
        let answer_events = service.subscribe(Topic::Answers, lobby_id);
        Self {
            service,
            lobby_id,
            membership_events,
            score_events,
            answer_events,
            standings: Vec::new(),
        }
    }

    /// The standings as last fetched, sorted by display name
    pub fn standings(&self) -> &[PlayerStanding] {
        &self.standings
    }

    /// Re-reads the authoritative membership, profile and score rows
    ///
    /// # Errors
    ///
    /// Returns [`Error::Remote`] when a read fails; the previous
    /// standings are kept in that case.
    pub async fn refresh(&mut self) -> Result<(), Error> {
        let memberships = with_timeout(self.service.select(
            records::tables::LOBBY_PLAYERS,
            &[Filter::eq("lobby_id", self.lobby_id)],
            None,
        ))
        .await
        .map_err(|source| Error::remote("fetch lobby players", source))?;

        let mut standings = Vec::with_capacity(memberships.len());
        for row in memberships {
            let membership: MembershipRow =
                records::from_row(row).map_err(|source| Error::remote("fetch lobby players", source))?;
            let name = self.display_name(membership.player_id).await?;
            let score = self.player_score(membership.player_id).await?;
            standings.push(PlayerStanding {
                player_id: membership.player_id,
                name,
                score,
                finished: membership.finished,
            });
        }

        self.standings = standings
            .into_iter()
            .sorted_by(|a, b| a.name.cmp(&b.name))
            .collect();
        Ok(())
    }

    /// Waits for the next change on any subscribed topic and refreshes
    ///
    /// Pending notifications are drained first so a burst of changes costs
    /// one re-read. Returns `false` without refreshing once the
    /// subscriptions have closed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Remote`] when the refresh read fails.
    pub async fn sync(&mut self) -> Result<bool, Error> {
        let event = tokio::select! {
            event = self.membership_events.recv() => event,
            event = self.score_events.recv() => event,
            event = self.answer_events.recv() => event,
        };
        if event.is_none() {
            return Ok(false);
        }

        while self.membership_events.try_next().is_some()
            || self.score_events.try_next().is_some()
            || self.answer_events.try_next().is_some()
        {}

        self.refresh().await?;
        Ok(true)
    }

    /// Looks up a player's display name, falling back to "Unknown"
    async fn display_name(&self, player: PlayerId) -> Result<String, Error> {
        let row = with_timeout(
            self.service
                .select_one(records::tables::PROFILES, &[Filter::eq("id", player)]),
        )
        .await
        .map_err(|source| Error::remote("fetch profile", source))?;
        Ok(row
            .and_then(|row| records::from_row::<ProfileRow>(row).ok())
            .map_or_else(|| "Unknown".to_owned(), |profile| profile.name))
    }

    /// Looks up a player's score counter, defaulting to zero
    async fn player_score(&self, player: PlayerId) -> Result<i64, Error> {
        let row = with_timeout(self.service.select_one(
            records::tables::SCORES,
            &[
                Filter::eq("lobby_id", self.lobby_id),
                Filter::eq("player_id", player),
            ],
        ))
        .await
        .map_err(|source| Error::remote("fetch score", source))?;
        Ok(row
            .and_then(|row| records::from_row::<ScoreRow>(row).ok())
            .map_or(0, |score| score.score))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::store::memory::MemoryBackend;

    async fn seed_player(backend: &MemoryBackend, lobby: LobbyId, name: &str) -> PlayerId {
        let profile = ProfileRow {
            id: PlayerId::new(),
            name: name.to_owned(),
            created_at: Utc::now(),
        };
        backend
            .insert(records::tables::PROFILES, records::to_row(&profile))
            .await
            .unwrap();
        backend
            .insert(
                records::tables::LOBBY_PLAYERS,
                records::to_row(&MembershipRow::new(lobby, profile.id)),
            )
            .await
            .unwrap();
        profile.id
    }

    #[tokio::test]
    async fn test_refresh_builds_sorted_standings() {
        let backend = Arc::new(MemoryBackend::new());
        let lobby = LobbyId::new();
        let zoe = seed_player(&backend, lobby, "Zoe").await;
        let ada = seed_player(&backend, lobby, "Ada").await;
        backend.increment_score(lobby, zoe).await.unwrap();
        backend.increment_score(lobby, zoe).await.unwrap();

        let mut roster = Roster::new(backend.clone(), lobby);
        roster.refresh().await.unwrap();

        let names: Vec<&str> = roster.standings().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Ada", "Zoe"]);
        assert_eq!(roster.standings()[1].score, 2);
        assert_eq!(roster.standings()[0].score, 0);
        assert_eq!(roster.standings()[0].player_id, ada);
        assert!(!roster.standings()[0].finished);
    }

    #[tokio::test]
    async fn test_sync_refreshes_on_score_change() {
        let backend = Arc::new(MemoryBackend::new());
        let lobby = LobbyId::new();
        let ada = seed_player(&backend, lobby, "Ada").await;

        let mut roster = Roster::new(backend.clone(), lobby);
        roster.refresh().await.unwrap();
        assert_eq!(roster.standings()[0].score, 0);

        backend.increment_score(lobby, ada).await.unwrap();
        assert!(roster.sync().await.unwrap());
        assert_eq!(roster.standings()[0].score, 1);
    }

    #[tokio::test]
    async fn test_sync_ignores_other_lobbies() {
        let backend = Arc::new(MemoryBackend::new());
        let lobby = LobbyId::new();
        let other = LobbyId::new();
        seed_player(&backend, lobby, "Ada").await;
        let stranger = seed_player(&backend, other, "Zoe").await;

        let mut roster = Roster::new(backend.clone(), lobby);
        roster.refresh().await.unwrap();

        // A change in an unrelated lobby never wakes this roster.
        backend.increment_score(other, stranger).await.unwrap();
        let woke = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            roster.sync(),
        )
        .await;
        assert!(woke.is_err(), "roster woke on an unrelated lobby's change");
        assert_eq!(roster.standings().len(), 1);
    }

    #[tokio::test]
    async fn test_finished_flag_reaches_standings() {
        let backend = Arc::new(MemoryBackend::new());
        let lobby = LobbyId::new();
        let ada = seed_player(&backend, lobby, "Ada").await;

        let mut roster = Roster::new(backend.clone(), lobby);
        let mut patch = crate::store::Row::new();
        patch.insert("finished".to_owned(), serde_json::Value::Bool(true));
        backend
            .update(
                records::tables::LOBBY_PLAYERS,
                &[Filter::eq("player_id", ada)],
                patch,
            )
            .await
            .unwrap();

        assert!(roster.sync().await.unwrap());
        assert!(roster.standings()[0].finished);
    }
}
