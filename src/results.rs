//! Final leaderboard aggregation
//!
//! Once a lobby is completed, the results view reads every player's
//! authoritative score fresh from the store — never from a locally cached
//! tally — so the leaderboard reflects all increments, including ones
//! this client never observed. Requesting results for a lobby that has
//! not completed fails with `NotReady` and yields no partial list.

use std::cmp::Reverse;

use itertools::Itertools;

use crate::{
    error::Error,
    records::{self, LobbyId, LobbyRow, LobbyStatus, PlayerId, ProfileRow, ScoreRow},
    store::{DataService, Filter, Order, with_timeout},
};

/// One leaderboard row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreEntry {
    /// The scoring player
    pub player_id: PlayerId,
    /// Display name, or "Unknown" when no profile row was found
    pub name: String,
    /// Final count of correct answers
    pub score: i64,
}

/// Fetches the final leaderboard for a completed lobby
///
/// Entries are ordered by score descending; ties are broken by display
/// name ascending so the ordering is deterministic.
///
/// # Errors
///
/// Returns [`Error::NotFound`] when the lobby does not exist,
/// [`Error::NotReady`] while its status is not `completed`, and
/// [`Error::Remote`] when a read fails.
pub async fn final_scores(
    service: &dyn DataService,
    lobby_id: LobbyId,
) -> Result<Vec<ScoreEntry>, Error> {
    let lobby = with_timeout(
        service.select_one(records::tables::LOBBIES, &[Filter::eq("id", lobby_id)]),
    )
    .await
    .map_err(|source| Error::remote("fetch lobby", source))?
    .ok_or(Error::NotFound)?;
    let lobby: LobbyRow =
        records::from_row(lobby).map_err(|source| Error::remote("fetch lobby", source))?;

    if lobby.status != LobbyStatus::Completed {
        return Err(Error::NotReady);
    }

    let rows = with_timeout(service.select(
        records::tables::SCORES,
        &[Filter::eq("lobby_id", lobby_id)],
        Some(Order {
            column: "score",
            descending: true,
        }),
    ))
    .await
    .map_err(|source| Error::remote("fetch scores", source))?;

    let mut entries = Vec::with_capacity(rows.len());
    for row in rows {
        let score: ScoreRow =
            records::from_row(row).map_err(|source| Error::remote("fetch scores", source))?;
        let name = with_timeout(service.select_one(
            records::tables::PROFILES,
            &[Filter::eq("id", score.player_id)],
        ))
        .await
        .map_err(|source| Error::remote("fetch profile", source))?
        .and_then(|row| records::from_row::<ProfileRow>(row).ok())
        .map_or_else(|| "Unknown".to_owned(), |profile| profile.name);

        entries.push(ScoreEntry {
            player_id: score.player_id,
            name,
            score: score.score,
        });
    }

    Ok(entries
        .into_iter()
        .sorted_by_key(|entry| (Reverse(entry.score), entry.name.clone()))
        .collect())
}
