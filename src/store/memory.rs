//! In-memory reference backend
//!
//! A complete [`DataService`] implementation backed by process memory.
//! It exists for tests and offline runs, but it is a faithful model of
//! the remote contract: score increments are linearizable (all mutations
//! run under a single lock), and every mutation fans out change
//! notifications to the subscriptions whose topic and lobby match.

use std::{cmp::Ordering, collections::HashMap, sync::Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::records::{self, LobbyId, PlayerId, ScoreRow};

use super::{DataService, EventStream, Filter, Order, Row, StoreError, Topic};

/// A registered change subscription
struct Subscriber {
    topic: Topic,
    lobby: serde_json::Value,
    tx: mpsc::UnboundedSender<Row>,
}

/// Mutable backend state, guarded by one lock
#[derive(Default)]
struct Inner {
    tables: HashMap<String, Vec<Row>>,
    subscribers: Vec<Subscriber>,
}

/// An in-memory [`DataService`] with change notification fan-out
///
/// All operations lock the whole store, which makes every mutation —
/// the score increment in particular — trivially linearizable. Cloned
/// handles are not provided; share the backend behind an `Arc`.
#[derive(Default)]
pub struct MemoryBackend {
    inner: Mutex<Inner>,
}

impl MemoryBackend {
    /// Creates an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the state, recovering from a poisoned lock
    ///
    /// A panic while holding the lock only happens in tests; the data is
    /// still consistent enough there to keep serving.
    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Whether a row satisfies every equality filter
fn matches(row: &Row, filters: &[Filter]) -> bool {
    filters
        .iter()
        .all(|f| row.get(&f.column) == Some(&f.value))
}

/// Compares two JSON values for ordering purposes
///
/// Numbers compare numerically and strings lexicographically; values of
/// any other or mixed shape compare as equal, preserving their insertion
/// order under a stable sort.
fn compare_values(a: &serde_json::Value, b: &serde_json::Value) -> Ordering {
    use serde_json::Value;
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

impl Inner {
    /// Delivers a row image to every live subscription it matches,
    /// pruning subscriptions whose receiving side has been dropped
    fn notify(&mut self, table: &str, row: &Row) {
        self.subscribers.retain(|sub| {
            if sub.topic.table() != table {
                return !sub.tx.is_closed();
            }
            let column = sub.topic.lobby_column();
            if row.get(column) != Some(&sub.lobby) {
                return !sub.tx.is_closed();
            }
            sub.tx.send(row.clone()).is_ok()
        });
    }
}

#[async_trait]
impl DataService for MemoryBackend {
    async fn select(
        &self,
        table: &str,
        filters: &[Filter],
        order: Option<Order>,
    ) -> Result<Vec<Row>, StoreError> {
        let inner = self.lock();
        let mut rows: Vec<Row> = inner
            .tables
            .get(table)
            .map(|rows| rows.iter().filter(|r| matches(r, filters)).cloned().collect())
            .unwrap_or_default();

        if let Some(order) = order {
            let missing = serde_json::Value::Null;
            rows.sort_by(|a, b| {
                let ordering = compare_values(
                    a.get(order.column).unwrap_or(&missing),
                    b.get(order.column).unwrap_or(&missing),
                );
                if order.descending {
                    ordering.reverse()
                } else {
                    ordering
                }
            });
        }
        Ok(rows)
    }

    async fn insert(&self, table: &str, row: Row) -> Result<Row, StoreError> {
        let mut inner = self.lock();
        inner
            .tables
            .entry(table.to_owned())
            .or_default()
            .push(row.clone());
        inner.notify(table, &row);
        Ok(row)
    }

    async fn update(
        &self,
        table: &str,
        filters: &[Filter],
        patch: Row,
    ) -> Result<Vec<Row>, StoreError> {
        let mut inner = self.lock();
        let mut updated = Vec::new();
        if let Some(rows) = inner.tables.get_mut(table) {
            for row in rows.iter_mut().filter(|r| matches(r, filters)) {
                for (key, value) in &patch {
                    row.insert(key.clone(), value.clone());
                }
                updated.push(row.clone());
            }
        }
        for row in &updated {
            inner.notify(table, row);
        }
        Ok(updated)
    }

    async fn upsert(
        &self,
        table: &str,
        row: Row,
        conflict_columns: &[&str],
    ) -> Result<Row, StoreError> {
        let mut inner = self.lock();
        let rows = inner.tables.entry(table.to_owned()).or_default();

        let conflicting = rows.iter_mut().find(|existing| {
            conflict_columns
                .iter()
                .all(|column| existing.get(*column) == row.get(*column))
        });

        match conflicting {
            Some(existing) => {
                // Last write wins on the conflict key.
                for (key, value) in &row {
                    existing.insert(key.clone(), value.clone());
                }
            }
            None => rows.push(row.clone()),
        }
        inner.notify(table, &row);
        Ok(row)
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<usize, StoreError> {
        let mut inner = self.lock();
        let mut removed = Vec::new();
        if let Some(rows) = inner.tables.get_mut(table) {
            rows.retain(|row| {
                if matches(row, filters) {
                    removed.push(row.clone());
                    false
                } else {
                    true
                }
            });
        }
        for row in &removed {
            inner.notify(table, row);
        }
        Ok(removed.len())
    }

    async fn increment_score(
        &self,
        lobby: LobbyId,
        player: PlayerId,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let rows = inner
            .tables
            .entry(records::tables::SCORES.to_owned())
            .or_default();

        let lobby_value = serde_json::Value::from(lobby);
        let player_value = serde_json::Value::from(player);

        let image = match rows.iter_mut().find(|row| {
            row.get("lobby_id") == Some(&lobby_value) && row.get("player_id") == Some(&player_value)
        }) {
            Some(row) => {
                let current = row.get("score").and_then(serde_json::Value::as_i64).unwrap_or(0);
                row.insert("score".to_owned(), serde_json::Value::from(current + 1));
                row.clone()
            }
            None => {
                let fresh = records::to_row(&ScoreRow {
                    lobby_id: lobby,
                    player_id: player,
                    score: 1,
                });
                rows.push(fresh.clone());
                fresh
            }
        };
        inner.notify(records::tables::SCORES, &image);
        Ok(())
    }

    fn subscribe(&self, topic: Topic, lobby: LobbyId) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().subscribers.push(Subscriber {
            topic,
            lobby: serde_json::Value::from(lobby),
            tx,
        });
        EventStream::new(topic, rx)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::{
        records::{LobbyRow, LobbyStatus, MembershipRow},
        store::ChangeEvent,
    };

    fn sample_lobby() -> LobbyRow {
        LobbyRow {
            id: LobbyId::new(),
            code: "AB12C3".parse().unwrap(),
            host_id: PlayerId::new(),
            subject: None,
            status: LobbyStatus::Waiting,
        }
    }

    #[tokio::test]
    async fn test_select_applies_filters_and_order() {
        let backend = MemoryBackend::new();
        let lobby = LobbyId::new();
        for (score, player) in [(3, PlayerId::new()), (7, PlayerId::new()), (1, PlayerId::new())] {
            backend
                .insert(
                    records::tables::SCORES,
                    records::to_row(&ScoreRow {
                        lobby_id: lobby,
                        player_id: player,
                        score,
                    }),
                )
                .await
                .unwrap();
        }
        backend
            .insert(
                records::tables::SCORES,
                records::to_row(&ScoreRow {
                    lobby_id: LobbyId::new(),
                    player_id: PlayerId::new(),
                    score: 100,
                }),
            )
            .await
            .unwrap();

        let rows = backend
            .select(
                records::tables::SCORES,
                &[Filter::eq("lobby_id", lobby)],
                Some(Order {
                    column: "score",
                    descending: true,
                }),
            )
            .await
            .unwrap();

        let scores: Vec<i64> = rows
            .into_iter()
            .map(|row| records::from_row::<ScoreRow>(row).unwrap().score)
            .collect();
        assert_eq!(scores, vec![7, 3, 1]);
    }

    #[tokio::test]
    async fn test_upsert_replaces_on_conflict_key() {
        let backend = MemoryBackend::new();
        let (lobby, player) = (LobbyId::new(), PlayerId::new());

        let mut membership = MembershipRow::new(lobby, player);
        backend
            .upsert(
                records::tables::LOBBY_PLAYERS,
                records::to_row(&membership),
                &["lobby_id", "player_id"],
            )
            .await
            .unwrap();

        membership.finished = true;
        backend
            .upsert(
                records::tables::LOBBY_PLAYERS,
                records::to_row(&membership),
                &["lobby_id", "player_id"],
            )
            .await
            .unwrap();

        let rows = backend
            .select(records::tables::LOBBY_PLAYERS, &[], None)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert!(records::from_row::<MembershipRow>(rows[0].clone()).unwrap().finished);
    }

    #[tokio::test]
    async fn test_increment_creates_then_increments() {
        let backend = MemoryBackend::new();
        let (lobby, player) = (LobbyId::new(), PlayerId::new());

        backend.increment_score(lobby, player).await.unwrap();
        backend.increment_score(lobby, player).await.unwrap();
        backend.increment_score(lobby, player).await.unwrap();

        let row = backend
            .select_one(records::tables::SCORES, &[Filter::eq("player_id", player)])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(records::from_row::<ScoreRow>(row).unwrap().score, 3);
    }

    #[tokio::test]
    async fn test_subscription_delivers_only_matching_lobby() {
        let backend = MemoryBackend::new();
        let lobby = sample_lobby();
        let other = sample_lobby();
        backend
            .insert(records::tables::LOBBIES, records::to_row(&lobby))
            .await
            .unwrap();
        backend
            .insert(records::tables::LOBBIES, records::to_row(&other))
            .await
            .unwrap();

        let mut stream = backend.subscribe(Topic::Lobby, lobby.id);

        backend
            .update(
                records::tables::LOBBIES,
                &[Filter::eq("id", other.id)],
                records::to_row(&serde_json::json!({"status": "in_progress"})),
            )
            .await
            .unwrap();
        backend
            .update(
                records::tables::LOBBIES,
                &[Filter::eq("id", lobby.id)],
                records::to_row(&serde_json::json!({"subject": "history"})),
            )
            .await
            .unwrap();

        // Only the tracked lobby's update arrives.
        match stream.recv().await.unwrap() {
            ChangeEvent::Lobby(row) => {
                assert_eq!(row.id, lobby.id);
                assert_eq!(row.subject.as_deref(), Some("history"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dropped_subscription_is_pruned() {
        let backend = MemoryBackend::new();
        let lobby = sample_lobby();
        backend
            .insert(records::tables::LOBBIES, records::to_row(&lobby))
            .await
            .unwrap();

        let stream = backend.subscribe(Topic::Lobby, lobby.id);
        drop(stream);

        backend
            .update(
                records::tables::LOBBIES,
                &[Filter::eq("id", lobby.id)],
                records::to_row(&serde_json::json!({"subject": "science"})),
            )
            .await
            .unwrap();
        assert!(backend.lock().subscribers.is_empty());
    }
}
