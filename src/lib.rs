//! # Parlor Trivia Library
//!
//! This library provides the client-resident core of a lobby-based
//! multiplayer trivia game. Players register a display name, create or
//! join a lobby through a short code, and — once the host picks a subject
//! and starts the game — each client plays its own shuffled round of
//! questions while scores and completion state synchronize through a
//! remote data service and its change-notification channel.
//!
//! The remote service is an external collaborator: the core consumes the
//! generic [`store::DataService`] request/response trait and per-topic
//! change subscriptions, and never depends on a specific database
//! product. An in-memory reference backend lives in [`store::memory`].

#![cfg_attr(all(coverage_nightly, test), feature(coverage_attribute))]
#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::module_name_repetitions)]

use serde::{Deserialize, Serialize};

pub mod constants;

pub mod bank;
pub mod code;
pub mod config;
pub mod error;
pub mod lobby;
pub mod quiz;
pub mod records;
pub mod results;
pub mod roster;
pub mod session;
pub mod store;

/// The screen-level phase a client is in
///
/// Derived from the tracked lobby's status; phase changes are
/// level-triggered state, so a client attaching late lands in the
/// correct phase immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GamePhase {
    /// No lobby is tracked: registration and the join/create screens
    Home,
    /// Waiting in a lobby for the host to start
    Lobby,
    /// Playing the current round
    Quiz,
    /// The lobby completed; showing the leaderboard
    Results,
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::{collections::HashSet, sync::Arc};

    use crate::{
        bank::{QuestionBank, Subject},
        lobby::LobbyCoordinator,
        quiz::QuizEngine,
        records::LobbyStatus,
        results,
        roster::Roster,
        session::{MemoryStorage, SessionStore},
        store::{DataService, memory::MemoryBackend},
    };

    use super::*;

    fn sample_bank() -> QuestionBank {
        let questions = (0..20)
            .map(|i| {
                serde_json::json!({
                    "id": format!("hist-{i:03}"),
                    "prompt": format!("History question {i}?"),
                    "correct_answer": format!("answer-{i}"),
                    "wrong_answers": [
                        format!("wrong-{i}-a"),
                        format!("wrong-{i}-b"),
                        format!("wrong-{i}-c"),
                    ],
                })
            })
            .collect::<Vec<_>>();
        let mut bank = QuestionBank::new();
        bank.load_subject(
            Subject {
                id: "history".to_owned(),
                name: "History".to_owned(),
            },
            &serde_json::to_string(&questions).unwrap(),
        )
        .unwrap();
        bank
    }

    async fn client(backend: &Arc<MemoryBackend>, name: &str) -> LobbyCoordinator {
        let mut session = SessionStore::new(Arc::new(MemoryStorage::new()));
        session.register(backend.as_ref(), name).await.unwrap();
        LobbyCoordinator::new(backend.clone() as Arc<dyn DataService>, session)
    }

    /// Plays a full round, answering `correct` questions right, and
    /// returns the distinct question ids that were played
    async fn play(
        engine: &mut QuizEngine,
        bank: &QuestionBank,
        subject: &str,
        correct: usize,
    ) -> HashSet<String> {
        engine.begin_round(bank, subject);
        let mut played = HashSet::new();
        while let Some(question) = engine.current_question().cloned() {
            let answer = if played.len() < correct {
                question.correct_answer.clone()
            } else {
                "wrong on purpose".to_owned()
            };
            played.insert(question.id.clone());
            engine.submit_answer(&answer).await.unwrap();
        }
        played
    }

    // The full two-player scenario: create, join, subject select, start,
    // both rounds played to completion, leaderboard in final order.
    #[tokio::test]
    async fn test_two_player_game_end_to_end() {
        let backend = Arc::new(MemoryBackend::new());
        let bank = sample_bank();

        let mut alice = client(&backend, "Alice").await;
        let created = alice.create_lobby().await.unwrap();
        assert_eq!(alice.phase(), GamePhase::Lobby);

        let mut bob = client(&backend, "Bob").await;
        bob.join_lobby("Bob", &created.code.to_string())
            .await
            .unwrap();

        alice.update_subject("history").await.unwrap();
        let seen = alice.next_change().await.unwrap();
        assert_eq!(seen.subject.as_deref(), Some("history"));
        assert_eq!(
            bob.next_change().await.unwrap().subject.as_deref(),
            Some("history")
        );

        alice.start_game().await.unwrap();
        assert_eq!(alice.phase(), GamePhase::Quiz);
        assert_eq!(bob.next_change().await.unwrap().status, LobbyStatus::InProgress);
        assert_eq!(bob.phase(), GamePhase::Quiz);

        // Each client selects and shuffles its own 15-question round.
        let alice_lobby = alice.lobby().unwrap();
        let subject = alice_lobby.subject.clone().unwrap();
        let alice_player = alice.session().profile().unwrap().id;
        let bob_player = bob.session().profile().unwrap().id;

        let mut alice_engine = QuizEngine::new(alice.service(), alice_lobby.id, alice_player);
        let mut bob_engine = QuizEngine::new(bob.service(), alice_lobby.id, bob_player);

        let mut watcher = Roster::new(alice.service(), alice_lobby.id);
        watcher.refresh().await.unwrap();
        assert_eq!(watcher.standings().len(), 2);

        let alice_questions = play(&mut alice_engine, &bank, &subject, 11).await;
        assert!(alice_engine.is_over());
        // Exactly 15 unique questions were drawn from the 20-question bank.
        assert_eq!(alice_questions.len(), constants::quiz::ROUND_SIZE);
        // Bob has not finished: the lobby is still in progress, and the
        // results view refuses to serve a partial leaderboard.
        assert!(matches!(
            results::final_scores(backend.as_ref(), alice_lobby.id).await,
            Err(error::Error::NotReady)
        ));

        let bob_questions = play(&mut bob_engine, &bank, &subject, 7).await;
        assert!(bob_engine.is_over());
        assert_eq!(bob_questions.len(), constants::quiz::ROUND_SIZE);

        // The last finisher flipped the lobby; both clients observe it.
        assert_eq!(
            alice.next_change().await.unwrap().status,
            LobbyStatus::Completed
        );
        assert_eq!(alice.phase(), GamePhase::Results);
        assert_eq!(
            bob.next_change().await.unwrap().status,
            LobbyStatus::Completed
        );
        assert_eq!(bob.phase(), GamePhase::Results);

        let leaderboard = results::final_scores(backend.as_ref(), alice_lobby.id)
            .await
            .unwrap();
        let rows: Vec<(&str, i64)> = leaderboard
            .iter()
            .map(|entry| (entry.name.as_str(), entry.score))
            .collect();
        assert_eq!(rows, vec![("Alice", 11), ("Bob", 7)]);
        assert_eq!(alice_engine.score(), 11);
        assert_eq!(bob_engine.score(), 7);

        // The roster view catches up with the finished game.
        watcher.refresh().await.unwrap();
        assert!(watcher.standings().iter().all(|standing| standing.finished));
    }
}
