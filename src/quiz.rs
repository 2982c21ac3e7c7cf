//! Per-player quiz round engine
//!
//! Each client runs its own round: when the lobby flips to `in_progress`
//! the engine selects and shuffles a subset of the subject's question
//! bank, then walks the player through it one answer at a time. Scoring
//! and completion are synchronized through the remote store, but every
//! remote write in the submission path is a best-effort side effect —
//! failures are logged and the player's local progression continues
//! regardless.
//!
//! Completion detection is distributed: whichever player finishes last
//! observes that every membership is finished and flips the lobby to
//! `completed`. Ties are safe because setting `completed` twice is a
//! no-op and the status never moves backwards.

use std::sync::Arc;

use chrono::Utc;
use itertools::Itertools;

use crate::{
    bank::{Question, QuestionBank},
    constants::quiz::ROUND_SIZE,
    records::{self, AnswerRow, LobbyId, LobbyStatus, MembershipRow, PlayerId},
    store::{DataService, Filter, with_timeout},
};

/// A question prepared for play: answers combined and shuffled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedQuestion {
    /// Stable identifier, unique within the subject
    pub id: String,
    /// The prompt shown to the player
    pub prompt: String,
    /// The one correct answer
    pub correct_answer: String,
    /// Every answer option (correct and wrong) in shuffled display order
    pub all_answers: Vec<String>,
}

impl PreparedQuestion {
    /// Combines a question's correct and wrong answers into one
    /// independently shuffled display list
    fn prepare(question: &Question) -> Self {
        let mut all_answers = question
            .wrong_answers
            .iter()
            .chain(std::iter::once(&question.correct_answer))
            .cloned()
            .collect_vec();
        fastrand::shuffle(&mut all_answers);
        Self {
            id: question.id.clone(),
            prompt: question.prompt.clone(),
            correct_answer: question.correct_answer.clone(),
            all_answers,
        }
    }
}

/// One player's active round
#[derive(Debug, Clone)]
pub struct QuizRound {
    questions: Vec<PreparedQuestion>,
    current_index: usize,
    score: u32,
}

impl QuizRound {
    /// The question currently awaiting an answer
    pub fn current(&self) -> &PreparedQuestion {
        &self.questions[self.current_index]
    }

    /// Zero-based index of the current question and the round length
    pub fn progress(&self) -> (usize, usize) {
        (self.current_index, self.questions.len())
    }

    /// Count of correctly answered questions so far
    pub fn score(&self) -> u32 {
        self.score
    }

    /// All prepared questions of this round in play order
    pub fn questions(&self) -> &[PreparedQuestion] {
        &self.questions
    }
}

/// The per-player round state machine
#[derive(Debug, Clone)]
pub enum RoundState {
    /// No round has been started
    Idle,
    /// The player is answering questions
    InRound(QuizRound),
    /// The player answered every question of their round
    Finished {
        /// The locally tracked final score
        score: u32,
    },
}

/// What one answer submission did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitOutcome {
    /// Whether the submitted answer was correct
    pub correct: bool,
    /// Whether this submission finished the player's round
    pub round_over: bool,
    /// Whether this submission flipped the whole lobby to completed
    pub lobby_completed: bool,
}

/// Runs one player's round and its remote bookkeeping
///
/// The engine owns no subscriptions; it is driven by the player's answer
/// submissions. Its remote writes keep the shared lobby state current for
/// everyone else: membership upkeep, the atomic score increment, the
/// answer record, and — for the last finisher — the lobby completion.
pub struct QuizEngine {
    service: Arc<dyn DataService>,
    lobby_id: LobbyId,
    player_id: PlayerId,
    state: RoundState,
}

impl std::fmt::Debug for QuizEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuizEngine")
            .field("lobby_id", &self.lobby_id)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl QuizEngine {
    /// Creates an idle engine for one (lobby, player) pair
    pub fn new(service: Arc<dyn DataService>, lobby_id: LobbyId, player_id: PlayerId) -> Self {
        Self {
            service,
            lobby_id,
            player_id,
            state: RoundState::Idle,
        }
    }

    /// The current round state
    pub fn state(&self) -> &RoundState {
        &self.state
    }

    /// The question currently awaiting an answer, while in a round
    pub fn current_question(&self) -> Option<&PreparedQuestion> {
        match &self.state {
            RoundState::InRound(round) => Some(round.current()),
            _ => None,
        }
    }

    /// The locally tracked score, regardless of state
    pub fn score(&self) -> u32 {
        match &self.state {
            RoundState::Idle => 0,
            RoundState::InRound(round) => round.score(),
            RoundState::Finished { score } => *score,
        }
    }

    /// Whether the player's round is over
    pub fn is_over(&self) -> bool {
        matches!(self.state, RoundState::Finished { .. })
    }

    /// Starts the round when the lobby enters the quiz phase
    ///
    /// Shuffles the subject's full question set, keeps the first
    /// `min(15, N)` questions, and shuffles each question's answer list
    /// independently. Selection and order are per-client: two players in
    /// the same lobby play their own permutations.
    ///
    /// Starting from a non-idle state or with an unknown or empty subject
    /// bank finishes the round immediately with a zero score, matching a
    /// lobby whose subject has no questions.
    pub fn begin_round(&mut self, bank: &QuestionBank, subject: &str) {
        if !matches!(self.state, RoundState::Idle) {
            return;
        }

        let Some(questions) = bank.questions_for(subject).filter(|q| !q.is_empty()) else {
            tracing::warn!(subject, "no questions for subject, finishing round immediately");
            self.state = RoundState::Finished { score: 0 };
            return;
        };

        let mut selected = questions.to_vec();
        fastrand::shuffle(&mut selected);
        selected.truncate(ROUND_SIZE);

        let questions = selected.iter().map(PreparedQuestion::prepare).collect_vec();
        tracing::debug!(subject, count = questions.len(), "round started");
        self.state = RoundState::InRound(QuizRound {
            questions,
            current_index: 0,
            score: 0,
        });
    }

    /// Submits the player's answer to the current question
    ///
    /// Correctness is exact string equality against the question's correct
    /// answer. The local score and progression update first; the remote
    /// bookkeeping that follows (membership upkeep, atomic score
    /// increment, answer record, completion marking) is best-effort — a
    /// failing or timed-out write is logged and never blocks the player.
    ///
    /// On the final question the engine marks this player's membership
    /// finished and, if every membership in the lobby is now finished,
    /// flips the lobby status to `completed` — the last finisher performs
    /// the transition for everyone. Returns `None` unless a round is
    /// active.
    pub async fn submit_answer(&mut self, answer: &str) -> Option<SubmitOutcome> {
        let RoundState::InRound(round) = &mut self.state else {
            return None;
        };

        let question = round.current().clone();
        let correct = answer == question.correct_answer;
        if correct {
            round.score += 1;
        }
        let score = round.score;
        let (index, total) = round.progress();
        let round_over = index + 1 >= total;

        self.ensure_membership().await;
        if correct {
            self.record_increment().await;
        }
        self.record_answer(&question, answer, correct).await;

        let mut lobby_completed = false;
        if round_over {
            self.state = RoundState::Finished { score };
            self.mark_finished().await;
            lobby_completed = self.complete_if_all_finished().await;
        } else if let RoundState::InRound(round) = &mut self.state {
            round.current_index += 1;
        }

        Some(SubmitOutcome {
            correct,
            round_over,
            lobby_completed,
        })
    }

    /// Keeps the (lobby, player) membership row present
    ///
    /// Upserts only the key columns so a concurrent finish flag is never
    /// clobbered back to false.
    async fn ensure_membership(&self) {
        let mut row = crate::store::Row::new();
        row.insert("lobby_id".to_owned(), self.lobby_id.into());
        row.insert("player_id".to_owned(), self.player_id.into());
        let result = with_timeout(self.service.upsert(
            records::tables::LOBBY_PLAYERS,
            row,
            &["lobby_id", "player_id"],
        ))
        .await;
        if let Err(error) = result {
            tracing::warn!(%error, "membership upkeep failed");
        }
    }

    /// Invokes the atomic server-side score increment
    async fn record_increment(&self) {
        let result =
            with_timeout(self.service.increment_score(self.lobby_id, self.player_id)).await;
        if let Err(error) = result {
            tracing::warn!(%error, "score increment failed");
        }
    }

    /// Upserts the answer record for (lobby, player, question)
    ///
    /// Last write wins on the conflict key, so resubmitting the same
    /// question overwrites the previous record instead of duplicating it.
    async fn record_answer(&self, question: &PreparedQuestion, answer: &str, correct: bool) {
        let record = AnswerRow {
            lobby_id: self.lobby_id,
            player_id: self.player_id,
            question_id: question.id.clone(),
            answer: answer.to_owned(),
            is_correct: correct,
        };
        let result = with_timeout(self.service.upsert(
            records::tables::ANSWERS,
            records::to_row(&record),
            &["lobby_id", "player_id", "question_id"],
        ))
        .await;
        if let Err(error) = result {
            tracing::warn!(%error, "answer record failed");
        }
    }

    /// Marks this player's membership finished with a completion time
    async fn mark_finished(&self) {
        let mut patch = crate::store::Row::new();
        patch.insert("finished".to_owned(), serde_json::Value::Bool(true));
        patch.insert(
            "completed_at".to_owned(),
            serde_json::to_value(Utc::now()).expect("default serializer cannot fail"),
        );
        let result = with_timeout(self.service.update(
            records::tables::LOBBY_PLAYERS,
            &[
                Filter::eq("lobby_id", self.lobby_id),
                Filter::eq("player_id", self.player_id),
            ],
            patch,
        ))
        .await;
        if let Err(error) = result {
            tracing::warn!(%error, "marking player finished failed");
        }
    }

    /// Flips the lobby to completed once every membership is finished
    ///
    /// Read-then-conditionally-write, re-evaluated by whichever player
    /// finishes last; racing finishers are harmless because the write
    /// only ever sets `completed`.
    async fn complete_if_all_finished(&self) -> bool {
        let memberships = match with_timeout(self.service.select(
            records::tables::LOBBY_PLAYERS,
            &[Filter::eq("lobby_id", self.lobby_id)],
            None,
        ))
        .await
        {
            Ok(rows) => rows,
            Err(error) => {
                tracing::warn!(%error, "completion check failed");
                return false;
            }
        };

        let all_finished = !memberships.is_empty()
            && memberships.iter().all(|row| {
                records::from_row::<MembershipRow>(row.clone())
                    .map(|m| m.finished)
                    .unwrap_or(false)
            });
        if !all_finished {
            return false;
        }

        let mut patch = crate::store::Row::new();
        patch.insert(
            "status".to_owned(),
            serde_json::to_value(LobbyStatus::Completed).expect("default serializer cannot fail"),
        );
        let result = with_timeout(self.service.update(
            records::tables::LOBBIES,
            &[Filter::eq("id", self.lobby_id)],
            patch,
        ))
        .await;
        match result {
            Ok(_) => {
                tracing::info!(lobby = %self.lobby_id, "all players finished, lobby completed");
                true
            }
            Err(error) => {
                tracing::warn!(%error, "lobby completion update failed");
                false
            }
        }
    }
}
