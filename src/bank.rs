//! Static per-subject question banks
//!
//! Question data is static: each subject's full question set is loaded
//! wholesale from a JSON document, validated once, and never mutated.
//! The quiz engine draws its per-player rounds from these banks.

use std::collections::HashMap;

use garde::Validate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A quiz subject offered for lobby selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    /// Stable identifier stored on the lobby row
    pub id: String,
    /// Human-readable subject name
    pub name: String,
}

/// A single trivia question as stored in a subject's bank
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Question {
    /// Stable identifier, unique within the subject
    #[garde(length(min = 1))]
    pub id: String,
    /// The prompt shown to the player
    #[garde(length(min = 1))]
    #[serde(alias = "question")]
    pub prompt: String,
    /// The one correct answer, compared by exact string equality
    #[garde(length(min = 1))]
    pub correct_answer: String,
    /// The incorrect answer options
    #[garde(length(min = 1), inner(length(min = 1)))]
    pub wrong_answers: Vec<String>,
}

/// Errors raised while loading a subject's question data
#[derive(Error, Debug)]
pub enum BankError {
    /// The document is not valid JSON of the expected shape
    #[error("malformed question data: {0}")]
    Parse(#[from] serde_json::Error),
    /// A question failed validation
    #[error("invalid question data: {0}")]
    Invalid(#[from] garde::Report),
}

/// The catalogue of subjects and their loaded question sets
#[derive(Debug, Default, Clone)]
pub struct QuestionBank {
    subjects: Vec<Subject>,
    questions: HashMap<String, Vec<Question>>,
}

impl QuestionBank {
    /// Creates an empty bank
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads one subject and its full question set from a JSON document
    ///
    /// The document is an array of questions. Loading replaces any
    /// previously loaded set for the same subject id.
    ///
    /// # Errors
    ///
    /// Returns [`BankError::Parse`] for malformed JSON and
    /// [`BankError::Invalid`] for a question that fails validation;
    /// in both cases the bank is left unchanged.
    pub fn load_subject(&mut self, subject: Subject, json: &str) -> Result<usize, BankError> {
        let questions: Vec<Question> = serde_json::from_str(json)?;
        for question in &questions {
            question.validate()?;
        }

        let count = questions.len();
        self.questions.insert(subject.id.clone(), questions);
        self.subjects.retain(|s| s.id != subject.id);
        self.subjects.push(subject);
        Ok(count)
    }

    /// The subjects available for selection
    pub fn subjects(&self) -> &[Subject] {
        &self.subjects
    }

    /// The full question set for a subject, if loaded
    pub fn questions_for(&self, subject_id: &str) -> Option<&[Question]> {
        self.questions.get(subject_id).map(Vec::as_slice)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn history() -> Subject {
        Subject {
            id: "history".to_owned(),
            name: "History".to_owned(),
        }
    }

    #[test]
    fn test_load_subject() {
        let mut bank = QuestionBank::new();
        let count = bank
            .load_subject(
                history(),
                r#"[
                    {
                        "id": "hist-001",
                        "question": "In which year did the Berlin Wall fall?",
                        "correct_answer": "1989",
                        "wrong_answers": ["1987", "1991", "1993"]
                    }
                ]"#,
            )
            .unwrap();

        assert_eq!(count, 1);
        assert_eq!(bank.subjects().len(), 1);
        let questions = bank.questions_for("history").unwrap();
        assert_eq!(questions[0].prompt, "In which year did the Berlin Wall fall?");
        assert_eq!(questions[0].correct_answer, "1989");
        assert!(bank.questions_for("science").is_none());
    }

    #[test]
    fn test_load_rejects_malformed_json() {
        let mut bank = QuestionBank::new();
        assert!(matches!(
            bank.load_subject(history(), "{not json"),
            Err(BankError::Parse(_))
        ));
        assert!(bank.subjects().is_empty());
    }

    #[test]
    fn test_load_rejects_invalid_questions() {
        let mut bank = QuestionBank::new();
        let result = bank.load_subject(
            history(),
            r#"[{"id": "q", "prompt": "Valid?", "correct_answer": "yes", "wrong_answers": []}]"#,
        );
        assert!(matches!(result, Err(BankError::Invalid(_))));
        assert!(bank.questions_for("history").is_none());
    }

    #[test]
    fn test_reload_replaces_subject() {
        let mut bank = QuestionBank::new();
        let doc = r#"[{"id": "q1", "prompt": "A?", "correct_answer": "a", "wrong_answers": ["b"]}]"#;
        bank.load_subject(history(), doc).unwrap();
        bank.load_subject(history(), doc).unwrap();
        assert_eq!(bank.subjects().len(), 1);
        assert_eq!(bank.questions_for("history").unwrap().len(), 1);
    }
}
