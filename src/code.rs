//! Join code generation and management
//!
//! This module provides functionality for generating and managing the short
//! codes players use to join a lobby. Codes are six characters drawn from an
//! uppercase alphanumeric alphabet to make them easy to communicate, and a
//! freshly generated code is guaranteed not to belong to any existing lobby.

use std::{fmt::Display, str::FromStr};

use serde_with::{DeserializeFromStr, SerializeDisplay};
use thiserror::Error;

use crate::{
    constants::code::{ALPHABET, LENGTH},
    records,
    store::{DataService, Filter, StoreError},
};

/// A lobby join code
///
/// Join codes are six uniformly random characters from the 36-symbol
/// alphabet A–Z0–9. They are displayed and transmitted as plain strings
/// and parsed case-insensitively, so players can type them in any case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, DeserializeFromStr, SerializeDisplay)]
pub struct JoinCode([u8; LENGTH]);

/// Errors raised when parsing a join code from a string
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseCodeError {
    /// The string is not exactly six characters long
    #[error("join code must be exactly {LENGTH} characters")]
    BadLength,
    /// The string contains a character outside A–Z0–9
    #[error("join code may only contain letters and digits")]
    BadCharacter,
}

impl JoinCode {
    /// Creates a random join code without checking it against existing lobbies
    ///
    /// Each character is drawn independently and uniformly from the code
    /// alphabet. Use [`JoinCode::generate`] for a collision-checked code.
    pub fn random() -> Self {
        let mut symbols = [0u8; LENGTH];
        for symbol in &mut symbols {
            *symbol = ALPHABET[fastrand::usize(..ALPHABET.len())];
        }
        Self(symbols)
    }

    /// Generates a join code that no existing lobby is using
    ///
    /// Draws random candidates and queries the remote store for a lobby
    /// already holding each one, retrying until a free code is found. The
    /// 36^6 keyspace makes more than a handful of retries vanishingly
    /// unlikely, so no retry bound is enforced.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`StoreError`] if the existence query fails.
    /// A failing query is never mistaken for a free code: generation stops
    /// rather than handing out a candidate it could not verify.
    pub async fn generate(service: &dyn DataService) -> Result<Self, StoreError> {
        loop {
            let candidate = Self::random();

            let occupied = service
                .select_one(
                    records::tables::LOBBIES,
                    &[Filter::eq("code", candidate)],
                )
                .await?
                .is_some();

            if !occupied {
                return Ok(candidate);
            }
            tracing::debug!(code = %candidate, "join code collision, retrying");
        }
    }
}

impl Display for JoinCode {
    /// Formats the join code as its six-character uppercase string
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Infallible: the alphabet is pure ASCII.
        f.write_str(std::str::from_utf8(&self.0).map_err(|_| std::fmt::Error)?)
    }
}

impl FromStr for JoinCode {
    type Err = ParseCodeError;

    /// Parses a join code, normalizing lowercase input to uppercase
    ///
    /// # Errors
    ///
    /// Returns [`ParseCodeError`] if the string is not exactly six
    /// characters from the code alphabet.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.to_ascii_uppercase();
        let bytes = normalized.as_bytes();
        let symbols: [u8; LENGTH] = bytes
            .try_into()
            .map_err(|_| ParseCodeError::BadLength)?;
        if symbols.iter().any(|b| !ALPHABET.contains(b)) {
            return Err(ParseCodeError::BadCharacter);
        }
        Ok(Self(symbols))
    }
}

impl From<JoinCode> for serde_json::Value {
    /// Converts the join code into its string form for row filters
    fn from(code: JoinCode) -> Self {
        serde_json::Value::String(code.to_string())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        records::{LobbyId, LobbyRow, LobbyStatus, PlayerId},
        store::memory::MemoryBackend,
        store::{DataService, StoreError},
    };

    fn lobby_with_code(code: JoinCode) -> LobbyRow {
        LobbyRow {
            id: LobbyId::new(),
            code,
            host_id: PlayerId::new(),
            subject: None,
            status: LobbyStatus::Waiting,
        }
    }

    #[test]
    fn test_random_length_and_alphabet() {
        for _ in 0..100 {
            let code = JoinCode::random().to_string();
            assert_eq!(code.len(), LENGTH);
            assert!(code.bytes().all(|b| ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn test_parse_normalizes_case() {
        let code: JoinCode = "ab12c3".parse().unwrap();
        assert_eq!(code.to_string(), "AB12C3");
        assert_eq!("AB12C3".parse::<JoinCode>().unwrap(), code);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert_eq!(
            "AB12C".parse::<JoinCode>().unwrap_err(),
            ParseCodeError::BadLength
        );
        assert_eq!(
            "AB12C3X".parse::<JoinCode>().unwrap_err(),
            ParseCodeError::BadLength
        );
        assert_eq!(
            "AB-2C3".parse::<JoinCode>().unwrap_err(),
            ParseCodeError::BadCharacter
        );
        assert!("".parse::<JoinCode>().is_err());
    }

    #[test]
    fn test_serialization_round_trip() {
        let code: JoinCode = "QW9ERT".parse().unwrap();
        let serialized = serde_json::to_string(&code).unwrap();
        assert_eq!(serialized, "\"QW9ERT\"");
        let deserialized: JoinCode = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized, code);
    }

    #[tokio::test]
    async fn test_generate_skips_occupied_code() {
        let service = Arc::new(MemoryBackend::default());

        // Derive the first candidate the seeded generator will produce and
        // occupy it, forcing a collision on the first attempt.
        fastrand::seed(7);
        let first_candidate = JoinCode::random();
        service
            .insert(
                records::tables::LOBBIES,
                records::to_row(&lobby_with_code(first_candidate)),
            )
            .await
            .unwrap();

        fastrand::seed(7);
        let generated = JoinCode::generate(service.as_ref()).await.unwrap();
        assert_ne!(generated, first_candidate);

        let occupied = service
            .select_one(records::tables::LOBBIES, &[Filter::eq("code", generated)])
            .await
            .unwrap();
        assert!(occupied.is_none());
    }

    #[tokio::test]
    async fn test_generate_propagates_store_failure() {
        struct Broken;

        #[async_trait::async_trait]
        impl DataService for Broken {
            async fn select(
                &self,
                _table: &str,
                _filters: &[Filter],
                _order: Option<crate::store::Order>,
            ) -> Result<Vec<crate::store::Row>, StoreError> {
                Err(StoreError::Backend("connection refused".to_owned()))
            }

            async fn insert(
                &self,
                _table: &str,
                _row: crate::store::Row,
            ) -> Result<crate::store::Row, StoreError> {
                unimplemented!()
            }

            async fn update(
                &self,
                _table: &str,
                _filters: &[Filter],
                _patch: crate::store::Row,
            ) -> Result<Vec<crate::store::Row>, StoreError> {
                unimplemented!()
            }

            async fn upsert(
                &self,
                _table: &str,
                _row: crate::store::Row,
                _conflict_columns: &[&str],
            ) -> Result<crate::store::Row, StoreError> {
                unimplemented!()
            }

            async fn delete(
                &self,
                _table: &str,
                _filters: &[Filter],
            ) -> Result<usize, StoreError> {
                unimplemented!()
            }

            async fn increment_score(
                &self,
                _lobby: LobbyId,
                _player: PlayerId,
            ) -> Result<(), StoreError> {
                unimplemented!()
            }

            fn subscribe(
                &self,
                topic: crate::store::Topic,
                _lobby: LobbyId,
            ) -> crate::store::EventStream {
                crate::store::EventStream::closed(topic)
            }
        }

        // A permanently erroring query must surface, not read as "free".
        let result = JoinCode::generate(&Broken).await;
        assert!(matches!(result, Err(StoreError::Backend(_))));
    }
}
