//! Local session management
//!
//! This module owns the client-local identity and lobby persistence. The
//! registered profile and the lobby snapshot are persisted independently
//! to durable local storage so a page reload does not lose context: every
//! in-memory mutation is mirrored to storage before control returns, and
//! every deletion clears the stored copy.
//!
//! Registration validates display names the same way name assignment does
//! in any shared game: empty and over-long names are rejected and
//! inappropriate content is filtered out before anything reaches the
//! remote store.

use std::{collections::HashMap, sync::Mutex};

use chrono::Utc;
use rustrict::CensorStr;
use serde::Serialize;
use thiserror::Error;

use crate::{
    constants,
    error::Error,
    records::{self, PlayerId, ProfileRow},
    store::{DataService, Filter, with_timeout},
};

/// Storage key the profile snapshot is persisted under
const PROFILE_KEY: &str = "parlor.profile";
/// Storage key the lobby snapshot is persisted under
const LOBBY_KEY: &str = "parlor.lobby";

/// Durable local key-value storage
///
/// An abstraction over the host's synchronous storage (browser
/// localStorage or an equivalent). Implementations only need plain
/// string get/set/remove; all encoding happens in [`SessionStore`].
pub trait KeyValueStorage: Send + Sync {
    /// Reads the value stored under `key`, if any
    fn get(&self, key: &str) -> Option<String>;

    /// Stores `value` under `key`, replacing any previous value
    fn set(&self, key: &str, value: &str);

    /// Removes the value stored under `key`, if any
    fn remove(&self, key: &str);
}

/// A [`KeyValueStorage`] backed by process memory
///
/// Used in tests and anywhere no durable storage is available.
#[derive(Default)]
pub struct MemoryStorage {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    /// Creates an empty storage
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.values
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.lock().insert(key.to_owned(), value.to_owned());
    }

    fn remove(&self, key: &str) {
        self.lock().remove(key);
    }
}

/// Errors that can occur during display name validation
#[derive(Error, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameError {
    /// The name is empty or contains only whitespace
    #[error("name cannot be empty")]
    Empty,
    /// The name exceeds the maximum allowed length
    #[error("name is too long")]
    TooLong,
    /// The name contains inappropriate content
    #[error("name is inappropriate")]
    Sinful,
}

/// Validates a display name, returning its trimmed form
///
/// # Errors
///
/// Returns a [`NameError`] if the trimmed name is empty, longer than
/// [`constants::name::MAX_LENGTH`], or filtered as inappropriate.
pub fn validate_display_name(name: &str) -> Result<String, NameError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(NameError::Empty);
    }
    if trimmed.chars().count() > constants::name::MAX_LENGTH {
        return Err(NameError::TooLong);
    }
    if trimmed.is_inappropriate() {
        return Err(NameError::Sinful);
    }
    Ok(trimmed.to_owned())
}

/// Holds the local user identity and persists session state
///
/// The store is the single authority for "who is this client": the
/// coordinator asks it for the registered profile before any lobby
/// operation. Lobby snapshots pass through here too, but their in-memory
/// ownership stays with the coordinator.
pub struct SessionStore {
    storage: std::sync::Arc<dyn KeyValueStorage>,
    profile: Option<ProfileRow>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("profile", &self.profile)
            .finish_non_exhaustive()
    }
}

impl SessionStore {
    /// Creates a session store over the given storage, restoring any
    /// previously persisted profile
    ///
    /// A stored snapshot that no longer parses is discarded with a warning
    /// rather than surfaced; the player simply registers again.
    pub fn new(storage: std::sync::Arc<dyn KeyValueStorage>) -> Self {
        let profile = restore(storage.as_ref(), PROFILE_KEY);
        Self { storage, profile }
    }

    /// The registered profile, if any
    pub fn profile(&self) -> Option<&ProfileRow> {
        self.profile.as_ref()
    }

    /// Registers a new player under the given display name
    ///
    /// Validates the name, inserts a fresh profile row into the remote
    /// store, and persists the profile locally before returning.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidName`] for a rejected name and
    /// [`Error::Remote`] when the profile insert fails.
    pub async fn register(
        &mut self,
        service: &dyn DataService,
        name: &str,
    ) -> Result<ProfileRow, Error> {
        let name = validate_display_name(name)?;
        let profile = ProfileRow {
            id: PlayerId::new(),
            name,
            created_at: Utc::now(),
        };

        with_timeout(service.insert(records::tables::PROFILES, records::to_row(&profile)))
            .await
            .map_err(|source| Error::remote("register profile", source))?;

        self.set_profile(Some(profile.clone()));
        Ok(profile)
    }

    /// Changes the registered player's display name
    ///
    /// Updates the remote profile row first, then the local mirror.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AuthRequired`] with no registered profile,
    /// [`Error::InvalidName`] for a rejected name, and [`Error::Remote`]
    /// when the profile update fails.
    pub async fn update_name(
        &mut self,
        service: &dyn DataService,
        name: &str,
    ) -> Result<(), Error> {
        let name = validate_display_name(name)?;
        let mut profile = self.profile.clone().ok_or(Error::AuthRequired)?;
        if profile.name == name {
            return Ok(());
        }

        let mut patch = crate::store::Row::new();
        patch.insert("name".to_owned(), serde_json::Value::String(name.clone()));
        with_timeout(service.update(
            records::tables::PROFILES,
            &[Filter::eq("id", profile.id)],
            patch,
        ))
        .await
        .map_err(|source| Error::remote("update display name", source))?;

        profile.name = name;
        self.set_profile(Some(profile));
        Ok(())
    }

    /// Forgets the registered player and clears all persisted state
    ///
    /// Purely local: the remote profile row is left in place.
    pub fn logout(&mut self) {
        self.set_profile(None);
        self.clear_lobby();
    }

    /// Persists a lobby snapshot
    pub fn save_lobby<T: Serialize>(&self, lobby: &T) {
        save(self.storage.as_ref(), LOBBY_KEY, lobby);
    }

    /// Restores the persisted lobby snapshot, if any
    pub fn restore_lobby<T: serde::de::DeserializeOwned>(&self) -> Option<T> {
        restore(self.storage.as_ref(), LOBBY_KEY)
    }

    /// Removes the persisted lobby snapshot
    pub fn clear_lobby(&self) {
        self.storage.remove(LOBBY_KEY);
    }

    /// Replaces the in-memory profile and mirrors the change to storage
    fn set_profile(&mut self, profile: Option<ProfileRow>) {
        match &profile {
            Some(profile) => save(self.storage.as_ref(), PROFILE_KEY, profile),
            None => self.storage.remove(PROFILE_KEY),
        }
        self.profile = profile;
    }
}

/// Persists a serializable snapshot under the given key
fn save<T: Serialize>(storage: &dyn KeyValueStorage, key: &str, value: &T) {
    let encoded = serde_json::to_string(value).expect("default serializer cannot fail");
    storage.set(key, &encoded);
}

/// Restores a snapshot, discarding values that no longer parse
fn restore<T: serde::de::DeserializeOwned>(
    storage: &dyn KeyValueStorage,
    key: &str,
) -> Option<T> {
    let raw = storage.get(key)?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(error) => {
            tracing::warn!(key, %error, "discarding unreadable session snapshot");
            storage.remove(key);
            None
        }
    }
}
