//! Per-user state kept in the settings store: favorites, listening history
//! and preferences.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SettingsError;
use crate::feed::Episode;
use crate::store::SettingsStore;

pub const FAVORITES_KEY: &str = "favorites";
pub const HISTORY_KEY: &str = "listeningHistory";
pub const AGE_GROUP_KEY: &str = "ageGroup";
pub const LANGUAGE_KEY: &str = "lang";

/// Number of history entries kept
pub const HISTORY_LIMIT: usize = 50;

const DEFAULT_AGE_GROUP: &str = "3-5";
const DEFAULT_LANGUAGE: &str = "en";

/// One play in the listening history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub played_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    pub age_group: String,
    pub language: String,
}

/// Favorites, history and preferences backed by a [`SettingsStore`]
#[derive(Debug, Clone)]
pub struct Library {
    settings: Arc<SettingsStore>,
}

impl Library {
    pub fn new(settings: Arc<SettingsStore>) -> Self {
        Self { settings }
    }

    pub fn favorites(&self) -> BTreeSet<String> {
        self.settings.get(FAVORITES_KEY).unwrap_or_default()
    }

    pub fn is_favorite(&self, id: &str) -> bool {
        self.favorites().contains(id)
    }

    /// Flip the favorite flag for `id` and return the new state
    pub fn toggle_favorite(&self, id: &str) -> Result<bool, SettingsError> {
        let mut favorites = self.favorites();
        let now_favorite = if favorites.remove(id) {
            false
        } else {
            favorites.insert(id.to_string());
            true
        };
        self.settings.set(FAVORITES_KEY, &favorites)?;
        Ok(now_favorite)
    }

    /// Favorited episodes in the order of `episodes`
    pub fn favorite_episodes<'a>(&self, episodes: &'a [Episode]) -> Vec<&'a Episode> {
        let favorites = self.favorites();
        episodes
            .iter()
            .filter(|ep| favorites.contains(&ep.id))
            .collect()
    }

    /// Listening history, newest first
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.settings.get(HISTORY_KEY).unwrap_or_default()
    }

    /// Put `id` at the front of the history, keeping the newest 50 entries
    pub fn record_play(&self, id: &str) -> Result<(), SettingsError> {
        let mut history = self.history();
        history.insert(
            0,
            HistoryEntry {
                id: id.to_string(),
                played_at: Utc::now(),
            },
        );
        history.truncate(HISTORY_LIMIT);
        self.settings.set(HISTORY_KEY, &history)
    }

    pub fn preferences(&self) -> Preferences {
        Preferences {
            age_group: self
                .settings
                .get(AGE_GROUP_KEY)
                .unwrap_or_else(|| DEFAULT_AGE_GROUP.to_string()),
            language: self
                .settings
                .get(LANGUAGE_KEY)
                .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
        }
    }

    pub fn set_age_group(&self, age_group: &str) -> Result<(), SettingsError> {
        self.settings.set(AGE_GROUP_KEY, age_group)
    }

    pub fn set_language(&self, language: &str) -> Result<(), SettingsError> {
        self.settings.set(LANGUAGE_KEY, language)
    }
}
