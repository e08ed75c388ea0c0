//! Persisted theme preference.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::storage::KeyValueStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemePreference {
    Light,
    Dark,
    #[default]
    System,
}

/// Concrete mode after resolving [`ThemePreference::System`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemeMode {
    Light,
    Dark,
}

impl ThemePreference {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Dark => "dark",
            Self::System => "system",
        }
    }

    pub fn resolve(&self, system_prefers_dark: bool) -> ThemeMode {
        match self {
            Self::Light => ThemeMode::Light,
            Self::Dark => ThemeMode::Dark,
            Self::System if system_prefers_dark => ThemeMode::Dark,
            Self::System => ThemeMode::Light,
        }
    }
}

impl fmt::Display for ThemePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ThemeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Light => "light",
            Self::Dark => "dark",
        })
    }
}

impl FromStr for ThemePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "light" => Ok(Self::Light),
            "dark" => Ok(Self::Dark),
            "system" => Ok(Self::System),
            other => Err(format!("unknown theme '{other}', expected light, dark or system")),
        }
    }
}

/// Reads and writes the preference as a plain string under one key.
#[derive(Clone)]
pub struct ThemeStore {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl ThemeStore {
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    /// Stored preference. An unrecognised value is an error.
    pub fn load(&self) -> Result<Option<ThemePreference>, StorageError> {
        match self.store.get(&self.key)? {
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|e| StorageError::invalid_value(&self.key, e)),
            None => Ok(None),
        }
    }

    /// Stored preference, or `System` when absent or unreadable.
    pub fn load_or_default(&self) -> ThemePreference {
        match self.load() {
            Ok(pref) => pref.unwrap_or_default(),
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring stored theme preference");
                ThemePreference::default()
            }
        }
    }

    pub fn save(&self, preference: ThemePreference) -> Result<(), StorageError> {
        self.store.set(&self.key, preference.as_str())?;
        tracing::debug!(theme = %preference, "Theme preference saved");
        Ok(())
    }

    pub fn clear(&self) -> Result<(), StorageError> {
        self.store.remove(&self.key).map(|_| ())
    }
}
