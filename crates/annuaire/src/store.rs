//! Durable persistence of the remembered backend choice.
//!
//! One JSON file in the application data directory. Presence of the
//! file implies the user asked to remember the choice; absence means
//! no remembered choice. Single writer (the coordinator), so no
//! locking is needed.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::selection::{BackendKind, BackendSelection};

const CHOICE_FILE: &str = "choice.json";

/// Durable mirror of a remembered [`BackendSelection`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedChoice {
    pub kind: ChoiceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Always true in practice: the record is only written for
    /// remembered choices. Kept in the file so the stored object
    /// mirrors the in-memory selection; absent in older files.
    #[serde(default = "remember_default")]
    pub remember: bool,
}

fn remember_default() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChoiceKind {
    Local,
    Remote,
}

impl PersistedChoice {
    pub fn from_selection(selection: &BackendSelection) -> Self {
        match &selection.kind {
            BackendKind::Local => Self {
                kind: ChoiceKind::Local,
                url: None,
                remember: selection.remember,
            },
            BackendKind::Remote(url) => Self {
                kind: ChoiceKind::Remote,
                url: Some(url.clone()),
                remember: selection.remember,
            },
        }
    }

    /// Rebuild a selection from the stored record.
    pub fn into_selection(self) -> Option<BackendSelection> {
        match self.kind {
            ChoiceKind::Local => Some(BackendSelection::local(self.remember)),
            ChoiceKind::Remote => {
                let url = self.url?;
                match BackendSelection::remote(&url, self.remember) {
                    Ok(selection) => Some(selection),
                    Err(err) => {
                        warn!("ignoring persisted remote choice with invalid URL: {err}");
                        None
                    }
                }
            }
        }
    }
}

/// File-backed store for the remembered backend choice.
#[derive(Debug, Clone)]
pub struct ChoiceStore {
    path: PathBuf,
}

impl ChoiceStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(CHOICE_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the remembered choice, if any. A corrupt or unreadable
    /// file is logged and treated as "no remembered choice".
    pub fn load(&self) -> Option<PersistedChoice> {
        if !self.path.exists() {
            return None;
        }

        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) => {
                warn!("failed to read {}: {err}", self.path.display());
                return None;
            }
        };

        match serde_json::from_str(&contents) {
            Ok(choice) => Some(choice),
            Err(err) => {
                warn!("ignoring corrupt choice file {}: {err}", self.path.display());
                None
            }
        }
    }

    pub fn save(&self, choice: &PersistedChoice) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating data directory {}", parent.display()))?;
        }

        let contents = serde_json::to_string_pretty(choice)?;
        fs::write(&self.path, contents)
            .with_context(|| format!("writing choice file {}", self.path.display()))?;
        debug!("saved backend choice to {}", self.path.display());
        Ok(())
    }

    /// Remove the remembered choice. No-op when nothing is stored.
    pub fn clear(&self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        fs::remove_file(&self.path)
            .with_context(|| format!("removing choice file {}", self.path.display()))?;
        debug!("cleared backend choice at {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_returns_none_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChoiceStore::new(dir.path());
        assert_eq!(store.load(), None);
    }

    #[test]
    fn save_load_roundtrip_local() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChoiceStore::new(dir.path());

        let choice = PersistedChoice::from_selection(&BackendSelection::local(true));
        store.save(&choice).unwrap();

        assert_eq!(store.load(), Some(choice));
    }

    #[test]
    fn save_load_roundtrip_remote() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChoiceStore::new(dir.path());

        let selection = BackendSelection::remote("https://annuaire.example.com", true).unwrap();
        let choice = PersistedChoice::from_selection(&selection);
        store.save(&choice).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.kind, ChoiceKind::Remote);
        assert_eq!(loaded.into_selection(), Some(selection));
    }

    #[test]
    fn clear_removes_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChoiceStore::new(dir.path());

        let choice = PersistedChoice::from_selection(&BackendSelection::local(true));
        store.save(&choice).unwrap();
        store.clear().unwrap();

        assert_eq!(store.load(), None);
    }

    #[test]
    fn clear_is_noop_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChoiceStore::new(dir.path());
        store.clear().unwrap();
    }

    #[test]
    fn record_carries_remember_flag_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChoiceStore::new(dir.path());

        let choice = PersistedChoice::from_selection(&BackendSelection::local(true));
        store.save(&choice).unwrap();

        let contents = fs::read_to_string(store.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(value["kind"], "local");
        assert_eq!(value["remember"], true);
    }

    #[test]
    fn record_without_remember_field_still_loads() {
        // Files written before the flag was stored.
        let dir = tempfile::tempdir().unwrap();
        let store = ChoiceStore::new(dir.path());

        fs::write(store.path(), r#"{"kind": "local"}"#).unwrap();

        let loaded = store.load().unwrap();
        assert!(loaded.remember);
        assert_eq!(loaded.into_selection(), Some(BackendSelection::local(true)));
    }

    #[test]
    fn corrupt_file_treated_as_no_choice() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChoiceStore::new(dir.path());

        fs::write(store.path(), "{ not json").unwrap();
        assert_eq!(store.load(), None);
    }
}
