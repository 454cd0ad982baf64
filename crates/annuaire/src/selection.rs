//! Backend selection input and validation.
//!
//! A [`BackendSelection`] can only be constructed from valid input:
//! malformed remote URLs are rejected here, before any process is
//! spawned or network call made.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which backend the user picked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendKind {
    /// Spawn and use the local backend process.
    Local,
    /// Use an already-running remote backend at this base URL.
    Remote(String),
}

/// A validated user selection, immutable once accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSelection {
    pub kind: BackendKind,
    /// Persist this selection for future launches.
    pub remember: bool,
}

/// Rejected selection input. Reported inline to the user; never
/// reaches the coordinator.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("remote URL is empty")]
    EmptyUrl,
    #[error("invalid URL: {0}")]
    Malformed(String),
    #[error("unsupported URL scheme '{0}' (expected http or https)")]
    UnsupportedScheme(String),
}

impl BackendSelection {
    pub fn local(remember: bool) -> Self {
        Self {
            kind: BackendKind::Local,
            remember,
        }
    }

    /// Validate a remote URL and build a selection from it.
    pub fn remote(url: &str, remember: bool) -> Result<Self, SelectionError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(SelectionError::EmptyUrl);
        }

        let parsed =
            reqwest::Url::parse(url).map_err(|err| SelectionError::Malformed(err.to_string()))?;
        match parsed.scheme() {
            "http" | "https" => {}
            other => return Err(SelectionError::UnsupportedScheme(other.to_string())),
        }

        Ok(Self {
            kind: BackendKind::Remote(url.trim_end_matches('/').to_string()),
            remember,
        })
    }
}
