//! Error Taxonomy
//!
//! One boundary error type for the whole client core. Recoverable conditions
//! (transport drops, upload failures, negotiation timeouts) surface as inline
//! state where a banner makes more sense than an `Err`; everything that a
//! caller must branch on comes through here.

use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// Missing or rejected bearer credential. Fatal to the current view.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Session or history absent on the backend. Terminal, do not retry.
    #[error("not found: {0}")]
    NotFound(String),

    /// Local validation failure (oversized attachment, bad input). No
    /// network call was made.
    #[error("{0}")]
    Validation(String),

    /// Connection-level failure. Recoverable; the channel retries on its own.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Attachment upload failed; the draft is kept for retry.
    #[error("upload failed: {0}")]
    Upload(String),
}

impl ChatError {
    /// Map a reqwest error into the taxonomy. Connection-level problems are
    /// transport failures; auth and missing-resource statuses keep their
    /// meaning.
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            if status == StatusCode::UNAUTHORIZED {
                return Self::Auth("bearer credential rejected".to_string());
            }
            if status == StatusCode::NOT_FOUND {
                return Self::NotFound(err.to_string());
            }
        }
        if err.is_connect() || err.is_timeout() {
            Self::Transport("backend is unreachable".to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}
