//! History Retrieval Policy
//!
//! How much prior conversation to load when a room is opened. Affects only
//! the server-side fetch parameters; the live event path is untouched.
//! Switching mode is a full context reset (history re-fetched, log replaced)
//! and is deliberately heavyweight.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryPreference {
    /// Full prior log for the session (paginated, first page).
    #[default]
    Continue,
    /// Backend suppresses prior messages; the log starts empty.
    Fresh,
    /// Condensed recent-context window instead of the full log.
    Summary,
}

impl HistoryPreference {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryPreference::Continue => "continue",
            HistoryPreference::Fresh => "fresh",
            HistoryPreference::Summary => "summary",
        }
    }

    pub fn fetch_page(&self) -> u32 {
        1
    }

    pub fn fetch_limit(&self) -> u32 {
        match self {
            HistoryPreference::Continue | HistoryPreference::Fresh => 50,
            HistoryPreference::Summary => 20,
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "continue" => Some(HistoryPreference::Continue),
            "fresh" => Some(HistoryPreference::Fresh),
            "summary" => Some(HistoryPreference::Summary),
            _ => None,
        }
    }
}

impl fmt::Display for HistoryPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
