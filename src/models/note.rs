use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A note, keyed by its title.
///
/// `version` is the conflict-resolution counter: the copy with the strictly
/// greater version wins when local and remote disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub title: String,
    pub content: String,
    pub version: u64,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Note {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            version: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// True if this copy should replace `other` during reconciliation.
    pub fn is_newer_than(&self, other: &Note) -> bool {
        self.version > other.version
    }
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.title)?;
        writeln!(f, "{}", "=".repeat(self.title.len()))?;
        writeln!(f, "Version: {}", self.version)?;
        writeln!(f, "Updated: {}", self.updated_at.to_rfc3339())?;

        if !self.content.is_empty() {
            writeln!(f, "\n{}", self.content)?;
        }

        Ok(())
    }
}
