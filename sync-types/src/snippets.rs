//! Snippet collections - folders of reusable text, replicated as a whole.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{digest, ContentHash};

/// A single snippet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snippet {
    /// Stable identifier
    pub id: Uuid,
    /// Display title
    pub title: String,
    /// Text inserted when the snippet is used
    pub content: String,
}

/// An ordered folder of snippets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnippetFolder {
    /// Stable identifier
    pub id: Uuid,
    /// Display title
    pub title: String,
    /// Whether the folder is active
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
    /// Snippets in display order
    #[serde(default)]
    pub snippets: Vec<Snippet>,
}

fn default_enabled() -> bool {
    true
}

/// The full snippet collection of a device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnippetCollection {
    /// Folders in display order
    pub folders: Vec<SnippetFolder>,
}

impl SnippetCollection {
    /// Create a collection from folders.
    pub fn new(folders: Vec<SnippetFolder>) -> Self {
        Self { folders }
    }

    /// Content hash of the whole collection, independent of display order.
    pub fn content_hash(&self) -> ContentHash {
        digest::hash_collection(self)
    }

    /// Total number of snippets across all folders.
    pub fn snippet_count(&self) -> usize {
        self.folders.iter().map(|f| f.snippets.len()).sum()
    }
}
