//! Core data models used throughout Folio.
//!
//! These types represent the pages, chunks, retrieval results and chat
//! messages that flow through the indexing and answering pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Extracted text of one page of one PDF.
///
/// Only pages with non-empty text become records; `page` is 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRecord {
    pub source: String,
    pub page: u32,
    pub text: String,
}

/// A bounded, overlapping text segment cut from a single [`PageRecord`].
///
/// `ordinal` is the chunk's position in the whole corpus (0-based, contiguous);
/// `hash` is the SHA-256 of `text`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub ordinal: usize,
    pub source: String,
    pub page: u32,
    pub text: String,
    pub hash: String,
}

impl Chunk {
    /// The (file, page) pair this chunk was cut from.
    pub fn citation(&self) -> Citation {
        Citation {
            source: self.source.clone(),
            page: self.page,
        }
    }
}

/// A retrieved chunk paired with its cosine similarity to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Where a piece of retrieved content came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Citation {
    pub source: String,
    pub page: u32,
}

impl fmt::Display for Citation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (page {})", self.source, self.page)
    }
}

/// Speaker of a [`ChatMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One entry of a session transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn citation_display_names_file_and_page() {
        let c = Citation {
            source: "resume.pdf".to_string(),
            page: 2,
        };
        assert_eq!(c.to_string(), "resume.pdf (page 2)");
    }

    #[test]
    fn role_serializes_lowercase() {
        let msg = ChatMessage::assistant("hi");
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"hi"}"#);
    }
}
