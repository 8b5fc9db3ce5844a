//! Embedding chunks and retrieval hits
use serde::{Deserialize, Serialize};

use crate::{Embedding, ProjectId};

/// Identifies a chunk: the n-th chunk of the n-th text segment of a project
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkKey {
    pub project_id: ProjectId,
    pub text_idx: u32,
    pub chunk_idx: u32,
}

impl ChunkKey {
    /// `{project_id}-{text_idx}-{chunk_idx}`
    pub fn chunk_id(&self) -> String {
        format!("{}-{}-{}", self.project_id, self.text_idx, self.chunk_idx)
    }
}

/// A piece of project text waiting for its vector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub key: ChunkKey,
    pub text: String,
}

impl TextChunk {
    pub fn new(project_id: &ProjectId, text_idx: u32, chunk_idx: u32, text: impl Into<String>) -> Self {
        Self {
            key: ChunkKey {
                project_id: project_id.clone(),
                text_idx,
                chunk_idx,
            },
            text: text.into(),
        }
    }

    pub fn into_embedded(self, embedding: Embedding) -> EmbeddedChunk {
        EmbeddedChunk {
            project_id: self.key.project_id,
            text_idx: self.key.text_idx,
            chunk_idx: self.key.chunk_idx,
            text_content: self.text,
            embedding,
            chunk_id: None,
        }
    }
}

/// One document of the embedding collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedChunk {
    pub project_id: ProjectId,
    pub text_idx: u32,
    pub chunk_idx: u32,
    pub text_content: String,
    pub embedding: Embedding,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<String>,
}

impl EmbeddedChunk {
    pub fn key(&self) -> ChunkKey {
        ChunkKey {
            project_id: self.project_id.clone(),
            text_idx: self.text_idx,
            chunk_idx: self.chunk_idx,
        }
    }

    #[must_use]
    pub fn with_chunk_id(mut self) -> Self {
        self.chunk_id = Some(self.key().chunk_id());
        self
    }
}

/// A vector search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub project_id: ProjectId,
    pub text_content: String,
    pub score: f64,
}
