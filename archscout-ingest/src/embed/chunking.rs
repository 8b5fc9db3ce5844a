use std::sync::Arc;

use anyhow::Result;
use archscout_core::chunk::TextChunk;
use archscout_core::{ParsedRecord, ProjectId};
use text_splitter::{Characters, ChunkConfig, TextSplitter};

/// Splits the text segments of a record into overlapping, character-bounded chunks.
#[derive(Debug, Clone)]
pub struct Chunker {
    splitter: Arc<TextSplitter<Characters>>,
}

impl Chunker {
    /// # Errors
    ///
    /// Errors if the overlap is not smaller than the chunk size.
    pub fn new(max_characters: usize, overlap: usize) -> Result<Self> {
        let config = ChunkConfig::new(max_characters).with_overlap(overlap)?;
        Ok(Self {
            splitter: Arc::new(TextSplitter::new(config)),
        })
    }

    /// Chunks keyed by text segment position and chunk position within it. Chunks that are
    /// empty after trimming are dropped.
    pub fn chunk_record(&self, id: &ProjectId, record: &ParsedRecord) -> Vec<TextChunk> {
        let mut chunks = Vec::new();
        for (text_idx, text) in record.text_segments() {
            let pieces = self
                .splitter
                .chunks(text)
                .map(str::trim)
                .filter(|chunk| !chunk.is_empty());

            for (chunk_idx, chunk) in pieces.enumerate() {
                chunks.push(TextChunk::new(
                    id,
                    u32::try_from(text_idx).unwrap_or(u32::MAX),
                    u32::try_from(chunk_idx).unwrap_or(u32::MAX),
                    chunk,
                ));
            }
        }
        chunks
    }
}
