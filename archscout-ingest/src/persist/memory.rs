use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use archscout_core::chunk::{ChunkKey, EmbeddedChunk, SearchHit};
use archscout_core::util::has_nan;
use archscout_core::{ContentStore, Embedding, EmbeddingStore, ParsedRecord, ProjectId};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

/// Records by project id, merged on upsert like a `$set`
#[derive(Debug, Default, Clone)]
pub struct MemoryContentStore {
    data: Arc<RwLock<HashMap<ProjectId, Value>>>,
}

impl MemoryContentStore {
    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn contains(&self, id: &ProjectId) -> Result<bool> {
        Ok(self.data.read().await.contains_key(id))
    }

    async fn get(&self, id: &ProjectId) -> Result<Option<ParsedRecord>> {
        self.data
            .read()
            .await
            .get(id)
            .map(|value| serde_json::from_value(value.clone()).context("Stored record is invalid"))
            .transpose()
    }

    async fn upsert(&self, id: &ProjectId, record: &ParsedRecord) -> Result<()> {
        let Value::Object(fields) = serde_json::to_value(record)? else {
            anyhow::bail!("Record does not serialize to an object");
        };

        let mut data = self.data.write().await;
        let entry = data
            .entry(id.clone())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if let Value::Object(existing) = entry {
            existing.extend(fields);
        }
        Ok(())
    }
}

/// Chunks in insertion order, searched by cosine similarity
#[derive(Debug, Default, Clone)]
pub struct MemoryEmbeddingStore {
    data: Arc<RwLock<Vec<EmbeddedChunk>>>,
}

impl MemoryEmbeddingStore {
    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Chunks of one project ordered by text and chunk position
    pub async fn chunks_of(&self, id: &ProjectId) -> Vec<EmbeddedChunk> {
        let mut chunks: Vec<_> = self
            .data
            .read()
            .await
            .iter()
            .filter(|chunk| &chunk.project_id == id)
            .cloned()
            .collect();
        chunks.sort_by_key(|chunk| (chunk.text_idx, chunk.chunk_idx));
        chunks
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| f64::from(*x) * f64::from(*y)).sum();
    let norm = |v: &[f32]| v.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    let denominator = norm(a) * norm(b);
    if denominator == 0.0 { 0.0 } else { dot / denominator }
}

#[async_trait]
impl EmbeddingStore for MemoryEmbeddingStore {
    async fn has_project(&self, id: &ProjectId) -> Result<bool> {
        Ok(self
            .data
            .read()
            .await
            .iter()
            .any(|chunk| &chunk.project_id == id))
    }

    async fn delete_project(&self, id: &ProjectId) -> Result<u64> {
        let mut data = self.data.write().await;
        let before = data.len();
        data.retain(|chunk| &chunk.project_id != id);
        Ok((before - data.len()) as u64)
    }

    async fn insert(&self, chunk: EmbeddedChunk) -> Result<()> {
        self.data.write().await.push(chunk);
        Ok(())
    }

    async fn insert_many(&self, chunks: Vec<EmbeddedChunk>) -> Result<()> {
        self.data.write().await.extend(chunks);
        Ok(())
    }

    async fn chunks_with_nan(&self) -> Result<Vec<EmbeddedChunk>> {
        Ok(self
            .data
            .read()
            .await
            .iter()
            .filter(|chunk| has_nan(&chunk.embedding))
            .cloned()
            .collect())
    }

    async fn update_embedding(&self, key: &ChunkKey, embedding: Embedding) -> Result<()> {
        let mut data = self.data.write().await;
        let chunk = data
            .iter_mut()
            .find(|chunk| &chunk.key() == key)
            .with_context(|| format!("No chunk {}", key.chunk_id()))?;
        chunk.embedding = embedding;
        Ok(())
    }

    async fn search(&self, query: Embedding, top_k: usize) -> Result<Vec<SearchHit>> {
        let data = self.data.read().await;
        let mut hits: Vec<SearchHit> = data
            .iter()
            .filter(|chunk| !has_nan(&chunk.embedding))
            .map(|chunk| SearchHit {
                project_id: chunk.project_id.clone(),
                text_content: chunk.text_content.clone(),
                score: cosine_similarity(&query, &chunk.embedding),
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);
        Ok(hits)
    }
}
