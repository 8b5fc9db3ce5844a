use anyhow::{Context as _, Result};
use archscout_core::chunk::{ChunkKey, EmbeddedChunk, SearchHit};
use archscout_core::util::has_nan;
use archscout_core::{Embedding, EmbeddingStore, ProjectId};
use async_trait::async_trait;
use futures_util::TryStreamExt as _;
use mongodb::bson::{self, Document, doc};
use mongodb::{Collection, IndexModel};

/// Candidates considered per returned hit
const CANDIDATES_PER_HIT: i64 = 10;

/// One document per chunk: `project_id`, `text_idx`, `chunk_idx`, `text_content`, `embedding`
#[derive(Debug, Clone)]
pub struct MongoEmbeddingStore {
    collection: Collection<EmbeddedChunk>,
    vector_index: String,
}

impl MongoEmbeddingStore {
    pub fn new(collection: Collection<EmbeddedChunk>, vector_index: impl Into<String>) -> Self {
        Self {
            collection,
            vector_index: vector_index.into(),
        }
    }

    /// Creates the lookup index on `project_id` if missing. The vector index is managed in Atlas.
    ///
    /// # Errors
    ///
    /// Errors if the index cannot be created.
    pub async fn ensure_indexes(&self) -> Result<()> {
        self.collection
            .create_index(IndexModel::builder().keys(doc! { "project_id": 1 }).build())
            .await
            .context("Failed to create project_id index")?;
        Ok(())
    }
}

fn key_filter(key: &ChunkKey) -> Document {
    doc! {
        "project_id": key.project_id.as_str(),
        "text_idx": key.text_idx,
        "chunk_idx": key.chunk_idx,
    }
}

pub(crate) fn search_pipeline(index: &str, query: &[f32], top_k: usize) -> Vec<Document> {
    let query: Vec<f64> = query.iter().copied().map(f64::from).collect();
    let limit = i64::try_from(top_k).unwrap_or(i64::MAX);

    vec![
        doc! {
            "$vectorSearch": {
                "index": index,
                "path": "embedding",
                "queryVector": query,
                "numCandidates": limit.saturating_mul(CANDIDATES_PER_HIT),
                "limit": limit,
            }
        },
        doc! {
            "$project": {
                "_id": 0,
                "project_id": 1,
                "text_content": 1,
                "score": { "$meta": "vectorSearchScore" },
            }
        },
    ]
}

#[async_trait]
impl EmbeddingStore for MongoEmbeddingStore {
    async fn has_project(&self, id: &ProjectId) -> Result<bool> {
        let found = self
            .collection
            .clone_with_type::<Document>()
            .find_one(doc! { "project_id": id.as_str() })
            .projection(doc! { "_id": 1 })
            .await?;
        Ok(found.is_some())
    }

    async fn delete_project(&self, id: &ProjectId) -> Result<u64> {
        let result = self
            .collection
            .delete_many(doc! { "project_id": id.as_str() })
            .await?;
        tracing::debug!(project_id = %id, deleted = result.deleted_count, "Deleted chunks");
        Ok(result.deleted_count)
    }

    async fn insert(&self, chunk: EmbeddedChunk) -> Result<()> {
        self.collection.insert_one(chunk).await?;
        Ok(())
    }

    async fn insert_many(&self, chunks: Vec<EmbeddedChunk>) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        self.collection.insert_many(chunks).await?;
        Ok(())
    }

    async fn chunks_with_nan(&self) -> Result<Vec<EmbeddedChunk>> {
        // NaN equals NaN in MongoDB queries and array fields match per element
        let chunks: Vec<EmbeddedChunk> = self
            .collection
            .find(doc! { "embedding": f64::NAN })
            .await?
            .try_collect()
            .await?;

        Ok(chunks
            .into_iter()
            .filter(|chunk| has_nan(&chunk.embedding))
            .collect())
    }

    async fn update_embedding(&self, key: &ChunkKey, embedding: Embedding) -> Result<()> {
        let result = self
            .collection
            .update_one(
                key_filter(key),
                doc! { "$set": { "embedding": bson::to_bson(&embedding)? } },
            )
            .await?;
        anyhow::ensure!(result.matched_count > 0, "No chunk {}", key.chunk_id());
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(top_k = top_k))]
    async fn search(&self, query: Embedding, top_k: usize) -> Result<Vec<SearchHit>> {
        let documents: Vec<Document> = self
            .collection
            .aggregate(search_pipeline(&self.vector_index, &query, top_k))
            .await
            .context("Vector search failed")?
            .try_collect()
            .await?;

        let hits = documents
            .into_iter()
            .map(|document| bson::from_document(document).context("Unexpected search hit"))
            .collect::<Result<Vec<SearchHit>>>()?;
        tracing::info!(hits = hits.len(), "Vector search finished");
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_search_pipeline() {
        let pipeline = search_pipeline("vector_index_text", &[0.5, 0.25], 3);

        let search = pipeline[0].get_document("$vectorSearch").unwrap();
        assert_eq!(search.get_str("index").unwrap(), "vector_index_text");
        assert_eq!(search.get_str("path").unwrap(), "embedding");
        assert_eq!(search.get_i64("numCandidates").unwrap(), 30);
        assert_eq!(search.get_i64("limit").unwrap(), 3);
        assert_eq!(search.get_array("queryVector").unwrap().len(), 2);

        let project = pipeline[1].get_document("$project").unwrap();
        assert_eq!(project.get_i32("_id").unwrap(), 0);
        assert!(project.contains_key("score"));
    }

    #[test]
    fn test_key_filter() {
        let key = ChunkKey {
            project_id: "7".into(),
            text_idx: 2,
            chunk_idx: 1,
        };
        assert_eq!(
            key_filter(&key),
            doc! { "project_id": "7", "text_idx": 2_u32, "chunk_idx": 1_u32 }
        );
    }
}
