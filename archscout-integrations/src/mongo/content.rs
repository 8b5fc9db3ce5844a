use anyhow::{Context as _, Result};
use archscout_core::{ContentStore, ParsedRecord, ProjectId};
use async_trait::async_trait;
use mongodb::Collection;
use mongodb::bson::{self, Document, doc};

/// Parsed records, one document per project with the project id as `_id`
#[derive(Debug, Clone)]
pub struct MongoContentStore {
    collection: Collection<Document>,
}

impl MongoContentStore {
    pub fn new(collection: Collection<Document>) -> Self {
        Self { collection }
    }
}

/// The record as a `$set` document, `_id` included so an insert lands on the project id
pub(crate) fn record_document(id: &ProjectId, record: &ParsedRecord) -> Result<Document> {
    let mut document = bson::to_document(record).context("Record is not a valid document")?;
    document.insert("_id", id.as_str());
    Ok(document)
}

pub(crate) fn document_record(mut document: Document) -> Result<ParsedRecord> {
    document.remove("_id");
    bson::from_document(document).context("Stored document is not a valid record")
}

#[async_trait]
impl ContentStore for MongoContentStore {
    async fn contains(&self, id: &ProjectId) -> Result<bool> {
        let found = self
            .collection
            .find_one(doc! { "_id": id.as_str() })
            .projection(doc! { "_id": 1 })
            .await?;
        Ok(found.is_some())
    }

    async fn get(&self, id: &ProjectId) -> Result<Option<ParsedRecord>> {
        self.collection
            .find_one(doc! { "_id": id.as_str() })
            .await?
            .map(document_record)
            .transpose()
    }

    #[tracing::instrument(skip_all, fields(project_id = %id))]
    async fn upsert(&self, id: &ProjectId, record: &ParsedRecord) -> Result<()> {
        let document = record_document(id, record)?;
        let result = self
            .collection
            .update_one(doc! { "_id": id.as_str() }, doc! { "$set": document })
            .upsert(true)
            .await
            .context("Upsert failed")?;

        tracing::trace!(
            inserted = result.upserted_id.is_some(),
            modified = result.modified_count,
            "Upserted record"
        );
        Ok(())
    }
}
