//! Process-local [`VectorStore`] with cosine similarity.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::record::{
    ChunkMetadata, RecordInsert, StoreFilter, StoreMatch, StoredRecord, sort_records,
};
use super::{StoreError, VectorStore};

struct Entry {
    record: StoredRecord,
    embedding: Vec<f32>,
}

/// Keeps records in memory; contents are lost when the store is dropped.
pub struct InMemoryStore {
    dimension: usize,
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryStore {
    /// Create an empty store accepting vectors of `dimension` components.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the store holds no records.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    fn check_dimension(&self, actual: usize) -> Result<(), StoreError> {
        if actual == self.dimension {
            Ok(())
        } else {
            Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual,
            })
        }
    }
}

fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    let dot: f32 = left.iter().zip(right).map(|(a, b)| a * b).sum();
    let left_norm = left.iter().map(|value| value * value).sum::<f32>().sqrt();
    let right_norm = right.iter().map(|value| value * value).sum::<f32>().sqrt();
    if left_norm == 0.0 || right_norm == 0.0 {
        0.0
    } else {
        dot / (left_norm * right_norm)
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn upsert(&self, records: Vec<RecordInsert>) -> Result<usize, StoreError> {
        for record in &records {
            self.check_dimension(record.embedding.len())?;
        }
        let count = records.len();
        let mut entries = self.entries.write().await;
        for insert in records {
            entries.insert(
                insert.id.clone(),
                Entry {
                    record: StoredRecord {
                        id: insert.id,
                        text: insert.text,
                        metadata: insert.metadata,
                    },
                    embedding: insert.embedding,
                },
            );
        }
        Ok(count)
    }

    async fn query(
        &self,
        embedding: Vec<f32>,
        k: usize,
        filter: Option<&StoreFilter>,
    ) -> Result<Vec<StoreMatch>, StoreError> {
        self.check_dimension(embedding.len())?;
        let entries = self.entries.read().await;
        let mut matches: Vec<StoreMatch> = entries
            .values()
            .filter(|entry| filter.is_none_or(|filter| filter.matches(&entry.record.metadata)))
            .map(|entry| StoreMatch {
                record: entry.record.clone(),
                score: cosine_similarity(&embedding, &entry.embedding),
            })
            .collect();
        matches.sort_by(|left, right| {
            right
                .score
                .total_cmp(&left.score)
                .then_with(|| left.record.id.cmp(&right.record.id))
        });
        matches.truncate(k);
        Ok(matches)
    }

    async fn get_all(&self, filter: Option<&StoreFilter>) -> Result<Vec<StoredRecord>, StoreError> {
        let entries = self.entries.read().await;
        let mut records: Vec<StoredRecord> = entries
            .values()
            .filter(|entry| filter.is_none_or(|filter| filter.matches(&entry.record.metadata)))
            .map(|entry| entry.record.clone())
            .collect();
        sort_records(&mut records);
        Ok(records)
    }

    async fn update_metadata(&self, id: &str, metadata: &ChunkMetadata) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        entry.record.metadata = metadata.clone();
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.entries.write().await.remove(id);
        Ok(())
    }

    async fn recreate(&self) -> Result<(), StoreError> {
        self.entries.write().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::record::BaseMetadata;

    fn insert(prefix: &str, index: usize, embedding: Vec<f32>) -> RecordInsert {
        RecordInsert {
            id: format!("{prefix}_chunk_{index}"),
            text: format!("chunk {index} of {prefix}"),
            metadata: ChunkMetadata {
                chunk_index: index,
                total_chunks: 3,
                doc_id_prefix: prefix.into(),
                has_math: index % 2 == 0,
                chunk_length: 10,
                summary: None,
                extra: BaseMetadata::new(),
            },
            embedding,
        }
    }

    #[tokio::test]
    async fn query_ranks_by_cosine_and_respects_k() {
        let store = InMemoryStore::new(2);
        store
            .upsert(vec![
                insert("a", 1, vec![1.0, 0.0]),
                insert("a", 2, vec![0.7, 0.7]),
                insert("a", 3, vec![0.0, 1.0]),
            ])
            .await
            .expect("upsert");

        let hits = store.query(vec![1.0, 0.1], 2, None).await.expect("query");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].record.id, "a_chunk_1");
        assert_eq!(hits[1].record.id, "a_chunk_2");
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn get_all_filters_and_orders_by_chunk_index() {
        let store = InMemoryStore::new(1);
        store
            .upsert(vec![
                insert("b", 1, vec![1.0]),
                insert("a", 3, vec![1.0]),
                insert("a", 1, vec![1.0]),
                insert("a", 2, vec![1.0]),
            ])
            .await
            .expect("upsert");

        let records = store
            .get_all(Some(&StoreFilter::for_document("a")))
            .await
            .expect("records");
        let indexes: Vec<usize> = records.iter().map(|r| r.metadata.chunk_index).collect();
        assert_eq!(indexes, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn dimension_mismatch_is_rejected() {
        let store = InMemoryStore::new(3);
        let error = store
            .upsert(vec![insert("a", 1, vec![1.0])])
            .await
            .expect_err("mismatch");
        assert!(matches!(
            error,
            StoreError::DimensionMismatch {
                expected: 3,
                actual: 1
            }
        ));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn update_delete_and_recreate() {
        let store = InMemoryStore::new(1);
        store
            .upsert(vec![insert("a", 1, vec![1.0]), insert("a", 2, vec![1.0])])
            .await
            .expect("upsert");

        let mut metadata = store.get_all(None).await.expect("all")[0].metadata.clone();
        metadata.summary = Some("updated".into());
        store
            .update_metadata("a_chunk_1", &metadata)
            .await
            .expect("update");
        assert_eq!(
            store.get_all(None).await.expect("all")[0].metadata.summary.as_deref(),
            Some("updated")
        );
        assert!(matches!(
            store.update_metadata("missing", &metadata).await,
            Err(StoreError::NotFound(_))
        ));

        store.delete("a_chunk_2").await.expect("delete");
        assert_eq!(store.len().await, 1);
        store.recreate().await.expect("recreate");
        assert!(store.is_empty().await);
    }
}
