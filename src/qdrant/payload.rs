//! Conversions between chunk records and Qdrant points.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::store::{ChunkMetadata, RecordInsert, StoreError, StoredRecord};

const CHUNK_ID_KEY: &str = "chunk_id";
const TEXT_KEY: &str = "text";
const CHUNK_HASH_KEY: &str = "chunk_hash";
const INGESTED_AT_KEY: &str = "ingested_at";

/// Deterministic point id for a chunk id; re-ingesting a chunk overwrites its point.
pub fn point_id(chunk_id: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, chunk_id.as_bytes()).to_string()
}

/// Build the payload object stored alongside each chunk vector.
pub(crate) fn build_payload(record: &RecordInsert, ingested_at: &str) -> Result<Value, StoreError> {
    let mut payload = metadata_payload(&record.id, &record.metadata)?;
    payload.insert(CHUNK_ID_KEY.into(), Value::String(record.id.clone()));
    payload.insert(TEXT_KEY.into(), Value::String(record.text.clone()));
    payload.insert(
        CHUNK_HASH_KEY.into(),
        Value::String(compute_chunk_hash(&record.text)),
    );
    payload.insert(INGESTED_AT_KEY.into(), Value::String(ingested_at.to_string()));
    Ok(Value::Object(payload))
}

/// Serialise metadata into a flat payload map.
pub(crate) fn metadata_payload(
    id: &str,
    metadata: &ChunkMetadata,
) -> Result<Map<String, Value>, StoreError> {
    match serde_json::to_value(metadata) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(StoreError::MalformedRecord {
            id: id.to_string(),
            reason: format!("metadata serialised to {other}"),
        }),
        Err(error) => Err(StoreError::MalformedRecord {
            id: id.to_string(),
            reason: error.to_string(),
        }),
    }
}

/// Rebuild a stored record from a point payload.
pub(crate) fn parse_record(
    point_id: &str,
    mut payload: Map<String, Value>,
) -> Result<StoredRecord, StoreError> {
    let id = match payload.remove(CHUNK_ID_KEY) {
        Some(Value::String(id)) => id,
        _ => point_id.to_string(),
    };
    let text = match payload.remove(TEXT_KEY) {
        Some(Value::String(text)) => text,
        _ => {
            return Err(StoreError::MalformedRecord {
                id,
                reason: "payload has no text".into(),
            });
        }
    };
    payload.remove(CHUNK_HASH_KEY);
    payload.remove(INGESTED_AT_KEY);

    let metadata: ChunkMetadata =
        serde_json::from_value(Value::Object(payload)).map_err(|error| {
            StoreError::MalformedRecord {
                id: id.clone(),
                reason: error.to_string(),
            }
        })?;
    Ok(StoredRecord { id, text, metadata })
}

/// Compute a deterministic SHA-256 hash for the chunk text.
pub fn compute_chunk_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)
}

/// Current timestamp formatted for payload storage.
pub(crate) fn current_timestamp_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{BaseMetadata, MetadataValue};

    fn record() -> RecordInsert {
        let mut extra = BaseMetadata::new();
        extra.insert("source".into(), MetadataValue::from("paper.pdf"));
        RecordInsert {
            id: "paper_chunk_1".into(),
            text: "Let $x \\in \\mathbb{R}$.".into(),
            metadata: ChunkMetadata {
                chunk_index: 1,
                total_chunks: 4,
                doc_id_prefix: "paper".into(),
                has_math: true,
                chunk_length: 22,
                summary: Some("Introduces x.".into()),
                extra,
            },
            embedding: vec![0.5, 0.5],
        }
    }

    #[test]
    fn chunk_hash_is_stable() {
        let h1 = compute_chunk_hash("Hello world");
        let h2 = compute_chunk_hash("Hello world");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn point_ids_are_deterministic_uuids() {
        assert_eq!(point_id("paper_chunk_1"), point_id("paper_chunk_1"));
        assert_ne!(point_id("paper_chunk_1"), point_id("paper_chunk_2"));
        assert!(Uuid::parse_str(&point_id("paper_chunk_1")).is_ok());
    }

    #[test]
    fn timestamp_is_rfc3339_like() {
        let ts = current_timestamp_rfc3339();
        assert!(ts.contains('T') && ts.ends_with('Z'));
    }

    #[test]
    fn payload_round_trips_into_a_record() {
        let insert = record();
        let payload = build_payload(&insert, "2025-01-01T00:00:00Z").expect("payload");
        assert_eq!(payload["chunk_id"], "paper_chunk_1");
        assert_eq!(payload["source"], "paper.pdf");
        assert_eq!(payload["chunk_hash"], compute_chunk_hash(&insert.text));

        let Value::Object(map) = payload else {
            panic!("payload is an object");
        };
        let parsed = parse_record(&point_id(&insert.id), map).expect("record");
        assert_eq!(parsed.id, insert.id);
        assert_eq!(parsed.text, insert.text);
        assert_eq!(parsed.metadata, insert.metadata);
    }

    #[test]
    fn payload_without_text_is_malformed() {
        let error = parse_record("id", Map::new()).expect_err("no text");
        assert!(matches!(error, StoreError::MalformedRecord { .. }));
    }
}
