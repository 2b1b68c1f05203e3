//! Translate [`StoreFilter`] into Qdrant filter clauses.

use serde_json::{Value, json};

use crate::store::{MetadataValue, StoreFilter};

/// Compose a Qdrant `must` filter; `None` when the filter has no constraints.
pub fn build_store_filter(filter: &StoreFilter) -> Option<Value> {
    let mut must: Vec<Value> = Vec::new();

    if let Some(prefix) = filter.doc_id_prefix.as_deref().and_then(non_empty) {
        must.push(match_clause("doc_id_prefix", json!(prefix)));
    }

    if let Some(has_math) = filter.has_math {
        must.push(match_clause("has_math", json!(has_math)));
    }

    for (key, value) in &filter.extra {
        let value = match value {
            MetadataValue::Bool(flag) => json!(flag),
            MetadataValue::Int(number) => json!(number),
            MetadataValue::Text(text) => json!(text),
            MetadataValue::Float(number) => {
                must.push(json!({
                    "key": key,
                    "range": { "gte": number, "lte": number }
                }));
                continue;
            }
        };
        must.push(match_clause(key, value));
    }

    if must.is_empty() {
        None
    } else {
        Some(json!({ "must": must }))
    }
}

fn match_clause(key: &str, value: Value) -> Value {
    json!({
        "key": key,
        "match": { "value": value }
    })
}

fn non_empty(input: &str) -> Option<&str> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}
