//! Streaming helper for iterating the Qdrant scroll endpoint without manual loops.

use async_stream::try_stream;
use futures_core::Stream;
use reqwest::Method;
use serde_json::{Map, Value, json};

use super::client::{QdrantStore, stringify_point_id};
use super::types::{QdrantError, ScrollResponse};

const DEFAULT_SCROLL_LIMIT: usize = 512;

/// Stream point payloads along with their point identifiers, page by page.
pub fn stream_points<'a>(
    store: &'a QdrantStore,
    filter: Option<Value>,
) -> impl Stream<Item = Result<(String, Map<String, Value>), QdrantError>> + 'a {
    try_stream! {
        let mut offset: Option<Value> = None;
        let filter_body = filter.unwrap_or_else(|| json!({ "must": [] }));
        let path = format!("collections/{}/points/scroll", store.collection());

        loop {
            let body = json!({
                "with_payload": true,
                "with_vector": false,
                "limit": DEFAULT_SCROLL_LIMIT,
                "filter": filter_body.clone(),
                "offset": offset.clone().unwrap_or(Value::Null),
            });

            let response = store.request(Method::POST, &path).json(&body).send().await?;

            let status = response.status();
            if status.is_success() {
                let ScrollResponse { result } = response.json().await?;
                for point in result.points {
                    if let (Some(id), Some(payload)) = (point.id, point.payload) {
                        yield (stringify_point_id(id), payload);
                    }
                }

                match result.next_page_offset {
                    Some(Value::Null) | None => break,
                    Some(next) => offset = Some(next),
                }
            } else {
                let body = response.text().await.unwrap_or_default();
                tracing::error!(collection = store.collection(), status = %status, "Failed to scroll points via stream");
                Err(QdrantError::UnexpectedStatus { status, body })?;
            }
        }
    }
}
