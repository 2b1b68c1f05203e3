//! HTTP client wrapper implementing [`VectorStore`] on a Qdrant collection.

use async_trait::async_trait;
use futures_util::{TryStreamExt, pin_mut};
use reqwest::{Client, Method, StatusCode};
use serde_json::{Value, json};

use crate::qdrant::{
    filters::build_store_filter,
    payload::{build_payload, current_timestamp_rfc3339, metadata_payload, parse_record, point_id},
    scroller::stream_points,
    types::{QdrantError, QueryResponse, QueryResponseResult},
};
use crate::store::{
    ChunkMetadata, RecordInsert, StoreError, StoreFilter, StoreMatch, StoredRecord, VectorStore,
    sort_records,
};

/// Payload fields indexed for filtering.
const PAYLOAD_INDEXES: [(&str, &str); 4] = [
    ("doc_id_prefix", "keyword"),
    ("chunk_index", "integer"),
    ("has_math", "bool"),
    ("chunk_hash", "keyword"),
];

/// Chunk store backed by one Qdrant collection.
pub struct QdrantStore {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    collection: String,
    vector_size: usize,
}

impl QdrantStore {
    /// Construct a client for `collection` at `base_url`.
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        collection: &str,
        vector_size: usize,
    ) -> Result<Self, QdrantError> {
        let client = Client::builder().user_agent("mathdoc-rag/0.1").build()?;
        let base_url = normalize_base_url(base_url).map_err(QdrantError::InvalidUrl)?;
        tracing::debug!(
            url = %base_url,
            collection,
            has_api_key = api_key.as_deref().is_some_and(|value| !value.is_empty()),
            "Initialized Qdrant HTTP client"
        );

        Ok(Self {
            client,
            base_url,
            api_key,
            collection: collection.to_string(),
            vector_size,
        })
    }

    /// Collection this store reads and writes.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Create the collection and its payload indexes when missing.
    pub async fn ensure_collection(&self) -> Result<(), QdrantError> {
        if !self.collection_exists().await? {
            tracing::debug!(
                collection = %self.collection,
                vector_size = self.vector_size,
                "Creating collection"
            );
            self.create_collection().await?;
        }
        self.ensure_payload_indexes().await
    }

    async fn create_collection(&self) -> Result<(), QdrantError> {
        let body = json!({
            "vectors": {
                "size": self.vector_size,
                "distance": "Cosine"
            }
        });

        let response = self
            .request(Method::PUT, &format!("collections/{}", self.collection))
            .json(&body)
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(collection = %self.collection, "Collection created");
        })
        .await
    }

    async fn ensure_payload_indexes(&self) -> Result<(), QdrantError> {
        for (field, schema) in PAYLOAD_INDEXES {
            let body = json!({
                "field_name": field,
                "field_schema": schema,
            });

            let response = self
                .request(
                    Method::PUT,
                    &format!("collections/{}/index", self.collection),
                )
                .json(&body)
                .send()
                .await?;

            if response.status().is_success() {
                tracing::debug!(collection = %self.collection, field, schema, "Payload index ensured");
            } else if response.status() == StatusCode::CONFLICT {
                tracing::debug!(collection = %self.collection, field, schema, "Payload index already exists");
            } else {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                let error = QdrantError::UnexpectedStatus { status, body };
                tracing::warn!(collection = %self.collection, field, schema, error = %error, "Failed to ensure payload index");
            }
        }

        Ok(())
    }

    async fn collection_exists(&self) -> Result<bool, QdrantError> {
        let response = self
            .request(Method::GET, &format!("collections/{}", self.collection))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => {
                let body = response.text().await.unwrap_or_default();
                let error = QdrantError::UnexpectedStatus { status, body };
                tracing::error!(collection = %self.collection, error = %error, "Collection existence check failed");
                Err(error)
            }
        }
    }

    async fn delete_collection(&self) -> Result<(), QdrantError> {
        let response = self
            .request(Method::DELETE, &format!("collections/{}", self.collection))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        self.ensure_success(response, || {
            tracing::info!(collection = %self.collection, "Collection deleted");
        })
        .await
    }

    pub(crate) fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format_endpoint(&self.base_url, path);
        let mut req = self.client.request(method, url);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            req = req.header("api-key", api_key);
        }
        req
    }

    async fn ensure_success<F>(
        &self,
        response: reqwest::Response,
        on_success: F,
    ) -> Result<(), QdrantError>
    where
        F: FnOnce(),
    {
        if response.status().is_success() {
            on_success();
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = QdrantError::UnexpectedStatus { status, body };
            tracing::error!(error = %error, "Qdrant request failed");
            Err(error)
        }
    }

    fn check_dimension(&self, actual: usize) -> Result<(), StoreError> {
        if actual == self.vector_size {
            Ok(())
        } else {
            Err(StoreError::DimensionMismatch {
                expected: self.vector_size,
                actual,
            })
        }
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn upsert(&self, records: Vec<RecordInsert>) -> Result<usize, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }

        let now = current_timestamp_rfc3339();
        let mut points = Vec::with_capacity(records.len());
        for record in &records {
            self.check_dimension(record.embedding.len())?;
            points.push(json!({
                "id": point_id(&record.id),
                "vector": record.embedding,
                "payload": build_payload(record, &now)?,
            }));
        }

        let point_count = points.len();
        let response = self
            .request(
                Method::PUT,
                &format!("collections/{}/points", self.collection),
            )
            .query(&[("wait", true)])
            .json(&json!({ "points": points }))
            .send()
            .await
            .map_err(QdrantError::from)?;

        self.ensure_success(response, || {
            tracing::debug!(collection = %self.collection, points = point_count, "Points upserted");
        })
        .await?;

        Ok(point_count)
    }

    async fn query(
        &self,
        embedding: Vec<f32>,
        k: usize,
        filter: Option<&StoreFilter>,
    ) -> Result<Vec<StoreMatch>, StoreError> {
        self.check_dimension(embedding.len())?;
        let mut body = json!({
            "query": embedding,
            "limit": k,
            "with_payload": true,
        });
        if let (Some(filter_value), Some(object)) =
            (filter.and_then(build_store_filter), body.as_object_mut())
        {
            object.insert("filter".into(), filter_value);
        }

        let response = self
            .request(
                Method::POST,
                &format!("collections/{}/points/query", self.collection),
            )
            .json(&body)
            .send()
            .await
            .map_err(QdrantError::from)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = QdrantError::UnexpectedStatus { status, body };
            tracing::error!(collection = %self.collection, error = %error, "Qdrant query failed");
            return Err(error.into());
        }

        let payload: QueryResponse = response.json().await.map_err(QdrantError::from)?;
        let points = match payload.result {
            QueryResponseResult::Points(points) => points,
            QueryResponseResult::Object { points } => points,
        };

        points
            .into_iter()
            .map(|point| {
                let id = stringify_point_id(point.id);
                let record = parse_record(&id, point.payload.unwrap_or_default())?;
                Ok(StoreMatch {
                    record,
                    score: point.score,
                })
            })
            .collect()
    }

    async fn get_all(&self, filter: Option<&StoreFilter>) -> Result<Vec<StoredRecord>, StoreError> {
        let stream = stream_points(self, filter.and_then(build_store_filter));
        pin_mut!(stream);

        let mut records = Vec::new();
        while let Some((id, payload)) = stream.try_next().await? {
            records.push(parse_record(&id, payload)?);
        }
        sort_records(&mut records);
        tracing::debug!(collection = %self.collection, records = records.len(), "Loaded stored records");
        Ok(records)
    }

    async fn update_metadata(&self, id: &str, metadata: &ChunkMetadata) -> Result<(), StoreError> {
        let payload = metadata_payload(id, metadata)?;
        let response = self
            .request(
                Method::POST,
                &format!("collections/{}/points/payload", self.collection),
            )
            .query(&[("wait", true)])
            .json(&json!({
                "payload": Value::Object(payload),
                "points": [point_id(id)],
            }))
            .send()
            .await
            .map_err(QdrantError::from)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(id.to_string()));
        }
        self.ensure_success(response, || {
            tracing::debug!(collection = %self.collection, id, "Metadata updated");
        })
        .await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let response = self
            .request(
                Method::POST,
                &format!("collections/{}/points/delete", self.collection),
            )
            .query(&[("wait", true)])
            .json(&json!({ "points": [point_id(id)] }))
            .send()
            .await
            .map_err(QdrantError::from)?;

        self.ensure_success(response, || {
            tracing::debug!(collection = %self.collection, id, "Point deleted");
        })
        .await?;
        Ok(())
    }

    async fn recreate(&self) -> Result<(), StoreError> {
        self.delete_collection().await?;
        self.create_collection().await?;
        self.ensure_payload_indexes().await?;
        Ok(())
    }
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

pub(crate) fn stringify_point_id(id: Value) -> String {
    match id {
        Value::String(text) => text,
        Value::Number(number) => number.to_string(),
        Value::Object(map) => map
            .get("uuid")
            .map(|value| match value {
                Value::String(uuid) => uuid.clone(),
                other => other.to_string(),
            })
            .unwrap_or_else(|| Value::Object(map).to_string()),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
