//! Qdrant vector database storage backend.
//!
//! Implements [`VectorStore`] against a Qdrant server. The adapter keeps
//! two process-lifetime caches - known collection names and known vector
//! sizes - invalidated only by [`VectorStore::delete_collection`], and
//! retries transient network failures on the write paths.

use crate::error::{VectorDataError, VectorDataResult, is_already_exists};
use crate::storage::traits::{
    ChunkPayload, PointFilter, PointRecord, ScoredMatch, ScrollPage, ScrollRequest, VectorPoint,
    VectorStore,
};
use crate::storage::UPSERT_BATCH_SIZE;
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::points_selector::PointsSelectorOneOf;
use qdrant_client::qdrant::vectors_config::Config as VectorsConfigKind;
use qdrant_client::qdrant::vectors_output::VectorsOptions;
use qdrant_client::qdrant::with_payload_selector::SelectorOptions;
use qdrant_client::qdrant::{
    CollectionExistsRequest, Condition, CreateCollection, CreateFieldIndexCollection,
    DeleteCollection, DeletePoints, Distance, FieldType, Filter, GetCollectionInfoRequest,
    PayloadIncludeSelector, PointId, PointStruct, PointsSelector, ScrollPoints, SearchPoints,
    UpsertPoints, Value, VectorParams, WithPayloadSelector,
};
use qdrant_client::{Payload, Qdrant};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// Bounded retries for upsert/delete against transient failures
const MAX_RETRIES: u32 = 2;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(200);

/// Vector database client for storing and searching chunk embeddings.
pub struct QdrantStore {
    client: Qdrant,
    known_collections: DashSet<String>,
    known_sizes: DashMap<String, usize>,
}

impl QdrantStore {
    /// Connect to a Qdrant server.
    ///
    /// # Errors
    ///
    /// Returns `VectorDataError::Storage` if the client cannot be built
    /// (malformed URL); no network round-trip happens here.
    pub fn new(url: &str, api_key: Option<&str>) -> VectorDataResult<Self> {
        let mut builder = Qdrant::from_url(url);
        if let Some(key) = api_key {
            builder = builder.api_key(key);
        }
        let client = builder
            .build()
            .map_err(|e| VectorDataError::Storage(format!("Failed to create Qdrant client: {e}")))?;

        Ok(Self {
            client,
            known_collections: DashSet::new(),
            known_sizes: DashMap::new(),
        })
    }

    /// Connect using application configuration.
    ///
    /// # Errors
    ///
    /// Same as [`QdrantStore::new`].
    pub fn from_config(config: &codescout_config::VectorStorageConfig) -> VectorDataResult<Self> {
        Self::new(&config.url, config.api_key.as_deref())
    }

    /// Vector dimension of an existing collection, read from its config
    async fn remote_vector_size(&self, name: &str) -> VectorDataResult<Option<usize>> {
        let info = self
            .client
            .collection_info(GetCollectionInfoRequest {
                collection_name: name.to_string(),
            })
            .await
            .map_err(|e| VectorDataError::classify(name, e.to_string()))?;

        let size = info
            .result
            .and_then(|r| r.config)
            .and_then(|c| c.params)
            .and_then(|p| p.vectors_config)
            .and_then(|v| v.config)
            .and_then(|k| match k {
                VectorsConfigKind::Params(params) => Some(params.size as usize),
                VectorsConfigKind::ParamsMap(_) => None,
            });
        Ok(size)
    }

    async fn with_retries<T, F, Fut>(&self, op: &str, f: F) -> VectorDataResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = VectorDataResult<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < MAX_RETRIES => {
                    let delay = RETRY_BASE_DELAY * 2u32.saturating_pow(attempt);
                    tracing::warn!(operation = op, attempt, error = %e, "Transient vector store error, retrying");
                    tokio::time::sleep(delay).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    #[tracing::instrument(skip(self))]
    async fn ensure_collection(&self, name: &str, vector_size: usize) -> VectorDataResult<()> {
        if self.known_collections.contains(name) {
            if let Some(known) = self.known_sizes.get(name)
                && *known != vector_size
            {
                return Err(VectorDataError::VectorSizeMismatch {
                    collection: name.to_string(),
                    expected: vector_size,
                    actual: *known,
                });
            }
            return Ok(());
        }

        if self.collection_exists(name).await? {
            if let Some(actual) = self.remote_vector_size(name).await?
                && actual != vector_size
            {
                return Err(VectorDataError::VectorSizeMismatch {
                    collection: name.to_string(),
                    expected: vector_size,
                    actual,
                });
            }
            self.known_collections.insert(name.to_string());
            self.known_sizes.insert(name.to_string(), vector_size);
            return Ok(());
        }

        let request = CreateCollection {
            collection_name: name.to_string(),
            vectors_config: Some(
                VectorParams {
                    size: vector_size as u64,
                    distance: Distance::Cosine as i32,
                    ..Default::default()
                }
                .into(),
            ),
            ..Default::default()
        };

        match self.client.create_collection(request).await {
            Ok(_) => {}
            Err(e) => {
                // Race with another creator is fine (idempotent operation)
                let message = e.to_string();
                if !is_already_exists(&message) {
                    return Err(VectorDataError::classify(name, message));
                }
            }
        }

        self.known_collections.insert(name.to_string());
        self.known_sizes.insert(name.to_string(), vector_size);
        Ok(())
    }

    async fn collection_exists(&self, name: &str) -> VectorDataResult<bool> {
        if self.known_collections.contains(name) {
            return Ok(true);
        }
        let request = CollectionExistsRequest {
            collection_name: name.to_string(),
        };
        self.client
            .collection_exists(request)
            .await
            .map_err(|e| VectorDataError::Storage(format!("Failed to check collection exists: {e}")))
    }

    #[tracing::instrument(skip(self, points), fields(point_count = points.len()))]
    async fn upsert(&self, name: &str, points: Vec<VectorPoint>) -> VectorDataResult<()> {
        let Some(first) = points.first() else {
            return Ok(());
        };
        self.ensure_collection(name, first.vector.len()).await?;

        for batch in points.chunks(UPSERT_BATCH_SIZE) {
            let qdrant_points: Vec<PointStruct> = batch
                .iter()
                .map(|p| {
                    PointStruct::new(
                        p.id.to_string(),
                        p.vector.clone(),
                        payload_to_qdrant(&p.payload),
                    )
                })
                .collect();

            self.with_retries("upsert", || {
                let request = UpsertPoints {
                    collection_name: name.to_string(),
                    points: qdrant_points.clone(),
                    wait: Some(true),
                    ..Default::default()
                };
                async {
                    self.client
                        .upsert_points(request)
                        .await
                        .map_err(|e| VectorDataError::classify(name, e.to_string()))?;
                    Ok(())
                }
            })
            .await?;
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, filter))]
    async fn delete_by_filter(&self, name: &str, filter: &PointFilter) -> VectorDataResult<()> {
        let result = self
            .with_retries("delete_by_filter", || {
                let request = DeletePoints {
                    collection_name: name.to_string(),
                    points: Some(PointsSelector {
                        points_selector_one_of: Some(PointsSelectorOneOf::Filter(filter_to_qdrant(
                            filter,
                        ))),
                    }),
                    wait: Some(true),
                    ..Default::default()
                };
                async {
                    self.client
                        .delete_points(request)
                        .await
                        .map_err(|e| VectorDataError::classify(name, e.to_string()))?;
                    Ok(())
                }
            })
            .await;

        match result {
            Ok(()) => Ok(()),
            // Deleting from an absent collection is a no-op
            Err(VectorDataError::CollectionNotFound { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    #[tracing::instrument(skip(self, vector, filter), fields(dim = vector.len(), limit))]
    async fn search(
        &self,
        name: &str,
        vector: Vec<f32>,
        limit: usize,
        filter: Option<&PointFilter>,
    ) -> VectorDataResult<Vec<ScoredMatch>> {
        let request = SearchPoints {
            collection_name: name.to_string(),
            vector,
            limit: limit as u64,
            with_payload: Some(true.into()),
            filter: filter.map(filter_to_qdrant),
            ..Default::default()
        };

        let response = self
            .client
            .search_points(request)
            .await
            .map_err(|e| VectorDataError::classify(name, e.to_string()))?;

        let mut matches = Vec::with_capacity(response.result.len());
        for scored in response.result {
            let Some(id) = scored.id.as_ref().and_then(point_id_to_uuid) else {
                continue;
            };
            matches.push(ScoredMatch {
                id,
                score: scored.score,
                payload: payload_from_qdrant(&scored.payload),
            });
        }
        Ok(matches)
    }

    async fn scroll(
        &self,
        name: &str,
        request: &ScrollRequest,
        offset: Option<Uuid>,
    ) -> VectorDataResult<ScrollPage> {
        let with_payload = match &request.payload_fields {
            None => WithPayloadSelector::from(true),
            Some(fields) => WithPayloadSelector {
                selector_options: Some(SelectorOptions::Include(PayloadIncludeSelector {
                    fields: fields.clone(),
                })),
            },
        };

        let scroll = ScrollPoints {
            collection_name: name.to_string(),
            filter: request.filter.as_ref().map(filter_to_qdrant),
            limit: Some(request.page_size as u32),
            with_payload: Some(with_payload),
            with_vectors: Some(request.with_vector.into()),
            offset: offset.map(|id| PointId::from(id.to_string())),
            ..Default::default()
        };

        let response = match self.client.scroll(scroll).await {
            Ok(response) => response,
            Err(e) => {
                // An absent collection scrolls as empty
                return match VectorDataError::classify(name, e.to_string()) {
                    VectorDataError::CollectionNotFound { .. } => Ok(ScrollPage {
                        points: Vec::new(),
                        next_offset: None,
                    }),
                    other => Err(other),
                };
            }
        };

        let mut points = Vec::with_capacity(response.result.len());
        for retrieved in response.result {
            let Some(id) = retrieved.id.as_ref().and_then(point_id_to_uuid) else {
                continue;
            };
            let vector = retrieved.vectors.as_ref().and_then(|v| {
                v.vectors_options.as_ref().and_then(|opts| match opts {
                    VectorsOptions::Vector(vector) => Some(vector.data.clone()),
                    VectorsOptions::Vectors(_) => None,
                })
            });
            points.push(PointRecord {
                id,
                vector,
                payload: payload_from_qdrant(&retrieved.payload),
            });
        }

        Ok(ScrollPage {
            points,
            next_offset: response.next_page_offset.as_ref().and_then(point_id_to_uuid),
        })
    }

    async fn ensure_payload_index(&self, name: &str, field: &str) -> VectorDataResult<()> {
        let request = CreateFieldIndexCollection {
            collection_name: name.to_string(),
            field_name: field.to_string(),
            field_type: Some(FieldType::Keyword as i32),
            wait: Some(true),
            ..Default::default()
        };

        match self.client.create_field_index(request).await {
            Ok(_) => Ok(()),
            Err(e) => {
                let message = e.to_string();
                if is_already_exists(&message) {
                    Ok(())
                } else {
                    Err(VectorDataError::classify(name, message))
                }
            }
        }
    }

    async fn delete_collection(&self, name: &str) -> VectorDataResult<()> {
        self.known_collections.remove(name);
        self.known_sizes.remove(name);

        let request = DeleteCollection {
            collection_name: name.to_string(),
            ..Default::default()
        };
        match self.client.delete_collection(request).await {
            Ok(_) => Ok(()),
            Err(e) => match VectorDataError::classify(name, e.to_string()) {
                VectorDataError::CollectionNotFound { .. } => Ok(()),
                other => Err(other),
            },
        }
    }

    async fn point_count(&self, name: &str) -> VectorDataResult<u64> {
        let info = self
            .client
            .collection_info(GetCollectionInfoRequest {
                collection_name: name.to_string(),
            })
            .await
            .map_err(|e| VectorDataError::classify(name, e.to_string()))?;
        Ok(info.result.and_then(|r| r.points_count).unwrap_or(0))
    }
}

fn filter_to_qdrant(filter: &PointFilter) -> Filter {
    Filter {
        must: filter
            .must
            .iter()
            .map(|m| Condition::matches(m.key.clone(), m.value.clone()))
            .collect(),
        should: filter
            .should
            .iter()
            .map(|m| Condition::matches(m.key.clone(), m.value.clone()))
            .collect(),
        ..Default::default()
    }
}

fn point_id_to_uuid(id: &PointId) -> Option<Uuid> {
    match id.point_id_options.as_ref()? {
        PointIdOptions::Uuid(s) => Uuid::parse_str(s).ok(),
        PointIdOptions::Num(_) => None,
    }
}

fn payload_to_qdrant(payload: &ChunkPayload) -> Payload {
    let mut map = HashMap::new();
    map.insert("repo_id".to_string(), Value::from(payload.repo_id.clone()));
    map.insert("path".to_string(), Value::from(payload.path.clone()));
    if let Some(v) = payload.start_line {
        map.insert("start_line".to_string(), Value::from(v));
    }
    if let Some(v) = payload.end_line {
        map.insert("end_line".to_string(), Value::from(v));
    }
    if let Some(v) = &payload.text {
        map.insert("text".to_string(), Value::from(v.clone()));
    }
    if let Some(v) = &payload.chunk_hash {
        map.insert("chunk_hash".to_string(), Value::from(v.clone()));
    }
    if let Some(v) = &payload.file_hash {
        map.insert("file_hash".to_string(), Value::from(v.clone()));
    }
    if let Some(v) = &payload.commit {
        map.insert("commit".to_string(), Value::from(v.clone()));
    }
    if let Some(v) = &payload.indexed_at {
        map.insert("indexed_at".to_string(), Value::from(v.clone()));
    }
    if let Some(v) = payload.token_count {
        map.insert("token_count".to_string(), Value::from(v));
    }
    Payload::from(map)
}

fn payload_from_qdrant(map: &HashMap<String, Value>) -> ChunkPayload {
    let get_str =
        |key: &str| -> Option<String> { map.get(key).and_then(|v| v.as_str()).map(String::from) };
    let get_int = |key: &str| -> Option<i64> { map.get(key).and_then(|v| v.as_integer()) };

    ChunkPayload {
        repo_id: get_str("repo_id").unwrap_or_default(),
        path: get_str("path").unwrap_or_default(),
        start_line: get_int("start_line"),
        end_line: get_int("end_line"),
        text: get_str("text"),
        chunk_hash: get_str("chunk_hash"),
        file_hash: get_str("file_hash"),
        commit: get_str("commit"),
        indexed_at: get_str("indexed_at"),
        token_count: get_int("token_count"),
    }
}
