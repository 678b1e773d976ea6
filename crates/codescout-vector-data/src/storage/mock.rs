//! Mock implementation of [`VectorStore`] for testing
//!
//! Stores points in memory with real filter, scroll, and cosine-search
//! semantics, so indexing and search logic can be exercised without a
//! running Qdrant instance.

#![allow(clippy::unwrap_used)]

use crate::error::{VectorDataError, VectorDataResult};
use crate::storage::traits::{
    ChunkPayload, FieldMatch, PointFilter, PointRecord, ScoredMatch, ScrollPage, ScrollRequest,
    VectorPoint, VectorStore,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct StoredPoint {
    vector: Vec<f32>,
    payload: ChunkPayload,
}

#[derive(Debug, Default)]
struct MockCollection {
    vector_size: usize,
    // BTreeMap gives scroll a stable id order, like Qdrant's offset paging
    points: BTreeMap<Uuid, StoredPoint>,
    payload_indexes: Vec<String>,
}

type Collections = Arc<Mutex<BTreeMap<String, MockCollection>>>;

/// In-memory vector store for tests
#[derive(Clone, Default)]
pub struct MockVectorStore {
    collections: Collections,
    upsert_calls: Arc<AtomicUsize>,
    search_calls: Arc<AtomicUsize>,
    scroll_calls: Arc<AtomicUsize>,
}

impl MockVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of upsert invocations (for batching assertions)
    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::Relaxed)
    }

    /// Number of search invocations
    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::Relaxed)
    }

    /// Number of scroll invocations (for "no orphan scan" assertions)
    pub fn scroll_calls(&self) -> usize {
        self.scroll_calls.load(Ordering::Relaxed)
    }

    /// All payloads currently stored in a collection, for assertions
    pub fn payloads(&self, collection: &str) -> Vec<ChunkPayload> {
        self.collections
            .lock()
            .unwrap()
            .get(collection)
            .map(|c| c.points.values().map(|p| p.payload.clone()).collect())
            .unwrap_or_default()
    }

    /// All point ids currently stored in a collection
    pub fn point_ids(&self, collection: &str) -> Vec<Uuid> {
        self.collections
            .lock()
            .unwrap()
            .get(collection)
            .map(|c| c.points.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Count of points in a collection
    pub fn point_count_sync(&self, collection: &str) -> usize {
        self.collections
            .lock()
            .unwrap()
            .get(collection)
            .map_or(0, |c| c.points.len())
    }

    /// Payload indexes created on a collection
    pub fn payload_indexes(&self, collection: &str) -> Vec<String> {
        self.collections
            .lock()
            .unwrap()
            .get(collection)
            .map(|c| c.payload_indexes.clone())
            .unwrap_or_default()
    }
}

fn payload_field(payload: &ChunkPayload, key: &str) -> Option<String> {
    match key {
        "repo_id" => Some(payload.repo_id.clone()),
        "path" => Some(payload.path.clone()),
        "chunk_hash" => payload.chunk_hash.clone(),
        "file_hash" => payload.file_hash.clone(),
        "commit" => payload.commit.clone(),
        _ => None,
    }
}

fn matches_condition(payload: &ChunkPayload, condition: &FieldMatch) -> bool {
    payload_field(payload, &condition.key).is_some_and(|v| v == condition.value)
}

fn matches_filter(payload: &ChunkPayload, filter: &PointFilter) -> bool {
    let must_ok = filter.must.iter().all(|c| matches_condition(payload, c));
    let should_ok =
        filter.should.is_empty() || filter.should.iter().any(|c| matches_condition(payload, c));
    must_ok && should_ok
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[async_trait]
impl VectorStore for MockVectorStore {
    async fn ensure_collection(&self, name: &str, vector_size: usize) -> VectorDataResult<()> {
        let mut collections = self.collections.lock().unwrap();
        if let Some(existing) = collections.get(name) {
            if existing.vector_size != vector_size {
                return Err(VectorDataError::VectorSizeMismatch {
                    collection: name.to_string(),
                    expected: vector_size,
                    actual: existing.vector_size,
                });
            }
            return Ok(());
        }
        collections.insert(
            name.to_string(),
            MockCollection {
                vector_size,
                ..Default::default()
            },
        );
        Ok(())
    }

    async fn collection_exists(&self, name: &str) -> VectorDataResult<bool> {
        Ok(self.collections.lock().unwrap().contains_key(name))
    }

    async fn upsert(&self, name: &str, points: Vec<VectorPoint>) -> VectorDataResult<()> {
        let Some(first) = points.first() else {
            return Ok(());
        };
        let vector_size = first.vector.len();
        self.ensure_collection(name, vector_size).await?;

        self.upsert_calls.fetch_add(1, Ordering::Relaxed);
        let mut collections = self.collections.lock().unwrap();
        let collection = collections.get_mut(name).unwrap();
        for point in points {
            collection.points.insert(
                point.id,
                StoredPoint {
                    vector: point.vector,
                    payload: point.payload,
                },
            );
        }
        Ok(())
    }

    async fn delete_by_filter(&self, name: &str, filter: &PointFilter) -> VectorDataResult<()> {
        let mut collections = self.collections.lock().unwrap();
        let Some(collection) = collections.get_mut(name) else {
            return Ok(()); // absent collection is a no-op
        };
        collection
            .points
            .retain(|_, p| !matches_filter(&p.payload, filter));
        Ok(())
    }

    async fn search(
        &self,
        name: &str,
        vector: Vec<f32>,
        limit: usize,
        filter: Option<&PointFilter>,
    ) -> VectorDataResult<Vec<ScoredMatch>> {
        self.search_calls.fetch_add(1, Ordering::Relaxed);
        let collections = self.collections.lock().unwrap();
        let Some(collection) = collections.get(name) else {
            return Err(VectorDataError::CollectionNotFound {
                collection: name.to_string(),
            });
        };

        let mut matches: Vec<ScoredMatch> = collection
            .points
            .iter()
            .filter(|(_, p)| filter.is_none_or(|f| matches_filter(&p.payload, f)))
            .map(|(id, p)| ScoredMatch {
                id: *id,
                score: cosine(&vector, &p.vector),
                payload: p.payload.clone(),
            })
            .collect();
        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        matches.truncate(limit);
        Ok(matches)
    }

    async fn scroll(
        &self,
        name: &str,
        request: &ScrollRequest,
        offset: Option<Uuid>,
    ) -> VectorDataResult<ScrollPage> {
        self.scroll_calls.fetch_add(1, Ordering::Relaxed);
        let collections = self.collections.lock().unwrap();
        let Some(collection) = collections.get(name) else {
            return Ok(ScrollPage {
                points: Vec::new(),
                next_offset: None,
            });
        };

        let filtered: Vec<(&Uuid, &StoredPoint)> = collection
            .points
            .range(offset.unwrap_or(Uuid::nil())..)
            .filter(|(_, p)| {
                request
                    .filter
                    .as_ref()
                    .is_none_or(|f| matches_filter(&p.payload, f))
            })
            .collect();

        let page: Vec<PointRecord> = filtered
            .iter()
            .take(request.page_size)
            .map(|(id, p)| PointRecord {
                id: **id,
                vector: request.with_vector.then(|| p.vector.clone()),
                payload: restrict_payload(&p.payload, request.payload_fields.as_deref()),
            })
            .collect();

        let next_offset = filtered.get(request.page_size).map(|(id, _)| **id);
        Ok(ScrollPage {
            points: page,
            next_offset,
        })
    }

    async fn ensure_payload_index(&self, name: &str, field: &str) -> VectorDataResult<()> {
        let mut collections = self.collections.lock().unwrap();
        let Some(collection) = collections.get_mut(name) else {
            return Err(VectorDataError::CollectionNotFound {
                collection: name.to_string(),
            });
        };
        if !collection.payload_indexes.iter().any(|f| f == field) {
            collection.payload_indexes.push(field.to_string());
        }
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> VectorDataResult<()> {
        self.collections.lock().unwrap().remove(name);
        Ok(())
    }

    async fn point_count(&self, name: &str) -> VectorDataResult<u64> {
        Ok(self.point_count_sync(name) as u64)
    }
}

fn restrict_payload(payload: &ChunkPayload, fields: Option<&[String]>) -> ChunkPayload {
    let Some(fields) = fields else {
        return payload.clone();
    };
    let keep = |name: &str| fields.iter().any(|f| f == name);
    ChunkPayload {
        repo_id: if keep("repo_id") {
            payload.repo_id.clone()
        } else {
            String::new()
        },
        path: if keep("path") {
            payload.path.clone()
        } else {
            String::new()
        },
        start_line: payload.start_line.filter(|_| keep("start_line")),
        end_line: payload.end_line.filter(|_| keep("end_line")),
        text: payload.text.clone().filter(|_| keep("text")),
        chunk_hash: payload.chunk_hash.clone().filter(|_| keep("chunk_hash")),
        file_hash: payload.file_hash.clone().filter(|_| keep("file_hash")),
        commit: payload.commit.clone().filter(|_| keep("commit")),
        indexed_at: payload.indexed_at.clone().filter(|_| keep("indexed_at")),
        token_count: payload.token_count.filter(|_| keep("token_count")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(id: u128, repo: &str, path: &str, vector: Vec<f32>) -> VectorPoint {
        VectorPoint {
            id: Uuid::from_u128(id),
            vector,
            payload: ChunkPayload {
                repo_id: repo.to_string(),
                path: path.to_string(),
                text: Some(format!("content of {path}")),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn test_upsert_overwrites_same_id() {
        let store = MockVectorStore::new();
        store
            .upsert("c", vec![point(1, "r", "a.rs", vec![1.0, 0.0])])
            .await
            .unwrap();
        store
            .upsert("c", vec![point(1, "r", "a.rs", vec![0.0, 1.0])])
            .await
            .unwrap();
        assert_eq!(store.point_count_sync("c"), 1);
    }

    #[tokio::test]
    async fn test_delete_by_filter_scopes_to_matches() {
        let store = MockVectorStore::new();
        store
            .upsert(
                "c",
                vec![
                    point(1, "r", "a.rs", vec![1.0, 0.0]),
                    point(2, "r", "b.rs", vec![0.0, 1.0]),
                    point(3, "other", "a.rs", vec![0.5, 0.5]),
                ],
            )
            .await
            .unwrap();

        let filter = PointFilter::repo("r").must("path", "a.rs");
        store.delete_by_filter("c", &filter).await.unwrap();

        let remaining = store.payloads("c");
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().any(|p| p.repo_id == "other"));
        assert!(remaining.iter().any(|p| p.path == "b.rs"));
    }

    #[tokio::test]
    async fn test_search_orders_by_similarity_and_respects_filter() {
        let store = MockVectorStore::new();
        store
            .upsert(
                "c",
                vec![
                    point(1, "r", "near.rs", vec![1.0, 0.0]),
                    point(2, "r", "far.rs", vec![0.0, 1.0]),
                    point(3, "other", "nearer.rs", vec![1.0, 0.1]),
                ],
            )
            .await
            .unwrap();

        let filter = PointFilter::repo("r");
        let results = store
            .search("c", vec![1.0, 0.0], 10, Some(&filter))
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].payload.path, "near.rs");
        assert!(results[0].score > results[1].score);
    }

    #[tokio::test]
    async fn test_search_missing_collection_is_typed() {
        let store = MockVectorStore::new();
        let err = store.search("absent", vec![1.0], 5, None).await.unwrap_err();
        assert!(matches!(err, VectorDataError::CollectionNotFound { .. }));
    }

    #[tokio::test]
    async fn test_scroll_pages_through_everything() {
        let store = MockVectorStore::new();
        let points: Vec<VectorPoint> = (0..25)
            .map(|i| point(i, "r", &format!("f{i}.rs"), vec![1.0, 0.0]))
            .collect();
        store.upsert("c", points).await.unwrap();

        let request = ScrollRequest {
            page_size: 10,
            ..Default::default()
        };
        let mut seen = 0;
        let mut offset = None;
        loop {
            let page = store.scroll("c", &request, offset).await.unwrap();
            seen += page.points.len();
            match page.next_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }
        assert_eq!(seen, 25);
    }

    #[tokio::test]
    async fn test_scroll_restricts_payload_fields() {
        let store = MockVectorStore::new();
        store
            .upsert("c", vec![point(1, "r", "a.rs", vec![1.0])])
            .await
            .unwrap();

        let request = ScrollRequest {
            payload_fields: Some(vec!["path".to_string()]),
            ..Default::default()
        };
        let page = store.scroll("c", &request, None).await.unwrap();
        assert_eq!(page.points[0].payload.path, "a.rs");
        assert!(page.points[0].payload.text.is_none());
    }

    #[tokio::test]
    async fn test_vector_size_mismatch() {
        let store = MockVectorStore::new();
        store.ensure_collection("c", 768).await.unwrap();
        let err = store.ensure_collection("c", 1024).await.unwrap_err();
        assert!(matches!(err, VectorDataError::VectorSizeMismatch { .. }));
    }
}
