//! Search service implementation

use crate::error::{SearchError, SearchResult};
use crate::search::QueryId;
use crate::search::filters::{matches_directory, matches_language, normalize_directory};
use codescout_embeddings::EmbeddingProvider;
use codescout_vector_data::{PointFilter, VectorDataError, VectorStore};
use std::sync::Arc;

/// Results are over-fetched by this factor before post-filtering, so
/// directory/language filters still leave enough hits to fill `top_k`.
const EXPANSION_FACTOR: usize = 4;

/// One search query against a collection
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub collection: String,
    pub query: String,
    /// Point-level tenant filter; always applied
    pub repo_id: String,
    pub top_k: usize,
    pub directory_filter: Option<String>,
    pub language_filter: Option<String>,
}

/// One ranked result
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub path: String,
    pub start_line: i64,
    pub end_line: i64,
    pub text: String,
    pub score: f32,
}

/// Semantic search over a repository's chunk collection
pub struct SearchService {
    embeddings: Arc<dyn EmbeddingProvider>,
    vectors: Arc<dyn VectorStore>,
    embedding_model: String,
}

impl SearchService {
    pub fn new(
        embeddings: Arc<dyn EmbeddingProvider>,
        vectors: Arc<dyn VectorStore>,
        embedding_model: impl Into<String>,
    ) -> Self {
        Self {
            embeddings,
            vectors,
            embedding_model: embedding_model.into(),
        }
    }

    /// Run one search: embed, over-fetched vector search scoped to the
    /// repository, lenient payload parsing, post-filters, slice to size.
    ///
    /// A missing collection returns an empty result set; the caller may
    /// simply not have indexed yet.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::EmbeddingEmpty`] when the provider yields no
    /// query vector, and propagates other embedding/vector failures.
    #[tracing::instrument(skip(self, request), fields(collection = %request.collection, top_k = request.top_k, query_id = %query_id))]
    pub async fn search(
        &self,
        request: &SearchRequest,
        query_id: QueryId,
    ) -> SearchResult<Vec<SearchHit>> {
        if request.top_k == 0 {
            return Ok(Vec::new());
        }
        let vectors = self
            .embeddings
            .embed(&self.embedding_model, &[request.query.clone()])
            .await?;
        let query_vector = vectors
            .into_iter()
            .next()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| SearchError::EmbeddingEmpty {
                query: request.query.clone(),
            })?;

        let limit = request.top_k.saturating_mul(EXPANSION_FACTOR).max(1);
        let filter = PointFilter::repo(&request.repo_id);
        let matches = match self
            .vectors
            .search(&request.collection, query_vector, limit, Some(&filter))
            .await
        {
            Ok(matches) => matches,
            Err(VectorDataError::CollectionNotFound { .. }) => {
                tracing::debug!(collection = %request.collection, "Search against missing collection");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let directory = request
            .directory_filter
            .as_deref()
            .map(normalize_directory)
            .unwrap_or_default();
        let language = request
            .language_filter
            .as_deref()
            .map(str::trim)
            .unwrap_or_default();

        let mut hits = Vec::new();
        for scored in matches {
            let payload = scored.payload;
            // Entries without a path or text are unusable
            if payload.path.is_empty() {
                continue;
            }
            let Some(text) = payload.text else { continue };

            if !matches_directory(&payload.path, &directory) {
                continue;
            }
            if !language.is_empty() && !matches_language(&payload.path, language) {
                continue;
            }

            let start_line = payload.start_line.filter(|l| *l >= 1).unwrap_or(1);
            let end_line = payload
                .end_line
                .filter(|l| *l >= start_line)
                .unwrap_or(start_line);

            hits.push(SearchHit {
                path: payload.path,
                start_line,
                end_line,
                text,
                score: scored.score,
            });
            if hits.len() == request.top_k {
                break;
            }
        }

        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codescout_embeddings::MockEmbeddingProvider;
    use codescout_vector_data::{ChunkPayload, MockVectorStore, VectorPoint};
    use uuid::Uuid;

    fn point(id: u128, path: &str, text: &str, vector: Vec<f32>) -> VectorPoint {
        VectorPoint {
            id: Uuid::from_u128(id),
            vector,
            payload: ChunkPayload {
                repo_id: "https://github.com/acme/app".to_string(),
                path: path.to_string(),
                start_line: Some(1),
                end_line: Some(3),
                text: Some(text.to_string()),
                ..Default::default()
            },
        }
    }

    fn service(store: &MockVectorStore, embedder: Arc<MockEmbeddingProvider>) -> SearchService {
        SearchService::new(embedder, Arc::new(store.clone()), "test-model")
    }

    fn request(query: &str) -> SearchRequest {
        SearchRequest {
            collection: "c".to_string(),
            query: query.to_string(),
            repo_id: "https://github.com/acme/app".to_string(),
            top_k: 5,
            directory_filter: None,
            language_filter: None,
        }
    }

    #[tokio::test]
    async fn test_missing_collection_returns_empty() {
        let store = MockVectorStore::new();
        let embedder = Arc::new(MockEmbeddingProvider::new(8));
        let hits = service(&store, embedder).search(&request("query"), QueryId::new()).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_exact_text_ranks_first() {
        let store = MockVectorStore::new();
        let embedder = Arc::new(MockEmbeddingProvider::new(8));
        let near = embedder.vector_for("const x = 1;");
        store
            .upsert(
                "c",
                vec![
                    point(1, "a.ts", "const x = 1;", near),
                    point(2, "b.ts", "unrelated", vec![0.0; 8]),
                ],
            )
            .await
            .unwrap();

        let hits = service(&store, embedder)
            .search(&request("const x = 1;"), QueryId::new())
            .await
            .unwrap();
        assert_eq!(hits[0].path, "a.ts");
        assert!(hits[0].score > 0.0);
    }

    #[tokio::test]
    async fn test_directory_filter_segment_prefix() {
        let store = MockVectorStore::new();
        let embedder = Arc::new(MockEmbeddingProvider::new(8));
        let v = embedder.vector_for("x");
        store
            .upsert(
                "c",
                vec![
                    point(1, "a/b/inner.ts", "x", v.clone()),
                    point(2, "a/bc.ts", "x", v.clone()),
                    point(3, "a/b", "x", v),
                ],
            )
            .await
            .unwrap();

        let mut req = request("x");
        req.directory_filter = Some("a/b".to_string());
        let hits = service(&store, embedder).search(&req, QueryId::new()).await.unwrap();
        let paths: Vec<&str> = hits.iter().map(|h| h.path.as_str()).collect();
        assert!(paths.contains(&"a/b/inner.ts"));
        assert!(paths.contains(&"a/b"));
        assert!(!paths.contains(&"a/bc.ts"));
    }

    #[tokio::test]
    async fn test_language_filter() {
        let store = MockVectorStore::new();
        let embedder = Arc::new(MockEmbeddingProvider::new(8));
        let v = embedder.vector_for("x");
        store
            .upsert(
                "c",
                vec![
                    point(1, "a.ts", "x", v.clone()),
                    point(2, "b.tsx", "x", v.clone()),
                    point(3, "c.py", "x", v),
                ],
            )
            .await
            .unwrap();

        let mut req = request("x");
        req.language_filter = Some("typescript".to_string());
        let hits = service(&store, embedder).search(&req, QueryId::new()).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.path.ends_with(".ts") || h.path.ends_with(".tsx")));
    }

    #[tokio::test]
    async fn test_top_k_slicing() {
        let store = MockVectorStore::new();
        let embedder = Arc::new(MockEmbeddingProvider::new(8));
        let points: Vec<VectorPoint> = (0..20)
            .map(|i| {
                let text = format!("text {i}");
                let vector = embedder.vector_for(&text);
                point(i, &format!("f{i}.rs"), &text, vector)
            })
            .collect();
        store.upsert("c", points).await.unwrap();

        let mut req = request("text 3");
        req.top_k = 3;
        let hits = service(&store, embedder).search(&req, QueryId::new()).await.unwrap();
        assert_eq!(hits.len(), 3);
    }

    #[tokio::test]
    async fn test_default_line_numbers() {
        let store = MockVectorStore::new();
        let embedder = Arc::new(MockEmbeddingProvider::new(8));
        let v = embedder.vector_for("x");
        let mut p = point(1, "a.ts", "x", v);
        p.payload.start_line = None;
        p.payload.end_line = None;
        store.upsert("c", vec![p]).await.unwrap();

        let hits = service(&store, embedder).search(&request("x"), QueryId::new()).await.unwrap();
        assert_eq!(hits[0].start_line, 1);
        assert_eq!(hits[0].end_line, 1);
    }

    #[tokio::test]
    async fn test_entries_without_text_are_dropped() {
        let store = MockVectorStore::new();
        let embedder = Arc::new(MockEmbeddingProvider::new(8));
        let v = embedder.vector_for("x");
        let mut p = point(1, "a.ts", "x", v);
        p.payload.text = None;
        store.upsert("c", vec![p]).await.unwrap();

        let hits = service(&store, embedder).search(&request("x"), QueryId::new()).await.unwrap();
        assert!(hits.is_empty());
    }
}
