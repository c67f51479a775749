//! Query orchestration: embed → search → generate → [`Answer`].

use std::sync::Arc;
use tracing::info;

use crate::config::RetrievalConfig;
use crate::embedding::embed_query;
use crate::error::QueryError;
use crate::generation::GenerationRouter;
use crate::models::Answer;
use crate::store::VectorStore;

pub struct QueryEngine {
    store: Arc<VectorStore>,
    router: GenerationRouter,
    default_k: usize,
    max_k: usize,
}

impl QueryEngine {
    pub fn new(store: Arc<VectorStore>, router: GenerationRouter, retrieval: &RetrievalConfig) -> Self {
        Self {
            store,
            router,
            default_k: retrieval.default_k,
            max_k: retrieval.max_k,
        }
    }

    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    pub fn router(&self) -> &GenerationRouter {
        &self.router
    }

    /// Answer `query` from the `k` nearest chunks (`default_k` when `None`).
    ///
    /// An empty or whitespace-only query is rejected before any embedding
    /// or search happens. Generation never fails; at worst the answer is
    /// the extractive summary with `generation_error` set.
    pub async fn answer(&self, query: &str, k: Option<usize>) -> Result<Answer, QueryError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(QueryError::EmptyQuery);
        }
        let k = k.unwrap_or(self.default_k).min(self.max_k);

        let vector = embed_query(self.store.embedder().as_ref(), query)
            .await
            .map_err(|e| QueryError::Embedding(format!("{:#}", e)))?;

        let evidence = self.store.search(&vector, k).await?;
        let outcome = self.router.generate(query, &evidence).await;

        info!(
            k,
            evidence = evidence.len(),
            backend = %outcome.backend,
            confidence = outcome.confidence,
            fallback = outcome.error.is_some(),
            "query answered"
        );

        Ok(Answer {
            query: query.to_string(),
            answer: outcome.text,
            confidence: outcome.confidence,
            backend: outcome.backend,
            evidence,
            generation_error: outcome.error,
        })
    }
}
