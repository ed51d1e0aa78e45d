//! Ranked chunk retrieval for one knowledge base.
//!
//! The retriever embeds the query with the **same** provider that embedded
//! the collection at index time (embedding-space consistency is a hard
//! requirement), runs a nearest-neighbor search, and converts the backing
//! store's distance into a bounded similarity score:
//!
//! ```text
//! score = 1 / (1 + distance)
//! ```
//!
//! The score decreases monotonically with distance and lies in `(0, 1]`, so
//! results ordered by ascending distance are equally ordered by
//! non-increasing score.

use anyhow::Result;
use serde_json::{Map, Value};

use crate::embedding::EmbeddingProvider;
use crate::models::{CollectionStats, ScoredChunk};
use crate::vector_store::VectorStore;

/// Retrieves relevant chunks from one collection via vector search.
pub struct Retriever<'a> {
    store: &'a VectorStore,
    provider: &'a dyn EmbeddingProvider,
    collection_id: String,
    default_top_k: usize,
}

impl<'a> Retriever<'a> {
    pub fn new(
        store: &'a VectorStore,
        provider: &'a dyn EmbeddingProvider,
        collection_id: &str,
        default_top_k: usize,
    ) -> Self {
        Self {
            store,
            provider,
            collection_id: collection_id.to_string(),
            default_top_k,
        }
    }

    /// Retrieve the `top_k` most relevant chunks for a query, optionally
    /// constrained by an equality filter over metadata fields.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: Option<usize>,
        filter_metadata: Option<&Map<String, Value>>,
    ) -> Result<Vec<ScoredChunk>> {
        let top_k = top_k.unwrap_or(self.default_top_k);
        let query_vec = self.provider.embed_one(query).await?;

        let matches = self
            .store
            .nearest(&self.collection_id, &query_vec, top_k, filter_metadata)
            .await?;

        Ok(matches
            .into_iter()
            .map(|m| ScoredChunk {
                score: 1.0 / (1.0 + m.distance),
                content: m.content,
                metadata: m.metadata,
                distance: m.distance,
            })
            .collect())
    }

    /// Row count and metadata for the bound collection.
    pub async fn stats(&self) -> Result<Option<CollectionStats>> {
        self.store.stats(&self.collection_id).await
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn score_is_bounded_and_monotone() {
        let score = |d: f32| 1.0 / (1.0 + d);
        assert_eq!(score(0.0), 1.0);
        assert!(score(0.5) > score(1.0));
        assert!(score(1000.0) > 0.0);
        for d in [0.0f32, 0.1, 1.0, 10.0, 1e6] {
            let s = score(d);
            assert!(s > 0.0 && s <= 1.0, "score out of range: {}", s);
        }
    }
}
