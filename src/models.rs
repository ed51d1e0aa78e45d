//! Core data models used throughout Knowledge Harness.
//!
//! These types represent the chunks, retrieval hits, and query responses that
//! flow through the ingestion and retrieval pipeline. The knowledge-base
//! record itself lives in [`crate::knowledge_base`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A bounded segment of document text plus its source metadata.
///
/// Chunks are transient: they exist between chunking and indexing, after
/// which they live on as vector-store rows. Metadata always carries
/// `filename`, `file_type`, `file_size`, `chunk_index`, and `total_chunks`,
/// plus whatever the caller supplied (`kb_id`, `kb_name`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub content: String,
    pub metadata: Map<String, Value>,
}

/// A retrieval hit: chunk content plus its raw distance and derived score.
///
/// `score = 1 / (1 + distance)`, so scores lie in `(0, 1]` and decrease
/// monotonically with distance.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub content: String,
    pub metadata: Map<String, Value>,
    pub distance: f32,
    pub score: f32,
}

/// Result of querying a knowledge base.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub kb_id: String,
    pub kb_name: String,
    pub query: String,
    pub answer: String,
    pub chunks: Vec<ScoredChunk>,
    pub retrieved_count: usize,
}

/// Row count and metadata for one vector collection.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionStats {
    pub name: String,
    pub count: i64,
    pub metadata: Map<String, Value>,
}
