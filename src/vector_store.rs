//! Vector-collection storage on SQLite.
//!
//! One collection per knowledge base, keyed by the knowledge-base id and
//! sharing its lifetime. Every row holds the chunk's content, its metadata,
//! its embedding vector (little-endian f32 BLOB), and a content hash. The
//! collection and the knowledge-base record are not transactionally coupled;
//! deletion order is fixed — collection first, record second — so a crash
//! mid-delete leaves an orphaned record rather than an unowned collection.
//!
//! Nearest-neighbor search is a brute-force L2 scan over the collection's
//! rows. L2 distance is non-negative and unbounded, which is what the
//! retriever's `1/(1+distance)` scoring assumes.

use anyhow::{bail, Result};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};

use crate::embedding::EmbeddingProvider;
use crate::models::{Chunk, CollectionStats};

/// One row returned from a collection scan.
#[derive(Debug, Clone)]
pub struct RowMatch {
    pub row_id: String,
    pub content: String,
    pub metadata: Map<String, Value>,
    pub distance: f32,
}

/// Owns all vector collections in one SQLite database.
#[derive(Clone)]
pub struct VectorStore {
    pool: SqlitePool,
}

impl VectorStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a fresh collection, deleting any pre-existing collection with
    /// the same id first (idempotent re-creation, not additive). Empty
    /// caller metadata is replaced with a default description — empty
    /// metadata is invalid for some backing stores.
    pub async fn create_collection(&self, id: &str, metadata: Map<String, Value>) -> Result<()> {
        self.delete_collection(id).await?;

        let metadata = if metadata.is_empty() {
            let mut m = Map::new();
            m.insert(
                "description".to_string(),
                Value::from(format!("Knowledge base: {}", id)),
            );
            m
        } else {
            metadata
        };

        sqlx::query("INSERT INTO collections (id, metadata_json, created_at) VALUES (?, ?, ?)")
            .bind(id)
            .bind(serde_json::to_string(&metadata)?)
            .bind(chrono::Utc::now().timestamp())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Embed and index a batch of chunks. Row ids continue from the
    /// collection's current row count, so repeated calls append rather than
    /// collide. All rows are written in one transaction.
    ///
    /// Returns the number of rows added.
    pub async fn add_chunks(
        &self,
        id: &str,
        chunks: &[Chunk],
        provider: &dyn EmbeddingProvider,
    ) -> Result<usize> {
        if !self.collection_exists(id).await? {
            bail!("Collection '{}' not found", id);
        }
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = provider.embed_many(&texts).await?;
        if vectors.len() != chunks.len() {
            bail!(
                "embedding count mismatch: {} chunks, {} vectors",
                chunks.len(),
                vectors.len()
            );
        }

        let existing = self.count(id).await?;

        let mut tx = self.pool.begin().await?;
        for (i, (chunk, vector)) in chunks.iter().zip(vectors.iter()).enumerate() {
            let row_id = format!("chunk_{}", existing + i as i64);
            sqlx::query(
                "INSERT INTO chunk_rows (collection_id, row_id, content, metadata_json, embedding, hash) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(id)
            .bind(&row_id)
            .bind(&chunk.content)
            .bind(serde_json::to_string(&chunk.metadata)?)
            .bind(vec_to_blob(vector))
            .bind(hash_text(&chunk.content))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(chunks.len())
    }

    /// Remove a collection and its rows. Safe to call on a non-existent
    /// collection: knowledge-base deletion invokes this regardless of
    /// whether indexing ever succeeded.
    pub async fn delete_collection(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM chunk_rows WHERE collection_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM collections WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// All collection ids, sorted for deterministic output.
    pub async fn list_collections(&self) -> Result<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM collections ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    /// Row count and metadata for one collection; `None` when it is missing.
    pub async fn stats(&self, id: &str) -> Result<Option<CollectionStats>> {
        let metadata_json: Option<String> =
            sqlx::query_scalar("SELECT metadata_json FROM collections WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        let metadata_json = match metadata_json {
            Some(m) => m,
            None => return Ok(None),
        };

        let metadata: Map<String, Value> =
            serde_json::from_str(&metadata_json).unwrap_or_default();
        let count = self.count(id).await?;

        Ok(Some(CollectionStats {
            name: id.to_string(),
            count,
            metadata,
        }))
    }

    /// Current number of rows in a collection.
    pub async fn count(&self, id: &str) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM chunk_rows WHERE collection_id = ?")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// Nearest-neighbor scan: L2 distance between the query vector and every
    /// row, optionally constrained by an equality filter over metadata
    /// fields. Results are sorted by ascending distance; ties keep insertion
    /// order.
    pub async fn nearest(
        &self,
        id: &str,
        query_vec: &[f32],
        top_k: usize,
        filter: Option<&Map<String, Value>>,
    ) -> Result<Vec<RowMatch>> {
        if !self.collection_exists(id).await? {
            bail!("Collection '{}' not found", id);
        }

        let mut matches = self.scan(id, Some(query_vec)).await?;
        if let Some(filter) = filter {
            matches.retain(|m| {
                filter
                    .iter()
                    .all(|(k, v)| m.metadata.get(k) == Some(v))
            });
        }

        // Stable sort keeps insertion order for equal distances.
        matches.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(top_k);
        Ok(matches)
    }

    /// First `limit` rows in insertion order, without distance ranking.
    /// Used for document summaries.
    pub async fn peek(&self, id: &str, limit: usize) -> Result<Vec<RowMatch>> {
        if !self.collection_exists(id).await? {
            bail!("Collection '{}' not found", id);
        }
        let mut rows = self.scan(id, None).await?;
        rows.truncate(limit);
        Ok(rows)
    }

    async fn collection_exists(&self, id: &str) -> Result<bool> {
        let found: Option<String> = sqlx::query_scalar("SELECT id FROM collections WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    async fn scan(&self, id: &str, query_vec: Option<&[f32]>) -> Result<Vec<RowMatch>> {
        let rows = sqlx::query(
            "SELECT row_id, content, metadata_json, embedding FROM chunk_rows \
             WHERE collection_id = ? ORDER BY rowid",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let matches = rows
            .iter()
            .map(|row| {
                let metadata_json: String = row.get("metadata_json");
                let metadata: Map<String, Value> =
                    serde_json::from_str(&metadata_json).unwrap_or_default();
                let distance = match query_vec {
                    Some(q) => {
                        let blob: Vec<u8> = row.get("embedding");
                        l2_distance(q, &blob_to_vec(&blob))
                    }
                    None => 0.0,
                };
                RowMatch {
                    row_id: row.get("row_id"),
                    content: row.get("content"),
                    metadata,
                    distance,
                }
            })
            .collect();

        Ok(matches)
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// Each `f32` is stored as 4 bytes in little-endian order, producing a BLOB
/// of `vec.len() × 4` bytes.
///
/// # Example
///
/// ```rust
/// use knowledge_harness::vector_store::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Euclidean (L2) distance between two vectors.
///
/// Returns `f32::MAX` for vectors of different lengths — within one
/// collection every row was embedded by the same provider, so a length
/// mismatch means the query came from a different embedding space.
pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::MAX;
    }
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_round_trip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        let restored = blob_to_vec(&blob);
        assert_eq!(vec, restored);
    }

    #[test]
    fn l2_identical_is_zero() {
        let v = vec![1.0, 2.0, 3.0];
        assert_eq!(l2_distance(&v, &v), 0.0);
    }

    #[test]
    fn l2_three_four_five() {
        let a = vec![0.0, 0.0];
        let b = vec![3.0, 4.0];
        assert!((l2_distance(&a, &b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn l2_length_mismatch_is_max() {
        assert_eq!(l2_distance(&[1.0], &[1.0, 2.0]), f32::MAX);
    }

    #[test]
    fn l2_is_never_negative() {
        let a = vec![-1.0, -2.0, 3.0];
        let b = vec![4.0, 0.5, -6.0];
        assert!(l2_distance(&a, &b) >= 0.0);
    }

    #[test]
    fn content_hash_is_stable() {
        assert_eq!(hash_text("abc"), hash_text("abc"));
        assert_ne!(hash_text("abc"), hash_text("abd"));
    }
}
