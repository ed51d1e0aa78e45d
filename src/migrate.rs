use anyhow::Result;
use sqlx::SqlitePool;

/// Create the vector-store schema. Idempotent: safe to run on every startup.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // One collection per knowledge base, same id, same lifetime.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS collections (
            id TEXT PRIMARY KEY,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Embedded chunk rows; row_id is unique within its collection.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_rows (
            collection_id TEXT NOT NULL,
            row_id TEXT NOT NULL,
            content TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            embedding BLOB NOT NULL,
            hash TEXT NOT NULL,
            PRIMARY KEY (collection_id, row_id),
            FOREIGN KEY (collection_id) REFERENCES collections(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunk_rows_collection ON chunk_rows(collection_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
