//! End-to-end engine tests over real SQLite, with deterministic in-process
//! embedding and generation doubles.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use tempfile::TempDir;

use knowledge_harness::config::{
    ChunkingConfig, Config, EmbeddingConfig, GenerationConfig, LimitsConfig, RetrievalConfig,
    StorageConfig,
};
use knowledge_harness::db;
use knowledge_harness::embedding::EmbeddingProvider;
use knowledge_harness::engine::RagEngine;
use knowledge_harness::generation::AnswerGenerator;
use knowledge_harness::knowledge_base::ProcessingStatus;
use knowledge_harness::manager::KnowledgeBaseManager;
use knowledge_harness::migrate;
use knowledge_harness::models::{Chunk, ScoredChunk};
use knowledge_harness::progress::{NoProgress, ProgressEvent, ProgressReporter};
use knowledge_harness::vector_store::VectorStore;

// ============ Test doubles ============

/// Deterministic embedder: a normalized byte histogram, so similar texts get
/// similar vectors and identical inputs always embed identically.
struct MockEmbedder {
    calls: AtomicUsize,
}

impl MockEmbedder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }
}

fn mock_vector(text: &str) -> Vec<f32> {
    let mut v = [0.0f32; 8];
    for (i, b) in text.bytes().enumerate() {
        v[(i + b as usize) % 8] += (b % 31) as f32;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    fn model_name(&self) -> &str {
        "mock-embedder"
    }
    fn dimension(&self) -> usize {
        8
    }
    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| mock_vector(t)).collect())
    }
}

/// Embedder that always fails, to drive the system-fault path.
struct FailingEmbedder;

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    fn model_name(&self) -> &str {
        "failing-embedder"
    }
    fn dimension(&self) -> usize {
        8
    }
    async fn embed_many(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        anyhow::bail!("embedding backend offline")
    }
}

struct MockGenerator {
    calls: AtomicUsize,
}

impl MockGenerator {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl AnswerGenerator for MockGenerator {
    fn model_name(&self) -> &str {
        "mock-generator"
    }
    async fn generate(
        &self,
        _query: &str,
        context: &[ScoredChunk],
        _temperature: f32,
        _max_tokens: u32,
    ) -> String {
        self.calls.fetch_add(1, Ordering::SeqCst);
        format!("mock answer from {} chunks", context.len())
    }
    async fn summarize(&self, chunks: &[ScoredChunk]) -> String {
        self.calls.fetch_add(1, Ordering::SeqCst);
        format!("mock summary of {} chunks", chunks.len())
    }
}

struct RecordingReporter(Mutex<Vec<ProgressEvent>>);

impl ProgressReporter for RecordingReporter {
    fn report(&self, event: ProgressEvent) {
        self.0.lock().unwrap().push(event);
    }
}

// ============ Fixtures ============

fn test_config(root: &Path) -> Config {
    Config {
        storage: StorageConfig {
            data_dir: root.join("data"),
        },
        chunking: ChunkingConfig {
            chunk_size: 500,
            chunk_overlap: 50,
        },
        retrieval: RetrievalConfig::default(),
        limits: LimitsConfig::default(),
        embedding: EmbeddingConfig::default(),
        generation: GenerationConfig::default(),
    }
}

async fn engine_with(
    dir: &TempDir,
    provider: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn AnswerGenerator>,
) -> RagEngine {
    let config = test_config(dir.path());
    let manager = KnowledgeBaseManager::open(&config.storage.data_dir).unwrap();
    let pool = db::connect(&config.storage.database_path()).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    let store = VectorStore::new(pool);
    RagEngine::with_components(config, manager, store, provider, generator)
}

async fn test_store(dir: &TempDir) -> VectorStore {
    let pool = db::connect(&dir.path().join("vectors.sqlite"))
        .await
        .unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    VectorStore::new(pool)
}

fn write_file(dir: &TempDir, name: &str, body: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, body).unwrap();
    path
}

fn chunk(content: &str, filename: &str) -> Chunk {
    let mut metadata = Map::new();
    metadata.insert("filename".to_string(), Value::from(filename));
    Chunk {
        content: content.to_string(),
        metadata,
    }
}

// ============ End-to-end scenarios ============

#[tokio::test]
async fn scenario_a_one_empty_file_yields_partial() {
    let dir = TempDir::new().unwrap();
    let engine = engine_with(&dir, MockEmbedder::new(), MockGenerator::new()).await;

    let files = vec![
        write_file(&dir, "alpha.txt", "The alpha document talks at length about Rust programming and cargo workspaces."),
        write_file(&dir, "empty.txt", ""),
        write_file(&dir, "gamma.txt", "The gamma document covers deployment, containers, and infrastructure concerns."),
    ];

    let kb = engine
        .create_knowledge_base("notes", "u1", "user one", &files, "", &NoProgress)
        .await
        .unwrap();

    assert_eq!(kb.processed_files, 2);
    assert_eq!(kb.failed_files, 1);
    assert_eq!(kb.status, ProcessingStatus::Partial);
    assert_eq!(kb.errors.len(), 1);
    assert_eq!(kb.errors[0].filename, "empty.txt");
    assert!(kb.errors[0].error.contains("no text extracted"));
    assert_eq!(kb.files.len(), 2);
    assert!(kb.attempted_files() <= kb.total_files);

    // Partial bases reject queries, naming the status.
    let err = engine
        .query_knowledge_base(&kb.id, "anything", None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("partial"), "err: {}", err);
}

#[tokio::test]
async fn scenario_b_1200_chars_make_three_chunks() {
    let dir = TempDir::new().unwrap();
    let engine = engine_with(&dir, MockEmbedder::new(), MockGenerator::new()).await;

    let body: String = (0..240).map(|i| format!("w{:03} ", i)).collect();
    assert_eq!(body.chars().count(), 1200);
    let files = vec![write_file(&dir, "long.txt", &body)];

    let kb = engine
        .create_knowledge_base("long", "u1", "user one", &files, "", &NoProgress)
        .await
        .unwrap();

    assert_eq!(kb.status, ProcessingStatus::Success);
    assert_eq!(kb.total_chunks, 3);
    let stats = engine.collection_stats(&kb.id).await.unwrap().unwrap();
    assert_eq!(stats.count, 3);
}

#[tokio::test]
async fn scenario_c_pending_base_rejects_queries_before_retrieval() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let manager = KnowledgeBaseManager::open(&config.storage.data_dir).unwrap();
    // A record with files promised but never processed stays pending.
    let pending = manager.create("stuck", "u1", "user one", "", 2).unwrap();
    assert_eq!(pending.status, ProcessingStatus::Pending);

    let pool = db::connect(&config.storage.database_path()).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    let embedder = MockEmbedder::new();
    let generator = MockGenerator::new();
    let engine = RagEngine::with_components(
        config,
        manager,
        VectorStore::new(pool),
        embedder.clone(),
        generator.clone(),
    );

    let err = engine
        .query_knowledge_base(&pending.id, "anything", None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("pending"), "err: {}", err);

    // Neither retrieval nor generation was attempted.
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn scenario_d_row_ids_continue_across_batches() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir).await;
    let embedder = MockEmbedder::new();

    store.create_collection("kb_1", Map::new()).await.unwrap();

    let first: Vec<Chunk> = (0..5)
        .map(|i| chunk(&format!("first batch chunk number {}", i), "a.txt"))
        .collect();
    let second: Vec<Chunk> = (0..3)
        .map(|i| chunk(&format!("second batch chunk number {}", i), "b.txt"))
        .collect();

    assert_eq!(
        store
            .add_chunks("kb_1", &first, embedder.as_ref())
            .await
            .unwrap(),
        5
    );
    assert_eq!(
        store
            .add_chunks("kb_1", &second, embedder.as_ref())
            .await
            .unwrap(),
        3
    );

    assert_eq!(store.count("kb_1").await.unwrap(), 8);
    let rows = store.peek("kb_1", 100).await.unwrap();
    let row_ids: Vec<&str> = rows.iter().map(|r| r.row_id.as_str()).collect();
    let expected: Vec<String> = (0..8).map(|i| format!("chunk_{}", i)).collect();
    assert_eq!(row_ids, expected.iter().map(String::as_str).collect::<Vec<_>>());
}

// ============ Creation, querying, deletion ============

#[tokio::test]
async fn create_then_query_returns_ranked_scored_chunks() {
    let dir = TempDir::new().unwrap();
    let embedder = MockEmbedder::new();
    let generator = MockGenerator::new();
    let engine = engine_with(&dir, embedder.clone(), generator.clone()).await;

    let files = vec![
        write_file(&dir, "rust.md", "Rust programs manage memory through ownership and borrowing rules enforced at compile time."),
        write_file(&dir, "python.md", "Python relies on reference counting and a cycle-detecting garbage collector at runtime."),
    ];

    let kb = engine
        .create_knowledge_base("langs", "u1", "user one", &files, "memory notes", &NoProgress)
        .await
        .unwrap();
    assert_eq!(kb.status, ProcessingStatus::Success);
    assert!(kb.is_queryable());

    let response = engine
        .query_knowledge_base(&kb.id, "ownership and borrowing", None)
        .await
        .unwrap();

    assert_eq!(response.kb_name, "langs");
    assert_eq!(response.retrieved_count, response.chunks.len());
    assert!(response.retrieved_count >= 1 && response.retrieved_count <= 3);
    assert_eq!(
        response.answer,
        format!("mock answer from {} chunks", response.retrieved_count)
    );

    for chunk in &response.chunks {
        assert!(chunk.score > 0.0 && chunk.score <= 1.0);
        assert!(chunk.distance >= 0.0);
        assert_eq!(chunk.metadata["kb_id"], Value::from(kb.id.as_str()));
        assert_eq!(chunk.metadata["kb_name"], Value::from("langs"));
    }
    for pair in response.chunks.windows(2) {
        assert!(pair[0].score >= pair[1].score, "scores must be non-increasing");
    }
}

#[tokio::test]
async fn unknown_id_is_rejected_by_name() {
    let dir = TempDir::new().unwrap();
    let engine = engine_with(&dir, MockEmbedder::new(), MockGenerator::new()).await;
    let err = engine
        .query_knowledge_base("missing_id", "q", None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("missing_id"));
    assert!(err.to_string().contains("not found"));
}

#[tokio::test]
async fn delete_is_idempotent_and_removes_the_collection() {
    let dir = TempDir::new().unwrap();
    let engine = engine_with(&dir, MockEmbedder::new(), MockGenerator::new()).await;

    let files = vec![write_file(
        &dir,
        "only.txt",
        "A single document with enough text to produce at least one chunk.",
    )];
    let kb = engine
        .create_knowledge_base("doomed", "u1", "user one", &files, "", &NoProgress)
        .await
        .unwrap();

    assert_eq!(engine.list_collections().await.unwrap(), vec![kb.id.clone()]);
    assert!(engine.delete_knowledge_base(&kb.id).await.unwrap());
    assert!(engine.list_collections().await.unwrap().is_empty());
    assert!(engine.get_knowledge_base(&kb.id).is_none());

    // Second delete: record gone (false), collection delete still safe.
    assert!(!engine.delete_knowledge_base(&kb.id).await.unwrap());
}

#[tokio::test]
async fn system_fault_forces_failed_and_propagates() {
    let dir = TempDir::new().unwrap();
    let engine = engine_with(&dir, Arc::new(FailingEmbedder), MockGenerator::new()).await;

    let files = vec![write_file(
        &dir,
        "fine.txt",
        "This file converts and chunks perfectly well; only embedding will fail.",
    )];
    let err = engine
        .create_knowledge_base("broken", "u1", "user one", &files, "", &NoProgress)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("offline"), "err: {}", err);

    let kbs = engine.list_knowledge_bases("u1");
    assert_eq!(kbs.len(), 1);
    let kb = &kbs[0];
    // The file itself succeeded; the forced status must survive anyway.
    assert_eq!(kb.processed_files, 1);
    assert_eq!(kb.failed_files, 0);
    assert_eq!(kb.status, ProcessingStatus::Failed);
    assert!(kb.attempted_files() <= kb.total_files);
    assert!(kb.errors.iter().any(|e| e.filename == "system"));
}

#[tokio::test]
async fn empty_batch_stays_pending() {
    let dir = TempDir::new().unwrap();
    let engine = engine_with(&dir, MockEmbedder::new(), MockGenerator::new()).await;

    let kb = engine
        .create_knowledge_base("empty", "u1", "user one", &[], "", &NoProgress)
        .await
        .unwrap();
    assert_eq!(kb.total_files, 0);
    assert_eq!(kb.status, ProcessingStatus::Pending);
}

#[tokio::test]
async fn progress_events_follow_input_order() {
    let dir = TempDir::new().unwrap();
    let engine = engine_with(&dir, MockEmbedder::new(), MockGenerator::new()).await;

    let files = vec![
        write_file(&dir, "one.txt", "First file with a comfortable amount of text inside."),
        write_file(&dir, "two.txt", "Second file with a comfortable amount of text inside."),
        write_file(&dir, "three.txt", "Third file with a comfortable amount of text inside."),
    ];

    let reporter = RecordingReporter(Mutex::new(Vec::new()));
    engine
        .create_knowledge_base("ordered", "u1", "user one", &files, "", &reporter)
        .await
        .unwrap();

    let events = reporter.0.lock().unwrap();
    let file_events: Vec<(String, usize, usize)> = events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::File {
                filename,
                index,
                total,
            } => Some((filename.clone(), *index, *total)),
            _ => None,
        })
        .collect();
    assert_eq!(
        file_events,
        vec![
            ("one.txt".to_string(), 1, 3),
            ("two.txt".to_string(), 2, 3),
            ("three.txt".to_string(), 3, 3),
        ]
    );
}

#[tokio::test]
async fn summarize_uses_indexed_chunks() {
    let dir = TempDir::new().unwrap();
    let engine = engine_with(&dir, MockEmbedder::new(), MockGenerator::new()).await;

    let files = vec![write_file(
        &dir,
        "doc.txt",
        "A document with enough content to produce a chunk for summarization.",
    )];
    let kb = engine
        .create_knowledge_base("sum", "u1", "user one", &files, "", &NoProgress)
        .await
        .unwrap();

    let summary = engine.summarize_knowledge_base(&kb.id).await.unwrap();
    assert_eq!(summary, "mock summary of 1 chunks");
}

// ============ Vector store behavior ============

#[tokio::test]
async fn recreating_a_collection_drops_old_rows() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir).await;
    let embedder = MockEmbedder::new();

    store.create_collection("kb_x", Map::new()).await.unwrap();
    let chunks = vec![chunk("some content from the first incarnation", "a.txt")];
    store
        .add_chunks("kb_x", &chunks, embedder.as_ref())
        .await
        .unwrap();
    assert_eq!(store.count("kb_x").await.unwrap(), 1);

    // Idempotent re-creation, not additive.
    store.create_collection("kb_x", Map::new()).await.unwrap();
    assert_eq!(store.count("kb_x").await.unwrap(), 0);
}

#[tokio::test]
async fn empty_collection_metadata_gets_a_default_description() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir).await;

    store.create_collection("kb_meta", Map::new()).await.unwrap();
    let stats = store.stats("kb_meta").await.unwrap().unwrap();
    assert!(stats.metadata["description"]
        .as_str()
        .unwrap()
        .contains("kb_meta"));
    assert_eq!(stats.count, 0);
}

#[tokio::test]
async fn stats_for_missing_collection_is_none() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir).await;
    assert!(store.stats("nope").await.unwrap().is_none());
}

#[tokio::test]
async fn add_chunks_to_missing_collection_is_a_lookup_error() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir).await;
    let embedder = MockEmbedder::new();
    let err = store
        .add_chunks("ghost", &[chunk("content", "a.txt")], embedder.as_ref())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("ghost"));
    assert!(err.to_string().contains("not found"));
}

#[tokio::test]
async fn delete_collection_is_safe_twice() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir).await;
    store.create_collection("kb_gone", Map::new()).await.unwrap();
    store.delete_collection("kb_gone").await.unwrap();
    store.delete_collection("kb_gone").await.unwrap();
    store.delete_collection("never_existed").await.unwrap();
}

#[tokio::test]
async fn metadata_filter_restricts_matches() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir).await;
    let embedder = MockEmbedder::new();

    store.create_collection("kb_f", Map::new()).await.unwrap();
    let chunks = vec![
        chunk("content from the first file", "a.txt"),
        chunk("content from the second file", "b.txt"),
        chunk("more content from the second file", "b.txt"),
    ];
    store
        .add_chunks("kb_f", &chunks, embedder.as_ref())
        .await
        .unwrap();

    let mut filter = Map::new();
    filter.insert("filename".to_string(), Value::from("b.txt"));
    let query = mock_vector("content");
    let matches = store
        .nearest("kb_f", &query, 10, Some(&filter))
        .await
        .unwrap();
    assert_eq!(matches.len(), 2);
    for m in &matches {
        assert_eq!(m.metadata["filename"], Value::from("b.txt"));
    }

    let unfiltered = store.nearest("kb_f", &query, 10, None).await.unwrap();
    assert_eq!(unfiltered.len(), 3);
    for pair in unfiltered.windows(2) {
        assert!(pair[0].distance <= pair[1].distance);
    }
}

#[tokio::test]
async fn identical_query_retrieves_identical_ranking() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir).await;
    let embedder = MockEmbedder::new();

    store.create_collection("kb_det", Map::new()).await.unwrap();
    let chunks: Vec<Chunk> = (0..6)
        .map(|i| chunk(&format!("document text variant number {}", i), "a.txt"))
        .collect();
    store
        .add_chunks("kb_det", &chunks, embedder.as_ref())
        .await
        .unwrap();

    let query = mock_vector("document text");
    let first = store.nearest("kb_det", &query, 4, None).await.unwrap();
    let second = store.nearest("kb_det", &query, 4, None).await.unwrap();
    let ids = |rows: &[knowledge_harness::vector_store::RowMatch]| {
        rows.iter().map(|r| r.row_id.clone()).collect::<Vec<_>>()
    };
    assert_eq!(ids(&first), ids(&second));
}

// ============ Durability ============

#[tokio::test]
async fn records_survive_manager_reload() {
    let dir = TempDir::new().unwrap();
    let engine = engine_with(&dir, MockEmbedder::new(), MockGenerator::new()).await;

    let files = vec![
        write_file(&dir, "keep.txt", "Durable content that should survive a process restart."),
        write_file(&dir, "empty.txt", ""),
    ];
    let kb = engine
        .create_knowledge_base("durable", "u1", "user one", &files, "d", &NoProgress)
        .await
        .unwrap();

    let reopened = KnowledgeBaseManager::open(&dir.path().join("data")).unwrap();
    let restored = reopened.get(&kb.id).unwrap();
    assert_eq!(restored, kb);
    assert_eq!(restored.status, ProcessingStatus::Partial);
    assert_eq!(restored.files.len(), 1);
    assert_eq!(restored.errors.len(), 1);
}
