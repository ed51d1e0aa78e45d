//! RAG engine orchestration.
//!
//! Composes the knowledge-base manager, file processor, vector store,
//! retriever, and answer generator into the top-level operations: create a
//! knowledge base from a batch of files, query it, delete it.
//!
//! Operation order during creation is fixed: create record → create
//! collection → process files → index chunks → persist final status. During
//! deletion it is the mirror image: delete collection first (best-effort),
//! then the record — a crash in between leaves an orphaned record, never an
//! unowned collection.

use anyhow::{anyhow, bail, Result};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;

use crate::chunker::TextChunker;
use crate::config::Config;
use crate::db;
use crate::embedding::{self, EmbeddingProvider};
use crate::generation::{self, AnswerGenerator};
use crate::knowledge_base::KnowledgeBase;
use crate::manager::KnowledgeBaseManager;
use crate::migrate;
use crate::models::{CollectionStats, QueryResponse};
use crate::processor::FileProcessor;
use crate::progress::ProgressReporter;
use crate::retriever::Retriever;
use crate::vector_store::VectorStore;

pub struct RagEngine {
    config: Config,
    manager: KnowledgeBaseManager,
    store: VectorStore,
    provider: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn AnswerGenerator>,
    processor: FileProcessor,
}

impl RagEngine {
    /// Build an engine from configuration: opens the manager table, connects
    /// the vector database (creating the schema if needed), and instantiates
    /// the configured embedding and generation providers.
    pub async fn new(config: Config) -> Result<Self> {
        let manager = KnowledgeBaseManager::open(&config.storage.data_dir)?;
        let pool = db::connect(&config.storage.database_path()).await?;
        migrate::run_migrations(&pool).await?;
        let store = VectorStore::new(pool);
        let provider = embedding::create_provider(&config.embedding)?;
        let generator = generation::create_generator(&config.generation)?;
        Ok(Self::with_components(
            config, manager, store, provider, generator,
        ))
    }

    /// Build an engine from explicit components. Used by tests and by
    /// embedders that supply their own providers.
    pub fn with_components(
        config: Config,
        manager: KnowledgeBaseManager,
        store: VectorStore,
        provider: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn AnswerGenerator>,
    ) -> Self {
        let processor = FileProcessor::new(
            TextChunker::new(config.chunking.chunk_size, config.chunking.chunk_overlap),
            config.limits.max_file_size_mb,
        );
        Self {
            config,
            manager,
            store,
            provider,
            generator,
            processor,
        }
    }

    /// Create a knowledge base from a batch of files.
    ///
    /// Per-file failures are recorded on the record and never abort the
    /// batch; the returned record reflects partial success. A fault in the
    /// orchestration itself (collection creation, indexing) is recorded as a
    /// system-level error, the record is forced to `failed`, and the error
    /// is re-raised — the one path where a failure is both recorded and
    /// propagated.
    pub async fn create_knowledge_base(
        &self,
        name: &str,
        owner_id: &str,
        owner_name: &str,
        file_paths: &[PathBuf],
        description: &str,
        reporter: &dyn ProgressReporter,
    ) -> Result<KnowledgeBase> {
        let mut kb = self.manager.create(
            name,
            owner_id,
            owner_name,
            description,
            file_paths.len() as u32,
        )?;

        match self
            .build_collection(&mut kb, file_paths, reporter)
            .await
        {
            Ok(()) => self.manager.update(kb),
            Err(e) => {
                kb.add_system_error(format!("failed to create knowledge base: {:#}", e));
                if let Err(persist) = self.manager.mark_failed(kb) {
                    eprintln!("Warning: failed to persist failure status: {}", persist);
                }
                Err(e)
            }
        }
    }

    async fn build_collection(
        &self,
        kb: &mut KnowledgeBase,
        file_paths: &[PathBuf],
        reporter: &dyn ProgressReporter,
    ) -> Result<()> {
        let mut collection_metadata = Map::new();
        collection_metadata.insert("kb_id".to_string(), Value::from(kb.id.as_str()));
        collection_metadata.insert("name".to_string(), Value::from(kb.name.as_str()));
        collection_metadata.insert("owner_id".to_string(), Value::from(kb.owner_id.as_str()));
        collection_metadata.insert(
            "description".to_string(),
            Value::from(kb.description.as_str()),
        );
        self.store
            .create_collection(&kb.id, collection_metadata)
            .await?;

        let mut base_metadata = Map::new();
        base_metadata.insert("kb_id".to_string(), Value::from(kb.id.as_str()));
        base_metadata.insert("kb_name".to_string(), Value::from(kb.name.as_str()));

        let chunks = self
            .processor
            .process_files(file_paths, kb, &base_metadata, reporter)
            .await;

        if !chunks.is_empty() {
            self.store
                .add_chunks(&kb.id, &chunks, self.provider.as_ref())
                .await?;
        }

        Ok(())
    }

    /// Query a knowledge base: retrieve the top-k chunks, then generate an
    /// answer from them.
    ///
    /// Rejects unknown ids and any status other than `success` — a pending,
    /// processing, partial, or failed base is not queryable, and the error
    /// names its current status.
    pub async fn query_knowledge_base(
        &self,
        kb_id: &str,
        query: &str,
        top_k: Option<usize>,
    ) -> Result<QueryResponse> {
        let kb = self
            .manager
            .get(kb_id)
            .ok_or_else(|| anyhow!("knowledge base '{}' not found", kb_id))?;

        if !kb.is_queryable() {
            bail!(
                "knowledge base '{}' is {}, cannot query",
                kb.name,
                kb.status
            );
        }

        let retriever = Retriever::new(
            &self.store,
            self.provider.as_ref(),
            &kb.id,
            self.config.retrieval.top_k,
        );
        let chunks = retriever.retrieve(query, top_k, None).await?;

        let answer = self
            .generator
            .generate(
                query,
                &chunks,
                self.config.generation.temperature,
                self.config.generation.max_tokens,
            )
            .await;

        Ok(QueryResponse {
            kb_id: kb.id,
            kb_name: kb.name,
            query: query.to_string(),
            answer,
            retrieved_count: chunks.len(),
            chunks,
        })
    }

    /// Delete a knowledge base: vector collection first (best-effort — a
    /// missing collection is not an error), then the manager record.
    /// Returns the manager's result: `false` when the record was absent.
    pub async fn delete_knowledge_base(&self, kb_id: &str) -> Result<bool> {
        if let Err(e) = self.store.delete_collection(kb_id).await {
            eprintln!("Warning: failed to delete vector collection {}: {}", kb_id, e);
        }
        self.manager.delete(kb_id)
    }

    pub fn get_knowledge_base(&self, kb_id: &str) -> Option<KnowledgeBase> {
        self.manager.get(kb_id)
    }

    pub fn list_knowledge_bases(&self, owner_id: &str) -> Vec<KnowledgeBase> {
        self.manager.list_for_owner(owner_id)
    }

    pub fn find_knowledge_base(&self, owner_id: &str, name: &str) -> Option<KnowledgeBase> {
        self.manager.find_by_owner_and_name(owner_id, name)
    }

    /// Row count and metadata of the knowledge base's vector collection;
    /// `None` when the collection was never created or already deleted.
    pub async fn collection_stats(&self, kb_id: &str) -> Result<Option<CollectionStats>> {
        if self.manager.get(kb_id).is_none() {
            bail!("knowledge base '{}' not found", kb_id);
        }
        self.store.stats(kb_id).await
    }

    /// All vector collection ids, including any orphans whose record was
    /// deleted out from under them.
    pub async fn list_collections(&self) -> Result<Vec<String>> {
        self.store.list_collections().await
    }

    /// Generate a short summary of a knowledge base's content from a sample
    /// of its indexed chunks. Fail-soft like all generation.
    pub async fn summarize_knowledge_base(&self, kb_id: &str) -> Result<String> {
        let kb = self
            .manager
            .get(kb_id)
            .ok_or_else(|| anyhow!("knowledge base '{}' not found", kb_id))?;

        let rows = self.store.peek(&kb.id, 5).await?;
        if rows.is_empty() {
            bail!("knowledge base '{}' has no indexed content", kb.name);
        }

        let chunks: Vec<crate::models::ScoredChunk> = rows
            .into_iter()
            .map(|r| crate::models::ScoredChunk {
                content: r.content,
                metadata: r.metadata,
                distance: 0.0,
                score: 1.0,
            })
            .collect();

        Ok(self.generator.summarize(&chunks).await)
    }
}
