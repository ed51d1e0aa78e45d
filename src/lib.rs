//! # Knowledge Harness
//!
//! A local-first RAG knowledge-base framework for AI tools.
//!
//! Knowledge Harness turns a batch of heterogeneous documents into a named,
//! owned, queryable knowledge base: files are converted to text, chunked,
//! embedded, and indexed in SQLite, with per-file partial-failure tracking on
//! a durable record. Questions are answered by retrieving the top-ranked
//! chunks and handing them to a generation model.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────────────┐   ┌───────────┐
//! │   Files   │──▶│ Convert+Chunk+Embed  │──▶│  SQLite    │
//! │ pdf docx  │   │   (file processor)   │   │ collections│
//! │ txt md    │   └──────────┬───────────┘   └─────┬─────┘
//! └───────────┘              │                     │
//!                    ┌───────▼────────┐     ┌──────▼─────┐
//!                    │ KB record      │     │ Retriever  │
//!                    │ (JSON table)   │     │ + Generator│
//!                    └────────────────┘     └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! kbx init                                  # create data dir + database
//! kbx create notes --file a.pdf --file b.md # build a knowledge base
//! kbx ask notes "what is chapter 2 about?"  # retrieve + generate
//! kbx list                                  # show your knowledge bases
//! kbx delete notes                          # drop record + collection
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`knowledge_base`] | KB record and status state machine |
//! | [`manager`] | Durable KB table, CRUD + lookups |
//! | [`chunker`] | Recursive character chunking |
//! | [`convert`] | Document-to-text conversion |
//! | [`processor`] | Per-file pipeline + batch orchestration |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`generation`] | Answer generation abstraction |
//! | [`vector_store`] | SQLite vector collections |
//! | [`retriever`] | Nearest-neighbor retrieval + scoring |
//! | [`engine`] | Top-level orchestration |
//! | [`progress`] | Ingest progress reporting |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunker;
pub mod config;
pub mod convert;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod generation;
pub mod knowledge_base;
pub mod manager;
pub mod migrate;
pub mod models;
pub mod processor;
pub mod progress;
pub mod retriever;
pub mod vector_store;
