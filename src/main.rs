//! # Knowledge Harness CLI (`kbx`)
//!
//! The `kbx` binary is the primary interface for Knowledge Harness. It
//! provides commands for initializing the data directory, building knowledge
//! bases from document batches, asking questions against them, and managing
//! their lifecycle.
//!
//! ## Usage
//!
//! ```bash
//! kbx --config ./config/kbx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kbx init` | Create the data directory and vector database |
//! | `kbx create <name> --file <path>...` | Build a knowledge base from files |
//! | `kbx ask <kb> "<question>"` | Retrieve context and generate an answer |
//! | `kbx list` | List an owner's knowledge bases |
//! | `kbx stats <kb>` | Show counters, errors, and collection stats |
//! | `kbx summary <kb>` | Generate a document summary from indexed chunks |
//! | `kbx delete <kb>` | Delete the record and its vector collection |
//! | `kbx collections` | List vector collections (including orphans) |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the store
//! kbx init --config ./config/kbx.toml
//!
//! # Build a knowledge base from three documents
//! kbx create handbook --file intro.pdf --file rules.docx --file faq.md
//!
//! # Ask a question (requires status success)
//! kbx ask handbook "what is the refund policy?"
//!
//! # Inspect processing outcomes
//! kbx stats handbook
//! ```

use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use knowledge_harness::config;
use knowledge_harness::convert;
use knowledge_harness::engine::RagEngine;
use knowledge_harness::knowledge_base::KnowledgeBase;
use knowledge_harness::progress::ProgressMode;

/// Knowledge Harness CLI — a local-first RAG knowledge-base framework.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/kbx.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "kbx",
    about = "Knowledge Harness — a local-first RAG knowledge-base framework for AI tools",
    version,
    long_about = "Knowledge Harness ingests batches of documents (PDF, DOCX, text, Markdown) \
    into named, owned knowledge bases, chunks and embeds them into SQLite vector collections, \
    and answers natural-language questions with retrieval-augmented generation."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/kbx.toml`. Storage, chunking, retrieval,
    /// embedding, and generation settings are read from this file.
    #[arg(long, global = true, default_value = "./config/kbx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory and vector database.
    ///
    /// Creates the SQLite database, its schema, and the knowledge-base
    /// table file. This command is idempotent — running it multiple times
    /// is safe.
    Init,

    /// Build a knowledge base from a batch of files.
    ///
    /// Converts each file to text, chunks it, embeds the chunks, and
    /// indexes them in a fresh vector collection. One file's failure never
    /// aborts the batch; the final status reflects partial success.
    Create {
        /// Knowledge base name. Names are not required to be unique;
        /// a reused name gets a warning and a distinct id.
        name: String,

        /// Input file (repeatable). Recognized: .pdf, .docx, .txt, .md.
        #[arg(long = "file", required = true)]
        files: Vec<PathBuf>,

        /// Optional description stored on the record.
        #[arg(long, default_value = "")]
        description: String,

        /// Owner id the knowledge base is scoped to.
        #[arg(long, default_value = "local")]
        owner: String,

        /// Display name for the owner (defaults to the owner id).
        #[arg(long)]
        owner_name: Option<String>,

        /// Progress reporting: `off`, `human`, or `json` (stderr).
        /// Defaults to `human` when stderr is a TTY, otherwise `off`.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Ask a question against a knowledge base.
    ///
    /// Retrieves the top-k most relevant chunks and generates an answer
    /// from them. Only knowledge bases with status `success` are queryable.
    Ask {
        /// Knowledge base name (resolved per owner) or id.
        kb: String,

        /// The question to answer.
        query: String,

        /// Owner id to resolve the name under.
        #[arg(long, default_value = "local")]
        owner: String,

        /// Number of chunks to retrieve (default from config).
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// List an owner's knowledge bases.
    List {
        /// Owner id to list for.
        #[arg(long, default_value = "local")]
        owner: String,
    },

    /// Show a knowledge base's counters, file outcomes, and collection stats.
    Stats {
        /// Knowledge base name (resolved per owner) or id.
        kb: String,

        /// Owner id to resolve the name under.
        #[arg(long, default_value = "local")]
        owner: String,
    },

    /// Generate a short summary of a knowledge base's content.
    ///
    /// Samples up to five indexed chunks and asks the generation model to
    /// summarize them.
    Summary {
        /// Knowledge base name (resolved per owner) or id.
        kb: String,

        /// Owner id to resolve the name under.
        #[arg(long, default_value = "local")]
        owner: String,
    },

    /// Delete a knowledge base and its vector collection.
    ///
    /// The collection is deleted first (best-effort), then the record.
    Delete {
        /// Knowledge base name (resolved per owner) or id.
        kb: String,

        /// Owner id to resolve the name under.
        #[arg(long, default_value = "local")]
        owner: String,
    },

    /// List all vector collections, including orphans whose record is gone.
    Collections,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let engine = RagEngine::new(cfg.clone()).await?;
            drop(engine);
            println!("data dir: {}", cfg.storage.data_dir.display());
            println!("database: {}", cfg.storage.database_path().display());
            println!("Knowledge store initialized successfully.");
        }
        Commands::Create {
            name,
            files,
            description,
            owner,
            owner_name,
            progress,
        } => {
            let engine = RagEngine::new(cfg).await?;
            run_create(
                &engine,
                &name,
                &files,
                &description,
                &owner,
                owner_name.as_deref(),
                progress.as_deref(),
            )
            .await?;
        }
        Commands::Ask {
            kb,
            query,
            owner,
            top_k,
        } => {
            let engine = RagEngine::new(cfg).await?;
            let record = resolve_kb(&engine, &owner, &kb)?;
            let response = engine.query_knowledge_base(&record.id, &query, top_k).await?;

            println!("{}", response.answer);
            if !response.chunks.is_empty() {
                println!();
                println!("  sources ({} retrieved):", response.retrieved_count);
                for (i, chunk) in response.chunks.iter().enumerate() {
                    let filename = chunk
                        .metadata
                        .get("filename")
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown");
                    let position = match (
                        chunk.metadata.get("chunk_index").and_then(|v| v.as_u64()),
                        chunk.metadata.get("total_chunks").and_then(|v| v.as_u64()),
                    ) {
                        (Some(index), Some(total)) => {
                            format!(" (chunk {} of {})", index + 1, total)
                        }
                        _ => String::new(),
                    };
                    println!("  {}. [{:.2}] {}{}", i + 1, chunk.score, filename, position);
                }
            }
        }
        Commands::List { owner } => {
            let engine = RagEngine::new(cfg).await?;
            let kbs = engine.list_knowledge_bases(&owner);
            if kbs.is_empty() {
                println!("No knowledge bases.");
            } else {
                println!("knowledge bases for {} ({})", owner, kbs.len());
                println!(
                    "  {:<24} {:<12} {:>5} {:>7}   {}",
                    "NAME", "STATUS", "FILES", "CHUNKS", "CREATED"
                );
                for kb in &kbs {
                    println!(
                        "  {:<24} {:<12} {:>5} {:>7}   {}",
                        kb.name,
                        kb.status.to_string(),
                        kb.total_files,
                        kb.total_chunks,
                        kb.created_at.format("%Y-%m-%d %H:%M")
                    );
                }
            }
        }
        Commands::Stats { kb, owner } => {
            let engine = RagEngine::new(cfg).await?;
            let record = resolve_kb(&engine, &owner, &kb)?;
            print_stats(&engine, &record).await?;
        }
        Commands::Summary { kb, owner } => {
            let engine = RagEngine::new(cfg).await?;
            let record = resolve_kb(&engine, &owner, &kb)?;
            let summary = engine.summarize_knowledge_base(&record.id).await?;
            println!("{}", summary);
        }
        Commands::Delete { kb, owner } => {
            let engine = RagEngine::new(cfg).await?;
            let record = resolve_kb(&engine, &owner, &kb)?;
            if engine.delete_knowledge_base(&record.id).await? {
                println!("Deleted knowledge base '{}'.", record.name);
            } else {
                println!("Knowledge base '{}' was already gone.", record.name);
            }
        }
        Commands::Collections => {
            let engine = RagEngine::new(cfg).await?;
            let collections = engine.list_collections().await?;
            if collections.is_empty() {
                println!("No collections.");
            } else {
                for id in collections {
                    println!("{}", id);
                }
            }
        }
    }

    Ok(())
}

async fn run_create(
    engine: &RagEngine,
    name: &str,
    files: &[PathBuf],
    description: &str,
    owner: &str,
    owner_name: Option<&str>,
    progress: Option<&str>,
) -> Result<()> {
    let owner_name = owner_name.unwrap_or(owner);

    // Front-end validation: warn early, but let the pipeline record the
    // per-file outcome either way.
    for file in files {
        if !file.exists() {
            eprintln!("Warning: {} does not exist", file.display());
        } else if !convert::is_supported(file) {
            eprintln!(
                "Warning: {} has an unsupported file type and will fail",
                file.display()
            );
        }
    }
    if engine.find_knowledge_base(owner, name).is_some() {
        eprintln!(
            "Warning: owner '{}' already has a knowledge base named '{}'; creating another",
            owner, name
        );
    }

    let mode = match progress {
        None => ProgressMode::default_for_tty(),
        Some("off") => ProgressMode::Off,
        Some("human") => ProgressMode::Human,
        Some("json") => ProgressMode::Json,
        Some(other) => bail!("Unknown progress mode: {}. Use off, human, or json.", other),
    };
    let reporter = mode.reporter();

    let kb = engine
        .create_knowledge_base(
            name,
            owner,
            owner_name,
            files,
            description,
            reporter.as_ref(),
        )
        .await?;

    println!("create {}", kb.name);
    println!("  files: {}", kb.total_files);
    println!("  processed: {}", kb.processed_files);
    println!("  failed: {}", kb.failed_files);
    println!("  chunks: {}", kb.total_chunks);
    println!("  status: {}", kb.status);
    println!("  id: {}", kb.id);
    for error in &kb.errors {
        println!("  error: {}: {}", error.filename, error.error);
    }
    println!("ok");
    Ok(())
}

async fn print_stats(engine: &RagEngine, kb: &KnowledgeBase) -> Result<()> {
    println!("{} ({})", kb.name, kb.id);
    println!("  owner: {} ({})", kb.owner_name, kb.owner_id);
    if !kb.description.is_empty() {
        println!("  description: {}", kb.description);
    }
    println!("  status: {}", kb.status);
    println!("  progress: {}%", kb.progress_percentage());
    println!(
        "  files: {} total, {} processed, {} failed",
        kb.total_files, kb.processed_files, kb.failed_files
    );
    println!("  chunks: {}", kb.total_chunks);
    println!("  created: {}", kb.created_at.format("%Y-%m-%d %H:%M:%S"));
    println!("  updated: {}", kb.updated_at.format("%Y-%m-%d %H:%M:%S"));

    match engine.collection_stats(&kb.id).await? {
        Some(stats) => println!("  collection: {} rows indexed", stats.count),
        None => println!("  collection: missing"),
    }

    if !kb.files.is_empty() {
        println!("  file outcomes:");
        for record in &kb.files {
            println!(
                "    {:<32} {:>6} chunks  {:>8} bytes  {:.2}s",
                record.filename, record.chunks, record.file_size, record.processing_time_secs
            );
        }
    }
    if !kb.errors.is_empty() {
        println!("  errors:");
        for error in &kb.errors {
            println!("    {}: {}", error.filename, error.error);
        }
    }

    Ok(())
}

fn resolve_kb(engine: &RagEngine, owner: &str, name_or_id: &str) -> Result<KnowledgeBase> {
    engine
        .find_knowledge_base(owner, name_or_id)
        .or_else(|| engine.get_knowledge_base(name_or_id))
        .ok_or_else(|| {
            anyhow!(
                "no knowledge base named '{}' for owner '{}'",
                name_or_id,
                owner
            )
        })
}
