//! Answer generation from retrieved context.
//!
//! The [`AnswerGenerator`] sits at the end of an already-deferred interactive
//! response, so it fails soft: both operations return an explanatory string
//! instead of an error when the backing model is unreachable or disabled.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::GenerationConfig;
use crate::models::ScoredChunk;

/// Generates natural-language answers from a query and its retrieved
/// context chunks.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    fn model_name(&self) -> &str;

    /// Answer `query` using only the supplied context. Never errors.
    async fn generate(
        &self,
        query: &str,
        context: &[ScoredChunk],
        temperature: f32,
        max_tokens: u32,
    ) -> String;

    /// Summarize a document from a sample of its chunks. Never errors.
    async fn summarize(&self, chunks: &[ScoredChunk]) -> String;
}

/// Create the appropriate [`AnswerGenerator`] based on configuration.
pub fn create_generator(config: &GenerationConfig) -> anyhow::Result<Arc<dyn AnswerGenerator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        other => anyhow::bail!("Unknown generation provider: {}", other),
    }
}

// ============ Disabled Generator ============

/// Placeholder generator for installations without a language model. The
/// retrieval pipeline still works; answers just point at the raw context.
pub struct DisabledGenerator;

#[async_trait]
impl AnswerGenerator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(
        &self,
        _query: &str,
        context: &[ScoredChunk],
        _temperature: f32,
        _max_tokens: u32,
    ) -> String {
        format!(
            "Answer generation is disabled; {} context chunk(s) were retrieved. \
             Set [generation] provider in the config to enable answers.",
            context.len()
        )
    }

    async fn summarize(&self, _chunks: &[ScoredChunk]) -> String {
        "Answer generation is disabled; no summary available.".to_string()
    }
}

// ============ Ollama Generator ============

/// Answer generator using a local Ollama server (`POST /api/generate`).
pub struct OllamaGenerator {
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for Ollama provider"))?;
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn complete(&self, prompt: String, temperature: f32, max_tokens: u32) -> anyhow::Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": temperature,
                "num_predict": max_tokens,
            }
        });

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            anyhow::bail!("generation API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        json.get("response")
            .and_then(|r| r.as_str())
            .map(|s| s.trim().to_string())
            .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing response field"))
    }
}

#[async_trait]
impl AnswerGenerator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        query: &str,
        context: &[ScoredChunk],
        temperature: f32,
        max_tokens: u32,
    ) -> String {
        let prompt = build_answer_prompt(query, context);
        match self.complete(prompt, temperature, max_tokens).await {
            Ok(answer) => answer,
            Err(e) => format!(
                "Error generating answer: {}. Make sure Ollama is running (ollama serve).",
                e
            ),
        }
    }

    async fn summarize(&self, chunks: &[ScoredChunk]) -> String {
        let prompt = build_summary_prompt(chunks);
        match self.complete(prompt, 0.7, 200).await {
            Ok(summary) => summary,
            Err(e) => format!("Error generating summary: {}", e),
        }
    }
}

// ============ Prompt assembly ============

/// Numbered source blocks from retrieved chunks, most relevant first.
fn build_context(chunks: &[ScoredChunk]) -> String {
    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            let source = chunk
                .metadata
                .get("filename")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");
            format!("[Source {}: {}]\n{}", i + 1, source, chunk.content)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn build_answer_prompt(query: &str, chunks: &[ScoredChunk]) -> String {
    let context = build_context(chunks);
    format!(
        "You are a helpful assistant answering questions about a user's documents.\n\
         \n\
         RULES:\n\
         1. Answer ONLY using information from the context below.\n\
         2. If the answer is not in the context, say \"I don't have that information in the knowledge base.\"\n\
         3. Keep answers concise and helpful (2-4 sentences).\n\
         4. Cite the source number when referencing specific information.\n\
         \n\
         CONTEXT FROM KNOWLEDGE BASE:\n\
         {}\n\
         \n\
         QUESTION: {}\n\
         \n\
         ANSWER:",
        context, query
    )
}

/// Up to five chunks are enough to characterize a document.
const SUMMARY_SAMPLE_CHUNKS: usize = 5;

fn build_summary_prompt(chunks: &[ScoredChunk]) -> String {
    let sample: Vec<&str> = chunks
        .iter()
        .take(SUMMARY_SAMPLE_CHUNKS)
        .map(|c| c.content.as_str())
        .collect();
    format!(
        "Based on the following excerpts from a document, provide a clear, concise \
         summary of what the document is about.\n\
         \n\
         Focus on:\n\
         1. Main topic/subject\n\
         2. Key points or findings\n\
         3. Purpose of the document\n\
         \n\
         Document excerpts:\n\
         {}\n\
         \n\
         Provide a 2-3 sentence summary of what this document is about:",
        sample.join("\n\n")
    )
}
