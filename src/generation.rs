//! Answer generation with an ordered fallback chain.
//!
//! A [`GenerationRouter`] holds zero or more remote [`GenerationBackend`]s
//! followed by an [`ExtractiveSummarizer`]. Backends are tried in order; the
//! first one returning non-empty text wins. A backend that is unreachable,
//! times out, answers with a non-success status, or returns nothing useful
//! is skipped with a warning and the router moves on. The summarizer is not
//! a trait object: it is a separate, infallible terminal step, so the router
//! can never fail.
//!
//! Confidence does not depend on which backend answered. It is always
//! `avg(1 / (1 + distance))` over the evidence, clamped to `[0, 1]`.
//!
//! | `kind` | Backend | Endpoint |
//! |--------|---------|----------|
//! | `"ollama"` | [`OllamaChatBackend`] | `POST {url}/api/chat` |
//! | `"openai"` | [`OpenAIChatBackend`] | `POST {url}/v1/chat/completions` |

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{BackendConfig, GenerationConfig};
use crate::error::GenerationError;
use crate::models::EvidenceItem;

pub const NO_EVIDENCE_ANSWER: &str = "No relevant evidence found in the indexed logs.";
pub const EXTRACTIVE_BACKEND: &str = "extractive";

/// Anything that can turn a query plus evidence into answer text.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Short name used in logs and in [`Answer::backend`](crate::models::Answer).
    fn name(&self) -> &str;

    async fn generate(
        &self,
        query: &str,
        evidence: &[EvidenceItem],
    ) -> Result<String, GenerationError>;
}

/// Result of [`GenerationRouter::generate`].
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub text: String,
    pub confidence: f32,
    pub backend: String,
    /// The last backend failure, when any backend failed before one succeeded.
    pub error: Option<String>,
}

/// `avg(1 / (1 + distance))` clamped to `[0, 1]`; `0.0` without evidence.
pub fn confidence(evidence: &[EvidenceItem]) -> f32 {
    if evidence.is_empty() {
        return 0.0;
    }
    let sum: f32 = evidence
        .iter()
        .map(|e| 1.0 / (1.0 + e.score.max(0.0)))
        .sum();
    (sum / evidence.len() as f32).clamp(0.0, 1.0)
}

/// Evidence ordered nearest first, without reordering the caller's slice.
fn ranked(evidence: &[EvidenceItem]) -> Vec<&EvidenceItem> {
    let mut sorted: Vec<&EvidenceItem> = evidence.iter().collect();
    sorted.sort_by(|a, b| {
        a.score
            .partial_cmp(&b.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    sorted
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

/// Render the prompt sent to remote backends.
pub fn build_prompt(
    query: &str,
    evidence: &[EvidenceItem],
    max_snippets: usize,
    snippet_chars: usize,
) -> String {
    let mut prompt = String::from(
        "You are a log analysis assistant. Answer the question using only the \
         log excerpts below. Cite the source of each fact as [doc_id]. If the \
         excerpts do not contain the answer, say so.\n\n",
    );
    prompt.push_str("Log excerpts:\n");
    for (i, item) in ranked(evidence).into_iter().take(max_snippets).enumerate() {
        prompt.push_str(&format!(
            "{}. [{}] {}\n",
            i + 1,
            item.doc_id,
            truncate_chars(&item.chunk_text, snippet_chars)
        ));
    }
    prompt.push_str(&format!("\nQuestion: {}\nAnswer:", query));
    prompt
}

// ============ Extractive fallback ============

/// Deterministic answer built from the evidence itself.
#[derive(Debug, Clone)]
pub struct ExtractiveSummarizer {
    max_snippets: usize,
    snippet_chars: usize,
}

impl ExtractiveSummarizer {
    pub fn new(max_snippets: usize, snippet_chars: usize) -> Self {
        Self {
            max_snippets,
            snippet_chars,
        }
    }

    pub fn summarize(&self, query: &str, evidence: &[EvidenceItem]) -> String {
        if evidence.is_empty() {
            return NO_EVIDENCE_ANSWER.to_string();
        }

        let mut lines = vec![
            format!("Query: {}", query),
            "Summary (extractive; evidence follows):".to_string(),
        ];
        for (i, item) in ranked(evidence)
            .into_iter()
            .take(self.max_snippets)
            .enumerate()
        {
            lines.push(format!(
                "{}. [{}] {}",
                i + 1,
                item.doc_id,
                truncate_chars(&item.chunk_text, self.snippet_chars)
            ));
        }
        lines.join("\n")
    }
}

// ============ Ollama ============

pub struct OllamaChatBackend {
    name: String,
    model: String,
    url: String,
    client: reqwest::Client,
    max_snippets: usize,
    snippet_chars: usize,
}

impl OllamaChatBackend {
    pub fn new(config: &BackendConfig, generation: &GenerationConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            name: format!("ollama:{}", config.model),
            model: config.model.clone(),
            url: url.trim_end_matches('/').to_string(),
            client,
            max_snippets: generation.max_snippets,
            snippet_chars: generation.snippet_chars,
        })
    }
}

#[async_trait]
impl GenerationBackend for OllamaChatBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        query: &str,
        evidence: &[EvidenceItem],
    ) -> Result<String, GenerationError> {
        let prompt = build_prompt(query, evidence, self.max_snippets, self.snippet_chars);
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "stream": false,
        });

        let json = post_json(
            &self.name,
            self.client.post(format!("{}/api/chat", self.url)).json(&body),
        )
        .await?;
        extract_ollama_text(&json).ok_or_else(|| GenerationError::Empty {
            backend: self.name.clone(),
        })
    }
}

/// Pull answer text out of the response shapes Ollama versions have used.
fn extract_ollama_text(json: &Value) -> Option<String> {
    let candidates = [
        json.pointer("/message/content"),
        json.pointer("/choices/0/message/content"),
        json.pointer("/choices/0/text"),
        json.pointer("/choices/0/content"),
        json.pointer("/response/content"),
        json.pointer("/response/text"),
        json.get("response"),
        json.get("text"),
    ];
    candidates
        .into_iter()
        .flatten()
        .filter_map(|v| v.as_str())
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

// ============ OpenAI ============

/// Chat completions backend. Requires `OPENAI_API_KEY`.
pub struct OpenAIChatBackend {
    name: String,
    model: String,
    url: String,
    api_key: String,
    client: reqwest::Client,
    max_snippets: usize,
    snippet_chars: usize,
}

impl OpenAIChatBackend {
    pub fn new(config: &BackendConfig, generation: &GenerationConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com".to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            name: format!("openai:{}", config.model),
            model: config.model.clone(),
            url: url.trim_end_matches('/').to_string(),
            api_key,
            client,
            max_snippets: generation.max_snippets,
            snippet_chars: generation.snippet_chars,
        })
    }
}

#[async_trait]
impl GenerationBackend for OpenAIChatBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        query: &str,
        evidence: &[EvidenceItem],
    ) -> Result<String, GenerationError> {
        let prompt = build_prompt(query, evidence, self.max_snippets, self.snippet_chars);
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
        });

        let json = post_json(
            &self.name,
            self.client
                .post(format!("{}/v1/chat/completions", self.url))
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body),
        )
        .await?;

        json.pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| GenerationError::Empty {
                backend: self.name.clone(),
            })
    }
}

/// Send a request and decode a JSON body, classifying every failure.
async fn post_json(backend: &str, request: reqwest::RequestBuilder) -> Result<Value, GenerationError> {
    let response = request
        .send()
        .await
        .map_err(|e| GenerationError::from_reqwest(backend, e))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(GenerationError::Status {
            backend: backend.to_string(),
            status: status.as_u16(),
            body: truncate_chars(&body, 500).to_string(),
        });
    }

    response
        .json::<Value>()
        .await
        .map_err(|e| GenerationError::InvalidResponse {
            backend: backend.to_string(),
            message: e.to_string(),
        })
}

// ============ Router ============

pub struct GenerationRouter {
    backends: Vec<Box<dyn GenerationBackend>>,
    fallback: ExtractiveSummarizer,
}

impl GenerationRouter {
    pub fn new(backends: Vec<Box<dyn GenerationBackend>>, fallback: ExtractiveSummarizer) -> Self {
        Self { backends, fallback }
    }

    /// Build the chain described by `[generation]`, in configured order.
    pub fn from_config(config: &GenerationConfig) -> Result<Self> {
        let mut backends: Vec<Box<dyn GenerationBackend>> = Vec::new();
        for backend in &config.backends {
            match backend.kind.as_str() {
                "ollama" => backends.push(Box::new(OllamaChatBackend::new(backend, config)?)),
                "openai" => backends.push(Box::new(OpenAIChatBackend::new(backend, config)?)),
                other => bail!("Unknown generation backend kind: {}", other),
            }
        }
        Ok(Self::new(
            backends,
            ExtractiveSummarizer::new(config.max_snippets, config.snippet_chars),
        ))
    }

    /// Names of the chain in order, ending with the extractive fallback.
    pub fn chain(&self) -> Vec<String> {
        self.backends
            .iter()
            .map(|b| b.name().to_string())
            .chain(std::iter::once(EXTRACTIVE_BACKEND.to_string()))
            .collect()
    }

    /// Produce an answer. Never fails.
    pub async fn generate(&self, query: &str, evidence: &[EvidenceItem]) -> GenerationOutcome {
        let confidence = confidence(evidence);

        if evidence.is_empty() {
            return GenerationOutcome {
                text: NO_EVIDENCE_ANSWER.to_string(),
                confidence,
                backend: EXTRACTIVE_BACKEND.to_string(),
                error: None,
            };
        }

        let mut last_error: Option<String> = None;
        for backend in &self.backends {
            match backend.generate(query, evidence).await {
                Ok(text) if !text.trim().is_empty() => {
                    debug!(backend = backend.name(), "generation succeeded");
                    return GenerationOutcome {
                        text,
                        confidence,
                        backend: backend.name().to_string(),
                        error: last_error,
                    };
                }
                Ok(_) => {
                    let err = GenerationError::Empty {
                        backend: backend.name().to_string(),
                    };
                    warn!(error = %err, "generation backend failed, falling through");
                    last_error = Some(err.to_string());
                }
                Err(err) => {
                    warn!(error = %err, "generation backend failed, falling through");
                    last_error = Some(err.to_string());
                }
            }
        }

        GenerationOutcome {
            text: self.fallback.summarize(query, evidence),
            confidence,
            backend: EXTRACTIVE_BACKEND.to_string(),
            error: last_error,
        }
    }
}
