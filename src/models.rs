//! Core data models.
//!
//! Documents and chunks are transient and live for one ingest call.
//! Metadata records are persisted alongside the vector index. Evidence
//! items and answers are built and discarded within one query.

use serde::{Deserialize, Serialize};

/// A named blob of text submitted for ingestion.
///
/// `id` is caller-supplied (usually a file name) and not unique: ingesting
/// the same id twice appends a second copy of its chunks.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub raw_text: String,
}

/// A contiguous slice of a document's text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position within the source document, starting at 0.
    pub ordinal: usize,
    pub text: String,
}

/// One persisted row of the metadata store, keyed by index slot.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataRecord {
    pub slot_id: u64,
    pub doc_id: String,
    pub chunk_index: i64,
    pub chunk_text: String,
    pub ingested_at: i64,
}

/// A retrieved chunk with its distance from the query vector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvidenceItem {
    pub slot_id: u64,
    pub doc_id: String,
    pub chunk_text: String,
    /// Distance under the index metric; lower is closer.
    pub score: f32,
}

/// The structured result of a query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub query: String,
    pub answer: String,
    /// Heuristic in `[0, 1]` derived from evidence distances.
    pub confidence: f32,
    /// Name of the generation backend that produced `answer`.
    pub backend: String,
    pub evidence: Vec<EvidenceItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_error: Option<String>,
}
