//! # LogCopilot
//!
//! Retrieval-augmented question answering over log files.
//!
//! Log text is chunked, embedded, and appended to a flat vector index whose
//! slots are mirrored one-to-one by a SQLite metadata table. Queries are
//! embedded, matched against the index, and answered by the first working
//! generation backend, with a deterministic extractive summary as the
//! always-available last resort.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌────────────────────┐
//! │ Watcher /   │──▶│  Pipeline    │──▶│ VectorStore        │
//! │ HTTP / CLI  │   │ Chunk+Embed  │   │ index.bin + SQLite │
//! └─────────────┘   └──────────────┘   └─────────┬──────────┘
//!                                                │ search
//!                   ┌──────────────┐   ┌─────────▼──────────┐
//!                   │  Generation  │◀──│   QueryEngine      │
//!                   │  Router      │   │                    │
//!                   └──────────────┘   └────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! logcopilot ingest ./data/logs          # index existing files
//! logcopilot query "auth failures" --k 4
//! logcopilot serve                       # watcher + HTTP on :6969
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error kinds |
//! | [`models`] | Core data types |
//! | [`chunk`] | Text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Flat vector index and its file format |
//! | [`metadata`] | Slot-keyed SQLite metadata |
//! | [`store`] | Index + metadata kept in lockstep |
//! | [`ingest`] | Ingestion pipeline |
//! | [`watch`] | Directory watcher |
//! | [`generation`] | Backend chain with extractive fallback |
//! | [`rag`] | Query orchestration |
//! | [`server`] | HTTP server |
//! | [`app`] | Process wiring |

pub mod app;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod index;
pub mod ingest;
pub mod metadata;
pub mod models;
pub mod rag;
pub mod server;
pub mod store;
pub mod watch;
