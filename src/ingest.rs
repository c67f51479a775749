//! Ingestion pipeline.
//!
//! The only write path into the [`VectorStore`]. Three entry points:
//!
//! - [`IngestPipeline::ingest`] for a document already held as text,
//! - [`IngestPipeline::ingest_file`] for one file (the watcher and the
//!   `ingest` CLI command use this),
//! - [`IngestPipeline::ingest_directory`] for a whole directory tree, and
//!   [`IngestPipeline::ingest_unseen`] for the startup scan of the watched
//!   directory.
//!
//! Files are identified by their file name, so `/var/log/a/app.log` and
//! `/var/log/b/app.log` share a `doc_id`. Re-ingesting a file appends a
//! second copy of its chunks; nothing is de-duplicated. The startup scan is
//! the one exception: it skips files whose `doc_id` is already stored.

use anyhow::{bail, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::WatchConfig;
use crate::error::{IngestError, StoreError};
use crate::models::Document;
use crate::store::VectorStore;

/// Outcome of [`IngestPipeline::ingest_directory`].
#[derive(Debug, Default, Clone, Serialize)]
pub struct DirectorySummary {
    pub files_seen: usize,
    pub files_indexed: usize,
    pub chunks_indexed: usize,
    /// Files left alone by [`IngestPipeline::ingest_unseen`].
    pub already_indexed: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct IngestPipeline {
    store: Arc<VectorStore>,
    filter: WatchConfig,
}

impl IngestPipeline {
    pub fn new(store: Arc<VectorStore>, watch: &WatchConfig) -> Self {
        Self {
            store,
            filter: watch.clone(),
        }
    }

    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    /// Whether `path` has an allowlisted suffix.
    pub fn accepts(&self, path: &Path) -> bool {
        self.filter.accepts(path)
    }

    /// Chunk, embed and store one document. Returns the chunks indexed.
    pub async fn ingest(&self, doc_id: &str, text: &str) -> Result<usize, StoreError> {
        let doc = Document {
            id: doc_id.to_string(),
            raw_text: text.to_string(),
        };
        self.ingest_document(&doc).await
    }

    pub async fn ingest_document(&self, doc: &Document) -> Result<usize, StoreError> {
        match self.store.upsert(&doc.id, &doc.raw_text).await {
            Ok(n) => Ok(n),
            Err(e) => {
                warn!(doc_id = %doc.id, kind = e.kind(), error = %e, "ingest failed");
                Err(e)
            }
        }
    }

    /// Ingest raw bytes, rejecting anything that is not text.
    pub async fn ingest_bytes(&self, doc_id: &str, bytes: &[u8]) -> Result<usize, IngestError> {
        let text = decode_text(bytes).ok_or_else(|| IngestError::Binary {
            doc_id: doc_id.to_string(),
        })?;
        Ok(self.ingest(doc_id, text).await?)
    }

    /// Read `path` in full and ingest it under its file name.
    pub async fn ingest_file(&self, path: &Path) -> Result<usize, IngestError> {
        let doc_id = doc_id_for(path);
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| IngestError::Unreadable {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        let n = self.ingest_bytes(&doc_id, &bytes).await?;
        debug!(path = %path.display(), chunks = n, "file ingested");
        Ok(n)
    }

    /// Ingest every allowlisted file under `dir`, in path order.
    ///
    /// Per-file failures, including entries that cannot be walked, are
    /// logged and counted; only a missing root fails the call.
    pub async fn ingest_directory(&self, dir: &Path) -> Result<DirectorySummary> {
        self.ingest_tree(dir, false).await
    }

    /// Startup scan of the watched directory.
    ///
    /// Like [`ingest_directory`](Self::ingest_directory), but files whose
    /// `doc_id` already has chunks in the store are left alone, so restarting
    /// the server does not append the corpus again. Only this scan skips;
    /// explicit ingests and watcher events always append.
    pub async fn ingest_unseen(&self, dir: &Path) -> Result<DirectorySummary> {
        self.ingest_tree(dir, true).await
    }

    async fn ingest_tree(&self, dir: &Path, skip_known: bool) -> Result<DirectorySummary> {
        if !dir.is_dir() {
            bail!("Ingest directory does not exist: {}", dir.display());
        }

        let (files, walk_errors) = self.scan(dir);
        let known: HashSet<String> = if skip_known {
            self.store.document_ids().await?
        } else {
            HashSet::new()
        };

        let mut summary = DirectorySummary {
            files_seen: files.len(),
            failed: walk_errors,
            ..Default::default()
        };

        for path in &files {
            if known.contains(&doc_id_for(path)) {
                summary.already_indexed += 1;
                continue;
            }
            match self.ingest_file(path).await {
                Ok(n) => {
                    summary.files_indexed += 1;
                    summary.chunks_indexed += n;
                }
                Err(e) if e.is_validation() => {
                    warn!(path = %path.display(), error = %e, "skipping file");
                    summary.skipped += 1;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to ingest file");
                    summary.failed += 1;
                }
            }
        }

        info!(
            dir = %dir.display(),
            files = summary.files_seen,
            indexed = summary.files_indexed,
            chunks = summary.chunks_indexed,
            already_indexed = summary.already_indexed,
            skipped = summary.skipped,
            failed = summary.failed,
            "directory ingested"
        );
        Ok(summary)
    }

    /// Allowlisted files under `dir`, sorted, plus the number of entries
    /// that could not be read.
    fn scan(&self, dir: &Path) -> (Vec<PathBuf>, usize) {
        let mut walker = WalkDir::new(dir).follow_links(true);
        if !self.filter.recursive {
            walker = walker.max_depth(1);
        }

        let mut files = Vec::new();
        let mut errors = 0;
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "cannot read directory entry");
                    errors += 1;
                    continue;
                }
            };
            if entry.file_type().is_file() && self.accepts(entry.path()) {
                files.push(entry.into_path());
            }
        }

        // Sort for deterministic ordering
        files.sort();
        (files, errors)
    }
}

/// The `doc_id` a file is stored under: its file name.
pub fn doc_id_for(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Interpret `bytes` as text. `None` for invalid UTF-8 or embedded NULs.
pub fn decode_text(bytes: &[u8]) -> Option<&str> {
    if bytes.contains(&0) {
        return None;
    }
    std::str::from_utf8(bytes).ok()
}
