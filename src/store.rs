//! The vector store: a [`FlatIndex`] and a [`MetadataStore`] kept in lockstep.
//!
//! Invariant: for every slot in the index there is exactly one metadata
//! record with that slot id, and vice versa. Both are extended only inside
//! [`VectorStore::upsert`], under the write lock, through a single commit:
//!
//! ```text
//! append vectors in memory
//!   → write index.bin.tmp
//!   → INSERT metadata rows (transaction open)
//!   → rename index.bin.tmp → index.bin
//!   → COMMIT
//! ```
//!
//! The commit runs on a spawned task, so dropping the upsert future does not
//! interrupt it: once the write lock is taken the append either completes
//! or fails as a whole. On failure the in-memory index is rolled back and
//! the transaction is discarded. The only on-disk state a crash can leave
//! behind is an index file *ahead* of the metadata, which
//! [`VectorStore::open`] truncates back.
//!
//! Searches take the read lock, so they never observe a half-appended
//! vector/record pair and never read a file that is being written.

use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::chunk::Chunker;
use crate::config::{Config, CorruptIndexPolicy};
use crate::embedding::Embedder;
use crate::error::StoreError;
use crate::index::{tmp_path, FlatIndex, Metric};
use crate::metadata::MetadataStore;
use crate::models::{Chunk, EvidenceItem};

struct StoreState {
    /// `None` until the first successful upsert binds the dimension.
    index: Option<FlatIndex>,
}

/// Point-in-time summary of the store.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub vectors: usize,
    pub dimension: Option<usize>,
    pub metric: &'static str,
    pub documents: usize,
    pub data_dir: String,
}

pub struct VectorStore {
    state: Arc<RwLock<StoreState>>,
    metadata: MetadataStore,
    chunker: Chunker,
    embedder: Arc<dyn Embedder>,
    metric: Metric,
    data_dir: PathBuf,
    index_path: PathBuf,
}

/// One staged append. Runs on its own task so that dropping the caller's
/// future cannot interrupt it between the index rename and the COMMIT.
struct AppendJob {
    state: Arc<RwLock<StoreState>>,
    metadata: MetadataStore,
    index_path: PathBuf,
    metric: Metric,
    doc_id: String,
    chunks: Vec<Chunk>,
    vectors: Vec<Vec<f32>>,
}

impl AppendJob {
    async fn run(self) -> Result<usize, StoreError> {
        let dim = self.vectors[0].len();
        let mut state = self.state.clone().write_owned().await;

        let index = state
            .index
            .get_or_insert_with(|| FlatIndex::new(dim, self.metric));
        if index.dim() != dim {
            return Err(StoreError::DimensionMismatch {
                expected: index.dim(),
                actual: dim,
            });
        }
        let start = index.add(&self.vectors)?;
        let staged = index.to_bytes();

        let tmp = tmp_path(&self.index_path);
        match self.persist(&tmp, staged, start as u64).await {
            Ok(()) => {
                info!(
                    doc_id = %self.doc_id,
                    chunks = self.chunks.len(),
                    first_slot = start,
                    "document indexed"
                );
                Ok(self.chunks.len())
            }
            Err(e) => {
                if start == 0 {
                    state.index = None;
                } else if let Some(index) = state.index.as_mut() {
                    index.truncate(start);
                }
                let _ = tokio::fs::remove_file(&tmp).await;
                error!(doc_id = %self.doc_id, error = %e, "upsert rolled back");
                Err(e)
            }
        }
    }

    async fn persist(&self, tmp: &Path, staged: Vec<u8>, start_slot: u64) -> Result<(), StoreError> {
        tokio::fs::write(tmp, staged).await?;

        let mut tx = self.metadata.begin().await?;
        MetadataStore::append(
            &mut tx,
            start_slot,
            &self.doc_id,
            &self.chunks,
            Utc::now().timestamp(),
        )
        .await?;

        tokio::fs::rename(tmp, &self.index_path).await?;
        tx.commit().await?;
        Ok(())
    }
}

impl VectorStore {
    /// Open the store in `config.data.dir`, creating an empty one if absent.
    pub async fn open(config: &Config, embedder: Arc<dyn Embedder>) -> Result<Self, StoreError> {
        let data_dir = config.data.dir.clone();
        std::fs::create_dir_all(&data_dir)?;

        let index_path = config.index_path();
        let metadata = MetadataStore::open(&config.metadata_path()).await?;
        let metric = config.index.metric;

        let index = load_and_reconcile(
            &index_path,
            &metadata,
            metric,
            config.index.on_corrupt,
        )
        .await?;

        info!(
            data_dir = %data_dir.display(),
            vectors = index.as_ref().map(|i| i.len()).unwrap_or(0),
            dimension = ?index.as_ref().map(|i| i.dim()),
            metric = metric.as_str(),
            "vector store opened"
        );

        Ok(Self {
            state: Arc::new(RwLock::new(StoreState { index })),
            metadata,
            chunker: Chunker::from_config(&config.chunking),
            embedder,
            metric,
            data_dir,
            index_path,
        })
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn chunker(&self) -> &Chunker {
        &self.chunker
    }

    /// Chunk, embed and append a document. Returns the number of chunks stored.
    ///
    /// Embedding happens before the write lock is taken, so a slow embedding
    /// backend never blocks searches. Re-ingesting a document id appends a
    /// second copy of its chunks.
    pub async fn upsert(&self, doc_id: &str, text: &str) -> Result<usize, StoreError> {
        let chunks = self.chunker.chunk(text);
        if chunks.is_empty() {
            return Err(StoreError::EmptyDocument);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self
            .embedder
            .embed(&texts)
            .await
            .map_err(|e| StoreError::EmbeddingUnavailable(format!("{:#}", e)))?;

        if vectors.len() != chunks.len() {
            return Err(StoreError::EmbeddingUnavailable(format!(
                "expected {} vectors, got {}",
                chunks.len(),
                vectors.len()
            )));
        }
        let dim = vectors[0].len();
        if dim == 0 {
            return Err(StoreError::EmbeddingUnavailable(
                "embedding backend returned zero-length vectors".to_string(),
            ));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != dim) {
            return Err(StoreError::DimensionMismatch {
                expected: dim,
                actual: bad.len(),
            });
        }

        let job = AppendJob {
            state: self.state.clone(),
            metadata: self.metadata.clone(),
            index_path: self.index_path.clone(),
            metric: self.metric,
            doc_id: doc_id.to_string(),
            chunks,
            vectors,
        };
        tokio::spawn(job.run())
            .await
            .map_err(|e| StoreError::StorageIo(format!("upsert task failed: {}", e)))?
    }

    /// The `k` stored chunks nearest to `query`, nearest first.
    ///
    /// Returns an empty list when nothing has been stored yet. `k` is
    /// clamped to the number of stored vectors.
    pub async fn search(&self, query: &[f32], k: usize) -> Result<Vec<EvidenceItem>, StoreError> {
        let state = self.state.read().await;
        let index = match &state.index {
            Some(index) if !index.is_empty() => index,
            _ => return Ok(Vec::new()),
        };

        let hits = index.search(query, k)?;
        let slots: Vec<u64> = hits.iter().map(|(slot, _)| *slot as u64).collect();
        let records = self.metadata.get_many(&slots).await?;

        let mut evidence = Vec::with_capacity(hits.len());
        for (slot, distance) in hits {
            let record = records.get(&(slot as u64)).ok_or(StoreError::Misaligned {
                index: index.len(),
                metadata: records.len(),
            })?;
            evidence.push(EvidenceItem {
                slot_id: slot as u64,
                doc_id: record.doc_id.clone(),
                chunk_text: record.chunk_text.clone(),
                score: distance,
            });
        }
        Ok(evidence)
    }

    /// Number of stored vectors.
    pub async fn len(&self) -> usize {
        let state = self.state.read().await;
        state.index.as_ref().map(|i| i.len()).unwrap_or(0)
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// The bound embedding dimension, once the first upsert has happened.
    pub async fn dimension(&self) -> Option<usize> {
        let state = self.state.read().await;
        state.index.as_ref().map(|i| i.dim())
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub async fn stats(&self) -> Result<StoreStats, StoreError> {
        let state = self.state.read().await;
        let documents = self.metadata.document_count().await?;
        Ok(StoreStats {
            vectors: state.index.as_ref().map(|i| i.len()).unwrap_or(0),
            dimension: state.index.as_ref().map(|i| i.dim()),
            metric: self.metric.as_str(),
            documents,
            data_dir: self.data_dir.display().to_string(),
        })
    }

    /// Document ids that already have chunks in the store.
    pub async fn document_ids(&self) -> Result<HashSet<String>, StoreError> {
        let _state = self.state.read().await;
        self.metadata.doc_ids().await
    }

    /// Check that metadata slot ids are exactly `0..len` for the index.
    ///
    /// Returns the number of aligned slots.
    pub async fn verify_alignment(&self) -> Result<usize, StoreError> {
        let state = self.state.read().await;
        let index_len = state.index.as_ref().map(|i| i.len()).unwrap_or(0);
        let ids = self.metadata.slot_ids().await?;
        let contiguous = ids.iter().enumerate().all(|(i, id)| *id == i as u64);
        if ids.len() != index_len || !contiguous {
            return Err(StoreError::Misaligned {
                index: index_len,
                metadata: ids.len(),
            });
        }
        Ok(index_len)
    }

    pub async fn close(&self) {
        // Wait for any in-flight upsert to finish before closing the pool.
        let _guard = self.state.write().await;
        self.metadata.close().await;
    }
}

/// Load `index.bin` and bring it back in line with the metadata store.
async fn load_and_reconcile(
    index_path: &Path,
    metadata: &MetadataStore,
    metric: Metric,
    policy: CorruptIndexPolicy,
) -> Result<Option<FlatIndex>, StoreError> {
    let stale_tmp = tmp_path(index_path);
    if stale_tmp.exists() {
        debug!(path = %stale_tmp.display(), "removing uncommitted index staging file");
        tokio::fs::remove_file(&stale_tmp).await?;
    }

    let meta_count = metadata.count().await?;
    let next_slot = metadata.next_slot().await? as usize;
    if next_slot != meta_count {
        return recover(
            StoreError::Misaligned {
                index: next_slot,
                metadata: meta_count,
            },
            index_path,
            metadata,
            policy,
        )
        .await;
    }

    let mut index = if index_path.exists() {
        match FlatIndex::read_from(index_path) {
            Ok(index) => Some(index),
            Err(e @ StoreError::CorruptIndex(_)) => {
                return recover(e, index_path, metadata, policy).await;
            }
            Err(e) => return Err(e),
        }
    } else {
        None
    };

    if let Some(found) = index.as_ref().map(|i| i.metric()) {
        if found != metric {
            return Err(StoreError::IncompatibleIndex(format!(
                "index at {} was created with metric '{}' but '{}' is configured",
                index_path.display(),
                found.as_str(),
                metric.as_str()
            )));
        }
    }

    let index_len = index.as_ref().map(|i| i.len()).unwrap_or(0);

    if index_len > meta_count {
        warn!(
            index = index_len,
            metadata = meta_count,
            "index is ahead of metadata; dropping uncommitted vectors"
        );
        if meta_count == 0 {
            tokio::fs::remove_file(index_path).await?;
            index = None;
        } else if let Some(idx) = index.as_mut() {
            idx.truncate(meta_count);
            idx.write_to(index_path).await?;
        }
    } else if index_len < meta_count {
        return recover(
            StoreError::Misaligned {
                index: index_len,
                metadata: meta_count,
            },
            index_path,
            metadata,
            policy,
        )
        .await;
    }

    Ok(index)
}

/// Apply the corrupt-index policy to a damaged store.
async fn recover(
    cause: StoreError,
    index_path: &Path,
    metadata: &MetadataStore,
    policy: CorruptIndexPolicy,
) -> Result<Option<FlatIndex>, StoreError> {
    match policy {
        CorruptIndexPolicy::Fail => Err(cause),
        CorruptIndexPolicy::Recreate => {
            error!(
                cause = %cause,
                path = %index_path.display(),
                "vector store is damaged; RECREATING AN EMPTY STORE (previous data is discarded)"
            );
            if index_path.exists() {
                let mut backup = index_path.as_os_str().to_owned();
                backup.push(format!(".corrupt-{}", Utc::now().timestamp()));
                tokio::fs::rename(index_path, PathBuf::from(backup)).await?;
            }
            metadata.clear().await?;
            Ok(None)
        }
    }
}
