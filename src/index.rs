//! Flat (exhaustive) vector index and its on-disk format.
//!
//! [`FlatIndex`] keeps every vector in one row-major `Vec<f32>` and answers
//! k-nearest-neighbour queries by scanning all of them: `O(n·D)` per query,
//! exact results, no training. Slots are assigned in append order starting at
//! zero and are never reused.
//!
//! The index is not synchronised; [`VectorStore`](crate::store::VectorStore)
//! serialises all access to it.
//!
//! # File layout
//!
//! ```text
//! "LCPIDX01"            8 bytes  magic + format version
//! metric                1 byte   0 = l2, 1 = cosine
//! dim                   u32 LE
//! count                 u64 LE
//! vectors               count × dim × f32 LE
//! sha256                32 bytes over everything above
//! ```

use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::path::Path;

use crate::embedding::{cosine_similarity, vec_to_blob};
use crate::error::StoreError;

const MAGIC: &[u8; 8] = b"LCPIDX01";
const HEADER_LEN: usize = 8 + 1 + 4 + 8;
const CHECKSUM_LEN: usize = 32;

/// Distance metric, fixed when an index is created.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Squared Euclidean distance.
    #[default]
    L2,
    /// `1 - cosine_similarity`, in `[0, 2]`.
    Cosine,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::L2 => "l2",
            Metric::Cosine => "cosine",
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            Metric::L2 => 0,
            Metric::Cosine => 1,
        }
    }

    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Metric::L2),
            1 => Some(Metric::Cosine),
            _ => None,
        }
    }

    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::L2 => a
                .iter()
                .zip(b.iter())
                .map(|(x, y)| {
                    let d = x - y;
                    d * d
                })
                .sum(),
            Metric::Cosine => 1.0 - cosine_similarity(a, b),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FlatIndex {
    dim: usize,
    metric: Metric,
    data: Vec<f32>,
}

impl FlatIndex {
    pub fn new(dim: usize, metric: Metric) -> Self {
        Self {
            dim,
            metric,
            data: Vec::new(),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.data.len() / self.dim
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Append vectors; returns the slot of the first one.
    ///
    /// Either all vectors are appended or none are.
    pub fn add(&mut self, vectors: &[Vec<f32>]) -> Result<usize, StoreError> {
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dim) {
            return Err(StoreError::DimensionMismatch {
                expected: self.dim,
                actual: bad.len(),
            });
        }
        let start = self.len();
        self.data.reserve(vectors.len() * self.dim);
        for v in vectors {
            self.data.extend_from_slice(v);
        }
        Ok(start)
    }

    /// Drop every vector at or after slot `len`.
    pub fn truncate(&mut self, len: usize) {
        self.data.truncate(len * self.dim);
    }

    pub fn vector(&self, slot: usize) -> Option<&[f32]> {
        let start = slot.checked_mul(self.dim)?;
        self.data.get(start..start + self.dim)
    }

    /// Exhaustive k-nearest-neighbour search.
    ///
    /// Returns at most `min(k, len)` `(slot, distance)` pairs, nearest first.
    /// Ties are broken by slot so results are stable.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>, StoreError> {
        if query.len() != self.dim {
            return Err(StoreError::DimensionMismatch {
                expected: self.dim,
                actual: query.len(),
            });
        }
        let k = k.min(self.len());
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, f32)> = self
            .data
            .chunks_exact(self.dim)
            .enumerate()
            .map(|(slot, v)| (slot, self.metric.distance(query, v)))
            .collect();

        scored.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(k);
        Ok(scored)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.data.len() * 4 + CHECKSUM_LEN);
        bytes.extend_from_slice(MAGIC);
        bytes.push(self.metric.to_byte());
        bytes.extend_from_slice(&(self.dim as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.len() as u64).to_le_bytes());
        bytes.extend_from_slice(&vec_to_blob(&self.data));
        let checksum = Sha256::digest(&bytes);
        bytes.extend_from_slice(&checksum);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StoreError> {
        if bytes.len() < HEADER_LEN + CHECKSUM_LEN {
            return Err(StoreError::CorruptIndex(format!(
                "file too short ({} bytes)",
                bytes.len()
            )));
        }
        if &bytes[..8] != MAGIC {
            return Err(StoreError::CorruptIndex("bad magic".to_string()));
        }

        let (body, checksum) = bytes.split_at(bytes.len() - CHECKSUM_LEN);
        if Sha256::digest(body).as_slice() != checksum {
            return Err(StoreError::CorruptIndex("checksum mismatch".to_string()));
        }

        let metric = Metric::from_byte(body[8]).ok_or_else(|| {
            StoreError::IncompatibleIndex(format!("unknown metric tag {}", body[8]))
        })?;
        let dim = u32::from_le_bytes([body[9], body[10], body[11], body[12]]) as usize;
        let mut count_bytes = [0u8; 8];
        count_bytes.copy_from_slice(&body[13..21]);
        let count = u64::from_le_bytes(count_bytes) as usize;

        let payload = &body[HEADER_LEN..];
        let expected = count
            .checked_mul(dim)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| StoreError::CorruptIndex("header overflow".to_string()))?;
        if payload.len() != expected || dim == 0 {
            return Err(StoreError::CorruptIndex(format!(
                "header declares {} x {} vectors but payload has {} bytes",
                count,
                dim,
                payload.len()
            )));
        }

        Ok(Self {
            dim,
            metric,
            data: crate::embedding::blob_to_vec(payload),
        })
    }

    /// Write the index atomically: `path.tmp` first, then rename.
    pub async fn write_to(&self, path: &Path) -> Result<(), StoreError> {
        let tmp = tmp_path(path);
        tokio::fs::write(&tmp, self.to_bytes()).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    pub fn read_from(path: &Path) -> Result<Self, StoreError> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }
}

pub(crate) fn tmp_path(path: &Path) -> std::path::PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    name.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FlatIndex {
        let mut idx = FlatIndex::new(2, Metric::L2);
        idx.add(&[vec![0.0, 0.0], vec![1.0, 0.0], vec![5.0, 5.0]])
            .unwrap();
        idx
    }

    #[test]
    fn test_add_assigns_append_order_slots() {
        let mut idx = sample();
        assert_eq!(idx.len(), 3);
        let start = idx.add(&[vec![2.0, 2.0]]).unwrap();
        assert_eq!(start, 3);
        assert_eq!(idx.vector(3), Some(&[2.0f32, 2.0][..]));
    }

    #[test]
    fn test_add_rejects_wrong_dimension_atomically() {
        let mut idx = sample();
        let err = idx.add(&[vec![1.0, 1.0], vec![1.0]]).unwrap_err();
        assert!(matches!(
            err,
            StoreError::DimensionMismatch {
                expected: 2,
                actual: 1
            }
        ));
        assert_eq!(idx.len(), 3);
    }

    #[test]
    fn test_search_nearest_first_and_clamped() {
        let idx = sample();
        let hits = idx.search(&[0.9, 0.0], 10).unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].0, 1);
        assert_eq!(hits[1].0, 0);
        assert_eq!(hits[2].0, 2);
        assert!((hits[0].1 - 0.01).abs() < 1e-6);
        assert!(hits.windows(2).all(|w| w[0].1 <= w[1].1));
    }

    #[test]
    fn test_search_empty_index() {
        let idx = FlatIndex::new(4, Metric::L2);
        assert!(idx.search(&[0.0; 4], 5).unwrap().is_empty());
    }

    #[test]
    fn test_cosine_distance() {
        let mut idx = FlatIndex::new(2, Metric::Cosine);
        idx.add(&[vec![1.0, 0.0], vec![0.0, 3.0]]).unwrap();
        let hits = idx.search(&[0.0, 1.0], 2).unwrap();
        assert_eq!(hits[0].0, 1);
        assert!(hits[0].1.abs() < 1e-6);
        assert!((hits[1].1 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_bytes_roundtrip_preserves_metric_and_slots() {
        let idx = sample();
        let restored = FlatIndex::from_bytes(&idx.to_bytes()).unwrap();
        assert_eq!(restored.dim(), 2);
        assert_eq!(restored.metric(), Metric::L2);
        assert_eq!(restored.len(), 3);
        assert_eq!(restored.vector(2), Some(&[5.0f32, 5.0][..]));
    }

    #[test]
    fn test_corrupted_bytes_detected() {
        let mut bytes = sample().to_bytes();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xff;
        assert!(matches!(
            FlatIndex::from_bytes(&bytes),
            Err(StoreError::CorruptIndex(_))
        ));
        assert!(matches!(
            FlatIndex::from_bytes(b"short"),
            Err(StoreError::CorruptIndex(_))
        ));
    }

    #[test]
    fn test_truncate() {
        let mut idx = sample();
        idx.truncate(1);
        assert_eq!(idx.len(), 1);
        assert!(idx.vector(1).is_none());
    }

    #[tokio::test]
    async fn test_write_and_read_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("index.bin");
        sample().write_to(&path).await.unwrap();
        assert!(!tmp_path(&path).exists());
        let restored = FlatIndex::read_from(&path).unwrap();
        assert_eq!(restored.len(), 3);
    }
}
