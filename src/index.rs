//! Searchable vector index with directory persistence.
//!
//! A [`VectorIndex`] pairs every [`Chunk`] with its embedding and answers
//! exact cosine nearest-neighbour queries by brute force. It also keeps the
//! [`Embedder`] it was built with, so text queries can be embedded with the
//! same model.
//!
//! # On-disk layout
//!
//! ```text
//! faiss_index/
//! ├── manifest.json   # version, build id, model, dims, count, fingerprint, checksum
//! ├── chunks.json     # ordered chunk list with source and page
//! └── vectors.bin     # count × dims little-endian f32, row-major
//! ```
//!
//! [`VectorIndex::persist`] writes into a sibling temporary directory and
//! renames it into place, so a reader sees either the previous index or the
//! new one. [`VectorIndex::load`] rejects anything inconsistent; the cache
//! treats that as a reason to rebuild.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::ChunkingConfig;
use crate::embedding::{blob_to_vec, cosine_similarity, embed_all, embed_query, vec_to_blob, Embedder};
use crate::models::{Chunk, ScoredChunk};

/// Bumped whenever the persisted layout changes.
pub const FORMAT_VERSION: u32 = 1;

const MANIFEST_FILE: &str = "manifest.json";
const CHUNKS_FILE: &str = "chunks.json";
const VECTORS_FILE: &str = "vectors.bin";

/// Metadata describing one built index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub build_id: String,
    pub built_at: DateTime<Utc>,
    pub model: String,
    pub dims: usize,
    pub count: usize,
    /// Corpus fingerprint this index was built from.
    pub fingerprint: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Hex SHA-256 of `vectors.bin`.
    pub vectors_sha256: String,
}

pub struct VectorIndex {
    manifest: Manifest,
    chunks: Vec<Chunk>,
    vectors: Vec<Vec<f32>>,
    embedder: Arc<dyn Embedder>,
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("manifest", &self.manifest)
            .finish_non_exhaustive()
    }
}

impl VectorIndex {
    /// Embed every chunk and assemble an index. Zero chunks is an error.
    pub async fn build(
        chunks: Vec<Chunk>,
        embedder: Arc<dyn Embedder>,
        batch_size: usize,
        fingerprint: &str,
        chunking: &ChunkingConfig,
    ) -> Result<Self> {
        if chunks.is_empty() {
            bail!("cannot build an index from zero chunks");
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = embed_all(embedder.as_ref(), &texts, batch_size).await?;

        let manifest = Manifest {
            version: FORMAT_VERSION,
            build_id: uuid::Uuid::new_v4().to_string(),
            built_at: Utc::now(),
            model: embedder.model_name().to_string(),
            dims: embedder.dims(),
            count: chunks.len(),
            fingerprint: fingerprint.to_string(),
            chunk_size: chunking.chunk_size,
            chunk_overlap: chunking.chunk_overlap,
            vectors_sha256: sha256_hex(&encode_vectors(&vectors)),
        };

        tracing::info!(
            "built index {} ({} chunks, model {})",
            manifest.build_id,
            manifest.count,
            manifest.model
        );

        Ok(Self {
            manifest,
            chunks,
            vectors,
            embedder,
        })
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Embed `query` and return the `k` most similar chunks, best first.
    pub async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        let vector = embed_query(self.embedder.as_ref(), query).await?;
        Ok(self.search_by_vector(&vector, k))
    }

    /// Exact cosine search. Equal scores are ordered by chunk ordinal.
    pub fn search_by_vector(&self, query: &[f32], k: usize) -> Vec<ScoredChunk> {
        let mut scored: Vec<(f32, usize)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (cosine_similarity(query, v), i))
            .collect();

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.1.cmp(&b.1))
        });
        scored.truncate(k);

        scored
            .into_iter()
            .map(|(score, i)| ScoredChunk {
                chunk: self.chunks[i].clone(),
                score,
            })
            .collect()
    }

    /// Write the index to `dir`, replacing whatever was there.
    ///
    /// On failure the previous contents of `dir` are left in place.
    pub fn persist(&self, dir: &Path) -> Result<()> {
        let parent = parent_of(dir);
        fs::create_dir_all(&parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;

        let tmp = sibling(dir, "tmp");
        let result = self.write_files(&tmp).and_then(|_| swap_into_place(&tmp, dir));
        if result.is_err() {
            let _ = fs::remove_dir_all(&tmp);
        }
        result?;

        tracing::info!(
            "persisted index {} to {}",
            self.manifest.build_id,
            dir.display()
        );
        Ok(())
    }

    fn write_files(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        fs::write(dir.join(VECTORS_FILE), encode_vectors(&self.vectors))?;
        fs::write(dir.join(CHUNKS_FILE), serde_json::to_vec(&self.chunks)?)?;
        // Manifest last: a directory without one is never mistaken for an index.
        fs::write(
            dir.join(MANIFEST_FILE),
            serde_json::to_vec_pretty(&self.manifest)?,
        )?;
        Ok(())
    }

    /// Load a persisted index for use with `embedder`.
    ///
    /// Fails if the directory is missing or incomplete, written by another
    /// format version, built with a different model or dimensionality, or
    /// if the vectors do not match their checksum.
    pub fn load(dir: &Path, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let manifest = read_manifest(dir)?;

        if manifest.version != FORMAT_VERSION {
            bail!(
                "index format version {} is not supported (expected {})",
                manifest.version,
                FORMAT_VERSION
            );
        }
        if manifest.model != embedder.model_name() || manifest.dims != embedder.dims() {
            bail!(
                "index was built with {} ({} dims), current embedder is {} ({} dims)",
                manifest.model,
                manifest.dims,
                embedder.model_name(),
                embedder.dims()
            );
        }

        let chunks: Vec<Chunk> = serde_json::from_slice(
            &fs::read(dir.join(CHUNKS_FILE)).context("Failed to read chunks.json")?,
        )
        .context("Failed to parse chunks.json")?;
        if chunks.len() != manifest.count {
            bail!(
                "chunks.json holds {} chunks, manifest says {}",
                chunks.len(),
                manifest.count
            );
        }
        if chunks.iter().enumerate().any(|(i, c)| c.ordinal != i) {
            bail!("chunks.json ordinals are not contiguous");
        }

        let blob = fs::read(dir.join(VECTORS_FILE)).context("Failed to read vectors.bin")?;
        if sha256_hex(&blob) != manifest.vectors_sha256 {
            bail!("vectors.bin checksum mismatch");
        }
        if blob.len() != manifest.count * manifest.dims * 4 {
            bail!(
                "vectors.bin is {} bytes, expected {}",
                blob.len(),
                manifest.count * manifest.dims * 4
            );
        }
        let vectors: Vec<Vec<f32>> = blob
            .chunks_exact(manifest.dims * 4)
            .map(blob_to_vec)
            .collect();

        tracing::info!(
            "loaded index {} ({} chunks) from {}",
            manifest.build_id,
            manifest.count,
            dir.display()
        );

        Ok(Self {
            manifest,
            chunks,
            vectors,
            embedder,
        })
    }
}

/// Read only the manifest of a persisted index.
pub fn read_manifest(dir: &Path) -> Result<Manifest> {
    let path = dir.join(MANIFEST_FILE);
    let bytes =
        fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Delete a persisted index directory. A missing directory is fine.
pub fn remove_persisted(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => {
            tracing::info!("removed persisted index {}", dir.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", dir.display())),
    }
}

/// Rename `tmp` to `dir`, moving any existing `dir` aside first and
/// deleting it only once the new directory is in place.
fn swap_into_place(tmp: &Path, dir: &Path) -> Result<()> {
    let old = if dir.exists() {
        let old = sibling(dir, "old");
        fs::rename(dir, &old)
            .with_context(|| format!("Failed to move aside {}", dir.display()))?;
        Some(old)
    } else {
        None
    };

    if let Err(e) = fs::rename(tmp, dir) {
        if let Some(old) = &old {
            let _ = fs::rename(old, dir);
        }
        return Err(e).with_context(|| format!("Failed to move index into {}", dir.display()));
    }

    if let Some(old) = old {
        if let Err(e) = fs::remove_dir_all(&old) {
            tracing::warn!("could not remove old index {}: {}", old.display(), e);
        }
    }
    Ok(())
}

fn parent_of(dir: &Path) -> PathBuf {
    match dir.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// A uniquely named hidden directory next to `dir`.
fn sibling(dir: &Path, tag: &str) -> PathBuf {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "index".to_string());
    parent_of(dir).join(format!(".{}.{}-{}", name, tag, uuid::Uuid::new_v4()))
}

fn encode_vectors(vectors: &[Vec<f32>]) -> Vec<u8> {
    vectors.iter().flat_map(|v| vec_to_blob(v)).collect()
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use tempfile::TempDir;

    fn chunk(ordinal: usize, source: &str, page: u32, text: &str) -> Chunk {
        Chunk {
            ordinal,
            source: source.to_string(),
            page,
            text: text.to_string(),
            hash: sha256_hex(text.as_bytes()),
        }
    }

    fn sample_chunks() -> Vec<Chunk> {
        vec![
            chunk(0, "cv.pdf", 1, "Skills: Python, Go."),
            chunk(1, "cv.pdf", 2, "Certified: AWS, 2023."),
            chunk(2, "cert.pdf", 1, "Certificate of completion: Kubernetes administration"),
        ]
    }

    async fn build(embedder: Arc<dyn Embedder>) -> VectorIndex {
        VectorIndex::build(
            sample_chunks(),
            embedder,
            2,
            "fp",
            &ChunkingConfig::default(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn build_rejects_zero_chunks() {
        let err = VectorIndex::build(
            Vec::new(),
            Arc::new(HashEmbedder::new(64)),
            8,
            "fp",
            &ChunkingConfig::default(),
        )
        .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn search_orders_by_similarity() {
        let index = build(Arc::new(HashEmbedder::new(512))).await;
        let hits = index
            .similarity_search("What certifications does he have?", 4)
            .await
            .unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].chunk.ordinal, 1);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn equal_scores_keep_ordinal_order() {
        let index = build(Arc::new(HashEmbedder::new(64))).await;
        let zero = vec![0.0f32; 64];
        let hits = index.search_by_vector(&zero, 3);
        let ordinals: Vec<usize> = hits.iter().map(|h| h.chunk.ordinal).collect();
        assert_eq!(ordinals, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn persist_then_load_round_trips() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("faiss_index");
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(128));

        let index = build(embedder.clone()).await;
        index.persist(&dir).unwrap();
        let loaded = VectorIndex::load(&dir, embedder).unwrap();

        assert_eq!(loaded.manifest(), index.manifest());
        assert_eq!(loaded.chunks(), index.chunks());

        let q = "kubernetes certificate";
        let before = index.similarity_search(q, 3).await.unwrap();
        let after = loaded.similarity_search(q, 3).await.unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn persist_replaces_previous_index() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("idx");
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(32));

        let first = build(embedder.clone()).await;
        first.persist(&dir).unwrap();
        let second = build(embedder).await;
        second.persist(&dir).unwrap();

        assert_eq!(
            read_manifest(&dir).unwrap().build_id,
            second.manifest().build_id
        );
        // Only the index directory remains; no temp or old siblings.
        let entries: Vec<_> = fs::read_dir(tmp.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn load_rejects_corruption_and_mismatches() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("idx");
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(32));
        build(embedder.clone()).await.persist(&dir).unwrap();

        // Different dimensionality.
        assert!(VectorIndex::load(&dir, Arc::new(HashEmbedder::new(16))).is_err());

        // Flipped vector bytes.
        let vectors = dir.join(VECTORS_FILE);
        let mut blob = fs::read(&vectors).unwrap();
        blob[0] ^= 0xFF;
        fs::write(&vectors, &blob).unwrap();
        assert!(VectorIndex::load(&dir, embedder.clone()).is_err());

        // Garbage manifest.
        fs::write(dir.join(MANIFEST_FILE), "{").unwrap();
        assert!(VectorIndex::load(&dir, embedder.clone()).is_err());

        // Missing directory.
        assert!(VectorIndex::load(&tmp.path().join("nope"), embedder).is_err());
    }

    #[test]
    fn remove_missing_directory_is_ok() {
        let tmp = TempDir::new().unwrap();
        remove_persisted(&tmp.path().join("absent")).unwrap();
    }
}
