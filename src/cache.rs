//! Process-wide index cache.
//!
//! [`IndexCache::get_index`] resolves the index for the current corpus in
//! three steps:
//!
//! 1. **Memory**: the cached index, if its corpus fingerprint still matches.
//! 2. **Disk**: the persisted index, if its manifest carries the current
//!    fingerprint and it loads cleanly. Load failures are logged and fall
//!    through to a rebuild.
//! 3. **Build**: load PDFs, chunk, embed, persist, cache.
//!
//! The fingerprint hashes file names, sizes and modification times, so
//! adding, removing or touching a PDF triggers a rebuild without a manual
//! refresh. The state mutex is held for the whole lookup: concurrent
//! callers on a cold cache wait for one build instead of starting their own.

use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::chunk::chunk_pages;
use crate::config::Config;
use crate::credential::Credential;
use crate::embedding::{create_embedder, Embedder};
use crate::error::{PipelineError, PipelineResult};
use crate::extract::PageExtractor;
use crate::index::{read_manifest, remove_persisted, VectorIndex};
use crate::loader::{self, corpus_fingerprint, LoadFailure};
use crate::models::PageRecord;

/// Builds the embedder for a lookup from the session credential.
pub type EmbedderFactory =
    Arc<dyn Fn(Option<&Credential>) -> Result<Arc<dyn Embedder>> + Send + Sync>;

/// Where [`IndexCache::get_index`] found the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOrigin {
    Memory,
    Disk,
    Built,
    /// Built in memory from a single file, never persisted.
    Upload,
}

impl IndexOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexOrigin::Memory => "memory",
            IndexOrigin::Disk => "disk",
            IndexOrigin::Built => "built",
            IndexOrigin::Upload => "upload",
        }
    }
}

#[derive(Debug)]
pub enum IndexLookup {
    Ready {
        index: Arc<VectorIndex>,
        origin: IndexOrigin,
        /// Files skipped during a build; empty for memory and disk hits.
        failures: Vec<LoadFailure>,
    },
    /// No PDF yielded any text.
    NoDocuments { failures: Vec<LoadFailure> },
}

impl IndexLookup {
    pub fn index(&self) -> Option<&Arc<VectorIndex>> {
        match self {
            IndexLookup::Ready { index, .. } => Some(index),
            IndexLookup::NoDocuments { .. } => None,
        }
    }

    pub fn failures(&self) -> &[LoadFailure] {
        match self {
            IndexLookup::Ready { failures, .. } | IndexLookup::NoDocuments { failures } => {
                failures
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CacheKey {
    Corpus(String),
    Upload(PathBuf),
}

struct CacheEntry {
    key: CacheKey,
    index: Arc<VectorIndex>,
}

pub struct IndexCache {
    config: Config,
    extractor: Arc<dyn PageExtractor>,
    embedder_factory: EmbedderFactory,
    state: Mutex<Option<CacheEntry>>,
}

impl IndexCache {
    /// Cache using the configured embedding provider.
    pub fn new(config: Config, extractor: Arc<dyn PageExtractor>) -> Self {
        let embedding = config.embedding.clone();
        let factory: EmbedderFactory = Arc::new(move |credential: Option<&Credential>| {
            create_embedder(&embedding, credential)
        });
        Self::with_embedder_factory(config, extractor, factory)
    }

    pub fn with_embedder_factory(
        config: Config,
        extractor: Arc<dyn PageExtractor>,
        embedder_factory: EmbedderFactory,
    ) -> Self {
        Self {
            config,
            extractor,
            embedder_factory,
            state: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Current corpus fingerprint. Reads directory metadata only.
    pub async fn fingerprint(&self) -> Result<String> {
        let dir = self.config.documents.dir.clone();
        let files = tokio::task::spawn_blocking(move || loader::scan_documents(&dir))
            .await
            .map_err(|e| anyhow!("scan task failed: {}", e))??;
        Ok(corpus_fingerprint(
            &files,
            &self.config.chunking,
            &self.model_key(),
        ))
    }

    /// Return the index for the current corpus, loading or building it if
    /// needed.
    pub async fn get_index(&self, credential: Option<&Credential>) -> PipelineResult<IndexLookup> {
        let mut state = self.state.lock().await;

        if let Some(entry) = state.as_ref() {
            if let CacheKey::Upload(path) = &entry.key {
                tracing::debug!("using uploaded index for {}", path.display());
                return Ok(ready(entry.index.clone(), IndexOrigin::Memory, Vec::new()));
            }
        }

        let fingerprint = self
            .fingerprint()
            .await
            .map_err(|e| PipelineError::Storage(e.context("failed to scan documents")))?;
        let key = CacheKey::Corpus(fingerprint.clone());

        if let Some(entry) = state.as_ref() {
            if entry.key == key {
                tracing::debug!("index cache hit");
                return Ok(ready(entry.index.clone(), IndexOrigin::Memory, Vec::new()));
            }
            tracing::info!("document folder changed, cached index is stale");
            *state = None;
        }

        let embedder = self.embedder(credential)?;

        match self.load_persisted(&fingerprint, embedder.clone()).await {
            Ok(Some(index)) => {
                let index = Arc::new(index);
                *state = Some(CacheEntry {
                    key,
                    index: index.clone(),
                });
                return Ok(ready(index, IndexOrigin::Disk, Vec::new()));
            }
            Ok(None) => {}
            Err(e) => {
                let e = PipelineError::IndexLoad(e);
                tracing::warn!(error = %e, "rebuilding");
            }
        }

        let dir = self.config.documents.dir.clone();
        let extractor = self.extractor.clone();
        let report = tokio::task::spawn_blocking(move || {
            loader::load_documents(&dir, extractor.as_ref())
        })
        .await
        .map_err(|e| PipelineError::IndexBuild(anyhow!("load task failed: {}", e)))?
        .map_err(PipelineError::IndexBuild)?;

        let Some(index) = self
            .build(report.pages, embedder, &fingerprint)
            .await?
        else {
            return Ok(IndexLookup::NoDocuments {
                failures: report.failures,
            });
        };

        let persist_dir = self.config.index.dir.clone();
        let index = tokio::task::spawn_blocking(move || {
            index.persist(&persist_dir).map(|_| index)
        })
        .await
        .map_err(|e| PipelineError::IndexBuild(anyhow!("persist task failed: {}", e)))?
        .map_err(PipelineError::IndexBuild)?;

        let index = Arc::new(index);
        *state = Some(CacheEntry {
            key,
            index: index.clone(),
        });
        Ok(ready(index, IndexOrigin::Built, report.failures))
    }

    /// Build an in-memory index from one PDF and serve it until the next
    /// [`invalidate`](Self::invalidate). Nothing is written to disk.
    pub async fn load_upload(
        &self,
        path: &Path,
        credential: Option<&Credential>,
    ) -> PipelineResult<IndexLookup> {
        let mut state = self.state.lock().await;
        let embedder = self.embedder(credential)?;

        let file = path.to_path_buf();
        let extractor = self.extractor.clone();
        let pages = tokio::task::spawn_blocking(move || {
            loader::load_file(&file, extractor.as_ref())
        })
        .await
        .map_err(|e| PipelineError::IndexBuild(anyhow!("load task failed: {}", e)))?;

        let pages = match pages {
            Ok(pages) => pages,
            Err(e) => {
                tracing::warn!("could not read {}: {:#}", path.display(), e);
                return Ok(IndexLookup::NoDocuments {
                    failures: vec![LoadFailure {
                        file: path.display().to_string(),
                        reason: format!("{:#}", e),
                    }],
                });
            }
        };

        let Some(index) = self.build(pages, embedder, "upload").await? else {
            return Ok(IndexLookup::NoDocuments {
                failures: Vec::new(),
            });
        };

        let index = Arc::new(index);
        *state = Some(CacheEntry {
            key: CacheKey::Upload(path.to_path_buf()),
            index: index.clone(),
        });
        Ok(ready(index, IndexOrigin::Upload, Vec::new()))
    }

    /// Forget the cached index and delete the persisted one. The next
    /// lookup rebuilds from the document folder.
    pub async fn invalidate(&self) -> PipelineResult<()> {
        let mut state = self.state.lock().await;
        *state = None;
        remove_persisted(&self.config.index.dir)
            .map_err(|e| PipelineError::Storage(e.context("failed to remove index")))?;
        tracing::info!("index invalidated");
        Ok(())
    }

    fn embedder(&self, credential: Option<&Credential>) -> PipelineResult<Arc<dyn Embedder>> {
        if credential.is_none() && self.config.embedding.needs_credential() {
            return Err(PipelineError::Unconfigured);
        }
        (self.embedder_factory)(credential).map_err(PipelineError::IndexBuild)
    }

    async fn load_persisted(
        &self,
        fingerprint: &str,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Option<VectorIndex>> {
        let dir = self.config.index.dir.clone();
        if !dir.join("manifest.json").exists() {
            tracing::debug!("no persisted index at {}", dir.display());
            return Ok(None);
        }

        let manifest = read_manifest(&dir)?;
        if manifest.fingerprint != fingerprint {
            tracing::info!(
                "persisted index {} was built from a different document set",
                manifest.build_id
            );
            return Ok(None);
        }

        let index = tokio::task::spawn_blocking(move || VectorIndex::load(&dir, embedder))
            .await
            .map_err(|e| anyhow!("load task failed: {}", e))??;
        Ok(Some(index))
    }

    /// Chunk and embed pages. `None` when there is nothing to embed.
    async fn build(
        &self,
        pages: Vec<PageRecord>,
        embedder: Arc<dyn Embedder>,
        fingerprint: &str,
    ) -> PipelineResult<Option<VectorIndex>> {
        if pages.is_empty() {
            tracing::warn!("no extractable text found, nothing to index");
            return Ok(None);
        }

        let chunking = self.config.chunking.clone();
        let chunks = tokio::task::spawn_blocking(move || chunk_pages(&pages, &chunking))
            .await
            .map_err(|e| PipelineError::IndexBuild(anyhow!("chunk task failed: {}", e)))?;
        if chunks.is_empty() {
            return Ok(None);
        }

        tracing::info!("embedding {} chunks", chunks.len());
        let index = VectorIndex::build(
            chunks,
            embedder,
            self.config.embedding.batch_size,
            fingerprint,
            &self.config.chunking,
        )
        .await
        .map_err(PipelineError::IndexBuild)?;
        Ok(Some(index))
    }

    fn model_key(&self) -> String {
        let e = &self.config.embedding;
        format!("{}:{}:{}", e.provider, e.model, e.dims)
    }
}

fn ready(index: Arc<VectorIndex>, origin: IndexOrigin, failures: Vec<LoadFailure>) -> IndexLookup {
    IndexLookup::Ready {
        index,
        origin,
        failures,
    }
}
