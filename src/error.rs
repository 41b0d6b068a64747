//! Pipeline error taxonomy.
//!
//! Internals use `anyhow`; these variants are what callers of the cache and
//! session see. Per-file PDF failures never appear here: they are carried as
//! [`LoadFailure`](crate::loader::LoadFailure) records in the load report.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// No PDFs in the input directory, or none of them yielded text.
    #[error("nothing to index: no extractable PDF text in {}", dir.display())]
    EmptyCorpus { dir: PathBuf },

    /// Embedding or persistence failed while building; the on-disk index is unchanged.
    #[error("index build failed: {0:#}")]
    IndexBuild(#[source] anyhow::Error),

    /// A persisted index could not be loaded. Recovered by rebuilding.
    #[error("index load failed: {0:#}")]
    IndexLoad(#[source] anyhow::Error),

    /// The document folder could not be scanned or the persisted index
    /// could not be removed.
    #[error("index storage failed: {0:#}")]
    Storage(#[source] anyhow::Error),

    /// Retrieval or completion failed for a single chat turn.
    #[error("query failed: {0:#}")]
    Query(#[source] anyhow::Error),

    /// No credential is available for a provider that requires one.
    #[error("no API key configured")]
    Unconfigured,
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
