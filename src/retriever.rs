//! Retrieval over the current index.
//!
//! [`Retriever`] wraps one [`VectorIndex`] with the configured `k`;
//! [`run_search`] backs `folio search` and prints ranked chunks with their
//! scores, citations and an excerpt.

use anyhow::Result;
use std::sync::Arc;

use crate::cache::IndexCache;
use crate::credential::Credential;
use crate::error::{PipelineError, PipelineResult};
use crate::index::VectorIndex;
use crate::models::ScoredChunk;

/// Top-k similarity lookup over one index.
#[derive(Debug, Clone)]
pub struct Retriever {
    index: Arc<VectorIndex>,
    k: usize,
}

impl Retriever {
    pub fn new(index: Arc<VectorIndex>, k: usize) -> Self {
        Self { index, k }
    }

    /// The `k` chunks closest to `query`, best first. Empty only when the
    /// index is.
    pub async fn search(&self, query: &str) -> Result<Vec<ScoredChunk>> {
        self.index.similarity_search(query, self.k).await
    }
}

/// `folio search`: print ranked chunks with scores and citations.
pub async fn run_search(
    cache: &IndexCache,
    credential: Option<&Credential>,
    query: &str,
    k: Option<usize>,
) -> PipelineResult<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let lookup = cache.get_index(credential).await?;
    let Some(index) = lookup.index() else {
        return Err(PipelineError::EmptyCorpus {
            dir: cache.config().documents.dir.clone(),
        });
    };

    let k = k.unwrap_or(cache.config().retrieval.top_k);
    let results = Retriever::new(index.clone(), k)
        .search(query)
        .await
        .map_err(PipelineError::Query)?;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in results.iter().enumerate() {
        println!("{}. [{:.3}] {}", i + 1, hit.score, hit.chunk.citation());
        let excerpt: String = hit.chunk.text.chars().take(240).collect();
        println!("    excerpt: \"{}\"", excerpt.replace('\n', " ").trim());
        println!();
    }

    Ok(())
}
