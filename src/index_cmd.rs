//! `folio index`, `folio refresh` and `folio status`.

use std::path::Path;

use crate::cache::{IndexCache, IndexLookup};
use crate::config::Config;
use crate::credential::Credential;
use crate::error::PipelineResult;
use crate::index::read_manifest;
use crate::loader::scan_documents;

/// Load or build the index and report how it was obtained.
pub async fn run_index(
    cache: &IndexCache,
    credential: Option<&Credential>,
    upload: Option<&Path>,
) -> PipelineResult<()> {
    let lookup = match upload {
        Some(path) => cache.load_upload(path, credential).await?,
        None => cache.get_index(credential).await?,
    };
    print_lookup(&lookup, cache.config());
    Ok(())
}

/// Delete the cached and persisted index, then rebuild.
pub async fn run_refresh(cache: &IndexCache, credential: Option<&Credential>) -> PipelineResult<()> {
    cache.invalidate().await?;
    println!("index refresh: cleared persisted index");
    let lookup = cache.get_index(credential).await?;
    print_lookup(&lookup, cache.config());
    Ok(())
}

/// Show the persisted manifest and the PDFs currently in the folder.
pub fn run_status(config: &Config) -> anyhow::Result<()> {
    let dir = &config.index.dir;
    println!("index: {}", dir.display());
    if dir.join("manifest.json").exists() {
        match read_manifest(dir) {
            Ok(m) => {
                println!("  build: {}", m.build_id);
                println!("  built at: {}", m.built_at.format("%Y-%m-%d %H:%M:%S UTC"));
                println!("  model: {} ({} dims)", m.model, m.dims);
                println!("  chunks: {}", m.count);
                println!(
                    "  chunking: size {}, overlap {}",
                    m.chunk_size, m.chunk_overlap
                );
            }
            Err(e) => println!("  unreadable: {:#}", e),
        }
    } else {
        println!("  no index");
    }

    let files = scan_documents(&config.documents.dir)?;
    println!();
    println!("documents: {}", config.documents.dir.display());
    if files.is_empty() {
        println!("  no PDF files");
    }
    for f in &files {
        println!("  {} ({} bytes)", f.name, f.size);
    }
    Ok(())
}

pub(crate) fn print_lookup(lookup: &IndexLookup, config: &Config) {
    match lookup {
        IndexLookup::Ready {
            index,
            origin,
            failures,
        } => {
            println!("index ready ({})", origin.as_str());
            println!("  chunks: {}", index.len());
            println!("  build: {}", index.manifest().build_id);
            for f in failures {
                println!("  warning: skipped {}: {}", f.file, f.reason);
            }
        }
        IndexLookup::NoDocuments { failures } => {
            println!(
                "No documents available in {}. Add PDF files and refresh.",
                config.documents.dir.display()
            );
            for f in failures {
                println!("  warning: skipped {}: {}", f.file, f.reason);
            }
        }
    }
}
