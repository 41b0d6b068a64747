//! Document loader: turns the input directory into page records.
//!
//! Scans the top level of the configured directory for `*.pdf` files
//! (sorted by name), extracts each file's pages through a
//! [`PageExtractor`], and tags every non-empty page with its file name and
//! 1-based page number. A file that cannot be read or parsed is reported in
//! [`LoadReport::failures`] and the rest of the directory is still loaded.
//!
//! The same scan feeds [`corpus_fingerprint`], the cache key of the index.

use anyhow::{Context, Result};
use globset::{GlobBuilder, GlobMatcher};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

use crate::config::ChunkingConfig;
use crate::extract::PageExtractor;
use crate::models::PageRecord;

/// A PDF found in the input directory. Content is read lazily by the loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub modified_ns: u128,
}

/// A file that was skipped because it could not be read or parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadFailure {
    pub file: String,
    pub reason: String,
}

/// Outcome of loading a directory.
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    /// Names of every PDF that was attempted, in load order.
    pub files: Vec<String>,
    pub pages: Vec<PageRecord>,
    pub failures: Vec<LoadFailure>,
}

impl LoadReport {
    /// True when nothing indexable was found: no PDFs, or no page had text.
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

/// List the PDFs directly inside `dir`, sorted by file name.
///
/// A missing directory yields an empty list rather than an error.
pub fn scan_documents(dir: &Path) -> Result<Vec<SourceFile>> {
    if !dir.is_dir() {
        tracing::warn!("document directory {} not found", dir.display());
        return Ok(Vec::new());
    }

    let matcher = pdf_matcher()?;
    let mut files = Vec::new();

    // Symlinked PDFs count as documents; an entry that cannot be read is
    // skipped with a warning instead of failing the scan.
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("skipping unreadable entry in {}: {}", dir.display(), e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let name = entry.file_name().to_string_lossy().to_string();
        if !matcher.is_match(&name) {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::warn!("skipping {}: {}", name, e);
                continue;
            }
        };
        let modified_ns = metadata
            .modified()
            .unwrap_or(SystemTime::UNIX_EPOCH)
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();

        files.push(SourceFile {
            name,
            path: entry.path().to_path_buf(),
            size: metadata.len(),
            modified_ns,
        });
    }

    // Sort for deterministic ordering
    files.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(files)
}

/// Load every PDF in `dir` into page records.
pub fn load_documents(dir: &Path, extractor: &dyn PageExtractor) -> Result<LoadReport> {
    let files = scan_documents(dir)?;
    let mut report = LoadReport::default();

    for file in &files {
        tracing::info!("reading {}", file.name);
        report.files.push(file.name.clone());

        match load_file_as(&file.path, &file.name, extractor) {
            Ok(pages) => {
                if pages.is_empty() {
                    tracing::debug!("{} has no extractable text", file.name);
                }
                report.pages.extend(pages);
            }
            Err(e) => {
                tracing::warn!("could not read {}: {:#}", file.name, e);
                report.failures.push(LoadFailure {
                    file: file.name.clone(),
                    reason: format!("{:#}", e),
                });
            }
        }
    }

    tracing::info!(
        "processed {} files ({} pages with text, {} failed)",
        report.files.len(),
        report.pages.len(),
        report.failures.len()
    );

    Ok(report)
}

/// Load a single PDF from anywhere on disk, named after its file name.
pub fn load_file(path: &Path, extractor: &dyn PageExtractor) -> Result<Vec<PageRecord>> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    load_file_as(path, &name, extractor)
}

fn load_file_as(path: &Path, name: &str, extractor: &dyn PageExtractor) -> Result<Vec<PageRecord>> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let pages = extractor.extract_pages(&bytes)?;

    Ok(pages
        .into_iter()
        .enumerate()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(i, text)| PageRecord {
            source: name.to_string(),
            page: i as u32 + 1,
            text,
        })
        .collect())
}

/// Content-addressed key for the current corpus state.
///
/// Hashes every file's name, size and modification time together with the
/// chunking parameters and embedding model, so the key changes whenever a
/// rebuild would produce a different index.
pub fn corpus_fingerprint(
    files: &[SourceFile],
    chunking: &ChunkingConfig,
    embedding_model: &str,
) -> String {
    let mut hasher = Sha256::new();
    for f in files {
        hasher.update(f.name.as_bytes());
        hasher.update([0u8]);
        hasher.update(f.size.to_le_bytes());
        hasher.update(f.modified_ns.to_le_bytes());
    }
    hasher.update(chunking.chunk_size.to_le_bytes());
    hasher.update(chunking.chunk_overlap.to_le_bytes());
    hasher.update(embedding_model.as_bytes());
    hex::encode(hasher.finalize())
}

fn pdf_matcher() -> Result<GlobMatcher> {
    Ok(GlobBuilder::new("*.pdf")
        .case_insensitive(true)
        .build()?
        .compile_matcher())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::ExtractError;
    use std::fs;
    use tempfile::TempDir;

    /// Treats file bytes as UTF-8 with pages separated by form feeds.
    struct FormFeedExtractor;

    impl PageExtractor for FormFeedExtractor {
        fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
            let text = std::str::from_utf8(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))?;
            if text.starts_with("BROKEN") {
                return Err(ExtractError::Pdf("broken xref".to_string()));
            }
            Ok(text.split('\x0c').map(|s| s.to_string()).collect())
        }
    }

    #[test]
    fn missing_directory_yields_no_documents() {
        let report = load_documents(Path::new("/no/such/dir"), &FormFeedExtractor).unwrap();
        assert!(report.is_empty());
        assert!(report.files.is_empty());
    }

    #[test]
    fn directory_without_pdfs_yields_no_documents() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("notes.txt"), "hello").unwrap();
        let report = load_documents(tmp.path(), &FormFeedExtractor).unwrap();
        assert!(report.is_empty());
        assert!(report.files.is_empty());
    }

    #[test]
    fn pages_are_numbered_from_one_and_empty_pages_skipped() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("cv.pdf"), "first\x0c   \x0cthird").unwrap();
        let report = load_documents(tmp.path(), &FormFeedExtractor).unwrap();
        let pages: Vec<(u32, &str)> = report
            .pages
            .iter()
            .map(|p| (p.page, p.text.as_str()))
            .collect();
        assert_eq!(pages, vec![(1, "first"), (3, "third")]);
        assert!(report.pages.iter().all(|p| p.source == "cv.pdf"));
    }

    #[test]
    fn files_load_in_name_order() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("b.pdf"), "bee").unwrap();
        fs::write(tmp.path().join("a.PDF"), "ay").unwrap();
        let report = load_documents(tmp.path(), &FormFeedExtractor).unwrap();
        assert_eq!(report.files, vec!["a.PDF", "b.pdf"]);
    }

    #[test]
    fn broken_file_is_reported_and_others_still_load() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.pdf"), "BROKEN").unwrap();
        fs::write(tmp.path().join("b.pdf"), "fine").unwrap();
        let report = load_documents(tmp.path(), &FormFeedExtractor).unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].file, "a.pdf");
        assert_eq!(report.pages.len(), 1);
        assert_eq!(report.pages[0].source, "b.pdf");
    }

    #[test]
    fn subdirectories_are_not_scanned() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("old")).unwrap();
        fs::write(tmp.path().join("old").join("x.pdf"), "nested").unwrap();
        assert!(scan_documents(tmp.path()).unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_pdfs_are_loaded_and_dangling_links_skipped() {
        let tmp = TempDir::new().unwrap();
        let real = tmp.path().join("real");
        let data = tmp.path().join("data");
        fs::create_dir_all(&real).unwrap();
        fs::create_dir_all(&data).unwrap();
        fs::write(real.join("cv.pdf"), "linked page").unwrap();
        std::os::unix::fs::symlink(real.join("cv.pdf"), data.join("cv.pdf")).unwrap();
        std::os::unix::fs::symlink(real.join("gone.pdf"), data.join("gone.pdf")).unwrap();
        fs::write(data.join("local.pdf"), "local page").unwrap();

        let report = load_documents(&data, &FormFeedExtractor).unwrap();
        assert_eq!(report.files, vec!["cv.pdf", "local.pdf"]);
        assert_eq!(report.pages.len(), 2);
        assert_eq!(report.pages[0].source, "cv.pdf");
        assert_eq!(report.pages[0].text, "linked page");
    }

    #[test]
    fn fingerprint_tracks_files_and_parameters() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.pdf"), "one").unwrap();
        let chunking = ChunkingConfig::default();
        let files = scan_documents(tmp.path()).unwrap();
        let fp1 = corpus_fingerprint(&files, &chunking, "m");
        assert_eq!(fp1, corpus_fingerprint(&files, &chunking, "m"));
        assert_ne!(fp1, corpus_fingerprint(&files, &chunking, "other-model"));

        fs::write(tmp.path().join("b.pdf"), "two").unwrap();
        let files = scan_documents(tmp.path()).unwrap();
        assert_ne!(fp1, corpus_fingerprint(&files, &chunking, "m"));
    }

    #[test]
    fn load_file_uses_file_name_as_source() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("upload.pdf");
        fs::write(&path, "page one\x0cpage two").unwrap();
        let pages = load_file(&path, &FormFeedExtractor).unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[1].source, "upload.pdf");
        assert_eq!(pages[1].page, 2);
    }
}
