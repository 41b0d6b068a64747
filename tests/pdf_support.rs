//! Integration tests that run real PDF bytes through `pdf-extract`.

use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

use folio::cache::IndexCache;
use folio::config::Config;
use folio::extract::{PageExtractor, PdfExtractor};
use folio::loader::load_documents;

/// Minimal valid PDF with one page per entry of `pages`, each drawing its
/// text in Helvetica. Offsets in the xref table are computed as the body is
/// written so pdf-extract can parse it.
fn pdf_with_pages(pages: &[&str]) -> Vec<u8> {
    let n = pages.len();
    let font_id = 3;
    let page_id = |i: usize| 4 + 2 * i;
    let content_id = |i: usize| 5 + 2 * i;
    let object_count = 3 + 2 * n;

    let mut out = Vec::new();
    let mut offsets = vec![0usize; object_count + 1];
    out.extend_from_slice(b"%PDF-1.4\n");

    offsets[1] = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");

    offsets[2] = out.len();
    let kids: Vec<String> = (0..n).map(|i| format!("{} 0 R", page_id(i))).collect();
    out.extend_from_slice(
        format!(
            "2 0 obj << /Type /Pages /Kids [{}] /Count {} >> endobj\n",
            kids.join(" "),
            n
        )
        .as_bytes(),
    );

    offsets[font_id] = out.len();
    out.extend_from_slice(
        b"3 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );

    for (i, text) in pages.iter().enumerate() {
        offsets[page_id(i)] = out.len();
        out.extend_from_slice(
            format!(
                "{} 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents {} 0 R /Resources << /Font << /F1 {} 0 R >> >> >> endobj\n",
                page_id(i),
                content_id(i),
                font_id
            )
            .as_bytes(),
        );

        let stream = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", text);
        offsets[content_id(i)] = out.len();
        out.extend_from_slice(
            format!(
                "{} 0 obj << /Length {} >> stream\n{}\nendstream endobj\n",
                content_id(i),
                stream.len(),
                stream
            )
            .as_bytes(),
        );
    }

    let xref_start = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", object_count + 1).as_bytes());
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in &offsets[1..] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer << /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            object_count + 1,
            xref_start
        )
        .as_bytes(),
    );
    out
}

#[test]
fn extracts_text_per_page() {
    let bytes = pdf_with_pages(&["Skills: Python, Go.", "Certified: AWS, 2023."]);
    let pages = PdfExtractor.extract_pages(&bytes).unwrap();
    assert_eq!(pages.len(), 2);
    assert!(pages[0].contains("Python"));
    assert!(pages[1].contains("AWS"));
}

#[test]
fn loader_tags_pages_from_real_pdf() {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join("cv.pdf"),
        pdf_with_pages(&["Skills: Python, Go.", "Certified: AWS, 2023."]),
    )
    .unwrap();
    fs::write(tmp.path().join("broken.pdf"), b"%PDF-1.4\nnot really").unwrap();

    let report = load_documents(tmp.path(), &PdfExtractor).unwrap();
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].file, "broken.pdf");

    let cv: Vec<_> = report.pages.iter().filter(|p| p.source == "cv.pdf").collect();
    assert_eq!(cv.len(), 2);
    assert_eq!(cv[1].page, 2);
    assert!(cv[1].text.contains("Certified"));
}

#[tokio::test]
async fn end_to_end_search_over_real_pdf() {
    let tmp = TempDir::new().unwrap();
    let mut cfg = Config::default();
    cfg.documents.dir = tmp.path().join("data");
    cfg.index.dir = tmp.path().join("faiss_index");
    cfg.embedding.provider = "hash".to_string();
    cfg.embedding.dims = 512;
    fs::create_dir_all(&cfg.documents.dir).unwrap();
    fs::write(
        cfg.documents.dir.join("cv.pdf"),
        pdf_with_pages(&["Skills: Python, Go.", "Certified: AWS, 2023."]),
    )
    .unwrap();

    let cache = IndexCache::new(cfg, Arc::new(PdfExtractor));
    let lookup = cache.get_index(None).await.unwrap();
    let hits = lookup
        .index()
        .unwrap()
        .similarity_search("What certifications does he have?", 4)
        .await
        .unwrap();

    assert_eq!(hits[0].chunk.citation().to_string(), "cv.pdf (page 2)");
}
