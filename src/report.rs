//! Report export: a completed document as a Markdown file plus its images.
//!
//! Layout written by [`write_report`]:
//!
//! ```text
//! <dir>/
//!   <Safe_Title>.md
//!   figures/graphic-0.jpg    selected graphics only
//!   pages/page-1.jpg         original scans, PDFs included
//! ```
//!
//! The Markdown references the images by relative path, so the directory
//! can be moved or zipped as a unit.

use crate::document::{DocumentStatus, ProcessedDocument};
use crate::error::ScanError;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const FIGURES_DIR: &str = "figures";
const PAGES_DIR: &str = "pages";

/// Relative path of a graphic image inside the report directory.
fn figure_path(id: &str, ext: &str) -> String {
    format!("{FIGURES_DIR}/{id}.{ext}")
}

/// Relative path of an original page; `n` is 1-based.
fn page_path(n: usize, ext: &str) -> String {
    format!("{PAGES_DIR}/page-{n}.{ext}")
}

/// Render the document as Markdown.
///
/// Only `selected` graphics appear under "Key Figures & Data". Paragraphs
/// of the detailed content that are leaked graphics JSON are left out.
pub fn render_markdown(doc: &ProcessedDocument) -> String {
    let mut out = String::new();

    out.push_str(&format!("# {}\n\n", doc.display_title()));
    out.push_str(&format!(
        "## Category: {}\n\n",
        doc.category.as_deref().unwrap_or("Uncategorized")
    ));

    out.push_str("### Executive Summary\n\n");
    if !doc.summary.is_empty() {
        out.push_str(&doc.summary);
        out.push_str("\n\n");
    }

    let figures: Vec<_> = doc.selected_graphics().collect();
    if !figures.is_empty() {
        out.push_str("### Key Figures & Data\n\n");
        for g in figures {
            out.push_str(&format!(
                "![{}]({})\n\n*{}*\n\n",
                g.label,
                figure_path(&g.id, g.image.mime_type.extension()),
                g.label
            ));
        }
    }

    out.push_str("### Detailed Content\n\n");
    let body = content_paragraphs(&doc.detailed_content).join("\n\n");
    if !body.is_empty() {
        out.push_str(&body);
        out.push_str("\n\n");
    }

    out.push_str("### Appendix: Original Scans\n\n");
    for (i, page) in doc.pages.iter().enumerate() {
        let n = i + 1;
        let path = page_path(n, page.mime_type().extension());
        if page.is_pdf() {
            out.push_str(&format!("#### Item {n} (PDF)\n\n[PDF document]({path})\n\n"));
        } else {
            out.push_str(&format!("#### Item {n} (Image)\n\n![Item {n}]({path})\n\n"));
        }
    }

    format!("{}\n", out.trim_end())
}

/// Paragraphs of the detailed content, minus leaked graphics sections.
fn content_paragraphs(content: &str) -> Vec<&str> {
    content
        .split("\n\n")
        .map(|p| p.trim_matches('\n'))
        .filter(|p| !p.trim().is_empty())
        .filter(|p| !p.contains("# Detected Graphics"))
        .filter(|p| {
            let t = p.trim_start().trim_start_matches("```json").trim_start();
            !(t.starts_with("[{\"box_2d\"") || t.starts_with("[{\"box\""))
        })
        .collect()
}

/// File name for the report: the title with anything but ASCII letters and
/// digits replaced by `_`, capped at 50 characters.
pub fn report_file_name(doc: &ProcessedDocument) -> String {
    let safe: String = doc
        .display_title()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .take(50)
        .collect();
    if safe.trim_matches('_').is_empty() {
        "document.md".to_string()
    } else {
        format!("{safe}.md")
    }
}

/// Write the report and its images into `dir`. Returns the Markdown path.
///
/// Only completed documents can be exported. The Markdown file is written
/// atomically (temp file + rename) after all images are on disk.
pub async fn write_report(doc: &ProcessedDocument, dir: impl AsRef<Path>) -> Result<PathBuf, ScanError> {
    if doc.status != DocumentStatus::Completed {
        return Err(ScanError::NotFinalized { status: doc.status });
    }
    let dir = dir.as_ref();

    let figures: Vec<_> = doc.selected_graphics().collect();
    if !figures.is_empty() {
        create_dir(&dir.join(FIGURES_DIR)).await?;
    }
    for g in figures {
        let path = dir.join(figure_path(&g.id, g.image.mime_type.extension()));
        write_file(&path, &g.image.data).await?;
    }

    if !doc.pages.is_empty() {
        create_dir(&dir.join(PAGES_DIR)).await?;
    }
    for (i, page) in doc.pages.iter().enumerate() {
        let path = dir.join(page_path(i + 1, page.mime_type().extension()));
        write_file(&path, page.data()).await?;
    }

    let path = dir.join(report_file_name(doc));
    let tmp_path = path.with_extension("md.tmp");
    write_file(&tmp_path, render_markdown(doc).as_bytes()).await?;
    tokio::fs::rename(&tmp_path, &path)
        .await
        .map_err(|e| ScanError::ReportWriteFailed {
            path: path.clone(),
            source: e,
        })?;

    info!("Report written to {}", path.display());
    Ok(path)
}

async fn create_dir(path: &Path) -> Result<(), ScanError> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| ScanError::ReportWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<(), ScanError> {
    debug!("Writing {} ({} bytes)", path.display(), bytes.len());
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| ScanError::ReportWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })
}
