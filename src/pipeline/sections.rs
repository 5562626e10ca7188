//! Section parser: split the model's Markdown into named sections.
//!
//! The analysis prompt fixes five headers, always in the same order:
//!
//! ```text
//! # Document Title
//! # Category
//! # Executive Summary
//! # Extracted Content
//! # Detected Graphics
//! ```
//!
//! Parsing is a two-step header scan rather than one regex per section:
//! every line is classified once (header of kind K, or body), then each
//! section runs from the first header of its kind to the next header of a
//! kind that *follows* it in the canonical order. A body line such as
//! `## Category of evidence` inside the extracted content therefore cannot
//! cut the content short, because only `Detected Graphics` ends it.
//!
//! The parser is a pure function over the whole text so far. The controller
//! re-runs it after every streamed fragment; any prefix of a response parses
//! without panicking and yields the sections seen so far.

use crate::pipeline::postprocess::strip_outer_fence;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Title used when the response has no (or an empty) title section.
pub const UNTITLED_DOCUMENT: &str = "Untitled Medical Document";

/// One of the five sections of the header contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionKind {
    Title,
    Category,
    Summary,
    Content,
    Graphics,
}

impl SectionKind {
    /// Canonical order of the header contract.
    pub const ALL: [SectionKind; 5] = [
        SectionKind::Title,
        SectionKind::Category,
        SectionKind::Summary,
        SectionKind::Content,
        SectionKind::Graphics,
    ];

    /// Header text as the prompt asks for it.
    pub fn header(&self) -> &'static str {
        match self {
            SectionKind::Title => "Document Title",
            SectionKind::Category => "Category",
            SectionKind::Summary => "Executive Summary",
            SectionKind::Content => "Extracted Content",
            SectionKind::Graphics => "Detected Graphics",
        }
    }

    /// Kinds whose header ends this section.
    fn following(&self) -> &'static [SectionKind] {
        let pos = Self::ALL.iter().position(|k| k == self).unwrap_or(0);
        &Self::ALL[pos + 1..]
    }

    fn from_header_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "document title" => Some(SectionKind::Title),
            "category" => Some(SectionKind::Category),
            "executive summary" => Some(SectionKind::Summary),
            "extracted content" => Some(SectionKind::Content),
            // Older prompt revisions called the graphics section "Graphics & Data".
            "detected graphics" | "graphics & data" => Some(SectionKind::Graphics),
            _ => None,
        }
    }
}

/// The five sections of one response. Missing sections are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedSections {
    pub title: String,
    /// May hold several comma-separated candidates; see [`split_categories`].
    pub category: String,
    pub summary: String,
    pub content: String,
    /// Raw body of the graphics section, normally a JSON array.
    pub graphics_json: String,
}

// Any number of leading '#', optional whitespace, then a known header name.
// Trailing text on the header line is ignored.
static RE_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^#+\s*(document title|category|executive summary|extracted content|detected graphics|graphics & data)",
    )
    .unwrap()
});

fn classify(line: &str) -> Option<SectionKind> {
    RE_HEADER
        .captures(line)
        .and_then(|caps| SectionKind::from_header_name(&caps[1]))
}

/// Parse an accumulated (possibly partial) response into its sections.
pub fn parse(markdown: &str) -> ParsedSections {
    let text = strip_outer_fence(markdown);
    let lines: Vec<&str> = text.lines().collect();
    let kinds: Vec<Option<SectionKind>> = lines.iter().map(|l| classify(l)).collect();

    let extract = |target: SectionKind| -> String {
        let Some(start) = kinds.iter().position(|k| *k == Some(target)) else {
            return String::new();
        };
        let stops = target.following();
        let end = kinds[start + 1..]
            .iter()
            .position(|k| matches!(k, Some(kind) if stops.contains(kind)))
            .map(|offset| start + 1 + offset)
            .unwrap_or(lines.len());
        lines[start + 1..end].join("\n").trim().to_string()
    };

    let title = extract(SectionKind::Title);
    ParsedSections {
        title: if title.is_empty() {
            UNTITLED_DOCUMENT.to_string()
        } else {
            title
        },
        category: extract(SectionKind::Category),
        summary: extract(SectionKind::Summary),
        content: extract(SectionKind::Content),
        graphics_json: extract(SectionKind::Graphics),
    }
}

/// Split a category section into candidates: comma-separated, trimmed,
/// empty entries dropped.
pub fn split_categories(category: &str) -> Vec<String> {
    category
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}
