//! Prompts for the medical-document analysis call.
//!
//! The analysis prompt fixes the header vocabulary that
//! [`crate::pipeline::sections`] depends on. Changing a header here without
//! changing the parser silently empties that section, so both live behind
//! the same constants in [`crate::pipeline::sections::SectionKind`].
//!
//! Callers can override the system instruction via
//! [`crate::config::ScanConfig::system_prompt`]; the analysis prompt is
//! always sent because the rest of the pipeline relies on its contract.

/// Default system instruction for the analysis engine.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are an advanced medical document scanner and analyzer.
Your task is to convert photographed or uploaded medical and pharmaceutical brochures, flyers, pamphlets, lab reports or clinical notes into structured text.

Rules:
1. OCR & FORMATTING
   - Extract text accurately and completely
   - Keep a consistent, professional medical format (Markdown)
2. SUMMARISATION
   - Lightly summarise without losing critical details: dosages, side effects,
     contraindications, reference ranges, study results
3. GRAPHICS
   - Locate charts, graphs, diagrams and data tables that are rendered as images
   - Report each one with a bounding box on the page it appears on
4. EXCLUSIONS
   - COMPLETELY IGNORE QR codes, barcodes, social media logos, app store badges
     and generic marketing icons. Do not transcribe, describe or box them."#;

/// User-turn instruction sent with the page images.
///
/// Headers must match [`crate::pipeline::sections::SectionKind::header`].
pub const ANALYSIS_PROMPT: &str = r#"Analyze this medical document. The attached images are its pages, in order.
Output a single Markdown response structured exactly with these headers, in this order:

# Document Title
[A short descriptive title]

# Category
[Medical field. If ambiguous, list at most 3 alternatives separated by commas, e.g. "Neurology, Orthopedics"]

# Executive Summary
[Brief summary]

# Extracted Content
[Full text extraction, Markdown formatted]

# Detected Graphics
[A JSON array of the charts, graphs and diagrams found. Each entry:
{"box_2d": [ymin, xmin, ymax, xmax], "label": "short caption", "page_index": 0}
Coordinates are integers 0-1000 relative to the page the graphic is on.
page_index is the 0-based index of that page. If there are none, output []]

Do not wrap the output in markdown code blocks."#;

/// Build the user-turn text for a document of `page_count` pages.
pub fn analysis_prompt(page_count: usize) -> String {
    if page_count <= 1 {
        ANALYSIS_PROMPT.to_string()
    } else {
        format!("{ANALYSIS_PROMPT}\n\nThis document has {page_count} pages (page_index 0 to {}).", page_count - 1)
    }
}
