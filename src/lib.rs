//! # mediscan
//!
//! Turn photographed or uploaded medical documents into structured,
//! reviewable records using Vision Language Models (VLMs).
//!
//! ## Why this crate?
//!
//! Brochures, lab reports and patient leaflets mix running text, dosage
//! tables and charts. A VLM reads the page images and answers with one
//! Markdown response in a fixed header layout; this crate turns that
//! response, as it streams in, into a typed [`ProcessedDocument`], cuts the
//! charts it located out of the original pages, and asks a human to confirm
//! the result when the model was unsure.
//!
//! ## Pipeline Overview
//!
//! ```text
//! pages (photos / PDFs)
//!  │
//!  ├─ 1. Input     read path or URL, sniff type, downscale photos
//!  ├─ 2. Analyze   one VLM call, replayed as a fragment stream
//!  ├─ 3. Parse     split Markdown into title / category / summary /
//!  │               content / graphics after every fragment
//!  ├─ 4. Graphics  decode the JSON bounding boxes, tolerate noise
//!  ├─ 5. Crop      cut each box out of its page (all-settled)
//!  ├─ 6. Gate      several categories or any graphic ⇒ review
//!  └─ 7. Finalize  completed document at the front of the history
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mediscan::{load_pages, DocumentController, ScanConfig, ScanOutcome};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from GEMINI_API_KEY / OPENAI_API_KEY / …
//!     let config = ScanConfig::default();
//!     let pages = load_pages(&["leaflet.jpg".to_string()], &config).await?;
//!     let controller = DocumentController::from_config(config);
//!
//!     let ticket = controller.start_scan(pages, Some("leaflet".into()))?;
//!     match controller.run_scan(&ticket).await {
//!         ScanOutcome::Completed(doc) => println!("{}", doc.detailed_content),
//!         ScanOutcome::Reviewing(doc) => {
//!             let review = doc.review_data.expect("reviewing documents carry review data");
//!             let done = controller.resolve_review(
//!                 &ticket,
//!                 review.selected_category,
//!                 review.potential_graphics,
//!             )?;
//!             println!("{}", done.detailed_content);
//!         }
//!         ScanOutcome::Failed(doc) => eprintln!("{}", doc.error.unwrap_or_default()),
//!         ScanOutcome::Superseded => {}
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `mediscan` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! mediscan = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod controller;
pub mod document;
pub mod error;
pub mod history;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod report;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{CropFormat, ReviewPolicy, ScanConfig, ScanConfigBuilder};
pub use controller::{needs_review, DocumentController, ScanOutcome, ScanTicket, GENERAL_CATEGORY};
pub use document::{
    BoundingBox, DetectedGraphic, DocumentId, DocumentStatus, EncodedImage, ExtractedGraphic, MediaType,
    PageAsset, ProcessedDocument, ReviewData,
};
pub use error::{CropError, ScanError};
pub use history::History;
pub use pipeline::crop::crop;
pub use pipeline::graphics::decode_graphics;
pub use pipeline::input::{default_file_name, load_page, load_pages};
pub use pipeline::llm::{AnalysisEngine, FragmentStream, LlmAnalysisEngine};
pub use pipeline::sections::{parse, split_categories, ParsedSections, UNTITLED_DOCUMENT};
pub use progress::{NoopProgressCallback, ProgressCallback, ScanProgressCallback};
pub use report::{render_markdown, write_report};
