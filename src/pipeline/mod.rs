//! Pipeline stages for turning page photos into a structured document.
//!
//! Each submodule implements exactly one transformation step and is
//! testable on its own. The controller in [`crate::controller`] strings
//! them together.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ encode ──▶ llm ──▶ sections ──▶ graphics ──▶ crop
//! (path/URL) (JPEG)   (VLM)   (headers)    (JSON boxes)  (regions)
//!                                 │
//!                                 └──▶ postprocess (content cleanup)
//! ```
//!
//! 1. [`input`]: read a local path or URL and sniff its media type
//! 2. [`encode`]: downscale photos, base64-wrap pages, encode crops
//! 3. [`llm`]: the [`llm::AnalysisEngine`] seam and its VLM adapter;
//!    the only stage with model I/O
//! 4. [`sections`]: split the accumulated Markdown into its five sections
//! 5. [`graphics`]: decode the graphics JSON, tolerating model noise
//! 6. [`crop`]: cut detected graphics out of their pages
//!    (`spawn_blocking`, all-settled)
//! 7. [`postprocess`]: deterministic cleanup of the extracted content

pub mod crop;
pub mod encode;
pub mod graphics;
pub mod input;
pub mod llm;
pub mod postprocess;
pub mod sections;
