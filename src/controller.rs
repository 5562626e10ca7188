//! Document lifecycle controller.
//!
//! Owns the one active document and the history. A scan goes
//! start → stream → post-process → (review) → completed, or ends in
//! `error`. See [`crate::document::DocumentStatus`] for the state machine.
//!
//! ## Identity guard
//!
//! Every mutation carries the [`ScanTicket`] handed out by
//! [`DocumentController::start_scan`]. Starting a new scan bumps a
//! generation counter; from then on every continuation of the previous scan
//! (a late fragment, a crop batch finishing, a finalize) compares its ticket
//! against the current generation, finds it stale and does nothing. No
//! cancel signal is sent to the old stream; it is simply no longer listened
//! to.
//!
//! Mutation logic runs under a `std::sync::Mutex` and never across an
//! `.await`, so concurrent scans only interleave at whole mutation steps.
//! Progress callbacks fire after the lock is released.

use crate::config::{ReviewPolicy, ScanConfig};
use crate::document::{DocumentId, DocumentStatus, ExtractedGraphic, PageAsset, ProcessedDocument, ReviewData};
use crate::error::ScanError;
use crate::history::History;
use crate::pipeline::crop::crop_all;
use crate::pipeline::graphics::decode_indexed;
use crate::pipeline::llm::{AnalysisEngine, LlmAnalysisEngine};
use crate::pipeline::postprocess::{clean_content, clean_inline, strip_outer_fence};
use crate::pipeline::sections::{self, split_categories, ParsedSections, UNTITLED_DOCUMENT};
use crate::progress::ScanProgressCallback;
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Category used when the model named none.
pub const GENERAL_CATEGORY: &str = "General";

/// Proof of which scan a continuation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanTicket {
    id: DocumentId,
    generation: u64,
}

impl ScanTicket {
    pub fn id(&self) -> DocumentId {
        self.id
    }
}

/// How a call to [`DocumentController::run_scan`] ended.
#[derive(Debug, Clone)]
pub enum ScanOutcome {
    /// Auto-finalized; already at the front of the history.
    Completed(Arc<ProcessedDocument>),
    /// Waiting for [`DocumentController::resolve_review`].
    Reviewing(ProcessedDocument),
    /// Terminal failure; `error` holds the message. Not in history.
    Failed(ProcessedDocument),
    /// A newer scan took over before this one finished.
    Superseded,
}

impl ScanOutcome {
    pub fn status(&self) -> Option<DocumentStatus> {
        match self {
            ScanOutcome::Completed(doc) => Some(doc.status),
            ScanOutcome::Reviewing(doc) | ScanOutcome::Failed(doc) => Some(doc.status),
            ScanOutcome::Superseded => None,
        }
    }
}

/// Whether a human has to confirm the result before it is finalized.
pub fn needs_review(categories: &[String], graphics: &[ExtractedGraphic]) -> bool {
    categories.len() > 1 || !graphics.is_empty()
}

enum Applied<T> {
    Done(T),
    Stale,
}

#[derive(Default)]
struct ControllerState {
    generation: u64,
    active: Option<ProcessedDocument>,
    history: History,
}

/// Drives scans from start to a single terminal outcome.
pub struct DocumentController {
    config: ScanConfig,
    engine: Arc<dyn AnalysisEngine>,
    state: Mutex<ControllerState>,
}

impl DocumentController {
    pub fn new(config: ScanConfig, engine: Arc<dyn AnalysisEngine>) -> Self {
        Self {
            config,
            engine,
            state: Mutex::new(ControllerState::default()),
        }
    }

    /// Controller backed by the `edgequake-llm` provider the config resolves to.
    pub fn from_config(config: ScanConfig) -> Self {
        let engine = Arc::new(LlmAnalysisEngine::new(config.clone()));
        Self::new(config, engine)
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    // ── Read access ──────────────────────────────────────────────────────

    /// Snapshot of the document in `processing` or `reviewing`, if any.
    pub fn active(&self) -> Option<ProcessedDocument> {
        self.lock().active.clone()
    }

    /// Finalized documents, most recent first.
    pub fn history(&self) -> Vec<Arc<ProcessedDocument>> {
        self.lock().history.to_vec()
    }

    pub fn document(&self, id: DocumentId) -> Option<Arc<ProcessedDocument>> {
        self.lock().history.get(id)
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Start and run a scan to its outcome.
    pub async fn scan(&self, pages: Vec<PageAsset>, file_name: Option<String>) -> Result<ScanOutcome, ScanError> {
        let ticket = self.start_scan(pages, file_name)?;
        Ok(self.run_scan(&ticket).await)
    }

    /// Make a fresh `processing` document the active one.
    ///
    /// Any scan still in flight is superseded.
    pub fn start_scan(&self, pages: Vec<PageAsset>, file_name: Option<String>) -> Result<ScanTicket, ScanError> {
        if pages.is_empty() {
            return Err(ScanError::NoPages);
        }
        let page_count = pages.len();
        let doc = ProcessedDocument::new(pages, file_name);
        let id = doc.id;

        let ticket = {
            let mut state = self.lock();
            state.generation += 1;
            if let Some(prev) = state.active.replace(doc) {
                info!("Scan {} superseded while {}", prev.id, prev.status);
            }
            ScanTicket {
                id,
                generation: state.generation,
            }
        };

        info!("Scan {} started with {} page(s)", id, page_count);
        self.notify(|cb| cb.on_scan_start(id, page_count));
        Ok(ticket)
    }

    /// Pull the engine's fragments in order, then post-process.
    pub async fn run_scan(&self, ticket: &ScanTicket) -> ScanOutcome {
        let pages = match self.with_active(ticket, |doc, _| {
            (doc.status == DocumentStatus::Processing).then(|| doc.pages.clone())
        }) {
            Applied::Done(Some(pages)) => pages,
            Applied::Done(None) | Applied::Stale => return ScanOutcome::Superseded,
        };

        let mut fragments = self.engine.analyze(pages);
        while let Some(item) = fragments.next().await {
            match item {
                Ok(fragment) => {
                    if !self.apply_fragment(ticket, &fragment) {
                        return ScanOutcome::Superseded;
                    }
                }
                Err(e) => {
                    return match self.fail(ticket, e.to_string()) {
                        Some(doc) => ScanOutcome::Failed(doc),
                        None => ScanOutcome::Superseded,
                    };
                }
            }
        }

        self.finish(ticket).await
    }

    /// Append one streamed fragment and refresh the partial sections.
    ///
    /// Returns `false` when the ticket is stale or the document is no
    /// longer processing; nothing is changed in that case.
    pub fn apply_fragment(&self, ticket: &ScanTicket, fragment: &str) -> bool {
        let applied = self.with_active(ticket, |doc, _| {
            if doc.status != DocumentStatus::Processing {
                return None;
            }
            doc.detailed_content.push_str(fragment);
            let partial = sections::parse(&doc.detailed_content);
            doc.detected_title = Some(clean_inline(&partial.title));
            doc.summary = clean_inline(&partial.summary);
            Some(doc.detailed_content.len())
        });

        match applied {
            Applied::Done(Some(len)) => {
                debug!("Scan {}: {} chars received", ticket.id, len);
                self.notify(|cb| cb.on_fragment(ticket.id, len));
                true
            }
            _ => {
                debug!("Scan {}: fragment discarded", ticket.id);
                false
            }
        }
    }

    /// Move the document to `error` and release the active slot.
    ///
    /// Returns the failed snapshot, or `None` when the ticket is stale or
    /// the document can no longer fail.
    pub fn fail(&self, ticket: &ScanTicket, message: impl Into<String>) -> Option<ProcessedDocument> {
        let message = message.into();
        let failed = self.with_active(ticket, |doc, _| {
            if !doc.status.can_transition_to(DocumentStatus::Error) {
                warn!("Scan {}: cannot fail a document in status '{}'", doc.id, doc.status);
                return None;
            }
            doc.status = DocumentStatus::Error;
            doc.error = Some(message.clone());
            Some(doc.clone())
        });

        match failed {
            Applied::Done(Some(doc)) => {
                warn!("Scan {} failed: {}", doc.id, message);
                self.notify(|cb| cb.on_scan_error(doc.id, &message));
                Some(doc)
            }
            _ => None,
        }
    }

    /// Final parse, graphics crop and review gate.
    async fn finish(&self, ticket: &ScanTicket) -> ScanOutcome {
        let snapshot = self.with_active(ticket, |doc, _| {
            (doc.status == DocumentStatus::Processing).then(|| (doc.detailed_content.clone(), doc.pages.clone()))
        });
        let (raw, pages) = match snapshot {
            Applied::Done(Some(snapshot)) => snapshot,
            _ => return ScanOutcome::Superseded,
        };

        let parsed = sections::parse(&raw);
        let categories = split_categories(&parsed.category);
        let detected = decode_indexed(&parsed.graphics_json);
        if !detected.is_empty() {
            info!("Scan {}: detected {} graphic(s)", ticket.id, detected.len());
            if self.is_current(ticket) {
                let count = detected.len();
                self.notify(|cb| cb.on_graphics_detected(ticket.id, count));
            }
        }

        let graphics = crop_all(&pages, detected, self.config.crop_format).await;
        let content = final_content(&parsed, &raw);
        let review = needs_review(&categories, &graphics);

        let outcome = self.with_active(ticket, move |doc, history| {
            if doc.status != DocumentStatus::Processing {
                return ScanOutcome::Superseded;
            }
            let primary = categories
                .first()
                .cloned()
                .unwrap_or_else(|| GENERAL_CATEGORY.to_string());

            doc.detected_title = Some(clean_inline(&parsed.title));
            doc.summary = clean_inline(&parsed.summary);
            doc.detailed_content = content;
            doc.category = Some(primary.clone());

            if review {
                doc.status = DocumentStatus::Reviewing;
                doc.review_data = Some(ReviewData {
                    detected_categories: categories,
                    potential_graphics: graphics,
                    selected_category: primary,
                });
                ScanOutcome::Reviewing(doc.clone())
            } else {
                doc.status = DocumentStatus::Completed;
                doc.graphics = Vec::new();
                let finished = Arc::new(doc.clone());
                history.push_front(Arc::clone(&finished));
                ScanOutcome::Completed(finished)
            }
        });

        match outcome {
            Applied::Done(ScanOutcome::Reviewing(doc)) => {
                let review = doc.review_data.as_ref();
                let categories = review.map(|r| r.detected_categories.as_slice()).unwrap_or(&[]);
                let graphics = review.map(|r| r.potential_graphics.len()).unwrap_or(0);
                info!(
                    "Scan {} needs review: {} categories, {} graphic(s)",
                    doc.id,
                    categories.len(),
                    graphics
                );
                self.notify(|cb| cb.on_review_required(doc.id, categories, graphics));
                ScanOutcome::Reviewing(doc)
            }
            Applied::Done(ScanOutcome::Completed(doc)) => {
                info!("Scan {} completed: '{}'", doc.id, doc.display_title());
                self.notify(|cb| cb.on_scan_complete(doc.id));
                ScanOutcome::Completed(doc)
            }
            Applied::Done(other) => other,
            Applied::Stale => {
                debug!("Scan {}: post-processing result discarded", ticket.id);
                ScanOutcome::Superseded
            }
        }
    }

    /// Finalize a document in `reviewing` with the user's decision.
    ///
    /// `graphics` is the candidate list as edited by the user. Entries are
    /// matched to the candidates by id and only their `selected` flag is
    /// taken; unknown and repeated ids are ignored. Under
    /// [`ReviewPolicy::DropDeselected`] entries with `selected = false` are
    /// removed. A blank `category` keeps the pre-selected one.
    pub fn resolve_review(
        &self,
        ticket: &ScanTicket,
        category: impl Into<String>,
        graphics: Vec<ExtractedGraphic>,
    ) -> Result<Arc<ProcessedDocument>, ScanError> {
        let category = category.into();
        let policy = self.config.review_policy;

        let result = self.with_active(ticket, |doc, history| {
            if doc.status != DocumentStatus::Reviewing {
                return Err(ScanError::InvalidTransition {
                    from: doc.status,
                    action: "resolve review for",
                });
            }
            let Some(review) = doc.review_data.take() else {
                return Err(ScanError::Internal(format!("document {} is reviewing without review data", doc.id)));
            };

            // Only `selected` comes from the caller; everything else is the
            // candidate as cropped.
            let candidates: HashMap<&str, &ExtractedGraphic> =
                review.potential_graphics.iter().map(|g| (g.id.as_str(), g)).collect();
            let mut seen = HashSet::new();
            let kept: Vec<ExtractedGraphic> = graphics
                .into_iter()
                .filter_map(|g| {
                    let Some(candidate) = candidates.get(g.id.as_str()) else {
                        warn!("Scan {}: ignoring unknown graphic '{}'", doc.id, g.id);
                        return None;
                    };
                    if !seen.insert(candidate.id.as_str()) {
                        warn!("Scan {}: ignoring duplicate graphic '{}'", doc.id, g.id);
                        return None;
                    }
                    Some(ExtractedGraphic {
                        selected: g.selected,
                        ..(*candidate).clone()
                    })
                })
                .filter(|g| policy == ReviewPolicy::KeepDeselected || g.selected)
                .collect();

            let category = category.trim();
            doc.category = Some(if category.is_empty() {
                review.selected_category
            } else {
                category.to_string()
            });
            doc.graphics = kept;
            doc.status = DocumentStatus::Completed;

            let finished = Arc::new(doc.clone());
            history.push_front(Arc::clone(&finished));
            Ok(finished)
        });

        match result {
            Applied::Done(Ok(doc)) => {
                info!(
                    "Scan {} completed after review: '{}' ({} graphic(s) selected)",
                    doc.id,
                    doc.category.as_deref().unwrap_or(GENERAL_CATEGORY),
                    doc.selected_graphics().count()
                );
                self.notify(|cb| cb.on_scan_complete(doc.id));
                Ok(doc)
            }
            Applied::Done(Err(e)) => Err(e),
            Applied::Stale => match self.document(ticket.id) {
                Some(done) => Err(ScanError::InvalidTransition {
                    from: done.status,
                    action: "resolve review for",
                }),
                None => Err(ScanError::NoActiveDocument),
            },
        }
    }

    // ── Internals ────────────────────────────────────────────────────────

    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(&self, ticket: &ScanTicket) -> bool {
        let state = self.lock();
        state.generation == ticket.generation && state.active.as_ref().is_some_and(|d| d.id == ticket.id)
    }

    /// Run `f` on the active document if `ticket` still owns it.
    ///
    /// A document left in a terminal status leaves the active slot.
    fn with_active<T>(
        &self,
        ticket: &ScanTicket,
        f: impl FnOnce(&mut ProcessedDocument, &mut History) -> T,
    ) -> Applied<T> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let out = match state.active.as_mut() {
            Some(doc) if state.generation == ticket.generation && doc.id == ticket.id => f(doc, &mut state.history),
            _ => return Applied::Stale,
        };
        if state.active.as_ref().is_some_and(|d| d.status.is_terminal()) {
            state.active = None;
        }
        Applied::Done(out)
    }

    fn notify(&self, f: impl FnOnce(&dyn ScanProgressCallback)) {
        if let Some(ref cb) = self.config.progress_callback {
            f(&**cb);
        }
    }
}

/// The cleaned content section. A response without any recognised header
/// keeps its whole text as content.
fn final_content(parsed: &ParsedSections, raw: &str) -> String {
    let headerless = parsed.title == UNTITLED_DOCUMENT
        && parsed.category.is_empty()
        && parsed.summary.is_empty()
        && parsed.content.is_empty()
        && parsed.graphics_json.is_empty();
    if headerless {
        clean_content(&strip_outer_fence(raw))
    } else {
        clean_content(&parsed.content)
    }
}
