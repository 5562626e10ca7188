//! Lifecycle integration tests for the document controller.
//!
//! The analysis engine is replaced by scripted engines: one replays a fixed
//! list of fragments, the other hands each scan a channel so a test decides
//! exactly when fragments arrive. Pages are generated in memory with the
//! `image` crate; no API key or network is needed.
//!
//! Run with:
//!   cargo test --test lifecycle

use futures::StreamExt;
use image::{DynamicImage, Rgb, RgbImage};
use mediscan::{
    AnalysisEngine, BoundingBox, DocumentController, DocumentId, DocumentStatus, FragmentStream, MediaType,
    PageAsset, ReviewPolicy, ScanConfig, ScanError, ScanOutcome, ScanProgressCallback, ScanTicket,
};
use std::io::Cursor;
use std::sync::{Arc, Mutex, OnceLock, Weak};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

// ── Test helpers ─────────────────────────────────────────────────────────────

fn jpeg_page(w: u32, h: u32) -> PageAsset {
    let img = DynamicImage::ImageRgb8(RgbImage::from_fn(w, h, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    }));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Jpeg)
        .unwrap();
    PageAsset::new(buf, MediaType::Jpeg)
}

fn pdf_page() -> PageAsset {
    PageAsset::new(b"%PDF-1.7\n%test".to_vec(), MediaType::Pdf)
}

fn response(category: &str, graphics_json: &str) -> String {
    format!(
        "# Document Title\nLipid Panel Results\n\n\
# Category\n{category}\n\n\
# Executive Summary\nLDL slightly elevated.   \n\n\
# Extracted Content\n| Test | Value |\n| LDL | 142 mg/dL |\n\n\n\n\nReviewed by lab.\n\n\
# Detected Graphics\n{graphics_json}\n"
    )
}

/// Replays the same fragments for every scan.
struct ScriptedEngine {
    fragments: Vec<Result<String, String>>,
}

impl ScriptedEngine {
    fn chunked(text: &str, size: usize) -> Arc<Self> {
        let chars: Vec<char> = text.chars().collect();
        let fragments = chars
            .chunks(size)
            .map(|c| Ok(c.iter().collect::<String>()))
            .collect();
        Arc::new(Self { fragments })
    }

    fn failing(partial: &str, message: &str) -> Arc<Self> {
        Arc::new(Self {
            fragments: vec![Ok(partial.to_string()), Err(message.to_string())],
        })
    }
}

impl AnalysisEngine for ScriptedEngine {
    fn analyze(&self, _pages: Vec<PageAsset>) -> FragmentStream {
        let items: Vec<Result<String, ScanError>> = self
            .fragments
            .iter()
            .map(|f| {
                f.clone()
                    .map_err(|message| ScanError::LlmApiError { message })
            })
            .collect();
        futures::stream::iter(items).boxed()
    }
}

/// Each call to `analyze` hands the test a sender for that scan's stream.
struct ChannelEngine {
    senders: Mutex<Vec<mpsc::UnboundedSender<Result<String, ScanError>>>>,
}

impl ChannelEngine {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            senders: Mutex::new(Vec::new()),
        })
    }

    fn sender(&self, scan: usize) -> mpsc::UnboundedSender<Result<String, ScanError>> {
        self.senders.lock().unwrap()[scan].clone()
    }

    fn scans(&self) -> usize {
        self.senders.lock().unwrap().len()
    }
}

impl AnalysisEngine for ChannelEngine {
    fn analyze(&self, _pages: Vec<PageAsset>) -> FragmentStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.lock().unwrap().push(tx);
        UnboundedReceiverStream::new(rx).boxed()
    }
}

async fn wait_for_scans(engine: &ChannelEngine, n: usize) {
    while engine.scans() < n {
        tokio::task::yield_now().await;
    }
}

#[derive(Default)]
struct RecordingCallback {
    events: Mutex<Vec<String>>,
}

impl ScanProgressCallback for RecordingCallback {
    fn on_scan_start(&self, _id: DocumentId, page_count: usize) {
        self.events.lock().unwrap().push(format!("start:{page_count}"));
    }
    fn on_graphics_detected(&self, _id: DocumentId, count: usize) {
        self.events.lock().unwrap().push(format!("graphics:{count}"));
    }
    fn on_review_required(&self, _id: DocumentId, categories: &[String], graphics: usize) {
        self.events
            .lock()
            .unwrap()
            .push(format!("review:{}:{graphics}", categories.len()));
    }
    fn on_scan_complete(&self, _id: DocumentId) {
        self.events.lock().unwrap().push("complete".into());
    }
    fn on_scan_error(&self, _id: DocumentId, error: &str) {
        self.events.lock().unwrap().push(format!("error:{error}"));
    }
}

// ── Auto-finalize ────────────────────────────────────────────────────────────

#[tokio::test]
async fn single_category_without_graphics_auto_finalizes() {
    let engine = ScriptedEngine::chunked(&response("Cardiology", "[]"), 7);
    let controller = DocumentController::new(ScanConfig::default(), engine);

    let outcome = controller
        .scan(vec![jpeg_page(200, 100)], Some("lipids".into()))
        .await
        .unwrap();
    let ScanOutcome::Completed(doc) = outcome else {
        panic!("expected completion, got {outcome:?}");
    };

    assert_eq!(doc.status, DocumentStatus::Completed);
    assert_eq!(doc.detected_title.as_deref(), Some("Lipid Panel Results"));
    assert_eq!(doc.category.as_deref(), Some("Cardiology"));
    assert_eq!(doc.summary, "LDL slightly elevated.");
    assert!(doc.graphics.is_empty());
    assert!(doc.review_data.is_none());
    assert_eq!(doc.file_name.as_deref(), Some("lipids"));

    // Cleaned content: table separator inserted, blank-line run collapsed
    assert!(doc.detailed_content.starts_with("| Test | Value |\n| --- | --- |\n| LDL | 142 mg/dL |"));
    assert!(!doc.detailed_content.contains("\n\n\n\n"));
    assert!(!doc.detailed_content.contains("# Detected Graphics"));

    assert!(controller.active().is_none());
    assert_eq!(controller.history().len(), 1);
    assert_eq!(controller.history()[0].id, doc.id);
}

#[tokio::test]
async fn history_is_most_recent_first() {
    let engine = ScriptedEngine::chunked(&response("General", "[]"), 64);
    let controller = DocumentController::new(ScanConfig::default(), engine);

    let Ok(ScanOutcome::Completed(a)) = controller.scan(vec![pdf_page()], Some("A".into())).await else {
        panic!("scan A did not complete");
    };
    let Ok(ScanOutcome::Completed(b)) = controller.scan(vec![pdf_page()], Some("B".into())).await else {
        panic!("scan B did not complete");
    };

    let ids: Vec<_> = controller.history().iter().map(|d| d.id).collect();
    assert_eq!(ids, vec![b.id, a.id]);
}

// ── Review gate ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn several_categories_require_review() {
    let engine = ScriptedEngine::chunked(&response("Cardiology, Endocrinology", "[]"), 16);
    let controller = DocumentController::new(ScanConfig::default(), engine);

    let ticket = controller.start_scan(vec![pdf_page()], None).unwrap();
    let ScanOutcome::Reviewing(doc) = controller.run_scan(&ticket).await else {
        panic!("expected review");
    };
    let review = doc.review_data.as_ref().unwrap();
    assert_eq!(review.detected_categories, vec!["Cardiology", "Endocrinology"]);
    assert_eq!(review.selected_category, "Cardiology");
    assert!(review.potential_graphics.is_empty());
    assert!(controller.history().is_empty());
    assert_eq!(controller.active().unwrap().status, DocumentStatus::Reviewing);

    let done = controller
        .resolve_review(&ticket, "Endocrinology", vec![])
        .unwrap();
    assert_eq!(done.status, DocumentStatus::Completed);
    assert_eq!(done.category.as_deref(), Some("Endocrinology"));
    assert!(done.review_data.is_none());
    assert!(controller.active().is_none());
    assert_eq!(controller.history()[0].id, done.id);
}

#[tokio::test]
async fn detected_graphics_are_cropped_and_reviewed() {
    let graphics = r#"```json
[
  {"box_2d": [0, 0, 500, 500], "label": "LDL trend", "page_index": 0},
  {"box_2d": [500, 500, 500, 500], "label": "empty box", "page_index": 0},
  {"box_2d": [0, 0, 1000, 1000], "label": "scanned form", "page_index": 1},
  {"box_2d": [250, 0, 750, 1000], "label": "wrong page", "page_index": 9},
  {"label": "no box"}
]
```"#;
    let engine = ScriptedEngine::chunked(&response("Cardiology", graphics), 5);
    let callback = Arc::new(RecordingCallback::default());
    let config = ScanConfig::builder()
        .progress_callback(callback.clone() as Arc<dyn ScanProgressCallback>)
        .build()
        .unwrap();
    let controller = DocumentController::new(config, engine);

    let ticket = controller
        .start_scan(vec![jpeg_page(400, 200), pdf_page()], None)
        .unwrap();
    let ScanOutcome::Reviewing(doc) = controller.run_scan(&ticket).await else {
        panic!("expected review");
    };

    let candidates = &doc.review_data.as_ref().unwrap().potential_graphics;
    let ids: Vec<&str> = candidates.iter().map(|g| g.id.as_str()).collect();
    assert_eq!(ids, vec!["graphic-0", "graphic-3"]);
    assert!(candidates.iter().all(|g| g.selected));

    assert_eq!((candidates[0].image.width, candidates[0].image.height), (200, 100));
    assert_eq!(candidates[0].image.mime_type, MediaType::Jpeg);
    // Out-of-range page index falls back to page 0
    assert_eq!(candidates[1].page_index, 0);
    assert_eq!((candidates[1].image.width, candidates[1].image.height), (400, 100));

    let events = callback.events.lock().unwrap().clone();
    assert_eq!(events, vec!["start:2", "graphics:4", "review:1:2"]);
}

#[tokio::test]
async fn deselected_graphics_follow_review_policy() {
    let graphics = r#"[{"box_2d":[0,0,500,500],"label":"A"},{"box_2d":[500,500,1000,1000],"label":"B"}]"#;

    for (policy, expected) in [
        (ReviewPolicy::KeepDeselected, vec![("graphic-0", true), ("graphic-1", false)]),
        (ReviewPolicy::DropDeselected, vec![("graphic-0", true)]),
    ] {
        let engine = ScriptedEngine::chunked(&response("Oncology", graphics), 32);
        let config = ScanConfig::builder().review_policy(policy).build().unwrap();
        let controller = DocumentController::new(config, engine);

        let ticket = controller.start_scan(vec![jpeg_page(100, 100)], None).unwrap();
        let ScanOutcome::Reviewing(doc) = controller.run_scan(&ticket).await else {
            panic!("expected review");
        };
        let mut edited = doc.review_data.unwrap().potential_graphics;
        edited[1].selected = false;
        let mut foreign = edited[0].clone();
        foreign.id = "graphic-99".into();
        edited.push(foreign);

        let done = controller.resolve_review(&ticket, "", edited).unwrap();
        let got: Vec<(&str, bool)> = done.graphics.iter().map(|g| (g.id.as_str(), g.selected)).collect();
        assert_eq!(got, expected, "policy {policy:?}");
        // Blank category keeps the pre-selected one
        assert_eq!(done.category.as_deref(), Some("Oncology"));
        assert_eq!(done.selected_graphics().count(), 1);
    }
}

#[tokio::test]
async fn review_takes_only_the_selection_from_the_caller() {
    let graphics = r#"[{"box_2d":[0,0,500,500],"label":"LDL trend"}]"#;
    let engine = ScriptedEngine::chunked(&response("Cardiology", graphics), 32);
    let controller = DocumentController::new(ScanConfig::default(), engine);

    let ticket = controller.start_scan(vec![jpeg_page(100, 100)], None).unwrap();
    let ScanOutcome::Reviewing(doc) = controller.run_scan(&ticket).await else {
        panic!("expected review");
    };
    let original = doc.review_data.unwrap().potential_graphics;

    let mut edited = original.clone();
    edited[0].label = "Swapped".into();
    edited[0].image.data = vec![1, 2, 3];
    edited[0].image.width = 9999;
    edited[0].bbox = BoundingBox::new(1, 2, 3, 4);
    edited[0].page_index = 7;
    edited[0].selected = false;
    let mut repeated = edited[0].clone();
    repeated.selected = true;
    edited.push(repeated);

    let done = controller.resolve_review(&ticket, "", edited).unwrap();
    assert_eq!(done.graphics.len(), 1);
    let kept = &done.graphics[0];
    assert!(!kept.selected);
    assert_eq!(kept.label, "LDL trend");
    assert_eq!(kept.image, original[0].image);
    assert_eq!(kept.bbox, original[0].bbox);
    assert_eq!(kept.page_index, 0);
}

#[tokio::test]
async fn resolve_review_is_only_legal_while_reviewing() {
    let engine = ScriptedEngine::chunked(&response("General", "[]"), 64);
    let controller = DocumentController::new(ScanConfig::default(), engine);

    let ticket = controller.start_scan(vec![pdf_page()], None).unwrap();
    // Still processing
    let err = controller.resolve_review(&ticket, "General", vec![]).unwrap_err();
    assert!(matches!(
        err,
        ScanError::InvalidTransition {
            from: DocumentStatus::Processing,
            ..
        }
    ));

    let ScanOutcome::Completed(_) = controller.run_scan(&ticket).await else {
        panic!("expected completion");
    };
    // Already completed
    let err = controller.resolve_review(&ticket, "General", vec![]).unwrap_err();
    assert!(matches!(
        err,
        ScanError::InvalidTransition {
            from: DocumentStatus::Completed,
            ..
        }
    ));
    assert_eq!(controller.history().len(), 1);
}

// ── Error path ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn engine_error_fails_the_scan() {
    let engine = ScriptedEngine::failing("# Document Title\nHalf", "API key not valid");
    let callback = Arc::new(RecordingCallback::default());
    let config = ScanConfig::builder()
        .progress_callback(callback.clone() as Arc<dyn ScanProgressCallback>)
        .build()
        .unwrap();
    let controller = DocumentController::new(config, engine);

    let outcome = controller.scan(vec![pdf_page()], None).await.unwrap();
    let ScanOutcome::Failed(doc) = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert_eq!(doc.status, DocumentStatus::Error);
    assert_eq!(doc.error.as_deref(), Some("LLM API error: API key not valid"));
    assert!(controller.history().is_empty());
    assert!(controller.active().is_none());

    let events = callback.events.lock().unwrap().clone();
    assert_eq!(events.last().unwrap(), "error:LLM API error: API key not valid");
    assert!(!events.contains(&"complete".to_string()));
}

#[tokio::test]
async fn garbled_response_still_completes() {
    let engine = ScriptedEngine::chunked("The model ignored every instruction.\n[{\"box_2d\": [1, 2", 4);
    let controller = DocumentController::new(ScanConfig::default(), engine);

    let outcome = controller.scan(vec![jpeg_page(50, 50)], None).await.unwrap();
    let ScanOutcome::Completed(doc) = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    assert_eq!(doc.category.as_deref(), Some("General"));
    assert_eq!(doc.detected_title.as_deref(), Some("Untitled Medical Document"));
    assert!(doc.detailed_content.starts_with("The model ignored"));
}

// ── Identity guard ───────────────────────────────────────────────────────────

#[tokio::test]
async fn late_fragments_of_a_superseded_scan_are_ignored() {
    let engine = ChannelEngine::new();
    let controller = Arc::new(DocumentController::new(ScanConfig::default(), engine.clone()));

    // Scan A starts streaming
    let ticket_a = controller.start_scan(vec![pdf_page()], Some("A".into())).unwrap();
    let run_a = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move { controller.run_scan(&ticket_a).await })
    };
    wait_for_scans(&engine, 1).await;
    let tx_a = engine.sender(0);
    tx_a.send(Ok("# Document Title\nDocument A\n".into())).unwrap();

    // Scan B replaces A while A is mid-flight
    let ticket_b = controller.start_scan(vec![pdf_page()], Some("B".into())).unwrap();
    let run_b = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move { controller.run_scan(&ticket_b).await })
    };
    wait_for_scans(&engine, 2).await;
    let tx_b = engine.sender(1);
    tx_b.send(Ok("# Document Title\nDocument B\n".into())).unwrap();

    // A's late chunk and end of stream. A drops its receiver as soon as it
    // notices it was superseded, so this send may fail.
    let _ = tx_a.send(Ok("# Category\nA-only, Stale\n# Executive Summary\nfrom A\n".into()));
    drop(tx_a);
    assert!(matches!(run_a.await.unwrap(), ScanOutcome::Superseded));

    let active = controller.active().unwrap();
    assert_eq!(active.id, ticket_b.id());
    assert!(!active.detailed_content.contains("A-only"));
    assert!(!active.detailed_content.contains("Document A"));

    tx_b.send(Ok("# Category\nNeurology\n".into())).unwrap();
    drop(tx_b);
    let ScanOutcome::Completed(b) = run_b.await.unwrap() else {
        panic!("scan B should complete");
    };
    assert_eq!(b.detected_title.as_deref(), Some("Document B"));
    assert_eq!(b.category.as_deref(), Some("Neurology"));

    let history = controller.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, ticket_b.id());
}

#[tokio::test]
async fn stale_ticket_cannot_fail_or_resolve_the_new_scan() {
    let engine = ChannelEngine::new();
    let controller = DocumentController::new(ScanConfig::default(), engine);

    let a = controller.start_scan(vec![pdf_page()], None).unwrap();
    let b = controller.start_scan(vec![pdf_page()], None).unwrap();

    assert!(controller.fail(&a, "late network error").is_none());
    assert!(matches!(
        controller.resolve_review(&a, "General", vec![]),
        Err(ScanError::NoActiveDocument)
    ));
    let active = controller.active().unwrap();
    assert_eq!(active.id, b.id());
    assert_eq!(active.status, DocumentStatus::Processing);
    assert!(active.error.is_none());
}

/// Starts a second scan the first time graphics are reported, so the first
/// scan is superseded between detection and the end of its crops.
#[derive(Default)]
struct SupersedeOnGraphics {
    controller: OnceLock<Weak<DocumentController>>,
    second: Mutex<Option<ScanTicket>>,
}

impl ScanProgressCallback for SupersedeOnGraphics {
    fn on_graphics_detected(&self, _id: DocumentId, _count: usize) {
        let mut second = self.second.lock().unwrap();
        if second.is_some() {
            return;
        }
        let controller = self.controller.get().and_then(Weak::upgrade).unwrap();
        *second = Some(
            controller
                .start_scan(vec![jpeg_page(120, 60)], Some("B".into()))
                .unwrap(),
        );
    }
}

#[tokio::test]
async fn scan_superseded_during_cropping_leaves_the_new_scan_alone() {
    let graphics = r#"[{"box_2d":[0,0,500,500],"label":"Chart","page_index":0}]"#;
    let engine = ScriptedEngine::chunked(&response("Cardiology", graphics), 32);
    let callback = Arc::new(SupersedeOnGraphics::default());
    let config = ScanConfig::builder()
        .progress_callback(callback.clone() as Arc<dyn ScanProgressCallback>)
        .build()
        .unwrap();
    let controller = Arc::new(DocumentController::new(config, engine));
    assert!(callback.controller.set(Arc::downgrade(&controller)).is_ok());

    let ticket_a = controller
        .start_scan(vec![jpeg_page(200, 100)], Some("A".into()))
        .unwrap();
    let outcome = controller.run_scan(&ticket_a).await;
    assert!(matches!(outcome, ScanOutcome::Superseded), "got {outcome:?}");

    // A's crop results were discarded; B is untouched
    let ticket_b = (*callback.second.lock().unwrap()).expect("second scan started");
    let active = controller.active().unwrap();
    assert_eq!(active.id, ticket_b.id());
    assert_eq!(active.status, DocumentStatus::Processing);
    assert!(active.detailed_content.is_empty());
    assert!(active.detected_title.is_none());
    assert!(active.category.is_none());
    assert!(active.review_data.is_none());
    assert!(controller.history().is_empty());

    let ScanOutcome::Reviewing(doc) = controller.run_scan(&ticket_b).await else {
        panic!("scan B should reach review");
    };
    let review = doc.review_data.unwrap();
    assert_eq!(review.potential_graphics.len(), 1);
    // Cropped from B's 120x60 page, not A's 200x100 one
    let image = &review.potential_graphics[0].image;
    assert_eq!((image.width, image.height), (60, 30));

    let done = controller
        .resolve_review(&ticket_b, "", review.potential_graphics)
        .unwrap();
    assert_eq!(done.file_name.as_deref(), Some("B"));
    let history = controller.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, ticket_b.id());
    assert!(matches!(
        controller.resolve_review(&ticket_a, "", vec![]),
        Err(ScanError::NoActiveDocument)
    ));
}

#[tokio::test]
async fn streaming_updates_partial_sections() {
    let engine = ChannelEngine::new();
    let controller = Arc::new(DocumentController::new(ScanConfig::default(), engine.clone()));

    let ticket = controller.start_scan(vec![pdf_page()], None).unwrap();
    let run = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move { controller.run_scan(&ticket).await })
    };
    wait_for_scans(&engine, 1).await;
    let tx = engine.sender(0);

    tx.send(Ok("# Document Title\nDischarge Letter\n".into())).unwrap();
    while controller.active().unwrap().detailed_content.is_empty() {
        tokio::task::yield_now().await;
    }
    let partial = controller.active().unwrap();
    assert_eq!(partial.status, DocumentStatus::Processing);
    assert_eq!(partial.detected_title.as_deref(), Some("Discharge Letter"));
    assert!(partial.summary.is_empty());

    tx.send(Ok("# Category\nInternal Medicine\n# Executive Summary\nStable.\n".into()))
        .unwrap();
    drop(tx);
    let ScanOutcome::Completed(doc) = run.await.unwrap() else {
        panic!("expected completion");
    };
    assert_eq!(doc.summary, "Stable.");
}
