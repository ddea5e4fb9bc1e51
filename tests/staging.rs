//! Integration tests for the staged file store and the two steps around it.
//!
//! Everything here runs offline: storage is in memory or in a temporary
//! directory, and collaborators are counting fakes (or the pdfium engine on
//! an operation it refuses before binding the library).

use async_trait::async_trait;
use docdesk::{
    DirStorage, DocDeskError, FallbackHolder, KeyValueStorage, OcrEngine, OcrOutput,
    OutputDocument, PdfEngine, PdfRequest, PdfiumEngine, Placement, ProcessingOutcome,
    ProcessingProgressCallback, ProcessingStep, Route, SessionStorage, StageConfig, StageInput,
    StagedFile, StagedFileStore, StagingOptions, ToolId, UploadStep,
};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// ── Test helpers ─────────────────────────────────────────────────────────────

fn store_over(storage: Arc<dyn KeyValueStorage>, budget: usize) -> StagedFileStore {
    let config = StageConfig::builder()
        .storage_budget_bytes(budget)
        .build()
        .unwrap();
    StagedFileStore::with_holder(storage, FallbackHolder::new(), config)
}

fn memory_store(budget: usize) -> StagedFileStore {
    store_over(Arc::new(SessionStorage::new()), budget)
}

fn pdf_bytes(len: usize) -> Vec<u8> {
    let mut bytes = b"%PDF-1.7\n".to_vec();
    bytes.extend((0..len.saturating_sub(bytes.len())).map(|i| (i * 31 % 251) as u8));
    bytes
}

fn pdf(name: &str, len: usize) -> StageInput {
    StageInput::from_bytes(name, "application/pdf", pdf_bytes(len))
}

// Deterministic noise compresses badly as PNG, so the payload is large.
fn noise_png(w: u32, h: u32) -> Vec<u8> {
    let mut state = 0x9e37_79b9_u32;
    let img = RgbImage::from_fn(w, h, |_, _| {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        let [r, g, b, _] = state.to_le_bytes();
        Rgb([r, g, b])
    });
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

#[derive(Default)]
struct CountingOcr {
    calls: AtomicUsize,
}

#[async_trait]
impl OcrEngine for CountingOcr {
    fn name(&self) -> &str {
        "counting"
    }

    async fn recognize(
        &self,
        image: &StagedFile,
        _language: &str,
        _progress: &dyn ProcessingProgressCallback,
    ) -> Result<OcrOutput, DocDeskError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(OcrOutput {
            text: format!("text of {}", image.name),
            ..Default::default()
        })
    }
}

#[derive(Default)]
struct CountingPdf {
    calls: AtomicUsize,
}

#[async_trait]
impl PdfEngine for CountingPdf {
    fn name(&self) -> &str {
        "counting"
    }

    async fn transform(&self, request: PdfRequest) -> Result<Vec<OutputDocument>, DocDeskError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(request
            .inputs
            .into_iter()
            .map(|i| OutputDocument::pdf(i.name, i.bytes))
            .collect())
    }
}

// ── Round trip ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn lossless_round_trip_of_arbitrary_bytes() {
    let store = memory_store(4 * 1024 * 1024);
    let all_bytes: Vec<u8> = (0..=255u8).cycle().take(70_001).collect();
    let inputs = vec![
        StageInput::from_bytes("empty.bin", "application/octet-stream", Vec::new()),
        StageInput::from_bytes("all.bin", "application/octet-stream", all_bytes.clone()),
        pdf("doc.pdf", 2048),
    ];

    let receipt = store.save(inputs, StagingOptions::default()).await.unwrap();
    assert_eq!(receipt.placements(), vec![Placement::Storage; 3]);

    let set = store.load().unwrap();
    assert_eq!(set.stage_id, receipt.stage_id);
    assert!(set.files[0].bytes().unwrap().is_empty());
    assert_eq!(set.files[1].bytes().unwrap(), all_bytes);
    assert_eq!(set.files[2].bytes().unwrap(), pdf_bytes(2048));
    assert_eq!(set.files[2].mime_type, "application/pdf");
    assert_eq!(set.files[2].size_bytes, 2048);
}

#[tokio::test]
async fn oversized_png_is_compressed_to_jpeg() {
    // Scaled down from a 6 MB photo against a 4 MB budget.
    let png = noise_png(400, 400);
    let budget = 150_000;
    assert!(png.len() > budget);

    let store = memory_store(budget);
    let receipt = store
        .save(
            vec![StageInput::from_bytes("photo.png", "image/png", png.clone())],
            StagingOptions::for_tool(ToolId::Ocr),
        )
        .await
        .unwrap();

    let quality = match receipt.files[0].placement {
        Placement::Compressed { quality } => quality,
        other => panic!("expected the compression path, got {other:?}"),
    };
    assert!((10..=90).contains(&quality));

    let set = store.load().unwrap();
    let file = &set.files[0];
    assert_eq!(file.name, "photo.png");
    assert_eq!(file.mime_type, "image/jpeg");
    assert_eq!(file.size_bytes, png.len() as u64);
    assert!(file.payload.len() <= budget);

    let decoded = image::load_from_memory(&file.bytes().unwrap()).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (400, 400));
}

#[tokio::test]
async fn png_over_budget_at_quality_floor_is_held_verbatim() {
    // Noise never gets under 2 kB as JPEG, even at the lowest quality.
    let png = noise_png(400, 400);
    let store = memory_store(2_000);
    let receipt = store
        .save(
            vec![StageInput::from_bytes("photo.png", "image/png", png.clone())],
            StagingOptions::for_tool(ToolId::Ocr),
        )
        .await
        .unwrap();
    assert_eq!(receipt.placements(), vec![Placement::Memory]);

    let set = store.load().unwrap();
    let file = &set.files[0];
    assert_eq!(file.mime_type, "image/png");
    assert_eq!(file.size_bytes, png.len() as u64);
    assert_eq!(file.bytes().unwrap(), png);
}

// ── Single active set ────────────────────────────────────────────────────────

#[tokio::test]
async fn second_save_replaces_the_first_completely() {
    let store = memory_store(4 * 1024 * 1024);
    store
        .save(
            vec![pdf("a1.pdf", 100), pdf("a2.pdf", 100), pdf("a3.pdf", 100)],
            StagingOptions::for_tool(ToolId::PdfMerge),
        )
        .await
        .unwrap();
    store
        .save(
            vec![pdf("b.pdf", 200)],
            StagingOptions::for_tool(ToolId::PdfRotate).with("angle", "90"),
        )
        .await
        .unwrap();

    let set = store.load().unwrap();
    let names: Vec<&str> = set.files.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["b.pdf"]);
    assert_eq!(set.tool(), Some(ToolId::PdfRotate));
    assert_eq!(set.options.get("angle"), Some("90"));
}

#[tokio::test]
async fn memory_members_of_an_old_set_do_not_leak_into_a_new_one() {
    let store = memory_store(1024);
    store
        .save(vec![pdf("big.pdf", 10_000)], StagingOptions::default())
        .await
        .unwrap();
    store
        .save(vec![pdf("small.pdf", 100)], StagingOptions::default())
        .await
        .unwrap();

    let set = store.load().unwrap();
    assert_eq!(set.files.len(), 1);
    assert_eq!(set.files[0].name, "small.pdf");
}

#[tokio::test]
async fn overlapping_saves_leave_the_last_one() {
    let store = Arc::new(memory_store(4 * 1024 * 1024));
    let (a, b) = tokio::join!(
        store.save(vec![pdf("first.pdf", 500)], StagingOptions::default()),
        store.save(vec![pdf("second.pdf", 500)], StagingOptions::default()),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_ne!(a.stage_id, b.stage_id);

    let set = store.load().unwrap();
    assert_eq!(set.stage_id, b.stage_id);
    assert_eq!(set.files.len(), 1);
    assert_eq!(set.files[0].name, "second.pdf");
}

// ── Clear ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn clear_is_idempotent() {
    let storage = Arc::new(SessionStorage::new());
    let store = store_over(storage.clone(), 1024);
    store
        .save(vec![pdf("small.pdf", 100), pdf("big.pdf", 5000)], StagingOptions::default())
        .await
        .unwrap();

    store.clear();
    assert!(store.load().is_none());
    assert!(storage.keys().is_empty());

    store.clear();
    assert!(store.load().is_none());
    assert!(store.status().is_none());
}

// ── Fallback ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn non_image_over_budget_is_held_in_memory() {
    let storage = Arc::new(SessionStorage::new());
    let store = store_over(storage.clone(), 64 * 1024);
    let big = pdf_bytes(200 * 1024);

    let receipt = store
        .save(
            vec![StageInput::from_bytes("big.pdf", "application/pdf", big.clone())],
            StagingOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(receipt.placements(), vec![Placement::Memory]);
    assert!(receipt.any_in_memory());
    assert!(!storage.keys().iter().any(|k| k.contains(".stage.file.")));

    let set = store.load().unwrap();
    assert_eq!(set.files[0].bytes().unwrap(), big);
    assert_eq!(set.files[0].mime_type, "application/pdf");
}

#[tokio::test]
async fn quota_refusal_falls_back_per_file() {
    // Budget allows both payloads but the facility only has room for one.
    let storage = Arc::new(SessionStorage::with_capacity(30_000));
    let store = store_over(storage, 20_000);

    let receipt = store
        .save(
            vec![pdf("one.pdf", 12_000), pdf("two.pdf", 12_000)],
            StagingOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(
        receipt.placements(),
        vec![Placement::Storage, Placement::Memory]
    );

    let set = store.load().unwrap();
    assert_eq!(set.files[0].bytes().unwrap(), pdf_bytes(12_000));
    assert_eq!(set.files[1].bytes().unwrap(), pdf_bytes(12_000));
}

#[tokio::test]
async fn undecodable_image_over_budget_falls_back_to_memory() {
    let store = memory_store(1024);
    let junk = vec![0x89u8; 8 * 1024];
    let receipt = store
        .save(
            vec![StageInput::from_bytes("broken.png", "image/png", junk.clone())],
            StagingOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(receipt.placements(), vec![Placement::Memory]);

    let set = store.load().unwrap();
    assert_eq!(set.files[0].mime_type, "image/png");
    assert_eq!(set.files[0].bytes().unwrap(), junk);
}

// ── Restart ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn stored_set_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let before = store_over(Arc::new(DirStorage::open(dir.path()).unwrap()), 64 * 1024);
    before
        .save(
            vec![pdf("keep.pdf", 4096)],
            StagingOptions::for_tool(ToolId::PdfSplit).with("ranges", "1-2"),
        )
        .await
        .unwrap();
    drop(before);

    let after = store_over(Arc::new(DirStorage::open(dir.path()).unwrap()), 64 * 1024);
    let set = after.load().unwrap();
    assert_eq!(set.files[0].bytes().unwrap(), pdf_bytes(4096));
    assert_eq!(set.options.get("ranges"), Some("1-2"));
}

#[tokio::test]
async fn memory_members_are_lost_on_restart() {
    let dir = tempfile::tempdir().unwrap();
    let before = store_over(Arc::new(DirStorage::open(dir.path()).unwrap()), 8 * 1024);
    before
        .save(
            vec![pdf("small.pdf", 1024), pdf("big.pdf", 64 * 1024)],
            StagingOptions::for_tool(ToolId::PdfMerge),
        )
        .await
        .unwrap();
    assert_eq!(before.load().unwrap().files.len(), 2);
    drop(before);

    // A fresh holder stands in for a full reload.
    let after = store_over(Arc::new(DirStorage::open(dir.path()).unwrap()), 8 * 1024);
    assert!(after.load().is_none());
    assert!(after.status().is_none());

    let step = ProcessingStep::new(
        Arc::new(after),
        Arc::new(CountingOcr::default()),
        Arc::new(CountingPdf::default()),
    );
    assert_eq!(
        step.run(ToolId::PdfMerge).await,
        ProcessingOutcome::Redirect(Route::Upload(ToolId::PdfMerge))
    );
}

// ── Failed reads ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn unreadable_input_keeps_the_previous_set() {
    let store = memory_store(4 * 1024 * 1024);
    store
        .save(vec![pdf("old.pdf", 300)], StagingOptions::default())
        .await
        .unwrap();

    let err = store
        .save(
            vec![
                pdf("new.pdf", 300),
                StageInput::from_path("/definitely/not/here.pdf"),
            ],
            StagingOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DocDeskError::FileNotFound { .. }));
    assert!(err.is_input_read());
    assert_eq!(err.user_message(), "Failed to process file. Please try again.");

    let set = store.load().unwrap();
    assert_eq!(set.files[0].name, "old.pdf");
}

#[tokio::test]
async fn local_files_are_read_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("on-disk.pdf");
    std::fs::write(&path, pdf_bytes(777)).unwrap();

    let store = memory_store(4 * 1024 * 1024);
    store
        .save(vec![StageInput::from_path(&path)], StagingOptions::default())
        .await
        .unwrap();

    let set = store.load().unwrap();
    assert_eq!(set.files[0].name, "on-disk.pdf");
    assert_eq!(set.files[0].mime_type, "application/pdf");
    assert_eq!(set.files[0].bytes().unwrap(), pdf_bytes(777));
}

// ── Upload → processing ──────────────────────────────────────────────────────

#[tokio::test]
async fn password_options_reach_the_processing_step() {
    let store = Arc::new(memory_store(4 * 1024 * 1024));
    let upload = UploadStep::new(store.clone());
    let route = upload
        .submit(
            ToolId::PdfProtect,
            vec![pdf("contract.pdf", 50 * 1024)],
            StagingOptions::default().with("password", "secret"),
        )
        .await
        .unwrap();
    assert_eq!(route, Route::Processing(ToolId::PdfProtect));

    let set = store.load().unwrap();
    assert_eq!(set.files[0].bytes().unwrap(), pdf_bytes(50 * 1024));
    assert_eq!(set.options.get("password"), Some("secret"));

    // Encryption is outside what pdfium offers; the run fails cleanly and
    // still clears the store.
    let step = ProcessingStep::new(
        store.clone(),
        Arc::new(CountingOcr::default()),
        Arc::new(PdfiumEngine::new()),
    );
    match step.run(ToolId::PdfProtect).await {
        ProcessingOutcome::Failed { message, detail, .. } => {
            assert_eq!(message, ToolId::PdfProtect.failure_message());
            assert!(detail.contains("not supported"), "{detail}");
        }
        other => panic!("expected a failure, got {other:?}"),
    }
    assert!(store.load().is_none());
}

#[tokio::test]
async fn direct_navigation_redirects_without_collaborators() {
    let store = Arc::new(memory_store(4 * 1024 * 1024));
    let ocr = Arc::new(CountingOcr::default());
    let pdf_engine = Arc::new(CountingPdf::default());
    let step = ProcessingStep::new(store, ocr.clone(), pdf_engine.clone());

    for tool in ToolId::all() {
        assert_eq!(
            step.run(tool).await,
            ProcessingOutcome::Redirect(Route::Upload(tool))
        );
    }
    assert_eq!(ocr.calls.load(Ordering::SeqCst), 0);
    assert_eq!(pdf_engine.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn staged_set_is_consumed_once() {
    let store = Arc::new(memory_store(4 * 1024 * 1024));
    UploadStep::new(store.clone())
        .submit(
            ToolId::PdfMerge,
            vec![pdf("a.pdf", 100), pdf("b.pdf", 100)],
            StagingOptions::default(),
        )
        .await
        .unwrap();

    let pdf_engine = Arc::new(CountingPdf::default());
    let step = ProcessingStep::new(
        store.clone(),
        Arc::new(CountingOcr::default()),
        pdf_engine.clone(),
    );

    match step.run(ToolId::PdfMerge).await {
        ProcessingOutcome::Completed { output, .. } => {
            let docs = output.documents();
            assert_eq!(docs.len(), 2);
            assert_eq!(docs[0].bytes, pdf_bytes(100));
        }
        other => panic!("expected completion, got {other:?}"),
    }
    assert!(store.load().is_none());
    assert_eq!(
        step.run(ToolId::PdfMerge).await,
        ProcessingOutcome::Redirect(Route::Upload(ToolId::PdfMerge))
    );
    assert_eq!(pdf_engine.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn ocr_reads_the_compressed_image() {
    let store = Arc::new(memory_store(150_000));
    UploadStep::new(store.clone())
        .submit(
            ToolId::Ocr,
            vec![StageInput::from_bytes("scan.png", "image/png", noise_png(400, 400))],
            StagingOptions::default(),
        )
        .await
        .unwrap();

    let ocr = Arc::new(CountingOcr::default());
    let step = ProcessingStep::new(store, ocr.clone(), Arc::new(CountingPdf::default()));
    match step.run(ToolId::Ocr).await {
        ProcessingOutcome::Completed { output, .. } => {
            let docs = output.documents();
            assert_eq!(docs[0].name, "scan-text.txt");
            assert_eq!(docs[0].bytes, b"text of scan.png");
        }
        other => panic!("expected completion, got {other:?}"),
    }
    assert_eq!(ocr.calls.load(Ordering::SeqCst), 1);
}
