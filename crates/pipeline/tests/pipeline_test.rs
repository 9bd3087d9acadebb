//! Pipeline behavior against scripted vectorizers and in-process stores

use async_trait::async_trait;
use godseye_common::{BoundingBox, CameraId, FaceDetections, ProcessingError, Result};
use godseye_decoder::{FrameSource, MemoryFrameSource, RawFrame};
use godseye_pipeline::{ingest_video, FramePipeline, IngestOptions, PipelineConfig, RunContext};
use godseye_storage::{
    FrameStore, InMemoryVectorStore, LocalFrameConfig, LocalFrameStore, StorageError,
    StorageResult, VectorStore,
};
use godseye_vectorizer::FaceVectorizer;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// How the scripted vectorizer answers for one frame
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Reply {
    NoFaces,
    Faces(usize),
    Mismatch,
    Fail,
    Hang,
    Panic,
}

/// Vectorizer whose answer depends on the frame index encoded in the image
struct ScriptedVectorizer {
    script: Box<dyn Fn(u64) -> Reply + Send + Sync>,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedVectorizer {
    fn new(script: impl Fn(u64) -> Reply + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

fn frame_image(index: u64) -> Vec<u8> {
    format!("frame-{index}").into_bytes()
}

fn frame_index_of(image: &[u8]) -> u64 {
    std::str::from_utf8(image)
        .ok()
        .and_then(|s| s.strip_prefix("frame-"))
        .and_then(|s| s.parse().ok())
        .unwrap_or(u64::MAX)
}

fn faces(count: usize, seed: u64) -> FaceDetections {
    FaceDetections {
        boxes: (0..count)
            .map(|i| BoundingBox::new(i as f32 * 10.0, 0.0, i as f32 * 10.0 + 8.0, 8.0))
            .collect(),
        embeddings: (0..count)
            .map(|i| vec![seed as f32, i as f32, 1.0, 0.5])
            .collect(),
    }
}

#[async_trait]
impl FaceVectorizer for ScriptedVectorizer {
    async fn vectorize_faces(&self, image: &[u8]) -> Result<FaceDetections> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let index = frame_index_of(image);
        let reply = (self.script)(index);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let result = match reply {
            Reply::NoFaces => Ok(FaceDetections::default()),
            Reply::Faces(n) => Ok(faces(n, index)),
            Reply::Mismatch => {
                let mut detections = faces(2, index);
                detections.embeddings.pop();
                Ok(detections)
            }
            Reply::Fail => Err(ProcessingError::VectorizationFailure(
                "service returned 500".to_string(),
            )),
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(FaceDetections::default())
            }
            Reply::Panic => panic!("detector crashed on frame {index}"),
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Frame store that refuses every write
struct BrokenFrameStore;

#[async_trait]
impl FrameStore for BrokenFrameStore {
    async fn store_frame(&self, _: &CameraId, _: u64, _: &[u8]) -> StorageResult<String> {
        Err(StorageError::S3Error("bucket unreachable".to_string()))
    }

    async fn retrieve_frame(&self, camera_id: &CameraId, frame_index: u64) -> StorageResult<Vec<u8>> {
        Err(StorageError::NotFound(format!("{camera_id}/{frame_index}")))
    }

    async fn frame_exists(&self, _: &CameraId, _: u64) -> StorageResult<bool> {
        Ok(false)
    }

    async fn list_frames(&self, _: &CameraId) -> StorageResult<Vec<u64>> {
        Ok(Vec::new())
    }
}

struct Harness {
    _dir: TempDir,
    frames: Arc<LocalFrameStore>,
    vectors: Arc<InMemoryVectorStore>,
}

impl Harness {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let frames = Arc::new(LocalFrameStore::new(LocalFrameConfig {
            root: dir.path().to_path_buf(),
            ..LocalFrameConfig::default()
        }));
        Self {
            _dir: dir,
            frames,
            vectors: Arc::new(InMemoryVectorStore::new()),
        }
    }

    fn pipeline(&self, config: PipelineConfig, vectorizer: Arc<ScriptedVectorizer>) -> FramePipeline {
        FramePipeline::new(config, vectorizer, self.frames.clone(), self.vectors.clone()).unwrap()
    }
}

fn config(skip: u32, batch_size: usize, max_concurrency: usize) -> PipelineConfig {
    PipelineConfig {
        skip,
        batch_size,
        max_concurrency,
        task_timeout_secs: Some(30),
    }
}

fn source(frames: u64) -> MemoryFrameSource {
    MemoryFrameSource::new(25.0, (0..frames).map(frame_image).collect()).unwrap()
}

fn camera(name: &str) -> RunContext {
    RunContext::for_camera(CameraId::new(name).unwrap())
}

#[tokio::test]
async fn test_hundred_frames_skip_five() {
    let harness = Harness::new();
    // Candidates are 0, 5, ..., 95; the first twelve of them contain one face
    let vectorizer = Arc::new(ScriptedVectorizer::new(|i| {
        if i < 60 {
            Reply::Faces(1)
        } else {
            Reply::NoFaces
        }
    }));
    let pipeline = harness.pipeline(config(5, 40, 10), vectorizer.clone());
    let ctx = camera("cam-a");

    let report = pipeline.run(&ctx, &mut source(100)).await.unwrap();

    assert_eq!(report.frames_read, 100);
    assert_eq!(report.frames_sampled, 20);
    assert_eq!(report.frames_vectorized, 20);
    assert_eq!(report.frames_with_faces, 12);
    assert_eq!(report.frames_saved, 12);
    assert_eq!(report.embeddings_stored, 12);
    assert_eq!(report.batches, 3);
    assert_eq!(vectorizer.calls.load(Ordering::SeqCst), 20);

    let stored = harness.frames.list_frames(&ctx.camera_id).await.unwrap();
    let expected: Vec<u64> = (0..12).map(|i| i * 5).collect();
    assert_eq!(stored, expected);
    assert_eq!(harness.vectors.len().await, 12);

    let record = harness
        .vectors
        .records()
        .await
        .into_iter()
        .find(|r| r.metadata.frame_index == 25)
        .unwrap();
    assert_eq!(record.id, "cam-a/25/0");
    assert_eq!(record.metadata.timestamp.as_millis(), 1000);
}

#[tokio::test]
async fn test_skip_one_processes_every_frame() {
    let harness = Harness::new();
    let vectorizer = Arc::new(ScriptedVectorizer::new(|_| Reply::NoFaces));
    let pipeline = harness.pipeline(config(1, 4, 2), vectorizer.clone());

    let report = pipeline.run(&camera("cam-b"), &mut source(10)).await.unwrap();

    assert_eq!(report.frames_sampled, 10);
    assert_eq!(report.frames_saved, 0);
    assert!(harness.vectors.is_empty().await);
}

#[tokio::test]
async fn test_empty_source() {
    let harness = Harness::new();
    let vectorizer = Arc::new(ScriptedVectorizer::new(|_| Reply::Faces(1)));
    let pipeline = harness.pipeline(config(5, 40, 10), vectorizer.clone());

    let report = pipeline.run(&camera("cam-c"), &mut source(0)).await.unwrap();

    assert_eq!(report.frames_read, 0);
    assert_eq!(report.batches, 0);
    assert!(!report.all_vectorizations_failed());
    assert_eq!(vectorizer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_batch_without_candidates_continues() {
    let harness = Harness::new();
    let vectorizer = Arc::new(ScriptedVectorizer::new(|_| Reply::Faces(1)));
    // batch_size 3, skip 10: batches [0,1,2] [3,4,5] [6,7,8] [9,10,11]
    let pipeline = harness.pipeline(config(10, 3, 4), vectorizer);

    let report = pipeline.run(&camera("cam-d"), &mut source(12)).await.unwrap();

    assert_eq!(report.frames_read, 12);
    assert_eq!(report.frames_sampled, 2);
    assert_eq!(report.batches, 2);
    assert_eq!(report.frames_saved, 2);
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_is_bounded() {
    let harness = Harness::new();
    let vectorizer = Arc::new(
        ScriptedVectorizer::new(|_| Reply::Faces(1)).with_delay(Duration::from_millis(50)),
    );
    let pipeline = harness.pipeline(config(1, 20, 3), vectorizer.clone());

    let report = pipeline.run(&camera("cam-e"), &mut source(20)).await.unwrap();

    assert_eq!(report.frames_vectorized, 20);
    assert_eq!(vectorizer.max_in_flight.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_failed_frames_are_isolated() {
    let harness = Harness::new();
    let vectorizer = Arc::new(ScriptedVectorizer::new(|i| {
        if i % 2 == 0 {
            Reply::Fail
        } else {
            Reply::Faces(2)
        }
    }));
    let pipeline = harness.pipeline(config(1, 8, 4), vectorizer);
    let ctx = camera("cam-f");

    let report = pipeline.run(&ctx, &mut source(10)).await.unwrap();

    assert_eq!(report.frames_failed, 5);
    assert_eq!(report.frames_vectorized, 5);
    assert_eq!(report.frames_saved, 5);
    assert_eq!(report.embeddings_stored, 10);
    assert_eq!(
        harness.frames.list_frames(&ctx.camera_id).await.unwrap(),
        vec![1, 3, 5, 7, 9]
    );
}

#[tokio::test]
async fn test_all_failures_still_complete() {
    let harness = Harness::new();
    let vectorizer = Arc::new(ScriptedVectorizer::new(|_| Reply::Fail));
    let pipeline = harness.pipeline(config(2, 10, 5), vectorizer);

    let report = pipeline.run(&camera("cam-g"), &mut source(20)).await.unwrap();

    assert_eq!(report.frames_sampled, 10);
    assert_eq!(report.frames_failed, 10);
    assert!(report.all_vectorizations_failed());
    assert!(harness.vectors.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn test_hung_task_times_out() {
    let harness = Harness::new();
    let vectorizer = Arc::new(ScriptedVectorizer::new(|i| {
        if i == 3 {
            Reply::Hang
        } else {
            Reply::Faces(1)
        }
    }));
    let pipeline = harness.pipeline(
        config(1, 10, 4).with_task_timeout(Some(Duration::from_secs(2))),
        vectorizer,
    );

    let report = pipeline.run(&camera("cam-h"), &mut source(6)).await.unwrap();

    assert_eq!(report.frames_timed_out, 1);
    assert_eq!(report.frames_failed, 1);
    assert_eq!(report.frames_saved, 5);
}

#[tokio::test]
async fn test_panicking_vectorizer_is_contained() {
    let harness = Harness::new();
    let vectorizer = Arc::new(ScriptedVectorizer::new(|i| {
        if i == 2 {
            Reply::Panic
        } else {
            Reply::Faces(1)
        }
    }));
    let pipeline = harness.pipeline(config(1, 10, 2), vectorizer);

    let report = pipeline.run(&camera("cam-i"), &mut source(5)).await.unwrap();

    assert_eq!(report.frames_aborted, 1);
    assert_eq!(report.frames_failed, 1);
    assert_eq!(report.frames_saved, 4);
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let harness = Harness::new();
    let vectorizer = Arc::new(ScriptedVectorizer::new(|_| Reply::Faces(2)));
    let pipeline = harness.pipeline(config(3, 10, 4), vectorizer);
    let ctx = camera("cam-j");

    pipeline.run(&ctx, &mut source(30)).await.unwrap();
    let first = harness.vectors.len().await;
    let frames_first = harness.frames.list_frames(&ctx.camera_id).await.unwrap();

    pipeline.run(&ctx, &mut source(30)).await.unwrap();

    assert_eq!(first, 20);
    assert_eq!(harness.vectors.len().await, first);
    assert_eq!(
        harness.frames.list_frames(&ctx.camera_id).await.unwrap(),
        frames_first
    );
}

#[tokio::test]
async fn test_count_mismatch_writes_nothing() {
    let harness = Harness::new();
    let vectorizer = Arc::new(ScriptedVectorizer::new(|i| {
        if i == 1 {
            Reply::Mismatch
        } else {
            Reply::Faces(1)
        }
    }));
    let pipeline = harness.pipeline(config(1, 10, 2), vectorizer);
    let ctx = camera("cam-k");

    let report = pipeline.run(&ctx, &mut source(3)).await.unwrap();

    assert_eq!(report.count_mismatches, 1);
    assert_eq!(report.frames_saved, 2);
    assert!(!harness.frames.frame_exists(&ctx.camera_id, 1).await.unwrap());
    let indices: HashSet<u64> = harness
        .vectors
        .records()
        .await
        .iter()
        .map(|r| r.metadata.frame_index)
        .collect();
    assert_eq!(indices, HashSet::from([0, 2]));
}

#[tokio::test]
async fn test_vector_store_outage_is_counted() {
    let harness = Harness::new();
    harness.vectors.set_unavailable(true);
    let vectorizer = Arc::new(ScriptedVectorizer::new(|_| Reply::Faces(1)));
    let pipeline = harness.pipeline(config(1, 10, 2), vectorizer);

    let report = pipeline.run(&camera("cam-l"), &mut source(4)).await.unwrap();

    assert_eq!(report.frames_saved, 4);
    assert_eq!(report.store_failures, 4);
    assert_eq!(report.embeddings_stored, 0);
    assert_eq!(harness.vectors.store_calls(), 4);
}

#[tokio::test]
async fn test_frame_store_failure_skips_embeddings() {
    let vectors = Arc::new(InMemoryVectorStore::new());
    let vectorizer = Arc::new(ScriptedVectorizer::new(|_| Reply::Faces(1)));
    let pipeline = FramePipeline::new(
        config(1, 10, 2),
        vectorizer,
        Arc::new(BrokenFrameStore),
        vectors.clone(),
    )
    .unwrap();

    let report = pipeline.run(&camera("cam-m"), &mut source(3)).await.unwrap();

    assert_eq!(report.frames_saved, 0);
    assert_eq!(report.store_failures, 3);
    assert_eq!(vectors.store_calls(), 0);
}

#[tokio::test]
async fn test_concurrent_runs_stay_separate() {
    let harness = Harness::new();
    let vectorizer = Arc::new(ScriptedVectorizer::new(|_| Reply::Faces(1)));
    let pipeline = harness.pipeline(config(2, 10, 4), vectorizer);
    let a = RunContext::new();
    let b = RunContext::new();
    let mut source_a = source(10);
    let mut source_b = source(10);

    let (ra, rb) = tokio::join!(pipeline.run(&a, &mut source_a), pipeline.run(&b, &mut source_b));

    assert_eq!(ra.unwrap().frames_saved, 5);
    assert_eq!(rb.unwrap().frames_saved, 5);
    assert_eq!(harness.frames.list_frames(&a.camera_id).await.unwrap().len(), 5);
    assert_eq!(harness.frames.list_frames(&b.camera_id).await.unwrap().len(), 5);
    assert_eq!(harness.vectors.len().await, 10);
}

#[test]
fn test_invalid_config_is_rejected() {
    let harness = Harness::new();
    let vectorizer = Arc::new(ScriptedVectorizer::new(|_| Reply::NoFaces));
    for bad in [config(0, 10, 2), config(1, 0, 2), config(1, 10, 0)] {
        let result = FramePipeline::new(
            bad,
            vectorizer.clone(),
            harness.frames.clone(),
            harness.vectors.clone(),
        );
        assert!(matches!(result, Err(ProcessingError::InvalidInput(_))));
    }
}

#[tokio::test]
async fn test_ingest_missing_source() {
    let harness = Harness::new();
    let vectorizer = Arc::new(ScriptedVectorizer::new(|_| Reply::Faces(1)));
    let pipeline = harness.pipeline(config(1, 10, 2), vectorizer.clone());

    let result = ingest_video(
        &pipeline,
        &camera("cam-n"),
        std::path::Path::new("/nonexistent/godseye/video.mp4"),
        &IngestOptions::default(),
    )
    .await;

    assert!(matches!(result, Err(ProcessingError::SourceUnavailable(_))));
    assert_eq!(vectorizer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_ingest_image_directory() {
    let harness = Harness::new();
    let input = TempDir::new().unwrap();
    for i in 0..6u64 {
        std::fs::write(input.path().join(format!("{i:03}.jpg")), frame_image(i)).unwrap();
    }
    let vectorizer = Arc::new(ScriptedVectorizer::new(|i| {
        if i == 4 {
            Reply::Faces(1)
        } else {
            Reply::NoFaces
        }
    }));
    let pipeline = harness.pipeline(config(2, 10, 2), vectorizer);
    let ctx = camera("cam-o");

    let report = ingest_video(
        &pipeline,
        &ctx,
        input.path(),
        &IngestOptions {
            fps_hint: Some(2.0),
            delete_source: true,
        },
    )
    .await
    .unwrap();

    assert_eq!(report.frames_read, 6);
    assert_eq!(report.frames_sampled, 3);
    assert_eq!(report.frames_saved, 1);
    let record = &harness.vectors.records().await[0];
    assert_eq!(record.metadata.timestamp.as_millis(), 2000);
    // Directories are never removed
    assert!(input.path().exists());
}

/// Records which frames the pipeline asked to be produced as images
struct TrackingSource {
    inner: MemoryFrameSource,
    produced: Vec<u64>,
    skipped: Vec<u64>,
}

impl FrameSource for TrackingSource {
    fn fps(&self) -> f64 {
        self.inner.fps()
    }

    fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        let frame = self.inner.next_frame()?;
        if let Some(frame) = &frame {
            self.produced.push(frame.frame_index);
        }
        Ok(frame)
    }

    fn skip_frame(&mut self) -> Result<Option<u64>> {
        let skipped = self.inner.skip_frame()?;
        self.skipped.extend(skipped);
        Ok(skipped)
    }
}

#[tokio::test]
async fn test_only_candidates_are_produced() {
    let harness = Harness::new();
    let vectorizer = Arc::new(ScriptedVectorizer::new(|_| Reply::NoFaces));
    let pipeline = harness.pipeline(config(4, 6, 2), vectorizer.clone());
    let mut source = TrackingSource {
        inner: source(18),
        produced: Vec::new(),
        skipped: Vec::new(),
    };

    let report = pipeline.run(&camera("cam-t"), &mut source).await.unwrap();

    assert_eq!(report.frames_read, 18);
    assert_eq!(report.frames_sampled, 5);
    assert_eq!(source.produced, vec![0, 4, 8, 12, 16]);
    assert_eq!(source.skipped.len(), 13);
    assert!(source.skipped.iter().all(|i| i % 4 != 0));
    assert_eq!(vectorizer.calls.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn test_unreadable_skipped_frame_does_not_end_stream() {
    let harness = Harness::new();
    let input = TempDir::new().unwrap();
    for i in 0..6u64 {
        std::fs::write(input.path().join(format!("{i:03}.jpg")), frame_image(i)).unwrap();
    }
    // Never a candidate with skip 2, so it is never opened
    std::fs::write(input.path().join("003.png"), b"not a png").unwrap();
    std::fs::remove_file(input.path().join("003.jpg")).unwrap();

    let vectorizer = Arc::new(ScriptedVectorizer::new(|_| Reply::Faces(1)));
    let pipeline = harness.pipeline(config(2, 4, 2), vectorizer);
    let ctx = camera("cam-u");

    let report = ingest_video(
        &pipeline,
        &ctx,
        input.path(),
        &IngestOptions {
            fps_hint: Some(5.0),
            delete_source: false,
        },
    )
    .await
    .unwrap();

    assert_eq!(report.source_error, None);
    assert_eq!(report.frames_read, 6);
    assert_eq!(report.frames_sampled, 3);
    assert_eq!(
        harness.frames.list_frames(&ctx.camera_id).await.unwrap(),
        vec![0, 2, 4]
    );
}
