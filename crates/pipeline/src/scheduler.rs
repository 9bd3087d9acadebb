//! Batch scheduler
//!
//! Reads raw frames in batches, dispatches the sampled ones to the vectorizer
//! under a concurrency bound, and hands every outcome to the collector before
//! the next batch is read.

use crate::collector::ResultCollector;
use crate::config::PipelineConfig;
use crate::context::RunContext;
use crate::error::{TaskFailure, TaskOutcome};
use crate::report::RunReport;
use godseye_common::{FaceDetections, FrameTask, Result};
use godseye_decoder::{FrameSource, SamplingPolicy};
use godseye_storage::{FrameStore, VectorStore};
use godseye_vectorizer::FaceVectorizer;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

/// Frame processing pipeline
///
/// One pipeline can serve many runs; each run gets its own [`RunContext`].
pub struct FramePipeline {
    config: PipelineConfig,
    sampling: SamplingPolicy,
    vectorizer: Arc<dyn FaceVectorizer>,
    frames: Arc<dyn FrameStore>,
    vectors: Arc<dyn VectorStore>,
}

impl FramePipeline {
    /// # Errors
    ///
    /// Returns `InvalidInput` if the configuration has a zero skip, batch size
    /// or concurrency limit
    pub fn new(
        config: PipelineConfig,
        vectorizer: Arc<dyn FaceVectorizer>,
        frames: Arc<dyn FrameStore>,
        vectors: Arc<dyn VectorStore>,
    ) -> Result<Self> {
        config.validate()?;
        let sampling = SamplingPolicy::new(config.skip)?;
        Ok(Self {
            config,
            sampling,
            vectorizer,
            frames,
            vectors,
        })
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Process `source` to exhaustion.
    ///
    /// Per-frame failures (vectorization errors, timeouts, storage errors) are
    /// counted in the report and never end the run. A source read error ends
    /// the stream early and is recorded in `source_error`.
    pub async fn run<S: FrameSource + ?Sized>(
        &self,
        ctx: &RunContext,
        source: &mut S,
    ) -> Result<RunReport> {
        let started = Instant::now();
        let mut report = RunReport::new(ctx.camera_id.clone(), ctx.run_id);
        let collector = ResultCollector::new(
            ctx.camera_id.clone(),
            Arc::clone(&self.frames),
            Arc::clone(&self.vectors),
        );
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));

        info!(
            camera_id = %ctx.camera_id,
            run_id = %ctx.run_id,
            fps = source.fps(),
            skip = self.config.skip,
            batch_size = self.config.batch_size,
            max_concurrency = self.config.max_concurrency,
            "=== Pipeline run started ==="
        );

        let mut exhausted = false;
        while !exhausted {
            let mut tasks = Vec::new();
            for _ in 0..self.config.batch_size {
                // Non-candidates are stepped over without producing an image
                let read = if self.sampling.is_candidate(report.frames_read) {
                    source.next_frame().map(|frame| frame.map(Some))
                } else {
                    source.skip_frame().map(|skipped| skipped.map(|_| None))
                };
                match read {
                    Ok(Some(frame)) => {
                        report.frames_read += 1;
                        if let Some(frame) = frame {
                            tasks.push(FrameTask {
                                camera_id: ctx.camera_id.clone(),
                                frame_index: frame.frame_index,
                                timestamp: frame.timestamp,
                                image: frame.image,
                            });
                        }
                    }
                    Ok(None) => {
                        exhausted = true;
                        break;
                    }
                    Err(e) => {
                        warn!(
                            camera_id = %ctx.camera_id,
                            frames_read = report.frames_read,
                            error = %e,
                            "Frame source failed, treating as end of stream"
                        );
                        report.source_error = Some(e.to_string());
                        exhausted = true;
                        break;
                    }
                }
            }

            if tasks.is_empty() {
                continue;
            }

            let dispatched = tasks.len();
            let (tx, rx) = mpsc::channel(dispatched);
            for task in tasks {
                let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                    // The semaphore is never closed while the run is alive
                    break;
                };
                let tx = tx.clone();
                let vectorizer = Arc::clone(&self.vectorizer);
                let timeout = self.config.task_timeout();
                tokio::spawn(async move {
                    let outcome = vectorize_task(vectorizer, task, timeout).await;
                    drop(permit);
                    if tx.send(outcome).await.is_err() {
                        debug!("Collector went away before outcome was delivered");
                    }
                });
            }
            drop(tx);

            let batch = collector.drain(rx, dispatched).await;
            info!(
                camera_id = %ctx.camera_id,
                batch = report.batches + 1,
                dispatched = batch.dispatched,
                vectorized = batch.vectorized,
                failed = batch.failed,
                with_faces = batch.with_faces,
                saved = batch.saved,
                "Batch complete"
            );
            report.absorb(&batch);
        }

        report.elapsed = started.elapsed();
        info!(
            camera_id = %ctx.camera_id,
            run_id = %ctx.run_id,
            frames_read = report.frames_read,
            frames_sampled = report.frames_sampled,
            frames_vectorized = report.frames_vectorized,
            frames_failed = report.frames_failed,
            frames_saved = report.frames_saved,
            embeddings_stored = report.embeddings_stored,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "=== Pipeline run complete ==="
        );
        if report.all_vectorizations_failed() {
            warn!(
                camera_id = %ctx.camera_id,
                frames_sampled = report.frames_sampled,
                "No frame was vectorized successfully"
            );
        }

        Ok(report)
    }
}

/// Run one vectorization call in its own task so a panic in the vectorizer
/// surfaces as a join error instead of tearing down the batch
async fn vectorize_task(
    vectorizer: Arc<dyn FaceVectorizer>,
    mut task: FrameTask,
    timeout: Option<Duration>,
) -> TaskOutcome {
    let started = Instant::now();
    let image = Arc::new(std::mem::take(&mut task.image));
    let bytes = Arc::clone(&image);
    let mut handle = tokio::spawn(async move { vectorizer.vectorize_faces(&bytes).await });

    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
            Ok(joined) => Ok(joined),
            Err(_) => {
                handle.abort();
                Err(TaskFailure::TimedOut(limit))
            }
        },
        None => Ok(handle.await),
    };

    let result: std::result::Result<FaceDetections, TaskFailure> = match joined {
        Ok(Ok(Ok(faces))) => Ok(faces),
        Ok(Ok(Err(e))) => Err(TaskFailure::Vectorization(e.to_string())),
        Ok(Err(join_error)) => {
            warn!(
                camera_id = %task.camera_id,
                frame_index = task.frame_index,
                panicked = join_error.is_panic(),
                "Vectorization task did not finish"
            );
            Err(TaskFailure::Aborted)
        }
        Err(timed_out) => Err(timed_out),
    };

    task.image = Arc::try_unwrap(image).unwrap_or_else(|shared| shared.as_ref().clone());
    TaskOutcome {
        task,
        result,
        elapsed: started.elapsed(),
    }
}
