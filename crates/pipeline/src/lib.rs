//! Godseye Pipeline - batched face vectorization of video frames
//!
//! A run pulls raw frames from a [`godseye_decoder::FrameSource`], keeps every
//! `skip`-th one, and sends those to the face vectorizer with at most
//! `max_concurrency` calls in flight. Frames that contain faces are written to
//! the frame store and their embeddings to the vector store.
//!
//! ```text
//! FrameSource ──batch──▶ FramePipeline ──tasks──▶ FaceVectorizer
//!                              │                        │
//!                              ◀──────── outcomes ──────┘
//!                              ▼
//!                       ResultCollector ──▶ FrameStore + VectorStore
//! ```

pub mod collector;
pub mod config;
pub mod context;
pub mod error;
pub mod ingest;
pub mod report;
pub mod scheduler;

pub use collector::{BatchStats, ResultCollector};
pub use config::PipelineConfig;
pub use context::RunContext;
pub use error::{TaskFailure, TaskOutcome};
pub use ingest::{ingest_video, IngestOptions};
pub use report::RunReport;
pub use scheduler::FramePipeline;
