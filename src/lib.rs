//! Godseye - face indexing for surveillance video
//!
//! Facade over the workspace crates:
//! - [`common`]: data model, timestamps, camera ids, errors
//! - [`decoder`]: frame sources and sampling
//! - [`vectorizer`]: detection service client
//! - [`storage`]: vector, frame and match stores
//! - [`pipeline`]: batched vectorization of a frame source
//! - [`search`]: missing-person matching and navigation

pub use godseye_common as common;
pub use godseye_decoder as decoder;
pub use godseye_pipeline as pipeline;
pub use godseye_search as search;
pub use godseye_storage as storage;
pub use godseye_vectorizer as vectorizer;

pub use godseye_common::{
    BoundingBox, CameraId, MatchRecord, ProcessingError, Result, SearchHit, Timestamp,
};
pub use godseye_pipeline::{FramePipeline, PipelineConfig, RunContext, RunReport};
pub use godseye_search::{assign_matches, MissingPersonSearch, SearchConfig};
