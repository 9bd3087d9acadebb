//! Missing-person search
//!
//! A registered person is a query vector in the vector store. Matching asks
//! the store for every stored face within `max_distance` of it and turns the
//! unordered hits into one numbered sequence per camera:
//!
//! 1. **Match assignment** ([`assign_matches`]): group by camera, sort by
//!    timestamp, number from 0
//! 2. **Search service** ([`MissingPersonSearch`]): registration, refresh and
//!    per-camera frame navigation on top of the stores
//! 3. **Annotation** ([`annotate`]): matched frames are returned with the face
//!    box drawn on them
//!
//! ## Example
//!
//! ```rust
//! use godseye_common::{BoundingBox, CameraId, SearchHit, Timestamp};
//! use godseye_search::assign_matches;
//!
//! let hit = |frame_index: u64, millis: u64| SearchHit {
//!     camera_id: CameraId::new("lobby").unwrap(),
//!     frame_index,
//!     timestamp: Timestamp::from_millis(millis),
//!     score: 0.2,
//!     bbox: BoundingBox::new(0.0, 0.0, 10.0, 10.0),
//! };
//!
//! let records = assign_matches("p-1", vec![hit(40, 2000), hit(10, 500)])?;
//! assert_eq!(records[0].frame_index, 10);
//! assert_eq!(records[1].missing_frame_index, 1);
//! # Ok::<(), godseye_search::SearchError>(())
//! ```

pub mod annotate;
pub mod matcher;
pub mod service;

pub use matcher::assign_matches;
pub use service::{FrameView, MissingPersonSearch, SearchConfig, SearchError, SearchResult};
