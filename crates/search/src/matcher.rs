//! Match assignment
//!
//! Nearest-neighbor results come back in no particular order. Assignment turns
//! them into one stable, gap-free sequence per camera so clients can step
//! through a person's appearances with a plain integer index.

use crate::service::{SearchError, SearchResult};
use godseye_common::{CameraId, MatchRecord, SearchHit};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Order within one camera: earliest first, then closest match, then frame
fn sequence_order(a: &SearchHit, b: &SearchHit) -> Ordering {
    a.timestamp
        .cmp(&b.timestamp)
        .then_with(|| a.score.total_cmp(&b.score))
        .then_with(|| a.frame_index.cmp(&b.frame_index))
}

fn sequence_index(camera_id: &CameraId, position: usize) -> SearchResult<u32> {
    u32::try_from(position).map_err(|_| SearchError::SequenceOverflow {
        camera_id: camera_id.clone(),
        position,
    })
}

/// Assign `missing_frame_index` positions to raw hits.
///
/// Hits are grouped by camera; each group is sorted by timestamp (ties by
/// ascending score, then frame index) and numbered from 0. The output is
/// ordered by camera id, then position. The same hit set always produces the
/// same records regardless of input order.
///
/// # Errors
///
/// Returns `SequenceOverflow` if one camera has more hits than a `u32`
/// position can number
pub fn assign_matches(person_id: &str, hits: Vec<SearchHit>) -> SearchResult<Vec<MatchRecord>> {
    let mut by_camera: BTreeMap<CameraId, Vec<SearchHit>> = BTreeMap::new();
    for hit in hits {
        by_camera.entry(hit.camera_id.clone()).or_default().push(hit);
    }

    let mut records = Vec::with_capacity(by_camera.values().map(Vec::len).sum());
    for (camera_id, mut group) in by_camera {
        group.sort_by(sequence_order);
        for (position, hit) in group.into_iter().enumerate() {
            records.push(MatchRecord {
                person_id: person_id.to_string(),
                camera_id: camera_id.clone(),
                frame_index: hit.frame_index,
                missing_frame_index: sequence_index(&camera_id, position)?,
                bbox: hit.bbox,
                score: hit.score,
                timestamp: hit.timestamp,
            });
        }
    }
    Ok(records)
}
