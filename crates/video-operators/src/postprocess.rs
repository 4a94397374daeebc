//! Pure, synchronous detection post-processing: NMS, confidence filtering,
//! top-k selection, dense reindexing.
//!
//! No I/O, no async, deterministic given its inputs — easy to unit test in
//! isolation from the ML backend.

use video_core::domain::{Detection, DetectionList, DetectionListError};

/// A single raw detection straight from the backend, before any
/// post-processing.
#[derive(Clone, Debug)]
pub struct RawDetection {
    pub bbox: video_core::domain::BBox,
    pub confidence: f32,
    pub keypoints: Option<[video_core::domain::Keypoint; 17]>,
}

/// Apply NMS at `iou_threshold`, filter by `conf_threshold`, keep the top
/// `max_persons` by confidence, and dense-reindex.
///
/// If zero detections pass the confidence threshold, up to 5 below-threshold
/// detections are kept as debuggability hints, but the accepted list is
/// empty (`persons_detected() == 0`).
pub fn postprocess(
    mut raw: Vec<RawDetection>,
    conf_threshold: f32,
    iou_threshold: f32,
    max_persons: u32,
) -> Result<DetectionList, DetectionListError> {
    raw.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let (above, below): (Vec<_>, Vec<_>) = raw
        .into_iter()
        .partition(|d| d.confidence >= conf_threshold);

    let suppressed = non_max_suppression(above, iou_threshold);
    let top_k: Vec<Detection> = suppressed
        .into_iter()
        .take(max_persons as usize)
        .enumerate()
        .map(|(idx, d)| to_detection(idx as u32, d))
        .collect();

    let hints: Vec<Detection> = below
        .into_iter()
        .take(5)
        .enumerate()
        .map(|(idx, d)| to_detection(idx as u32, d))
        .collect();

    DetectionList::new(top_k, hints)
}

fn to_detection(person_id: u32, raw: RawDetection) -> Detection {
    let area_pct = 0.0; // filled in by the caller once image dimensions are known
    Detection {
        person_id,
        bbox: raw.bbox,
        confidence: raw.confidence,
        area_pct,
        keypoints: raw.keypoints,
    }
}

/// Greedy NMS: assumes `detections` is already sorted by confidence
/// descending.
fn non_max_suppression(detections: Vec<RawDetection>, iou_threshold: f32) -> Vec<RawDetection> {
    let mut kept: Vec<RawDetection> = Vec::new();
    'outer: for candidate in detections {
        for existing in &kept {
            if candidate.bbox.iou(&existing.bbox) > iou_threshold {
                continue 'outer;
            }
        }
        kept.push(candidate);
    }
    kept
}

/// Fill in `area_pct` for each detection given the source image dimensions.
pub fn with_area_pct(list: DetectionList, image_width: u32, image_height: u32) -> DetectionList {
    let total = (image_width as f32 * image_height as f32).max(1.0);
    let detections: Vec<Detection> = list
        .detections()
        .iter()
        .cloned()
        .map(|mut d| {
            d.area_pct = d.bbox.area() / total;
            d
        })
        .collect();
    let hints: Vec<Detection> = list
        .low_confidence_hints()
        .iter()
        .cloned()
        .map(|mut d| {
            d.area_pct = d.bbox.area() / total;
            d
        })
        .collect();
    DetectionList::new(detections, hints).expect("already validated once")
}
