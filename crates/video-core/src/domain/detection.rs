//! Person detection results.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Axis-aligned bounding box in pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
}

impl BBox {
    /// Validate the box against an image of the given dimensions:
    /// `0 <= x_min < x_max <= image_width`, same for y.
    #[must_use]
    pub fn is_valid(&self, image_width: u32, image_height: u32) -> bool {
        0.0 <= self.x_min
            && self.x_min < self.x_max
            && self.x_max <= image_width as f32
            && 0.0 <= self.y_min
            && self.y_min < self.y_max
            && self.y_max <= image_height as f32
    }

    #[must_use]
    pub fn area(&self) -> f32 {
        (self.x_max - self.x_min) * (self.y_max - self.y_min)
    }

    /// Intersection-over-union against another box, used by NMS.
    #[must_use]
    pub fn iou(&self, other: &Self) -> f32 {
        let ix_min = self.x_min.max(other.x_min);
        let iy_min = self.y_min.max(other.y_min);
        let ix_max = self.x_max.min(other.x_max);
        let iy_max = self.y_max.min(other.y_max);

        let iw = (ix_max - ix_min).max(0.0);
        let ih = (iy_max - iy_min).max(0.0);
        let intersection = iw * ih;
        if intersection <= 0.0 {
            return 0.0;
        }
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }
}

/// A single 2D keypoint (COCO-17 layout), with its own confidence.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub confidence: f32,
}

/// One detected person.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub person_id: u32,
    pub bbox: BBox,
    pub confidence: f32,
    pub area_pct: f32,
    pub keypoints: Option<[Keypoint; 17]>,
}

/// Error constructing a [`DetectionList`] that would violate its invariants.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DetectionListError {
    #[error("detections must be sorted by confidence descending")]
    NotSortedByConfidence,
    #[error("person_id must be dense 0..N-1, got ids {0:?}")]
    NonDensePersonIds(Vec<u32>),
}

/// Ordered list of detections.
///
/// Invariants (enforced at construction): sorted by confidence descending;
/// `person_id` is dense `0..N-1`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionList {
    detections: Vec<Detection>,
    /// Below-threshold detections kept only for debuggability when the
    /// accepted list is empty.
    low_confidence_hints: Vec<Detection>,
}

impl DetectionList {
    /// Build a new list, re-indexing `person_id` densely in input order and
    /// validating the confidence ordering.
    pub fn new(
        mut detections: Vec<Detection>,
        low_confidence_hints: Vec<Detection>,
    ) -> Result<Self, DetectionListError> {
        for w in detections.windows(2) {
            if w[0].confidence < w[1].confidence {
                return Err(DetectionListError::NotSortedByConfidence);
            }
        }
        for (idx, d) in detections.iter_mut().enumerate() {
            d.person_id = idx as u32;
        }
        Ok(Self {
            detections,
            low_confidence_hints,
        })
    }

    #[must_use]
    pub fn persons_detected(&self) -> usize {
        self.detections.len()
    }

    #[must_use]
    pub fn detections(&self) -> &[Detection] {
        &self.detections
    }

    #[must_use]
    pub fn low_confidence_hints(&self) -> &[Detection] {
        &self.low_confidence_hints
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    /// Rough in-memory footprint, for cache size accounting.
    #[must_use]
    pub fn estimated_size_bytes(&self) -> usize {
        (self.detections.len() + self.low_confidence_hints.len())
            * std::mem::size_of::<Detection>()
    }
}
