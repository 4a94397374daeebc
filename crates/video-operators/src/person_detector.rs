//! Person detection operator.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use video_core::domain::{ArtifactId, DetectionList, ImageArtifact, PersonDetectorParams};
use video_core::error::PipelineError;
use video_core::fingerprint::{Fingerprint, FingerprintBuilder, ParamValue};
use video_core::ids::{ModelId, OperatorVersion};
use video_core::ports::StageOperator;
use video_core::retry::{with_retry, RetryPolicy};

use crate::backends::PersonDetectorBackend;
use crate::postprocess::{postprocess, with_area_pct};

/// Maximum ratio of (pixel count) to (encoded byte count) before an input
/// image is rejected as a decompression-bomb candidate. Applied to
/// detection too since it decodes the same image.
const MAX_PIXELS_PER_BYTE: f64 = 1000.0;

pub struct PersonDetectionInput {
    pub image_ref: ArtifactId,
    pub image: ImageArtifact,
}

pub struct PersonDetector {
    backend: Arc<dyn PersonDetectorBackend>,
    retry_policy: RetryPolicy,
}

impl PersonDetector {
    #[must_use]
    pub fn new(backend: Arc<dyn PersonDetectorBackend>) -> Self {
        Self {
            backend,
            retry_policy: RetryPolicy::operator_default(),
        }
    }
}

#[async_trait]
impl StageOperator for PersonDetector {
    type Input = PersonDetectionInput;
    type Params = PersonDetectorParams;
    type Output = DetectionList;

    fn operator_id(&self) -> &'static str {
        "person_detector"
    }

    fn version(&self) -> OperatorVersion {
        OperatorVersion(1)
    }

    fn model(&self) -> Option<ModelId> {
        Some(ModelId::new("person-detector"))
    }

    fn cache_ttl_secs(&self) -> Option<u64> {
        Some(24 * 3600)
    }

    fn fingerprint(&self, input: &Self::Input, params: &Self::Params) -> Fingerprint {
        FingerprintBuilder::new(self.operator_id(), self.version())
            .with_input(input.image_ref)
            .with_param("conf_threshold", &ParamValue::Float(f64::from(params.conf_threshold)))
            .with_param("max_persons", &ParamValue::Int(i64::from(params.max_persons)))
            .with_param("iou_threshold", &ParamValue::Float(f64::from(params.iou_threshold)))
            .with_param("return_keypoints", &ParamValue::Bool(params.return_keypoints))
            .finish()
    }

    async fn execute(
        &self,
        input: Self::Input,
        params: Self::Params,
        cancel: &CancellationToken,
    ) -> Result<Self::Output, PipelineError> {
        params.validate()?;
        reject_image_bombs(&input.image)?;

        let raw = with_retry(self.retry_policy, cancel, |_attempt| {
            let backend = Arc::clone(&self.backend);
            let image = input.image.clone();
            async move { backend.detect(&image).await }
        })
        .await?;

        let raw = if params.return_keypoints {
            raw
        } else {
            raw.into_iter()
                .map(|mut d| {
                    d.keypoints = None;
                    d
                })
                .collect()
        };

        let list = postprocess(
            raw,
            params.conf_threshold,
            params.iou_threshold,
            params.max_persons,
        )
        .map_err(|e| PipelineError::internal(format!("detection list invariant violated: {e}")))?;

        Ok(with_area_pct(list, input.image.width, input.image.height))
    }
}

fn reject_image_bombs(image: &ImageArtifact) -> Result<(), PipelineError> {
    let pixels = f64::from(image.width) * f64::from(image.height);
    let bytes = image.bytes.len().max(1) as f64;
    if pixels / bytes > MAX_PIXELS_PER_BYTE {
        return Err(PipelineError::invalid_input(
            "image pixel-to-byte ratio exceeds the decompression-bomb threshold",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::FakePersonDetector;
    use crate::postprocess::RawDetection;
    use video_core::domain::BBox;

    fn image(width: u32, height: u32) -> ImageArtifact {
        ImageArtifact {
            bytes: vec![0u8; (width * height) as usize],
            width,
            height,
            has_alpha: false,
        }
    }

    #[tokio::test]
    async fn happy_path_produces_area_weighted_detections() {
        let backend = Arc::new(FakePersonDetector {
            detections: vec![RawDetection {
                bbox: BBox {
                    x_min: 0.0,
                    y_min: 0.0,
                    x_max: 10.0,
                    y_max: 10.0,
                },
                confidence: 0.9,
                keypoints: None,
            }],
        });
        let op = PersonDetector::new(backend);
        let input = PersonDetectionInput {
            image_ref: ArtifactId::from_digest([1u8; 32]),
            image: image(100, 100),
        };
        let cancel = CancellationToken::new();
        let out = op
            .execute(input, PersonDetectorParams::default(), &cancel)
            .await
            .unwrap();
        assert_eq!(out.persons_detected(), 1);
        assert!((out.detections()[0].area_pct - 0.01).abs() < 1e-6);
    }

    #[tokio::test]
    async fn image_bomb_ratio_is_rejected() {
        let backend = Arc::new(FakePersonDetector { detections: vec![] });
        let op = PersonDetector::new(backend);
        let input = PersonDetectionInput {
            image_ref: ArtifactId::from_digest([2u8; 32]),
            image: ImageArtifact {
                bytes: vec![0u8; 1],
                width: 10_000,
                height: 10_000,
                has_alpha: false,
            },
        };
        let cancel = CancellationToken::new();
        let err = op
            .execute(input, PersonDetectorParams::default(), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }

    #[tokio::test]
    async fn invalid_params_are_rejected_before_touching_the_backend() {
        let backend = Arc::new(FakePersonDetector { detections: vec![] });
        let op = PersonDetector::new(backend);
        let input = PersonDetectionInput {
            image_ref: ArtifactId::from_digest([3u8; 32]),
            image: image(10, 10),
        };
        let mut params = PersonDetectorParams::default();
        params.conf_threshold = 2.0;
        let cancel = CancellationToken::new();
        let err = op.execute(input, params, &cancel).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }
}
