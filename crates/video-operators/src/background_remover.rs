//! Background removal operator.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use video_core::domain::{ArtifactId, BackgroundRemoverParams, ImageArtifact};
use video_core::error::PipelineError;
use video_core::fingerprint::{Fingerprint, FingerprintBuilder, ParamValue};
use video_core::ids::{ModelId, OperatorVersion};
use video_core::ports::StageOperator;
use video_core::retry::{with_retry, RetryPolicy};

use crate::backends::BackgroundRemoverBackend;

const MAX_PIXELS_PER_BYTE: f64 = 1000.0;

pub struct BackgroundRemovalInput {
    pub image_ref: ArtifactId,
    pub image: ImageArtifact,
}

pub struct BackgroundRemover {
    backend: Arc<dyn BackgroundRemoverBackend>,
    retry_policy: RetryPolicy,
}

impl BackgroundRemover {
    #[must_use]
    pub fn new(backend: Arc<dyn BackgroundRemoverBackend>) -> Self {
        Self {
            backend,
            retry_policy: RetryPolicy::operator_default(),
        }
    }
}

#[async_trait]
impl StageOperator for BackgroundRemover {
    type Input = BackgroundRemovalInput;
    type Params = BackgroundRemoverParams;
    type Output = ImageArtifact;

    fn operator_id(&self) -> &'static str {
        "background_remover"
    }

    fn version(&self) -> OperatorVersion {
        OperatorVersion(1)
    }

    fn model(&self) -> Option<ModelId> {
        Some(ModelId::new("background-remover"))
    }

    fn cache_ttl_secs(&self) -> Option<u64> {
        Some(24 * 3600)
    }

    fn fingerprint(&self, input: &Self::Input, params: &Self::Params) -> Fingerprint {
        FingerprintBuilder::new(self.operator_id(), self.version())
            .with_input(input.image_ref)
            .with_param("smoothing", &ParamValue::Bool(params.smoothing))
            .finish()
    }

    async fn execute(
        &self,
        input: Self::Input,
        params: Self::Params,
        cancel: &CancellationToken,
    ) -> Result<Self::Output, PipelineError> {
        let pixels = f64::from(input.image.width) * f64::from(input.image.height);
        let bytes = input.image.bytes.len().max(1) as f64;
        if pixels / bytes > MAX_PIXELS_PER_BYTE {
            return Err(PipelineError::invalid_input(
                "image pixel-to-byte ratio exceeds the decompression-bomb threshold",
            ));
        }

        let mask = with_retry(self.retry_policy, cancel, |_attempt| {
            let backend = Arc::clone(&self.backend);
            let image = input.image.clone();
            async move { backend.remove_background(&image).await }
        })
        .await?;

        Ok(if params.smoothing {
            gaussian_blur_alpha(mask)
        } else {
            mask
        })
    }
}

/// Standard deviation of the matte edge-softening blur.
const ALPHA_BLUR_SIGMA: f64 = 1.5;

/// Build a normalized 1-D Gaussian kernel wide enough to cover `sigma` to
/// about 3 standard deviations on each side (radius = `ceil(3*sigma)`).
fn gaussian_kernel(sigma: f64) -> Vec<f64> {
    let radius = (3.0 * sigma).ceil().max(1.0) as i32;
    let mut kernel: Vec<f64> = (-radius..=radius)
        .map(|i| {
            let x = f64::from(i);
            (-x * x / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f64 = kernel.iter().sum();
    for w in &mut kernel {
        *w /= sum;
    }
    kernel
}

/// A separable Gaussian blur (sigma = [`ALPHA_BLUR_SIGMA`]) over the alpha
/// channel only, applied as a horizontal pass followed by a vertical pass
/// so cost stays linear in kernel radius rather than quadratic.
fn gaussian_blur_alpha(mut image: ImageArtifact) -> ImageArtifact {
    if !image.has_alpha || image.bytes.is_empty() {
        return image;
    }
    let channels = 4usize;
    let width = image.width as usize;
    let height = image.height as usize;
    if width == 0 || height == 0 || image.bytes.len() < width * height * channels {
        return image;
    }

    let kernel = gaussian_kernel(ALPHA_BLUR_SIGMA);
    let radius = (kernel.len() / 2) as i32;

    let alpha: Vec<f64> = (0..width * height)
        .map(|i| f64::from(image.bytes[i * channels + 3]))
        .collect();

    let sample = |buf: &[f64], x: i32, y: i32| -> f64 {
        let cx = x.clamp(0, width as i32 - 1) as usize;
        let cy = y.clamp(0, height as i32 - 1) as usize;
        buf[cy * width + cx]
    };

    let mut horizontal = vec![0.0f64; width * height];
    for y in 0..height as i32 {
        for x in 0..width as i32 {
            let mut acc = 0.0;
            for (k, &w) in kernel.iter().enumerate() {
                let dx = k as i32 - radius;
                acc += w * sample(&alpha, x + dx, y);
            }
            horizontal[(y as usize) * width + (x as usize)] = acc;
        }
    }

    let mut vertical = vec![0.0f64; width * height];
    for y in 0..height as i32 {
        for x in 0..width as i32 {
            let mut acc = 0.0;
            for (k, &w) in kernel.iter().enumerate() {
                let dy = k as i32 - radius;
                acc += w * sample(&horizontal, x, y + dy);
            }
            vertical[(y as usize) * width + (x as usize)] = acc;
        }
    }

    for i in 0..width * height {
        image.bytes[i * channels + 3] = vertical[i].round().clamp(0.0, 255.0) as u8;
    }
    image
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::FakeBackgroundRemover;

    fn rgba_image(width: u32, height: u32) -> ImageArtifact {
        let mut bytes = vec![0u8; (width * height * 4) as usize];
        for px in bytes.chunks_mut(4) {
            px[3] = 255;
        }
        ImageArtifact {
            bytes,
            width,
            height,
            has_alpha: true,
        }
    }

    #[tokio::test]
    async fn smoothing_preserves_dimensions() {
        let backend = Arc::new(FakeBackgroundRemover);
        let op = BackgroundRemover::new(backend);
        let image = rgba_image(8, 8);
        let (w, h) = (image.width, image.height);
        let input = BackgroundRemovalInput {
            image_ref: ArtifactId::from_digest([4u8; 32]),
            image,
        };
        let cancel = CancellationToken::new();
        let out = op
            .execute(input, BackgroundRemoverParams { smoothing: true }, &cancel)
            .await
            .unwrap();
        assert_eq!((out.width, out.height), (w, h));
    }

    #[tokio::test]
    async fn without_smoothing_alpha_is_unchanged() {
        let backend = Arc::new(FakeBackgroundRemover);
        let op = BackgroundRemover::new(backend);
        let image = rgba_image(4, 4);
        let input = BackgroundRemovalInput {
            image_ref: ArtifactId::from_digest([5u8; 32]),
            image: image.clone(),
        };
        let cancel = CancellationToken::new();
        let out = op
            .execute(input, BackgroundRemoverParams { smoothing: false }, &cancel)
            .await
            .unwrap();
        assert_eq!(out.bytes, image.bytes);
    }

    #[tokio::test]
    async fn image_bomb_is_rejected() {
        let backend = Arc::new(FakeBackgroundRemover);
        let op = BackgroundRemover::new(backend);
        let input = BackgroundRemovalInput {
            image_ref: ArtifactId::from_digest([6u8; 32]),
            image: ImageArtifact {
                bytes: vec![0u8; 1],
                width: 5000,
                height: 5000,
                has_alpha: false,
            },
        };
        let cancel = CancellationToken::new();
        let err = op
            .execute(input, BackgroundRemoverParams::default(), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }

    #[test]
    fn gaussian_kernel_is_normalized() {
        let kernel = gaussian_kernel(ALPHA_BLUR_SIGMA);
        let sum: f64 = kernel.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
        assert_eq!(kernel.len() % 2, 1, "kernel must be symmetric around the center tap");
    }

    #[test]
    fn gaussian_blur_softens_a_sharp_alpha_edge() {
        let width = 8u32;
        let height = 1u32;
        let mut bytes = vec![0u8; (width * height * 4) as usize];
        for x in 0..width as usize {
            bytes[x * 4 + 3] = if x < width as usize / 2 { 0 } else { 255 };
        }
        let image = ImageArtifact {
            bytes,
            width,
            height,
            has_alpha: true,
        };
        let blurred = gaussian_blur_alpha(image);
        let mid_left = blurred.bytes[(width as usize / 2 - 1) * 4 + 3];
        let mid_right = blurred.bytes[(width as usize / 2) * 4 + 3];
        assert!(mid_left > 0, "blur should bleed some alpha across the edge");
        assert!(mid_right < 255, "blur should soften the far side of the edge too");
    }

    #[test]
    fn uniform_alpha_is_unchanged_by_blur() {
        let image = rgba_image(4, 4);
        let blurred = gaussian_blur_alpha(image.clone());
        assert_eq!(blurred.bytes, image.bytes);
    }
}
