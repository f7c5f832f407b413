//! Vehicle detection seam.

use crate::calibration::BoundingBox;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Detector failed: {0}")]
    Backend(String),
}

/// Finds vehicles in an encoded image. Implementations are blocking and are
/// called from the blocking pool.
#[cfg_attr(test, mockall::automock)]
pub trait VehicleDetector: Send + Sync {
    fn detect(&self, image: &[u8]) -> Result<Vec<BoundingBox>, DetectionError>;
}

/// Places a single box over the centre of the frame, where the lane sits in
/// a head-on roadside view.
#[derive(Debug, Clone)]
pub struct FixedBoxDetector {
    threshold: f64,
}

impl FixedBoxDetector {
    const SCORE: f64 = 0.95;

    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

impl VehicleDetector for FixedBoxDetector {
    fn detect(&self, image: &[u8]) -> Result<Vec<BoundingBox>, DetectionError> {
        let decoded = image::load_from_memory(image)?;
        let (width, height) = (decoded.width(), decoded.height());

        let boxes = vec![BoundingBox {
            x: width / 4,
            y: height / 3,
            width: width / 2,
            height: height / 2,
            label: "vehicle".to_string(),
            score: Self::SCORE,
        }];

        Ok(boxes
            .into_iter()
            .filter(|b| b.score >= self.threshold)
            .collect())
    }
}
