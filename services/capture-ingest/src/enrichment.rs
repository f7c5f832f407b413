//! Detection, ground-plane measurement and classification of a capture image.

use crate::calibration::{BoundingBox, CameraCalibration, VehicleDimensions};
use crate::classifier::{classify, VehicleClass};
use crate::detector::{DetectionError, VehicleDetector};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// One vehicle seen in a capture image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleMeasurement {
    pub bbox: BoundingBox,
    pub dimensions: VehicleDimensions,
    pub class: VehicleClass,
}

/// Pick the measurement the capture row is patched with.
pub fn best_measurement(measurements: &[VehicleMeasurement]) -> Option<&VehicleMeasurement> {
    measurements
        .iter()
        .max_by(|a, b| a.dimensions.confidence.total_cmp(&b.dimensions.confidence))
}

#[derive(Clone)]
pub struct DimensionEnricher {
    detector: Arc<dyn VehicleDetector>,
    calibration: Arc<CameraCalibration>,
}

impl DimensionEnricher {
    pub fn new(detector: Arc<dyn VehicleDetector>, calibration: Arc<CameraCalibration>) -> Self {
        Self {
            detector,
            calibration,
        }
    }

    /// Blocking; run on the blocking pool. Implausible measurements are
    /// dropped.
    pub fn measure(
        &self,
        image: &[u8],
        source: &str,
    ) -> Result<Vec<VehicleMeasurement>, DetectionError> {
        let boxes = self.detector.detect(image)?;
        let detected = boxes.len();

        let measurements: Vec<_> = boxes
            .into_iter()
            .filter_map(|bbox| {
                let mut dimensions = self.calibration.calculate_ground_dimensions(&bbox);
                dimensions.source = source.to_string();
                if !dimensions.is_valid() {
                    debug!(
                        source = %source,
                        length_m = dimensions.length_m,
                        width_m = dimensions.width_m,
                        confidence = dimensions.confidence,
                        "Discarding implausible measurement"
                    );
                    return None;
                }
                let class = classify(&dimensions);
                Some(VehicleMeasurement {
                    bbox,
                    dimensions,
                    class,
                })
            })
            .collect();

        debug!(
            source = %source,
            detected = detected,
            kept = measurements.len(),
            "Image measured"
        );
        Ok(measurements)
    }
}
