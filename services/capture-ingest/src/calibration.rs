//! Monocular ground-plane model for a fixed roadside camera.
//!
//! The camera faces traffic head-on from a known height and tilt. A vehicle's
//! distance is recovered from the row of its bounding box's bottom edge; pixel
//! extents are then converted to metres with a meters-per-pixel ratio anchored
//! on one reference measurement and scaled linearly with distance.

use crate::config::CalibrationConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const MIN_DISTANCE_M: f64 = 1.0;
const MAX_DISTANCE_M: f64 = 100.0;
/// Below this |tan| the ground ray is treated as parallel to the road.
const DEGENERATE_TAN: f64 = 1e-3;

#[derive(Debug, Error, PartialEq)]
pub enum CalibrationError {
    #[error("focal length must be positive")]
    FocalLength,

    #[error("image dimensions must be positive")]
    Resolution,

    #[error("camera height must be positive")]
    CameraHeight,

    #[error("tilt angle must be between 0 and 90 degrees, got {0}")]
    TiltAngle(f64),

    #[error("reference length must be positive")]
    ReferenceLength,

    #[error("reference pixel length must be positive")]
    ReferencePixels,

    #[error("{0} must be positive")]
    Correction(&'static str),
}

/// Detector output for one vehicle, in pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Top-left X
    pub x: u32,
    /// Top-left Y
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub label: String,
    /// Detector confidence (0-1)
    pub score: f64,
}

/// Physical size of one detected vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleDimensions {
    pub length_m: f64,
    pub width_m: f64,
    /// Estimated from length, not measured
    pub height_m: f64,
    pub distance_m: f64,
    pub center_x: u32,
    pub center_y: u32,
    pub confidence: f64,
    pub measured_at: DateTime<Utc>,
    /// Object key or path of the image measured
    pub source: String,
}

impl VehicleDimensions {
    /// Plausible road vehicle with a usable confidence.
    pub fn is_valid(&self) -> bool {
        (1.0..=20.0).contains(&self.length_m)
            && (0.5..=3.5).contains(&self.width_m)
            && (0.5..=5.0).contains(&self.height_m)
            && self.confidence >= 0.3
    }
}

/// Immutable camera model. Build once, share behind an `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraCalibration {
    focal_length_px: f64,
    image_width: u32,
    image_height: u32,
    principal_point_x: f64,
    principal_point_y: f64,
    camera_height_m: f64,
    tilt_angle_deg: f64,
    reference_pixel_length: u32,
    reference_real_length_m: f64,
    reference_distance_m: f64,
    width_correction: f64,
    height_to_length_ratio: f64,
    base_confidence: f64,
    /// Metres per pixel at the reference distance
    meters_per_pixel: f64,
}

impl CameraCalibration {
    /// Build and validate a calibration. The principal point defaults to the
    /// image centre.
    pub fn new(config: &CalibrationConfig) -> Result<Self, CalibrationError> {
        let meters_per_pixel = if config.reference_pixel_length > 0 {
            config.reference_real_length_m / f64::from(config.reference_pixel_length)
        } else {
            0.0
        };

        let calibration = Self {
            focal_length_px: config.focal_length_px,
            image_width: config.image_width,
            image_height: config.image_height,
            principal_point_x: config
                .principal_point_x
                .unwrap_or(f64::from(config.image_width) / 2.0),
            principal_point_y: config
                .principal_point_y
                .unwrap_or(f64::from(config.image_height) / 2.0),
            camera_height_m: config.camera_height_m,
            tilt_angle_deg: config.tilt_angle_deg,
            reference_pixel_length: config.reference_pixel_length,
            reference_real_length_m: config.reference_real_length_m,
            reference_distance_m: config.reference_distance_m,
            width_correction: config.width_correction,
            height_to_length_ratio: config.height_to_length_ratio,
            base_confidence: config.base_confidence,
            meters_per_pixel,
        };
        calibration.validate()?;
        Ok(calibration)
    }

    pub fn validate(&self) -> Result<(), CalibrationError> {
        if self.focal_length_px <= 0.0 {
            return Err(CalibrationError::FocalLength);
        }
        if self.image_width == 0 || self.image_height == 0 {
            return Err(CalibrationError::Resolution);
        }
        if self.camera_height_m <= 0.0 {
            return Err(CalibrationError::CameraHeight);
        }
        if !(0.0..=90.0).contains(&self.tilt_angle_deg) {
            return Err(CalibrationError::TiltAngle(self.tilt_angle_deg));
        }
        if self.reference_real_length_m <= 0.0 {
            return Err(CalibrationError::ReferenceLength);
        }
        if self.reference_pixel_length == 0 {
            return Err(CalibrationError::ReferencePixels);
        }
        if self.width_correction <= 0.0 {
            return Err(CalibrationError::Correction("width correction"));
        }
        if self.height_to_length_ratio <= 0.0 {
            return Err(CalibrationError::Correction("height to length ratio"));
        }
        if self.base_confidence <= 0.0 {
            return Err(CalibrationError::Correction("base confidence"));
        }
        Ok(())
    }

    pub fn meters_per_pixel(&self) -> f64 {
        self.meters_per_pixel
    }

    pub fn resolution(&self) -> (u32, u32) {
        (self.image_width, self.image_height)
    }

    /// Ground distance (m) to the point imaged at `pixel_y`, assuming a flat
    /// road. Clamped to [1, 100].
    pub fn estimate_distance(&self, pixel_y: f64) -> f64 {
        let tilt = self.tilt_angle_deg.to_radians();
        let offset = pixel_y - self.principal_point_y;
        let angle_to_pixel = (offset / self.focal_length_px).atan();

        let ray = tilt - angle_to_pixel;
        let tan = ray.tan();
        if tan.abs() < DEGENERATE_TAN {
            return self.reference_distance_m;
        }

        (self.camera_height_m / tan).clamp(MIN_DISTANCE_M, MAX_DISTANCE_M)
    }

    /// First-order conversion: the reference ratio scaled by distance.
    pub fn pixels_to_meters(&self, pixels: f64, distance_m: f64) -> f64 {
        if self.reference_distance_m > 0.0 {
            pixels * self.meters_per_pixel * (distance_m / self.reference_distance_m)
        } else {
            pixels * self.meters_per_pixel
        }
    }

    /// Physical size of the vehicle in `bbox`.
    ///
    /// Head-on view: the box's horizontal extent spans the vehicle's long axis
    /// and its vertical extent the vehicle's width, which reads oversized and
    /// is scaled by the width correction. Height is not observable and is
    /// taken as a fixed fraction of length.
    pub fn calculate_ground_dimensions(&self, bbox: &BoundingBox) -> VehicleDimensions {
        let bottom_y = bbox.y.saturating_add(bbox.height);
        let center_x = bbox.x.saturating_add(bbox.width / 2);

        let distance = self.estimate_distance(f64::from(bottom_y));
        let length = self.pixels_to_meters(f64::from(bbox.width), distance);
        let width = self.pixels_to_meters(f64::from(bbox.height), distance) * self.width_correction;
        let height = length * self.height_to_length_ratio;

        VehicleDimensions {
            length_m: length,
            width_m: width,
            height_m: height,
            distance_m: distance,
            center_x,
            center_y: bottom_y,
            confidence: self.base_confidence * bbox.score,
            measured_at: Utc::now(),
            source: String::new(),
        }
    }
}

impl std::fmt::Display for CameraCalibration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}x{} f={:.1}px height={:.2}m tilt={:.1}deg reference={}px={:.2}m@{:.2}m ({:.6} m/px)",
            self.image_width,
            self.image_height,
            self.focal_length_px,
            self.camera_height_m,
            self.tilt_angle_deg,
            self.reference_pixel_length,
            self.reference_real_length_m,
            self.reference_distance_m,
            self.meters_per_pixel,
        )
    }
}
