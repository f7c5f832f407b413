//! Rule-based vehicle classification from estimated ground dimensions.

use crate::calibration::VehicleDimensions;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleCategory {
    Motorcycle,
    Sedan,
    Suv,
    Truck,
    Bus,
    Unknown,
}

impl VehicleCategory {
    /// First matching rule wins; the order matters where ranges overlap.
    pub fn from_dimensions(length_m: f64, width_m: f64) -> Self {
        if length_m < 2.5 && width_m < 1.5 {
            Self::Motorcycle
        } else if (2.5..5.5).contains(&length_m) && width_m < 2.0 {
            Self::Sedan
        } else if (4.0..6.0).contains(&length_m) && (1.8..2.2).contains(&width_m) {
            Self::Suv
        } else if (5.5..12.0).contains(&length_m) {
            Self::Truck
        } else if length_m >= 7.0 && width_m >= 2.0 {
            Self::Bus
        } else {
            Self::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Motorcycle => "motorcycle",
            Self::Sedan => "sedan",
            Self::Suv => "suv",
            Self::Truck => "truck",
            Self::Bus => "bus",
            Self::Unknown => "unknown",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Motorcycle => "Two-wheeled motor vehicle",
            Self::Sedan => "Passenger car",
            Self::Suv => "Sport utility vehicle or light van",
            Self::Truck => "Goods vehicle",
            Self::Bus => "Passenger bus or coach",
            Self::Unknown => "Dimensions match no known class",
        }
    }
}

impl fmt::Display for VehicleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleClass {
    pub category: VehicleCategory,
    pub description: String,
    pub confidence: f64,
}

pub fn classify(dimensions: &VehicleDimensions) -> VehicleClass {
    let category = VehicleCategory::from_dimensions(dimensions.length_m, dimensions.width_m);
    let confidence = match category {
        VehicleCategory::Unknown => dimensions.confidence * 0.5,
        _ => dimensions.confidence,
    };

    VehicleClass {
        category,
        description: category.description().to_string(),
        confidence,
    }
}
