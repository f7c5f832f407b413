//! Capture metadata written by the camera appliances.
//!
//! Both appliance families emit flat XML where every value sits in a `value`
//! attribute:
//!
//! ```xml
//! <result>
//!   <ID value="1764569194214"/>
//!   <cameraid value="CAM-01"/>
//!   <capture><frametime value="2025.12.01 14:06:27.946"/></capture>
//!   <anpr><text value="B1234XYZ"/><confidence value="87.5"/></anpr>
//! </result>
//! ```
//!
//! Missing elements decode as empty strings; only malformed XML or a missing
//! capture ID is an error.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

/// Layout of `capture/frametime`
pub const FRAME_TIME_FORMAT: &str = "%Y.%m.%d %H:%M:%S%.3f";

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Malformed capture XML: {0}")]
    Malformed(#[from] quick_xml::DeError),

    #[error("Capture XML is not valid UTF-8")]
    Encoding,

    #[error("Capture XML carries no capture ID")]
    MissingCaptureId,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ValueAttr {
    #[serde(rename = "@value")]
    value: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CaptureXml {
    frametime: ValueAttr,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AnprXml {
    text: ValueAttr,
    confidence: ValueAttr,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PlateXml {
    location: ValueAttr,
    cameraid: ValueAttr,
    #[serde(rename = "ID")]
    id: ValueAttr,
    capture: CaptureXml,
    anpr: AnprXml,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct VehicleXml {
    length: ValueAttr,
    nwheels: ValueAttr,
    naxles: ValueAttr,
    category: ValueAttr,
    body_type: ValueAttr,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct VacXml {
    vehicle0: VehicleXml,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AxleXml {
    cameraid: ValueAttr,
    #[serde(rename = "ID")]
    id: ValueAttr,
    capture: CaptureXml,
    anpr: AnprXml,
    vac: VacXml,
}

/// Plate-capture (ANPR) metadata
#[derive(Debug, Clone, PartialEq)]
pub struct PlateMetadata {
    pub external_id: String,
    pub plate: String,
    /// Raw `frametime` value
    pub frame_time: String,
    pub location: String,
    pub camera_id: String,
    /// Raw `anpr/confidence` value
    pub confidence: String,
}

impl PlateMetadata {
    pub fn parse(raw: &[u8]) -> Result<Self, MetadataError> {
        let xml: PlateXml = decode(raw)?;
        let meta = Self {
            external_id: xml.id.value.trim().to_string(),
            plate: xml.anpr.text.value,
            frame_time: xml.capture.frametime.value,
            location: xml.location.value,
            camera_id: xml.cameraid.value,
            confidence: xml.anpr.confidence.value,
        };
        require_id(&meta.external_id)?;
        Ok(meta)
    }

    pub fn captured_at(&self) -> Option<DateTime<Utc>> {
        parse_frame_time(&self.frame_time)
    }

    /// Recognition confidence, when the camera sent a number
    pub fn confidence_value(&self) -> Option<f64> {
        self.confidence.trim().parse().ok()
    }
}

/// Axle-capture (vehicle classification) metadata
#[derive(Debug, Clone, PartialEq)]
pub struct AxleMetadata {
    pub external_id: String,
    pub plate: String,
    pub frame_time: String,
    pub camera_id: String,
    /// Vehicle length in millimetres
    pub length_mm: i32,
    pub wheel_count: i32,
    pub axle_count: i32,
    pub category: String,
    pub body_type: String,
}

impl AxleMetadata {
    pub fn parse(raw: &[u8]) -> Result<Self, MetadataError> {
        let xml: AxleXml = decode(raw)?;
        let vehicle = xml.vac.vehicle0;
        let meta = Self {
            external_id: xml.id.value.trim().to_string(),
            plate: xml.anpr.text.value,
            frame_time: xml.capture.frametime.value,
            camera_id: xml.cameraid.value,
            length_mm: leading_int(&vehicle.length.value),
            wheel_count: leading_int(&vehicle.nwheels.value),
            axle_count: leading_int(&vehicle.naxles.value),
            category: vehicle.category.value,
            body_type: vehicle.body_type.value,
        };
        require_id(&meta.external_id)?;
        Ok(meta)
    }

    pub fn captured_at(&self) -> Option<DateTime<Utc>> {
        parse_frame_time(&self.frame_time)
    }
}

fn decode<T: for<'de> Deserialize<'de>>(raw: &[u8]) -> Result<T, MetadataError> {
    let text = std::str::from_utf8(raw).map_err(|_| MetadataError::Encoding)?;
    Ok(quick_xml::de::from_str(text)?)
}

fn require_id(id: &str) -> Result<(), MetadataError> {
    if id.is_empty() {
        return Err(MetadataError::MissingCaptureId);
    }
    Ok(())
}

/// Frame times carry no zone; they are stored as UTC.
pub fn parse_frame_time(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    NaiveDateTime::parse_from_str(value, FRAME_TIME_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Leading decimal integer of `value`, 0 when there is none.
fn leading_int(value: &str) -> i32 {
    let value = value.trim_start();
    let (negative, digits) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value.strip_prefix('+').unwrap_or(value)),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    match digits[..end].parse::<i32>() {
        Ok(n) if negative => -n,
        Ok(n) => n,
        Err(_) => 0,
    }
}
