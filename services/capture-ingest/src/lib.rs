//! Capture Ingest Service
//!
//! Drains the FTP drop directories written by roadside plate-capture (ANPR)
//! and axle-capture cameras. Each capture arrives as a metadata XML plus one
//! or two JPEGs; once the whole set is present it is uploaded to object
//! storage, recorded in the PostgreSQL ledger and removed from the FTP
//! server.
//!
//! ## Features
//!
//! - **FTP as work queue**: a file set is retried every poll until it leaves
//!   the listing, with no local state to lose
//! - **Idempotent writes**: object keys and ledger rows are keyed by name and
//!   capture ID, so a crash between steps only causes a harmless redo
//! - **Poison isolation**: unparseable metadata is quarantined or dropped
//!   instead of blocking the directory
//! - **Vehicle dimensions**: optional monocular measurement and
//!   classification of plate-capture scene images
//!
//! ## Architecture
//!
//! ```text
//! FTP drop dirs              S3 Buckets               PostgreSQL
//! ┌──────────────┐          ┌──────────────┐          ┌──────────────────────┐
//! │ plate/       │          │ anpr/        │          │ transact_anpr_capture│
//! │ axle/        │          │ axle/        │          │ transact_axle_capture│
//! └──────────────┘          │  {ddMMyyyy}/ │          │ vehicle_dimensions   │
//!        │                  └──────────────┘          └──────────────────────┘
//!        ▼                         ▲                           ▲
//! ┌──────────────┐                 │                           │
//! │ Watcher      │                 │                           │
//! │ (per domain) │                 │                           │
//! └──────────────┘                 │                           │
//!        │                         │                           │
//!        ▼                         │                           │
//! ┌──────────────┐─────────────────┘                           │
//! │ Processor    │─────────────────────────────────────────────┘
//! └──────────────┘
//!        │ (plate only)
//!        ▼
//! ┌──────────────┐
//! │ Detector +   │
//! │ Calibration  │
//! └──────────────┘
//! ```

pub mod calibration;
pub mod classifier;
pub mod config;
pub mod detector;
pub mod enrichment;
pub mod ledger;
pub mod metadata;
pub mod object_store;
pub mod processor;
pub mod remote;
pub mod watcher;

#[cfg(test)]
mod testing;

pub use calibration::{BoundingBox, CameraCalibration, VehicleDimensions};
pub use classifier::{classify, VehicleCategory, VehicleClass};
pub use config::Config;
pub use detector::{FixedBoxDetector, VehicleDetector};
pub use enrichment::{DimensionEnricher, VehicleMeasurement};
pub use ledger::{Ledger, PgLedger};
pub use object_store::{ObjectStore, S3ObjectStore};
pub use processor::{AxleProcessor, PlateProcessor, Staging};
pub use remote::{FtpDirectory, RemoteDirectory};
pub use watcher::{FileHandler, Outcome, Watcher};
