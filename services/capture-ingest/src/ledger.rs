use crate::config::DatabaseConfig;
use crate::enrichment::{best_measurement, VehicleMeasurement};
use crate::metadata::{AxleMetadata, PlateMetadata};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info, instrument};
use uuid::Uuid;

const UPSERT_PLATE_CAPTURE: &str = r#"
    INSERT INTO transact_anpr_capture (
        site_id, external_id, plate_number, frame_time, location,
        camera_id, confidence, bucket, date_folder, xml_key,
        image_key, plate_image_key, synced_to_central
    ) VALUES (
        $1, $2, $3, $4, $5,
        $6, $7, $8, $9, $10,
        $11, $12, FALSE
    )
    ON CONFLICT (site_id, external_id) DO UPDATE SET
        plate_number = EXCLUDED.plate_number,
        frame_time = EXCLUDED.frame_time,
        location = EXCLUDED.location,
        camera_id = EXCLUDED.camera_id,
        confidence = EXCLUDED.confidence,
        bucket = EXCLUDED.bucket,
        date_folder = EXCLUDED.date_folder,
        xml_key = EXCLUDED.xml_key,
        image_key = EXCLUDED.image_key,
        plate_image_key = EXCLUDED.plate_image_key,
        synced_to_central = FALSE,
        updated_date = NOW()
"#;

const UPSERT_AXLE_CAPTURE: &str = r#"
    INSERT INTO transact_axle_capture (
        site_id, external_id, plate_number, frame_time, camera_id,
        length_mm, wheel_count, axle_count, category, body_type,
        bucket, date_folder, xml_key, image_key, synced_to_central
    ) VALUES (
        $1, $2, $3, $4, $5,
        $6, $7, $8, $9, $10,
        $11, $12, $13, $14, FALSE
    )
    ON CONFLICT (site_id, external_id) DO UPDATE SET
        plate_number = EXCLUDED.plate_number,
        frame_time = EXCLUDED.frame_time,
        camera_id = EXCLUDED.camera_id,
        length_mm = EXCLUDED.length_mm,
        wheel_count = EXCLUDED.wheel_count,
        axle_count = EXCLUDED.axle_count,
        category = EXCLUDED.category,
        body_type = EXCLUDED.body_type,
        bucket = EXCLUDED.bucket,
        date_folder = EXCLUDED.date_folder,
        xml_key = EXCLUDED.xml_key,
        image_key = EXCLUDED.image_key,
        synced_to_central = FALSE,
        updated_date = NOW()
"#;

const INSERT_MEASUREMENT: &str = r#"
    INSERT INTO vehicle_dimensions (
        id, site_id, external_id, source, length_m,
        width_m, height_m, distance_m, center_x, center_y,
        confidence, vehicle_class, class_confidence, bbox, measured_at
    ) VALUES (
        $1, $2, $3, $4, $5,
        $6, $7, $8, $9, $10,
        $11, $12, $13, $14, $15
    )
"#;

const PATCH_CAPTURE_DIMENSIONS: &str = r#"
    UPDATE transact_anpr_capture SET
        vehicle_length_m = $3,
        vehicle_width_m = $4,
        vehicle_height_m = $5,
        vehicle_class = $6,
        dimension_confidence = $7,
        synced_to_central = FALSE,
        updated_date = NOW()
    WHERE site_id = $1 AND external_id = $2
"#;

/// Plate-capture row, unique by (site_id, external_id)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateCaptureRecord {
    pub site_id: String,
    pub external_id: String,
    pub plate_number: String,
    pub frame_time: Option<DateTime<Utc>>,
    pub location: String,
    pub camera_id: String,
    pub confidence: Option<f64>,
    pub bucket: String,
    /// `ddMMyyyy` folder the artifacts were uploaded under
    pub date_folder: String,
    pub xml_key: String,
    /// Full scene image
    pub image_key: String,
    /// Plate crop
    pub plate_image_key: String,
}

impl PlateCaptureRecord {
    pub fn new(site_id: &str, meta: &PlateMetadata, bucket: &str, date_folder: &str) -> Self {
        Self {
            site_id: site_id.to_string(),
            external_id: meta.external_id.clone(),
            plate_number: meta.plate.clone(),
            frame_time: meta.captured_at(),
            location: meta.location.clone(),
            camera_id: meta.camera_id.clone(),
            confidence: meta.confidence_value(),
            bucket: bucket.to_string(),
            date_folder: date_folder.to_string(),
            xml_key: String::new(),
            image_key: String::new(),
            plate_image_key: String::new(),
        }
    }
}

/// Axle-capture row, unique by (site_id, external_id)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxleCaptureRecord {
    pub site_id: String,
    pub external_id: String,
    pub plate_number: String,
    pub frame_time: Option<DateTime<Utc>>,
    pub camera_id: String,
    pub length_mm: i32,
    pub wheel_count: i32,
    pub axle_count: i32,
    pub category: String,
    pub body_type: String,
    pub bucket: String,
    pub date_folder: String,
    pub xml_key: String,
    pub image_key: String,
}

impl AxleCaptureRecord {
    pub fn new(site_id: &str, meta: &AxleMetadata, bucket: &str, date_folder: &str) -> Self {
        Self {
            site_id: site_id.to_string(),
            external_id: meta.external_id.clone(),
            plate_number: meta.plate.clone(),
            frame_time: meta.captured_at(),
            camera_id: meta.camera_id.clone(),
            length_mm: meta.length_mm,
            wheel_count: meta.wheel_count,
            axle_count: meta.axle_count,
            category: meta.category.clone(),
            body_type: meta.body_type.clone(),
            bucket: bucket.to_string(),
            date_folder: date_folder.to_string(),
            xml_key: String::new(),
            image_key: String::new(),
        }
    }
}

/// Durable record of ingested captures. Every write is an upsert keyed by
/// (site_id, external_id) and marks the row for replication.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn upsert_plate_capture(&self, record: &PlateCaptureRecord) -> Result<()>;

    async fn upsert_axle_capture(&self, record: &AxleCaptureRecord) -> Result<()>;

    /// Replace the stored measurements of a plate capture and patch the
    /// capture row with the most confident one.
    async fn attach_dimensions(
        &self,
        site_id: &str,
        external_id: &str,
        measurements: &[VehicleMeasurement],
    ) -> Result<()>;
}

/// PostgreSQL ledger
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    /// Create a new ledger with connection pool
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("Database health check failed")?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl Ledger for PgLedger {
    #[instrument(skip(self, record), fields(site_id = %record.site_id, external_id = %record.external_id))]
    async fn upsert_plate_capture(&self, record: &PlateCaptureRecord) -> Result<()> {
        sqlx::query(UPSERT_PLATE_CAPTURE)
        .bind(&record.site_id)
        .bind(&record.external_id)
        .bind(&record.plate_number)
        .bind(record.frame_time)
        .bind(&record.location)
        .bind(&record.camera_id)
        .bind(record.confidence)
        .bind(&record.bucket)
        .bind(&record.date_folder)
        .bind(&record.xml_key)
        .bind(&record.image_key)
        .bind(&record.plate_image_key)
        .execute(&self.pool)
        .await
        .context("Failed to upsert plate capture")?;

        debug!(plate = %record.plate_number, "Plate capture committed");
        metrics::counter!("capture.ledger.upserts", "domain" => "plate").increment(1);
        Ok(())
    }

    #[instrument(skip(self, record), fields(site_id = %record.site_id, external_id = %record.external_id))]
    async fn upsert_axle_capture(&self, record: &AxleCaptureRecord) -> Result<()> {
        sqlx::query(UPSERT_AXLE_CAPTURE)
        .bind(&record.site_id)
        .bind(&record.external_id)
        .bind(&record.plate_number)
        .bind(record.frame_time)
        .bind(&record.camera_id)
        .bind(record.length_mm)
        .bind(record.wheel_count)
        .bind(record.axle_count)
        .bind(&record.category)
        .bind(&record.body_type)
        .bind(&record.bucket)
        .bind(&record.date_folder)
        .bind(&record.xml_key)
        .bind(&record.image_key)
        .execute(&self.pool)
        .await
        .context("Failed to upsert axle capture")?;

        debug!(axles = record.axle_count, "Axle capture committed");
        metrics::counter!("capture.ledger.upserts", "domain" => "axle").increment(1);
        Ok(())
    }

    #[instrument(skip(self, measurements), fields(count = measurements.len()))]
    async fn attach_dimensions(
        &self,
        site_id: &str,
        external_id: &str,
        measurements: &[VehicleMeasurement],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        sqlx::query("DELETE FROM vehicle_dimensions WHERE site_id = $1 AND external_id = $2")
            .bind(site_id)
            .bind(external_id)
            .execute(&mut *tx)
            .await
            .context("Failed to clear previous measurements")?;

        for m in measurements {
            let bbox_json = serde_json::to_value(&m.bbox)?;
            let d = &m.dimensions;
            let center_x =
                i32::try_from(d.center_x).context("Measurement centre x out of range")?;
            let center_y =
                i32::try_from(d.center_y).context("Measurement centre y out of range")?;

            sqlx::query(INSERT_MEASUREMENT)
            .bind(Uuid::new_v4())
            .bind(site_id)
            .bind(external_id)
            .bind(&d.source)
            .bind(d.length_m)
            .bind(d.width_m)
            .bind(d.height_m)
            .bind(d.distance_m)
            .bind(center_x)
            .bind(center_y)
            .bind(d.confidence)
            .bind(m.class.category.as_str())
            .bind(m.class.confidence)
            .bind(&bbox_json)
            .bind(d.measured_at)
            .execute(&mut *tx)
            .await
            .context("Failed to insert vehicle measurement")?;
        }

        let best = best_measurement(measurements);
        sqlx::query(PATCH_CAPTURE_DIMENSIONS)
        .bind(site_id)
        .bind(external_id)
        .bind(best.map(|m| m.dimensions.length_m))
        .bind(best.map(|m| m.dimensions.width_m))
        .bind(best.map(|m| m.dimensions.height_m))
        .bind(best.map(|m| m.class.category.as_str()))
        .bind(best.map(|m| m.dimensions.confidence))
        .execute(&mut *tx)
        .await
        .context("Failed to patch capture dimensions")?;

        tx.commit().await.context("Failed to commit transaction")?;

        metrics::counter!("capture.dimensions.stored").increment(measurements.len() as u64);
        Ok(())
    }
}
