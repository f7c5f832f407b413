use super::{is_metadata_file, Staging};
use crate::enrichment::DimensionEnricher;
use crate::ledger::PlateCaptureRecord;
use crate::metadata::PlateMetadata;
use crate::object_store::date_prefix;
use crate::remote::RemoteDirectory;
use crate::watcher::{FileHandler, Outcome};
use async_trait::async_trait;
use chrono::Local;
use tracing::{debug, info, instrument, warn};

/// Plate-capture (ANPR) file sets: `{id}.xml`, a full scene JPEG and a
/// plate crop JPEG whose name contains `plate`.
pub struct PlateProcessor {
    staging: Staging,
    enricher: Option<DimensionEnricher>,
}

impl PlateProcessor {
    pub fn new(staging: Staging) -> Self {
        Self {
            staging,
            enricher: None,
        }
    }

    pub fn with_enricher(mut self, enricher: DimensionEnricher) -> Self {
        self.enricher = Some(enricher);
        self
    }

    #[instrument(skip(self, dir), fields(domain = "plate"))]
    async fn process(&self, dir: &mut dyn RemoteDirectory, name: &str) -> Result<(), Outcome> {
        let raw = self.staging.fetch_metadata(dir, name).await?;
        let meta = match PlateMetadata::parse(&raw) {
            Ok(meta) => meta,
            Err(e) => return Err(self.staging.reject(dir, name, e.to_string()).await),
        };

        let companions = self.staging.companions(dir, name).await?;
        let (scene, crop) = split_companions(&companions).ok_or_else(|| {
            Outcome::Retry(format!(
                "waiting for scene and plate images, {} present",
                companions.len()
            ))
        })?;

        let date_folder = date_prefix(&Local::now());
        let keys = self
            .staging
            .upload(dir, &date_folder, (name, raw), &[scene, crop])
            .await?;

        let mut record = PlateCaptureRecord::new(
            &self.staging.site_id,
            &meta,
            self.staging.store.bucket(),
            &date_folder,
        );
        record.xml_key = keys[0].clone();
        record.image_key = keys[1].clone();
        record.plate_image_key = keys[2].clone();

        self.staging
            .ledger
            .upsert_plate_capture(&record)
            .await
            .map_err(|e| Outcome::Retry(format!("ledger commit failed: {e:#}")))?;

        info!(
            external_id = %record.external_id,
            plate = %record.plate_number,
            "Plate capture ingested"
        );

        if let Some(enricher) = &self.enricher {
            self.enrich(enricher, &record).await;
        }

        self.staging.cleanup(dir, &[name, scene, crop]).await;
        Ok(())
    }

    /// Measure the vehicles in the uploaded scene image. Never fails the
    /// file set.
    async fn enrich(&self, enricher: &DimensionEnricher, record: &PlateCaptureRecord) {
        let image = match self.staging.store.get_object(&record.image_key).await {
            Ok(image) => image,
            Err(e) => {
                warn!(key = %record.image_key, error = %e, "Scene image unavailable for measurement");
                metrics::counter!("capture.enrichment.failures").increment(1);
                return;
            }
        };

        let measuring = enricher.clone();
        let source = record.image_key.clone();
        let measurements =
            match tokio::task::spawn_blocking(move || measuring.measure(&image, &source)).await {
                Ok(Ok(measurements)) => measurements,
                Ok(Err(e)) => {
                    warn!(key = %record.image_key, error = %e, "Vehicle detection failed");
                    metrics::counter!("capture.enrichment.failures").increment(1);
                    return;
                }
                Err(e) => {
                    warn!(key = %record.image_key, error = %e, "Measurement task failed");
                    metrics::counter!("capture.enrichment.failures").increment(1);
                    return;
                }
            };

        if let Err(e) = self
            .staging
            .ledger
            .attach_dimensions(&record.site_id, &record.external_id, &measurements)
            .await
        {
            warn!(external_id = %record.external_id, error = %e, "Failed to store measurements");
            metrics::counter!("capture.enrichment.failures").increment(1);
            return;
        }

        debug!(
            external_id = %record.external_id,
            vehicles = measurements.len(),
            "Capture measured"
        );
    }
}

/// First crop (name contains `plate`) and first scene image, when both exist.
fn split_companions(companions: &[String]) -> Option<(&str, &str)> {
    let is_crop = |name: &&String| name.to_lowercase().contains("plate");
    let crop = companions.iter().find(is_crop)?;
    let scene = companions.iter().find(|name| !is_crop(name))?;
    Some((scene.as_str(), crop.as_str()))
}

#[async_trait]
impl FileHandler for PlateProcessor {
    async fn handle(&self, dir: &mut dyn RemoteDirectory, name: &str) -> Outcome {
        if !is_metadata_file(name) {
            return Outcome::Completed;
        }
        match self.process(dir, name).await {
            Ok(()) => Outcome::Completed,
            Err(outcome) => outcome,
        }
    }
}
