use super::{is_metadata_file, Staging};
use crate::ledger::AxleCaptureRecord;
use crate::metadata::AxleMetadata;
use crate::object_store::date_prefix;
use crate::remote::RemoteDirectory;
use crate::watcher::{FileHandler, Outcome};
use async_trait::async_trait;
use chrono::Local;
use tracing::{info, instrument};

/// Axle-capture file sets: `{id}.xml` and one vehicle JPEG.
pub struct AxleProcessor {
    staging: Staging,
}

impl AxleProcessor {
    pub fn new(staging: Staging) -> Self {
        Self { staging }
    }

    #[instrument(skip(self, dir), fields(domain = "axle"))]
    async fn process(&self, dir: &mut dyn RemoteDirectory, name: &str) -> Result<(), Outcome> {
        let raw = self.staging.fetch_metadata(dir, name).await?;
        let meta = match AxleMetadata::parse(&raw) {
            Ok(meta) => meta,
            Err(e) => return Err(self.staging.reject(dir, name, e.to_string()).await),
        };

        let companions = self.staging.companions(dir, name).await?;
        let image = companions
            .first()
            .map(String::as_str)
            .ok_or_else(|| Outcome::Retry("waiting for vehicle image".to_string()))?;

        let date_folder = date_prefix(&Local::now());
        let keys = self
            .staging
            .upload(dir, &date_folder, (name, raw), &[image])
            .await?;

        let mut record = AxleCaptureRecord::new(
            &self.staging.site_id,
            &meta,
            self.staging.store.bucket(),
            &date_folder,
        );
        record.xml_key = keys[0].clone();
        record.image_key = keys[1].clone();

        self.staging
            .ledger
            .upsert_axle_capture(&record)
            .await
            .map_err(|e| Outcome::Retry(format!("ledger commit failed: {e:#}")))?;

        info!(
            external_id = %record.external_id,
            axles = record.axle_count,
            category = %record.category,
            "Axle capture ingested"
        );

        self.staging.cleanup(dir, &[name, image]).await;
        Ok(())
    }
}

#[async_trait]
impl FileHandler for AxleProcessor {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryDirectory, MemoryLedger, MemoryObjectStore};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    const AXLE_XML: &[u8] = br#"<result>
  <cameraid value="AXLE-02"/>
  <ID value="A7"/>
  <capture><frametime value="2025.12.01 14:30:27.075"/></capture>
  <anpr><text value="D5678ABC"/></anpr>
  <vac><vehicle0>
    <length value="11850"/><nwheels value="10"/><naxles value="3"/>
    <category value="truck"/><body_type value="box"/>
  </vehicle0></vac>
</result>"#;

    fn setup() -> (Arc<MemoryObjectStore>, Arc<MemoryLedger>, AxleProcessor) {
        let store = Arc::new(MemoryObjectStore::new("axle"));
        let ledger = Arc::new(MemoryLedger::default());
        let processor = AxleProcessor::new(Staging::new("SITE-1", store.clone(), ledger.clone()));
        (store, ledger, processor)
    }

    #[tokio::test]
    async fn test_axle_set_is_ingested() {
        let (store, ledger, processor) = setup();
        let mut dir = MemoryDirectory::default();
        dir.add_file("77.xml", AXLE_XML);
        dir.add_file("77.xml.jpg", b"vehicle");

        assert_eq!(processor.handle(&mut dir, "77.xml").await, Outcome::Completed);
        assert!(dir.file_names().is_empty());

        let prefix = date_prefix(&Local::now());
        assert_eq!(
            store.keys().await,
            vec![format!("{prefix}/77.xml"), format!("{prefix}/77.xml.jpg")]
        );

        let axles = ledger.axles.lock().await;
        let row = &axles[&("SITE-1".to_string(), "A7".to_string())];
        assert_eq!(row.bucket, "axle");
        assert_eq!(row.axle_count, 3);
        assert_eq!(row.wheel_count, 10);
        assert_eq!(row.image_key, format!("{prefix}/77.xml.jpg"));
    }

    #[tokio::test]
    async fn test_waits_for_vehicle_image() {
        let (store, _ledger, processor) = setup();
        let mut dir = MemoryDirectory::default();
        dir.add_file("77.xml", AXLE_XML);

        let outcome = processor.handle(&mut dir, "77.xml").await;
        assert_eq!(outcome, Outcome::Retry("waiting for vehicle image".to_string()));
        assert_eq!(dir.file_names(), vec!["77.xml"]);
        assert_eq!(store.put_calls.load(Ordering::Relaxed), 0);

        dir.add_file("77.xml.jpeg", b"vehicle");
        assert_eq!(processor.handle(&mut dir, "77.xml").await, Outcome::Completed);
    }

    #[tokio::test]
    async fn test_unparseable_axle_metadata_is_dropped() {
        let (store, ledger, processor) = setup();
        let mut dir = MemoryDirectory::default();
        dir.add_file("88.xml", b"<result><ID value=\"A8\"></vac>");
        dir.add_file("88.xml.jpg", b"vehicle");

        let outcome = processor.handle(&mut dir, "88.xml").await;
        assert!(matches!(outcome, Outcome::Failed(_)));
        assert_eq!(dir.file_names(), vec!["88.xml.jpg"]);
        assert_eq!(store.put_calls.load(Ordering::Relaxed), 0);
        assert_eq!(ledger.upsert_calls.load(Ordering::Relaxed), 0);
    }
}
