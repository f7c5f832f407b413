//! Per-file handlers that move a capture file set from the FTP drop
//! directory into object storage and the ledger.
//!
//! A file set is one metadata XML plus the JPEG companions whose names start
//! with the XML's name. Each handler only acts when offered the XML; images
//! are picked up alongside it. The FTP directory itself is the work queue:
//! a set is done once its files are gone from the listing.

mod axle;
mod plate;

pub use axle::AxleProcessor;
pub use plate::PlateProcessor;

use crate::ledger::Ledger;
use crate::object_store::{content_type_for, object_key, ObjectStore};
use crate::remote::RemoteDirectory;
use crate::watcher::Outcome;
use std::sync::Arc;
use tracing::{debug, warn};

pub fn is_metadata_file(name: &str) -> bool {
    name.to_lowercase().ends_with(".xml")
}

pub fn is_jpeg(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.ends_with(".jpg") || lower.ends_with(".jpeg")
}

/// Everything a processor needs besides its domain rules.
#[derive(Clone)]
pub struct Staging {
    pub site_id: String,
    pub store: Arc<dyn ObjectStore>,
    pub ledger: Arc<dyn Ledger>,
    /// Where poison metadata files are moved; deleted when unset
    pub quarantine_dir: Option<String>,
}

impl Staging {
    pub fn new(site_id: &str, store: Arc<dyn ObjectStore>, ledger: Arc<dyn Ledger>) -> Self {
        Self {
            site_id: site_id.to_string(),
            store,
            ledger,
            quarantine_dir: None,
        }
    }

    pub fn with_quarantine(mut self, dir: Option<String>) -> Self {
        self.quarantine_dir = dir.filter(|d| !d.trim().is_empty());
        self
    }

    async fn fetch_metadata(
        &self,
        dir: &mut dyn RemoteDirectory,
        name: &str,
    ) -> Result<Vec<u8>, Outcome> {
        dir.retrieve(name)
            .await
            .map_err(|e| Outcome::Retry(format!("metadata fetch failed: {e}")))
    }

    /// JPEG files in the current listing that belong to `metadata_name`,
    /// in listing order.
    async fn companions(
        &self,
        dir: &mut dyn RemoteDirectory,
        metadata_name: &str,
    ) -> Result<Vec<String>, Outcome> {
        let entries = dir
            .list()
            .await
            .map_err(|e| Outcome::Retry(format!("companion listing failed: {e}")))?;

        Ok(entries
            .into_iter()
            .filter(|e| {
                e.is_file
                    && e.name != metadata_name
                    && e.name.starts_with(metadata_name)
                    && is_jpeg(&e.name)
            })
            .map(|e| e.name)
            .collect())
    }

    /// Upload the metadata body and every companion under `date_folder`.
    /// Returns the object keys in the order given.
    async fn upload(
        &self,
        dir: &mut dyn RemoteDirectory,
        date_folder: &str,
        metadata: (&str, Vec<u8>),
        companions: &[&str],
    ) -> Result<Vec<String>, Outcome> {
        let mut keys = Vec::with_capacity(companions.len() + 1);

        let (metadata_name, metadata_body) = metadata;
        keys.push(self.put(date_folder, metadata_name, metadata_body).await?);

        for name in companions {
            let body = dir
                .retrieve(name)
                .await
                .map_err(|e| Outcome::Retry(format!("fetch of {name} failed: {e}")))?;
            keys.push(self.put(date_folder, name, body).await?);
        }

        Ok(keys)
    }

    async fn put(&self, date_folder: &str, name: &str, body: Vec<u8>) -> Result<String, Outcome> {
        let key = object_key(date_folder, name);
        self.store
            .put_object(&key, body, content_type_for(name))
            .await
            .map_err(|e| Outcome::Retry(format!("upload of {key} failed: {e:#}")))?;
        debug!(bucket = %self.store.bucket(), key = %key, "Artifact uploaded");
        Ok(key)
    }

    /// Set aside a metadata file that can never be processed.
    async fn reject(&self, dir: &mut dyn RemoteDirectory, name: &str, reason: String) -> Outcome {
        let result = match &self.quarantine_dir {
            Some(quarantine) => {
                let target = format!("{}/{}", quarantine.trim_end_matches('/'), name);
                dir.rename(name, &target).await
            }
            None => dir.delete(name).await,
        };
        if let Err(e) = result {
            warn!(file = %name, error = %e, "Failed to set aside rejected file");
        }
        Outcome::Failed(reason)
    }

    /// Best-effort removal of a committed file set.
    async fn cleanup(&self, dir: &mut dyn RemoteDirectory, names: &[&str]) {
        for name in names {
            if let Err(e) = dir.delete(name).await {
                warn!(file = %name, error = %e, "Failed to delete ingested file");
                metrics::counter!("capture.cleanup.failures").increment(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryDirectory, MemoryLedger, MemoryObjectStore};

    fn staging() -> Staging {
        Staging::new(
            "SITE-1",
            Arc::new(MemoryObjectStore::new("anpr")),
            Arc::new(MemoryLedger::default()),
        )
    }

    #[test]
    fn test_file_kinds() {
        assert!(is_metadata_file("123.xml"));
        assert!(is_metadata_file("123.XML"));
        assert!(!is_metadata_file("123.xml.jpeg"));
        assert!(is_jpeg("123.xml.plate.JPG"));
        assert!(is_jpeg("123.xml.jpeg"));
        assert!(!is_jpeg("123.xml.png"));
    }

    #[tokio::test]
    async fn test_companions_match_prefix_and_extension() {
        let mut dir = MemoryDirectory::default();
        dir.add_file("123.xml", b"");
        dir.add_file("123.xml.plate.jpg", b"");
        dir.add_file("123.xml.txt", b"");
        dir.add_file("1234.xml.jpeg", b"");
        dir.add_directory("123.xml.jpeg.d.jpg");
        dir.add_file("123.xml.jpeg", b"");

        let found = staging().companions(&mut dir, "123.xml").await.unwrap();
        assert_eq!(found, vec!["123.xml.plate.jpg", "123.xml.jpeg"]);
    }

    #[tokio::test]
    async fn test_reject_without_quarantine_deletes() {
        let mut dir = MemoryDirectory::default();
        dir.add_file("bad.xml", b"<");

        let outcome = staging().reject(&mut dir, "bad.xml", "bad".into()).await;
        assert_eq!(outcome, Outcome::Failed("bad".into()));
        assert!(dir.file_names().is_empty());
        assert!(dir.renamed.is_empty());
    }

    #[tokio::test]
    async fn test_reject_with_quarantine_renames() {
        let mut dir = MemoryDirectory::default();
        dir.add_file("bad.xml", b"<");

        let staging = staging().with_quarantine(Some("quarantine/".to_string()));
        staging.reject(&mut dir, "bad.xml", "bad".into()).await;
        assert_eq!(
            dir.renamed,
            vec![("bad.xml".to_string(), "quarantine/bad.xml".to_string())]
        );
    }

    #[tokio::test]
    async fn test_cleanup_attempts_every_file() {
        let mut dir = MemoryDirectory::default();
        dir.add_file("1.xml", b"");
        dir.add_file("1.xml.jpg", b"");

        staging()
            .cleanup(&mut dir, &["missing.xml", "1.xml", "1.xml.jpg"])
            .await;
        assert!(dir.file_names().is_empty());
    }
}
