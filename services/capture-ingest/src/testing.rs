//! In-memory stand-ins for the FTP directory, object store and ledger.

use crate::enrichment::VehicleMeasurement;
use crate::ledger::{AxleCaptureRecord, Ledger, PlateCaptureRecord};
use crate::object_store::ObjectStore;
use crate::remote::{RemoteDirectory, RemoteEntry, RemoteError};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Mutex;

type CaptureKey = (String, String);

/// Ordered listing. Renamed files leave the listing and are remembered in
/// `renamed`.
#[derive(Default)]
pub struct MemoryDirectory {
    entries: Vec<(RemoteEntry, Vec<u8>)>,
    pub renamed: Vec<(String, String)>,
    pub fail_list: bool,
    pub fail_retrieve: bool,
    pub fail_delete: bool,
}

impl MemoryDirectory {
    pub fn add_file(&mut self, name: &str, body: &[u8]) {
        self.entries.push((RemoteEntry::file(name), body.to_vec()));
    }

    pub fn add_directory(&mut self, name: &str) {
        self.entries.push((RemoteEntry::directory(name), Vec::new()));
    }

    pub fn file_names(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(e, _)| e.is_file)
            .map(|(e, _)| e.name.clone())
            .collect()
    }

    fn position(&self, name: &str) -> Result<usize, RemoteError> {
        self.entries
            .iter()
            .position(|(e, _)| e.is_file && e.name == name)
            .ok_or_else(|| RemoteError::NotFound(name.to_string()))
    }
}

#[async_trait]
impl RemoteDirectory for MemoryDirectory {
    async fn list(&mut self) -> Result<Vec<RemoteEntry>, RemoteError> {
        if self.fail_list {
            return Err(RemoteError::Unavailable("listing disabled".to_string()));
        }
        Ok(self.entries.iter().map(|(e, _)| e.clone()).collect())
    }

    async fn retrieve(&mut self, name: &str) -> Result<Vec<u8>, RemoteError> {
        if self.fail_retrieve {
            return Err(RemoteError::Unavailable("retrieve disabled".to_string()));
        }
        let index = self.position(name)?;
        Ok(self.entries[index].1.clone())
    }

    async fn delete(&mut self, name: &str) -> Result<(), RemoteError> {
        if self.fail_delete {
            return Err(RemoteError::Unavailable("delete disabled".to_string()));
        }
        let index = self.position(name)?;
        self.entries.remove(index);
        Ok(())
    }

    async fn rename(&mut self, name: &str, to: &str) -> Result<(), RemoteError> {
        let index = self.position(name)?;
        self.entries.remove(index);
        self.renamed.push((name.to_string(), to.to_string()));
        Ok(())
    }
}

pub struct MemoryObjectStore {
    bucket: String,
    objects: Mutex<HashMap<String, (Vec<u8>, String)>>,
    pub fail_puts: AtomicBool,
    pub fail_gets: AtomicBool,
    pub put_calls: AtomicU64,
}

impl MemoryObjectStore {
    pub fn new(bucket: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            objects: Mutex::new(HashMap::new()),
            fail_puts: AtomicBool::new(false),
            fail_gets: AtomicBool::new(false),
            put_calls: AtomicU64::new(0),
        }
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.objects.lock().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn content_type(&self, key: &str) -> Option<String> {
        self.objects.lock().await.get(key).map(|(_, ct)| ct.clone())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put_object(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        self.put_calls.fetch_add(1, Ordering::Relaxed);
        if self.fail_puts.load(Ordering::Relaxed) {
            return Err(anyhow!("object store unavailable"));
        }
        self.objects
            .lock()
            .await
            .insert(key.to_string(), (body, content_type.to_string()));
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        if self.fail_gets.load(Ordering::Relaxed) {
            return Err(anyhow!("object store unavailable"));
        }
        self.objects
            .lock()
            .await
            .get(key)
            .map(|(body, _)| body.clone())
            .ok_or_else(|| anyhow!("no such key: {key}"))
    }
}

#[derive(Default)]
pub struct MemoryLedger {
    pub plates: Mutex<HashMap<CaptureKey, PlateCaptureRecord>>,
    pub axles: Mutex<HashMap<CaptureKey, AxleCaptureRecord>>,
    pub dimensions: Mutex<HashMap<CaptureKey, Vec<VehicleMeasurement>>>,
    pub fail_writes: AtomicBool,
    pub upsert_calls: AtomicU64,
}

impl MemoryLedger {
    fn check(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(anyhow!("ledger unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn upsert_plate_capture(&self, record: &PlateCaptureRecord) -> Result<()> {
        self.upsert_calls.fetch_add(1, Ordering::Relaxed);
        self.check()?;
        self.plates.lock().await.insert(
            (record.site_id.clone(), record.external_id.clone()),
            record.clone(),
        );
        Ok(())
    }

    async fn upsert_axle_capture(&self, record: &AxleCaptureRecord) -> Result<()> {
        self.upsert_calls.fetch_add(1, Ordering::Relaxed);
        self.check()?;
        self.axles.lock().await.insert(
            (record.site_id.clone(), record.external_id.clone()),
            record.clone(),
        );
        Ok(())
    }

    async fn attach_dimensions(
        &self,
        site_id: &str,
        external_id: &str,
        measurements: &[VehicleMeasurement],
    ) -> Result<()> {
        self.check()?;
        self.dimensions.lock().await.insert(
            (site_id.to_string(), external_id.to_string()),
            measurements.to_vec(),
        );
        Ok(())
    }
}
