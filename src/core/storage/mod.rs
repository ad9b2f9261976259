//! Job Record Store: one JSON file per job under the storage directory.
//!
//! Writes go to a uniquely named `<job_id>.json.<uuid>.tmp` and are renamed
//! over the record so a reader never sees a half-written file, even when
//! another process writes the same record. Read-modify-write cycles on the
//! same job hold a per-job lock; different jobs never contend.

mod record;
mod trigger;

pub use record::{JobMetadata, JobRecord, LastError, PluginKind, RECORD_VERSION, is_valid_job_id};
pub use trigger::{CronSpec, IntervalSpec, TriggerSpec};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::error::StoreError;
use crate::platform::{NativePlatform, Platform};

const RECORD_EXT: &str = "json";

pub struct JobStore {
    dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl JobStore {
    /// Opens (creating if needed) the storage directory.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::io(&dir, e))?;
        NativePlatform::restrict_dir_permissions(&dir);
        info!("Job store opened at {}", dir.display());
        Ok(Self {
            dir,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, job_id: &str) -> Option<PathBuf> {
        is_valid_job_id(job_id).then(|| self.dir.join(format!("{}.{}", job_id, RECORD_EXT)))
    }

    fn lock_for(&self, job_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(job_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Validates and writes `record`, replacing any prior record with the same
    /// id. Returns the record as stored (with `saved_at` set).
    pub async fn create(&self, mut record: JobRecord) -> Result<JobRecord, StoreError> {
        record.validate()?;
        let lock = self.lock_for(&record.job_id);
        let _guard = lock.lock().await;
        self.write_record(&mut record).await?;
        debug!("Saved job {}", record.job_id);
        Ok(record)
    }

    /// Returns `None` when the record is absent or fails validation.
    pub async fn read(&self, job_id: &str) -> Result<Option<JobRecord>, StoreError> {
        let Some(path) = self.record_path(job_id) else {
            return Ok(None);
        };
        self.read_path(&path, job_id).await
    }

    async fn read_path(&self, path: &Path, job_id: &str) -> Result<Option<JobRecord>, StoreError> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(path, e)),
        };
        match JobRecord::from_json(&raw) {
            Ok(record) if record.job_id == job_id => Ok(Some(record)),
            Ok(record) => {
                warn!(
                    "Ignoring {}: it holds job_id '{}'",
                    path.display(),
                    record.job_id
                );
                Ok(None)
            }
            Err(e) => {
                warn!("Ignoring invalid job record {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }

    /// Every valid record, ordered by job id. Invalid files are skipped.
    pub async fn list(&self) -> Result<Vec<JobRecord>, StoreError> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| StoreError::io(&self.dir, e))?;

        let mut records = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&self.dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                continue;
            }
            let Some(job_id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let job_id = job_id.to_string();
            match self.read_path(&path, &job_id).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => warn!("Skipping unreadable job file {}: {}", path.display(), e),
            }
        }
        records.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        Ok(records)
    }

    /// Returns false when there was nothing to delete.
    pub async fn delete(&self, job_id: &str) -> Result<bool, StoreError> {
        let Some(path) = self.record_path(job_id) else {
            return Ok(false);
        };
        let lock = self.lock_for(job_id);
        let _guard = lock.lock().await;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!("Deleted job {}", job_id);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    pub async fn exists(&self, job_id: &str) -> bool {
        matches!(self.read(job_id).await, Ok(Some(_)))
    }

    /// Applies `change` to the stored record under the job's lock.
    pub async fn update<F>(&self, job_id: &str, change: F) -> Result<JobRecord, StoreError>
    where
        F: FnOnce(&mut JobRecord),
    {
        let path = self
            .record_path(job_id)
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;
        let lock = self.lock_for(job_id);
        let _guard = lock.lock().await;

        let mut record = self
            .read_path(&path, job_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;
        change(&mut record);
        record.job_id = job_id.to_string();
        record.validate()?;
        self.write_record(&mut record).await?;
        Ok(record)
    }

    /// `None` when no valid record exists.
    pub async fn is_active(&self, job_id: &str) -> Result<Option<bool>, StoreError> {
        Ok(self.read(job_id).await?.map(|r| r.metadata.active))
    }

    pub async fn set_active(&self, job_id: &str, active: bool) -> Result<JobRecord, StoreError> {
        self.update(job_id, |r| r.metadata.active = active).await
    }

    pub async fn set_schedule(
        &self,
        job_id: &str,
        schedule: TriggerSpec,
    ) -> Result<JobRecord, StoreError> {
        self.update(job_id, |r| r.schedule = schedule).await
    }

    pub async fn record_success(&self, job_id: &str) -> Result<JobRecord, StoreError> {
        self.update(job_id, |r| {
            r.metadata.last_execution = Some(Utc::now());
            r.metadata.execution_count += 1;
        })
        .await
    }

    pub async fn record_failure(
        &self,
        job_id: &str,
        detail: LastError,
    ) -> Result<JobRecord, StoreError> {
        self.update(job_id, |r| {
            r.metadata.error_count += 1;
            r.metadata.last_error = Some(detail);
        })
        .await
    }

    /// Caller holds the job's lock.
    async fn write_record(&self, record: &mut JobRecord) -> Result<(), StoreError> {
        let path = self
            .record_path(&record.job_id)
            .ok_or_else(|| StoreError::Validation(format!("invalid job_id: '{}'", record.job_id)))?;
        record.saved_at = Some(Utc::now());
        record.version = RECORD_VERSION.to_string();

        let body = serde_json::to_string_pretty(record)?;
        let suffix = format!("{}.{}.tmp", RECORD_EXT, Uuid::new_v4().simple());
        let tmp = path.with_extension(suffix);
        tokio::fs::write(&tmp, body.as_bytes())
            .await
            .map_err(|e| StoreError::io(&tmp, e))?;
        NativePlatform::restrict_file_permissions(&tmp);
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StoreError::io(&path, e));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn temp_store() -> (JobStore, TempDir) {
        let tmp = TempDir::new().unwrap();
        let store = JobStore::open(tmp.path().join("storage")).await.unwrap();
        (store, tmp)
    }

    fn record(job_id: &str, kind: PluginKind) -> JobRecord {
        let schedule = if kind.has_timer() {
            TriggerSpec::every_minutes(5)
        } else {
            TriggerSpec::Unscheduled
        };
        JobRecord::new(job_id, kind, "group", "Class", schedule, "desc", true)
    }

    #[tokio::test]
    async fn create_then_read_round_trip() {
        let (store, _tmp) = temp_store().await;
        let original = record("Ping_job", PluginKind::Outgoing);
        let saved = store.create(original.clone()).await.unwrap();
        assert!(saved.saved_at.is_some());

        let mut loaded = store.read("Ping_job").await.unwrap().unwrap();
        loaded.saved_at = None;
        assert_eq!(loaded, original);
    }

    #[tokio::test]
    async fn create_replaces_instead_of_duplicating() {
        let (store, _tmp) = temp_store().await;
        store.create(record("Ping_job", PluginKind::Outgoing)).await.unwrap();
        let mut second = record("Ping_job", PluginKind::Outgoing);
        second.metadata.description = "second".into();
        store.create(second).await.unwrap();

        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].metadata.description, "second");
    }

    #[tokio::test]
    async fn invalid_record_is_never_written() {
        let (store, _tmp) = temp_store().await;
        let mut bad = record("Ping_job", PluginKind::Outgoing);
        bad.plugin_class = String::new();
        assert!(matches!(
            store.create(bad).await,
            Err(StoreError::Validation(_))
        ));
        assert!(!store.exists("Ping_job").await);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (store, _tmp) = temp_store().await;
        store.create(record("Ping_job", PluginKind::Outgoing)).await.unwrap();
        assert!(store.delete("Ping_job").await.unwrap());
        assert!(!store.delete("Ping_job").await.unwrap());
        assert!(!store.exists("Ping_job").await);
    }

    #[tokio::test]
    async fn list_skips_corrupt_files() {
        let (store, _tmp) = temp_store().await;
        store.create(record("A_job", PluginKind::Outgoing)).await.unwrap();
        store.create(record("B_handler", PluginKind::Incoming)).await.unwrap();
        std::fs::write(store.dir().join("Broken_job.json"), "{ not json").unwrap();
        std::fs::write(
            store.dir().join("NoTrigger_job.json"),
            r#"{"job_id":"NoTrigger_job","plugin_type":"outgoing","plugin_name":"g","plugin_class":"C","schedule":{}}"#,
        )
        .unwrap();
        std::fs::write(store.dir().join("notes.txt"), "ignored").unwrap();

        let ids: Vec<String> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.job_id)
            .collect();
        assert_eq!(ids, vec!["A_job", "B_handler"]);
        assert!(store.read("Broken_job").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn mismatched_file_name_is_ignored() {
        let (store, _tmp) = temp_store().await;
        let saved = store.create(record("A_job", PluginKind::Outgoing)).await.unwrap();
        let body = serde_json::to_string(&saved).unwrap();
        std::fs::write(store.dir().join("Other_job.json"), body).unwrap();
        assert!(store.read("Other_job").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn counters_only_grow() {
        let (store, _tmp) = temp_store().await;
        store.create(record("Ping_job", PluginKind::Outgoing)).await.unwrap();
        store.record_success("Ping_job").await.unwrap();
        store
            .record_failure("Ping_job", LastError::new("boom", "sending"))
            .await
            .unwrap();
        let r = store.record_success("Ping_job").await.unwrap();
        assert_eq!(r.metadata.execution_count, 2);
        assert_eq!(r.metadata.error_count, 1);
        assert!(r.metadata.last_execution.is_some());
        assert_eq!(r.metadata.last_error.as_ref().unwrap().message, "boom");
    }

    #[tokio::test]
    async fn concurrent_updates_do_not_lose_writes() {
        let (store, _tmp) = temp_store().await;
        let store = Arc::new(store);
        store.create(record("Ping_job", PluginKind::Outgoing)).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    store.record_success("Ping_job").await.unwrap();
                } else {
                    store.set_active("Ping_job", i % 4 == 1).await.unwrap();
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let r = store.read("Ping_job").await.unwrap().unwrap();
        assert_eq!(r.metadata.execution_count, 10);
        assert_eq!(leftover_tmp_files(store.dir()), 0);
    }

    fn leftover_tmp_files(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("tmp"))
            .count()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn separate_stores_on_one_dir_never_share_a_tmp_file() {
        let (bot, _tmp) = temp_store().await;
        let bot = Arc::new(bot);
        let cli = Arc::new(JobStore::open(bot.dir()).await.unwrap());
        bot.create(record("Ping_job", PluginKind::Outgoing)).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..40 {
            let store = if i % 2 == 0 { bot.clone() } else { cli.clone() };
            handles.push(tokio::spawn(async move {
                store.set_active("Ping_job", i % 3 == 0).await
            }));
        }
        for h in handles {
            assert!(h.await.unwrap().is_ok());
        }
        assert!(bot.read("Ping_job").await.unwrap().is_some());
        assert_eq!(leftover_tmp_files(bot.dir()), 0);
    }

    #[tokio::test]
    async fn update_missing_is_not_found() {
        let (store, _tmp) = temp_store().await;
        assert!(matches!(
            store.set_active("Ghost_job", false).await,
            Err(StoreError::NotFound(_))
        ));
        assert_eq!(store.is_active("Ghost_job").await.unwrap(), None);
    }

    #[tokio::test]
    async fn path_like_ids_stay_inside_store() {
        let (store, _tmp) = temp_store().await;
        assert!(store.read("../secret").await.unwrap().is_none());
        assert!(!store.delete("../secret").await.unwrap());
        assert!(store.create(record("../secret", PluginKind::Outgoing)).await.is_err());
    }
}
