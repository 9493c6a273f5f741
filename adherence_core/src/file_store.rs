//! Directory-backed repository with file locking.
//!
//! Each collection is a JSON object keyed by record id. Every batch takes an
//! exclusive lock on the store's lock file, applies its changes in memory,
//! and atomically replaces the collection file, so a failed batch leaves the
//! previous contents in place.

use crate::store::{apply_delete, apply_write, check_batch_size, LogQuery, Repository, DEFAULT_BATCH_LIMIT};
use crate::{Error, LogId, MedicationLog, Prescription, Result, User};
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const PRESCRIPTIONS: &str = "prescriptions.json";
const MEDICATION_LOGS: &str = "medication_logs.json";
const USERS: &str = "users.json";
const LOCK_FILE: &str = ".lock";

/// JSON collections stored under one directory
pub struct FileStore {
    dir: PathBuf,
    batch_limit: usize,
}

impl FileStore {
    /// Open (or lazily create) a store rooted at `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            batch_limit: DEFAULT_BATCH_LIMIT,
        }
    }

    pub fn with_batch_limit(mut self, batch_limit: usize) -> Self {
        self.batch_limit = batch_limit;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Insert or replace a prescription record
    pub fn put_prescription(&self, prescription: &Prescription) -> Result<()> {
        self.with_exclusive(|| {
            let mut all: BTreeMap<String, Prescription> = self.read_collection(PRESCRIPTIONS)?;
            all.insert(prescription.id.clone(), prescription.clone());
            self.write_collection(PRESCRIPTIONS, &all)
        })
    }

    /// Insert or replace a user record
    pub fn put_user(&self, user: &User) -> Result<()> {
        self.with_exclusive(|| {
            let mut all: BTreeMap<String, User> = self.read_collection(USERS)?;
            all.insert(user.id.clone(), user.clone());
            self.write_collection(USERS, &all)
        })
    }

    pub fn list_prescriptions(&self) -> Result<Vec<Prescription>> {
        self.with_shared(|| {
            let all: BTreeMap<String, Prescription> = self.read_collection(PRESCRIPTIONS)?;
            Ok(all.into_values().collect())
        })
    }

    fn lock_file(&self) -> Result<File> {
        std::fs::create_dir_all(&self.dir)?;
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(self.dir.join(LOCK_FILE))?;
        Ok(file)
    }

    fn with_exclusive<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let lock = self.lock_file()?;
        lock.lock_exclusive()?;
        let result = f();
        lock.unlock()?;
        result
    }

    fn with_shared<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let lock = self.lock_file()?;
        lock.lock_shared()?;
        let result = f();
        lock.unlock()?;
        result
    }

    /// Read a collection. A missing file is an empty collection; a corrupt
    /// one is an error, since rewriting it would drop recorded history.
    fn read_collection<T: DeserializeOwned>(&self, name: &str) -> Result<BTreeMap<String, T>> {
        let path = self.dir.join(name);
        if !path.exists() {
            return Ok(BTreeMap::new());
        }

        let mut contents = String::new();
        File::open(&path)?.read_to_string(&mut contents)?;
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        serde_json::from_str(&contents).map_err(|e| {
            tracing::warn!("Failed to parse collection {:?}: {}", path, e);
            Error::Json(e)
        })
    }

    /// Atomically replace a collection by writing a temp file, syncing it,
    /// and renaming it over the original
    fn write_collection<T: Serialize>(&self, name: &str, records: &BTreeMap<String, T>) -> Result<()> {
        let temp = NamedTempFile::new_in(&self.dir)?;
        {
            let mut writer = std::io::BufWriter::new(temp.as_file());
            serde_json::to_writer(&mut writer, records)?;
            writer.flush()?;
        }
        temp.as_file().sync_all()?;
        temp.persist(self.dir.join(name)).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }

    fn read_logs(&self) -> Result<BTreeMap<LogId, MedicationLog>> {
        self.read_collection(MEDICATION_LOGS)
    }
}

impl Repository for FileStore {
    fn get_prescription(&self, id: &str) -> Result<Option<Prescription>> {
        self.with_shared(|| {
            let mut all: BTreeMap<String, Prescription> = self.read_collection(PRESCRIPTIONS)?;
            Ok(all.remove(id))
        })
    }

    fn get_user(&self, id: &str) -> Result<Option<User>> {
        self.with_shared(|| {
            let mut all: BTreeMap<String, User> = self.read_collection(USERS)?;
            Ok(all.remove(id))
        })
    }

    fn query_logs(&self, query: &LogQuery) -> Result<Vec<MedicationLog>> {
        self.with_shared(|| Ok(query.select(self.read_logs()?.values())))
    }

    fn batch_write(&self, logs: &[MedicationLog]) -> Result<()> {
        check_batch_size(logs.len(), self.batch_limit)?;
        if logs.is_empty() {
            return Ok(());
        }
        self.with_exclusive(|| {
            let mut all = self.read_logs()?;
            apply_write(&mut all, logs)?;
            self.write_collection(MEDICATION_LOGS, &all)?;
            tracing::debug!("Committed batch of {} log writes", logs.len());
            Ok(())
        })
    }

    fn batch_delete(&self, ids: &[LogId]) -> Result<()> {
        check_batch_size(ids.len(), self.batch_limit)?;
        if ids.is_empty() {
            return Ok(());
        }
        self.with_exclusive(|| {
            let mut all = self.read_logs()?;
            let removed = apply_delete(&mut all, ids)?;
            self.write_collection(MEDICATION_LOGS, &all)?;
            tracing::debug!("Committed batch of {} log deletes", removed);
            Ok(())
        })
    }

    fn batch_limit(&self) -> usize {
        self.batch_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{at, log_with_status, patient, prescription};
    use crate::LogStatus;

    #[test]
    fn test_records_roundtrip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(temp_dir.path());

        let rx = prescription("rx1", &["08:00", "20:00"]);
        store.put_prescription(&rx).unwrap();
        store.put_user(&patient("patient1", Some("token-1"))).unwrap();

        assert_eq!(store.get_prescription("rx1").unwrap(), Some(rx));
        assert_eq!(
            store.get_user("patient1").unwrap().unwrap().fcm_token.as_deref(),
            Some("token-1")
        );
        assert!(store.get_prescription("missing").unwrap().is_none());
    }

    #[test]
    fn test_batch_write_and_query() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(temp_dir.path());
        let rx = prescription("rx1", &["08:00"]);

        let logs: Vec<_> = (1..=3)
            .map(|d| log_with_status(&rx, at(2025, 3, d, 8, 0), LogStatus::Upcoming))
            .collect();
        store.batch_write(&logs).unwrap();

        let loaded = store.query_logs(&LogQuery::for_prescription("rx1")).unwrap();
        assert_eq!(loaded, logs);
    }

    #[test]
    fn test_oversized_batch_leaves_store_untouched() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(temp_dir.path()).with_batch_limit(1);
        let rx = prescription("rx1", &["08:00"]);

        let logs = vec![
            log_with_status(&rx, at(2025, 3, 1, 8, 0), LogStatus::Upcoming),
            log_with_status(&rx, at(2025, 3, 2, 8, 0), LogStatus::Upcoming),
        ];
        assert!(store.batch_write(&logs).is_err());
        assert!(!temp_dir.path().join(MEDICATION_LOGS).exists());
    }

    #[test]
    fn test_corrupted_collection_is_an_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::write(temp_dir.path().join(MEDICATION_LOGS), "{ invalid json }").unwrap();

        let store = FileStore::new(temp_dir.path());
        assert!(matches!(
            store.query_logs(&LogQuery::default()),
            Err(Error::Json(_))
        ));
    }

    #[test]
    fn test_atomic_write_leaves_no_temp_files() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(temp_dir.path());
        let rx = prescription("rx1", &["08:00"]);
        store
            .batch_write(&[log_with_status(&rx, at(2025, 3, 1, 8, 0), LogStatus::Upcoming)])
            .unwrap();

        let extras: Vec<_> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name() != MEDICATION_LOGS && e.file_name() != LOCK_FILE)
            .collect();
        assert!(extras.is_empty(), "Unexpected files: {:?}", extras);
    }
}
