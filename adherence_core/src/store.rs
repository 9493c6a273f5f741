//! Repository capability shared by every component.
//!
//! The core reads prescriptions and users, queries logs by predicate, and
//! writes or deletes logs in atomic batches. A batch either commits in full
//! or not at all; units of work larger than the store's batch limit are split
//! into sequential batches by [`write_chunked`] and [`delete_chunked`].

use crate::adherence::can_transition;
use crate::{Error, LogId, LogStatus, MedicationLog, Prescription, Result, User};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

/// Per-batch operation limit used when a store does not configure one
pub const DEFAULT_BATCH_LIMIT: usize = 500;

/// Storage operations the core depends on
pub trait Repository {
    fn get_prescription(&self, id: &str) -> Result<Option<Prescription>>;

    fn get_user(&self, id: &str) -> Result<Option<User>>;

    /// Logs matching `query`, ordered by scheduled time then id
    fn query_logs(&self, query: &LogQuery) -> Result<Vec<MedicationLog>>;

    /// Insert or replace logs as one atomic batch. A stored log may only be
    /// replaced by a version with the same status or a legal successor.
    fn batch_write(&self, logs: &[MedicationLog]) -> Result<()>;

    /// Delete logs as one atomic batch. Only `upcoming` logs may be deleted.
    fn batch_delete(&self, ids: &[LogId]) -> Result<()>;

    /// Maximum number of operations accepted by one batch
    fn batch_limit(&self) -> usize {
        DEFAULT_BATCH_LIMIT
    }
}

/// Declarative log selection. Unset fields match everything.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LogQuery {
    pub id: Option<LogId>,
    pub prescription_id: Option<String>,
    pub patient_id: Option<String>,
    pub status: Option<LogStatus>,
    pub scheduled_at_or_before: Option<DateTime<Utc>>,
    pub scheduled_after: Option<DateTime<Utc>>,
}

impl LogQuery {
    pub fn by_id(id: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            ..Default::default()
        }
    }

    pub fn for_prescription(prescription_id: &str) -> Self {
        Self {
            prescription_id: Some(prescription_id.to_string()),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: LogStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn at_or_before(mut self, cutoff: DateTime<Utc>) -> Self {
        self.scheduled_at_or_before = Some(cutoff);
        self
    }

    pub fn after(mut self, instant: DateTime<Utc>) -> Self {
        self.scheduled_after = Some(instant);
        self
    }

    pub fn matches(&self, log: &MedicationLog) -> bool {
        self.id.as_ref().map_or(true, |id| &log.id == id)
            && self
                .prescription_id
                .as_ref()
                .map_or(true, |p| &log.prescription_id == p)
            && self.patient_id.as_ref().map_or(true, |p| &log.patient_id == p)
            && self.status.map_or(true, |s| log.status == s)
            && self
                .scheduled_at_or_before
                .map_or(true, |cutoff| log.scheduled_time <= cutoff)
            && self
                .scheduled_after
                .map_or(true, |instant| log.scheduled_time > instant)
    }

    /// Apply the predicate to an id-keyed collection
    pub(crate) fn select<'a>(
        &self,
        logs: impl Iterator<Item = &'a MedicationLog>,
    ) -> Vec<MedicationLog> {
        let mut selected: Vec<MedicationLog> =
            logs.filter(|log| self.matches(log)).cloned().collect();
        selected.sort_by(|a, b| {
            a.scheduled_time
                .cmp(&b.scheduled_time)
                .then_with(|| a.id.cmp(&b.id))
        });
        selected
    }
}

/// Write `logs` in sequential batches no larger than the store's limit
pub fn write_chunked<R: Repository + ?Sized>(repo: &R, logs: &[MedicationLog]) -> Result<usize> {
    let mut batches = 0;
    for chunk in logs.chunks(repo.batch_limit().max(1)) {
        repo.batch_write(chunk)?;
        batches += 1;
    }
    if batches > 1 {
        tracing::debug!("Wrote {} logs in {} batches", logs.len(), batches);
    }
    Ok(batches)
}

/// Delete `ids` in sequential batches no larger than the store's limit
pub fn delete_chunked<R: Repository + ?Sized>(repo: &R, ids: &[LogId]) -> Result<usize> {
    let mut batches = 0;
    for chunk in ids.chunks(repo.batch_limit().max(1)) {
        repo.batch_delete(chunk)?;
        batches += 1;
    }
    if batches > 1 {
        tracing::debug!("Deleted {} logs in {} batches", ids.len(), batches);
    }
    Ok(batches)
}

/// Reject batches the store cannot apply in one operation
pub(crate) fn check_batch_size(len: usize, limit: usize) -> Result<()> {
    if len > limit {
        return Err(Error::Batch(format!(
            "{} operations exceed the batch limit of {}",
            len, limit
        )));
    }
    Ok(())
}

/// Apply a write batch to an in-memory collection, or leave it untouched.
///
/// A write may keep a stored log's status or advance it along the adherence
/// table. A terminal log only accepts an identical record. Anything else
/// (a stale snapshot reverting a taken dose, a second take overwriting the
/// first one's taken time) aborts the batch.
pub(crate) fn apply_write(logs: &mut BTreeMap<LogId, MedicationLog>, batch: &[MedicationLog]) -> Result<()> {
    for log in batch {
        if let Some(stored) = logs.get(&log.id) {
            if stored.status.is_terminal() && stored != log {
                return Err(Error::Batch(format!(
                    "log {} is already {} and cannot be rewritten",
                    log.id, stored.status
                )));
            }
            if stored.status != log.status && !can_transition(stored.status, log.status) {
                return Err(Error::Batch(format!(
                    "log {} is {} and cannot be rewritten as {}",
                    log.id, stored.status, log.status
                )));
            }
        }
    }
    for log in batch {
        logs.insert(log.id.clone(), log.clone());
    }
    Ok(())
}

/// Apply a delete batch to an in-memory collection, or leave it untouched
pub(crate) fn apply_delete(logs: &mut BTreeMap<LogId, MedicationLog>, ids: &[LogId]) -> Result<usize> {
    for id in ids {
        if let Some(log) = logs.get(id) {
            if log.status != LogStatus::Upcoming {
                return Err(Error::Batch(format!(
                    "log {} is {} and cannot be deleted",
                    id, log.status
                )));
            }
        }
    }
    Ok(ids.iter().filter(|id| logs.remove(*id).is_some()).count())
}

#[derive(Default)]
struct MemoryInner {
    prescriptions: HashMap<String, Prescription>,
    users: HashMap<String, User>,
    logs: BTreeMap<LogId, MedicationLog>,
}

/// In-process repository
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
    batch_limit: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_batch_limit(DEFAULT_BATCH_LIMIT)
    }

    pub fn with_batch_limit(batch_limit: usize) -> Self {
        Self {
            inner: Mutex::new(MemoryInner::default()),
            batch_limit,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryInner>> {
        self.inner
            .lock()
            .map_err(|_| Error::Batch("memory store lock poisoned".into()))
    }

    pub fn put_prescription(&self, prescription: Prescription) -> Result<()> {
        self.lock()?
            .prescriptions
            .insert(prescription.id.clone(), prescription);
        Ok(())
    }

    pub fn put_user(&self, user: User) -> Result<()> {
        self.lock()?.users.insert(user.id.clone(), user);
        Ok(())
    }
}

impl Repository for MemoryStore {
    fn get_prescription(&self, id: &str) -> Result<Option<Prescription>> {
        Ok(self.lock()?.prescriptions.get(id).cloned())
    }

    fn get_user(&self, id: &str) -> Result<Option<User>> {
        Ok(self.lock()?.users.get(id).cloned())
    }

    fn query_logs(&self, query: &LogQuery) -> Result<Vec<MedicationLog>> {
        Ok(query.select(self.lock()?.logs.values()))
    }

    fn batch_write(&self, logs: &[MedicationLog]) -> Result<()> {
        check_batch_size(logs.len(), self.batch_limit)?;
        apply_write(&mut self.lock()?.logs, logs)
    }

    fn batch_delete(&self, ids: &[LogId]) -> Result<()> {
        check_batch_size(ids.len(), self.batch_limit)?;
        apply_delete(&mut self.lock()?.logs, ids)?;
        Ok(())
    }

    fn batch_limit(&self) -> usize {
        self.batch_limit
    }
}
