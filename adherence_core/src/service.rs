//! Trigger handlers tying the components together.
//!
//! Each handler is one unit of work: it commits its state change first and
//! only then dispatches notifications. Errors from the state change propagate
//! so the caller can retry; notification problems never do.

use crate::adherence::{is_taken_transition, record_action, PatientAction};
use crate::notify::{dispatch, NotificationIntent, NotificationKind, Notifier};
use crate::regeneration::{regenerate, RegenerationOutcome};
use crate::schedule::{materialize, ScheduleExpander};
use crate::store::Repository;
use crate::sweep::{OverdueSweeper, SweepReport};
use crate::{Config, MedicationLog, Prescription, Result};
use chrono::{DateTime, FixedOffset, Utc};

/// Repository, notifier and policies for one deployment
pub struct AdherenceService<R, N> {
    repo: R,
    notifier: N,
    expander: ScheduleExpander,
    sweeper: OverdueSweeper,
    offset: FixedOffset,
}

impl<R: Repository, N: Notifier> AdherenceService<R, N> {
    pub fn new(repo: R, notifier: N, config: &Config) -> Result<Self> {
        config.validate()?;
        let offset = config.schedule.offset()?;
        Ok(Self {
            repo,
            notifier,
            expander: ScheduleExpander::from_config(&config.schedule)?,
            sweeper: OverdueSweeper::new(config.sweep.grace()?).with_offset(offset),
            offset,
        })
    }

    pub fn repo(&self) -> &R {
        &self.repo
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    /// prescription-created: expand the schedule, then notify the patient
    pub fn prescription_created(
        &self,
        prescription: &Prescription,
        now: DateTime<Utc>,
    ) -> Result<Vec<MedicationLog>> {
        prescription.validate()?;
        tracing::info!("Creating prescription: {}", prescription.id);

        let logs = materialize(&self.repo, &self.expander, prescription, now)?;

        dispatch(
            &self.repo,
            &self.notifier,
            &NotificationIntent::for_prescription(prescription, NotificationKind::PrescriptionCreated),
            now.with_timezone(&self.offset),
        );
        Ok(logs)
    }

    /// prescription-updated: regenerate when the schedule changed, then
    /// notify when the schedule or dosage changed
    pub fn prescription_updated(
        &self,
        before: &Prescription,
        after: &Prescription,
        now: DateTime<Utc>,
    ) -> Result<RegenerationOutcome> {
        self.edit_prescription(before, after, now, |_| Ok(()))
    }

    /// Apply an edit whose new record is not yet stored.
    ///
    /// `save` persists `after` only once regeneration has committed. If
    /// regeneration fails the stored record still holds `before`, so running
    /// the same edit again detects the schedule change and finishes the work.
    pub fn edit_prescription<F>(
        &self,
        before: &Prescription,
        after: &Prescription,
        now: DateTime<Utc>,
        save: F,
    ) -> Result<RegenerationOutcome>
    where
        F: FnOnce(&Prescription) -> Result<()>,
    {
        after.validate()?;
        tracing::info!("Updating prescription: {}", after.id);

        let outcome = regenerate(&self.repo, &self.expander, before, after, now)?;
        save(after)?;

        if outcome.change.should_notify() {
            dispatch(
                &self.repo,
                &self.notifier,
                &NotificationIntent::for_prescription(after, NotificationKind::PrescriptionUpdated),
                now.with_timezone(&self.offset),
            );
        }
        Ok(outcome)
    }

    /// External patient/caretaker action on a log
    pub fn record_action(
        &self,
        log_id: &str,
        action: PatientAction,
        at: DateTime<Utc>,
    ) -> Result<MedicationLog> {
        let (before, after) = record_action(&self.repo, log_id, action, at)?;
        self.log_updated(&before, &after);
        Ok(after)
    }

    /// log-updated: reports whether the update was the `-> taken` edge
    pub fn log_updated(&self, before: &MedicationLog, after: &MedicationLog) -> bool {
        let taken = is_taken_transition(before, after);
        if taken {
            tracing::info!("Medication taken: {}", after.id);
        }
        taken
    }

    /// Timer: run one overdue sweep
    pub fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        self.sweeper.run(&self.repo, &self.notifier, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::tests::RecordingNotifier;
    use crate::store::{LogQuery, MemoryStore};
    use crate::test_support::{at, date, patient, prescription};
    use crate::{Error, LogId, LogStatus, ReminderTime};
    use std::cell::RefCell;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Memory store whose log writes fail while `fail_writes` is set
    struct FlakyStore {
        inner: MemoryStore,
        fail_writes: AtomicBool,
    }

    impl Repository for FlakyStore {
        fn get_prescription(&self, id: &str) -> Result<Option<Prescription>> {
            self.inner.get_prescription(id)
        }
        fn get_user(&self, id: &str) -> Result<Option<crate::User>> {
            self.inner.get_user(id)
        }
        fn query_logs(&self, query: &LogQuery) -> Result<Vec<MedicationLog>> {
            self.inner.query_logs(query)
        }
        fn batch_write(&self, logs: &[MedicationLog]) -> Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(Error::Batch("disk full".into()));
            }
            self.inner.batch_write(logs)
        }
        fn batch_delete(&self, ids: &[LogId]) -> Result<()> {
            self.inner.batch_delete(ids)
        }
    }

    fn service() -> AdherenceService<MemoryStore, RecordingNotifier> {
        let store = MemoryStore::new();
        store.put_user(patient("patient1", Some("token-1"))).unwrap();
        AdherenceService::new(store, RecordingNotifier::default(), &Config::default()).unwrap()
    }

    #[test]
    fn test_full_lifecycle() {
        let svc = service();
        let rx = prescription("rx1", &["08:00", "20:00"]);
        svc.repo().put_prescription(rx.clone()).unwrap();

        let logs = svc.prescription_created(&rx, at(2025, 3, 1, 0, 0)).unwrap();
        assert_eq!(logs.len(), 6);

        // Morning dose taken on time, evening dose forgotten
        svc.record_action(&logs[0].id, PatientAction::Take, at(2025, 3, 1, 8, 3)).unwrap();
        let report = svc.sweep(at(2025, 3, 1, 20, 30)).unwrap();
        assert_eq!(report.transitioned, vec![logs[1].id.clone()]);

        // Late acknowledgement of the overdue dose
        let late = svc.record_action(&logs[1].id, PatientAction::Take, at(2025, 3, 1, 22, 0)).unwrap();
        assert_eq!(late.status, LogStatus::Taken);
        assert_eq!(late.taken_time, Some(at(2025, 3, 1, 22, 0)));

        let kinds: Vec<_> = svc.notifier().sent().into_iter().map(|(_, i)| i.kind).collect();
        assert_eq!(kinds, vec![NotificationKind::PrescriptionCreated, NotificationKind::DoseOverdue]);
    }

    #[test]
    fn test_update_notifies_on_dosage_change() {
        let svc = service();
        let before = prescription("rx1", &["08:00"]);
        svc.prescription_created(&before, at(2025, 3, 1, 0, 0)).unwrap();

        let mut after = before.clone();
        after.dosage = "250mg".into();
        let outcome = svc.prescription_updated(&before, &after, at(2025, 3, 1, 1, 0)).unwrap();
        assert!(!outcome.regenerated);
        assert_eq!(svc.notifier().sent().len(), 2);

        // Cosmetic edit: no notification
        let mut cosmetic = after.clone();
        cosmetic.notes = Some("with food".into());
        svc.prescription_updated(&after, &cosmetic, at(2025, 3, 1, 2, 0)).unwrap();
        assert_eq!(svc.notifier().sent().len(), 2);
    }

    #[test]
    fn test_create_rejects_inverted_dates() {
        let svc = service();
        let mut rx = prescription("rx1", &["08:00"]);
        rx.end_date = Some(date(2025, 2, 1));

        let result = svc.prescription_created(&rx, at(2025, 1, 1, 0, 0));
        assert!(matches!(result, Err(Error::InvalidDateRange { .. })));
        assert!(svc.repo().query_logs(&LogQuery::default()).unwrap().is_empty());
        assert!(svc.notifier().sent().is_empty());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = Config::default();
        config.sweep.grace_minutes = -1;
        let result = AdherenceService::new(MemoryStore::new(), RecordingNotifier::default(), &config);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_failed_edit_is_retried_from_stored_record() {
        let inner = MemoryStore::new();
        inner.put_user(patient("patient1", Some("token-1"))).unwrap();
        let store = FlakyStore {
            inner,
            fail_writes: AtomicBool::new(false),
        };
        let svc = AdherenceService::new(store, RecordingNotifier::default(), &Config::default()).unwrap();

        let before = prescription("rx1", &["08:00"]);
        svc.repo().inner.put_prescription(before.clone()).unwrap();
        svc.prescription_created(&before, at(2025, 3, 1, 0, 0)).unwrap();

        let mut after = before.clone();
        after.reminder_times = vec!["09:00".parse::<ReminderTime>().unwrap()];
        let saved = RefCell::new(None);
        let save = |p: &Prescription| {
            saved.replace(Some(p.clone()));
            svc.repo().inner.put_prescription(p.clone())
        };

        // Old logs are deleted, then writing the new ones fails
        svc.repo().fail_writes.store(true, Ordering::SeqCst);
        let result = svc.edit_prescription(&before, &after, at(2025, 3, 1, 1, 0), save);
        assert!(matches!(result, Err(Error::Batch(_))));
        assert!(saved.borrow().is_none());
        assert!(svc.repo().query_logs(&LogQuery::for_prescription("rx1")).unwrap().is_empty());

        // The stored record is unchanged, so the retry still sees the change
        let stored = svc.repo().get_prescription("rx1").unwrap().unwrap();
        assert_eq!(stored, before);

        svc.repo().fail_writes.store(false, Ordering::SeqCst);
        let outcome = svc
            .edit_prescription(&stored, &after, at(2025, 3, 1, 1, 0), |p| {
                svc.repo().inner.put_prescription(p.clone())
            })
            .unwrap();
        assert!(outcome.regenerated);
        assert_eq!(outcome.created.len(), 3);
        assert_eq!(svc.repo().get_prescription("rx1").unwrap().unwrap(), after);
    }
}
