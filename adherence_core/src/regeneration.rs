//! Keeping expanded logs consistent with prescription edits.
//!
//! When an edit changes the schedule of an active prescription, every log
//! that is still `upcoming` and strictly in the future is deleted and the
//! schedule is expanded again from the edited definition. Logs that are
//! overdue or terminal are adherence history and are never touched.

use crate::schedule::{materialize, ScheduleExpander};
use crate::store::{delete_chunked, LogQuery, Repository};
use crate::{LogStatus, MedicationLog, Prescription, Result};
use chrono::{DateTime, Utc};

/// What an edit changed, as far as scheduling and notification care
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScheduleChange {
    pub schedule_changed: bool,
    pub dosage_changed: bool,
}

impl ScheduleChange {
    /// Compare two snapshots of the same prescription.
    ///
    /// Reminder times are compared as an ordered sequence: the same times in a
    /// different order count as a change.
    pub fn between(before: &Prescription, after: &Prescription) -> Self {
        let schedule_changed = before.reminder_times != after.reminder_times
            || before.frequency != after.frequency
            || before.start_date != after.start_date
            || before.end_date != after.end_date;

        Self {
            schedule_changed,
            dosage_changed: before.dosage != after.dosage,
        }
    }

    /// Whether the patient should hear about the edit
    pub fn should_notify(&self) -> bool {
        self.schedule_changed || self.dosage_changed
    }
}

/// Result of handling one prescription edit
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RegenerationOutcome {
    pub change: ScheduleChange,
    pub regenerated: bool,
    pub deleted: usize,
    pub created: Vec<MedicationLog>,
}

/// Handle an edit from `before` to `after`
pub fn regenerate<R: Repository + ?Sized>(
    repo: &R,
    expander: &ScheduleExpander,
    before: &Prescription,
    after: &Prescription,
    now: DateTime<Utc>,
) -> Result<RegenerationOutcome> {
    let change = ScheduleChange::between(before, after);
    let mut outcome = RegenerationOutcome {
        change,
        ..Default::default()
    };

    if !(change.schedule_changed && after.is_active) {
        tracing::debug!(
            "Prescription {} edit needs no regeneration ({:?}, active: {})",
            after.id,
            change,
            after.is_active
        );
        return Ok(outcome);
    }

    let stale: Vec<String> = repo
        .query_logs(
            &LogQuery::for_prescription(&after.id)
                .with_status(LogStatus::Upcoming)
                .after(now),
        )?
        .into_iter()
        .map(|log| log.id)
        .collect();

    delete_chunked(repo, &stale)?;
    if !stale.is_empty() {
        tracing::info!(
            "Deleted {} future logs for prescription {}",
            stale.len(),
            after.id
        );
    }

    outcome.deleted = stale.len();
    outcome.created = materialize(repo, expander, after, now)?;
    outcome.regenerated = true;
    Ok(outcome)
}
