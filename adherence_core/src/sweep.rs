//! Periodic overdue detection.
//!
//! A sweep selects every `upcoming` log whose scheduled time is at least the
//! grace period in the past, marks the selection `overdue` in atomic batches,
//! and raises one overdue notification per log once its batch has committed.
//!
//! Two sweeps that read the same pre-commit snapshot will both transition and
//! both notify the same logs. The writes converge on the same state; the
//! duplicate notifications are accepted. Closing that gap needs a conditional
//! write that only moves a log whose stored status is still `upcoming`.
//! A sweep whose snapshot predates a patient action has its batch rejected by
//! the store and fails, to be retried on the next run.

use crate::adherence::{apply, Transition};
use crate::notify::{dispatch, NotificationIntent, Notifier};
use crate::store::{LogQuery, Repository};
use crate::{LogStatus, Result};
use chrono::{DateTime, Duration, FixedOffset, Offset, Utc};

/// Summary of one sweep run
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub transitioned: Vec<String>,
    pub batches: usize,
    pub notified: usize,
}

/// Marks unacknowledged doses overdue once their grace period has passed
#[derive(Clone, Debug)]
pub struct OverdueSweeper {
    grace: Duration,
    offset: FixedOffset,
}

impl Default for OverdueSweeper {
    fn default() -> Self {
        Self::new(Duration::minutes(15))
    }
}

impl OverdueSweeper {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            offset: Utc.fix(),
        }
    }

    /// Wall-clock offset used for patients' quiet hours
    pub fn with_offset(mut self, offset: FixedOffset) -> Self {
        self.offset = offset;
        self
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Run one sweep relative to `now`.
    ///
    /// A failed batch aborts the run with the error; batches committed before
    /// it stay committed and have already been notified, and the remaining
    /// logs are still `upcoming` for the next run.
    pub fn run<R, N>(&self, repo: &R, notifier: &N, now: DateTime<Utc>) -> Result<SweepReport>
    where
        R: Repository + ?Sized,
        N: Notifier + ?Sized,
    {
        let cutoff = now - self.grace;
        let due = repo.query_logs(
            &LogQuery::default()
                .with_status(LogStatus::Upcoming)
                .at_or_before(cutoff),
        )?;

        let local_now = now.with_timezone(&self.offset);
        let mut report = SweepReport::default();
        if due.is_empty() {
            tracing::info!("No overdue medications found");
            return Ok(report);
        }

        for chunk in due.chunks(repo.batch_limit().max(1)) {
            let mut batch = chunk.to_vec();
            for log in &mut batch {
                apply(log, Transition::MarkOverdue, now)?;
            }
            repo.batch_write(&batch)?;
            report.batches += 1;

            for log in &batch {
                tracing::debug!("Log {} is overdue (scheduled {})", log.id, log.scheduled_time);
                if dispatch(repo, notifier, &NotificationIntent::dose_overdue(log), local_now) {
                    report.notified += 1;
                }
                report.transitioned.push(log.id.clone());
            }
        }

        tracing::info!(
            "Processed {} overdue medications in {} batches",
            report.transitioned.len(),
            report.batches
        );
        Ok(report)
    }
}
