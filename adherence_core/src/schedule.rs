//! Schedule expansion: turning a prescription into concrete dose events.
//!
//! Expansion walks every calendar day from `max(start_date, today)` through the
//! effective end date, keeps the days the frequency policy includes, and
//! crosses them with the reminder times. Only instants strictly after `now`
//! are materialized.

use crate::config::ScheduleConfig;
use crate::frequency::includes_day;
use crate::store::{write_chunked, LogQuery, Repository};
use crate::{MedicationLog, Prescription, Result};
use chrono::{DateTime, FixedOffset, Offset, TimeZone, Utc};
use std::collections::{BTreeMap, HashSet};

/// Expands prescriptions into `upcoming` medication logs
#[derive(Clone, Debug)]
pub struct ScheduleExpander {
    offset: FixedOffset,
    default_window_days: u32,
}

impl Default for ScheduleExpander {
    fn default() -> Self {
        Self {
            offset: Utc.fix(),
            default_window_days: 30,
        }
    }
}

impl ScheduleExpander {
    pub fn new(offset: FixedOffset, default_window_days: u32) -> Self {
        Self {
            offset,
            default_window_days,
        }
    }

    pub fn from_config(config: &ScheduleConfig) -> Result<Self> {
        Ok(Self::new(config.offset()?, config.default_window_days))
    }

    /// Compute every future dose event of `prescription` relative to `now`.
    ///
    /// The result is ordered by scheduled time and contains each id once,
    /// even when the prescription repeats a reminder time.
    pub fn expand(&self, prescription: &Prescription, now: DateTime<Utc>) -> Vec<MedicationLog> {
        let today = now.with_timezone(&self.offset).date_naive();
        let first_day = prescription.start_date.max(today);
        let last_day = prescription.effective_end_date(self.default_window_days);

        let mut logs = BTreeMap::new();
        let mut day = first_day;
        while day <= last_day {
            let day_offset = (day - prescription.start_date).num_days();

            if includes_day(&prescription.frequency, day_offset) {
                for reminder in &prescription.reminder_times {
                    let local = day.and_time(reminder.time());
                    let Some(scheduled) = self.offset.from_local_datetime(&local).single() else {
                        continue;
                    };
                    let scheduled = scheduled.with_timezone(&Utc);

                    if scheduled > now {
                        let log = MedicationLog::upcoming(prescription, scheduled, now);
                        logs.entry((scheduled, log.id.clone())).or_insert(log);
                    }
                }
            }

            match day.succ_opt() {
                Some(next) => day = next,
                None => break,
            }
        }

        tracing::debug!(
            "Expanded prescription {} into {} logs ({} to {})",
            prescription.id,
            logs.len(),
            first_day,
            last_day
        );

        logs.into_values().collect()
    }
}

/// Expand `prescription` and persist every log whose id is not already stored.
///
/// Existing logs are never overwritten, so a log that has been advanced
/// (taken, missed, ...) keeps its state when expansion runs again.
/// Returns the logs that were written.
pub fn materialize<R: Repository + ?Sized>(
    repo: &R,
    expander: &ScheduleExpander,
    prescription: &Prescription,
    now: DateTime<Utc>,
) -> Result<Vec<MedicationLog>> {
    let existing: HashSet<String> = repo
        .query_logs(&LogQuery::for_prescription(&prescription.id))?
        .into_iter()
        .map(|log| log.id)
        .collect();

    let fresh: Vec<MedicationLog> = expander
        .expand(prescription, now)
        .into_iter()
        .filter(|log| !existing.contains(&log.id))
        .collect();

    write_chunked(repo, &fresh)?;

    tracing::info!(
        "Generated {} medication logs for prescription {}",
        fresh.len(),
        prescription.id
    );
    Ok(fresh)
}
