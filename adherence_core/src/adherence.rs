//! Adherence state machine for medication logs.
//!
//! ```text
//! upcoming ──(sweep)──▶ overdue
//!    │                     │
//!    └──────┬──────────────┘
//!           ▼
//!   taken | missed | skipped   (terminal)
//! ```
//!
//! Nothing returns a log to `upcoming`, and nothing leaves a terminal state.

use crate::store::{LogQuery, Repository};
use crate::{Error, LogStatus, MedicationLog, Result};
use chrono::{DateTime, Utc};
use std::str::FromStr;

/// A requested status change
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    /// Time-triggered, applied only by the overdue sweep
    MarkOverdue,
    Take { at: DateTime<Utc> },
    Miss,
    Skip,
}

impl Transition {
    pub fn target(&self) -> LogStatus {
        match self {
            Transition::MarkOverdue => LogStatus::Overdue,
            Transition::Take { .. } => LogStatus::Taken,
            Transition::Miss => LogStatus::Missed,
            Transition::Skip => LogStatus::Skipped,
        }
    }
}

/// Action a patient or caretaker takes on a dose
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatientAction {
    Take,
    Miss,
    Skip,
}

impl PatientAction {
    pub fn transition(self, at: DateTime<Utc>) -> Transition {
        match self {
            PatientAction::Take => Transition::Take { at },
            PatientAction::Miss => Transition::Miss,
            PatientAction::Skip => Transition::Skip,
        }
    }
}

impl FromStr for PatientAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "take" | "taken" => Ok(PatientAction::Take),
            "miss" | "missed" => Ok(PatientAction::Miss),
            "skip" | "skipped" => Ok(PatientAction::Skip),
            other => Err(Error::Config(format!("Unknown action: {}", other))),
        }
    }
}

/// Whether the transition table allows `from -> to`
pub fn can_transition(from: LogStatus, to: LogStatus) -> bool {
    use crate::LogStatus::*;
    matches!(
        (from, to),
        (Upcoming, Overdue) | (Upcoming | Overdue, Taken | Missed | Skipped)
    )
}

/// Apply `transition` to `log`, stamping `updated_at` with `now`.
///
/// On rejection the log is left unchanged.
pub fn apply(log: &mut MedicationLog, transition: Transition, now: DateTime<Utc>) -> Result<()> {
    let to = transition.target();
    if !can_transition(log.status, to) {
        return Err(Error::InvalidTransition {
            log_id: log.id.clone(),
            from: log.status,
            to,
        });
    }

    log.status = to;
    log.taken_time = match transition {
        Transition::Take { at } => Some(at),
        _ => None,
    };
    log.updated_at = now;
    Ok(())
}

/// Record a patient action against a stored log.
///
/// Returns the log before and after the change.
pub fn record_action<R: Repository + ?Sized>(
    repo: &R,
    log_id: &str,
    action: PatientAction,
    at: DateTime<Utc>,
) -> Result<(MedicationLog, MedicationLog)> {
    let before = repo
        .query_logs(&LogQuery::by_id(log_id))?
        .into_iter()
        .next()
        .ok_or_else(|| Error::NotFound {
            collection: "medication_logs",
            id: log_id.to_string(),
        })?;

    let mut after = before.clone();
    apply(&mut after, action.transition(at), at)?;
    repo.batch_write(std::slice::from_ref(&after))?;

    tracing::info!("Log {} moved {} -> {}", log_id, before.status, after.status);
    Ok((before, after))
}

/// Detects the `-> taken` edge of a log update
pub fn is_taken_transition(before: &MedicationLog, after: &MedicationLog) -> bool {
    before.status != LogStatus::Taken && after.status == LogStatus::Taken
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::test_support::{at, log_with_status, prescription};
    use crate::LogStatus::*;

    const ALL: [LogStatus; 5] = [Upcoming, Overdue, Taken, Missed, Skipped];

    #[test]
    fn test_transition_table() {
        let allowed: Vec<(LogStatus, LogStatus)> = ALL
            .iter()
            .flat_map(|from| ALL.iter().map(move |to| (*from, *to)))
            .filter(|(from, to)| can_transition(*from, *to))
            .collect();

        assert_eq!(
            allowed,
            vec![
                (Upcoming, Overdue),
                (Upcoming, Taken),
                (Upcoming, Missed),
                (Upcoming, Skipped),
                (Overdue, Taken),
                (Overdue, Missed),
                (Overdue, Skipped),
            ]
        );
    }

    #[test]
    fn test_overdue_never_returns_to_upcoming() {
        assert!(!can_transition(Overdue, Upcoming));
        assert!(!can_transition(Overdue, Overdue));
    }

    #[test]
    fn test_terminal_states_reject_everything() {
        let rx = prescription("rx1", &["08:00"]);
        let now = at(2025, 3, 1, 9, 0);
        for status in [Taken, Missed, Skipped] {
            let mut log = log_with_status(&rx, at(2025, 3, 1, 8, 0), status);
            let original = log.clone();
            for t in [Transition::MarkOverdue, Transition::Take { at: now }, Transition::Miss, Transition::Skip] {
                assert!(matches!(
                    apply(&mut log, t, now),
                    Err(Error::InvalidTransition { .. })
                ));
                assert_eq!(log, original);
            }
        }
    }

    #[test]
    fn test_take_sets_taken_time() {
        let rx = prescription("rx1", &["08:00"]);
        let mut log = log_with_status(&rx, at(2025, 3, 1, 8, 0), Overdue);
        let when = at(2025, 3, 1, 8, 40);

        apply(&mut log, Transition::Take { at: when }, when).unwrap();
        assert_eq!(log.status, Taken);
        assert_eq!(log.taken_time, Some(when));
        assert_eq!(log.updated_at, when);
    }

    #[test]
    fn test_miss_and_skip_leave_taken_time_unset() {
        let rx = prescription("rx1", &["08:00"]);
        let now = at(2025, 3, 1, 9, 0);
        for t in [Transition::Miss, Transition::Skip] {
            let mut log = log_with_status(&rx, at(2025, 3, 1, 8, 0), Upcoming);
            apply(&mut log, t, now).unwrap();
            assert!(log.taken_time.is_none());
        }
    }

    #[test]
    fn test_record_action_persists() {
        let rx = prescription("rx1", &["08:00"]);
        let store = MemoryStore::new();
        let log = log_with_status(&rx, at(2025, 3, 1, 8, 0), Upcoming);
        store.batch_write(&[log.clone()]).unwrap();

        let (before, after) =
            record_action(&store, &log.id, PatientAction::Take, at(2025, 3, 1, 8, 5)).unwrap();
        assert!(is_taken_transition(&before, &after));

        let stored = store.query_logs(&LogQuery::by_id(&log.id)).unwrap();
        assert_eq!(stored[0].status, Taken);

        // A second action on a terminal log is rejected and changes nothing
        let err = record_action(&store, &log.id, PatientAction::Skip, at(2025, 3, 1, 9, 0));
        assert!(matches!(err, Err(Error::InvalidTransition { from: Taken, to: Skipped, .. })));
        assert_eq!(store.query_logs(&LogQuery::by_id(&log.id)).unwrap()[0], stored[0]);
    }

    #[test]
    fn test_record_action_unknown_log() {
        let store = MemoryStore::new();
        let result = record_action(&store, "nope", PatientAction::Miss, at(2025, 3, 1, 8, 0));
        assert!(matches!(result, Err(Error::NotFound { .. })));
    }
}
