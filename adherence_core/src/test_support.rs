//! Shared fixtures for unit tests.

use crate::{
    Frequency, LogStatus, MedicationLog, NotificationPreferences, Prescription, ReminderTime, User,
};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
}

/// Once-daily prescription for `patient1` running 2025-03-01..=2025-03-03
pub fn prescription(id: &str, times: &[&str]) -> Prescription {
    Prescription {
        id: id.into(),
        patient_id: "patient1".into(),
        doctor_id: Some("doctor1".into()),
        medication_name: "Metformin".into(),
        dosage: "500mg".into(),
        medication_type: None,
        frequency: Frequency::OnceDaily,
        reminder_times: times
            .iter()
            .map(|t| t.parse::<ReminderTime>().unwrap())
            .collect(),
        start_date: date(2025, 3, 1),
        end_date: Some(date(2025, 3, 3)),
        instructions: None,
        notes: None,
        is_active: true,
        created_at: at(2025, 2, 28, 12, 0),
        updated_at: at(2025, 2, 28, 12, 0),
    }
}

pub fn log_with_status(
    rx: &Prescription,
    scheduled: DateTime<Utc>,
    status: LogStatus,
) -> MedicationLog {
    let mut log = MedicationLog::upcoming(rx, scheduled, scheduled);
    log.status = status;
    if status == LogStatus::Taken {
        log.taken_time = Some(scheduled);
    }
    log
}

pub fn patient(id: &str, token: Option<&str>) -> User {
    User {
        id: id.into(),
        display_name: "Pat Example".into(),
        role: Default::default(),
        fcm_token: token.map(str::to_string),
        notification_preferences: Default::default(),
    }
}

/// `patient1` with a push address and the given preferences
pub fn patient_with(preferences: NotificationPreferences) -> User {
    User {
        notification_preferences: preferences,
        ..patient("patient1", Some("token-1"))
    }
}
