//! Core domain types for the medication adherence system.
//!
//! This module defines the records shared by every component:
//! - Prescriptions and their reminder times
//! - Medication logs (dose events) and their adherence status
//! - User records read by the notification collaborators

use crate::frequency::Frequency;
use crate::{Error, Result};
use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of a medication log, derived from `(prescription_id, scheduled_time)`
pub type LogId = String;

// ============================================================================
// Reminder Times
// ============================================================================

/// A time-of-day at which a dose is due, written as "HH:MM"
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReminderTime(NaiveTime);

impl ReminderTime {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(Self)
    }

    pub fn time(&self) -> NaiveTime {
        self.0
    }
}

impl FromStr for ReminderTime {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        NaiveTime::parse_from_str(s.trim(), "%H:%M")
            .map(Self)
            .map_err(|_| Error::InvalidReminderTime(s.to_string()))
    }
}

impl TryFrom<String> for ReminderTime {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<ReminderTime> for String {
    fn from(t: ReminderTime) -> Self {
        t.to_string()
    }
}

impl fmt::Display for ReminderTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%H:%M"))
    }
}

// ============================================================================
// Prescription
// ============================================================================

/// Physical form of the medication
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MedicationType {
    Tablet,
    Capsule,
    Liquid,
    Injection,
    Cream,
    Drops,
    Patch,
    Inhaler,
}

/// A medication order for one patient
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Prescription {
    pub id: String,
    pub patient_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doctor_id: Option<String>,
    pub medication_name: String,
    pub dosage: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medication_type: Option<MedicationType>,
    pub frequency: Frequency,
    /// Order is significant for schedule-change detection
    pub reminder_times: Vec<ReminderTime>,
    pub start_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Prescription {
    /// Last calendar day of the schedule (inclusive).
    ///
    /// Falls back to `start_date + default_window_days` when no end date is set,
    /// clamped to the last representable day.
    pub fn effective_end_date(&self, default_window_days: u32) -> NaiveDate {
        self.end_date.unwrap_or_else(|| {
            self.start_date
                .checked_add_days(Days::new(u64::from(default_window_days)))
                .unwrap_or(NaiveDate::MAX)
        })
    }

    /// Check the record for values the schedule cannot be built from
    pub fn validate(&self) -> Result<()> {
        if let Some(end) = self.end_date {
            if end < self.start_date {
                return Err(Error::InvalidDateRange {
                    start: self.start_date,
                    end,
                });
            }
        }
        Ok(())
    }
}

// ============================================================================
// Medication Log
// ============================================================================

/// Adherence status of a dose event
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Upcoming,
    Overdue,
    Taken,
    Missed,
    Skipped,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Upcoming => "upcoming",
            LogStatus::Overdue => "overdue",
            LogStatus::Taken => "taken",
            LogStatus::Missed => "missed",
            LogStatus::Skipped => "skipped",
        }
    }

    /// Taken, missed and skipped admit no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LogStatus::Taken | LogStatus::Missed | LogStatus::Skipped
        )
    }
}

impl fmt::Display for LogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for LogStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "upcoming" => Ok(LogStatus::Upcoming),
            "overdue" => Ok(LogStatus::Overdue),
            "taken" => Ok(LogStatus::Taken),
            "missed" => Ok(LogStatus::Missed),
            "skipped" => Ok(LogStatus::Skipped),
            other => Err(Error::Config(format!("Unknown log status: {}", other))),
        }
    }
}

/// One scheduled dose of a prescription
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MedicationLog {
    pub id: LogId,
    pub prescription_id: String,
    pub patient_id: String,
    pub scheduled_time: DateTime<Utc>,
    /// Set if and only if `status` is `Taken`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taken_time: Option<DateTime<Utc>>,
    pub status: LogStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MedicationLog {
    /// A fresh `upcoming` log for the given dose instant
    pub fn upcoming(prescription: &Prescription, scheduled_time: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        MedicationLog {
            id: log_id(&prescription.id, scheduled_time),
            prescription_id: prescription.id.clone(),
            patient_id: prescription.patient_id.clone(),
            scheduled_time,
            taken_time: None,
            status: LogStatus::Upcoming,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Deterministic log id: `<prescription id>_<scheduled epoch millis>`
pub fn log_id(prescription_id: &str, scheduled_time: DateTime<Utc>) -> LogId {
    format!("{}_{}", prescription_id, scheduled_time.timestamp_millis())
}

// ============================================================================
// Users
// ============================================================================

/// Role of an account holder
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    #[default]
    Patient,
    Doctor,
    Caretaker,
}

impl FromStr for UserRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "patient" => Ok(UserRole::Patient),
            "doctor" => Ok(UserRole::Doctor),
            "caretaker" => Ok(UserRole::Caretaker),
            other => Err(Error::Config(format!("Unknown user role: {}", other))),
        }
    }
}

/// A user record. Only the push address is read by the core's collaborators.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub role: UserRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fcm_token: Option<String>,
    #[serde(default)]
    pub notification_preferences: NotificationPreferences,
}

/// Delivery preferences a user sets for their own notifications
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPreferences {
    /// Gates dose reminders (overdue notifications); prescription notices are unaffected
    #[serde(default = "default_true")]
    pub enable_medication_reminders: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quiet_hours_start: Option<ReminderTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quiet_hours_end: Option<ReminderTime>,
    /// Channels the user accepts; empty accepts every channel
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            enable_medication_reminders: true,
            quiet_hours_start: None,
            quiet_hours_end: None,
            channels: Vec::new(),
        }
    }
}

impl NotificationPreferences {
    /// Whether wall-clock time `local` falls in the quiet window.
    ///
    /// The window is `[start, end)` and wraps midnight when `start > end`.
    /// A missing bound or `start == end` means no quiet hours.
    pub fn is_quiet_at(&self, local: NaiveTime) -> bool {
        let (Some(start), Some(end)) = (self.quiet_hours_start, self.quiet_hours_end) else {
            return false;
        };
        let (start, end) = (start.time(), end.time());
        if start <= end {
            start <= local && local < end
        } else {
            local >= start || local < end
        }
    }

    pub fn allows_channel(&self, channel: &str) -> bool {
        self.channels.is_empty() || self.channels.iter().any(|c| c.eq_ignore_ascii_case(channel))
    }
}
