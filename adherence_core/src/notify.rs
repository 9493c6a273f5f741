//! Best-effort notification dispatch.
//!
//! Intents are raised only after the state change that caused them has been
//! committed. Delivery failures and missing collaborators (unknown patient,
//! no push address, deleted prescription) are logged and dropped; they never
//! reach the caller. A patient's notification preferences are applied the
//! same way: an overdue reminder that is disabled or falls in quiet hours is
//! dropped, not deferred.

use crate::store::Repository;
use crate::{Error, MedicationLog, Prescription, Result};
use chrono::{DateTime, FixedOffset};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

/// What a notification is about
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationKind {
    PrescriptionCreated,
    PrescriptionUpdated,
    DoseOverdue,
}

/// A notification to be delivered to a patient
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationIntent {
    pub patient_id: String,
    pub kind: NotificationKind,
    pub prescription_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medication_name: Option<String>,
}

impl NotificationIntent {
    pub fn for_prescription(prescription: &Prescription, kind: NotificationKind) -> Self {
        Self {
            patient_id: prescription.patient_id.clone(),
            kind,
            prescription_id: prescription.id.clone(),
            log_id: None,
            medication_name: Some(prescription.medication_name.clone()),
        }
    }

    pub fn dose_overdue(log: &MedicationLog) -> Self {
        Self {
            patient_id: log.patient_id.clone(),
            kind: NotificationKind::DoseOverdue,
            prescription_id: log.prescription_id.clone(),
            log_id: Some(log.id.clone()),
            medication_name: None,
        }
    }
}

/// Channel name the push transport is listed under in user preferences
pub const PUSH_CHANNEL: &str = "push";

/// Outbound delivery transport
pub trait Notifier {
    fn send(&self, push_address: &str, intent: &NotificationIntent) -> Result<()>;
}

/// Discards every notification
#[derive(Clone, Copy, Debug, Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn send(&self, _push_address: &str, _intent: &NotificationIntent) -> Result<()> {
        Ok(())
    }
}

/// A delivered notification as recorded in the outbox
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEntry {
    pub push_address: String,
    #[serde(flatten)]
    pub intent: NotificationIntent,
}

/// Appends notifications to a JSONL outbox with file locking
pub struct OutboxNotifier {
    path: PathBuf,
}

impl OutboxNotifier {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read every entry written so far
    pub fn read_entries(&self) -> Result<Vec<OutboxEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = std::fs::read_to_string(&self.path)?;
        let mut entries = Vec::new();
        for (line_num, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!("Failed to parse outbox line {}: {}", line_num + 1, e),
            }
        }
        Ok(entries)
    }
}

impl Notifier for OutboxNotifier {
    fn send(&self, push_address: &str, intent: &NotificationIntent) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.lock_exclusive()?;

        let entry = OutboxEntry {
            push_address: push_address.to_string(),
            intent: intent.clone(),
        };
        let mut writer = std::io::BufWriter::new(&file);
        let line = serde_json::to_string(&entry)?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        drop(writer);

        file.unlock()?;
        Ok(())
    }
}

/// Resolve collaborators and deliver `intent`.
///
/// `now` is the patient's wall-clock time, used for quiet hours.
/// Returns whether the notifier accepted it. Never fails.
pub fn dispatch<R, N>(
    repo: &R,
    notifier: &N,
    intent: &NotificationIntent,
    now: DateTime<FixedOffset>,
) -> bool
where
    R: Repository + ?Sized,
    N: Notifier + ?Sized,
{
    match try_dispatch(repo, notifier, intent, now) {
        Ok(true) => {
            tracing::info!(
                "Sent {:?} notification to patient {}",
                intent.kind,
                intent.patient_id
            );
            true
        }
        Ok(false) => false,
        Err(e) => {
            tracing::warn!(
                "Failed to send {:?} notification to patient {}: {}",
                intent.kind,
                intent.patient_id,
                e
            );
            false
        }
    }
}

fn try_dispatch<R, N>(
    repo: &R,
    notifier: &N,
    intent: &NotificationIntent,
    now: DateTime<FixedOffset>,
) -> Result<bool>
where
    R: Repository + ?Sized,
    N: Notifier + ?Sized,
{
    let Some(patient) = repo.get_user(&intent.patient_id)? else {
        tracing::debug!("Patient {} not found, skipping notification", intent.patient_id);
        return Ok(false);
    };
    let Some(push_address) = patient.fcm_token.as_deref().filter(|t| !t.is_empty()) else {
        tracing::debug!("Patient {} has no push address, skipping notification", patient.id);
        return Ok(false);
    };

    let prefs = &patient.notification_preferences;
    if !prefs.allows_channel(PUSH_CHANNEL) {
        tracing::debug!("Patient {} has opted out of push, skipping notification", patient.id);
        return Ok(false);
    }

    let mut intent = intent.clone();
    if intent.kind == NotificationKind::DoseOverdue {
        if !prefs.enable_medication_reminders {
            tracing::debug!("Patient {} has reminders disabled, skipping notification", patient.id);
            return Ok(false);
        }
        if prefs.is_quiet_at(now.time()) {
            tracing::debug!(
                "Patient {} is in quiet hours at {}, skipping notification",
                patient.id,
                now.time()
            );
            return Ok(false);
        }
        let Some(prescription) = repo.get_prescription(&intent.prescription_id)? else {
            tracing::debug!(
                "Prescription {} not found, skipping overdue notification",
                intent.prescription_id
            );
            return Ok(false);
        };
        intent.medication_name = Some(prescription.medication_name);
    }

    notifier
        .send(push_address, &intent)
        .map_err(|e| match e {
            Error::Notification(_) => e,
            other => Error::Notification(other.to_string()),
        })?;
    Ok(true)
}
