//! Error types for the adherence_core library.

use crate::LogStatus;
use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for adherence_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Status change not present in the adherence transition table.
    /// The log is left unchanged.
    #[error("Invalid transition for log {log_id}: {from} -> {to}")]
    InvalidTransition {
        log_id: String,
        from: LogStatus,
        to: LogStatus,
    },

    /// Reminder time that is not a valid "HH:MM" value
    #[error("Invalid reminder time: {0:?}")]
    InvalidReminderTime(String),

    /// Prescription whose end date precedes its start date
    #[error("Invalid date range: end date {end} is before start date {start}")]
    InvalidDateRange {
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    },

    /// Referenced record is absent from the store
    #[error("{collection} record not found: {id}")]
    NotFound {
        collection: &'static str,
        id: String,
    },

    /// An atomic multi-write failed; nothing from the batch was committed
    #[error("Batch aborted: {0}")]
    Batch(String),

    /// Notification delivery failed (never propagated past the dispatcher)
    #[error("Notification error: {0}")]
    Notification(String),
}
