#![forbid(unsafe_code)]

//! Core domain model and business logic for medication adherence tracking.
//!
//! This crate provides:
//! - Domain types (prescriptions, medication logs, users)
//! - Frequency policy and schedule expansion
//! - Schedule regeneration on prescription edits
//! - Adherence state machine and the overdue sweep
//! - Persistence (repository trait, file and memory stores)
//! - Best-effort notification dispatch

pub mod types;
pub mod error;
pub mod frequency;
pub mod config;
pub mod logging;
pub mod store;
pub mod file_store;
pub mod schedule;
pub mod adherence;
pub mod regeneration;
pub mod notify;
pub mod sweep;
pub mod service;
pub mod export;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use frequency::{includes_day, Frequency};
pub use config::Config;
pub use store::{LogQuery, MemoryStore, Repository};
pub use file_store::FileStore;
pub use schedule::ScheduleExpander;
pub use adherence::{PatientAction, Transition};
pub use regeneration::{RegenerationOutcome, ScheduleChange};
pub use notify::{NotificationIntent, NotificationKind, Notifier, NullNotifier, OutboxNotifier};
pub use sweep::{OverdueSweeper, SweepReport};
pub use service::AdherenceService;
pub use export::export_logs;
