//! CSV export of raw medication log state.

use crate::store::{LogQuery, Repository};
use crate::{MedicationLog, Result};
use std::path::Path;

/// A row in the CSV output
#[derive(Debug, serde::Serialize)]
struct CsvRow {
    id: String,
    prescription_id: String,
    patient_id: String,
    scheduled_time: String,
    taken_time: Option<String>,
    status: &'static str,
    updated_at: String,
}

impl From<&MedicationLog> for CsvRow {
    fn from(log: &MedicationLog) -> Self {
        CsvRow {
            id: log.id.clone(),
            prescription_id: log.prescription_id.clone(),
            patient_id: log.patient_id.clone(),
            scheduled_time: log.scheduled_time.to_rfc3339(),
            taken_time: log.taken_time.map(|t| t.to_rfc3339()),
            status: log.status.as_str(),
            updated_at: log.updated_at.to_rfc3339(),
        }
    }
}

/// Write every log matching `query` to `csv_path`, replacing the file.
///
/// Returns the number of rows written.
pub fn export_logs<R: Repository + ?Sized>(
    repo: &R,
    query: &LogQuery,
    csv_path: &Path,
) -> Result<usize> {
    let logs = repo.query_logs(query)?;

    if let Some(parent) = csv_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut writer = csv::Writer::from_path(csv_path)?;
    for log in &logs {
        writer.serialize(CsvRow::from(log))?;
    }
    writer.flush()?;

    tracing::info!("Exported {} logs to {:?}", logs.len(), csv_path);
    Ok(logs.len())
}
