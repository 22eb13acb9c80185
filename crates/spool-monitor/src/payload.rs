//! Decoded status-payload fragments consumed at lifecycle
//! transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use spool_tray::LoadedTray;

/// Everything the engine needs from the status payload at the moment
/// a job start is detected.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobStartPayload {
    /// Printer-assigned job identifier (`job_id` / task id field of
    /// the status payload). Stable across pause/resume.
    pub printer_job_id: Option<String>,
    pub printer_id: String,
    /// Currently printing G-code/3mf filename.
    pub filename: Option<String>,
    pub started_at: DateTime<Utc>,

    /// Every tray reported loaded (all AMS slots plus the external
    /// spool when populated).
    pub trays: Vec<LoadedTray>,

    /// Raw `tray_now` active-tray indicator at start, if reported.
    /// The target-tray indicator (`tray_tar`) is informational only
    /// and deliberately not carried here.
    pub active_indicator: Option<u8>,
}
