//! Glue between detected lifecycle transitions and the persistence
//! layer.
//!
//! One handler serves one printer's poll stream, so calls for a
//! single job arrive sequentially; cross-printer concurrency is safe
//! because every write underneath is constraint-guarded and
//! idempotent. Data-incompleteness outcomes are logged at warn and
//! swallowed; real persistence errors propagate to the caller, which
//! scopes them to the one job (they never take the process down).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use spool_db::{AttributionOutcome, CaptureArgs, ReconcileReport, ReconcileWarning};
use sqlx::PgPool;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::payload::JobStartPayload;

/// Terminal status that triggers stock reconciliation. Other terminal
/// states (FAILED, aborted) close the job without touching inventory.
pub const STATUS_FINISH: &str = "FINISH";

pub struct LifecycleHandler {
    pool: PgPool,
}

impl LifecycleHandler {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Job-start transition: record the job, snapshot every loaded
    /// tray, and attribute the tray that is already feeding.
    ///
    /// Returns the local surrogate key for logging/CLI use only;
    /// subsequent events address the job by its printer id.
    pub async fn on_job_started(&self, start: JobStartPayload) -> Result<Uuid> {
        let job_id = spool_db::start_job(
            &self.pool,
            &spool_db::NewJob {
                printer_job_id: start.printer_job_id.clone(),
                printer_id: start.printer_id.clone(),
                filename: start.filename.clone(),
                status: "RUNNING".to_string(),
                start_time: start.started_at,
            },
        )
        .await
        .context("record job start failed")?;

        let report = spool_db::capture_snapshots(
            &self.pool,
            CaptureArgs {
                job_id,
                printer_id: start.printer_id.clone(),
                trays: start.trays,
                active_indicator: start.active_indicator,
            },
        )
        .await
        .context("capture filament snapshots failed")?;

        info!(
            %job_id,
            printer_id = %start.printer_id,
            inserted = report.rows_inserted,
            duplicate = report.rows_duplicate,
            primary = %report.primary,
            "filament snapshots captured"
        );
        if !report.catalog_misses.is_empty() {
            warn!(
                %job_id,
                missing = ?report.catalog_misses,
                "filament catalog has no entry for loaded filament(s); rows persisted unenriched"
            );
        }

        // The tray feeding at start counts as used from the first
        // moment; later tray changes accumulate further marks.
        self.attribute(job_id, start.active_indicator).await?;

        Ok(job_id)
    }

    /// Active-tray change mid-print. Keyed by the printer's job id,
    /// the only identity collaborators hold.
    pub async fn on_active_tray_changed(
        &self,
        printer_job_id: &str,
        active_indicator: Option<u8>,
    ) -> Result<()> {
        let Some(job_id) =
            spool_db::find_job_by_printer_job_id(&self.pool, printer_job_id).await?
        else {
            warn!(
                printer_job_id,
                "tray change for unknown job; attribution arrived before capture"
            );
            return Ok(());
        };

        self.attribute(job_id, active_indicator).await
    }

    /// Terminal transition. Only the call that actually sets end_time
    /// reconciles, and only for FINISH; duplicate notifications and
    /// failed jobs close without stock movements.
    pub async fn on_job_finished(
        &self,
        printer_job_id: &str,
        terminal_status: &str,
        end_time: DateTime<Utc>,
    ) -> Result<Option<ReconcileReport>> {
        let Some(job_id) =
            spool_db::find_job_by_printer_job_id(&self.pool, printer_job_id).await?
        else {
            warn!(printer_job_id, "finish event for unknown job; ignoring");
            return Ok(None);
        };

        let newly_finished =
            spool_db::finish_job(&self.pool, job_id, terminal_status, end_time).await?;
        if !newly_finished {
            warn!(
                %job_id,
                terminal_status,
                "duplicate finish notification; job already has an end_time"
            );
            return Ok(None);
        }

        if terminal_status != STATUS_FINISH {
            info!(%job_id, terminal_status, "job closed without reconciliation");
            return Ok(None);
        }

        let report = spool_db::reconcile_finished_job(&self.pool, job_id)
            .await
            .context("stock reconciliation failed")?;

        info!(
            %job_id,
            transactions = report.transactions_created,
            inventory_rows = report.inventory_rows_updated,
            "job reconciled"
        );
        log_reconcile_warnings(&report);

        Ok(Some(report))
    }

    async fn attribute(&self, job_id: Uuid, active_indicator: Option<u8>) -> Result<()> {
        match spool_db::mark_tray_used(&self.pool, job_id, active_indicator).await? {
            AttributionOutcome::Marked {
                position,
                rows_marked,
            } => {
                debug!(%job_id, %position, rows_marked, "active tray attributed");
            }
            AttributionOutcome::NoMatchingSnapshot { position } => {
                warn!(
                    %job_id,
                    %position,
                    "active tray has no snapshot row for this job; nothing attributed"
                );
            }
            AttributionOutcome::UnknownIndicator => {
                warn!(
                    %job_id,
                    indicator = ?active_indicator,
                    "active-tray indicator undecodable; nothing attributed"
                );
            }
        }
        Ok(())
    }
}

/// Warn-log each enumerated reconciliation warning.
pub fn log_reconcile_warnings(report: &ReconcileReport) {
    for w in &report.warnings {
        match w {
            ReconcileWarning::NoOutputMapping { filename } => warn!(
                job_id = %report.job_id,
                filename = ?filename,
                "no configured output items for printed file; no stock recorded"
            ),
            ReconcileWarning::IncompleteOutputRow { item_id, quantity } => warn!(
                job_id = %report.job_id,
                item_id = ?item_id,
                quantity = ?quantity,
                "output row with null item or quantity skipped"
            ),
            ReconcileWarning::NoColorMatch { item_id } => warn!(
                job_id = %report.job_id,
                %item_id,
                "item has color variations but no used filament matched; transaction left unvariated"
            ),
            ReconcileWarning::FilamentDescriptionUnavailable => warn!(
                job_id = %report.job_id,
                "primary filament description unavailable; base note used"
            ),
        }
    }
}
