//! Job-completion stock reconciliation.
//!
//! Converts a finished job into inventory-affecting records inside a
//! single transaction: one `stock_transactions` row per distinct
//! output item (quantities summed across the file's output rows,
//! optionally tagged with a matched color variation) and one
//! conditional `filament_inventory` decrement per item.
//!
//! The predecessor of this code lived in a database trigger with a
//! blanket `EXCEPTION WHEN OTHERS` handler. Here every non-fatal
//! condition is an enumerated [`ReconcileWarning`] in the report, and
//! everything else aborts the transaction whole: no partial stock
//! rows, no partial decrements. An aborted job stays eligible for a
//! retried reconciliation.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Transaction type written for completed prints.
pub const TX_TYPE_PRINT_COMPLETE: &str = "PRINT_COMPLETE";

/// Non-fatal, enumerated outcomes of a reconciliation pass. Each is a
/// data-incompleteness condition the system must survive, not an
/// error; the monitor logs them at warn level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconcileWarning {
    /// The job's filename has no configured (item, quantity) outputs.
    /// Normal for jobs that don't feed inventory.
    NoOutputMapping { filename: Option<String> },

    /// An output row with a null item or quantity was skipped.
    IncompleteOutputRow {
        item_id: Option<Uuid>,
        quantity: Option<i32>,
    },

    /// The item defines active color variations but none matched any
    /// used filament; the transaction was written without a variation
    /// reference.
    NoColorMatch { item_id: Uuid },

    /// The primary-used-filament description lookup failed; the note
    /// degraded to its base form. Never aborts the reconciliation.
    FilamentDescriptionUnavailable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub job_id: Uuid,
    pub transactions_created: u64,
    pub inventory_rows_updated: u64,
    pub warnings: Vec<ReconcileWarning>,
}

impl ReconcileReport {
    fn new(job_id: Uuid) -> Self {
        Self {
            job_id,
            transactions_created: 0,
            inventory_rows_updated: 0,
            warnings: Vec::new(),
        }
    }
}

/// Resolve the color variation for one produced item.
///
/// Joins the job's `was_used` snapshot rows against the item's active
/// variation mappings on normalized color (leading `#` and the
/// 2-digit alpha suffix stripped, case-insensitive, the same rule as
/// `spool_tray::normalize_color`).
///
/// Tie-break when several used filaments match distinct variations:
/// first row in `ams_id asc nulls last, tray_id asc nulls last`
/// order. Multi-color jobs genuinely can match more than one
/// variation; the lowest-position tray wins, deterministically.
pub async fn match_color_variation(
    tx: &mut Transaction<'_, Postgres>,
    item_id: Uuid,
    job_id: Uuid,
) -> Result<Option<Uuid>> {
    let variation_id: Option<Uuid> = sqlx::query_scalar(
        r#"
        select m.variation_id
        from filament_snapshots s
        join color_variation_mappings m
          on upper(left(regexp_replace(trim(s.tray_color), '^#', ''), 6))
             = upper(trim(m.filament_color))
        join item_color_variations v
          on v.variation_id = m.variation_id
        where s.job_id = $1
          and s.was_used
          and s.tray_color is not null
          and length(regexp_replace(trim(s.tray_color), '^#', '')) in (6, 8)
          and v.item_id = $2
          and v.active
        order by s.ams_id asc nulls last, s.tray_id asc nulls last
        limit 1
        "#,
    )
    .bind(job_id)
    .bind(item_id)
    .fetch_optional(&mut **tx)
    .await
    .context("color variation match query failed")?;

    Ok(variation_id)
}

async fn item_has_active_variations(
    tx: &mut Transaction<'_, Postgres>,
    item_id: Uuid,
) -> Result<bool> {
    let (exists,): (bool,) = sqlx::query_as(
        r#"
        select exists (
          select 1 from item_color_variations
          where item_id = $1 and active
        )
        "#,
    )
    .bind(item_id)
    .fetch_one(&mut **tx)
    .await
    .context("item variation existence query failed")?;
    Ok(exists)
}

/// One-line description of the primary used filament for the note.
///
/// "Primary used" = first `was_used` row in `is_primary desc, ams_id
/// asc nulls last, tray_id asc nulls last` order, so the tray that
/// was active when the job record was created wins when it was also
/// consumed.
///
/// Runs against the pool, not the reconcile transaction: a failed
/// statement would poison an open Postgres transaction, and this is
/// the one lookup whose failure must degrade (base note) instead of
/// aborting.
async fn primary_used_filament_line(pool: &PgPool, job_id: Uuid) -> Result<Option<String>> {
    let row = sqlx::query(
        r#"
        select tray_name, tray_type, tray_color, vendor
        from filament_snapshots
        where job_id = $1
          and was_used
        order by is_primary desc, ams_id asc nulls last, tray_id asc nulls last
        limit 1
        "#,
    )
    .bind(job_id)
    .fetch_optional(pool)
    .await
    .context("primary used filament query failed")?;

    let Some(row) = row else {
        return Ok(None);
    };

    let tray_name: Option<String> = row.try_get("tray_name")?;
    let tray_type: Option<String> = row.try_get("tray_type")?;
    let tray_color: Option<String> = row.try_get("tray_color")?;
    let vendor: Option<String> = row.try_get("vendor")?;

    let mut parts: Vec<String> = Vec::new();
    if let Some(t) = tray_type.filter(|s| !s.trim().is_empty()) {
        parts.push(t.trim().to_string());
    }
    if let Some(c) = tray_color.as_deref().and_then(spool_tray::normalize_color) {
        parts.push(format!("#{c}"));
    }
    if let Some(v) = vendor.filter(|s| !s.trim().is_empty()) {
        parts.push(v.trim().to_string());
    }

    let name = tray_name.filter(|s| !s.trim().is_empty());
    let line = match (name, parts.is_empty()) {
        (Some(n), true) => n.trim().to_string(),
        (Some(n), false) => format!("{} ({})", n.trim(), parts.join(", ")),
        (None, false) => parts.join(", "),
        (None, true) => return Ok(None),
    };

    Ok(Some(line))
}

/// Reconcile a job that has just reached FINISH.
///
/// Must be invoked at most once per finish transition; callers gate
/// on [`finish_job`][crate::finish_job] returning `true` (or, for the
/// CLI retry path, on the absence of stock transactions). All writes
/// happen in one transaction: any failure other than the note's
/// filament-description lookup rolls everything back.
pub async fn reconcile_finished_job(pool: &PgPool, job_id: Uuid) -> Result<ReconcileReport> {
    let job = sqlx::query(
        r#"
        select printer_id, filename, end_time
        from printer_jobs
        where job_id = $1
        "#,
    )
    .bind(job_id)
    .fetch_optional(pool)
    .await
    .context("reconcile job lookup failed")?;

    let Some(job) = job else {
        bail!("reconcile: no such job: {job_id}");
    };

    let printer_id: String = job.try_get("printer_id")?;
    let filename: Option<String> = job.try_get("filename")?;
    let end_time: Option<chrono::DateTime<chrono::Utc>> = job.try_get("end_time")?;

    let Some(end_time) = end_time else {
        bail!("reconcile: job {job_id} has not finished (end_time is null)");
    };

    let mut report = ReconcileReport::new(job_id);

    // Step 1: note text. The description lookup is the one step whose
    // failure must not abort the reconciliation, so it runs before the
    // transaction opens.
    let mut notes = format!("Print completed on printer {printer_id}");
    match primary_used_filament_line(pool, job_id).await {
        Ok(Some(line)) => {
            notes.push_str(" using ");
            notes.push_str(&line);
        }
        Ok(None) => {}
        Err(_) => {
            report
                .warnings
                .push(ReconcileWarning::FilamentDescriptionUnavailable);
        }
    }

    let mut tx = pool.begin().await.context("begin reconcile tx failed")?;

    // Step 2: configured outputs for this filename.
    let outputs = match &filename {
        Some(filename) => sqlx::query(
            r#"
            select pfm.item_id, pfm.quantity, pfm.assembly_id
            from printer_file_models pfm
            join printer_files pf on pf.printer_file_id = pfm.printer_file_id
            where pf.filename = $1
            order by pfm.item_id asc nulls last, pfm.model_id asc
            "#,
        )
        .bind(filename)
        .fetch_all(&mut *tx)
        .await
        .context("output mapping query failed")?,
        None => Vec::new(),
    };

    if outputs.is_empty() {
        report
            .warnings
            .push(ReconcileWarning::NoOutputMapping { filename });
        tx.commit().await.context("commit reconcile tx failed")?;
        return Ok(report);
    }

    // Step 3: aggregate complete rows per item. A file configured
    // with the same item on several plates sums into one transaction;
    // stock_transactions is unique on (item_id, job_id).
    let mut per_item: BTreeMap<Uuid, (i32, Option<Uuid>)> = BTreeMap::new();
    for out in outputs {
        let item_id: Option<Uuid> = out.try_get("item_id")?;
        let quantity: Option<i32> = out.try_get("quantity")?;
        let assembly_id: Option<Uuid> = out.try_get("assembly_id")?;

        let (Some(item_id), Some(quantity)) = (item_id, quantity) else {
            report
                .warnings
                .push(ReconcileWarning::IncompleteOutputRow { item_id, quantity });
            continue;
        };

        let entry = per_item.entry(item_id).or_insert((0, None));
        entry.0 += quantity;
        // First row's assembly reference wins (rows arrive in the
        // documented stable order).
        if entry.1.is_none() {
            entry.1 = assembly_id;
        }
    }

    // Steps 4 + 5 per distinct item.
    for (item_id, (quantity, assembly_id)) in per_item {
        // Items without active variations skip matching entirely;
        // that is configuration, not a fault.
        let variation_id = if item_has_active_variations(&mut tx, item_id).await? {
            let matched = match_color_variation(&mut tx, item_id, job_id).await?;
            if matched.is_none() {
                report
                    .warnings
                    .push(ReconcileWarning::NoColorMatch { item_id });
            }
            matched
        } else {
            None
        };

        sqlx::query(
            r#"
            insert into stock_transactions (
              item_id, quantity, transaction_type, transaction_date,
              notes, job_id, variation_id, assembly_id
            ) values (
              $1, $2, $3, $4,
              $5, $6, $7, $8
            )
            "#,
        )
        .bind(item_id)
        .bind(quantity)
        .bind(TX_TYPE_PRINT_COMPLETE)
        .bind(end_time)
        .bind(&notes)
        .bind(job_id)
        .bind(variation_id)
        .bind(assembly_id)
        .execute(&mut *tx)
        .await
        .context("insert stock_transaction failed")?;
        report.transactions_created += 1;

        // One conditional decrement per matched filament; an item
        // without declared requirements updates zero rows, which is a
        // no-op by contract.
        let res = sqlx::query(
            r#"
            update filament_inventory fi
            set remaining_grams = fi.remaining_grams - sub.grams
            from (
              select filament_id, abs(grams_per_unit * $2::double precision) as grams
              from item_material_requirements
              where item_id = $1
            ) sub
            where fi.filament_id = sub.filament_id
            "#,
        )
        .bind(item_id)
        .bind(f64::from(quantity))
        .execute(&mut *tx)
        .await
        .context("inventory decrement failed")?;
        report.inventory_rows_updated += res.rows_affected();
    }

    tx.commit().await.context("commit reconcile tx failed")?;
    Ok(report)
}

#[derive(Debug, Clone)]
pub struct StockTransactionRow {
    pub transaction_id: Uuid,
    pub item_id: Uuid,
    pub quantity: i32,
    pub transaction_type: String,
    pub notes: Option<String>,
    pub variation_id: Option<Uuid>,
    pub assembly_id: Option<Uuid>,
}

/// Stock transactions recorded for one job, in stable order.
pub async fn stock_transactions_for_job(
    pool: &PgPool,
    job_id: Uuid,
) -> Result<Vec<StockTransactionRow>> {
    let rows = sqlx::query(
        r#"
        select
          transaction_id, item_id, quantity, transaction_type,
          notes, variation_id, assembly_id
        from stock_transactions
        where job_id = $1
        order by item_id asc, transaction_id asc
        "#,
    )
    .bind(job_id)
    .fetch_all(pool)
    .await
    .context("stock_transactions_for_job query failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for r in rows {
        out.push(StockTransactionRow {
            transaction_id: r.try_get("transaction_id")?,
            item_id: r.try_get("item_id")?,
            quantity: r.try_get("quantity")?,
            transaction_type: r.try_get("transaction_type")?,
            notes: r.try_get("notes")?,
            variation_id: r.try_get("variation_id")?,
            assembly_id: r.try_get("assembly_id")?,
        });
    }
    Ok(out)
}
