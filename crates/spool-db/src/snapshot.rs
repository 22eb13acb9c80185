//! Filament snapshot capture and usage attribution.
//!
//! Capture writes one row per loaded tray at job start; attribution
//! flips `was_used` on whichever row the printer's active-tray
//! indicator points at. Both operations are safe under at-least-once
//! delivery: capture is a single insert-or-ignore against the
//! `(job_id, ams_id, tray_id)` uniqueness constraint (no
//! read-then-write), attribution is an idempotent boolean set.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use spool_tray::{LoadedTray, TrayPosition};
use sqlx::{PgPool, Row};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct CaptureArgs {
    pub job_id: Uuid,
    pub printer_id: String,
    /// Every tray reported loaded at job start.
    pub trays: Vec<LoadedTray>,
    /// Raw active-tray indicator at the instant of capture. Decides
    /// which row (if any) is marked primary.
    pub active_indicator: Option<u8>,
}

/// Outcome of one capture call. Duplicate rows are the expected
/// product of retries, not a fault; catalog misses are observable
/// here rather than silently papered over.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureReport {
    pub job_id: Uuid,
    pub rows_inserted: u64,
    pub rows_duplicate: u64,
    /// Position marked primary (Unknown = no tray active at capture).
    pub primary: TrayPosition,
    /// Filament ids that had no catalog entry; their rows persist
    /// with nulls in the enrichable columns. Sorted, deduplicated.
    pub catalog_misses: Vec<String>,
}

#[derive(Debug, Clone)]
struct CatalogEntry {
    name: Option<String>,
    material_type: Option<String>,
    vendor: Option<String>,
    cost: Option<f64>,
    density: Option<f64>,
    diameter: Option<f64>,
    nozzle_temp_min: Option<i32>,
    nozzle_temp_max: Option<i32>,
    bed_temp: Option<i32>,
}

/// Batched catalog lookup for the filament ids present in the payload.
async fn load_catalog_entries(
    pool: &PgPool,
    filament_ids: &[String],
) -> Result<BTreeMap<String, CatalogEntry>> {
    if filament_ids.is_empty() {
        return Ok(BTreeMap::new());
    }

    let rows = sqlx::query(
        r#"
        select
          filament_id,
          name,
          material_type,
          vendor,
          cost,
          density,
          diameter,
          nozzle_temp_min,
          nozzle_temp_max,
          bed_temp
        from filament_catalog
        where filament_id = any($1)
        "#,
    )
    .bind(filament_ids)
    .fetch_all(pool)
    .await
    .context("filament_catalog lookup failed")?;

    let mut out = BTreeMap::new();
    for r in rows {
        let id: String = r.try_get("filament_id")?;
        out.insert(
            id,
            CatalogEntry {
                name: r.try_get("name")?,
                material_type: r.try_get("material_type")?,
                vendor: r.try_get("vendor")?,
                cost: r.try_get("cost")?,
                density: r.try_get("density")?,
                diameter: r.try_get("diameter")?,
                nozzle_temp_min: r.try_get("nozzle_temp_min")?,
                nozzle_temp_max: r.try_get("nozzle_temp_max")?,
                bed_temp: r.try_get("bed_temp")?,
            },
        );
    }
    Ok(out)
}

/// Persist one snapshot row per loaded tray for a started job.
///
/// Idempotent under retry: a second delivery of the same payload
/// inserts nothing and reports every row as duplicate. Enrichable
/// metadata the payload omits is filled from the catalog; a missing
/// catalog entry leaves nulls and is listed in the report.
pub async fn capture_snapshots(pool: &PgPool, args: CaptureArgs) -> Result<CaptureReport> {
    let primary = TrayPosition::decode(args.active_indicator);

    let mut wanted_ids: Vec<String> = args
        .trays
        .iter()
        .filter_map(|t| t.filament_id.clone())
        .collect();
    wanted_ids.sort();
    wanted_ids.dedup();

    let catalog = load_catalog_entries(pool, &wanted_ids).await?;

    let mut report = CaptureReport {
        job_id: args.job_id,
        rows_inserted: 0,
        rows_duplicate: 0,
        primary,
        catalog_misses: Vec::new(),
    };

    for id in &wanted_ids {
        if !catalog.contains_key(id) {
            report.catalog_misses.push(id.clone());
        }
    }

    for tray in &args.trays {
        let entry = tray.filament_id.as_ref().and_then(|id| catalog.get(id));

        // Payload wins over catalog; catalog only fills gaps.
        let tray_name = tray
            .tray_name
            .clone()
            .or_else(|| entry.and_then(|e| e.name.clone()));
        let tray_type = tray
            .tray_type
            .clone()
            .or_else(|| entry.and_then(|e| e.material_type.clone()));
        let vendor = tray
            .vendor
            .clone()
            .or_else(|| entry.and_then(|e| e.vendor.clone()));
        let cost = tray.cost.or_else(|| entry.and_then(|e| e.cost));
        let density = tray.density.or_else(|| entry.and_then(|e| e.density));
        let diameter = tray.diameter.or_else(|| entry.and_then(|e| e.diameter));
        let nozzle_temp_min = tray
            .nozzle_temp_min
            .or_else(|| entry.and_then(|e| e.nozzle_temp_min));
        let nozzle_temp_max = tray
            .nozzle_temp_max
            .or_else(|| entry.and_then(|e| e.nozzle_temp_max));
        let bed_temp = tray.bed_temp.or_else(|| entry.and_then(|e| e.bed_temp));

        let is_primary = primary.is_attributable() && tray.position() == primary;

        let res = sqlx::query(
            r#"
            insert into filament_snapshots (
              job_id, printer_id, ams_id, tray_id,
              filament_id, tray_uuid, tray_name, tray_type, tray_color, vendor,
              nozzle_temp_min, nozzle_temp_max, bed_temp,
              weight_grams, cost, density, diameter,
              is_primary, was_used
            ) values (
              $1, $2, $3, $4,
              $5, $6, $7, $8, $9, $10,
              $11, $12, $13,
              $14, $15, $16, $17,
              $18, false
            )
            on conflict on constraint uq_filament_snapshots_job_position
            do nothing
            "#,
        )
        .bind(args.job_id)
        .bind(&args.printer_id)
        .bind(tray.ams_id)
        .bind(tray.tray_id)
        .bind(&tray.filament_id)
        .bind(&tray.tray_uuid)
        .bind(tray_name)
        .bind(tray_type)
        .bind(&tray.tray_color)
        .bind(vendor)
        .bind(nozzle_temp_min)
        .bind(nozzle_temp_max)
        .bind(bed_temp)
        .bind(tray.weight_grams)
        .bind(cost)
        .bind(density)
        .bind(diameter)
        .bind(is_primary)
        .execute(pool)
        .await
        .context("insert filament_snapshot failed")?;

        if res.rows_affected() == 1 {
            report.rows_inserted += 1;
        } else {
            report.rows_duplicate += 1;
        }
    }

    Ok(report)
}

/// Outcome of one attribution call. Only `Marked` changed anything;
/// the other two are warn-level no-ops by contract, never errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributionOutcome {
    /// `was_used` is now true on every snapshot row at this position.
    Marked {
        position: TrayPosition,
        rows_marked: u64,
    },

    /// The indicator decoded to a real position but the job has no
    /// snapshot row there (attribution raced ahead of capture, or the
    /// slot was never captured).
    NoMatchingSnapshot { position: TrayPosition },

    /// Indicator absent or outside the defined encoding; nothing to
    /// attribute.
    UnknownIndicator,
}

/// Mark the snapshot row at the active position as actually used.
///
/// Repeated calls with the same indicator are idempotent; calls with
/// different indicators over a job's lifetime accumulate marks
/// (multi-color prints use several trays). Rows already marked stay
/// marked.
pub async fn mark_tray_used(
    pool: &PgPool,
    job_id: Uuid,
    indicator: Option<u8>,
) -> Result<AttributionOutcome> {
    let position = TrayPosition::decode(indicator);
    if !position.is_attributable() {
        return Ok(AttributionOutcome::UnknownIndicator);
    }

    // `is not distinct from` makes the external-spool position
    // (null, null) matchable with the same statement as AMS slots.
    let res = sqlx::query(
        r#"
        update filament_snapshots
        set was_used = true
        where job_id = $1
          and ams_id is not distinct from $2
          and tray_id is not distinct from $3
        "#,
    )
    .bind(job_id)
    .bind(position.ams_db())
    .bind(position.tray_db())
    .execute(pool)
    .await
    .context("mark_tray_used update failed")?;

    let rows_marked = res.rows_affected();
    if rows_marked == 0 {
        return Ok(AttributionOutcome::NoMatchingSnapshot { position });
    }

    Ok(AttributionOutcome::Marked {
        position,
        rows_marked,
    })
}
