use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use uuid::Uuid;

pub mod reconcile;
pub mod snapshot;

pub use reconcile::{
    match_color_variation, reconcile_finished_job, stock_transactions_for_job, ReconcileReport,
    ReconcileWarning, StockTransactionRow, TX_TYPE_PRINT_COMPLETE,
};
pub use snapshot::{
    capture_snapshots, mark_tray_used, AttributionOutcome, CaptureArgs, CaptureReport,
};

pub const ENV_DB_URL: &str = "SPOOL_DATABASE_URL";

/// Connect to Postgres using SPOOL_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL)
        .with_context(|| format!("missing env var {ENV_DB_URL}"))?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Simple status query (connectivity + schema presence).
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;
    let ok = one == 1;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='printer_jobs'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus { ok, has_jobs_table: exists })
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_jobs_table: bool,
}

/// Count jobs currently in RUNNING. Used by CLI guardrails to prevent
/// migrating a database that printers are actively writing to.
pub async fn count_running_jobs(pool: &PgPool) -> Result<i64> {
    // If schema doesn't exist yet, treat as 0 (safe) rather than failing.
    let st = status(pool).await?;
    if !st.has_jobs_table {
        return Ok(0);
    }

    let (n,): (i64,) = sqlx::query_as::<_, (i64,)>(
        r#"
        select count(*)::bigint
        from printer_jobs
        where status = 'RUNNING'
          and end_time is null
        "#,
    )
    .fetch_one(pool)
    .await
    .context("count_running_jobs failed")?;

    Ok(n)
}

#[derive(Debug, Clone)]
pub struct NewJob {
    /// Printer-assigned job identifier. The only stable identity
    /// across pause/resume; never synthesized locally.
    pub printer_job_id: Option<String>,
    pub printer_id: String,
    pub filename: Option<String>,
    pub status: String,
    pub start_time: DateTime<Utc>,
}

/// Record a job start and return the local surrogate key.
///
/// Keyed on the stable printer job id: a duplicate or resumed start
/// notification lands on the existing row (status refreshed, filename
/// kept) instead of forking a second identity. The update is guarded
/// on `end_time is null`, so a start redelivered after the job
/// finished leaves the terminal row untouched. Jobs the printer never
/// assigned an id get a plain insert.
pub async fn start_job(pool: &PgPool, job: &NewJob) -> Result<Uuid> {
    let job_id: Uuid = match &job.printer_job_id {
        Some(printer_job_id) => {
            let updated: Option<Uuid> = sqlx::query_scalar(
                r#"
                insert into printer_jobs (
                  printer_job_id, printer_id, filename, status, start_time
                ) values (
                  $1, $2, $3, $4, $5
                )
                on conflict (printer_job_id) do update set
                  status = excluded.status,
                  filename = coalesce(excluded.filename, printer_jobs.filename)
                where printer_jobs.end_time is null
                returning job_id
                "#,
            )
            .bind(printer_job_id)
            .bind(&job.printer_id)
            .bind(&job.filename)
            .bind(&job.status)
            .bind(job.start_time)
            .fetch_optional(pool)
            .await
            .context("start_job upsert failed")?;

            match updated {
                Some(job_id) => job_id,
                // Conflict row already carries an end_time; the guard
                // filtered the update, so resolve the existing key.
                None => find_job_by_printer_job_id(pool, printer_job_id)
                    .await?
                    .ok_or_else(|| {
                        anyhow!("start_job: conflicting row vanished for {printer_job_id}")
                    })?,
            }
        }

        None => sqlx::query_scalar(
            r#"
            insert into printer_jobs (
              printer_id, filename, status, start_time
            ) values (
              $1, $2, $3, $4
            )
            returning job_id
            "#,
        )
        .bind(&job.printer_id)
        .bind(&job.filename)
        .bind(&job.status)
        .bind(job.start_time)
        .fetch_one(pool)
        .await
        .context("start_job insert failed")?,
    };

    Ok(job_id)
}

/// FINISH transition guard. Sets the terminal status and end_time on
/// the one row whose end_time is still null, and reports whether THIS
/// call performed the transition.
///
/// Returning `false` means some earlier notification already finished
/// the job; the caller must not reconcile again. This is the sole
/// defense the reconciler needs against duplicate or concurrent
/// completion events.
pub async fn finish_job(
    pool: &PgPool,
    job_id: Uuid,
    terminal_status: &str,
    end_time: DateTime<Utc>,
) -> Result<bool> {
    let res = sqlx::query(
        r#"
        update printer_jobs
        set status = $2,
            end_time = $3
        where job_id = $1
          and end_time is null
        "#,
    )
    .bind(job_id)
    .bind(terminal_status)
    .bind(end_time)
    .execute(pool)
    .await
    .context("finish_job update failed")?;

    Ok(res.rows_affected() == 1)
}

/// Resolve the local surrogate key from the printer-assigned job id.
///
/// Collaborators address jobs by the printer's id only; the surrogate
/// uuid never crosses the boundary as if it were stable identity.
pub async fn find_job_by_printer_job_id(
    pool: &PgPool,
    printer_job_id: &str,
) -> Result<Option<Uuid>> {
    let job_id: Option<Uuid> = sqlx::query_scalar(
        r#"
        select job_id
        from printer_jobs
        where printer_job_id = $1
        "#,
    )
    .bind(printer_job_id)
    .fetch_optional(pool)
    .await
    .context("find_job_by_printer_job_id failed")?;

    Ok(job_id)
}

#[derive(Debug, Clone)]
pub struct JobRow {
    pub job_id: Uuid,
    pub printer_job_id: Option<String>,
    pub printer_id: String,
    pub filename: Option<String>,
    pub status: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

pub async fn fetch_job(pool: &PgPool, job_id: Uuid) -> Result<JobRow> {
    let row = sqlx::query(
        r#"
        select
          job_id,
          printer_job_id,
          printer_id,
          filename,
          status,
          start_time,
          end_time
        from printer_jobs
        where job_id = $1
        "#,
    )
    .bind(job_id)
    .fetch_optional(pool)
    .await
    .context("fetch_job failed")?
    .ok_or_else(|| anyhow!("no such job: {job_id}"))?;

    Ok(JobRow {
        job_id: row.try_get("job_id")?,
        printer_job_id: row.try_get("printer_job_id")?,
        printer_id: row.try_get("printer_id")?,
        filename: row.try_get("filename")?,
        status: row.try_get("status")?,
        start_time: row.try_get("start_time")?,
        end_time: row.try_get("end_time")?,
    })
}

#[derive(Debug, Clone)]
pub struct InventoryRow {
    pub filament_id: String,
    pub name: Option<String>,
    pub material_type: Option<String>,
    pub remaining_grams: f64,
}

/// Inventory listing in stable order, for the CLI.
pub async fn list_inventory(pool: &PgPool) -> Result<Vec<InventoryRow>> {
    let rows = sqlx::query(
        r#"
        select
          fi.filament_id,
          fc.name,
          fc.material_type,
          fi.remaining_grams
        from filament_inventory fi
        left join filament_catalog fc on fc.filament_id = fi.filament_id
        order by fi.filament_id asc
        "#,
    )
    .fetch_all(pool)
    .await
    .context("list_inventory query failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for r in rows {
        out.push(InventoryRow {
            filament_id: r.try_get("filament_id")?,
            name: r.try_get("name")?,
            material_type: r.try_get("material_type")?,
            remaining_grams: r.try_get("remaining_grams")?,
        });
    }
    Ok(out)
}
