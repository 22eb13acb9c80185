use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "spool")]
#[command(about = "SpoolTrace operator CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Job inspection and recovery
    Job {
        #[command(subcommand)]
        cmd: JobCmd,
    },

    /// Filament inventory
    Inventory {
        #[command(subcommand)]
        cmd: InventoryCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,

    /// Apply SQL migrations. Guardrail: refuses while any job is RUNNING unless --yes is provided.
    Migrate {
        /// Acknowledge you are migrating a DB that printers may be writing to.
        #[arg(long, default_value_t = false)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum JobCmd {
    /// Print a job row and its stock transactions.
    Status {
        /// Printer-assigned job id, or the local uuid as a fallback.
        #[arg(long)]
        job: String,
    },

    /// Re-run stock reconciliation for a finished job whose earlier
    /// reconciliation aborted. Refuses unfinished jobs and jobs that
    /// already have stock transactions.
    Reconcile {
        /// Printer-assigned job id, or the local uuid as a fallback.
        #[arg(long)]
        job: String,
    },
}

#[derive(Subcommand)]
enum InventoryCmd {
    /// List remaining grams per filament.
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env.local if present (dev convenience). Silent if the
    // file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = spool_db::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = spool_db::status(&pool).await?;
                    println!("db_ok={} has_jobs_table={}", s.ok, s.has_jobs_table);
                }
                DbCmd::Migrate { yes } => {
                    let n = spool_db::count_running_jobs(&pool).await?;
                    if n > 0 && !yes {
                        anyhow::bail!(
                            "REFUSING MIGRATE: {} job(s) currently RUNNING. Re-run with: `spool db migrate --yes`",
                            n
                        );
                    }

                    spool_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::Job { cmd } => match cmd {
            JobCmd::Status { job } => {
                let pool = spool_db::connect_from_env().await?;
                let job_id = resolve_job(&pool, &job).await?;
                let r = spool_db::fetch_job(&pool, job_id).await?;

                println!("job_id={}", r.job_id);
                println!("printer_job_id={}", r.printer_job_id.unwrap_or_default());
                println!("printer_id={}", r.printer_id);
                println!("filename={}", r.filename.unwrap_or_default());
                println!("status={}", r.status);
                println!("start_time={}", r.start_time.to_rfc3339());
                println!(
                    "end_time={}",
                    r.end_time.map(|t| t.to_rfc3339()).unwrap_or_default()
                );

                let txs = spool_db::stock_transactions_for_job(&pool, job_id).await?;
                println!("stock_transactions={}", txs.len());
                for t in txs {
                    println!(
                        "  item={} qty={} type={} variation={} notes={:?}",
                        t.item_id,
                        t.quantity,
                        t.transaction_type,
                        t.variation_id.map(|v| v.to_string()).unwrap_or_default(),
                        t.notes.unwrap_or_default()
                    );
                }
            }

            JobCmd::Reconcile { job } => {
                let pool = spool_db::connect_from_env().await?;
                let job_id = resolve_job(&pool, &job).await?;
                let r = spool_db::fetch_job(&pool, job_id).await?;

                if r.end_time.is_none() {
                    anyhow::bail!(
                        "REFUSING RECONCILE: job {} has not finished (end_time is null)",
                        job_id
                    );
                }
                let existing = spool_db::stock_transactions_for_job(&pool, job_id).await?;
                if !existing.is_empty() {
                    anyhow::bail!(
                        "REFUSING RECONCILE: job {} already has {} stock transaction(s)",
                        job_id,
                        existing.len()
                    );
                }

                let report = spool_db::reconcile_finished_job(&pool, job_id).await?;
                println!("reconciled=true job_id={}", report.job_id);
                println!("transactions_created={}", report.transactions_created);
                println!("inventory_rows_updated={}", report.inventory_rows_updated);
                for w in &report.warnings {
                    println!(
                        "warning={}",
                        serde_json::to_string(w).context("serialize warning")?
                    );
                }
            }
        },

        Commands::Inventory { cmd } => match cmd {
            InventoryCmd::List => {
                let pool = spool_db::connect_from_env().await?;
                for row in spool_db::list_inventory(&pool).await? {
                    println!(
                        "filament={} name={} type={} remaining_grams={:.1}",
                        row.filament_id,
                        row.name.unwrap_or_default(),
                        row.material_type.unwrap_or_default(),
                        row.remaining_grams
                    );
                }
            }
        },
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();
}

/// Accept the printer-assigned job id first; fall back to the local
/// uuid for rows the printer never identified.
async fn resolve_job(pool: &PgPool, job: &str) -> Result<Uuid> {
    if let Some(job_id) = spool_db::find_job_by_printer_job_id(pool, job).await? {
        return Ok(job_id);
    }
    Uuid::parse_str(job)
        .with_context(|| format!("'{job}' is neither a known printer job id nor a uuid"))
}
