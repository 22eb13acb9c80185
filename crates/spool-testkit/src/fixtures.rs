//! Reference-data fixtures: catalog filaments, inventory, items,
//! file-to-item output mappings, color variations, material
//! requirements, and loaded-tray payload builders.

use anyhow::{Context, Result};
use sqlx::PgPool;
use spool_tray::LoadedTray;
use uuid::Uuid;

use crate::unique_key;

/// Catalog entry + inventory row for one filament. Returns the
/// generated filament id.
pub async fn seed_filament(
    pool: &PgPool,
    label: &str,
    material_type: &str,
    remaining_grams: f64,
) -> Result<String> {
    let filament_id = unique_key(label);

    sqlx::query(
        r#"
        insert into filament_catalog (
          filament_id, name, material_type, vendor,
          cost, density, diameter,
          nozzle_temp_min, nozzle_temp_max, bed_temp
        ) values ($1, $2, $3, 'Bambu Lab', 24.99, 1.24, 1.75, 190, 230, 60)
        "#,
    )
    .bind(&filament_id)
    .bind(label)
    .bind(material_type)
    .execute(pool)
    .await
    .context("seed filament_catalog failed")?;

    sqlx::query(
        r#"
        insert into filament_inventory (filament_id, remaining_grams)
        values ($1, $2)
        "#,
    )
    .bind(&filament_id)
    .bind(remaining_grams)
    .execute(pool)
    .await
    .context("seed filament_inventory failed")?;

    Ok(filament_id)
}

/// Item plus a printer-file output mapping producing `quantity` of it.
/// Returns (item_id, unique filename).
pub async fn seed_item_output(
    pool: &PgPool,
    item_label: &str,
    quantity: Option<i32>,
) -> Result<(Uuid, String)> {
    let item_id: Uuid = sqlx::query_scalar("insert into items (name) values ($1) returning item_id")
        .bind(item_label)
        .fetch_one(pool)
        .await
        .context("seed items failed")?;

    let filename = format!("{}.3mf", unique_key(item_label));
    let printer_file_id: Uuid = sqlx::query_scalar(
        "insert into printer_files (filename) values ($1) returning printer_file_id",
    )
    .bind(&filename)
    .fetch_one(pool)
    .await
    .context("seed printer_files failed")?;

    sqlx::query(
        r#"
        insert into printer_file_models (printer_file_id, item_id, quantity)
        values ($1, $2, $3)
        "#,
    )
    .bind(printer_file_id)
    .bind(item_id)
    .bind(quantity)
    .execute(pool)
    .await
    .context("seed printer_file_models failed")?;

    Ok((item_id, filename))
}

/// Append one more output row to an existing file mapping, with
/// explicitly nullable item/quantity for incomplete-row scenarios.
pub async fn add_output_row(
    pool: &PgPool,
    filename: &str,
    item_id: Option<Uuid>,
    quantity: Option<i32>,
) -> Result<()> {
    sqlx::query(
        r#"
        insert into printer_file_models (printer_file_id, item_id, quantity)
        select printer_file_id, $2, $3
        from printer_files
        where filename = $1
        "#,
    )
    .bind(filename)
    .bind(item_id)
    .bind(quantity)
    .execute(pool)
    .await
    .context("add_output_row failed")?;
    Ok(())
}

/// Active color variation mapped to a reference color (RRGGBB).
pub async fn seed_color_variation(
    pool: &PgPool,
    item_id: Uuid,
    name: &str,
    filament_color: &str,
) -> Result<Uuid> {
    let variation_id: Uuid = sqlx::query_scalar(
        r#"
        insert into item_color_variations (item_id, variation_name, active)
        values ($1, $2, true)
        returning variation_id
        "#,
    )
    .bind(item_id)
    .bind(name)
    .fetch_one(pool)
    .await
    .context("seed item_color_variations failed")?;

    sqlx::query(
        r#"
        insert into color_variation_mappings (variation_id, filament_color)
        values ($1, $2)
        "#,
    )
    .bind(variation_id)
    .bind(filament_color)
    .execute(pool)
    .await
    .context("seed color_variation_mappings failed")?;

    Ok(variation_id)
}

/// Per-unit material requirement for an item.
pub async fn seed_material_requirement(
    pool: &PgPool,
    item_id: Uuid,
    filament_id: &str,
    grams_per_unit: f64,
) -> Result<()> {
    sqlx::query(
        r#"
        insert into item_material_requirements (item_id, filament_id, grams_per_unit)
        values ($1, $2, $3)
        "#,
    )
    .bind(item_id)
    .bind(filament_id)
    .bind(grams_per_unit)
    .execute(pool)
    .await
    .context("seed item_material_requirements failed")?;
    Ok(())
}

/// Current remaining grams for a filament.
pub async fn inventory_grams(pool: &PgPool, filament_id: &str) -> Result<f64> {
    let (g,): (f64,) = sqlx::query_as(
        "select remaining_grams from filament_inventory where filament_id = $1",
    )
    .bind(filament_id)
    .fetch_one(pool)
    .await
    .context("inventory_grams query failed")?;
    Ok(g)
}

/// Remove a file mapping and its output rows.
pub async fn cleanup_output(pool: &PgPool, filename: &str) -> Result<()> {
    sqlx::query("delete from printer_files where filename = $1")
        .bind(filename)
        .execute(pool)
        .await
        .context("cleanup printer_files failed")?;
    Ok(())
}

/// Remove an item and its variations, mappings and requirements.
/// Any output rows pointing at the item must be removed first (the
/// printer_file_models reference does not cascade).
pub async fn cleanup_item(pool: &PgPool, item_id: Uuid) -> Result<()> {
    sqlx::query("delete from items where item_id = $1")
        .bind(item_id)
        .execute(pool)
        .await
        .context("cleanup items failed")?;
    Ok(())
}

/// Remove a seeded filament from inventory and catalog. Requirements
/// referencing it must be removed first (via [`cleanup_item`]).
pub async fn cleanup_filament(pool: &PgPool, filament_id: &str) -> Result<()> {
    sqlx::query("delete from filament_inventory where filament_id = $1")
        .bind(filament_id)
        .execute(pool)
        .await
        .context("cleanup filament_inventory failed")?;
    sqlx::query("delete from filament_catalog where filament_id = $1")
        .bind(filament_id)
        .execute(pool)
        .await
        .context("cleanup filament_catalog failed")?;
    Ok(())
}

/// Loaded AMS tray with the fields the attribution path cares about.
pub fn ams_tray(
    ams_id: i16,
    tray_id: i16,
    filament_id: &str,
    tray_type: &str,
    color_rgba: &str,
) -> LoadedTray {
    LoadedTray {
        ams_id: Some(ams_id),
        tray_id: Some(tray_id),
        filament_id: Some(filament_id.to_string()),
        tray_type: Some(tray_type.to_string()),
        tray_color: Some(color_rgba.to_string()),
        vendor: Some("Bambu Lab".to_string()),
        ..LoadedTray::default()
    }
}

/// Loaded external spool (no AMS position).
pub fn external_tray(filament_id: Option<&str>, tray_type: &str, color_rgba: &str) -> LoadedTray {
    LoadedTray {
        ams_id: None,
        tray_id: None,
        filament_id: filament_id.map(str::to_string),
        tray_type: Some(tray_type.to_string()),
        tray_color: Some(color_rgba.to_string()),
        ..LoadedTray::default()
    }
}
