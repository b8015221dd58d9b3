use std::path::Path;

use anyhow::{Context, Result};

use rota_core::catalog_import::{import_catalog, parse_catalog_csv};
use rota_core::db::Database;
use rota_core::mirror::Mirror;

pub(crate) fn cmd_import_catalog(
    mirror: &mut Mirror<Database>,
    file: &Path,
    dry_run: bool,
    json: bool,
) -> Result<()> {
    let data = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read CSV file: {}", file.display()))?;
    let rows = parse_catalog_csv(data.as_bytes())?;
    let summary = import_catalog(mirror, &rows, dry_run)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    if dry_run {
        println!("Dry run — nothing was imported.");
    }
    println!("Rows parsed:      {}", summary.rows_parsed);
    println!("Meals created:    {}", summary.meals_created);
    println!("Meals skipped:    {}", summary.meals_skipped);
    println!("Values assigned:  {}", summary.values_assigned);
    if summary.values_unknown > 0 {
        println!(
            "Values unknown:   {} (add the category values first, then re-import)",
            summary.values_unknown
        );
    }
    Ok(())
}

pub(crate) fn cmd_export(mirror: &Mirror<Database>, out: Option<&Path>) -> Result<()> {
    let data = mirror.export_all();
    let json = serde_json::to_string_pretty(&data)?;

    match out {
        Some(path) => {
            std::fs::write(path, &json)
                .with_context(|| format!("Failed to write export: {}", path.display()))?;
            println!(
                "Exported {} categories, {} values, {} meals, {} allocations to {}",
                data.categories.len(),
                data.values.len(),
                data.meals.len(),
                data.allocations.len(),
                path.display()
            );
        }
        None => println!("{json}"),
    }
    Ok(())
}
