use std::io::Read;

use anyhow::{Context, Result, bail};
use serde::Serialize;

use crate::db::EntityStore;
use crate::mirror::Mirror;
use crate::models::Meal;

/// A single row parsed from a meal-catalogue CSV.
#[derive(Debug, Clone)]
pub struct CatalogRow {
    pub name: String,
    pub description: String,
    pub url: String,
    pub notes: String,
    /// (category header, value name) pairs from the extra columns.
    pub values: Vec<(String, String)>,
}

/// Summary of what a catalogue import would do / did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CatalogImportSummary {
    pub rows_parsed: usize,
    pub meals_created: usize,
    pub meals_skipped: usize,
    pub values_assigned: usize,
    pub values_unknown: usize,
}

/// Parse a meal-catalogue CSV from any reader.
///
/// Expected header: `Name` (required), then optionally `Description`,
/// `Url`, `Notes`. Every other non-empty column is treated as a category
/// name, and the cell value as that category's value for the meal.
pub fn parse_catalog_csv<R: Read>(reader: R) -> Result<Vec<CatalogRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr.headers().context("Failed to read CSV headers")?.clone();

    let col =
        |name: &str| -> Option<usize> { headers.iter().position(|h| h.eq_ignore_ascii_case(name)) };

    let Some(idx_name) = col("Name") else {
        bail!("Missing required column: Name");
    };
    let idx_description = col("Description");
    let idx_url = col("Url");
    let idx_notes = col("Notes");

    let reserved = [Some(idx_name), idx_description, idx_url, idx_notes];
    let category_columns: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|(i, header)| !reserved.contains(&Some(*i)) && !header.is_empty())
        .map(|(i, header)| (i, header.to_string()))
        .collect();

    let mut rows = Vec::new();

    for (line_num, result) in rdr.records().enumerate() {
        let record = result.with_context(|| format!("Failed to parse CSV row {}", line_num + 2))?;

        let name = record.get(idx_name).unwrap_or("").trim().to_string();
        if name.is_empty() {
            continue; // skip blank rows
        }

        let field = |idx: Option<usize>| -> String {
            idx.and_then(|i| record.get(i))
                .unwrap_or("")
                .trim()
                .to_string()
        };

        let mut values = Vec::new();
        for (i, header) in &category_columns {
            let value = record.get(*i).unwrap_or("").trim();
            if !value.is_empty() {
                values.push((header.clone(), value.to_string()));
            }
        }

        rows.push(CatalogRow {
            name,
            description: field(idx_description),
            url: field(idx_url),
            notes: field(idx_notes),
            values,
        });
    }

    Ok(rows)
}

/// Import parsed catalogue rows into the mirror.
///
/// Meals whose name already exists are skipped; category columns resolve
/// against existing categories and values by name, with unresolvable cells
/// counted rather than failing the import.
pub fn import_catalog<S: EntityStore>(
    mirror: &mut Mirror<S>,
    rows: &[CatalogRow],
    dry_run: bool,
) -> Result<CatalogImportSummary> {
    let mut summary = CatalogImportSummary {
        rows_parsed: rows.len(),
        ..CatalogImportSummary::default()
    };

    for row in rows {
        if mirror.validate_meal_name(&row.name, None).is_err() {
            summary.meals_skipped += 1;
            continue;
        }

        let mut meal = Meal::new(&row.name);
        meal.description = row.description.clone();
        meal.url = row.url.clone();
        meal.notes = row.notes.clone();

        for (category_name, value_name) in &row.values {
            let resolved = mirror.category_by_name(category_name).and_then(|category| {
                mirror
                    .value_by_name(category.id, value_name)
                    .map(|value| (category.id, value.id))
            });
            match resolved {
                Some((category_id, value_id)) => {
                    meal.assignments.insert(category_id, value_id);
                    summary.values_assigned += 1;
                }
                None => summary.values_unknown += 1,
            }
        }

        if !dry_run {
            mirror.insert_meal(meal)?;
        }
        summary.meals_created += 1;
    }

    Ok(summary)
}
