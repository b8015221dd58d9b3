use std::path::Path;

use anyhow::{Context, Result, bail};
use tabled::{Table, Tabled, settings::Style};
use uuid::Uuid;

use rota_core::db::Database;
use rota_core::mirror::Mirror;
use rota_core::models::{Attachment, Meal};

use super::helpers::{describe_assignments, truncate};

fn resolve_meal(mirror: &Mirror<Database>, name: &str) -> Result<Uuid> {
    match mirror.meal_by_name(name) {
        Some(meal) => Ok(meal.id),
        None => bail!("No meal named '{name}'"),
    }
}

pub(crate) fn cmd_meal_add(
    mirror: &mut Mirror<Database>,
    name: &str,
    description: Option<&str>,
    url: Option<&str>,
    notes: Option<&str>,
    image: Option<&Path>,
) -> Result<()> {
    mirror.validate_meal_name(name, None)?;

    let mut meal = Meal::new(name.trim());
    meal.description = description.unwrap_or_default().to_string();
    meal.url = url.unwrap_or_default().to_string();
    meal.notes = notes.unwrap_or_default().to_string();
    if let Some(path) = image {
        meal.image = Some(
            std::fs::read(path)
                .with_context(|| format!("Failed to read image: {}", path.display()))?,
        );
    }

    mirror.insert_meal(meal)?;
    println!("Added meal '{}'", name.trim());
    Ok(())
}

pub(crate) fn cmd_meal_list(
    mirror: &Mirror<Database>,
    search: Option<&str>,
    json: bool,
) -> Result<()> {
    // Generic ranking order: frequency-weighted, name tiebreak.
    let meals: Vec<&Meal> = mirror
        .sorted_meals(None)
        .into_iter()
        .filter(|meal| {
            search.is_none_or(|query| meal.name.to_lowercase().contains(&query.to_lowercase()))
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&meals)?);
        return Ok(());
    }

    if meals.is_empty() {
        eprintln!("No meals found");
        return Ok(());
    }

    #[derive(Tabled)]
    struct MealRow {
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Attributes")]
        attributes: String,
        #[tabled(rename = "Last planned")]
        last_used: String,
    }

    let rows: Vec<MealRow> = meals
        .iter()
        .map(|meal| MealRow {
            name: truncate(&meal.name, 35),
            attributes: truncate(&describe_assignments(mirror, meal), 45),
            last_used: meal
                .last_used
                .map_or_else(|| "never".to_string(), |ts| ts.format("%Y-%m-%d").to_string()),
        })
        .collect();

    println!("{}", Table::new(&rows).with(Style::rounded()));
    Ok(())
}

pub(crate) fn cmd_meal_show(mirror: &Mirror<Database>, name: &str, json: bool) -> Result<()> {
    let id = resolve_meal(mirror, name)?;
    let Some(meal) = mirror.meal(id) else {
        bail!("No meal named '{name}'");
    };

    if json {
        println!("{}", serde_json::to_string_pretty(meal)?);
        return Ok(());
    }

    println!("=== {} ===", meal.name);
    if !meal.description.is_empty() {
        println!("  {}", meal.description);
    }
    if !meal.url.is_empty() {
        println!("  url: {}", meal.url);
    }
    if !meal.notes.is_empty() {
        println!("  notes: {}", meal.notes);
    }
    let attributes = describe_assignments(mirror, meal);
    if !attributes.is_empty() {
        println!("  attributes: {attributes}");
    }
    match meal.last_used {
        Some(ts) => println!("  last planned: {}", ts.format("%Y-%m-%d")),
        None => println!("  last planned: never"),
    }
    if meal.image.is_some() {
        println!("  image: yes");
    }
    if !meal.attachments.is_empty() {
        println!("  attachments: {}", meal.attachments.len());
    }
    Ok(())
}

pub(crate) fn cmd_meal_remove(mirror: &mut Mirror<Database>, name: &str) -> Result<()> {
    let id = resolve_meal(mirror, name)?;
    mirror.remove_meal(id)?;
    println!("Removed meal '{name}'");
    Ok(())
}

pub(crate) fn cmd_meal_set(
    mirror: &mut Mirror<Database>,
    meal_name: &str,
    category: &str,
    value: &str,
) -> Result<()> {
    let meal_id = resolve_meal(mirror, meal_name)?;
    let Some(found) = mirror.category_by_name(category) else {
        bail!("No category named '{category}'");
    };
    let category_id = found.id;
    let Some(found) = mirror.value_by_name(category_id, value) else {
        bail!("No value named '{value}' in category '{category}'");
    };
    let value_id = found.id;

    let Some(meal) = mirror.meal(meal_id) else {
        bail!("No meal named '{meal_name}'");
    };
    let mut meal = meal.clone();
    meal.assignments.insert(category_id, value_id);
    mirror.save_meal(meal)?;
    println!("Set {meal_name}: {category} = {value}");
    Ok(())
}

pub(crate) fn cmd_meal_unset(
    mirror: &mut Mirror<Database>,
    meal_name: &str,
    category: &str,
) -> Result<()> {
    let meal_id = resolve_meal(mirror, meal_name)?;
    let Some(found) = mirror.category_by_name(category) else {
        bail!("No category named '{category}'");
    };
    let category_id = found.id;

    let Some(meal) = mirror.meal(meal_id) else {
        bail!("No meal named '{meal_name}'");
    };
    let mut meal = meal.clone();
    if meal.assignments.remove(&category_id).is_none() {
        bail!("'{meal_name}' has no {category} assignment");
    }
    mirror.save_meal(meal)?;
    println!("Cleared {category} on {meal_name}");
    Ok(())
}

pub(crate) fn cmd_meal_attach(
    mirror: &mut Mirror<Database>,
    meal_name: &str,
    image: &Path,
) -> Result<()> {
    let meal_id = resolve_meal(mirror, meal_name)?;
    let bytes = std::fs::read(image)
        .with_context(|| format!("Failed to read image: {}", image.display()))?;

    let Some(meal) = mirror.meal(meal_id) else {
        bail!("No meal named '{meal_name}'");
    };
    let mut meal = meal.clone();
    meal.attachments
        .push(Attachment::new(meal.attachments.len() as i64, bytes));
    meal.renumber_attachments();
    mirror.save_meal(meal)?;
    println!("Attached {} to '{meal_name}'", image.display());
    Ok(())
}
