use anyhow::{Result, bail};
use tabled::{Table, Tabled, settings::Style};

use rota_core::db::Database;
use rota_core::mirror::Mirror;
use rota_core::models::{Category, CategoryValue, Frequency, Importance};
use uuid::Uuid;

fn resolve_category(mirror: &Mirror<Database>, name: &str) -> Result<Uuid> {
    match mirror.category_by_name(name) {
        Some(category) => Ok(category.id),
        None => bail!("No category named '{name}'"),
    }
}

pub(crate) fn cmd_category_add(
    mirror: &mut Mirror<Database>,
    name: &str,
    importance: &str,
) -> Result<()> {
    let importance = Importance::parse(importance)?;
    mirror.validate_category_name(name, None)?;
    mirror.insert_category(Category::new(name.trim(), importance))?;
    println!("Added category '{}' ({importance})", name.trim());
    Ok(())
}

pub(crate) fn cmd_category_list(mirror: &Mirror<Database>, json: bool) -> Result<()> {
    let categories = mirror.categories_ordered();

    if json {
        println!("{}", serde_json::to_string_pretty(&categories)?);
        return Ok(());
    }

    if categories.is_empty() {
        eprintln!("No categories yet. Add one with: rota category add <name>");
        return Ok(());
    }

    #[derive(Tabled)]
    struct CategoryRow {
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Importance")]
        importance: String,
        #[tabled(rename = "Values")]
        values: usize,
    }

    let rows: Vec<CategoryRow> = categories
        .iter()
        .map(|c| CategoryRow {
            name: c.name.clone(),
            importance: c.importance.to_string(),
            values: mirror.values_of(c.id).len(),
        })
        .collect();

    println!("{}", Table::new(&rows).with(Style::rounded()));
    Ok(())
}

pub(crate) fn cmd_category_remove(mirror: &mut Mirror<Database>, name: &str) -> Result<()> {
    let id = resolve_category(mirror, name)?;
    mirror.remove_category(id)?;
    println!("Removed category '{name}' and its values");
    Ok(())
}

pub(crate) fn cmd_value_add(
    mirror: &mut Mirror<Database>,
    category: &str,
    name: &str,
    frequency: &str,
) -> Result<()> {
    let frequency = Frequency::parse(frequency)?;
    let category_id = resolve_category(mirror, category)?;
    mirror.validate_value_name(category_id, name, None)?;
    mirror.insert_category_value(CategoryValue::new(category_id, name.trim(), frequency))?;
    println!("Added '{}' to {category} ({frequency})", name.trim());
    Ok(())
}

pub(crate) fn cmd_value_remove(
    mirror: &mut Mirror<Database>,
    category: &str,
    name: &str,
) -> Result<()> {
    let category_id = resolve_category(mirror, category)?;
    let Some(value) = mirror.value_by_name(category_id, name) else {
        bail!("No value named '{name}' in category '{category}'");
    };
    let value_id = value.id;
    mirror.remove_category_value(category_id, value_id)?;
    println!("Removed '{name}' from {category}");
    Ok(())
}

pub(crate) fn cmd_value_list(
    mirror: &Mirror<Database>,
    category: &str,
    json: bool,
) -> Result<()> {
    let category_id = resolve_category(mirror, category)?;
    let values = mirror.values_of(category_id);

    if json {
        println!("{}", serde_json::to_string_pretty(&values)?);
        return Ok(());
    }

    if values.is_empty() {
        eprintln!("No values in '{category}' yet");
        return Ok(());
    }

    #[derive(Tabled)]
    struct ValueRow {
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Frequency")]
        frequency: String,
    }

    let rows: Vec<ValueRow> = values
        .iter()
        .map(|v| ValueRow {
            name: v.name.clone(),
            frequency: v.frequency.to_string(),
        })
        .collect();

    println!("{}", Table::new(&rows).with(Style::rounded()));
    Ok(())
}
