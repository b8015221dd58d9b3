use anyhow::{Result, bail};
use serde::Serialize;
use tabled::{Table, Tabled, settings::Style};

use rota_core::day::DayNumber;
use rota_core::db::Database;
use rota_core::mirror::Mirror;

use super::helpers::{describe_assignments, format_day, parse_day, truncate};

pub(crate) fn cmd_plan_set(
    mirror: &mut Mirror<Database>,
    date: &str,
    meal_name: &str,
    slot: i64,
) -> Result<()> {
    let day = parse_day(Some(date.to_string()))?;
    let Some(meal) = mirror.meal_by_name(meal_name) else {
        bail!("No meal named '{meal_name}'");
    };
    let meal_id = meal.id;
    mirror.assign_meal(day, slot, meal_id)?;
    println!("Planned '{meal_name}' for {}", format_day(day));
    Ok(())
}

pub(crate) fn cmd_plan_show(
    mirror: &Mirror<Database>,
    date: Option<String>,
    days: i64,
    json: bool,
) -> Result<()> {
    let start = parse_day(date)?;

    #[derive(Serialize)]
    struct PlanEntry {
        date: String,
        day: i64,
        slot: i64,
        meal: String,
    }

    let mut entries = Vec::new();
    for offset in 0..days.max(1) {
        let day = start + offset;
        for allocation in mirror.allocations_ordered() {
            if allocation.day == day {
                let meal = mirror
                    .meal(allocation.meal_id)
                    .map_or("?", |m| m.name.as_str());
                entries.push(PlanEntry {
                    date: format_day(day),
                    day: day.value(),
                    slot: allocation.slot,
                    meal: meal.to_string(),
                });
            }
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        eprintln!("Nothing planned. Plan a meal with: rota plan set <date> <meal>");
        return Ok(());
    }

    #[derive(Tabled)]
    struct PlanRow {
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "Slot")]
        slot: i64,
        #[tabled(rename = "Meal")]
        meal: String,
    }

    let rows: Vec<PlanRow> = entries
        .iter()
        .map(|e| PlanRow {
            date: e.date.clone(),
            slot: e.slot,
            meal: e.meal.clone(),
        })
        .collect();

    println!("{}", Table::new(&rows).with(Style::rounded()));
    Ok(())
}

pub(crate) fn cmd_plan_clear(mirror: &mut Mirror<Database>, date: &str, slot: i64) -> Result<()> {
    let day = parse_day(Some(date.to_string()))?;
    if mirror.allocation(day, slot).is_none() {
        bail!("Nothing planned for {} slot {slot}", format_day(day));
    }
    mirror.remove_allocation(day, slot)?;
    println!("Cleared {} slot {slot}", format_day(day));
    Ok(())
}

pub(crate) fn cmd_suggest(
    mirror: &Mirror<Database>,
    date: Option<String>,
    limit: usize,
    json: bool,
) -> Result<()> {
    let day = parse_day(date)?;
    let ranked = mirror.sorted_meals(Some(day));
    let top = &ranked[..ranked.len().min(limit)];

    if json {
        println!("{}", serde_json::to_string_pretty(&top)?);
        return Ok(());
    }

    if top.is_empty() {
        eprintln!("No meals in the catalogue. Add one with: rota meal add <name>");
        return Ok(());
    }

    #[derive(Tabled)]
    struct SuggestRow {
        #[tabled(rename = "#")]
        rank: usize,
        #[tabled(rename = "Meal")]
        name: String,
        #[tabled(rename = "Attributes")]
        attributes: String,
        #[tabled(rename = "Last planned")]
        last_used: String,
    }

    let rows: Vec<SuggestRow> = top
        .iter()
        .enumerate()
        .map(|(i, meal)| SuggestRow {
            rank: i + 1,
            name: truncate(&meal.name, 35),
            attributes: truncate(&describe_assignments(mirror, meal), 45),
            last_used: meal
                .last_used
                .map_or_else(|| "never".to_string(), |ts| ts.format("%Y-%m-%d").to_string()),
        })
        .collect();

    println!("Suggestions for {}:", format_day(day));
    println!("{}", Table::new(&rows).with(Style::rounded()));
    Ok(())
}

pub(crate) fn cmd_history(mirror: &Mirror<Database>, days: i64, json: bool) -> Result<()> {
    let cutoff = DayNumber::today() - days.max(0);
    let allocations: Vec<_> = mirror
        .allocations_ordered()
        .into_iter()
        .filter(|a| a.day >= cutoff && a.day <= DayNumber::today())
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&allocations)?);
        return Ok(());
    }

    if allocations.is_empty() {
        eprintln!("Nothing planned in the last {days} days");
        return Ok(());
    }

    #[derive(Tabled)]
    struct HistoryRow {
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "Slot")]
        slot: i64,
        #[tabled(rename = "Meal")]
        meal: String,
    }

    let rows: Vec<HistoryRow> = allocations
        .iter()
        .map(|a| HistoryRow {
            date: format_day(a.day),
            slot: a.slot,
            meal: mirror
                .meal(a.meal_id)
                .map_or("?".to_string(), |m| m.name.clone()),
        })
        .collect();

    println!("{}", Table::new(&rows).with(Style::rounded()));
    Ok(())
}
