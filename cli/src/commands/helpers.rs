use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};

use rota_core::day::DayNumber;
use rota_core::db::EntityStore;
use rota_core::mirror::Mirror;
use rota_core::models::Meal;

pub(crate) fn parse_date(date_str: Option<String>) -> Result<NaiveDate> {
    match date_str {
        None => Ok(Local::now().date_naive()),
        Some(s) => match s.as_str() {
            "today" => Ok(Local::now().date_naive()),
            "yesterday" => Ok(Local::now().date_naive() - chrono::Duration::days(1)),
            "tomorrow" => Ok(Local::now().date_naive() + chrono::Duration::days(1)),
            _ => NaiveDate::parse_from_str(&s, "%Y-%m-%d").with_context(|| {
                format!("Invalid date '{s}'. Use YYYY-MM-DD or today/yesterday/tomorrow")
            }),
        },
    }
}

pub(crate) fn parse_day(date_str: Option<String>) -> Result<DayNumber> {
    Ok(DayNumber::from_date(parse_date(date_str)?))
}

/// "2024-06-15 (Sat)", or the raw day number when out of calendar range.
pub(crate) fn format_day(day: DayNumber) -> String {
    day.to_date().map_or_else(
        || format!("day {}", day.value()),
        |date| date.format("%Y-%m-%d (%a)").to_string(),
    )
}

/// "Carbs: Pasta, Cuisine: Thai" for a meal's assignments.
pub(crate) fn describe_assignments<S: EntityStore>(mirror: &Mirror<S>, meal: &Meal) -> String {
    let mut parts: Vec<String> = Vec::new();
    for category in mirror.categories_ordered() {
        if let Some(value_id) = meal.assignments.get(&category.id) {
            let value = mirror
                .value(category.id, *value_id)
                .map_or("?", |v| v.name.as_str());
            parts.push(format!("{}: {value}", category.name));
        }
    }
    parts.join(", ")
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}
