//! Meal ranking: orders meals most-suitable-first for a target day, or by
//! pure attribute frequency when no day is given.
//!
//! The idea is variety: a meal whose attributes (carb, protein, cuisine)
//! have not appeared recently should surface, weighted by how often each
//! attribute is supposed to occur. Rare attributes resurface sooner
//! relative to their low frequency; frequent ones tolerate repetition.

use std::collections::HashMap;

use uuid::Uuid;

use crate::day::{DayNumber, MAX_RETENTION_DAYS};
use crate::models::{Allocation, Category, CategoryValue, Meal};

/// Weighting for a value that never appears in the loaded history:
/// maximally overdue, scaled by how often it is supposed to occur.
fn never_allocated_weight(value: &CategoryValue) -> i64 {
    value.frequency.weight() * (MAX_RETENTION_DAYS + 1)
}

/// Total order over all meals, most suitable first.
///
/// With a `target` day the order combines per-value recency weightings and
/// the meal's own distance from the target; without one it is a pure
/// frequency ordering for generic display. Ties on every numeric component
/// break alphabetically by meal name.
#[must_use]
pub fn sorted_meals<'a>(
    categories: &HashMap<Uuid, Category>,
    values: &HashMap<Uuid, HashMap<Uuid, CategoryValue>>,
    meals: &'a HashMap<Uuid, Meal>,
    allocations: &HashMap<(DayNumber, i64), Allocation>,
    target: Option<DayNumber>,
) -> Vec<&'a Meal> {
    // Category order decides priority when weights tie: importance first,
    // name as tiebreak.
    let mut category_order: Vec<&Category> = categories.values().collect();
    category_order.sort_by(|a, b| {
        a.importance
            .cmp(&b.importance)
            .then_with(|| a.name.cmp(&b.name))
    });

    // Allocation history, most recent first.
    let mut history: Vec<&Allocation> = allocations.values().collect();
    history.sort_by(|a, b| b.day.cmp(&a.day).then_with(|| b.slot.cmp(&a.slot)));

    let mut weights: HashMap<(Uuid, Uuid), i64> = HashMap::new();
    for category in &category_order {
        let Some(category_values) = values.get(&category.id) else {
            continue;
        };
        for value in category_values.values() {
            let weight = match target {
                Some(day) => value_weighting(category.id, value, day, &history, meals),
                None => value.frequency.weight(),
            };
            weights.insert((category.id, value.id), weight);
        }
    }

    let mut ranked: Vec<(Vec<i64>, &Meal)> = meals
        .values()
        .map(|meal| {
            let mut key = Vec::with_capacity(category_order.len() + 1);
            for category in &category_order {
                let weight = meal
                    .assignments
                    .get(&category.id)
                    .and_then(|value_id| weights.get(&(category.id, *value_id)))
                    .copied()
                    .unwrap_or(0);
                key.push(weight);
            }
            if let Some(day) = target {
                key.push(meal_distance(meal.id, day, &history));
            }
            (key, meal)
        })
        .collect();

    // Higher weighting sorts first (more overdue); the name field alone
    // reverses direction so full ties come out alphabetically.
    ranked.sort_by(|(key_a, meal_a), (key_b, meal_b)| {
        key_b.cmp(key_a).then_with(|| meal_a.name.cmp(&meal_b.name))
    });
    ranked.into_iter().map(|(_, meal)| meal).collect()
}

/// Recency/frequency weighting for one category value against a target day.
///
/// Scans the reverse-chronological history for allocations whose meal
/// carries this exact value, keeping the minimum `distance * frequency`.
/// The scan stops once a minimum has been recorded and the current
/// allocation lies strictly before the target day — that captures the
/// nearest occurrence straddling the target without walking the full
/// history. The stopping rule is behavior-determining; do not "optimize" it.
fn value_weighting(
    category_id: Uuid,
    value: &CategoryValue,
    target: DayNumber,
    history: &[&Allocation],
    meals: &HashMap<Uuid, Meal>,
) -> i64 {
    let frequency = value.frequency.weight();
    let mut best: Option<i64> = None;
    for allocation in history {
        let carries_value = meals
            .get(&allocation.meal_id)
            .is_some_and(|meal| meal.assignments.get(&category_id) == Some(&value.id));
        if carries_value {
            let distance = allocation.day.distance(target) * frequency;
            best = Some(best.map_or(distance, |current| current.min(distance)));
        }
        if best.is_some() && allocation.day < target {
            break;
        }
    }
    best.unwrap_or_else(|| never_allocated_weight(value))
}

/// Distance from the target day of the meal's most recent allocation, or
/// the maximally-overdue default when it was never allocated.
fn meal_distance(meal_id: Uuid, target: DayNumber, history: &[&Allocation]) -> i64 {
    history
        .iter()
        .find(|allocation| allocation.meal_id == meal_id)
        .map_or(MAX_RETENTION_DAYS + 1, |allocation| {
            allocation.day.distance(target)
        })
}
