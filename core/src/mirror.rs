//! The in-memory mirror: five collections reflecting the entity store's
//! current content, with every mutation mediated so the store and the
//! in-memory view never diverge outside a single atomic operation.
//!
//! Exactly one process instance may mutate the store's local replica; all
//! operations here are synchronous and there is no internal locking. The
//! only asynchronous boundary is the remote-change counter.

use std::collections::HashMap;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::day::{DayNumber, MAX_RETENTION_DAYS};
use crate::db::EntityStore;
use crate::dedup::resolve_duplicates;
use crate::models::{
    Allocation, Attachment, Category, CategoryValue, EXPORT_VERSION, ExportData, ImportSummary,
    Meal,
};
use crate::ranking;
use crate::remote::RemoteChangeSignal;

/// Bound on load() re-runs when remote changes keep landing mid-load.
/// After this many attempts the last snapshot is kept best-effort; the
/// next debounce tick triggers another reload.
pub const MAX_LOAD_ATTEMPTS: u32 = 5;

pub struct Mirror<S: EntityStore> {
    store: S,
    signal: RemoteChangeSignal,
    categories: HashMap<Uuid, Category>,
    values: HashMap<Uuid, HashMap<Uuid, CategoryValue>>,
    meals: HashMap<Uuid, Meal>,
    allocations: HashMap<(DayNumber, i64), Allocation>,
    loaded_counter: u64,
}

impl<S: EntityStore> Mirror<S> {
    pub fn new(store: S, signal: RemoteChangeSignal) -> Self {
        Mirror {
            store,
            signal,
            categories: HashMap::new(),
            values: HashMap::new(),
            meals: HashMap::new(),
            allocations: HashMap::new(),
            loaded_counter: 0,
        }
    }

    /// Full rebuild from the store.
    ///
    /// Captures the remote-change counter at entry and re-runs when the
    /// counter advanced mid-load, so the committed state reflects at least
    /// the store as of the load's start. Re-runs are bounded by
    /// [`MAX_LOAD_ATTEMPTS`].
    pub fn load(&mut self) -> Result<()> {
        for attempt in 1..=MAX_LOAD_ATTEMPTS {
            let entry_counter = self.signal.count();
            self.load_snapshot()?;
            self.loaded_counter = entry_counter;
            if self.signal.count() == entry_counter {
                return Ok(());
            }
            debug!(attempt, "remote change arrived mid-load, rebuilding");
        }
        warn!("store kept changing during load, keeping best-effort snapshot");
        Ok(())
    }

    fn load_snapshot(&mut self) -> Result<()> {
        let mut categories = self.store.fetch_categories()?;
        let mut values = self.store.fetch_category_values()?;
        let mut meals = self.store.fetch_meals()?;
        let mut assignments = self.store.fetch_assignments()?;
        let mut attachments = self.store.fetch_attachments()?;
        let min_day = DayNumber::today() - MAX_RETENTION_DAYS;
        let mut allocations = self.store.fetch_allocations(min_day)?;

        // Duplicate resolution wants key-adjacent input; map construction
        // below does not care about order, so re-sort each set by its
        // natural key. Any collision outside allocations means the store
        // broke an invariant nothing here can repair.
        categories.sort_by(|a, b| a.name.cmp(&b.name));
        resolve_duplicates(&mut categories, |c| c.name.clone(), None)
            .context("duplicate category names in store")?;

        values.sort_by(|a, b| (a.category_id, &a.name).cmp(&(b.category_id, &b.name)));
        resolve_duplicates(&mut values, |v| (v.category_id, v.name.clone()), None)
            .context("duplicate category value names in store")?;

        meals.sort_by(|a, b| a.name.cmp(&b.name));
        resolve_duplicates(&mut meals, |m| m.name.clone(), None)
            .context("duplicate meal names in store")?;

        assignments.sort_by_key(|a| (a.meal_id, a.category_id));
        resolve_duplicates(&mut assignments, |a| (a.meal_id, a.category_id), None)
            .context("duplicate category assignments in store")?;

        attachments.sort_by_key(|a| a.id);
        resolve_duplicates(&mut attachments, |a| a.id, None)
            .context("duplicate attachments in store")?;

        // A replica merge can land conflicting (day, slot) rows. The fetch
        // order (day, slot, allocated_at) already puts the record to keep
        // last; the earlier rows get deleted from the store.
        let store = &self.store;
        let mut delete_duplicate = |allocation: &Allocation| {
            debug!(
                day = allocation.day.value(),
                slot = allocation.slot,
                "deleting duplicate allocation"
            );
            store.delete_allocation(allocation.id)
        };
        resolve_duplicates(
            &mut allocations,
            |a| (a.day, a.slot),
            Some(&mut delete_duplicate),
        )?;

        let mut category_map = HashMap::with_capacity(categories.len());
        for category in categories {
            category_map.insert(category.id, category);
        }

        let mut value_map: HashMap<Uuid, HashMap<Uuid, CategoryValue>> = HashMap::new();
        for value in values {
            if !category_map.contains_key(&value.category_id) {
                warn!(value = %value.name, "skipping value of unknown category");
                continue;
            }
            value_map
                .entry(value.category_id)
                .or_default()
                .insert(value.id, value);
        }

        let mut meal_map = HashMap::with_capacity(meals.len());
        for meal in meals {
            meal_map.insert(meal.id, meal);
        }

        for row in assignments {
            let Some(meal) = meal_map.get_mut(&row.meal_id) else {
                warn!("skipping assignment of unknown meal");
                continue;
            };
            let known_value = value_map
                .get(&row.category_id)
                .is_some_and(|vals| vals.contains_key(&row.value_id));
            if !known_value {
                warn!(meal = %meal.name, "skipping assignment to unknown value");
                continue;
            }
            meal.assignments.insert(row.category_id, row.value_id);
        }

        for row in attachments {
            let Some(meal) = meal_map.get_mut(&row.meal_id) else {
                warn!("skipping attachment of unknown meal");
                continue;
            };
            meal.attachments.push(Attachment {
                id: row.id,
                sequence: row.sequence,
                image: row.image,
            });
        }
        for meal in meal_map.values_mut() {
            meal.attachments.sort_by_key(|a| a.sequence);
        }

        let mut allocation_map = HashMap::with_capacity(allocations.len());
        for allocation in allocations {
            allocation_map.insert((allocation.day, allocation.slot), allocation);
        }

        self.categories = category_map;
        self.values = value_map;
        self.meals = meal_map;
        self.allocations = allocation_map;
        Ok(())
    }

    // --- Categories ---

    pub fn insert_category(&mut self, mut category: Category) -> Result<()> {
        assert!(
            !category.persisted,
            "insert_category: category is already linked to the store"
        );
        assert!(
            !self.categories.contains_key(&category.id),
            "insert_category: category id is already mirrored"
        );
        self.store.insert_category(&category)?;
        category.persisted = true;
        self.categories.insert(category.id, category);
        Ok(())
    }

    /// No-op when the caller's object matches the last-synced snapshot.
    pub fn save_category(&mut self, category: Category) -> Result<()> {
        assert!(
            category.persisted,
            "save_category: category was never inserted"
        );
        let Some(current) = self.categories.get(&category.id) else {
            panic!("save_category: category {} is not mirrored", category.id);
        };
        if *current == category {
            return Ok(());
        }
        self.store.update_category(&category)?;
        self.categories.insert(category.id, category);
        Ok(())
    }

    /// Cascade: remove the category's values (each detaching itself from
    /// meals using it), clear remaining direct assignments, then delete the
    /// category record.
    pub fn remove_category(&mut self, id: Uuid) -> Result<()> {
        assert!(
            self.categories.contains_key(&id),
            "remove_category: category {id} is not mirrored"
        );
        let value_ids: Vec<Uuid> = self
            .values
            .get(&id)
            .map(|vals| vals.keys().copied().collect())
            .unwrap_or_default();
        for value_id in value_ids {
            self.remove_category_value(id, value_id)?;
        }

        let meal_ids: Vec<Uuid> = self
            .meals
            .values()
            .filter(|meal| meal.assignments.contains_key(&id))
            .map(|meal| meal.id)
            .collect();
        for meal_id in meal_ids {
            let Some(meal) = self.meals.get(&meal_id) else {
                continue;
            };
            let mut meal = meal.clone();
            meal.assignments.remove(&id);
            self.save_meal(meal)?;
        }

        self.store.delete_category(id)?;
        self.categories.remove(&id);
        self.values.remove(&id);
        Ok(())
    }

    // --- Category values ---

    pub fn insert_category_value(&mut self, mut value: CategoryValue) -> Result<()> {
        assert!(
            !value.persisted,
            "insert_category_value: value is already linked to the store"
        );
        assert!(
            self.categories.contains_key(&value.category_id),
            "insert_category_value: owning category is not mirrored"
        );
        let exists = self
            .values
            .get(&value.category_id)
            .is_some_and(|vals| vals.contains_key(&value.id));
        assert!(!exists, "insert_category_value: value id is already mirrored");
        self.store.insert_category_value(&value)?;
        value.persisted = true;
        self.values
            .entry(value.category_id)
            .or_default()
            .insert(value.id, value);
        Ok(())
    }

    pub fn save_category_value(&mut self, value: CategoryValue) -> Result<()> {
        assert!(
            value.persisted,
            "save_category_value: value was never inserted"
        );
        let Some(current) = self
            .values
            .get(&value.category_id)
            .and_then(|vals| vals.get(&value.id))
        else {
            panic!("save_category_value: value {} is not mirrored", value.id);
        };
        if *current == value {
            return Ok(());
        }
        self.store.update_category_value(&value)?;
        self.values
            .entry(value.category_id)
            .or_default()
            .insert(value.id, value);
        Ok(())
    }

    /// Detaches the value from every meal carrying it (persisting each),
    /// then deletes the value record.
    pub fn remove_category_value(&mut self, category_id: Uuid, value_id: Uuid) -> Result<()> {
        let exists = self
            .values
            .get(&category_id)
            .is_some_and(|vals| vals.contains_key(&value_id));
        assert!(
            exists,
            "remove_category_value: value {value_id} is not mirrored"
        );

        let meal_ids: Vec<Uuid> = self
            .meals
            .values()
            .filter(|meal| meal.assignments.get(&category_id) == Some(&value_id))
            .map(|meal| meal.id)
            .collect();
        for meal_id in meal_ids {
            let Some(meal) = self.meals.get(&meal_id) else {
                continue;
            };
            let mut meal = meal.clone();
            meal.assignments.remove(&category_id);
            self.save_meal(meal)?;
        }

        self.store.delete_category_value(value_id)?;
        if let Some(vals) = self.values.get_mut(&category_id) {
            vals.remove(&value_id);
        }
        Ok(())
    }

    // --- Meals ---

    pub fn insert_meal(&mut self, mut meal: Meal) -> Result<()> {
        assert!(
            !meal.persisted,
            "insert_meal: meal is already linked to the store"
        );
        assert!(
            !self.meals.contains_key(&meal.id),
            "insert_meal: meal id is already mirrored"
        );
        self.store.insert_meal(&meal)?;
        meal.persisted = true;
        self.meals.insert(meal.id, meal);
        Ok(())
    }

    /// No-op when every persisted field plus the full assignment and
    /// attachment sets match the last-synced snapshot — avoids redundant
    /// commits and redundant remote-sync traffic.
    pub fn save_meal(&mut self, meal: Meal) -> Result<()> {
        assert!(meal.persisted, "save_meal: meal was never inserted");
        let Some(current) = self.meals.get(&meal.id) else {
            panic!("save_meal: meal {} is not mirrored", meal.id);
        };
        if *current == meal {
            return Ok(());
        }
        self.store.update_meal(&meal)?;
        self.meals.insert(meal.id, meal);
        Ok(())
    }

    /// Cascade: remove allocations referencing the meal, then its
    /// assignments, attachments, and record.
    pub fn remove_meal(&mut self, id: Uuid) -> Result<()> {
        assert!(
            self.meals.contains_key(&id),
            "remove_meal: meal {id} is not mirrored"
        );
        let keys: Vec<(DayNumber, i64)> = self
            .allocations
            .iter()
            .filter(|(_, allocation)| allocation.meal_id == id)
            .map(|(key, _)| *key)
            .collect();
        for (day, slot) in keys {
            self.remove_allocation(day, slot)?;
        }
        self.store.delete_meal(id)?;
        self.meals.remove(&id);
        Ok(())
    }

    // --- Allocations ---

    pub fn insert_allocation(&mut self, mut allocation: Allocation) -> Result<()> {
        assert!(
            !allocation.persisted,
            "insert_allocation: allocation is already linked to the store"
        );
        assert!(
            !self
                .allocations
                .contains_key(&(allocation.day, allocation.slot)),
            "insert_allocation: slot is already allocated"
        );
        self.store.insert_allocation(&allocation)?;
        allocation.persisted = true;
        self.allocations
            .insert((allocation.day, allocation.slot), allocation);
        Ok(())
    }

    /// Updating day, slot, or meal refreshes `allocated_at`; the map entry
    /// is re-keyed when day/slot change.
    pub fn save_allocation(&mut self, mut allocation: Allocation) -> Result<()> {
        assert!(
            allocation.persisted,
            "save_allocation: allocation was never inserted"
        );
        let Some(previous_key) = self
            .allocations
            .iter()
            .find(|(_, existing)| existing.id == allocation.id)
            .map(|(key, _)| *key)
        else {
            panic!("save_allocation: allocation {} is not mirrored", allocation.id);
        };
        let new_key = (allocation.day, allocation.slot);
        if new_key != previous_key {
            assert!(
                !self.allocations.contains_key(&new_key),
                "save_allocation: target slot is already allocated"
            );
        }
        if self.allocations.get(&previous_key) == Some(&allocation) {
            return Ok(());
        }
        allocation.allocated_at = Utc::now();
        self.store.update_allocation(&allocation)?;
        self.allocations.remove(&previous_key);
        self.allocations.insert(new_key, allocation);
        Ok(())
    }

    pub fn remove_allocation(&mut self, day: DayNumber, slot: i64) -> Result<()> {
        let Some(allocation) = self.allocations.get(&(day, slot)) else {
            panic!(
                "remove_allocation: nothing allocated at day {} slot {slot}",
                day.value()
            );
        };
        self.store.delete_allocation(allocation.id)?;
        self.allocations.remove(&(day, slot));
        Ok(())
    }

    /// Point `(day, slot)` at a meal — inserting or redirecting the
    /// allocation — and touch the meal's last-used timestamp.
    pub fn assign_meal(&mut self, day: DayNumber, slot: i64, meal_id: Uuid) -> Result<()> {
        assert!(
            self.meals.contains_key(&meal_id),
            "assign_meal: meal {meal_id} is not mirrored"
        );
        match self.allocations.get(&(day, slot)) {
            Some(existing) => {
                let mut updated = existing.clone();
                updated.meal_id = meal_id;
                self.save_allocation(updated)?;
            }
            None => self.insert_allocation(Allocation::new(day, slot, meal_id))?,
        }
        if let Some(meal) = self.meals.get(&meal_id) {
            let mut meal = meal.clone();
            meal.last_used = Some(Utc::now());
            self.save_meal(meal)?;
        }
        Ok(())
    }

    // --- Validation (gates saves at the edit surface) ---

    pub fn validate_category_name(&self, name: &str, editing: Option<Uuid>) -> Result<()> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            bail!("Category name must not be empty");
        }
        if self
            .categories
            .values()
            .any(|c| c.name == trimmed && Some(c.id) != editing)
        {
            bail!("A category named '{trimmed}' already exists");
        }
        Ok(())
    }

    pub fn validate_value_name(
        &self,
        category_id: Uuid,
        name: &str,
        editing: Option<Uuid>,
    ) -> Result<()> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            bail!("Value name must not be empty");
        }
        let collision = self.values.get(&category_id).is_some_and(|vals| {
            vals.values()
                .any(|v| v.name == trimmed && Some(v.id) != editing)
        });
        if collision {
            bail!("A value named '{trimmed}' already exists in this category");
        }
        Ok(())
    }

    pub fn validate_meal_name(&self, name: &str, editing: Option<Uuid>) -> Result<()> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            bail!("Meal name must not be empty");
        }
        if self
            .meals
            .values()
            .any(|m| m.name == trimmed && Some(m.id) != editing)
        {
            bail!("A meal named '{trimmed}' already exists");
        }
        Ok(())
    }

    // --- Ranking ---

    /// Total order over all meals, most suitable first. See the ranking
    /// module for the weighting rules.
    #[must_use]
    pub fn sorted_meals(&self, day: Option<DayNumber>) -> Vec<&Meal> {
        ranking::sorted_meals(
            &self.categories,
            &self.values,
            &self.meals,
            &self.allocations,
            day,
        )
    }

    // --- Reload bookkeeping ---

    /// Remote-change counter recorded when the last load finished.
    #[must_use]
    pub fn loaded_counter(&self) -> u64 {
        self.loaded_counter
    }

    /// True when a debouncer-published counter has moved past the state
    /// this mirror was loaded from.
    #[must_use]
    pub fn needs_reload(&self, published: u64) -> bool {
        published > self.loaded_counter
    }

    // --- Read access ---

    #[must_use]
    pub fn category(&self, id: Uuid) -> Option<&Category> {
        self.categories.get(&id)
    }

    #[must_use]
    pub fn category_by_name(&self, name: &str) -> Option<&Category> {
        self.categories.values().find(|c| c.name == name)
    }

    /// Categories in ranking order: (importance, name).
    #[must_use]
    pub fn categories_ordered(&self) -> Vec<&Category> {
        let mut out: Vec<&Category> = self.categories.values().collect();
        out.sort_by(|a, b| {
            a.importance
                .cmp(&b.importance)
                .then_with(|| a.name.cmp(&b.name))
        });
        out
    }

    #[must_use]
    pub fn value(&self, category_id: Uuid, value_id: Uuid) -> Option<&CategoryValue> {
        self.values
            .get(&category_id)
            .and_then(|vals| vals.get(&value_id))
    }

    #[must_use]
    pub fn value_by_name(&self, category_id: Uuid, name: &str) -> Option<&CategoryValue> {
        self.values
            .get(&category_id)
            .and_then(|vals| vals.values().find(|v| v.name == name))
    }

    /// A category's values, most frequent first.
    #[must_use]
    pub fn values_of(&self, category_id: Uuid) -> Vec<&CategoryValue> {
        let mut out: Vec<&CategoryValue> = self
            .values
            .get(&category_id)
            .map(|vals| vals.values().collect())
            .unwrap_or_default();
        out.sort_by(|a, b| {
            b.frequency
                .cmp(&a.frequency)
                .then_with(|| a.name.cmp(&b.name))
        });
        out
    }

    #[must_use]
    pub fn meal(&self, id: Uuid) -> Option<&Meal> {
        self.meals.get(&id)
    }

    #[must_use]
    pub fn meal_by_name(&self, name: &str) -> Option<&Meal> {
        self.meals.values().find(|m| m.name == name)
    }

    #[must_use]
    pub fn meal_count(&self) -> usize {
        self.meals.len()
    }

    #[must_use]
    pub fn allocation(&self, day: DayNumber, slot: i64) -> Option<&Allocation> {
        self.allocations.get(&(day, slot))
    }

    /// Loaded allocations ordered by (day, slot).
    #[must_use]
    pub fn allocations_ordered(&self) -> Vec<&Allocation> {
        let mut out: Vec<&Allocation> = self.allocations.values().collect();
        out.sort_by_key(|a| (a.day, a.slot));
        out
    }

    // --- Backup export / import ---

    #[must_use]
    pub fn export_all(&self) -> ExportData {
        let mut categories: Vec<Category> = self.categories.values().cloned().collect();
        categories.sort_by(|a, b| a.name.cmp(&b.name));
        let mut values: Vec<CategoryValue> = self
            .values
            .values()
            .flat_map(|vals| vals.values().cloned())
            .collect();
        values.sort_by(|a, b| (a.category_id, &a.name).cmp(&(b.category_id, &b.name)));
        let mut meals: Vec<Meal> = self.meals.values().cloned().collect();
        meals.sort_by(|a, b| a.name.cmp(&b.name));
        let mut allocations: Vec<Allocation> = self.allocations.values().cloned().collect();
        allocations.sort_by_key(|a| (a.day, a.slot));

        ExportData {
            version: EXPORT_VERSION,
            exported_at: Utc::now().to_rfc3339(),
            categories,
            values,
            meals,
            allocations,
        }
    }

    /// Merge a backup into this mirror, inserting records absent from it.
    ///
    /// Matching is by natural key (names, day/slot); ids from the backup
    /// are remapped onto local ids where a record already exists, so
    /// re-importing the same file is a no-op.
    pub fn import_all(&mut self, data: &ExportData) -> Result<ImportSummary> {
        if data.version > EXPORT_VERSION {
            bail!("Unsupported export version {}", data.version);
        }
        let mut summary = ImportSummary::default();
        let mut category_ids: HashMap<Uuid, Uuid> = HashMap::new();
        let mut value_ids: HashMap<Uuid, Uuid> = HashMap::new();
        let mut meal_ids: HashMap<Uuid, Uuid> = HashMap::new();

        for category in &data.categories {
            if let Some(existing) = self.category_by_name(&category.name) {
                category_ids.insert(category.id, existing.id);
                summary.skipped_existing += 1;
                continue;
            }
            let mut incoming = category.clone();
            incoming.persisted = false;
            category_ids.insert(incoming.id, incoming.id);
            self.insert_category(incoming)?;
            summary.categories_imported += 1;
        }

        for value in &data.values {
            let local_category = category_ids
                .get(&value.category_id)
                .copied()
                .or_else(|| {
                    self.categories
                        .contains_key(&value.category_id)
                        .then_some(value.category_id)
                });
            let Some(category_id) = local_category else {
                warn!(value = %value.name, "skipping value of unknown category in import");
                continue;
            };
            if let Some(existing) = self.value_by_name(category_id, &value.name) {
                value_ids.insert(value.id, existing.id);
                summary.skipped_existing += 1;
                continue;
            }
            let mut incoming = value.clone();
            incoming.persisted = false;
            incoming.category_id = category_id;
            value_ids.insert(incoming.id, incoming.id);
            self.insert_category_value(incoming)?;
            summary.values_imported += 1;
        }

        for meal in &data.meals {
            if let Some(existing) = self.meal_by_name(&meal.name) {
                meal_ids.insert(meal.id, existing.id);
                summary.skipped_existing += 1;
                continue;
            }
            let mut incoming = meal.clone();
            incoming.persisted = false;
            incoming.assignments = meal
                .assignments
                .iter()
                .filter_map(|(category_id, value_id)| {
                    let category = category_ids.get(category_id).copied()?;
                    let value = value_ids.get(value_id).copied()?;
                    self.value(category, value).is_some().then_some((category, value))
                })
                .collect();
            meal_ids.insert(incoming.id, incoming.id);
            self.insert_meal(incoming)?;
            summary.meals_imported += 1;
        }

        for allocation in &data.allocations {
            if self.allocations.contains_key(&(allocation.day, allocation.slot)) {
                summary.skipped_existing += 1;
                continue;
            }
            let local_meal = meal_ids
                .get(&allocation.meal_id)
                .copied()
                .or_else(|| {
                    self.meals
                        .contains_key(&allocation.meal_id)
                        .then_some(allocation.meal_id)
                });
            let Some(meal_id) = local_meal else {
                warn!("skipping allocation of unknown meal in import");
                continue;
            };
            let mut incoming = allocation.clone();
            incoming.persisted = false;
            incoming.meal_id = meal_id;
            self.insert_allocation(incoming)?;
            summary.allocations_imported += 1;
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    use crate::db::Database;
    use crate::models::{AssignmentRow, AttachmentRow, Frequency, Importance};

    fn mirror() -> Mirror<Database> {
        Mirror::new(
            Database::open_in_memory().unwrap(),
            RemoteChangeSignal::new(),
        )
    }

    fn seeded() -> (Mirror<Database>, Uuid, Uuid, Uuid) {
        let mut mirror = mirror();
        let category = Category::new("Carbs", Importance::Highest);
        let category_id = category.id;
        mirror.insert_category(category).unwrap();
        let value = CategoryValue::new(category_id, "Pasta", Frequency::VeryOften);
        let value_id = value.id;
        mirror.insert_category_value(value).unwrap();
        let mut meal = Meal::new("Lasagne");
        meal.assignments.insert(category_id, value_id);
        let meal_id = meal.id;
        mirror.insert_meal(meal).unwrap();
        (mirror, category_id, value_id, meal_id)
    }

    #[test]
    fn test_insert_marks_persisted() {
        let (mirror, category_id, value_id, meal_id) = seeded();
        assert!(mirror.category(category_id).unwrap().persisted);
        assert!(mirror.value(category_id, value_id).unwrap().persisted);
        assert!(mirror.meal(meal_id).unwrap().persisted);
    }

    #[test]
    fn test_load_rebuilds_joined_state() {
        let (mut mirror, category_id, value_id, meal_id) = seeded();
        let mut meal = mirror.meal(meal_id).unwrap().clone();
        meal.attachments.push(Attachment::new(1, vec![2]));
        meal.attachments.push(Attachment::new(0, vec![1]));
        meal.renumber_attachments();
        mirror.save_meal(meal).unwrap();
        mirror
            .assign_meal(DayNumber::today(), 0, meal_id)
            .unwrap();

        mirror.load().unwrap();

        let meal = mirror.meal(meal_id).unwrap();
        assert_eq!(meal.assignments.get(&category_id), Some(&value_id));
        assert_eq!(meal.attachments.len(), 2);
        assert_eq!(meal.attachments[0].sequence, 0);
        assert!(meal.last_used.is_some());
        assert!(mirror.allocation(DayNumber::today(), 0).is_some());
        assert_eq!(mirror.category(category_id).unwrap().name, "Carbs");
    }

    #[test]
    fn test_load_drops_allocations_outside_retention() {
        let (mut mirror, _, _, meal_id) = seeded();
        let today = DayNumber::today();
        mirror.assign_meal(today, 0, meal_id).unwrap();
        mirror
            .assign_meal(today - (MAX_RETENTION_DAYS + 10), 0, meal_id)
            .unwrap();

        mirror.load().unwrap();

        assert!(mirror.allocation(today, 0).is_some());
        assert!(
            mirror
                .allocation(today - (MAX_RETENTION_DAYS + 10), 0)
                .is_none()
        );
    }

    #[test]
    fn test_load_deduplicates_allocations_keeping_latest() {
        let (mut mirror, _, _, meal_id) = seeded();
        let day = DayNumber::today() - 1;
        // Conflicting rows land through the store directly, the way a
        // replica merge would produce them.
        let first = Allocation::new(day, 0, meal_id);
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = Allocation::new(day, 0, meal_id);
        let keeper = second.id;
        mirror.store.insert_allocation(&first).unwrap();
        mirror.store.insert_allocation(&second).unwrap();

        mirror.load().unwrap();

        let kept = mirror.allocation(day, 0).unwrap();
        assert_eq!(kept.id, keeper);
        // The loser is gone from the store too.
        assert_eq!(mirror.store.fetch_allocations(DayNumber(0)).unwrap().len(), 1);
        // A second load performs zero further deletions.
        mirror.load().unwrap();
        assert_eq!(mirror.store.fetch_allocations(DayNumber(0)).unwrap().len(), 1);
    }

    #[test]
    fn test_load_fails_on_duplicate_meal_names() {
        let (mut mirror, _, _, _) = seeded();
        // Same name, different id — no handler covers meals.
        mirror.store.insert_meal(&Meal::new("Lasagne")).unwrap();
        assert!(mirror.load().is_err());
    }

    #[test]
    fn test_load_skips_orphan_assignments() {
        let (mut mirror, category_id, _, _) = seeded();
        // A meal whose assignment references a value that no longer exists
        // (deleted on another device after this row was merged).
        let mut stray = Meal::new("Stray");
        stray.assignments.insert(category_id, Uuid::new_v4());
        let stray_id = stray.id;
        mirror.store.insert_meal(&stray).unwrap();

        mirror.load().unwrap();
        assert!(mirror.meal(stray_id).unwrap().assignments.is_empty());
    }

    #[test]
    fn test_save_is_noop_for_identical_state() {
        let (mirror_db, category_id, _, meal_id) = seeded();
        let counting = CountingStore::new(mirror_db.store);
        let mut mirror = Mirror::new(counting, RemoteChangeSignal::new());
        mirror.load().unwrap();

        let category = mirror.category(category_id).unwrap().clone();
        mirror.save_category(category).unwrap();
        let meal = mirror.meal(meal_id).unwrap().clone();
        mirror.save_meal(meal).unwrap();
        assert_eq!(mirror.store.updates.get(), 0);

        let mut meal = mirror.meal(meal_id).unwrap().clone();
        meal.notes = "extra garlic".to_string();
        mirror.save_meal(meal).unwrap();
        assert_eq!(mirror.store.updates.get(), 1);
    }

    #[test]
    fn test_remove_category_cascades_fully() {
        let (mut mirror, category_id, value_id, meal_id) = seeded();
        // A second meal assigned to the same category via a second value.
        let other_value = CategoryValue::new(category_id, "Rice", Frequency::Often);
        let other_value_id = other_value.id;
        mirror.insert_category_value(other_value).unwrap();
        let mut other = Meal::new("Biryani");
        other.assignments.insert(category_id, other_value_id);
        let other_id = other.id;
        mirror.insert_meal(other).unwrap();

        mirror.remove_category(category_id).unwrap();

        assert!(mirror.category(category_id).is_none());
        assert!(mirror.value(category_id, value_id).is_none());
        assert!(mirror.meal(meal_id).unwrap().assignments.is_empty());
        assert!(mirror.meal(other_id).unwrap().assignments.is_empty());

        // The store agrees after a reload.
        mirror.load().unwrap();
        assert!(mirror.category(category_id).is_none());
        assert!(mirror.meal(meal_id).unwrap().assignments.is_empty());
    }

    #[test]
    fn test_remove_value_detaches_meals() {
        let (mut mirror, category_id, value_id, meal_id) = seeded();
        mirror.remove_category_value(category_id, value_id).unwrap();
        assert!(mirror.value(category_id, value_id).is_none());
        assert!(mirror.meal(meal_id).unwrap().assignments.is_empty());
        assert!(mirror.category(category_id).is_some());
    }

    #[test]
    fn test_remove_meal_cascades_allocations() {
        let (mut mirror, _, _, meal_id) = seeded();
        let today = DayNumber::today();
        mirror.assign_meal(today, 0, meal_id).unwrap();
        mirror.assign_meal(today + 1, 0, meal_id).unwrap();

        mirror.remove_meal(meal_id).unwrap();

        assert!(mirror.meal(meal_id).is_none());
        assert!(mirror.allocation(today, 0).is_none());
        assert!(mirror.allocation(today + 1, 0).is_none());
        mirror.load().unwrap();
        assert!(mirror.allocation(today, 0).is_none());
    }

    #[test]
    fn test_assign_meal_upserts_and_touches_last_used() {
        let (mut mirror, _, _, meal_id) = seeded();
        let other = Meal::new("Biryani");
        let other_id = other.id;
        mirror.insert_meal(other).unwrap();
        let day = DayNumber::today();

        mirror.assign_meal(day, 0, meal_id).unwrap();
        let first = mirror.allocation(day, 0).unwrap().clone();
        assert_eq!(first.meal_id, meal_id);
        assert!(mirror.meal(meal_id).unwrap().last_used.is_some());

        mirror.assign_meal(day, 0, other_id).unwrap();
        let second = mirror.allocation(day, 0).unwrap();
        assert_eq!(second.meal_id, other_id);
        // Same store record, redirected and re-timestamped.
        assert_eq!(second.id, first.id);
        assert!(second.allocated_at >= first.allocated_at);
    }

    #[test]
    fn test_save_allocation_rekeys_map() {
        let (mut mirror, _, _, meal_id) = seeded();
        let day = DayNumber::today();
        mirror.assign_meal(day, 0, meal_id).unwrap();

        let mut moved = mirror.allocation(day, 0).unwrap().clone();
        moved.day = day + 3;
        mirror.save_allocation(moved).unwrap();

        assert!(mirror.allocation(day, 0).is_none());
        assert_eq!(mirror.allocation(day + 3, 0).unwrap().meal_id, meal_id);
    }

    #[test]
    fn test_validation_rules() {
        let (mirror, category_id, value_id, meal_id) = seeded();
        assert!(mirror.validate_category_name("", None).is_err());
        assert!(mirror.validate_category_name("   ", None).is_err());
        assert!(mirror.validate_category_name("Carbs", None).is_err());
        assert!(
            mirror
                .validate_category_name("Carbs", Some(category_id))
                .is_ok()
        );
        assert!(mirror.validate_category_name("Protein", None).is_ok());

        assert!(mirror.validate_value_name(category_id, "Pasta", None).is_err());
        assert!(
            mirror
                .validate_value_name(category_id, "Pasta", Some(value_id))
                .is_ok()
        );
        assert!(mirror.validate_value_name(category_id, "Rice", None).is_ok());

        assert!(mirror.validate_meal_name("Lasagne", None).is_err());
        assert!(mirror.validate_meal_name("Lasagne", Some(meal_id)).is_ok());
        assert!(mirror.validate_meal_name("Biryani", None).is_ok());
    }

    #[test]
    #[should_panic(expected = "insert_category: category is already linked")]
    fn test_double_insert_is_a_programming_fault() {
        let mut mirror = mirror();
        let category = Category::new("Carbs", Importance::Highest);
        mirror.insert_category(category.clone()).unwrap();
        let mut again = category;
        again.persisted = true;
        let _ = mirror.insert_category(again);
    }

    #[test]
    #[should_panic(expected = "save_meal: meal was never inserted")]
    fn test_save_unlinked_meal_is_a_programming_fault() {
        let mut mirror = mirror();
        let _ = mirror.save_meal(Meal::new("Ghost"));
    }

    #[test]
    fn test_load_reruns_when_counter_advances_mid_load() {
        let signal = RemoteChangeSignal::new();
        let store = BumpingStore {
            inner: Database::open_in_memory().unwrap(),
            signal: signal.clone(),
            bumps_left: Cell::new(1),
            meal_fetches: Cell::new(0),
        };
        let mut mirror = Mirror::new(store, signal.clone());
        mirror.load().unwrap();

        // One bump mid-fetch forces exactly one re-run.
        assert_eq!(mirror.store.meal_fetches.get(), 2);
        assert_eq!(mirror.loaded_counter(), signal.count());
    }

    #[test]
    fn test_load_without_churn_is_single_pass() {
        let signal = RemoteChangeSignal::new();
        let store = BumpingStore {
            inner: Database::open_in_memory().unwrap(),
            signal: signal.clone(),
            bumps_left: Cell::new(0),
            meal_fetches: Cell::new(0),
        };
        let mut mirror = Mirror::new(store, signal.clone());
        signal.notify();
        mirror.load().unwrap();
        assert_eq!(mirror.store.meal_fetches.get(), 1);
        assert_eq!(mirror.loaded_counter(), signal.count());
    }

    #[test]
    fn test_load_gives_up_after_bounded_attempts() {
        let signal = RemoteChangeSignal::new();
        let store = BumpingStore {
            inner: Database::open_in_memory().unwrap(),
            signal: signal.clone(),
            bumps_left: Cell::new(u32::MAX),
            meal_fetches: Cell::new(0),
        };
        let mut mirror = Mirror::new(store, signal);
        mirror.load().unwrap();
        assert_eq!(mirror.store.meal_fetches.get(), MAX_LOAD_ATTEMPTS);
    }

    #[test]
    fn test_needs_reload_tracks_published_counter() {
        let signal = RemoteChangeSignal::new();
        let mut mirror = Mirror::new(Database::open_in_memory().unwrap(), signal.clone());
        mirror.load().unwrap();
        assert!(!mirror.needs_reload(signal.count()));
        signal.notify();
        assert!(mirror.needs_reload(signal.count()));
        mirror.load().unwrap();
        assert!(!mirror.needs_reload(signal.count()));
    }

    #[test]
    fn test_export_import_roundtrip() {
        let (mut source, _, _, meal_id) = seeded();
        source.assign_meal(DayNumber::today(), 0, meal_id).unwrap();
        let export = source.export_all();

        let mut target = mirror();
        let summary = target.import_all(&export).unwrap();
        assert_eq!(summary.categories_imported, 1);
        assert_eq!(summary.values_imported, 1);
        assert_eq!(summary.meals_imported, 1);
        assert_eq!(summary.allocations_imported, 1);
        assert_eq!(summary.skipped_existing, 0);

        let meal = target.meal_by_name("Lasagne").unwrap();
        assert_eq!(meal.assignments.len(), 1);
        assert!(target.allocation(DayNumber::today(), 0).is_some());

        // Re-importing the same file changes nothing.
        let again = target.import_all(&export).unwrap();
        assert_eq!(again.categories_imported, 0);
        assert_eq!(again.meals_imported, 0);
        assert_eq!(again.allocations_imported, 0);
        assert!(again.skipped_existing > 0);
    }

    #[test]
    fn test_import_remaps_onto_existing_records() {
        let (source, _, _, _) = seeded();
        let export = source.export_all();

        // Target already has a category and meal with the same names but
        // different ids.
        let mut target = mirror();
        let category = Category::new("Carbs", Importance::Medium);
        let local_category = category.id;
        target.insert_category(category).unwrap();
        target.insert_meal(Meal::new("Lasagne")).unwrap();

        let summary = target.import_all(&export).unwrap();
        assert_eq!(summary.categories_imported, 0);
        assert_eq!(summary.meals_imported, 0);
        // The value lands under the existing local category.
        assert_eq!(summary.values_imported, 1);
        assert!(target.value_by_name(local_category, "Pasta").is_some());
    }

    #[test]
    fn test_export_serializes_to_json() {
        let (source, _, _, _) = seeded();
        let export = source.export_all();
        let json = serde_json::to_string(&export).unwrap();
        let back: ExportData = serde_json::from_str(&json).unwrap();
        assert_eq!(back.version, EXPORT_VERSION);
        assert_eq!(back.meals.len(), 1);
        assert_eq!(back.meals[0].assignments.len(), 1);
    }

    // --- Test stores ---

    struct CountingStore {
        inner: Database,
        updates: Cell<usize>,
    }

    impl CountingStore {
        fn new(inner: Database) -> Self {
            CountingStore {
                inner,
                updates: Cell::new(0),
            }
        }

        fn bump(&self) {
            self.updates.set(self.updates.get() + 1);
        }
    }

    impl EntityStore for CountingStore {
        fn fetch_categories(&self) -> Result<Vec<Category>> {
            self.inner.fetch_categories()
        }
        fn fetch_category_values(&self) -> Result<Vec<CategoryValue>> {
            self.inner.fetch_category_values()
        }
        fn fetch_meals(&self) -> Result<Vec<Meal>> {
            self.inner.fetch_meals()
        }
        fn fetch_assignments(&self) -> Result<Vec<AssignmentRow>> {
            self.inner.fetch_assignments()
        }
        fn fetch_attachments(&self) -> Result<Vec<AttachmentRow>> {
            self.inner.fetch_attachments()
        }
        fn fetch_allocations(&self, min_day: DayNumber) -> Result<Vec<Allocation>> {
            self.inner.fetch_allocations(min_day)
        }
        fn insert_category(&self, category: &Category) -> Result<()> {
            self.inner.insert_category(category)
        }
        fn update_category(&self, category: &Category) -> Result<()> {
            self.bump();
            self.inner.update_category(category)
        }
        fn delete_category(&self, id: Uuid) -> Result<()> {
            self.inner.delete_category(id)
        }
        fn insert_category_value(&self, value: &CategoryValue) -> Result<()> {
            self.inner.insert_category_value(value)
        }
        fn update_category_value(&self, value: &CategoryValue) -> Result<()> {
            self.bump();
            self.inner.update_category_value(value)
        }
        fn delete_category_value(&self, id: Uuid) -> Result<()> {
            self.inner.delete_category_value(id)
        }
        fn insert_meal(&self, meal: &Meal) -> Result<()> {
            self.inner.insert_meal(meal)
        }
        fn update_meal(&self, meal: &Meal) -> Result<()> {
            self.bump();
            self.inner.update_meal(meal)
        }
        fn delete_meal(&self, id: Uuid) -> Result<()> {
            self.inner.delete_meal(id)
        }
        fn insert_allocation(&self, allocation: &Allocation) -> Result<()> {
            self.inner.insert_allocation(allocation)
        }
        fn update_allocation(&self, allocation: &Allocation) -> Result<()> {
            self.bump();
            self.inner.update_allocation(allocation)
        }
        fn delete_allocation(&self, id: Uuid) -> Result<()> {
            self.inner.delete_allocation(id)
        }
    }

    /// Bumps the remote counter during meal fetches, simulating a replica
    /// merge landing mid-load.
    struct BumpingStore {
        inner: Database,
        signal: RemoteChangeSignal,
        bumps_left: Cell<u32>,
        meal_fetches: Cell<u32>,
    }

    impl EntityStore for BumpingStore {
        fn fetch_categories(&self) -> Result<Vec<Category>> {
            self.inner.fetch_categories()
        }
        fn fetch_category_values(&self) -> Result<Vec<CategoryValue>> {
            self.inner.fetch_category_values()
        }
        fn fetch_meals(&self) -> Result<Vec<Meal>> {
            self.meal_fetches.set(self.meal_fetches.get() + 1);
            if self.bumps_left.get() > 0 {
                self.bumps_left.set(self.bumps_left.get() - 1);
                self.signal.notify();
            }
            self.inner.fetch_meals()
        }
        fn fetch_assignments(&self) -> Result<Vec<AssignmentRow>> {
            self.inner.fetch_assignments()
        }
        fn fetch_attachments(&self) -> Result<Vec<AttachmentRow>> {
            self.inner.fetch_attachments()
        }
        fn fetch_allocations(&self, min_day: DayNumber) -> Result<Vec<Allocation>> {
            self.inner.fetch_allocations(min_day)
        }
        fn insert_category(&self, category: &Category) -> Result<()> {
            self.inner.insert_category(category)
        }
        fn update_category(&self, category: &Category) -> Result<()> {
            self.inner.update_category(category)
        }
        fn delete_category(&self, id: Uuid) -> Result<()> {
            self.inner.delete_category(id)
        }
        fn insert_category_value(&self, value: &CategoryValue) -> Result<()> {
            self.inner.insert_category_value(value)
        }
        fn update_category_value(&self, value: &CategoryValue) -> Result<()> {
            self.inner.update_category_value(value)
        }
        fn delete_category_value(&self, id: Uuid) -> Result<()> {
            self.inner.delete_category_value(id)
        }
        fn insert_meal(&self, meal: &Meal) -> Result<()> {
            self.inner.insert_meal(meal)
        }
        fn update_meal(&self, meal: &Meal) -> Result<()> {
            self.inner.update_meal(meal)
        }
        fn delete_meal(&self, id: Uuid) -> Result<()> {
            self.inner.delete_meal(id)
        }
        fn insert_allocation(&self, allocation: &Allocation) -> Result<()> {
            self.inner.insert_allocation(allocation)
        }
        fn update_allocation(&self, allocation: &Allocation) -> Result<()> {
            self.inner.update_allocation(allocation)
        }
        fn delete_allocation(&self, id: Uuid) -> Result<()> {
            self.inner.delete_allocation(id)
        }
    }
}
