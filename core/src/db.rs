use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use uuid::Uuid;

use crate::day::DayNumber;
use crate::models::{
    Allocation, AssignmentRow, AttachmentRow, Category, CategoryValue, Frequency, Importance,
    Meal,
};

/// Page size for batched fetches. Fetches loop until a short page comes
/// back, so callers always see the full result set.
const FETCH_PAGE_SIZE: i64 = 100;

/// The durable record store the mirror runs against.
///
/// Fetches return full record sets in the documented sort orders; every
/// write is one durable commit (multi-row writes are transactional). The
/// trait exists so tests can interpose a store that misbehaves — e.g.
/// bumping the remote-change counter mid-fetch.
pub trait EntityStore {
    /// All categories, sorted by (importance, name).
    fn fetch_categories(&self) -> Result<Vec<Category>>;
    /// All category values, sorted by (frequency desc, name).
    fn fetch_category_values(&self) -> Result<Vec<CategoryValue>>;
    /// All meals, sorted by last-used ascending (never-used first).
    fn fetch_meals(&self) -> Result<Vec<Meal>>;
    /// All meal-category-value link rows.
    fn fetch_assignments(&self) -> Result<Vec<AssignmentRow>>;
    /// All attachment rows, sorted by (meal, sequence).
    fn fetch_attachments(&self) -> Result<Vec<AttachmentRow>>;
    /// Allocations with `day >= min_day`, sorted by (day, slot, allocated_at).
    fn fetch_allocations(&self, min_day: DayNumber) -> Result<Vec<Allocation>>;

    fn insert_category(&self, category: &Category) -> Result<()>;
    fn update_category(&self, category: &Category) -> Result<()>;
    fn delete_category(&self, id: Uuid) -> Result<()>;

    fn insert_category_value(&self, value: &CategoryValue) -> Result<()>;
    fn update_category_value(&self, value: &CategoryValue) -> Result<()>;
    fn delete_category_value(&self, id: Uuid) -> Result<()>;

    /// Writes the meal row plus its assignment and attachment child rows in
    /// one commit.
    fn insert_meal(&self, meal: &Meal) -> Result<()>;
    /// Rewrites the meal row and replaces its child rows in one commit.
    fn update_meal(&self, meal: &Meal) -> Result<()>;
    /// Deletes the meal row and its child rows in one commit.
    fn delete_meal(&self, id: Uuid) -> Result<()>;

    fn insert_allocation(&self, allocation: &Allocation) -> Result<()>;
    fn update_allocation(&self, allocation: &Allocation) -> Result<()>;
    fn delete_allocation(&self, id: Uuid) -> Result<()>;
}

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            // No UNIQUE constraints on names or (day_number, slot): a sync
            // merge can land conflicting rows, which load() reconciles.
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS categories (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    importance INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS category_values (
                    id TEXT PRIMARY KEY,
                    category_id TEXT NOT NULL,
                    name TEXT NOT NULL,
                    frequency INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS meals (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    url TEXT NOT NULL DEFAULT '',
                    notes TEXT NOT NULL DEFAULT '',
                    image BLOB,
                    url_image BLOB,
                    last_used TEXT
                );

                CREATE TABLE IF NOT EXISTS meal_category_values (
                    meal_id TEXT NOT NULL,
                    category_id TEXT NOT NULL,
                    value_id TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS attachments (
                    id TEXT PRIMARY KEY,
                    meal_id TEXT NOT NULL,
                    sequence INTEGER NOT NULL,
                    image BLOB NOT NULL
                );

                CREATE TABLE IF NOT EXISTS allocations (
                    id TEXT PRIMARY KEY,
                    day_number INTEGER NOT NULL,
                    slot INTEGER NOT NULL,
                    meal_id TEXT NOT NULL,
                    allocated_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_category_values_category ON category_values(category_id);
                CREATE INDEX IF NOT EXISTS idx_mcv_meal ON meal_category_values(meal_id);
                CREATE INDEX IF NOT EXISTS idx_attachments_meal ON attachments(meal_id);
                CREATE INDEX IF NOT EXISTS idx_allocations_day ON allocations(day_number);

                PRAGMA user_version = 1;",
            )?;
        }

        Ok(())
    }

    // --- Row mapping helpers ---

    fn category_from_row(row: &rusqlite::Row) -> rusqlite::Result<Category> {
        Ok(Category {
            id: uuid_col(row, 0)?,
            name: row.get(1)?,
            importance: importance_col(row, 2)?,
            persisted: true,
        })
    }

    fn value_from_row(row: &rusqlite::Row) -> rusqlite::Result<CategoryValue> {
        Ok(CategoryValue {
            id: uuid_col(row, 0)?,
            category_id: uuid_col(row, 1)?,
            name: row.get(2)?,
            frequency: frequency_col(row, 3)?,
            persisted: true,
        })
    }

    // Assignments and attachments are joined in by the mirror; rows come
    // back with empty collections.
    fn meal_from_row(row: &rusqlite::Row) -> rusqlite::Result<Meal> {
        Ok(Meal {
            id: uuid_col(row, 0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            url: row.get(3)?,
            notes: row.get(4)?,
            image: row.get(5)?,
            url_image: row.get(6)?,
            last_used: opt_datetime_col(row, 7)?,
            assignments: std::collections::BTreeMap::new(),
            attachments: Vec::new(),
            persisted: true,
        })
    }

    fn assignment_from_row(row: &rusqlite::Row) -> rusqlite::Result<AssignmentRow> {
        Ok(AssignmentRow {
            meal_id: uuid_col(row, 0)?,
            category_id: uuid_col(row, 1)?,
            value_id: uuid_col(row, 2)?,
        })
    }

    fn attachment_from_row(row: &rusqlite::Row) -> rusqlite::Result<AttachmentRow> {
        Ok(AttachmentRow {
            id: uuid_col(row, 0)?,
            meal_id: uuid_col(row, 1)?,
            sequence: row.get(2)?,
            image: row.get(3)?,
        })
    }

    fn allocation_from_row(row: &rusqlite::Row) -> rusqlite::Result<Allocation> {
        Ok(Allocation {
            id: uuid_col(row, 0)?,
            day: DayNumber(row.get(1)?),
            slot: row.get(2)?,
            meal_id: uuid_col(row, 3)?,
            allocated_at: datetime_col(row, 4)?,
            persisted: true,
        })
    }

    fn write_meal_children(tx: &rusqlite::Transaction, meal: &Meal) -> Result<()> {
        for (category_id, value_id) in &meal.assignments {
            tx.execute(
                "INSERT INTO meal_category_values (meal_id, category_id, value_id)
                 VALUES (?1, ?2, ?3)",
                params![
                    meal.id.to_string(),
                    category_id.to_string(),
                    value_id.to_string()
                ],
            )?;
        }
        for attachment in &meal.attachments {
            tx.execute(
                "INSERT INTO attachments (id, meal_id, sequence, image) VALUES (?1, ?2, ?3, ?4)",
                params![
                    attachment.id.to_string(),
                    meal.id.to_string(),
                    attachment.sequence,
                    attachment.image
                ],
            )?;
        }
        Ok(())
    }
}

impl EntityStore for Database {
    fn fetch_categories(&self) -> Result<Vec<Category>> {
        fetch_paged(|limit, offset| {
            let mut stmt = self.conn.prepare(
                "SELECT id, name, importance FROM categories
                 ORDER BY importance, name LIMIT ?1 OFFSET ?2",
            )?;
            let rows = stmt
                .query_map(params![limit, offset], Database::category_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    fn fetch_category_values(&self) -> Result<Vec<CategoryValue>> {
        fetch_paged(|limit, offset| {
            let mut stmt = self.conn.prepare(
                "SELECT id, category_id, name, frequency FROM category_values
                 ORDER BY frequency DESC, name LIMIT ?1 OFFSET ?2",
            )?;
            let rows = stmt
                .query_map(params![limit, offset], Database::value_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    fn fetch_meals(&self) -> Result<Vec<Meal>> {
        fetch_paged(|limit, offset| {
            let mut stmt = self.conn.prepare(
                "SELECT id, name, description, url, notes, image, url_image, last_used
                 FROM meals ORDER BY last_used LIMIT ?1 OFFSET ?2",
            )?;
            let rows = stmt
                .query_map(params![limit, offset], Database::meal_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    fn fetch_assignments(&self) -> Result<Vec<AssignmentRow>> {
        fetch_paged(|limit, offset| {
            let mut stmt = self.conn.prepare(
                "SELECT meal_id, category_id, value_id FROM meal_category_values
                 ORDER BY meal_id, category_id LIMIT ?1 OFFSET ?2",
            )?;
            let rows = stmt
                .query_map(params![limit, offset], Database::assignment_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    fn fetch_attachments(&self) -> Result<Vec<AttachmentRow>> {
        fetch_paged(|limit, offset| {
            let mut stmt = self.conn.prepare(
                "SELECT id, meal_id, sequence, image FROM attachments
                 ORDER BY meal_id, sequence LIMIT ?1 OFFSET ?2",
            )?;
            let rows = stmt
                .query_map(params![limit, offset], Database::attachment_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    fn fetch_allocations(&self, min_day: DayNumber) -> Result<Vec<Allocation>> {
        fetch_paged(|limit, offset| {
            let mut stmt = self.conn.prepare(
                "SELECT id, day_number, slot, meal_id, allocated_at FROM allocations
                 WHERE day_number >= ?1
                 ORDER BY day_number, slot, allocated_at LIMIT ?2 OFFSET ?3",
            )?;
            let rows = stmt
                .query_map(
                    params![min_day.value(), limit, offset],
                    Database::allocation_from_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    fn insert_category(&self, category: &Category) -> Result<()> {
        self.conn.execute(
            "INSERT INTO categories (id, name, importance) VALUES (?1, ?2, ?3)",
            params![
                category.id.to_string(),
                category.name,
                category.importance.as_i64()
            ],
        )?;
        Ok(())
    }

    fn update_category(&self, category: &Category) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE categories SET name = ?2, importance = ?3 WHERE id = ?1",
            params![
                category.id.to_string(),
                category.name,
                category.importance.as_i64()
            ],
        )?;
        if changed == 0 {
            bail!("Category {} has no store record", category.id);
        }
        Ok(())
    }

    fn delete_category(&self, id: Uuid) -> Result<()> {
        self.conn.execute(
            "DELETE FROM categories WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(())
    }

    fn insert_category_value(&self, value: &CategoryValue) -> Result<()> {
        self.conn.execute(
            "INSERT INTO category_values (id, category_id, name, frequency)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                value.id.to_string(),
                value.category_id.to_string(),
                value.name,
                value.frequency.weight()
            ],
        )?;
        Ok(())
    }

    fn update_category_value(&self, value: &CategoryValue) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE category_values SET category_id = ?2, name = ?3, frequency = ?4
             WHERE id = ?1",
            params![
                value.id.to_string(),
                value.category_id.to_string(),
                value.name,
                value.frequency.weight()
            ],
        )?;
        if changed == 0 {
            bail!("Category value {} has no store record", value.id);
        }
        Ok(())
    }

    fn delete_category_value(&self, id: Uuid) -> Result<()> {
        self.conn.execute(
            "DELETE FROM category_values WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(())
    }

    fn insert_meal(&self, meal: &Meal) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO meals (id, name, description, url, notes, image, url_image, last_used)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                meal.id.to_string(),
                meal.name,
                meal.description,
                meal.url,
                meal.notes,
                meal.image,
                meal.url_image,
                meal.last_used.map(|ts| ts.to_rfc3339()),
            ],
        )?;
        Database::write_meal_children(&tx, meal)?;
        tx.commit()?;
        Ok(())
    }

    fn update_meal(&self, meal: &Meal) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        let changed = tx.execute(
            "UPDATE meals SET name = ?2, description = ?3, url = ?4, notes = ?5,
                    image = ?6, url_image = ?7, last_used = ?8
             WHERE id = ?1",
            params![
                meal.id.to_string(),
                meal.name,
                meal.description,
                meal.url,
                meal.notes,
                meal.image,
                meal.url_image,
                meal.last_used.map(|ts| ts.to_rfc3339()),
            ],
        )?;
        if changed == 0 {
            bail!("Meal {} has no store record", meal.id);
        }
        tx.execute(
            "DELETE FROM meal_category_values WHERE meal_id = ?1",
            params![meal.id.to_string()],
        )?;
        tx.execute(
            "DELETE FROM attachments WHERE meal_id = ?1",
            params![meal.id.to_string()],
        )?;
        Database::write_meal_children(&tx, meal)?;
        tx.commit()?;
        Ok(())
    }

    fn delete_meal(&self, id: Uuid) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM meal_category_values WHERE meal_id = ?1",
            params![id.to_string()],
        )?;
        tx.execute(
            "DELETE FROM attachments WHERE meal_id = ?1",
            params![id.to_string()],
        )?;
        tx.execute("DELETE FROM meals WHERE id = ?1", params![id.to_string()])?;
        tx.commit()?;
        Ok(())
    }

    fn insert_allocation(&self, allocation: &Allocation) -> Result<()> {
        self.conn.execute(
            "INSERT INTO allocations (id, day_number, slot, meal_id, allocated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                allocation.id.to_string(),
                allocation.day.value(),
                allocation.slot,
                allocation.meal_id.to_string(),
                allocation.allocated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn update_allocation(&self, allocation: &Allocation) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE allocations SET day_number = ?2, slot = ?3, meal_id = ?4, allocated_at = ?5
             WHERE id = ?1",
            params![
                allocation.id.to_string(),
                allocation.day.value(),
                allocation.slot,
                allocation.meal_id.to_string(),
                allocation.allocated_at.to_rfc3339(),
            ],
        )?;
        if changed == 0 {
            bail!("Allocation {} has no store record", allocation.id);
        }
        Ok(())
    }

    fn delete_allocation(&self, id: Uuid) -> Result<()> {
        self.conn.execute(
            "DELETE FROM allocations WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(())
    }
}

/// Loop `page(limit, offset)` until a short page is returned.
fn fetch_paged<T>(mut page: impl FnMut(i64, i64) -> Result<Vec<T>>) -> Result<Vec<T>> {
    let mut out: Vec<T> = Vec::new();
    loop {
        let batch = page(FETCH_PAGE_SIZE, out.len() as i64)?;
        let short = (batch.len() as i64) < FETCH_PAGE_SIZE;
        out.extend(batch);
        if short {
            return Ok(out);
        }
    }
}

fn uuid_col(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn datetime_col(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

fn opt_datetime_col(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        None => Ok(None),
        Some(raw) => DateTime::parse_from_rfc3339(&raw)
            .map(|ts| Some(ts.with_timezone(&Utc)))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    idx,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            }),
    }
}

fn importance_col(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Importance> {
    let raw: i64 = row.get(idx)?;
    Importance::from_i64(raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Integer,
            format!("invalid importance {raw}").into(),
        )
    })
}

fn frequency_col(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Frequency> {
    let raw: i64 = row.get(idx)?;
    Frequency::from_i64(raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Integer,
            format!("invalid frequency {raw}").into(),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Attachment;

    #[test]
    fn test_category_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        let category = Category::new("Carbs", Importance::Highest);
        db.insert_category(&category).unwrap();

        let fetched = db.fetch_categories().unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].id, category.id);
        assert_eq!(fetched[0].name, "Carbs");
        assert_eq!(fetched[0].importance, Importance::Highest);
        assert!(fetched[0].persisted);
    }

    #[test]
    fn test_categories_sorted_by_importance_then_name() {
        let db = Database::open_in_memory().unwrap();
        db.insert_category(&Category::new("Zest", Importance::Highest))
            .unwrap();
        db.insert_category(&Category::new("Cuisine", Importance::Medium))
            .unwrap();
        db.insert_category(&Category::new("Carbs", Importance::Highest))
            .unwrap();

        let names: Vec<String> = db
            .fetch_categories()
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["Carbs", "Zest", "Cuisine"]);
    }

    #[test]
    fn test_update_category() {
        let db = Database::open_in_memory().unwrap();
        let mut category = Category::new("Carbs", Importance::Medium);
        db.insert_category(&category).unwrap();

        category.importance = Importance::Highest;
        category.name = "Base".to_string();
        db.update_category(&category).unwrap();

        let fetched = db.fetch_categories().unwrap();
        assert_eq!(fetched[0].name, "Base");
        assert_eq!(fetched[0].importance, Importance::Highest);
    }

    #[test]
    fn test_update_missing_category_fails() {
        let db = Database::open_in_memory().unwrap();
        let category = Category::new("Ghost", Importance::Other);
        assert!(db.update_category(&category).is_err());
    }

    #[test]
    fn test_value_roundtrip_sorted_by_frequency_desc() {
        let db = Database::open_in_memory().unwrap();
        let category = Category::new("Carbs", Importance::Highest);
        db.insert_category(&category).unwrap();
        db.insert_category_value(&CategoryValue::new(category.id, "Couscous", Frequency::Rarely))
            .unwrap();
        db.insert_category_value(&CategoryValue::new(category.id, "Pasta", Frequency::VeryOften))
            .unwrap();

        let names: Vec<String> = db
            .fetch_category_values()
            .unwrap()
            .into_iter()
            .map(|v| v.name)
            .collect();
        assert_eq!(names, vec!["Pasta", "Couscous"]);
    }

    #[test]
    fn test_meal_roundtrip_with_children() {
        let db = Database::open_in_memory().unwrap();
        let category = Category::new("Carbs", Importance::Highest);
        let value = CategoryValue::new(category.id, "Pasta", Frequency::VeryOften);
        db.insert_category(&category).unwrap();
        db.insert_category_value(&value).unwrap();

        let mut meal = Meal::new("Lasagne");
        meal.description = "Layered".to_string();
        meal.assignments.insert(category.id, value.id);
        meal.attachments.push(Attachment::new(0, vec![1, 2, 3]));
        db.insert_meal(&meal).unwrap();

        let meals = db.fetch_meals().unwrap();
        assert_eq!(meals.len(), 1);
        assert_eq!(meals[0].name, "Lasagne");
        // Children come back through their own fetches.
        assert!(meals[0].assignments.is_empty());

        let assignments = db.fetch_assignments().unwrap();
        assert_eq!(assignments.len(), 1);
        assert_eq!(assignments[0].meal_id, meal.id);
        assert_eq!(assignments[0].value_id, value.id);

        let attachments = db.fetch_attachments().unwrap();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].image, vec![1, 2, 3]);
    }

    #[test]
    fn test_update_meal_replaces_children() {
        let db = Database::open_in_memory().unwrap();
        let category = Category::new("Carbs", Importance::Highest);
        let value = CategoryValue::new(category.id, "Pasta", Frequency::VeryOften);
        db.insert_category(&category).unwrap();
        db.insert_category_value(&value).unwrap();

        let mut meal = Meal::new("Lasagne");
        meal.assignments.insert(category.id, value.id);
        meal.attachments.push(Attachment::new(0, vec![1]));
        db.insert_meal(&meal).unwrap();

        meal.assignments.clear();
        meal.attachments = vec![Attachment::new(0, vec![9]), Attachment::new(1, vec![8])];
        db.update_meal(&meal).unwrap();

        assert!(db.fetch_assignments().unwrap().is_empty());
        let attachments = db.fetch_attachments().unwrap();
        assert_eq!(attachments.len(), 2);
        assert_eq!(attachments[0].image, vec![9]);
    }

    #[test]
    fn test_delete_meal_removes_children() {
        let db = Database::open_in_memory().unwrap();
        let category = Category::new("Carbs", Importance::Highest);
        let value = CategoryValue::new(category.id, "Pasta", Frequency::VeryOften);
        db.insert_category(&category).unwrap();
        db.insert_category_value(&value).unwrap();

        let mut meal = Meal::new("Lasagne");
        meal.assignments.insert(category.id, value.id);
        meal.attachments.push(Attachment::new(0, vec![1]));
        db.insert_meal(&meal).unwrap();

        db.delete_meal(meal.id).unwrap();
        assert!(db.fetch_meals().unwrap().is_empty());
        assert!(db.fetch_assignments().unwrap().is_empty());
        assert!(db.fetch_attachments().unwrap().is_empty());
    }

    #[test]
    fn test_allocation_window_filter() {
        let db = Database::open_in_memory().unwrap();
        let meal = Meal::new("Lasagne");
        db.insert_meal(&meal).unwrap();

        db.insert_allocation(&Allocation::new(DayNumber(100), 0, meal.id))
            .unwrap();
        db.insert_allocation(&Allocation::new(DayNumber(500), 0, meal.id))
            .unwrap();

        let all = db.fetch_allocations(DayNumber(0)).unwrap();
        assert_eq!(all.len(), 2);
        let windowed = db.fetch_allocations(DayNumber(200)).unwrap();
        assert_eq!(windowed.len(), 1);
        assert_eq!(windowed[0].day, DayNumber(500));
    }

    #[test]
    fn test_fetch_pages_through_large_sets() {
        let db = Database::open_in_memory().unwrap();
        let meal = Meal::new("Lasagne");
        db.insert_meal(&meal).unwrap();
        // Two and a half pages worth of allocations.
        for day in 0..250 {
            db.insert_allocation(&Allocation::new(DayNumber(day), 0, meal.id))
                .unwrap();
        }

        let all = db.fetch_allocations(DayNumber(0)).unwrap();
        assert_eq!(all.len(), 250);
        // Sorted by day: pagination must not skip or repeat rows.
        let days: Vec<i64> = all.iter().map(|a| a.day.value()).collect();
        assert_eq!(days, (0..250).collect::<Vec<_>>());
    }

    #[test]
    fn test_allocation_update_and_delete() {
        let db = Database::open_in_memory().unwrap();
        let meal = Meal::new("Lasagne");
        db.insert_meal(&meal).unwrap();

        let mut allocation = Allocation::new(DayNumber(100), 0, meal.id);
        db.insert_allocation(&allocation).unwrap();

        allocation.day = DayNumber(101);
        db.update_allocation(&allocation).unwrap();
        let fetched = db.fetch_allocations(DayNumber(0)).unwrap();
        assert_eq!(fetched[0].day, DayNumber(101));

        db.delete_allocation(allocation.id).unwrap();
        assert!(db.fetch_allocations(DayNumber(0)).unwrap().is_empty());
    }

    #[test]
    fn test_store_accepts_conflicting_rows() {
        // Uniqueness is the mirror's job; the store must accept what a
        // replica merge can produce.
        let db = Database::open_in_memory().unwrap();
        let meal = Meal::new("Lasagne");
        db.insert_meal(&meal).unwrap();
        db.insert_allocation(&Allocation::new(DayNumber(100), 0, meal.id))
            .unwrap();
        db.insert_allocation(&Allocation::new(DayNumber(100), 0, meal.id))
            .unwrap();
        assert_eq!(db.fetch_allocations(DayNumber(0)).unwrap().len(), 2);
    }
}
