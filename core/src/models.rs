use std::collections::BTreeMap;
use std::fmt;

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::day::DayNumber;

/// Per-category priority. Ascending order puts the highest priority first,
/// which is the order ranking walks categories in.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    Highest,
    High,
    Medium,
    Other,
}

impl Importance {
    #[must_use]
    pub fn as_i64(self) -> i64 {
        match self {
            Importance::Highest => 0,
            Importance::High => 1,
            Importance::Medium => 2,
            Importance::Other => 3,
        }
    }

    #[must_use]
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(Importance::Highest),
            1 => Some(Importance::High),
            2 => Some(Importance::Medium),
            3 => Some(Importance::Other),
            _ => None,
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "highest" => Ok(Importance::Highest),
            "high" => Ok(Importance::High),
            "medium" => Ok(Importance::Medium),
            "other" => Ok(Importance::Other),
            _ => bail!("Invalid importance '{s}'. Must be one of: highest, high, medium, other"),
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Importance::Highest => "highest",
            Importance::High => "high",
            Importance::Medium => "medium",
            Importance::Other => "other",
        }
    }
}

impl fmt::Display for Importance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Expected recurrence of a category value. The numeric weight feeds the
/// ranking engine directly.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Never,
    Rarely,
    Occasionally,
    Often,
    VeryOften,
}

impl Frequency {
    /// Ranking weight: `very_often` = 4 down to `never` = 0.
    #[must_use]
    pub fn weight(self) -> i64 {
        match self {
            Frequency::Never => 0,
            Frequency::Rarely => 1,
            Frequency::Occasionally => 2,
            Frequency::Often => 3,
            Frequency::VeryOften => 4,
        }
    }

    #[must_use]
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(Frequency::Never),
            1 => Some(Frequency::Rarely),
            2 => Some(Frequency::Occasionally),
            3 => Some(Frequency::Often),
            4 => Some(Frequency::VeryOften),
            _ => None,
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "never" => Ok(Frequency::Never),
            "rarely" => Ok(Frequency::Rarely),
            "occasionally" => Ok(Frequency::Occasionally),
            "often" => Ok(Frequency::Often),
            "very_often" | "veryoften" => Ok(Frequency::VeryOften),
            _ => bail!(
                "Invalid frequency '{s}'. Must be one of: never, rarely, occasionally, often, very-often"
            ),
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Frequency::Never => "never",
            Frequency::Rarely => "rarely",
            Frequency::Occasionally => "occasionally",
            Frequency::Often => "often",
            Frequency::VeryOften => "very-often",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A meal attribute axis (carb type, protein type, cuisine, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: Uuid,
    pub name: String,
    pub importance: Importance,
    /// True once the entity has a linked store record. Managed by the
    /// mirror; never set this by hand.
    #[serde(skip)]
    pub persisted: bool,
}

impl Category {
    #[must_use]
    pub fn new(name: &str, importance: Importance) -> Self {
        Category {
            id: Uuid::new_v4(),
            name: name.to_string(),
            importance,
            persisted: false,
        }
    }
}

/// A weighted value within a category ("Pasta" under "Carbs").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryValue {
    pub id: Uuid,
    pub category_id: Uuid,
    pub name: String,
    pub frequency: Frequency,
    #[serde(skip)]
    pub persisted: bool,
}

impl CategoryValue {
    #[must_use]
    pub fn new(category_id: Uuid, name: &str, frequency: Frequency) -> Self {
        CategoryValue {
            id: Uuid::new_v4(),
            category_id,
            name: name.to_string(),
            frequency,
            persisted: false,
        }
    }
}

/// An image attached to a meal. `sequence` is the ordering key within the
/// owning meal's attachment list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: Uuid,
    pub sequence: i64,
    pub image: Vec<u8>,
}

impl Attachment {
    #[must_use]
    pub fn new(sequence: i64, image: Vec<u8>) -> Self {
        Attachment {
            id: Uuid::new_v4(),
            sequence,
            image,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meal {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_image: Option<Vec<u8>>,
    #[serde(default)]
    pub last_used: Option<DateTime<Utc>>,
    /// At most one value per category: category id → value id.
    #[serde(default)]
    pub assignments: BTreeMap<Uuid, Uuid>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(skip)]
    pub persisted: bool,
}

impl Meal {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Meal {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: String::new(),
            url: String::new(),
            notes: String::new(),
            image: None,
            url_image: None,
            last_used: None,
            assignments: BTreeMap::new(),
            attachments: Vec::new(),
            persisted: false,
        }
    }

    /// Renumber attachment sequences to match list position.
    pub fn renumber_attachments(&mut self) {
        for (position, attachment) in self.attachments.iter_mut().enumerate() {
            attachment.sequence = position as i64;
        }
    }
}

/// A meal planned into a calendar day/slot. `(day, slot)` is the unique
/// key; the id only addresses the store record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub id: Uuid,
    pub day: DayNumber,
    pub slot: i64,
    pub meal_id: Uuid,
    pub allocated_at: DateTime<Utc>,
    #[serde(skip)]
    pub persisted: bool,
}

impl Allocation {
    #[must_use]
    pub fn new(day: DayNumber, slot: i64, meal_id: Uuid) -> Self {
        Allocation {
            id: Uuid::new_v4(),
            day,
            slot,
            meal_id,
            allocated_at: Utc::now(),
            persisted: false,
        }
    }
}

/// Intra-day slot index. Only slot 0 is used today; the field exists so
/// multiple meals per day stay representable.
pub const DEFAULT_SLOT: i64 = 0;

// --- Store row types (joined into models by the mirror) ---

/// One meal-category-value link row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentRow {
    pub meal_id: Uuid,
    pub category_id: Uuid,
    pub value_id: Uuid,
}

/// One attachment row, carrying its owning meal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRow {
    pub id: Uuid,
    pub meal_id: Uuid,
    pub sequence: i64,
    pub image: Vec<u8>,
}

// --- Export / Import types ---

pub const EXPORT_VERSION: i64 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportData {
    pub version: i64,
    pub exported_at: String,
    pub categories: Vec<Category>,
    pub values: Vec<CategoryValue>,
    pub meals: Vec<Meal>,
    pub allocations: Vec<Allocation>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[allow(clippy::struct_field_names)]
pub struct ImportSummary {
    pub categories_imported: i64,
    pub values_imported: i64,
    pub meals_imported: i64,
    pub allocations_imported: i64,
    pub skipped_existing: i64,
}
