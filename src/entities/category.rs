// 🏷️ Category - groups payments, budgets and recurring transactions
//
// Names are unique per user. A fixed catalogue of presets lets a user add a
// sensible starter set without typing icons and colours.

use crate::db::{enum_column, is_constraint_violation};
use crate::entities::payment::{self, Payment};
use crate::entities::user::{self, User};
use crate::error::{NotFound, ValidationFailed};
use crate::money::{percentage, round2};
use crate::period;
use crate::validation::{parse_choice, FieldError, Validator};
use anyhow::Result;
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

pub const DEFAULT_COLOR: &str = "#3778c2";

// ============================================================================
// CATEGORY TYPE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryType {
    /// Food and household staples
    Groceries,

    /// Same amount every month (rent, utilities)
    Fixed,

    /// Needed, but the amount moves (transport, health)
    Variable,

    /// Optional spending
    Discretionary,
}

impl CategoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CategoryType::Groceries => "groceries",
            CategoryType::Fixed => "fixed",
            CategoryType::Variable => "variable",
            CategoryType::Discretionary => "discretionary",
        }
    }

    pub fn parse(raw: &str) -> Option<CategoryType> {
        match raw {
            "groceries" => Some(CategoryType::Groceries),
            "fixed" => Some(CategoryType::Fixed),
            "variable" => Some(CategoryType::Variable),
            "discretionary" => Some(CategoryType::Discretionary),
            _ => None,
        }
    }
}

// ============================================================================
// PRESETS
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct CategoryPreset {
    pub name: &'static str,
    pub icon: &'static str,
    pub icon_name: &'static str,
    pub color: &'static str,
    pub category_type: CategoryType,
    pub description: &'static str,
    pub display_order: u32,
}

const fn preset(
    name: &'static str,
    icon: &'static str,
    icon_name: &'static str,
    color: &'static str,
    category_type: CategoryType,
    description: &'static str,
    display_order: u32,
) -> CategoryPreset {
    CategoryPreset {
        name,
        icon,
        icon_name,
        color,
        category_type,
        description,
        display_order,
    }
}

pub const PRESETS: [CategoryPreset; 11] = [
    preset("Fruits & Vegetables", "fa-apple-whole", "fa-solid fa-apple-whole", "#4CAF50",
        CategoryType::Groceries, "Fresh produce and vegetables", 1),
    preset("Meat & Poultry", "fa-drumstick", "fa-solid fa-drumstick-bite", "#FF5722",
        CategoryType::Groceries, "Meat, poultry, and seafood products", 2),
    preset("Dairy & Eggs", "fa-cheese", "fa-solid fa-cheese", "#FFEB3B",
        CategoryType::Groceries, "Milk, cheese, yogurt, and eggs", 3),
    preset("Bakery", "fa-bread", "fa-solid fa-bread-slice", "#795548",
        CategoryType::Groceries, "Bread, pastries, and baked goods", 4),
    preset("Canned Goods", "fa-can", "fa-solid fa-box", "#9E9E9E",
        CategoryType::Groceries, "Canned and preserved foods", 5),
    preset("Housing", "fa-home", "fa-solid fa-home", "#2196F3",
        CategoryType::Fixed, "Rent, mortgage, and housing expenses", 1),
    preset("Utilities", "fa-bolt", "fa-solid fa-bolt", "#FFC107",
        CategoryType::Fixed, "Electricity, water, and internet bills", 2),
    preset("Transportation", "fa-car", "fa-solid fa-car", "#607D8B",
        CategoryType::Variable, "Fuel, public transport, and vehicle maintenance", 1),
    preset("Healthcare", "fa-hospital", "fa-solid fa-hospital", "#F44336",
        CategoryType::Variable, "Medical expenses and health insurance", 2),
    preset("Entertainment", "fa-film", "fa-solid fa-film", "#9C27B0",
        CategoryType::Discretionary, "Movies, events, and leisure activities", 1),
    preset("Dining Out", "fa-utensils", "fa-solid fa-utensils", "#FF9800",
        CategoryType::Discretionary, "Restaurants, cafes, and takeout", 2),
];

/// Presets of one type, in display order
pub fn presets_by_type(category_type: CategoryType) -> Vec<&'static CategoryPreset> {
    let mut found: Vec<_> = PRESETS
        .iter()
        .filter(|p| p.category_type == category_type)
        .collect();
    found.sort_by(|a, b| a.display_order.cmp(&b.display_order).then(a.name.cmp(b.name)));
    found
}

pub fn find_preset(name: &str) -> Option<&'static CategoryPreset> {
    PRESETS.iter().find(|p| p.name.eq_ignore_ascii_case(name.trim()))
}

impl CategoryPreset {
    pub fn to_params(&self) -> CategoryParams {
        CategoryParams {
            name: Some(self.name.to_string()),
            icon: Some(self.icon.to_string()),
            description: Some(self.description.to_string()),
            color: Some(self.color.to_string()),
            icon_name: Some(self.icon_name.to_string()),
            category_type: Some(self.category_type.as_str().to_string()),
        }
    }
}

// ============================================================================
// CATEGORY ENTITY
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub icon: String,
    pub description: Option<String>,
    pub color: String,
    pub icon_name: Option<String>,
    pub category_type: CategoryType,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CategoryParams {
    pub name: Option<String>,
    pub icon: Option<String>,
    pub description: Option<String>,
    pub color: Option<String>,
    pub icon_name: Option<String>,
    pub category_type: Option<String>,
}

impl Category {
    fn apply(&mut self, params: CategoryParams, v: &mut Validator) {
        if let Some(name) = params.name {
            self.name = name.trim().to_string();
        }
        if let Some(icon) = params.icon {
            self.icon = icon.trim().to_string();
        }
        if params.description.is_some() {
            self.description = params.description;
        }
        if let Some(color) = params.color.filter(|c| !c.trim().is_empty()) {
            self.color = color.trim().to_string();
        }
        if params.icon_name.is_some() {
            self.icon_name = params.icon_name;
        }
        if let Some(raw) = params.category_type {
            if let Some(kind) = parse_choice(v, "category_type", &raw, CategoryType::parse) {
                self.category_type = kind;
            }
        }
    }

    fn validate(&self, v: &mut Validator) {
        v.presence("name", &self.name);
        v.max_length("name", &self.name, 50);
        v.presence("icon", &self.icon);
    }
}

const COLUMNS: &str =
    "id, user_id, name, icon, description, color, icon_name, category_type, created_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Category> {
    Ok(Category {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        icon: row.get(3)?,
        description: row.get(4)?,
        color: row.get(5)?,
        icon_name: row.get(6)?,
        category_type: enum_column(7, row.get(7)?, CategoryType::parse)?,
        created_at: row.get(8)?,
    })
}

fn name_taken(conn: &Connection, user_id: i64, name: &str, except_id: i64) -> Result<bool> {
    let taken: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM categories WHERE user_id = ?1 AND name = ?2 AND id != ?3)",
        params![user_id, name, except_id],
        |row| row.get(0),
    )?;
    Ok(taken)
}

pub fn count_for_user(conn: &Connection, user_id: i64) -> Result<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM categories WHERE user_id = ?1",
        [user_id],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

fn taken_error() -> anyhow::Error {
    ValidationFailed(vec![FieldError::new("name", "has already been taken")]).into()
}

pub fn create(conn: &Connection, owner: &User, params: CategoryParams) -> Result<Category> {
    let mut v = Validator::new();
    let mut category = Category {
        id: 0,
        user_id: owner.id,
        name: String::new(),
        icon: String::new(),
        description: None,
        color: DEFAULT_COLOR.to_string(),
        icon_name: None,
        category_type: CategoryType::Variable,
        created_at: period::now(),
    };
    category.apply(params, &mut v);
    category.validate(&mut v);

    if let Some(max) = user::max_categories(conn, owner)? {
        if count_for_user(conn, owner.id)? >= max {
            v.add(
                "base",
                format!("You have reached the maximum of {} categories for your plan", max),
            );
        }
    }
    v.finish().map_err(ValidationFailed)?;
    if name_taken(conn, owner.id, &category.name, 0)? {
        return Err(taken_error());
    }

    let result = conn.execute(
        "INSERT INTO categories (user_id, name, icon, description, color, icon_name, category_type, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            category.user_id,
            category.name,
            category.icon,
            category.description,
            category.color,
            category.icon_name,
            category.category_type.as_str(),
            category.created_at,
        ],
    );
    if let Err(e) = result {
        let err = anyhow::Error::from(e);
        return Err(if is_constraint_violation(&err) { taken_error() } else { err });
    }
    category.id = conn.last_insert_rowid();
    Ok(category)
}

/// Instantiate a preset into the user's categories
pub fn add_preset(conn: &Connection, owner: &User, preset_name: &str) -> Result<Category> {
    let preset = find_preset(preset_name).ok_or_else(|| NotFound::new("Category preset"))?;
    create(conn, owner, preset.to_params())
}

pub fn find(conn: &Connection, user_id: i64, id: i64) -> Result<Category> {
    conn.query_row(
        &format!("SELECT {} FROM categories WHERE id = ?1 AND user_id = ?2", COLUMNS),
        params![id, user_id],
        from_row,
    )
    .optional()?
    .ok_or_else(|| NotFound::new("Category").into())
}

pub fn list(conn: &Connection, user_id: i64) -> Result<Vec<Category>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM categories WHERE user_id = ?1 ORDER BY name",
        COLUMNS
    ))?;
    let categories = stmt
        .query_map([user_id], from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(categories)
}

pub fn update(conn: &Connection, category: &mut Category, params: CategoryParams) -> Result<()> {
    let mut v = Validator::new();
    let mut updated = category.clone();
    updated.apply(params, &mut v);
    updated.validate(&mut v);
    v.finish().map_err(ValidationFailed)?;
    if name_taken(conn, updated.user_id, &updated.name, updated.id)? {
        return Err(taken_error());
    }

    conn.execute(
        "UPDATE categories SET name = ?1, icon = ?2, description = ?3, color = ?4,
                icon_name = ?5, category_type = ?6
         WHERE id = ?7 AND user_id = ?8",
        params![
            updated.name,
            updated.icon,
            updated.description,
            updated.color,
            updated.icon_name,
            updated.category_type.as_str(),
            updated.id,
            updated.user_id,
        ],
    )?;
    *category = updated;
    Ok(())
}

/// Delete a category together with its payments, budgets and recurring items
pub fn delete(conn: &Connection, user_id: i64, id: i64) -> Result<()> {
    let removed = conn.execute(
        "DELETE FROM categories WHERE id = ?1 AND user_id = ?2",
        params![id, user_id],
    )?;
    if removed == 0 {
        return Err(NotFound::new("Category").into());
    }
    Ok(())
}

// ============================================================================
// AGGREGATES
// ============================================================================

pub fn total_amount(conn: &Connection, category_id: i64) -> Result<f64> {
    let total: f64 = conn.query_row(
        "SELECT COALESCE(SUM(amount), 0) FROM payments WHERE category_id = ?1",
        [category_id],
        |row| row.get(0),
    )?;
    Ok(total)
}

/// Latest five payments
pub fn recent_transactions(conn: &Connection, category: &Category) -> Result<Vec<Payment>> {
    payment::list_for_category(conn, category.user_id, category.id, Some(5))
}

/// Total spent divided by the number of distinct months with payments
pub fn monthly_average(conn: &Connection, category_id: i64) -> Result<f64> {
    let (total, months): (f64, i64) = conn.query_row(
        "SELECT COALESCE(SUM(amount), 0), COUNT(DISTINCT strftime('%Y-%m', created_at))
         FROM payments WHERE category_id = ?1",
        [category_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    if months == 0 {
        return Ok(0.0);
    }
    Ok(round2(total / months as f64))
}

pub fn percentage_of_total_spending(conn: &Connection, category: &Category) -> Result<f64> {
    let user_total: f64 = conn.query_row(
        "SELECT COALESCE(SUM(amount), 0) FROM payments WHERE user_id = ?1",
        [category.user_id],
        |row| row.get(0),
    )?;
    let total = total_amount(conn, category.id)?;
    Ok(round2(percentage(total, user_total)))
}
