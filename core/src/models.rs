use anyhow::{Result, bail};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::LarderError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unit {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ingredient {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    pub servings: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecipeIngredient {
    pub id: i64,
    pub recipe_id: i64,
    pub ingredient_id: i64,
    pub ingredient_name: String,
    pub quantity: f64,
    pub unit_id: i64,
    // Joined field; absent when the unit row has been removed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecipeDetail {
    #[serde(flatten)]
    pub recipe: Recipe,
    pub ingredients: Vec<RecipeIngredient>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewRecipeIngredient {
    pub ingredient_name: String,
    pub quantity: f64,
    pub unit_id: i64,
}

#[derive(Debug, Clone)]
pub struct NewRecipe {
    pub title: String,
    pub description: Option<String>,
    pub instructions: Option<String>,
    pub servings: f64,
    pub image_url: Option<String>,
    pub ingredients: Vec<NewRecipeIngredient>,
}

#[derive(Debug, Clone, Default)]
#[allow(clippy::option_option)]
pub struct UpdateRecipe {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub instructions: Option<Option<String>>,
    pub servings: Option<f64>,
    pub image_url: Option<Option<String>>,
}

// --- Collections ---

#[derive(Debug, Clone, Serialize)]
pub struct Collection {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub recipe_count: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionDetail {
    #[serde(flatten)]
    pub collection: Collection,
    pub recipes: Vec<Recipe>,
}

// --- Meal plans ---

pub const MAX_PLAN_DAYS: i64 = 31;

#[derive(Debug, Clone, Serialize)]
pub struct MealPlan {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub start_date: String,
    pub days: i64,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewMealPlan {
    pub name: String,
    pub start_date: NaiveDate,
    pub days: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MealPlanEntry {
    pub id: i64,
    pub meal_plan_id: i64,
    pub day: i64,
    pub recipe_id: i64,
    pub recipe_title: String,
    pub quantity: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MealPlanDay {
    pub day: i64,
    pub date: String,
    pub entries: Vec<MealPlanEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MealPlanDetail {
    #[serde(flatten)]
    pub plan: MealPlan,
    pub schedule: Vec<MealPlanDay>,
}

// --- Shopping lists ---

#[derive(Debug, Clone, Serialize)]
pub struct ShoppingList {
    pub id: i64,
    pub user_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meal_plan_id: Option<i64>,
    pub name: String,
    pub item_count: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShoppingListItem {
    pub id: i64,
    pub shopping_list_id: i64,
    pub ingredient_id: i64,
    pub ingredient_name: String,
    pub quantity: f64,
    pub unit: String,
    pub bought: bool,
    pub in_stock_quantity: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShoppingListDetail {
    #[serde(flatten)]
    pub list: ShoppingList,
    pub items: Vec<ShoppingListItem>,
}

/// Header of a freshly generated list, as returned to API clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShoppingListRef {
    pub shopping_list_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateShoppingListItem {
    pub bought: Option<bool>,
    pub in_stock_quantity: Option<f64>,
}

// --- Validation ---

pub fn validate_username(username: &str) -> Result<String> {
    let name = username.trim();
    if name.len() < 3 || name.len() > 32 {
        bail!(LarderError::invalid("Username must be between 3 and 32 characters"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        bail!(LarderError::invalid("Username may only contain letters, digits, '_', '.' and '-'"));
    }
    Ok(name.to_string())
}

pub fn validate_password(password: &str) -> Result<()> {
    if password.chars().count() < 8 {
        bail!(LarderError::invalid("Password must be at least 8 characters"));
    }
    Ok(())
}

/// Trim a required name-like field and reject it if nothing is left.
pub fn validate_name(field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        bail!(LarderError::invalid(format!("{field} must not be empty")));
    }
    Ok(trimmed.to_string())
}

pub fn validate_servings(servings: f64) -> Result<()> {
    if !servings.is_finite() || servings <= 0.0 {
        bail!(LarderError::invalid("servings must be greater than 0"));
    }
    Ok(())
}

pub fn validate_quantity(quantity: f64) -> Result<()> {
    if !quantity.is_finite() || quantity <= 0.0 {
        bail!(LarderError::invalid("quantity must be greater than 0"));
    }
    Ok(())
}

pub fn validate_in_stock_quantity(quantity: f64) -> Result<()> {
    if !quantity.is_finite() || quantity < 0.0 {
        bail!(LarderError::invalid("in_stock_quantity must not be negative"));
    }
    Ok(())
}

pub fn validate_plan_days(days: i64) -> Result<()> {
    if !(1..=MAX_PLAN_DAYS).contains(&days) {
        bail!(LarderError::invalid(format!(
            "A meal plan must span between 1 and {MAX_PLAN_DAYS} days"
        )));
    }
    Ok(())
}

pub fn validate_plan_day(day: i64, days: i64) -> Result<()> {
    if day < 0 || day >= days {
        bail!(LarderError::invalid(format!(
            "day must be between 0 and {} for this plan",
            days.saturating_sub(1)
        )));
    }
    Ok(())
}

pub fn validate_new_recipe(recipe: &NewRecipe) -> Result<()> {
    validate_name("title", &recipe.title)?;
    validate_servings(recipe.servings)?;
    for ing in &recipe.ingredients {
        validate_name("ingredient_name", &ing.ingredient_name)?;
        validate_quantity(ing.quantity)?;
    }
    Ok(())
}

/// Calendar date of `day` (0-based) in a plan starting on `start`.
#[must_use]
pub fn plan_day_date(start: NaiveDate, day: i64) -> NaiveDate {
    start + chrono::Duration::days(day)
}
