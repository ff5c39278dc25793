use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::{Local, NaiveDate};
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::LarderError;
use crate::models::{
    Collection, CollectionDetail, Ingredient, MealPlan, MealPlanDay, MealPlanDetail,
    MealPlanEntry, NewMealPlan, NewRecipe, NewRecipeIngredient, Recipe, RecipeDetail,
    RecipeIngredient, ShoppingList, ShoppingListDetail, ShoppingListItem, Unit, UpdateRecipe,
    UpdateShoppingListItem, User, plan_day_date,
};
use crate::shopping::{PlanRecipeEntry, PlanSnapshot, RecipeIngredientLine, ShoppingListLine};
use crate::units::UNIT_CONVERSIONS;

const RECIPE_COLUMNS: &str = "r.id, r.user_id, r.title, r.description, r.instructions, r.servings,
     r.image_url, r.created_at, r.updated_at";

const SHOPPING_LIST_COLUMNS: &str = "sl.id, sl.user_id, sl.meal_plan_id, sl.name,
     (SELECT COUNT(*) FROM shopping_list_items WHERE shopping_list_id = sl.id), sl.created_at";

const SHOPPING_ITEM_COLUMNS: &str = "sli.id, sli.shopping_list_id, sli.ingredient_id, i.name,
     sli.quantity, sli.unit, sli.bought, sli.in_stock_quantity";

/// Turns "no row" into [`LarderError::NotFound`]; other database errors pass through.
trait OrNotFound<T> {
    fn or_not_found(self, msg: impl FnOnce() -> String) -> Result<T>;
}

impl<T> OrNotFound<T> for rusqlite::Result<T> {
    fn or_not_found(self, msg: impl FnOnce() -> String) -> Result<T> {
        match self {
            Err(rusqlite::Error::QueryReturnedNoRows) => Err(LarderError::not_found(msg()).into()),
            other => Ok(other?),
        }
    }
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

    #[allow(clippy::too_many_lines)]
    fn migrate(&self) -> Result<()> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    username TEXT NOT NULL UNIQUE COLLATE NOCASE,
                    password_hash TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS sessions (
                    token_hash TEXT PRIMARY KEY,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS units (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL UNIQUE COLLATE NOCASE
                );

                CREATE TABLE IF NOT EXISTS ingredients (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL UNIQUE COLLATE NOCASE
                );

                CREATE TABLE IF NOT EXISTS recipes (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    title TEXT NOT NULL,
                    description TEXT,
                    instructions TEXT,
                    servings REAL NOT NULL DEFAULT 1.0,
                    image_url TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS recipe_ingredients (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    recipe_id INTEGER NOT NULL REFERENCES recipes(id) ON DELETE CASCADE,
                    ingredient_id INTEGER NOT NULL REFERENCES ingredients(id),
                    quantity REAL NOT NULL,
                    unit_id INTEGER NOT NULL REFERENCES units(id)
                );

                CREATE TABLE IF NOT EXISTS collections (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    description TEXT,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS collection_recipes (
                    collection_id INTEGER NOT NULL REFERENCES collections(id) ON DELETE CASCADE,
                    recipe_id INTEGER NOT NULL REFERENCES recipes(id) ON DELETE CASCADE,
                    added_at TEXT NOT NULL,
                    PRIMARY KEY (collection_id, recipe_id)
                );

                CREATE TABLE IF NOT EXISTS meal_plans (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    start_date TEXT NOT NULL,
                    days INTEGER NOT NULL CHECK (days BETWEEN 1 AND 31),
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS meal_plan_recipes (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    meal_plan_id INTEGER NOT NULL REFERENCES meal_plans(id) ON DELETE CASCADE,
                    day INTEGER NOT NULL,
                    recipe_id INTEGER NOT NULL REFERENCES recipes(id) ON DELETE CASCADE,
                    quantity REAL NOT NULL DEFAULT 1.0
                );

                CREATE TABLE IF NOT EXISTS shopping_lists (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    meal_plan_id INTEGER REFERENCES meal_plans(id) ON DELETE SET NULL,
                    name TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS shopping_list_items (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    shopping_list_id INTEGER NOT NULL REFERENCES shopping_lists(id) ON DELETE CASCADE,
                    ingredient_id INTEGER NOT NULL REFERENCES ingredients(id),
                    quantity REAL NOT NULL,
                    unit TEXT NOT NULL,
                    bought INTEGER NOT NULL DEFAULT 0,
                    in_stock_quantity REAL NOT NULL DEFAULT 0 CHECK (in_stock_quantity >= 0)
                );

                CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
                CREATE INDEX IF NOT EXISTS idx_recipes_user ON recipes(user_id);
                CREATE INDEX IF NOT EXISTS idx_recipe_ingredients_recipe ON recipe_ingredients(recipe_id);
                CREATE INDEX IF NOT EXISTS idx_collections_user ON collections(user_id);
                CREATE INDEX IF NOT EXISTS idx_meal_plans_user ON meal_plans(user_id);
                CREATE INDEX IF NOT EXISTS idx_meal_plan_recipes_plan ON meal_plan_recipes(meal_plan_id);
                CREATE INDEX IF NOT EXISTS idx_shopping_lists_user ON shopping_lists(user_id);
                CREATE INDEX IF NOT EXISTS idx_shopping_list_items_list ON shopping_list_items(shopping_list_id);

                PRAGMA user_version = 1;",
            )?;

            for conv in UNIT_CONVERSIONS {
                self.conn.execute(
                    "INSERT OR IGNORE INTO units (name) VALUES (?1)",
                    params![conv.name],
                )?;
            }
        }

        Ok(())
    }

    // --- Row mapping helpers ---

    fn user_from_row(row: &rusqlite::Row) -> rusqlite::Result<User> {
        Ok(User {
            id: row.get(0)?,
            username: row.get(1)?,
            created_at: row.get(2)?,
        })
    }

    fn recipe_from_row(row: &rusqlite::Row) -> rusqlite::Result<Recipe> {
        Ok(Recipe {
            id: row.get(0)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            instructions: row.get(4)?,
            servings: row.get(5)?,
            image_url: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    fn meal_plan_from_row(row: &rusqlite::Row) -> rusqlite::Result<MealPlan> {
        Ok(MealPlan {
            id: row.get(0)?,
            user_id: row.get(1)?,
            name: row.get(2)?,
            start_date: row.get(3)?,
            days: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    fn collection_from_row(row: &rusqlite::Row) -> rusqlite::Result<Collection> {
        Ok(Collection {
            id: row.get(0)?,
            user_id: row.get(1)?,
            name: row.get(2)?,
            description: row.get(3)?,
            recipe_count: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    fn shopping_list_from_row(row: &rusqlite::Row) -> rusqlite::Result<ShoppingList> {
        Ok(ShoppingList {
            id: row.get(0)?,
            user_id: row.get(1)?,
            meal_plan_id: row.get(2)?,
            name: row.get(3)?,
            item_count: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    fn shopping_item_from_row(row: &rusqlite::Row) -> rusqlite::Result<ShoppingListItem> {
        Ok(ShoppingListItem {
            id: row.get(0)?,
            shopping_list_id: row.get(1)?,
            ingredient_id: row.get(2)?,
            ingredient_name: row.get(3)?,
            quantity: row.get(4)?,
            unit: row.get(5)?,
            bought: row.get(6)?,
            in_stock_quantity: row.get(7)?,
        })
    }

    // --- Users & sessions ---

    pub fn create_user(&self, username: &str, password_hash: &str) -> Result<User> {
        let now = Local::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO users (username, password_hash, created_at) VALUES (?1, ?2, ?3)",
                params![username, password_hash, now],
            )
            .with_context(|| format!("Failed to create user '{username}'"))?;
        let id = self.conn.last_insert_rowid();
        self.get_user_by_id(id)
    }

    pub fn get_user_by_id(&self, id: i64) -> Result<User> {
        self.conn
            .query_row(
                "SELECT id, username, created_at FROM users WHERE id = ?1",
                params![id],
                Self::user_from_row,
            )
            .or_not_found(|| "User not found".to_string())
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let user = self
            .conn
            .query_row(
                "SELECT id, username, created_at FROM users WHERE username = ?1",
                params![username],
                Self::user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    /// The user together with their stored password hash.
    pub fn get_user_credentials(&self, username: &str) -> Result<Option<(User, String)>> {
        let creds = self
            .conn
            .query_row(
                "SELECT id, username, created_at, password_hash FROM users WHERE username = ?1",
                params![username],
                |row| Ok((Self::user_from_row(row)?, row.get::<_, String>(3)?)),
            )
            .optional()?;
        Ok(creds)
    }

    pub fn create_session(&self, user_id: i64, token_hash: &str) -> Result<()> {
        let now = Local::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO sessions (token_hash, user_id, created_at) VALUES (?1, ?2, ?3)",
            params![token_hash, user_id, now],
        )?;
        Ok(())
    }

    pub fn get_user_by_token_hash(&self, token_hash: &str) -> Result<Option<User>> {
        let user = self
            .conn
            .query_row(
                "SELECT u.id, u.username, u.created_at
                 FROM sessions s JOIN users u ON s.user_id = u.id
                 WHERE s.token_hash = ?1",
                params![token_hash],
                Self::user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn delete_session(&self, token_hash: &str) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM sessions WHERE token_hash = ?1",
            params![token_hash],
        )?;
        Ok(rows > 0)
    }

    // --- Units & ingredients ---

    pub fn list_units(&self) -> Result<Vec<Unit>> {
        let mut stmt = self.conn.prepare("SELECT id, name FROM units ORDER BY id")?;
        let units = stmt
            .query_map([], |row| {
                Ok(Unit {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(units)
    }

    pub fn get_unit(&self, id: i64) -> Result<Unit> {
        self.conn
            .query_row(
                "SELECT id, name FROM units WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Unit {
                        id: row.get(0)?,
                        name: row.get(1)?,
                    })
                },
            )
            .or_not_found(|| format!("Unit {id} not found"))
    }

    pub fn get_unit_by_name(&self, name: &str) -> Result<Option<Unit>> {
        let unit = self
            .conn
            .query_row(
                "SELECT id, name FROM units WHERE name = ?1",
                params![name],
                |row| {
                    Ok(Unit {
                        id: row.get(0)?,
                        name: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(unit)
    }

    pub fn create_unit(&self, name: &str) -> Result<Unit> {
        if self.get_unit_by_name(name)?.is_some() {
            bail!(LarderError::Conflict(format!("Unit '{name}' already exists")));
        }
        self.conn
            .execute("INSERT INTO units (name) VALUES (?1)", params![name])?;
        let id = self.conn.last_insert_rowid();
        self.get_unit(id)
    }

    pub fn get_or_create_unit(&self, name: &str) -> Result<Unit> {
        if let Some(unit) = self.get_unit_by_name(name)? {
            return Ok(unit);
        }
        self.create_unit(name)
    }

    fn ingredient_in(conn: &Connection, name: &str) -> Result<Ingredient> {
        conn.execute(
            "INSERT OR IGNORE INTO ingredients (name) VALUES (?1)",
            params![name],
        )?;
        conn.query_row(
            "SELECT id, name FROM ingredients WHERE name = ?1",
            params![name],
            |row| {
                Ok(Ingredient {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            },
        )
        .with_context(|| format!("Failed to resolve ingredient '{name}'"))
    }

    pub fn get_or_create_ingredient(&self, name: &str) -> Result<Ingredient> {
        Self::ingredient_in(&self.conn, name)
    }

    pub fn list_ingredients(&self, search: Option<&str>) -> Result<Vec<Ingredient>> {
        let pattern = format!("%{}%", escape_like(search.unwrap_or("")));
        let mut stmt = self.conn.prepare(
            "SELECT id, name FROM ingredients WHERE name LIKE ?1 ESCAPE '\\' ORDER BY name LIMIT 100",
        )?;
        let ingredients = stmt
            .query_map(params![pattern], |row| {
                Ok(Ingredient {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ingredients)
    }

    // --- Recipes ---

    fn insert_recipe_ingredient(
        conn: &Connection,
        recipe_id: i64,
        ingredient: &NewRecipeIngredient,
    ) -> Result<i64> {
        let unit_exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM units WHERE id = ?1)",
            params![ingredient.unit_id],
            |row| row.get(0),
        )?;
        if !unit_exists {
            bail!(LarderError::invalid(format!(
                "Unit with id {} not found",
                ingredient.unit_id
            )));
        }
        let food = Self::ingredient_in(conn, ingredient.ingredient_name.trim())?;
        conn.execute(
            "INSERT INTO recipe_ingredients (recipe_id, ingredient_id, quantity, unit_id)
             VALUES (?1, ?2, ?3, ?4)",
            params![recipe_id, food.id, ingredient.quantity, ingredient.unit_id],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn touch_recipe(conn: &Connection, recipe_id: i64) -> Result<()> {
        let now = Local::now().to_rfc3339();
        conn.execute(
            "UPDATE recipes SET updated_at = ?1 WHERE id = ?2",
            params![now, recipe_id],
        )?;
        Ok(())
    }

    pub fn create_recipe(&self, user_id: i64, recipe: &NewRecipe) -> Result<RecipeDetail> {
        let now = Local::now().to_rfc3339();
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO recipes (user_id, title, description, instructions, servings, image_url, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                user_id,
                recipe.title.trim(),
                recipe.description,
                recipe.instructions,
                recipe.servings,
                recipe.image_url,
                now,
                now,
            ],
        )?;
        let recipe_id = tx.last_insert_rowid();
        for ing in &recipe.ingredients {
            Self::insert_recipe_ingredient(&tx, recipe_id, ing)?;
        }
        tx.commit()?;
        self.get_recipe_detail(user_id, recipe_id)
    }

    pub fn get_recipe(&self, user_id: i64, id: i64) -> Result<Recipe> {
        self.conn
            .query_row(
                &format!("SELECT {RECIPE_COLUMNS} FROM recipes r WHERE r.id = ?1 AND r.user_id = ?2"),
                params![id, user_id],
                Self::recipe_from_row,
            )
            .or_not_found(|| format!("Recipe {id} not found"))
    }

    pub fn get_recipe_by_title(&self, user_id: i64, title: &str) -> Result<Recipe> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {RECIPE_COLUMNS} FROM recipes r
                     WHERE LOWER(r.title) = LOWER(?1) AND r.user_id = ?2
                     ORDER BY r.id LIMIT 1"
                ),
                params![title, user_id],
                Self::recipe_from_row,
            )
            .or_not_found(|| format!("Recipe '{title}' not found"))
    }

    pub fn get_recipe_ingredients(&self, recipe_id: i64) -> Result<Vec<RecipeIngredient>> {
        let mut stmt = self.conn.prepare(
            "SELECT ri.id, ri.recipe_id, ri.ingredient_id, i.name, ri.quantity, ri.unit_id, u.name
             FROM recipe_ingredients ri
             JOIN ingredients i ON ri.ingredient_id = i.id
             LEFT JOIN units u ON ri.unit_id = u.id
             WHERE ri.recipe_id = ?1
             ORDER BY ri.id",
        )?;
        let ingredients = stmt
            .query_map(params![recipe_id], |row| {
                Ok(RecipeIngredient {
                    id: row.get(0)?,
                    recipe_id: row.get(1)?,
                    ingredient_id: row.get(2)?,
                    ingredient_name: row.get(3)?,
                    quantity: row.get(4)?,
                    unit_id: row.get(5)?,
                    unit_name: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ingredients)
    }

    pub fn get_recipe_detail(&self, user_id: i64, id: i64) -> Result<RecipeDetail> {
        let recipe = self.get_recipe(user_id, id)?;
        let ingredients = self.get_recipe_ingredients(id)?;
        Ok(RecipeDetail {
            recipe,
            ingredients,
        })
    }

    pub fn list_recipes(&self, user_id: i64, search: Option<&str>) -> Result<Vec<Recipe>> {
        let pattern = format!("%{}%", escape_like(search.unwrap_or("")));
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECIPE_COLUMNS} FROM recipes r
             WHERE r.user_id = ?1 AND r.title LIKE ?2 ESCAPE '\\'
             ORDER BY r.title COLLATE NOCASE, r.id"
        ))?;
        let recipes = stmt
            .query_map(params![user_id, pattern], Self::recipe_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(recipes)
    }

    fn apply_recipe_update(conn: &Connection, id: i64, update: &UpdateRecipe) -> Result<()> {
        let now = Local::now().to_rfc3339();
        if let Some(ref title) = update.title {
            conn.execute(
                "UPDATE recipes SET title = ?1, updated_at = ?2 WHERE id = ?3",
                params![title.trim(), now, id],
            )?;
        }
        if let Some(ref description) = update.description {
            conn.execute(
                "UPDATE recipes SET description = ?1, updated_at = ?2 WHERE id = ?3",
                params![description, now, id],
            )?;
        }
        if let Some(ref instructions) = update.instructions {
            conn.execute(
                "UPDATE recipes SET instructions = ?1, updated_at = ?2 WHERE id = ?3",
                params![instructions, now, id],
            )?;
        }
        if let Some(servings) = update.servings {
            conn.execute(
                "UPDATE recipes SET servings = ?1, updated_at = ?2 WHERE id = ?3",
                params![servings, now, id],
            )?;
        }
        if let Some(ref image_url) = update.image_url {
            conn.execute(
                "UPDATE recipes SET image_url = ?1, updated_at = ?2 WHERE id = ?3",
                params![image_url, now, id],
            )?;
        }
        Ok(())
    }

    /// Apply field changes and, when given, swap the whole ingredient list.
    /// Either everything is written or nothing is.
    pub fn update_recipe(
        &self,
        user_id: i64,
        id: i64,
        update: &UpdateRecipe,
        ingredients: Option<&[NewRecipeIngredient]>,
    ) -> Result<RecipeDetail> {
        // Verify ownership
        self.get_recipe(user_id, id)?;

        let tx = self.conn.unchecked_transaction()?;
        Self::apply_recipe_update(&tx, id, update)?;
        if let Some(ingredients) = ingredients {
            tx.execute(
                "DELETE FROM recipe_ingredients WHERE recipe_id = ?1",
                params![id],
            )?;
            for ing in ingredients {
                Self::insert_recipe_ingredient(&tx, id, ing)?;
            }
            Self::touch_recipe(&tx, id)?;
        }
        tx.commit()?;

        self.get_recipe_detail(user_id, id)
    }

    pub fn add_recipe_ingredient(
        &self,
        user_id: i64,
        recipe_id: i64,
        ingredient: &NewRecipeIngredient,
    ) -> Result<RecipeIngredient> {
        self.get_recipe(user_id, recipe_id)?;
        let id = Self::insert_recipe_ingredient(&self.conn, recipe_id, ingredient)?;
        Self::touch_recipe(&self.conn, recipe_id)?;
        self.get_recipe_ingredients(recipe_id)?
            .into_iter()
            .find(|ri| ri.id == id)
            .context("Recipe ingredient not found")
    }

    pub fn remove_recipe_ingredient(
        &self,
        user_id: i64,
        recipe_id: i64,
        ingredient_name: &str,
    ) -> Result<bool> {
        self.get_recipe(user_id, recipe_id)?;
        let rows = self.conn.execute(
            "DELETE FROM recipe_ingredients WHERE recipe_id = ?1 AND ingredient_id IN (
                SELECT id FROM ingredients WHERE name = ?2
            )",
            params![recipe_id, ingredient_name.trim()],
        )?;
        if rows > 0 {
            Self::touch_recipe(&self.conn, recipe_id)?;
        }
        Ok(rows > 0)
    }

    pub fn delete_recipe(&self, user_id: i64, id: i64) -> Result<bool> {
        // Ingredient lines, collection memberships and plan entries cascade
        let rows = self.conn.execute(
            "DELETE FROM recipes WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )?;
        Ok(rows > 0)
    }

    // --- Collections ---

    pub fn create_collection(
        &self,
        user_id: i64,
        name: &str,
        description: Option<&str>,
    ) -> Result<Collection> {
        let now = Local::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO collections (user_id, name, description, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![user_id, name, description, now],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_collection(user_id, id)
    }

    pub fn get_collection(&self, user_id: i64, id: i64) -> Result<Collection> {
        self.conn
            .query_row(
                "SELECT c.id, c.user_id, c.name, c.description,
                        (SELECT COUNT(*) FROM collection_recipes WHERE collection_id = c.id),
                        c.created_at
                 FROM collections c WHERE c.id = ?1 AND c.user_id = ?2",
                params![id, user_id],
                Self::collection_from_row,
            )
            .or_not_found(|| format!("Collection {id} not found"))
    }

    pub fn list_collections(&self, user_id: i64) -> Result<Vec<Collection>> {
        let mut stmt = self.conn.prepare(
            "SELECT c.id, c.user_id, c.name, c.description,
                    (SELECT COUNT(*) FROM collection_recipes WHERE collection_id = c.id),
                    c.created_at
             FROM collections c WHERE c.user_id = ?1
             ORDER BY c.name COLLATE NOCASE, c.id",
        )?;
        let collections = stmt
            .query_map(params![user_id], Self::collection_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(collections)
    }

    pub fn get_collection_detail(&self, user_id: i64, id: i64) -> Result<CollectionDetail> {
        let collection = self.get_collection(user_id, id)?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECIPE_COLUMNS} FROM recipes r
             JOIN collection_recipes cr ON cr.recipe_id = r.id
             WHERE cr.collection_id = ?1
             ORDER BY cr.added_at, r.id"
        ))?;
        let recipes = stmt
            .query_map(params![id], Self::recipe_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(CollectionDetail {
            collection,
            recipes,
        })
    }

    /// Returns false when the recipe was already in the collection.
    pub fn add_recipe_to_collection(
        &self,
        user_id: i64,
        collection_id: i64,
        recipe_id: i64,
    ) -> Result<bool> {
        self.get_collection(user_id, collection_id)?;
        self.get_recipe(user_id, recipe_id)?;
        let now = Local::now().to_rfc3339();
        let rows = self.conn.execute(
            "INSERT OR IGNORE INTO collection_recipes (collection_id, recipe_id, added_at)
             VALUES (?1, ?2, ?3)",
            params![collection_id, recipe_id, now],
        )?;
        Ok(rows > 0)
    }

    pub fn remove_recipe_from_collection(
        &self,
        user_id: i64,
        collection_id: i64,
        recipe_id: i64,
    ) -> Result<bool> {
        self.get_collection(user_id, collection_id)?;
        let rows = self.conn.execute(
            "DELETE FROM collection_recipes WHERE collection_id = ?1 AND recipe_id = ?2",
            params![collection_id, recipe_id],
        )?;
        Ok(rows > 0)
    }

    pub fn delete_collection(&self, user_id: i64, id: i64) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM collections WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )?;
        Ok(rows > 0)
    }

    // --- Meal plans ---

    fn meal_plan_in(conn: &Connection, user_id: i64, id: i64) -> Result<MealPlan> {
        conn.query_row(
            "SELECT id, user_id, name, start_date, days, created_at
             FROM meal_plans WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
            Self::meal_plan_from_row,
        )
        .or_not_found(|| format!("Meal plan {id} not found"))
    }

    pub fn create_meal_plan(&self, user_id: i64, plan: &NewMealPlan) -> Result<MealPlan> {
        let now = Local::now().to_rfc3339();
        let start = plan.start_date.format("%Y-%m-%d").to_string();
        self.conn.execute(
            "INSERT INTO meal_plans (user_id, name, start_date, days, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![user_id, plan.name.trim(), start, plan.days, now],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_meal_plan(user_id, id)
    }

    pub fn get_meal_plan(&self, user_id: i64, id: i64) -> Result<MealPlan> {
        Self::meal_plan_in(&self.conn, user_id, id)
    }

    pub fn list_meal_plans(&self, user_id: i64) -> Result<Vec<MealPlan>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, name, start_date, days, created_at
             FROM meal_plans WHERE user_id = ?1
             ORDER BY start_date DESC, id DESC",
        )?;
        let plans = stmt
            .query_map(params![user_id], Self::meal_plan_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(plans)
    }

    pub fn get_meal_plan_entries(&self, plan_id: i64) -> Result<Vec<MealPlanEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT mpr.id, mpr.meal_plan_id, mpr.day, mpr.recipe_id, r.title, mpr.quantity
             FROM meal_plan_recipes mpr
             JOIN recipes r ON mpr.recipe_id = r.id
             WHERE mpr.meal_plan_id = ?1
             ORDER BY mpr.day, mpr.id",
        )?;
        let entries = stmt
            .query_map(params![plan_id], |row| {
                Ok(MealPlanEntry {
                    id: row.get(0)?,
                    meal_plan_id: row.get(1)?,
                    day: row.get(2)?,
                    recipe_id: row.get(3)?,
                    recipe_title: row.get(4)?,
                    quantity: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn get_meal_plan_detail(&self, user_id: i64, id: i64) -> Result<MealPlanDetail> {
        let plan = self.get_meal_plan(user_id, id)?;
        let start = NaiveDate::parse_from_str(&plan.start_date, "%Y-%m-%d")
            .with_context(|| format!("Corrupt start date '{}'", plan.start_date))?;
        let entries = self.get_meal_plan_entries(id)?;

        let schedule = (0..plan.days)
            .map(|day| MealPlanDay {
                day,
                date: plan_day_date(start, day).format("%Y-%m-%d").to_string(),
                entries: entries.iter().filter(|e| e.day == day).cloned().collect(),
            })
            .collect();

        Ok(MealPlanDetail { plan, schedule })
    }

    pub fn add_meal_plan_entry(
        &self,
        user_id: i64,
        plan_id: i64,
        recipe_id: i64,
        day: i64,
        quantity: f64,
    ) -> Result<MealPlanEntry> {
        let plan = self.get_meal_plan(user_id, plan_id)?;
        crate::models::validate_plan_day(day, plan.days)?;
        self.get_recipe(user_id, recipe_id)?;
        self.conn.execute(
            "INSERT INTO meal_plan_recipes (meal_plan_id, day, recipe_id, quantity)
             VALUES (?1, ?2, ?3, ?4)",
            params![plan_id, day, recipe_id, quantity],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_meal_plan_entries(plan_id)?
            .into_iter()
            .find(|e| e.id == id)
            .context("Meal plan entry not found")
    }

    pub fn remove_meal_plan_entry(&self, user_id: i64, plan_id: i64, entry_id: i64) -> Result<bool> {
        self.get_meal_plan(user_id, plan_id)?;
        let rows = self.conn.execute(
            "DELETE FROM meal_plan_recipes WHERE id = ?1 AND meal_plan_id = ?2",
            params![entry_id, plan_id],
        )?;
        Ok(rows > 0)
    }

    pub fn delete_meal_plan(&self, user_id: i64, id: i64) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM meal_plans WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )?;
        Ok(rows > 0)
    }

    /// Read everything the aggregator needs for one plan inside a single
    /// transaction, so recipes edited mid-request cannot tear the snapshot.
    pub fn load_plan_snapshot(&self, user_id: i64, plan_id: i64) -> Result<(MealPlan, PlanSnapshot)> {
        let tx = self.conn.unchecked_transaction()?;
        let plan = Self::meal_plan_in(&tx, user_id, plan_id)?;

        let entries = {
            let mut stmt = tx.prepare(
                "SELECT recipe_id, quantity FROM meal_plan_recipes
                 WHERE meal_plan_id = ?1 ORDER BY day, id",
            )?;
            let entries = stmt
                .query_map(params![plan_id], |row| {
                    Ok(PlanRecipeEntry {
                        recipe_id: row.get(0)?,
                        multiplier: row.get(1)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            entries
        };

        let mut recipe_ingredients: HashMap<i64, Vec<RecipeIngredientLine>> = HashMap::new();
        {
            let mut stmt = tx.prepare(
                "SELECT ri.recipe_id, ri.ingredient_id, i.name, ri.quantity, ri.unit_id
                 FROM recipe_ingredients ri
                 JOIN ingredients i ON ri.ingredient_id = i.id
                 WHERE ri.recipe_id IN (
                     SELECT recipe_id FROM meal_plan_recipes WHERE meal_plan_id = ?1
                 )
                 ORDER BY ri.recipe_id, ri.id",
            )?;
            let rows = stmt.query_map(params![plan_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    RecipeIngredientLine {
                        ingredient_id: row.get(1)?,
                        ingredient_name: row.get(2)?,
                        quantity: row.get(3)?,
                        unit_id: row.get(4)?,
                    },
                ))
            })?;
            for row in rows {
                let (recipe_id, line) = row?;
                recipe_ingredients.entry(recipe_id).or_default().push(line);
            }
        }

        let unit_name_by_id = {
            let mut stmt = tx.prepare("SELECT id, name FROM units")?;
            let names = stmt
                .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
                .collect::<Result<HashMap<_, _>, _>>()?;
            names
        };

        tx.commit()?;
        Ok((
            plan,
            PlanSnapshot {
                entries,
                recipe_ingredients,
                unit_name_by_id,
            },
        ))
    }

    // --- Shopping lists ---

    pub fn insert_shopping_list(
        &self,
        user_id: i64,
        meal_plan_id: Option<i64>,
        name: &str,
        lines: &[ShoppingListLine],
    ) -> Result<ShoppingList> {
        let now = Local::now().to_rfc3339();
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO shopping_lists (user_id, meal_plan_id, name, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![user_id, meal_plan_id, name, now],
        )?;
        let list_id = tx.last_insert_rowid();
        {
            let mut stmt = tx.prepare(
                "INSERT INTO shopping_list_items
                    (shopping_list_id, ingredient_id, quantity, unit, bought, in_stock_quantity)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for line in lines {
                stmt.execute(params![
                    list_id,
                    line.ingredient_id,
                    line.quantity,
                    line.unit,
                    line.bought,
                    line.in_stock_quantity,
                ])?;
            }
        }
        tx.commit()?;
        self.get_shopping_list(user_id, list_id)
    }

    pub fn get_shopping_list(&self, user_id: i64, id: i64) -> Result<ShoppingList> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {SHOPPING_LIST_COLUMNS} FROM shopping_lists sl
                     WHERE sl.id = ?1 AND sl.user_id = ?2"
                ),
                params![id, user_id],
                Self::shopping_list_from_row,
            )
            .or_not_found(|| format!("Shopping list {id} not found"))
    }

    pub fn list_shopping_lists(&self, user_id: i64) -> Result<Vec<ShoppingList>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SHOPPING_LIST_COLUMNS} FROM shopping_lists sl
             WHERE sl.user_id = ?1 ORDER BY sl.id DESC"
        ))?;
        let lists = stmt
            .query_map(params![user_id], Self::shopping_list_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(lists)
    }

    pub fn get_shopping_list_items(&self, list_id: i64) -> Result<Vec<ShoppingListItem>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SHOPPING_ITEM_COLUMNS}
             FROM shopping_list_items sli
             JOIN ingredients i ON sli.ingredient_id = i.id
             WHERE sli.shopping_list_id = ?1
             ORDER BY i.name COLLATE NOCASE, sli.id"
        ))?;
        let items = stmt
            .query_map(params![list_id], Self::shopping_item_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    pub fn get_shopping_list_detail(&self, user_id: i64, id: i64) -> Result<ShoppingListDetail> {
        let list = self.get_shopping_list(user_id, id)?;
        let items = self.get_shopping_list_items(id)?;
        Ok(ShoppingListDetail { list, items })
    }

    pub fn update_shopping_list_item(
        &self,
        user_id: i64,
        list_id: i64,
        item_id: i64,
        update: &UpdateShoppingListItem,
    ) -> Result<ShoppingListItem> {
        self.get_shopping_list(user_id, list_id)?;
        let item = || {
            self.conn
                .query_row(
                    &format!(
                        "SELECT {SHOPPING_ITEM_COLUMNS}
                         FROM shopping_list_items sli
                         JOIN ingredients i ON sli.ingredient_id = i.id
                         WHERE sli.id = ?1 AND sli.shopping_list_id = ?2"
                    ),
                    params![item_id, list_id],
                    Self::shopping_item_from_row,
                )
                .or_not_found(|| format!("Shopping list item {item_id} not found"))
        };
        // Verify existence
        item()?;

        let tx = self.conn.unchecked_transaction()?;
        if let Some(bought) = update.bought {
            tx.execute(
                "UPDATE shopping_list_items SET bought = ?1 WHERE id = ?2",
                params![bought, item_id],
            )?;
        }
        if let Some(in_stock) = update.in_stock_quantity {
            tx.execute(
                "UPDATE shopping_list_items SET in_stock_quantity = ?1 WHERE id = ?2",
                params![in_stock, item_id],
            )?;
        }
        tx.commit()?;

        item()
    }

    pub fn delete_shopping_list(&self, user_id: i64, id: i64) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM shopping_lists WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )?;
        Ok(rows > 0)
    }
}

fn escape_like(query: &str) -> String {
    query
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}
