use std::path::Path;

use anyhow::{Result, anyhow, bail};
use serde::Serialize;

use crate::auth::{self, AuthError};
use crate::db::Database;
use crate::error::LarderError;
use crate::models::{
    self, Collection, MealPlan, MealPlanEntry, NewMealPlan, NewRecipe, NewRecipeIngredient,
    RecipeDetail, RecipeIngredient, ShoppingListItem, ShoppingListRef, Unit, UpdateRecipe,
    UpdateShoppingListItem, User,
};

pub const CSV_HEADER: [&str; 5] = ["ingredient", "quantity", "unit", "bought", "in_stock_quantity"];

/// A freshly issued login. The token is only ever visible here.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub token: String,
    pub user: User,
}

#[derive(Serialize)]
struct CsvRow<'a> {
    ingredient: &'a str,
    quantity: f64,
    unit: &'a str,
    bought: bool,
    in_stock_quantity: f64,
}

/// Validating facade over [`Database`] shared by the CLI and the HTTP server.
///
/// Plain reads go straight to [`LarderService::db`]; anything that validates
/// input, spans several tables or touches credentials lives here.
pub struct LarderService {
    db: Database,
}

impl LarderService {
    pub fn open(db_path: &Path) -> Result<Self> {
        let db = Database::open(db_path)?;
        Ok(Self { db })
    }

    pub fn new_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self { db })
    }

    #[must_use]
    pub fn db(&self) -> &Database {
        &self.db
    }

    // --- Users ---

    pub fn register(&self, username: &str, password: &str) -> Result<User> {
        let username = models::validate_username(username)?;
        models::validate_password(password)?;
        if self.db.get_user_by_username(&username)?.is_some() {
            return Err(AuthError::UsernameTaken(username).into());
        }
        let hash = auth::hash_password(password)?;
        self.db.create_user(&username, &hash)
    }

    pub fn login(&self, username: &str, password: &str) -> Result<Session> {
        let Some((user, hash)) = self.db.get_user_credentials(username.trim())? else {
            return Err(AuthError::InvalidCredentials.into());
        };
        if !auth::verify_password(password, &hash) {
            return Err(AuthError::InvalidCredentials.into());
        }
        let token = auth::generate_token();
        self.db.create_session(user.id, &auth::hash_token(&token))?;
        tracing::debug!(user_id = user.id, "session created");
        Ok(Session { token, user })
    }

    pub fn logout(&self, token: &str) -> Result<bool> {
        self.db.delete_session(&auth::hash_token(token))
    }

    pub fn user_for_token(&self, token: &str) -> Result<Option<User>> {
        self.db.get_user_by_token_hash(&auth::hash_token(token))
    }

    /// Resolve a username for local (CLI) use, where the OS account is the
    /// trust boundary and no password is asked for.
    pub fn local_user(&self, username: &str) -> Result<User> {
        self.db
            .get_user_by_username(username.trim())?
            .ok_or_else(|| {
                LarderError::not_found(format!(
                    "No user named '{}'. Run `larder user register` first.",
                    username.trim()
                ))
                .into()
            })
    }

    // --- Units ---

    pub fn create_unit(&self, name: &str) -> Result<Unit> {
        let name = models::validate_name("name", name)?;
        self.db.create_unit(&name)
    }

    // --- Recipes ---

    pub fn create_recipe(&self, user_id: i64, recipe: &NewRecipe) -> Result<RecipeDetail> {
        models::validate_new_recipe(recipe)?;
        self.db.create_recipe(user_id, recipe)
    }

    /// Apply field changes and, when given, swap the full ingredient list.
    pub fn update_recipe(
        &self,
        user_id: i64,
        recipe_id: i64,
        update: &UpdateRecipe,
        ingredients: Option<&[NewRecipeIngredient]>,
    ) -> Result<RecipeDetail> {
        if ingredients.is_none()
            && update.title.is_none()
            && update.description.is_none()
            && update.instructions.is_none()
            && update.servings.is_none()
            && update.image_url.is_none()
        {
            bail!(LarderError::invalid("At least one field must be provided"));
        }
        if let Some(ref title) = update.title {
            models::validate_name("title", title)?;
        }
        if let Some(servings) = update.servings {
            models::validate_servings(servings)?;
        }
        if let Some(ingredients) = ingredients {
            for ing in ingredients {
                models::validate_name("ingredient_name", &ing.ingredient_name)?;
                models::validate_quantity(ing.quantity)?;
            }
        }

        self.db
            .update_recipe(user_id, recipe_id, update, ingredients)
    }

    pub fn add_recipe_ingredient(
        &self,
        user_id: i64,
        recipe_id: i64,
        ingredient: &NewRecipeIngredient,
    ) -> Result<RecipeIngredient> {
        models::validate_name("ingredient_name", &ingredient.ingredient_name)?;
        models::validate_quantity(ingredient.quantity)?;
        self.db.add_recipe_ingredient(user_id, recipe_id, ingredient)
    }

    // --- Collections ---

    pub fn create_collection(
        &self,
        user_id: i64,
        name: &str,
        description: Option<&str>,
    ) -> Result<Collection> {
        let name = models::validate_name("name", name)?;
        let description = description.map(str::trim).filter(|d| !d.is_empty());
        self.db.create_collection(user_id, &name, description)
    }

    // --- Meal plans ---

    pub fn create_meal_plan(&self, user_id: i64, plan: &NewMealPlan) -> Result<MealPlan> {
        models::validate_name("name", &plan.name)?;
        models::validate_plan_days(plan.days)?;
        self.db.create_meal_plan(user_id, plan)
    }

    pub fn add_meal_plan_entry(
        &self,
        user_id: i64,
        plan_id: i64,
        recipe_id: i64,
        day: i64,
        quantity: Option<f64>,
    ) -> Result<MealPlanEntry> {
        let quantity = quantity.unwrap_or(1.0);
        models::validate_quantity(quantity)?;
        self.db
            .add_meal_plan_entry(user_id, plan_id, recipe_id, day, quantity)
    }

    // --- Shopping lists ---

    /// Aggregate every recipe of a meal plan into a new persisted shopping list.
    ///
    /// Aggregation failures surface as a downcastable
    /// [`ShoppingError`](crate::shopping::ShoppingError) and nothing is stored.
    pub fn generate_shopping_list(
        &self,
        user_id: i64,
        plan_id: i64,
        name: Option<&str>,
    ) -> Result<ShoppingListRef> {
        let (plan, snapshot) = self.db.load_plan_snapshot(user_id, plan_id)?;
        let lines = snapshot.shopping_lines()?;

        let name = match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(n) => n.to_string(),
            None => format!("Shopping list for {}", plan.name),
        };
        let list = self
            .db
            .insert_shopping_list(user_id, Some(plan.id), &name, &lines)?;

        tracing::debug!(
            user_id,
            plan_id,
            shopping_list_id = list.id,
            entries = snapshot.entries.len(),
            items = lines.len(),
            "shopping list generated"
        );

        Ok(ShoppingListRef {
            shopping_list_id: list.id,
            name: list.name,
        })
    }

    pub fn update_shopping_list_item(
        &self,
        user_id: i64,
        list_id: i64,
        item_id: i64,
        update: &UpdateShoppingListItem,
    ) -> Result<ShoppingListItem> {
        if update.bought.is_none() && update.in_stock_quantity.is_none() {
            bail!(LarderError::invalid("At least one field must be provided"));
        }
        if let Some(in_stock) = update.in_stock_quantity {
            models::validate_in_stock_quantity(in_stock)?;
        }
        self.db
            .update_shopping_list_item(user_id, list_id, item_id, update)
    }

    pub fn export_shopping_list_csv(&self, user_id: i64, list_id: i64) -> Result<String> {
        let detail = self.db.get_shopping_list_detail(user_id, list_id)?;

        let mut wtr = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        wtr.write_record(CSV_HEADER)?;
        for item in &detail.items {
            wtr.serialize(CsvRow {
                ingredient: &item.ingredient_name,
                quantity: item.quantity,
                unit: &item.unit,
                bought: item.bought,
                in_stock_quantity: item.in_stock_quantity,
            })?;
        }
        let bytes = wtr
            .into_inner()
            .map_err(|e| anyhow!("Failed to flush CSV: {e}"))?;
        Ok(String::from_utf8(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shopping::ShoppingError;
    use chrono::NaiveDate;

    fn setup() -> (LarderService, User) {
        let svc = LarderService::new_in_memory().unwrap();
        let user = svc.register("alice", "password123").unwrap();
        (svc, user)
    }

    fn unit_id(svc: &LarderService, name: &str) -> i64 {
        svc.db().get_unit_by_name(name).unwrap().unwrap().id
    }

    fn ing(svc: &LarderService, name: &str, quantity: f64, unit: &str) -> NewRecipeIngredient {
        NewRecipeIngredient {
            ingredient_name: name.to_string(),
            quantity,
            unit_id: unit_id(svc, unit),
        }
    }

    fn recipe(title: &str, ingredients: Vec<NewRecipeIngredient>) -> NewRecipe {
        NewRecipe {
            title: title.to_string(),
            description: None,
            instructions: None,
            servings: 2.0,
            image_url: None,
            ingredients,
        }
    }

    fn plan(svc: &LarderService, user: &User) -> MealPlan {
        svc.create_meal_plan(
            user.id,
            &NewMealPlan {
                name: "Week 24".to_string(),
                start_date: NaiveDate::from_ymd_opt(2024, 6, 10).unwrap(),
                days: 7,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_register_duplicate_username() {
        let (svc, _) = setup();
        let err = svc.register("Alice", "password123").unwrap_err();
        assert_eq!(
            err.downcast_ref::<AuthError>(),
            Some(&AuthError::UsernameTaken("Alice".to_string()))
        );
    }

    #[test]
    fn test_register_validates_input() {
        let svc = LarderService::new_in_memory().unwrap();
        assert!(svc.register("x", "password123").is_err());
        assert!(svc.register("bob", "short").is_err());
    }

    #[test]
    fn test_login_and_token_roundtrip() {
        let (svc, user) = setup();
        let session = svc.login("alice", "password123").unwrap();
        assert_eq!(session.user.id, user.id);

        let found = svc.user_for_token(&session.token).unwrap().unwrap();
        assert_eq!(found.id, user.id);

        assert!(svc.logout(&session.token).unwrap());
        assert!(svc.user_for_token(&session.token).unwrap().is_none());
    }

    #[test]
    fn test_login_wrong_password() {
        let (svc, _) = setup();
        let err = svc.login("alice", "wrong-password").unwrap_err();
        assert_eq!(
            err.downcast_ref::<AuthError>(),
            Some(&AuthError::InvalidCredentials)
        );
        let err = svc.login("nobody", "password123").unwrap_err();
        assert!(err.downcast_ref::<AuthError>().is_some());
    }

    #[test]
    fn test_local_user() {
        let (svc, user) = setup();
        assert_eq!(svc.local_user(" alice ").unwrap().id, user.id);
        assert!(svc.local_user("bob").is_err());
    }

    #[test]
    fn test_create_recipe_validates() {
        let (svc, user) = setup();
        let bad = recipe(" ", vec![]);
        assert!(svc.create_recipe(user.id, &bad).is_err());

        let zero = recipe("Soup", vec![ing(&svc, "Water", 0.0, "liter")]);
        assert!(svc.create_recipe(user.id, &zero).is_err());
    }

    #[test]
    fn test_update_recipe_replaces_ingredients() {
        let (svc, user) = setup();
        let r = svc
            .create_recipe(user.id, &recipe("Soup", vec![ing(&svc, "Water", 1.0, "liter")]))
            .unwrap();
        let new_ings = vec![
            ing(&svc, "Stock", 1.0, "liter"),
            ing(&svc, "Salt", 1.0, "teaspoon"),
        ];
        let detail = svc
            .update_recipe(
                user.id,
                r.recipe.id,
                &UpdateRecipe {
                    title: Some("Broth".to_string()),
                    ..UpdateRecipe::default()
                },
                Some(&new_ings),
            )
            .unwrap();
        assert_eq!(detail.recipe.title, "Broth");
        assert_eq!(detail.ingredients.len(), 2);
        assert_eq!(detail.ingredients[0].ingredient_name, "Stock");
    }

    #[test]
    fn test_failed_update_recipe_leaves_recipe_untouched() {
        let (svc, user) = setup();
        let r = svc
            .create_recipe(user.id, &recipe("Soup", vec![ing(&svc, "Water", 1.0, "liter")]))
            .unwrap();
        let missing_unit = NewRecipeIngredient {
            ingredient_name: "Stock".to_string(),
            quantity: 1.0,
            unit_id: 9999,
        };

        let err = svc
            .update_recipe(
                user.id,
                r.recipe.id,
                &UpdateRecipe {
                    title: Some("Broth".to_string()),
                    ..UpdateRecipe::default()
                },
                Some(&[missing_unit]),
            )
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LarderError>(),
            Some(LarderError::Invalid(_))
        ));

        let detail = svc.db().get_recipe_detail(user.id, r.recipe.id).unwrap();
        assert_eq!(detail.recipe.title, "Soup");
        assert_eq!(detail.ingredients.len(), 1);
        assert_eq!(detail.ingredients[0].ingredient_name, "Water");
    }

    #[test]
    fn test_empty_updates_are_rejected() {
        let (svc, user) = setup();
        let r = svc.create_recipe(user.id, &recipe("Soup", vec![])).unwrap();
        let err = svc
            .update_recipe(user.id, r.recipe.id, &UpdateRecipe::default(), None)
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<LarderError>(),
            Some(&LarderError::invalid("At least one field must be provided"))
        );
        assert!(
            svc.update_shopping_list_item(user.id, 1, 1, &UpdateShoppingListItem::default())
                .is_err()
        );
    }

    #[test]
    fn test_meal_plan_entry_quantity_defaults_to_one() {
        let (svc, user) = setup();
        let r = svc.create_recipe(user.id, &recipe("Soup", vec![])).unwrap();
        let p = plan(&svc, &user);
        let entry = svc
            .add_meal_plan_entry(user.id, p.id, r.recipe.id, 2, None)
            .unwrap();
        assert_eq!(entry.quantity, 1.0);
        assert!(
            svc.add_meal_plan_entry(user.id, p.id, r.recipe.id, 2, Some(0.0))
                .is_err()
        );

        let (_, snapshot) = svc.db().load_plan_snapshot(user.id, p.id).unwrap();
        assert_eq!(snapshot.entries.len(), 1);
        assert_eq!(snapshot.entries[0].multiplier, Some(1.0));
    }

    #[test]
    fn test_generate_shopping_list() {
        let (svc, user) = setup();
        let pancakes = svc
            .create_recipe(
                user.id,
                &recipe(
                    "Pancakes",
                    vec![
                        ing(&svc, "Flour", 200.0, "gram"),
                        ing(&svc, "Milk", 300.0, "milliliter"),
                    ],
                ),
            )
            .unwrap();
        let bread = svc
            .create_recipe(
                user.id,
                &recipe("Bread", vec![ing(&svc, "Flour", 1.0, "kilogram")]),
            )
            .unwrap();
        let p = plan(&svc, &user);
        svc.add_meal_plan_entry(user.id, p.id, pancakes.recipe.id, 0, None)
            .unwrap();
        svc.add_meal_plan_entry(user.id, p.id, bread.recipe.id, 1, None)
            .unwrap();

        let generated = svc.generate_shopping_list(user.id, p.id, None).unwrap();
        assert_eq!(generated.name, "Shopping list for Week 24");

        let detail = svc
            .db()
            .get_shopping_list_detail(user.id, generated.shopping_list_id)
            .unwrap();
        assert_eq!(detail.list.meal_plan_id, Some(p.id));
        assert_eq!(detail.items.len(), 2);

        let flour = &detail.items[0];
        assert_eq!(flour.ingredient_name, "Flour");
        assert_eq!(flour.quantity, 1.2);
        assert_eq!(flour.unit, "kilogram");
        assert!(!flour.bought);
        assert_eq!(flour.in_stock_quantity, 0.0);

        let milk = &detail.items[1];
        assert_eq!(milk.quantity, 300.0);
        assert_eq!(milk.unit, "milliliter");
    }

    #[test]
    fn test_generate_sums_recipe_across_days() {
        let (svc, user) = setup();
        let soup = svc
            .create_recipe(
                user.id,
                &recipe("Soup", vec![ing(&svc, "Stock", 400.0, "milliliter")]),
            )
            .unwrap();
        let p = plan(&svc, &user);
        svc.add_meal_plan_entry(user.id, p.id, soup.recipe.id, 0, Some(2.0))
            .unwrap();
        svc.add_meal_plan_entry(user.id, p.id, soup.recipe.id, 3, Some(3.0))
            .unwrap();

        let generated = svc
            .generate_shopping_list(user.id, p.id, Some("Soup week"))
            .unwrap();
        assert_eq!(generated.name, "Soup week");
        let items = svc
            .db()
            .get_shopping_list_items(generated.shopping_list_id)
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].quantity, 2.0);
        assert_eq!(items[0].unit, "liter");
    }

    #[test]
    fn test_generate_empty_plan() {
        let (svc, user) = setup();
        let p = plan(&svc, &user);
        let generated = svc.generate_shopping_list(user.id, p.id, None).unwrap();
        let list = svc
            .db()
            .get_shopping_list(user.id, generated.shopping_list_id)
            .unwrap();
        assert_eq!(list.item_count, 0);
    }

    #[test]
    fn test_generate_unit_mismatch_stores_nothing() {
        let (svc, user) = setup();
        let a = svc
            .create_recipe(user.id, &recipe("A", vec![ing(&svc, "Honey", 1.0, "liter")]))
            .unwrap();
        let b = svc
            .create_recipe(user.id, &recipe("B", vec![ing(&svc, "Honey", 500.0, "gram")]))
            .unwrap();
        let p = plan(&svc, &user);
        svc.add_meal_plan_entry(user.id, p.id, a.recipe.id, 0, None)
            .unwrap();
        svc.add_meal_plan_entry(user.id, p.id, b.recipe.id, 1, None)
            .unwrap();

        let err = svc.generate_shopping_list(user.id, p.id, None).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ShoppingError>(),
            Some(ShoppingError::UnitMismatch { .. })
        ));
        assert!(svc.db().list_shopping_lists(user.id).unwrap().is_empty());
    }

    #[test]
    fn test_generate_for_other_users_plan_fails() {
        let (svc, alice) = setup();
        let bob = svc.register("bob", "password123").unwrap();
        let p = plan(&svc, &alice);
        assert!(svc.generate_shopping_list(bob.id, p.id, None).is_err());
    }

    #[test]
    fn test_update_item_rejects_negative_stock() {
        let (svc, user) = setup();
        let update = UpdateShoppingListItem {
            bought: None,
            in_stock_quantity: Some(-1.0),
        };
        assert!(svc.update_shopping_list_item(user.id, 1, 1, &update).is_err());
    }

    #[test]
    fn test_export_csv() {
        let (svc, user) = setup();
        let r = svc
            .create_recipe(
                user.id,
                &recipe(
                    "Pancakes",
                    vec![
                        ing(&svc, "Flour", 1.5, "kilogram"),
                        ing(&svc, "Egg", 2.0, "piece"),
                    ],
                ),
            )
            .unwrap();
        let p = plan(&svc, &user);
        svc.add_meal_plan_entry(user.id, p.id, r.recipe.id, 0, None)
            .unwrap();
        let generated = svc.generate_shopping_list(user.id, p.id, None).unwrap();

        let csv = svc
            .export_shopping_list_csv(user.id, generated.shopping_list_id)
            .unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("ingredient,quantity,unit,bought,in_stock_quantity"));
        assert_eq!(lines.next(), Some("Egg,2.0,piece,false,0.0"));
        assert_eq!(lines.next(), Some("Flour,1.5,kilogram,false,0.0"));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn test_export_csv_empty_list_has_header() {
        let (svc, user) = setup();
        let p = plan(&svc, &user);
        let generated = svc.generate_shopping_list(user.id, p.id, None).unwrap();
        let csv = svc
            .export_shopping_list_csv(user.id, generated.shopping_list_id)
            .unwrap();
        assert_eq!(csv, "ingredient,quantity,unit,bought,in_stock_quantity\n");
    }
}
