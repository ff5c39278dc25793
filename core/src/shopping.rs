//! Shopping-list aggregation.
//!
//! Turns the recipes of a meal plan into one line per ingredient. Everything
//! here works on plain in-memory records; loading them is the caller's job.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::units;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ShoppingError {
    #[error("ingredient {ingredient_id} is measured in both '{expected}' and '{found}'")]
    UnitMismatch {
        ingredient_id: i64,
        expected: String,
        found: String,
    },
    #[error("unit {unit_id} referenced by ingredient {ingredient_id} does not exist")]
    MissingUnit { unit_id: i64, ingredient_id: i64 },
}

/// A recipe scheduled in a meal plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanRecipeEntry {
    pub recipe_id: i64,
    #[serde(default)]
    pub multiplier: Option<f64>,
}

impl PlanRecipeEntry {
    /// Missing or non-numeric multipliers count as a single serving.
    #[must_use]
    pub fn effective_multiplier(&self) -> f64 {
        match self.multiplier {
            Some(m) if m.is_finite() => m,
            _ => 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeIngredientLine {
    pub ingredient_id: i64,
    pub ingredient_name: String,
    pub quantity: f64,
    pub unit_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedLine {
    pub ingredient_id: i64,
    pub ingredient_name: String,
    pub total_quantity: f64,
    pub base_unit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShoppingListLine {
    pub ingredient_id: i64,
    pub ingredient_name: String,
    pub quantity: f64,
    pub unit: String,
    pub bought: bool,
    pub in_stock_quantity: f64,
}

/// Everything the aggregator reads for one meal plan, captured at a single
/// point in time.
#[derive(Debug, Clone, Default)]
pub struct PlanSnapshot {
    pub entries: Vec<PlanRecipeEntry>,
    pub recipe_ingredients: HashMap<i64, Vec<RecipeIngredientLine>>,
    pub unit_name_by_id: HashMap<i64, String>,
}

impl PlanSnapshot {
    pub fn shopping_lines(&self) -> Result<Vec<ShoppingListLine>, ShoppingError> {
        build_shopping_lines(
            &self.entries,
            &self.recipe_ingredients,
            &self.unit_name_by_id,
        )
    }
}

/// Sum multipliers per recipe, keeping first-appearance order.
fn collapse_entries(plan_entries: &[PlanRecipeEntry]) -> Vec<(i64, f64)> {
    let mut collapsed: Vec<(i64, f64)> = Vec::new();
    let mut index: HashMap<i64, usize> = HashMap::new();
    for entry in plan_entries {
        let m = entry.effective_multiplier();
        if let Some(&i) = index.get(&entry.recipe_id) {
            collapsed[i].1 += m;
        } else {
            index.insert(entry.recipe_id, collapsed.len());
            collapsed.push((entry.recipe_id, m));
        }
    }
    collapsed
}

/// Sum every ingredient of every planned recipe in base units.
///
/// Output order follows first appearance, but callers should not depend on it.
pub fn aggregate(
    plan_entries: &[PlanRecipeEntry],
    recipe_ingredients: &HashMap<i64, Vec<RecipeIngredientLine>>,
    unit_name_by_id: &HashMap<i64, String>,
) -> Result<Vec<AggregatedLine>, ShoppingError> {
    let mut lines: Vec<AggregatedLine> = Vec::new();
    let mut by_ingredient: HashMap<i64, usize> = HashMap::new();

    for (recipe_id, multiplier) in collapse_entries(plan_entries) {
        if multiplier <= 0.0 {
            continue;
        }
        let Some(ingredients) = recipe_ingredients.get(&recipe_id) else {
            continue;
        };

        for line in ingredients {
            let unit_name =
                unit_name_by_id
                    .get(&line.unit_id)
                    .ok_or(ShoppingError::MissingUnit {
                        unit_id: line.unit_id,
                        ingredient_id: line.ingredient_id,
                    })?;
            let normalized = units::normalize(line.quantity, unit_name);
            let amount = normalized.quantity * multiplier;

            if let Some(&i) = by_ingredient.get(&line.ingredient_id) {
                let acc = &mut lines[i];
                if acc.base_unit != normalized.base_unit {
                    return Err(ShoppingError::UnitMismatch {
                        ingredient_id: line.ingredient_id,
                        expected: acc.base_unit.clone(),
                        found: normalized.base_unit,
                    });
                }
                acc.total_quantity += amount;
            } else {
                by_ingredient.insert(line.ingredient_id, lines.len());
                lines.push(AggregatedLine {
                    ingredient_id: line.ingredient_id,
                    ingredient_name: line.ingredient_name.clone(),
                    total_quantity: amount,
                    base_unit: normalized.base_unit,
                });
            }
        }
    }

    Ok(lines)
}

/// Aggregate a plan and convert each total into display units.
pub fn build_shopping_lines(
    plan_entries: &[PlanRecipeEntry],
    recipe_ingredients: &HashMap<i64, Vec<RecipeIngredientLine>>,
    unit_name_by_id: &HashMap<i64, String>,
) -> Result<Vec<ShoppingListLine>, ShoppingError> {
    let aggregated = aggregate(plan_entries, recipe_ingredients, unit_name_by_id)?;
    Ok(aggregated
        .into_iter()
        .map(|line| {
            let shown = units::format(line.total_quantity, &line.base_unit);
            ShoppingListLine {
                ingredient_id: line.ingredient_id,
                ingredient_name: line.ingredient_name,
                quantity: shown.quantity,
                unit: shown.unit,
                bought: false,
                in_stock_quantity: 0.0,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Unit ids used by the fixtures below
    const ML: i64 = 1;
    const L: i64 = 2;
    const G: i64 = 3;
    const KG: i64 = 4;
    const PIECE: i64 = 5;
    const PINCH: i64 = 6;

    fn unit_names() -> HashMap<i64, String> {
        [
            (ML, "milliliter"),
            (L, "liter"),
            (G, "gram"),
            (KG, "kilogram"),
            (PIECE, "piece"),
            (PINCH, "pinch"),
        ]
        .into_iter()
        .map(|(id, name)| (id, name.to_string()))
        .collect()
    }

    fn line(ingredient_id: i64, name: &str, quantity: f64, unit_id: i64) -> RecipeIngredientLine {
        RecipeIngredientLine {
            ingredient_id,
            ingredient_name: name.to_string(),
            quantity,
            unit_id,
        }
    }

    fn entry(recipe_id: i64, multiplier: f64) -> PlanRecipeEntry {
        PlanRecipeEntry {
            recipe_id,
            multiplier: Some(multiplier),
        }
    }

    fn pancakes_and_bread() -> HashMap<i64, Vec<RecipeIngredientLine>> {
        let mut recipes = HashMap::new();
        recipes.insert(
            1,
            vec![
                line(10, "Flour", 200.0, G),
                line(11, "Milk", 300.0, ML),
                line(12, "Egg", 2.0, PIECE),
            ],
        );
        recipes.insert(2, vec![line(10, "Flour", 1.0, KG), line(13, "Water", 0.5, L)]);
        recipes
    }

    fn find(lines: &[AggregatedLine], ingredient_id: i64) -> &AggregatedLine {
        lines
            .iter()
            .find(|l| l.ingredient_id == ingredient_id)
            .unwrap()
    }

    #[test]
    fn test_empty_plan_yields_nothing() {
        let result = aggregate(&[], &pancakes_and_bread(), &unit_names()).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_grams_and_kilograms_are_summed() {
        let result = aggregate(
            &[entry(1, 1.0), entry(2, 1.0)],
            &pancakes_and_bread(),
            &unit_names(),
        )
        .unwrap();

        let flour = find(&result, 10);
        assert_eq!(flour.total_quantity, 1200.0);
        assert_eq!(flour.base_unit, "gram");
        // One line per distinct ingredient
        assert_eq!(result.len(), 4);
    }

    #[test]
    fn test_duplicate_entries_equal_summed_multiplier() {
        let recipes = pancakes_and_bread();
        let units = unit_names();
        let split = aggregate(&[entry(1, 2.0), entry(1, 3.0)], &recipes, &units).unwrap();
        let single = aggregate(&[entry(1, 5.0)], &recipes, &units).unwrap();
        assert_eq!(split, single);
        assert_eq!(find(&single, 11).total_quantity, 1500.0);
    }

    #[test]
    fn test_liter_and_gram_mismatch() {
        let mut recipes = HashMap::new();
        recipes.insert(1, vec![line(20, "Honey", 1.0, L)]);
        recipes.insert(2, vec![line(20, "Honey", 500.0, G)]);

        let err = aggregate(&[entry(1, 1.0), entry(2, 1.0)], &recipes, &unit_names()).unwrap_err();
        assert_eq!(
            err,
            ShoppingError::UnitMismatch {
                ingredient_id: 20,
                expected: "milliliter".to_string(),
                found: "gram".to_string(),
            }
        );
    }

    #[test]
    fn test_missing_unit_is_an_error() {
        let mut recipes = HashMap::new();
        recipes.insert(1, vec![line(30, "Salt", 1.0, 999)]);

        let err = aggregate(&[entry(1, 1.0)], &recipes, &unit_names()).unwrap_err();
        assert_eq!(
            err,
            ShoppingError::MissingUnit {
                unit_id: 999,
                ingredient_id: 30,
            }
        );
    }

    #[test]
    fn test_unknown_unit_name_passes_through() {
        let mut recipes = HashMap::new();
        recipes.insert(1, vec![line(30, "Salt", 2.0, PINCH)]);
        recipes.insert(2, vec![line(30, "Salt", 1.0, PINCH)]);

        let result = aggregate(&[entry(1, 1.0), entry(2, 2.0)], &recipes, &unit_names()).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].total_quantity, 4.0);
        assert_eq!(result[0].base_unit, "pinch");
    }

    #[test]
    fn test_unknown_unit_collides_with_known_unit() {
        let mut recipes = HashMap::new();
        recipes.insert(1, vec![line(30, "Salt", 2.0, PINCH)]);
        recipes.insert(2, vec![line(30, "Salt", 5.0, G)]);

        let err = aggregate(&[entry(1, 1.0), entry(2, 1.0)], &recipes, &unit_names()).unwrap_err();
        assert!(matches!(
            err,
            ShoppingError::UnitMismatch {
                ingredient_id: 30,
                ..
            }
        ));
    }

    #[test]
    fn test_non_positive_multipliers_are_skipped() {
        let result = aggregate(
            &[entry(1, 0.0), entry(2, -1.0)],
            &pancakes_and_bread(),
            &unit_names(),
        )
        .unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_missing_or_nan_multiplier_defaults_to_one() {
        let recipes = pancakes_and_bread();
        let units = unit_names();
        let absent = PlanRecipeEntry {
            recipe_id: 1,
            multiplier: None,
        };
        let nan = PlanRecipeEntry {
            recipe_id: 2,
            multiplier: Some(f64::NAN),
        };
        let result = aggregate(&[absent, nan], &recipes, &units).unwrap();
        assert_eq!(find(&result, 10).total_quantity, 1200.0);
        assert_eq!(find(&result, 12).total_quantity, 2.0);
    }

    #[test]
    fn test_recipe_without_ingredients_contributes_nothing() {
        let result = aggregate(&[entry(42, 3.0)], &pancakes_and_bread(), &unit_names()).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_output_follows_first_appearance() {
        let result = aggregate(
            &[entry(2, 1.0), entry(1, 1.0)],
            &pancakes_and_bread(),
            &unit_names(),
        )
        .unwrap();
        let ids: Vec<i64> = result.iter().map(|l| l.ingredient_id).collect();
        assert_eq!(ids, vec![10, 13, 11, 12]);
    }

    #[test]
    fn test_build_shopping_lines_formats_totals() {
        let lines = build_shopping_lines(
            &[entry(1, 1.0), entry(2, 1.0)],
            &pancakes_and_bread(),
            &unit_names(),
        )
        .unwrap();

        let flour = lines.iter().find(|l| l.ingredient_id == 10).unwrap();
        assert_eq!(flour.quantity, 1.2);
        assert_eq!(flour.unit, "kilogram");
        assert!(!flour.bought);
        assert_eq!(flour.in_stock_quantity, 0.0);

        let milk = lines.iter().find(|l| l.ingredient_id == 11).unwrap();
        assert_eq!(milk.quantity, 300.0);
        assert_eq!(milk.unit, "milliliter");

        let water = lines.iter().find(|l| l.ingredient_id == 13).unwrap();
        assert_eq!(water.quantity, 500.0);
        assert_eq!(water.unit, "milliliter");
    }

    #[test]
    fn test_build_shopping_lines_propagates_errors() {
        let mut recipes = HashMap::new();
        recipes.insert(1, vec![line(30, "Salt", 1.0, 999)]);
        assert!(build_shopping_lines(&[entry(1, 1.0)], &recipes, &unit_names()).is_err());
    }
}
