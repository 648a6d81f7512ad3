//! Recipe and dish composition
//!
//! The composition graph is Dish → Recipe → Ingredient plus Dish → Ingredient.
//! Recipes never reference recipes or dishes, which keeps the graph a DAG of
//! depth two and makes the recipes-then-dishes batch order sufficient.

use serde::{Deserialize, Serialize};

use super::ingredient::Ingredient;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dish {
    pub id: String,
    pub name: String,
}

/// Quantity and unit are carried for attribution display only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeLine {
    pub recipe_id: String,
    pub ingredient_id: String,
    pub quantity: Option<f64>,
    pub unit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DishIngredientLine {
    pub dish_id: String,
    pub ingredient_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DishRecipeLine {
    pub dish_id: String,
    pub recipe_id: String,
    pub quantity: Option<f64>,
}

/// A recipe line joined with its ingredient row (None if the row is gone)
#[derive(Debug, Clone)]
pub struct ResolvedRecipeLine {
    pub line: RecipeLine,
    pub ingredient: Option<Ingredient>,
}

/// A direct dish ingredient joined with its ingredient row
#[derive(Debug, Clone)]
pub struct ResolvedDishIngredient {
    pub line: DishIngredientLine,
    pub ingredient: Option<Ingredient>,
}

/// A dish recipe edge joined with the recipe name (None if the recipe is gone)
#[derive(Debug, Clone)]
pub struct ResolvedDishRecipe {
    pub line: DishRecipeLine,
    pub recipe_name: Option<String>,
}
