//! Data models for the allergen engine

pub mod aggregate;
pub mod batch;
pub mod composition;
pub mod ingredient;

pub use aggregate::{
    AggregateResult, AggregationWarning, AllergenContributor, CachedAggregate, GenerationStamp,
    SourceBreakdown, MISSING_GENERATION,
};
pub use batch::{BatchReport, EntityOutcome, PhaseReport};
pub use composition::{
    Dish, DishIngredientLine, DishRecipeLine, Recipe, RecipeLine, ResolvedDishIngredient,
    ResolvedDishRecipe, ResolvedRecipeLine,
};
pub use ingredient::{AllergenSourceFlags, Ingredient, NewIngredient, Provenance};
