//! Aggregate read handlers
//!
//! GET /recipes/:id/allergens, GET /dishes/:id/allergens,
//! GET /recipes/:id/allergen-sources, GET /dishes/:id/allergen-sources,
//! GET /allergens/codes

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use kitchen_common::allergens::AllergenCode;
use kitchen_common::events::EntityKind;
use serde::{Deserialize, Serialize};

use super::ApiResponse;
use crate::{
    db::{dishes, recipes},
    error::{ApiError, ApiResult},
    models::{AggregateResult, AggregationWarning, AllergenContributor},
    AppState,
};

#[derive(Debug, Default, Deserialize)]
pub struct RefreshQuery {
    /// Recompute even when the cached aggregate is fresh
    #[serde(default)]
    pub refresh: bool,
}

/// GET /{recipes,dishes}/:id/allergens response
#[derive(Debug, Serialize)]
pub struct AggregateView {
    pub kind: EntityKind,
    pub entity_id: String,
    pub allergens: Vec<AllergenCode>,
    pub warnings: Vec<AggregationWarning>,
    pub computed_at: DateTime<Utc>,
    pub from_cache: bool,
    /// False while any contributor is still undetermined
    pub determined: bool,
}

impl From<AggregateResult> for AggregateView {
    fn from(result: AggregateResult) -> Self {
        let determined = result.determined();
        Self {
            kind: result.kind,
            entity_id: result.entity_id,
            allergens: result.allergens.into_iter().collect(),
            warnings: result.warnings,
            computed_at: result.computed_at,
            from_cache: result.from_cache,
            determined,
        }
    }
}

/// One allergen with every ingredient that contributed it
#[derive(Debug, Serialize)]
pub struct AllergenSource {
    pub allergen_code: AllergenCode,
    pub sources: Vec<AllergenContributor>,
    pub source_count: usize,
}

/// Canonically ordered source list for an aggregate
fn allergen_sources(result: &AggregateResult) -> Vec<AllergenSource> {
    result
        .allergens
        .iter()
        .map(|code| {
            let sources = result.source_breakdown.get(code).cloned().unwrap_or_default();
            AllergenSource {
                allergen_code: *code,
                source_count: sources.len(),
                sources,
            }
        })
        .collect()
}

/// GET /recipes/:id/allergen-sources response
#[derive(Debug, Serialize)]
pub struct RecipeSourcesResponse {
    pub recipe_id: String,
    pub recipe_name: String,
    pub allergen_sources: Vec<AllergenSource>,
    pub total_allergens: usize,
    pub warnings: Vec<AggregationWarning>,
    pub determined: bool,
}

/// GET /dishes/:id/allergen-sources response
#[derive(Debug, Serialize)]
pub struct DishSourcesResponse {
    pub dish_id: String,
    pub dish_name: String,
    pub allergen_sources: Vec<AllergenSource>,
    pub total_allergens: usize,
    pub warnings: Vec<AggregationWarning>,
    pub determined: bool,
}

/// GET /allergens/codes entry
#[derive(Debug, Serialize)]
pub struct AllergenCodeInfo {
    pub code: AllergenCode,
    pub label: &'static str,
}

/// GET /recipes/:id/allergens
pub async fn get_recipe_allergens(
    State(state): State<AppState>,
    Path(recipe_id): Path<String>,
    Query(query): Query<RefreshQuery>,
) -> ApiResult<Json<ApiResponse<AggregateView>>> {
    let result = state.engine.recipes.aggregate(&recipe_id, query.refresh).await?;
    Ok(ApiResponse::ok(AggregateView::from(result)))
}

/// GET /dishes/:id/allergens
pub async fn get_dish_allergens(
    State(state): State<AppState>,
    Path(dish_id): Path<String>,
    Query(query): Query<RefreshQuery>,
) -> ApiResult<Json<ApiResponse<AggregateView>>> {
    let result = state.engine.dishes.aggregate(&dish_id, query.refresh).await?;
    Ok(ApiResponse::ok(AggregateView::from(result)))
}

/// GET /recipes/:id/allergen-sources
pub async fn get_recipe_sources(
    State(state): State<AppState>,
    Path(recipe_id): Path<String>,
) -> ApiResult<Json<ApiResponse<RecipeSourcesResponse>>> {
    let recipe = recipes::load_recipe(&state.db, &recipe_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("recipe {}", recipe_id)))?;

    let result = state.engine.recipes.aggregate(&recipe.id, false).await?;

    Ok(ApiResponse::ok(RecipeSourcesResponse {
        recipe_id: recipe.id,
        recipe_name: recipe.name,
        allergen_sources: allergen_sources(&result),
        total_allergens: result.allergens.len(),
        determined: result.determined(),
        warnings: result.warnings,
    }))
}

/// GET /dishes/:id/allergen-sources
pub async fn get_dish_sources(
    State(state): State<AppState>,
    Path(dish_id): Path<String>,
) -> ApiResult<Json<ApiResponse<DishSourcesResponse>>> {
    let dish = dishes::load_dish(&state.db, &dish_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("dish {}", dish_id)))?;

    let result = state.engine.dishes.aggregate(&dish.id, false).await?;

    Ok(ApiResponse::ok(DishSourcesResponse {
        dish_id: dish.id,
        dish_name: dish.name,
        allergen_sources: allergen_sources(&result),
        total_allergens: result.allergens.len(),
        determined: result.determined(),
        warnings: result.warnings,
    }))
}

/// GET /allergens/codes
pub async fn list_allergen_codes() -> Json<ApiResponse<Vec<AllergenCodeInfo>>> {
    let codes = AllergenCode::ALL
        .iter()
        .map(|code| AllergenCodeInfo {
            code: *code,
            label: code.label(),
        })
        .collect();
    ApiResponse::ok(codes)
}

pub fn aggregate_routes() -> Router<AppState> {
    Router::new()
        .route("/recipes/:id/allergens", get(get_recipe_allergens))
        .route("/recipes/:id/allergen-sources", get(get_recipe_sources))
        .route("/dishes/:id/allergens", get(get_dish_allergens))
        .route("/dishes/:id/allergen-sources", get(get_dish_sources))
        .route("/allergens/codes", get(list_allergen_codes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Provenance;

    fn contributor(id: &str) -> AllergenContributor {
        AllergenContributor {
            ingredient_id: id.to_string(),
            ingredient_name: id.to_string(),
            brand: None,
            quantity: None,
            unit: None,
            provenance: Provenance::Manual,
            recipe_id: None,
            recipe_name: None,
        }
    }

    #[test]
    fn test_sources_follow_canonical_order() {
        let mut result = AggregateResult::empty(EntityKind::Recipe, "r-1");
        result.add_contributor(AllergenCode::Sesame, contributor("tahini"));
        result.add_contributor(AllergenCode::Gluten, contributor("flour"));
        result.add_contributor(AllergenCode::Gluten, contributor("bread"));

        let sources = allergen_sources(&result);
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].allergen_code, AllergenCode::Gluten);
        assert_eq!(sources[0].source_count, 2);
        assert_eq!(sources[1].allergen_code, AllergenCode::Sesame);
        assert_eq!(sources[1].sources[0].ingredient_id, "tahini");
    }
}
