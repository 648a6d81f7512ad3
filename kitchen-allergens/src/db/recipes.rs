//! Recipe database operations

use kitchen_common::events::EntityKind;
use kitchen_common::{id_utils, Result};
use sqlx::{Row, SqlitePool};

use super::aggregates;
use super::ingredients::ingredient_from_columns;
use crate::models::{Recipe, RecipeLine, ResolvedRecipeLine, MISSING_GENERATION};

/// Load one recipe
pub async fn load_recipe(pool: &SqlitePool, id: &str) -> Result<Option<Recipe>> {
    let row: Option<(String, String)> = sqlx::query_as("SELECT id, name FROM recipes WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|(id, name)| Recipe { id, name }))
}

/// List every recipe id in the catalog
pub async fn list_recipe_ids(pool: &SqlitePool) -> Result<Vec<String>> {
    let ids = sqlx::query_scalar("SELECT id FROM recipes ORDER BY id")
        .fetch_all(pool)
        .await?;
    Ok(ids)
}

/// Load a recipe's lines in insertion order, each joined with its ingredient
pub async fn load_recipe_lines(pool: &SqlitePool, recipe_id: &str) -> Result<Vec<ResolvedRecipeLine>> {
    let rows = sqlx::query(
        r#"
        SELECT rl.ingredient_id, rl.quantity, rl.unit,
               i.id AS i_id, i.name AS i_name, i.brand AS i_brand,
               i.allergens AS i_allergens, i.allergen_source AS i_source,
               i.generation AS i_generation
        FROM recipe_lines rl
        LEFT JOIN ingredients i ON i.id = rl.ingredient_id
        WHERE rl.recipe_id = ?
        ORDER BY rl.line_id
        "#,
    )
    .bind(recipe_id)
    .fetch_all(pool)
    .await?;

    let mut lines = Vec::with_capacity(rows.len());
    for row in rows {
        let line = RecipeLine {
            recipe_id: recipe_id.to_string(),
            ingredient_id: row.try_get("ingredient_id")?,
            quantity: row.try_get("quantity")?,
            unit: row.try_get("unit")?,
        };

        let ingredient_id: Option<String> = row.try_get("i_id")?;
        let ingredient = match ingredient_id {
            Some(id) => {
                let allergens: String = row.try_get("i_allergens")?;
                let source: String = row.try_get("i_source")?;
                Some(ingredient_from_columns(
                    id,
                    row.try_get("i_name")?,
                    row.try_get("i_brand")?,
                    &allergens,
                    &source,
                    row.try_get("i_generation")?,
                )?)
            }
            None => None,
        };

        lines.push(ResolvedRecipeLine { line, ingredient });
    }

    Ok(lines)
}

/// Current generation of every ingredient a recipe references
///
/// Cheap freshness check: reads no allergen payloads.
pub async fn recipe_ingredient_generations(pool: &SqlitePool, recipe_id: &str) -> Result<Vec<(String, i64)>> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        r#"
        SELECT rl.ingredient_id, COALESCE(i.generation, ?)
        FROM recipe_lines rl
        LEFT JOIN ingredients i ON i.id = rl.ingredient_id
        WHERE rl.recipe_id = ?
        ORDER BY rl.line_id
        "#,
    )
    .bind(MISSING_GENERATION)
    .bind(recipe_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Insert a recipe, generating an id when none is given
pub async fn insert_recipe(pool: &SqlitePool, id: Option<&str>, name: &str) -> Result<Recipe> {
    let id = match id {
        Some(id) => id_utils::validate(id)?.to_string(),
        None => id_utils::generate(),
    };

    sqlx::query("INSERT INTO recipes (id, name) VALUES (?, ?)")
        .bind(&id)
        .bind(name)
        .execute(pool)
        .await?;

    // A dish may already reference this id and carry a RecipeNotFound warning
    let dishes = super::dishes::dishes_using_recipes(pool, std::slice::from_ref(&id)).await?;
    aggregates::mark_stale(pool, EntityKind::Dish, &dishes).await?;

    Ok(Recipe {
        id,
        name: name.to_string(),
    })
}

/// Append an ingredient line; the recipe and every dish using it become stale
pub async fn add_recipe_line(pool: &SqlitePool, line: &RecipeLine) -> Result<()> {
    sqlx::query(
        "INSERT INTO recipe_lines (recipe_id, ingredient_id, quantity, unit) VALUES (?, ?, ?, ?)",
    )
    .bind(&line.recipe_id)
    .bind(&line.ingredient_id)
    .bind(line.quantity)
    .bind(&line.unit)
    .execute(pool)
    .await?;

    let recipe_ids = vec![line.recipe_id.clone()];
    aggregates::mark_stale(pool, EntityKind::Recipe, &recipe_ids).await?;
    let dishes = super::dishes::dishes_using_recipes(pool, &recipe_ids).await?;
    aggregates::mark_stale(pool, EntityKind::Dish, &dishes).await?;
    Ok(())
}

/// Delete a recipe, its lines and its aggregate
///
/// Dishes that referenced it keep the edge and become stale. Returns false
/// when the recipe did not exist.
pub async fn delete_recipe(pool: &SqlitePool, id: &str) -> Result<bool> {
    let mut tx = pool.begin().await?;

    let deleted = sqlx::query("DELETE FROM recipes WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    aggregates::delete_aggregate(&mut *tx, EntityKind::Recipe, id).await?;

    sqlx::query(
        r#"
        UPDATE allergen_aggregates SET stale = 1
        WHERE entity_kind = ?
          AND entity_id IN (SELECT dish_id FROM dish_recipes WHERE recipe_id = ?)
        "#,
    )
    .bind(EntityKind::Dish.as_str())
    .bind(id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(deleted > 0)
}

/// Recipes with at least one line referencing the ingredient
pub async fn recipes_using_ingredient(pool: &SqlitePool, ingredient_id: &str) -> Result<Vec<String>> {
    let ids = sqlx::query_scalar(
        "SELECT DISTINCT recipe_id FROM recipe_lines WHERE ingredient_id = ? ORDER BY recipe_id",
    )
    .bind(ingredient_id)
    .fetch_all(pool)
    .await?;
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ingredients::insert_ingredient;
    use crate::models::{AggregateResult, NewIngredient};
    use kitchen_common::db::create_schema;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_db() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        create_schema(&pool).await.unwrap();
        pool
    }

    fn line(recipe: &str, ingredient: &str) -> RecipeLine {
        RecipeLine {
            recipe_id: recipe.to_string(),
            ingredient_id: ingredient.to_string(),
            quantity: Some(2.0),
            unit: Some("g".to_string()),
        }
    }

    #[tokio::test]
    async fn test_lines_keep_insertion_order() {
        let pool = setup_test_db().await;
        insert_ingredient(&pool, &NewIngredient::named("Egg").with_id("i-egg")).await.unwrap();
        insert_ingredient(&pool, &NewIngredient::named("Milk").with_id("i-milk")).await.unwrap();
        insert_recipe(&pool, Some("r-1"), "Custard").await.unwrap();
        add_recipe_line(&pool, &line("r-1", "i-milk")).await.unwrap();
        add_recipe_line(&pool, &line("r-1", "i-egg")).await.unwrap();

        let lines = load_recipe_lines(&pool, "r-1").await.unwrap();
        let ids: Vec<_> = lines.iter().map(|l| l.line.ingredient_id.as_str()).collect();
        assert_eq!(ids, vec!["i-milk", "i-egg"]);
        assert_eq!(lines[0].ingredient.as_ref().unwrap().name, "Milk");
        assert_eq!(lines[0].line.unit.as_deref(), Some("g"));
    }

    #[tokio::test]
    async fn test_recipe_ingredient_generations() {
        let pool = setup_test_db().await;
        insert_ingredient(&pool, &NewIngredient::named("Egg").with_id("i-egg")).await.unwrap();
        insert_recipe(&pool, Some("r-1"), "Omelette").await.unwrap();
        add_recipe_line(&pool, &line("r-1", "i-egg")).await.unwrap();

        let generations = recipe_ingredient_generations(&pool, "r-1").await.unwrap();
        assert_eq!(generations, vec![("i-egg".to_string(), 0)]);
        assert!(recipe_ingredient_generations(&pool, "r-none").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_recipe() {
        let pool = setup_test_db().await;
        insert_ingredient(&pool, &NewIngredient::named("Egg").with_id("i-egg")).await.unwrap();
        insert_recipe(&pool, Some("r-1"), "Omelette").await.unwrap();
        add_recipe_line(&pool, &line("r-1", "i-egg")).await.unwrap();
        aggregates::store_aggregate(&pool, &AggregateResult::empty(EntityKind::Recipe, "r-1"), 1000)
            .await
            .unwrap();

        assert_eq!(recipes_using_ingredient(&pool, "i-egg").await.unwrap(), vec!["r-1".to_string()]);
        assert!(delete_recipe(&pool, "r-1").await.unwrap());
        assert!(load_recipe(&pool, "r-1").await.unwrap().is_none());
        assert!(aggregates::load_aggregate(&pool, EntityKind::Recipe, "r-1").await.unwrap().is_none());
        assert!(recipes_using_ingredient(&pool, "i-egg").await.unwrap().is_empty());
        assert!(!delete_recipe(&pool, "r-1").await.unwrap());
    }
}
