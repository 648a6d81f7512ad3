//! Dish database operations

use kitchen_common::events::EntityKind;
use kitchen_common::{id_utils, Result};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use super::aggregates;
use super::ingredients::ingredient_from_columns;
use crate::models::{
    Dish, DishIngredientLine, DishRecipeLine, ResolvedDishIngredient, ResolvedDishRecipe,
    MISSING_GENERATION,
};

pub async fn load_dish(pool: &SqlitePool, id: &str) -> Result<Option<Dish>> {
    let row: Option<(String, String)> = sqlx::query_as("SELECT id, name FROM dishes WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|(id, name)| Dish { id, name }))
}

/// List every dish id in the catalog
pub async fn list_dish_ids(pool: &SqlitePool) -> Result<Vec<String>> {
    let ids = sqlx::query_scalar("SELECT id FROM dishes ORDER BY id")
        .fetch_all(pool)
        .await?;
    Ok(ids)
}

/// Direct ingredient lines in insertion order, joined with the ingredient row
pub async fn load_dish_ingredients(pool: &SqlitePool, dish_id: &str) -> Result<Vec<ResolvedDishIngredient>> {
    let rows = sqlx::query(
        r#"
        SELECT di.ingredient_id,
               i.id AS i_id, i.name AS i_name, i.brand AS i_brand,
               i.allergens AS i_allergens, i.allergen_source AS i_source,
               i.generation AS i_generation
        FROM dish_ingredients di
        LEFT JOIN ingredients i ON i.id = di.ingredient_id
        WHERE di.dish_id = ?
        ORDER BY di.line_id
        "#,
    )
    .bind(dish_id)
    .fetch_all(pool)
    .await?;

    let mut lines = Vec::with_capacity(rows.len());
    for row in rows {
        let line = DishIngredientLine {
            dish_id: dish_id.to_string(),
            ingredient_id: row.try_get("ingredient_id")?,
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

        lines.push(ResolvedDishIngredient { line, ingredient });
    }

    Ok(lines)
}

/// Recipe edges in insertion order, with the recipe name when it still exists
pub async fn load_dish_recipes(pool: &SqlitePool, dish_id: &str) -> Result<Vec<ResolvedDishRecipe>> {
    let rows: Vec<(String, Option<f64>, Option<String>)> = sqlx::query_as(
        r#"
        SELECT dr.recipe_id, dr.quantity, r.name
        FROM dish_recipes dr
        LEFT JOIN recipes r ON r.id = dr.recipe_id
        WHERE dr.dish_id = ?
        ORDER BY dr.line_id
        "#,
    )
    .bind(dish_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(recipe_id, quantity, recipe_name)| ResolvedDishRecipe {
            line: DishRecipeLine {
                dish_id: dish_id.to_string(),
                recipe_id,
                quantity,
            },
            recipe_name,
        })
        .collect())
}

/// Current generation of every direct ingredient of a dish
pub async fn dish_ingredient_generations(pool: &SqlitePool, dish_id: &str) -> Result<Vec<(String, i64)>> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        r#"
        SELECT di.ingredient_id, COALESCE(i.generation, ?)
        FROM dish_ingredients di
        LEFT JOIN ingredients i ON i.id = di.ingredient_id
        WHERE di.dish_id = ?
        ORDER BY di.line_id
        "#,
    )
    .bind(MISSING_GENERATION)
    .bind(dish_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Insert a dish, generating an id when none is given
pub async fn insert_dish(pool: &SqlitePool, id: Option<&str>, name: &str) -> Result<Dish> {
    let id = match id {
        Some(id) => id_utils::validate(id)?.to_string(),
        None => id_utils::generate(),
    };

    sqlx::query("INSERT INTO dishes (id, name) VALUES (?, ?)")
        .bind(&id)
        .bind(name)
        .execute(pool)
        .await?;

    Ok(Dish {
        id,
        name: name.to_string(),
    })
}

/// Add a direct ingredient to a dish
pub async fn add_dish_ingredient(pool: &SqlitePool, line: &DishIngredientLine) -> Result<()> {
    sqlx::query("INSERT INTO dish_ingredients (dish_id, ingredient_id) VALUES (?, ?)")
        .bind(&line.dish_id)
        .bind(&line.ingredient_id)
        .execute(pool)
        .await?;

    aggregates::mark_stale(pool, EntityKind::Dish, std::slice::from_ref(&line.dish_id)).await?;
    Ok(())
}

/// Add a recipe to a dish
///
/// The recipe id is not checked; a dangling edge surfaces as a warning when
/// the dish is aggregated.
pub async fn add_dish_recipe(pool: &SqlitePool, line: &DishRecipeLine) -> Result<()> {
    sqlx::query("INSERT INTO dish_recipes (dish_id, recipe_id, quantity) VALUES (?, ?, ?)")
        .bind(&line.dish_id)
        .bind(&line.recipe_id)
        .bind(line.quantity)
        .execute(pool)
        .await?;

    aggregates::mark_stale(pool, EntityKind::Dish, std::slice::from_ref(&line.dish_id)).await?;
    Ok(())
}

/// Delete a dish, its lines and its aggregate
pub async fn delete_dish(pool: &SqlitePool, id: &str) -> Result<bool> {
    let mut tx = pool.begin().await?;

    let deleted = sqlx::query("DELETE FROM dishes WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    aggregates::delete_aggregate(&mut *tx, EntityKind::Dish, id).await?;

    tx.commit().await?;
    Ok(deleted > 0)
}

/// Dishes listing the ingredient directly
pub async fn dishes_using_ingredient(pool: &SqlitePool, ingredient_id: &str) -> Result<Vec<String>> {
    let ids = sqlx::query_scalar(
        "SELECT DISTINCT dish_id FROM dish_ingredients WHERE ingredient_id = ? ORDER BY dish_id",
    )
    .bind(ingredient_id)
    .fetch_all(pool)
    .await?;
    Ok(ids)
}

/// Dishes containing any of the given recipes
pub async fn dishes_using_recipes(pool: &SqlitePool, recipe_ids: &[String]) -> Result<Vec<String>> {
    if recipe_ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut builder: QueryBuilder<Sqlite> =
        QueryBuilder::new("SELECT DISTINCT dish_id FROM dish_recipes WHERE recipe_id IN (");
    let mut separated = builder.separated(", ");
    for id in recipe_ids {
        separated.push_bind(id.clone());
    }
    separated.push_unseparated(") ORDER BY dish_id");

    let ids = builder.build_query_scalar().fetch_all(pool).await?;
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ingredients::insert_ingredient;
    use crate::db::recipes::insert_recipe;
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

    #[tokio::test]
    async fn test_dangling_recipe_edge_has_no_name() {
        let pool = setup_test_db().await;
        insert_dish(&pool, Some("d-1"), "Brunch").await.unwrap();
        insert_recipe(&pool, Some("r-1"), "Pancakes").await.unwrap();
        for recipe_id in ["r-1", "r-gone"] {
            add_dish_recipe(
                &pool,
                &DishRecipeLine {
                    dish_id: "d-1".to_string(),
                    recipe_id: recipe_id.to_string(),
                    quantity: None,
                },
            )
            .await
            .unwrap();
        }

        let edges = load_dish_recipes(&pool, "d-1").await.unwrap();
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0].recipe_name.as_deref(), Some("Pancakes"));
        assert!(edges[1].recipe_name.is_none());
    }

    #[tokio::test]
    async fn test_dependency_lookups() {
        let pool = setup_test_db().await;
        insert_ingredient(&pool, &NewIngredient::named("Soy sauce").with_id("i-soy")).await.unwrap();
        insert_dish(&pool, Some("d-1"), "Stir fry").await.unwrap();
        insert_dish(&pool, Some("d-2"), "Noodles").await.unwrap();
        add_dish_ingredient(
            &pool,
            &DishIngredientLine {
                dish_id: "d-1".to_string(),
                ingredient_id: "i-soy".to_string(),
            },
        )
        .await
        .unwrap();
        add_dish_recipe(
            &pool,
            &DishRecipeLine {
                dish_id: "d-2".to_string(),
                recipe_id: "r-1".to_string(),
                quantity: Some(1.0),
            },
        )
        .await
        .unwrap();

        assert_eq!(dishes_using_ingredient(&pool, "i-soy").await.unwrap(), vec!["d-1".to_string()]);
        assert_eq!(
            dishes_using_recipes(&pool, &["r-1".to_string(), "r-2".to_string()]).await.unwrap(),
            vec!["d-2".to_string()]
        );
        assert!(dishes_using_recipes(&pool, &[]).await.unwrap().is_empty());

        let direct = load_dish_ingredients(&pool, "d-1").await.unwrap();
        assert_eq!(direct.len(), 1);
        assert_eq!(direct[0].ingredient.as_ref().unwrap().name, "Soy sauce");
        assert_eq!(
            dish_ingredient_generations(&pool, "d-1").await.unwrap(),
            vec![("i-soy".to_string(), 0)]
        );

        aggregates::store_aggregate(&pool, &AggregateResult::empty(EntityKind::Dish, "d-1"), 1000)
            .await
            .unwrap();
        assert!(delete_dish(&pool, "d-1").await.unwrap());
        assert!(aggregates::load_aggregate(&pool, EntityKind::Dish, "d-1").await.unwrap().is_none());
        assert!(dishes_using_ingredient(&pool, "i-soy").await.unwrap().is_empty());
    }
}
