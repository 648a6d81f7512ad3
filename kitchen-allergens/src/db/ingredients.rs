//! Ingredient database operations
//!
//! Allergen writes always bump `generation`. Automated writes go through
//! [`write_inferred_allergens`], a compare-and-set on that generation that
//! also refuses to touch a row whose `manual` flag is set.

use kitchen_common::allergens::{to_codes, AllergenSet};
use kitchen_common::{id_utils, Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::models::{AllergenSourceFlags, Ingredient, NewIngredient};
use crate::utils::retry_on_lock;

const MANUAL_SOURCE: &str = r#"{"manual":true,"ai":false}"#;
const INFERRED_SOURCE: &str = r#"{"manual":false,"ai":true}"#;
const UNSET_SOURCE: &str = r#"{"manual":false,"ai":false}"#;

/// Outcome of an automated compare-and-set write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferredWrite {
    /// Row updated; carries the new generation
    Written(i64),
    /// Generation moved or the row became manual; the write was discarded
    Rejected,
}

/// Build an ingredient from its raw column values
///
/// Shared by the joined composition queries, which select the same columns
/// under different aliases.
pub(crate) fn ingredient_from_columns(
    id: String,
    name: String,
    brand: Option<String>,
    allergens: &str,
    allergen_source: &str,
    generation: i64,
) -> Result<Ingredient> {
    let codes: Vec<String> = serde_json::from_str(allergens)
        .map_err(|e| Error::corrupt(format!("ingredient {} allergens", id), e))?;
    let source: AllergenSourceFlags = serde_json::from_str(allergen_source)
        .map_err(|e| Error::corrupt(format!("ingredient {} allergen_source", id), e))?;

    Ok(Ingredient {
        id,
        name,
        brand,
        allergens: codes,
        source,
        generation,
    })
}

fn ingredient_from_row(row: &SqliteRow) -> Result<Ingredient> {
    let allergens: String = row.try_get("allergens")?;
    let allergen_source: String = row.try_get("allergen_source")?;
    ingredient_from_columns(
        row.try_get("id")?,
        row.try_get("name")?,
        row.try_get("brand")?,
        &allergens,
        &allergen_source,
        row.try_get("generation")?,
    )
}

/// Load one ingredient
pub async fn load_ingredient(pool: &SqlitePool, id: &str) -> Result<Option<Ingredient>> {
    let row = sqlx::query(
        r#"
        SELECT id, name, brand, allergens, allergen_source, generation
        FROM ingredients
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(ingredient_from_row).transpose()
}

/// Insert an ingredient, generating an id when none is given
///
/// Stored codes are kept as given so legacy aliases survive until the next
/// allergen write.
pub async fn insert_ingredient(pool: &SqlitePool, new: &NewIngredient) -> Result<Ingredient> {
    let id = match &new.id {
        Some(id) => id_utils::validate(id)?.to_string(),
        None => id_utils::generate(),
    };
    let allergens = serde_json::to_string(&new.allergens)
        .map_err(|e| Error::Internal(format!("Failed to serialize allergens: {}", e)))?;
    let source = serde_json::to_string(&new.source)
        .map_err(|e| Error::Internal(format!("Failed to serialize allergen_source: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO ingredients (id, name, brand, allergens, allergen_source, generation)
        VALUES (?, ?, ?, ?, ?, 0)
        "#,
    )
    .bind(&id)
    .bind(&new.name)
    .bind(&new.brand)
    .bind(&allergens)
    .bind(&source)
    .execute(pool)
    .await?;

    Ok(Ingredient {
        id,
        name: new.name.clone(),
        brand: new.brand.clone(),
        allergens: new.allergens.clone(),
        source: new.source,
        generation: 0,
    })
}

/// Unconditional allergen write used by user edits
///
/// Returns the new generation, or None when the ingredient does not exist.
async fn write_allergens(
    pool: &SqlitePool,
    operation: &str,
    id: &str,
    allergens: &AllergenSet,
    source: &'static str,
    max_wait_ms: u64,
) -> Result<Option<i64>> {
    let codes = serde_json::to_string(&to_codes(allergens))
        .map_err(|e| Error::Internal(format!("Failed to serialize allergens: {}", e)))?;

    retry_on_lock(operation, max_wait_ms, || async {
        let generation: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE ingredients
            SET allergens = ?, allergen_source = ?, generation = generation + 1,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            RETURNING generation
            "#,
        )
        .bind(&codes)
        .bind(source)
        .bind(id)
        .fetch_optional(pool)
        .await?;
        Ok(generation)
    })
    .await
}

/// Set a manual override (tag `Manual`)
pub async fn set_manual_allergens(
    pool: &SqlitePool,
    id: &str,
    allergens: &AllergenSet,
    max_wait_ms: u64,
) -> Result<Option<i64>> {
    write_allergens(pool, "set manual allergens", id, allergens, MANUAL_SOURCE, max_wait_ms).await
}

/// Clear a manual override back to `Unset` with an empty set
pub async fn clear_manual_allergens(
    pool: &SqlitePool,
    id: &str,
    max_wait_ms: u64,
) -> Result<Option<i64>> {
    write_allergens(
        pool,
        "clear manual allergens",
        id,
        &AllergenSet::new(),
        UNSET_SOURCE,
        max_wait_ms,
    )
    .await
}

/// Compare-and-set write of an inferred allergen set
///
/// Succeeds only if the row still has `expected_generation` and is not
/// manual. A single conditional UPDATE, so there is no window between the
/// check and the write.
pub async fn write_inferred_allergens(
    pool: &SqlitePool,
    id: &str,
    expected_generation: i64,
    allergens: &AllergenSet,
    max_wait_ms: u64,
) -> Result<InferredWrite> {
    let codes = serde_json::to_string(&to_codes(allergens))
        .map_err(|e| Error::Internal(format!("Failed to serialize allergens: {}", e)))?;

    let written = retry_on_lock("inferred allergen write", max_wait_ms, || async {
        let generation: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE ingredients
            SET allergens = ?, allergen_source = ?, generation = generation + 1,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
              AND generation = ?
              AND COALESCE(json_extract(allergen_source, '$.manual'), 0) = 0
            RETURNING generation
            "#,
        )
        .bind(&codes)
        .bind(INFERRED_SOURCE)
        .bind(id)
        .bind(expected_generation)
        .fetch_optional(pool)
        .await?;
        Ok(generation)
    })
    .await?;

    Ok(match written {
        Some(generation) => InferredWrite::Written(generation),
        None => InferredWrite::Rejected,
    })
}
