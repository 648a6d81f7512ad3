//! Aggregate cache persistence
//!
//! One `allergen_aggregates` row per recipe/dish. The row is always written
//! by a single upsert so readers never observe a half-written aggregate.

use chrono::{DateTime, Utc};
use kitchen_common::events::EntityKind;
use kitchen_common::{Error, Result};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use crate::models::{AggregateResult, CachedAggregate};
use crate::utils::retry_on_lock;

/// Load the cached aggregate for one entity
///
/// A row that no longer decodes is logged and treated as a cache miss: the
/// aggregate is derived data and is simply recomputed.
pub async fn load_aggregate(pool: &SqlitePool, kind: EntityKind, entity_id: &str) -> Result<Option<CachedAggregate>> {
    let row = sqlx::query(
        r#"
        SELECT allergens, source_breakdown, warnings, generation, computed_at, stale
        FROM allergen_aggregates
        WHERE entity_kind = ? AND entity_id = ?
        "#,
    )
    .bind(kind.as_str())
    .bind(entity_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let allergens: String = row.try_get("allergens")?;
    let source_breakdown: String = row.try_get("source_breakdown")?;
    let warnings: String = row.try_get("warnings")?;
    let generation: String = row.try_get("generation")?;
    let computed_at: String = row.try_get("computed_at")?;
    let stale: bool = row.try_get("stale")?;

    let decoded = (|| -> std::result::Result<AggregateResult, String> {
        Ok(AggregateResult {
            kind,
            entity_id: entity_id.to_string(),
            allergens: serde_json::from_str(&allergens).map_err(|e| format!("allergens: {}", e))?,
            source_breakdown: serde_json::from_str(&source_breakdown)
                .map_err(|e| format!("source_breakdown: {}", e))?,
            warnings: serde_json::from_str(&warnings).map_err(|e| format!("warnings: {}", e))?,
            generation: serde_json::from_str(&generation).map_err(|e| format!("generation: {}", e))?,
            computed_at: DateTime::parse_from_rfc3339(&computed_at)
                .map_err(|e| format!("computed_at: {}", e))?
                .with_timezone(&Utc),
            from_cache: true,
        })
    })();

    match decoded {
        Ok(result) => Ok(Some(CachedAggregate { result, stale })),
        Err(reason) => {
            tracing::warn!(
                kind = %kind,
                entity_id,
                reason = %reason,
                "Discarding undecodable cached aggregate"
            );
            Ok(None)
        }
    }
}

/// Persist an aggregate, clearing the stale flag
pub async fn store_aggregate(pool: &SqlitePool, result: &AggregateResult, max_wait_ms: u64) -> Result<()> {
    // Serialize everything before touching the database
    let allergens = serde_json::to_string(&result.allergens)
        .map_err(|e| Error::Internal(format!("Failed to serialize allergens: {}", e)))?;
    let source_breakdown = serde_json::to_string(&result.source_breakdown)
        .map_err(|e| Error::Internal(format!("Failed to serialize source breakdown: {}", e)))?;
    let warnings = serde_json::to_string(&result.warnings)
        .map_err(|e| Error::Internal(format!("Failed to serialize warnings: {}", e)))?;
    let generation = serde_json::to_string(&result.generation)
        .map_err(|e| Error::Internal(format!("Failed to serialize generation: {}", e)))?;
    let computed_at = result.computed_at.to_rfc3339();

    retry_on_lock("aggregate upsert", max_wait_ms, || async {
        sqlx::query(
            r#"
            INSERT INTO allergen_aggregates (
                entity_kind, entity_id, allergens, source_breakdown, warnings,
                generation, computed_at, stale
            ) VALUES (?, ?, ?, ?, ?, ?, ?, 0)
            ON CONFLICT(entity_kind, entity_id) DO UPDATE SET
                allergens = excluded.allergens,
                source_breakdown = excluded.source_breakdown,
                warnings = excluded.warnings,
                generation = excluded.generation,
                computed_at = excluded.computed_at,
                stale = 0
            "#,
        )
        .bind(result.kind.as_str())
        .bind(&result.entity_id)
        .bind(&allergens)
        .bind(&source_breakdown)
        .bind(&warnings)
        .bind(&generation)
        .bind(&computed_at)
        .execute(pool)
        .await?;
        Ok(())
    })
    .await
}

/// Set the explicit stale flag on existing aggregate rows
///
/// Returns the number of rows marked.
pub async fn mark_stale(pool: &SqlitePool, kind: EntityKind, entity_ids: &[String]) -> Result<u64> {
    if entity_ids.is_empty() {
        return Ok(0);
    }

    let mut builder: QueryBuilder<Sqlite> =
        QueryBuilder::new("UPDATE allergen_aggregates SET stale = 1 WHERE entity_kind = ");
    builder.push_bind(kind.as_str());
    builder.push(" AND entity_id IN (");
    let mut separated = builder.separated(", ");
    for id in entity_ids {
        separated.push_bind(id.clone());
    }
    separated.push_unseparated(")");

    let marked = builder.build().execute(pool).await?.rows_affected();
    tracing::debug!(kind = %kind, requested = entity_ids.len(), marked, "Marked aggregates stale");
    Ok(marked)
}

/// Remove the aggregate row of a deleted entity
///
/// Takes any executor so entity deletes can run it inside their transaction.
pub async fn delete_aggregate<'e, E>(executor: E, kind: EntityKind, entity_id: &str) -> Result<bool>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let deleted = sqlx::query("DELETE FROM allergen_aggregates WHERE entity_kind = ? AND entity_id = ?")
        .bind(kind.as_str())
        .bind(entity_id)
        .execute(executor)
        .await?
        .rows_affected();
    Ok(deleted > 0)
}
