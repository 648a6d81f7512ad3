//! Aggregate results and their cache representation

use chrono::{DateTime, Utc};
use kitchen_common::allergens::{AllergenCode, AllergenSet};
use kitchen_common::events::EntityKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::ingredient::Provenance;

/// One ingredient that contributed an allergen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllergenContributor {
    pub ingredient_id: String,
    pub ingredient_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub provenance: Provenance,
    /// Set when the ingredient reached a dish through a recipe
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipe_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipe_name: Option<String>,
}

/// Per-allergen list of contributors, in composition line order
pub type SourceBreakdown = BTreeMap<AllergenCode, Vec<AllergenContributor>>;

/// Snapshot of the ingredient generations an aggregate was computed from
///
/// A mismatch against the current catalog is the staleness signal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenerationStamp(BTreeMap<String, i64>);

impl GenerationStamp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, key: impl Into<String>, generation: i64) {
        self.0.insert(key.into(), generation);
    }

    pub fn get(&self, key: &str) -> Option<i64> {
        self.0.get(key).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &i64)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Generation recorded for a line whose ingredient row is missing
pub const MISSING_GENERATION: i64 = -1;

/// Non-fatal problems recorded while aggregating
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AggregationWarning {
    /// Inference failed; the ingredient contributed nothing and stays eligible
    InferenceFailed { ingredient_id: String, message: String },
    /// A line references an ingredient row that no longer exists
    IngredientNotFound { ingredient_id: String },
    /// A stored code is not in the registry and was dropped
    UnrecognizedCode { ingredient_id: String, code: String },
    /// A dish references a recipe that no longer exists
    RecipeNotFound { recipe_id: String },
    /// A dish's recipe could not be aggregated
    RecipeFailed { recipe_id: String, message: String },
}

impl AggregationWarning {
    /// Whether the aggregate may be missing allergens because of this warning
    pub fn leaves_undetermined(&self) -> bool {
        !matches!(self, AggregationWarning::UnrecognizedCode { .. })
    }
}

/// Computed allergen set for one recipe or dish
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub kind: EntityKind,
    pub entity_id: String,
    pub allergens: AllergenSet,
    pub source_breakdown: SourceBreakdown,
    pub warnings: Vec<AggregationWarning>,
    pub computed_at: DateTime<Utc>,
    pub generation: GenerationStamp,
    /// True when served from the cache without recomputation
    #[serde(default)]
    pub from_cache: bool,
}

impl AggregateResult {
    /// An empty terminal result (zero composition lines)
    pub fn empty(kind: EntityKind, entity_id: impl Into<String>) -> Self {
        Self {
            kind,
            entity_id: entity_id.into(),
            allergens: AllergenSet::new(),
            source_breakdown: SourceBreakdown::new(),
            warnings: Vec::new(),
            computed_at: Utc::now(),
            generation: GenerationStamp::new(),
            from_cache: false,
        }
    }

    /// False while any contributor is undetermined ("not yet determined" in views)
    pub fn determined(&self) -> bool {
        !self.warnings.iter().any(AggregationWarning::leaves_undetermined)
    }

    pub fn add_contributor(&mut self, code: AllergenCode, contributor: AllergenContributor) {
        self.allergens.insert(code);
        self.source_breakdown.entry(code).or_default().push(contributor);
    }

    /// Record a warning once
    pub fn warn(&mut self, warning: AggregationWarning) {
        if !self.warnings.contains(&warning) {
            self.warnings.push(warning);
        }
    }

    /// Same allergen content, ignoring timestamps and cache flags
    pub fn same_content(&self, other: &AggregateResult) -> bool {
        self.allergens == other.allergens
            && self.source_breakdown == other.source_breakdown
            && self.warnings == other.warnings
    }
}

/// A cache row: the last computed aggregate plus its explicit staleness flag
#[derive(Debug, Clone)]
pub struct CachedAggregate {
    pub result: AggregateResult,
    pub stale: bool,
}

impl CachedAggregate {
    /// Fresh when not explicitly invalidated and computed from the current generations
    pub fn is_fresh_for(&self, current: &GenerationStamp) -> bool {
        !self.stale && &self.result.generation == current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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
    fn test_add_contributor_unions_codes() {
        let mut result = AggregateResult::empty(EntityKind::Recipe, "r-1");
        result.add_contributor(AllergenCode::Egg, contributor("i-1"));
        result.add_contributor(AllergenCode::Egg, contributor("i-2"));
        result.add_contributor(AllergenCode::Milk, contributor("i-2"));

        assert_eq!(result.allergens.len(), 2);
        assert_eq!(result.source_breakdown[&AllergenCode::Egg].len(), 2);
        assert_eq!(result.source_breakdown[&AllergenCode::Milk][0].ingredient_id, "i-2");
    }

    #[test]
    fn test_warnings_are_deduplicated() {
        let mut result = AggregateResult::empty(EntityKind::Dish, "d-1");
        let warning = AggregationWarning::RecipeNotFound { recipe_id: "r-9".to_string() };
        result.warn(warning.clone());
        result.warn(warning);
        assert_eq!(result.warnings.len(), 1);
        assert!(!result.determined());
    }

    #[test]
    fn test_unrecognized_codes_do_not_leave_undetermined() {
        let mut result = AggregateResult::empty(EntityKind::Recipe, "r-1");
        result.warn(AggregationWarning::UnrecognizedCode {
            ingredient_id: "i-1".to_string(),
            code: "unicorn".to_string(),
        });
        assert!(result.determined());
    }

    #[test]
    fn test_freshness_requires_matching_stamp_and_no_stale_flag() {
        let mut stamp = GenerationStamp::new();
        stamp.record("i-1", 3);

        let mut result = AggregateResult::empty(EntityKind::Recipe, "r-1");
        result.generation = stamp.clone();

        let cached = CachedAggregate { result: result.clone(), stale: false };
        assert!(cached.is_fresh_for(&stamp));

        let mut bumped = stamp.clone();
        bumped.record("i-1", 4);
        assert!(!cached.is_fresh_for(&bumped));

        let invalidated = CachedAggregate { result, stale: true };
        assert!(!invalidated.is_fresh_for(&stamp));
    }

    #[test]
    fn test_warning_serialization_is_tagged() {
        let warning = AggregationWarning::InferenceFailed {
            ingredient_id: "i-1".to_string(),
            message: "timeout".to_string(),
        };
        let json = serde_json::to_value(&warning).unwrap();
        assert_eq!(json["kind"], "inference_failed");
        assert_eq!(json["ingredient_id"], "i-1");
    }
}
