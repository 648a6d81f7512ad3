//! Batch re-aggregation reports

use chrono::{DateTime, Utc};
use kitchen_common::allergens::AllergenCode;
use kitchen_common::events::EntityKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Result of one entity in a batch phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EntityOutcome {
    Aggregated {
        allergens: Vec<AllergenCode>,
        warnings: usize,
    },
    Failed {
        error: String,
    },
    /// Not started because the batch was cancelled
    Skipped,
}

/// Report for one phase (all recipes, or all dishes)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseReport {
    pub phase: EntityKind,
    pub total: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub entries: BTreeMap<String, EntityOutcome>,
}

impl PhaseReport {
    pub fn new(phase: EntityKind) -> Self {
        Self {
            phase,
            total: 0,
            attempted: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            entries: BTreeMap::new(),
        }
    }

    /// Report for a phase that never started
    pub fn all_skipped(phase: EntityKind, ids: Vec<String>) -> Self {
        let mut report = Self::new(phase);
        for id in ids {
            report.record(id, EntityOutcome::Skipped);
        }
        report
    }

    pub fn record(&mut self, entity_id: String, outcome: EntityOutcome) {
        self.total += 1;
        match &outcome {
            EntityOutcome::Aggregated { .. } => {
                self.attempted += 1;
                self.succeeded += 1;
            }
            EntityOutcome::Failed { .. } => {
                self.attempted += 1;
                self.failed += 1;
            }
            EntityOutcome::Skipped => self.skipped += 1,
        }
        self.entries.insert(entity_id, outcome);
    }

    /// Successful entities mapped to their allergen codes
    pub fn results(&self) -> BTreeMap<String, Vec<AllergenCode>> {
        self.entries
            .iter()
            .filter_map(|(id, outcome)| match outcome {
                EntityOutcome::Aggregated { allergens, .. } => Some((id.clone(), allergens.clone())),
                _ => None,
            })
            .collect()
    }

    /// Failed entities mapped to their error messages
    pub fn failures(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .filter_map(|(id, outcome)| match outcome {
                EntityOutcome::Failed { error } => Some((id.clone(), error.clone())),
                _ => None,
            })
            .collect()
    }
}

/// Full two-phase batch report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub recipes: PhaseReport,
    pub dishes: PhaseReport,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
