//! Event types for the kitchen event system
//!
//! Provides shared event definitions and EventBus for all kitchen modules.

use crate::allergens::AllergenCode;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Which kind of composed entity an aggregate belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Recipe,
    Dish,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Recipe => "recipe",
            EntityKind::Dish => "dish",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kitchen event types
///
/// Events are broadcast via EventBus and can be serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AllergenEvent {
    /// An aggregate row was committed to the cache
    AggregateWritten {
        kind: EntityKind,
        entity_id: String,
        allergens: Vec<AllergenCode>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// An ingredient's stored allergen set or provenance changed
    IngredientAllergensChanged {
        ingredient_id: String,
        allergens: Vec<AllergenCode>,
        /// "manual", "inferred" or "unset"
        provenance: String,
        generation: i64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A batch phase began dispatching entities
    BatchPhaseStarted {
        phase: EntityKind,
        total: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A batch phase fully drained
    BatchPhaseCompleted {
        phase: EntityKind,
        succeeded: usize,
        failed: usize,
        skipped: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A batch run finished (possibly cancelled)
    BatchCompleted {
        cancelled: bool,
        duration_ms: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl AllergenEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            AllergenEvent::AggregateWritten { .. } => "AggregateWritten",
            AllergenEvent::IngredientAllergensChanged { .. } => "IngredientAllergensChanged",
            AllergenEvent::BatchPhaseStarted { .. } => "BatchPhaseStarted",
            AllergenEvent::BatchPhaseCompleted { .. } => "BatchPhaseCompleted",
            AllergenEvent::BatchCompleted { .. } => "BatchCompleted",
        }
    }
}

/// Broadcast bus for [`AllergenEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AllergenEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<AllergenEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: AllergenEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
