//! kitchen-allergens library interface
//!
//! Allergen propagation and aggregation engine: ingredient resolution,
//! recipe and dish aggregation, the aggregate cache and two-phase batch
//! re-aggregation, fronted by an axum router.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use kitchen_common::events::EventBus;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::services::{AllergenEngine, CallerRateLimiter};

/// Request signature settings
#[derive(Debug, Clone, Copy)]
pub struct AuthSettings {
    pub max_clock_skew_ms: i64,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            max_clock_skew_ms: 30_000,
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Resolver, aggregators, batch orchestrator and editor
    pub engine: AllergenEngine,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Per-caller budget for the batch inference endpoint
    pub rate_limiter: Arc<dyn CallerRateLimiter>,
    pub auth: AuthSettings,
    /// Cancellation token of the running full re-aggregation, if any
    pub active_batch: Arc<RwLock<Option<CancellationToken>>>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        engine: AllergenEngine,
        event_bus: EventBus,
        rate_limiter: Arc<dyn CallerRateLimiter>,
        auth: AuthSettings,
    ) -> Self {
        Self {
            db,
            engine,
            event_bus,
            rate_limiter,
            auth,
            active_batch: Arc::new(RwLock::new(None)),
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::reaggregate_routes())
        .merge(api::aggregate_routes())
        .merge(api::ingredient_routes())
        .merge(api::event_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
