//! HTTP API handlers for kitchen-allergens
//!
//! Successful responses are wrapped as `{"success": true, "data": ...}`.

pub mod aggregates;
pub mod auth;
pub mod health;
pub mod ingredients;
pub mod reaggregate;
pub mod sse;

pub use aggregates::aggregate_routes;
pub use health::health_routes;
pub use ingredients::ingredient_routes;
pub use reaggregate::reaggregate_routes;
pub use sse::event_routes;

use axum::Json;
use serde::Serialize;

/// Success envelope
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self { success: true, data })
    }
}
