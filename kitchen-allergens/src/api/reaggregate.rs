//! Full re-aggregation handlers
//!
//! POST /allergens/reaggregate-all, POST /allergens/reaggregate-all/cancel

use axum::{extract::State, routing::post, Json, Router};
use kitchen_common::allergens::AllergenCode;
use serde::Serialize;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::ApiResponse;
use crate::{
    error::{ApiError, ApiResult},
    models::{BatchReport, PhaseReport},
    AppState,
};

/// Per-phase counts and results
#[derive(Debug, Serialize)]
pub struct PhaseSummary {
    pub total: usize,
    pub aggregated: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Entity id to allergen codes, successful entities only
    pub results: BTreeMap<String, Vec<AllergenCode>>,
    /// Entity id to error message
    pub failures: BTreeMap<String, String>,
}

impl From<&PhaseReport> for PhaseSummary {
    fn from(report: &PhaseReport) -> Self {
        Self {
            total: report.total,
            aggregated: report.succeeded,
            failed: report.failed,
            skipped: report.skipped,
            results: report.results(),
            failures: report.failures(),
        }
    }
}

/// POST /allergens/reaggregate-all response
#[derive(Debug, Serialize)]
pub struct ReaggregateResponse {
    pub recipes: PhaseSummary,
    pub dishes: PhaseSummary,
    pub cancelled: bool,
}

impl From<&BatchReport> for ReaggregateResponse {
    fn from(report: &BatchReport) -> Self {
        Self {
            recipes: PhaseSummary::from(&report.recipes),
            dishes: PhaseSummary::from(&report.dishes),
            cancelled: report.cancelled,
        }
    }
}

/// POST /allergens/reaggregate-all/cancel response
#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

/// POST /allergens/reaggregate-all
///
/// Runs both phases and answers once they finish. Returns 409 while another
/// full run is active.
pub async fn reaggregate_all(State(state): State<AppState>) -> ApiResult<Json<ApiResponse<ReaggregateResponse>>> {
    let cancel = {
        let mut slot = state.active_batch.write().await;
        if slot.is_some() {
            return Err(ApiError::Conflict("Re-aggregation already running".to_string()));
        }
        let token = CancellationToken::new();
        *slot = Some(token.clone());
        token
    };

    // Detached so a dropped client connection does not abort the run midway
    let batch = state.engine.batch.clone();
    let active_batch = state.active_batch.clone();
    let handle = tokio::spawn(async move {
        let outcome = batch.reaggregate_all(&cancel).await;
        *active_batch.write().await = None;
        outcome
    });

    let report = handle
        .await
        .map_err(|e| ApiError::Internal(format!("Re-aggregation task failed: {}", e)))??;

    Ok(ApiResponse::ok(ReaggregateResponse::from(&report)))
}

/// POST /allergens/reaggregate-all/cancel
///
/// Entities not yet started are reported as skipped. Returns 409 when no run
/// is active.
pub async fn cancel_reaggregation(State(state): State<AppState>) -> ApiResult<Json<ApiResponse<CancelResponse>>> {
    let slot = state.active_batch.read().await;
    match slot.as_ref() {
        Some(token) => {
            info!("Cancelling running re-aggregation");
            token.cancel();
            Ok(ApiResponse::ok(CancelResponse { cancelled: true }))
        }
        None => Err(ApiError::Conflict("No re-aggregation is running".to_string())),
    }
}

pub fn reaggregate_routes() -> Router<AppState> {
    Router::new()
        .route("/allergens/reaggregate-all", post(reaggregate_all))
        .route("/allergens/reaggregate-all/cancel", post(cancel_reaggregation))
}
