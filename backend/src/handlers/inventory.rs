//! HTTP handlers for the production inventory endpoints

use axum::extract::State;
use serde::Deserialize;
use shared::{LedgerDiscrepancy, PageRequest, StageSummary};
use uuid::Uuid;

use crate::error::AppResult;
use crate::extract::{Json, Query};
use crate::middleware::CurrentUser;
use crate::services::ledger::{InventoryRecordView, MovementView};
use crate::services::transitions::{
    AdjustmentRequest, EsmaltadoProcessRequest, MermaRequest, QuantityRequest, TransitionOutcome,
};
use crate::services::{InventoryLedger, LockTimeouts, StageTransitionService};
use crate::AppState;

/// Query parameters of the movement log
#[derive(Debug, Default, Deserialize)]
pub struct MovementQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub product_id: Option<Uuid>,
}

fn transitions(state: &AppState) -> StageTransitionService {
    StageTransitionService::new(
        state.db.clone(),
        LockTimeouts::from(&state.config.database),
    )
}

/// List every inventory record
pub async fn list_inventory(
    State(state): State<AppState>,
    _current_user: CurrentUser,
) -> AppResult<Json<Vec<InventoryRecordView>>> {
    let ledger = InventoryLedger::new(state.db);
    let records = ledger.list_all().await?;
    Ok(Json(records))
}

/// Page through the movement log, newest first
pub async fn list_movements(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Query(query): Query<MovementQuery>,
) -> AppResult<Json<Vec<MovementView>>> {
    let ledger = InventoryLedger::new(state.db);
    let page = PageRequest {
        limit: query.limit,
        offset: query.offset,
    };
    let movements = ledger.list_movements(page, query.product_id).await?;
    Ok(Json(movements))
}

/// Totals per stage
pub async fn get_inventory_summary(
    State(state): State<AppState>,
    _current_user: CurrentUser,
) -> AppResult<Json<Vec<StageSummary>>> {
    let ledger = InventoryLedger::new(state.db);
    let summary = ledger.summary().await?;
    Ok(Json(summary))
}

/// Counters that disagree with the movement log
pub async fn verify_inventory(
    State(state): State<AppState>,
    _current_user: CurrentUser,
) -> AppResult<Json<Vec<LedgerDiscrepancy>>> {
    let ledger = InventoryLedger::new(state.db);
    let discrepancies = ledger.verify().await?;
    Ok(Json(discrepancies))
}

/// Register newly formed raw pieces
pub async fn crudo_input(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<QuantityRequest>,
) -> AppResult<Json<TransitionOutcome>> {
    let outcome = transitions(&state)
        .crudo_input(current_user.0.user_id, input)
        .await?;
    Ok(Json(outcome))
}

/// Bisque-fire raw pieces
pub async fn sancochado_process(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<QuantityRequest>,
) -> AppResult<Json<TransitionOutcome>> {
    let outcome = transitions(&state)
        .sancochado_process(current_user.0.user_id, input)
        .await?;
    Ok(Json(outcome))
}

/// Glaze bisque-fired pieces
pub async fn esmaltado_process(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<EsmaltadoProcessRequest>,
) -> AppResult<Json<TransitionOutcome>> {
    let outcome = transitions(&state)
        .esmaltado_process(current_user.0.user_id, input)
        .await?;
    Ok(Json(outcome))
}

/// Set a record to its counted total
pub async fn adjust_inventory(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<AdjustmentRequest>,
) -> AppResult<Json<TransitionOutcome>> {
    let outcome = transitions(&state)
        .adjustment(current_user.0.user_id, input)
        .await?;
    Ok(Json(outcome))
}

/// Write off lost pieces
pub async fn record_merma(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<MermaRequest>,
) -> AppResult<Json<TransitionOutcome>> {
    let outcome = transitions(&state)
        .merma(current_user.0.user_id, input)
        .await?;
    Ok(Json(outcome))
}
