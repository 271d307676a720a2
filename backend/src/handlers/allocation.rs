//! HTTP handlers for order allocation and fulfillment endpoints

use axum::{extract::State, http::StatusCode};
use shared::{Allocation, AllocationView, FulfillmentWorksheet, LineAvailability};
use uuid::Uuid;

use crate::error::AppResult;
use crate::extract::{Json, Path};
use crate::middleware::CurrentUser;
use crate::services::allocation::AllocateRequest;
use crate::services::{AllocationService, FulfillmentService, LockTimeouts};
use crate::AppState;

fn allocations(state: &AppState) -> AllocationService {
    AllocationService::new(
        state.db.clone(),
        LockTimeouts::from(&state.config.database),
    )
}

/// Glazed stock available for each line of an order
pub async fn get_order_inventory(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Path(pedido_id): Path<Uuid>,
) -> AppResult<Json<Vec<LineAvailability>>> {
    let lines = allocations(&state).availability_for(pedido_id).await?;
    Ok(Json(lines))
}

/// Allocations of an order
pub async fn list_order_allocations(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Path(pedido_id): Path<Uuid>,
) -> AppResult<Json<Vec<AllocationView>>> {
    let views = allocations(&state).list_allocations(pedido_id).await?;
    Ok(Json(views))
}

/// Allocation worksheet of an order
pub async fn get_order_worksheet(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Path(pedido_id): Path<Uuid>,
) -> AppResult<Json<FulfillmentWorksheet>> {
    let service = FulfillmentService::new(state.db);
    let worksheet = service.worksheet(pedido_id).await?;
    Ok(Json(worksheet))
}

/// Reserve glazed stock for a line item
pub async fn create_allocation(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<AllocateRequest>,
) -> AppResult<(StatusCode, Json<Allocation>)> {
    let allocation = allocations(&state)
        .allocate(current_user.0.user_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(allocation)))
}

/// Release an allocation
pub async fn delete_allocation(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Path(allocation_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    allocations(&state).deallocate(allocation_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
