//! Route definitions for the Ceramic Production Inventory

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};

use crate::{handlers, middleware::auth_middleware, AppState};

/// Create API routes
pub fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        // Protected routes - production inventory
        .nest("/produccion/inventory", production_routes())
        // Protected routes - sales order allocation
        .nest("/ventas/pedidos", order_routes())
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// Production inventory routes (protected)
fn production_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_inventory))
        .route("/movements", get(handlers::list_movements))
        .route("/summary", get(handlers::get_inventory_summary))
        .route("/verify", get(handlers::verify_inventory))
        .route("/crudo-input", post(handlers::crudo_input))
        .route("/sancochado-process", post(handlers::sancochado_process))
        .route("/esmaltado-process", post(handlers::esmaltado_process))
        .route("/adjustment", post(handlers::adjust_inventory))
        .route("/merma", post(handlers::record_merma))
}

/// Sales order allocation routes (protected)
fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/allocations", post(handlers::create_allocation))
        .route("/allocations/:allocation_id", delete(handlers::delete_allocation))
        .route("/:pedido_id/inventory", get(handlers::get_order_inventory))
        .route("/:pedido_id/allocations", get(handlers::list_order_allocations))
        .route("/:pedido_id/worksheet", get(handlers::get_order_worksheet))
}
