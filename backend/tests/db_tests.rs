//! Database integration tests
//!
//! Run against a real PostgreSQL 15+ with
//! `DATABASE_URL=... cargo test -p ceramic-inventory-backend -- --ignored`.
//! Each test gets a fresh database with the migrations applied.

use ceramic_inventory::error::AppError;
use ceramic_inventory::services::allocation::AllocateRequest;
use ceramic_inventory::services::transitions::{
    AdjustmentRequest, EsmaltadoProcessRequest, MermaRequest, QuantityRequest,
};
use ceramic_inventory::services::{
    AllocationService, FulfillmentService, InventoryLedger, LockTimeouts, StageTransitionService,
};
use rust_decimal::Decimal;
use shared::{MovementType, PageRequest, Stage};
use sqlx::PgPool;
use uuid::Uuid;

struct Fixture {
    product_id: Uuid,
    red: Uuid,
    pedido_id: Uuid,
    user_id: Uuid,
}

async fn seed(pool: &PgPool) -> Fixture {
    let product_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO products (name, size, cost_pasta, cost_labor, cost_glaze, cost_firing)
        VALUES ('Taza 250ml', '250ml', 1.50, 2.00, 0.75, 0.25)
        RETURNING id
        "#,
    )
    .fetch_one(pool)
    .await
    .unwrap();

    let red: Uuid = sqlx::query_scalar("INSERT INTO esmalte_colors (name) VALUES ('Rojo') RETURNING id")
        .fetch_one(pool)
        .await
        .unwrap();

    let pedido_id: Uuid =
        sqlx::query_scalar("INSERT INTO pedidos (customer_name) VALUES ('Tienda Sol') RETURNING id")
            .fetch_one(pool)
            .await
            .unwrap();

    Fixture {
        product_id,
        red,
        pedido_id,
        user_id: Uuid::new_v4(),
    }
}

async fn add_line(pool: &PgPool, fixture: &Fixture, quantity: i32) -> Uuid {
    sqlx::query_scalar(
        r#"
        INSERT INTO pedido_items (pedido_id, product_id, esmalte_color_id, quantity)
        VALUES ($1, $2, $3, $4)
        RETURNING id
        "#,
    )
    .bind(fixture.pedido_id)
    .bind(fixture.product_id)
    .bind(fixture.red)
    .bind(quantity)
    .fetch_one(pool)
    .await
    .unwrap()
}

fn transitions(pool: &PgPool) -> StageTransitionService {
    StageTransitionService::new(pool.clone(), LockTimeouts::default())
}

fn allocations(pool: &PgPool) -> AllocationService {
    AllocationService::new(pool.clone(), LockTimeouts::default())
}

/// Put `quantity` glazed red units on the shelf and return the record id
async fn stock_glazed(pool: &PgPool, fixture: &Fixture, quantity: i32) -> Uuid {
    let outcome = transitions(pool)
        .adjustment(
            fixture.user_id,
            AdjustmentRequest {
                product_id: fixture.product_id,
                stage: "ESMALTADO".to_string(),
                esmalte_color_id: Some(fixture.red),
                quantity,
                notes: Some("conteo inicial".to_string()),
            },
        )
        .await
        .unwrap();
    outcome.records[0].id
}

async fn reserved_of(pool: &PgPool, inventory_id: Uuid) -> (i32, i32) {
    sqlx::query_as("SELECT quantity, reserved FROM inventory_records WHERE id = $1")
        .bind(inventory_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_input_then_firing(pool: PgPool) {
    let fixture = seed(&pool).await;
    let service = transitions(&pool);

    service
        .crudo_input(
            fixture.user_id,
            QuantityRequest {
                product_id: fixture.product_id,
                quantity: 100,
                notes: None,
            },
        )
        .await
        .unwrap();
    let outcome = service
        .sancochado_process(
            fixture.user_id,
            QuantityRequest {
                product_id: fixture.product_id,
                quantity: 60,
                notes: Some("horno 1".to_string()),
            },
        )
        .await
        .unwrap();

    assert_eq!(outcome.movement.movement_type, MovementType::SancochadoProcess);
    assert_eq!(outcome.records.len(), 2);

    let ledger = InventoryLedger::new(pool.clone());
    let records = ledger.list_all().await.unwrap();
    let quantity_at = |stage: Stage| {
        records
            .iter()
            .find(|r| r.record.stage == stage)
            .map(|r| r.record.quantity)
    };
    assert_eq!(quantity_at(Stage::Crudo), Some(40));
    assert_eq!(quantity_at(Stage::Sancochado), Some(60));
    // Listing puts fired stock ahead of raw stock
    assert_eq!(records[0].record.stage, Stage::Sancochado);

    let movements = ledger
        .list_movements(PageRequest::default(), Some(fixture.product_id))
        .await
        .unwrap();
    assert_eq!(movements.len(), 2);
    assert_eq!(movements[0].movement.movement_type, MovementType::SancochadoProcess);
    assert_eq!(movements[0].movement.notes.as_deref(), Some("horno 1"));

    assert!(ledger.verify().await.unwrap().is_empty());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_cost_snapshot_seeded_once(pool: PgPool) {
    let fixture = seed(&pool).await;
    let service = transitions(&pool);
    let input = |quantity| QuantityRequest {
        product_id: fixture.product_id,
        quantity,
        notes: None,
    };

    let first = service.crudo_input(fixture.user_id, input(10)).await.unwrap();
    assert_eq!(first.records[0].costs.unit_cost(), Decimal::new(450, 2));

    sqlx::query("UPDATE products SET cost_pasta = 9.00 WHERE id = $1")
        .bind(fixture.product_id)
        .execute(&pool)
        .await
        .unwrap();

    let second = service.crudo_input(fixture.user_id, input(5)).await.unwrap();
    assert_eq!(second.records[0].quantity, 15);
    assert_eq!(second.records[0].costs.unit_cost(), Decimal::new(450, 2));

    let summary = InventoryLedger::new(pool.clone()).summary().await.unwrap();
    let crudo = summary.iter().find(|s| s.stage == Stage::Crudo).unwrap();
    assert_eq!(crudo.total_value, Decimal::new(6750, 2));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_glazing_requires_known_color(pool: PgPool) {
    let fixture = seed(&pool).await;

    let err = transitions(&pool)
        .esmaltado_process(
            fixture.user_id,
            EsmaltadoProcessRequest {
                product_id: fixture.product_id,
                quantity: 1,
                esmalte_color_id: Uuid::new_v4(),
                notes: None,
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::NotFound(_)));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_zero_delta_adjustment(pool: PgPool) {
    let fixture = seed(&pool).await;
    let service = transitions(&pool);
    let count = |quantity| AdjustmentRequest {
        product_id: fixture.product_id,
        stage: "crudo".to_string(),
        esmalte_color_id: None,
        quantity,
        notes: None,
    };

    service.adjustment(fixture.user_id, count(5)).await.unwrap();
    let outcome = service.adjustment(fixture.user_id, count(5)).await.unwrap();

    assert_eq!(outcome.movement.movement_type, MovementType::Adjustment);
    assert_eq!(outcome.movement.quantity, 0);
    assert_eq!(outcome.records[0].quantity, 5);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_allocate_more_than_available(pool: PgPool) {
    let fixture = seed(&pool).await;
    let batch = stock_glazed(&pool, &fixture, 10).await;
    let line = add_line(&pool, &fixture, 40).await;

    let err = allocations(&pool)
        .allocate(
            fixture.user_id,
            AllocateRequest {
                pedido_id: fixture.pedido_id,
                pedido_item_id: line,
                inventory_id: batch,
                quantity: 15,
            },
        )
        .await
        .unwrap_err();

    match err {
        AppError::InsufficientStock(detail) => {
            assert_eq!(detail.product_name, "Taza 250ml");
            assert_eq!(detail.stage, Stage::Esmaltado);
            assert_eq!(detail.available, 10);
            assert_eq!(detail.requested, 15);
            assert_eq!(detail.missing, 5);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(reserved_of(&pool, batch).await, (10, 0));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_over_allocation_and_release(pool: PgPool) {
    let fixture = seed(&pool).await;
    let batch = stock_glazed(&pool, &fixture, 50).await;
    let line = add_line(&pool, &fixture, 20).await;
    let service = allocations(&pool);
    let request = |quantity| AllocateRequest {
        pedido_id: fixture.pedido_id,
        pedido_item_id: line,
        inventory_id: batch,
        quantity,
    };

    let allocation = service.allocate(fixture.user_id, request(20)).await.unwrap();
    let lines = service.availability_for(fixture.pedido_id).await.unwrap();
    assert_eq!(lines[0].still_needed, 0);
    assert_eq!(lines[0].batches[0].allocated_to_line, 20);

    let err = service.allocate(fixture.user_id, request(1)).await.unwrap_err();
    assert!(matches!(err, AppError::OverAllocation(_)));

    // Reserved units cannot be adjusted away
    let err = transitions(&pool)
        .adjustment(
            fixture.user_id,
            AdjustmentRequest {
                product_id: fixture.product_id,
                stage: "ESMALTADO".to_string(),
                esmalte_color_id: Some(fixture.red),
                quantity: 10,
                notes: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InsufficientStock(ref d) if d.missing == 10));

    service.deallocate(allocation.id).await.unwrap();
    assert_eq!(reserved_of(&pool, batch).await, (50, 0));

    let err = service.deallocate(allocation.id).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    assert_eq!(reserved_of(&pool, batch).await, (50, 0));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_concurrent_allocations_never_oversell(pool: PgPool) {
    let fixture = seed(&pool).await;
    let batch = stock_glazed(&pool, &fixture, 10).await;
    let first_line = add_line(&pool, &fixture, 6).await;
    let second_line = add_line(&pool, &fixture, 6).await;

    let first = allocations(&pool);
    let second = allocations(&pool);
    let (a, b) = tokio::join!(
        first.allocate(
            fixture.user_id,
            AllocateRequest {
                pedido_id: fixture.pedido_id,
                pedido_item_id: first_line,
                inventory_id: batch,
                quantity: 6,
            },
        ),
        second.allocate(
            fixture.user_id,
            AllocateRequest {
                pedido_id: fixture.pedido_id,
                pedido_item_id: second_line,
                inventory_id: batch,
                quantity: 6,
            },
        ),
    );

    assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
    let failure = if a.is_err() { a.unwrap_err() } else { b.unwrap_err() };
    assert!(matches!(
        failure,
        AppError::InsufficientStock(_) | AppError::ConcurrencyConflict
    ));
    assert_eq!(reserved_of(&pool, batch).await, (10, 6));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_merma_and_worksheet(pool: PgPool) {
    let fixture = seed(&pool).await;
    let batch = stock_glazed(&pool, &fixture, 12).await;
    let line = add_line(&pool, &fixture, 20).await;
    add_line(&pool, &fixture, 3).await;

    transitions(&pool)
        .merma(
            fixture.user_id,
            MermaRequest {
                product_id: fixture.product_id,
                stage: "ESMALTADO".to_string(),
                esmalte_color_id: Some(fixture.red),
                quantity: 2,
                notes: Some("rotas al desmoldar".to_string()),
            },
        )
        .await
        .unwrap();

    allocations(&pool)
        .allocate(
            fixture.user_id,
            AllocateRequest {
                pedido_id: fixture.pedido_id,
                pedido_item_id: line,
                inventory_id: batch,
                quantity: 10,
            },
        )
        .await
        .unwrap();

    let sheet = FulfillmentService::new(pool.clone())
        .worksheet(fixture.pedido_id)
        .await
        .unwrap();

    assert_eq!(sheet.totals.lines, 2);
    assert_eq!(sheet.totals.total_needed, 23);
    assert_eq!(sheet.totals.total_allocated, 10);
    // Line one still needs 10 and the batch has nothing left; line two needs 3
    assert_eq!(sheet.totals.total_shortfall, 13);

    let views = allocations(&pool)
        .list_allocations(fixture.pedido_id)
        .await
        .unwrap();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].color_name.as_deref(), Some("Rojo"));

    assert!(InventoryLedger::new(pool.clone()).verify().await.unwrap().is_empty());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_unknown_order_is_not_found(pool: PgPool) {
    let err = allocations(&pool)
        .availability_for(Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_fired_pieces_keep_raw_costs(pool: PgPool) {
    let fixture = seed(&pool).await;
    let service = transitions(&pool);

    service
        .crudo_input(
            fixture.user_id,
            QuantityRequest {
                product_id: fixture.product_id,
                quantity: 10,
                notes: None,
            },
        )
        .await
        .unwrap();

    sqlx::query("UPDATE products SET cost_pasta = 9.00 WHERE id = $1")
        .bind(fixture.product_id)
        .execute(&pool)
        .await
        .unwrap();

    let fired = service
        .sancochado_process(
            fixture.user_id,
            QuantityRequest {
                product_id: fixture.product_id,
                quantity: 4,
                notes: None,
            },
        )
        .await
        .unwrap();
    for record in &fired.records {
        assert_eq!(record.costs.unit_cost(), Decimal::new(450, 2), "{}", record.stage);
    }

    let glazed = service
        .esmaltado_process(
            fixture.user_id,
            EsmaltadoProcessRequest {
                product_id: fixture.product_id,
                quantity: 4,
                esmalte_color_id: fixture.red,
                notes: None,
            },
        )
        .await
        .unwrap();
    let esmaltado = glazed
        .records
        .iter()
        .find(|r| r.stage == Stage::Esmaltado)
        .unwrap();
    assert_eq!(esmaltado.costs.unit_cost(), Decimal::new(450, 2));

    let summary = InventoryLedger::new(pool.clone()).summary().await.unwrap();
    // 6 raw and 4 glazed pieces, all at the original 4.50
    let total: Decimal = summary.iter().map(|s| s.total_value).sum();
    assert_eq!(total, Decimal::new(4500, 2));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_allocate_for_unknown_order(pool: PgPool) {
    let fixture = seed(&pool).await;
    let batch = stock_glazed(&pool, &fixture, 10).await;
    let line = add_line(&pool, &fixture, 5).await;
    let service = allocations(&pool);

    let err = service
        .allocate(
            fixture.user_id,
            AllocateRequest {
                pedido_id: Uuid::new_v4(),
                pedido_item_id: line,
                inventory_id: batch,
                quantity: 1,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(ref r) if r == "Order"));

    // A line of another, existing order is still a bad request
    let other_order: Uuid =
        sqlx::query_scalar("INSERT INTO pedidos (customer_name) VALUES ('Casa Luna') RETURNING id")
            .fetch_one(&pool)
            .await
            .unwrap();
    let err = service
        .allocate(
            fixture.user_id,
            AllocateRequest {
                pedido_id: other_order,
                pedido_item_id: line,
                inventory_id: batch,
                quantity: 1,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation { ref field, .. } if field == "pedido_item_id"));
    assert_eq!(reserved_of(&pool, batch).await, (10, 0));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_get_or_create_is_idempotent(pool: PgPool) {
    let fixture = seed(&pool).await;
    let ledger = InventoryLedger::new(pool.clone());
    let key = shared::StockKey::new(fixture.product_id, Stage::Esmaltado, Some(fixture.red));

    let mut tx = pool.begin().await.unwrap();
    let first = ledger.get_or_create(&mut tx, key).await.unwrap();
    let second = ledger.get_or_create(&mut tx, key).await.unwrap();
    tx.commit().await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(first.level(), shared::StockLevel::new(0, 0));
    assert_eq!(first.seeded_costs(), None);
}
