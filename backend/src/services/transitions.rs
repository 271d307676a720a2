//! Stage transitions: production input, firing, glazing, losses and stock counts

use serde::{Deserialize, Serialize};
use shared::{
    normalize_notes, parse_stage, validate_notes, InventoryMovement, InventoryRecord, StockKey,
    Transition,
};
use sqlx::PgPool;
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::services::catalog::{self, ProductInfo};
use crate::services::ledger::InventoryLedger;
use crate::services::retry::retry_on_conflict;
use crate::services::{begin_write, LockTimeouts};

/// Stage transition service
#[derive(Clone)]
pub struct StageTransitionService {
    db: PgPool,
    ledger: InventoryLedger,
    timeouts: LockTimeouts,
}

/// Body of `crudo-input` and `sancochado-process`
#[derive(Debug, Deserialize, Validate)]
pub struct QuantityRequest {
    pub product_id: Uuid,
    #[validate(range(min = 1, message = "Quantity must be positive"))]
    pub quantity: i32,
    pub notes: Option<String>,
}

/// Body of `esmaltado-process`
#[derive(Debug, Deserialize, Validate)]
pub struct EsmaltadoProcessRequest {
    pub product_id: Uuid,
    #[validate(range(min = 1, message = "Quantity must be positive"))]
    pub quantity: i32,
    pub esmalte_color_id: Uuid,
    pub notes: Option<String>,
}

/// Body of `merma`: units lost at a stage
#[derive(Debug, Deserialize, Validate)]
pub struct MermaRequest {
    pub product_id: Uuid,
    pub stage: String,
    pub esmalte_color_id: Option<Uuid>,
    #[validate(range(min = 1, message = "Quantity must be positive"))]
    pub quantity: i32,
    pub notes: Option<String>,
}

/// Body of `adjustment`: `quantity` is the counted total, not a delta
#[derive(Debug, Deserialize, Validate)]
pub struct AdjustmentRequest {
    pub product_id: Uuid,
    pub stage: String,
    pub esmalte_color_id: Option<Uuid>,
    #[validate(range(min = 0, message = "Target quantity cannot be negative"))]
    pub quantity: i32,
    pub notes: Option<String>,
}

/// Result of one transition: the appended movement and every record it touched
#[derive(Debug, Clone, Serialize)]
pub struct TransitionOutcome {
    pub movement: InventoryMovement,
    pub records: Vec<InventoryRecord>,
}

impl StageTransitionService {
    pub fn new(db: PgPool, timeouts: LockTimeouts) -> Self {
        Self {
            ledger: InventoryLedger::new(db.clone()),
            db,
            timeouts,
        }
    }

    /// Register freshly formed pieces at CRUDO
    pub async fn crudo_input(
        &self,
        user_id: Uuid,
        request: QuantityRequest,
    ) -> AppResult<TransitionOutcome> {
        request.validate()?;
        let transition = Transition::CrudoInput {
            product_id: request.product_id,
            quantity: request.quantity,
        };
        self.execute(user_id, transition, request.notes).await
    }

    /// Move bisque-fired pieces from CRUDO to SANCOCHADO
    pub async fn sancochado_process(
        &self,
        user_id: Uuid,
        request: QuantityRequest,
    ) -> AppResult<TransitionOutcome> {
        request.validate()?;
        let transition = Transition::SancochadoProcess {
            product_id: request.product_id,
            quantity: request.quantity,
        };
        self.execute(user_id, transition, request.notes).await
    }

    /// Glaze SANCOCHADO pieces into ESMALTADO of one color
    pub async fn esmaltado_process(
        &self,
        user_id: Uuid,
        request: EsmaltadoProcessRequest,
    ) -> AppResult<TransitionOutcome> {
        request.validate()?;
        let transition = Transition::EsmaltadoProcess {
            product_id: request.product_id,
            quantity: request.quantity,
            esmalte_color_id: request.esmalte_color_id,
        };
        self.execute(user_id, transition, request.notes).await
    }

    /// Write off broken or defective pieces at any stage
    pub async fn merma(&self, user_id: Uuid, request: MermaRequest) -> AppResult<TransitionOutcome> {
        request.validate()?;
        let transition = Transition::Merma {
            product_id: request.product_id,
            stage: parse_stage(&request.stage).map_err(|m| AppError::validation("stage", m))?,
            esmalte_color_id: request.esmalte_color_id,
            quantity: request.quantity,
        };
        self.execute(user_id, transition, request.notes).await
    }

    /// Set a record to a physically counted total
    pub async fn adjustment(
        &self,
        user_id: Uuid,
        request: AdjustmentRequest,
    ) -> AppResult<TransitionOutcome> {
        request.validate()?;
        let transition = Transition::Adjustment {
            product_id: request.product_id,
            stage: parse_stage(&request.stage).map_err(|m| AppError::validation("stage", m))?,
            esmalte_color_id: request.esmalte_color_id,
            target_quantity: request.quantity,
        };
        self.execute(user_id, transition, request.notes).await
    }

    async fn execute(
        &self,
        user_id: Uuid,
        transition: Transition,
        notes: Option<String>,
    ) -> AppResult<TransitionOutcome> {
        transition.validate()?;
        validate_notes(notes.as_deref()).map_err(|m| AppError::validation("notes", m))?;
        let notes = normalize_notes(notes);

        // Catalog reads stay outside the write transaction
        let product = {
            let mut conn = self.db.acquire().await?;
            let product = catalog::product(&mut conn, transition.product_id()).await?;
            let colors = [transition.source_key(), transition.destination_key()]
                .into_iter()
                .flatten()
                .filter_map(|key| key.esmalte_color_id);
            for color in colors {
                catalog::ensure_color(&mut conn, color).await?;
            }
            product
        };

        let product = &product;
        let notes = notes.as_deref();
        retry_on_conflict(transition.movement_type().as_str(), move || {
            self.execute_once(user_id, transition, product, notes)
        })
        .await
    }

    async fn execute_once(
        &self,
        user_id: Uuid,
        transition: Transition,
        product: &ProductInfo,
        notes: Option<&str>,
    ) -> AppResult<TransitionOutcome> {
        let mut tx = begin_write(&self.db, self.timeouts).await?;

        let keys: Vec<StockKey> = [transition.source_key(), transition.destination_key()]
            .into_iter()
            .flatten()
            .collect();
        let locked = self.ledger.lock_many(&mut tx, &keys).await?;

        let level_of = |key: Option<StockKey>| {
            key.and_then(|k| locked.get(&k))
                .map(InventoryRecord::level)
        };
        let plan = transition.plan(
            level_of(transition.source_key()),
            level_of(transition.destination_key()),
            &product.name,
        )?;

        // Fired and glazed pieces keep the costs of the pieces they came from
        let costs = transition
            .source_key()
            .and_then(|key| locked.get(&key))
            .and_then(InventoryRecord::seeded_costs)
            .unwrap_or(product.costs);

        let mut records = Vec::with_capacity(keys.len());
        for (key, after) in plan.source.iter().chain(plan.destination.iter()) {
            let record = locked
                .get(key)
                .ok_or_else(|| AppError::Internal("transition touched an unlocked record".to_string()))?;
            let delta = after.quantity - record.quantity;
            let updated = self
                .ledger
                .apply_delta(&mut tx, record, delta, Some(&costs), &product.name)
                .await?;
            records.push(updated);
        }

        let movement = self
            .ledger
            .record_movement(&mut tx, &plan.movement, notes, user_id)
            .await?;

        tx.commit().await?;

        tracing::info!(
            movement_id = %movement.id,
            movement_type = movement.movement_type.as_str(),
            product_id = %movement.product_id,
            quantity = movement.quantity,
            user_id = %user_id,
            "Recorded inventory movement"
        );

        Ok(TransitionOutcome { movement, records })
    }
}
