//! Staged production inventory models

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Production stage of a ceramic piece
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    /// Raw, unfired clay
    Crudo,
    /// Bisque-fired
    Sancochado,
    /// Glazed and finished
    Esmaltado,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Crudo, Stage::Sancochado, Stage::Esmaltado];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Crudo => "CRUDO",
            Stage::Sancochado => "SANCOCHADO",
            Stage::Esmaltado => "ESMALTADO",
        }
    }

    /// Listing priority: finished goods first
    pub fn display_priority(&self) -> u8 {
        match self {
            Stage::Esmaltado => 0,
            Stage::Sancochado => 1,
            Stage::Crudo => 2,
        }
    }

    /// Whether records at this stage are split by glaze color
    pub fn carries_color(&self) -> bool {
        matches!(self, Stage::Esmaltado)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown stage or movement type
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl FromStr for Stage {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CRUDO" => Ok(Stage::Crudo),
            "SANCOCHADO" => Ok(Stage::Sancochado),
            "ESMALTADO" => Ok(Stage::Esmaltado),
            other => Err(UnknownVariant {
                kind: "stage",
                value: other.to_string(),
            }),
        }
    }
}

/// Kind of ledger movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementType {
    CrudoInput,
    SancochadoProcess,
    EsmaltadoProcess,
    Adjustment,
    Merma,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::CrudoInput => "CRUDO_INPUT",
            MovementType::SancochadoProcess => "SANCOCHADO_PROCESS",
            MovementType::EsmaltadoProcess => "ESMALTADO_PROCESS",
            MovementType::Adjustment => "ADJUSTMENT",
            MovementType::Merma => "MERMA",
        }
    }
}

impl FromStr for MovementType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CRUDO_INPUT" => Ok(MovementType::CrudoInput),
            "SANCOCHADO_PROCESS" => Ok(MovementType::SancochadoProcess),
            "ESMALTADO_PROCESS" => Ok(MovementType::EsmaltadoProcess),
            "ADJUSTMENT" => Ok(MovementType::Adjustment),
            "MERMA" => Ok(MovementType::Merma),
            other => Err(UnknownVariant {
                kind: "movement type",
                value: other.to_string(),
            }),
        }
    }
}

/// Identity of an inventory record: one per (product, stage, color)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StockKey {
    pub product_id: Uuid,
    pub stage: Stage,
    pub esmalte_color_id: Option<Uuid>,
}

impl StockKey {
    pub fn new(product_id: Uuid, stage: Stage, esmalte_color_id: Option<Uuid>) -> Self {
        Self {
            product_id,
            stage,
            esmalte_color_id,
        }
    }
}

/// Per-unit cost components copied from the product catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CostSnapshot {
    pub cost_pasta: Decimal,
    pub cost_labor: Decimal,
    pub cost_glaze: Decimal,
    pub cost_firing: Decimal,
}

impl CostSnapshot {
    pub fn unit_cost(&self) -> Decimal {
        self.cost_pasta + self.cost_labor + self.cost_glaze + self.cost_firing
    }
}

/// Quantity and reservation counters of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StockLevel {
    pub quantity: i32,
    pub reserved: i32,
}

impl StockLevel {
    pub fn new(quantity: i32, reserved: i32) -> Self {
        Self { quantity, reserved }
    }

    /// Units neither shipped nor promised to an order
    pub fn available(&self) -> i32 {
        self.quantity - self.reserved
    }
}

/// Stock counter for one (product, stage, color)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(into = "InventoryRecordWire")]
pub struct InventoryRecord {
    pub id: Uuid,
    pub product_id: Uuid,
    pub stage: Stage,
    pub esmalte_color_id: Option<Uuid>,
    pub quantity: i32,
    pub reserved: i32,
    pub costs: CostSnapshot,
    /// Set once, when the first positive delta seeds `costs`
    pub cost_seeded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InventoryRecord {
    pub fn key(&self) -> StockKey {
        StockKey::new(self.product_id, self.stage, self.esmalte_color_id)
    }

    pub fn level(&self) -> StockLevel {
        StockLevel::new(self.quantity, self.reserved)
    }

    pub fn available(&self) -> i32 {
        self.level().available()
    }

    /// The cost snapshot, once one has been taken
    pub fn seeded_costs(&self) -> Option<CostSnapshot> {
        self.cost_seeded_at.map(|_| self.costs)
    }

    /// Stock value at the snapshot cost
    pub fn value(&self) -> Decimal {
        self.costs.unit_cost() * Decimal::from(self.quantity)
    }
}

/// Wire shape of a record, with `available` materialized for clients
#[derive(Debug, Serialize)]
struct InventoryRecordWire {
    id: Uuid,
    product_id: Uuid,
    stage: Stage,
    esmalte_color_id: Option<Uuid>,
    quantity: i32,
    reserved: i32,
    available: i32,
    #[serde(flatten)]
    costs: CostSnapshot,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<InventoryRecord> for InventoryRecordWire {
    fn from(record: InventoryRecord) -> Self {
        Self {
            available: record.available(),
            id: record.id,
            product_id: record.product_id,
            stage: record.stage,
            esmalte_color_id: record.esmalte_color_id,
            quantity: record.quantity,
            reserved: record.reserved,
            costs: record.costs,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// An immutable entry of the movement log
///
/// `quantity` is carried along the arrow: the `to` record gains it and the
/// `from` record loses it. Input and process rows only ever hold positive
/// values, a loss (`MERMA`) has no `to` side, and an adjustment has no `from`
/// side and holds the signed delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryMovement {
    pub id: Uuid,
    pub movement_type: MovementType,
    pub product_id: Uuid,
    pub from_stage: Option<Stage>,
    pub from_color: Option<Uuid>,
    pub to_stage: Option<Stage>,
    pub to_color: Option<Uuid>,
    pub quantity: i32,
    pub notes: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

impl InventoryMovement {
    pub fn from_key(&self) -> Option<StockKey> {
        self.from_stage
            .map(|stage| StockKey::new(self.product_id, stage, self.from_color))
    }

    pub fn to_key(&self) -> Option<StockKey> {
        self.to_stage
            .map(|stage| StockKey::new(self.product_id, stage, self.to_color))
    }

    /// Signed change this movement made to the record identified by `key`
    pub fn effect_on(&self, key: &StockKey) -> i64 {
        let mut effect = 0i64;
        if self.to_key().as_ref() == Some(key) {
            effect += i64::from(self.quantity);
        }
        if self.from_key().as_ref() == Some(key) {
            effect -= i64::from(self.quantity);
        }
        effect
    }
}

/// A movement about to be appended to the log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMovement {
    pub movement_type: MovementType,
    pub product_id: Uuid,
    pub from: Option<StockKey>,
    pub to: Option<StockKey>,
    pub quantity: i32,
}

/// Inventory totals for one stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSummary {
    pub stage: Stage,
    pub record_count: i64,
    pub total_quantity: i64,
    pub total_reserved: i64,
    pub total_available: i64,
    pub total_value: Decimal,
}

/// A record whose counter disagrees with its replayed movement history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerDiscrepancy {
    /// `None` when movements reference a tuple with no record at all
    pub inventory_id: Option<Uuid>,
    pub product_id: Uuid,
    pub stage: Stage,
    pub esmalte_color_id: Option<Uuid>,
    pub recorded_quantity: i64,
    pub replayed_quantity: i64,
    pub difference: i64,
}
