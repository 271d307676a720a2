//! In-memory ledger driven by the shared stock rules
//!
//! Mirrors what the services persist so invariants can be checked over long
//! random operation sequences without a database.

#![allow(dead_code)]

use std::collections::HashMap;

use chrono::Utc;
use shared::{
    check_allocation, find_discrepancies, release, CostSnapshot, InventoryMovement,
    InventoryRecord, LineBalance, NewMovement, Stage, StockError, StockKey, StockLevel, Transition,
};
use uuid::Uuid;

pub const PRODUCT_NAME: &str = "Taza 250ml";

pub fn product() -> Uuid {
    Uuid::from_u128(0xC0FFEE)
}

pub fn red() -> Uuid {
    Uuid::from_u128(0xED)
}

pub fn blue() -> Uuid {
    Uuid::from_u128(0xB1)
}

pub fn key(stage: Stage, color: Option<Uuid>) -> StockKey {
    StockKey::new(product(), stage, color)
}

pub fn empty_record(key: StockKey) -> InventoryRecord {
    let now = Utc::now();
    InventoryRecord {
        id: Uuid::new_v4(),
        product_id: key.product_id,
        stage: key.stage,
        esmalte_color_id: key.esmalte_color_id,
        quantity: 0,
        reserved: 0,
        costs: CostSnapshot::default(),
        cost_seeded_at: None,
        created_at: now,
        updated_at: now,
    }
}

pub fn logged(movement: &NewMovement) -> InventoryMovement {
    InventoryMovement {
        id: Uuid::new_v4(),
        movement_type: movement.movement_type,
        product_id: movement.product_id,
        from_stage: movement.from.map(|k| k.stage),
        from_color: movement.from.and_then(|k| k.esmalte_color_id),
        to_stage: movement.to.map(|k| k.stage),
        to_color: movement.to.and_then(|k| k.esmalte_color_id),
        quantity: movement.quantity,
        notes: None,
        created_by: Uuid::nil(),
        created_at: Utc::now(),
    }
}

#[derive(Debug, Clone)]
pub struct SimAllocation {
    pub pedido_item_id: Uuid,
    pub key: StockKey,
    pub quantity: i32,
}

#[derive(Debug, Default)]
pub struct SimLedger {
    pub records: HashMap<StockKey, InventoryRecord>,
    pub movements: Vec<InventoryMovement>,
    pub allocations: Vec<SimAllocation>,
    /// quantity needed per line item
    pub lines: HashMap<Uuid, i32>,
}

impl SimLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(&self, key: &StockKey) -> StockLevel {
        self.records.get(key).map(InventoryRecord::level).unwrap_or_default()
    }

    /// Run a transition the way the service does: plan against current levels, then commit
    pub fn apply(&mut self, transition: Transition) -> Result<(), StockError> {
        let level_of =
            |key: Option<StockKey>| key.and_then(|k| self.records.get(&k)).map(InventoryRecord::level);
        let plan = transition.plan(
            level_of(transition.source_key()),
            level_of(transition.destination_key()),
            PRODUCT_NAME,
        )?;

        for (key, after) in plan.source.into_iter().chain(plan.destination) {
            let record = self.records.entry(key).or_insert_with(|| empty_record(key));
            record.quantity = after.quantity;
            record.reserved = after.reserved;
        }
        self.movements.push(logged(&plan.movement));
        Ok(())
    }

    pub fn add_line(&mut self, needed: i32) -> Uuid {
        let id = Uuid::new_v4();
        self.lines.insert(id, needed);
        id
    }

    pub fn allocated_to(&self, pedido_item_id: Uuid) -> i32 {
        self.allocations
            .iter()
            .filter(|a| a.pedido_item_id == pedido_item_id)
            .map(|a| a.quantity)
            .sum()
    }

    pub fn allocate(&mut self, pedido_item_id: Uuid, key: StockKey, quantity: i32) -> Result<(), StockError> {
        let needed = self.lines.get(&pedido_item_id).copied().unwrap_or(0);
        let balance = LineBalance::new(needed, self.allocated_to(pedido_item_id));
        check_allocation(quantity, balance, self.level(&key), PRODUCT_NAME)?;

        let record = self
            .records
            .get_mut(&key)
            .expect("a passing allocation check implies the record exists");
        record.reserved += quantity;
        self.allocations.push(SimAllocation {
            pedido_item_id,
            key,
            quantity,
        });
        Ok(())
    }

    pub fn deallocate(&mut self, index: usize) -> bool {
        if index >= self.allocations.len() {
            return false;
        }
        let allocation = self.allocations.remove(index);
        if let Some(record) = self.records.get_mut(&allocation.key) {
            let level = release(record.level(), allocation.quantity);
            record.reserved = level.reserved;
        }
        true
    }

    /// Panics on the first broken invariant
    pub fn assert_invariants(&self) {
        for record in self.records.values() {
            assert!(
                record.available() >= 0,
                "negative availability on {:?}",
                record.key()
            );
            assert!(record.reserved >= 0);

            let reserved: i32 = self
                .allocations
                .iter()
                .filter(|a| a.key == record.key())
                .map(|a| a.quantity)
                .sum();
            assert_eq!(record.reserved, reserved, "reservations out of sync");
        }

        for (line, needed) in &self.lines {
            assert!(self.allocated_to(*line) <= *needed, "line over-allocated");
        }

        let records: Vec<InventoryRecord> = self.records.values().cloned().collect();
        assert!(
            find_discrepancies(&records, &self.movements).is_empty(),
            "counters disagree with the movement log"
        );
    }
}
