//! Business logic services for the Ceramic Production Inventory

use std::time::Duration;

use sqlx::{PgPool, Postgres, Transaction};

use crate::config::DatabaseConfig;
use crate::error::AppResult;

pub mod allocation;
pub mod catalog;
pub mod fulfillment;
pub mod ledger;
pub mod retry;
pub mod transitions;

pub use allocation::AllocationService;
pub use fulfillment::FulfillmentService;
pub use ledger::InventoryLedger;
pub use transitions::StageTransitionService;

/// Timeouts applied to every write transaction
#[derive(Debug, Clone, Copy)]
pub struct LockTimeouts {
    pub lock: Duration,
    pub statement: Duration,
}

impl Default for LockTimeouts {
    fn default() -> Self {
        Self {
            lock: Duration::from_millis(5000),
            statement: Duration::from_millis(15000),
        }
    }
}

impl From<&DatabaseConfig> for LockTimeouts {
    fn from(config: &DatabaseConfig) -> Self {
        Self {
            lock: Duration::from_millis(config.lock_timeout_ms),
            statement: Duration::from_millis(config.statement_timeout_ms),
        }
    }
}

/// Open a write transaction with lock and statement timeouts scoped to it
pub async fn begin_write(
    db: &PgPool,
    timeouts: LockTimeouts,
) -> AppResult<Transaction<'static, Postgres>> {
    let mut tx = db.begin().await?;

    sqlx::query("SELECT set_config('lock_timeout', $1, true), set_config('statement_timeout', $2, true)")
        .bind(format!("{}ms", timeouts.lock.as_millis()))
        .bind(format!("{}ms", timeouts.statement.as_millis()))
        .execute(&mut *tx)
        .await?;

    Ok(tx)
}

/// Open a read-only transaction that sees one consistent snapshot
pub async fn begin_snapshot(db: &PgPool) -> AppResult<Transaction<'static, Postgres>> {
    let mut tx = db.begin().await?;

    sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
        .execute(&mut *tx)
        .await?;

    Ok(tx)
}
