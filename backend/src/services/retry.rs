//! Single automatic retry for transactions that lost a lock race

use std::future::Future;

use crate::error::{AppError, AppResult};

/// Run `attempt`, and run it once more if it failed with a concurrency conflict
///
/// Every attempt must open its own transaction: the failed one has already
/// been rolled back when its handle was dropped.
pub async fn retry_on_conflict<T, F, Fut>(operation: &'static str, mut attempt: F) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    match attempt().await {
        Err(AppError::ConcurrencyConflict) => {
            tracing::warn!(operation, "Concurrency conflict, retrying once");
            attempt().await
        }
        other => other,
    }
}
