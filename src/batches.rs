// src/batches.rs - FIFO batch allocation and expiry tracking
use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};

use crate::error::EngineResult;
use crate::models::{Batch, BatchStatus, BatchTake};

// ==================== FIFO CONSUMPTION ====================

/// Decrement batch remainders for an outgoing quantity, oldest receipt
/// first (creation order breaks ties). A batch that reaches zero flips to
/// `depleted` and never comes back.
///
/// If the active remainders in scope cover less than `quantity`, the
/// shortfall is left unfulfilled here: batches are a supplementary
/// traceability layer, and the authoritative availability check already
/// happened against the location row in the same transaction.
pub async fn consume(
    conn: &mut SqliteConnection,
    product_id: &str,
    warehouse: &str,
    zone: &str,
    quantity: i64,
) -> EngineResult<Vec<BatchTake>> {
    let candidates: Vec<Batch> = sqlx::query_as(
        r#"SELECT * FROM batches
           WHERE product_id = ? AND warehouse = ? AND zone = ?
             AND status = 'active' AND quantity_remaining > 0
           ORDER BY received_date ASC, created_at ASC"#,
    )
    .bind(product_id)
    .bind(warehouse)
    .bind(zone)
    .fetch_all(&mut *conn)
    .await?;

    let now = Utc::now();
    let mut takes = Vec::new();
    let mut needed = quantity;

    for batch in candidates {
        if needed == 0 {
            break;
        }
        let take = needed.min(batch.quantity_remaining);
        let remaining = batch.quantity_remaining - take;
        let status = if remaining == 0 {
            BatchStatus::Depleted
        } else {
            BatchStatus::Active
        };

        sqlx::query(
            r#"UPDATE batches
               SET quantity_remaining = ?, quantity_sold = quantity_sold + ?,
                   status = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(remaining)
        .bind(take)
        .bind(status)
        .bind(now)
        .bind(&batch.id)
        .execute(&mut *conn)
        .await?;

        takes.push(BatchTake {
            batch_id: batch.id,
            batch_number: batch.batch_number,
            amount: take,
        });
        needed -= take;
    }

    Ok(takes)
}

// ==================== EXPIRY QUERIES ====================

/// Active batches whose expiry date falls within the next `days` days.
/// Callers wanting the standard reporting window pass
/// `ExpiryStatus::SOON_DAYS`.
pub async fn expiring_batches(pool: &SqlitePool, days: i64) -> EngineResult<Vec<Batch>> {
    let threshold = Utc::now() + chrono::Duration::days(days);

    let batches: Vec<Batch> = sqlx::query_as(
        r#"SELECT * FROM batches
           WHERE expiry_date IS NOT NULL AND expiry_date <= ? AND status = 'active'
           ORDER BY expiry_date ASC"#,
    )
    .bind(threshold)
    .fetch_all(pool)
    .await?;

    Ok(batches)
}

/// All batches for one (product, warehouse, zone) scope, oldest first.
pub async fn batches_for_location(
    pool: &SqlitePool,
    product_id: &str,
    warehouse: &str,
    zone: &str,
) -> EngineResult<Vec<Batch>> {
    let batches: Vec<Batch> = sqlx::query_as(
        r#"SELECT * FROM batches
           WHERE product_id = ? AND warehouse = ? AND zone = ?
           ORDER BY received_date ASC, created_at ASC"#,
    )
    .bind(product_id)
    .bind(warehouse)
    .bind(zone)
    .fetch_all(pool)
    .await?;

    Ok(batches)
}
