// src/ledger.rs - Atomic receive/sell/transfer mutations over the stock ledger
use chrono::Utc;
use log::info;
use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;
use validator::Validate;

use crate::activity::record_activity;
use crate::actor::Actor;
use crate::batches;
use crate::error::{EngineError, EngineResult};
use crate::models::*;
use crate::validator::{validate_positive_quantity, validate_warehouse_code, validate_zone_code};

// ==================== OUTCOME STRUCTURES ====================

#[derive(Debug, Serialize)]
pub struct ReceiveOutcome {
    pub product_id: String,
    pub quantity_on_hand: i64,
    pub location_quantity: Option<i64>,
    pub batch: Option<Batch>,
}

#[derive(Debug, Serialize)]
pub struct SellOutcome {
    pub product_id: String,
    pub quantity_on_hand: i64,
    pub location_quantity: Option<i64>,
    pub batches_consumed: Vec<BatchTake>,
}

#[derive(Debug, Serialize)]
pub struct TransferOutcome {
    pub product_id: String,
    pub from_quantity: i64,
    pub to_quantity: i64,
}

// ==================== LOCATION SCOPE ====================

/// An operation is either aggregate-only (no location parts) or scoped to a
/// full warehouse/zone pair; anything in between is a caller error.
fn location_scope(
    warehouse: &Option<String>,
    zone: &Option<String>,
) -> EngineResult<Option<Locator>> {
    match (warehouse, zone) {
        (Some(w), Some(z)) => {
            validate_warehouse_code(w)?;
            validate_zone_code(z)?;
            Ok(Some(Locator::new(w.clone(), z.clone())))
        }
        (None, Some(_)) => Err(EngineError::zone_without_warehouse()),
        (Some(_), None) => Err(EngineError::incomplete_location()),
        (None, None) => Ok(None),
    }
}

// ==================== PRODUCTS ====================

pub async fn create_product(
    pool: &SqlitePool,
    actor: &Actor,
    req: &CreateProductRequest,
) -> EngineResult<Product> {
    req.validate()?;

    let now = Utc::now();
    let id = Uuid::new_v4().to_string();
    let mut tx = pool.begin().await?;

    let existing: Option<String> = sqlx::query_scalar("SELECT id FROM products WHERE sku = ?")
        .bind(&req.sku)
        .fetch_optional(&mut *tx)
        .await?;
    if existing.is_some() {
        return Err(EngineError::validation(format!(
            "Product with SKU '{}' already exists",
            req.sku
        )));
    }

    sqlx::query(
        r#"INSERT INTO products (id, sku, name, quantity, unit_price, created_at, updated_at)
           VALUES (?, ?, ?, 0, ?, ?, ?)"#,
    )
    .bind(&id)
    .bind(&req.sku)
    .bind(&req.name)
    .bind(req.unit_price)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    record_activity(
        &mut tx,
        &actor.id,
        "product.created",
        "product",
        &id,
        Some(&serde_json::json!({ "sku": req.sku, "name": req.name })),
    )
    .await?;

    let product: Product = sqlx::query_as("SELECT * FROM products WHERE id = ?")
        .bind(&id)
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;

    info!("User {} created product {} ({})", actor.id, id, req.sku);
    Ok(product)
}

pub async fn product_stock(pool: &SqlitePool, product_id: &str) -> EngineResult<Product> {
    let product: Product = sqlx::query_as("SELECT * FROM products WHERE id = ?")
        .bind(product_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| EngineError::product_not_found(product_id))?;
    Ok(product)
}

pub async fn location_levels(
    pool: &SqlitePool,
    product_id: &str,
) -> EngineResult<Vec<LocationStock>> {
    let rows: Vec<LocationStock> = sqlx::query_as(
        "SELECT * FROM location_stock WHERE product_id = ? ORDER BY warehouse, zone",
    )
    .bind(product_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

// ==================== RECEIVE ====================

pub async fn receive_stock(
    pool: &SqlitePool,
    actor: &Actor,
    req: &ReceiveStockRequest,
) -> EngineResult<ReceiveOutcome> {
    req.validate()?;
    validate_positive_quantity(req.quantity)?;
    let scope = location_scope(&req.warehouse, &req.zone)?;
    if req.batch.is_some() && scope.is_none() {
        return Err(EngineError::batch_requires_location());
    }

    let now = Utc::now();
    let mut tx = pool.begin().await?;

    let product: Product = sqlx::query_as("SELECT * FROM products WHERE id = ?")
        .bind(&req.product_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| EngineError::product_not_found(&req.product_id))?;

    sqlx::query("UPDATE products SET quantity = quantity + ?, updated_at = ? WHERE id = ?")
        .bind(req.quantity)
        .bind(now)
        .bind(&product.id)
        .execute(&mut *tx)
        .await?;

    let mut location_quantity = None;
    if let Some(loc) = &scope {
        let existing: Option<LocationStock> = sqlx::query_as(
            "SELECT * FROM location_stock WHERE product_id = ? AND warehouse = ? AND zone = ?",
        )
        .bind(&product.id)
        .bind(&loc.warehouse)
        .bind(&loc.zone)
        .fetch_optional(&mut *tx)
        .await?;

        let quantity = match existing {
            Some(row) => {
                sqlx::query(
                    r#"UPDATE location_stock
                       SET quantity = quantity + ?, bin = COALESCE(?, bin), updated_at = ?
                       WHERE id = ?"#,
                )
                .bind(req.quantity)
                .bind(&req.bin)
                .bind(now)
                .bind(&row.id)
                .execute(&mut *tx)
                .await?;
                row.quantity + req.quantity
            }
            None => {
                sqlx::query(
                    r#"INSERT INTO location_stock
                       (id, product_id, warehouse, zone, quantity, reserved_quantity, bin, created_at, updated_at)
                       VALUES (?, ?, ?, ?, ?, 0, ?, ?, ?)"#,
                )
                .bind(Uuid::new_v4().to_string())
                .bind(&product.id)
                .bind(&loc.warehouse)
                .bind(&loc.zone)
                .bind(req.quantity)
                .bind(&req.bin)
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await?;
                req.quantity
            }
        };
        location_quantity = Some(quantity);
    }

    let mut batch_row = None;
    if let (Some(receipt), Some(loc)) = (&req.batch, &scope) {
        let duplicate: Option<String> = sqlx::query_scalar(
            r#"SELECT id FROM batches
               WHERE product_id = ? AND warehouse = ? AND zone = ? AND batch_number = ?"#,
        )
        .bind(&product.id)
        .bind(&loc.warehouse)
        .bind(&loc.zone)
        .bind(&receipt.batch_number)
        .fetch_optional(&mut *tx)
        .await?;
        if duplicate.is_some() {
            return Err(EngineError::batch_already_exists(&receipt.batch_number));
        }

        let batch_id = Uuid::new_v4().to_string();
        let received_date = receipt.received_date.unwrap_or(now);
        sqlx::query(
            r#"INSERT INTO batches
               (id, product_id, warehouse, zone, batch_number, quantity_received,
                quantity_remaining, quantity_sold, received_date, expiry_date, status,
                created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?, 'active', ?, ?)"#,
        )
        .bind(&batch_id)
        .bind(&product.id)
        .bind(&loc.warehouse)
        .bind(&loc.zone)
        .bind(&receipt.batch_number)
        .bind(req.quantity)
        .bind(req.quantity)
        .bind(received_date)
        .bind(receipt.expiry_date)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let batch: Batch = sqlx::query_as("SELECT * FROM batches WHERE id = ?")
            .bind(&batch_id)
            .fetch_one(&mut *tx)
            .await?;
        batch_row = Some(batch);
    }

    record_activity(
        &mut tx,
        &actor.id,
        "stock.received",
        "product",
        &product.id,
        Some(&serde_json::json!({
            "quantity": req.quantity,
            "warehouse": req.warehouse,
            "zone": req.zone,
            "batch_number": req.batch.as_ref().map(|b| b.batch_number.clone()),
        })),
    )
    .await?;

    let quantity_on_hand: i64 = sqlx::query_scalar("SELECT quantity FROM products WHERE id = ?")
        .bind(&product.id)
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;

    info!(
        "User {} received {} x product {} into {:?}",
        actor.id, req.quantity, product.id, scope
    );
    Ok(ReceiveOutcome {
        product_id: product.id,
        quantity_on_hand,
        location_quantity,
        batch: batch_row,
    })
}

// ==================== SELL ====================

pub async fn sell_stock(
    pool: &SqlitePool,
    actor: &Actor,
    req: &SellStockRequest,
) -> EngineResult<SellOutcome> {
    req.validate()?;
    validate_positive_quantity(req.quantity)?;
    let scope = location_scope(&req.warehouse, &req.zone)?;

    let now = Utc::now();
    let mut tx = pool.begin().await?;

    let product: Product = sqlx::query_as("SELECT * FROM products WHERE id = ?")
        .bind(&req.product_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| EngineError::product_not_found(&req.product_id))?;

    let mut location_quantity = None;
    let mut batches_consumed = Vec::new();

    if let Some(loc) = &scope {
        let row: LocationStock = sqlx::query_as(
            "SELECT * FROM location_stock WHERE product_id = ? AND warehouse = ? AND zone = ?",
        )
        .bind(&product.id)
        .bind(&loc.warehouse)
        .bind(&loc.zone)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| EngineError::insufficient_stock(0, req.quantity))?;

        // Check and decrement in one guarded statement so a concurrent sell
        // cannot slip between them.
        let result = sqlx::query(
            r#"UPDATE location_stock SET quantity = quantity - ?, updated_at = ?
               WHERE id = ? AND quantity - reserved_quantity >= ?"#,
        )
        .bind(req.quantity)
        .bind(now)
        .bind(&row.id)
        .bind(req.quantity)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            let available: i64 = sqlx::query_scalar(
                "SELECT quantity - reserved_quantity FROM location_stock WHERE id = ?",
            )
            .bind(&row.id)
            .fetch_one(&mut *tx)
            .await?;
            return Err(EngineError::insufficient_stock(available.max(0), req.quantity));
        }
        location_quantity = Some(row.quantity - req.quantity);

        batches_consumed =
            batches::consume(&mut tx, &product.id, &loc.warehouse, &loc.zone, req.quantity).await?;
    }

    let result = sqlx::query(
        "UPDATE products SET quantity = quantity - ?, updated_at = ? WHERE id = ? AND quantity >= ?",
    )
    .bind(req.quantity)
    .bind(now)
    .bind(&product.id)
    .bind(req.quantity)
    .execute(&mut *tx)
    .await?;
    if result.rows_affected() == 0 {
        let available: i64 = sqlx::query_scalar("SELECT quantity FROM products WHERE id = ?")
            .bind(&product.id)
            .fetch_one(&mut *tx)
            .await?;
        return Err(EngineError::insufficient_stock(available, req.quantity));
    }

    record_activity(
        &mut tx,
        &actor.id,
        "stock.sold",
        "product",
        &product.id,
        Some(&serde_json::json!({
            "quantity": req.quantity,
            "warehouse": req.warehouse,
            "zone": req.zone,
            "batches_touched": batches_consumed.len(),
        })),
    )
    .await?;

    let quantity_on_hand: i64 = sqlx::query_scalar("SELECT quantity FROM products WHERE id = ?")
        .bind(&product.id)
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;

    info!(
        "User {} sold {} x product {} from {:?}",
        actor.id, req.quantity, product.id, scope
    );
    Ok(SellOutcome {
        product_id: product.id,
        quantity_on_hand,
        location_quantity,
        batches_consumed,
    })
}

// ==================== TRANSFER ====================

pub async fn transfer_stock(
    pool: &SqlitePool,
    actor: &Actor,
    req: &TransferStockRequest,
) -> EngineResult<TransferOutcome> {
    req.validate()?;
    validate_positive_quantity(req.quantity)?;
    validate_warehouse_code(&req.from.warehouse)?;
    validate_zone_code(&req.from.zone)?;
    validate_warehouse_code(&req.to.warehouse)?;
    validate_zone_code(&req.to.zone)?;
    if req.from == req.to {
        return Err(EngineError::validation(
            "Source and destination locations must differ",
        ));
    }

    let now = Utc::now();
    let mut tx = pool.begin().await?;

    let product: Product = sqlx::query_as("SELECT * FROM products WHERE id = ?")
        .bind(&req.product_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| EngineError::product_not_found(&req.product_id))?;

    let source: LocationStock = sqlx::query_as(
        "SELECT * FROM location_stock WHERE product_id = ? AND warehouse = ? AND zone = ?",
    )
    .bind(&product.id)
    .bind(&req.from.warehouse)
    .bind(&req.from.zone)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| EngineError::insufficient_stock(0, req.quantity))?;

    let result = sqlx::query(
        r#"UPDATE location_stock SET quantity = quantity - ?, updated_at = ?
           WHERE id = ? AND quantity - reserved_quantity >= ?"#,
    )
    .bind(req.quantity)
    .bind(now)
    .bind(&source.id)
    .bind(req.quantity)
    .execute(&mut *tx)
    .await?;
    if result.rows_affected() == 0 {
        let available: i64 = sqlx::query_scalar(
            "SELECT quantity - reserved_quantity FROM location_stock WHERE id = ?",
        )
        .bind(&source.id)
        .fetch_one(&mut *tx)
        .await?;
        return Err(EngineError::insufficient_stock(available.max(0), req.quantity));
    }

    let destination: Option<LocationStock> = sqlx::query_as(
        "SELECT * FROM location_stock WHERE product_id = ? AND warehouse = ? AND zone = ?",
    )
    .bind(&product.id)
    .bind(&req.to.warehouse)
    .bind(&req.to.zone)
    .fetch_optional(&mut *tx)
    .await?;

    let to_quantity = match destination {
        Some(row) => {
            sqlx::query("UPDATE location_stock SET quantity = quantity + ?, updated_at = ? WHERE id = ?")
                .bind(req.quantity)
                .bind(now)
                .bind(&row.id)
                .execute(&mut *tx)
                .await?;
            row.quantity + req.quantity
        }
        None => {
            sqlx::query(
                r#"INSERT INTO location_stock
                   (id, product_id, warehouse, zone, quantity, reserved_quantity, created_at, updated_at)
                   VALUES (?, ?, ?, ?, ?, 0, ?, ?)"#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&product.id)
            .bind(&req.to.warehouse)
            .bind(&req.to.zone)
            .bind(req.quantity)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            req.quantity
        }
    };

    record_activity(
        &mut tx,
        &actor.id,
        "stock.transferred",
        "product",
        &product.id,
        Some(&serde_json::json!({
            "quantity": req.quantity,
            "from": req.from.to_string(),
            "to": req.to.to_string(),
        })),
    )
    .await?;

    tx.commit().await?;

    info!(
        "User {} transferred {} x product {} from {} to {}",
        actor.id, req.quantity, product.id, req.from, req.to
    );
    Ok(TransferOutcome {
        product_id: product.id,
        from_quantity: source.quantity - req.quantity,
        to_quantity,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::Role;
    use crate::db::test_pool;
    use crate::models::BatchReceipt;

    fn manager() -> Actor {
        Actor::new("u-manager", Role::Manager)
    }

    async fn seed_product(pool: &SqlitePool, sku: &str) -> String {
        create_product(
            pool,
            &manager(),
            &CreateProductRequest {
                sku: sku.to_string(),
                name: format!("Product {}", sku),
                unit_price: 9.99,
            },
        )
        .await
        .unwrap()
        .id
    }

    fn receive_into(product_id: &str, warehouse: &str, zone: &str, quantity: i64) -> ReceiveStockRequest {
        ReceiveStockRequest {
            product_id: product_id.to_string(),
            warehouse: Some(warehouse.to_string()),
            zone: Some(zone.to_string()),
            bin: None,
            quantity,
            batch: None,
        }
    }

    #[tokio::test]
    async fn test_receive_aggregate_only() {
        let pool = test_pool().await;
        let product_id = seed_product(&pool, "AGG-1").await;

        let outcome = receive_stock(
            &pool,
            &manager(),
            &ReceiveStockRequest {
                product_id: product_id.clone(),
                warehouse: None,
                zone: None,
                bin: None,
                quantity: 25,
                batch: None,
            },
        )
        .await
        .unwrap();

        assert_eq!(outcome.quantity_on_hand, 25);
        assert!(outcome.location_quantity.is_none());
        assert!(outcome.batch.is_none());
        assert!(location_levels(&pool, &product_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_receive_creates_location_and_batch() {
        let pool = test_pool().await;
        let product_id = seed_product(&pool, "LOC-1").await;

        let outcome = receive_stock(
            &pool,
            &manager(),
            &ReceiveStockRequest {
                product_id: product_id.clone(),
                warehouse: Some("WH1".to_string()),
                zone: Some("A1".to_string()),
                bin: Some("R3-S2".to_string()),
                quantity: 40,
                batch: Some(BatchReceipt {
                    batch_number: "LOT-7".to_string(),
                    received_date: None,
                    expiry_date: None,
                }),
            },
        )
        .await
        .unwrap();

        assert_eq!(outcome.quantity_on_hand, 40);
        assert_eq!(outcome.location_quantity, Some(40));
        let batch = outcome.batch.unwrap();
        assert_eq!(batch.quantity_received, 40);
        assert_eq!(batch.quantity_remaining, 40);
        assert_eq!(batch.status, BatchStatus::Active);

        let levels = location_levels(&pool, &product_id).await.unwrap();
        assert_eq!(levels.len(), 1);
        assert_eq!(levels[0].quantity, 40);
        assert_eq!(levels[0].bin.as_deref(), Some("R3-S2"));
    }

    #[tokio::test]
    async fn test_receive_adds_to_existing_location() {
        let pool = test_pool().await;
        let product_id = seed_product(&pool, "LOC-2").await;

        receive_stock(&pool, &manager(), &receive_into(&product_id, "WH1", "A1", 10))
            .await
            .unwrap();
        let outcome = receive_stock(&pool, &manager(), &receive_into(&product_id, "WH1", "A1", 15))
            .await
            .unwrap();

        assert_eq!(outcome.quantity_on_hand, 25);
        assert_eq!(outcome.location_quantity, Some(25));
        assert_eq!(location_levels(&pool, &product_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_receive_rejects_bad_input() {
        let pool = test_pool().await;
        let product_id = seed_product(&pool, "BAD-1").await;

        let zone_only = ReceiveStockRequest {
            product_id: product_id.clone(),
            warehouse: None,
            zone: Some("A1".to_string()),
            bin: None,
            quantity: 5,
            batch: None,
        };
        assert!(matches!(
            receive_stock(&pool, &manager(), &zone_only).await,
            Err(EngineError::LocationMismatch(_))
        ));

        let mut non_positive = receive_into(&product_id, "WH1", "A1", 0);
        assert!(matches!(
            receive_stock(&pool, &manager(), &non_positive).await,
            Err(EngineError::ValidationError(_))
        ));
        non_positive.quantity = -4;
        assert!(matches!(
            receive_stock(&pool, &manager(), &non_positive).await,
            Err(EngineError::ValidationError(_))
        ));

        let unknown = receive_into("no-such-id", "WH1", "A1", 5);
        assert!(matches!(
            receive_stock(&pool, &manager(), &unknown).await,
            Err(EngineError::NotFound(_))
        ));

        // Batch details without a location make no sense
        let batch_no_loc = ReceiveStockRequest {
            product_id: product_id.clone(),
            warehouse: None,
            zone: None,
            bin: None,
            quantity: 5,
            batch: Some(BatchReceipt {
                batch_number: "L1".to_string(),
                received_date: None,
                expiry_date: None,
            }),
        };
        assert!(matches!(
            receive_stock(&pool, &manager(), &batch_no_loc).await,
            Err(EngineError::LocationMismatch(_))
        ));

        // Nothing was written by any of the failed calls
        assert_eq!(product_stock(&pool, &product_id).await.unwrap().quantity, 0);
    }

    #[tokio::test]
    async fn test_duplicate_batch_number_rejected_and_rolled_back() {
        let pool = test_pool().await;
        let product_id = seed_product(&pool, "DUP-1").await;

        let with_batch = |qty: i64| ReceiveStockRequest {
            product_id: product_id.clone(),
            warehouse: Some("WH1".to_string()),
            zone: Some("A1".to_string()),
            bin: None,
            quantity: qty,
            batch: Some(BatchReceipt {
                batch_number: "LOT-1".to_string(),
                received_date: None,
                expiry_date: None,
            }),
        };

        receive_stock(&pool, &manager(), &with_batch(10)).await.unwrap();
        assert!(matches!(
            receive_stock(&pool, &manager(), &with_batch(5)).await,
            Err(EngineError::ValidationError(_))
        ));

        // The failed receipt must not have bumped any quantity
        assert_eq!(product_stock(&pool, &product_id).await.unwrap().quantity, 10);
        let levels = location_levels(&pool, &product_id).await.unwrap();
        assert_eq!(levels[0].quantity, 10);
    }

    #[tokio::test]
    async fn test_sell_aggregate_checks_availability() {
        let pool = test_pool().await;
        let product_id = seed_product(&pool, "SELL-1").await;
        receive_stock(
            &pool,
            &manager(),
            &ReceiveStockRequest {
                product_id: product_id.clone(),
                warehouse: None,
                zone: None,
                bin: None,
                quantity: 8,
                batch: None,
            },
        )
        .await
        .unwrap();

        let outcome = sell_stock(
            &pool,
            &manager(),
            &SellStockRequest {
                product_id: product_id.clone(),
                quantity: 3,
                warehouse: None,
                zone: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(outcome.quantity_on_hand, 5);

        let err = sell_stock(
            &pool,
            &manager(),
            &SellStockRequest {
                product_id: product_id.clone(),
                quantity: 9,
                warehouse: None,
                zone: None,
            },
        )
        .await
        .unwrap_err();
        match err {
            EngineError::InsufficientStock { available, requested } => {
                assert_eq!(available, 5);
                assert_eq!(requested, 9);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(product_stock(&pool, &product_id).await.unwrap().quantity, 5);
    }

    #[tokio::test]
    async fn test_sell_location_scoped_consumes_batches() {
        let pool = test_pool().await;
        let product_id = seed_product(&pool, "SELL-2").await;
        receive_stock(
            &pool,
            &manager(),
            &ReceiveStockRequest {
                product_id: product_id.clone(),
                warehouse: Some("WH1".to_string()),
                zone: Some("A1".to_string()),
                bin: None,
                quantity: 20,
                batch: Some(BatchReceipt {
                    batch_number: "LOT-A".to_string(),
                    received_date: None,
                    expiry_date: None,
                }),
            },
        )
        .await
        .unwrap();

        let outcome = sell_stock(
            &pool,
            &manager(),
            &SellStockRequest {
                product_id: product_id.clone(),
                quantity: 6,
                warehouse: Some("WH1".to_string()),
                zone: Some("A1".to_string()),
            },
        )
        .await
        .unwrap();

        assert_eq!(outcome.quantity_on_hand, 14);
        assert_eq!(outcome.location_quantity, Some(14));
        assert_eq!(outcome.batches_consumed.len(), 1);
        assert_eq!(outcome.batches_consumed[0].amount, 6);
    }

    #[tokio::test]
    async fn test_sell_insufficient_at_location_leaves_everything_unchanged() {
        let pool = test_pool().await;
        let product_id = seed_product(&pool, "SELL-3").await;
        receive_stock(&pool, &manager(), &receive_into(&product_id, "WH1", "A1", 4))
            .await
            .unwrap();

        let err = sell_stock(
            &pool,
            &manager(),
            &SellStockRequest {
                product_id: product_id.clone(),
                quantity: 5,
                warehouse: Some("WH1".to_string()),
                zone: Some("A1".to_string()),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientStock { available: 4, .. }));

        assert_eq!(product_stock(&pool, &product_id).await.unwrap().quantity, 4);
        let levels = location_levels(&pool, &product_id).await.unwrap();
        assert_eq!(levels[0].quantity, 4);
    }

    #[tokio::test]
    async fn test_sell_from_unknown_location() {
        let pool = test_pool().await;
        let product_id = seed_product(&pool, "SELL-4").await;
        receive_stock(&pool, &manager(), &receive_into(&product_id, "WH1", "A1", 10))
            .await
            .unwrap();

        let err = sell_stock(
            &pool,
            &manager(),
            &SellStockRequest {
                product_id: product_id.clone(),
                quantity: 1,
                warehouse: Some("WH2".to_string()),
                zone: Some("B1".to_string()),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientStock { available: 0, .. }));
    }

    #[tokio::test]
    async fn test_transfer_conserves_quantities() {
        let pool = test_pool().await;
        let product_id = seed_product(&pool, "TRF-1").await;
        receive_stock(&pool, &manager(), &receive_into(&product_id, "WH1", "A1", 30))
            .await
            .unwrap();
        receive_stock(&pool, &manager(), &receive_into(&product_id, "WH2", "B1", 5))
            .await
            .unwrap();

        let outcome = transfer_stock(
            &pool,
            &manager(),
            &TransferStockRequest {
                product_id: product_id.clone(),
                from: Locator::new("WH1", "A1"),
                to: Locator::new("WH2", "B1"),
                quantity: 12,
            },
        )
        .await
        .unwrap();

        assert_eq!(outcome.from_quantity, 18);
        assert_eq!(outcome.to_quantity, 17);
        // Aggregate total is location-invariant
        assert_eq!(product_stock(&pool, &product_id).await.unwrap().quantity, 35);
    }

    #[tokio::test]
    async fn test_transfer_creates_destination_row() {
        let pool = test_pool().await;
        let product_id = seed_product(&pool, "TRF-2").await;
        receive_stock(&pool, &manager(), &receive_into(&product_id, "WH1", "A1", 9))
            .await
            .unwrap();

        let outcome = transfer_stock(
            &pool,
            &manager(),
            &TransferStockRequest {
                product_id: product_id.clone(),
                from: Locator::new("WH1", "A1"),
                to: Locator::new("WH1", "C4"),
                quantity: 9,
            },
        )
        .await
        .unwrap();

        assert_eq!(outcome.from_quantity, 0);
        assert_eq!(outcome.to_quantity, 9);
        assert_eq!(location_levels(&pool, &product_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_transfer_insufficient_source_rolls_back() {
        let pool = test_pool().await;
        let product_id = seed_product(&pool, "TRF-3").await;
        receive_stock(&pool, &manager(), &receive_into(&product_id, "WH1", "A1", 3))
            .await
            .unwrap();

        let err = transfer_stock(
            &pool,
            &manager(),
            &TransferStockRequest {
                product_id: product_id.clone(),
                from: Locator::new("WH1", "A1"),
                to: Locator::new("WH2", "B1"),
                quantity: 4,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientStock { available: 3, .. }));

        let levels = location_levels(&pool, &product_id).await.unwrap();
        assert_eq!(levels.len(), 1);
        assert_eq!(levels[0].quantity, 3);
    }

    #[tokio::test]
    async fn test_transfer_rejects_same_location() {
        let pool = test_pool().await;
        let product_id = seed_product(&pool, "TRF-4").await;
        receive_stock(&pool, &manager(), &receive_into(&product_id, "WH1", "A1", 3))
            .await
            .unwrap();

        let err = transfer_stock(
            &pool,
            &manager(),
            &TransferStockRequest {
                product_id: product_id.clone(),
                from: Locator::new("WH1", "A1"),
                to: Locator::new("WH1", "A1"),
                quantity: 1,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::ValidationError(_)));
    }

    #[tokio::test]
    async fn test_mutations_append_activity_entries() {
        let pool = test_pool().await;
        let product_id = seed_product(&pool, "ACT-1").await;
        receive_stock(&pool, &manager(), &receive_into(&product_id, "WH1", "A1", 10))
            .await
            .unwrap();
        sell_stock(
            &pool,
            &manager(),
            &SellStockRequest {
                product_id: product_id.clone(),
                quantity: 2,
                warehouse: Some("WH1".to_string()),
                zone: Some("A1".to_string()),
            },
        )
        .await
        .unwrap();

        let actions: Vec<String> = sqlx::query_scalar(
            "SELECT action FROM activity_log WHERE entity_id = ? ORDER BY rowid",
        )
        .bind(&product_id)
        .fetch_all(&pool)
        .await
        .unwrap();
        assert_eq!(actions, vec!["product.created", "stock.received", "stock.sold"]);
    }
}
