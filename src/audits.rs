// src/audits.rs - Physical count sessions and discrepancy reconciliation
//
// Session flow is strictly one way: in_progress -> pending_approval ->
// completed. There is no reopen or reject transition.
use chrono::Utc;
use log::info;
use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;
use validator::Validate;

use crate::activity::record_activity;
use crate::actor::Actor;
use crate::error::{EngineError, EngineResult};
use crate::models::*;
use crate::validator::{validate_warehouse_code, validate_zone_code};

/// Variance is material when it exceeds this share of the system quantity.
/// Fixed business rule: strictly greater than 10 percent flags, exactly 10
/// percent does not.
const DISCREPANCY_THRESHOLD_NUMERATOR: i64 = 10;

fn variance_is_material(variance: i64, system_quantity: i64) -> bool {
    variance.abs() * DISCREPANCY_THRESHOLD_NUMERATOR > system_quantity
}

#[derive(Debug, Serialize)]
pub struct RecordCountOutcome {
    pub item: WorksheetItem,
    pub discrepancy: Option<Discrepancy>,
}

// ==================== CREATE ====================

/// Open an audit over everything currently stocked in the scope, freezing
/// per-location system quantities into worksheet items.
pub async fn create_audit(
    pool: &SqlitePool,
    actor: &Actor,
    req: &CreateAuditRequest,
) -> EngineResult<AuditSession> {
    req.validate()?;
    validate_warehouse_code(&req.warehouse)?;
    if let Some(zone) = &req.zone {
        validate_zone_code(zone)?;
    }

    let now = Utc::now();
    let mut tx = pool.begin().await?;

    let rows: Vec<LocationStock> = match &req.zone {
        Some(zone) => {
            sqlx::query_as(
                r#"SELECT * FROM location_stock
                   WHERE warehouse = ? AND zone = ? AND quantity > 0
                   ORDER BY product_id"#,
            )
            .bind(&req.warehouse)
            .bind(zone)
            .fetch_all(&mut *tx)
            .await?
        }
        None => {
            sqlx::query_as(
                r#"SELECT * FROM location_stock
                   WHERE warehouse = ? AND quantity > 0
                   ORDER BY product_id, zone"#,
            )
            .bind(&req.warehouse)
            .fetch_all(&mut *tx)
            .await?
        }
    };

    if rows.is_empty() {
        return Err(EngineError::validation(format!(
            "Nothing is stocked in warehouse '{}'{}",
            req.warehouse,
            req.zone
                .as_ref()
                .map(|z| format!(" zone '{}'", z))
                .unwrap_or_default()
        )));
    }

    let audit_id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"INSERT INTO audit_sessions
           (id, warehouse, zone, audit_type, status, created_by, created_at)
           VALUES (?, ?, ?, ?, 'in_progress', ?, ?)"#,
    )
    .bind(&audit_id)
    .bind(&req.warehouse)
    .bind(&req.zone)
    .bind(req.audit_type)
    .bind(&actor.id)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    for row in &rows {
        sqlx::query(
            r#"INSERT INTO worksheet_items
               (id, audit_id, product_id, warehouse, zone, system_quantity)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&audit_id)
        .bind(&row.product_id)
        .bind(&row.warehouse)
        .bind(&row.zone)
        .bind(row.quantity)
        .execute(&mut *tx)
        .await?;
    }

    record_activity(
        &mut tx,
        &actor.id,
        "audit.created",
        "audit_session",
        &audit_id,
        Some(&serde_json::json!({
            "warehouse": req.warehouse,
            "zone": req.zone,
            "audit_type": req.audit_type,
            "items": rows.len(),
        })),
    )
    .await?;

    let session: AuditSession = sqlx::query_as("SELECT * FROM audit_sessions WHERE id = ?")
        .bind(&audit_id)
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;

    info!(
        "User {} opened {} audit {} over {} locations",
        actor.id, req.audit_type, audit_id, rows.len()
    );
    Ok(session)
}

// ==================== RECORD COUNT ====================

pub async fn record_count(
    pool: &SqlitePool,
    actor: &Actor,
    req: &RecordCountRequest,
) -> EngineResult<RecordCountOutcome> {
    req.validate()?;
    if req.counted_quantity < 0 {
        return Err(EngineError::validation("Counted quantity cannot be negative"));
    }

    let now = Utc::now();
    let mut tx = pool.begin().await?;

    let item: WorksheetItem = sqlx::query_as("SELECT * FROM worksheet_items WHERE id = ?")
        .bind(&req.worksheet_item_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| EngineError::not_found("Worksheet item"))?;

    let session: AuditSession = sqlx::query_as("SELECT * FROM audit_sessions WHERE id = ?")
        .bind(&item.audit_id)
        .fetch_one(&mut *tx)
        .await?;
    if session.status != AuditStatus::InProgress {
        return Err(EngineError::invalid_state(format!(
            "Counts can only be recorded while the audit is in_progress (currently {})",
            session.status
        )));
    }

    let variance = req.counted_quantity - item.system_quantity;

    sqlx::query(
        r#"UPDATE worksheet_items
           SET counted_quantity = ?, variance = ?, counted_by = ?, counted_at = ?
           WHERE id = ?"#,
    )
    .bind(req.counted_quantity)
    .bind(variance)
    .bind(&actor.id)
    .bind(now)
    .bind(&item.id)
    .execute(&mut *tx)
    .await?;

    // A re-count supersedes whatever the previous count flagged; resolved
    // discrepancies are history and stay untouched.
    sqlx::query("DELETE FROM discrepancies WHERE worksheet_item_id = ? AND status = 'pending'")
        .bind(&item.id)
        .execute(&mut *tx)
        .await?;

    let discrepancy = if variance_is_material(variance, item.system_quantity) {
        let discrepancy_id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"INSERT INTO discrepancies
               (id, audit_id, worksheet_item_id, status, created_at)
               VALUES (?, ?, ?, 'pending', ?)"#,
        )
        .bind(&discrepancy_id)
        .bind(&item.audit_id)
        .bind(&item.id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let row: Discrepancy = sqlx::query_as("SELECT * FROM discrepancies WHERE id = ?")
            .bind(&discrepancy_id)
            .fetch_one(&mut *tx)
            .await?;
        Some(row)
    } else {
        None
    };

    record_activity(
        &mut tx,
        &actor.id,
        "audit.count_recorded",
        "worksheet_item",
        &item.id,
        Some(&serde_json::json!({
            "audit_id": item.audit_id,
            "system_quantity": item.system_quantity,
            "counted_quantity": req.counted_quantity,
            "variance": variance,
            "flagged": discrepancy.is_some(),
        })),
    )
    .await?;

    let item: WorksheetItem = sqlx::query_as("SELECT * FROM worksheet_items WHERE id = ?")
        .bind(&req.worksheet_item_id)
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(RecordCountOutcome { item, discrepancy })
}

// ==================== RESOLVE DISCREPANCY ====================

pub async fn resolve_discrepancy(
    pool: &SqlitePool,
    actor: &Actor,
    req: &ResolveDiscrepancyRequest,
) -> EngineResult<Discrepancy> {
    req.validate()?;

    let now = Utc::now();
    let mut tx = pool.begin().await?;

    let discrepancy: Discrepancy = sqlx::query_as("SELECT * FROM discrepancies WHERE id = ?")
        .bind(&req.discrepancy_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| EngineError::not_found("Discrepancy"))?;
    if discrepancy.status != DiscrepancyStatus::Pending {
        return Err(EngineError::invalid_state("Discrepancy is already resolved"));
    }

    let session: AuditSession = sqlx::query_as("SELECT * FROM audit_sessions WHERE id = ?")
        .bind(&discrepancy.audit_id)
        .fetch_one(&mut *tx)
        .await?;
    if session.status != AuditStatus::InProgress {
        return Err(EngineError::invalid_state(format!(
            "Discrepancies are resolved while the audit is in_progress (currently {})",
            session.status
        )));
    }

    let item: WorksheetItem = sqlx::query_as("SELECT * FROM worksheet_items WHERE id = ?")
        .bind(&discrepancy.worksheet_item_id)
        .fetch_one(&mut *tx)
        .await?;

    if req.resolution == DiscrepancyResolution::Adjust {
        let reason = req
            .adjustment_reason
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .ok_or_else(|| EngineError::validation("Adjustment reason is required"))?;
        let variance = item
            .variance
            .ok_or_else(|| EngineError::invalid_state("Worksheet item has no recorded count"))?;

        // Signed correction applied to the location row and the aggregate.
        // The count happened in the past, so concurrent sales may have made
        // a downward correction impossible; guard rather than go negative.
        let result = sqlx::query(
            r#"UPDATE location_stock
               SET quantity = quantity + ?, updated_at = ?
               WHERE product_id = ? AND warehouse = ? AND zone = ? AND quantity + ? >= 0"#,
        )
        .bind(variance)
        .bind(now)
        .bind(&item.product_id)
        .bind(&item.warehouse)
        .bind(&item.zone)
        .bind(variance)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            let available: Option<i64> = sqlx::query_scalar(
                "SELECT quantity FROM location_stock WHERE product_id = ? AND warehouse = ? AND zone = ?",
            )
            .bind(&item.product_id)
            .bind(&item.warehouse)
            .bind(&item.zone)
            .fetch_optional(&mut *tx)
            .await?;
            let available = available
                .ok_or_else(|| EngineError::location_not_found(&item.warehouse, &item.zone))?;
            return Err(EngineError::insufficient_stock(available, -variance));
        }

        let result = sqlx::query(
            r#"UPDATE products SET quantity = quantity + ?, updated_at = ?
               WHERE id = ? AND quantity + ? >= 0"#,
        )
        .bind(variance)
        .bind(now)
        .bind(&item.product_id)
        .bind(variance)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            let available: i64 = sqlx::query_scalar("SELECT quantity FROM products WHERE id = ?")
                .bind(&item.product_id)
                .fetch_one(&mut *tx)
                .await?;
            return Err(EngineError::insufficient_stock(available, -variance));
        }

        record_activity(
            &mut tx,
            &actor.id,
            "audit.stock_adjusted",
            "product",
            &item.product_id,
            Some(&serde_json::json!({
                "audit_id": discrepancy.audit_id,
                "warehouse": item.warehouse,
                "zone": item.zone,
                "variance": variance,
                "reason": reason,
            })),
        )
        .await?;
    }

    sqlx::query(
        r#"UPDATE discrepancies
           SET status = 'resolved', resolution = ?, adjustment_reason = ?,
               resolved_by = ?, resolved_at = ?
           WHERE id = ?"#,
    )
    .bind(req.resolution)
    .bind(&req.adjustment_reason)
    .bind(&actor.id)
    .bind(now)
    .bind(&discrepancy.id)
    .execute(&mut *tx)
    .await?;

    record_activity(
        &mut tx,
        &actor.id,
        "audit.discrepancy_resolved",
        "discrepancy",
        &discrepancy.id,
        Some(&serde_json::json!({
            "audit_id": discrepancy.audit_id,
            "resolution": req.resolution,
        })),
    )
    .await?;

    let resolved: Discrepancy = sqlx::query_as("SELECT * FROM discrepancies WHERE id = ?")
        .bind(&discrepancy.id)
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;

    info!(
        "User {} resolved discrepancy {} as {}",
        actor.id, discrepancy.id, req.resolution
    );
    Ok(resolved)
}

// ==================== COMPLETE ====================

/// Submit the audit for approval. Every item must be counted and every
/// discrepancy resolved; both conditions are checked here, together.
pub async fn complete_audit(
    pool: &SqlitePool,
    actor: &Actor,
    audit_id: &str,
) -> EngineResult<AuditSession> {
    let now = Utc::now();
    let mut tx = pool.begin().await?;

    let session: AuditSession = sqlx::query_as("SELECT * FROM audit_sessions WHERE id = ?")
        .bind(audit_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| EngineError::not_found("Audit session"))?;
    if session.status != AuditStatus::InProgress {
        return Err(EngineError::invalid_state(format!(
            "Audit cannot be submitted from status {}",
            session.status
        )));
    }

    let uncounted: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM worksheet_items WHERE audit_id = ? AND counted_quantity IS NULL",
    )
    .bind(audit_id)
    .fetch_one(&mut *tx)
    .await?;
    let pending: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM discrepancies WHERE audit_id = ? AND status = 'pending'",
    )
    .bind(audit_id)
    .fetch_one(&mut *tx)
    .await?;
    if uncounted > 0 || pending > 0 {
        return Err(EngineError::invalid_state(format!(
            "Audit cannot be submitted: {} uncounted items, {} pending discrepancies",
            uncounted, pending
        )));
    }

    sqlx::query(
        "UPDATE audit_sessions SET status = 'pending_approval', submitted_at = ? WHERE id = ?",
    )
    .bind(now)
    .bind(audit_id)
    .execute(&mut *tx)
    .await?;

    record_activity(&mut tx, &actor.id, "audit.submitted", "audit_session", audit_id, None).await?;

    let session: AuditSession = sqlx::query_as("SELECT * FROM audit_sessions WHERE id = ?")
        .bind(audit_id)
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;

    info!("User {} submitted audit {} for approval", actor.id, audit_id);
    Ok(session)
}

// ==================== APPROVE ====================

/// Administrator sign-off, the only path to `completed`. Also stamps the
/// audited locations.
pub async fn approve_audit(
    pool: &SqlitePool,
    actor: &Actor,
    audit_id: &str,
) -> EngineResult<AuditSession> {
    if !actor.role.is_admin() {
        return Err(EngineError::admin_required("approve an audit"));
    }

    let now = Utc::now();
    let mut tx = pool.begin().await?;

    let session: AuditSession = sqlx::query_as("SELECT * FROM audit_sessions WHERE id = ?")
        .bind(audit_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| EngineError::not_found("Audit session"))?;
    if session.status != AuditStatus::PendingApproval {
        return Err(EngineError::invalid_state(format!(
            "Audit cannot be approved from status {}",
            session.status
        )));
    }

    sqlx::query(
        r#"UPDATE audit_sessions
           SET status = 'completed', approved_by = ?, approved_at = ?
           WHERE id = ?"#,
    )
    .bind(&actor.id)
    .bind(now)
    .bind(audit_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"UPDATE location_stock SET last_audited_at = ?
           WHERE id IN (
               SELECT ls.id FROM location_stock ls
               JOIN worksheet_items wi
                 ON wi.product_id = ls.product_id
                AND wi.warehouse = ls.warehouse
                AND wi.zone = ls.zone
               WHERE wi.audit_id = ?
           )"#,
    )
    .bind(now)
    .bind(audit_id)
    .execute(&mut *tx)
    .await?;

    record_activity(&mut tx, &actor.id, "audit.approved", "audit_session", audit_id, None).await?;

    let session: AuditSession = sqlx::query_as("SELECT * FROM audit_sessions WHERE id = ?")
        .bind(audit_id)
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;

    info!("User {} approved audit {}", actor.id, audit_id);
    Ok(session)
}

// ==================== READ HELPERS ====================

pub async fn audit_worksheet(pool: &SqlitePool, audit_id: &str) -> EngineResult<Vec<WorksheetItem>> {
    let items: Vec<WorksheetItem> = sqlx::query_as(
        "SELECT * FROM worksheet_items WHERE audit_id = ? ORDER BY warehouse, zone, product_id",
    )
    .bind(audit_id)
    .fetch_all(pool)
    .await?;
    if items.is_empty() {
        // Distinguish an unknown audit from an impossible empty one
        let exists: Option<String> = sqlx::query_scalar("SELECT id FROM audit_sessions WHERE id = ?")
            .bind(audit_id)
            .fetch_optional(pool)
            .await?;
        if exists.is_none() {
            return Err(EngineError::not_found("Audit session"));
        }
    }
    Ok(items)
}

pub async fn pending_discrepancies(
    pool: &SqlitePool,
    audit_id: &str,
) -> EngineResult<Vec<Discrepancy>> {
    let rows: Vec<Discrepancy> = sqlx::query_as(
        "SELECT * FROM discrepancies WHERE audit_id = ? AND status = 'pending' ORDER BY created_at",
    )
    .bind(audit_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::Role;
    use crate::db::test_pool;
    use crate::ledger;

    fn admin() -> Actor {
        Actor::new("u-admin", Role::Admin)
    }

    fn manager() -> Actor {
        Actor::new("u-manager", Role::Manager)
    }

    fn clerk() -> Actor {
        Actor::new("u-clerk", Role::Clerk)
    }

    async fn seed_stock(pool: &SqlitePool, sku: &str, warehouse: &str, zone: &str, quantity: i64) -> String {
        let product = ledger::create_product(
            pool,
            &manager(),
            &CreateProductRequest {
                sku: sku.to_string(),
                name: format!("Product {}", sku),
                unit_price: 10.0,
            },
        )
        .await
        .unwrap();
        ledger::receive_stock(
            pool,
            &manager(),
            &ReceiveStockRequest {
                product_id: product.id.clone(),
                warehouse: Some(warehouse.to_string()),
                zone: Some(zone.to_string()),
                bin: None,
                quantity,
                batch: None,
            },
        )
        .await
        .unwrap();
        product.id
    }

    fn audit_req(warehouse: &str, zone: Option<&str>) -> CreateAuditRequest {
        CreateAuditRequest {
            warehouse: warehouse.to_string(),
            zone: zone.map(str::to_string),
            audit_type: AuditType::Cycle,
        }
    }

    async fn count(pool: &SqlitePool, item_id: &str, counted: i64) -> RecordCountOutcome {
        record_count(
            pool,
            &clerk(),
            &RecordCountRequest {
                worksheet_item_id: item_id.to_string(),
                counted_quantity: counted,
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_audit_snapshots_scope() {
        let pool = test_pool().await;
        seed_stock(&pool, "A", "WH1", "Z1", 100).await;
        seed_stock(&pool, "B", "WH1", "Z2", 50).await;
        seed_stock(&pool, "C", "WH2", "Z1", 10).await;

        let session = create_audit(&pool, &manager(), &audit_req("WH1", None)).await.unwrap();
        assert_eq!(session.status, AuditStatus::InProgress);

        let items = audit_worksheet(&pool, &session.id).await.unwrap();
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|i| i.counted_quantity.is_none()));
        assert!(items.iter().all(|i| i.warehouse == "WH1"));

        // Zone-narrowed audit sees a single row
        let narrowed = create_audit(&pool, &manager(), &audit_req("WH1", Some("Z2"))).await.unwrap();
        assert_eq!(audit_worksheet(&pool, &narrowed.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_audit_rejects_empty_scope() {
        let pool = test_pool().await;
        let err = create_audit(&pool, &manager(), &audit_req("EMPTY", None)).await.unwrap_err();
        assert!(matches!(err, EngineError::ValidationError(_)));
    }

    #[tokio::test]
    async fn test_snapshot_is_frozen_at_creation() {
        let pool = test_pool().await;
        let product_id = seed_stock(&pool, "A", "WH1", "Z1", 100).await;
        let session = create_audit(&pool, &manager(), &audit_req("WH1", None)).await.unwrap();

        // Stock moves after the audit opened; the worksheet must not follow.
        ledger::sell_stock(
            &pool,
            &manager(),
            &SellStockRequest {
                product_id,
                quantity: 30,
                warehouse: Some("WH1".to_string()),
                zone: Some("Z1".to_string()),
            },
        )
        .await
        .unwrap();

        let items = audit_worksheet(&pool, &session.id).await.unwrap();
        assert_eq!(items[0].system_quantity, 100);
    }

    #[tokio::test]
    async fn test_discrepancy_threshold_boundaries() {
        let pool = test_pool().await;
        seed_stock(&pool, "A", "WH1", "Z1", 100).await;
        let session = create_audit(&pool, &manager(), &audit_req("WH1", None)).await.unwrap();
        let item_id = audit_worksheet(&pool, &session.id).await.unwrap()[0].id.clone();

        // 9% under: no discrepancy
        let outcome = count(&pool, &item_id, 91).await;
        assert_eq!(outcome.item.variance, Some(-9));
        assert!(outcome.discrepancy.is_none());

        // Exactly 10% under: still no discrepancy (strictly-greater rule)
        let outcome = count(&pool, &item_id, 90).await;
        assert!(outcome.discrepancy.is_none());

        // Exactly 10% over: same rule on the positive side
        let outcome = count(&pool, &item_id, 110).await;
        assert!(outcome.discrepancy.is_none());

        // 11% under: flagged
        let outcome = count(&pool, &item_id, 89).await;
        let discrepancy = outcome.discrepancy.expect("11% variance must flag");
        assert_eq!(discrepancy.status, DiscrepancyStatus::Pending);

        // 11% over: flagged as well
        let outcome = count(&pool, &item_id, 111).await;
        assert!(outcome.discrepancy.is_some());
    }

    #[test]
    fn test_variance_materiality() {
        assert!(!variance_is_material(-9, 100));
        assert!(!variance_is_material(-10, 100)); // exactly 10%: not material
        assert!(!variance_is_material(10, 100));
        assert!(variance_is_material(-11, 100));
        assert!(variance_is_material(11, 100));
        // With nothing on the books, any nonzero count is material
        assert!(variance_is_material(1, 0));
        assert!(!variance_is_material(0, 0));
    }

    #[tokio::test]
    async fn test_drained_location_not_on_worksheet() {
        let pool = test_pool().await;
        let product_id = seed_stock(&pool, "A", "WH1", "Z1", 5).await;
        // Drain the location to zero, then audit; the row still exists
        ledger::sell_stock(
            &pool,
            &manager(),
            &SellStockRequest {
                product_id,
                quantity: 5,
                warehouse: Some("WH1".to_string()),
                zone: Some("Z1".to_string()),
            },
        )
        .await
        .unwrap();
        // quantity > 0 rows only, so re-stock a different product to audit
        seed_stock(&pool, "B", "WH1", "Z1", 10).await;
        let session = create_audit(&pool, &manager(), &audit_req("WH1", None)).await.unwrap();
        let items = audit_worksheet(&pool, &session.id).await.unwrap();
        assert_eq!(items.len(), 1, "drained location must not appear on the worksheet");
    }

    #[tokio::test]
    async fn test_recount_supersedes_pending_discrepancy() {
        let pool = test_pool().await;
        seed_stock(&pool, "A", "WH1", "Z1", 100).await;
        let session = create_audit(&pool, &manager(), &audit_req("WH1", None)).await.unwrap();
        let item_id = audit_worksheet(&pool, &session.id).await.unwrap()[0].id.clone();

        let first = count(&pool, &item_id, 80).await;
        assert!(first.discrepancy.is_some());
        assert_eq!(pending_discrepancies(&pool, &session.id).await.unwrap().len(), 1);

        // Corrected count within tolerance clears the pending flag
        let second = count(&pool, &item_id, 95).await;
        assert!(second.discrepancy.is_none());
        assert!(pending_discrepancies(&pool, &session.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_record_count_requires_in_progress() {
        let pool = test_pool().await;
        seed_stock(&pool, "A", "WH1", "Z1", 100).await;
        let session = create_audit(&pool, &manager(), &audit_req("WH1", None)).await.unwrap();
        let item_id = audit_worksheet(&pool, &session.id).await.unwrap()[0].id.clone();

        count(&pool, &item_id, 100).await;
        complete_audit(&pool, &manager(), &session.id).await.unwrap();

        let err = record_count(
            &pool,
            &clerk(),
            &RecordCountRequest {
                worksheet_item_id: item_id,
                counted_quantity: 90,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_resolve_adjust_corrects_ledger() {
        let pool = test_pool().await;
        let product_id = seed_stock(&pool, "A", "WH1", "Z1", 100).await;
        let session = create_audit(&pool, &manager(), &audit_req("WH1", None)).await.unwrap();
        let item_id = audit_worksheet(&pool, &session.id).await.unwrap()[0].id.clone();

        let outcome = count(&pool, &item_id, 80).await;
        let discrepancy = outcome.discrepancy.unwrap();

        let resolved = resolve_discrepancy(
            &pool,
            &manager(),
            &ResolveDiscrepancyRequest {
                discrepancy_id: discrepancy.id,
                resolution: DiscrepancyResolution::Adjust,
                adjustment_reason: Some("Shelf damage write-off".to_string()),
            },
        )
        .await
        .unwrap();
        assert_eq!(resolved.status, DiscrepancyStatus::Resolved);
        assert_eq!(resolved.resolution, Some(DiscrepancyResolution::Adjust));

        // Ledger now matches the physical count
        assert_eq!(ledger::product_stock(&pool, &product_id).await.unwrap().quantity, 80);
        let levels = ledger::location_levels(&pool, &product_id).await.unwrap();
        assert_eq!(levels[0].quantity, 80);
    }

    #[tokio::test]
    async fn test_resolve_adjust_requires_reason() {
        let pool = test_pool().await;
        seed_stock(&pool, "A", "WH1", "Z1", 100).await;
        let session = create_audit(&pool, &manager(), &audit_req("WH1", None)).await.unwrap();
        let item_id = audit_worksheet(&pool, &session.id).await.unwrap()[0].id.clone();
        let discrepancy = count(&pool, &item_id, 80).await.discrepancy.unwrap();

        let err = resolve_discrepancy(
            &pool,
            &manager(),
            &ResolveDiscrepancyRequest {
                discrepancy_id: discrepancy.id.clone(),
                resolution: DiscrepancyResolution::Adjust,
                adjustment_reason: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::ValidationError(_)));

        // Still pending, nothing was applied
        assert_eq!(pending_discrepancies(&pool, &session.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_accept_system_touches_nothing() {
        let pool = test_pool().await;
        let product_id = seed_stock(&pool, "A", "WH1", "Z1", 100).await;
        let session = create_audit(&pool, &manager(), &audit_req("WH1", None)).await.unwrap();
        let item_id = audit_worksheet(&pool, &session.id).await.unwrap()[0].id.clone();
        let discrepancy = count(&pool, &item_id, 80).await.discrepancy.unwrap();

        let resolved = resolve_discrepancy(
            &pool,
            &manager(),
            &ResolveDiscrepancyRequest {
                discrepancy_id: discrepancy.id.clone(),
                resolution: DiscrepancyResolution::AcceptSystem,
                adjustment_reason: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(resolved.resolution, Some(DiscrepancyResolution::AcceptSystem));
        assert_eq!(ledger::product_stock(&pool, &product_id).await.unwrap().quantity, 100);

        let err = resolve_discrepancy(
            &pool,
            &manager(),
            &ResolveDiscrepancyRequest {
                discrepancy_id: discrepancy.id,
                resolution: DiscrepancyResolution::AcceptSystem,
                adjustment_reason: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_complete_gating() {
        let pool = test_pool().await;
        seed_stock(&pool, "A", "WH1", "Z1", 100).await;
        seed_stock(&pool, "B", "WH1", "Z2", 40).await;
        let session = create_audit(&pool, &manager(), &audit_req("WH1", None)).await.unwrap();
        let items = audit_worksheet(&pool, &session.id).await.unwrap();

        // Uncounted items block submission
        let err = complete_audit(&pool, &manager(), &session.id).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));

        let outcome = count(&pool, &items[0].id, 60).await; // big variance -> discrepancy
        count(&pool, &items[1].id, 40).await;

        // Pending discrepancy blocks submission
        let err = complete_audit(&pool, &manager(), &session.id).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));

        resolve_discrepancy(
            &pool,
            &manager(),
            &ResolveDiscrepancyRequest {
                discrepancy_id: outcome.discrepancy.unwrap().id,
                resolution: DiscrepancyResolution::AcceptSystem,
                adjustment_reason: None,
            },
        )
        .await
        .unwrap();

        let session = complete_audit(&pool, &manager(), &session.id).await.unwrap();
        assert_eq!(session.status, AuditStatus::PendingApproval);
        assert!(session.submitted_at.is_some());
    }

    #[tokio::test]
    async fn test_approve_is_admin_only_and_stamps_locations() {
        let pool = test_pool().await;
        let product_id = seed_stock(&pool, "A", "WH1", "Z1", 100).await;
        let session = create_audit(&pool, &manager(), &audit_req("WH1", None)).await.unwrap();
        let item_id = audit_worksheet(&pool, &session.id).await.unwrap()[0].id.clone();
        count(&pool, &item_id, 100).await;

        // Approval straight from in_progress is not a thing
        let err = approve_audit(&pool, &admin(), &session.id).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));

        complete_audit(&pool, &manager(), &session.id).await.unwrap();

        let err = approve_audit(&pool, &manager(), &session.id).await.unwrap_err();
        assert!(matches!(err, EngineError::Authorization(_)));

        let approved = approve_audit(&pool, &admin(), &session.id).await.unwrap();
        assert_eq!(approved.status, AuditStatus::Completed);
        assert_eq!(approved.approved_by.as_deref(), Some("u-admin"));
        assert!(approved.approved_at.is_some());

        let levels = ledger::location_levels(&pool, &product_id).await.unwrap();
        assert!(levels[0].last_audited_at.is_some());

        // Terminal state: approving twice fails
        let err = approve_audit(&pool, &admin(), &session.id).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
    }
}
