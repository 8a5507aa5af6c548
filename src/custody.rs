// src/custody.rs - Chain of custody for high-value items
use chrono::Utc;
use log::info;
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;
use validator::Validate;

use crate::activity::record_activity;
use crate::actor::Actor;
use crate::config::CustodyConfig;
use crate::error::{EngineError, EngineResult};
use crate::models::*;

// ==================== OUTCOME STRUCTURES ====================

/// A transfer request either goes through immediately or parks as a pending
/// approval; the caller needs to know which.
#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RequestTransferOutcome {
    Transferred(CustodyTransfer),
    PendingApproval(ApprovalRequest),
}

#[derive(Debug, Serialize)]
pub struct ApprovalOutcome {
    pub request: ApprovalRequest,
    pub transfer: Option<CustodyTransfer>,
}

#[derive(Debug, Serialize)]
pub struct AcknowledgeOutcome {
    pub item: CustodyItem,
    pub transfer: CustodyTransfer,
}

// ==================== REGISTRATION ====================

pub async fn register_custody_item(
    pool: &SqlitePool,
    actor: &Actor,
    req: &RegisterCustodyItemRequest,
) -> EngineResult<CustodyItem> {
    req.validate()?;

    let now = Utc::now();
    let id = Uuid::new_v4().to_string();
    let mut tx = pool.begin().await?;

    let product: Option<String> = sqlx::query_scalar("SELECT id FROM products WHERE id = ?")
        .bind(&req.product_id)
        .fetch_optional(&mut *tx)
        .await?;
    if product.is_none() {
        return Err(EngineError::product_not_found(&req.product_id));
    }

    let duplicate: Option<String> =
        sqlx::query_scalar("SELECT id FROM custody_items WHERE serial_number = ?")
            .bind(&req.serial_number)
            .fetch_optional(&mut *tx)
            .await?;
    if duplicate.is_some() {
        return Err(EngineError::validation(format!(
            "Custody item with serial '{}' already exists",
            req.serial_number
        )));
    }

    sqlx::query(
        r#"INSERT INTO custody_items
           (id, product_id, serial_number, label, current_custodian, status, created_at, updated_at)
           VALUES (?, ?, ?, ?, ?, 'in_storage', ?, ?)"#,
    )
    .bind(&id)
    .bind(&req.product_id)
    .bind(&req.serial_number)
    .bind(&req.label)
    .bind(&req.custodian)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    record_activity(
        &mut tx,
        &actor.id,
        "custody.registered",
        "custody_item",
        &id,
        Some(&serde_json::json!({
            "serial_number": req.serial_number,
            "custodian": req.custodian,
        })),
    )
    .await?;

    let item: CustodyItem = sqlx::query_as("SELECT * FROM custody_items WHERE id = ?")
        .bind(&id)
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;

    info!("User {} registered custody item {} ({})", actor.id, id, req.serial_number);
    Ok(item)
}

// ==================== TRANSFER REQUEST ====================

async fn fetch_item_with_value(
    conn: &mut SqliteConnection,
    item_id: &str,
) -> EngineResult<CustodyItemWithValue> {
    let item: CustodyItemWithValue = sqlx::query_as(
        r#"SELECT ci.*, p.unit_price AS item_value
           FROM custody_items ci
           JOIN products p ON p.id = ci.product_id
           WHERE ci.id = ?"#,
    )
    .bind(item_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| EngineError::not_found("Custody item"))?;
    Ok(item)
}

/// Record the hand-off itself: immutable transfer row, item goes in_transit
/// under the new custodian, activity entry. Shared by the direct path and
/// the approval path.
async fn execute_transfer(
    conn: &mut SqliteConnection,
    item_id: &str,
    from_custodian: &str,
    to_custodian: &str,
    purpose: TransferPurpose,
    reason: &str,
    authorized_by: &str,
) -> EngineResult<CustodyTransfer> {
    let now = Utc::now();
    let transfer_id = Uuid::new_v4().to_string();

    sqlx::query(
        r#"INSERT INTO custody_transfers
           (id, item_id, from_custodian, to_custodian, purpose, reason, authorized_by, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&transfer_id)
    .bind(item_id)
    .bind(from_custodian)
    .bind(to_custodian)
    .bind(purpose)
    .bind(reason)
    .bind(authorized_by)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        r#"UPDATE custody_items
           SET status = 'in_transit', current_custodian = ?, updated_at = ?
           WHERE id = ?"#,
    )
    .bind(to_custodian)
    .bind(now)
    .bind(item_id)
    .execute(&mut *conn)
    .await?;

    record_activity(
        conn,
        authorized_by,
        "custody.transferred",
        "custody_item",
        item_id,
        Some(&serde_json::json!({
            "from": from_custodian,
            "to": to_custodian,
            "purpose": purpose,
            "reason": reason,
        })),
    )
    .await?;

    let transfer: CustodyTransfer = sqlx::query_as("SELECT * FROM custody_transfers WHERE id = ?")
        .bind(&transfer_id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(transfer)
}

/// Start a hand-off. High-value items (unit price at or above the configured
/// threshold) and explicitly flagged requests go through administrator
/// approval first; administrators themselves bypass the gate.
pub async fn request_transfer(
    pool: &SqlitePool,
    config: &CustodyConfig,
    actor: &Actor,
    req: &RequestTransferRequest,
) -> EngineResult<RequestTransferOutcome> {
    req.validate()?;

    let now = Utc::now();
    let mut tx = pool.begin().await?;

    let item = fetch_item_with_value(&mut tx, &req.item_id).await?;
    if item.status == CustodyStatus::InTransit {
        return Err(EngineError::invalid_state(
            "Item is in transit; awaiting acknowledgment",
        ));
    }
    if req.to_custodian == item.current_custodian {
        return Err(EngineError::validation(format!(
            "Item is already held by '{}'",
            req.to_custodian
        )));
    }

    let gate_applies = req.require_approval || item.item_value >= config.approval_threshold;
    let needs_approval = gate_applies && !actor.role.is_admin();

    if needs_approval {
        let request_id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"INSERT INTO approval_requests
               (id, item_id, requested_by, to_custodian, purpose, reason, status, created_at)
               VALUES (?, ?, ?, ?, ?, ?, 'pending', ?)"#,
        )
        .bind(&request_id)
        .bind(&item.id)
        .bind(&actor.id)
        .bind(&req.to_custodian)
        .bind(req.purpose)
        .bind(&req.reason)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        record_activity(
            &mut tx,
            &actor.id,
            "custody.approval_requested",
            "custody_item",
            &item.id,
            Some(&serde_json::json!({
                "to": req.to_custodian,
                "item_value": item.item_value,
                "threshold": config.approval_threshold,
            })),
        )
        .await?;

        let request: ApprovalRequest = sqlx::query_as("SELECT * FROM approval_requests WHERE id = ?")
            .bind(&request_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        info!(
            "User {} requested approval to transfer item {} to {}",
            actor.id, item.id, req.to_custodian
        );
        Ok(RequestTransferOutcome::PendingApproval(request))
    } else {
        let transfer = execute_transfer(
            &mut tx,
            &item.id,
            &item.current_custodian,
            &req.to_custodian,
            req.purpose,
            &req.reason,
            &actor.id,
        )
        .await?;

        tx.commit().await?;

        info!(
            "User {} transferred item {} to {}",
            actor.id, item.id, req.to_custodian
        );
        Ok(RequestTransferOutcome::Transferred(transfer))
    }
}

// ==================== APPROVAL DECISIONS ====================

pub async fn approve_transfer(
    pool: &SqlitePool,
    actor: &Actor,
    approval_id: &str,
    notes: Option<&str>,
) -> EngineResult<ApprovalOutcome> {
    if !actor.role.is_admin() {
        return Err(EngineError::admin_required("approve a custody transfer"));
    }

    let now = Utc::now();
    let mut tx = pool.begin().await?;

    let request: ApprovalRequest = sqlx::query_as("SELECT * FROM approval_requests WHERE id = ?")
        .bind(approval_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| EngineError::not_found("Approval request"))?;
    if request.status != ApprovalStatus::Pending {
        return Err(EngineError::invalid_state(format!(
            "Approval request is already {}",
            request.status
        )));
    }

    let item: CustodyItem = sqlx::query_as("SELECT * FROM custody_items WHERE id = ?")
        .bind(&request.item_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| EngineError::not_found("Custody item"))?;
    if item.status == CustodyStatus::InTransit {
        return Err(EngineError::invalid_state(
            "Item is in transit; awaiting acknowledgment",
        ));
    }

    // The transfer uses the originally requested destination; the source is
    // whoever holds the item now.
    let transfer = execute_transfer(
        &mut tx,
        &item.id,
        &item.current_custodian,
        &request.to_custodian,
        request.purpose,
        &request.reason,
        &actor.id,
    )
    .await?;

    sqlx::query(
        r#"UPDATE approval_requests
           SET status = 'approved', approver = ?, notes = ?, decided_at = ?
           WHERE id = ?"#,
    )
    .bind(&actor.id)
    .bind(notes)
    .bind(now)
    .bind(approval_id)
    .execute(&mut *tx)
    .await?;

    let request: ApprovalRequest = sqlx::query_as("SELECT * FROM approval_requests WHERE id = ?")
        .bind(approval_id)
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;

    info!("User {} approved custody transfer request {}", actor.id, approval_id);
    Ok(ApprovalOutcome {
        request,
        transfer: Some(transfer),
    })
}

pub async fn reject_transfer(
    pool: &SqlitePool,
    actor: &Actor,
    approval_id: &str,
    notes: Option<&str>,
) -> EngineResult<ApprovalOutcome> {
    if !actor.role.is_admin() {
        return Err(EngineError::admin_required("reject a custody transfer"));
    }

    let now = Utc::now();
    let mut tx = pool.begin().await?;

    let request: ApprovalRequest = sqlx::query_as("SELECT * FROM approval_requests WHERE id = ?")
        .bind(approval_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| EngineError::not_found("Approval request"))?;
    if request.status != ApprovalStatus::Pending {
        return Err(EngineError::invalid_state(format!(
            "Approval request is already {}",
            request.status
        )));
    }

    sqlx::query(
        r#"UPDATE approval_requests
           SET status = 'rejected', approver = ?, notes = ?, decided_at = ?
           WHERE id = ?"#,
    )
    .bind(&actor.id)
    .bind(notes)
    .bind(now)
    .bind(approval_id)
    .execute(&mut *tx)
    .await?;

    record_activity(
        &mut tx,
        &actor.id,
        "custody.approval_rejected",
        "custody_item",
        &request.item_id,
        Some(&serde_json::json!({ "request_id": approval_id })),
    )
    .await?;

    let request: ApprovalRequest = sqlx::query_as("SELECT * FROM approval_requests WHERE id = ?")
        .bind(approval_id)
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;

    info!("User {} rejected custody transfer request {}", actor.id, approval_id);
    Ok(ApprovalOutcome {
        request,
        transfer: None,
    })
}

// ==================== ACKNOWLEDGMENT ====================

/// The recipient confirms physical possession, closing the hand-off. The
/// transfer's purpose decides whether the item rests in storage or stays
/// assigned to them.
pub async fn acknowledge_receipt(
    pool: &SqlitePool,
    actor: &Actor,
    item_id: &str,
) -> EngineResult<AcknowledgeOutcome> {
    let now = Utc::now();
    let mut tx = pool.begin().await?;

    let item: CustodyItem = sqlx::query_as("SELECT * FROM custody_items WHERE id = ?")
        .bind(item_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| EngineError::not_found("Custody item"))?;
    if actor.id != item.current_custodian {
        return Err(EngineError::forbidden(
            "Only the current custodian may acknowledge receipt",
        ));
    }

    let transfer: CustodyTransfer = sqlx::query_as(
        r#"SELECT * FROM custody_transfers
           WHERE item_id = ? AND to_custodian = ? AND acknowledged_at IS NULL
           ORDER BY created_at DESC LIMIT 1"#,
    )
    .bind(item_id)
    .bind(&actor.id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| EngineError::not_found("Pending transfer to acknowledge"))?;

    if item.status != CustodyStatus::InTransit {
        return Err(EngineError::invalid_state(format!(
            "Item is not in transit (currently {})",
            item.status
        )));
    }

    let resting_status = match transfer.purpose {
        TransferPurpose::Storage => CustodyStatus::InStorage,
        TransferPurpose::Assignment => CustodyStatus::Assigned,
    };

    sqlx::query("UPDATE custody_transfers SET acknowledged_at = ? WHERE id = ?")
        .bind(now)
        .bind(&transfer.id)
        .execute(&mut *tx)
        .await?;

    sqlx::query("UPDATE custody_items SET status = ?, updated_at = ? WHERE id = ?")
        .bind(resting_status)
        .bind(now)
        .bind(item_id)
        .execute(&mut *tx)
        .await?;

    record_activity(
        &mut tx,
        &actor.id,
        "custody.acknowledged",
        "custody_item",
        item_id,
        Some(&serde_json::json!({
            "transfer_id": transfer.id,
            "resting_status": resting_status,
        })),
    )
    .await?;

    let item: CustodyItem = sqlx::query_as("SELECT * FROM custody_items WHERE id = ?")
        .bind(item_id)
        .fetch_one(&mut *tx)
        .await?;
    let transfer: CustodyTransfer = sqlx::query_as("SELECT * FROM custody_transfers WHERE id = ?")
        .bind(&transfer.id)
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;

    info!("User {} acknowledged receipt of item {}", actor.id, item_id);
    Ok(AcknowledgeOutcome { item, transfer })
}

// ==================== READ HELPERS ====================

/// Ordered hand-off history for one item, oldest first.
pub async fn custody_chain(pool: &SqlitePool, item_id: &str) -> EngineResult<Vec<CustodyTransfer>> {
    let exists: Option<String> = sqlx::query_scalar("SELECT id FROM custody_items WHERE id = ?")
        .bind(item_id)
        .fetch_optional(pool)
        .await?;
    if exists.is_none() {
        return Err(EngineError::not_found("Custody item"));
    }

    let transfers: Vec<CustodyTransfer> = sqlx::query_as(
        "SELECT * FROM custody_transfers WHERE item_id = ? ORDER BY created_at ASC",
    )
    .bind(item_id)
    .fetch_all(pool)
    .await?;
    Ok(transfers)
}
