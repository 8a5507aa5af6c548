// src/models/custody.rs - High-value items, hand-offs, approval requests
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use validator::Validate;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr, sqlx::Type,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum CustodyStatus {
    InStorage,
    InTransit,
    Assigned,
}

/// What the receiving side does with the item: put it back into storage or
/// keep it assigned to themselves. Decides the resting state after
/// acknowledgment.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr, sqlx::Type,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum TransferPurpose {
    Storage,
    Assignment,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr, sqlx::Type,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

/// A serialized high-value instance of a product. Its monetary value is the
/// product's unit price, resolved by join and never stored.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct CustodyItem {
    pub id: String,
    pub product_id: String,
    pub serial_number: String,
    pub label: Option<String>,
    pub current_custodian: String,
    pub status: CustodyStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Custody item joined with its product for value checks.
#[derive(Debug, Serialize, sqlx::FromRow, Clone)]
pub struct CustodyItemWithValue {
    pub id: String,
    pub product_id: String,
    pub serial_number: String,
    pub label: Option<String>,
    pub current_custodian: String,
    pub status: CustodyStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub item_value: f64,
}

/// Immutable record of one hand-off. `acknowledged_at` is stamped once by
/// the recipient and never rewritten.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct CustodyTransfer {
    pub id: String,
    pub item_id: String,
    pub from_custodian: String,
    pub to_custodian: String,
    pub purpose: TransferPurpose,
    pub reason: String,
    pub authorized_by: String,
    pub created_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
}

/// Created when a proposed hand-off needs administrator sign-off.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct ApprovalRequest {
    pub id: String,
    pub item_id: String,
    pub requested_by: String,
    pub to_custodian: String,
    pub purpose: TransferPurpose,
    pub reason: String,
    pub status: ApprovalStatus,
    pub approver: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct RegisterCustodyItemRequest {
    pub product_id: String,
    #[validate(length(min = 1, max = 100, message = "Serial number must be between 1 and 100 characters"))]
    pub serial_number: String,
    #[validate(length(max = 255, message = "Label cannot exceed 255 characters"))]
    pub label: Option<String>,
    #[validate(length(min = 1, max = 64, message = "Custodian must be between 1 and 64 characters"))]
    pub custodian: String,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct RequestTransferRequest {
    pub item_id: String,
    #[validate(length(min = 1, max = 64, message = "Destination custodian must be between 1 and 64 characters"))]
    pub to_custodian: String,
    pub purpose: TransferPurpose,
    #[validate(length(min = 1, max = 500, message = "Reason must be between 1 and 500 characters"))]
    pub reason: String,
    /// Callers may force the approval gate even below the value threshold.
    #[serde(default)]
    pub require_approval: bool,
}
