// src/models/audit.rs - Physical count sessions, worksheets, discrepancies
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
pub enum AuditStatus {
    InProgress,
    PendingApproval,
    Completed,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr, sqlx::Type,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum AuditType {
    Full,
    Cycle,
    Spot,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr, sqlx::Type,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum DiscrepancyStatus {
    Pending,
    Resolved,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr, sqlx::Type,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum DiscrepancyResolution {
    Adjust,
    AcceptSystem,
}

/// One physical count exercise over a warehouse (optionally narrowed to a
/// zone). Flow: in_progress -> pending_approval -> completed, one way.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct AuditSession {
    pub id: String,
    pub warehouse: String,
    pub zone: Option<String>,
    pub audit_type: AuditType,
    pub status: AuditStatus,
    pub created_by: String,
    pub approved_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
}

/// Snapshot of one (product, location) taken when the audit was opened.
/// `counted_quantity` stays NULL until someone records a count.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct WorksheetItem {
    pub id: String,
    pub audit_id: String,
    pub product_id: String,
    pub warehouse: String,
    pub zone: String,
    pub system_quantity: i64,
    pub counted_quantity: Option<i64>,
    pub variance: Option<i64>,
    pub counted_by: Option<String>,
    pub counted_at: Option<DateTime<Utc>>,
}

/// A variance beyond the materiality threshold, requiring explicit
/// resolution before the audit can be submitted.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Discrepancy {
    pub id: String,
    pub audit_id: String,
    pub worksheet_item_id: String,
    pub status: DiscrepancyStatus,
    pub resolution: Option<DiscrepancyResolution>,
    pub adjustment_reason: Option<String>,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct CreateAuditRequest {
    #[validate(length(min = 1, max = 64, message = "Warehouse must be between 1 and 64 characters"))]
    pub warehouse: String,
    #[validate(length(min = 1, max = 64, message = "Zone must be between 1 and 64 characters"))]
    pub zone: Option<String>,
    pub audit_type: AuditType,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct RecordCountRequest {
    pub worksheet_item_id: String,
    #[validate(range(min = 0, message = "Counted quantity cannot be negative"))]
    pub counted_quantity: i64,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct ResolveDiscrepancyRequest {
    pub discrepancy_id: String,
    pub resolution: DiscrepancyResolution,
    #[validate(length(min = 1, max = 500, message = "Adjustment reason must be between 1 and 500 characters"))]
    pub adjustment_reason: Option<String>,
}
