// src/models/batch.rs
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
pub enum BatchStatus {
    Active,
    Depleted,
}

/// Shelf-life classification, derived on read and never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ExpiryStatus {
    Expired,
    Critical,
    Soon,
    Ok,
}

impl ExpiryStatus {
    pub const CRITICAL_DAYS: i64 = 7;
    pub const SOON_DAYS: i64 = 30;

    pub fn from_days_left(days: i64) -> Self {
        if days < 0 {
            Self::Expired
        } else if days <= Self::CRITICAL_DAYS {
            Self::Critical
        } else if days <= Self::SOON_DAYS {
            Self::Soon
        } else {
            Self::Ok
        }
    }

    pub fn needs_attention(&self) -> bool {
        !matches!(self, Self::Ok)
    }
}

/// A tracked sub-quantity of a product received together, scoped to one
/// (product, warehouse, zone) location. Batches are a supplementary
/// traceability view; the location row stays authoritative.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Batch {
    pub id: String,
    pub product_id: String,
    pub warehouse: String,
    pub zone: String,
    pub batch_number: String,
    pub quantity_received: i64,
    pub quantity_remaining: i64,
    pub quantity_sold: i64,
    pub received_date: DateTime<Utc>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub status: BatchStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Batch {
    /// Days from `as_of` until this batch expires, negative once past it.
    /// None when the batch carries no expiry date.
    pub fn days_until_expiry(&self, as_of: DateTime<Utc>) -> Option<i64> {
        self.expiry_date.map(|date| (date - as_of).num_days())
    }

    /// Classification for pick lists and expiry reports. Batches without an
    /// expiry date are never flagged.
    pub fn expiry_status(&self, as_of: DateTime<Utc>) -> Option<ExpiryStatus> {
        self.days_until_expiry(as_of).map(ExpiryStatus::from_days_left)
    }
}

/// Batch details supplied alongside a stock receipt.
#[derive(Debug, Deserialize, Validate, Clone)]
pub struct BatchReceipt {
    #[validate(length(min = 1, max = 100, message = "Batch number must be between 1 and 100 characters"))]
    pub batch_number: String,
    pub received_date: Option<DateTime<Utc>>,
    pub expiry_date: Option<DateTime<Utc>>,
}

/// One (batch, amount) slice taken by the FIFO allocator.
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct BatchTake {
    pub batch_id: String,
    pub batch_number: String,
    pub amount: i64,
}
