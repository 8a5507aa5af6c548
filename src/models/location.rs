// src/models/location.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Per-location stock record, keyed by (product, warehouse, zone).
/// available = quantity - reserved_quantity, never negative.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct LocationStock {
    pub id: String,
    pub product_id: String,
    pub warehouse: String,
    pub zone: String,
    pub quantity: i64,
    pub reserved_quantity: i64,
    pub bin: Option<String>,
    pub last_audited_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LocationStock {
    pub fn available(&self) -> i64 {
        self.quantity - self.reserved_quantity
    }
}

/// A fully-qualified stock location. Zone codes only make sense inside a
/// warehouse, so both parts are required.
#[derive(Debug, Serialize, Deserialize, Validate, Clone, PartialEq, Eq)]
pub struct Locator {
    #[validate(length(min = 1, max = 64, message = "Warehouse must be between 1 and 64 characters"))]
    pub warehouse: String,
    #[validate(length(min = 1, max = 64, message = "Zone must be between 1 and 64 characters"))]
    pub zone: String,
}

impl Locator {
    pub fn new(warehouse: impl Into<String>, zone: impl Into<String>) -> Self {
        Self {
            warehouse: warehouse.into(),
            zone: zone.into(),
        }
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.warehouse, self.zone)
    }
}
