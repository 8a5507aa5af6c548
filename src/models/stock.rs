// src/models/stock.rs - Ledger operation inputs
use serde::Deserialize;
use validator::Validate;

use super::batch::BatchReceipt;
use super::location::Locator;

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct ReceiveStockRequest {
    pub product_id: String,
    #[validate(length(min = 1, max = 64, message = "Warehouse must be between 1 and 64 characters"))]
    pub warehouse: Option<String>,
    #[validate(length(min = 1, max = 64, message = "Zone must be between 1 and 64 characters"))]
    pub zone: Option<String>,
    #[validate(length(max = 32, message = "Bin cannot exceed 32 characters"))]
    pub bin: Option<String>,
    pub quantity: i64,
    #[validate(nested)]
    pub batch: Option<BatchReceipt>,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct SellStockRequest {
    pub product_id: String,
    pub quantity: i64,
    #[validate(length(min = 1, max = 64, message = "Warehouse must be between 1 and 64 characters"))]
    pub warehouse: Option<String>,
    #[validate(length(min = 1, max = 64, message = "Zone must be between 1 and 64 characters"))]
    pub zone: Option<String>,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct TransferStockRequest {
    pub product_id: String,
    #[validate(nested)]
    pub from: Locator,
    #[validate(nested)]
    pub to: Locator,
    pub quantity: i64,
}
