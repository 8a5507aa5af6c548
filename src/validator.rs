// src/validator.rs - Field-level validation helpers
use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{EngineError, EngineResult};

lazy_static! {
    // Warehouse codes like "WH-01", zones like "A1" or "COLD-STORE"
    static ref WAREHOUSE_REGEX: Regex = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]{0,63}$").unwrap();
    static ref ZONE_REGEX: Regex = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]{0,63}$").unwrap();
}

pub fn validate_warehouse_code(code: &str) -> EngineResult<()> {
    if !WAREHOUSE_REGEX.is_match(code) {
        return Err(EngineError::validation(format!(
            "Invalid warehouse code '{}'",
            code
        )));
    }
    Ok(())
}

pub fn validate_zone_code(code: &str) -> EngineResult<()> {
    if !ZONE_REGEX.is_match(code) {
        return Err(EngineError::validation(format!("Invalid zone code '{}'", code)));
    }
    Ok(())
}

pub fn validate_positive_quantity(quantity: i64) -> EngineResult<()> {
    if quantity <= 0 {
        return Err(EngineError::non_positive_quantity(quantity));
    }
    if quantity > 1_000_000_000 {
        return Err(EngineError::validation("Quantity too large"));
    }
    Ok(())
}
