// src/error.rs - Engine error taxonomy
use std::fmt;

#[derive(Debug)]
pub enum EngineError {
    ValidationError(String),
    NotFound(String),
    InsufficientStock { available: i64, requested: i64 },
    InvalidState(String),
    Authorization(String),
    LocationMismatch(String),
    DatabaseError(sqlx::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EngineError::ValidationError(msg) => write!(f, "Validation Error: {}", msg),
            EngineError::NotFound(msg) => write!(f, "Not Found: {}", msg),
            EngineError::InsufficientStock { available, requested } => {
                write!(f, "Insufficient stock. Available: {}, Requested: {}", available, requested)
            }
            EngineError::InvalidState(msg) => write!(f, "Invalid State: {}", msg),
            EngineError::Authorization(msg) => write!(f, "Authorization Error: {}", msg),
            EngineError::LocationMismatch(msg) => write!(f, "Location Mismatch: {}", msg),
            EngineError::DatabaseError(err) => write!(f, "Database Error: {}", err),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::DatabaseError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        EngineError::DatabaseError(err)
    }
}

impl From<validator::ValidationErrors> for EngineError {
    fn from(err: validator::ValidationErrors) -> Self {
        EngineError::ValidationError(err.to_string())
    }
}

impl EngineError {
    pub fn not_found(entity: &str) -> Self {
        EngineError::NotFound(format!("{} not found", entity))
    }

    pub fn product_not_found(id: &str) -> Self {
        EngineError::NotFound(format!("Product with ID '{}' not found", id))
    }

    pub fn location_not_found(warehouse: &str, zone: &str) -> Self {
        EngineError::NotFound(format!("No stock record for location '{}/{}'", warehouse, zone))
    }

    pub fn insufficient_stock(available: i64, requested: i64) -> Self {
        EngineError::InsufficientStock { available, requested }
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        EngineError::InvalidState(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        EngineError::ValidationError(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        EngineError::Authorization(msg.into())
    }

    pub fn admin_required(action: &str) -> Self {
        EngineError::Authorization(format!("Administrator role required to {}", action))
    }

    pub fn zone_without_warehouse() -> Self {
        EngineError::LocationMismatch("Zone given without a warehouse".to_string())
    }

    pub fn incomplete_location() -> Self {
        EngineError::LocationMismatch("A location requires both warehouse and zone".to_string())
    }

    pub fn batch_requires_location() -> Self {
        EngineError::LocationMismatch("Batch details require a warehouse and zone".to_string())
    }

    pub fn batch_already_exists(batch_number: &str) -> Self {
        EngineError::ValidationError(format!(
            "Batch '{}' already exists at this location",
            batch_number
        ))
    }

    pub fn non_positive_quantity(quantity: i64) -> Self {
        EngineError::ValidationError(format!("Quantity must be positive, got {}", quantity))
    }
}
