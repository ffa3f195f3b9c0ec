use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Insufficient stock at location {location_id}: requested {requested}, available {available}")]
    InsufficientStock {
        requested: Decimal,
        available: Decimal,
        location_id: Uuid,
    },

    #[error("Insufficient allocatable units for item {item_id} at location {location_id}: need {needed}, found {found}")]
    InsufficientUnits {
        item_id: Uuid,
        location_id: Uuid,
        needed: i64,
        found: i64,
    },

    #[error("Illegal state transition: {0}")]
    IllegalStateTransition(String),

    #[error("Inventory consistency violation: {0}")]
    InventoryConsistency(String),

    #[error("SKU sequence {0} is inactive")]
    InactiveSequence(Uuid),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Configuration(#[from] config::ConfigError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Stable machine-readable code for callers that map errors across a
    /// process boundary.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Conflict(_) => "CONFLICT",
            Error::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            Error::InsufficientUnits { .. } => "INSUFFICIENT_UNITS",
            Error::IllegalStateTransition(_) => "ILLEGAL_STATE_TRANSITION",
            Error::InventoryConsistency(_) => "INVENTORY_CONSISTENCY",
            Error::InactiveSequence(_) => "INACTIVE_SEQUENCE",
            Error::Database(_) => "DATABASE_ERROR",
            Error::Serialization(_) => "SERIALIZATION_ERROR",
            Error::Configuration(_) => "CONFIGURATION_ERROR",
        }
    }

    /// Whether the underlying database error is a unique-constraint
    /// violation. First-creator races on sequences and stock levels are
    /// retried exactly once when this returns true.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Error::Database(sqlx::Error::Database(db)) => {
                db.code().as_deref() == Some("23505")
            }
            _ => false,
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Error::Conflict(msg.into())
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(errors: validator::ValidationErrors) -> Self {
        Error::Validation(errors.to_string())
    }
}
