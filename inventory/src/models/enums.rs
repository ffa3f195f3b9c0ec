use serde::{Deserialize, Serialize};

/// Types of stock movements recorded in the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StockMovementType {
    Purchase,
    Sale,
    RentalOut,
    RentalReturn,
    RentalReturnDamaged,
    RentalReturnMixed,
    AdjustmentPositive,
    AdjustmentNegative,
    TransferIn,
    TransferOut,
    Reservation,
    ReservationRelease,
}

/// Lifecycle status of an individual serialized unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InventoryUnitStatus {
    Available,
    Reserved,
    Rented,
    UnderRepair,
    Damaged,
    BeyondRepair,
    Sold,
    Lost,
}

/// Physical condition of a unit, independent of its lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InventoryUnitCondition {
    Excellent,
    Good,
    Fair,
    Poor,
    Damaged,
}

/// Derived stock position of a (item, location) level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StockStatus {
    InStock,
    LowStock,
    OutOfStock,
    Overstocked,
}

/// Kind of physical site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LocationType {
    Store,
    Warehouse,
    ServiceCenter,
}

/// Alert categories surfaced by the inventory service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    LowStock,
    MaintenanceDue,
    WarrantyExpiring,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_movement_type_serializes_to_stable_name() {
        let serialized = serde_json::to_string(&StockMovementType::RentalReturnMixed).unwrap();
        assert_eq!(serialized, "\"RENTAL_RETURN_MIXED\"");
    }

    #[test]
    fn test_unit_status_round_trip() {
        let status: InventoryUnitStatus = serde_json::from_str("\"BEYOND_REPAIR\"").unwrap();
        assert_eq!(status, InventoryUnitStatus::BeyondRepair);
    }
}
