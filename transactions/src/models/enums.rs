use serde::{Deserialize, Serialize};

/// Business event type of a transaction header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Purchase,
    Sale,
    Rental,
    Return,
    Adjustment,
    Transfer,
}

impl TransactionType {
    /// Prefix used in transaction numbers (`PUR-2024-00001`).
    pub fn prefix(&self) -> &'static str {
        match self {
            TransactionType::Purchase => "PUR",
            TransactionType::Sale => "SAL",
            TransactionType::Rental => "RNT",
            TransactionType::Return => "RET",
            TransactionType::Adjustment => "ADJ",
            TransactionType::Transfer => "TRF",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Processing,
    InProgress,
    Completed,
    Cancelled,
    OnHold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Partial,
    Paid,
    Refunded,
    Failed,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Refunded | PaymentStatus::Failed)
    }
}

/// Rental progress for a header or line. Variant names are chosen so the
/// stable string forms match the wire names exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RentalStatus {
    RentalInprogress,
    RentalExtended,
    RentalPartialReturn,
    RentalLate,
    RentalLatePartialReturn,
    RentalCompleted,
}

impl RentalStatus {
    pub fn is_late(&self) -> bool {
        matches!(
            self,
            RentalStatus::RentalLate | RentalStatus::RentalLatePartialReturn
        )
    }

    pub fn is_partial(&self) -> bool {
        matches!(
            self,
            RentalStatus::RentalPartialReturn | RentalStatus::RentalLatePartialReturn
        )
    }
}

/// Audit-event categories on a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventCategory {
    General,
    Inventory,
    Payment,
    Error,
}

/// Kinds of rental lifecycle events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReturnEventType {
    Return,
    Extension,
    StatusChange,
}

/// Damage severity recorded during return inspection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DamageSeverity {
    Minor,
    Moderate,
    Severe,
    BeyondRepair,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_prefixes() {
        assert_eq!(TransactionType::Purchase.prefix(), "PUR");
        assert_eq!(TransactionType::Transfer.prefix(), "TRF");
    }

    #[test]
    fn test_rental_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&RentalStatus::RentalInprogress).unwrap(),
            "\"RENTAL_INPROGRESS\""
        );
        assert_eq!(
            serde_json::to_string(&RentalStatus::RentalLatePartialReturn).unwrap(),
            "\"RENTAL_LATE_PARTIAL_RETURN\""
        );
    }

    #[test]
    fn test_payment_terminal_states() {
        assert!(PaymentStatus::Refunded.is_terminal());
        assert!(PaymentStatus::Failed.is_terminal());
        assert!(!PaymentStatus::Partial.is_terminal());
    }
}
