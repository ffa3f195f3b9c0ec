use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use rentora_shared::types::AuditFields;

use super::enums::{DamageSeverity, RentalStatus, ReturnEventType};

/// Tracks one rental transaction from checkout through completion:
/// current status, expected return date, and accumulated fees.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RentalLifecycle {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub current_status: RentalStatus,
    pub last_status_change: DateTime<Utc>,
    pub expected_return_date: Option<NaiveDate>,
    pub total_returned_quantity: Decimal,
    pub total_late_fees: Decimal,
    pub total_damage_fees: Decimal,
    pub total_other_fees: Decimal,
    pub notes: Option<String>,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub audit: AuditFields,
}

impl RentalLifecycle {
    pub fn new(
        transaction_id: Uuid,
        expected_return_date: Option<NaiveDate>,
        created_by: Uuid,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            transaction_id,
            current_status: RentalStatus::RentalInprogress,
            last_status_change: Utc::now(),
            expected_return_date,
            total_returned_quantity: Decimal::ZERO,
            total_late_fees: Decimal::ZERO,
            total_damage_fees: Decimal::ZERO,
            total_other_fees: Decimal::ZERO,
            notes: None,
            audit: AuditFields::new(created_by),
        }
    }

    pub fn update_status(&mut self, new_status: RentalStatus, actor: Uuid) {
        if self.current_status != new_status {
            self.current_status = new_status;
            self.last_status_change = Utc::now();
        }
        self.audit.touch(actor);
    }

    pub fn add_fees(
        &mut self,
        late_fees: Decimal,
        damage_fees: Decimal,
        other_fees: Decimal,
        actor: Uuid,
    ) {
        self.total_late_fees += late_fees;
        self.total_damage_fees += damage_fees;
        self.total_other_fees += other_fees;
        self.audit.touch(actor);
    }

    pub fn total_fees(&self) -> Decimal {
        self.total_late_fees + self.total_damage_fees + self.total_other_fees
    }
}

/// One processed return or extension against a rental.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RentalReturnEvent {
    pub id: Uuid,
    pub rental_lifecycle_id: Uuid,
    pub event_type: ReturnEventType,
    pub event_date: NaiveDate,
    pub items_returned: serde_json::Value,
    pub total_quantity_returned: Decimal,
    pub late_fees_charged: Decimal,
    pub damage_fees_charged: Decimal,
    pub other_fees_charged: Decimal,
    pub new_return_date: Option<NaiveDate>,
    pub extension_reason: Option<String>,
    pub notes: Option<String>,
    pub processed_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Inspection of one damage-detail group within a return event.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RentalItemInspection {
    pub id: Uuid,
    pub return_event_id: Uuid,
    pub transaction_line_id: Uuid,
    pub quantity_inspected: Decimal,
    pub condition: String,
    pub damage_type: Option<String>,
    pub damage_severity: Option<DamageSeverity>,
    pub damage_description: Option<String>,
    pub estimated_repair_cost: Option<Decimal>,
    pub repair_feasible: bool,
    pub inspected_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Log row for every rental-status change at header or line scope.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RentalStatusLog {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub transaction_line_id: Option<Uuid>,
    pub rental_lifecycle_id: Option<Uuid>,
    pub old_status: Option<RentalStatus>,
    pub new_status: RentalStatus,
    pub change_reason: String,
    pub changed_by: Option<Uuid>,
    pub changed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_fee_accumulation() {
        let mut lifecycle = RentalLifecycle::new(Uuid::new_v4(), None, Uuid::new_v4());
        let actor = Uuid::new_v4();

        lifecycle.add_fees(dec!(15.00), dec!(40.00), dec!(0), actor);
        lifecycle.add_fees(dec!(5.00), dec!(0), dec!(12.50), actor);

        assert_eq!(lifecycle.total_late_fees, dec!(20.00));
        assert_eq!(lifecycle.total_damage_fees, dec!(40.00));
        assert_eq!(lifecycle.total_other_fees, dec!(12.50));
        assert_eq!(lifecycle.total_fees(), dec!(72.50));
    }

    #[test]
    fn test_status_change_stamps_timestamp() {
        let mut lifecycle = RentalLifecycle::new(Uuid::new_v4(), None, Uuid::new_v4());
        let before = lifecycle.last_status_change;

        lifecycle.update_status(RentalStatus::RentalPartialReturn, Uuid::new_v4());
        assert_eq!(lifecycle.current_status, RentalStatus::RentalPartialReturn);
        assert!(lifecycle.last_status_change >= before);
    }
}
