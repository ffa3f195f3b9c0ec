// ============================================================================
// RENTORA - INVENTORY UNIT STATE MACHINE
// ============================================================================
// Module: inventory/src/models/inventory_unit.rs
// Description: Individual serialized asset with status/condition lifecycle
// ============================================================================

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use rentora_shared::error::{Error, Result};
use rentora_shared::types::AuditFields;

use super::enums::{InventoryUnitCondition, InventoryUnitStatus};

/// Individual serialized physical asset.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct InventoryUnit {
    pub id: Uuid,
    pub item_id: Uuid,
    pub location_id: Uuid,
    pub sku: String,
    pub serial_number: Option<String>,
    pub batch_code: Option<String>,
    pub status: InventoryUnitStatus,
    pub condition: InventoryUnitCondition,
    pub purchase_date: DateTime<Utc>,
    pub purchase_price: Decimal,
    pub supplier_id: Option<Uuid>,
    pub purchase_order_number: Option<String>,
    pub warranty_expiry: Option<NaiveDate>,
    pub next_maintenance_date: Option<NaiveDate>,
    pub is_rental_blocked: bool,
    pub rental_block_reason: Option<String>,
    pub notes: Option<String>,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub audit: AuditFields,
}

/// Context accompanying a status transition.
#[derive(Debug, Clone)]
pub struct TransitionContext {
    pub actor: Uuid,
    pub reason: String,
    pub new_condition: Option<InventoryUnitCondition>,
    /// Required when moving DAMAGED back to AVAILABLE.
    pub repair_recorded: bool,
}

impl TransitionContext {
    pub fn new(actor: Uuid, reason: impl Into<String>) -> Self {
        Self {
            actor,
            reason: reason.into(),
            new_condition: None,
            repair_recorded: false,
        }
    }

    pub fn with_condition(mut self, condition: InventoryUnitCondition) -> Self {
        self.new_condition = Some(condition);
        self
    }

    pub fn with_repair_record(mut self) -> Self {
        self.repair_recorded = true;
        self
    }
}

/// Audit row describing one applied transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitTransition {
    pub unit_id: Uuid,
    pub old_status: InventoryUnitStatus,
    pub new_status: InventoryUnitStatus,
    pub old_condition: InventoryUnitCondition,
    pub new_condition: InventoryUnitCondition,
    pub reason: String,
    pub performed_by: Uuid,
    pub performed_at: DateTime<Utc>,
}

impl InventoryUnit {
    /// Allowed targets from a given status. BEYOND_REPAIR, SOLD, and LOST
    /// are terminal.
    pub fn allowed_transitions(status: InventoryUnitStatus) -> &'static [InventoryUnitStatus] {
        use InventoryUnitStatus::*;
        match status {
            Available => &[Reserved, Rented, Sold, UnderRepair, Damaged, Lost],
            Reserved => &[Available, Rented, Sold],
            Rented => &[Available, Damaged, BeyondRepair, Lost, UnderRepair],
            UnderRepair => &[Available, BeyondRepair],
            Damaged => &[UnderRepair, BeyondRepair, Available],
            BeyondRepair | Sold | Lost => &[],
        }
    }

    pub fn can_transition_to(&self, target: InventoryUnitStatus) -> bool {
        Self::allowed_transitions(self.status).contains(&target)
    }

    /// Apply a status transition, returning the audit record. Fails with
    /// `IllegalStateTransition` on a move the state machine forbids, and
    /// on DAMAGED -> AVAILABLE without a repair record.
    pub fn transition(
        &mut self,
        target: InventoryUnitStatus,
        ctx: &TransitionContext,
    ) -> Result<UnitTransition> {
        if !self.can_transition_to(target) {
            return Err(Error::IllegalStateTransition(format!(
                "Unit {} cannot move from {:?} to {:?}",
                self.id, self.status, target
            )));
        }
        if self.status == InventoryUnitStatus::Damaged
            && target == InventoryUnitStatus::Available
            && !ctx.repair_recorded
        {
            return Err(Error::IllegalStateTransition(format!(
                "Unit {} cannot return to AVAILABLE without a repair record",
                self.id
            )));
        }

        let old_status = self.status;
        let old_condition = self.condition;
        self.status = target;
        if let Some(condition) = ctx.new_condition {
            self.condition = condition;
        }
        self.audit.touch(ctx.actor);

        Ok(UnitTransition {
            unit_id: self.id,
            old_status,
            new_status: self.status,
            old_condition,
            new_condition: self.condition,
            reason: ctx.reason.clone(),
            performed_by: ctx.actor,
            performed_at: self.audit.updated_at,
        })
    }

    /// Rental eligibility: only unblocked AVAILABLE units may be checked
    /// out. Warranty and maintenance dates are informational and never
    /// block a transition.
    pub fn can_be_rented(&self) -> bool {
        self.status == InventoryUnitStatus::Available && !self.is_rental_blocked
    }

    pub fn is_terminal(&self) -> bool {
        Self::allowed_transitions(self.status).is_empty()
    }

    pub fn block_rental(&mut self, reason: impl Into<String>, actor: Uuid) {
        self.is_rental_blocked = true;
        self.rental_block_reason = Some(reason.into());
        self.audit.touch(actor);
    }

    pub fn unblock_rental(&mut self, actor: Uuid) {
        self.is_rental_blocked = false;
        self.rental_block_reason = None;
        self.audit.touch(actor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    fn unit_with_status(status: InventoryUnitStatus) -> InventoryUnit {
        InventoryUnit {
            id: Uuid::new_v4(),
            item_id: Uuid::new_v4(),
            location_id: Uuid::new_v4(),
            sku: "CAM-0001".to_string(),
            serial_number: Some("SN-0001".to_string()),
            batch_code: None,
            status,
            condition: InventoryUnitCondition::Good,
            purchase_date: Utc::now(),
            purchase_price: dec!(100.00),
            supplier_id: None,
            purchase_order_number: None,
            warranty_expiry: None,
            next_maintenance_date: None,
            is_rental_blocked: false,
            rental_block_reason: None,
            notes: None,
            audit: AuditFields::new(Uuid::new_v4()),
        }
    }

    #[rstest]
    #[case(InventoryUnitStatus::Available, InventoryUnitStatus::Rented, true)]
    #[case(InventoryUnitStatus::Available, InventoryUnitStatus::BeyondRepair, false)]
    #[case(InventoryUnitStatus::Reserved, InventoryUnitStatus::Sold, true)]
    #[case(InventoryUnitStatus::Rented, InventoryUnitStatus::Lost, true)]
    #[case(InventoryUnitStatus::Rented, InventoryUnitStatus::Reserved, false)]
    #[case(InventoryUnitStatus::UnderRepair, InventoryUnitStatus::Available, true)]
    #[case(InventoryUnitStatus::Sold, InventoryUnitStatus::Available, false)]
    #[case(InventoryUnitStatus::Lost, InventoryUnitStatus::Available, false)]
    #[case(InventoryUnitStatus::BeyondRepair, InventoryUnitStatus::UnderRepair, false)]
    fn test_transition_table(
        #[case] from: InventoryUnitStatus,
        #[case] to: InventoryUnitStatus,
        #[case] allowed: bool,
    ) {
        let unit = unit_with_status(from);
        assert_eq!(unit.can_transition_to(to), allowed);
    }

    #[test]
    fn test_transition_records_old_and_new() {
        let mut unit = unit_with_status(InventoryUnitStatus::Rented);
        let actor = Uuid::new_v4();
        let ctx = TransitionContext::new(actor, "Rental return")
            .with_condition(InventoryUnitCondition::Damaged);

        let record = unit.transition(InventoryUnitStatus::Damaged, &ctx).unwrap();

        assert_eq!(record.old_status, InventoryUnitStatus::Rented);
        assert_eq!(record.new_status, InventoryUnitStatus::Damaged);
        assert_eq!(record.old_condition, InventoryUnitCondition::Good);
        assert_eq!(record.new_condition, InventoryUnitCondition::Damaged);
        assert_eq!(record.performed_by, actor);
        assert_eq!(unit.status, InventoryUnitStatus::Damaged);
        assert_eq!(unit.condition, InventoryUnitCondition::Damaged);
    }

    #[test]
    fn test_illegal_transition_rejected() {
        let mut unit = unit_with_status(InventoryUnitStatus::Sold);
        let ctx = TransitionContext::new(Uuid::new_v4(), "Undo sale");

        let err = unit
            .transition(InventoryUnitStatus::Available, &ctx)
            .unwrap_err();
        assert!(matches!(err, Error::IllegalStateTransition(_)));
        assert_eq!(unit.status, InventoryUnitStatus::Sold);
    }

    #[test]
    fn test_damaged_to_available_needs_repair_record() {
        let mut unit = unit_with_status(InventoryUnitStatus::Damaged);
        let actor = Uuid::new_v4();

        let bare = TransitionContext::new(actor, "Back to stock");
        assert!(unit
            .transition(InventoryUnitStatus::Available, &bare)
            .is_err());

        let repaired = TransitionContext::new(actor, "Repair completed")
            .with_condition(InventoryUnitCondition::Good)
            .with_repair_record();
        unit.transition(InventoryUnitStatus::Available, &repaired)
            .unwrap();
        assert_eq!(unit.status, InventoryUnitStatus::Available);
    }

    #[test]
    fn test_rental_eligibility() {
        let mut unit = unit_with_status(InventoryUnitStatus::Available);
        assert!(unit.can_be_rented());

        unit.block_rental("Awaiting inspection", Uuid::new_v4());
        assert!(!unit.can_be_rented());

        unit.unblock_rental(Uuid::new_v4());
        assert!(unit.can_be_rented());

        let rented = unit_with_status(InventoryUnitStatus::Rented);
        assert!(!rented.can_be_rented());
    }
}
