use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::StockMovementType;
use super::stock_level::{MovementDraft, StockLevel};

/// Immutable ledger entry. Inserted inside the same database transaction
/// as the stock-level mutation it records, never updated or deleted by
/// business code.
///
/// `quantity_before`/`quantity_after` snapshot the available bucket;
/// `on_hand_before`/`on_hand_after` snapshot on-hand.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StockMovement {
    pub id: Uuid,
    pub stock_level_id: Uuid,
    pub item_id: Uuid,
    pub location_id: Uuid,
    pub movement_type: StockMovementType,
    pub quantity_change: Decimal,
    pub quantity_before: Decimal,
    pub quantity_after: Decimal,
    pub on_hand_before: Decimal,
    pub on_hand_after: Decimal,
    pub transaction_header_id: Option<Uuid>,
    pub transaction_line_id: Option<Uuid>,
    pub unit_cost: Option<Decimal>,
    pub reason: String,
    pub notes: Option<String>,
    /// Correlation id shared by the two sides of a transfer.
    pub correlation_id: Option<Uuid>,
    /// Null while an approval-requiring adjustment is pending.
    pub approved_by: Option<Uuid>,
    pub performed_by: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Builder-style construction of a movement from an aggregate draft.
#[derive(Debug, Clone)]
pub struct NewMovement {
    pub draft: MovementDraft,
    pub reason: String,
    pub notes: Option<String>,
    pub transaction_header_id: Option<Uuid>,
    pub transaction_line_id: Option<Uuid>,
    pub unit_cost: Option<Decimal>,
    pub correlation_id: Option<Uuid>,
    pub approved_by: Option<Uuid>,
    pub performed_by: Uuid,
}

impl NewMovement {
    pub fn new(draft: MovementDraft, reason: impl Into<String>, performed_by: Uuid) -> Self {
        Self {
            draft,
            reason: reason.into(),
            notes: None,
            transaction_header_id: None,
            transaction_line_id: None,
            unit_cost: None,
            correlation_id: None,
            approved_by: Some(performed_by),
            performed_by,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_transaction(mut self, header_id: Uuid, line_id: Option<Uuid>) -> Self {
        self.transaction_header_id = Some(header_id);
        self.transaction_line_id = line_id;
        self
    }

    pub fn with_unit_cost(mut self, unit_cost: Decimal) -> Self {
        self.unit_cost = Some(unit_cost);
        self
    }

    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Leave the movement unapproved; reporting treats it as pending.
    pub fn pending_approval(mut self) -> Self {
        self.approved_by = None;
        self
    }

    pub fn into_movement(self, level: &StockLevel) -> StockMovement {
        StockMovement {
            id: Uuid::new_v4(),
            stock_level_id: level.id,
            item_id: level.item_id,
            location_id: level.location_id,
            movement_type: self.draft.movement_type,
            quantity_change: self.draft.quantity_change,
            quantity_before: self.draft.quantity_before,
            quantity_after: self.draft.quantity_after,
            on_hand_before: self.draft.on_hand_before,
            on_hand_after: self.draft.on_hand_after,
            transaction_header_id: self.transaction_header_id,
            transaction_line_id: self.transaction_line_id,
            unit_cost: self.unit_cost,
            reason: self.reason,
            notes: self.notes,
            correlation_id: self.correlation_id,
            approved_by: self.approved_by,
            performed_by: self.performed_by,
            created_at: Utc::now(),
        }
    }
}

/// Ledger query filter.
#[derive(Debug, Clone, Default)]
pub struct MovementFilter {
    pub item_id: Option<Uuid>,
    pub location_id: Option<Uuid>,
    pub stock_level_id: Option<Uuid>,
    pub movement_type: Option<StockMovementType>,
    pub transaction_header_id: Option<Uuid>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub limit: i64,
}

impl MovementFilter {
    pub fn for_item(item_id: Uuid) -> Self {
        Self {
            item_id: Some(item_id),
            limit: 100,
            ..Default::default()
        }
    }
}

/// Sum of signed quantity changes for one movement type over a window.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MovementSummaryRow {
    pub movement_type: StockMovementType,
    pub movement_count: i64,
    pub total_change: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_into_movement_copies_draft_and_level_refs() {
        let mut level = StockLevel::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let draft = level.adjust(dec!(10), true).unwrap();
        let actor = Uuid::new_v4();

        let movement = NewMovement::new(draft, "Initial stock setup", actor)
            .with_unit_cost(dec!(25.00))
            .into_movement(&level);

        assert_eq!(movement.stock_level_id, level.id);
        assert_eq!(movement.item_id, level.item_id);
        assert_eq!(movement.movement_type, StockMovementType::AdjustmentPositive);
        assert_eq!(movement.quantity_change, dec!(10));
        assert_eq!(movement.quantity_before, dec!(0));
        assert_eq!(movement.quantity_after, dec!(10));
        assert_eq!(movement.unit_cost, Some(dec!(25.00)));
        assert_eq!(movement.approved_by, Some(actor));
        // Chain property within the draft itself
        assert_eq!(
            movement.quantity_after,
            movement.quantity_before + movement.quantity_change
        );
    }

    #[test]
    fn test_pending_approval_clears_approver() {
        let mut level = StockLevel::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let draft = level.adjust(dec!(5), true).unwrap();

        let movement = NewMovement::new(draft, "Cycle count correction", Uuid::new_v4())
            .pending_approval()
            .into_movement(&level);

        assert!(movement.approved_by.is_none());
    }
}
