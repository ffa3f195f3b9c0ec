// ============================================================================
// RENTORA - STOCK LEVEL AGGREGATE
// ============================================================================
// Module: inventory/src/models/stock_level.rs
// Description: Per-(item, location) bucketed quantities with transition
//              methods; every mutation yields a movement draft for the ledger
// ============================================================================

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use rentora_shared::error::{Error, Result};
use rentora_shared::money::{round_money, weighted_average_cost};
use rentora_shared::types::AuditFields;

use super::enums::{StockMovementType, StockStatus};

/// Per-(item, location) stock aggregate.
///
/// Invariant held after every committed mutation:
/// `on_hand = available + reserved + on_rent + damaged + under_repair + beyond_repair`
/// with every bucket non-negative.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StockLevel {
    pub id: Uuid,
    pub item_id: Uuid,
    pub location_id: Uuid,
    pub quantity_on_hand: Decimal,
    pub quantity_available: Decimal,
    pub quantity_reserved: Decimal,
    pub quantity_on_rent: Decimal,
    pub quantity_damaged: Decimal,
    pub quantity_under_repair: Decimal,
    pub quantity_beyond_repair: Decimal,
    pub average_cost: Decimal,
    pub total_value: Decimal,
    pub reorder_point: Option<Decimal>,
    pub maximum_stock: Option<Decimal>,
    pub stock_status: StockStatus,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub audit: AuditFields,
}

/// Ledger entry produced by a stock-level mutation, not yet persisted.
///
/// `quantity_before`/`quantity_after` snapshot the available bucket;
/// `on_hand_before`/`on_hand_after` snapshot on-hand in the same mutation
/// so write-downs (lost items, non-available adjustments) stay auditable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovementDraft {
    pub movement_type: StockMovementType,
    pub quantity_change: Decimal,
    pub quantity_before: Decimal,
    pub quantity_after: Decimal,
    pub on_hand_before: Decimal,
    pub on_hand_after: Decimal,
}

/// Bucket split of a rental return. `good` is derived: it is whatever part
/// of the total is not damaged, beyond repair, or lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReturnSplit {
    pub quantity: Decimal,
    pub damaged: Decimal,
    pub beyond_repair: Decimal,
    pub lost: Decimal,
}

impl ReturnSplit {
    pub fn good_only(quantity: Decimal) -> Self {
        Self {
            quantity,
            damaged: Decimal::ZERO,
            beyond_repair: Decimal::ZERO,
            lost: Decimal::ZERO,
        }
    }

    pub fn good(&self) -> Decimal {
        self.quantity - self.damaged - self.beyond_repair - self.lost
    }
}

impl StockLevel {
    pub fn new(item_id: Uuid, location_id: Uuid, created_by: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            item_id,
            location_id,
            quantity_on_hand: Decimal::ZERO,
            quantity_available: Decimal::ZERO,
            quantity_reserved: Decimal::ZERO,
            quantity_on_rent: Decimal::ZERO,
            quantity_damaged: Decimal::ZERO,
            quantity_under_repair: Decimal::ZERO,
            quantity_beyond_repair: Decimal::ZERO,
            average_cost: Decimal::ZERO,
            total_value: Decimal::ZERO,
            reorder_point: None,
            maximum_stock: None,
            stock_status: StockStatus::OutOfStock,
            audit: AuditFields::new(created_by),
        }
    }

    // ========================================================================
    // MUTATING METHODS
    // ========================================================================

    /// Manual adjustment. When `affect_available` the delta moves through
    /// the available bucket; otherwise it moves through the damaged bucket
    /// (damaged receipts and write-offs), keeping the bucket-sum invariant.
    pub fn adjust(&mut self, delta: Decimal, affect_available: bool) -> Result<MovementDraft> {
        if delta.is_zero() {
            return Err(Error::validation("Adjustment quantity must be non-zero"));
        }
        if self.quantity_on_hand + delta < Decimal::ZERO {
            return Err(Error::InventoryConsistency(format!(
                "Adjustment of {delta} would make on-hand quantity negative"
            )));
        }

        let before = self.snapshot();
        if affect_available {
            if self.quantity_available + delta < Decimal::ZERO {
                return Err(Error::InventoryConsistency(format!(
                    "Adjustment of {delta} would make available quantity negative"
                )));
            }
            self.quantity_available += delta;
        } else {
            if self.quantity_damaged + delta < Decimal::ZERO {
                return Err(Error::InventoryConsistency(format!(
                    "Adjustment of {delta} would make damaged quantity negative"
                )));
            }
            self.quantity_damaged += delta;
        }
        self.quantity_on_hand += delta;

        let movement_type = if delta > Decimal::ZERO {
            StockMovementType::AdjustmentPositive
        } else {
            StockMovementType::AdjustmentNegative
        };
        Ok(self.finish(movement_type, before))
    }

    /// Move quantity from available to reserved.
    pub fn reserve(&mut self, quantity: Decimal) -> Result<MovementDraft> {
        self.require_positive(quantity)?;
        self.require_available(quantity)?;

        let before = self.snapshot();
        self.quantity_available -= quantity;
        self.quantity_reserved += quantity;
        Ok(self.finish(StockMovementType::Reservation, before))
    }

    /// Release reserved quantity back to available.
    pub fn release_reservation(&mut self, quantity: Decimal) -> Result<MovementDraft> {
        self.require_positive(quantity)?;
        if self.quantity_reserved < quantity {
            return Err(Error::InventoryConsistency(format!(
                "Cannot release {quantity}: only {} reserved",
                self.quantity_reserved
            )));
        }

        let before = self.snapshot();
        self.quantity_reserved -= quantity;
        self.quantity_available += quantity;
        Ok(self.finish(StockMovementType::ReservationRelease, before))
    }

    /// Rental checkout: available -> on rent.
    pub fn rent_out(&mut self, quantity: Decimal) -> Result<MovementDraft> {
        self.require_positive(quantity)?;
        self.require_available(quantity)?;

        let before = self.snapshot();
        self.quantity_available -= quantity;
        self.quantity_on_rent += quantity;
        Ok(self.finish(StockMovementType::RentalOut, before))
    }

    /// Rental return with a mixed-condition bucket split.
    ///
    /// Only the good portion re-enters available; damaged and
    /// beyond-repair quantities route to their own buckets and lost
    /// quantity leaves on-hand entirely.
    pub fn return_from_rent(&mut self, split: ReturnSplit) -> Result<MovementDraft> {
        self.require_positive(split.quantity)?;
        if split.damaged < Decimal::ZERO
            || split.beyond_repair < Decimal::ZERO
            || split.lost < Decimal::ZERO
        {
            return Err(Error::validation("Return buckets must be non-negative"));
        }
        let good = split.good();
        if good < Decimal::ZERO {
            return Err(Error::validation(format!(
                "Return buckets ({} damaged, {} beyond repair, {} lost) exceed total return quantity {}",
                split.damaged, split.beyond_repair, split.lost, split.quantity
            )));
        }
        if self.quantity_on_rent < split.quantity {
            return Err(Error::InventoryConsistency(format!(
                "Cannot return {}: only {} on rent",
                split.quantity, self.quantity_on_rent
            )));
        }

        let before = self.snapshot();
        self.quantity_on_rent -= split.quantity;
        self.quantity_available += good;
        self.quantity_damaged += split.damaged;
        self.quantity_beyond_repair += split.beyond_repair;
        self.quantity_on_hand -= split.lost;

        let movement_type = if split.damaged.is_zero()
            && split.beyond_repair.is_zero()
            && split.lost.is_zero()
        {
            StockMovementType::RentalReturn
        } else if good.is_zero() && split.lost.is_zero() {
            StockMovementType::RentalReturnDamaged
        } else {
            StockMovementType::RentalReturnMixed
        };
        Ok(self.finish(movement_type, before))
    }

    /// Sale consumption: stock leaves available and on-hand in one step.
    pub fn sell(&mut self, quantity: Decimal) -> Result<MovementDraft> {
        self.require_positive(quantity)?;
        self.require_available(quantity)?;

        let before = self.snapshot();
        self.quantity_available -= quantity;
        self.quantity_on_hand -= quantity;
        Ok(self.finish(StockMovementType::Sale, before))
    }

    /// Outbound side of a transfer.
    pub fn transfer_out(&mut self, quantity: Decimal) -> Result<MovementDraft> {
        self.require_positive(quantity)?;
        self.require_available(quantity)?;

        let before = self.snapshot();
        self.quantity_available -= quantity;
        self.quantity_on_hand -= quantity;
        Ok(self.finish(StockMovementType::TransferOut, before))
    }

    /// Inbound side of a transfer.
    pub fn transfer_in(&mut self, quantity: Decimal) -> Result<MovementDraft> {
        self.require_positive(quantity)?;

        let before = self.snapshot();
        self.quantity_available += quantity;
        self.quantity_on_hand += quantity;
        Ok(self.finish(StockMovementType::TransferIn, before))
    }

    /// Blend a received lot into the carried average cost. Cost metadata
    /// only; emits no movement.
    pub fn update_average_cost(&mut self, new_qty: Decimal, new_cost: Decimal) {
        // Average is blended against the pre-receipt pool, so this runs
        // after the receipt adjustment with the pool excluding the new lot.
        let prior_on_hand = self.quantity_on_hand - new_qty;
        self.average_cost =
            weighted_average_cost(self.average_cost, prior_on_hand, new_cost, new_qty);
        self.total_value = round_money(self.average_cost * self.quantity_on_hand);
    }

    // ========================================================================
    // DERIVED QUERIES
    // ========================================================================

    pub fn can_fulfill_order(&self, quantity: Decimal) -> bool {
        quantity > Decimal::ZERO && self.quantity_available >= quantity
    }

    pub fn is_low_stock(&self) -> bool {
        match self.reorder_point {
            Some(reorder_point) => self.quantity_available <= reorder_point,
            None => false,
        }
    }

    /// Share of on-hand stock currently out on rent, as a percentage.
    pub fn utilization_rate(&self) -> Decimal {
        if self.quantity_on_hand.is_zero() {
            return Decimal::ZERO;
        }
        self.quantity_on_rent * Decimal::ONE_HUNDRED / self.quantity_on_hand
    }

    /// Share of on-hand stock currently available, as a percentage.
    pub fn availability_rate(&self) -> Decimal {
        if self.quantity_on_hand.is_zero() {
            return Decimal::ZERO;
        }
        self.quantity_available * Decimal::ONE_HUNDRED / self.quantity_on_hand
    }

    pub fn derived_status(&self) -> StockStatus {
        if self.quantity_on_hand.is_zero() {
            StockStatus::OutOfStock
        } else if self.is_low_stock() {
            StockStatus::LowStock
        } else if matches!(self.maximum_stock, Some(max) if self.quantity_on_hand > max) {
            StockStatus::Overstocked
        } else {
            StockStatus::InStock
        }
    }

    /// Verify the bucket-sum invariant and non-negativity. Services call
    /// this before persisting a mutated aggregate.
    pub fn check_invariants(&self) -> Result<()> {
        let buckets = [
            self.quantity_available,
            self.quantity_reserved,
            self.quantity_on_rent,
            self.quantity_damaged,
            self.quantity_under_repair,
            self.quantity_beyond_repair,
        ];
        if buckets.iter().any(|b| *b < Decimal::ZERO) || self.quantity_on_hand < Decimal::ZERO {
            return Err(Error::InventoryConsistency(format!(
                "Negative bucket on stock level {}",
                self.id
            )));
        }
        let sum: Decimal = buckets.iter().copied().sum();
        if sum != self.quantity_on_hand {
            return Err(Error::InventoryConsistency(format!(
                "Bucket sum {} does not match on-hand {} on stock level {}",
                sum, self.quantity_on_hand, self.id
            )));
        }
        Ok(())
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    fn require_positive(&self, quantity: Decimal) -> Result<()> {
        if quantity <= Decimal::ZERO {
            return Err(Error::validation("Quantity must be positive"));
        }
        Ok(())
    }

    fn require_available(&self, quantity: Decimal) -> Result<()> {
        if self.quantity_available < quantity {
            return Err(Error::InsufficientStock {
                requested: quantity,
                available: self.quantity_available,
                location_id: self.location_id,
            });
        }
        Ok(())
    }

    fn snapshot(&self) -> (Decimal, Decimal) {
        (self.quantity_available, self.quantity_on_hand)
    }

    fn finish(
        &mut self,
        movement_type: StockMovementType,
        (available_before, on_hand_before): (Decimal, Decimal),
    ) -> MovementDraft {
        self.stock_status = self.derived_status();
        MovementDraft {
            movement_type,
            quantity_change: self.quantity_available - available_before,
            quantity_before: available_before,
            quantity_after: self.quantity_available,
            on_hand_before,
            on_hand_after: self.quantity_on_hand,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn level_with_available(available: Decimal) -> StockLevel {
        let mut level = StockLevel::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        if !available.is_zero() {
            level.adjust(available, true).unwrap();
        }
        level
    }

    #[test]
    fn test_adjust_positive_updates_buckets_and_draft() {
        let mut level = StockLevel::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        let draft = level.adjust(dec!(10), true).unwrap();

        assert_eq!(level.quantity_on_hand, dec!(10));
        assert_eq!(level.quantity_available, dec!(10));
        assert_eq!(draft.movement_type, StockMovementType::AdjustmentPositive);
        assert_eq!(draft.quantity_change, dec!(10));
        assert_eq!(draft.quantity_before, dec!(0));
        assert_eq!(draft.quantity_after, dec!(10));
        assert_eq!(level.stock_status, StockStatus::InStock);
        level.check_invariants().unwrap();
    }

    #[test]
    fn test_adjust_negative_below_zero_rejected() {
        let mut level = level_with_available(dec!(5));
        let err = level.adjust(dec!(-6), true).unwrap_err();
        assert!(matches!(err, Error::InventoryConsistency(_)));
        // Aggregate untouched on failure
        assert_eq!(level.quantity_on_hand, dec!(5));
    }

    #[test]
    fn test_adjust_then_reverse_is_noop_on_buckets() {
        let mut level = level_with_available(dec!(20));
        level.adjust(dec!(7), true).unwrap();
        level.adjust(dec!(-7), true).unwrap();
        assert_eq!(level.quantity_on_hand, dec!(20));
        assert_eq!(level.quantity_available, dec!(20));
    }

    #[test]
    fn test_non_available_adjustment_routes_through_damaged() {
        let mut level = level_with_available(dec!(10));
        level.adjust(dec!(3), false).unwrap();

        assert_eq!(level.quantity_on_hand, dec!(13));
        assert_eq!(level.quantity_available, dec!(10));
        assert_eq!(level.quantity_damaged, dec!(3));
        level.check_invariants().unwrap();

        // Write the damaged stock back off
        let draft = level.adjust(dec!(-3), false).unwrap();
        assert_eq!(draft.movement_type, StockMovementType::AdjustmentNegative);
        assert_eq!(draft.quantity_change, dec!(0));
        assert_eq!(draft.on_hand_before, dec!(13));
        assert_eq!(draft.on_hand_after, dec!(10));
    }

    #[test]
    fn test_reserve_and_release_round_trip() {
        let mut level = level_with_available(dec!(10));

        let reserve = level.reserve(dec!(4)).unwrap();
        assert_eq!(reserve.movement_type, StockMovementType::Reservation);
        assert_eq!(reserve.quantity_change, dec!(-4));
        assert_eq!(level.quantity_reserved, dec!(4));
        assert_eq!(level.quantity_available, dec!(6));

        let release = level.release_reservation(dec!(4)).unwrap();
        assert_eq!(release.movement_type, StockMovementType::ReservationRelease);
        assert_eq!(level.quantity_reserved, dec!(0));
        assert_eq!(level.quantity_available, dec!(10));
        level.check_invariants().unwrap();
    }

    #[test]
    fn test_reserve_more_than_available_fails() {
        let mut level = level_with_available(dec!(3));
        let err = level.reserve(dec!(4)).unwrap_err();
        match err {
            Error::InsufficientStock {
                requested,
                available,
                ..
            } => {
                assert_eq!(requested, dec!(4));
                assert_eq!(available, dec!(3));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_rent_out_and_good_return_is_identity() {
        let mut level = level_with_available(dec!(10));

        level.rent_out(dec!(3)).unwrap();
        assert_eq!(level.quantity_available, dec!(7));
        assert_eq!(level.quantity_on_rent, dec!(3));

        let draft = level
            .return_from_rent(ReturnSplit::good_only(dec!(3)))
            .unwrap();
        assert_eq!(draft.movement_type, StockMovementType::RentalReturn);
        assert_eq!(draft.quantity_change, dec!(3));
        assert_eq!(level.quantity_available, dec!(10));
        assert_eq!(level.quantity_on_rent, dec!(0));
        assert_eq!(level.quantity_on_hand, dec!(10));
        level.check_invariants().unwrap();
    }

    #[test]
    fn test_rent_out_beyond_available_fails_without_mutation() {
        let mut level = level_with_available(dec!(3));
        assert!(level.rent_out(dec!(4)).is_err());
        assert_eq!(level.quantity_available, dec!(3));
        assert_eq!(level.quantity_on_rent, dec!(0));
    }

    #[test]
    fn test_mixed_return_routes_damaged_away_from_available() {
        let mut level = level_with_available(dec!(10));
        level.rent_out(dec!(3)).unwrap();

        let draft = level
            .return_from_rent(ReturnSplit {
                quantity: dec!(3),
                damaged: dec!(1),
                beyond_repair: dec!(0),
                lost: dec!(0),
            })
            .unwrap();

        assert_eq!(draft.movement_type, StockMovementType::RentalReturnMixed);
        assert_eq!(draft.quantity_change, dec!(2));
        assert_eq!(level.quantity_available, dec!(9));
        assert_eq!(level.quantity_damaged, dec!(1));
        assert_eq!(level.quantity_on_rent, dec!(0));
        assert_eq!(level.quantity_on_hand, dec!(10));
        level.check_invariants().unwrap();
    }

    #[test]
    fn test_all_damaged_return_never_inflates_available() {
        let mut level = level_with_available(dec!(5));
        level.rent_out(dec!(5)).unwrap();

        let draft = level
            .return_from_rent(ReturnSplit {
                quantity: dec!(5),
                damaged: dec!(5),
                beyond_repair: dec!(0),
                lost: dec!(0),
            })
            .unwrap();

        assert_eq!(draft.movement_type, StockMovementType::RentalReturnDamaged);
        assert_eq!(draft.quantity_change, dec!(0));
        assert_eq!(level.quantity_available, dec!(0));
        assert_eq!(level.quantity_damaged, dec!(5));
        assert_eq!(level.quantity_on_rent, dec!(0));
        level.check_invariants().unwrap();
    }

    #[test]
    fn test_lost_items_leave_on_hand() {
        let mut level = level_with_available(dec!(8));
        level.rent_out(dec!(4)).unwrap();

        let draft = level
            .return_from_rent(ReturnSplit {
                quantity: dec!(4),
                damaged: dec!(1),
                beyond_repair: dec!(1),
                lost: dec!(1),
            })
            .unwrap();

        assert_eq!(draft.movement_type, StockMovementType::RentalReturnMixed);
        assert_eq!(level.quantity_available, dec!(5));
        assert_eq!(level.quantity_damaged, dec!(1));
        assert_eq!(level.quantity_beyond_repair, dec!(1));
        assert_eq!(level.quantity_on_hand, dec!(7));
        assert_eq!(draft.on_hand_before, dec!(8));
        assert_eq!(draft.on_hand_after, dec!(7));
        level.check_invariants().unwrap();
    }

    #[test]
    fn test_return_more_than_on_rent_fails() {
        let mut level = level_with_available(dec!(10));
        level.rent_out(dec!(2)).unwrap();

        let err = level
            .return_from_rent(ReturnSplit::good_only(dec!(3)))
            .unwrap_err();
        assert!(matches!(err, Error::InventoryConsistency(_)));
        assert_eq!(level.quantity_on_rent, dec!(2));
        assert_eq!(level.quantity_available, dec!(8));
    }

    #[test]
    fn test_return_bucket_overflow_rejected() {
        let mut level = level_with_available(dec!(10));
        level.rent_out(dec!(2)).unwrap();

        let err = level
            .return_from_rent(ReturnSplit {
                quantity: dec!(2),
                damaged: dec!(2),
                beyond_repair: dec!(1),
                lost: dec!(0),
            })
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_sell_consumes_available_and_on_hand() {
        let mut level = level_with_available(dec!(6));

        let draft = level.sell(dec!(2)).unwrap();

        assert_eq!(draft.movement_type, StockMovementType::Sale);
        assert_eq!(draft.quantity_change, dec!(-2));
        assert_eq!(level.quantity_available, dec!(4));
        assert_eq!(level.quantity_on_hand, dec!(4));
        level.check_invariants().unwrap();
    }

    #[test]
    fn test_transfer_round_trip_conserves_on_hand() {
        let mut source = level_with_available(dec!(20));
        let mut dest = StockLevel::new(source.item_id, Uuid::new_v4(), Uuid::new_v4());

        source.transfer_out(dec!(7)).unwrap();
        dest.transfer_in(dec!(7)).unwrap();
        assert_eq!(source.quantity_on_hand + dest.quantity_on_hand, dec!(20));

        dest.transfer_out(dec!(7)).unwrap();
        source.transfer_in(dec!(7)).unwrap();
        assert_eq!(source.quantity_on_hand, dec!(20));
        assert_eq!(dest.quantity_on_hand, dec!(0));
        source.check_invariants().unwrap();
        dest.check_invariants().unwrap();
    }

    #[test]
    fn test_update_average_cost_blends_lots() {
        let mut level = StockLevel::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        level.adjust(dec!(10), true).unwrap();
        level.update_average_cost(dec!(10), dec!(25.00));
        assert_eq!(level.average_cost, dec!(25.00));
        assert_eq!(level.total_value, dec!(250.00));

        level.adjust(dec!(5), true).unwrap();
        level.update_average_cost(dec!(5), dec!(40.00));
        assert_eq!(level.average_cost, dec!(30.00));
        assert_eq!(level.total_value, dec!(450.00));
    }

    #[test]
    fn test_derived_status_transitions() {
        let mut level = StockLevel::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(level.derived_status(), StockStatus::OutOfStock);

        level.reorder_point = Some(dec!(5));
        level.maximum_stock = Some(dec!(50));

        level.adjust(dec!(4), true).unwrap();
        assert_eq!(level.stock_status, StockStatus::LowStock);

        level.adjust(dec!(16), true).unwrap();
        assert_eq!(level.stock_status, StockStatus::InStock);

        level.adjust(dec!(40), true).unwrap();
        assert_eq!(level.stock_status, StockStatus::Overstocked);
    }

    #[test]
    fn test_rates() {
        let mut level = level_with_available(dec!(10));
        level.rent_out(dec!(4)).unwrap();
        assert_eq!(level.utilization_rate(), dec!(40));
        assert_eq!(level.availability_rate(), dec!(60));
        assert!(level.can_fulfill_order(dec!(6)));
        assert!(!level.can_fulfill_order(dec!(7)));
    }
}
