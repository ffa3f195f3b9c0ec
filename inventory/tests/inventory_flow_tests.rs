//! Aggregate-level flows for the inventory engine: bucket transitions,
//! ledger chaining, and the SKU counter model.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use rentora_inventory::models::enums::{StockMovementType, StockStatus};
use rentora_inventory::models::sku_sequence::{SkuRenderContext, SkuSequence};
use rentora_inventory::models::stock_level::{MovementDraft, ReturnSplit, StockLevel};

fn new_level() -> StockLevel {
    StockLevel::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4())
}

/// Receive 10 @ 25.00, rent 3, return 2 good + 1 damaged. The canonical
/// end-to-end bucket walk.
#[test]
fn receive_then_rent_then_mixed_return() {
    let mut level = new_level();
    let mut ledger: Vec<MovementDraft> = Vec::new();

    let receipt = level.adjust(dec!(10), true).unwrap();
    level.update_average_cost(dec!(10), dec!(25.00));
    ledger.push(receipt);

    assert_eq!(level.quantity_on_hand, dec!(10));
    assert_eq!(level.quantity_available, dec!(10));
    assert_eq!(level.total_value, dec!(250.00));
    assert_eq!(level.stock_status, StockStatus::InStock);

    let checkout = level.rent_out(dec!(3)).unwrap();
    assert_eq!(checkout.movement_type, StockMovementType::RentalOut);
    assert_eq!(checkout.quantity_change, dec!(-3));
    assert_eq!(level.quantity_available, dec!(7));
    assert_eq!(level.quantity_on_rent, dec!(3));
    ledger.push(checkout);

    let ret = level
        .return_from_rent(ReturnSplit {
            quantity: dec!(3),
            damaged: dec!(1),
            beyond_repair: dec!(0),
            lost: dec!(0),
        })
        .unwrap();
    assert_eq!(ret.movement_type, StockMovementType::RentalReturnMixed);
    assert_eq!(ret.quantity_change, dec!(2));
    ledger.push(ret);

    assert_eq!(level.quantity_available, dec!(9));
    assert_eq!(level.quantity_on_rent, dec!(0));
    assert_eq!(level.quantity_damaged, dec!(1));
    assert_eq!(level.quantity_on_hand, dec!(10));
    level.check_invariants().unwrap();

    // Ledger laws: consecutive snapshots chain, and the signed changes
    // sum to the current available quantity.
    for pair in ledger.windows(2) {
        assert_eq!(pair[0].quantity_after, pair[1].quantity_before);
    }
    for draft in &ledger {
        assert_eq!(draft.quantity_after, draft.quantity_before + draft.quantity_change);
    }
    let net: Decimal = ledger.iter().map(|draft| draft.quantity_change).sum();
    assert_eq!(net, level.quantity_available);
}

/// A fully damaged return must leave available untouched.
#[test]
fn damaged_return_does_not_inflate_available() {
    let mut level = new_level();
    level.adjust(dec!(5), true).unwrap();
    level.rent_out(dec!(5)).unwrap();
    assert_eq!(level.quantity_available, dec!(0));

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

/// Rent-out then all-good return restores the starting buckets.
#[test]
fn rent_and_good_return_is_identity() {
    let mut level = new_level();
    level.adjust(dec!(12), true).unwrap();
    let before = (level.quantity_available, level.quantity_on_hand);

    level.rent_out(dec!(4)).unwrap();
    level
        .return_from_rent(ReturnSplit::good_only(dec!(4)))
        .unwrap();

    assert_eq!((level.quantity_available, level.quantity_on_hand), before);
    level.check_invariants().unwrap();
}

/// Transfers conserve combined on-hand; the reverse transfer restores
/// both levels.
#[test]
fn transfer_round_trip_conserves_total() {
    let item_id = Uuid::new_v4();
    let mut source = StockLevel::new(item_id, Uuid::new_v4(), Uuid::new_v4());
    let mut destination = StockLevel::new(item_id, Uuid::new_v4(), Uuid::new_v4());
    source.adjust(dec!(20), true).unwrap();

    let out = source.transfer_out(dec!(7)).unwrap();
    let incoming = destination.transfer_in(dec!(7)).unwrap();
    assert_eq!(out.movement_type, StockMovementType::TransferOut);
    assert_eq!(incoming.movement_type, StockMovementType::TransferIn);
    assert_eq!(source.quantity_on_hand, dec!(13));
    assert_eq!(destination.quantity_on_hand, dec!(7));
    assert_eq!(
        source.quantity_on_hand + destination.quantity_on_hand,
        dec!(20)
    );

    destination.transfer_out(dec!(7)).unwrap();
    source.transfer_in(dec!(7)).unwrap();
    assert_eq!(source.quantity_on_hand, dec!(20));
    assert_eq!(destination.quantity_on_hand, dec!(0));
}

/// Oversell and over-return leave the aggregate untouched.
#[test]
fn rejected_operations_do_not_mutate() {
    let mut level = new_level();
    level.adjust(dec!(3), true).unwrap();

    assert!(level.rent_out(dec!(4)).is_err());
    assert!(level.sell(dec!(4)).is_err());
    assert!(level
        .return_from_rent(ReturnSplit::good_only(dec!(1)))
        .is_err());

    assert_eq!(level.quantity_available, dec!(3));
    assert_eq!(level.quantity_on_hand, dec!(3));
    assert_eq!(level.quantity_on_rent, dec!(0));
    level.check_invariants().unwrap();
}

/// Bulk generation yields contiguous numbers `[s, s + n)` and distinct
/// SKUs, advancing the counter to `s + n`.
#[test]
fn bulk_sku_generation_is_contiguous() {
    let mut sequence = SkuSequence::new(
        None,
        None,
        "CAM-",
        "",
        4,
        None,
        Uuid::new_v4(),
    )
    .unwrap();
    sequence.next_sequence = 42;
    let start = sequence.next_sequence;
    let actor = Uuid::new_v4();
    let ctx = SkuRenderContext::default();

    let mut issued = Vec::new();
    for offset in 0..5 {
        let number = start + offset;
        let sku = sequence.render(number, &ctx).unwrap();
        sequence.mark_generated(number, &sku, actor);
        issued.push((sku, number));
    }

    let numbers: Vec<i64> = issued.iter().map(|(_, number)| *number).collect();
    assert_eq!(numbers, vec![42, 43, 44, 45, 46]);
    let mut skus: Vec<String> = issued.iter().map(|(sku, _)| sku.clone()).collect();
    skus.dedup();
    assert_eq!(skus.len(), 5);
    assert_eq!(sequence.next_sequence, 47);
    assert_eq!(sequence.total_generated, 5);
    assert_eq!(sequence.last_generated_sku.as_deref(), Some("CAM-0046"));
}
