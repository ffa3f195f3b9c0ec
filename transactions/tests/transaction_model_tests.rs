//! Aggregate-level flows for the transaction engine: line totals, header
//! totals, payment progression, and rental status derivation.

use chrono::NaiveDate;
use rust_decimal_macros::dec;
use uuid::Uuid;

use rentora_transactions::models::enums::{PaymentStatus, RentalStatus, TransactionType};
use rentora_transactions::models::header::TransactionHeader;
use rentora_transactions::models::lifecycle::RentalLifecycle;
use rentora_transactions::models::line::{LineTerms, TransactionLine};

fn rental_header() -> TransactionHeader {
    let mut header = TransactionHeader::new(
        "RNT-2024-00001".to_string(),
        TransactionType::Rental,
        Uuid::new_v4(),
        Uuid::new_v4(),
    );
    header.rental_start_date = NaiveDate::from_ymd_opt(2024, 6, 1);
    header.rental_end_date = NaiveDate::from_ymd_opt(2024, 6, 10);
    header
}

fn rental_line(header: &TransactionHeader, quantity: rust_decimal::Decimal) -> TransactionLine {
    let terms = LineTerms {
        item_id: Uuid::new_v4(),
        quantity,
        unit_price: dec!(25.00),
        discount_amount: dec!(0),
        tax_rate: dec!(0),
        rental_start_date: header.rental_start_date,
        rental_end_date: header.rental_end_date,
        rental_period: None,
        notes: None,
    };
    let mut line = TransactionLine::build(header.id, 1, terms, Uuid::new_v4()).unwrap();
    line.current_rental_status = Some(RentalStatus::RentalInprogress);
    line
}

#[test]
fn header_totals_follow_lines() {
    let mut header = TransactionHeader::new(
        "SAL-2024-00007".to_string(),
        TransactionType::Sale,
        Uuid::new_v4(),
        Uuid::new_v4(),
    );

    let first = TransactionLine::build(
        header.id,
        1,
        LineTerms {
            item_id: Uuid::new_v4(),
            quantity: dec!(4),
            unit_price: dec!(49.99),
            discount_amount: dec!(20.00),
            tax_rate: dec!(8.25),
            rental_start_date: None,
            rental_end_date: None,
            rental_period: None,
            notes: None,
        },
        Uuid::new_v4(),
    )
    .unwrap();
    let second = TransactionLine::build(
        header.id,
        2,
        LineTerms::sale(Uuid::new_v4(), dec!(1), dec!(99.00)),
        Uuid::new_v4(),
    )
    .unwrap();

    header.shipping_amount = dec!(12.50);
    header.recompute_totals(&[first.clone(), second]);

    // first: taxable 179.96, tax 14.85
    assert_eq!(first.tax_amount, dec!(14.85));
    assert_eq!(header.subtotal_amount, dec!(298.96));
    assert_eq!(header.tax_amount, dec!(14.85));
    assert_eq!(header.total_amount, dec!(306.31));

    // Payments walk PENDING -> PARTIAL -> PAID
    let actor = Uuid::new_v4();
    header.add_payment(dec!(300.00), actor).unwrap();
    assert_eq!(header.payment_status, PaymentStatus::Partial);
    header.add_payment(dec!(6.31), actor).unwrap();
    assert_eq!(header.payment_status, PaymentStatus::Paid);
    assert!(header.is_paid());
}

/// A two-unit line returned in full five days late: the line goes LATE,
/// the header aggregation follows, and fees accumulate on the lifecycle.
#[test]
fn late_return_drives_header_status_and_fees() {
    let header = rental_header();
    let mut line = rental_line(&header, dec!(2));
    let actor = Uuid::new_v4();

    let end = line.rental_end_date.unwrap();
    let return_date = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();
    assert!(return_date > end);
    let days_late = (return_date - end).num_days();
    assert_eq!(days_late, 5);

    line.apply_return(dec!(2), RentalStatus::RentalLate, actor)
        .unwrap();
    assert!(line.is_fully_returned());

    let aggregate =
        TransactionHeader::aggregate_rental_status(&[line.current_rental_status.unwrap()]);
    assert_eq!(aggregate, RentalStatus::RentalLate);

    let mut lifecycle = RentalLifecycle::new(header.id, header.rental_end_date, actor);
    let late_fee = dec!(5.00) * rust_decimal::Decimal::from(days_late);
    lifecycle.add_fees(late_fee, dec!(0), dec!(0), actor);
    assert_eq!(lifecycle.total_late_fees, dec!(25.00));
    assert!(lifecycle.total_fees() > dec!(0));
}

/// Partial and late lines dominate the header aggregation in priority
/// order.
#[test]
fn mixed_line_statuses_aggregate_in_priority_order() {
    let header = rental_header();
    let mut partial = rental_line(&header, dec!(3));
    let mut completed = rental_line(&header, dec!(1));
    let actor = Uuid::new_v4();

    partial
        .apply_return(dec!(1), RentalStatus::RentalPartialReturn, actor)
        .unwrap();
    completed
        .apply_return(dec!(1), RentalStatus::RentalCompleted, actor)
        .unwrap();

    let statuses = [
        partial.current_rental_status.unwrap(),
        completed.current_rental_status.unwrap(),
    ];
    assert_eq!(
        TransactionHeader::aggregate_rental_status(&statuses),
        RentalStatus::RentalPartialReturn
    );

    // A late partial line outranks everything else.
    let statuses = [
        RentalStatus::RentalLatePartialReturn,
        RentalStatus::RentalCompleted,
        RentalStatus::RentalExtended,
    ];
    assert_eq!(
        TransactionHeader::aggregate_rental_status(&statuses),
        RentalStatus::RentalLatePartialReturn
    );
}

/// Refund math: the deposit shrinks by accumulated fees, floored at zero.
#[test]
fn deposit_refund_is_floored_at_zero() {
    let mut lifecycle = RentalLifecycle::new(Uuid::new_v4(), None, Uuid::new_v4());
    let deposit = dec!(50.00);

    lifecycle.add_fees(dec!(30.00), dec!(35.00), dec!(0), Uuid::new_v4());
    let refund = (deposit - lifecycle.total_fees()).max(dec!(0));
    assert_eq!(refund, dec!(0));

    let mut modest = RentalLifecycle::new(Uuid::new_v4(), None, Uuid::new_v4());
    modest.add_fees(dec!(10.00), dec!(0), dec!(0), Uuid::new_v4());
    let refund = (deposit - modest.total_fees()).max(dec!(0));
    assert_eq!(refund, dec!(40.00));
}

/// The rental-period multiplier shapes the line total, not the header
/// subtotal.
#[test]
fn rental_line_total_carries_period_multiplier() {
    let header = rental_header();
    let line = rental_line(&header, dec!(2));

    // 2024-06-01 to 2024-06-10 inclusive = 10 days; 2 * 25.00 * 10
    assert_eq!(line.line_total, dec!(500.00));

    let mut totals_header = rental_header();
    totals_header.recompute_totals(std::slice::from_ref(&line));
    assert_eq!(totals_header.subtotal_amount, dec!(50.00));
}
