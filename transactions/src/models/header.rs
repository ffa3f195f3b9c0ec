// ============================================================================
// RENTORA - TRANSACTION HEADER AGGREGATE
// ============================================================================
// Module: transactions/src/models/header.rs
// Description: Header totals, payment state machine, and rental status
//              aggregation over lines
// ============================================================================

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use rentora_shared::error::{Error, Result};
use rentora_shared::money::round_money;
use rentora_shared::types::AuditFields;

use super::enums::{PaymentStatus, RentalStatus, TransactionStatus, TransactionType};
use super::line::TransactionLine;

/// Top-level record of one business event.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TransactionHeader {
    pub id: Uuid,
    pub transaction_number: String,
    pub transaction_type: TransactionType,
    pub status: TransactionStatus,
    pub customer_id: Option<Uuid>,
    pub supplier_id: Option<Uuid>,
    pub location_id: Uuid,
    pub transaction_date: DateTime<Utc>,
    pub reference_number: Option<String>,
    pub subtotal_amount: Decimal,
    pub discount_amount: Decimal,
    pub tax_amount: Decimal,
    pub shipping_amount: Decimal,
    pub other_charges: Decimal,
    pub total_amount: Decimal,
    pub paid_amount: Decimal,
    pub payment_status: PaymentStatus,
    pub payment_method: Option<String>,
    pub payment_reference: Option<String>,
    pub deposit_amount: Decimal,
    pub rental_start_date: Option<NaiveDate>,
    pub rental_end_date: Option<NaiveDate>,
    pub current_rental_status: Option<RentalStatus>,
    pub notes: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<Uuid>,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub audit: AuditFields,
}

impl TransactionHeader {
    pub fn new(
        transaction_number: String,
        transaction_type: TransactionType,
        location_id: Uuid,
        created_by: Uuid,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            transaction_number,
            transaction_type,
            status: TransactionStatus::Pending,
            customer_id: None,
            supplier_id: None,
            location_id,
            transaction_date: Utc::now(),
            reference_number: None,
            subtotal_amount: Decimal::ZERO,
            discount_amount: Decimal::ZERO,
            tax_amount: Decimal::ZERO,
            shipping_amount: Decimal::ZERO,
            other_charges: Decimal::ZERO,
            total_amount: Decimal::ZERO,
            paid_amount: Decimal::ZERO,
            payment_status: PaymentStatus::Pending,
            payment_method: None,
            payment_reference: None,
            deposit_amount: Decimal::ZERO,
            rental_start_date: None,
            rental_end_date: None,
            current_rental_status: None,
            notes: None,
            deleted_at: None,
            deleted_by: None,
            audit: AuditFields::new(created_by),
        }
    }

    // ========================================================================
    // TOTALS
    // ========================================================================

    /// Recompute header totals from the lines. `header_discount` rides on
    /// top of the per-line discounts; line totals keep their own rental
    /// period multipliers.
    pub fn recompute_totals(&mut self, lines: &[TransactionLine]) {
        let subtotal: Decimal = lines
            .iter()
            .map(|line| line.quantity * line.unit_price)
            .sum();
        let line_discounts: Decimal = lines.iter().map(|line| line.discount_amount).sum();
        let tax: Decimal = lines.iter().map(|line| line.tax_amount).sum();

        self.subtotal_amount = round_money(subtotal);
        self.tax_amount = round_money(tax);
        let discounts = round_money(line_discounts + self.discount_amount);
        self.total_amount = round_money(
            self.subtotal_amount - discounts + self.tax_amount + self.shipping_amount
                + self.other_charges,
        );
    }

    pub fn balance_due(&self) -> Decimal {
        self.total_amount - self.paid_amount
    }

    pub fn is_paid(&self) -> bool {
        self.balance_due() <= Decimal::ZERO
    }

    // ========================================================================
    // PAYMENTS
    // ========================================================================

    /// Record a payment. `PENDING -> PARTIAL -> PAID`; the REFUNDED and
    /// FAILED branches are terminal and reject further payments.
    pub fn add_payment(&mut self, amount: Decimal, actor: Uuid) -> Result<()> {
        if amount <= Decimal::ZERO {
            return Err(Error::validation("Payment amount must be positive"));
        }
        if self.payment_status.is_terminal() {
            return Err(Error::IllegalStateTransition(format!(
                "Transaction {} payment state {:?} accepts no further payments",
                self.transaction_number, self.payment_status
            )));
        }
        self.paid_amount += amount;
        self.payment_status = if self.is_paid() {
            PaymentStatus::Paid
        } else {
            PaymentStatus::Partial
        };
        self.audit.touch(actor);
        Ok(())
    }

    /// Admin action: mark the payment refunded. Terminal.
    pub fn mark_refunded(&mut self, actor: Uuid) -> Result<()> {
        match self.payment_status {
            PaymentStatus::Paid | PaymentStatus::Partial => {
                self.payment_status = PaymentStatus::Refunded;
                self.audit.touch(actor);
                Ok(())
            }
            other => Err(Error::IllegalStateTransition(format!(
                "Cannot refund a transaction in payment state {other:?}"
            ))),
        }
    }

    /// Admin action: mark the payment failed. Terminal.
    pub fn mark_failed(&mut self, actor: Uuid) -> Result<()> {
        match self.payment_status {
            PaymentStatus::Pending | PaymentStatus::Partial => {
                self.payment_status = PaymentStatus::Failed;
                self.audit.touch(actor);
                Ok(())
            }
            other => Err(Error::IllegalStateTransition(format!(
                "Cannot fail a transaction in payment state {other:?}"
            ))),
        }
    }

    // ========================================================================
    // RENTAL STATUS AGGREGATION
    // ========================================================================

    /// Derive the header rental status from per-line statuses.
    ///
    /// Priority: late beats partial beats extended; COMPLETED only when
    /// every line has completed; otherwise the rental is in progress.
    pub fn aggregate_rental_status(line_statuses: &[RentalStatus]) -> RentalStatus {
        if line_statuses.is_empty() {
            return RentalStatus::RentalInprogress;
        }
        let any_late = line_statuses.iter().any(|status| status.is_late());
        let any_partial = line_statuses.iter().any(|status| status.is_partial());

        if any_late {
            if any_partial {
                RentalStatus::RentalLatePartialReturn
            } else {
                RentalStatus::RentalLate
            }
        } else if any_partial {
            RentalStatus::RentalPartialReturn
        } else if line_statuses
            .iter()
            .any(|status| *status == RentalStatus::RentalExtended)
        {
            RentalStatus::RentalExtended
        } else if line_statuses
            .iter()
            .all(|status| *status == RentalStatus::RentalCompleted)
        {
            RentalStatus::RentalCompleted
        } else {
            RentalStatus::RentalInprogress
        }
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    pub fn soft_delete(&mut self, actor: Uuid) {
        self.audit.is_active = false;
        self.deleted_at = Some(Utc::now());
        self.deleted_by = Some(actor);
        self.audit.touch(actor);
    }

    pub fn is_deleted(&self) -> bool {
        !self.audit.is_active
    }

    /// Cancellation is only possible before inventory side effects exist.
    pub fn can_be_cancelled(&self) -> bool {
        matches!(
            self.status,
            TransactionStatus::Pending | TransactionStatus::OnHold
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::line::LineTerms;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    fn header() -> TransactionHeader {
        TransactionHeader::new(
            "SAL-2024-00001".to_string(),
            TransactionType::Sale,
            Uuid::new_v4(),
            Uuid::new_v4(),
        )
    }

    fn line(header_id: Uuid, quantity: Decimal, unit_price: Decimal) -> TransactionLine {
        TransactionLine::build(
            header_id,
            1,
            LineTerms::sale(Uuid::new_v4(), quantity, unit_price),
            Uuid::new_v4(),
        )
        .unwrap()
    }

    #[test]
    fn test_recompute_totals() {
        let mut header = header();
        let mut first = line(header.id, dec!(2), dec!(10.00));
        first.discount_amount = dec!(2.00);
        first.tax_amount = dec!(1.44);
        let second = line(header.id, dec!(1), dec!(30.00));

        header.shipping_amount = dec!(5.00);
        header.discount_amount = dec!(3.00);
        header.recompute_totals(&[first, second]);

        assert_eq!(header.subtotal_amount, dec!(50.00));
        assert_eq!(header.tax_amount, dec!(1.44));
        // 50.00 - (2.00 + 3.00) + 1.44 + 5.00
        assert_eq!(header.total_amount, dec!(51.44));
        assert_eq!(header.balance_due(), dec!(51.44));
        assert!(!header.is_paid());
    }

    #[test]
    fn test_payment_progression() {
        let mut header = header();
        header.total_amount = dec!(100.00);
        let actor = Uuid::new_v4();

        header.add_payment(dec!(40.00), actor).unwrap();
        assert_eq!(header.payment_status, PaymentStatus::Partial);
        assert_eq!(header.balance_due(), dec!(60.00));

        header.add_payment(dec!(60.00), actor).unwrap();
        assert_eq!(header.payment_status, PaymentStatus::Paid);
        assert!(header.is_paid());
    }

    #[test]
    fn test_terminal_payment_states_reject_payments() {
        let mut header = header();
        header.total_amount = dec!(100.00);
        let actor = Uuid::new_v4();

        header.add_payment(dec!(100.00), actor).unwrap();
        header.mark_refunded(actor).unwrap();

        let err = header.add_payment(dec!(1.00), actor).unwrap_err();
        assert!(matches!(err, Error::IllegalStateTransition(_)));
        // Refunded is terminal
        assert!(header.mark_failed(actor).is_err());
    }

    #[test]
    fn test_mark_failed_from_pending() {
        let mut header = header();
        let actor = Uuid::new_v4();
        header.mark_failed(actor).unwrap();
        assert_eq!(header.payment_status, PaymentStatus::Failed);
        assert!(header.mark_refunded(actor).is_err());
    }

    #[rstest]
    #[case(vec![RentalStatus::RentalInprogress], RentalStatus::RentalInprogress)]
    #[case(vec![RentalStatus::RentalCompleted, RentalStatus::RentalCompleted], RentalStatus::RentalCompleted)]
    #[case(vec![RentalStatus::RentalCompleted, RentalStatus::RentalInprogress], RentalStatus::RentalInprogress)]
    #[case(vec![RentalStatus::RentalLate, RentalStatus::RentalCompleted], RentalStatus::RentalLate)]
    #[case(vec![RentalStatus::RentalLate, RentalStatus::RentalPartialReturn], RentalStatus::RentalLatePartialReturn)]
    #[case(vec![RentalStatus::RentalLatePartialReturn], RentalStatus::RentalLatePartialReturn)]
    #[case(vec![RentalStatus::RentalPartialReturn, RentalStatus::RentalCompleted], RentalStatus::RentalPartialReturn)]
    #[case(vec![RentalStatus::RentalExtended, RentalStatus::RentalCompleted], RentalStatus::RentalExtended)]
    fn test_rental_status_aggregation(
        #[case] statuses: Vec<RentalStatus>,
        #[case] expected: RentalStatus,
    ) {
        assert_eq!(
            TransactionHeader::aggregate_rental_status(&statuses),
            expected
        );
    }

    #[test]
    fn test_soft_delete() {
        let mut header = header();
        let admin = Uuid::new_v4();
        header.soft_delete(admin);
        assert!(header.is_deleted());
        assert_eq!(header.deleted_by, Some(admin));
    }

    #[test]
    fn test_cancellation_window() {
        let mut header = header();
        assert!(header.can_be_cancelled());
        header.status = TransactionStatus::Completed;
        assert!(!header.can_be_cancelled());
        header.status = TransactionStatus::InProgress;
        assert!(!header.can_be_cancelled());
    }
}
