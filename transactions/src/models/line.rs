use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use rentora_shared::error::{Error, Result};
use rentora_shared::money::{round_money, round_rate};
use rentora_shared::types::AuditFields;

use super::enums::RentalStatus;

/// Child row of a transaction header for one item and quantity.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TransactionLine {
    pub id: Uuid,
    pub transaction_header_id: Uuid,
    pub line_number: i32,
    pub item_id: Uuid,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub discount_amount: Decimal,
    /// Percentage with 4 fractional digits (8.2500 = 8.25 %).
    pub tax_rate: Decimal,
    pub tax_amount: Decimal,
    pub line_total: Decimal,
    pub rental_start_date: Option<NaiveDate>,
    pub rental_end_date: Option<NaiveDate>,
    pub rental_period: Option<i32>,
    pub returned_quantity: Decimal,
    pub current_rental_status: Option<RentalStatus>,
    pub notes: Option<String>,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub audit: AuditFields,
}

/// Pricing terms used to build a line.
#[derive(Debug, Clone, Deserialize)]
pub struct LineTerms {
    pub item_id: Uuid,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub discount_amount: Decimal,
    pub tax_rate: Decimal,
    pub rental_start_date: Option<NaiveDate>,
    pub rental_end_date: Option<NaiveDate>,
    pub rental_period: Option<i32>,
    pub notes: Option<String>,
}

impl LineTerms {
    pub fn sale(item_id: Uuid, quantity: Decimal, unit_price: Decimal) -> Self {
        Self {
            item_id,
            quantity,
            unit_price,
            discount_amount: Decimal::ZERO,
            tax_rate: Decimal::ZERO,
            rental_start_date: None,
            rental_end_date: None,
            rental_period: None,
            notes: None,
        }
    }
}

impl TransactionLine {
    /// Build a line from its terms, computing tax and the line total.
    ///
    /// `line_total = round2((quantity * unit_price - discount + tax) * periods)`
    /// where `periods` is the explicit rental period when present, the
    /// inclusive day span of the rental dates otherwise, and 1 for
    /// non-rental lines.
    pub fn build(
        header_id: Uuid,
        line_number: i32,
        terms: LineTerms,
        created_by: Uuid,
    ) -> Result<Self> {
        if terms.quantity <= Decimal::ZERO {
            return Err(Error::validation("Line quantity must be positive"));
        }
        if terms.unit_price < Decimal::ZERO {
            return Err(Error::validation("Unit price cannot be negative"));
        }
        if terms.discount_amount < Decimal::ZERO {
            return Err(Error::validation("Discount cannot be negative"));
        }
        if terms.tax_rate < Decimal::ZERO || terms.tax_rate > Decimal::ONE_HUNDRED {
            return Err(Error::validation("Tax rate must be between 0 and 100"));
        }
        let gross = terms.quantity * terms.unit_price;
        if terms.discount_amount > gross {
            return Err(Error::validation(format!(
                "Discount {} exceeds line amount {}",
                terms.discount_amount, gross
            )));
        }
        if let (Some(start), Some(end)) = (terms.rental_start_date, terms.rental_end_date) {
            if end < start {
                return Err(Error::validation("Rental end date precedes start date"));
            }
        }

        let periods = Self::rental_periods(
            terms.rental_period,
            terms.rental_start_date,
            terms.rental_end_date,
        );
        let taxable = gross - terms.discount_amount;
        let tax_rate = round_rate(terms.tax_rate);
        let tax_amount = round_money(taxable * tax_rate / Decimal::ONE_HUNDRED);
        let line_total = round_money((taxable + tax_amount) * Decimal::from(periods));

        Ok(Self {
            id: Uuid::new_v4(),
            transaction_header_id: header_id,
            line_number,
            item_id: terms.item_id,
            quantity: terms.quantity,
            unit_price: terms.unit_price,
            discount_amount: terms.discount_amount,
            tax_rate,
            tax_amount,
            line_total,
            rental_start_date: terms.rental_start_date,
            rental_end_date: terms.rental_end_date,
            rental_period: terms.rental_period,
            returned_quantity: Decimal::ZERO,
            current_rental_status: None,
            notes: terms.notes,
            audit: AuditFields::new(created_by),
        })
    }

    /// Period multiplier. An explicit rental period wins over the date
    /// range when both are present.
    fn rental_periods(
        rental_period: Option<i32>,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> i64 {
        if let Some(period) = rental_period {
            return period.max(1) as i64;
        }
        match (start, end) {
            (Some(start), Some(end)) => (end - start).num_days().max(0) + 1,
            _ => 1,
        }
    }

    /// Quantity still out on rent.
    pub fn outstanding_quantity(&self) -> Decimal {
        self.quantity - self.returned_quantity
    }

    pub fn is_fully_returned(&self) -> bool {
        self.returned_quantity >= self.quantity
    }

    /// Record a processed return against this line.
    pub fn apply_return(
        &mut self,
        quantity: Decimal,
        new_status: RentalStatus,
        actor: Uuid,
    ) -> Result<()> {
        if quantity <= Decimal::ZERO {
            return Err(Error::validation("Return quantity must be positive"));
        }
        if self.returned_quantity + quantity > self.quantity {
            return Err(Error::validation(format!(
                "Return of {} exceeds outstanding quantity {}",
                quantity,
                self.outstanding_quantity()
            )));
        }
        self.returned_quantity += quantity;
        self.current_rental_status = Some(new_status);
        self.audit.touch(actor);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn terms(quantity: Decimal, unit_price: Decimal) -> LineTerms {
        LineTerms::sale(Uuid::new_v4(), quantity, unit_price)
    }

    #[test]
    fn test_simple_line_total() {
        let line =
            TransactionLine::build(Uuid::new_v4(), 1, terms(dec!(3), dec!(10.00)), Uuid::new_v4())
                .unwrap();
        assert_eq!(line.tax_amount, dec!(0.00));
        assert_eq!(line.line_total, dec!(30.00));
    }

    #[test]
    fn test_line_total_with_discount_and_tax() {
        let mut t = terms(dec!(2), dec!(49.99));
        t.discount_amount = dec!(10.00);
        t.tax_rate = dec!(8.75);
        let line = TransactionLine::build(Uuid::new_v4(), 1, t, Uuid::new_v4()).unwrap();

        // taxable = 99.98 - 10.00 = 89.98; tax = 7.87 (half-up)
        assert_eq!(line.tax_amount, dec!(7.87));
        assert_eq!(line.line_total, dec!(97.85));
    }

    #[test]
    fn test_rental_period_multiplier() {
        let mut t = terms(dec!(2), dec!(25.00));
        t.rental_period = Some(5);
        let line = TransactionLine::build(Uuid::new_v4(), 1, t, Uuid::new_v4()).unwrap();
        assert_eq!(line.line_total, dec!(250.00));
    }

    #[test]
    fn test_date_span_fallback_is_inclusive() {
        let mut t = terms(dec!(1), dec!(10.00));
        t.rental_start_date = Some(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
        t.rental_end_date = Some(NaiveDate::from_ymd_opt(2024, 6, 3).unwrap());
        let line = TransactionLine::build(Uuid::new_v4(), 1, t, Uuid::new_v4()).unwrap();
        // Three inclusive days
        assert_eq!(line.line_total, dec!(30.00));
    }

    #[test]
    fn test_explicit_period_wins_over_dates() {
        let mut t = terms(dec!(1), dec!(10.00));
        t.rental_period = Some(7);
        t.rental_start_date = Some(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
        t.rental_end_date = Some(NaiveDate::from_ymd_opt(2024, 6, 3).unwrap());
        let line = TransactionLine::build(Uuid::new_v4(), 1, t, Uuid::new_v4()).unwrap();
        assert_eq!(line.line_total, dec!(70.00));
    }

    #[test]
    fn test_validation_failures() {
        let header = Uuid::new_v4();
        let actor = Uuid::new_v4();

        assert!(TransactionLine::build(header, 1, terms(dec!(0), dec!(10)), actor).is_err());
        assert!(TransactionLine::build(header, 1, terms(dec!(1), dec!(-1)), actor).is_err());

        let mut excessive_discount = terms(dec!(1), dec!(10.00));
        excessive_discount.discount_amount = dec!(11.00);
        assert!(TransactionLine::build(header, 1, excessive_discount, actor).is_err());

        let mut bad_rate = terms(dec!(1), dec!(10.00));
        bad_rate.tax_rate = dec!(101);
        assert!(TransactionLine::build(header, 1, bad_rate, actor).is_err());

        let mut inverted_dates = terms(dec!(1), dec!(10.00));
        inverted_dates.rental_start_date = Some(NaiveDate::from_ymd_opt(2024, 6, 10).unwrap());
        inverted_dates.rental_end_date = Some(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
        assert!(TransactionLine::build(header, 1, inverted_dates, actor).is_err());
    }

    #[test]
    fn test_apply_return_tracks_outstanding() {
        let mut line =
            TransactionLine::build(Uuid::new_v4(), 1, terms(dec!(5), dec!(10.00)), Uuid::new_v4())
                .unwrap();
        let actor = Uuid::new_v4();

        line.apply_return(dec!(2), RentalStatus::RentalPartialReturn, actor)
            .unwrap();
        assert_eq!(line.outstanding_quantity(), dec!(3));
        assert!(!line.is_fully_returned());

        line.apply_return(dec!(3), RentalStatus::RentalCompleted, actor)
            .unwrap();
        assert!(line.is_fully_returned());

        // Over-return rejected
        assert!(line
            .apply_return(dec!(1), RentalStatus::RentalCompleted, actor)
            .is_err());
    }
}
