// ============================================================================
// RENTORA - TRANSACTION SERVICE
// ============================================================================
// Module: transactions/src/services/transaction.rs
// Description: Creates purchase, sale, and rental transactions end-to-end;
//              payments, cancellation, search, and history. Every entry
//              point commits one database transaction or rolls back whole.
// ============================================================================

use chrono::{Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use tracing::{info, warn};
use uuid::Uuid;

use rentora_inventory::models::item::Item;
use rentora_inventory::services::inventory::{
    InventoryService, ReceiveUnitsInput, RentalCheckoutInput,
};
use rentora_shared::error::{Error, Result};

use crate::models::enums::{
    PaymentStatus, RentalStatus, TransactionStatus, TransactionType,
};
use crate::models::event::{append_event, TransactionEventKind};
use crate::models::header::TransactionHeader;
use crate::models::lifecycle::RentalLifecycle;
use crate::models::line::{LineTerms, TransactionLine};
use crate::services::numbering::allocate_transaction_number;

pub(crate) const HEADER_COLUMNS: &str = "id, transaction_number, transaction_type, status, \
     customer_id, supplier_id, location_id, transaction_date, reference_number, \
     subtotal_amount, discount_amount, tax_amount, shipping_amount, other_charges, \
     total_amount, paid_amount, payment_status, payment_method, payment_reference, \
     deposit_amount, rental_start_date, rental_end_date, current_rental_status, notes, \
     deleted_at, deleted_by, created_at, created_by, updated_at, updated_by, is_active, \
     version";

pub(crate) const LINE_COLUMNS: &str = "id, transaction_header_id, line_number, item_id, \
     quantity, unit_price, discount_amount, tax_rate, tax_amount, line_total, \
     rental_start_date, rental_end_date, rental_period, returned_quantity, \
     current_rental_status, notes, created_at, created_by, updated_at, updated_by, \
     is_active, version";

const ITEM_COLUMNS: &str = "id, item_name, sku, description, brand_id, category_id, \
     unit_of_measurement, rental_rate_per_period, rental_period, sale_price, \
     security_deposit, is_rentable, is_saleable, serial_number_required, created_at, \
     created_by, updated_at, updated_by, is_active, version";

// ============================================================================
// SERVICE INPUT / OUTPUT MODELS
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct PurchaseLineInput {
    pub item_id: Uuid,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    #[serde(default)]
    pub discount_amount: Decimal,
    #[serde(default)]
    pub tax_rate: Decimal,
    pub serial_numbers: Option<Vec<String>>,
    pub batch_code: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPurchaseInput {
    pub supplier_id: Uuid,
    pub location_id: Uuid,
    pub lines: Vec<PurchaseLineInput>,
    pub reference_number: Option<String>,
    #[serde(default)]
    pub shipping_amount: Decimal,
    #[serde(default)]
    pub other_charges: Decimal,
    #[serde(default)]
    pub header_discount: Decimal,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SaleLineInput {
    pub item_id: Uuid,
    pub quantity: Decimal,
    /// Defaults to the item's sale price.
    pub unit_price: Option<Decimal>,
    #[serde(default)]
    pub discount_amount: Decimal,
    #[serde(default)]
    pub tax_rate: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewSaleInput {
    pub customer_id: Uuid,
    pub location_id: Uuid,
    pub lines: Vec<SaleLineInput>,
    #[serde(default)]
    pub shipping_amount: Decimal,
    #[serde(default)]
    pub other_charges: Decimal,
    #[serde(default)]
    pub header_discount: Decimal,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RentalLineInput {
    pub item_id: Uuid,
    pub quantity: Decimal,
    /// Defaults to the item's rental rate per period.
    pub unit_rate: Option<Decimal>,
    #[serde(default)]
    pub discount_amount: Decimal,
    #[serde(default)]
    pub tax_rate: Decimal,
    /// Explicit period count; otherwise derived from the rental dates.
    pub rental_period: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewRentalInput {
    pub customer_id: Uuid,
    pub location_id: Uuid,
    pub lines: Vec<RentalLineInput>,
    pub rental_start_date: NaiveDate,
    pub rental_end_date: NaiveDate,
    /// Defaults to the summed security deposits of the rented items.
    pub deposit_amount: Option<Decimal>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentInput {
    pub amount: Decimal,
    pub payment_method: String,
    pub payment_reference: Option<String>,
    #[serde(default)]
    pub allow_overpayment: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransactionDetail {
    pub header: TransactionHeader,
    pub lines: Vec<TransactionLine>,
}

#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub transaction_type: Option<TransactionType>,
    pub status: Option<TransactionStatus>,
    pub customer_id: Option<Uuid>,
    pub supplier_id: Option<Uuid>,
    pub location_id: Option<Uuid>,
    pub payment_status: Option<PaymentStatus>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub include_deleted: bool,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TransactionTotals {
    pub transaction_count: i64,
    pub total_amount: Decimal,
    pub paid_amount: Decimal,
    pub tax_amount: Decimal,
    pub discount_amount: Decimal,
    pub outstanding_amount: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkStatusError {
    pub transaction_id: Uuid,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkStatusResult {
    pub total: usize,
    pub updated: usize,
    pub failed: Vec<BulkStatusError>,
}

// ============================================================================
// TRANSACTION SERVICE IMPLEMENTATION
// ============================================================================

#[derive(Clone)]
pub struct TransactionService {
    pool: PgPool,
    inventory: InventoryService,
}

impl TransactionService {
    pub fn new(pool: PgPool, inventory: InventoryService) -> Self {
        Self { pool, inventory }
    }

    // ========================================================================
    // PURCHASES
    // ========================================================================

    /// Create a purchase: header + lines, then unit receipts per line.
    pub async fn create_purchase(
        &self,
        input: NewPurchaseInput,
        actor: Uuid,
    ) -> Result<TransactionDetail> {
        if input.lines.is_empty() {
            return Err(Error::validation("A purchase needs at least one line"));
        }

        let mut tx = self.pool.begin().await?;
        ensure_location_active(&mut tx, input.location_id).await?;

        let number =
            allocate_transaction_number(&mut tx, TransactionType::Purchase, Utc::now().year())
                .await?;
        let mut header =
            TransactionHeader::new(number, TransactionType::Purchase, input.location_id, actor);
        header.supplier_id = Some(input.supplier_id);
        header.reference_number = input.reference_number.clone();
        header.shipping_amount = input.shipping_amount;
        header.other_charges = input.other_charges;
        header.discount_amount = input.header_discount;
        header.notes = input.notes.clone();
        header.status = TransactionStatus::Completed;

        let mut lines = Vec::with_capacity(input.lines.len());
        for (index, line_input) in input.lines.iter().enumerate() {
            fetch_active_item(&mut tx, line_input.item_id).await?;
            let terms = LineTerms {
                item_id: line_input.item_id,
                quantity: line_input.quantity,
                unit_price: line_input.unit_cost,
                discount_amount: line_input.discount_amount,
                tax_rate: line_input.tax_rate,
                rental_start_date: None,
                rental_end_date: None,
                rental_period: None,
                notes: None,
            };
            lines.push(TransactionLine::build(
                header.id,
                (index + 1) as i32,
                terms,
                actor,
            )?);
        }

        header.recompute_totals(&lines);
        insert_header(&mut tx, &header).await?;
        for line in &lines {
            insert_line(&mut tx, line).await?;
        }

        let mut movement_ids = Vec::new();
        for (line, line_input) in lines.iter().zip(&input.lines) {
            let (_, _, movement) = self
                .inventory
                .receive_units_in_tx(
                    &mut tx,
                    ReceiveUnitsInput {
                        item_id: line_input.item_id,
                        location_id: input.location_id,
                        quantity: line_input.quantity,
                        unit_cost: line_input.unit_cost,
                        serial_numbers: line_input.serial_numbers.clone(),
                        batch_code: line_input.batch_code.clone(),
                        supplier_id: Some(input.supplier_id),
                        purchase_order_number: input.reference_number.clone(),
                        transaction_header_id: Some(header.id),
                        transaction_line_id: Some(line.id),
                    },
                    actor,
                )
                .await?;
            movement_ids.push(movement.id);
        }

        append_event(
            &mut tx,
            header.id,
            TransactionEventKind::Transaction {
                description: format!("Purchase {} created", header.transaction_number),
                details: serde_json::json!({ "supplier_id": input.supplier_id }),
            },
            actor,
        )
        .await?;
        append_event(
            &mut tx,
            header.id,
            TransactionEventKind::Inventory {
                description: "Units received into stock".to_string(),
                movement_ids,
            },
            actor,
        )
        .await?;

        tx.commit().await?;
        info!(number = %header.transaction_number, "purchase created");
        Ok(TransactionDetail { header, lines })
    }

    // ========================================================================
    // SALES
    // ========================================================================

    /// Create a sale, consuming stock per line. Oversell fails the whole
    /// transaction: no header, lines, or movements survive.
    pub async fn create_sale(&self, input: NewSaleInput, actor: Uuid) -> Result<TransactionDetail> {
        if input.lines.is_empty() {
            return Err(Error::validation("A sale needs at least one line"));
        }

        let mut tx = self.pool.begin().await?;
        ensure_location_active(&mut tx, input.location_id).await?;

        // Availability pre-check per line before any writes.
        for line_input in &input.lines {
            self.ensure_available(&mut tx, line_input.item_id, input.location_id, line_input.quantity)
                .await?;
        }

        let number =
            allocate_transaction_number(&mut tx, TransactionType::Sale, Utc::now().year()).await?;
        let mut header =
            TransactionHeader::new(number, TransactionType::Sale, input.location_id, actor);
        header.customer_id = Some(input.customer_id);
        header.shipping_amount = input.shipping_amount;
        header.other_charges = input.other_charges;
        header.discount_amount = input.header_discount;
        header.notes = input.notes.clone();
        header.status = TransactionStatus::Completed;

        let mut lines = Vec::with_capacity(input.lines.len());
        for (index, line_input) in input.lines.iter().enumerate() {
            let item = fetch_active_item(&mut tx, line_input.item_id).await?;
            if !item.is_saleable {
                return Err(Error::validation(format!(
                    "Item {} is not saleable",
                    item.sku
                )));
            }
            let unit_price = match line_input.unit_price.or(item.sale_price) {
                Some(price) => price,
                None => {
                    return Err(Error::validation(format!(
                        "Item {} has no sale price",
                        item.sku
                    )))
                }
            };
            let terms = LineTerms {
                item_id: line_input.item_id,
                quantity: line_input.quantity,
                unit_price,
                discount_amount: line_input.discount_amount,
                tax_rate: line_input.tax_rate,
                rental_start_date: None,
                rental_end_date: None,
                rental_period: None,
                notes: None,
            };
            lines.push(TransactionLine::build(
                header.id,
                (index + 1) as i32,
                terms,
                actor,
            )?);
        }

        header.recompute_totals(&lines);
        insert_header(&mut tx, &header).await?;
        for line in &lines {
            insert_line(&mut tx, line).await?;
        }

        let mut movement_ids = Vec::new();
        for line in &lines {
            let (_, movement) = self
                .inventory
                .consume_for_sale_in_tx(
                    &mut tx,
                    line.item_id,
                    input.location_id,
                    line.quantity,
                    header.id,
                    Some(line.id),
                    actor,
                )
                .await?;
            movement_ids.push(movement.id);
        }

        append_event(
            &mut tx,
            header.id,
            TransactionEventKind::Transaction {
                description: format!("Sale {} created", header.transaction_number),
                details: serde_json::json!({ "customer_id": input.customer_id }),
            },
            actor,
        )
        .await?;
        append_event(
            &mut tx,
            header.id,
            TransactionEventKind::Inventory {
                description: "Stock consumed for sale".to_string(),
                movement_ids,
            },
            actor,
        )
        .await?;

        tx.commit().await?;
        info!(number = %header.transaction_number, "sale created");
        Ok(TransactionDetail { header, lines })
    }

    // ========================================================================
    // RENTALS
    // ========================================================================

    /// Create a rental: header + lines, per-line checkout, and the
    /// lifecycle record.
    pub async fn create_rental(
        &self,
        input: NewRentalInput,
        actor: Uuid,
    ) -> Result<TransactionDetail> {
        if input.lines.is_empty() {
            return Err(Error::validation("A rental needs at least one line"));
        }
        if input.rental_end_date < input.rental_start_date {
            return Err(Error::validation("Rental end date precedes start date"));
        }

        let mut tx = self.pool.begin().await?;
        ensure_location_active(&mut tx, input.location_id).await?;

        for line_input in &input.lines {
            self.ensure_available(&mut tx, line_input.item_id, input.location_id, line_input.quantity)
                .await?;
        }

        let number =
            allocate_transaction_number(&mut tx, TransactionType::Rental, Utc::now().year())
                .await?;
        let mut header =
            TransactionHeader::new(number, TransactionType::Rental, input.location_id, actor);
        header.customer_id = Some(input.customer_id);
        header.rental_start_date = Some(input.rental_start_date);
        header.rental_end_date = Some(input.rental_end_date);
        header.current_rental_status = Some(RentalStatus::RentalInprogress);
        header.status = TransactionStatus::InProgress;
        header.notes = input.notes.clone();

        let mut lines = Vec::with_capacity(input.lines.len());
        let mut deposit_total = Decimal::ZERO;
        for (index, line_input) in input.lines.iter().enumerate() {
            let item = fetch_active_item(&mut tx, line_input.item_id).await?;
            if !item.is_rentable {
                return Err(Error::validation(format!(
                    "Item {} is not rentable",
                    item.sku
                )));
            }
            let unit_rate = match line_input.unit_rate.or(item.rental_rate_per_period) {
                Some(rate) => rate,
                None => {
                    return Err(Error::validation(format!(
                        "Item {} has no rental rate",
                        item.sku
                    )))
                }
            };
            deposit_total += item.security_deposit * line_input.quantity;

            let terms = LineTerms {
                item_id: line_input.item_id,
                quantity: line_input.quantity,
                unit_price: unit_rate,
                discount_amount: line_input.discount_amount,
                tax_rate: line_input.tax_rate,
                rental_start_date: Some(input.rental_start_date),
                rental_end_date: Some(input.rental_end_date),
                rental_period: line_input.rental_period.or(item.rental_period),
                notes: None,
            };
            let mut line =
                TransactionLine::build(header.id, (index + 1) as i32, terms, actor)?;
            line.current_rental_status = Some(RentalStatus::RentalInprogress);
            lines.push(line);
        }
        header.deposit_amount = input.deposit_amount.unwrap_or(deposit_total);

        header.recompute_totals(&lines);
        insert_header(&mut tx, &header).await?;
        for line in &lines {
            insert_line(&mut tx, line).await?;
        }

        let mut movement_ids = Vec::new();
        for line in &lines {
            let (_, _, movement) = self
                .inventory
                .checkout_for_rental_in_tx(
                    &mut tx,
                    RentalCheckoutInput {
                        item_id: line.item_id,
                        location_id: input.location_id,
                        quantity: line.quantity,
                        customer_id: input.customer_id,
                        transaction_header_id: header.id,
                        transaction_line_id: Some(line.id),
                    },
                    actor,
                )
                .await?;
            movement_ids.push(movement.id);
        }

        let lifecycle =
            RentalLifecycle::new(header.id, Some(input.rental_end_date), actor);
        insert_lifecycle(&mut tx, &lifecycle).await?;

        append_event(
            &mut tx,
            header.id,
            TransactionEventKind::Transaction {
                description: format!("Rental {} created", header.transaction_number),
                details: serde_json::json!({
                    "customer_id": input.customer_id,
                    "rental_end_date": input.rental_end_date,
                }),
            },
            actor,
        )
        .await?;
        append_event(
            &mut tx,
            header.id,
            TransactionEventKind::Inventory {
                description: "Units checked out for rental".to_string(),
                movement_ids,
            },
            actor,
        )
        .await?;

        tx.commit().await?;
        info!(number = %header.transaction_number, "rental created");
        Ok(TransactionDetail { header, lines })
    }

    // ========================================================================
    // PAYMENTS
    // ========================================================================

    /// Record a payment against a header and emit a PAYMENT event.
    pub async fn update_payment(
        &self,
        transaction_id: Uuid,
        input: PaymentInput,
        actor: Uuid,
    ) -> Result<TransactionHeader> {
        if input.amount <= Decimal::ZERO {
            return Err(Error::validation("Payment amount must be positive"));
        }

        let mut tx = self.pool.begin().await?;
        let mut header = lock_header(&mut tx, transaction_id).await?;

        if !input.allow_overpayment && input.amount > header.balance_due() {
            return Err(Error::validation(format!(
                "Payment {} exceeds balance due {}",
                input.amount,
                header.balance_due()
            )));
        }

        header.add_payment(input.amount, actor)?;
        header.payment_method = Some(input.payment_method.clone());
        if input.payment_reference.is_some() {
            header.payment_reference = input.payment_reference.clone();
        }

        sqlx::query(
            "UPDATE transaction_headers SET paid_amount = $2, payment_status = $3, \
             payment_method = $4, payment_reference = $5, updated_at = $6, updated_by = $7, \
             version = $8 WHERE id = $1",
        )
        .bind(header.id)
        .bind(header.paid_amount)
        .bind(header.payment_status)
        .bind(&header.payment_method)
        .bind(&header.payment_reference)
        .bind(header.audit.updated_at)
        .bind(header.audit.updated_by)
        .bind(header.audit.version)
        .execute(&mut *tx)
        .await?;

        append_event(
            &mut tx,
            header.id,
            TransactionEventKind::Payment {
                amount: input.amount,
                method: input.payment_method.clone(),
                reference: input.payment_reference.clone(),
            },
            actor,
        )
        .await?;

        tx.commit().await?;
        info!(
            number = %header.transaction_number,
            amount = %input.amount,
            status = ?header.payment_status,
            "payment recorded"
        );
        Ok(header)
    }

    // ========================================================================
    // LIFECYCLE OPERATIONS
    // ========================================================================

    /// Cancel a header that has no inventory side effects yet.
    pub async fn cancel_transaction(
        &self,
        transaction_id: Uuid,
        reason: &str,
        actor: Uuid,
    ) -> Result<TransactionHeader> {
        let mut tx = self.pool.begin().await?;
        let mut header = lock_header(&mut tx, transaction_id).await?;

        if !header.can_be_cancelled() {
            return Err(Error::IllegalStateTransition(format!(
                "Transaction {} cannot be cancelled in status {:?}",
                header.transaction_number, header.status
            )));
        }
        header.status = TransactionStatus::Cancelled;
        header.audit.touch(actor);
        update_header_status(&mut tx, &header).await?;

        append_event(
            &mut tx,
            header.id,
            TransactionEventKind::Transaction {
                description: format!("Cancelled: {reason}"),
                details: serde_json::json!({ "reason": reason }),
            },
            actor,
        )
        .await?;

        tx.commit().await?;
        warn!(number = %header.transaction_number, reason, "transaction cancelled");
        Ok(header)
    }

    /// Soft delete: hides the header from default queries, lines become
    /// immutable.
    pub async fn soft_delete_transaction(
        &self,
        transaction_id: Uuid,
        actor: Uuid,
    ) -> Result<TransactionHeader> {
        let mut tx = self.pool.begin().await?;
        let mut header = lock_header(&mut tx, transaction_id).await?;
        header.soft_delete(actor);

        sqlx::query(
            "UPDATE transaction_headers SET is_active = FALSE, deleted_at = $2, \
             deleted_by = $3, updated_at = $4, updated_by = $5, version = $6 WHERE id = $1",
        )
        .bind(header.id)
        .bind(header.deleted_at)
        .bind(header.deleted_by)
        .bind(header.audit.updated_at)
        .bind(header.audit.updated_by)
        .bind(header.audit.version)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(number = %header.transaction_number, "transaction soft-deleted");
        Ok(header)
    }

    /// Bulk status update with per-id error collection.
    pub async fn bulk_update_status(
        &self,
        transaction_ids: &[Uuid],
        new_status: TransactionStatus,
        actor: Uuid,
    ) -> Result<BulkStatusResult> {
        let mut updated = 0;
        let mut failed = Vec::new();
        for transaction_id in transaction_ids {
            match self
                .update_single_status(*transaction_id, new_status, actor)
                .await
            {
                Ok(()) => updated += 1,
                Err(err) => failed.push(BulkStatusError {
                    transaction_id: *transaction_id,
                    message: err.to_string(),
                }),
            }
        }
        Ok(BulkStatusResult {
            total: transaction_ids.len(),
            updated,
            failed,
        })
    }

    async fn update_single_status(
        &self,
        transaction_id: Uuid,
        new_status: TransactionStatus,
        actor: Uuid,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let mut header = lock_header(&mut tx, transaction_id).await?;
        header.status = new_status;
        header.audit.touch(actor);
        update_header_status(&mut tx, &header).await?;
        tx.commit().await?;
        Ok(())
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    pub async fn get_transaction(&self, transaction_id: Uuid) -> Result<TransactionDetail> {
        let header = sqlx::query_as::<_, TransactionHeader>(&format!(
            "SELECT {HEADER_COLUMNS} FROM transaction_headers WHERE id = $1 AND is_active = TRUE"
        ))
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::not_found(format!("Transaction {transaction_id}")))?;

        let lines = self.lines_for(transaction_id).await?;
        Ok(TransactionDetail { header, lines })
    }

    pub async fn get_by_number(&self, transaction_number: &str) -> Result<TransactionDetail> {
        let header = sqlx::query_as::<_, TransactionHeader>(&format!(
            "SELECT {HEADER_COLUMNS} FROM transaction_headers \
             WHERE transaction_number = $1 AND is_active = TRUE"
        ))
        .bind(transaction_number)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::not_found(format!("Transaction {transaction_number}")))?;

        let lines = self.lines_for(header.id).await?;
        Ok(TransactionDetail { header, lines })
    }

    /// Filtered listing; soft-deleted headers are excluded unless asked
    /// for explicitly.
    pub async fn list_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> Result<Vec<TransactionHeader>> {
        let mut query = QueryBuilder::new(format!(
            "SELECT {HEADER_COLUMNS} FROM transaction_headers WHERE 1 = 1"
        ));
        if !filter.include_deleted {
            query.push(" AND is_active = TRUE");
        }
        if let Some(transaction_type) = filter.transaction_type {
            query.push(" AND transaction_type = ");
            query.push_bind(transaction_type);
        }
        if let Some(status) = filter.status {
            query.push(" AND status = ");
            query.push_bind(status);
        }
        if let Some(customer_id) = filter.customer_id {
            query.push(" AND customer_id = ");
            query.push_bind(customer_id);
        }
        if let Some(supplier_id) = filter.supplier_id {
            query.push(" AND supplier_id = ");
            query.push_bind(supplier_id);
        }
        if let Some(location_id) = filter.location_id {
            query.push(" AND location_id = ");
            query.push_bind(location_id);
        }
        if let Some(payment_status) = filter.payment_status {
            query.push(" AND payment_status = ");
            query.push_bind(payment_status);
        }
        if let Some(date_from) = filter.date_from {
            query.push(" AND transaction_date::date >= ");
            query.push_bind(date_from);
        }
        if let Some(date_to) = filter.date_to {
            query.push(" AND transaction_date::date <= ");
            query.push_bind(date_to);
        }
        query.push(" ORDER BY transaction_date DESC LIMIT ");
        query.push_bind(if filter.limit > 0 { filter.limit } else { 100 });
        query.push(" OFFSET ");
        query.push_bind(filter.offset.max(0));

        let headers = query
            .build_query_as::<TransactionHeader>()
            .fetch_all(&self.pool)
            .await?;
        Ok(headers)
    }

    /// Text search over number, reference, and notes.
    pub async fn search_transactions(
        &self,
        term: &str,
        transaction_type: Option<TransactionType>,
        limit: i64,
    ) -> Result<Vec<TransactionHeader>> {
        let pattern = format!("%{term}%");
        let mut query = QueryBuilder::new(format!(
            "SELECT {HEADER_COLUMNS} FROM transaction_headers WHERE is_active = TRUE AND \
             (transaction_number ILIKE "
        ));
        query.push_bind(pattern.clone());
        query.push(" OR reference_number ILIKE ");
        query.push_bind(pattern.clone());
        query.push(" OR payment_reference ILIKE ");
        query.push_bind(pattern.clone());
        query.push(" OR notes ILIKE ");
        query.push_bind(pattern);
        query.push(")");
        if let Some(transaction_type) = transaction_type {
            query.push(" AND transaction_type = ");
            query.push_bind(transaction_type);
        }
        query.push(" ORDER BY transaction_date DESC LIMIT ");
        query.push_bind(limit.clamp(1, 200));

        let headers = query
            .build_query_as::<TransactionHeader>()
            .fetch_all(&self.pool)
            .await?;
        Ok(headers)
    }

    pub async fn customer_history(
        &self,
        customer_id: Uuid,
        transaction_type: Option<TransactionType>,
        limit: i64,
    ) -> Result<Vec<TransactionHeader>> {
        let filter = TransactionFilter {
            customer_id: Some(customer_id),
            transaction_type,
            limit,
            ..Default::default()
        };
        self.list_transactions(&filter).await
    }

    pub async fn supplier_history(
        &self,
        supplier_id: Uuid,
        transaction_type: Option<TransactionType>,
        limit: i64,
    ) -> Result<Vec<TransactionHeader>> {
        let filter = TransactionFilter {
            supplier_id: Some(supplier_id),
            transaction_type,
            limit,
            ..Default::default()
        };
        self.list_transactions(&filter).await
    }

    /// Aggregated totals over active headers.
    pub async fn transaction_totals(
        &self,
        filter: &TransactionFilter,
    ) -> Result<TransactionTotals> {
        let mut query = QueryBuilder::new(
            "SELECT COUNT(*) AS transaction_count, \
             COALESCE(SUM(total_amount), 0) AS total_amount, \
             COALESCE(SUM(paid_amount), 0) AS paid_amount, \
             COALESCE(SUM(tax_amount), 0) AS tax_amount, \
             COALESCE(SUM(discount_amount), 0) AS discount_amount, \
             COALESCE(SUM(total_amount - paid_amount), 0) AS outstanding_amount \
             FROM transaction_headers WHERE is_active = TRUE",
        );
        if let Some(transaction_type) = filter.transaction_type {
            query.push(" AND transaction_type = ");
            query.push_bind(transaction_type);
        }
        if let Some(location_id) = filter.location_id {
            query.push(" AND location_id = ");
            query.push_bind(location_id);
        }
        if let Some(date_from) = filter.date_from {
            query.push(" AND transaction_date::date >= ");
            query.push_bind(date_from);
        }
        if let Some(date_to) = filter.date_to {
            query.push(" AND transaction_date::date <= ");
            query.push_bind(date_to);
        }

        let totals = query
            .build_query_as::<TransactionTotals>()
            .fetch_one(&self.pool)
            .await?;
        Ok(totals)
    }

    /// Rental headers with outstanding quantity past the per-line end
    /// date. Per-line dates are authoritative for overdue detection.
    pub async fn overdue_rentals(&self, as_of: NaiveDate) -> Result<Vec<TransactionHeader>> {
        let headers = sqlx::query_as::<_, TransactionHeader>(&format!(
            "SELECT DISTINCT {prefixed} FROM transaction_headers h \
             JOIN transaction_lines l ON l.transaction_header_id = h.id \
             WHERE h.transaction_type = 'RENTAL' AND h.is_active = TRUE \
             AND h.status IN ('IN_PROGRESS', 'PROCESSING') \
             AND l.returned_quantity < l.quantity AND l.rental_end_date < $1 \
             ORDER BY h.transaction_date DESC",
            prefixed = header_columns_prefixed("h")
        ))
        .bind(as_of)
        .fetch_all(&self.pool)
        .await?;
        Ok(headers)
    }

    /// Retention job for the event log: ERROR events age out on their own
    /// shorter horizon, everything else on the inventory horizon.
    pub async fn purge_expired_events(
        &self,
        config: &rentora_shared::config::InventoryConfig,
    ) -> Result<u64> {
        let now = Utc::now();
        let error_horizon =
            now - chrono::Duration::days(365 * config.error_event_retention_years);
        let general_horizon =
            now - chrono::Duration::days(365 * config.movement_retention_years);

        let purged = sqlx::query(
            "DELETE FROM transaction_events WHERE \
             (event_category = 'ERROR' AND event_timestamp < $1) \
             OR (event_category <> 'ERROR' AND event_timestamp < $2)",
        )
        .bind(error_horizon)
        .bind(general_horizon)
        .execute(&self.pool)
        .await?;
        if purged.rows_affected() > 0 {
            info!(purged = purged.rows_affected(), "purged expired transaction events");
        }
        Ok(purged.rows_affected())
    }

    pub(crate) async fn lines_for(&self, transaction_id: Uuid) -> Result<Vec<TransactionLine>> {
        let lines = sqlx::query_as::<_, TransactionLine>(&format!(
            "SELECT {LINE_COLUMNS} FROM transaction_lines \
             WHERE transaction_header_id = $1 ORDER BY line_number"
        ))
        .bind(transaction_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(lines)
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    async fn ensure_available(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        item_id: Uuid,
        location_id: Uuid,
        quantity: Decimal,
    ) -> Result<()> {
        if quantity <= Decimal::ZERO {
            return Err(Error::validation("Line quantity must be positive"));
        }
        let available: Option<Decimal> = sqlx::query_scalar(
            "SELECT quantity_available FROM stock_levels \
             WHERE item_id = $1 AND location_id = $2",
        )
        .bind(item_id)
        .bind(location_id)
        .fetch_optional(&mut **tx)
        .await?;
        let available = available.unwrap_or(Decimal::ZERO);
        if available < quantity {
            return Err(Error::InsufficientStock {
                requested: quantity,
                available,
                location_id,
            });
        }
        Ok(())
    }
}

// ============================================================================
// ROW HELPERS
// ============================================================================

fn header_columns_prefixed(alias: &str) -> String {
    HEADER_COLUMNS
        .split(", ")
        .map(|column| format!("{alias}.{}", column.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) async fn lock_header(
    tx: &mut Transaction<'_, Postgres>,
    transaction_id: Uuid,
) -> Result<TransactionHeader> {
    sqlx::query_as::<_, TransactionHeader>(&format!(
        "SELECT {HEADER_COLUMNS} FROM transaction_headers \
         WHERE id = $1 AND is_active = TRUE FOR UPDATE"
    ))
    .bind(transaction_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| Error::not_found(format!("Transaction {transaction_id}")))
}

pub(crate) async fn ensure_location_active(
    tx: &mut Transaction<'_, Postgres>,
    location_id: Uuid,
) -> Result<()> {
    let active: Option<bool> =
        sqlx::query_scalar("SELECT is_active FROM locations WHERE id = $1")
            .bind(location_id)
            .fetch_optional(&mut **tx)
            .await?;
    match active {
        Some(true) => Ok(()),
        Some(false) => Err(Error::validation(format!(
            "Location {location_id} is inactive"
        ))),
        None => Err(Error::not_found(format!("Location {location_id}"))),
    }
}

pub(crate) async fn fetch_active_item(
    tx: &mut Transaction<'_, Postgres>,
    item_id: Uuid,
) -> Result<Item> {
    sqlx::query_as::<_, Item>(&format!(
        "SELECT {ITEM_COLUMNS} FROM items WHERE id = $1 AND is_active = TRUE"
    ))
    .bind(item_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| Error::not_found(format!("Item {item_id}")))
}

pub(crate) async fn insert_header(
    tx: &mut Transaction<'_, Postgres>,
    header: &TransactionHeader,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO transaction_headers (id, transaction_number, transaction_type, status, \
         customer_id, supplier_id, location_id, transaction_date, reference_number, \
         subtotal_amount, discount_amount, tax_amount, shipping_amount, other_charges, \
         total_amount, paid_amount, payment_status, payment_method, payment_reference, \
         deposit_amount, rental_start_date, rental_end_date, current_rental_status, notes, \
         deleted_at, deleted_by, created_at, created_by, updated_at, updated_by, is_active, \
         version) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
         $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29, $30, $31, $32)",
    )
    .bind(header.id)
    .bind(&header.transaction_number)
    .bind(header.transaction_type)
    .bind(header.status)
    .bind(header.customer_id)
    .bind(header.supplier_id)
    .bind(header.location_id)
    .bind(header.transaction_date)
    .bind(&header.reference_number)
    .bind(header.subtotal_amount)
    .bind(header.discount_amount)
    .bind(header.tax_amount)
    .bind(header.shipping_amount)
    .bind(header.other_charges)
    .bind(header.total_amount)
    .bind(header.paid_amount)
    .bind(header.payment_status)
    .bind(&header.payment_method)
    .bind(&header.payment_reference)
    .bind(header.deposit_amount)
    .bind(header.rental_start_date)
    .bind(header.rental_end_date)
    .bind(header.current_rental_status)
    .bind(&header.notes)
    .bind(header.deleted_at)
    .bind(header.deleted_by)
    .bind(header.audit.created_at)
    .bind(header.audit.created_by)
    .bind(header.audit.updated_at)
    .bind(header.audit.updated_by)
    .bind(header.audit.is_active)
    .bind(header.audit.version)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub(crate) async fn insert_line(
    tx: &mut Transaction<'_, Postgres>,
    line: &TransactionLine,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO transaction_lines (id, transaction_header_id, line_number, item_id, \
         quantity, unit_price, discount_amount, tax_rate, tax_amount, line_total, \
         rental_start_date, rental_end_date, rental_period, returned_quantity, \
         current_rental_status, notes, created_at, created_by, updated_at, updated_by, \
         is_active, version) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
         $17, $18, $19, $20, $21, $22)",
    )
    .bind(line.id)
    .bind(line.transaction_header_id)
    .bind(line.line_number)
    .bind(line.item_id)
    .bind(line.quantity)
    .bind(line.unit_price)
    .bind(line.discount_amount)
    .bind(line.tax_rate)
    .bind(line.tax_amount)
    .bind(line.line_total)
    .bind(line.rental_start_date)
    .bind(line.rental_end_date)
    .bind(line.rental_period)
    .bind(line.returned_quantity)
    .bind(line.current_rental_status)
    .bind(&line.notes)
    .bind(line.audit.created_at)
    .bind(line.audit.created_by)
    .bind(line.audit.updated_at)
    .bind(line.audit.updated_by)
    .bind(line.audit.is_active)
    .bind(line.audit.version)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub(crate) async fn update_header_status(
    tx: &mut Transaction<'_, Postgres>,
    header: &TransactionHeader,
) -> Result<()> {
    sqlx::query(
        "UPDATE transaction_headers SET status = $2, current_rental_status = $3, \
         updated_at = $4, updated_by = $5, version = $6 WHERE id = $1",
    )
    .bind(header.id)
    .bind(header.status)
    .bind(header.current_rental_status)
    .bind(header.audit.updated_at)
    .bind(header.audit.updated_by)
    .bind(header.audit.version)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub(crate) async fn insert_lifecycle(
    tx: &mut Transaction<'_, Postgres>,
    lifecycle: &RentalLifecycle,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO rental_lifecycles (id, transaction_id, current_status, \
         last_status_change, expected_return_date, total_returned_quantity, \
         total_late_fees, total_damage_fees, total_other_fees, notes, created_at, \
         created_by, updated_at, updated_by, is_active, version) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
    )
    .bind(lifecycle.id)
    .bind(lifecycle.transaction_id)
    .bind(lifecycle.current_status)
    .bind(lifecycle.last_status_change)
    .bind(lifecycle.expected_return_date)
    .bind(lifecycle.total_returned_quantity)
    .bind(lifecycle.total_late_fees)
    .bind(lifecycle.total_damage_fees)
    .bind(lifecycle.total_other_fees)
    .bind(&lifecycle.notes)
    .bind(lifecycle.audit.created_at)
    .bind(lifecycle.audit.created_by)
    .bind(lifecycle.audit.updated_at)
    .bind(lifecycle.audit.updated_by)
    .bind(lifecycle.audit.is_active)
    .bind(lifecycle.audit.version)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
