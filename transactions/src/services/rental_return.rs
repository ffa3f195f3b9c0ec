// ============================================================================
// RENTORA - RENTAL RETURN PROCESSOR
// ============================================================================
// Module: transactions/src/services/rental_return.rs
// Description: Mixed-condition rental returns: routes items among
//              available/damaged/beyond-repair/lost, computes late fees and
//              damage charges, and keeps the rental lifecycle current.
//              Damaged quantities never re-enter available stock.
// ============================================================================

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::info;
use uuid::Uuid;

use rentora_inventory::services::inventory::{
    InventoryService, RentalReturnInput, UnitDisposition,
};
use rentora_shared::config::RentalConfig;
use rentora_shared::error::{Error, Result};
use rentora_shared::money::round_money;

use crate::models::enums::{
    DamageSeverity, RentalStatus, ReturnEventType, TransactionStatus, TransactionType,
};
use crate::models::event::{append_event, TransactionEventKind};
use crate::models::header::TransactionHeader;
use crate::models::lifecycle::{RentalItemInspection, RentalLifecycle, RentalReturnEvent};
use crate::models::line::TransactionLine;
use crate::services::transaction::{lock_header, update_header_status, LINE_COLUMNS};

const LIFECYCLE_COLUMNS: &str = "id, transaction_id, current_status, last_status_change, \
     expected_return_date, total_returned_quantity, total_late_fees, total_damage_fees, \
     total_other_fees, notes, created_at, created_by, updated_at, updated_by, is_active, \
     version";

// ============================================================================
// REQUEST / RESPONSE MODELS
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct DamageDetailInput {
    pub quantity: Decimal,
    pub damage_type: String,
    pub damage_severity: DamageSeverity,
    pub description: Option<String>,
    pub estimated_repair_cost: Option<Decimal>,
    #[serde(default)]
    pub serial_numbers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReturnLineInput {
    pub line_id: Uuid,
    pub total_return_quantity: Decimal,
    pub quantity_good: Decimal,
    #[serde(default)]
    pub quantity_damaged: Decimal,
    #[serde(default)]
    pub quantity_beyond_repair: Decimal,
    #[serde(default)]
    pub quantity_lost: Decimal,
    #[serde(default)]
    pub good_serials: Vec<String>,
    #[serde(default)]
    pub lost_serials: Vec<String>,
    #[serde(default)]
    pub damage_details: Vec<DamageDetailInput>,
    pub damage_penalty: Option<Decimal>,
    pub condition_notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RentalReturnRequest {
    pub rental_id: Uuid,
    pub return_date: NaiveDate,
    pub items: Vec<ReturnLineInput>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LineReturnOutcome {
    pub line_id: Uuid,
    pub item_id: Uuid,
    pub original_quantity: Decimal,
    pub returned_this_time: Decimal,
    pub remaining_quantity: Decimal,
    pub new_status: RentalStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReturnFinancialImpact {
    pub deposit_amount: Decimal,
    pub late_fee: Decimal,
    pub damage_penalty: Decimal,
    pub lost_item_charges: Decimal,
    pub days_late: i64,
    pub total_refund: Decimal,
    pub charges_applied: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RentalReturnOutcome {
    pub rental_id: Uuid,
    pub transaction_number: String,
    pub return_date: NaiveDate,
    pub lines: Vec<LineReturnOutcome>,
    pub rental_status: RentalStatus,
    pub financial_impact: ReturnFinancialImpact,
}

// ============================================================================
// PROCESSOR IMPLEMENTATION
// ============================================================================

#[derive(Clone)]
pub struct RentalReturnProcessor {
    pool: PgPool,
    inventory: InventoryService,
    config: RentalConfig,
}

impl RentalReturnProcessor {
    pub fn new(pool: PgPool, inventory: InventoryService, config: RentalConfig) -> Self {
        Self {
            pool,
            inventory,
            config,
        }
    }

    /// Process a complete rental return in one database transaction.
    pub async fn process(
        &self,
        request: RentalReturnRequest,
        actor: Uuid,
    ) -> Result<RentalReturnOutcome> {
        if request.items.is_empty() {
            return Err(Error::validation("A return needs at least one item"));
        }

        let mut tx = self.pool.begin().await?;

        let mut header = lock_header(&mut tx, request.rental_id).await?;
        if header.transaction_type != TransactionType::Rental {
            return Err(Error::validation(format!(
                "Transaction {} is not a rental",
                header.transaction_number
            )));
        }
        if header.current_rental_status == Some(RentalStatus::RentalCompleted) {
            return Err(Error::validation(format!(
                "Rental {} has already been completed",
                header.transaction_number
            )));
        }

        let mut lines = lock_lines(&mut tx, header.id).await?;
        let mut lifecycle = self
            .lock_or_create_lifecycle(&mut tx, &header, actor)
            .await?;

        let mut outcomes = Vec::with_capacity(request.items.len());
        let mut pending_inspections: Vec<(Uuid, DamageDetailInput)> = Vec::new();
        let mut total_returned = Decimal::ZERO;
        let mut damage_penalty_total = Decimal::ZERO;
        let mut lost_charges_total = Decimal::ZERO;
        let mut late_line_count: i64 = 0;

        for item_return in &request.items {
            let line = lines
                .iter_mut()
                .find(|line| line.id == item_return.line_id)
                .ok_or_else(|| {
                    Error::not_found(format!(
                        "Transaction line {} on rental {}",
                        item_return.line_id, request.rental_id
                    ))
                })?;

            validate_buckets(item_return)?;
            if line.returned_quantity + item_return.total_return_quantity > line.quantity {
                return Err(Error::validation(format!(
                    "Return of {} exceeds outstanding quantity {} on line {}",
                    item_return.total_return_quantity,
                    line.outstanding_quantity(),
                    line.line_number
                )));
            }

            let end_date = line.rental_end_date.or(header.rental_end_date);
            let is_late = matches!(end_date, Some(end) if request.return_date > end);
            if is_late {
                late_line_count += 1;
            }
            let fully_returned = line.returned_quantity + item_return.total_return_quantity
                >= line.quantity;
            let new_status = line_status_after_return(fully_returned, is_late);
            let old_status = line.current_rental_status;

            // Physical routing through the inventory engine; the stock
            // level lock is acquired before any unit locks.
            let (_, level, _) = self
                .inventory
                .process_return_in_tx(
                    &mut tx,
                    RentalReturnInput {
                        item_id: line.item_id,
                        location_id: header.location_id,
                        split_quantity: item_return.total_return_quantity,
                        damaged_quantity: item_return.quantity_damaged,
                        beyond_repair_quantity: item_return.quantity_beyond_repair,
                        lost_quantity: item_return.quantity_lost,
                        disposition: disposition_for(item_return),
                        condition_notes: item_return.condition_notes.clone(),
                        transaction_header_id: header.id,
                        transaction_line_id: Some(line.id),
                    },
                    actor,
                )
                .await?;

            line.apply_return(item_return.total_return_quantity, new_status, actor)?;
            update_line_return(&mut tx, line).await?;
            insert_status_log(
                &mut tx,
                header.id,
                Some(line.id),
                Some(lifecycle.id),
                old_status,
                new_status,
                "Rental return",
                actor,
            )
            .await?;

            if item_return.quantity_lost > Decimal::ZERO {
                let item = crate::services::transaction::fetch_active_item(&mut tx, line.item_id)
                    .await?;
                let replacement_cost = item.sale_price.unwrap_or(level.average_cost);
                lost_charges_total +=
                    round_money(item_return.quantity_lost * replacement_cost);
            }
            damage_penalty_total += item_return.damage_penalty.unwrap_or(Decimal::ZERO);
            total_returned += item_return.total_return_quantity;

            for detail in &item_return.damage_details {
                pending_inspections.push((line.id, detail.clone()));
            }

            outcomes.push(LineReturnOutcome {
                line_id: line.id,
                item_id: line.item_id,
                original_quantity: line.quantity,
                returned_this_time: item_return.total_return_quantity,
                remaining_quantity: line.outstanding_quantity(),
                new_status,
            });
        }

        // Header aggregation from the per-line statuses; untouched lines
        // keep their current value.
        let line_statuses: Vec<RentalStatus> = lines
            .iter()
            .filter_map(|line| line.current_rental_status)
            .collect();
        let aggregate = TransactionHeader::aggregate_rental_status(&line_statuses);
        let old_header_status = header.current_rental_status;
        header.current_rental_status = Some(aggregate);
        header.status = if aggregate == RentalStatus::RentalCompleted {
            TransactionStatus::Completed
        } else {
            TransactionStatus::InProgress
        };
        header.audit.touch(actor);
        update_header_status(&mut tx, &header).await?;
        if old_header_status != Some(aggregate) {
            insert_status_log(
                &mut tx,
                header.id,
                None,
                Some(lifecycle.id),
                old_header_status,
                aggregate,
                "Rental return",
                actor,
            )
            .await?;
        }

        // Fees and financial impact.
        let days_late = days_late(&header, &lines, request.return_date);
        let late_fee = if days_late > 0 {
            round_money(
                self.config.late_fee_per_item_day
                    * Decimal::from(days_late)
                    * Decimal::from(late_line_count.max(1)),
            )
        } else {
            Decimal::ZERO
        };

        lifecycle.update_status(aggregate, actor);
        lifecycle.total_returned_quantity += total_returned;
        lifecycle.add_fees(late_fee, damage_penalty_total, lost_charges_total, actor);
        persist_lifecycle(&mut tx, &lifecycle).await?;

        let return_event = RentalReturnEvent {
            id: Uuid::new_v4(),
            rental_lifecycle_id: lifecycle.id,
            event_type: ReturnEventType::Return,
            event_date: request.return_date,
            items_returned: serde_json::to_value(&outcomes)?,
            total_quantity_returned: total_returned,
            late_fees_charged: late_fee,
            damage_fees_charged: damage_penalty_total,
            other_fees_charged: lost_charges_total,
            new_return_date: None,
            extension_reason: None,
            notes: request.notes.clone(),
            processed_by: Some(actor),
            created_at: Utc::now(),
        };
        insert_return_event(&mut tx, &return_event).await?;

        for (line_id, detail) in &pending_inspections {
            let inspection = RentalItemInspection {
                id: Uuid::new_v4(),
                return_event_id: return_event.id,
                transaction_line_id: *line_id,
                quantity_inspected: detail.quantity,
                condition: "DAMAGED".to_string(),
                damage_type: Some(detail.damage_type.clone()),
                damage_severity: Some(detail.damage_severity),
                damage_description: detail.description.clone(),
                estimated_repair_cost: detail.estimated_repair_cost,
                repair_feasible: detail.damage_severity != DamageSeverity::BeyondRepair,
                inspected_by: Some(actor),
                created_at: Utc::now(),
            };
            insert_inspection(&mut tx, &inspection).await?;
        }

        append_event(
            &mut tx,
            header.id,
            TransactionEventKind::Transaction {
                description: format!(
                    "Return processed: {} item(s), status {:?}",
                    request.items.len(),
                    aggregate
                ),
                details: serde_json::json!({
                    "return_date": request.return_date,
                    "total_returned": total_returned,
                }),
            },
            actor,
        )
        .await?;

        tx.commit().await?;

        let total_fees = late_fee + damage_penalty_total + lost_charges_total;
        let financial_impact = ReturnFinancialImpact {
            deposit_amount: header.deposit_amount,
            late_fee,
            damage_penalty: damage_penalty_total,
            lost_item_charges: lost_charges_total,
            days_late,
            total_refund: (header.deposit_amount - total_fees).max(Decimal::ZERO),
            charges_applied: total_fees > Decimal::ZERO,
        };

        info!(
            number = %header.transaction_number,
            status = ?aggregate,
            late_fee = %late_fee,
            "rental return processed"
        );
        Ok(RentalReturnOutcome {
            rental_id: header.id,
            transaction_number: header.transaction_number.clone(),
            return_date: request.return_date,
            lines: outcomes,
            rental_status: aggregate,
            financial_impact,
        })
    }

    /// Extend a rental: pushes the expected return date forward and marks
    /// outstanding lines EXTENDED.
    pub async fn extend(
        &self,
        rental_id: Uuid,
        new_return_date: NaiveDate,
        reason: Option<String>,
        actor: Uuid,
    ) -> Result<RentalLifecycle> {
        let mut tx = self.pool.begin().await?;

        let mut header = lock_header(&mut tx, rental_id).await?;
        if header.transaction_type != TransactionType::Rental {
            return Err(Error::validation(format!(
                "Transaction {} is not a rental",
                header.transaction_number
            )));
        }
        if header.current_rental_status == Some(RentalStatus::RentalCompleted) {
            return Err(Error::validation(format!(
                "Rental {} has already been completed",
                header.transaction_number
            )));
        }
        if matches!(header.rental_start_date, Some(start) if new_return_date < start) {
            return Err(Error::validation(
                "New return date precedes the rental start date",
            ));
        }

        let mut lifecycle = self
            .lock_or_create_lifecycle(&mut tx, &header, actor)
            .await?;
        lifecycle.expected_return_date = Some(new_return_date);
        lifecycle.update_status(RentalStatus::RentalExtended, actor);
        persist_lifecycle(&mut tx, &lifecycle).await?;

        sqlx::query(
            "UPDATE transaction_lines SET current_rental_status = $2, rental_end_date = $3, \
             updated_at = $4, updated_by = $5, version = version + 1 \
             WHERE transaction_header_id = $1 AND returned_quantity < quantity",
        )
        .bind(header.id)
        .bind(RentalStatus::RentalExtended)
        .bind(new_return_date)
        .bind(Utc::now())
        .bind(actor)
        .execute(&mut *tx)
        .await?;

        let old_status = header.current_rental_status;
        header.current_rental_status = Some(RentalStatus::RentalExtended);
        header.rental_end_date = Some(new_return_date);
        header.audit.touch(actor);
        sqlx::query(
            "UPDATE transaction_headers SET current_rental_status = $2, rental_end_date = $3, \
             updated_at = $4, updated_by = $5, version = $6 WHERE id = $1",
        )
        .bind(header.id)
        .bind(header.current_rental_status)
        .bind(header.rental_end_date)
        .bind(header.audit.updated_at)
        .bind(header.audit.updated_by)
        .bind(header.audit.version)
        .execute(&mut *tx)
        .await?;

        insert_status_log(
            &mut tx,
            header.id,
            None,
            Some(lifecycle.id),
            old_status,
            RentalStatus::RentalExtended,
            reason.as_deref().unwrap_or("Rental extension"),
            actor,
        )
        .await?;

        let event = RentalReturnEvent {
            id: Uuid::new_v4(),
            rental_lifecycle_id: lifecycle.id,
            event_type: ReturnEventType::Extension,
            event_date: Utc::now().date_naive(),
            items_returned: serde_json::Value::Array(Vec::new()),
            total_quantity_returned: Decimal::ZERO,
            late_fees_charged: Decimal::ZERO,
            damage_fees_charged: Decimal::ZERO,
            other_fees_charged: Decimal::ZERO,
            new_return_date: Some(new_return_date),
            extension_reason: reason,
            notes: None,
            processed_by: Some(actor),
            created_at: Utc::now(),
        };
        insert_return_event(&mut tx, &event).await?;

        tx.commit().await?;
        info!(number = %header.transaction_number, %new_return_date, "rental extended");
        Ok(lifecycle)
    }

    async fn lock_or_create_lifecycle(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        header: &TransactionHeader,
        actor: Uuid,
    ) -> Result<RentalLifecycle> {
        let existing = sqlx::query_as::<_, RentalLifecycle>(&format!(
            "SELECT {LIFECYCLE_COLUMNS} FROM rental_lifecycles \
             WHERE transaction_id = $1 FOR UPDATE"
        ))
        .bind(header.id)
        .fetch_optional(&mut **tx)
        .await?;
        if let Some(lifecycle) = existing {
            return Ok(lifecycle);
        }
        let lifecycle = RentalLifecycle::new(header.id, header.rental_end_date, actor);
        crate::services::transaction::insert_lifecycle(tx, &lifecycle).await?;
        Ok(lifecycle)
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn validate_buckets(item_return: &ReturnLineInput) -> Result<()> {
    let buckets = [
        item_return.quantity_good,
        item_return.quantity_damaged,
        item_return.quantity_beyond_repair,
        item_return.quantity_lost,
    ];
    if item_return.total_return_quantity <= Decimal::ZERO {
        return Err(Error::validation("Return quantity must be positive"));
    }
    if buckets.iter().any(|bucket| *bucket < Decimal::ZERO) {
        return Err(Error::validation("Return buckets must be non-negative"));
    }
    let sum: Decimal = buckets.iter().copied().sum();
    if sum != item_return.total_return_quantity {
        return Err(Error::validation(format!(
            "Bucket sum {} does not match total return quantity {}",
            sum, item_return.total_return_quantity
        )));
    }
    Ok(())
}

/// Completed when the line is fully back (regardless of condition mix),
/// partial otherwise; lateness upgrades either branch.
fn line_status_after_return(fully_returned: bool, is_late: bool) -> RentalStatus {
    match (fully_returned, is_late) {
        (true, false) => RentalStatus::RentalCompleted,
        (true, true) => RentalStatus::RentalLate,
        (false, false) => RentalStatus::RentalPartialReturn,
        (false, true) => RentalStatus::RentalLatePartialReturn,
    }
}

fn disposition_for(item_return: &ReturnLineInput) -> UnitDisposition {
    let mut damaged_serials = Vec::new();
    let mut beyond_repair_serials = Vec::new();
    for detail in &item_return.damage_details {
        if detail.damage_severity == DamageSeverity::BeyondRepair {
            beyond_repair_serials.extend(detail.serial_numbers.iter().cloned());
        } else {
            damaged_serials.extend(detail.serial_numbers.iter().cloned());
        }
    }
    UnitDisposition {
        good_serials: item_return.good_serials.clone(),
        damaged_serials,
        beyond_repair_serials,
        lost_serials: item_return.lost_serials.clone(),
    }
}

/// Days past the authoritative end date. Lines are checked first; the
/// header date only backstops lines that carry none.
fn days_late(
    header: &TransactionHeader,
    lines: &[TransactionLine],
    return_date: NaiveDate,
) -> i64 {
    let end_date = lines
        .iter()
        .filter_map(|line| line.rental_end_date)
        .min()
        .or(header.rental_end_date);
    match end_date {
        Some(end) if return_date > end => (return_date - end).num_days(),
        _ => 0,
    }
}

async fn lock_lines(
    tx: &mut Transaction<'_, Postgres>,
    transaction_id: Uuid,
) -> Result<Vec<TransactionLine>> {
    let lines = sqlx::query_as::<_, TransactionLine>(&format!(
        "SELECT {LINE_COLUMNS} FROM transaction_lines \
         WHERE transaction_header_id = $1 ORDER BY line_number FOR UPDATE"
    ))
    .bind(transaction_id)
    .fetch_all(&mut **tx)
    .await?;
    Ok(lines)
}

async fn update_line_return(
    tx: &mut Transaction<'_, Postgres>,
    line: &TransactionLine,
) -> Result<()> {
    sqlx::query(
        "UPDATE transaction_lines SET returned_quantity = $2, current_rental_status = $3, \
         updated_at = $4, updated_by = $5, version = $6 WHERE id = $1",
    )
    .bind(line.id)
    .bind(line.returned_quantity)
    .bind(line.current_rental_status)
    .bind(line.audit.updated_at)
    .bind(line.audit.updated_by)
    .bind(line.audit.version)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn insert_status_log(
    tx: &mut Transaction<'_, Postgres>,
    transaction_id: Uuid,
    transaction_line_id: Option<Uuid>,
    rental_lifecycle_id: Option<Uuid>,
    old_status: Option<RentalStatus>,
    new_status: RentalStatus,
    change_reason: &str,
    actor: Uuid,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO rental_status_logs (id, transaction_id, transaction_line_id, \
         rental_lifecycle_id, old_status, new_status, change_reason, changed_by, changed_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )
    .bind(Uuid::new_v4())
    .bind(transaction_id)
    .bind(transaction_line_id)
    .bind(rental_lifecycle_id)
    .bind(old_status)
    .bind(new_status)
    .bind(change_reason)
    .bind(actor)
    .bind(Utc::now())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn persist_lifecycle(
    tx: &mut Transaction<'_, Postgres>,
    lifecycle: &RentalLifecycle,
) -> Result<()> {
    sqlx::query(
        "UPDATE rental_lifecycles SET current_status = $2, last_status_change = $3, \
         expected_return_date = $4, total_returned_quantity = $5, total_late_fees = $6, \
         total_damage_fees = $7, total_other_fees = $8, updated_at = $9, updated_by = $10, \
         version = $11 WHERE id = $1",
    )
    .bind(lifecycle.id)
    .bind(lifecycle.current_status)
    .bind(lifecycle.last_status_change)
    .bind(lifecycle.expected_return_date)
    .bind(lifecycle.total_returned_quantity)
    .bind(lifecycle.total_late_fees)
    .bind(lifecycle.total_damage_fees)
    .bind(lifecycle.total_other_fees)
    .bind(lifecycle.audit.updated_at)
    .bind(lifecycle.audit.updated_by)
    .bind(lifecycle.audit.version)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_return_event(
    tx: &mut Transaction<'_, Postgres>,
    event: &RentalReturnEvent,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO rental_return_events (id, rental_lifecycle_id, event_type, event_date, \
         items_returned, total_quantity_returned, late_fees_charged, damage_fees_charged, \
         other_fees_charged, new_return_date, extension_reason, notes, processed_by, \
         created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
    )
    .bind(event.id)
    .bind(event.rental_lifecycle_id)
    .bind(event.event_type)
    .bind(event.event_date)
    .bind(&event.items_returned)
    .bind(event.total_quantity_returned)
    .bind(event.late_fees_charged)
    .bind(event.damage_fees_charged)
    .bind(event.other_fees_charged)
    .bind(event.new_return_date)
    .bind(&event.extension_reason)
    .bind(&event.notes)
    .bind(event.processed_by)
    .bind(event.created_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_inspection(
    tx: &mut Transaction<'_, Postgres>,
    inspection: &RentalItemInspection,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO rental_item_inspections (id, return_event_id, transaction_line_id, \
         quantity_inspected, condition, damage_type, damage_severity, damage_description, \
         estimated_repair_cost, repair_feasible, inspected_by, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
    )
    .bind(inspection.id)
    .bind(inspection.return_event_id)
    .bind(inspection.transaction_line_id)
    .bind(inspection.quantity_inspected)
    .bind(&inspection.condition)
    .bind(&inspection.damage_type)
    .bind(inspection.damage_severity)
    .bind(&inspection.damage_description)
    .bind(inspection.estimated_repair_cost)
    .bind(inspection.repair_feasible)
    .bind(inspection.inspected_by)
    .bind(inspection.created_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
