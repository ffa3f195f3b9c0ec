// ============================================================================
// RENTORA - INVENTORY SERVICE
// ============================================================================
// Module: inventory/src/services/inventory.rs
// Description: Composite inventory operations: receipts, rental checkout,
//              mixed-condition returns, transfers, adjustments, alerts.
//              Each public operation runs in a single database transaction.
// ============================================================================

use chrono::{Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use tracing::{debug, info, warn};
use uuid::Uuid;

use rentora_shared::config::InventoryConfig;
use rentora_shared::error::{Error, Result};
use rentora_shared::types::AuditFields;

use crate::models::enums::{
    AlertSeverity, AlertType, InventoryUnitCondition, InventoryUnitStatus,
};
use crate::models::inventory_unit::{InventoryUnit, TransitionContext, UnitTransition};
use crate::models::item::Item;
use crate::models::stock_level::{MovementDraft, ReturnSplit, StockLevel};
use crate::models::stock_movement::{MovementFilter, NewMovement, StockMovement};
use crate::models::sku_sequence::SkuRenderContext;
use crate::services::movements::MovementLedger;
use crate::services::sku_generator::SkuGeneratorService;

const STOCK_LEVEL_COLUMNS: &str = "id, item_id, location_id, quantity_on_hand, \
     quantity_available, quantity_reserved, quantity_on_rent, quantity_damaged, \
     quantity_under_repair, quantity_beyond_repair, average_cost, total_value, \
     reorder_point, maximum_stock, stock_status, created_at, created_by, updated_at, \
     updated_by, is_active, version";

const UNIT_COLUMNS: &str = "id, item_id, location_id, sku, serial_number, batch_code, \
     status, condition, purchase_date, purchase_price, supplier_id, purchase_order_number, \
     warranty_expiry, next_maintenance_date, is_rental_blocked, rental_block_reason, notes, \
     created_at, created_by, updated_at, updated_by, is_active, version";

const ITEM_COLUMNS: &str = "id, item_name, sku, description, brand_id, category_id, \
     unit_of_measurement, rental_rate_per_period, rental_period, sale_price, \
     security_deposit, is_rentable, is_saleable, serial_number_required, created_at, \
     created_by, updated_at, updated_by, is_active, version";

// ============================================================================
// SERVICE INPUT MODELS
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ReceiveUnitsInput {
    pub item_id: Uuid,
    pub location_id: Uuid,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub serial_numbers: Option<Vec<String>>,
    pub batch_code: Option<String>,
    pub supplier_id: Option<Uuid>,
    pub purchase_order_number: Option<String>,
    pub transaction_header_id: Option<Uuid>,
    pub transaction_line_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RentalCheckoutInput {
    pub item_id: Uuid,
    pub location_id: Uuid,
    pub quantity: Decimal,
    pub customer_id: Uuid,
    pub transaction_header_id: Uuid,
    pub transaction_line_id: Option<Uuid>,
}

/// Serial numbers named for each disposition bucket of a return. Only
/// meaningful for serialized items; count-based FIFO selection fills in
/// for good units left unnamed.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UnitDisposition {
    pub good_serials: Vec<String>,
    pub damaged_serials: Vec<String>,
    pub beyond_repair_serials: Vec<String>,
    pub lost_serials: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RentalReturnInput {
    pub item_id: Uuid,
    pub location_id: Uuid,
    pub split_quantity: Decimal,
    pub damaged_quantity: Decimal,
    pub beyond_repair_quantity: Decimal,
    pub lost_quantity: Decimal,
    pub disposition: UnitDisposition,
    pub condition_notes: Option<String>,
    pub transaction_header_id: Uuid,
    pub transaction_line_id: Option<Uuid>,
}

impl RentalReturnInput {
    pub fn split(&self) -> ReturnSplit {
        ReturnSplit {
            quantity: self.split_quantity,
            damaged: self.damaged_quantity,
            beyond_repair: self.beyond_repair_quantity,
            lost: self.lost_quantity,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransferInput {
    pub item_id: Uuid,
    pub from_location_id: Uuid,
    pub to_location_id: Uuid,
    pub quantity: Decimal,
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdjustmentInput {
    pub item_id: Uuid,
    pub location_id: Uuid,
    pub adjustment: Decimal,
    pub reason: String,
    pub notes: Option<String>,
    pub requires_approval: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct InventoryAlert {
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub message: String,
    pub item_id: Uuid,
    pub location_id: Uuid,
    pub unit_id: Option<Uuid>,
    pub quantity_available: Option<Decimal>,
    pub threshold: Option<Decimal>,
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StockSummary {
    pub total_on_hand: Decimal,
    pub total_available: Decimal,
    pub total_reserved: Decimal,
    pub total_on_rent: Decimal,
    pub total_damaged: Decimal,
    pub total_value: Decimal,
    pub location_count: i64,
    pub item_count: i64,
    pub low_stock_count: i64,
    pub utilization_rate: Decimal,
    pub availability_rate: Decimal,
}

// ============================================================================
// INVENTORY SERVICE IMPLEMENTATION
// ============================================================================

#[derive(Clone)]
pub struct InventoryService {
    pool: PgPool,
    config: InventoryConfig,
    sku_generator: SkuGeneratorService,
}

impl InventoryService {
    pub fn new(pool: PgPool, config: InventoryConfig) -> Self {
        let sku_generator = SkuGeneratorService::new(pool.clone());
        Self {
            pool,
            config,
            sku_generator,
        }
    }

    // ========================================================================
    // STOCK LEVEL LIFECYCLE
    // ========================================================================

    /// Get-or-create the stock level; a fresh level with an initial
    /// quantity gets a positive adjustment with a fixed setup reason.
    pub async fn initialize_stock_level(
        &self,
        item_id: Uuid,
        location_id: Uuid,
        initial_quantity: Decimal,
        reorder_point: Option<Decimal>,
        maximum_stock: Option<Decimal>,
        actor: Uuid,
    ) -> Result<StockLevel> {
        let mut tx = self.pool.begin().await?;

        let mut level = self
            .get_or_create_level_in_tx(&mut tx, item_id, location_id, actor)
            .await?;
        level = lock_level(&mut tx, level.id).await?;

        if level.quantity_on_hand.is_zero() && initial_quantity > Decimal::ZERO {
            let draft = level.adjust(initial_quantity, true)?;
            level.check_invariants()?;
            MovementLedger::append(
                &mut tx,
                NewMovement::new(draft, "Initial stock setup", actor),
                &level,
            )
            .await?;
        }
        if reorder_point.is_some() {
            level.reorder_point = reorder_point;
        }
        if maximum_stock.is_some() {
            level.maximum_stock = maximum_stock;
        }
        level.stock_status = level.derived_status();
        level.audit.touch(actor);
        persist_level(&mut tx, &level).await?;

        tx.commit().await?;
        info!(item_id = %item_id, location_id = %location_id, "initialized stock level");
        Ok(level)
    }

    pub async fn get_stock_level(
        &self,
        item_id: Uuid,
        location_id: Uuid,
    ) -> Result<Option<StockLevel>> {
        let level = sqlx::query_as::<_, StockLevel>(&format!(
            "SELECT {STOCK_LEVEL_COLUMNS} FROM stock_levels \
             WHERE item_id = $1 AND location_id = $2"
        ))
        .bind(item_id)
        .bind(location_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(level)
    }

    // ========================================================================
    // RECEIPTS
    // ========================================================================

    /// Receive purchased units: creates AVAILABLE/GOOD units, adjusts the
    /// level positively, and blends the lot into the average cost.
    pub async fn receive_units(
        &self,
        input: ReceiveUnitsInput,
        actor: Uuid,
    ) -> Result<(Vec<InventoryUnit>, StockLevel, StockMovement)> {
        let mut tx = self.pool.begin().await?;
        let result = self.receive_units_in_tx(&mut tx, input, actor).await?;
        tx.commit().await?;
        Ok(result)
    }

    pub async fn receive_units_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        input: ReceiveUnitsInput,
        actor: Uuid,
    ) -> Result<(Vec<InventoryUnit>, StockLevel, StockMovement)> {
        if input.quantity <= Decimal::ZERO {
            return Err(Error::validation("Receipt quantity must be positive"));
        }
        if input.unit_cost < Decimal::ZERO {
            return Err(Error::validation("Unit cost cannot be negative"));
        }

        let item = fetch_item(tx, input.item_id).await?;
        // Fractional receipts (bulk goods measured in 0.5 m3 and the like)
        // track at the stock level only; whole-unit receipts also mint
        // physical unit rows.
        let whole_units = input.quantity.fract() == Decimal::ZERO;
        if item.serial_number_required && !whole_units {
            return Err(Error::validation(
                "Serialized items require whole-unit receipt quantities",
            ));
        }
        let unit_count: i64 = if whole_units {
            unit_count_for(input.quantity)?
        } else {
            0
        };

        if let Some(serials) = &input.serial_numbers {
            if serials.len() as i64 != unit_count {
                return Err(Error::validation(format!(
                    "Serial count {} does not match quantity {}",
                    serials.len(),
                    input.quantity
                )));
            }
            self.ensure_serials_unused(tx, serials).await?;
        }

        let mut units = Vec::with_capacity(unit_count.max(0) as usize);
        if unit_count > 0 {
            // Unit numbers come from the item's (brand, category) scope
            // sequence; the unit SKU is the item SKU plus the issued
            // number. Sequence creation is idempotent outside this tx.
            let sequence = self
                .sku_generator
                .get_or_create(item.brand_id, item.category_id, "", "", 4, None, actor)
                .await?;
            let render_ctx = SkuRenderContext {
                item_name: Some(item.item_name.clone()),
                ..Default::default()
            };
            let issued = self
                .sku_generator
                .generate_in_tx(tx, sequence.id, unit_count, &render_ctx, actor)
                .await?;

            let now = Utc::now();
            for (index, (_, number)) in issued.into_iter().enumerate() {
                let unit = InventoryUnit {
                    id: Uuid::new_v4(),
                    item_id: input.item_id,
                    location_id: input.location_id,
                    sku: format!("{}-{:04}", item.sku, number),
                    serial_number: input
                        .serial_numbers
                        .as_ref()
                        .map(|serials| serials[index].clone()),
                    batch_code: input.batch_code.clone(),
                    status: InventoryUnitStatus::Available,
                    condition: InventoryUnitCondition::Good,
                    purchase_date: now,
                    purchase_price: input.unit_cost,
                    supplier_id: input.supplier_id,
                    purchase_order_number: input.purchase_order_number.clone(),
                    warranty_expiry: None,
                    next_maintenance_date: None,
                    is_rental_blocked: false,
                    rental_block_reason: None,
                    notes: None,
                    audit: AuditFields::new(actor),
                };
                insert_unit(tx, &unit).await?;
                units.push(unit);
            }
        }

        let created = self
            .get_or_create_level_in_tx(tx, input.item_id, input.location_id, actor)
            .await?;
        let mut level = lock_level(tx, created.id).await?;
        let draft = level.adjust(input.quantity, true)?;
        level.update_average_cost(input.quantity, input.unit_cost);
        level.check_invariants()?;
        level.audit.touch(actor);
        persist_level(tx, &level).await?;

        let reason = format!(
            "Purchase receipt - PO: {}",
            input.purchase_order_number.as_deref().unwrap_or("N/A")
        );
        let mut new_movement = NewMovement::new(
            purchase_draft(draft),
            reason,
            actor,
        )
        .with_unit_cost(input.unit_cost);
        if let Some(header_id) = input.transaction_header_id {
            new_movement = new_movement.with_transaction(header_id, input.transaction_line_id);
        }
        let movement = MovementLedger::append(tx, new_movement, &level).await?;

        info!(
            item_id = %input.item_id,
            location_id = %input.location_id,
            quantity = %input.quantity,
            "received units into stock"
        );
        Ok((units, level, movement))
    }

    // ========================================================================
    // RENTAL CHECKOUT
    // ========================================================================

    /// Rental checkout: FIFO-selects the oldest rentable units, moves them
    /// to RENTED, and shifts the level from available to on-rent.
    pub async fn checkout_for_rental(
        &self,
        input: RentalCheckoutInput,
        actor: Uuid,
    ) -> Result<(Vec<InventoryUnit>, StockLevel, StockMovement)> {
        let mut tx = self.pool.begin().await?;
        let result = self.checkout_for_rental_in_tx(&mut tx, input, actor).await?;
        tx.commit().await?;
        Ok(result)
    }

    pub async fn checkout_for_rental_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        input: RentalCheckoutInput,
        actor: Uuid,
    ) -> Result<(Vec<InventoryUnit>, StockLevel, StockMovement)> {
        let item = fetch_item(tx, input.item_id).await?;
        if !item.is_rentable {
            return Err(Error::validation(format!(
                "Item {} is not rentable",
                item.sku
            )));
        }

        let mut level = lock_level_by_scope(tx, input.item_id, input.location_id).await?;
        if !level.can_fulfill_order(input.quantity) {
            return Err(Error::InsufficientStock {
                requested: input.quantity,
                available: level.quantity_available,
                location_id: input.location_id,
            });
        }

        let mut rented_units = Vec::new();
        if item.serial_number_required {
            let needed = unit_count_for(input.quantity)?;
            let mut units =
                lock_available_units_fifo(tx, input.item_id, input.location_id, needed).await?;
            if (units.len() as i64) < needed {
                // Level claims availability the unit table cannot back:
                // data drift, surfaced as its own error category.
                return Err(Error::InsufficientUnits {
                    item_id: input.item_id,
                    location_id: input.location_id,
                    needed,
                    found: units.len() as i64,
                });
            }
            let ctx = TransitionContext::new(actor, "Rental checkout");
            for unit in units.iter_mut() {
                let transition = unit.transition(InventoryUnitStatus::Rented, &ctx)?;
                persist_unit(tx, unit).await?;
                append_unit_transition(tx, &transition).await?;
            }
            rented_units = units;
        }

        let draft = level.rent_out(input.quantity)?;
        level.check_invariants()?;
        level.audit.touch(actor);
        persist_level(tx, &level).await?;

        let movement = MovementLedger::append(
            tx,
            NewMovement::new(draft, "Rental checkout", actor)
                .with_transaction(input.transaction_header_id, input.transaction_line_id)
                .with_notes(format!("Customer {}", input.customer_id)),
            &level,
        )
        .await?;

        info!(
            item_id = %input.item_id,
            location_id = %input.location_id,
            quantity = %input.quantity,
            transaction_id = %input.transaction_header_id,
            "rental checkout complete"
        );
        Ok((rented_units, level, movement))
    }

    // ========================================================================
    // RENTAL RETURNS
    // ========================================================================

    /// Mixed-condition rental return. Good quantity re-enters available;
    /// damaged and beyond-repair quantities route to their buckets; lost
    /// quantity leaves on-hand. Serialized units transition per the named
    /// disposition.
    pub async fn process_return(
        &self,
        input: RentalReturnInput,
        actor: Uuid,
    ) -> Result<(Vec<UnitTransition>, StockLevel, StockMovement)> {
        let mut tx = self.pool.begin().await?;
        let result = self.process_return_in_tx(&mut tx, input, actor).await?;
        tx.commit().await?;
        Ok(result)
    }

    pub async fn process_return_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        input: RentalReturnInput,
        actor: Uuid,
    ) -> Result<(Vec<UnitTransition>, StockLevel, StockMovement)> {
        let item = fetch_item(tx, input.item_id).await?;
        let split = input.split();

        // Stock-level lock comes before any unit locks.
        let mut level = lock_level_by_scope(tx, input.item_id, input.location_id).await?;
        let available_before = level.quantity_available;
        let draft = level.return_from_rent(split)?;
        level.check_invariants()?;
        level.audit.touch(actor);
        persist_level(tx, &level).await?;

        let mut transitions = Vec::new();
        if item.serial_number_required {
            transitions = self
                .transition_returned_units(tx, &input, split, actor)
                .await?;
        }

        let mut new_movement = NewMovement::new(
            draft,
            "Rental return",
            actor,
        )
        .with_transaction(input.transaction_header_id, input.transaction_line_id);
        if let Some(notes) = &input.condition_notes {
            new_movement = new_movement.with_notes(notes.clone());
        }
        let movement = MovementLedger::append(tx, new_movement, &level).await?;

        // Damaged items must never inflate availability: re-read the row
        // and assert the available delta equals exactly the good quantity.
        let persisted = lock_level(tx, level.id).await?;
        if persisted.quantity_available - available_before != split.good() {
            return Err(Error::InventoryConsistency(format!(
                "Return of {} would change available by {} instead of good quantity {}",
                split.quantity,
                persisted.quantity_available - available_before,
                split.good()
            )));
        }

        info!(
            item_id = %input.item_id,
            location_id = %input.location_id,
            good = %split.good(),
            damaged = %split.damaged,
            beyond_repair = %split.beyond_repair,
            lost = %split.lost,
            "rental return processed"
        );
        Ok((transitions, level, movement))
    }

    async fn transition_returned_units(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        input: &RentalReturnInput,
        split: ReturnSplit,
        actor: Uuid,
    ) -> Result<Vec<UnitTransition>> {
        let mut transitions = Vec::new();

        let buckets: [(&[String], InventoryUnitStatus, InventoryUnitCondition); 3] = [
            (
                &input.disposition.damaged_serials,
                InventoryUnitStatus::Damaged,
                InventoryUnitCondition::Damaged,
            ),
            (
                &input.disposition.beyond_repair_serials,
                InventoryUnitStatus::BeyondRepair,
                InventoryUnitCondition::Damaged,
            ),
            (
                &input.disposition.lost_serials,
                InventoryUnitStatus::Lost,
                InventoryUnitCondition::Poor,
            ),
        ];
        for (serials, status, condition) in buckets {
            for serial in serials {
                let mut unit = lock_unit_by_serial(tx, serial).await?;
                let ctx = TransitionContext::new(actor, "Rental return")
                    .with_condition(condition);
                let transition = unit.transition(status, &ctx)?;
                persist_unit(tx, &unit).await?;
                append_unit_transition(tx, &transition).await?;
                transitions.push(transition);
            }
        }

        // Good units: named serials first, FIFO-selected rented units for
        // the remainder.
        let good_count = unit_count_for(split.good())?;
        let named = input.disposition.good_serials.len() as i64;
        let ctx = TransitionContext::new(actor, "Rental return")
            .with_condition(InventoryUnitCondition::Good);
        for serial in &input.disposition.good_serials {
            let mut unit = lock_unit_by_serial(tx, serial).await?;
            let transition = unit.transition(InventoryUnitStatus::Available, &ctx)?;
            persist_unit(tx, &unit).await?;
            append_unit_transition(tx, &transition).await?;
            transitions.push(transition);
        }
        if good_count > named {
            let mut units = lock_rented_units(
                tx,
                input.item_id,
                input.location_id,
                good_count - named,
            )
            .await?;
            if (units.len() as i64) < good_count - named {
                return Err(Error::InsufficientUnits {
                    item_id: input.item_id,
                    location_id: input.location_id,
                    needed: good_count - named,
                    found: units.len() as i64,
                });
            }
            for unit in units.iter_mut() {
                let transition = unit.transition(InventoryUnitStatus::Available, &ctx)?;
                persist_unit(tx, unit).await?;
                append_unit_transition(tx, &transition).await?;
                transitions.push(transition);
            }
        }
        Ok(transitions)
    }

    // ========================================================================
    // TRANSFERS
    // ========================================================================

    /// Inter-location transfer. Both level locks are taken in ascending
    /// row-id order; the two movements share a correlation id and reason.
    pub async fn transfer(
        &self,
        input: TransferInput,
        actor: Uuid,
    ) -> Result<(StockLevel, StockLevel, Vec<StockMovement>)> {
        if input.from_location_id == input.to_location_id {
            return Err(Error::validation(
                "Source and destination locations must differ",
            ));
        }

        let mut tx = self.pool.begin().await?;

        let source = self
            .get_level_by_scope(&mut tx, input.item_id, input.from_location_id)
            .await?
            .ok_or_else(|| {
                Error::not_found(format!(
                    "No stock for item {} at location {}",
                    input.item_id, input.from_location_id
                ))
            })?;
        let destination = self
            .get_or_create_level_in_tx(&mut tx, input.item_id, input.to_location_id, actor)
            .await?;

        // Deadlock avoidance: always lock the lower row id first.
        let (mut source, mut destination) = if source.id < destination.id {
            let locked_source = lock_level(&mut tx, source.id).await?;
            let locked_destination = lock_level(&mut tx, destination.id).await?;
            (locked_source, locked_destination)
        } else {
            let locked_destination = lock_level(&mut tx, destination.id).await?;
            let locked_source = lock_level(&mut tx, source.id).await?;
            (locked_source, locked_destination)
        };

        let out_draft = source.transfer_out(input.quantity)?;
        let in_draft = destination.transfer_in(input.quantity)?;
        source.check_invariants()?;
        destination.check_invariants()?;
        source.audit.touch(actor);
        destination.audit.touch(actor);
        persist_level(&mut tx, &source).await?;
        persist_level(&mut tx, &destination).await?;

        let correlation_id = Uuid::new_v4();
        let out_movement = MovementLedger::append(
            &mut tx,
            NewMovement::new(out_draft, input.reason.clone(), actor)
                .with_correlation(correlation_id),
            &source,
        )
        .await?;
        let in_movement = MovementLedger::append(
            &mut tx,
            NewMovement::new(in_draft, input.reason.clone(), actor)
                .with_correlation(correlation_id),
            &destination,
        )
        .await?;

        tx.commit().await?;
        info!(
            item_id = %input.item_id,
            from = %input.from_location_id,
            to = %input.to_location_id,
            quantity = %input.quantity,
            "stock transfer complete"
        );
        Ok((source, destination, vec![out_movement, in_movement]))
    }

    // ========================================================================
    // ADJUSTMENTS
    // ========================================================================

    /// Manual stock adjustment. Approval-requiring adjustments emit a
    /// movement with a null approver that reporting treats as pending.
    pub async fn adjust(
        &self,
        input: AdjustmentInput,
        actor: Uuid,
    ) -> Result<(StockLevel, StockMovement)> {
        let mut tx = self.pool.begin().await?;

        let created = self
            .get_or_create_level_in_tx(&mut tx, input.item_id, input.location_id, actor)
            .await?;
        let mut level = lock_level(&mut tx, created.id).await?;
        let draft = level.adjust(input.adjustment, true)?;
        level.check_invariants()?;
        level.audit.touch(actor);
        persist_level(&mut tx, &level).await?;

        let mut new_movement = NewMovement::new(draft, input.reason.clone(), actor);
        if let Some(notes) = &input.notes {
            new_movement = new_movement.with_notes(notes.clone());
        }
        if input.requires_approval {
            new_movement = new_movement.pending_approval();
        }
        let movement = MovementLedger::append(&mut tx, new_movement, &level).await?;

        tx.commit().await?;
        info!(
            item_id = %input.item_id,
            location_id = %input.location_id,
            adjustment = %input.adjustment,
            requires_approval = input.requires_approval,
            "stock adjustment applied"
        );
        Ok((level, movement))
    }

    // ========================================================================
    // RESERVATIONS
    // ========================================================================

    /// Reserve available stock, typically against a pending order.
    pub async fn reserve_stock(
        &self,
        item_id: Uuid,
        location_id: Uuid,
        quantity: Decimal,
        reference: Option<Uuid>,
        actor: Uuid,
    ) -> Result<(StockLevel, StockMovement)> {
        let mut tx = self.pool.begin().await?;
        let mut level = lock_level_by_scope(&mut tx, item_id, location_id).await?;
        let draft = level.reserve(quantity)?;
        level.check_invariants()?;
        level.audit.touch(actor);
        persist_level(&mut tx, &level).await?;

        let mut new_movement = NewMovement::new(draft, "Stock reservation", actor);
        if let Some(reference) = reference {
            new_movement = new_movement.with_transaction(reference, None);
        }
        let movement = MovementLedger::append(&mut tx, new_movement, &level).await?;
        tx.commit().await?;
        Ok((level, movement))
    }

    /// Release a reservation back to available.
    pub async fn release_reservation(
        &self,
        item_id: Uuid,
        location_id: Uuid,
        quantity: Decimal,
        reference: Option<Uuid>,
        actor: Uuid,
    ) -> Result<(StockLevel, StockMovement)> {
        let mut tx = self.pool.begin().await?;
        let mut level = lock_level_by_scope(&mut tx, item_id, location_id).await?;
        let draft = level.release_reservation(quantity)?;
        level.check_invariants()?;
        level.audit.touch(actor);
        persist_level(&mut tx, &level).await?;

        let mut new_movement = NewMovement::new(draft, "Stock reservation released", actor);
        if let Some(reference) = reference {
            new_movement = new_movement.with_transaction(reference, None);
        }
        let movement = MovementLedger::append(&mut tx, new_movement, &level).await?;
        tx.commit().await?;
        Ok((level, movement))
    }

    // ========================================================================
    // SALES (consumed by the transaction service)
    // ========================================================================

    /// Sale consumption: decrements available and on-hand, sells through
    /// the oldest units for serialized items.
    pub async fn consume_for_sale_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        item_id: Uuid,
        location_id: Uuid,
        quantity: Decimal,
        transaction_header_id: Uuid,
        transaction_line_id: Option<Uuid>,
        actor: Uuid,
    ) -> Result<(StockLevel, StockMovement)> {
        let item = fetch_item(tx, item_id).await?;
        if !item.is_saleable {
            return Err(Error::validation(format!(
                "Item {} is not saleable",
                item.sku
            )));
        }

        let mut level = lock_level_by_scope(tx, item_id, location_id).await?;
        let draft = level.sell(quantity)?;
        level.check_invariants()?;
        level.audit.touch(actor);
        persist_level(tx, &level).await?;

        if item.serial_number_required {
            let needed = unit_count_for(quantity)?;
            let mut units = lock_available_units_fifo(tx, item_id, location_id, needed).await?;
            if (units.len() as i64) < needed {
                return Err(Error::InsufficientUnits {
                    item_id,
                    location_id,
                    needed,
                    found: units.len() as i64,
                });
            }
            let ctx = TransitionContext::new(actor, "Sale fulfillment");
            for unit in units.iter_mut() {
                let transition = unit.transition(InventoryUnitStatus::Sold, &ctx)?;
                persist_unit(tx, unit).await?;
                append_unit_transition(tx, &transition).await?;
            }
        }

        let movement = MovementLedger::append(
            tx,
            NewMovement::new(draft, "Sale fulfillment", actor)
                .with_transaction(transaction_header_id, transaction_line_id),
            &level,
        )
        .await?;
        Ok((level, movement))
    }

    // ========================================================================
    // ALERTS & SUMMARIES
    // ========================================================================

    /// Aggregated low-stock, maintenance-due, and warranty-expiring alerts.
    pub async fn alerts(&self, location_id: Option<Uuid>) -> Result<Vec<InventoryAlert>> {
        let mut alerts = Vec::new();
        let today = Utc::now().date_naive();

        let mut low_stock = QueryBuilder::new(format!(
            "SELECT {STOCK_LEVEL_COLUMNS} FROM stock_levels \
             WHERE reorder_point IS NOT NULL AND quantity_available <= reorder_point"
        ));
        if let Some(location_id) = location_id {
            low_stock.push(" AND location_id = ");
            low_stock.push_bind(location_id);
        }
        low_stock.push(" ORDER BY quantity_available ASC");
        let levels = low_stock
            .build_query_as::<StockLevel>()
            .fetch_all(&self.pool)
            .await?;
        for level in levels {
            alerts.push(InventoryAlert {
                alert_type: AlertType::LowStock,
                severity: if level.quantity_available.is_zero() {
                    AlertSeverity::High
                } else {
                    AlertSeverity::Medium
                },
                message: format!(
                    "Stock below reorder point: {} available",
                    level.quantity_available
                ),
                item_id: level.item_id,
                location_id: level.location_id,
                unit_id: None,
                quantity_available: Some(level.quantity_available),
                threshold: level.reorder_point,
                due_date: None,
            });
        }

        let maintenance_horizon = today + Duration::days(self.config.maintenance_alert_days);
        for unit in self
            .units_with_date_before(location_id, "next_maintenance_date", maintenance_horizon)
            .await?
        {
            alerts.push(InventoryAlert {
                alert_type: AlertType::MaintenanceDue,
                severity: AlertSeverity::Medium,
                message: format!("Maintenance due for unit {}", unit.sku),
                item_id: unit.item_id,
                location_id: unit.location_id,
                unit_id: Some(unit.id),
                quantity_available: None,
                threshold: None,
                due_date: unit.next_maintenance_date,
            });
        }

        let warranty_horizon = today + Duration::days(self.config.warranty_alert_days);
        for unit in self
            .units_with_date_before(location_id, "warranty_expiry", warranty_horizon)
            .await?
        {
            alerts.push(InventoryAlert {
                alert_type: AlertType::WarrantyExpiring,
                severity: AlertSeverity::Low,
                message: format!("Warranty expiring for unit {}", unit.sku),
                item_id: unit.item_id,
                location_id: unit.location_id,
                unit_id: Some(unit.id),
                quantity_available: None,
                threshold: None,
                due_date: unit.warranty_expiry,
            });
        }

        Ok(alerts)
    }

    /// Bucket totals and rates across the matching stock levels.
    pub async fn stock_summary(
        &self,
        item_id: Option<Uuid>,
        location_id: Option<Uuid>,
    ) -> Result<StockSummary> {
        let mut query = QueryBuilder::new(format!(
            "SELECT {STOCK_LEVEL_COLUMNS} FROM stock_levels WHERE 1 = 1"
        ));
        if let Some(item_id) = item_id {
            query.push(" AND item_id = ");
            query.push_bind(item_id);
        }
        if let Some(location_id) = location_id {
            query.push(" AND location_id = ");
            query.push_bind(location_id);
        }
        let levels = query
            .build_query_as::<StockLevel>()
            .fetch_all(&self.pool)
            .await?;

        let mut summary = StockSummary {
            total_on_hand: Decimal::ZERO,
            total_available: Decimal::ZERO,
            total_reserved: Decimal::ZERO,
            total_on_rent: Decimal::ZERO,
            total_damaged: Decimal::ZERO,
            total_value: Decimal::ZERO,
            location_count: 0,
            item_count: 0,
            low_stock_count: 0,
            utilization_rate: Decimal::ZERO,
            availability_rate: Decimal::ZERO,
        };
        let mut locations = std::collections::HashSet::new();
        let mut items = std::collections::HashSet::new();
        for level in &levels {
            summary.total_on_hand += level.quantity_on_hand;
            summary.total_available += level.quantity_available;
            summary.total_reserved += level.quantity_reserved;
            summary.total_on_rent += level.quantity_on_rent;
            summary.total_damaged += level.quantity_damaged;
            summary.total_value += level.total_value;
            locations.insert(level.location_id);
            items.insert(level.item_id);
            if level.is_low_stock() {
                summary.low_stock_count += 1;
            }
        }
        summary.location_count = locations.len() as i64;
        summary.item_count = items.len() as i64;
        if !summary.total_on_hand.is_zero() {
            summary.utilization_rate =
                summary.total_on_rent * Decimal::ONE_HUNDRED / summary.total_on_hand;
            summary.availability_rate =
                summary.total_available * Decimal::ONE_HUNDRED / summary.total_on_hand;
        }
        Ok(summary)
    }

    /// Recent ledger history for one item.
    pub async fn recent_movements(&self, item_id: Uuid, limit: i64) -> Result<Vec<StockMovement>> {
        let ledger = MovementLedger::new(self.pool.clone());
        let mut filter = MovementFilter::for_item(item_id);
        filter.limit = limit;
        ledger.list(&filter).await
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    /// Get-or-create under the first-creator race policy. The insert
    /// uses `ON CONFLICT DO NOTHING` so a lost race cannot abort the
    /// enclosing transaction; the loser re-reads the winner's row.
    pub async fn get_or_create_level_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        item_id: Uuid,
        location_id: Uuid,
        actor: Uuid,
    ) -> Result<StockLevel> {
        if let Some(level) = self.get_level_by_scope(tx, item_id, location_id).await? {
            return Ok(level);
        }

        let level = StockLevel::new(item_id, location_id, actor);
        if insert_level(tx, &level).await? {
            return Ok(level);
        }
        debug!("lost stock-level creation race, re-reading winner row");
        self.get_level_by_scope(tx, item_id, location_id)
            .await?
            .ok_or_else(|| {
                Error::InventoryConsistency(format!(
                    "Stock level for item {item_id} at {location_id} missing after creation race"
                ))
            })
    }

    async fn get_level_by_scope(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        item_id: Uuid,
        location_id: Uuid,
    ) -> Result<Option<StockLevel>> {
        let level = sqlx::query_as::<_, StockLevel>(&format!(
            "SELECT {STOCK_LEVEL_COLUMNS} FROM stock_levels \
             WHERE item_id = $1 AND location_id = $2"
        ))
        .bind(item_id)
        .bind(location_id)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(level)
    }

    async fn ensure_serials_unused(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        serials: &[String],
    ) -> Result<()> {
        let clashing: Option<String> = sqlx::query_scalar(
            "SELECT serial_number FROM inventory_units WHERE serial_number = ANY($1) LIMIT 1",
        )
        .bind(serials)
        .fetch_optional(&mut **tx)
        .await?;
        if let Some(serial) = clashing {
            return Err(Error::conflict(format!(
                "Serial number {serial} already exists"
            )));
        }
        Ok(())
    }

    async fn units_with_date_before(
        &self,
        location_id: Option<Uuid>,
        date_column: &str,
        horizon: NaiveDate,
    ) -> Result<Vec<InventoryUnit>> {
        let mut query = QueryBuilder::new(format!(
            "SELECT {UNIT_COLUMNS} FROM inventory_units \
             WHERE {date_column} IS NOT NULL AND {date_column} <= "
        ));
        query.push_bind(horizon);
        query.push(" AND status NOT IN ('SOLD', 'LOST', 'BEYOND_REPAIR')");
        if let Some(location_id) = location_id {
            query.push(" AND location_id = ");
            query.push_bind(location_id);
        }
        query.push(&format!(" ORDER BY {date_column} ASC"));
        let units = query
            .build_query_as::<InventoryUnit>()
            .fetch_all(&self.pool)
            .await?;
        Ok(units)
    }
}

// ============================================================================
// ROW-LEVEL HELPERS
// ============================================================================

fn unit_count_for(quantity: Decimal) -> Result<i64> {
    use rust_decimal::prelude::ToPrimitive;

    if quantity < Decimal::ZERO {
        return Err(Error::validation("Quantity cannot be negative"));
    }
    if quantity.fract() != Decimal::ZERO {
        return Err(Error::validation(
            "Serialized operations require whole-unit quantities",
        ));
    }
    quantity
        .to_i64()
        .ok_or_else(|| Error::validation("Quantity too large"))
}

/// Convert a receipt adjustment draft into a PURCHASE-typed draft; the
/// bucket arithmetic is identical.
fn purchase_draft(draft: MovementDraft) -> MovementDraft {
    MovementDraft {
        movement_type: crate::models::enums::StockMovementType::Purchase,
        ..draft
    }
}

async fn lock_level(
    tx: &mut Transaction<'_, Postgres>,
    level_id: Uuid,
) -> Result<StockLevel> {
    sqlx::query_as::<_, StockLevel>(&format!(
        "SELECT {STOCK_LEVEL_COLUMNS} FROM stock_levels WHERE id = $1 FOR UPDATE"
    ))
    .bind(level_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| Error::not_found(format!("Stock level {level_id}")))
}

async fn lock_level_by_scope(
    tx: &mut Transaction<'_, Postgres>,
    item_id: Uuid,
    location_id: Uuid,
) -> Result<StockLevel> {
    sqlx::query_as::<_, StockLevel>(&format!(
        "SELECT {STOCK_LEVEL_COLUMNS} FROM stock_levels \
         WHERE item_id = $1 AND location_id = $2 FOR UPDATE"
    ))
    .bind(item_id)
    .bind(location_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| {
        Error::not_found(format!(
            "No stock for item {item_id} at location {location_id}"
        ))
    })
}

async fn fetch_item(tx: &mut Transaction<'_, Postgres>, item_id: Uuid) -> Result<Item> {
    sqlx::query_as::<_, Item>(&format!(
        "SELECT {ITEM_COLUMNS} FROM items WHERE id = $1 AND is_active = TRUE"
    ))
    .bind(item_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| Error::not_found(format!("Item {item_id}")))
}

/// FIFO selection of unblocked AVAILABLE units, locked for the
/// transaction. Ordered by acquisition date, then id for a stable
/// tie-break.
async fn lock_available_units_fifo(
    tx: &mut Transaction<'_, Postgres>,
    item_id: Uuid,
    location_id: Uuid,
    limit: i64,
) -> Result<Vec<InventoryUnit>> {
    let units = sqlx::query_as::<_, InventoryUnit>(&format!(
        "SELECT {UNIT_COLUMNS} FROM inventory_units \
         WHERE item_id = $1 AND location_id = $2 AND status = 'AVAILABLE' \
         AND is_rental_blocked = FALSE \
         ORDER BY purchase_date ASC, id ASC LIMIT $3 FOR UPDATE"
    ))
    .bind(item_id)
    .bind(location_id)
    .bind(limit)
    .fetch_all(&mut **tx)
    .await?;
    Ok(units)
}

/// Rented units for count-based return selection, locked in ascending id
/// order.
async fn lock_rented_units(
    tx: &mut Transaction<'_, Postgres>,
    item_id: Uuid,
    location_id: Uuid,
    limit: i64,
) -> Result<Vec<InventoryUnit>> {
    let units = sqlx::query_as::<_, InventoryUnit>(&format!(
        "SELECT {UNIT_COLUMNS} FROM inventory_units \
         WHERE item_id = $1 AND location_id = $2 AND status = 'RENTED' \
         ORDER BY id ASC LIMIT $3 FOR UPDATE"
    ))
    .bind(item_id)
    .bind(location_id)
    .bind(limit)
    .fetch_all(&mut **tx)
    .await?;
    Ok(units)
}

async fn lock_unit_by_serial(
    tx: &mut Transaction<'_, Postgres>,
    serial: &str,
) -> Result<InventoryUnit> {
    sqlx::query_as::<_, InventoryUnit>(&format!(
        "SELECT {UNIT_COLUMNS} FROM inventory_units WHERE serial_number = $1 FOR UPDATE"
    ))
    .bind(serial)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| Error::not_found(format!("Inventory unit with serial {serial}")))
}

/// Returns false when the unique (item, location) tuple already exists.
async fn insert_level(tx: &mut Transaction<'_, Postgres>, level: &StockLevel) -> Result<bool> {
    let inserted = sqlx::query(
        "INSERT INTO stock_levels (id, item_id, location_id, quantity_on_hand, \
         quantity_available, quantity_reserved, quantity_on_rent, quantity_damaged, \
         quantity_under_repair, quantity_beyond_repair, average_cost, total_value, \
         reorder_point, maximum_stock, stock_status, created_at, created_by, updated_at, \
         updated_by, is_active, version) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
         $17, $18, $19, $20, $21) ON CONFLICT (item_id, location_id) DO NOTHING",
    )
    .bind(level.id)
    .bind(level.item_id)
    .bind(level.location_id)
    .bind(level.quantity_on_hand)
    .bind(level.quantity_available)
    .bind(level.quantity_reserved)
    .bind(level.quantity_on_rent)
    .bind(level.quantity_damaged)
    .bind(level.quantity_under_repair)
    .bind(level.quantity_beyond_repair)
    .bind(level.average_cost)
    .bind(level.total_value)
    .bind(level.reorder_point)
    .bind(level.maximum_stock)
    .bind(level.stock_status)
    .bind(level.audit.created_at)
    .bind(level.audit.created_by)
    .bind(level.audit.updated_at)
    .bind(level.audit.updated_by)
    .bind(level.audit.is_active)
    .bind(level.audit.version)
    .execute(&mut **tx)
    .await?;
    Ok(inserted.rows_affected() > 0)
}

async fn persist_level(tx: &mut Transaction<'_, Postgres>, level: &StockLevel) -> Result<()> {
    let updated = sqlx::query(
        "UPDATE stock_levels SET quantity_on_hand = $2, quantity_available = $3, \
         quantity_reserved = $4, quantity_on_rent = $5, quantity_damaged = $6, \
         quantity_under_repair = $7, quantity_beyond_repair = $8, average_cost = $9, \
         total_value = $10, reorder_point = $11, maximum_stock = $12, stock_status = $13, \
         updated_at = $14, updated_by = $15, version = $16 WHERE id = $1",
    )
    .bind(level.id)
    .bind(level.quantity_on_hand)
    .bind(level.quantity_available)
    .bind(level.quantity_reserved)
    .bind(level.quantity_on_rent)
    .bind(level.quantity_damaged)
    .bind(level.quantity_under_repair)
    .bind(level.quantity_beyond_repair)
    .bind(level.average_cost)
    .bind(level.total_value)
    .bind(level.reorder_point)
    .bind(level.maximum_stock)
    .bind(level.stock_status)
    .bind(level.audit.updated_at)
    .bind(level.audit.updated_by)
    .bind(level.audit.version)
    .execute(&mut **tx)
    .await?;
    if updated.rows_affected() == 0 {
        warn!(level_id = %level.id, "stock level vanished during update");
        return Err(Error::not_found(format!("Stock level {}", level.id)));
    }
    Ok(())
}

async fn insert_unit(tx: &mut Transaction<'_, Postgres>, unit: &InventoryUnit) -> Result<()> {
    sqlx::query(
        "INSERT INTO inventory_units (id, item_id, location_id, sku, serial_number, \
         batch_code, status, condition, purchase_date, purchase_price, supplier_id, \
         purchase_order_number, warranty_expiry, next_maintenance_date, is_rental_blocked, \
         rental_block_reason, notes, created_at, created_by, updated_at, updated_by, \
         is_active, version) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
         $17, $18, $19, $20, $21, $22, $23)",
    )
    .bind(unit.id)
    .bind(unit.item_id)
    .bind(unit.location_id)
    .bind(&unit.sku)
    .bind(&unit.serial_number)
    .bind(&unit.batch_code)
    .bind(unit.status)
    .bind(unit.condition)
    .bind(unit.purchase_date)
    .bind(unit.purchase_price)
    .bind(unit.supplier_id)
    .bind(&unit.purchase_order_number)
    .bind(unit.warranty_expiry)
    .bind(unit.next_maintenance_date)
    .bind(unit.is_rental_blocked)
    .bind(&unit.rental_block_reason)
    .bind(&unit.notes)
    .bind(unit.audit.created_at)
    .bind(unit.audit.created_by)
    .bind(unit.audit.updated_at)
    .bind(unit.audit.updated_by)
    .bind(unit.audit.is_active)
    .bind(unit.audit.version)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn persist_unit(tx: &mut Transaction<'_, Postgres>, unit: &InventoryUnit) -> Result<()> {
    sqlx::query(
        "UPDATE inventory_units SET status = $2, condition = $3, is_rental_blocked = $4, \
         rental_block_reason = $5, notes = $6, next_maintenance_date = $7, updated_at = $8, \
         updated_by = $9, version = $10 WHERE id = $1",
    )
    .bind(unit.id)
    .bind(unit.status)
    .bind(unit.condition)
    .bind(unit.is_rental_blocked)
    .bind(&unit.rental_block_reason)
    .bind(&unit.notes)
    .bind(unit.next_maintenance_date)
    .bind(unit.audit.updated_at)
    .bind(unit.audit.updated_by)
    .bind(unit.audit.version)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn append_unit_transition(
    tx: &mut Transaction<'_, Postgres>,
    transition: &UnitTransition,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO inventory_unit_transitions (id, unit_id, old_status, new_status, \
         old_condition, new_condition, reason, performed_by, performed_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )
    .bind(Uuid::new_v4())
    .bind(transition.unit_id)
    .bind(transition.old_status)
    .bind(transition.new_status)
    .bind(transition.old_condition)
    .bind(transition.new_condition)
    .bind(&transition.reason)
    .bind(transition.performed_by)
    .bind(transition.performed_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
