// ============================================================================
// RENTORA - STOCK MOVEMENT LEDGER
// ============================================================================
// Module: inventory/src/services/movements.rs
// Description: Append-only movement ledger; system of record for quantity
//              history. Business code never updates or deletes entries.
// ============================================================================

use chrono::{Duration, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use tracing::info;

use rentora_shared::config::InventoryConfig;
use rentora_shared::error::Result;

use crate::models::stock_level::StockLevel;
use crate::models::stock_movement::{
    MovementFilter, MovementSummaryRow, NewMovement, StockMovement,
};

const MOVEMENT_COLUMNS: &str = "id, stock_level_id, item_id, location_id, movement_type, \
     quantity_change, quantity_before, quantity_after, on_hand_before, on_hand_after, \
     transaction_header_id, transaction_line_id, unit_cost, reason, notes, correlation_id, \
     approved_by, performed_by, created_at";

#[derive(Clone)]
pub struct MovementLedger {
    pool: PgPool,
}

impl MovementLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append a movement inside the caller's transaction so the ledger
    /// entry and the stock-level snapshot can never disagree.
    pub async fn append(
        tx: &mut Transaction<'_, Postgres>,
        new_movement: NewMovement,
        level: &StockLevel,
    ) -> Result<StockMovement> {
        let movement = new_movement.into_movement(level);
        sqlx::query(
            "INSERT INTO stock_movements (id, stock_level_id, item_id, location_id, \
             movement_type, quantity_change, quantity_before, quantity_after, on_hand_before, \
             on_hand_after, transaction_header_id, transaction_line_id, unit_cost, reason, \
             notes, correlation_id, approved_by, performed_by, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
             $17, $18, $19)",
        )
        .bind(movement.id)
        .bind(movement.stock_level_id)
        .bind(movement.item_id)
        .bind(movement.location_id)
        .bind(movement.movement_type)
        .bind(movement.quantity_change)
        .bind(movement.quantity_before)
        .bind(movement.quantity_after)
        .bind(movement.on_hand_before)
        .bind(movement.on_hand_after)
        .bind(movement.transaction_header_id)
        .bind(movement.transaction_line_id)
        .bind(movement.unit_cost)
        .bind(&movement.reason)
        .bind(&movement.notes)
        .bind(movement.correlation_id)
        .bind(movement.approved_by)
        .bind(movement.performed_by)
        .bind(movement.created_at)
        .execute(&mut **tx)
        .await?;
        Ok(movement)
    }

    /// Filtered ledger query, most recent first.
    pub async fn list(&self, filter: &MovementFilter) -> Result<Vec<StockMovement>> {
        let mut query = QueryBuilder::new(format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements WHERE 1 = 1"
        ));
        if let Some(item_id) = filter.item_id {
            query.push(" AND item_id = ");
            query.push_bind(item_id);
        }
        if let Some(location_id) = filter.location_id {
            query.push(" AND location_id = ");
            query.push_bind(location_id);
        }
        if let Some(stock_level_id) = filter.stock_level_id {
            query.push(" AND stock_level_id = ");
            query.push_bind(stock_level_id);
        }
        if let Some(movement_type) = filter.movement_type {
            query.push(" AND movement_type = ");
            query.push_bind(movement_type);
        }
        if let Some(transaction_header_id) = filter.transaction_header_id {
            query.push(" AND transaction_header_id = ");
            query.push_bind(transaction_header_id);
        }
        if let Some(date_from) = filter.date_from {
            query.push(" AND created_at >= ");
            query.push_bind(date_from);
        }
        if let Some(date_to) = filter.date_to {
            query.push(" AND created_at <= ");
            query.push_bind(date_to);
        }
        query.push(" ORDER BY created_at DESC, id DESC LIMIT ");
        query.push_bind(if filter.limit > 0 { filter.limit } else { 100 });

        let movements = query
            .build_query_as::<StockMovement>()
            .fetch_all(&self.pool)
            .await?;
        Ok(movements)
    }

    /// Sum of signed quantity changes grouped by movement type over an
    /// optional item/location/date window.
    pub async fn summary(&self, filter: &MovementFilter) -> Result<Vec<MovementSummaryRow>> {
        let mut query = QueryBuilder::new(
            "SELECT movement_type, COUNT(*) AS movement_count, \
             COALESCE(SUM(quantity_change), 0) AS total_change \
             FROM stock_movements WHERE 1 = 1",
        );
        if let Some(item_id) = filter.item_id {
            query.push(" AND item_id = ");
            query.push_bind(item_id);
        }
        if let Some(location_id) = filter.location_id {
            query.push(" AND location_id = ");
            query.push_bind(location_id);
        }
        if let Some(date_from) = filter.date_from {
            query.push(" AND created_at >= ");
            query.push_bind(date_from);
        }
        if let Some(date_to) = filter.date_to {
            query.push(" AND created_at <= ");
            query.push_bind(date_to);
        }
        query.push(" GROUP BY movement_type ORDER BY movement_type");

        let rows = query
            .build_query_as::<MovementSummaryRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Retention job: purge ledger entries older than the configured
    /// horizon. The only deletion path, and it is operational, not
    /// business logic.
    pub async fn purge_expired(&self, config: &InventoryConfig) -> Result<u64> {
        let horizon = Utc::now() - Duration::days(365 * config.movement_retention_years);
        let purged = sqlx::query("DELETE FROM stock_movements WHERE created_at < $1")
            .bind(horizon)
            .execute(&self.pool)
            .await?;
        if purged.rows_affected() > 0 {
            info!(
                purged = purged.rows_affected(),
                retention_years = config.movement_retention_years,
                "purged expired stock movements"
            );
        }
        Ok(purged.rows_affected())
    }
}
