// ============================================================================
// RENTORA - MASTER DATA SERVICE
// ============================================================================
// Module: inventory/src/services/master_data.rs
// Description: Location and item lifecycle with uniqueness and reference
//              guards
// ============================================================================

use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use rentora_shared::error::{Error, Result};

use crate::models::item::{CreateItemRequest, Item};
use crate::models::location::{CreateLocationRequest, Location};

const LOCATION_COLUMNS: &str = "id, code, name, location_type, address, contact_number, \
     contact_email, deleted_at, deleted_by, created_at, created_by, updated_at, updated_by, \
     is_active, version";

const ITEM_COLUMNS: &str = "id, item_name, sku, description, brand_id, category_id, \
     unit_of_measurement, rental_rate_per_period, rental_period, sale_price, \
     security_deposit, is_rentable, is_saleable, serial_number_required, created_at, \
     created_by, updated_at, updated_by, is_active, version";

#[derive(Clone)]
pub struct MasterDataService {
    pool: PgPool,
}

impl MasterDataService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ========================================================================
    // LOCATIONS
    // ========================================================================

    pub async fn create_location(
        &self,
        request: CreateLocationRequest,
        actor: Uuid,
    ) -> Result<Location> {
        request.validate()?;
        let location = Location::new(request, actor);

        let result = sqlx::query(
            "INSERT INTO locations (id, code, name, location_type, address, contact_number, \
             contact_email, deleted_at, deleted_by, created_at, created_by, updated_at, \
             updated_by, is_active, version) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
        )
        .bind(location.id)
        .bind(&location.code)
        .bind(&location.name)
        .bind(location.location_type)
        .bind(&location.address)
        .bind(&location.contact_number)
        .bind(&location.contact_email)
        .bind(location.deleted_at)
        .bind(location.deleted_by)
        .bind(location.audit.created_at)
        .bind(location.audit.created_by)
        .bind(location.audit.updated_at)
        .bind(location.audit.updated_by)
        .bind(location.audit.is_active)
        .bind(location.audit.version)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                info!(location_id = %location.id, code = %location.code, "created location");
                Ok(location)
            }
            Err(err) => {
                let err: Error = err.into();
                if err.is_unique_violation() {
                    Err(Error::conflict(format!(
                        "Location code {} already exists",
                        location.code
                    )))
                } else {
                    Err(err)
                }
            }
        }
    }

    pub async fn get_location(&self, location_id: Uuid) -> Result<Location> {
        sqlx::query_as::<_, Location>(&format!(
            "SELECT {LOCATION_COLUMNS} FROM locations WHERE id = $1 AND is_active = TRUE"
        ))
        .bind(location_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::not_found(format!("Location {location_id}")))
    }

    /// Soft delete, refused while any stock level or unit still
    /// references the location.
    pub async fn delete_location(&self, location_id: Uuid, actor: Uuid) -> Result<Location> {
        let mut tx = self.pool.begin().await?;

        let mut location = sqlx::query_as::<_, Location>(&format!(
            "SELECT {LOCATION_COLUMNS} FROM locations WHERE id = $1 AND is_active = TRUE \
             FOR UPDATE"
        ))
        .bind(location_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| Error::not_found(format!("Location {location_id}")))?;

        let referenced: Option<bool> = sqlx::query_scalar(
            "SELECT TRUE WHERE EXISTS \
             (SELECT 1 FROM stock_levels WHERE location_id = $1) \
             OR EXISTS (SELECT 1 FROM inventory_units WHERE location_id = $1)",
        )
        .bind(location_id)
        .fetch_optional(&mut *tx)
        .await?;
        if referenced.is_some() {
            return Err(Error::conflict(format!(
                "Location {} still has inventory references",
                location.code
            )));
        }

        location.soft_delete(actor);
        sqlx::query(
            "UPDATE locations SET is_active = FALSE, deleted_at = $2, deleted_by = $3, \
             updated_at = $4, updated_by = $5, version = $6 WHERE id = $1",
        )
        .bind(location.id)
        .bind(location.deleted_at)
        .bind(location.deleted_by)
        .bind(location.audit.updated_at)
        .bind(location.audit.updated_by)
        .bind(location.audit.version)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(location_id = %location_id, "soft-deleted location");
        Ok(location)
    }

    // ========================================================================
    // ITEMS
    // ========================================================================

    pub async fn create_item(&self, request: CreateItemRequest, actor: Uuid) -> Result<Item> {
        request.validate()?;
        let item = Item::new(request, actor);

        let result = sqlx::query(
            "INSERT INTO items (id, item_name, sku, description, brand_id, category_id, \
             unit_of_measurement, rental_rate_per_period, rental_period, sale_price, \
             security_deposit, is_rentable, is_saleable, serial_number_required, created_at, \
             created_by, updated_at, updated_by, is_active, version) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
             $17, $18, $19, $20)",
        )
        .bind(item.id)
        .bind(&item.item_name)
        .bind(&item.sku)
        .bind(&item.description)
        .bind(item.brand_id)
        .bind(item.category_id)
        .bind(&item.unit_of_measurement)
        .bind(item.rental_rate_per_period)
        .bind(item.rental_period)
        .bind(item.sale_price)
        .bind(item.security_deposit)
        .bind(item.is_rentable)
        .bind(item.is_saleable)
        .bind(item.serial_number_required)
        .bind(item.audit.created_at)
        .bind(item.audit.created_by)
        .bind(item.audit.updated_at)
        .bind(item.audit.updated_by)
        .bind(item.audit.is_active)
        .bind(item.audit.version)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(item),
            Err(err) => {
                let err: Error = err.into();
                if err.is_unique_violation() {
                    Err(Error::conflict(format!("SKU {} already exists", item.sku)))
                } else {
                    Err(err)
                }
            }
        }
    }

    pub async fn get_item(&self, item_id: Uuid) -> Result<Item> {
        sqlx::query_as::<_, Item>(&format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE id = $1 AND is_active = TRUE"
        ))
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::not_found(format!("Item {item_id}")))
    }

    /// Items are never hard-deleted while referenced; deactivation hides
    /// them from lookups.
    pub async fn deactivate_item(&self, item_id: Uuid, actor: Uuid) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE items SET is_active = FALSE, updated_at = NOW(), updated_by = $2, \
             version = version + 1 WHERE id = $1 AND is_active = TRUE",
        )
        .bind(item_id)
        .bind(actor)
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(Error::not_found(format!("Item {item_id}")));
        }
        Ok(())
    }
}
