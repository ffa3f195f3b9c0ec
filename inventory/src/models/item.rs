use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use rentora_shared::types::AuditFields;

/// Catalog entry. Referenced by stock levels, units, and transaction
/// lines; never hard-deleted while referenced.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Item {
    pub id: Uuid,
    pub item_name: String,
    pub sku: String,
    pub description: Option<String>,
    pub brand_id: Option<Uuid>,
    pub category_id: Option<Uuid>,
    pub unit_of_measurement: Option<String>,
    pub rental_rate_per_period: Option<Decimal>,
    pub rental_period: Option<i32>,
    pub sale_price: Option<Decimal>,
    pub security_deposit: Decimal,
    pub is_rentable: bool,
    pub is_saleable: bool,
    pub serial_number_required: bool,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub audit: AuditFields,
}

#[derive(Debug, Clone, Validate, Deserialize)]
pub struct CreateItemRequest {
    #[validate(length(min = 1, max = 200))]
    pub item_name: String,
    #[validate(length(min = 1, max = 50))]
    pub sku: String,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    pub brand_id: Option<Uuid>,
    pub category_id: Option<Uuid>,
    #[validate(length(max = 20))]
    pub unit_of_measurement: Option<String>,
    pub rental_rate_per_period: Option<Decimal>,
    #[validate(range(min = 1))]
    pub rental_period: Option<i32>,
    pub sale_price: Option<Decimal>,
    pub security_deposit: Option<Decimal>,
    pub is_rentable: bool,
    pub is_saleable: bool,
    pub serial_number_required: bool,
}

impl Item {
    pub fn new(request: CreateItemRequest, created_by: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            item_name: request.item_name,
            sku: request.sku.trim().to_uppercase(),
            description: request.description,
            brand_id: request.brand_id,
            category_id: request.category_id,
            unit_of_measurement: request.unit_of_measurement,
            rental_rate_per_period: request.rental_rate_per_period,
            rental_period: request.rental_period,
            sale_price: request.sale_price,
            security_deposit: request.security_deposit.unwrap_or(Decimal::ZERO),
            is_rentable: request.is_rentable,
            is_saleable: request.is_saleable,
            serial_number_required: request.serial_number_required,
            audit: AuditFields::new(created_by),
        }
    }
}
