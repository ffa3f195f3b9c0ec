use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use rentora_shared::error::Result;

use super::enums::EventCategory;

/// Append-only audit event on a transaction header.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TransactionEvent {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub event_type: String,
    pub event_category: EventCategory,
    pub event_data: serde_json::Value,
    pub event_timestamp: DateTime<Utc>,
    pub created_by: Option<Uuid>,
}

/// The kinds of events the core emits. A single tagged type replaces
/// per-category factory methods; `append_event` accepts any variant.
#[derive(Debug, Clone)]
pub enum TransactionEventKind {
    Transaction {
        description: String,
        details: serde_json::Value,
    },
    Inventory {
        description: String,
        movement_ids: Vec<Uuid>,
    },
    Payment {
        amount: Decimal,
        method: String,
        reference: Option<String>,
    },
    Error {
        message: String,
    },
}

impl TransactionEventKind {
    pub fn category(&self) -> EventCategory {
        match self {
            TransactionEventKind::Transaction { .. } => EventCategory::General,
            TransactionEventKind::Inventory { .. } => EventCategory::Inventory,
            TransactionEventKind::Payment { .. } => EventCategory::Payment,
            TransactionEventKind::Error { .. } => EventCategory::Error,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            TransactionEventKind::Transaction { .. } => "TRANSACTION",
            TransactionEventKind::Inventory { .. } => "INVENTORY_UPDATE",
            TransactionEventKind::Payment { .. } => "PAYMENT_RECEIVED",
            TransactionEventKind::Error { .. } => "ERROR",
        }
    }

    pub fn payload(&self) -> serde_json::Value {
        match self {
            TransactionEventKind::Transaction {
                description,
                details,
            } => json!({ "description": description, "details": details }),
            TransactionEventKind::Inventory {
                description,
                movement_ids,
            } => json!({ "description": description, "movement_ids": movement_ids }),
            TransactionEventKind::Payment {
                amount,
                method,
                reference,
            } => json!({ "amount": amount, "method": method, "reference": reference }),
            TransactionEventKind::Error { message } => json!({ "message": message }),
        }
    }
}

/// Append an event row inside the caller's transaction.
pub async fn append_event(
    tx: &mut Transaction<'_, Postgres>,
    transaction_id: Uuid,
    kind: TransactionEventKind,
    actor: Uuid,
) -> Result<TransactionEvent> {
    let event = TransactionEvent {
        id: Uuid::new_v4(),
        transaction_id,
        event_type: kind.event_type().to_string(),
        event_category: kind.category(),
        event_data: kind.payload(),
        event_timestamp: Utc::now(),
        created_by: Some(actor),
    };
    sqlx::query(
        "INSERT INTO transaction_events (id, transaction_id, event_type, event_category, \
         event_data, event_timestamp, created_by) VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(event.id)
    .bind(event.transaction_id)
    .bind(&event.event_type)
    .bind(event.event_category)
    .bind(&event.event_data)
    .bind(event.event_timestamp)
    .bind(event.created_by)
    .execute(&mut **tx)
    .await?;
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_kind_categories() {
        let payment = TransactionEventKind::Payment {
            amount: dec!(25.00),
            method: "CARD".to_string(),
            reference: None,
        };
        assert_eq!(payment.category(), EventCategory::Payment);
        assert_eq!(payment.event_type(), "PAYMENT_RECEIVED");
        assert_eq!(payment.payload()["amount"], json!("25.00"));

        let error = TransactionEventKind::Error {
            message: "boom".to_string(),
        };
        assert_eq!(error.category(), EventCategory::Error);
    }
}
