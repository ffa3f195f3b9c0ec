// ============================================================================
// RENTORA - TRANSACTION NUMBER ALLOCATOR
// ============================================================================
// Module: transactions/src/services/numbering.rs
// Description: Monotonic per-(type, year) transaction numbers issued under
//              a row-level lock, `{PREFIX}-{YYYY}-{NNNNN}`
// ============================================================================

use sqlx::{Postgres, Transaction};
use tracing::debug;
use uuid::Uuid;

use rentora_shared::error::{Error, Result};

use crate::models::enums::TransactionType;

/// Allocate the next transaction number for `(transaction_type, year)`
/// inside the caller's transaction. The counter row lock is the
/// serialization point. Counter creation uses `ON CONFLICT DO NOTHING`
/// so a first-creator race cannot abort the enclosing transaction; the
/// loser falls through to the locked increment on the winner's row.
pub async fn allocate_transaction_number(
    tx: &mut Transaction<'_, Postgres>,
    transaction_type: TransactionType,
    year: i32,
) -> Result<String> {
    let number = next_counter_value(tx, transaction_type, year).await?;
    Ok(format!(
        "{}-{}-{:05}",
        transaction_type.prefix(),
        year,
        number
    ))
}

async fn next_counter_value(
    tx: &mut Transaction<'_, Postgres>,
    transaction_type: TransactionType,
    year: i32,
) -> Result<i64> {
    if let Some(number) = try_increment(tx, transaction_type, year).await? {
        return Ok(number);
    }

    let inserted = sqlx::query(
        "INSERT INTO transaction_number_sequences (id, transaction_type, year, next_number) \
         VALUES ($1, $2, $3, 1) ON CONFLICT (transaction_type, year) DO NOTHING",
    )
    .bind(Uuid::new_v4())
    .bind(transaction_type)
    .bind(year)
    .execute(&mut **tx)
    .await?;
    if inserted.rows_affected() > 0 {
        debug!(?transaction_type, year, "created transaction counter");
    }

    try_increment(tx, transaction_type, year)
        .await?
        .ok_or_else(|| {
            Error::InventoryConsistency(format!(
                "Transaction counter for {transaction_type:?}/{year} missing after creation"
            ))
        })
}

async fn try_increment(
    tx: &mut Transaction<'_, Postgres>,
    transaction_type: TransactionType,
    year: i32,
) -> Result<Option<i64>> {
    let current: Option<i64> = sqlx::query_scalar(
        "SELECT next_number FROM transaction_number_sequences \
         WHERE transaction_type = $1 AND year = $2 FOR UPDATE",
    )
    .bind(transaction_type)
    .bind(year)
    .fetch_optional(&mut **tx)
    .await?;

    let Some(current) = current else {
        return Ok(None);
    };

    sqlx::query(
        "UPDATE transaction_number_sequences SET next_number = next_number + 1 \
         WHERE transaction_type = $1 AND year = $2",
    )
    .bind(transaction_type)
    .bind(year)
    .execute(&mut **tx)
    .await?;
    Ok(Some(current))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_format() {
        // Format check without a database round-trip.
        let rendered = format!("{}-{}-{:05}", TransactionType::Rental.prefix(), 2024, 42);
        assert_eq!(rendered, "RNT-2024-00042");
    }
}
