// ============================================================================
// RENTORA - SKU SEQUENCE ALLOCATOR
// ============================================================================
// Module: inventory/src/services/sku_generator.rs
// Description: Collision-free SKU issuance under concurrent load; the row
//              lock on the sequence row is the serialization point
// ============================================================================

use chrono::Utc;
use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use rentora_shared::error::{Error, Result};

use crate::models::sku_sequence::{validate_template, SkuRenderContext, SkuSequence};

const SEQUENCE_COLUMNS: &str = "id, brand_id, category_id, prefix, suffix, padding_length, \
     format_template, next_sequence, total_generated, last_generated_sku, last_generated_at, \
     created_at, created_by, updated_at, updated_by, is_active, version";

#[derive(Debug, Clone, Serialize)]
pub struct SequenceStats {
    pub sequence_id: Uuid,
    pub next_sequence: i64,
    pub total_generated: i64,
    pub last_generated_sku: Option<String>,
    pub last_generated_at: Option<chrono::DateTime<Utc>>,
    pub padding_length: i32,
    pub is_active: bool,
}

#[derive(Clone)]
pub struct SkuGeneratorService {
    pool: PgPool,
}

impl SkuGeneratorService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ========================================================================
    // SEQUENCE LIFECYCLE
    // ========================================================================

    /// Idempotent get-or-create for the (brand, category) tuple. On a
    /// first-creator race the loser observes the winner's row after a
    /// single retry of the unique violation.
    pub async fn get_or_create(
        &self,
        brand_id: Option<Uuid>,
        category_id: Option<Uuid>,
        prefix: &str,
        suffix: &str,
        padding_length: i32,
        format_template: Option<String>,
        created_by: Uuid,
    ) -> Result<SkuSequence> {
        if let Some(existing) = self.find_by_scope(brand_id, category_id).await? {
            return Ok(existing);
        }

        let sequence = SkuSequence::new(
            brand_id,
            category_id,
            prefix,
            suffix,
            padding_length,
            format_template,
            created_by,
        )?;

        match self.insert_sequence(&sequence).await {
            Ok(()) => {
                info!(sequence_id = %sequence.id, "created SKU sequence");
                Ok(sequence)
            }
            Err(err) if err.is_unique_violation() => {
                debug!("lost sequence-creation race, re-reading winner row");
                self.find_by_scope(brand_id, category_id)
                    .await?
                    .ok_or(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Generate one SKU, advancing the counter under a row-level lock.
    pub async fn generate_sku(
        &self,
        sequence_id: Uuid,
        ctx: &SkuRenderContext,
        actor: Uuid,
    ) -> Result<(String, i64)> {
        let mut tx = self.pool.begin().await?;
        let mut generated = self.generate_in_tx(&mut tx, sequence_id, 1, ctx, actor).await?;
        tx.commit().await?;
        generated.pop().ok_or_else(|| {
            Error::InventoryConsistency("SKU generation returned no number".to_string())
        })
    }

    /// Issue `count` contiguous numbers inside a single locked section.
    pub async fn generate_bulk(
        &self,
        sequence_id: Uuid,
        count: i64,
        ctx: &SkuRenderContext,
        actor: Uuid,
    ) -> Result<Vec<(String, i64)>> {
        let mut tx = self.pool.begin().await?;
        let generated = self
            .generate_in_tx(&mut tx, sequence_id, count, ctx, actor)
            .await?;
        tx.commit().await?;
        Ok(generated)
    }

    /// Locked generation usable from a composite service transaction.
    pub async fn generate_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        sequence_id: Uuid,
        count: i64,
        ctx: &SkuRenderContext,
        actor: Uuid,
    ) -> Result<Vec<(String, i64)>> {
        if count < 1 {
            return Err(Error::validation("Generation count must be at least 1"));
        }

        let mut sequence = lock_sequence(tx, sequence_id).await?;
        if !sequence.audit.is_active {
            return Err(Error::InactiveSequence(sequence_id));
        }

        let start = sequence.next_sequence;
        let mut generated = Vec::with_capacity(count as usize);
        for offset in 0..count {
            let number = start + offset;
            let sku = sequence.render(number, ctx)?;
            sequence.mark_generated(number, &sku, actor);
            generated.push((sku, number));
        }

        sqlx::query(
            "UPDATE sku_sequences SET next_sequence = $2, total_generated = $3, \
             last_generated_sku = $4, last_generated_at = $5, updated_at = $6, \
             updated_by = $7, version = version + 1 WHERE id = $1",
        )
        .bind(sequence_id)
        .bind(sequence.next_sequence)
        .bind(sequence.total_generated)
        .bind(&sequence.last_generated_sku)
        .bind(sequence.last_generated_at)
        .bind(Utc::now())
        .bind(actor)
        .execute(&mut **tx)
        .await?;

        debug!(
            sequence_id = %sequence_id,
            issued = count,
            next = sequence.next_sequence,
            "issued SKU numbers"
        );
        Ok(generated)
    }

    /// Admin reset of the counter. Refused when it would reissue an
    /// already-used number unless `force` is set.
    pub async fn reset(
        &self,
        sequence_id: Uuid,
        new_value: i64,
        force: bool,
        actor: Uuid,
    ) -> Result<SkuSequence> {
        if new_value < 1 {
            return Err(Error::validation("Sequence value must be at least 1"));
        }

        let mut tx = self.pool.begin().await?;
        let mut sequence = lock_sequence(&mut tx, sequence_id).await?;

        if new_value <= sequence.high_water_mark() && !force {
            return Err(Error::conflict(format!(
                "Resetting to {new_value} would reissue numbers up to {}; pass force to override",
                sequence.high_water_mark()
            )));
        }

        sequence.next_sequence = new_value;
        sequence.audit.touch(actor);
        sqlx::query(
            "UPDATE sku_sequences SET next_sequence = $2, updated_at = $3, updated_by = $4, \
             version = version + 1 WHERE id = $1",
        )
        .bind(sequence_id)
        .bind(new_value)
        .bind(sequence.audit.updated_at)
        .bind(actor)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        info!(sequence_id = %sequence_id, new_value, force, "reset SKU sequence");
        Ok(sequence)
    }

    /// Update the format template; unknown keys fail validation here.
    pub async fn update_format_template(
        &self,
        sequence_id: Uuid,
        format_template: &str,
        custom_keys: &[String],
        actor: Uuid,
    ) -> Result<SkuSequence> {
        validate_template(format_template, custom_keys)?;

        let mut tx = self.pool.begin().await?;
        let mut sequence = lock_sequence(&mut tx, sequence_id).await?;
        sequence.format_template = format_template.to_string();
        sequence.audit.touch(actor);

        sqlx::query(
            "UPDATE sku_sequences SET format_template = $2, updated_at = $3, updated_by = $4, \
             version = version + 1 WHERE id = $1",
        )
        .bind(sequence_id)
        .bind(format_template)
        .bind(sequence.audit.updated_at)
        .bind(actor)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(sequence)
    }

    /// Cross-table existence check over item and unit SKUs.
    pub async fn validate_sku_unique(&self, sku: &str) -> Result<bool> {
        let exists: Option<bool> = sqlx::query_scalar(
            "SELECT TRUE WHERE EXISTS (SELECT 1 FROM items WHERE sku = $1) \
             OR EXISTS (SELECT 1 FROM inventory_units WHERE sku = $1)",
        )
        .bind(sku)
        .fetch_optional(&self.pool)
        .await?;
        Ok(exists.is_none())
    }

    pub async fn sequence_stats(&self, sequence_id: Uuid) -> Result<SequenceStats> {
        let sequence = self.get(sequence_id).await?;
        Ok(SequenceStats {
            sequence_id: sequence.id,
            next_sequence: sequence.next_sequence,
            total_generated: sequence.total_generated,
            last_generated_sku: sequence.last_generated_sku,
            last_generated_at: sequence.last_generated_at,
            padding_length: sequence.padding_length,
            is_active: sequence.audit.is_active,
        })
    }

    pub async fn get(&self, sequence_id: Uuid) -> Result<SkuSequence> {
        sqlx::query_as::<_, SkuSequence>(&format!(
            "SELECT {SEQUENCE_COLUMNS} FROM sku_sequences WHERE id = $1"
        ))
        .bind(sequence_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::not_found(format!("SKU sequence {sequence_id}")))
    }

    pub async fn deactivate(&self, sequence_id: Uuid, actor: Uuid) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE sku_sequences SET is_active = FALSE, updated_at = $2, updated_by = $3, \
             version = version + 1 WHERE id = $1",
        )
        .bind(sequence_id)
        .bind(Utc::now())
        .bind(actor)
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(Error::not_found(format!("SKU sequence {sequence_id}")));
        }
        Ok(())
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    async fn find_by_scope(
        &self,
        brand_id: Option<Uuid>,
        category_id: Option<Uuid>,
    ) -> Result<Option<SkuSequence>> {
        let sequence = sqlx::query_as::<_, SkuSequence>(&format!(
            "SELECT {SEQUENCE_COLUMNS} FROM sku_sequences \
             WHERE brand_id IS NOT DISTINCT FROM $1 AND category_id IS NOT DISTINCT FROM $2"
        ))
        .bind(brand_id)
        .bind(category_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(sequence)
    }

    async fn insert_sequence(&self, sequence: &SkuSequence) -> Result<()> {
        sqlx::query(
            "INSERT INTO sku_sequences (id, brand_id, category_id, prefix, suffix, \
             padding_length, format_template, next_sequence, total_generated, \
             last_generated_sku, last_generated_at, created_at, created_by, updated_at, \
             updated_by, is_active, version) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)",
        )
        .bind(sequence.id)
        .bind(sequence.brand_id)
        .bind(sequence.category_id)
        .bind(&sequence.prefix)
        .bind(&sequence.suffix)
        .bind(sequence.padding_length)
        .bind(&sequence.format_template)
        .bind(sequence.next_sequence)
        .bind(sequence.total_generated)
        .bind(&sequence.last_generated_sku)
        .bind(sequence.last_generated_at)
        .bind(sequence.audit.created_at)
        .bind(sequence.audit.created_by)
        .bind(sequence.audit.updated_at)
        .bind(sequence.audit.updated_by)
        .bind(sequence.audit.is_active)
        .bind(sequence.audit.version)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Row-level write lock on the sequence row; the serialization point for
/// all counter mutations.
async fn lock_sequence(
    tx: &mut Transaction<'_, Postgres>,
    sequence_id: Uuid,
) -> Result<SkuSequence> {
    sqlx::query_as::<_, SkuSequence>(&format!(
        "SELECT {SEQUENCE_COLUMNS} FROM sku_sequences WHERE id = $1 FOR UPDATE"
    ))
    .bind(sequence_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| Error::not_found(format!("SKU sequence {sequence_id}")))
}
