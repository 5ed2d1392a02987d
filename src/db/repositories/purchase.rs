use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use crate::db::models::member::{MemberId, TenantId};
use crate::db::models::purchase::{PurchaseEvent, PurchaseRecord, PurchaseStatus};
use crate::error::{EngineError, EngineResult};

const RECORD_FIELDS: &str = r#"
    id,
    external_id,
    pos_id,
    location_id,
    member_id,
    tenant_id,
    items,
    subtotal,
    tax,
    discount,
    total,
    payment_method,
    status,
    points_earned,
    transaction_date,
    created_at,
    processed_at
"#;

#[derive(Debug, Clone, Copy)]
pub struct PurchaseRepository {
    pool: &'static PgPool,
}

impl PurchaseRepository {
    pub fn new(pool: &'static PgPool) -> Self {
        Self { pool }
    }

    /// Persists the incoming event as `pending`. The unique `external_id`
    /// index is the idempotency boundary: a resubmission trips it and
    /// surfaces as `Conflict` before any evaluation runs.
    #[instrument(skip(self, event))]
    pub async fn insert_pending(
        &self,
        event: &PurchaseEvent,
        member_id: MemberId,
        tenant_id: Option<TenantId>,
    ) -> EngineResult<PurchaseRecord> {
        let items = serde_json::to_string(&event.items)
            .map_err(|e| EngineError::Validation(format!("unserializable items: {e}")))?;

        let inserted = sqlx::query_as::<_, PurchaseRecord>(&format!(
            r#"
            INSERT INTO purchase_record
                (id, external_id, pos_id, location_id, member_id, tenant_id, items,
                 subtotal, tax, discount, total, payment_method, status, transaction_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING {RECORD_FIELDS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&event.external_id)
        .bind(&event.pos_id)
        .bind(&event.location_id)
        .bind(member_id)
        .bind(tenant_id)
        .bind(items)
        .bind(event.subtotal)
        .bind(event.tax)
        .bind(event.discount)
        .bind(event.total)
        .bind(&event.payment_method)
        .bind(PurchaseStatus::Pending.as_str())
        .bind(event.transaction_date)
        .fetch_one(self.pool)
        .await;

        match inserted {
            Ok(record) => Ok(record),
            Err(e) => {
                let mapped = EngineError::from(e);
                if matches!(mapped, EngineError::Conflict(_)) {
                    Err(EngineError::duplicate_transaction(&event.external_id))
                } else {
                    Err(mapped)
                }
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn mark_processed(&self, id: Uuid, points_earned: i64) -> EngineResult<()> {
        sqlx::query(
            r#"
            UPDATE purchase_record
            SET status = $2, points_earned = $3, processed_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(PurchaseStatus::Processed.as_str())
        .bind(points_earned)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// The record survives as `failed`; ingestion never deletes its audit
    /// trail.
    #[instrument(skip(self))]
    pub async fn mark_failed(&self, id: Uuid) -> EngineResult<()> {
        sqlx::query(
            r#"
            UPDATE purchase_record
            SET status = $2, processed_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(PurchaseStatus::Failed.as_str())
        .execute(self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn by_external_id(&self, external_id: &str) -> EngineResult<Option<PurchaseRecord>> {
        Ok(sqlx::query_as::<_, PurchaseRecord>(&format!(
            "SELECT {RECORD_FIELDS} FROM purchase_record WHERE external_id = $1"
        ))
        .bind(external_id)
        .fetch_optional(self.pool)
        .await?)
    }
}
