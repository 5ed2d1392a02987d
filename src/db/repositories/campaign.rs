use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::instrument;

use crate::db::models::campaign::{Campaign, PointsSettings};
use crate::db::models::member::TenantId;
use crate::error::EngineResult;

const CAMPAIGN_FIELDS: &str = r#"
    id,
    tenant_id,
    name,
    is_active,
    priority,
    start_date,
    end_date,
    criteria,
    reward_kind,
    reward_points,
    reward_multiplier,
    reward_voucher_id
"#;

#[derive(Debug, Clone, Copy)]
pub struct CampaignRepository {
    pool: &'static PgPool,
}

impl CampaignRepository {
    pub fn new(pool: &'static PgPool) -> Self {
        Self { pool }
    }

    /// Active campaigns inside their validity window, descending priority.
    /// Ordering only affects how rewards are presented; every match fires.
    #[instrument(skip(self))]
    pub async fn active(
        &self,
        tenant: Option<TenantId>,
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<Campaign>> {
        Ok(sqlx::query_as::<_, Campaign>(&format!(
            r#"
            SELECT {CAMPAIGN_FIELDS} FROM campaign
            WHERE tenant_id IS NOT DISTINCT FROM $1
                AND is_active
                AND start_date <= $2
                AND end_date >= $2
            ORDER BY priority DESC
            "#
        ))
        .bind(tenant)
        .bind(now)
        .fetch_all(self.pool)
        .await?)
    }

    /// Points configuration for the scope, falling back to the global row
    /// (`tenant_id IS NULL`) when the tenant has none of its own.
    #[instrument(skip(self))]
    pub async fn effective_settings(
        &self,
        tenant: Option<TenantId>,
    ) -> EngineResult<Option<PointsSettings>> {
        if tenant.is_some() {
            let scoped = sqlx::query_as::<_, PointsSettings>(
                r#"
                SELECT tenant_id, base_earning_rate, rounding_rule
                FROM tenant_settings
                WHERE tenant_id IS NOT DISTINCT FROM $1
                "#,
            )
            .bind(tenant)
            .fetch_optional(self.pool)
            .await?;

            if scoped.is_some() {
                return Ok(scoped);
            }
        }

        Ok(sqlx::query_as::<_, PointsSettings>(
            r#"
            SELECT tenant_id, base_earning_rate, rounding_rule
            FROM tenant_settings
            WHERE tenant_id IS NULL
            "#,
        )
        .fetch_optional(self.pool)
        .await?)
    }
}
