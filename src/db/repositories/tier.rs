use sqlx::PgPool;
use tracing::instrument;

use crate::db::models::member::TenantId;
use crate::db::models::tier::{Tier, TierId};
use crate::error::EngineResult;

const TIER_FIELDS: &str = r#"
    id,
    tenant_id,
    name,
    min_points,
    max_points,
    multiplier,
    benefits
"#;

#[derive(Debug, Clone, Copy)]
pub struct TierRepository {
    pool: &'static PgPool,
}

impl TierRepository {
    pub fn new(pool: &'static PgPool) -> Self {
        Self { pool }
    }

    /// Full threshold catalog for one scope, ordered for band selection.
    #[instrument(skip(self))]
    pub async fn catalog(&self, tenant: Option<TenantId>) -> EngineResult<Vec<Tier>> {
        Ok(sqlx::query_as::<_, Tier>(&format!(
            r#"
            SELECT {TIER_FIELDS} FROM tier
            WHERE tenant_id IS NOT DISTINCT FROM $1
            ORDER BY min_points ASC
            "#
        ))
        .bind(tenant)
        .fetch_all(self.pool)
        .await?)
    }

    #[instrument(skip(self))]
    pub async fn by_id(&self, id: TierId) -> EngineResult<Option<Tier>> {
        Ok(sqlx::query_as::<_, Tier>(&format!(
            "SELECT {TIER_FIELDS} FROM tier WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?)
    }
}
