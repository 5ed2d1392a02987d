use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use crate::db::models::member::BalanceKey;
use crate::db::models::token::{TokenKind, TokenRecord, TokenStatus};
use crate::db::models::voucher::ClaimId;
use crate::error::EngineResult;

const TOKEN_FIELDS: &str = r#"
    id,
    member_id,
    tenant_id,
    kind,
    points,
    claim_id,
    status,
    issued_at,
    expires_at,
    used_at,
    used_by_pos
"#;

#[derive(Debug, Clone, Copy)]
pub struct TokenRepository {
    pool: &'static PgPool,
}

impl TokenRepository {
    pub fn new(pool: &'static PgPool) -> Self {
        Self { pool }
    }

    #[instrument(skip(self))]
    pub async fn insert(
        &self,
        id: Uuid,
        key: BalanceKey,
        kind: TokenKind,
        points: Option<i64>,
        claim_id: Option<ClaimId>,
        expires_at: DateTime<Utc>,
    ) -> EngineResult<TokenRecord> {
        Ok(sqlx::query_as::<_, TokenRecord>(&format!(
            r#"
            INSERT INTO redemption_token
                (id, member_id, tenant_id, kind, points, claim_id, status, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {TOKEN_FIELDS}
            "#
        ))
        .bind(id)
        .bind(key.member_id)
        .bind(key.tenant_uuid())
        .bind(kind.as_str())
        .bind(points)
        .bind(claim_id)
        .bind(TokenStatus::Active.as_str())
        .bind(expires_at)
        .fetch_one(self.pool)
        .await?)
    }

    #[instrument(skip(self))]
    pub async fn get(&self, id: Uuid) -> EngineResult<Option<TokenRecord>> {
        Ok(sqlx::query_as::<_, TokenRecord>(&format!(
            "SELECT {TOKEN_FIELDS} FROM redemption_token WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?)
    }

    /// First writer wins: flips `active -> used` and reports whether this
    /// call was the one that did it. A second consume of the same token
    /// matches zero rows no matter how the calls interleave.
    #[instrument(skip(self))]
    pub async fn mark_used(&self, id: Uuid, pos_id: &str) -> EngineResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE redemption_token
            SET status = $2, used_at = NOW(), used_by_pos = $3
            WHERE id = $1 AND status = $4
            "#,
        )
        .bind(id)
        .bind(TokenStatus::Used.as_str())
        .bind(pos_id)
        .bind(TokenStatus::Active.as_str())
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
