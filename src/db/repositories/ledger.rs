use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use super::Tx;
use crate::db::models::ledger::{self, Balance, Counters, LedgerEntry, LedgerKind};
use crate::db::models::member::{BalanceKey, MemberId};
use crate::error::EngineResult;

const BALANCE_FIELDS: &str = r#"
    member_id,
    tenant_id,
    available,
    total,
    lifetime,
    tier_id,
    joined_at,
    updated_at
"#;

/// Points posting. Every mutation runs as one transaction: exclusive lock
/// on the single balance row for the key, delta computation, one immutable
/// ledger entry, snapshot update, tier re-evaluation. Two postings for the
/// same key serialize on the row lock; different keys never contend.
#[derive(Debug, Clone, Copy)]
pub struct LedgerRepository {
    pool: &'static PgPool,
}

impl LedgerRepository {
    pub fn new(pool: &'static PgPool) -> Self {
        Self { pool }
    }

    #[instrument(skip(self, reason, reference))]
    pub async fn earn(
        &self,
        key: BalanceKey,
        points: i64,
        reason: &str,
        reference: Option<&str>,
    ) -> EngineResult<LedgerEntry> {
        self.post(LedgerKind::Earn, key, points, reason, reference)
            .await
    }

    #[instrument(skip(self, reason, reference))]
    pub async fn redeem(
        &self,
        key: BalanceKey,
        points: i64,
        reason: &str,
        reference: Option<&str>,
    ) -> EngineResult<LedgerEntry> {
        self.post(LedgerKind::Redeem, key, points, reason, reference)
            .await
    }

    /// Removes up to `points` from the spendable balance, deducting at most
    /// what is available. Used by scheduled point-expiry sweeps.
    #[instrument(skip(self, reason, reference))]
    pub async fn expire(
        &self,
        key: BalanceKey,
        points: i64,
        reason: &str,
        reference: Option<&str>,
    ) -> EngineResult<LedgerEntry> {
        self.post(LedgerKind::Expire, key, points, reason, reference)
            .await
    }

    #[instrument(skip(self, reason, reference))]
    pub async fn adjust(
        &self,
        key: BalanceKey,
        points: i64,
        reason: &str,
        reference: Option<&str>,
    ) -> EngineResult<LedgerEntry> {
        self.post(LedgerKind::Adjust, key, points, reason, reference)
            .await
    }

    async fn post(
        &self,
        kind: LedgerKind,
        key: BalanceKey,
        points: i64,
        reason: &str,
        reference: Option<&str>,
    ) -> EngineResult<LedgerEntry> {
        let mut tx = Tx::begin(self.pool).await?;
        let entry = Self::post_in_tx(&mut tx, kind, key, points, reason, reference).await?;
        tx.commit().await?;

        Ok(entry)
    }

    /// The atomic posting unit, usable from a caller-owned transaction so
    /// voucher claims can charge points under their own locks.
    pub async fn post_in_tx(
        tx: &mut Tx<'_>,
        kind: LedgerKind,
        key: BalanceKey,
        points: i64,
        reason: &str,
        reference: Option<&str>,
    ) -> EngineResult<LedgerEntry> {
        // the row is created lazily on first posting; a failed posting rolls
        // the insert back with the rest of the transaction
        sqlx::query(
            r#"
            INSERT INTO balance (member_id, tenant_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(key.member_id)
        .bind(key.tenant_uuid())
        .execute(&mut **tx.inner_mut()?)
        .await?;

        let before = sqlx::query_as::<_, Balance>(&format!(
            r#"
            SELECT {BALANCE_FIELDS} FROM balance
            WHERE member_id = $1 AND tenant_id IS NOT DISTINCT FROM $2
            FOR UPDATE
            "#
        ))
        .bind(key.member_id)
        .bind(key.tenant_uuid())
        .fetch_one(&mut **tx.inner_mut()?)
        .await?;

        let posting = ledger::apply(kind, Counters::from(&before), points)?;

        let entry = sqlx::query_as::<_, LedgerEntry>(
            r#"
            INSERT INTO ledger_entry
                (id, member_id, tenant_id, kind, points, balance_before, balance_after, reason, reference)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING
                id, member_id, tenant_id, kind, points,
                balance_before, balance_after, reason, reference, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(key.member_id)
        .bind(key.tenant_uuid())
        .bind(kind.as_str())
        .bind(posting.delta)
        .bind(before.available)
        .bind(posting.after.available)
        .bind(reason)
        .bind(reference)
        .fetch_one(&mut **tx.inner_mut()?)
        .await?;

        // tier re-evaluation rides inside the same lock; no qualifying band
        // leaves the current tier untouched
        let next_tier: Option<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id FROM tier
            WHERE tenant_id IS NOT DISTINCT FROM $1 AND min_points <= $2
            ORDER BY min_points DESC
            LIMIT 1
            "#,
        )
        .bind(key.tenant_uuid())
        .bind(posting.after.lifetime)
        .fetch_optional(&mut **tx.inner_mut()?)
        .await?;

        let tier_id = next_tier
            .map(|(id,)| id)
            .or(before.tier_id.map(|t| t.0));

        sqlx::query(
            r#"
            UPDATE balance
            SET available = $3, total = $4, lifetime = $5, tier_id = $6, updated_at = NOW()
            WHERE member_id = $1 AND tenant_id IS NOT DISTINCT FROM $2
            "#,
        )
        .bind(key.member_id)
        .bind(key.tenant_uuid())
        .bind(posting.after.available)
        .bind(posting.after.total)
        .bind(posting.after.lifetime)
        .bind(tier_id)
        .execute(&mut **tx.inner_mut()?)
        .await?;

        Ok(entry)
    }

    #[instrument(skip(self))]
    pub async fn balance(&self, key: BalanceKey) -> EngineResult<Option<Balance>> {
        Ok(sqlx::query_as::<_, Balance>(&format!(
            r#"
            SELECT {BALANCE_FIELDS} FROM balance
            WHERE member_id = $1 AND tenant_id IS NOT DISTINCT FROM $2
            "#
        ))
        .bind(key.member_id)
        .bind(key.tenant_uuid())
        .fetch_optional(self.pool)
        .await?)
    }

    /// Read-time projection of a member's spendable points across every
    /// scope. Nothing mirrors this into a mutable column.
    #[instrument(skip(self))]
    pub async fn aggregate_available(&self, member_id: MemberId) -> EngineResult<i64> {
        Ok(sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COALESCE(SUM(available), 0)::BIGINT FROM balance
            WHERE member_id = $1
            "#,
        )
        .bind(member_id)
        .fetch_one(self.pool)
        .await?)
    }

    #[instrument(skip(self))]
    pub async fn entries_for(
        &self,
        key: BalanceKey,
        limit: i64,
    ) -> EngineResult<Vec<LedgerEntry>> {
        Ok(sqlx::query_as::<_, LedgerEntry>(
            r#"
            SELECT
                id, member_id, tenant_id, kind, points,
                balance_before, balance_after, reason, reference, created_at
            FROM ledger_entry
            WHERE member_id = $1 AND tenant_id IS NOT DISTINCT FROM $2
            ORDER BY created_at DESC
            LIMIT $3
            "#,
        )
        .bind(key.member_id)
        .bind(key.tenant_uuid())
        .bind(limit)
        .fetch_all(self.pool)
        .await?)
    }
}
