use chrono::Utc;
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use super::Tx;
use super::ledger::LedgerRepository;
use crate::db::models::ledger::LedgerKind;
use crate::db::models::member::BalanceKey;
use crate::db::models::voucher::{ClaimId, ClaimStatus, Voucher, VoucherClaim, VoucherId};
use crate::error::{EngineError, EngineResult};

const VOUCHER_FIELDS: &str = r#"
    id,
    tenant_id,
    name,
    kind,
    points_cost,
    quantity,
    used_count,
    valid_from,
    valid_until,
    is_active
"#;

const CLAIM_FIELDS: &str = r#"
    id,
    voucher_id,
    member_id,
    tenant_id,
    status,
    claimed_at,
    expires_at,
    used_at,
    used_at_location
"#;

/// Voucher inventory and member claims. Claiming always locks the voucher
/// row before the balance row so two claims can never deadlock against a
/// concurrent posting taking the locks the other way round.
#[derive(Debug, Clone, Copy)]
pub struct VoucherRepository {
    pool: &'static PgPool,
}

impl VoucherRepository {
    pub fn new(pool: &'static PgPool) -> Self {
        Self { pool }
    }

    #[instrument(skip(self))]
    pub async fn get(&self, id: VoucherId) -> EngineResult<Option<Voucher>> {
        Ok(sqlx::query_as::<_, Voucher>(&format!(
            "SELECT {VOUCHER_FIELDS} FROM voucher WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?)
    }

    #[instrument(skip(self))]
    pub async fn get_claim(&self, id: ClaimId) -> EngineResult<Option<VoucherClaim>> {
        Ok(sqlx::query_as::<_, VoucherClaim>(&format!(
            "SELECT {CLAIM_FIELDS} FROM voucher_claim WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?)
    }

    /// Exchanges points for a voucher instance: stock check, ledger charge,
    /// `used_count` bump, and claim row all commit or roll back together.
    #[instrument(skip(self))]
    pub async fn claim(&self, key: BalanceKey, voucher_id: VoucherId) -> EngineResult<VoucherClaim> {
        let mut tx = Tx::begin(self.pool).await?;

        let voucher = Self::lock_voucher(&mut tx, voucher_id).await?;
        Self::check_claimable(&voucher)?;

        LedgerRepository::post_in_tx(
            &mut tx,
            LedgerKind::Redeem,
            key,
            voucher.points_cost,
            &format!("voucher claim: {}", voucher.name),
            Some(&voucher.id.0.to_string()),
        )
        .await?;

        let claim =
            Self::record_claim(&mut tx, &voucher, key).await?;

        tx.commit().await?;
        Ok(claim)
    }

    /// Campaign-reward grant: same stock accounting as a claim, no point
    /// charge.
    #[instrument(skip(self))]
    pub async fn grant(&self, key: BalanceKey, voucher_id: VoucherId) -> EngineResult<VoucherClaim> {
        let mut tx = Tx::begin(self.pool).await?;

        let voucher = Self::lock_voucher(&mut tx, voucher_id).await?;
        Self::check_claimable(&voucher)?;

        let claim = Self::record_claim(&mut tx, &voucher, key).await?;

        tx.commit().await?;
        Ok(claim)
    }

    /// Marks an active claim used at a terminal. A claim found past its
    /// expiry is flipped to `expired` (and the flip committed) before the
    /// failure is reported.
    #[instrument(skip(self))]
    pub async fn redeem_claim(
        &self,
        claim_id: ClaimId,
        location: Option<&str>,
    ) -> EngineResult<VoucherClaim> {
        let now = Utc::now();
        let mut tx = Tx::begin(self.pool).await?;

        let claim = sqlx::query_as::<_, VoucherClaim>(&format!(
            "SELECT {CLAIM_FIELDS} FROM voucher_claim WHERE id = $1 FOR UPDATE"
        ))
        .bind(claim_id)
        .fetch_optional(&mut **tx.inner_mut()?)
        .await?
        .ok_or(EngineError::NotFound("voucher claim"))?;

        match claim.status.as_str() {
            "used" => {
                return Err(EngineError::Conflict(
                    "voucher claim has already been redeemed".to_string(),
                ));
            }
            "expired" => return Err(EngineError::Expired("voucher claim")),
            _ => {}
        }

        if claim.expires_at <= now {
            sqlx::query("UPDATE voucher_claim SET status = $2 WHERE id = $1")
                .bind(claim_id)
                .bind(ClaimStatus::Expired.as_str())
                .execute(&mut **tx.inner_mut()?)
                .await?;
            tx.commit().await?;

            return Err(EngineError::Expired("voucher claim"));
        }

        let updated = sqlx::query_as::<_, VoucherClaim>(&format!(
            r#"
            UPDATE voucher_claim
            SET status = $2, used_at = NOW(), used_at_location = $3
            WHERE id = $1 AND status = $4
            RETURNING {CLAIM_FIELDS}
            "#
        ))
        .bind(claim_id)
        .bind(ClaimStatus::Used.as_str())
        .bind(location)
        .bind(ClaimStatus::Active.as_str())
        .fetch_optional(&mut **tx.inner_mut()?)
        .await?
        .ok_or_else(|| {
            EngineError::Conflict("voucher claim has already been redeemed".to_string())
        })?;

        tx.commit().await?;
        Ok(updated)
    }

    async fn lock_voucher(tx: &mut Tx<'_>, id: VoucherId) -> EngineResult<Voucher> {
        sqlx::query_as::<_, Voucher>(&format!(
            "SELECT {VOUCHER_FIELDS} FROM voucher WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut **tx.inner_mut()?)
        .await?
        .ok_or(EngineError::NotFound("voucher"))
    }

    fn check_claimable(voucher: &Voucher) -> EngineResult<()> {
        let now = Utc::now();

        // an inactive or not-yet-open voucher is indistinguishable from an
        // absent one to the caller
        if !voucher.is_active || voucher.valid_from > now {
            return Err(EngineError::NotFound("voucher"));
        }
        if voucher.valid_until < now {
            return Err(EngineError::Expired("voucher"));
        }
        if voucher.sold_out() {
            return Err(EngineError::Conflict(format!(
                "voucher '{}' is sold out",
                voucher.name
            )));
        }

        Ok(())
    }

    async fn record_claim(
        tx: &mut Tx<'_>,
        voucher: &Voucher,
        key: BalanceKey,
    ) -> EngineResult<VoucherClaim> {
        sqlx::query("UPDATE voucher SET used_count = used_count + 1 WHERE id = $1")
            .bind(voucher.id)
            .execute(&mut **tx.inner_mut()?)
            .await?;

        Ok(sqlx::query_as::<_, VoucherClaim>(&format!(
            r#"
            INSERT INTO voucher_claim (id, voucher_id, member_id, tenant_id, status, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {CLAIM_FIELDS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(voucher.id)
        .bind(key.member_id)
        .bind(key.tenant_uuid())
        .bind(ClaimStatus::Active.as_str())
        .bind(voucher.valid_until)
        .fetch_one(&mut **tx.inner_mut()?)
        .await?)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeDelta;
    use crate::db::models::voucher::VoucherId;

    fn voucher() -> Voucher {
        let now = Utc::now();
        Voucher {
            id: VoucherId(Uuid::new_v4()),
            tenant_id: None,
            name: "free pastry".to_string(),
            kind: "freebie".to_string(),
            points_cost: 100,
            quantity: Some(5),
            used_count: 0,
            valid_from: now - TimeDelta::days(1),
            valid_until: now + TimeDelta::days(30),
            is_active: true,
        }
    }

    #[test]
    fn unavailable_vouchers_read_as_not_found() {
        let mut inactive = voucher();
        inactive.is_active = false;
        assert!(matches!(
            VoucherRepository::check_claimable(&inactive),
            Err(EngineError::NotFound("voucher"))
        ));

        let mut not_yet_open = voucher();
        not_yet_open.valid_from = Utc::now() + TimeDelta::days(1);
        assert!(matches!(
            VoucherRepository::check_claimable(&not_yet_open),
            Err(EngineError::NotFound("voucher"))
        ));
    }

    #[test]
    fn past_window_and_sold_out_keep_their_own_errors() {
        let mut stale = voucher();
        stale.valid_until = Utc::now() - TimeDelta::seconds(1);
        assert!(matches!(
            VoucherRepository::check_claimable(&stale),
            Err(EngineError::Expired("voucher"))
        ));

        let mut gone = voucher();
        gone.used_count = 5;
        assert!(matches!(
            VoucherRepository::check_claimable(&gone),
            Err(EngineError::Conflict(_))
        ));

        assert!(VoucherRepository::check_claimable(&voucher()).is_ok());
    }
}
