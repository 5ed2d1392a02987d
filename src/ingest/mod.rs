//! Purchase ingestion: resolve the member, reserve the idempotency key,
//! evaluate the award, and record the outcome. The `pending` row is written
//! before any evaluation so a duplicate submission is rejected even while
//! the original is still in flight.

use serde::Serialize;
use sqlx::PgPool;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::db::prelude::*;
use crate::error::EngineResult;
use crate::rules::{self, RewardLine};

/// POS-facing response; field names and casing are the POS wire contract
/// (`transactionId`, `status`, `pointsEarned`, `vouchersAwarded`), with the
/// award breakdown alongside.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOutcome {
    pub transaction_id: Uuid,
    pub external_id: String,
    pub status: PurchaseStatus,
    pub member_id: MemberId,
    pub base_points: i64,
    pub tier_points: i64,
    pub points_earned: i64,
    pub new_available: i64,
    pub new_lifetime: i64,
    pub rewards: Vec<RewardLine>,
    pub vouchers_awarded: Vec<ClaimId>,
}

/// Full ingestion path for one POS transaction.
///
/// A duplicate `external_id` fails before evaluation and leaves no trace.
/// An evaluation failure after the reservation flips the record to `failed`
/// and re-raises the original error; the row stays behind as the audit
/// trail, and because `external_id` remains taken the event cannot be
/// replayed into a second award.
#[instrument(skip(pool, event), fields(external_id = %event.external_id, pos_id = %event.pos_id))]
pub async fn submit(pool: &'static PgPool, event: &PurchaseEvent) -> EngineResult<SubmitOutcome> {
    let member = MemberRepository::new(pool)
        .resolve(event.member_id, event.member_phone.as_deref())
        .await?;

    let record = PurchaseRepository::new(pool)
        .insert_pending(event, member.id, event.tenant_id.map(TenantId))
        .await?;

    let purchases = PurchaseRepository::new(pool);
    let evaluation = match rules::evaluate(pool, event, &member).await {
        Ok(evaluation) => evaluation,
        Err(e) => {
            error!(purchase = %record.id, error = %e, "purchase evaluation failed");
            // the evaluation error is what the caller needs; a failure to
            // record the failed status must not replace it
            if let Err(mark_err) = purchases.mark_failed(record.id).await {
                error!(purchase = %record.id, error = %mark_err,
                       "could not mark purchase record failed");
            }
            return Err(e);
        }
    };

    purchases
        .mark_processed(record.id, evaluation.total_points)
        .await?;

    let key = BalanceKey::scoped(member.id, event.tenant_id.map(TenantId));
    let lifetime = LedgerRepository::new(pool)
        .balance(key)
        .await?
        .map(|b| b.lifetime)
        .unwrap_or(evaluation.ledger_entry.balance_after);

    info!(
        purchase = %record.id,
        member = %member.id,
        points = evaluation.total_points,
        "purchase processed"
    );

    Ok(SubmitOutcome {
        transaction_id: record.id,
        external_id: record.external_id,
        status: PurchaseStatus::Processed,
        member_id: member.id,
        base_points: evaluation.base_points,
        tier_points: evaluation.tier_points,
        points_earned: evaluation.total_points,
        new_available: evaluation.ledger_entry.balance_after,
        new_lifetime: lifetime,
        rewards: evaluation.rewards,
        vouchers_awarded: evaluation.vouchers_awarded,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    /// The response keys POS integrations code against.
    #[test]
    fn submit_response_keeps_the_pos_wire_shape() {
        let outcome = SubmitOutcome {
            transaction_id: Uuid::new_v4(),
            external_id: "pos-7781-000123".to_string(),
            status: PurchaseStatus::Processed,
            member_id: MemberId(Uuid::new_v4()),
            base_points: 25,
            tier_points: 31,
            points_earned: 81,
            new_available: 81,
            new_lifetime: 81,
            rewards: vec![],
            vouchers_awarded: vec![],
        };

        let json = serde_json::to_value(&outcome).unwrap();
        let object = json.as_object().unwrap();

        assert!(object.contains_key("transactionId"));
        assert!(object.contains_key("status"));
        assert!(object.contains_key("pointsEarned"));
        assert!(object.contains_key("vouchersAwarded"));
        assert_eq!(json["status"], "processed");
        assert_eq!(json["pointsEarned"], 81);
        assert!(!object.contains_key("purchaseId"));
        assert!(!object.contains_key("totalPoints"));
    }
}
