//! Campaign rule engine: evaluates one purchase event against the tenant's
//! active promotions and posts the resulting award as a single ledger entry.

pub mod criteria;
pub mod points;

use chrono::Utc;
use serde::Serialize;
use sqlx::PgPool;
use tracing::{instrument, warn};

use crate::db::models::campaign::CampaignReward;
use crate::db::models::tier::pick_tier;
use crate::db::prelude::*;
use crate::error::{EngineError, EngineResult};
use crate::rules::criteria::MatchContext;
use crate::rules::points::RoundingRule;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardLine {
    pub campaign_id: CampaignId,
    pub campaign_name: String,
    /// Bonus points this campaign contributed; zero for voucher grants.
    pub points: i64,
    pub voucher_claim: Option<ClaimId>,
}

#[derive(Debug, Serialize)]
pub struct Evaluation {
    pub base_points: i64,
    pub tier_points: i64,
    pub total_points: i64,
    pub rewards: Vec<RewardLine>,
    pub vouchers_awarded: Vec<ClaimId>,
    pub ledger_entry: LedgerEntry,
}

/// A matched voucher-grant campaign, held back until the earn posting has
/// committed. Nothing with a side effect runs while the purchase can still
/// fail, so a failed purchase leaves no claims behind.
#[derive(Debug, Clone, PartialEq)]
struct PendingGrant {
    campaign_id: CampaignId,
    campaign_name: String,
    voucher_id: VoucherId,
}

/// Runs the full award computation for a purchase.
///
/// A missing member, tier, or points configuration aborts the evaluation;
/// a single malformed campaign only disqualifies itself. All campaign point
/// bonuses merge into one `earn` posting — per-campaign amounts live only
/// in the returned reward lines. Voucher grants are dispatched strictly
/// after the posting succeeds.
#[instrument(skip(pool, event, member), fields(external_id = %event.external_id))]
pub async fn evaluate(
    pool: &'static PgPool,
    event: &PurchaseEvent,
    member: &Member,
) -> EngineResult<Evaluation> {
    let key = BalanceKey::scoped(member.id, event.tenant_id.map(TenantId));

    let settings = CampaignRepository::new(pool)
        .effective_settings(key.tenant_id)
        .await?
        .ok_or(EngineError::NotFound("points configuration"))?;

    if settings.base_earning_rate < 0.0 {
        return Err(EngineError::Validation(format!(
            "negative base earning rate {}",
            settings.base_earning_rate
        )));
    }

    let ledger = LedgerRepository::new(pool);
    let lifetime = ledger
        .balance(key)
        .await?
        .map(|b| b.lifetime)
        .unwrap_or_default();

    let catalog = TierRepository::new(pool).catalog(key.tenant_id).await?;
    let tier = pick_tier(&catalog, lifetime).ok_or(EngineError::NotFound("tier"))?;

    let rounding = RoundingRule::parse(&settings.rounding_rule);
    let base = points::base_points(event.total, settings.base_earning_rate, rounding);
    let tier_total = points::tier_points(base, tier.multiplier);

    let ctx = MatchContext {
        event,
        member_birth_date: member.date_of_birth,
        member_tier: Some(tier.id),
        now: Utc::now(),
    };

    let campaigns = CampaignRepository::new(pool)
        .active(key.tenant_id, ctx.now)
        .await?;

    let (bonus, mut rewards, pending_grants) = collect_rewards(&campaigns, &ctx, base);
    let total = tier_total + bonus;

    let reason = breakdown(event, base, tier.name.as_str(), tier.multiplier, &rewards);
    let ledger_entry = ledger
        .earn(key, total, &reason, Some(&event.external_id))
        .await?;

    let mut vouchers_awarded: Vec<ClaimId> = Vec::new();
    for grant in pending_grants {
        match VoucherRepository::new(pool).grant(key, grant.voucher_id).await {
            Ok(claim) => {
                vouchers_awarded.push(claim.id);
                rewards.push(RewardLine {
                    campaign_id: grant.campaign_id,
                    campaign_name: grant.campaign_name,
                    points: 0,
                    voucher_claim: Some(claim.id),
                });
            }
            Err(e) => {
                warn!(campaign = %grant.campaign_id.0, voucher = %grant.voucher_id.0, error = %e,
                      "skipping voucher grant");
            }
        }
    }

    Ok(Evaluation {
        base_points: base,
        tier_points: tier_total,
        total_points: total,
        rewards,
        vouchers_awarded,
        ledger_entry,
    })
}

/// Matches every campaign against the purchase and splits the results into
/// point bonuses (applied to the posting) and voucher grants (side effects
/// held for after the posting). Pure; touches no storage.
fn collect_rewards(
    campaigns: &[Campaign],
    ctx: &MatchContext<'_>,
    base: i64,
) -> (i64, Vec<RewardLine>, Vec<PendingGrant>) {
    let mut total_bonus = 0i64;
    let mut rewards: Vec<RewardLine> = Vec::new();
    let mut pending_grants: Vec<PendingGrant> = Vec::new();

    for campaign in campaigns {
        let criteria = match campaign.parse_criteria() {
            Ok(c) => c,
            Err(e) => {
                warn!(campaign = %campaign.id.0, error = %e, "skipping campaign with malformed criteria");
                continue;
            }
        };

        if !criteria::matches(&criteria, ctx) {
            continue;
        }

        match campaign.reward() {
            Ok(CampaignReward::FlatPoints(p)) => {
                total_bonus += p;
                rewards.push(RewardLine {
                    campaign_id: campaign.id,
                    campaign_name: campaign.name.clone(),
                    points: p,
                    voucher_claim: None,
                });
            }

            Ok(CampaignReward::Multiplier(m)) => {
                let bonus = points::multiplier_bonus(base, m);
                if bonus > 0 {
                    total_bonus += bonus;
                    rewards.push(RewardLine {
                        campaign_id: campaign.id,
                        campaign_name: campaign.name.clone(),
                        points: bonus,
                        voucher_claim: None,
                    });
                }
            }

            Ok(CampaignReward::VoucherGrant(voucher_id)) => {
                pending_grants.push(PendingGrant {
                    campaign_id: campaign.id,
                    campaign_name: campaign.name.clone(),
                    voucher_id,
                });
            }

            Err(e) => {
                warn!(campaign = %campaign.id.0, error = %e, "skipping campaign with malformed reward");
            }
        }
    }

    (total_bonus, rewards, pending_grants)
}

fn breakdown(
    event: &PurchaseEvent,
    base: i64,
    tier_name: &str,
    multiplier: f64,
    rewards: &[RewardLine],
) -> String {
    let bonus: i64 = rewards.iter().map(|r| r.points).sum();
    let mut reason = format!(
        "purchase {}: {base} base pts x {multiplier:.2} ({tier_name})",
        event.external_id
    );
    if bonus > 0 {
        reason.push_str(&format!(" + {bonus} campaign bonus"));
    }

    reason
}

#[cfg(test)]
mod test {
    use super::*;
    use uuid::Uuid;

    fn campaign(name: &str, criteria: &str, reward_kind: &str) -> Campaign {
        Campaign {
            id: CampaignId(Uuid::new_v4()),
            tenant_id: None,
            name: name.to_string(),
            is_active: true,
            priority: 0,
            start_date: Utc::now(),
            end_date: Utc::now(),
            criteria: criteria.to_string(),
            reward_kind: reward_kind.to_string(),
            reward_points: Some(50),
            reward_multiplier: Some(2.0),
            reward_voucher_id: Some(VoucherId(Uuid::new_v4())),
        }
    }

    fn event() -> PurchaseEvent {
        serde_json::from_str(
            r#"{
                "externalId": "pos-1-42", "posId": "pos-1",
                "items": [], "subtotal": 25.0, "total": 25.0,
                "transactionDate": "2026-08-25T09:30:00Z"
            }"#,
        )
        .unwrap()
    }

    fn line(points: i64) -> RewardLine {
        RewardLine {
            campaign_id: CampaignId(uuid::Uuid::new_v4()),
            campaign_name: "weekend special".to_string(),
            points,
            voucher_claim: None,
        }
    }

    /// Grants carry a side effect, so they must come out of collection as
    /// pending work instead of applied rewards; only point bonuses count
    /// toward the posting.
    #[test]
    fn voucher_grants_are_held_back_from_point_bonuses() {
        let e = event();
        let ctx = MatchContext {
            event: &e,
            member_birth_date: None,
            member_tier: None,
            now: Utc::now(),
        };

        let campaigns = vec![
            campaign("flat fifty", "[]", "points"),
            campaign("free pastry", "[]", "voucher"),
            campaign("broken", "{not json", "points"),
        ];

        let (bonus, lines, grants) = collect_rewards(&campaigns, &ctx, 25);

        assert_eq!(bonus, 50);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].campaign_name, "flat fifty");

        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].campaign_name, "free pastry");
        assert_eq!(grants[0].voucher_id, campaigns[1].reward_voucher_id.unwrap());
    }

    #[test]
    fn multiplier_bonus_feeds_the_running_total() {
        let e = event();
        let ctx = MatchContext {
            event: &e,
            member_birth_date: None,
            member_tier: None,
            now: Utc::now(),
        };

        let campaigns = vec![campaign("double points", "[]", "multiplier")];
        let (bonus, lines, grants) = collect_rewards(&campaigns, &ctx, 25);

        // floor(25 x (2.0 - 1)) = 25
        assert_eq!(bonus, 25);
        assert_eq!(lines.len(), 1);
        assert!(grants.is_empty());
    }

    #[test]
    fn breakdown_mentions_campaign_bonus_only_when_present() {
        let event = event();

        let plain = breakdown(&event, 25, "silver", 1.25, &[]);
        assert_eq!(plain, "purchase pos-1-42: 25 base pts x 1.25 (silver)");

        let with_bonus = breakdown(&event, 25, "silver", 1.25, &[line(50)]);
        assert!(with_bonus.ends_with("+ 50 campaign bonus"));
    }

    /// $25 purchase, 1 pt/$ base rate, 1.25x tier, plus a flat 50-point
    /// campaign for coffee purchases over $20.
    #[test]
    fn stacked_awards_total_eighty_one() {
        let base = points::base_points(25.0, 1.0, RoundingRule::Floor);
        assert_eq!(base, 25);

        let tier_total = points::tier_points(base, 1.25);
        assert_eq!(tier_total, 31);

        let total = tier_total + 50;
        assert_eq!(total, 81);
    }
}
