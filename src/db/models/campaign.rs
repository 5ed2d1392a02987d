use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::member::TenantId;
use super::tier::TierId;
use super::voucher::VoucherId;
use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct CampaignId(pub Uuid);

/// Tenant-scoped promotional rule. `criteria` is a JSON array of
/// [`Criterion`] values; a document that fails to parse only disqualifies
/// this campaign, never the whole evaluation.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Campaign {
    pub id: CampaignId,
    pub tenant_id: Option<TenantId>,
    pub name: String,
    pub is_active: bool,
    pub priority: i32,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub criteria: String,
    pub reward_kind: String,
    pub reward_points: Option<i64>,
    pub reward_multiplier: Option<f64>,
    pub reward_voucher_id: Option<VoucherId>,
}

/// One optional filter inside a campaign's criteria conjunction. An absent
/// or empty filter is vacuously satisfied, so new kinds can be added
/// without weakening existing campaigns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Criterion {
    /// ISO weekday numbers, Monday = 1 through Sunday = 7.
    DaysOfWeek { days: Vec<u32> },
    AmountRange { min: Option<f64>, max: Option<f64> },
    Categories { any_of: Vec<String> },
    Skus { any_of: Vec<String> },
    Locations { any_of: Vec<String> },
    Tiers { any_of: Vec<TierId> },
    Birthday,
}

/// Per-tenant points configuration; a `tenant_id IS NULL` row holds the
/// global defaults.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PointsSettings {
    pub tenant_id: Option<TenantId>,
    pub base_earning_rate: f64,
    pub rounding_rule: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CampaignReward {
    FlatPoints(i64),
    Multiplier(f64),
    VoucherGrant(VoucherId),
}

impl Campaign {
    pub fn parse_criteria(&self) -> Result<Vec<Criterion>, serde_json::Error> {
        serde_json::from_str(&self.criteria)
    }

    pub fn reward(&self) -> EngineResult<CampaignReward> {
        match self.reward_kind.as_str() {
            "points" => self
                .reward_points
                .map(CampaignReward::FlatPoints)
                .ok_or_else(|| malformed(self, "missing reward_points")),
            "multiplier" => self
                .reward_multiplier
                .map(CampaignReward::Multiplier)
                .ok_or_else(|| malformed(self, "missing reward_multiplier")),
            "voucher" => self
                .reward_voucher_id
                .map(CampaignReward::VoucherGrant)
                .ok_or_else(|| malformed(self, "missing reward_voucher_id")),
            other => Err(malformed(self, &format!("unknown reward kind '{other}'"))),
        }
    }
}

fn malformed(campaign: &Campaign, detail: &str) -> EngineError {
    EngineError::Validation(format!("campaign '{}': {detail}", campaign.id.0))
}

#[cfg(test)]
mod test {
    use super::*;

    fn campaign(criteria: &str, reward_kind: &str) -> Campaign {
        Campaign {
            id: CampaignId(Uuid::new_v4()),
            tenant_id: None,
            name: "double points weekend".to_string(),
            is_active: true,
            priority: 10,
            start_date: Utc::now(),
            end_date: Utc::now(),
            criteria: criteria.to_string(),
            reward_kind: reward_kind.to_string(),
            reward_points: Some(50),
            reward_multiplier: Some(2.0),
            reward_voucher_id: None,
        }
    }

    #[test]
    fn criteria_round_trips_through_json() {
        let doc = r#"[
            {"kind": "days_of_week", "days": [6, 7]},
            {"kind": "amount_range", "min": 20.0, "max": null},
            {"kind": "categories", "any_of": ["coffee"]},
            {"kind": "birthday"}
        ]"#;

        let parsed = campaign(doc, "points").parse_criteria().unwrap();
        assert_eq!(parsed.len(), 4);
        assert_eq!(parsed[0], Criterion::DaysOfWeek { days: vec![6, 7] });
        assert_eq!(parsed[3], Criterion::Birthday);
    }

    #[test]
    fn malformed_criteria_is_an_error_not_a_panic() {
        assert!(campaign("{not json", "points").parse_criteria().is_err());
        assert!(
            campaign(r#"[{"kind": "moon_phase"}]"#, "points")
                .parse_criteria()
                .is_err()
        );
    }

    #[test]
    fn reward_kind_dispatch() {
        assert_eq!(
            campaign("[]", "points").reward().unwrap(),
            CampaignReward::FlatPoints(50)
        );
        assert_eq!(
            campaign("[]", "multiplier").reward().unwrap(),
            CampaignReward::Multiplier(2.0)
        );
        assert!(campaign("[]", "raffle").reward().is_err());
    }

    #[test]
    fn voucher_reward_requires_a_voucher_id() {
        let c = campaign("[]", "voucher");
        assert!(matches!(c.reward(), Err(EngineError::Validation(_))));
    }
}
