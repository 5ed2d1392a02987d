use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::member::TenantId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct TierId(pub Uuid);

/// A point-threshold band. Bands are ordered by `min_points` and are
/// non-overlapping within one tenant; `benefits` is an opaque JSON bag the
/// engine never interprets.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Tier {
    pub id: TierId,
    pub tenant_id: Option<TenantId>,
    pub name: String,
    pub min_points: i64,
    pub max_points: Option<i64>,
    pub multiplier: f64,
    pub benefits: Option<String>,
}

/// Picks the tier with the greatest `min_points` not exceeding `lifetime`.
/// `None` means no band qualifies and the member's current tier must be
/// left as-is.
pub fn pick_tier(catalog: &[Tier], lifetime: i64) -> Option<&Tier> {
    catalog
        .iter()
        .filter(|t| t.min_points <= lifetime)
        .max_by_key(|t| t.min_points)
}

#[cfg(test)]
mod test {
    use super::*;

    fn tier(name: &str, min_points: i64, max_points: Option<i64>, multiplier: f64) -> Tier {
        Tier {
            id: TierId(Uuid::new_v4()),
            tenant_id: None,
            name: name.to_string(),
            min_points,
            max_points,
            multiplier,
            benefits: None,
        }
    }

    fn catalog() -> Vec<Tier> {
        vec![
            tier("bronze", 0, Some(499), 1.0),
            tier("silver", 500, Some(1999), 1.25),
            tier("gold", 2000, None, 1.5),
        ]
    }

    #[test]
    fn picks_greatest_qualifying_band() {
        let tiers = catalog();
        assert_eq!(pick_tier(&tiers, 0).unwrap().name, "bronze");
        assert_eq!(pick_tier(&tiers, 499).unwrap().name, "bronze");
        assert_eq!(pick_tier(&tiers, 500).unwrap().name, "silver");
        assert_eq!(pick_tier(&tiers, 250_000).unwrap().name, "gold");
    }

    #[test]
    fn upgrade_happens_exactly_at_the_boundary() {
        let tiers = catalog();
        // one earned point at 499 lifetime must move the member into the
        // next band
        assert_eq!(pick_tier(&tiers, 499).unwrap().name, "bronze");
        assert_eq!(pick_tier(&tiers, 500).unwrap().name, "silver");
    }

    #[test]
    fn no_qualifying_band_yields_none() {
        let tiers = vec![tier("vip", 1000, None, 2.0)];
        assert!(pick_tier(&tiers, 999).is_none());
    }
}
