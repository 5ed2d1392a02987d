//! Criteria matching: a campaign's criteria document is a conjunction of
//! optional predicates, and any predicate that is absent or empty is
//! vacuously satisfied.

use chrono::{DateTime, Datelike, NaiveDate, Utc};

use crate::db::models::campaign::Criterion;
use crate::db::models::purchase::PurchaseEvent;
use crate::db::models::tier::TierId;

/// Everything a predicate may look at for one purchase.
#[derive(Debug)]
pub struct MatchContext<'a> {
    pub event: &'a PurchaseEvent,
    pub member_birth_date: Option<NaiveDate>,
    pub member_tier: Option<TierId>,
    pub now: DateTime<Utc>,
}

pub fn matches(criteria: &[Criterion], ctx: &MatchContext<'_>) -> bool {
    criteria.iter().all(|c| criterion_matches(c, ctx))
}

fn criterion_matches(criterion: &Criterion, ctx: &MatchContext<'_>) -> bool {
    match criterion {
        Criterion::DaysOfWeek { days } => {
            days.is_empty()
                || days.contains(&ctx.event.transaction_date.weekday().number_from_monday())
        }

        Criterion::AmountRange { min, max } => {
            min.is_none_or(|m| ctx.event.total >= m) && max.is_none_or(|m| ctx.event.total <= m)
        }

        Criterion::Categories { any_of } => {
            any_of.is_empty()
                || ctx.event.items.iter().any(|item| {
                    item.category
                        .as_ref()
                        .is_some_and(|c| any_of.iter().any(|want| want == c))
                })
        }

        Criterion::Skus { any_of } => {
            any_of.is_empty()
                || ctx
                    .event
                    .items
                    .iter()
                    .any(|item| any_of.iter().any(|want| want == &item.sku))
        }

        Criterion::Locations { any_of } => {
            any_of.is_empty()
                || ctx
                    .event
                    .location_id
                    .as_ref()
                    .is_some_and(|loc| any_of.iter().any(|want| want == loc))
        }

        Criterion::Tiers { any_of } => {
            any_of.is_empty() || ctx.member_tier.is_some_and(|t| any_of.contains(&t))
        }

        Criterion::Birthday => ctx.member_birth_date.is_some_and(|dob| {
            let on = ctx.event.transaction_date.date_naive();
            dob.month() == on.month() && dob.day() == on.day()
        }),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::db::models::purchase::LineItem;
    use uuid::Uuid;

    fn item(sku: &str, category: Option<&str>) -> LineItem {
        LineItem {
            sku: sku.to_string(),
            name: sku.to_string(),
            category: category.map(str::to_string),
            quantity: 1.0,
            unit_price: 25.0,
            total_price: 25.0,
        }
    }

    fn event(total: f64) -> PurchaseEvent {
        PurchaseEvent {
            external_id: "ext-1".to_string(),
            pos_id: "pos-1".to_string(),
            location_id: Some("downtown".to_string()),
            member_id: None,
            member_phone: Some("+15550001111".to_string()),
            tenant_id: None,
            items: vec![item("CF-01", Some("coffee"))],
            subtotal: total,
            tax: None,
            discount: None,
            total,
            payment_method: None,
            // a monday
            transaction_date: "2026-08-24T09:30:00Z".parse().unwrap(),
        }
    }

    fn ctx(event: &PurchaseEvent) -> MatchContext<'_> {
        MatchContext {
            event,
            member_birth_date: NaiveDate::from_ymd_opt(1990, 8, 24),
            member_tier: None,
            now: Utc::now(),
        }
    }

    #[test]
    fn empty_criteria_match_everything() {
        let e = event(25.0);
        assert!(matches(&[], &ctx(&e)));
    }

    #[test]
    fn conjunction_requires_every_predicate() {
        let e = event(25.0);
        let both = [
            Criterion::AmountRange {
                min: Some(20.0),
                max: None,
            },
            Criterion::Categories {
                any_of: vec!["coffee".to_string()],
            },
        ];
        assert!(matches(&both, &ctx(&e)));

        let with_miss = [
            Criterion::AmountRange {
                min: Some(20.0),
                max: None,
            },
            Criterion::Categories {
                any_of: vec!["bakery".to_string()],
            },
        ];
        assert!(!matches(&with_miss, &ctx(&e)));
    }

    #[test]
    fn amount_bounds_are_inclusive() {
        let e = event(20.0);
        let c = [Criterion::AmountRange {
            min: Some(20.0),
            max: Some(20.0),
        }];
        assert!(matches(&c, &ctx(&e)));

        let low = event(19.99);
        assert!(!matches(&c, &ctx(&low)));
    }

    #[test]
    fn weekday_uses_transaction_date_not_wall_clock() {
        let e = event(25.0);
        let monday = [Criterion::DaysOfWeek { days: vec![1] }];
        let weekend = [Criterion::DaysOfWeek { days: vec![6, 7] }];

        assert!(matches(&monday, &ctx(&e)));
        assert!(!matches(&weekend, &ctx(&e)));
    }

    #[test]
    fn sku_intersection() {
        let e = event(25.0);
        let hit = [Criterion::Skus {
            any_of: vec!["CF-01".to_string(), "CF-99".to_string()],
        }];
        let miss = [Criterion::Skus {
            any_of: vec!["TEA-01".to_string()],
        }];

        assert!(matches(&hit, &ctx(&e)));
        assert!(!matches(&miss, &ctx(&e)));
    }

    #[test]
    fn location_requires_event_location() {
        let mut e = event(25.0);
        let c = [Criterion::Locations {
            any_of: vec!["downtown".to_string()],
        }];
        assert!(matches(&c, &ctx(&e)));

        e.location_id = None;
        assert!(!matches(&c, &ctx(&e)));
    }

    #[test]
    fn tier_allow_list() {
        let e = event(25.0);
        let gold = TierId(Uuid::new_v4());

        let mut context = ctx(&e);
        let c = [Criterion::Tiers { any_of: vec![gold] }];
        assert!(!matches(&c, &context));

        context.member_tier = Some(gold);
        assert!(matches(&c, &context));
    }

    #[test]
    fn birthday_matches_month_and_day_only() {
        let e = event(25.0);
        let c = [Criterion::Birthday];

        // dob 1990-08-24, transaction on 08-24
        assert!(matches(&c, &ctx(&e)));

        let mut context = ctx(&e);
        context.member_birth_date = NaiveDate::from_ymd_opt(1990, 8, 25);
        assert!(!matches(&c, &context));

        context.member_birth_date = None;
        assert!(!matches(&c, &context));
    }
}
