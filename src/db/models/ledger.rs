use core::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::member::{MemberId, TenantId};
use super::tier::TierId;
use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerKind {
    Earn,
    Redeem,
    Expire,
    Adjust,
}

impl LedgerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerKind::Earn => "earn",
            LedgerKind::Redeem => "redeem",
            LedgerKind::Expire => "expire",
            LedgerKind::Adjust => "adjust",
        }
    }
}

impl fmt::Display for LedgerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable point-movement record. Written once inside the posting
/// transaction, never updated.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub member_id: MemberId,
    pub tenant_id: Option<TenantId>,
    pub kind: String,
    pub points: i64,
    pub balance_before: i64,
    pub balance_after: i64,
    pub reason: String,
    pub reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Current snapshot for one balance key. `available` is spendable now,
/// `total` is cumulative minus redemptions, `lifetime` only ever grows and
/// drives tier thresholds.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Balance {
    pub member_id: MemberId,
    pub tenant_id: Option<TenantId>,
    pub available: i64,
    pub total: i64,
    pub lifetime: i64,
    pub tier_id: Option<TierId>,
    pub joined_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Counters {
    pub available: i64,
    pub total: i64,
    pub lifetime: i64,
}

impl From<&Balance> for Counters {
    fn from(b: &Balance) -> Self {
        Counters {
            available: b.available,
            total: b.total,
            lifetime: b.lifetime,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Posting {
    /// Signed delta actually applied to `available`; this is the value the
    /// ledger entry records, so `after = before + delta` always holds.
    pub delta: i64,
    pub after: Counters,
}

/// Computes the new counters for one posting without touching storage.
///
/// - `Earn` requires a non-negative amount and raises all three counters.
/// - `Redeem` fails when `available` cannot cover the amount.
/// - `Expire` removes at most what is available.
/// - `Adjust` accepts a signed amount; the negative branch clamps
///   `available` at zero and the recorded delta reflects the clamp.
pub fn apply(kind: LedgerKind, before: Counters, points: i64) -> EngineResult<Posting> {
    let posting = match kind {
        LedgerKind::Earn => {
            if points < 0 {
                return Err(EngineError::Validation(format!(
                    "earn amount must be non-negative, got {points}"
                )));
            }
            Posting {
                delta: points,
                after: Counters {
                    available: before.available + points,
                    total: before.total + points,
                    lifetime: before.lifetime + points,
                },
            }
        }
        LedgerKind::Redeem => {
            if points <= 0 {
                return Err(EngineError::Validation(format!(
                    "redeem amount must be positive, got {points}"
                )));
            }
            if before.available < points {
                return Err(EngineError::InsufficientPoints {
                    available: before.available,
                    requested: points,
                });
            }
            Posting {
                delta: -points,
                after: Counters {
                    available: before.available - points,
                    total: before.total - points,
                    lifetime: before.lifetime,
                },
            }
        }
        LedgerKind::Expire => {
            if points < 0 {
                return Err(EngineError::Validation(format!(
                    "expire amount must be non-negative, got {points}"
                )));
            }
            let removed = points.min(before.available);
            Posting {
                delta: -removed,
                after: Counters {
                    available: before.available - removed,
                    total: before.total - removed,
                    lifetime: before.lifetime,
                },
            }
        }
        LedgerKind::Adjust => {
            if points >= 0 {
                Posting {
                    delta: points,
                    after: Counters {
                        available: before.available + points,
                        total: before.total + points,
                        lifetime: before.lifetime + points,
                    },
                }
            } else {
                let removed = (-points).min(before.available);
                Posting {
                    delta: -removed,
                    after: Counters {
                        available: before.available - removed,
                        total: before.total - removed,
                        lifetime: before.lifetime,
                    },
                }
            }
        }
    };

    Ok(posting)
}

#[cfg(test)]
mod test {
    use super::*;

    fn counters(available: i64, total: i64, lifetime: i64) -> Counters {
        Counters {
            available,
            total,
            lifetime,
        }
    }

    #[test]
    fn earn_raises_all_counters() {
        let p = apply(LedgerKind::Earn, counters(10, 10, 100), 25).unwrap();
        assert_eq!(p.delta, 25);
        assert_eq!(p.after, counters(35, 35, 125));
    }

    #[test]
    fn redeem_never_goes_negative() {
        let err = apply(LedgerKind::Redeem, counters(10, 10, 100), 11).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InsufficientPoints {
                available: 10,
                requested: 11
            }
        ));
    }

    #[test]
    fn redeem_leaves_lifetime_untouched() {
        let p = apply(LedgerKind::Redeem, counters(10, 10, 100), 10).unwrap();
        assert_eq!(p.after, counters(0, 0, 100));
    }

    #[test]
    fn negative_adjust_clamps_at_zero() {
        let p = apply(LedgerKind::Adjust, counters(5, 5, 100), -20).unwrap();
        assert_eq!(p.delta, -5);
        assert_eq!(p.after.available, 0);
        assert_eq!(p.after.lifetime, 100);
    }

    #[test]
    fn expire_removes_at_most_available() {
        let p = apply(LedgerKind::Expire, counters(3, 7, 100), 10).unwrap();
        assert_eq!(p.delta, -3);
        assert_eq!(p.after.available, 0);
        assert_eq!(p.after.total, 4);
    }

    #[test]
    fn delta_always_reconciles_before_and_after() {
        let before = counters(40, 60, 200);
        for (kind, points) in [
            (LedgerKind::Earn, 13),
            (LedgerKind::Redeem, 40),
            (LedgerKind::Expire, 55),
            (LedgerKind::Adjust, -100),
            (LedgerKind::Adjust, 7),
        ] {
            let p = apply(kind, before, points).unwrap();
            assert_eq!(before.available + p.delta, p.after.available);
        }
    }

    #[test]
    fn zero_amount_redeem_is_rejected() {
        assert!(apply(LedgerKind::Redeem, counters(10, 10, 10), 0).is_err());
    }
}
