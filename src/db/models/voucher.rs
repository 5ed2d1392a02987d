use core::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::member::{MemberId, TenantId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct VoucherId(pub Uuid);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct ClaimId(pub Uuid);

/// Catalog item exchangeable for points. `quantity = NULL` means uncapped;
/// otherwise `used_count` may never exceed it.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Voucher {
    pub id: VoucherId,
    pub tenant_id: Option<TenantId>,
    pub name: String,
    pub kind: String,
    pub points_cost: i64,
    pub quantity: Option<i32>,
    pub used_count: i32,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub is_active: bool,
}

impl Voucher {
    pub fn in_window(&self, now: DateTime<Utc>) -> bool {
        self.valid_from <= now && now <= self.valid_until
    }

    pub fn sold_out(&self) -> bool {
        self.quantity
            .is_some_and(|cap| self.used_count >= cap)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimStatus {
    Active,
    Used,
    Expired,
}

impl ClaimStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimStatus::Active => "active",
            ClaimStatus::Used => "used",
            ClaimStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Member-owned instance of a claimed voucher; lifecycle
/// `active -> used | expired`.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct VoucherClaim {
    pub id: ClaimId,
    pub voucher_id: VoucherId,
    pub member_id: MemberId,
    pub tenant_id: Option<TenantId>,
    pub status: String,
    pub claimed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub used_at_location: Option<String>,
}

impl VoucherClaim {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status == ClaimStatus::Active.as_str() && self.expires_at > now
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeDelta;

    fn voucher(quantity: Option<i32>, used_count: i32) -> Voucher {
        let now = Utc::now();
        Voucher {
            id: VoucherId(Uuid::new_v4()),
            tenant_id: None,
            name: "free pastry".to_string(),
            kind: "freebie".to_string(),
            points_cost: 100,
            quantity,
            used_count,
            valid_from: now - TimeDelta::days(1),
            valid_until: now + TimeDelta::days(30),
            is_active: true,
        }
    }

    #[test]
    fn stock_cap_is_respected() {
        assert!(!voucher(None, 10_000).sold_out());
        assert!(!voucher(Some(5), 4).sold_out());
        assert!(voucher(Some(5), 5).sold_out());
    }

    #[test]
    fn validity_window_is_inclusive() {
        let v = voucher(None, 0);
        assert!(v.in_window(v.valid_from));
        assert!(v.in_window(v.valid_until));
        assert!(!v.in_window(v.valid_until + TimeDelta::seconds(1)));
    }
}
