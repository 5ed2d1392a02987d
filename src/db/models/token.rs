use core::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::member::{MemberId, TenantId};
use super::voucher::ClaimId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Points,
    Voucher,
    Membership,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Points => "points",
            TokenKind::Voucher => "voucher",
            TokenKind::Membership => "membership",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "points" => Some(TokenKind::Points),
            "voucher" => Some(TokenKind::Voucher),
            "membership" => Some(TokenKind::Membership),
            _ => None,
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStatus {
    Active,
    Used,
    Expired,
}

impl TokenStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenStatus::Active => "active",
            TokenStatus::Used => "used",
            TokenStatus::Expired => "expired",
        }
    }
}

/// Server-side record backing an issued redemption token. The signature on
/// the wire proves authenticity; this row enforces at-most-once consumption
/// so a valid-but-stolen token cannot be replayed after use.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TokenRecord {
    pub id: Uuid,
    pub member_id: MemberId,
    pub tenant_id: Option<TenantId>,
    pub kind: String,
    pub points: Option<i64>,
    pub claim_id: Option<ClaimId>,
    pub status: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub used_by_pos: Option<String>,
}

impl TokenRecord {
    pub fn is_active(&self) -> bool {
        self.status == TokenStatus::Active.as_str()
    }
}
