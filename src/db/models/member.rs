use core::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct MemberId(pub Uuid);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct TenantId(pub Uuid);

/// Scope key for every balance, tier, and voucher operation: a member's
/// tenant-scoped balance when a tenant is present, the global balance
/// otherwise. Both modes route through the same queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BalanceKey {
    pub member_id: MemberId,
    pub tenant_id: Option<TenantId>,
}

impl BalanceKey {
    pub fn global(member_id: MemberId) -> Self {
        Self {
            member_id,
            tenant_id: None,
        }
    }

    pub fn scoped(member_id: MemberId, tenant_id: Option<TenantId>) -> Self {
        Self {
            member_id,
            tenant_id,
        }
    }

    pub fn tenant_uuid(&self) -> Option<Uuid> {
        self.tenant_id.map(|t| t.0)
    }
}

/// Base member table model
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Member {
    pub id: MemberId,
    pub phone: String,
    pub name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for MemberId {
    fn from(value: Uuid) -> Self {
        MemberId(value)
    }
}

impl From<Uuid> for TenantId {
    fn from(value: Uuid) -> Self {
        TenantId(value)
    }
}
