use std::sync::LazyLock;

use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::OnceCell;

use crate::util::env::{self, Var};
use crate::var;

pub mod models;
pub mod repositories;

pub mod prelude {
    pub use crate::db::PgError;
    pub use crate::db::db_pool;

    pub use crate::db::models::campaign::{
        Campaign, CampaignId, CampaignReward, Criterion, PointsSettings,
    };
    pub use crate::db::models::ledger::{Balance, Counters, LedgerEntry, LedgerKind};
    pub use crate::db::models::member::{BalanceKey, Member, MemberId, TenantId};
    pub use crate::db::models::purchase::{PurchaseEvent, PurchaseRecord, PurchaseStatus};
    pub use crate::db::models::tier::{Tier, TierId};
    pub use crate::db::models::token::{TokenKind, TokenRecord, TokenStatus};
    pub use crate::db::models::voucher::{ClaimId, ClaimStatus, Voucher, VoucherClaim, VoucherId};

    pub use crate::db::repositories::Tx;
    pub use crate::db::repositories::campaign::CampaignRepository;
    pub use crate::db::repositories::ledger::LedgerRepository;
    pub use crate::db::repositories::member::MemberRepository;
    pub use crate::db::repositories::purchase::PurchaseRepository;
    pub use crate::db::repositories::tier::TierRepository;
    pub use crate::db::repositories::token::TokenRepository;
    pub use crate::db::repositories::voucher::VoucherRepository;
}

static DB_POOL: LazyLock<OnceCell<Db>> = LazyLock::new(OnceCell::new);
pub async fn db_pool() -> PgResult<&'static PgPool> {
    Ok(&DB_POOL
        .get_or_try_init(|| async { Db::new_pool().await })
        .await?
        .pool)
}

struct Db {
    pool: PgPool,
}

impl Db {
    pub async fn new_pool() -> PgResult<Self> {
        let db_url = var!(Var::DatabaseUrl).await?;
        let pool = sqlx::PgPool::connect(db_url).await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }
}

pub type PgResult<T> = core::result::Result<T, PgError>;

#[derive(Debug, Error)]
pub enum PgError {
    #[error(transparent)]
    SqlxError(#[from] sqlx::Error),

    #[error(transparent)]
    MigrateError(#[from] sqlx::migrate::MigrateError),

    #[error("{0}")]
    EnvError(#[from] env::EnvErr),
}
