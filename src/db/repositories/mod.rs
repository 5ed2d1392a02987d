use sqlx::{Pool, Postgres, Result as SqlxResult, Transaction};
use tracing::instrument;

pub mod campaign;
pub mod ledger;
pub mod member;
pub mod purchase;
pub mod tier;
pub mod token;
pub mod voucher;

/// Thin wrapper around a postgres transaction. Dropping an uncommitted `Tx`
/// rolls it back, which is what makes the posting paths safe to bail out of
/// with `?`.
pub struct Tx<'a> {
    inner: Option<Transaction<'a, Postgres>>,
}

impl<'a> Tx<'a> {
    #[instrument(skip(pool))]
    pub async fn begin(pool: &'static Pool<Postgres>) -> SqlxResult<Self> {
        let inner = pool.begin().await?;
        Ok(Self { inner: Some(inner) })
    }

    #[instrument(skip(self))]
    pub async fn commit(mut self) -> SqlxResult<()> {
        if let Some(tx) = self.inner.take() {
            tx.commit().await
        } else {
            Err(sqlx::Error::Protocol(
                "transaction already completed".into(),
            ))
        }
    }

    #[instrument(skip(self))]
    pub async fn rollback(mut self) -> SqlxResult<()> {
        if let Some(tx) = self.inner.take() {
            tx.rollback().await
        } else {
            Err(sqlx::Error::Protocol(
                "transaction already completed".into(),
            ))
        }
    }

    pub(crate) fn inner_mut(&mut self) -> SqlxResult<&mut Transaction<'a, Postgres>> {
        self.inner
            .as_mut()
            .ok_or_else(|| sqlx::Error::Protocol("transaction already completed".into()))
    }
}
