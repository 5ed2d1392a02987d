use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use crate::db::models::member::{Member, MemberId};
use crate::error::{EngineError, EngineResult};

const MEMBER_FIELDS: &str = r#"
    id,
    phone,
    name,
    date_of_birth,
    created_at,
    updated_at
"#;

#[derive(Debug, Clone, Copy)]
pub struct MemberRepository {
    pool: &'static PgPool,
}

impl MemberRepository {
    pub fn new(pool: &'static PgPool) -> Self {
        Self { pool }
    }

    #[instrument(skip(self))]
    pub async fn by_id(&self, id: MemberId) -> EngineResult<Option<Member>> {
        Ok(sqlx::query_as::<_, Member>(&format!(
            "SELECT {MEMBER_FIELDS} FROM member WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?)
    }

    #[instrument(skip(self))]
    pub async fn by_phone(&self, phone: &str) -> EngineResult<Option<Member>> {
        Ok(sqlx::query_as::<_, Member>(&format!(
            "SELECT {MEMBER_FIELDS} FROM member WHERE phone = $1"
        ))
        .bind(phone)
        .fetch_optional(self.pool)
        .await?)
    }

    /// POS events may carry either an id or a phone number; id wins when
    /// both are present.
    #[instrument(skip(self))]
    pub async fn resolve(
        &self,
        id: Option<Uuid>,
        phone: Option<&str>,
    ) -> EngineResult<Member> {
        if let Some(id) = id
            && let Some(member) = self.by_id(MemberId(id)).await?
        {
            return Ok(member);
        }

        if let Some(phone) = phone
            && let Some(member) = self.by_phone(phone).await?
        {
            return Ok(member);
        }

        Err(EngineError::NotFound("member"))
    }
}
