use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::{Json, debug_handler};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use crate::api::middleware::verify_pos::VerifiedBody;
use crate::api::server::{AppState, JsonResult, RouteError};
use crate::db::prelude::*;
use crate::error::EngineError;
use crate::ingest::{self, SubmitOutcome};
use crate::token::{self, ConsumeOutcome, IssueRequest, IssuedToken, TokenPreview};

/// Purchase submission from a POS terminal. The body arrives through the
/// signature-verifying middleware, not the plain JSON extractor.
#[instrument(skip(state, body))]
#[debug_handler]
pub async fn submit_transaction(
    State(state): State<Arc<AppState>>,
    body: VerifiedBody,
) -> JsonResult<SubmitOutcome> {
    let event: PurchaseEvent = body
        .as_json()
        .map_err(|e| RouteError::BadRequest(format!("malformed purchase event: {e}")))?;

    Ok(Json(ingest::submit(state.db_pool, &event).await?))
}

#[derive(Debug, Deserialize)]
pub struct BalanceQuery {
    pub tenant: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub member_id: MemberId,
    pub tenant_id: Option<TenantId>,
    pub available: i64,
    pub total: i64,
    pub lifetime: i64,
    pub tier_id: Option<TierId>,
    /// Spendable points summed across every scope the member holds.
    pub aggregate_available: i64,
}

#[instrument(skip(state))]
pub async fn member_balance(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<BalanceQuery>,
) -> JsonResult<BalanceResponse> {
    let member = MemberRepository::new(state.db_pool)
        .by_id(MemberId(id))
        .await?
        .ok_or(EngineError::NotFound("member"))?;

    let key = BalanceKey::scoped(member.id, query.tenant.map(TenantId));
    let ledger = LedgerRepository::new(state.db_pool);

    let balance = ledger.balance(key).await?;
    let aggregate_available = ledger.aggregate_available(member.id).await?;

    let response = match balance {
        Some(b) => BalanceResponse {
            member_id: b.member_id,
            tenant_id: b.tenant_id,
            available: b.available,
            total: b.total,
            lifetime: b.lifetime,
            tier_id: b.tier_id,
            aggregate_available,
        },
        // no posting yet for this scope; every counter reads zero
        None => BalanceResponse {
            member_id: member.id,
            tenant_id: key.tenant_id,
            available: 0,
            total: 0,
            lifetime: 0,
            tier_id: None,
            aggregate_available,
        },
    };

    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    pub member_id: Uuid,
    pub voucher_id: Uuid,
    #[serde(default)]
    pub tenant_id: Option<Uuid>,
}

#[instrument(skip(state))]
pub async fn claim_voucher(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ClaimRequest>,
) -> JsonResult<VoucherClaim> {
    let member = MemberRepository::new(state.db_pool)
        .by_id(MemberId(req.member_id))
        .await?
        .ok_or(EngineError::NotFound("member"))?;

    let key = BalanceKey::scoped(member.id, req.tenant_id.map(TenantId));
    let claim = VoucherRepository::new(state.db_pool)
        .claim(key, VoucherId(req.voucher_id))
        .await?;

    Ok(Json(claim))
}

#[derive(Debug, Deserialize)]
pub struct RedeemRequest {
    pub claim_id: Uuid,
    #[serde(default)]
    pub location_name: Option<String>,
}

#[instrument(skip(state))]
pub async fn redeem_voucher(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RedeemRequest>,
) -> JsonResult<VoucherClaim> {
    let claim = VoucherRepository::new(state.db_pool)
        .redeem_claim(ClaimId(req.claim_id), req.location_name.as_deref())
        .await?;

    Ok(Json(claim))
}

#[instrument(skip(state, req))]
pub async fn issue_token(
    State(state): State<Arc<AppState>>,
    Json(req): Json<IssueRequest>,
) -> JsonResult<IssuedToken> {
    Ok(Json(token::issue(state.db_pool, &req).await?))
}

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub token: String,
}

#[instrument(skip(state, req))]
pub async fn validate_token(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ValidateRequest>,
) -> JsonResult<TokenPreview> {
    Ok(Json(token::validate(state.db_pool, &req.token).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeRequest {
    pub token: String,
    pub pos_id: String,
    #[serde(default)]
    pub location_name: Option<String>,
}

/// Token consumption from a POS terminal; signature-verified like
/// transaction submission.
#[instrument(skip(state, body))]
#[debug_handler]
pub async fn consume_token(
    State(state): State<Arc<AppState>>,
    body: VerifiedBody,
) -> JsonResult<ConsumeOutcome> {
    let req: ConsumeRequest = body
        .as_json()
        .map_err(|e| RouteError::BadRequest(format!("malformed consume request: {e}")))?;

    let outcome = token::consume(
        state.db_pool,
        &req.token,
        &req.pos_id,
        req.location_name.as_deref(),
    )
    .await?;

    Ok(Json(outcome))
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdjustKind {
    #[default]
    Adjust,
    Expire,
}

#[derive(Debug, Deserialize)]
pub struct AdjustRequest {
    /// Signed amount; a negative adjustment can at most zero the balance.
    pub points: i64,
    pub reason: String,
    #[serde(default)]
    pub kind: AdjustKind,
    #[serde(default)]
    pub tenant_id: Option<Uuid>,
}

/// Operator-only manual correction, behind the internal-token gate.
#[instrument(skip(state, req))]
pub async fn adjust_member_points(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<AdjustRequest>,
) -> JsonResult<LedgerEntry> {
    if req.reason.trim().is_empty() {
        return Err(RouteError::BadRequest(
            "adjustment requires a reason".to_string(),
        ));
    }

    let member = MemberRepository::new(state.db_pool)
        .by_id(MemberId(id))
        .await?
        .ok_or(EngineError::NotFound("member"))?;

    let key = BalanceKey::scoped(member.id, req.tenant_id.map(TenantId));
    let ledger = LedgerRepository::new(state.db_pool);

    let entry = match req.kind {
        AdjustKind::Adjust => ledger.adjust(key, req.points, &req.reason, None).await?,
        AdjustKind::Expire => ledger.expire(key, req.points, &req.reason, None).await?,
    };

    Ok(Json(entry))
}
