//! Redemption token protocol: issue, validate, consume. A token is a
//! signed, time-boxed credential proving redemption intent at a terminal;
//! the server-side record is what makes consumption at-most-once.

pub mod envelope;

use std::sync::LazyLock;

use chrono::{DateTime, TimeDelta, Utc};
use ring::hmac;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio::sync::OnceCell;
use tracing::{error, instrument};
use uuid::Uuid;

use crate::db::prelude::*;
use crate::error::{EngineError, EngineResult};
use crate::token::envelope::TokenClaims;
use crate::util::env::Var;
use crate::var;

static SIGNING_KEY: LazyLock<OnceCell<hmac::Key>> = LazyLock::new(OnceCell::new);

async fn signing_key() -> EngineResult<&'static hmac::Key> {
    SIGNING_KEY
        .get_or_try_init(|| async {
            let secret = var!(Var::TokenSecret)
                .await
                .map_err(|e| EngineError::Config(e.to_string()))?;
            Ok(hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes()))
        })
        .await
}

async fn expiry_window() -> EngineResult<TimeDelta> {
    let raw = var!(Var::TokenExpiryMinutes)
        .await
        .map_err(|e| EngineError::Config(e.to_string()))?;

    parse_expiry_minutes(raw)
}

/// A misconfigured expiry must refuse to issue tokens rather than issue
/// ones that are expired at birth.
fn parse_expiry_minutes(raw: &str) -> EngineResult<TimeDelta> {
    let minutes = raw
        .parse::<i64>()
        .map_err(|_| EngineError::Config(format!("invalid TOKEN_EXPIRY_MINUTES '{raw}'")))?;

    if minutes <= 0 {
        return Err(EngineError::Config(format!(
            "TOKEN_EXPIRY_MINUTES must be positive, got {minutes}"
        )));
    }

    Ok(TimeDelta::minutes(minutes))
}

#[derive(Debug, Deserialize)]
pub struct IssueRequest {
    pub kind: TokenKind,
    pub member_id: Uuid,
    #[serde(default)]
    pub tenant_id: Option<Uuid>,
    #[serde(default)]
    pub points: Option<i64>,
    #[serde(default)]
    pub claim_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct IssuedToken {
    /// Opaque encoded token for the terminal / QR rendering.
    pub token: String,
    pub token_id: Uuid,
    pub kind: TokenKind,
    pub member_name: String,
    pub expires_at: DateTime<Utc>,
}

/// Decoded intent returned by the read-only validation call.
#[derive(Debug, Serialize)]
pub struct TokenPreview {
    pub token_id: Uuid,
    pub kind: TokenKind,
    pub member_id: MemberId,
    pub member_name: String,
    pub points: Option<i64>,
    pub claim_id: Option<ClaimId>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ConsumeOutcome {
    pub token_id: Uuid,
    pub kind: TokenKind,
    pub member_id: MemberId,
    pub points_redeemed: Option<i64>,
    pub claim_redeemed: Option<ClaimId>,
}

/// Issues a token after checking the kind's precondition. Nothing is
/// deducted here; points leave the balance only at consumption.
#[instrument(skip(pool, req), fields(kind = %req.kind, member = %req.member_id))]
pub async fn issue(pool: &'static PgPool, req: &IssueRequest) -> EngineResult<IssuedToken> {
    let member = MemberRepository::new(pool)
        .by_id(MemberId(req.member_id))
        .await?
        .ok_or(EngineError::NotFound("member"))?;

    let key = BalanceKey::scoped(member.id, req.tenant_id.map(TenantId));
    let now = Utc::now();

    let (points, claim_id) = match req.kind {
        TokenKind::Points => {
            let requested = req
                .points
                .filter(|p| *p > 0)
                .ok_or_else(|| EngineError::Validation("points token needs a positive amount".to_string()))?;

            let available = LedgerRepository::new(pool)
                .balance(key)
                .await?
                .map(|b| b.available)
                .unwrap_or_default();

            if available < requested {
                return Err(EngineError::InsufficientPoints {
                    available,
                    requested,
                });
            }

            (Some(requested), None)
        }

        TokenKind::Voucher => {
            let claim_id = ClaimId(req.claim_id.ok_or_else(|| {
                EngineError::Validation("voucher token needs a claim id".to_string())
            })?);

            let claim = VoucherRepository::new(pool)
                .get_claim(claim_id)
                .await?
                .ok_or(EngineError::NotFound("voucher claim"))?;

            if claim.member_id != member.id {
                return Err(EngineError::Validation(
                    "voucher claim does not belong to this member".to_string(),
                ));
            }
            if claim.status == ClaimStatus::Used.as_str() {
                return Err(EngineError::Conflict(
                    "voucher claim has already been redeemed".to_string(),
                ));
            }
            if !claim.is_active(now) {
                return Err(EngineError::Expired("voucher claim"));
            }

            (None, Some(claim_id))
        }

        TokenKind::Membership => (None, None),
    };

    let expires_at = now + expiry_window().await?;
    let record = TokenRepository::new(pool)
        .insert(Uuid::new_v4(), key, req.kind, points, claim_id, expires_at)
        .await?;

    let claims = TokenClaims {
        kind: req.kind,
        member_id: member.id,
        token_id: record.id,
        points,
        member_voucher_id: claim_id,
        exp: expires_at.timestamp_millis(),
    };
    let token = envelope::encode(&claims, signing_key().await?)?;

    Ok(IssuedToken {
        token,
        token_id: record.id,
        kind: req.kind,
        member_name: member.name,
        expires_at,
    })
}

/// Read-only preview for the terminal: signature, expiry, and server-side
/// status checks, no state change.
#[instrument(skip(pool, token))]
pub async fn validate(pool: &'static PgPool, token: &str) -> EngineResult<TokenPreview> {
    let (record, member) = checked_record(pool, token).await?;

    Ok(TokenPreview {
        token_id: record.id,
        kind: TokenKind::parse(&record.kind)
            .ok_or_else(|| EngineError::Config(format!("unknown token kind '{}'", record.kind)))?,
        member_id: record.member_id,
        member_name: member.name,
        points: record.points,
        claim_id: record.claim_id,
        expires_at: record.expires_at,
    })
}

/// Consumes a token: re-validates, flips the record to `used` (first writer
/// wins), then applies the effect. The flip strictly precedes the effect so
/// a crash mid-effect can never be retried into a double-spend; the
/// converse gap is surfaced loudly for reconciliation.
#[instrument(skip(pool, token))]
pub async fn consume(
    pool: &'static PgPool,
    token: &str,
    pos_id: &str,
    location_name: Option<&str>,
) -> EngineResult<ConsumeOutcome> {
    let (record, _member) = checked_record(pool, token).await?;

    let kind = TokenKind::parse(&record.kind)
        .ok_or_else(|| EngineError::Config(format!("unknown token kind '{}'", record.kind)))?;

    if !TokenRepository::new(pool).mark_used(record.id, pos_id).await? {
        return Err(EngineError::Conflict(
            "token has already been consumed".to_string(),
        ));
    }

    let key = BalanceKey::scoped(record.member_id, record.tenant_id);
    let mut outcome = ConsumeOutcome {
        token_id: record.id,
        kind,
        member_id: record.member_id,
        points_redeemed: None,
        claim_redeemed: None,
    };

    match kind {
        TokenKind::Points => {
            let points = record.points.ok_or_else(|| {
                EngineError::Config("points token record has no amount".to_string())
            })?;

            let reason = format!("points redemption at {pos_id}");
            if let Err(e) = LedgerRepository::new(pool)
                .redeem(key, points, &reason, Some(&record.id.to_string()))
                .await
            {
                error!(token = %record.id, error = %e,
                       "token marked used but ledger redeem failed; reconciliation required");
                return Err(e);
            }
            outcome.points_redeemed = Some(points);
        }

        TokenKind::Voucher => {
            let claim_id = record.claim_id.ok_or_else(|| {
                EngineError::Config("voucher token record has no claim".to_string())
            })?;

            if let Err(e) = VoucherRepository::new(pool)
                .redeem_claim(claim_id, location_name)
                .await
            {
                error!(token = %record.id, claim = %claim_id.0, error = %e,
                       "token marked used but voucher redemption failed; reconciliation required");
                return Err(e);
            }
            outcome.claim_redeemed = Some(claim_id);
        }

        // proof of membership carries no effect
        TokenKind::Membership => {}
    }

    Ok(outcome)
}

/// Shared validation path: decode + signature + expiry + server-side record
/// checks. Returns the authoritative record, not the wire claims.
async fn checked_record(
    pool: &'static PgPool,
    token: &str,
) -> EngineResult<(TokenRecord, Member)> {
    let now = Utc::now();

    let (claims, sig) = envelope::decode(token)?;
    envelope::verify(&claims, &sig, signing_key().await?, now)?;

    let record = TokenRepository::new(pool)
        .get(claims.token_id)
        .await?
        .ok_or(EngineError::NotFound("token"))?;

    match record.status.as_str() {
        "used" => {
            return Err(EngineError::Conflict(
                "token has already been consumed".to_string(),
            ));
        }
        "expired" => return Err(EngineError::Expired("token")),
        _ => {}
    }

    if record.expires_at <= now {
        return Err(EngineError::Expired("token"));
    }

    let member = MemberRepository::new(pool)
        .by_id(record.member_id)
        .await?
        .ok_or(EngineError::NotFound("member"))?;

    Ok((record, member))
}
