//! Wire format for redemption tokens: a base64url JSON envelope whose `sig`
//! field is an HMAC-SHA256 over the canonical serialization of the other
//! fields. Terminals treat the string as opaque.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use ring::hmac;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::models::member::MemberId;
use crate::db::models::token::TokenKind;
use crate::db::models::voucher::ClaimId;
use crate::error::{EngineError, EngineResult};
use crate::util::constant_time_cmp;

/// Signed portion of the envelope. Canonical bytes are the serde_json
/// serialization in declaration order, so the signature is reproducible
/// from a decoded token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenClaims {
    #[serde(rename = "type")]
    pub kind: TokenKind,
    pub member_id: MemberId,
    pub token_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_voucher_id: Option<ClaimId>,
    /// Expiry as epoch milliseconds.
    pub exp: i64,
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    #[serde(flatten)]
    claims: TokenClaims,
    sig: String,
}

pub fn encode(claims: &TokenClaims, key: &hmac::Key) -> EngineResult<String> {
    let envelope = Envelope {
        sig: sign(claims, key)?,
        claims: claims.clone(),
    };

    let json = serde_json::to_vec(&envelope)
        .map_err(|e| EngineError::Config(format!("token serialization failed: {e}")))?;

    Ok(URL_SAFE_NO_PAD.encode(json))
}

pub fn decode(token: &str) -> EngineResult<(TokenClaims, String)> {
    let json = URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|_| EngineError::Validation("malformed token encoding".to_string()))?;

    let envelope: Envelope = serde_json::from_slice(&json)
        .map_err(|_| EngineError::Validation("malformed token payload".to_string()))?;

    Ok((envelope.claims, envelope.sig))
}

/// Signature and expiry check. The comparison is constant-time; a decoded
/// token whose recomputed signature differs in any byte is a forgery.
pub fn verify(
    claims: &TokenClaims,
    sig: &str,
    key: &hmac::Key,
    now: DateTime<Utc>,
) -> EngineResult<()> {
    let expected = sign(claims, key)?;
    if !constant_time_cmp(sig, &expected) {
        return Err(EngineError::InvalidSignature);
    }

    if claims.exp <= now.timestamp_millis() {
        return Err(EngineError::Expired("token"));
    }

    Ok(())
}

fn sign(claims: &TokenClaims, key: &hmac::Key) -> EngineResult<String> {
    let canonical = serde_json::to_vec(claims)
        .map_err(|e| EngineError::Config(format!("token serialization failed: {e}")))?;

    Ok(hex::encode(hmac::sign(key, &canonical)))
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeDelta;

    fn key() -> hmac::Key {
        hmac::Key::new(hmac::HMAC_SHA256, b"test-secret")
    }

    fn claims(exp: DateTime<Utc>) -> TokenClaims {
        TokenClaims {
            kind: TokenKind::Points,
            member_id: MemberId(Uuid::new_v4()),
            token_id: Uuid::new_v4(),
            points: Some(150),
            member_voucher_id: None,
            exp: exp.timestamp_millis(),
        }
    }

    #[test]
    fn encode_decode_verify_round_trip() {
        let now = Utc::now();
        let original = claims(now + TimeDelta::minutes(15));

        let token = encode(&original, &key()).unwrap();
        let (decoded, sig) = decode(&token).unwrap();

        assert_eq!(decoded, original);
        verify(&decoded, &sig, &key(), now).unwrap();
    }

    #[test]
    fn tampered_claims_fail_verification() {
        let now = Utc::now();
        let original = claims(now + TimeDelta::minutes(15));
        let token = encode(&original, &key()).unwrap();

        let (mut decoded, sig) = decode(&token).unwrap();
        decoded.points = Some(15_000);

        assert!(matches!(
            verify(&decoded, &sig, &key(), now),
            Err(EngineError::InvalidSignature)
        ));
    }

    #[test]
    fn wrong_secret_fails_verification() {
        let now = Utc::now();
        let original = claims(now + TimeDelta::minutes(15));
        let token = encode(&original, &key()).unwrap();

        let (decoded, sig) = decode(&token).unwrap();
        let other = hmac::Key::new(hmac::HMAC_SHA256, b"another-secret");

        assert!(matches!(
            verify(&decoded, &sig, &other, now),
            Err(EngineError::InvalidSignature)
        ));
    }

    #[test]
    fn expired_token_is_rejected_after_signature_passes() {
        let now = Utc::now();
        let original = claims(now - TimeDelta::seconds(1));
        let token = encode(&original, &key()).unwrap();

        let (decoded, sig) = decode(&token).unwrap();
        assert!(matches!(
            verify(&decoded, &sig, &key(), now),
            Err(EngineError::Expired("token"))
        ));
    }

    #[test]
    fn garbage_tokens_are_validation_failures() {
        assert!(matches!(
            decode("not!base64!"),
            Err(EngineError::Validation(_))
        ));

        let not_json = URL_SAFE_NO_PAD.encode(b"plain text");
        assert!(matches!(
            decode(&not_json),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn voucher_claims_serialize_their_claim_reference() {
        let now = Utc::now();
        let mut c = claims(now + TimeDelta::minutes(5));
        c.kind = TokenKind::Voucher;
        c.points = None;
        c.member_voucher_id = Some(ClaimId(Uuid::new_v4()));

        let token = encode(&c, &key()).unwrap();
        let (decoded, _) = decode(&token).unwrap();
        assert_eq!(decoded.member_voucher_id, c.member_voucher_id);
        assert!(decoded.points.is_none());
    }
}
