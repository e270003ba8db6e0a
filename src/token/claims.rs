//! Expiry inspection of bearer tokens.
//!
//! Only the `exp` claim of the payload segment is read; the signature is
//! not verified here (the identity provider issued the token and the backend
//! verifies it). A token whose expiry cannot be established is treated as
//! expiring so the caller refreshes instead of sending it.

use base64::Engine;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use tracing::warn;

/// Tokens expiring within this many seconds are refreshed ahead of time.
pub const REFRESH_WINDOW_SECONDS: i64 = 5 * 60;

/// Result of inspecting a bearer token against the current instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenStatus {
    /// Expires later than the refresh window.
    Fresh { expires_at: DateTime<Utc> },
    /// Expires within the refresh window, or already expired.
    Expiring { expires_at: DateTime<Utc> },
    /// Not a three-segment token with a readable `exp` claim.
    Malformed(String),
}

impl TokenStatus {
    /// Whether the token must be refreshed before use.
    pub fn needs_refresh(&self) -> bool {
        !matches!(self, Self::Fresh { .. })
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Fresh { expires_at } | Self::Expiring { expires_at } => Some(*expires_at),
            Self::Malformed(_) => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ExpiryClaims {
    /// NumericDate; may carry a fractional part.
    exp: f64,
}

/// Decodes a payload segment written in base64url or standard base64,
/// with or without padding.
fn decode_segment(segment: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let normalized: String = segment
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();
    STANDARD_NO_PAD.decode(normalized)
}

/// Reads the `exp` claim of a three-segment token.
pub fn token_expiry(token: &str) -> Result<DateTime<Utc>, String> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(format!(
            "expected 3 dot-separated segments, found {}",
            segments.len()
        ));
    }

    let payload =
        decode_segment(segments[1]).map_err(|e| format!("payload is not base64: {}", e))?;
    let claims: ExpiryClaims =
        serde_json::from_slice(&payload).map_err(|e| format!("unreadable claim set: {}", e))?;

    if !claims.exp.is_finite() {
        return Err(format!("exp claim {} is not a finite number", claims.exp));
    }

    // Saturates on overflow, which timestamp_opt then rejects.
    Utc.timestamp_opt(claims.exp.floor() as i64, 0)
        .single()
        .ok_or_else(|| format!("exp claim {} is out of range", claims.exp))
}

/// Classifies `token` relative to `now`.
pub fn inspect_token(token: &str, now: DateTime<Utc>) -> TokenStatus {
    match token_expiry(token) {
        Ok(expires_at) => {
            let remaining = expires_at.timestamp() - now.timestamp();
            if remaining <= REFRESH_WINDOW_SECONDS {
                TokenStatus::Expiring { expires_at }
            } else {
                TokenStatus::Fresh { expires_at }
            }
        }
        Err(reason) => {
            warn!("Could not parse token, assuming expired: {}", reason);
            TokenStatus::Malformed(reason)
        }
    }
}

/// True when `token` is malformed or expires within the refresh window.
pub fn is_token_expiring(token: &str, now: DateTime<Utc>) -> bool {
    inspect_token(token, now).needs_refresh()
}


#[cfg(test)]
mod tests {
    use super::test_tokens::{expiring_at, with_claims};
    use super::*;
    use base64::engine::general_purpose::STANDARD;

    const NOW: i64 = 1_704_067_200;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(NOW, 0).unwrap()
    }

    #[test]
    fn test_fresh_token() {
        let token = expiring_at(NOW + 3600);
        assert!(!is_token_expiring(&token, now()));
        assert_eq!(
            inspect_token(&token, now()).expires_at().unwrap().timestamp(),
            NOW + 3600
        );
    }

    #[test]
    fn test_refresh_window_boundary() {
        assert!(is_token_expiring(&expiring_at(NOW + REFRESH_WINDOW_SECONDS), now()));
        assert!(!is_token_expiring(
            &expiring_at(NOW + REFRESH_WINDOW_SECONDS + 1),
            now()
        ));
        assert!(is_token_expiring(&expiring_at(NOW + 60), now()));
        assert!(is_token_expiring(&expiring_at(NOW - 60), now()));
    }

    #[test]
    fn test_wrong_segment_count_is_malformed() {
        for token in ["", "opaque-token", "a.b", "a.b.c.d", "...."] {
            assert!(
                matches!(inspect_token(token, now()), TokenStatus::Malformed(_)),
                "{token:?}"
            );
            assert!(is_token_expiring(token, now()));
        }
    }

    #[test]
    fn test_undecodable_payload_is_malformed() {
        assert!(is_token_expiring("header.!!!not-base64!!!.sig", now()));

        let not_json = format!("h.{}.s", STANDARD.encode("not json"));
        assert!(is_token_expiring(&not_json, now()));
    }

    #[test]
    fn test_missing_exp_is_malformed() {
        let token = with_claims(&serde_json::json!({ "sub": "user-1" }));
        assert!(matches!(
            inspect_token(&token, now()),
            TokenStatus::Malformed(_)
        ));
    }

    #[test]
    fn test_fractional_exp_is_floored() {
        let token = with_claims(&serde_json::json!({ "exp": 4_102_444_800.0 }));
        assert_eq!(
            inspect_token(&token, now()),
            TokenStatus::Fresh {
                expires_at: Utc.timestamp_opt(4_102_444_800, 0).unwrap()
            }
        );

        let token = with_claims(&serde_json::json!({ "exp": (NOW + 3600) as f64 + 0.75 }));
        assert_eq!(
            inspect_token(&token, now()).expires_at().unwrap().timestamp(),
            NOW + 3600
        );
    }

    #[test]
    fn test_out_of_range_exp_is_malformed() {
        let token = with_claims(&serde_json::json!({ "exp": 1e300 }));
        assert!(matches!(
            inspect_token(&token, now()),
            TokenStatus::Malformed(_)
        ));
    }

    #[test]
    fn test_standard_padded_payload_is_accepted() {
        let payload = STANDARD.encode(format!(r#"{{"exp":{},"sub":"u"}}"#, NOW + 7200));
        assert!(payload.ends_with('='));
        let token = format!("h.{}.s", payload);
        assert!(!is_token_expiring(&token, now()));
    }
}
