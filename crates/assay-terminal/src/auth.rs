//! # Access Token
//!
//! The terminal never authenticates by itself; it reads the token the login
//! flow left in `auth.json` and only decides whether it is still usable.
//!
//! A token is usable when it is non-empty and, if it is a JWT carrying an
//! `exp` claim, that claim lies in the future. The signature is the back
//! office's business and is not checked here.

use chrono::Utc;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::fmt;

use crate::error::{TerminalError, TerminalResult};

/// Seconds of slack before `exp` at which a token is already treated as expired.
const EXPIRY_LEEWAY_SECS: i64 = 30;

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    exp: Option<i64>,
}

/// Bearer token for REST calls and the hub connection.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(raw: impl Into<String>) -> Self {
        AccessToken(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Expiry as a unix timestamp, when the token is a JWT with `exp`.
    pub fn expires_at(&self) -> TerminalResult<Option<i64>> {
        if self.0.split('.').count() != 3 {
            return Ok(None);
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let data = decode::<Claims>(&self.0, &DecodingKey::from_secret(&[]), &validation)
            .map_err(|e| TerminalError::InvalidToken(e.to_string()))?;
        Ok(data.claims.exp)
    }

    /// Checks the token is present and not expired.
    pub fn validate(&self) -> TerminalResult<()> {
        if self.0.trim().is_empty() {
            return Err(TerminalError::InvalidToken("token is empty".into()));
        }
        if let Some(exp) = self.expires_at()? {
            if exp - EXPIRY_LEEWAY_SECS <= Utc::now().timestamp() {
                return Err(TerminalError::InvalidToken("token has expired".into()));
            }
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccessToken(<{} bytes>)", self.0.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;

    #[derive(Serialize)]
    struct TestClaims {
        sub: String,
        exp: i64,
    }

    fn jwt(exp: i64) -> AccessToken {
        let claims = TestClaims {
            sub: "operator-3".into(),
            exp,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"office-secret"),
        )
        .unwrap();
        AccessToken::new(token)
    }

    #[test]
    fn test_live_jwt_is_valid() {
        let token = jwt(Utc::now().timestamp() + 3600);
        assert!(token.is_valid());
        assert!(token.expires_at().unwrap().is_some());
    }

    #[test]
    fn test_expired_jwt_is_rejected() {
        let token = jwt(Utc::now().timestamp() - 10);
        assert!(matches!(token.validate(), Err(TerminalError::InvalidToken(_))));
    }

    #[test]
    fn test_opaque_token() {
        assert!(AccessToken::new("opaque-session-token").is_valid());
        assert!(!AccessToken::new("  ").is_valid());
        assert!(!AccessToken::new("a.b.c").is_valid());
    }

    #[test]
    fn test_debug_hides_token() {
        let token = AccessToken::new("secret");
        assert!(!format!("{:?}", token).contains("secret"));
    }
}
