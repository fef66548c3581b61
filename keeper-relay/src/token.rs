//! HS256 bearer tokens carrying the user ID as `sub`.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

const RANDOM_SECRET_SIZE: usize = 32;

const HEADER: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,

    #[error("invalid token signature")]
    BadSignature,

    #[error("token expired")]
    Expired,

    #[error("token signing failed")]
    Signing,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iat: i64,
    exp: i64,
}

/// Issues and validates signed, expiring tokens.
#[derive(Clone)]
pub struct TokenManager {
    secret: Vec<u8>,
    ttl_secs: i64,
}

impl TokenManager {
    /// An empty `secret` is replaced by a random key, so tokens never
    /// survive the process that issued them.
    pub fn new(secret: impl Into<Vec<u8>>, ttl_secs: u64) -> Self {
        let mut secret = secret.into();
        if secret.is_empty() {
            warn!("No token secret configured, using a random key for this process");
            secret = vec![0u8; RANDOM_SECRET_SIZE];
            OsRng.fill_bytes(&mut secret);
        }

        Self {
            secret,
            ttl_secs: i64::try_from(ttl_secs).unwrap_or(i64::MAX),
        }
    }

    fn mac(&self, signing_input: &str) -> Result<HmacSha256, TokenError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).map_err(|_| TokenError::Signing)?;
        mac.update(signing_input.as_bytes());
        Ok(mac)
    }

    pub fn generate(&self, user_id: &str) -> Result<String, TokenError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            iat: now,
            exp: now.saturating_add(self.ttl_secs),
        };
        let claims_json = serde_json::to_vec(&claims).map_err(|_| TokenError::Signing)?;

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(HEADER),
            URL_SAFE_NO_PAD.encode(claims_json)
        );
        let signature = self.mac(&signing_input)?.finalize().into_bytes();

        Ok(format!(
            "{}.{}",
            signing_input,
            URL_SAFE_NO_PAD.encode(signature)
        ))
    }

    /// Verify signature and expiry, returning the subject.
    pub fn validate(&self, token: &str) -> Result<String, TokenError> {
        let (signing_input, signature) = token.rsplit_once('.').ok_or(TokenError::Malformed)?;
        let (header, claims) = signing_input.split_once('.').ok_or(TokenError::Malformed)?;

        let header = URL_SAFE_NO_PAD
            .decode(header)
            .map_err(|_| TokenError::Malformed)?;
        if header != HEADER.as_bytes() {
            return Err(TokenError::Malformed);
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| TokenError::Malformed)?;
        let expected = self.mac(signing_input)?.finalize().into_bytes();
        if !bool::from(expected.as_slice().ct_eq(&signature)) {
            return Err(TokenError::BadSignature);
        }

        let claims: Claims = URL_SAFE_NO_PAD
            .decode(claims)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .ok_or(TokenError::Malformed)?;
        if claims.exp <= Utc::now().timestamp() {
            return Err(TokenError::Expired);
        }

        Ok(claims.sub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_and_validate() {
        let tm = TokenManager::new("secret", 60);
        let token = tm.generate("user-1").unwrap();
        assert_eq!(token.split('.').count(), 3);
        assert_eq!(tm.validate(&token).unwrap(), "user-1");
    }

    #[test]
    fn wrong_secret_rejected() {
        let token = TokenManager::new("a", 60).generate("u").unwrap();
        assert_eq!(
            TokenManager::new("b", 60).validate(&token),
            Err(TokenError::BadSignature)
        );
    }

    #[test]
    fn tampered_claims_rejected() {
        let tm = TokenManager::new("secret", 60);
        let token = tm.generate("alice").unwrap();
        let parts: Vec<&str> = token.split('.').collect();

        let forged_claims = URL_SAFE_NO_PAD.encode(r#"{"sub":"mallory","iat":0,"exp":99999999999}"#);
        let forged = format!("{}.{}.{}", parts[0], forged_claims, parts[2]);
        assert_eq!(tm.validate(&forged), Err(TokenError::BadSignature));
    }

    #[test]
    fn expired_rejected() {
        let tm = TokenManager::new("secret", 0);
        let token = tm.generate("u").unwrap();
        assert_eq!(tm.validate(&token), Err(TokenError::Expired));
    }

    #[test]
    fn empty_secret_is_never_used_for_signing() {
        let forger = TokenManager {
            secret: Vec::new(),
            ttl_secs: 60,
        };
        let forged = forger.generate("victim").unwrap();

        let tm = TokenManager::new(Vec::<u8>::new(), 60);
        assert_eq!(tm.secret.len(), RANDOM_SECRET_SIZE);
        assert_eq!(tm.validate(&forged), Err(TokenError::BadSignature));

        // Two unconfigured managers do not share a key either.
        let other = TokenManager::new("", 60);
        let token = other.generate("u").unwrap();
        assert_eq!(tm.validate(&token), Err(TokenError::BadSignature));
    }

    #[test]
    fn garbage_rejected() {
        let tm = TokenManager::new("secret", 60);
        assert_eq!(tm.validate("not-a-token"), Err(TokenError::Malformed));
        assert_eq!(tm.validate("a.b.c"), Err(TokenError::Malformed));
    }
}
