//! Signed, expiring bearer tokens.
//!
//! Format: `base64url(claims_json) "." hex(hmac_sha256(secret, base64url_part))`.
//! The same signer authenticates API callers and mints the `FLUX_TOKEN`
//! handed to running scripts so they can call back into the API as the admin.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{FluxError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Payload carried by a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the admin user name.
    pub sub: String,
    /// Expiry as a unix timestamp (seconds).
    pub exp: i64,
}

#[derive(Clone)]
pub struct TokenSigner {
    secret: Vec<u8>,
    ttl: Duration,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl TokenSigner {
    pub fn new(secret: impl Into<Vec<u8>>, ttl_minutes: i64) -> Self {
        Self {
            secret: secret.into(),
            ttl: Duration::minutes(ttl_minutes),
        }
    }

    /// Signer with a fresh 32-byte random key.
    pub fn random(ttl_minutes: i64) -> Self {
        let mut secret = vec![0u8; 32];
        rand::rng().fill_bytes(&mut secret);
        Self::new(secret, ttl_minutes)
    }

    /// Issue a token for `subject` that expires after the configured TTL.
    pub fn mint(&self, subject: &str) -> Result<String> {
        let claims = Claims {
            sub: subject.to_string(),
            exp: (Utc::now() + self.ttl).timestamp(),
        };
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?);
        let signature = hex::encode(self.mac(payload.as_bytes())?.finalize().into_bytes());
        Ok(format!("{payload}.{signature}"))
    }

    /// Check signature and expiry, returning the claims on success.
    pub fn verify(&self, token: &str) -> Result<Claims> {
        let (payload, signature) = token
            .split_once('.')
            .ok_or_else(|| FluxError::InvalidToken("malformed token".to_string()))?;

        let expected = hex::decode(signature)
            .map_err(|_| FluxError::InvalidToken("signature is not valid hex".to_string()))?;
        self.mac(payload.as_bytes())?
            .verify_slice(&expected)
            .map_err(|_| FluxError::InvalidToken("signature mismatch".to_string()))?;

        let raw = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| FluxError::InvalidToken("payload is not valid base64".to_string()))?;
        let claims: Claims = serde_json::from_slice(&raw)?;

        if claims.exp < Utc::now().timestamp() {
            return Err(FluxError::TokenExpired);
        }
        Ok(claims)
    }

    fn mac(&self, data: &[u8]) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|_| FluxError::InvalidToken("invalid HMAC key length".to_string()))?;
        mac.update(data);
        Ok(mac)
    }
}
