use std::time::Duration;

use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use serde::Serialize;
use thiserror::Error;
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use super::claims::{Claims, TokenKind};
use crate::config::JwtConfig;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token is invalid")]
    Invalid,
    #[error("token has expired")]
    Expired,
    #[error("token signing failed: {0}")]
    Signing(String),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            _ => TokenError::Invalid,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub session_token: String,
    pub refresh_token: String,
}

/// Signs and verifies HS256 tokens. Signature validity is necessary but not
/// sufficient: session and refresh tokens must also be live in the cache.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    session_ttl: Duration,
    refresh_ttl: Duration,
    reset_ttl: Duration,
}

impl TokenIssuer {
    pub fn new(cfg: &JwtConfig) -> anyhow::Result<Self> {
        if cfg.secret.trim().is_empty() {
            anyhow::bail!("JWT secret is not configured");
        }
        Ok(Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            session_ttl: Duration::from_secs(cfg.session_ttl_secs),
            refresh_ttl: Duration::from_secs(cfg.refresh_ttl_secs),
            reset_ttl: Duration::from_secs(cfg.reset_ttl_secs),
        })
    }

    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    pub fn reset_ttl(&self) -> Duration {
        self.reset_ttl
    }

    fn ttl_for(&self, kind: TokenKind) -> Duration {
        match kind {
            TokenKind::Session => self.session_ttl,
            TokenKind::Refresh => self.refresh_ttl,
            TokenKind::PasswordReset => self.reset_ttl,
        }
    }

    pub fn sign(&self, user_id: Uuid, kind: TokenKind) -> Result<String, TokenError> {
        self.sign_with_claims(user_id, kind).map(|(token, _)| token)
    }

    /// Like [`TokenIssuer::sign`], also handing back the claims (for the `jti`).
    pub fn sign_with_claims(
        &self,
        user_id: Uuid,
        kind: TokenKind,
    ) -> Result<(String, Claims), TokenError> {
        let now = OffsetDateTime::now_utc();
        let exp = now + TimeDuration::seconds(self.ttl_for(kind).as_secs() as i64);
        let claims = Claims {
            sub: user_id,
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            jti: Uuid::new_v4(),
            kind,
        };
        let token = self.sign_claims(&claims)?;
        Ok((token, claims))
    }

    pub(crate) fn sign_claims(&self, claims: &Claims) -> Result<String, TokenError> {
        let token = encode(&Header::default(), claims, &self.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))?;
        debug!(user_id = %claims.sub, kind = ?claims.kind, "jwt signed");
        Ok(token)
    }

    /// Always a fresh pair; the caller persists both into the cache.
    pub fn issue(&self, user_id: Uuid) -> Result<TokenPair, TokenError> {
        Ok(TokenPair {
            session_token: self.sign(user_id, TokenKind::Session)?,
            refresh_token: self.sign(user_id, TokenKind::Refresh)?,
        })
    }

    /// Checks signature, expiry, issuer, audience and kind.
    pub fn verify(&self, token: &str, kind: TokenKind) -> Result<Claims, TokenError> {
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        if data.claims.kind != kind {
            debug!(expected = ?kind, got = ?data.claims.kind, "jwt kind mismatch");
            return Err(TokenError::Invalid);
        }
        debug!(user_id = %data.claims.sub, kind = ?kind, "jwt verified");
        Ok(data.claims)
    }
}
