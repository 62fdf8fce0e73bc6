use anyhow::{anyhow, Result};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

pub const TOKEN_ISSUER: &str = "heirlink-api";
pub const TOKEN_AUDIENCE: &str = "heirlink";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Clone)]
pub struct JwtConfig {
    pub issuer: String,
    pub audience: String,
    pub secret: String,
    pub ttl_seconds: u64,
}

impl JwtConfig {
    pub fn new(secret: impl Into<String>, ttl_seconds: u64) -> Self {
        Self {
            issuer: TOKEN_ISSUER.to_string(),
            audience: TOKEN_AUDIENCE.to_string(),
            secret: secret.into(),
            ttl_seconds,
        }
    }
}

/// Access and refresh tokens are signed with separate secrets.
#[derive(Clone)]
pub struct TokenSigner {
    pub access: JwtConfig,
    pub refresh: JwtConfig,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String,
    pub exp: usize,
    pub iat: usize,
    pub jti: String,
    pub aud: String,
    pub iss: String,
    pub typ: TokenKind,
}

#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl TokenSigner {
    pub fn issue_pair(&self, user_id: &str) -> Result<TokenPair> {
        let (access_token, _) = issue_token(user_id, TokenKind::Access, &self.access)?;
        let (refresh_token, _) = issue_token(user_id, TokenKind::Refresh, &self.refresh)?;
        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }

    pub fn verify_access(&self, token: &str) -> Result<TokenClaims> {
        verify_token(token, TokenKind::Access, &self.access)
    }

    pub fn verify_refresh(&self, token: &str) -> Result<TokenClaims> {
        verify_token(token, TokenKind::Refresh, &self.refresh)
    }
}

pub fn issue_token(
    user_id: &str,
    kind: TokenKind,
    config: &JwtConfig,
) -> Result<(String, TokenClaims)> {
    let now = unix_seconds()?;
    let exp = now
        .checked_add(config.ttl_seconds)
        .ok_or_else(|| anyhow!("token expiry overflow"))?;

    let claims = TokenClaims {
        sub: user_id.to_string(),
        exp: exp as usize,
        iat: now as usize,
        jti: Uuid::new_v4().to_string(),
        aud: config.audience.clone(),
        iss: config.issuer.clone(),
        typ: kind,
    };

    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(config.secret.as_bytes()),
    )?;

    Ok((token, claims))
}

pub fn verify_token(token: &str, kind: TokenKind, config: &JwtConfig) -> Result<TokenClaims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_audience(&[config.audience.as_str()]);
    validation.set_issuer(&[config.issuer.as_str()]);

    let data = decode::<TokenClaims>(
        token,
        &DecodingKey::from_secret(config.secret.as_bytes()),
        &validation,
    )?;
    if data.claims.typ != kind {
        return Err(anyhow!("unexpected token type"));
    }
    Ok(data.claims)
}

pub fn unix_seconds() -> Result<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .map_err(|_| anyhow!("invalid system clock"))
}
