//! Signed bearer tokens with per-purpose secrets.

use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::error::AuthError;

/// Purpose of a signed token.
///
/// Access and refresh tokens are signed with distinct secrets, so a token
/// presented against the other purpose fails signature verification outright.
/// The purpose is also embedded as a claim and re-checked after decoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenPurpose {
    Access,
    Refresh,
}

impl TokenPurpose {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
        }
    }
}

impl fmt::Display for TokenPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded content of a bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user id.
    pub sub: Uuid,
    /// The session row this token belongs to, carried as a first-class claim
    /// so session lookup is by primary key instead of a hash scan.
    pub sid: Uuid,
    /// Purpose tag.
    pub purpose: TokenPurpose,
    /// Unique token id.
    pub jti: String,
    /// Issued-at (unix seconds).
    pub iat: i64,
    /// Expiry (unix seconds).
    pub exp: i64,
}

/// Signs and verifies short-lived HS256 tokens.
#[derive(Clone)]
pub struct TokenCodec {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
}

impl TokenCodec {
    #[must_use]
    pub fn new(config: &AuthConfig) -> Self {
        let access = config.access_secret().expose_secret().as_bytes();
        let refresh = config.refresh_secret().expose_secret().as_bytes();
        Self {
            access_encoding: EncodingKey::from_secret(access),
            access_decoding: DecodingKey::from_secret(access),
            refresh_encoding: EncodingKey::from_secret(refresh),
            refresh_decoding: DecodingKey::from_secret(refresh),
        }
    }

    /// Sign a token for `sub`/`sid` expiring `ttl_seconds` from now, with a
    /// fresh `jti`.
    ///
    /// # Errors
    ///
    /// Signing failure is an infrastructure fault and maps to
    /// [`AuthError::HashingFailure`].
    pub fn sign(
        &self,
        sub: Uuid,
        sid: Uuid,
        purpose: TokenPurpose,
        ttl_seconds: i64,
    ) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub,
            sid,
            purpose,
            jti: Uuid::new_v4().to_string(),
            iat: now,
            exp: now + ttl_seconds,
        };
        let key = match purpose {
            TokenPurpose::Access => &self.access_encoding,
            TokenPurpose::Refresh => &self.refresh_encoding,
        };
        encode(&Header::default(), &claims, key)
            .map_err(|err| AuthError::HashingFailure(format!("failed to sign token: {err}")))
    }

    /// Verify a token against the secret for `purpose` and return its claims.
    ///
    /// # Errors
    ///
    /// [`AuthError::TokenExpired`] when the clock has passed `exp`;
    /// [`AuthError::TokenInvalid`] for every other failure, including a token
    /// signed for the other purpose.
    pub fn verify(&self, token: &str, purpose: TokenPurpose) -> Result<Claims, AuthError> {
        let key = match purpose {
            TokenPurpose::Access => &self.access_decoding,
            TokenPurpose::Refresh => &self.refresh_decoding,
        };
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is a hard boundary; no leeway.
        validation.leeway = 0;
        let data = decode::<Claims>(token, key, &validation).map_err(|err| match err.kind() {
            ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            _ => AuthError::TokenInvalid,
        })?;
        if data.claims.purpose != purpose {
            return Err(AuthError::TokenInvalid);
        }
        Ok(data.claims)
    }
}

/// Parse a compact duration string (`^\d+[smhd]$`) into seconds.
///
/// # Errors
///
/// Anything outside the grammar is [`AuthError::InvalidDuration`].
pub fn parse_ttl(value: &str) -> Result<i64, AuthError> {
    let invalid = || AuthError::InvalidDuration(value.to_string());
    // ASCII-only grammar; a multi-byte tail must not land on split_at.
    if value.len() < 2 || !value.is_ascii() {
        return Err(invalid());
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let amount: i64 = digits.parse().map_err(|_| invalid())?;
    let scale = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 24 * 60 * 60,
        _ => return Err(invalid()),
    };
    Ok(amount * scale)
}
