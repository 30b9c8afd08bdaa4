//! Typed errors for the authentication core.

use thiserror::Error;

/// Error kinds surfaced to the request boundary.
///
/// Display strings are deliberately generic: unknown user and wrong password
/// collapse into [`AuthError::InvalidCredentials`], and reset/verification
/// failures collapse into [`AuthError::InvalidOrExpiredToken`], so callers
/// cannot enumerate accounts or probe near-miss secrets.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Unknown user or wrong password; the two are indistinguishable.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// The account exists but is disabled.
    #[error("account inactive")]
    AccountInactive,

    /// The clock has passed the token's expiry.
    #[error("token expired")]
    TokenExpired,

    /// Bad signature, wrong purpose, malformed shape, or no matching session.
    #[error("invalid token")]
    TokenInvalid,

    /// Reset/verification secret did not match an unused, unexpired token.
    /// "No match" and "matched but expired" are intentionally merged.
    #[error("invalid or expired token")]
    InvalidOrExpiredToken,

    /// Internal fault in the adaptive hasher or token signer. Infrastructure,
    /// not client error; callers should log it with full context.
    #[error("hashing failure: {0}")]
    HashingFailure(String),

    /// Lookup by id found nothing.
    #[error("not found")]
    NotFound,

    /// Unparseable ttl string; a configuration-time error, never a runtime one.
    #[error("invalid duration: {0}")]
    InvalidDuration(String),

    /// Underlying store failure; the message stays generic, the source does not.
    #[error("database error")]
    Database(#[from] sqlx::Error),
}
