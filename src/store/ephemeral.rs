//! Ledger of single-use, hashed, expiring tokens for the recovery flows.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::fmt;
use tracing::Instrument;
use uuid::Uuid;

use crate::error::AuthError;

/// Purpose tag scoping an ephemeral token to one flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EphemeralPurpose {
    PasswordReset,
    EmailVerification,
}

impl EphemeralPurpose {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PasswordReset => "password_reset",
            Self::EmailVerification => "email_verification",
        }
    }
}

impl fmt::Display for EphemeralPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An ephemeral token row. Only the digest of the secret is stored.
#[derive(Debug, Clone, FromRow)]
pub struct EphemeralToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub purpose: String,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub issuing_ip: Option<String>,
}

/// Insert a new token, retiring every prior unused token for the same
/// `(user, purpose)` in the same transaction: at most one live secret can
/// exist at a time.
pub(crate) async fn issue(
    pool: &PgPool,
    user_id: Uuid,
    purpose: EphemeralPurpose,
    token_hash: &str,
    ttl_seconds: i64,
    issuing_ip: Option<&str>,
) -> Result<Uuid, AuthError> {
    let mut tx = pool.begin().await?;

    let query = "UPDATE ephemeral_tokens SET used = true \
                 WHERE user_id = $1 AND purpose = $2 AND NOT used";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(purpose.as_str())
        .execute(&mut *tx)
        .instrument(span)
        .await?;

    let query = "INSERT INTO ephemeral_tokens \
                 (user_id, purpose, token_hash, expires_at, issuing_ip) \
                 VALUES ($1, $2, $3, NOW() + ($4 * INTERVAL '1 second'), $5) \
                 RETURNING id";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let id: Uuid = sqlx::query_scalar(query)
        .bind(user_id)
        .bind(purpose.as_str())
        .bind(token_hash)
        .bind(ttl_seconds)
        .bind(issuing_ip)
        .fetch_one(&mut *tx)
        .instrument(span)
        .await?;

    tx.commit().await?;
    Ok(id)
}

/// Unused tokens for `(user, purpose)` — the scan set for consumption.
/// Small by construction, since issuance retires prior tokens.
pub(crate) async fn list_unused(
    pool: &PgPool,
    user_id: Uuid,
    purpose: EphemeralPurpose,
) -> Result<Vec<EphemeralToken>, AuthError> {
    let query = "SELECT id, user_id, purpose, token_hash, expires_at, used, issuing_ip \
                 FROM ephemeral_tokens \
                 WHERE user_id = $1 AND purpose = $2 AND NOT used";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let tokens = sqlx::query_as::<_, EphemeralToken>(query)
        .bind(user_id)
        .bind(purpose.as_str())
        .fetch_all(pool)
        .instrument(span)
        .await?;
    Ok(tokens)
}

/// Mark a token used inside the caller's transaction. The `NOT used` guard
/// makes consumption exactly-once: only one of two racing calls sees a row.
pub(crate) async fn mark_used(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    token_id: Uuid,
) -> Result<bool, AuthError> {
    let query = "UPDATE ephemeral_tokens SET used = true WHERE id = $1 AND NOT used";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(token_id)
        .execute(&mut **tx)
        .instrument(span)
        .await?;
    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::EphemeralPurpose;

    #[test]
    fn purpose_tags_match_the_schema_check() {
        assert_eq!(EphemeralPurpose::PasswordReset.as_str(), "password_reset");
        assert_eq!(
            EphemeralPurpose::EmailVerification.as_str(),
            "email_verification"
        );
    }
}
