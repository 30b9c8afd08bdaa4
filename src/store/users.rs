//! Read-side access to the externally owned `users` table.
//!
//! User rows are created and managed by the user-management collaborator.
//! This core reads them and writes exactly two fields on successful recovery
//! flows: the credential hash and the verified flag.

use sqlx::{FromRow, PgPool};
use tracing::Instrument;
use uuid::Uuid;

use crate::error::AuthError;

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub is_active: bool,
    pub email_verified: bool,
}

/// Normalize an email for lookup.
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub(crate) async fn get_user_by_email(
    pool: &PgPool,
    email: &str,
) -> Result<Option<User>, AuthError> {
    let query = "SELECT id, email, password_hash, is_active, email_verified \
                 FROM users WHERE email = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let user = sqlx::query_as::<_, User>(query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await?;
    Ok(user)
}

pub(crate) async fn get_user_by_id(pool: &PgPool, id: Uuid) -> Result<Option<User>, AuthError> {
    let query = "SELECT id, email, password_hash, is_active, email_verified \
                 FROM users WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let user = sqlx::query_as::<_, User>(query)
        .bind(id)
        .fetch_optional(pool)
        .instrument(span)
        .await?;
    Ok(user)
}

/// Rotate the credential hash inside the caller's transaction.
pub(crate) async fn set_password_hash(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
    password_hash: &str,
) -> Result<(), AuthError> {
    let query = "UPDATE users SET password_hash = $2, updated_at = NOW() WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(password_hash)
        .execute(&mut **tx)
        .instrument(span)
        .await?;
    Ok(())
}

/// Flip the verified flag inside the caller's transaction.
pub(crate) async fn set_email_verified(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
) -> Result<(), AuthError> {
    let query = "UPDATE users SET email_verified = true, updated_at = NOW() WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .execute(&mut **tx)
        .instrument(span)
        .await?;
    Ok(())
}
