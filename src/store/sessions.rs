//! Bounded session store with oldest-first eviction.
//!
//! Rows are never deleted; invalidation flips `is_valid`, so the table
//! doubles as an append-only audit trail.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgExecutor, PgPool};
use tracing::Instrument;
use uuid::Uuid;

use crate::error::AuthError;

/// A session row.
#[derive(Debug, Clone, FromRow)]
pub struct SessionRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub access_token_hash: String,
    pub refresh_token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub issuing_ip: Option<String>,
    pub issuing_user_agent: Option<String>,
    pub is_valid: bool,
}

/// DTO for inserting a new session. Only token digests cross this boundary.
pub(crate) struct NewSession {
    pub(crate) id: Uuid,
    pub(crate) user_id: Uuid,
    pub(crate) access_token_hash: String,
    pub(crate) refresh_token_hash: String,
    pub(crate) expires_at: DateTime<Utc>,
    pub(crate) issuing_ip: Option<String>,
    pub(crate) issuing_user_agent: Option<String>,
}

/// Insert a session, evicting the user's oldest valid sessions so that at
/// most `max_sessions` remain valid afterwards. Returns the evicted count.
///
/// The whole sequence runs in one transaction that first locks the owning
/// user row, so two concurrent creations for the same user cannot both
/// observe "under capacity" and jointly exceed the cap. `replaces` lets a
/// refresh rotate its old session inside the same critical section.
pub(crate) async fn insert_with_eviction(
    pool: &PgPool,
    session: &NewSession,
    max_sessions: i64,
    replaces: Option<Uuid>,
) -> Result<u64, AuthError> {
    let mut tx = pool.begin().await?;

    // Per-user critical section.
    let query = "SELECT id FROM users WHERE id = $1 FOR UPDATE";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(session.user_id)
        .fetch_optional(&mut *tx)
        .instrument(span)
        .await?;

    if let Some(old_id) = replaces {
        let query = "UPDATE sessions SET is_valid = false WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(old_id)
            .execute(&mut *tx)
            .instrument(span)
            .await?;
    }

    let query = "SELECT id FROM sessions \
                 WHERE user_id = $1 AND is_valid \
                 ORDER BY last_activity_at ASC";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let valid_ids: Vec<Uuid> = sqlx::query_scalar(query)
        .bind(session.user_id)
        .fetch_all(&mut *tx)
        .instrument(span)
        .await?;

    // Leave room for the row about to be inserted.
    let mut evicted = 0u64;
    let overflow = valid_ids.len() as i64 - (max_sessions - 1);
    if overflow > 0 {
        let victims: Vec<Uuid> = valid_ids
            .iter()
            .take(usize::try_from(overflow).unwrap_or(valid_ids.len()))
            .copied()
            .collect();
        let query = "UPDATE sessions SET is_valid = false WHERE id = ANY($1)";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(&victims)
            .execute(&mut *tx)
            .instrument(span)
            .await?;
        evicted = result.rows_affected();
    }

    let query = "INSERT INTO sessions \
                 (id, user_id, access_token_hash, refresh_token_hash, expires_at, \
                  last_activity_at, issuing_ip, issuing_user_agent) \
                 VALUES ($1, $2, $3, $4, $5, NOW(), $6, $7)";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(session.id)
        .bind(session.user_id)
        .bind(&session.access_token_hash)
        .bind(&session.refresh_token_hash)
        .bind(session.expires_at)
        .bind(&session.issuing_ip)
        .bind(&session.issuing_user_agent)
        .execute(&mut *tx)
        .instrument(span)
        .await?;

    tx.commit().await?;
    Ok(evicted)
}

pub(crate) async fn find_by_id(
    pool: &PgPool,
    session_id: Uuid,
) -> Result<Option<SessionRecord>, AuthError> {
    let query = "SELECT id, user_id, access_token_hash, refresh_token_hash, expires_at, \
                 last_activity_at, issuing_ip, issuing_user_agent, is_valid \
                 FROM sessions WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let session = sqlx::query_as::<_, SessionRecord>(query)
        .bind(session_id)
        .fetch_optional(pool)
        .instrument(span)
        .await?;
    Ok(session)
}

/// Valid sessions for a user, oldest activity first (eviction order).
pub(crate) async fn list_valid_for_user(
    pool: &PgPool,
    user_id: Uuid,
) -> Result<Vec<SessionRecord>, AuthError> {
    let query = "SELECT id, user_id, access_token_hash, refresh_token_hash, expires_at, \
                 last_activity_at, issuing_ip, issuing_user_agent, is_valid \
                 FROM sessions WHERE user_id = $1 AND is_valid \
                 ORDER BY last_activity_at ASC";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let sessions = sqlx::query_as::<_, SessionRecord>(query)
        .bind(user_id)
        .fetch_all(pool)
        .instrument(span)
        .await?;
    Ok(sessions)
}

/// Mark a session invalid. Returns `true` whenever the row exists, even if
/// it was already invalid (invalidation is idempotent).
pub(crate) async fn invalidate(pool: &PgPool, session_id: Uuid) -> Result<bool, AuthError> {
    let query = "UPDATE sessions SET is_valid = false WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(session_id)
        .execute(pool)
        .instrument(span)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Mark every valid session for a user invalid. Executor-generic so the
/// recovery flow can run it inside its consumption transaction.
pub(crate) async fn invalidate_all_for_user<'e, E>(
    executor: E,
    user_id: Uuid,
) -> Result<u64, AuthError>
where
    E: PgExecutor<'e>,
{
    let query = "UPDATE sessions SET is_valid = false WHERE user_id = $1 AND is_valid";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(user_id)
        .execute(executor)
        .instrument(span)
        .await?;
    Ok(result.rows_affected())
}

/// Refresh `last_activity_at` so an active session is not evicted ahead of
/// genuinely idle ones. Returns `false` when the row does not exist.
pub(crate) async fn touch_activity(pool: &PgPool, session_id: Uuid) -> Result<bool, AuthError> {
    let query = "UPDATE sessions SET last_activity_at = NOW() WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(session_id)
        .execute(pool)
        .instrument(span)
        .await?;
    Ok(result.rows_affected() > 0)
}
