//! Session lifecycle: login, refresh, verification, logout.

use chrono::Utc;
use sqlx::PgPool;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{AuthConfig, LogoutFallback};
use crate::error::AuthError;
use crate::password::{hash_blocking, verify_blocking, PasswordHasher};
use crate::store::{sessions, users};
use crate::token::{Claims, TokenCodec, TokenPurpose};

/// The bearer credentials handed back by [`SessionManager::login`] and
/// [`SessionManager::refresh`]. Plaintext tokens appear here and nowhere
/// else; the store only ever sees their digests.
#[derive(Debug, Clone)]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub session_id: Uuid,
}

/// Orchestrates the session lifecycle against the store.
#[derive(Clone)]
pub struct SessionManager {
    pool: PgPool,
    config: AuthConfig,
    codec: TokenCodec,
    hasher: PasswordHasher,
}

impl SessionManager {
    #[must_use]
    pub fn new(pool: PgPool, config: AuthConfig) -> Self {
        let codec = TokenCodec::new(&config);
        Self {
            pool,
            config,
            codec,
            hasher: PasswordHasher::default(),
        }
    }

    /// Swap the credential hasher (tests use cheaper cost parameters).
    #[must_use]
    pub fn with_hasher(mut self, hasher: PasswordHasher) -> Self {
        self.hasher = hasher;
        self
    }

    /// Authenticate with email and password, creating a session.
    ///
    /// Unknown email and wrong password both map to
    /// [`AuthError::InvalidCredentials`]; the two cases are not
    /// distinguishable by the caller. The password is verified before the
    /// active check, so an inactive account only learns its state after
    /// proving the credential.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidCredentials`], [`AuthError::AccountInactive`],
    /// or a hashing/storage failure.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        issuing_ip: Option<&str>,
        issuing_user_agent: Option<&str>,
    ) -> Result<SessionTokens, AuthError> {
        let email = users::normalize_email(email);
        let Some(user) = users::get_user_by_email(&self.pool, &email).await? else {
            debug!("login rejected: unknown email");
            return Err(AuthError::InvalidCredentials);
        };

        let matches = verify_blocking(
            &self.hasher,
            password.to_string(),
            user.password_hash.clone(),
        )
        .await?;
        if !matches {
            debug!(user_id = %user.id, "login rejected: credential mismatch");
            return Err(AuthError::InvalidCredentials);
        }

        if !user.is_active {
            debug!(user_id = %user.id, "login rejected: account inactive");
            return Err(AuthError::AccountInactive);
        }

        self.create_session(user.id, issuing_ip, issuing_user_agent, None)
            .await
    }

    /// Rotate a session: verify the refresh token, invalidate its session,
    /// and issue a fresh pair in its place. The old session is retired and
    /// the new one inserted inside one eviction transaction, so the
    /// capacity bound holds at every instant.
    ///
    /// # Errors
    ///
    /// [`AuthError::TokenExpired`] when the token or session is past its
    /// lifetime, [`AuthError::TokenInvalid`] for every other rejection.
    pub async fn refresh(
        &self,
        refresh_token: &str,
        issuing_ip: Option<&str>,
        issuing_user_agent: Option<&str>,
    ) -> Result<SessionTokens, AuthError> {
        let claims = self.codec.verify(refresh_token, TokenPurpose::Refresh)?;

        let Some(session) = sessions::find_by_id(&self.pool, claims.sid).await? else {
            return Err(AuthError::TokenInvalid);
        };
        if !session.is_valid {
            debug!(session_id = %session.id, "refresh rejected: session invalidated");
            return Err(AuthError::TokenInvalid);
        }
        if session.expires_at <= Utc::now() {
            debug!(session_id = %session.id, "refresh rejected: session expired");
            return Err(AuthError::TokenExpired);
        }
        if session.user_id != claims.sub {
            return Err(AuthError::TokenInvalid);
        }

        let matches = verify_blocking(
            &self.hasher,
            refresh_token.to_string(),
            session.refresh_token_hash.clone(),
        )
        .await?;
        if !matches {
            return Err(AuthError::TokenInvalid);
        }

        let Some(user) = users::get_user_by_id(&self.pool, session.user_id).await? else {
            return Err(AuthError::NotFound);
        };
        if !user.is_active {
            return Err(AuthError::AccountInactive);
        }

        self.create_session(user.id, issuing_ip, issuing_user_agent, Some(session.id))
            .await
    }

    /// Verify an access token against its live session, returning the
    /// claims on success. Signature validity alone is not enough: the
    /// session must still exist, be valid, be unexpired, and hold the
    /// digest of exactly this token.
    ///
    /// # Errors
    ///
    /// [`AuthError::TokenExpired`] or [`AuthError::TokenInvalid`].
    pub async fn verify_access(&self, access_token: &str) -> Result<Claims, AuthError> {
        let claims = self.codec.verify(access_token, TokenPurpose::Access)?;

        let Some(session) = sessions::find_by_id(&self.pool, claims.sid).await? else {
            return Err(AuthError::TokenInvalid);
        };
        if !session.is_valid {
            return Err(AuthError::TokenInvalid);
        }
        if session.expires_at <= Utc::now() {
            return Err(AuthError::TokenExpired);
        }
        if session.user_id != claims.sub {
            return Err(AuthError::TokenInvalid);
        }

        let matches = verify_blocking(
            &self.hasher,
            access_token.to_string(),
            session.access_token_hash.clone(),
        )
        .await?;
        if !matches {
            return Err(AuthError::TokenInvalid);
        }

        Ok(claims)
    }

    /// End the session identified by a refresh token. Returns `true` when a
    /// session was invalidated and `false` when nothing matched; an
    /// unverifiable token is not an error here, just a no-op.
    ///
    /// When the token is well signed but its digest matches no stored
    /// session, the configured [`LogoutFallback`] decides: the default
    /// invalidates every session of the claimed user, since an honest
    /// client asking to log out should never stay logged in.
    pub async fn logout(&self, refresh_token: &str) -> Result<bool, AuthError> {
        let claims = match self.codec.verify(refresh_token, TokenPurpose::Refresh) {
            Ok(claims) => claims,
            Err(err) => {
                debug!(%err, "logout with unverifiable token ignored");
                return Ok(false);
            }
        };

        if let Some(session) = sessions::find_by_id(&self.pool, claims.sid).await? {
            if session.user_id == claims.sub
                && verify_blocking(
                    &self.hasher,
                    refresh_token.to_string(),
                    session.refresh_token_hash.clone(),
                )
                .await?
            {
                return sessions::invalidate(&self.pool, session.id).await;
            }
        }

        // The claimed session is gone or does not hold this digest. Scan
        // the user's valid sessions before giving up.
        let valid = sessions::list_valid_for_user(&self.pool, claims.sub).await?;
        for session in &valid {
            let matches = verify_blocking(
                &self.hasher,
                refresh_token.to_string(),
                session.refresh_token_hash.clone(),
            )
            .await?;
            if matches {
                return sessions::invalidate(&self.pool, session.id).await;
            }
        }

        match self.config.logout_fallback() {
            LogoutFallback::InvalidateAll if !valid.is_empty() => {
                warn!(
                    user_id = %claims.sub,
                    "logout token matched no session; invalidating all sessions for user"
                );
                sessions::invalidate_all_for_user(&self.pool, claims.sub).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Administratively invalidate one session by id. Idempotent: an
    /// already-invalid session succeeds again.
    ///
    /// # Errors
    ///
    /// [`AuthError::NotFound`] when no such session exists.
    pub async fn invalidate_session_by_id(&self, session_id: Uuid) -> Result<(), AuthError> {
        if sessions::invalidate(&self.pool, session_id).await? {
            Ok(())
        } else {
            Err(AuthError::NotFound)
        }
    }

    /// Record activity on a session so the eviction order reflects real
    /// use, not just login order.
    ///
    /// # Errors
    ///
    /// [`AuthError::NotFound`] when no such session exists.
    pub async fn touch_activity(&self, session_id: Uuid) -> Result<(), AuthError> {
        if sessions::touch_activity(&self.pool, session_id).await? {
            Ok(())
        } else {
            Err(AuthError::NotFound)
        }
    }

    /// Valid sessions for a user, oldest activity first.
    ///
    /// # Errors
    ///
    /// Storage failures only.
    pub async fn list_sessions(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<sessions::SessionRecord>, AuthError> {
        sessions::list_valid_for_user(&self.pool, user_id).await
    }

    async fn create_session(
        &self,
        user_id: Uuid,
        issuing_ip: Option<&str>,
        issuing_user_agent: Option<&str>,
        replaces: Option<Uuid>,
    ) -> Result<SessionTokens, AuthError> {
        let session_id = Uuid::new_v4();

        let access_token = self.codec.sign(
            user_id,
            session_id,
            TokenPurpose::Access,
            self.config.access_ttl_seconds(),
        )?;
        let refresh_token = self.codec.sign(
            user_id,
            session_id,
            TokenPurpose::Refresh,
            self.config.refresh_ttl_seconds(),
        )?;

        let access_token_hash = hash_blocking(&self.hasher, access_token.clone()).await?;
        let refresh_token_hash = hash_blocking(&self.hasher, refresh_token.clone()).await?;

        let session = sessions::NewSession {
            id: session_id,
            user_id,
            access_token_hash,
            refresh_token_hash,
            expires_at: Utc::now() + chrono::Duration::seconds(self.config.refresh_ttl_seconds()),
            issuing_ip: issuing_ip.map(str::to_string),
            issuing_user_agent: issuing_user_agent.map(str::to_string),
        };

        let evicted = sessions::insert_with_eviction(
            &self.pool,
            &session,
            self.config.max_sessions(),
            replaces,
        )
        .await?;
        if evicted > 0 {
            debug!(%user_id, %session_id, evicted, "evicted oldest sessions at capacity");
        }

        Ok(SessionTokens {
            access_token,
            refresh_token,
            session_id,
        })
    }
}
