//! Password reset and email verification flows.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::password::{hash_blocking, verify_blocking, PasswordHasher};
use crate::store::ephemeral::{self, EphemeralPurpose, EphemeralToken};
use crate::store::{sessions, users};

/// Everything a delivery channel needs to send one recovery secret.
/// The secret appears here in plaintext; it is never stored or logged.
#[derive(Debug, Clone)]
pub struct Notice {
    pub purpose: EphemeralPurpose,
    pub email: String,
    pub secret: String,
    pub expires_at: DateTime<Utc>,
}

/// Delivery channel for recovery secrets, typically email.
pub trait Notifier: Send + Sync {
    /// Deliver the notice. Failures are logged, not surfaced: issuance
    /// outcomes must not reveal whether delivery happened.
    fn deliver(&self, notice: Notice) -> anyhow::Result<()>;
}

/// Discards every notice. Useful in tests and in deployments where
/// delivery is handled out of band.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn deliver(&self, _notice: Notice) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Orchestrates the single-use token flows: issue a secret, deliver it,
/// consume it exactly once.
#[derive(Clone)]
pub struct RecoveryFlow {
    pool: PgPool,
    config: AuthConfig,
    hasher: PasswordHasher,
    notifier: Arc<dyn Notifier>,
}

impl RecoveryFlow {
    #[must_use]
    pub fn new(pool: PgPool, config: AuthConfig, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            pool,
            config,
            hasher: PasswordHasher::default(),
            notifier,
        }
    }

    /// Swap the credential hasher (tests use cheaper cost parameters).
    #[must_use]
    pub fn with_hasher(mut self, hasher: PasswordHasher) -> Self {
        self.hasher = hasher;
        self
    }

    /// Begin a password reset. Succeeds for unknown emails too, so the
    /// outcome never confirms whether an account exists.
    ///
    /// # Errors
    ///
    /// Hashing or storage failures only.
    pub async fn forgot_password(
        &self,
        email: &str,
        issuing_ip: Option<&str>,
    ) -> Result<(), AuthError> {
        let email = users::normalize_email(email);
        let Some(user) = users::get_user_by_email(&self.pool, &email).await? else {
            debug!("password reset requested for unknown email");
            return Ok(());
        };

        self.issue_and_notify(
            &user,
            EphemeralPurpose::PasswordReset,
            self.config.reset_token_ttl_seconds(),
            issuing_ip,
        )
        .await
    }

    /// Issue an email-verification secret for an existing user.
    ///
    /// # Errors
    ///
    /// [`AuthError::NotFound`] when the user does not exist.
    pub async fn request_email_verification(
        &self,
        user_id: Uuid,
        issuing_ip: Option<&str>,
    ) -> Result<(), AuthError> {
        let Some(user) = users::get_user_by_id(&self.pool, user_id).await? else {
            return Err(AuthError::NotFound);
        };

        self.issue_and_notify(
            &user,
            EphemeralPurpose::EmailVerification,
            self.config.verification_token_ttl_seconds(),
            issuing_ip,
        )
        .await
    }

    /// Consume a reset secret, rotate the credential, and invalidate every
    /// session of the user. Consumption, rotation, and fan-out commit
    /// together or not at all.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidOrExpiredToken`] for a wrong, expired, or
    /// already-used secret. Which of the three it was is not revealed.
    pub async fn reset_password(
        &self,
        user_id: Uuid,
        secret: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        let token = self
            .match_unused_token(user_id, EphemeralPurpose::PasswordReset, secret)
            .await?;
        let new_hash = hash_blocking(&self.hasher, new_password.to_string()).await?;

        let mut tx = self.pool.begin().await?;
        if !ephemeral::mark_used(&mut tx, token.id).await? {
            // A racing consumption won; this one loses.
            return Err(AuthError::InvalidOrExpiredToken);
        }
        users::set_password_hash(&mut tx, user_id, &new_hash).await?;
        let invalidated = sessions::invalidate_all_for_user(&mut *tx, user_id).await?;
        tx.commit().await?;

        debug!(%user_id, invalidated, "password reset committed");
        Ok(())
    }

    /// Consume a verification secret and mark the email verified.
    /// Existing sessions are untouched.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidOrExpiredToken`] for a wrong, expired, or
    /// already-used secret.
    pub async fn verify_email(&self, user_id: Uuid, secret: &str) -> Result<(), AuthError> {
        let token = self
            .match_unused_token(user_id, EphemeralPurpose::EmailVerification, secret)
            .await?;

        let mut tx = self.pool.begin().await?;
        if !ephemeral::mark_used(&mut tx, token.id).await? {
            return Err(AuthError::InvalidOrExpiredToken);
        }
        users::set_email_verified(&mut tx, user_id).await?;
        tx.commit().await?;

        debug!(%user_id, "email verified");
        Ok(())
    }

    async fn issue_and_notify(
        &self,
        user: &users::User,
        purpose: EphemeralPurpose,
        ttl_seconds: i64,
        issuing_ip: Option<&str>,
    ) -> Result<(), AuthError> {
        let secret = generate_secret()?;
        let token_hash = hash_blocking(&self.hasher, secret.clone()).await?;

        ephemeral::issue(
            &self.pool,
            user.id,
            purpose,
            &token_hash,
            ttl_seconds,
            issuing_ip,
        )
        .await?;

        let notice = Notice {
            purpose,
            email: user.email.clone(),
            secret,
            expires_at: Utc::now() + chrono::Duration::seconds(ttl_seconds),
        };
        if let Err(err) = self.notifier.deliver(notice) {
            // Do not surface the failure; the issuance outcome must not
            // reveal delivery state.
            warn!(%purpose, user_id = %user.id, %err, "recovery notice delivery failed");
        }
        Ok(())
    }

    /// Find the unused token whose digest matches `secret`, rejecting
    /// expired matches. The unused set is small by construction, so the
    /// verification scan stays cheap.
    async fn match_unused_token(
        &self,
        user_id: Uuid,
        purpose: EphemeralPurpose,
        secret: &str,
    ) -> Result<EphemeralToken, AuthError> {
        let candidates = ephemeral::list_unused(&self.pool, user_id, purpose).await?;
        for token in candidates {
            let matches = verify_blocking(
                &self.hasher,
                secret.to_string(),
                token.token_hash.clone(),
            )
            .await?;
            if matches {
                if token.expires_at <= Utc::now() {
                    debug!(%user_id, %purpose, "recovery secret matched an expired token");
                    return Err(AuthError::InvalidOrExpiredToken);
                }
                return Ok(token);
            }
        }
        Err(AuthError::InvalidOrExpiredToken)
    }
}

/// 32 bytes from the OS CSPRNG, base64url without padding.
fn generate_secret() -> Result<String, AuthError> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|err| AuthError::HashingFailure(format!("secret generation failed: {err}")))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}
