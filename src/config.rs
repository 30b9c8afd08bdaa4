//! Immutable configuration for the authentication core.
//!
//! Secrets, TTLs, and the session cap are fixed at startup and passed to
//! constructors explicitly; there is no module-level state, so tests can run
//! with varying secrets and TTLs side by side.

use secrecy::SecretString;

use crate::error::AuthError;
use crate::token::parse_ttl;

const DEFAULT_ACCESS_TTL_SECONDS: i64 = 15 * 60;
const DEFAULT_REFRESH_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;
const DEFAULT_RESET_TOKEN_TTL_SECONDS: i64 = 60 * 60;
const DEFAULT_VERIFICATION_TOKEN_TTL_SECONDS: i64 = 24 * 60 * 60;
const DEFAULT_MAX_SESSIONS: i64 = 5;

/// Policy applied when a logout token verifies but matches no stored session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogoutFallback {
    /// Invalidate every valid session for the subject. Fail-safe over
    /// fail-precise; the default.
    InvalidateAll,
    /// Invalidate nothing and report that no session matched.
    Precise,
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    access_secret: SecretString,
    refresh_secret: SecretString,
    access_ttl_seconds: i64,
    refresh_ttl_seconds: i64,
    reset_token_ttl_seconds: i64,
    verification_token_ttl_seconds: i64,
    max_sessions: i64,
    logout_fallback: LogoutFallback,
}

impl AuthConfig {
    #[must_use]
    pub fn new(access_secret: impl Into<String>, refresh_secret: impl Into<String>) -> Self {
        Self {
            access_secret: SecretString::from(access_secret.into()),
            refresh_secret: SecretString::from(refresh_secret.into()),
            access_ttl_seconds: DEFAULT_ACCESS_TTL_SECONDS,
            refresh_ttl_seconds: DEFAULT_REFRESH_TTL_SECONDS,
            reset_token_ttl_seconds: DEFAULT_RESET_TOKEN_TTL_SECONDS,
            verification_token_ttl_seconds: DEFAULT_VERIFICATION_TOKEN_TTL_SECONDS,
            max_sessions: DEFAULT_MAX_SESSIONS,
            logout_fallback: LogoutFallback::InvalidateAll,
        }
    }

    /// Set the access-token ttl from a compact duration string ("15m").
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidDuration`] on anything outside `^\d+[smhd]$`.
    pub fn with_access_ttl(mut self, ttl: &str) -> Result<Self, AuthError> {
        self.access_ttl_seconds = parse_ttl(ttl)?;
        Ok(self)
    }

    /// Set the refresh-token ttl from a compact duration string ("7d").
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidDuration`] on anything outside `^\d+[smhd]$`.
    pub fn with_refresh_ttl(mut self, ttl: &str) -> Result<Self, AuthError> {
        self.refresh_ttl_seconds = parse_ttl(ttl)?;
        Ok(self)
    }

    /// Set the password-reset token window (default "1h").
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidDuration`] on anything outside `^\d+[smhd]$`.
    pub fn with_reset_token_ttl(mut self, ttl: &str) -> Result<Self, AuthError> {
        self.reset_token_ttl_seconds = parse_ttl(ttl)?;
        Ok(self)
    }

    /// Set the email-verification token window (default "24h").
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidDuration`] on anything outside `^\d+[smhd]$`.
    pub fn with_verification_token_ttl(mut self, ttl: &str) -> Result<Self, AuthError> {
        self.verification_token_ttl_seconds = parse_ttl(ttl)?;
        Ok(self)
    }

    /// Cap on concurrently valid sessions per user; values below 1 clamp to 1.
    #[must_use]
    pub fn with_max_sessions(mut self, max_sessions: i64) -> Self {
        self.max_sessions = max_sessions.max(1);
        self
    }

    #[must_use]
    pub fn with_logout_fallback(mut self, policy: LogoutFallback) -> Self {
        self.logout_fallback = policy;
        self
    }

    pub(crate) fn access_secret(&self) -> &SecretString {
        &self.access_secret
    }

    pub(crate) fn refresh_secret(&self) -> &SecretString {
        &self.refresh_secret
    }

    #[must_use]
    pub fn access_ttl_seconds(&self) -> i64 {
        self.access_ttl_seconds
    }

    #[must_use]
    pub fn refresh_ttl_seconds(&self) -> i64 {
        self.refresh_ttl_seconds
    }

    #[must_use]
    pub fn reset_token_ttl_seconds(&self) -> i64 {
        self.reset_token_ttl_seconds
    }

    #[must_use]
    pub fn verification_token_ttl_seconds(&self) -> i64 {
        self.verification_token_ttl_seconds
    }

    #[must_use]
    pub fn max_sessions(&self) -> i64 {
        self.max_sessions
    }

    #[must_use]
    pub fn logout_fallback(&self) -> LogoutFallback {
        self.logout_fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_overrides() -> Result<(), AuthError> {
        let config = AuthConfig::new("access", "refresh");

        assert_eq!(config.access_ttl_seconds(), super::DEFAULT_ACCESS_TTL_SECONDS);
        assert_eq!(
            config.refresh_ttl_seconds(),
            super::DEFAULT_REFRESH_TTL_SECONDS
        );
        assert_eq!(
            config.reset_token_ttl_seconds(),
            super::DEFAULT_RESET_TOKEN_TTL_SECONDS
        );
        assert_eq!(
            config.verification_token_ttl_seconds(),
            super::DEFAULT_VERIFICATION_TOKEN_TTL_SECONDS
        );
        assert_eq!(config.max_sessions(), super::DEFAULT_MAX_SESSIONS);
        assert_eq!(config.logout_fallback(), LogoutFallback::InvalidateAll);

        let config = config
            .with_access_ttl("5m")?
            .with_refresh_ttl("1d")?
            .with_reset_token_ttl("30m")?
            .with_verification_token_ttl("48h")?
            .with_max_sessions(2)
            .with_logout_fallback(LogoutFallback::Precise);

        assert_eq!(config.access_ttl_seconds(), 5 * 60);
        assert_eq!(config.refresh_ttl_seconds(), 24 * 60 * 60);
        assert_eq!(config.reset_token_ttl_seconds(), 30 * 60);
        assert_eq!(config.verification_token_ttl_seconds(), 48 * 60 * 60);
        assert_eq!(config.max_sessions(), 2);
        assert_eq!(config.logout_fallback(), LogoutFallback::Precise);
        Ok(())
    }

    #[test]
    fn bad_ttl_is_a_configuration_error() {
        let result = AuthConfig::new("access", "refresh").with_access_ttl("fifteen minutes");
        assert!(matches!(result, Err(AuthError::InvalidDuration(_))));
    }

    #[test]
    fn max_sessions_clamps_to_one() {
        let config = AuthConfig::new("access", "refresh").with_max_sessions(0);
        assert_eq!(config.max_sessions(), 1);
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let config = AuthConfig::new("super-secret-access", "super-secret-refresh");
        let printed = format!("{config:?}");
        assert!(!printed.contains("super-secret-access"));
        assert!(!printed.contains("super-secret-refresh"));
    }
}
