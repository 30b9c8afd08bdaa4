//! Authentication and session lifecycle core.
//!
//! Issues and verifies bearer credentials (short-lived access tokens,
//! longer-lived refresh tokens), keeps at most a configured number of
//! valid sessions per user with oldest-first eviction, and runs the
//! single-use recovery flows (password reset, email verification).
//!
//! Plaintext credentials and recovery secrets cross the API boundary
//! exactly once, at issuance; the store only ever holds their Argon2id
//! digests.
//!
//! ```no_run
//! use aliro::{AuthConfig, SessionManager};
//!
//! # async fn demo(pool: sqlx::PgPool) -> anyhow::Result<()> {
//! let config = AuthConfig::new("access secret", "refresh secret")
//!     .with_access_ttl("15m")?
//!     .with_max_sessions(5);
//! let sessions = SessionManager::new(pool, config);
//!
//! let tokens = sessions
//!     .login("alice@example.com", "hunter2", None, None)
//!     .await?;
//! let claims = sessions.verify_access(&tokens.access_token).await?;
//! assert_eq!(claims.sid, tokens.session_id);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod password;
pub mod recovery;
pub mod session;
pub mod store;
pub mod token;

pub use config::{AuthConfig, LogoutFallback};
pub use error::AuthError;
pub use password::PasswordHasher;
pub use recovery::{NoopNotifier, Notice, Notifier, RecoveryFlow};
pub use session::{SessionManager, SessionTokens};
pub use store::ephemeral::EphemeralPurpose;
pub use store::sessions::SessionRecord;
pub use token::{parse_ttl, Claims, TokenCodec, TokenPurpose};
