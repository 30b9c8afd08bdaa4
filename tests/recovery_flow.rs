//! Password reset and email verification flows against Postgres.

use std::sync::{Arc, Mutex};

use sqlx::PgPool;
use uuid::Uuid;

use aliro::{
    AuthConfig, AuthError, EphemeralPurpose, Notice, Notifier, PasswordHasher, RecoveryFlow,
    SessionManager,
};

const PASSWORD: &str = "correct horse battery staple";
const NEW_PASSWORD: &str = "a different passphrase entirely";

/// Captures every delivered notice for assertions.
#[derive(Default)]
struct CaptureNotifier {
    sent: Mutex<Vec<Notice>>,
}

impl CaptureNotifier {
    fn sent(&self) -> Vec<Notice> {
        self.sent.lock().expect("notifier lock").clone()
    }

    fn last_secret(&self) -> String {
        self.sent()
            .last()
            .expect("at least one notice delivered")
            .secret
            .clone()
    }
}

impl Notifier for CaptureNotifier {
    fn deliver(&self, notice: Notice) -> anyhow::Result<()> {
        self.sent.lock().expect("notifier lock").push(notice);
        Ok(())
    }
}

/// Fails every delivery; issuance must still succeed.
struct FailingNotifier;

impl Notifier for FailingNotifier {
    fn deliver(&self, _notice: Notice) -> anyhow::Result<()> {
        anyhow::bail!("smtp unreachable")
    }
}

fn test_hasher() -> PasswordHasher {
    PasswordHasher::with_params(4096, 1, 1).expect("valid test parameters")
}

fn test_config() -> AuthConfig {
    AuthConfig::new(
        "access-secret-long-enough-for-hmac",
        "refresh-secret-long-enough-for-hmac",
    )
}

fn flows(pool: &PgPool) -> (RecoveryFlow, Arc<CaptureNotifier>, SessionManager) {
    let notifier = Arc::new(CaptureNotifier::default());
    let recovery = RecoveryFlow::new(pool.clone(), test_config(), notifier.clone())
        .with_hasher(test_hasher());
    let sessions = SessionManager::new(pool.clone(), test_config()).with_hasher(test_hasher());
    (recovery, notifier, sessions)
}

async fn create_user(pool: &PgPool, email: &str) -> Uuid {
    let password_hash = test_hasher().hash(PASSWORD).expect("hashing");
    sqlx::query_scalar("INSERT INTO users (email, password_hash) VALUES ($1, $2) RETURNING id")
        .bind(email)
        .bind(password_hash)
        .fetch_one(pool)
        .await
        .expect("insert user")
}

async fn unused_token_count(pool: &PgPool, user_id: Uuid, purpose: EphemeralPurpose) -> i64 {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM ephemeral_tokens \
         WHERE user_id = $1 AND purpose = $2 AND NOT used",
    )
    .bind(user_id)
    .bind(purpose.as_str())
    .fetch_one(pool)
    .await
    .expect("count tokens")
}

#[sqlx::test]
async fn reset_flow_end_to_end(pool: PgPool) {
    let user_id = create_user(&pool, "alice@example.com").await;
    let (recovery, notifier, sessions) = flows(&pool);

    recovery
        .forgot_password("alice@example.com", Some("203.0.113.7"))
        .await
        .expect("forgot password");

    let notices = notifier.sent();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].purpose, EphemeralPurpose::PasswordReset);
    assert_eq!(notices[0].email, "alice@example.com");

    // The plaintext secret never lands in the store.
    let stored: String = sqlx::query_scalar(
        "SELECT token_hash FROM ephemeral_tokens WHERE user_id = $1",
    )
    .bind(user_id)
    .fetch_one(&pool)
    .await
    .expect("stored token");
    assert_ne!(stored, notices[0].secret);
    assert!(stored.starts_with("$argon2id$"));

    recovery
        .reset_password(user_id, &notices[0].secret, NEW_PASSWORD)
        .await
        .expect("reset password");

    let old = sessions.login("alice@example.com", PASSWORD, None, None).await;
    assert!(matches!(old, Err(AuthError::InvalidCredentials)));
    sessions
        .login("alice@example.com", NEW_PASSWORD, None, None)
        .await
        .expect("login with the new password");
}

#[sqlx::test]
async fn reset_secret_is_consumed_exactly_once(pool: PgPool) {
    let user_id = create_user(&pool, "alice@example.com").await;
    let (recovery, notifier, _) = flows(&pool);

    recovery
        .forgot_password("alice@example.com", None)
        .await
        .expect("forgot password");
    let secret = notifier.last_secret();

    recovery
        .reset_password(user_id, &secret, NEW_PASSWORD)
        .await
        .expect("first consumption");

    let replay = recovery
        .reset_password(user_id, &secret, "yet another password")
        .await;
    assert!(matches!(replay, Err(AuthError::InvalidOrExpiredToken)));
}

#[sqlx::test]
async fn reset_invalidates_every_session(pool: PgPool) {
    let user_id = create_user(&pool, "alice@example.com").await;
    let (recovery, notifier, sessions) = flows(&pool);

    let first = sessions
        .login("alice@example.com", PASSWORD, None, None)
        .await
        .expect("login");
    let second = sessions
        .login("alice@example.com", PASSWORD, None, None)
        .await
        .expect("login");

    recovery
        .forgot_password("alice@example.com", None)
        .await
        .expect("forgot password");
    recovery
        .reset_password(user_id, &notifier.last_secret(), NEW_PASSWORD)
        .await
        .expect("reset");

    for tokens in [first, second] {
        let result = sessions.verify_access(&tokens.access_token).await;
        assert!(matches!(result, Err(AuthError::TokenInvalid)));
    }
    assert!(sessions.list_sessions(user_id).await.expect("list").is_empty());
}

#[sqlx::test]
async fn expired_secret_is_rejected(pool: PgPool) {
    let user_id = create_user(&pool, "alice@example.com").await;
    let (recovery, notifier, _) = flows(&pool);

    recovery
        .forgot_password("alice@example.com", None)
        .await
        .expect("forgot password");
    sqlx::query("UPDATE ephemeral_tokens SET expires_at = NOW() - INTERVAL '1 minute'")
        .execute(&pool)
        .await
        .expect("expire token");

    let result = recovery
        .reset_password(user_id, &notifier.last_secret(), NEW_PASSWORD)
        .await;
    assert!(matches!(result, Err(AuthError::InvalidOrExpiredToken)));
}

#[sqlx::test]
async fn reissue_retires_the_previous_secret(pool: PgPool) {
    let user_id = create_user(&pool, "alice@example.com").await;
    let (recovery, notifier, _) = flows(&pool);

    recovery
        .forgot_password("alice@example.com", None)
        .await
        .expect("first request");
    recovery
        .forgot_password("alice@example.com", None)
        .await
        .expect("second request");

    let notices = notifier.sent();
    assert_eq!(notices.len(), 2);
    assert_ne!(notices[0].secret, notices[1].secret);
    assert_eq!(
        unused_token_count(&pool, user_id, EphemeralPurpose::PasswordReset).await,
        1
    );

    let stale = recovery
        .reset_password(user_id, &notices[0].secret, NEW_PASSWORD)
        .await;
    assert!(matches!(stale, Err(AuthError::InvalidOrExpiredToken)));

    recovery
        .reset_password(user_id, &notices[1].secret, NEW_PASSWORD)
        .await
        .expect("latest secret works");
}

#[sqlx::test]
async fn unknown_email_succeeds_silently(pool: PgPool) {
    let (recovery, notifier, _) = flows(&pool);

    recovery
        .forgot_password("nobody@example.com", None)
        .await
        .expect("no enumeration signal");

    assert!(notifier.sent().is_empty());
    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ephemeral_tokens")
        .fetch_one(&pool)
        .await
        .expect("count");
    assert_eq!(rows, 0);
}

#[sqlx::test]
async fn delivery_failure_does_not_fail_issuance(pool: PgPool) {
    let user_id = create_user(&pool, "alice@example.com").await;
    let recovery = RecoveryFlow::new(pool.clone(), test_config(), Arc::new(FailingNotifier))
        .with_hasher(test_hasher());

    recovery
        .forgot_password("alice@example.com", None)
        .await
        .expect("issuance succeeds despite delivery failure");

    assert_eq!(
        unused_token_count(&pool, user_id, EphemeralPurpose::PasswordReset).await,
        1
    );
}

#[sqlx::test]
async fn email_verification_flow(pool: PgPool) {
    let user_id = create_user(&pool, "alice@example.com").await;
    let (recovery, notifier, sessions) = flows(&pool);

    let tokens = sessions
        .login("alice@example.com", PASSWORD, None, None)
        .await
        .expect("login");

    recovery
        .request_email_verification(user_id, None)
        .await
        .expect("request verification");
    let notice = notifier.sent().pop().expect("notice delivered");
    assert_eq!(notice.purpose, EphemeralPurpose::EmailVerification);

    recovery
        .verify_email(user_id, &notice.secret)
        .await
        .expect("verify email");

    let verified: bool = sqlx::query_scalar("SELECT email_verified FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_one(&pool)
        .await
        .expect("flag");
    assert!(verified);

    // Verification does not touch sessions.
    sessions
        .verify_access(&tokens.access_token)
        .await
        .expect("session survives verification");

    let replay = recovery.verify_email(user_id, &notice.secret).await;
    assert!(matches!(replay, Err(AuthError::InvalidOrExpiredToken)));
}

#[sqlx::test]
async fn verification_request_for_unknown_user_is_not_found(pool: PgPool) {
    let (recovery, notifier, _) = flows(&pool);

    let result = recovery
        .request_email_verification(Uuid::new_v4(), None)
        .await;
    assert!(matches!(result, Err(AuthError::NotFound)));
    assert!(notifier.sent().is_empty());
}

#[sqlx::test]
async fn secrets_are_scoped_to_their_purpose(pool: PgPool) {
    let user_id = create_user(&pool, "alice@example.com").await;
    let (recovery, notifier, _) = flows(&pool);

    recovery
        .forgot_password("alice@example.com", None)
        .await
        .expect("reset request");
    let reset_secret = notifier.last_secret();

    // A reset secret cannot verify an email, and vice versa.
    let cross = recovery.verify_email(user_id, &reset_secret).await;
    assert!(matches!(cross, Err(AuthError::InvalidOrExpiredToken)));

    recovery
        .request_email_verification(user_id, None)
        .await
        .expect("verification request");
    let verify_secret = notifier.last_secret();

    let cross = recovery
        .reset_password(user_id, &verify_secret, NEW_PASSWORD)
        .await;
    assert!(matches!(cross, Err(AuthError::InvalidOrExpiredToken)));
}
